//! Canonical status line text and built-in error-page paths.

/// Returns the canonical reason phrase for a status code used by this
/// server (`200`, `400`, `403`, `404`). Anything else is unreachable in
/// practice since the response builder only ever assigns one of these.
pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        200 => "OK",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        _ => "Internal Server Error",
    }
}

/// Maps an error status code to its built-in error page path, if one
/// exists.
pub fn canonical_error_path(code: u16) -> Option<&'static str> {
    match code {
        400 => Some("/400.html"),
        403 => Some("/403.html"),
        404 => Some("/404.html"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_map_to_canonical_phrases() {
        assert_eq!(reason_phrase(200), "OK");
        assert_eq!(reason_phrase(404), "Not Found");
    }

    #[test]
    fn only_error_codes_have_builtin_pages() {
        assert_eq!(canonical_error_path(200), None);
        assert_eq!(canonical_error_path(404), Some("/404.html"));
    }
}
