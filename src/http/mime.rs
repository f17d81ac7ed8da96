//! Static suffix → MIME type lookup table for the response builder.

/// Looks up the MIME type for a request path by its lowercase suffix,
/// defaulting to `text/plain` for anything unrecognized.
pub fn for_path(path: &str) -> &'static str {
    let suffix = match path.rfind('.') {
        Some(i) => &path[i..],
        None => return "text/plain",
    };

    match suffix.to_ascii_lowercase().as_str() {
        ".html" => "text/html",
        ".xml" => "text/xml",
        ".xhtml" => "application/xhtml+xml",
        ".txt" => "text/plain",
        ".rtf" => "application/rtf",
        ".pdf" => "application/pdf",
        ".word" => "application/msword",
        ".png" => "image/png",
        ".gif" => "image/gif",
        ".jpg" | ".jpeg" => "image/jpeg",
        ".au" => "audio/basic",
        ".mpeg" | ".mpg" => "video/mpeg",
        ".avi" => "video/x-msvideo",
        ".gz" => "application/x-gzip",
        ".tar" => "application/x-tar",
        ".css" => "text/css",
        ".js" => "text/javascript",
        _ => "text/plain",
    }
}
