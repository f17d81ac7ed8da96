//! Status/header synthesis and mmap-backed response body.
//!
//! `stat`s the requested path to resolve a status code, rewrites to a
//! canonical error page if one applies, writes the status line and
//! headers into the connection's write buffer, then either
//! memory-maps the file body or falls back to an inline HTML error
//! body. The mapping is released automatically on `Drop`/
//! `Connection::init` via [`MappedFile`].

use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::buffer::Buffer;
use crate::http::{mime, status};

/// A scoped memory mapping, released on `Drop`. Thin wrapper over
/// `memmap2::Mmap`, which already unmaps on drop; this type exists so
/// the response builder has a named, RAII resource rather than a raw
/// pointer/length pair.
pub struct MappedFile {
    mmap: memmap2::Mmap,
}

impl MappedFile {
    fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        // Safety: the file is opened read-only immediately before mapping
        // and the mapping is private to this process; external
        // truncation racing the map is the same hazard the source
        // accepts (`mmap(..., MAP_PRIVATE, ...)`).
        let mmap = unsafe { memmap2::Mmap::map(&file)? };
        Ok(MappedFile { mmap })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap[..]
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}

/// Sentinel meaning "not yet decided"; resolved to 200/403/404 by `stat`.
const CODE_UNSET: u16 = 0;

/// Builds an HTTP/1.1 response for a single request.
pub struct Response {
    doc_root: PathBuf,
    path: String,
    keep_alive: bool,
    code: u16,
    mapped: Option<MappedFile>,
}

impl Response {
    pub fn new(doc_root: impl Into<PathBuf>) -> Self {
        Response {
            doc_root: doc_root.into(),
            path: String::new(),
            keep_alive: false,
            code: CODE_UNSET,
            mapped: None,
        }
    }

    /// Resets the builder for the next request on this connection,
    /// releasing any mapped body from the previous one.
    pub fn init(&mut self, path: &str, keep_alive: bool, code: Option<u16>) {
        self.path = path.to_string();
        self.keep_alive = keep_alive;
        self.code = code.unwrap_or(CODE_UNSET);
        self.mapped = None;
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// The currently mapped body, if the response is serving one from
    /// disk rather than an inline error body already appended to the
    /// header buffer.
    pub fn mapped_body(&self) -> Option<&[u8]> {
        self.mapped.as_ref().map(MappedFile::as_bytes)
    }

    /// Runs the full status-resolution / header-emission / body
    /// pipeline, writing the status line and headers (and, for inline
    /// error bodies, the body itself) into `header_buf`.
    pub fn make_response(&mut self, header_buf: &mut Buffer) {
        self.resolve_code();

        if let Some(canonical) = status::canonical_error_path(self.code) {
            self.path = canonical.to_string();
        }

        self.write_status_line(header_buf);
        self.write_common_headers(header_buf);
        self.write_body(header_buf);
    }

    fn resolve_code(&mut self) {
        if self.code != CODE_UNSET {
            return;
        }

        self.code = match resolve_served_path(&self.doc_root, &self.path) {
            None => 404,
            Some(full_path) => match fs::metadata(&full_path) {
                Ok(meta) if meta.is_dir() => 404,
                Ok(meta) if !world_readable(&meta) => 403,
                Ok(_) => 200,
                Err(_) => 404,
            },
        };
    }

    fn write_status_line(&self, buf: &mut Buffer) {
        let line = format!(
            "HTTP/1.1 {} {}\r\n",
            self.code,
            status::reason_phrase(self.code)
        );
        buf.append(line.as_bytes());
    }

    fn write_common_headers(&self, buf: &mut Buffer) {
        if self.keep_alive {
            buf.append(b"Connection: keep-alive\r\n");
            buf.append(b"keep-alive: max=6, timeout=120\r\n");
        } else {
            buf.append(b"Connection: close\r\n");
        }
        let content_type = format!("Content-type: {}\r\n", mime::for_path(&self.path));
        buf.append(content_type.as_bytes());
    }

    fn write_body(&mut self, buf: &mut Buffer) {
        let full_path = resolve_served_path(&self.doc_root, &self.path);
        let mapped = full_path.as_deref().and_then(|p| MappedFile::open(p).ok());

        match mapped {
            Some(mapped) => {
                let header = format!("Content-length: {}\r\n\r\n", mapped.len());
                buf.append(header.as_bytes());
                self.mapped = Some(mapped);
            }
            None => {
                self.mapped = None;
                let body = inline_error_body(self.code);
                let header = format!("Content-length: {}\r\n\r\n", body.len());
                buf.append(header.as_bytes());
                buf.append(body.as_bytes());
            }
        }
    }
}

fn world_readable(meta: &fs::Metadata) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o004 != 0
    }
    #[cfg(not(unix))]
    {
        let _ = meta;
        true
    }
}

/// Composes `doc_root + path`, rejecting traversal attempts before ever
/// touching the filesystem (no `..` or absolute component survives the
/// leading `/` strip) and re-checking after resolution that the path
/// still lives under `doc_root` once symlinks are resolved. Returns
/// `None` for any path that fails either check, which the caller
/// treats identically to "not found".
fn resolve_served_path(doc_root: &Path, path: &str) -> Option<PathBuf> {
    let relative = path.strip_prefix('/').unwrap_or(path);
    let candidate = Path::new(relative);
    for component in candidate.components() {
        match component {
            Component::Normal(_) => {}
            _ => return None,
        }
    }

    let full_path = doc_root.join(candidate);

    match (full_path.canonicalize(), doc_root.canonicalize()) {
        (Ok(resolved), Ok(root)) if resolved.starts_with(&root) => Some(full_path),
        (Ok(_), Ok(_)) => None,
        // File doesn't exist yet (404 path) or root itself is missing;
        // let the caller's `metadata`/`open` call surface that.
        _ => Some(full_path),
    }
}

/// Minimal inline body used when the resolved file (including the
/// canonical error page itself) cannot be opened or mapped.
fn inline_error_body(code: u16) -> String {
    format!(
        "<html><head><title>{code}</title></head><body><p>{}</p></body></html>",
        status::reason_phrase(code)
    )
}
