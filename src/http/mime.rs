//! Extension to content-type lookup.

use std::path::Path;

/// Returned for unknown or missing extensions.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Content type for a file, by extension (case-insensitive).
pub fn content_type_for(path: impl AsRef<Path>) -> &'static str {
    let ext = match path.as_ref().extension().and_then(|e| e.to_str()) {
        Some(ext) => ext.to_ascii_lowercase(),
        None => return DEFAULT_CONTENT_TYPE,
    };

    match ext.as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "application/javascript",
        "json" => "application/json",
        "txt" => "text/plain",
        "xml" => "application/xml",
        "csv" => "text/csv",
        "md" => "text/markdown",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "webp" => "image/webp",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "wasm" => "application/wasm",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => DEFAULT_CONTENT_TYPE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_extensions() {
        assert_eq!(content_type_for("index.html"), "text/html");
        assert_eq!(content_type_for("/a/b/style.CSS"), "text/css");
        assert_eq!(content_type_for("logo.png"), "image/png");
    }

    #[test]
    fn unknown_or_missing_extension_is_binary() {
        assert_eq!(content_type_for("archive.xyz"), DEFAULT_CONTENT_TYPE);
        assert_eq!(content_type_for("Makefile"), DEFAULT_CONTENT_TYPE);
    }
}
