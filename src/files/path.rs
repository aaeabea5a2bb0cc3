//! Textual path helpers. None of these touch the filesystem.

/// True if the raw request path contains a parent-directory token anywhere.
pub fn has_traversal(path: &str) -> bool {
    path.contains("..")
}

/// Drops any query string or fragment from a request target.
pub fn strip_query(path: &str) -> &str {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    &path[..end]
}

/// Ensures a leading `/`.
pub fn normalize(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

/// Appends an already-normalized request path to `root` with one separator.
pub fn join(root: &str, path: &str) -> String {
    let root = root.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{}/{}", root, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_adds_leading_separator() {
        assert_eq!(normalize("a.txt"), "/a.txt");
        assert_eq!(normalize("/a.txt"), "/a.txt");
    }

    #[test]
    fn join_uses_single_separator() {
        assert_eq!(join("/srv/www/", "/index.html"), "/srv/www/index.html");
        assert_eq!(join("/srv/www", "index.html"), "/srv/www/index.html");
    }

    #[test]
    fn strip_query_and_fragment() {
        assert_eq!(strip_query("/a.html?x=1"), "/a.html");
        assert_eq!(strip_query("/a.html#top"), "/a.html");
        assert_eq!(strip_query("/a.html"), "/a.html");
    }

    #[test]
    fn traversal_detected_anywhere() {
        assert!(has_traversal("/../etc/passwd"));
        assert!(has_traversal("/a/b/.."));
        assert!(!has_traversal("/a/./b"));
    }
}
