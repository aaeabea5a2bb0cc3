mod common;

use common::{header_value, split_response, TempDir};
use prefork_httpd::files::{ServeError, StaticFileServer};
use prefork_httpd::http::request::{Method, RequestBuilder};
use prefork_httpd::http::response::StatusCode;
use prefork_httpd::http::writer::ResponseWriter;
use std::path::PathBuf;

async fn serve(files: &StaticFileServer, path: &str) -> (String, String, Vec<u8>) {
    let request = RequestBuilder::new()
        .method(Method::GET)
        .path(path)
        .build()
        .unwrap();

    let mut out = Vec::new();
    let mut writer = ResponseWriter::new(&mut out);
    files.serve(&request, &mut writer).await.unwrap();

    split_response(&out)
}

#[test]
fn test_resolve_root_maps_to_index() {
    let files = StaticFileServer::new("/srv/www");

    assert_eq!(files.resolve("/").unwrap(), PathBuf::from("/srv/www/index.html"));
    assert_eq!(
        files.resolve("/").unwrap(),
        files.resolve("/index.html").unwrap()
    );
}

#[test]
fn test_resolve_adds_leading_separator() {
    let files = StaticFileServer::new("/srv/www");

    assert_eq!(files.resolve("a.txt").unwrap(), PathBuf::from("/srv/www/a.txt"));
}

#[test]
fn test_resolve_rejects_any_parent_token() {
    let files = StaticFileServer::new("/srv/www");

    for path in ["/../etc/passwd", "/a/../b.txt", "/a/..", "..", "/x/../../y"] {
        assert!(
            matches!(files.resolve(path), Err(ServeError::TraversalAttempt)),
            "{} was not rejected",
            path
        );
    }
}

#[test]
fn test_resolve_strips_query_string() {
    let files = StaticFileServer::new("/srv/www");

    assert_eq!(
        files.resolve("/style.css?v=3").unwrap(),
        PathBuf::from("/srv/www/style.css")
    );
}

#[test]
fn test_serve_error_status_mapping() {
    assert_eq!(ServeError::TraversalAttempt.status(), StatusCode::Forbidden);
    assert_eq!(ServeError::OutsideRoot.status(), StatusCode::Forbidden);
    assert_eq!(ServeError::PermissionDenied.status(), StatusCode::Forbidden);
    assert_eq!(ServeError::IsDirectory.status(), StatusCode::Forbidden);
    assert_eq!(ServeError::NotFound.status(), StatusCode::NotFound);
    assert_eq!(
        ServeError::Internal(std::io::Error::other("boom")).status(),
        StatusCode::InternalServerError
    );
}

#[tokio::test]
async fn test_serve_index_for_root() {
    let dir = TempDir::new("index");
    dir.write("index.html", b"<h1>home</h1>");
    let files = StaticFileServer::new(dir.path_str());

    let (status, headers, body) = serve(&files, "/").await;

    assert_eq!(status, "HTTP/1.1 200 OK");
    assert_eq!(header_value(&headers, "Content-Type"), Some("text/html"));
    assert_eq!(header_value(&headers, "Content-Length"), Some("13"));
    assert_eq!(body, b"<h1>home</h1>");
}

#[tokio::test]
async fn test_serve_large_file_streams_exact_length() {
    let dir = TempDir::new("large");
    let data: Vec<u8> = (0..100_000u32).map(|i| (i % 256) as u8).collect();
    dir.write("blob.bin", &data);
    let files = StaticFileServer::new(dir.path_str());

    let (status, headers, body) = serve(&files, "/blob.bin").await;

    assert_eq!(status, "HTTP/1.1 200 OK");
    assert_eq!(
        header_value(&headers, "Content-Type"),
        Some("application/octet-stream")
    );
    assert_eq!(
        header_value(&headers, "Content-Length"),
        Some(data.len().to_string().as_str())
    );
    assert_eq!(headers.matches("Content-Length").count(), 1);
    assert_eq!(body, data);
}

#[tokio::test]
async fn test_serve_nested_file() {
    let dir = TempDir::new("nested");
    dir.write("css/site.css", b"body{}");
    let files = StaticFileServer::new(dir.path_str());

    let (status, headers, body) = serve(&files, "/css/site.css").await;

    assert_eq!(status, "HTTP/1.1 200 OK");
    assert_eq!(header_value(&headers, "Content-Type"), Some("text/css"));
    assert_eq!(body, b"body{}");
}

#[tokio::test]
async fn test_serve_missing_file_is_404() {
    let dir = TempDir::new("missing");
    let files = StaticFileServer::new(dir.path_str());

    let (status, _, body) = serve(&files, "/missing.txt").await;

    assert_eq!(status, "HTTP/1.1 404 Not Found");
    assert!(String::from_utf8(body).unwrap().contains("404 Not Found"));
}

#[tokio::test]
async fn test_serve_path_below_file_is_404() {
    let dir = TempDir::new("notdir");
    dir.write("a.txt", b"a");
    let files = StaticFileServer::new(dir.path_str());

    let (status, _, _) = serve(&files, "/a.txt/b").await;

    assert_eq!(status, "HTTP/1.1 404 Not Found");
}

#[tokio::test]
async fn test_serve_directory_is_403() {
    let dir = TempDir::new("dir");
    dir.mkdir("sub");
    let files = StaticFileServer::new(dir.path_str());

    let (status, _, _) = serve(&files, "/sub").await;

    assert_eq!(status, "HTTP/1.1 403 Forbidden");
}

#[tokio::test]
async fn test_serve_traversal_is_403() {
    let dir = TempDir::new("traversal");
    dir.write("index.html", b"x");
    let files = StaticFileServer::new(dir.path_str());

    let (status, _, _) = serve(&files, "/../../etc/passwd").await;

    assert_eq!(status, "HTTP/1.1 403 Forbidden");
}

#[cfg(unix)]
#[tokio::test]
async fn test_serve_symlink_escaping_root_is_403() {
    let outside = TempDir::new("outside");
    let secret = outside.write("secret.txt", b"secret");

    let dir = TempDir::new("symlink");
    std::os::unix::fs::symlink(&secret, dir.path().join("link.txt")).unwrap();
    let files = StaticFileServer::new(dir.path_str());

    let (status, _, body) = serve(&files, "/link.txt").await;

    assert_eq!(status, "HTTP/1.1 403 Forbidden");
    assert!(!body.windows(6).any(|w| w == b"secret"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_serve_symlink_inside_root_is_allowed() {
    let dir = TempDir::new("inner_link");
    let target = dir.write("real.txt", b"real");
    std::os::unix::fs::symlink(&target, dir.path().join("alias.txt")).unwrap();
    let files = StaticFileServer::new(dir.path_str());

    let (status, _, body) = serve(&files, "/alias.txt").await;

    assert_eq!(status, "HTTP/1.1 200 OK");
    assert_eq!(body, b"real");
}
