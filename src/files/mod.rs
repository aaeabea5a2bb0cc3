//! Static file resolution and delivery.
//!
//! A request path is turned into a file under the configured root in two
//! stages. The textual stage rejects any path containing `..`, joins the
//! path onto the root and checks the result starts with the root string.
//! Once the file is open, the canonical stage resolves symlinks on both sides
//! and rejects files that land outside the canonical root. The canonical
//! stage means a symlink inside the root pointing elsewhere is refused with
//! 403, where the textual check alone would have served it.

pub mod path;

use std::fmt;
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::AsyncWrite;

use crate::http::mime::content_type_for;
use crate::http::request::Request;
use crate::http::response::StatusCode;
use crate::http::writer::ResponseWriter;

/// Served when the request path is exactly `/`.
pub const INDEX_PATH: &str = "/index.html";

#[derive(Debug)]
pub enum ServeError {
    /// Raw path contained `..`
    TraversalAttempt,
    /// Candidate path is not inside the root
    OutsideRoot,
    PermissionDenied,
    IsDirectory,
    NotFound,
    Internal(std::io::Error),
}

impl ServeError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServeError::TraversalAttempt
            | ServeError::OutsideRoot
            | ServeError::PermissionDenied
            | ServeError::IsDirectory => StatusCode::Forbidden,
            ServeError::NotFound => StatusCode::NotFound,
            ServeError::Internal(_) => StatusCode::InternalServerError,
        }
    }

    /// Text shown to the client inside the error page.
    pub fn public_message(&self) -> &'static str {
        match self {
            ServeError::TraversalAttempt => "Path traversal is not allowed.",
            ServeError::OutsideRoot => "The requested path is outside the document root.",
            ServeError::PermissionDenied => "Access to the requested file is denied.",
            ServeError::IsDirectory => "Directory listing is not supported.",
            ServeError::NotFound => "The requested file was not found on this server.",
            ServeError::Internal(_) => "The server could not read the requested file.",
        }
    }

    fn from_open_error(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => ServeError::NotFound,
            std::io::ErrorKind::PermissionDenied => ServeError::PermissionDenied,
            _ if e.raw_os_error() == Some(libc::ENOTDIR) => ServeError::NotFound,
            _ => ServeError::Internal(e),
        }
    }
}

impl fmt::Display for ServeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServeError::Internal(e) => write!(f, "internal error: {}", e),
            other => f.write_str(other.public_message()),
        }
    }
}

impl std::error::Error for ServeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServeError::Internal(e) => Some(e),
            _ => None,
        }
    }
}

/// A file ready to be streamed.
#[derive(Debug)]
pub struct OpenedFile {
    pub file: File,
    pub path: PathBuf,
    pub len: u64,
}

/// Serves files from a single document root.
#[derive(Debug, Clone)]
pub struct StaticFileServer {
    root: String,
    canonical_root: Option<PathBuf>,
}

impl StaticFileServer {
    pub fn new(root: impl Into<String>) -> Self {
        let root = root.into();

        let canonical_root = match std::fs::canonicalize(&root) {
            Ok(p) => Some(p),
            Err(e) => {
                tracing::warn!(root = %root, error = %e, "Document root cannot be resolved");
                None
            }
        };

        Self {
            root,
            canonical_root,
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Maps a raw request path to a candidate file path, textually.
    pub fn resolve(&self, raw_path: &str) -> Result<PathBuf, ServeError> {
        if path::has_traversal(raw_path) {
            return Err(ServeError::TraversalAttempt);
        }

        let mut normalized = path::normalize(path::strip_query(raw_path));
        if normalized == "/" {
            normalized = INDEX_PATH.to_string();
        }

        let candidate = path::join(&self.root, &normalized);

        if !candidate.starts_with(self.root.as_str()) {
            return Err(ServeError::OutsideRoot);
        }

        Ok(PathBuf::from(candidate))
    }

    /// Resolves and opens a file, rejecting directories and escapes.
    pub async fn open(&self, raw_path: &str) -> Result<OpenedFile, ServeError> {
        let candidate = self.resolve(raw_path)?;

        let file = File::open(&candidate)
            .await
            .map_err(ServeError::from_open_error)?;

        let metadata = file.metadata().await.map_err(ServeError::Internal)?;
        if metadata.is_dir() {
            return Err(ServeError::IsDirectory);
        }

        self.check_canonical(&candidate).await?;

        Ok(OpenedFile {
            file,
            path: candidate,
            len: metadata.len(),
        })
    }

    async fn check_canonical(&self, candidate: &Path) -> Result<(), ServeError> {
        let Some(canonical_root) = &self.canonical_root else {
            return Ok(());
        };

        let resolved = tokio::fs::canonicalize(candidate)
            .await
            .map_err(ServeError::from_open_error)?;

        if !resolved.starts_with(canonical_root) {
            tracing::warn!(
                path = %candidate.display(),
                resolved = %resolved.display(),
                "File resolves outside the document root"
            );
            return Err(ServeError::OutsideRoot);
        }

        Ok(())
    }

    /// Writes the response for `request` through `writer`.
    ///
    /// Resolution failures become error pages. The returned error is only for
    /// failures writing to the client.
    pub async fn serve<W>(
        &self,
        request: &Request,
        writer: &mut ResponseWriter<'_, W>,
    ) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut opened = match self.open(&request.path).await {
            Ok(opened) => opened,
            Err(e) => {
                match &e {
                    ServeError::Internal(_) => {
                        tracing::error!(path = %request.path, error = %e, "Failed to open file")
                    }
                    _ => tracing::info!(
                        path = %request.path,
                        status = e.status().as_u16(),
                        "Request rejected: {}",
                        e
                    ),
                }
                return writer.send_error(e.status(), e.public_message()).await;
            }
        };

        writer.set_status(StatusCode::Ok);
        writer.set_header("Content-Type", content_type_for(&opened.path));

        let sent = writer.send_stream(&mut opened.file, opened.len).await?;

        tracing::info!(
            path = %request.path,
            status = 200,
            bytes = sent,
            "Served file"
        );

        Ok(())
    }
}
