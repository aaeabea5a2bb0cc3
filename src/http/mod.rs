//! HTTP protocol implementation.
//!
//! Just enough HTTP/1.x to serve static files: one request is read and one
//! response is written per connection, then the connection is closed.
//!
//! # Architecture
//!
//! - **`connection`**: Drives a single accepted connection through its states
//! - **`parser`**: Reads the request line and headers with bounded buffers
//! - **`request`**: HTTP request representation
//! - **`response`**: Status codes and the error page template
//! - **`writer`**: Emits the status line, headers and a buffered or streamed body
//! - **`mime`**: MIME type detection based on file extensions
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← Parse request line and headers
//!        └──────┬──────┘
//!               │
//!        ┌──────┴──────────────┐
//!        │ parsed              │ parse error
//!        ▼                     ▼
//!  ┌─────────────┐      ┌─────────────┐
//!  │ Dispatching │─────▶│  Rejecting  │ ← 400 / 405 error page
//!  └──────┬──────┘ !GET └──────┬──────┘
//!         │ GET: serve file    │
//!         ▼                    ▼
//!        ┌─────────────────────┐
//!        │       Closed        │ ← Stream shut down unconditionally
//!        └─────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use prefork_httpd::files::StaticFileServer;
//! use prefork_httpd::http::connection::Connection;
//! use tokio::net::TcpListener;
//!
//! async fn accept_one(listener: &TcpListener, files: &StaticFileServer) -> anyhow::Result<()> {
//!     let (socket, _addr) = listener.accept().await?;
//!     Connection::new(socket, files).run().await
//! }
//! ```

pub mod request;
pub mod response;
pub mod parser;
pub mod connection;
pub mod writer;
pub mod mime;
