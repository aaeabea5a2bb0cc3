use anyhow::Context;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::files::StaticFileServer;
use crate::http::parser::{ParseError, RequestParser};
use crate::http::request::{Method, Request};
use crate::http::response::StatusCode;
use crate::http::writer::ResponseWriter;

/// One accepted connection: exactly one request in, one response out.
pub struct Connection<'a, S> {
    stream: S,
    files: &'a StaticFileServer,
    parser: RequestParser,
    state: ConnectionState,
}

pub enum ConnectionState {
    Reading,
    Dispatching(Request),
    Rejecting(StatusCode, String),
    Closed,
}

impl<'a, S> Connection<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, files: &'a StaticFileServer) -> Self {
        Self {
            stream,
            files,
            parser: RequestParser::default(),
            state: ConnectionState::Reading,
        }
    }

    /// Handles the request and closes the connection, whatever happened.
    pub async fn run(mut self) -> anyhow::Result<()> {
        let result = self.drive().await;

        if let Err(e) = self.stream.shutdown().await {
            tracing::debug!(error = %e, "Shutdown of client stream failed");
        }

        result
    }

    async fn drive(&mut self) -> anyhow::Result<()> {
        loop {
            match std::mem::replace(&mut self.state, ConnectionState::Closed) {
                ConnectionState::Reading => {
                    let mut reader = BufReader::new(&mut self.stream);

                    self.state = match self.parser.parse(&mut reader).await {
                        Ok(request) => ConnectionState::Dispatching(request),
                        Err(ParseError::Io(e)) => {
                            return Err(e).context("failed to read request");
                        }
                        Err(e) => {
                            tracing::info!(error = %e, "Bad request");
                            ConnectionState::Rejecting(StatusCode::BadRequest, e.to_string())
                        }
                    };
                }

                ConnectionState::Dispatching(request) => {
                    tracing::debug!(
                        method = %request.method,
                        path = %request.path,
                        version = %request.version,
                        "Request received"
                    );

                    match request.method {
                        Method::GET => {
                            self.serve(&request).await?;
                        }
                        other => {
                            tracing::info!(method = %other, path = %request.path, "Method not allowed");
                            self.state = ConnectionState::Rejecting(
                                StatusCode::MethodNotAllowed,
                                format!("Method {} is not allowed.", other),
                            );
                        }
                    }
                }

                ConnectionState::Rejecting(status, message) => {
                    let mut writer = ResponseWriter::new(&mut self.stream);
                    writer
                        .send_error(status, &message)
                        .await
                        .context("failed to send error response")?;
                }

                ConnectionState::Closed => {
                    break;
                }
            }
        }

        Ok(())
    }

    async fn serve(&mut self, request: &Request) -> anyhow::Result<()> {
        let mut writer = ResponseWriter::new(&mut self.stream);

        if let Err(e) = self.files.serve(request, &mut writer).await {
            if !writer.headers_sent() {
                if let Err(send_err) = writer
                    .send_error(StatusCode::InternalServerError, "The server encountered an internal error.")
                    .await
                {
                    tracing::debug!(error = %send_err, "Failed to send 500 response");
                }
            }
            return Err(e).with_context(|| format!("failed to serve {}", request.path));
        }

        Ok(())
    }
}
