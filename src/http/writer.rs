use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::http::response::{error_page, StatusCode};

const HTTP_VERSION: &str = "HTTP/1.1";

/// Size of the buffer used when streaming a body from a reader.
pub const CHUNK_SIZE: usize = 8192;

const SERVER_NAME: &str = "prefork_httpd";

/// Builds and writes one HTTP response onto a stream.
///
/// Status and headers stay mutable until the header block goes out. After
/// that, `headers_sent` is set and the status line and headers are never
/// written again for this response; header mutations are ignored.
pub struct ResponseWriter<'a, W> {
    stream: &'a mut W,
    status: StatusCode,
    headers: Vec<(String, String)>,
    headers_sent: bool,
}

impl<'a, W> ResponseWriter<'a, W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(stream: &'a mut W) -> Self {
        Self {
            stream,
            status: StatusCode::Ok,
            headers: Vec::new(),
            headers_sent: false,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        if self.headers_sent {
            tracing::debug!(status = status.as_u16(), "Status change after headers were sent ignored");
            return;
        }
        self.status = status;
    }

    /// Adds a header, replacing any previous value under the same name.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        if self.headers_sent {
            return;
        }

        let name = name.into();
        let value = value.into();

        match self.headers.iter_mut().find(|(k, _)| *k == name) {
            Some((_, v)) => *v = value,
            None => self.headers.push((name, value)),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    /// Writes the status line and header block, once.
    pub async fn send_headers(&mut self) -> std::io::Result<()> {
        if self.headers_sent {
            return Ok(());
        }

        let mut buf = Vec::with_capacity(256);

        // Status line
        buf.extend_from_slice(
            format!(
                "{} {} {}\r\n",
                HTTP_VERSION,
                self.status.as_u16(),
                self.status.reason_phrase()
            )
            .as_bytes(),
        );

        for (k, v) in &self.headers {
            buf.extend_from_slice(k.as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(v.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }

        // Header/body separator
        buf.extend_from_slice(b"\r\n");

        // Set before writing: a partial write must not lead to a second header block
        self.headers_sent = true;
        self.stream.write_all(&buf).await
    }

    /// Sends a buffered body, adding Content-Length unless already set.
    pub async fn send(&mut self, body: &[u8]) -> std::io::Result<()> {
        self.prepare_headers(body.len() as u64);
        self.send_headers().await?;
        self.stream.write_all(body).await?;
        self.stream.flush().await
    }

    /// Streams exactly `length` bytes from `reader` in `CHUNK_SIZE` pieces.
    ///
    /// Content-Length is set to `length` unless the caller already set one.
    /// Returns the number of body bytes written.
    pub async fn send_stream<R>(&mut self, reader: &mut R, length: u64) -> std::io::Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        self.prepare_headers(length);
        self.send_headers().await?;

        let mut chunk = vec![0u8; CHUNK_SIZE];
        let mut remaining = length;

        while remaining > 0 {
            let want = remaining.min(CHUNK_SIZE as u64) as usize;
            let n = reader.read(&mut chunk[..want]).await?;

            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("body ended {} bytes short of Content-Length", remaining),
                ));
            }

            self.stream.write_all(&chunk[..n]).await?;
            remaining -= n as u64;
        }

        self.stream.flush().await?;
        Ok(length)
    }

    /// Sends a small HTML error page for `status` carrying `message`.
    ///
    /// If headers already went out this only appends the page to the body,
    /// which is the best that can be done at that point.
    pub async fn send_error(&mut self, status: StatusCode, message: &str) -> std::io::Result<()> {
        let page = error_page(status, message);

        self.set_status(status);
        self.set_header("Content-Type", "text/html; charset=utf-8");
        self.send(page.as_bytes()).await
    }

    fn prepare_headers(&mut self, body_len: u64) {
        if self.headers_sent {
            return;
        }
        if self.header("Content-Length").is_none() {
            self.set_header("Content-Length", body_len.to_string());
        }
        if self.header("Connection").is_none() {
            self.set_header("Connection", "close");
        }
        if self.header("Server").is_none() {
            self.set_header("Server", SERVER_NAME);
        }
    }
}
