use crate::http::request::{Method, Request};
use bytes::BytesMut;
use std::collections::HashMap;
use std::fmt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Longest accepted request line, excluding the `\r\n` or `\n` terminator.
pub const MAX_REQUEST_LINE: usize = 8192;
/// Longest accepted header line, excluding the `\r\n` or `\n` terminator.
pub const MAX_HEADER_LINE: usize = 8192;
/// Most header lines accepted before the blank line.
pub const MAX_HEADERS: usize = 100;

#[derive(Debug)]
pub enum ParseError {
    /// Request line is missing the method or the path token
    InvalidRequestLine,
    /// Method token is neither GET nor POST
    UnsupportedMethod(String),
    RequestLineTooLong,
    HeaderTooLarge,
    TooManyHeaders,
    /// Header line has no colon separator
    InvalidHeader,
    /// Stream ended before a complete request line
    UnexpectedEof,
    Io(std::io::Error),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::InvalidRequestLine => f.write_str("Malformed request line"),
            ParseError::UnsupportedMethod(m) => write!(f, "Unsupported method '{}'", m),
            ParseError::RequestLineTooLong => f.write_str("Request line too long"),
            ParseError::HeaderTooLarge => f.write_str("Header line too long"),
            ParseError::TooManyHeaders => f.write_str("Too many header lines"),
            ParseError::InvalidHeader => f.write_str("Malformed header line"),
            ParseError::UnexpectedEof => f.write_str("Connection closed before a complete request"),
            ParseError::Io(e) => write!(f, "I/O error while reading request: {}", e),
        }
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ParseError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ParseError {
    fn from(e: std::io::Error) -> Self {
        ParseError::Io(e)
    }
}

/// Reads one request (request line plus header block) from a buffered stream.
///
/// Every line is read into a capped buffer: a line longer than the cap is
/// rejected as soon as the cap is crossed rather than buffered in full.
#[derive(Debug, Clone)]
pub struct RequestParser {
    pub max_request_line: usize,
    pub max_header_line: usize,
    pub max_headers: usize,
}

impl Default for RequestParser {
    fn default() -> Self {
        Self {
            max_request_line: MAX_REQUEST_LINE,
            max_header_line: MAX_HEADER_LINE,
            max_headers: MAX_HEADERS,
        }
    }
}

enum Line {
    Complete(BytesMut),
    TooLong,
    Eof,
}

impl RequestParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn parse<R>(&self, reader: &mut R) -> Result<Request, ParseError>
    where
        R: AsyncBufRead + Unpin,
    {
        let line = match read_line(reader, self.max_request_line).await? {
            Line::Complete(line) => line,
            Line::TooLong => return Err(ParseError::RequestLineTooLong),
            Line::Eof => return Err(ParseError::UnexpectedEof),
        };

        let line = std::str::from_utf8(&line).map_err(|_| ParseError::InvalidRequestLine)?;
        let (method, path, version) = parse_request_line(line)?;

        let mut headers = HashMap::new();

        loop {
            let line = match read_line(reader, self.max_header_line).await? {
                Line::Complete(line) => line,
                Line::TooLong => return Err(ParseError::HeaderTooLarge),
                // Client closed its side after the headers; what we have is the request
                Line::Eof => break,
            };

            if line.is_empty() {
                break;
            }

            if headers.len() >= self.max_headers {
                return Err(ParseError::TooManyHeaders);
            }

            let line = std::str::from_utf8(&line).map_err(|_| ParseError::InvalidHeader)?;
            let (key, value) = parse_header_line(line)?;
            headers.insert(key, value);
        }

        Ok(Request {
            method,
            path,
            version,
            headers,
        })
    }
}

/// Splits a request line into method, path and version.
///
/// The version token is optional and defaults to `HTTP/1.0`.
pub fn parse_request_line(line: &str) -> Result<(Method, String, String), ParseError> {
    let mut parts = line.split(' ').filter(|p| !p.is_empty());

    let method_str = parts.next().ok_or(ParseError::InvalidRequestLine)?;
    let path = parts.next().ok_or(ParseError::InvalidRequestLine)?;
    let version = parts.next().unwrap_or("HTTP/1.0");

    let method = Method::from_token(method_str)
        .ok_or_else(|| ParseError::UnsupportedMethod(method_str.to_string()))?;

    Ok((method, path.to_string(), version.to_string()))
}

/// Splits `Name: Value`. The name keeps its original case.
pub fn parse_header_line(line: &str) -> Result<(String, String), ParseError> {
    let (key, value) = line
        .split_once(':')
        .ok_or(ParseError::InvalidHeader)?;

    let key = key.trim();
    if key.is_empty() {
        return Err(ParseError::InvalidHeader);
    }

    Ok((key.to_string(), value.trim().to_string()))
}

/// Reads up to and including `\n`, returning the line without `\r\n`.
///
/// `limit` applies to the line content; the terminator does not count.
async fn read_line<R>(reader: &mut R, limit: usize) -> Result<Line, ParseError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = BytesMut::with_capacity(256);

    loop {
        let available = reader.fill_buf().await?;

        if available.is_empty() {
            return Ok(Line::Eof);
        }

        match available.iter().position(|&b| b == b'\n') {
            Some(i) => {
                let ends_in_cr = match i {
                    0 => line.last() == Some(&b'\r'),
                    _ => available[i - 1] == b'\r',
                };
                if line.len() + i - usize::from(ends_in_cr) > limit {
                    return Ok(Line::TooLong);
                }
                line.extend_from_slice(&available[..i]);
                reader.consume(i + 1);

                if line.last() == Some(&b'\r') {
                    line.truncate(line.len() - 1);
                }
                return Ok(Line::Complete(line));
            }
            None => {
                let n = available.len();
                // One extra byte may be the `\r` of a split terminator
                if line.len() + n > limit + 1 {
                    return Ok(Line::TooLong);
                }
                line.extend_from_slice(available);
                reader.consume(n);
            }
        }
    }
}
