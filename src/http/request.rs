//! Request parsing
//!
//! Reads one request (request line, headers, `Content-Length` body) from a
//! buffered stream. Chunked bodies are rejected.

use std::io::{self, BufRead, Read};

use thiserror::Error;

/// Upper bound on the request line plus all header lines
pub const MAX_HEADER_BYTES: usize = 16 * 1024;

/// Why a request could not be read
#[derive(Debug, Error)]
pub enum RequestError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("request body of {0} bytes exceeds the limit")]
    TooLarge(usize),
}

/// A parsed HTTP request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    /// Request target as sent, including any query string
    pub target: String,
    pub version: String,
    /// Header names are lowercased
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    /// Read the next request
    ///
    /// Returns `Ok(None)` if the stream ends before a request starts.
    pub fn read_from<R: BufRead>(reader: &mut R, max_body: usize) -> Result<Option<Self>, RequestError> {
        let mut budget = MAX_HEADER_BYTES;

        // Tolerate blank lines between pipelined requests
        let request_line = loop {
            match read_line(reader, &mut budget)? {
                None => return Ok(None),
                Some(line) if line.is_empty() => continue,
                Some(line) => break line,
            }
        };

        let mut parts = request_line.split_whitespace();
        let (method, target, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(t), Some(v), None) => (m.to_string(), t.to_string(), v.to_string()),
            _ => return Err(RequestError::Malformed(format!("bad request line {:?}", request_line))),
        };
        if !version.starts_with("HTTP/1.") {
            return Err(RequestError::Malformed(format!("unsupported version {}", version)));
        }
        if !target.starts_with('/') {
            return Err(RequestError::Malformed(format!("bad request target {}", target)));
        }

        let mut headers = Vec::new();
        loop {
            let line = read_line(reader, &mut budget)?
                .ok_or_else(|| RequestError::Malformed("connection closed inside headers".into()))?;
            if line.is_empty() {
                break;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| RequestError::Malformed(format!("bad header line {:?}", line)))?;
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }

        let mut request = Self {
            method,
            target,
            version,
            headers,
            body: Vec::new(),
        };

        if request
            .header("transfer-encoding")
            .map_or(false, |te| !te.eq_ignore_ascii_case("identity"))
        {
            return Err(RequestError::Malformed("chunked bodies are not supported".into()));
        }

        let length = match request.header("content-length") {
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| RequestError::Malformed(format!("bad content-length {:?}", raw)))?,
            None => 0,
        };
        if length > max_body {
            return Err(RequestError::TooLarge(length));
        }

        request.body = vec![0u8; length];
        reader.read_exact(&mut request.body)?;

        Ok(Some(request))
    }

    /// Path without the query string
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or("/")
    }

    /// First header with this (case-insensitive) name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether the client wants the connection kept open afterwards
    pub fn keep_alive(&self) -> bool {
        match self.header("connection") {
            Some(c) if c.eq_ignore_ascii_case("close") => false,
            Some(c) if c.eq_ignore_ascii_case("keep-alive") => true,
            _ => self.version != "HTTP/1.0",
        }
    }
}

/// Read one CRLF (or LF) terminated line, charging it against `budget`
fn read_line<R: BufRead>(reader: &mut R, budget: &mut usize) -> Result<Option<String>, RequestError> {
    let mut raw = Vec::new();
    let limit = (*budget as u64) + 1;
    let n = reader.by_ref().take(limit).read_until(b'\n', &mut raw)?;
    if n == 0 {
        return Ok(None);
    }
    if n > *budget {
        return Err(RequestError::Malformed("headers too large".into()));
    }
    *budget -= n;

    if raw.last() != Some(&b'\n') {
        return Err(RequestError::Malformed("connection closed mid-line".into()));
    }
    raw.pop();
    if raw.last() == Some(&b'\r') {
        raw.pop();
    }

    String::from_utf8(raw)
        .map(Some)
        .map_err(|_| RequestError::Malformed("header is not valid UTF-8".into()))
}
