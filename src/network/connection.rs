//! Connection Handler
//!
//! Serves HTTP requests from one client until it disconnects.

use std::io::{BufReader, BufWriter, ErrorKind};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{LodeError, Result};
use crate::http::{Request, RequestError, Response, Service};

/// Handles a single client connection
pub struct Connection {
    /// TCP stream reader (buffered for efficiency)
    reader: BufReader<TcpStream>,

    /// TCP stream writer (buffered for efficiency)
    writer: BufWriter<TcpStream>,

    service: Arc<Service>,

    /// Server-wide shutdown flag; stops keep-alive after the current request
    shutdown: Arc<AtomicBool>,

    max_body_size: usize,

    /// Peer address for logging
    peer_addr: String,
}

impl Connection {
    /// Create a new connection handler
    pub fn new(stream: TcpStream, service: Arc<Service>, shutdown: Arc<AtomicBool>) -> Result<Self> {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        let read_stream = stream.try_clone()?;
        let max_body_size = service.store().config().max_body_size;

        Ok(Self {
            reader: BufReader::new(read_stream),
            writer: BufWriter::new(stream),
            service,
            shutdown,
            max_body_size,
            peer_addr,
        })
    }

    /// Configure connection timeouts (0 disables)
    pub fn set_timeouts(&mut self, read_ms: u64, write_ms: u64) -> Result<()> {
        if read_ms > 0 {
            self.reader
                .get_ref()
                .set_read_timeout(Some(Duration::from_millis(read_ms)))?;
        }
        if write_ms > 0 {
            self.writer
                .get_ref()
                .set_write_timeout(Some(Duration::from_millis(write_ms)))?;
        }
        Ok(())
    }

    /// Handle the connection (blocking until closed)
    ///
    /// Reads requests in a loop and sends responses. Returns when the client
    /// disconnects, asks to close, idles past the read timeout, or sends
    /// something unparseable.
    pub fn handle(&mut self) -> Result<()> {
        tracing::debug!(peer = %self.peer_addr, "connection established");

        loop {
            let request = match Request::read_from(&mut self.reader, self.max_body_size) {
                Ok(Some(request)) => request,
                Ok(None) => {
                    tracing::debug!(peer = %self.peer_addr, "client disconnected");
                    return Ok(());
                }
                Err(RequestError::Io(e)) if is_disconnect(e.kind()) || is_timeout(e.kind()) => {
                    tracing::debug!(peer = %self.peer_addr, reason = %e, "closing connection");
                    return Ok(());
                }
                Err(RequestError::Io(e)) => return Err(LodeError::Io(e)),
                Err(RequestError::TooLarge(len)) => {
                    tracing::warn!(peer = %self.peer_addr, len, "request body too large");
                    let message = format!("Request body exceeds {} bytes", self.max_body_size);
                    return self.send_final(Response::error(413, &message));
                }
                Err(RequestError::Malformed(reason)) => {
                    tracing::warn!(peer = %self.peer_addr, reason = %reason, "malformed request");
                    return self.send_final(Response::error(400, &reason));
                }
            };

            tracing::trace!(peer = %self.peer_addr, method = %request.method, target = %request.target, "request");

            let keep_alive = request.keep_alive() && !self.shutdown.load(Ordering::SeqCst);
            let response = self.service.handle(&request);

            tracing::debug!(
                method = %request.method,
                path = %request.path(),
                status = response.status,
                "handled request"
            );

            match response.write_to(&mut self.writer, keep_alive) {
                Ok(()) => {}
                Err(e) if is_disconnect(e.kind()) => {
                    tracing::debug!(peer = %self.peer_addr, error = %e, "client disconnected before response was sent");
                    return Ok(());
                }
                Err(e) => return Err(LodeError::Io(e)),
            }

            if !keep_alive {
                return Ok(());
            }
        }
    }

    /// Send an error response and close
    fn send_final(&mut self, response: Response) -> Result<()> {
        match response.write_to(&mut self.writer, false) {
            Ok(()) => Ok(()),
            Err(e) if is_disconnect(e.kind()) => Ok(()),
            Err(e) => Err(LodeError::Io(e)),
        }
    }

    /// Get the peer address string
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }
}

fn is_disconnect(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
    )
}

/// Read timeout (Windows reports TimedOut instead of WouldBlock)
fn is_timeout(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::WouldBlock | ErrorKind::TimedOut)
}
