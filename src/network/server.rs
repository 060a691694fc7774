//! TCP Server
//!
//! Accepts connections and hands each one to its own thread.

use std::io::{ErrorKind, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::Config;
use crate::error::{LodeError, Result};
use crate::http::{Response, Service};
use crate::store::Store;

use super::Connection;

/// How long the acceptor sleeps when no connection is pending
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// HTTP server for LodeKV
pub struct Server {
    config: Config,
    service: Arc<Service>,
    listener: TcpListener,
    shutdown: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
}

impl Server {
    /// Bind `config.listen_addr`
    pub fn bind(config: Config, store: Arc<Store>) -> Result<Self> {
        let listener = TcpListener::bind(&config.listen_addr)?;
        listener.set_nonblocking(true)?;
        let service = Arc::new(Service::new(store)?);

        Ok(Self {
            config,
            service,
            listener,
            shutdown: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Flag that stops `run` when set
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Signal the server to shutdown gracefully
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Request shutdown on SIGINT or SIGTERM
    ///
    /// Installs a process-wide handler; fails if one is already installed.
    pub fn shutdown_on_signal(&self) -> Result<()> {
        let shutdown = Arc::clone(&self.shutdown);
        ctrlc::set_handler(move || {
            tracing::info!("shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        })
        .map_err(|e| LodeError::Config(format!("cannot install signal handler: {}", e)))
    }

    /// Request handling state shared with connections
    pub fn service(&self) -> &Arc<Service> {
        &self.service
    }

    /// Number of connections currently being served
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Accept connections until shutdown (blocking)
    ///
    /// Waits for open connections to finish before returning.
    pub fn run(&self) -> Result<()> {
        tracing::info!(addr = %self.local_addr()?, "server listening");

        let mut workers: Vec<JoinHandle<()>> = Vec::new();

        while !self.shutdown.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    workers.retain(|w| !w.is_finished());
                    if let Err(e) = self.dispatch(stream, peer, &mut workers) {
                        tracing::warn!(peer = %peer, error = %e, "failed to start connection");
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL_INTERVAL),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
            }
        }

        tracing::info!(open = workers.len(), "server shutting down, draining connections");
        for worker in workers {
            if worker.join().is_err() {
                tracing::error!("connection thread panicked");
            }
        }
        Ok(())
    }

    fn dispatch(&self, stream: TcpStream, peer: SocketAddr, workers: &mut Vec<JoinHandle<()>>) -> Result<()> {
        stream.set_nonblocking(false)?;

        if self.active.load(Ordering::SeqCst) >= self.config.max_connections {
            tracing::warn!(peer = %peer, limit = self.config.max_connections, "connection limit reached");
            let mut stream = stream;
            let _ = Response::error(503, "Too many connections").write_to(&mut stream, false);
            let _ = stream.flush();
            return Ok(());
        }

        let mut connection = Connection::new(stream, Arc::clone(&self.service), Arc::clone(&self.shutdown))?;
        connection.set_timeouts(self.config.read_timeout_ms, self.config.write_timeout_ms)?;

        let active = Arc::clone(&self.active);
        active.fetch_add(1, Ordering::SeqCst);
        let spawned = thread::Builder::new()
            .name(format!("lodekv-conn-{}", peer))
            .spawn(move || {
                if let Err(e) = connection.handle() {
                    tracing::warn!(peer = %connection.peer_addr(), error = %e, "connection closed with error");
                }
                active.fetch_sub(1, Ordering::SeqCst);
            });

        match spawned {
            Ok(worker) => {
                workers.push(worker);
                Ok(())
            }
            Err(e) => {
                self.active.fetch_sub(1, Ordering::SeqCst);
                Err(e.into())
            }
        }
    }
}
