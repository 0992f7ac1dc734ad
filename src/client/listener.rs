//! TCP accept loop
//!
//! Each accepted connection gets its own named session thread. The
//! listener thread runs for the life of the process.

use crate::client::request::{ClientHandle, ConnectionId};
use crate::client::session::{run_session, SessionContext};
use crate::error::WorkerError;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info, warn};

/// Accepts client connections
pub struct ClientListener {
    listener: TcpListener,
    ctx: Arc<SessionContext>,
}

impl ClientListener {
    /// Bind the client port
    pub fn bind(addr: impl ToSocketAddrs, ctx: SessionContext) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(Self {
            listener,
            ctx: Arc::new(ctx),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the accept loop on its own thread
    pub fn spawn(self) -> Result<JoinHandle<()>, WorkerError> {
        thread::Builder::new()
            .name("client-listener".into())
            .spawn(move || self.accept_loop())
            .map_err(|e| WorkerError::SpawnFailed {
                name: "client-listener".into(),
                reason: e.to_string(),
            })
    }

    fn accept_loop(self) {
        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, "Listening for clients");
        }

        let mut next_id: ConnectionId = 1;
        for stream in self.listener.incoming() {
            match stream {
                Ok(stream) => {
                    let id = next_id;
                    next_id += 1;
                    if let Err(e) = spawn_session(id, stream, Arc::clone(&self.ctx)) {
                        error!(connection = id, error = %e, "Could not start session");
                    }
                }
                Err(e) => warn!(error = %e, "Accept failed"),
            }
        }
    }
}

fn spawn_session(id: ConnectionId, stream: TcpStream, ctx: Arc<SessionContext>) -> io::Result<()> {
    let client = ClientHandle::from_tcp(id, &stream)?;

    thread::Builder::new()
        .name(format!("client-{}", id))
        .spawn(move || run_session(stream, client, &ctx))?;
    Ok(())
}
