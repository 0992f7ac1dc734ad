//! Parsed client requests and the handle used to answer them

use crate::client::options::SearchOptions;
use crate::client::query::Query;
use crate::codec;
use crate::error::ClientError;
use crate::stats::PipelineMode;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::io::{self, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use tracing::debug;

/// Identifies one client connection for the lifetime of the process
pub type ConnectionId = u64;

/// What a request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Query profile against a sequence database
    Search,
    /// Query sequence against a model database
    Scan,
    /// Stop the coordinator and the cluster
    Shutdown,
}

/// A validated search or scan
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub mode: PipelineMode,

    /// Zero-based index into the loaded databases
    pub database: usize,

    pub query: Query,
    pub options: SearchOptions,
}

/// Parsed command
#[derive(Debug, Clone)]
pub enum Command {
    Search(SearchRequest),
    Shutdown,
}

/// A queued request
#[derive(Debug, Clone)]
pub struct Request {
    pub command: Command,

    /// Connection to answer; `None` for requests raised inside the process
    pub origin: Option<ClientHandle>,

    pub received_at: DateTime<Utc>,
}

impl Request {
    pub fn new(command: Command, origin: Option<ClientHandle>) -> Self {
        Self {
            command,
            origin,
            received_at: Utc::now(),
        }
    }

    /// Shutdown request not tied to a connection
    pub fn shutdown() -> Self {
        Self::new(Command::Shutdown, None)
    }

    pub fn kind(&self) -> CommandKind {
        match &self.command {
            Command::Search(s) => match s.mode {
                PipelineMode::SearchSeqs => CommandKind::Search,
                PipelineMode::ScanModels => CommandKind::Scan,
            },
            Command::Shutdown => CommandKind::Shutdown,
        }
    }

    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.origin.as_ref().map(ClientHandle::id)
    }
}

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// Write side of a client connection
///
/// Cloned into every request from the connection. Writes hold the lock for
/// a whole response so responses never interleave.
#[derive(Clone)]
pub struct ClientHandle {
    id: ConnectionId,
    addr: String,
    writer: SharedWriter,

    /// Socket to shut down on `close`
    socket: Option<Arc<TcpStream>>,
}

impl ClientHandle {
    pub fn new<W: Write + Send + 'static>(id: ConnectionId, addr: impl Into<String>, writer: W) -> Self {
        Self {
            id,
            addr: addr.into(),
            writer: Arc::new(Mutex::new(Box::new(writer))),
            socket: None,
        }
    }

    /// Handle writing to an accepted TCP connection
    pub fn from_tcp(id: ConnectionId, stream: &TcpStream) -> io::Result<Self> {
        let addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".into());
        Ok(Self::new(id, addr, stream.try_clone()?).with_socket(stream.try_clone()?))
    }

    /// Attach the socket that `close` shuts down
    pub fn with_socket(mut self, socket: TcpStream) -> Self {
        self.socket = Some(Arc::new(socket));
        self
    }

    /// Shut the connection down in both directions
    ///
    /// The session thread reading it sees end of stream and discards the
    /// connection's queued requests.
    pub fn close(&self) {
        if let Some(socket) = &self.socket {
            if let Err(e) = socket.shutdown(Shutdown::Both) {
                debug!(connection = self.id, error = %e, "Socket already closed");
            }
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Peer address as text
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Write several blocks as one response, stopping at the first failure
    pub fn write_blocks(&self, blocks: &[&[u8]]) -> io::Result<()> {
        let mut writer = self.writer.lock();
        for block in blocks {
            writer.write_all(block)?;
        }
        writer.flush()
    }

    /// Report a request error: status header then message + NUL
    pub fn send_error(&self, err: &ClientError) -> io::Result<()> {
        let (header, body) = codec::encode_error(err.status(), &err.to_string())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.write_blocks(&[&header, &body])
    }
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{read_search_response, SearchResponse};
    use crate::stats::StatusCode;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_send_error_frames_message() {
        let out = SharedBuf::default();
        let handle = ClientHandle::new(7, "127.0.0.1:5000", out.clone());

        handle.send_error(&ClientError::MissingQuery).unwrap();

        let bytes = out.0.lock().clone();
        let response = read_search_response(&mut bytes.as_slice()).unwrap();
        assert_eq!(
            response,
            SearchResponse::Error {
                status: StatusCode::Format.as_u32(),
                message: "Missing search sequence/hmm".into(),
            }
        );
    }

    #[test]
    fn test_shutdown_request_has_no_origin() {
        let req = Request::shutdown();
        assert_eq!(req.kind(), CommandKind::Shutdown);
        assert!(req.connection_id().is_none());
    }
}
