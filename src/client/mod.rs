//! Client intake
//!
//! - `framing`: splits the byte stream into `//`-terminated messages
//! - `options`: per-request option strings
//! - `query`: sequence and profile payloads
//! - `request`: parsed requests and the reply handle
//! - `session`: one connection's read loop
//! - `listener`: the accept loop

pub mod framing;
pub mod listener;
pub mod options;
pub mod query;
pub mod request;
pub mod session;

pub use listener::ClientListener;
pub use options::{DatabaseSelector, SearchOptions};
pub use query::{Alphabet, Profile, Query, Sequence};
pub use request::{ClientHandle, Command, CommandKind, ConnectionId, Request, SearchRequest};
pub use session::{parse_message, run_session, SessionContext};
