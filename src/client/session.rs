//! One client connection
//!
//! A session reads framed messages, turns each into a request and queues
//! it. Bad requests are answered right away with an error response and the
//! connection stays open. When the peer goes away the session removes its
//! queued requests.

use crate::client::framing::MessageReader;
use crate::client::options::{DatabaseSelector, SearchOptions};
use crate::client::query::{parse_sequence, Alphabet, Profile, Query};
use crate::client::request::{ClientHandle, Command, Request, SearchRequest};
use crate::command_queue::CommandQueue;
use crate::error::{ClientError, ClientResult};
use crate::shard::DatabaseCatalog;
use crate::stats::PipelineMode;
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What every session needs
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub queue: Arc<CommandQueue>,
    pub catalog: Arc<DatabaseCatalog>,
}

/// Serve a connection until the peer closes it or a transport error occurs
pub fn run_session<R: Read>(reader: R, client: ClientHandle, ctx: &SessionContext) {
    let mut reader = MessageReader::new(reader);
    info!(connection = client.id(), addr = %client.addr(), "Client connected");

    loop {
        let message = match reader.read_message() {
            Ok(Some(message)) => message,
            Ok(None) => break,
            Err(e) => {
                warn!(addr = %client.addr(), error = %e, "Read failed, closing connection");
                break;
            }
        };

        match parse_message(&message, &ctx.catalog) {
            Ok(command) => {
                debug!(connection = client.id(), "Queued request");
                ctx.queue.push(Request::new(command, Some(client.clone())));
            }
            Err(err) => {
                info!(addr = %client.addr(), error = %err, "Rejected request");
                if let Err(e) = client.send_error(&err) {
                    warn!(addr = %client.addr(), error = %e, "Failed to send error response");
                    break;
                }
            }
        }
    }

    let discarded = ctx.queue.discard_connection(client.id());
    info!(
        connection = client.id(),
        addr = %client.addr(),
        discarded,
        "Client disconnected"
    );
}

/// Parse one framed message into a command
pub fn parse_message(message: &[u8], catalog: &DatabaseCatalog) -> ClientResult<Command> {
    let text = String::from_utf8_lossy(message);
    let body = strip_terminator(&text).trim_start();

    if let Some(rest) = body.strip_prefix('!') {
        let word = rest.split_whitespace().next().unwrap_or("");
        return match word {
            "shutdown" => Ok(Command::Shutdown),
            other => Err(ClientError::UnknownCommand(other.to_string())),
        };
    }

    let Some(rest) = body.strip_prefix('@') else {
        return Err(ClientError::MissingOptions);
    };

    let (option_line, payload) = rest.split_once('\n').unwrap_or((rest, ""));
    let payload = payload.trim_start();
    if payload.is_empty() {
        return Err(ClientError::MissingQuery);
    }

    let options = SearchOptions::parse_option_string(option_line)?;
    let selector = options.database()?;
    let database = catalog.resolve(selector)?;
    let query = parse_query(payload, selector)?;

    let mode = match selector {
        DatabaseSelector::Sequences(_) => PipelineMode::SearchSeqs,
        DatabaseSelector::Models(_) => PipelineMode::ScanModels,
    };

    Ok(Command::Search(SearchRequest {
        mode,
        database,
        query,
        options,
    }))
}

/// Decide the payload format from its first bytes and parse it
fn parse_query(payload: &str, selector: DatabaseSelector) -> ClientResult<Query> {
    if payload.starts_with('>') {
        return parse_sequence(payload, Alphabet::Amino).map(Query::Sequence);
    }

    if payload.starts_with("HMM") {
        if matches!(selector, DatabaseSelector::Models(_)) {
            return Err(ClientError::ProfileAgainstModels);
        }
        return Profile::parse(payload, Alphabet::Amino)
            .map(Query::Profile)
            .map_err(ClientError::BadProfile);
    }

    Err(ClientError::UnknownFormat)
}

/// Drop the trailing `//` line
fn strip_terminator(text: &str) -> &str {
    let trimmed = text.trim_end();
    trimmed.strip_suffix("//").unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::query::tests::TINY_PROFILE;
    use crate::shard::DatabaseKind;

    fn catalog() -> DatabaseCatalog {
        DatabaseCatalog::new(vec![DatabaseKind::Sequences, DatabaseKind::Models])
    }

    fn parse(text: &str) -> ClientResult<Command> {
        parse_message(text.as_bytes(), &catalog())
    }

    #[test]
    fn test_shutdown_command() {
        assert!(matches!(parse("!shutdown\n//\n"), Ok(Command::Shutdown)));
    }

    #[test]
    fn test_unknown_command() {
        assert_eq!(
            parse("!reboot now\n//\n").unwrap_err(),
            ClientError::UnknownCommand("reboot".into())
        );
    }

    #[test]
    fn test_missing_options() {
        assert_eq!(parse(">q\nACDE\n//\n").unwrap_err(), ClientError::MissingOptions);
    }

    #[test]
    fn test_missing_query() {
        assert_eq!(parse("@--seqdb 1\n//\n").unwrap_err(), ClientError::MissingQuery);
    }

    #[test]
    fn test_scan_with_sequence() {
        let Command::Search(req) = parse("@--hmmdb 2 -E 1\n>q desc\nACDEFGHIK\n//\n").unwrap() else {
            panic!("expected a search");
        };
        assert_eq!(req.mode, PipelineMode::ScanModels);
        assert_eq!(req.database, 1);
        assert_eq!(req.query.name(), "q");
        assert_eq!(req.query.length(), 9);
    }

    #[test]
    fn test_search_with_profile() {
        let msg = format!("@--seqdb 1\n{}", TINY_PROFILE);
        let Command::Search(req) = parse(&msg).unwrap() else {
            panic!("expected a search");
        };
        assert_eq!(req.mode, PipelineMode::SearchSeqs);
        assert_eq!(req.database, 0);
        assert!(matches!(req.query, Query::Profile(_)));
    }

    #[test]
    fn test_profile_against_models_rejected() {
        let msg = format!("@--hmmdb 2\n{}", TINY_PROFILE);
        assert_eq!(parse(&msg).unwrap_err(), ClientError::ProfileAgainstModels);
    }

    #[test]
    fn test_wrong_kind_and_range() {
        assert!(matches!(
            parse("@--seqdb 2\n>q\nAC\n//\n"),
            Err(ClientError::WrongDatabaseKind { .. })
        ));
        assert!(matches!(
            parse("@--seqdb 9\n>q\nAC\n//\n"),
            Err(ClientError::UnknownDatabase { .. })
        ));
    }

    #[test]
    fn test_unknown_payload_format() {
        assert_eq!(
            parse("@--seqdb 1\nLOCUS x\n//\n").unwrap_err(),
            ClientError::UnknownFormat
        );
    }

    #[test]
    fn test_session_discards_on_close() {
        use std::io::sink;

        let ctx = SessionContext {
            queue: Arc::new(CommandQueue::new()),
            catalog: Arc::new(catalog()),
        };
        let client = ClientHandle::new(42, "test", sink());

        // Two good requests then EOF: both are queued, then removed on close
        let input = b"@--hmmdb 2\n>q\nACDE\n//\n@--hmmdb 2\n>r\nKLMN\n//\n";
        run_session(&input[..], client, &ctx);

        assert!(ctx.queue.is_empty());
        assert_eq!(
            ctx.queue
                .stats()
                .discarded
                .load(std::sync::atomic::Ordering::Relaxed),
            2
        );
    }
}
