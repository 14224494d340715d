//! Owned messages as retained in channel buffers.

use chrono::{DateTime, Utc};

use crate::command::Command;

use super::borrowed::MessageRef;

/// An owned IRC message plus the local receive timestamp.
///
/// The raw line is the single source of truth; views are re-parsed on
/// demand, which keeps retained history to one allocation per message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    line: String,
    received: DateTime<Utc>,
}

impl Message {
    /// Wrap a raw line with an explicit receive time.
    pub fn new(line: String, received: DateTime<Utc>) -> Message {
        Message { line, received }
    }

    /// Wrap a raw line received just now.
    pub fn now(line: String) -> Message {
        Message {
            line,
            received: Utc::now(),
        }
    }

    /// The raw line.
    pub fn raw(&self) -> &str {
        &self.line
    }

    /// Local receive time.
    pub fn received(&self) -> DateTime<Utc> {
        self.received
    }

    /// Re-parse the line. `None` when the line is malformed, which can
    /// only happen for locally synthesized diagnostics.
    pub fn view(&self) -> Option<MessageRef<'_>> {
        MessageRef::parse(&self.line).ok()
    }

    /// The recognized command, [`Command::Unknown`] for unparsable lines.
    pub fn command(&self) -> Command {
        self.view().map_or(Command::Unknown, |v| v.command)
    }

    /// The `n`-th parameter.
    pub fn param(&self, n: usize) -> Option<&str> {
        // Params borrow from self.line, not from the temporary view.
        self.view().and_then(|v| v.param(n))
    }

    /// Raw value of a message tag.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.view().and_then(|v| v.tag(key))
    }

    /// Nick portion of the source.
    pub fn source_nick(&self) -> Option<&str> {
        self.view().and_then(|v| v.source_nick())
    }

    /// The authoritative timestamp for ordering: the `server-time` tag
    /// when present and well-formed, the local receive time otherwise.
    pub fn server_time(&self) -> DateTime<Utc> {
        self.tag("time")
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(self.received)
    }
}
