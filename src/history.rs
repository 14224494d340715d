//! Chat history reconstruction: batches, timestamp ordering, and the
//! `CHATHISTORY`/`MARKREAD` request builders.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::warn;

use crate::message::Message;

/// Default page size for history requests.
const PAGE: u16 = 50;
/// Catch-up limit when the server advertises no page limit.
const CATCH_UP_LIMIT: u16 = 200;

/// Open `BATCH` tokens and the channel each is bound to.
#[derive(Clone, Debug, Default)]
pub struct PendingBatches {
    open: HashMap<String, String>,
}

impl PendingBatches {
    pub fn new() -> PendingBatches {
        PendingBatches::default()
    }

    /// Bind a token to a channel name.
    pub fn open(&mut self, token: &str, channel: &str) {
        self.open.insert(token.to_string(), channel.to_string());
    }

    /// Close a token, returning the channel it was bound to.
    pub fn close(&mut self, token: &str) -> Option<String> {
        self.open.remove(token)
    }

    /// The channel an open token targets.
    pub fn target(&self, token: &str) -> Option<&str> {
        self.open.get(token).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    /// Forget everything. Called on disconnect so a token the server
    /// never closed cannot wedge the channel's request flag.
    pub fn clear(&mut self) {
        self.open.clear();
    }
}

/// Insert keeping the list sorted by server time; stable for equal
/// timestamps. Batches are small and nearly ordered, so walking back
/// from the end is the right sort.
pub fn insert_by_time(messages: &mut Vec<Message>, msg: Message) {
    let time = msg.server_time();
    let mut index = messages.len();
    while index > 0 && messages[index - 1].server_time() > time {
        index -= 1;
    }
    messages.insert(index, msg);
}

/// Which direction a history fetch pages in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistoryFetch {
    /// Most recent page; first fetch for an empty channel.
    Latest,
    /// Older than the given anchor message.
    Before,
    /// Newer than the given anchor; reconnect catch-up.
    After,
}

/// Build a `CHATHISTORY` line.
///
/// `Before`/`After` need an anchor carrying a `time` tag; without one
/// the request is aborted rather than guessing a timestamp.
pub fn history_request(
    target: &str,
    fetch: HistoryFetch,
    anchor: Option<&Message>,
    server_limit: Option<u16>,
) -> Option<String> {
    let page = PAGE.min(server_limit.unwrap_or(PAGE));
    match fetch {
        HistoryFetch::Latest => Some(format!("CHATHISTORY LATEST {} * {}", target, page)),
        HistoryFetch::Before => {
            let ts = anchor_time(target, anchor)?;
            Some(format!("CHATHISTORY BEFORE {} timestamp={} {}", target, ts, page))
        }
        HistoryFetch::After => {
            let ts = anchor_time(target, anchor)?;
            let limit = server_limit.unwrap_or(CATCH_UP_LIMIT);
            Some(format!("CHATHISTORY AFTER {} timestamp={} {}", target, ts, limit))
        }
    }
}

fn anchor_time<'a>(target: &str, anchor: Option<&'a Message>) -> Option<&'a str> {
    let anchor = anchor?;
    match anchor.tag("time") {
        Some(ts) if !ts.is_empty() => Some(ts),
        _ => {
            warn!(target, "history anchor has no time tag; request aborted");
            None
        }
    }
}

/// Build a `MARKREAD` line for the given watermark.
pub fn markread_request(target: &str, at: DateTime<Utc>) -> String {
    format!(
        "MARKREAD {} timestamp={}",
        target,
        at.to_rfc3339_opts(SecondsFormat::Millis, true)
    )
}
