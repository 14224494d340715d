//! # comlink-core
//!
//! The protocol and connection engine of an interactive IRC client:
//! zero-copy message parsing, IRCv3 capability and SASL negotiation,
//! supervised connections with keepalive and backoff, and the
//! channel/user/history state machine — including `draft/chathistory`
//! replay, `draft/read-marker` watermarks, and
//! `soju.im/bouncer-networks` discovery.
//!
//! ## Layering
//!
//! - [`message`]: one line in, [`MessageRef`] out. Tags and params are
//!   lazy, non-allocating iterators.
//! - [`caps::Negotiator`]: sans-IO registration/SASL machine — feed it
//!   parsed messages, send the lines it returns.
//! - [`conn::Driver`]: one supervisory task per network; reconnects
//!   with capped exponential backoff and probes liveness with `PING`.
//! - [`outbox::Outbox`]: the single write pipeline all connections
//!   share; strictly FIFO per producer.
//! - [`engine::Engine`]: the foreground owner of all parsed state; the
//!   only component that mutates a [`state::Directory`].
//!
//! ## Quick start
//!
//! ```no_run
//! use comlink_core::{ConnectionConfig, Engine, EngineSettings, NoHooks};
//!
//! # async fn demo() {
//! let mut engine = Engine::new(EngineSettings::default(), NoHooks);
//! engine.add_network(ConnectionConfig::new("irc.libera.chat", "mynick", "secret"));
//! engine.run().await;
//! # }
//! ```

#![deny(clippy::all)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod bouncer;
pub mod caps;
pub mod casemap;
pub mod command;
pub mod config;
pub mod conn;
pub mod engine;
pub mod error;
pub mod history;
pub mod isupport;
pub mod message;
pub mod outbox;
pub mod sasl;
pub mod state;
pub mod transport;

pub use self::caps::{CapSet, Negotiator, CAP_NAMES};
pub use self::casemap::{irc_cmp, irc_eq, irc_to_lower};
pub use self::command::Command;
pub use self::config::{ConnectionConfig, EngineSettings};
pub use self::conn::{ConnId, Event, Status};
pub use self::engine::{Connection, Engine, Hooks, NoHooks};
pub use self::error::{MessageParseError, ProtocolError, Result};
pub use self::history::{HistoryFetch, PendingBatches};
pub use self::isupport::Features;
pub use self::message::{Message, MessageRef, Tag};
pub use self::outbox::{Outbox, WriteRequest};
pub use self::state::{Channel, Directory, Member, User, UserId};
pub use self::transport::{Transport, MAX_IRC_LINE_LEN};
