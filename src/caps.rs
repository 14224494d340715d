//! Capability negotiation and SASL handshake.
//!
//! [`Negotiator`] is sans-IO: it consumes parsed messages and returns the
//! lines to send, so the handshake is testable without a socket. The
//! driving task owns the transport and timers.

use tracing::{debug, warn};

use crate::command::Command;
use crate::message::MessageRef;
use crate::sasl::SaslPlain;

/// Capability names this client requests, one `CAP REQ` each.
pub const CAP_NAMES: [&str; 9] = [
    "sasl",
    "message-tags",
    "server-time",
    "batch",
    "away-notify",
    "multi-prefix",
    "draft/chathistory",
    "draft/read-marker",
    "soju.im/bouncer-networks",
];

/// The closed set of capability flags, one per entry in [`CAP_NAMES`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CapSet {
    pub sasl: bool,
    pub message_tags: bool,
    pub server_time: bool,
    pub batch: bool,
    pub away_notify: bool,
    pub multi_prefix: bool,
    pub chathistory: bool,
    pub read_marker: bool,
    pub bouncer_networks: bool,
}

impl CapSet {
    /// The flag backing a capability name, `None` for names we never
    /// requested.
    pub fn flag_mut(&mut self, name: &str) -> Option<&mut bool> {
        match name {
            "sasl" => Some(&mut self.sasl),
            "message-tags" => Some(&mut self.message_tags),
            "server-time" => Some(&mut self.server_time),
            "batch" => Some(&mut self.batch),
            "away-notify" => Some(&mut self.away_notify),
            "multi-prefix" => Some(&mut self.multi_prefix),
            "draft/chathistory" => Some(&mut self.chathistory),
            "draft/read-marker" => Some(&mut self.read_marker),
            "soju.im/bouncer-networks" => Some(&mut self.bouncer_networks),
            _ => None,
        }
    }
}

/// Per-connection registration and SASL state machine.
///
/// Flow: `CAP LS 302` and one `CAP REQ` per capability go out with
/// `NICK`/`USER` as the greeting; ACK/NAK replies are counted; when SASL
/// is acked the PLAIN exchange runs; `CAP END` closes negotiation either
/// from the SASL payload step or once the last REQ is answered.
#[derive(Clone, Debug)]
pub struct Negotiator {
    nick: String,
    username: String,
    real_name: String,
    sasl: SaslPlain,
    /// Network id to `BOUNCER BIND` after authentication, for
    /// connections spawned by bouncer discovery.
    bind_network: Option<String>,
    /// Flags acked by the server.
    pub caps: CapSet,
    pending_reqs: usize,
    auth_started: bool,
    cap_end_sent: bool,
    registered: bool,
}

impl Negotiator {
    pub fn new(
        nick: String,
        username: String,
        real_name: String,
        sasl: SaslPlain,
        bind_network: Option<String>,
    ) -> Negotiator {
        Negotiator {
            nick,
            username,
            real_name,
            sasl,
            bind_network,
            caps: CapSet::default(),
            pending_reqs: 0,
            auth_started: false,
            cap_end_sent: false,
            registered: false,
        }
    }

    /// Whether the welcome numeric has arrived.
    pub fn registered(&self) -> bool {
        self.registered
    }

    /// The nick this connection registered with.
    pub fn nick(&self) -> &str {
        &self.nick
    }

    /// The lines to send immediately after transport connect.
    ///
    /// One `CAP REQ` per capability: servers may ACK or NAK each name
    /// individually.
    pub fn greeting(&mut self) -> Vec<String> {
        let mut lines = Vec::with_capacity(CAP_NAMES.len() + 3);
        lines.push("CAP LS 302".to_string());
        for name in CAP_NAMES {
            lines.push(format!("CAP REQ :{}", name));
        }
        self.pending_reqs = CAP_NAMES.len();
        lines.push(format!("NICK {}", self.nick));
        lines.push(format!("USER {} 0 * :{}", self.username, self.real_name));
        lines
    }

    /// Feed one server message; returns lines to send in reply.
    pub fn feed(&mut self, msg: &MessageRef<'_>) -> Vec<String> {
        match msg.command {
            Command::Cap => self.on_cap(msg),
            Command::Authenticate => self.on_authenticate(msg),
            Command::Welcome => {
                self.registered = true;
                Vec::new()
            }
            Command::LoggedIn | Command::SaslSuccess => {
                debug!(command = %msg.command_word, "sasl accepted");
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn on_cap(&mut self, msg: &MessageRef<'_>) -> Vec<String> {
        let subcmd = msg.param(1).unwrap_or("");
        let names = msg.param(2).unwrap_or("");
        let mut out = Vec::new();

        if subcmd.eq_ignore_ascii_case("ACK") {
            for name in names.split_whitespace() {
                if let Some(flag) = self.caps.flag_mut(name) {
                    *flag = true;
                } else {
                    debug!(cap = name, "ack for unrequested capability");
                }
                self.pending_reqs = self.pending_reqs.saturating_sub(1);
            }
            if self.caps.sasl && !self.auth_started {
                self.auth_started = true;
                out.push("AUTHENTICATE PLAIN".to_string());
            }
            out.extend(self.maybe_cap_end());
        } else if subcmd.eq_ignore_ascii_case("NAK") {
            for name in names.split_whitespace() {
                warn!(cap = name, "capability refused");
                self.pending_reqs = self.pending_reqs.saturating_sub(1);
            }
            out.extend(self.maybe_cap_end());
        } else if subcmd.eq_ignore_ascii_case("DEL") {
            for name in names.split_whitespace() {
                if let Some(flag) = self.caps.flag_mut(name) {
                    *flag = false;
                }
            }
        }
        // LS replies are informational; requests were already sent.

        out
    }

    fn on_authenticate(&mut self, msg: &MessageRef<'_>) -> Vec<String> {
        if msg.param(0) != Some("+") {
            return Vec::new();
        }
        let mut out = vec![format!("AUTHENTICATE {}", self.sasl.payload())];
        if let Some(id) = &self.bind_network {
            out.push(format!("BOUNCER BIND {}", id));
        }
        if !self.cap_end_sent {
            self.cap_end_sent = true;
            out.push("CAP END".to_string());
        }
        out
    }

    /// `CAP END` once every outstanding REQ is answered and no SASL
    /// exchange will produce it instead.
    fn maybe_cap_end(&mut self) -> Option<String> {
        if self.pending_reqs == 0 && !self.auth_started && !self.cap_end_sent {
            self.cap_end_sent = true;
            Some("CAP END".to_string())
        } else {
            None
        }
    }
}
