//! The foreground engine: owns all connection state and dispatches
//! every parsed message.
//!
//! Drivers and the write pipeline do the I/O; the engine task is the
//! single place Directories, negotiators and batch state mutate, so
//! none of it needs locks. Handlers compute lines to send and hand them
//! to the outbox afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::DateTime;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::bouncer::{self, NetworkAttrs};
use crate::caps::Negotiator;
use crate::casemap::irc_eq;
use crate::command::Command;
use crate::config::{ConnectionConfig, EngineSettings};
use crate::conn::{ConnId, Driver, Event, Status, StatusCell};
use crate::history::{self, HistoryFetch, PendingBatches};
use crate::isupport::Features;
use crate::message::{Message, MessageRef};
use crate::outbox::Outbox;
use crate::sasl::SaslPlain;
use crate::state::Directory;

const EVENT_QUEUE_DEPTH: usize = 256;

/// Callback boundary for the scripting collaborator.
///
/// Hooks run synchronously on the engine task after state mutation.
/// Errors are logged and never crash the engine.
pub trait Hooks {
    fn on_connect(&mut self, conn: &Connection) -> anyhow::Result<()> {
        let _ = conn;
        Ok(())
    }

    fn on_message(
        &mut self,
        conn: &Connection,
        channel: &str,
        sender: &str,
        content: &str,
    ) -> anyhow::Result<()> {
        let _ = (conn, channel, sender, content);
        Ok(())
    }
}

/// The do-nothing hook set.
pub struct NoHooks;

impl Hooks for NoHooks {}

/// One LIST reply row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListEntry {
    pub channel: String,
    pub users: u32,
    pub topic: String,
}

/// Engine-side state for one network connection.
pub struct Connection {
    pub id: ConnId,
    pub config: ConnectionConfig,
    /// Bouncer network id when this connection was spawned by discovery.
    pub network_id: Option<String>,
    /// Bouncer-advertised network name.
    pub network_name: Option<String>,
    pub features: Features,
    pub dir: Directory,
    /// Channel LIST accumulation; sealed once 323 arrives.
    pub list: Vec<ListEntry>,
    pub list_done: bool,
    negotiator: Negotiator,
    batches: PendingBatches,
    status: Arc<StatusCell>,
    shutdown: watch::Sender<bool>,
}

impl Connection {
    pub fn status(&self) -> Status {
        self.status.get()
    }

    pub fn registered(&self) -> bool {
        self.negotiator.registered()
    }

    /// The nick this connection uses.
    pub fn nick(&self) -> &str {
        self.negotiator.nick()
    }

    fn is_self(&self, nick: &str) -> bool {
        irc_eq(nick, self.negotiator.nick())
    }
}

fn make_negotiator(config: &ConnectionConfig, bind_network: Option<String>) -> Negotiator {
    Negotiator::new(
        config.nick.clone(),
        config.username().to_string(),
        config.real_name().to_string(),
        SaslPlain::new(config.username(), config.password.clone()),
        bind_network,
    )
}

/// The engine: one per process, one task.
pub struct Engine<H> {
    connections: HashMap<ConnId, Connection>,
    next_id: ConnId,
    settings: EngineSettings,
    outbox: Outbox,
    events_tx: mpsc::Sender<Event>,
    events_rx: mpsc::Receiver<Event>,
    hooks: H,
}

impl<H: Hooks> Engine<H> {
    pub fn new(settings: EngineSettings, hooks: H) -> Engine<H> {
        Engine::with_outbox(settings, hooks, Outbox::spawn())
    }

    /// An engine over a caller-supplied write pipeline. With
    /// [`Outbox::capture`] this exercises full protocol flows without
    /// sockets.
    pub fn with_outbox(settings: EngineSettings, hooks: H, outbox: Outbox) -> Engine<H> {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        Engine {
            connections: HashMap::new(),
            next_id: 1,
            settings,
            outbox,
            events_tx,
            events_rx,
            hooks,
        }
    }

    /// Register a network and spawn its driver.
    pub fn add_network(&mut self, config: ConnectionConfig) -> ConnId {
        self.register(config, None, None, true)
    }

    /// Register a network without a driver; events are fed through
    /// [`Engine::handle_event`] by the caller.
    pub fn add_network_detached(&mut self, config: ConnectionConfig) -> ConnId {
        self.register(config, None, None, false)
    }

    fn register(
        &mut self,
        config: ConnectionConfig,
        network_id: Option<String>,
        network_name: Option<String>,
        spawn_driver: bool,
    ) -> ConnId {
        let id = self.next_id;
        self.next_id += 1;

        let status = Arc::new(StatusCell::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        if spawn_driver {
            let driver = Driver::new(
                id,
                &config,
                self.settings,
                status.clone(),
                self.outbox.clone(),
                self.events_tx.clone(),
                shutdown_rx,
            );
            tokio::spawn(driver.run());
        }

        let negotiator = make_negotiator(&config, network_id.clone());
        self.connections.insert(
            id,
            Connection {
                id,
                config,
                network_id,
                network_name,
                features: Features::default(),
                dir: Directory::new(),
                list: Vec::new(),
                list_done: false,
                negotiator,
                batches: PendingBatches::new(),
                status,
                shutdown: shutdown_tx,
            },
        );
        id
    }

    /// Tear a network down: stop its driver and drop its state.
    pub fn remove_network(&mut self, id: ConnId) {
        if let Some(conn) = self.connections.remove(&id) {
            let _ = conn.shutdown.send(true);
        }
    }

    pub fn connection(&self, id: ConnId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    /// Page older history into a channel (scroll-back).
    ///
    /// Single-flight per channel: a no-op while a request is already
    /// outstanding, once the oldest point was reached, or when the
    /// server never acked `draft/chathistory`. An empty channel fetches
    /// the latest page; a non-empty one pages `BEFORE` its earliest
    /// retained message.
    pub async fn request_history(&mut self, id: ConnId, channel: &str) {
        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };
        if !conn.negotiator.caps.chathistory {
            return;
        }
        let Some(index) = conn.dir.find_channel(channel) else {
            return;
        };
        let line = {
            let chan = conn.dir.channel_mut(index);
            if chan.history_requested || chan.at_oldest {
                return;
            }
            let (fetch, anchor) = if chan.messages.is_empty() {
                (HistoryFetch::Latest, None)
            } else {
                (HistoryFetch::Before, chan.messages.first())
            };
            let Some(line) =
                history::history_request(&chan.name, fetch, anchor, conn.features.chathistory_limit)
            else {
                return;
            };
            chan.history_requested = true;
            line
        };
        self.outbox.send(id, line).await;
    }

    /// Advance a channel's read watermark to its newest retained
    /// message, telling the server when `draft/read-marker` is active.
    ///
    /// The watermark only moves forward; a channel with no retained
    /// messages or an already-current watermark is left alone.
    pub async fn mark_read(&mut self, id: ConnId, channel: &str) {
        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };
        let Some(index) = conn.dir.find_channel(channel) else {
            return;
        };
        let line = {
            let chan = conn.dir.channel_mut(index);
            let Some(at) = chan.messages.last().map(Message::server_time) else {
                return;
            };
            if chan.last_read.is_some_and(|prev| prev >= at) {
                return;
            }
            chan.last_read = Some(at);
            conn.negotiator
                .caps
                .read_marker
                .then(|| history::markread_request(&chan.name, at))
        };
        if let Some(line) = line {
            self.outbox.send(id, line).await;
        }
    }

    /// Consume driver events until every sender is gone.
    pub async fn run(&mut self) {
        while let Some(event) = self.events_rx.recv().await {
            self.handle_event(event).await;
        }
    }

    pub async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Up(id) => self.on_up(id).await,
            Event::Line(id, msg) => self.dispatch(id, msg).await,
            Event::Down(id, reason) => self.on_down(id, reason),
            Event::ConnectFailed(id, reason) => {
                if let Some(conn) = self.connections.get_mut(&id) {
                    push_diagnostic(&mut conn.dir, &format!("connect failed: {}", reason));
                }
            }
        }
    }

    /// Transport came up: restart negotiation and send the greeting.
    async fn on_up(&mut self, id: ConnId) {
        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };
        conn.negotiator = make_negotiator(&conn.config, conn.network_id.clone());
        conn.features = Features::default();
        let greeting = conn.negotiator.greeting();
        for line in greeting {
            self.outbox.send(id, line).await;
        }
    }

    /// Connection ended: clear in-flight protocol state so nothing can
    /// stay wedged across the reconnect, and surface the reason.
    fn on_down(&mut self, id: ConnId, reason: String) {
        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };
        conn.batches.clear();
        for index in 0..conn.dir.channels().len() {
            let chan = conn.dir.channel_mut(index);
            chan.history_requested = false;
            chan.who_requested = false;
            chan.names_requested = false;
        }
        push_diagnostic(&mut conn.dir, &format!("disconnected: {}", reason));
    }

    async fn dispatch(&mut self, id: ConnId, msg: Message) {
        let command = match msg.view() {
            Some(view) => view.command,
            None => {
                debug!(conn = id, raw = msg.raw(), "dropping malformed line");
                return;
            }
        };

        // Discovery can spawn or remove sibling connections, so it is
        // handled at engine scope rather than per connection.
        if command == Command::Bouncer {
            self.on_bouncer(id, &msg);
            return;
        }

        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };

        let mut to_send: Vec<String> = Vec::new();
        let mut hook_connect = false;
        let mut hook_message: Option<(String, String, String)> = None;

        if let Some(view) = msg.view() {
            to_send.extend(conn.negotiator.feed(&view));

            match command {
                Command::Welcome => {
                    hook_connect = true;
                    on_welcome(conn, &msg, &mut to_send);
                }
                Command::Isupport => conn.features.apply(view.params()),
                Command::Batch => on_batch(conn, &view),
                Command::Privmsg | Command::Notice => {
                    hook_message = on_chat_message(conn, &msg, &view);
                }
                Command::Tagmsg => on_tagmsg(conn, &msg, &view),
                Command::Join => on_join(conn, &view, &mut to_send),
                Command::Part => on_part(conn, &view),
                Command::Away => on_away(conn, &view),
                Command::Topic => {
                    if let (Some(chan), Some(topic)) = (view.param(1), view.param(2)) {
                        let index = conn.dir.get_or_create_channel(chan);
                        conn.dir.channel_mut(index).topic = Some(topic.to_string());
                    }
                }
                Command::WhoReply => on_who_reply(conn, &view),
                Command::WhoSpcRpl => on_whox_reply(conn, &view),
                Command::EndOfWho => {
                    if let Some(index) = view.param(1).and_then(|c| conn.dir.find_channel(c)) {
                        conn.dir.channel_mut(index).who_requested = false;
                    }
                }
                Command::NamReply => on_names_reply(conn, &view),
                Command::EndOfNames => {
                    if let Some(index) = view.param(1).and_then(|c| conn.dir.find_channel(c)) {
                        conn.dir.channel_mut(index).names_requested = false;
                    }
                }
                Command::TryAgain => on_try_again(conn, &view),
                Command::ListStart => {
                    conn.list.clear();
                    conn.list_done = false;
                }
                Command::List => {
                    if let (Some(chan), Some(users)) = (view.param(1), view.param(2)) {
                        conn.list.push(ListEntry {
                            channel: chan.to_string(),
                            users: users.parse().unwrap_or(0),
                            topic: view.param(3).unwrap_or("").to_string(),
                        });
                    }
                }
                Command::ListEnd => conn.list_done = true,
                Command::Markread => on_markread(conn, &view),
                Command::Cap | Command::Authenticate | Command::Pong => {
                    // CAP/AUTHENTICATE are consumed by the negotiator;
                    // PONG only feeds the driver's liveness accounting.
                }
                _ => conn.dir.server_log.push(msg.clone()),
            }
        }

        for line in to_send {
            self.outbox.send(id, line).await;
        }

        if hook_connect {
            if let Some(conn) = self.connections.get(&id) {
                if let Err(e) = self.hooks.on_connect(conn) {
                    warn!(conn = id, "on_connect hook failed: {:#}", e);
                }
            }
        }
        if let Some((channel, sender, content)) = hook_message {
            if let Some(conn) = self.connections.get(&id) {
                if let Err(e) = self.hooks.on_message(conn, &channel, &sender, &content) {
                    warn!(conn = id, channel, "on_message hook failed: {:#}", e);
                }
            }
        }
    }

    /// `BOUNCER NETWORK <id> <attrs>`: spawn, update, or tear down a
    /// sibling connection. The only place a connection spawns another.
    fn on_bouncer(&mut self, id: ConnId, msg: &Message) {
        let Some(view) = msg.view() else { return };
        if !view.param(0).is_some_and(|p| p.eq_ignore_ascii_case("NETWORK")) {
            return;
        }
        let (Some(network), Some(attrs_raw)) = (view.param(1), view.param(2)) else {
            debug!(conn = id, raw = msg.raw(), "short BOUNCER NETWORK message");
            return;
        };
        let attrs = bouncer::parse_attrs(attrs_raw);

        let existing = self
            .connections
            .values()
            .find(|c| c.network_id.as_deref() == Some(network))
            .map(|c| c.id);

        match existing {
            Some(sibling) => {
                if attrs.deleted {
                    debug!(network, "bouncer network removed, tearing down");
                    self.remove_network(sibling);
                }
                // Already tracked otherwise; nothing to do.
            }
            None if !attrs.deleted => {
                let Some(parent) = self.connections.get(&id) else {
                    return;
                };
                let config = bouncer::sibling_config(&parent.config, &attrs);
                let NetworkAttrs { name, .. } = attrs;
                debug!(network, ?name, "discovered bouncer network");
                self.register(config, Some(network.to_string()), name, true);
            }
            None => {}
        }
    }
}

/// Synthetic local diagnostic, kept in the server log so transport
/// failures are visible in the client.
fn push_diagnostic(dir: &mut Directory, text: &str) {
    dir.server_log
        .push(Message::now(format!(":comlink NOTICE * :{}", text)));
}

fn on_welcome(conn: &mut Connection, msg: &Message, to_send: &mut Vec<String>) {
    conn.dir.server_log.push(msg.clone());
    // Reconnect catch-up: fill the gap for every channel that already
    // has scrollback.
    if !conn.negotiator.caps.chathistory {
        return;
    }
    for index in 0..conn.dir.channels().len() {
        let chan = conn.dir.channel_mut(index);
        if chan.messages.is_empty() || chan.history_requested {
            continue;
        }
        let line = history::history_request(
            &chan.name,
            HistoryFetch::After,
            chan.messages.last(),
            conn.features.chathistory_limit,
        );
        if let Some(line) = line {
            chan.history_requested = true;
            to_send.push(line);
        }
    }
}

fn on_batch(conn: &mut Connection, view: &MessageRef<'_>) {
    let Some(token_param) = view.param(0) else {
        return;
    };
    if let Some(token) = token_param.strip_prefix('+') {
        if view.param(1) != Some("chathistory") {
            return;
        }
        let Some(target) = view.param(2) else {
            debug!(token, "chathistory batch without a target");
            return;
        };
        conn.batches.open(token, target);
        // Speculative: an empty reply means we already hold the oldest
        // history; any inserted message resets this.
        let index = conn.dir.get_or_create_channel(target);
        conn.dir.channel_mut(index).at_oldest = true;
    } else if let Some(token) = token_param.strip_prefix('-') {
        if let Some(target) = conn.batches.close(token) {
            if let Some(index) = conn.dir.find_channel(&target) {
                conn.dir.channel_mut(index).history_requested = false;
            }
        }
    }
}

fn on_chat_message(
    conn: &mut Connection,
    msg: &Message,
    view: &MessageRef<'_>,
) -> Option<(String, String, String)> {
    let target = view.param(0)?;
    let content = view.param(1).unwrap_or("");
    let sender = view.source_nick().unwrap_or("");

    // Replayed history: insert in order, never notify.
    if let Some(token) = view.tag("batch") {
        if let Some(bound) = conn.batches.target(token) {
            let bound = bound.to_string();
            let index = conn.dir.get_or_create_channel(&bound);
            let chan = conn.dir.channel_mut(index);
            chan.at_oldest = false;
            history::insert_by_time(&mut chan.messages, msg.clone());
            return None;
        }
    }

    if target.starts_with('#') || target.starts_with('&') {
        let index = conn.dir.get_or_create_channel(target);
        let name = conn.dir.channel(index).name.clone();
        conn.dir.channel_mut(index).messages.push(msg.clone());
        Some((name, sender.to_string(), content.to_string()))
    } else {
        conn.dir.server_log.push(msg.clone());
        None
    }
}

fn on_tagmsg(conn: &mut Connection, msg: &Message, view: &MessageRef<'_>) {
    let Some(sender) = view.source_nick() else {
        return;
    };
    // One's own typing indicators echo back; never show them.
    if conn.is_self(sender) {
        return;
    }
    let Some(target) = view.param(0) else { return };
    let Some(state) = view.tag("+typing") else {
        return;
    };
    let Some(index) = conn.dir.find_channel(target) else {
        return;
    };
    let user = match conn.dir.find_user_folded(sender) {
        Some(user) => user,
        None => return,
    };
    conn.dir
        .set_typing(index, user, state == "active", msg.server_time());
}

fn on_join(conn: &mut Connection, view: &MessageRef<'_>, to_send: &mut Vec<String>) {
    let (Some(sender), Some(target)) = (view.source_nick(), view.param(0)) else {
        return;
    };

    if conn.is_self(sender) {
        let index = conn.dir.get_or_create_channel(target);
        let chan = conn.dir.channel_mut(index);
        if conn.features.whox {
            if !chan.who_requested {
                chan.who_requested = true;
                to_send.push(format!("WHO {} %cnfr", target));
            }
        } else if !chan.names_requested {
            chan.names_requested = true;
            to_send.push(format!("NAMES {}", target));
        }
        if conn.negotiator.caps.chathistory && chan.messages.is_empty() && !chan.history_requested
        {
            if let Some(line) =
                history::history_request(target, HistoryFetch::Latest, None, conn.features.chathistory_limit)
            {
                chan.history_requested = true;
                to_send.push(line);
            }
        }
    } else {
        let index = conn.dir.get_or_create_channel(target);
        let user = conn.dir.get_or_create_user(sender);
        conn.dir.add_member(index, user, None, &conn.features);
    }
}

fn on_part(conn: &mut Connection, view: &MessageRef<'_>) {
    let (Some(sender), Some(target)) = (view.source_nick(), view.param(0)) else {
        return;
    };
    if conn.is_self(sender) {
        conn.dir.remove_channel(target);
    } else if let Some(index) = conn.dir.find_channel(target) {
        if let Some(user) = conn.dir.find_user_folded(sender) {
            conn.dir.remove_member(index, user);
        }
    }
}

fn on_away(conn: &mut Connection, view: &MessageRef<'_>) {
    let Some(sender) = view.source_nick() else {
        return;
    };
    let user = conn.dir.get_or_create_user(sender);
    // A message parameter means away; its absence means back.
    conn.dir.user_mut(user).away = view.param(0).is_some();
}

/// Flags field of a WHO reply: `H`/`G` presence, `*` oper, then
/// membership prefixes.
fn apply_who_flags(conn: &mut Connection, channel: &str, nick: &str, flags: &str, realname: &str) {
    let index = conn.dir.get_or_create_channel(channel);
    let user = conn.dir.get_or_create_user(nick);
    conn.dir.user_mut(user).away = flags.contains('G');
    if !realname.is_empty() {
        conn.dir.user_mut(user).real_name = Some(realname.to_string());
    }
    let prefix = flags.chars().find(|c| conn.features.is_prefix_symbol(*c));
    conn.dir.add_member(index, user, prefix, &conn.features);
}

fn on_who_reply(conn: &mut Connection, view: &MessageRef<'_>) {
    // 352: client channel user host server nick flags :hop realname
    let (Some(channel), Some(nick), Some(flags)) =
        (view.param(1), view.param(5), view.param(6))
    else {
        debug!(raw = view.raw, "short WHO reply");
        return;
    };
    let realname = view
        .param(7)
        .and_then(|hop| hop.split_once(' ').map(|(_, real)| real))
        .unwrap_or("");
    apply_who_flags(conn, channel, nick, flags, realname);
}

fn on_whox_reply(conn: &mut Connection, view: &MessageRef<'_>) {
    // 354 for %cnfr: client channel nick flags :realname
    let (Some(channel), Some(nick), Some(flags)) =
        (view.param(1), view.param(2), view.param(3))
    else {
        debug!(raw = view.raw, "short WHOX reply");
        return;
    };
    let realname = view.param(4).unwrap_or("");
    apply_who_flags(conn, channel, nick, flags, realname);
}

fn on_names_reply(conn: &mut Connection, view: &MessageRef<'_>) {
    // 353: client symbol channel :prefixed-nicks
    let (Some(channel), Some(names)) = (view.param(2), view.param(3)) else {
        debug!(raw = view.raw, "short NAMES reply");
        return;
    };
    let index = conn.dir.get_or_create_channel(channel);
    for name in names.split_whitespace() {
        // multi-prefix may stack symbols; the first is the highest.
        let nick = name.trim_start_matches(|c| conn.features.is_prefix_symbol(c));
        if nick.is_empty() {
            continue;
        }
        let prefix = name.chars().next().filter(|c| conn.features.is_prefix_symbol(*c));
        let user = conn.dir.get_or_create_user(nick);
        conn.dir.add_member(index, user, prefix, &conn.features);
    }
}

/// 263 RPL_TRYAGAIN: the server throttled a command; release the
/// matching in-flight flags so the request can be retried.
fn on_try_again(conn: &mut Connection, view: &MessageRef<'_>) {
    let throttled = view.param(1).unwrap_or("").to_ascii_uppercase();
    for index in 0..conn.dir.channels().len() {
        let chan = conn.dir.channel_mut(index);
        match throttled.as_str() {
            "WHO" => chan.who_requested = false,
            "NAMES" => chan.names_requested = false,
            "CHATHISTORY" => chan.history_requested = false,
            _ => {}
        }
    }
}

fn on_markread(conn: &mut Connection, view: &MessageRef<'_>) {
    let (Some(target), Some(stamp)) = (view.param(0), view.param(1)) else {
        return;
    };
    let Some(ts) = stamp.strip_prefix("timestamp=") else {
        return;
    };
    let Ok(at) = DateTime::parse_from_rfc3339(ts) else {
        debug!(target, stamp, "unparsable MARKREAD timestamp");
        return;
    };
    let index = conn.dir.get_or_create_channel(target);
    conn.dir.channel_mut(index).last_read = Some(at.with_timezone(&chrono::Utc));
}
