//! End-to-end protocol flows through the engine, with writes captured
//! instead of hitting a socket.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use comlink_core::engine::Hooks;
use comlink_core::{
    ConnId, Connection, ConnectionConfig, Engine, EngineSettings, Event, Message, NoHooks, Outbox,
    WriteRequest, CAP_NAMES,
};

/// Collect captured writes until the pipeline goes quiet.
async fn drain(rx: &mut mpsc::Receiver<WriteRequest>) -> Vec<String> {
    let mut out = Vec::new();
    while let Ok(Some(req)) = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await {
        out.push(req.line);
    }
    out
}

fn engine_with_capture<H: Hooks>(hooks: H) -> (Engine<H>, mpsc::Receiver<WriteRequest>) {
    let (outbox, rx) = Outbox::capture();
    (Engine::with_outbox(EngineSettings::default(), hooks, outbox), rx)
}

fn config() -> ConnectionConfig {
    let mut cfg = ConnectionConfig::new("192.0.2.1", "alice", "hunter2");
    cfg.tls = false;
    cfg
}

async fn line<H: Hooks>(engine: &mut Engine<H>, id: ConnId, raw: &str) {
    engine
        .handle_event(Event::Line(id, Message::now(raw.to_string())))
        .await;
}

#[tokio::test]
async fn test_greeting_goes_out_on_up() {
    let (mut engine, mut rx) = engine_with_capture(NoHooks);
    let id = engine.add_network_detached(config());
    engine.handle_event(Event::Up(id)).await;

    let lines = drain(&mut rx).await;
    assert_eq!(lines[0], "CAP LS 302");
    for name in CAP_NAMES {
        assert!(lines.contains(&format!("CAP REQ :{}", name)));
    }
    assert_eq!(lines[lines.len() - 2], "NICK alice");
    assert_eq!(lines[lines.len() - 1], "USER alice 0 * :alice");
}

#[tokio::test]
async fn test_sasl_ack_enqueues_exactly_one_authenticate() {
    let (mut engine, mut rx) = engine_with_capture(NoHooks);
    let id = engine.add_network_detached(config());
    engine.handle_event(Event::Up(id)).await;
    let _ = drain(&mut rx).await;

    line(&mut engine, id, ":srv CAP * ACK :sasl").await;
    line(&mut engine, id, ":srv CAP * ACK :sasl").await;
    let lines = drain(&mut rx).await;
    let auth_count = lines.iter().filter(|l| *l == "AUTHENTICATE PLAIN").count();
    assert_eq!(auth_count, 1);

    line(&mut engine, id, "AUTHENTICATE +").await;
    let lines = drain(&mut rx).await;
    assert!(lines[0].starts_with("AUTHENTICATE "));
    assert_eq!(lines.last().map(String::as_str), Some("CAP END"));
}

#[tokio::test]
async fn test_out_of_order_batch_is_sorted_by_timestamp() {
    let (mut engine, mut rx) = engine_with_capture(NoHooks);
    let id = engine.add_network_detached(config());
    engine.handle_event(Event::Up(id)).await;
    let _ = drain(&mut rx).await;

    line(&mut engine, id, ":srv BATCH +42 chathistory #chan").await;
    line(
        &mut engine,
        id,
        "@batch=42;time=2024-01-01T00:00:00.200Z :bob!b@h PRIVMSG #chan :second",
    )
    .await;
    line(
        &mut engine,
        id,
        "@batch=42;time=2024-01-01T00:00:00.100Z :bob!b@h PRIVMSG #chan :first",
    )
    .await;
    line(&mut engine, id, ":srv BATCH -42").await;

    let conn = engine.connection(id).unwrap();
    let chan = conn.dir.find_channel("#chan").unwrap();
    let texts: Vec<_> = conn
        .dir
        .channel(chan)
        .messages
        .iter()
        .map(|m| m.param(1).unwrap().to_string())
        .collect();
    assert_eq!(texts, vec!["first", "second"]);
    // Messages arrived, so we are not at the oldest point of history.
    assert!(!conn.dir.channel(chan).at_oldest);
}

#[tokio::test]
async fn test_empty_batch_marks_at_oldest() {
    let (mut engine, mut rx) = engine_with_capture(NoHooks);
    let id = engine.add_network_detached(config());
    engine.handle_event(Event::Up(id)).await;
    let _ = drain(&mut rx).await;

    line(&mut engine, id, ":srv BATCH +7 chathistory #chan").await;
    line(&mut engine, id, ":srv BATCH -7").await;

    let conn = engine.connection(id).unwrap();
    let chan = conn.dir.find_channel("#chan").unwrap();
    assert!(conn.dir.channel(chan).at_oldest);
    assert!(!conn.dir.channel(chan).history_requested);
}

#[tokio::test]
async fn test_self_join_requests_names_and_history_once() {
    let (mut engine, mut rx) = engine_with_capture(NoHooks);
    let id = engine.add_network_detached(config());
    engine.handle_event(Event::Up(id)).await;
    let _ = drain(&mut rx).await;

    line(&mut engine, id, ":srv CAP * ACK :draft/chathistory").await;
    line(&mut engine, id, ":alice!a@h JOIN #chan").await;
    let lines = drain(&mut rx).await;
    assert!(lines.contains(&"NAMES #chan".to_string()));
    assert!(lines.contains(&"CHATHISTORY LATEST #chan * 50".to_string()));

    // A second JOIN while requests are in flight must not re-issue.
    line(&mut engine, id, ":alice!a@h JOIN #chan").await;
    let lines = drain(&mut rx).await;
    assert!(lines.is_empty());
}

#[tokio::test]
async fn test_whox_preferred_when_advertised() {
    let (mut engine, mut rx) = engine_with_capture(NoHooks);
    let id = engine.add_network_detached(config());
    engine.handle_event(Event::Up(id)).await;
    let _ = drain(&mut rx).await;

    line(&mut engine, id, ":srv 005 alice WHOX :are supported").await;
    line(&mut engine, id, ":alice!a@h JOIN #chan").await;
    let lines = drain(&mut rx).await;
    assert!(lines.contains(&"WHO #chan %cnfr".to_string()));
    assert!(!lines.iter().any(|l| l.starts_with("NAMES")));
}

#[tokio::test]
async fn test_welcome_catch_up_uses_after_with_anchor() {
    let (mut engine, mut rx) = engine_with_capture(NoHooks);
    let id = engine.add_network_detached(config());
    engine.handle_event(Event::Up(id)).await;
    let _ = drain(&mut rx).await;
    line(&mut engine, id, ":srv CAP * ACK :draft/chathistory").await;
    line(
        &mut engine,
        id,
        "@time=2024-05-01T12:00:00.000Z :bob!b@h PRIVMSG #chan :kept",
    )
    .await;

    // Drop and reconnect: negotiation restarts, scrollback is kept.
    engine
        .handle_event(Event::Down(id, "read error".to_string()))
        .await;
    engine.handle_event(Event::Up(id)).await;
    let _ = drain(&mut rx).await;
    line(&mut engine, id, ":srv CAP * ACK :draft/chathistory").await;
    line(&mut engine, id, ":srv 001 alice :Welcome back").await;

    let lines = drain(&mut rx).await;
    assert!(lines.contains(
        &"CHATHISTORY AFTER #chan timestamp=2024-05-01T12:00:00.000Z 200".to_string()
    ));
}

#[tokio::test]
async fn test_down_clears_pending_state_and_logs_diagnostic() {
    let (mut engine, mut rx) = engine_with_capture(NoHooks);
    let id = engine.add_network_detached(config());
    engine.handle_event(Event::Up(id)).await;
    let _ = drain(&mut rx).await;

    line(&mut engine, id, ":srv CAP * ACK :draft/chathistory").await;
    line(&mut engine, id, ":alice!a@h JOIN #chan").await;
    let _ = drain(&mut rx).await;
    // History request is in flight, then the connection drops with the
    // batch never closed.
    engine
        .handle_event(Event::Down(id, "keepalive timeout".to_string()))
        .await;

    let conn = engine.connection(id).unwrap();
    let chan = conn.dir.find_channel("#chan").unwrap();
    assert!(!conn.dir.channel(chan).history_requested);
    assert!(!conn.dir.channel(chan).names_requested);
    let last = conn.dir.server_log.last().unwrap();
    assert!(last.param(1).unwrap().contains("keepalive timeout"));
}

#[tokio::test]
async fn test_markread_sets_watermark() {
    let (mut engine, mut rx) = engine_with_capture(NoHooks);
    let id = engine.add_network_detached(config());
    engine.handle_event(Event::Up(id)).await;
    let _ = drain(&mut rx).await;

    line(
        &mut engine,
        id,
        ":srv MARKREAD #chan timestamp=2024-05-01T10:00:00.000Z",
    )
    .await;
    let conn = engine.connection(id).unwrap();
    let chan = conn.dir.find_channel("#chan").unwrap();
    assert!(conn.dir.channel(chan).last_read.is_some());
}

#[tokio::test]
async fn test_bouncer_network_spawns_and_removes_sibling() {
    let (mut engine, mut rx) = engine_with_capture(NoHooks);
    let id = engine.add_network_detached(config());
    engine.handle_event(Event::Up(id)).await;
    let _ = drain(&mut rx).await;

    line(
        &mut engine,
        id,
        ":bnc BOUNCER NETWORK net1 name=Libera;nickname=alice_l",
    )
    .await;
    let sibling = engine
        .connections()
        .find(|c: &&Connection| c.network_id.as_deref() == Some("net1"))
        .map(|c| c.id)
        .expect("sibling connection spawned");
    assert_ne!(sibling, id);
    assert_eq!(
        engine.connection(sibling).unwrap().config.nick,
        "alice_l"
    );
    assert_eq!(
        engine.connection(sibling).unwrap().network_name.as_deref(),
        Some("Libera")
    );

    // A repeat announcement is ignored.
    line(
        &mut engine,
        id,
        ":bnc BOUNCER NETWORK net1 name=Libera;nickname=alice_l",
    )
    .await;
    assert_eq!(engine.connections().count(), 2);

    // The `*` form tears the sibling down.
    line(&mut engine, id, ":bnc BOUNCER NETWORK net1 *").await;
    assert!(engine.connection(sibling).is_none());
}

#[tokio::test]
async fn test_request_history_pages_before_earliest_message() {
    let (mut engine, mut rx) = engine_with_capture(NoHooks);
    let id = engine.add_network_detached(config());
    engine.handle_event(Event::Up(id)).await;
    let _ = drain(&mut rx).await;
    line(&mut engine, id, ":srv CAP * ACK :draft/chathistory").await;

    line(
        &mut engine,
        id,
        "@time=2024-05-01T12:00:00.000Z :bob!b@h PRIVMSG #chan :older",
    )
    .await;
    line(
        &mut engine,
        id,
        "@time=2024-05-01T13:00:00.000Z :bob!b@h PRIVMSG #chan :newer",
    )
    .await;

    engine.request_history(id, "#chan").await;
    let lines = drain(&mut rx).await;
    assert_eq!(
        lines,
        vec!["CHATHISTORY BEFORE #chan timestamp=2024-05-01T12:00:00.000Z 50".to_string()]
    );

    // A second call while the first is outstanding is a no-op.
    engine.request_history(id, "#chan").await;
    assert!(drain(&mut rx).await.is_empty());
}

#[tokio::test]
async fn test_request_history_fetches_latest_for_empty_channel() {
    let (mut engine, mut rx) = engine_with_capture(NoHooks);
    let id = engine.add_network_detached(config());
    engine.handle_event(Event::Up(id)).await;
    let _ = drain(&mut rx).await;
    line(&mut engine, id, ":srv CAP * ACK :draft/chathistory").await;

    // A channel known only through its read marker has no messages yet.
    line(
        &mut engine,
        id,
        ":srv MARKREAD #empty timestamp=2024-05-01T10:00:00.000Z",
    )
    .await;
    engine.request_history(id, "#empty").await;
    let lines = drain(&mut rx).await;
    assert_eq!(lines, vec!["CHATHISTORY LATEST #empty * 50".to_string()]);
}

#[tokio::test]
async fn test_request_history_stops_at_oldest() {
    let (mut engine, mut rx) = engine_with_capture(NoHooks);
    let id = engine.add_network_detached(config());
    engine.handle_event(Event::Up(id)).await;
    let _ = drain(&mut rx).await;
    line(&mut engine, id, ":srv CAP * ACK :draft/chathistory").await;

    // An empty reply batch means the server holds nothing older.
    line(&mut engine, id, ":srv BATCH +3 chathistory #chan").await;
    line(&mut engine, id, ":srv BATCH -3").await;

    engine.request_history(id, "#chan").await;
    assert!(drain(&mut rx).await.is_empty());
}

#[tokio::test]
async fn test_mark_read_advances_watermark_and_tells_server() {
    let (mut engine, mut rx) = engine_with_capture(NoHooks);
    let id = engine.add_network_detached(config());
    engine.handle_event(Event::Up(id)).await;
    let _ = drain(&mut rx).await;
    line(&mut engine, id, ":srv CAP * ACK :draft/read-marker").await;

    line(
        &mut engine,
        id,
        "@time=2024-05-01T12:00:00.000Z :bob!b@h PRIVMSG #chan :hi",
    )
    .await;
    engine.mark_read(id, "#chan").await;
    let lines = drain(&mut rx).await;
    assert_eq!(
        lines,
        vec!["MARKREAD #chan timestamp=2024-05-01T12:00:00.000Z".to_string()]
    );
    let conn = engine.connection(id).unwrap();
    let chan = conn.dir.find_channel("#chan").unwrap();
    assert!(conn.dir.channel(chan).last_read.is_some());

    // Nothing newer arrived; the watermark must not be re-announced.
    engine.mark_read(id, "#chan").await;
    assert!(drain(&mut rx).await.is_empty());
}

#[tokio::test]
async fn test_who_reply_populates_away_prefix_and_realname() {
    let (mut engine, mut rx) = engine_with_capture(NoHooks);
    let id = engine.add_network_detached(config());
    engine.handle_event(Event::Up(id)).await;
    let _ = drain(&mut rx).await;

    line(
        &mut engine,
        id,
        ":srv 352 alice #chan buser bhost srv1 bob H@ :2 Bob Real",
    )
    .await;
    line(
        &mut engine,
        id,
        ":srv 352 alice #chan cuser chost srv1 carol G :0 Carol Q.",
    )
    .await;

    let conn = engine.connection(id).unwrap();
    let chan = conn.dir.find_channel("#chan").unwrap();
    let bob = conn.dir.find_user("bob").unwrap();
    let carol = conn.dir.find_user("carol").unwrap();
    assert_eq!(conn.dir.channel(chan).member(bob).unwrap().prefix, Some('@'));
    assert!(!conn.dir.user(bob).away);
    assert_eq!(conn.dir.user(bob).real_name.as_deref(), Some("Bob Real"));
    assert_eq!(conn.dir.channel(chan).member(carol).unwrap().prefix, None);
    assert!(conn.dir.user(carol).away);
    assert_eq!(conn.dir.user(carol).real_name.as_deref(), Some("Carol Q."));
}

#[tokio::test]
async fn test_whox_reply_uses_compact_field_layout() {
    let (mut engine, mut rx) = engine_with_capture(NoHooks);
    let id = engine.add_network_detached(config());
    engine.handle_event(Event::Up(id)).await;
    let _ = drain(&mut rx).await;

    line(&mut engine, id, ":srv 005 alice WHOX :are supported").await;
    line(&mut engine, id, ":srv 354 alice #chan bob G+ :Bob Real").await;

    let conn = engine.connection(id).unwrap();
    let chan = conn.dir.find_channel("#chan").unwrap();
    let bob = conn.dir.find_user("bob").unwrap();
    assert_eq!(conn.dir.channel(chan).member(bob).unwrap().prefix, Some('+'));
    assert!(conn.dir.user(bob).away);
    assert_eq!(conn.dir.user(bob).real_name.as_deref(), Some("Bob Real"));
}

#[tokio::test]
async fn test_names_reply_strips_stacked_prefixes() {
    let (mut engine, mut rx) = engine_with_capture(NoHooks);
    let id = engine.add_network_detached(config());
    engine.handle_event(Event::Up(id)).await;
    let _ = drain(&mut rx).await;

    line(
        &mut engine,
        id,
        ":srv 353 alice = #chan :@op +voice plain @+both",
    )
    .await;

    let conn = engine.connection(id).unwrap();
    let chan = conn.dir.find_channel("#chan").unwrap();
    let prefix_of = |nick: &str| {
        let user = conn.dir.find_user(nick).unwrap();
        conn.dir.channel(chan).member(user).unwrap().prefix
    };
    assert_eq!(prefix_of("op"), Some('@'));
    assert_eq!(prefix_of("voice"), Some('+'));
    assert_eq!(prefix_of("plain"), None);
    // multi-prefix stacks symbols; the first is the effective one.
    assert_eq!(prefix_of("both"), Some('@'));
}

#[tokio::test]
async fn test_away_notify_toggles_flag() {
    let (mut engine, mut rx) = engine_with_capture(NoHooks);
    let id = engine.add_network_detached(config());
    engine.handle_event(Event::Up(id)).await;
    let _ = drain(&mut rx).await;

    line(&mut engine, id, ":bob!b@h AWAY :out to lunch").await;
    let conn = engine.connection(id).unwrap();
    let bob = conn.dir.find_user("bob").unwrap();
    assert!(conn.dir.user(bob).away);

    line(&mut engine, id, ":bob!b@h AWAY").await;
    let conn = engine.connection(id).unwrap();
    assert!(!conn.dir.user(bob).away);
}

#[tokio::test]
async fn test_list_accumulates_between_start_and_end() {
    let (mut engine, mut rx) = engine_with_capture(NoHooks);
    let id = engine.add_network_detached(config());
    engine.handle_event(Event::Up(id)).await;
    let _ = drain(&mut rx).await;

    line(&mut engine, id, ":srv 321 alice Channel :Users Name").await;
    line(&mut engine, id, ":srv 322 alice #alpha 10 :Topic A").await;
    line(&mut engine, id, ":srv 322 alice #beta 2 :").await;
    assert!(!engine.connection(id).unwrap().list_done);

    line(&mut engine, id, ":srv 323 alice :End of /LIST").await;
    let conn = engine.connection(id).unwrap();
    assert!(conn.list_done);
    assert_eq!(conn.list.len(), 2);
    assert_eq!(conn.list[0].channel, "#alpha");
    assert_eq!(conn.list[0].users, 10);
    assert_eq!(conn.list[0].topic, "Topic A");
    assert_eq!(conn.list[1].channel, "#beta");
    assert_eq!(conn.list[1].topic, "");

    // A fresh LIST starts over.
    line(&mut engine, id, ":srv 321 alice Channel :Users Name").await;
    let conn = engine.connection(id).unwrap();
    assert!(conn.list.is_empty());
    assert!(!conn.list_done);
}

#[tokio::test]
async fn test_try_again_releases_matching_inflight_flag() {
    let (mut engine, mut rx) = engine_with_capture(NoHooks);
    let id = engine.add_network_detached(config());
    engine.handle_event(Event::Up(id)).await;
    let _ = drain(&mut rx).await;
    line(&mut engine, id, ":srv CAP * ACK :draft/chathistory").await;

    line(&mut engine, id, ":alice!a@h JOIN #chan").await;
    let _ = drain(&mut rx).await;
    let conn = engine.connection(id).unwrap();
    let chan = conn.dir.find_channel("#chan").unwrap();
    assert!(conn.dir.channel(chan).names_requested);
    assert!(conn.dir.channel(chan).history_requested);

    // Throttled NAMES releases only the NAMES flag.
    line(&mut engine, id, ":srv 263 alice NAMES :Please wait a while").await;
    let conn = engine.connection(id).unwrap();
    assert!(!conn.dir.channel(chan).names_requested);
    assert!(conn.dir.channel(chan).history_requested);

    line(
        &mut engine,
        id,
        ":srv 263 alice CHATHISTORY :Please wait a while",
    )
    .await;
    let conn = engine.connection(id).unwrap();
    assert!(!conn.dir.channel(chan).history_requested);
}

#[derive(Clone, Default)]
struct RecordingHooks {
    connects: Arc<Mutex<u32>>,
    messages: Arc<Mutex<Vec<(String, String, String)>>>,
}

impl Hooks for RecordingHooks {
    fn on_connect(&mut self, _conn: &Connection) -> anyhow::Result<()> {
        *self.connects.lock().unwrap() += 1;
        Ok(())
    }

    fn on_message(
        &mut self,
        _conn: &Connection,
        channel: &str,
        sender: &str,
        content: &str,
    ) -> anyhow::Result<()> {
        self.messages.lock().unwrap().push((
            channel.to_string(),
            sender.to_string(),
            content.to_string(),
        ));
        anyhow::bail!("scripted failure, must not crash the engine")
    }
}

#[tokio::test]
async fn test_hooks_fire_and_errors_are_contained() {
    let hooks = RecordingHooks::default();
    let (mut engine, mut rx) = engine_with_capture(hooks.clone());
    let id = engine.add_network_detached(config());
    engine.handle_event(Event::Up(id)).await;
    let _ = drain(&mut rx).await;

    line(&mut engine, id, ":srv 001 alice :Welcome").await;
    assert_eq!(*hooks.connects.lock().unwrap(), 1);

    line(&mut engine, id, ":bob!b@h PRIVMSG #chan :hello there").await;
    {
        let messages = hooks.messages.lock().unwrap();
        assert_eq!(
            messages.as_slice(),
            &[(
                "#chan".to_string(),
                "bob".to_string(),
                "hello there".to_string()
            )]
        );
    }

    // The hook bailed; the engine must keep dispatching regardless.
    line(&mut engine, id, ":bob!b@h PRIVMSG #chan :still alive").await;
    assert_eq!(hooks.messages.lock().unwrap().len(), 2);

    // Batched replays never reach the hook.
    line(&mut engine, id, ":srv BATCH +9 chathistory #chan").await;
    line(
        &mut engine,
        id,
        "@batch=9;time=2024-01-01T00:00:00.000Z :bob!b@h PRIVMSG #chan :replay",
    )
    .await;
    line(&mut engine, id, ":srv BATCH -9").await;
    assert_eq!(hooks.messages.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_typing_indicators_track_members() {
    let (mut engine, mut rx) = engine_with_capture(NoHooks);
    let id = engine.add_network_detached(config());
    engine.handle_event(Event::Up(id)).await;
    let _ = drain(&mut rx).await;

    line(&mut engine, id, ":alice!a@h JOIN #chan").await;
    line(&mut engine, id, ":bob!b@h JOIN #chan").await;
    line(
        &mut engine,
        id,
        "@+typing=active :bob!b@h TAGMSG #chan",
    )
    .await;

    let conn = engine.connection(id).unwrap();
    let chan = conn.dir.find_channel("#chan").unwrap();
    let bob = conn.dir.find_user("bob").unwrap();
    assert!(conn
        .dir
        .channel(chan)
        .member(bob)
        .unwrap()
        .is_typing(chrono::Utc::now()));

    line(&mut engine, id, "@+typing=done :bob!b@h TAGMSG #chan").await;
    let conn = engine.connection(id).unwrap();
    assert!(!conn
        .dir
        .channel(chan)
        .member(bob)
        .unwrap()
        .is_typing(chrono::Utc::now()));

    // One's own typing echo is ignored entirely; it must not create
    // membership state either.
    line(
        &mut engine,
        id,
        "@+typing=active :alice!a@h TAGMSG #chan",
    )
    .await;
    let conn = engine.connection(id).unwrap();
    let typing_members = conn
        .dir
        .channel(chan)
        .members
        .iter()
        .filter(|m| m.is_typing(chrono::Utc::now()))
        .count();
    assert_eq!(typing_members, 0);
}
