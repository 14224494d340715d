//! The shared write pipeline.
//!
//! One bounded queue, one consumer task owning every connection's write
//! half. Attach/detach travel through the same queue as lines, so a
//! producer's writes and its teardown stay ordered. A write to a
//! detached connection is dropped with a log line, never queued forever.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::conn::ConnId;
use crate::transport::WriteHalf;

const QUEUE_DEPTH: usize = 256;

/// One outbound line, tagged with its target connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub conn: ConnId,
    pub line: String,
}

enum Cmd {
    Attach(ConnId, WriteHalf),
    Detach(ConnId),
    Line(WriteRequest),
}

/// Cloneable handle to the write pipeline.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::Sender<Cmd>,
}

impl Outbox {
    /// Spawn the consumer task and return its handle.
    pub fn spawn() -> Outbox {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        tokio::spawn(writer_loop(rx));
        Outbox { tx }
    }

    /// A pipeline whose requests are captured instead of written, for
    /// exercising protocol flows without sockets.
    pub fn capture() -> (Outbox, mpsc::Receiver<WriteRequest>) {
        let (tx, mut rx) = mpsc::channel(QUEUE_DEPTH);
        let (cap_tx, cap_rx) = mpsc::channel(QUEUE_DEPTH);
        tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                if let Cmd::Line(req) = cmd {
                    if cap_tx.send(req).await.is_err() {
                        break;
                    }
                }
            }
        });
        (Outbox { tx }, cap_rx)
    }

    /// Hand a freshly connected write half to the consumer.
    pub async fn attach(&self, conn: ConnId, half: WriteHalf) {
        self.push(Cmd::Attach(conn, half)).await;
    }

    /// Remove and shut down a connection's write half.
    pub async fn detach(&self, conn: ConnId) {
        self.push(Cmd::Detach(conn)).await;
    }

    /// Queue one line for a connection.
    pub async fn send(&self, conn: ConnId, line: String) {
        self.push(Cmd::Line(WriteRequest { conn, line })).await;
    }

    async fn push(&self, cmd: Cmd) {
        if self.tx.send(cmd).await.is_err() {
            warn!("write pipeline is gone; request dropped");
        }
    }
}

async fn writer_loop(mut rx: mpsc::Receiver<Cmd>) {
    let mut halves: HashMap<ConnId, WriteHalf> = HashMap::new();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            Cmd::Attach(conn, half) => {
                if halves.insert(conn, half).is_some() {
                    debug!(conn, "replaced a still-attached write half");
                }
            }
            Cmd::Detach(conn) => {
                if let Some(mut half) = halves.remove(&conn) {
                    half.shutdown().await;
                }
            }
            Cmd::Line(req) => match halves.get_mut(&req.conn) {
                Some(half) => {
                    if let Err(e) = half.send_line(req.line).await {
                        warn!(conn = req.conn, "write failed: {}", e);
                        // The driver will observe the broken read side;
                        // drop the half now so later lines are discarded.
                        if let Some(mut half) = halves.remove(&req.conn) {
                            half.shutdown().await;
                        }
                    }
                }
                None => {
                    debug!(conn = req.conn, "dropping write to detached connection");
                }
            },
        }
    }
}
