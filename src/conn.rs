//! Connection lifecycle: the per-connection supervisory task.
//!
//! One driver task per network cycles `connect → read loop → backoff`
//! until told to stop. It owns the read half; the write half lives in
//! the shared [`Outbox`](crate::outbox::Outbox). All parsed-state
//! mutation happens in the engine task, which consumes [`Event`]s.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::config::{ConnectionConfig, EngineSettings};
use crate::message::Message;
use crate::outbox::Outbox;
use crate::transport::{ReadHalf, Transport};

/// Engine-assigned connection identifier.
pub type ConnId = u64;

/// Observable connection status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

/// Lock-free status cell, written by the driver, read from anywhere.
#[derive(Debug, Default)]
pub struct StatusCell(AtomicU8);

impl StatusCell {
    pub fn new() -> StatusCell {
        StatusCell(AtomicU8::new(Status::Disconnected as u8))
    }

    pub fn get(&self) -> Status {
        match self.0.load(Ordering::Relaxed) {
            1 => Status::Connecting,
            2 => Status::Connected,
            _ => Status::Disconnected,
        }
    }

    pub fn set(&self, status: Status) {
        self.0.store(status as u8, Ordering::Relaxed);
    }
}

/// Exponential reconnect delay: doubles from `base`, capped at `max`,
/// reset to zero on a successful connection.
#[derive(Clone, Debug)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Backoff {
        Backoff {
            base,
            max,
            current: Duration::ZERO,
        }
    }

    /// The delay before the next attempt, advancing the schedule.
    pub fn next_delay(&mut self) -> Duration {
        self.current = if self.current.is_zero() {
            self.base
        } else {
            (self.current * 2).min(self.max)
        };
        self.current
    }

    pub fn reset(&mut self) {
        self.current = Duration::ZERO;
    }
}

/// What a driver reports to the engine.
#[derive(Debug)]
pub enum Event {
    /// Transport is up; the greeting should go out.
    Up(ConnId),
    /// One complete line arrived.
    Line(ConnId, Message),
    /// The connection ended, with a human-readable reason. A retry is
    /// already scheduled unless shutdown was requested.
    Down(ConnId, String),
    /// A connect attempt failed before the transport came up.
    ConnectFailed(ConnId, String),
}

/// The supervisory task for one connection.
pub struct Driver {
    id: ConnId,
    server: String,
    port: u16,
    tls: bool,
    settings: EngineSettings,
    backoff: Backoff,
    status: Arc<StatusCell>,
    outbox: Outbox,
    events: mpsc::Sender<Event>,
    shutdown: watch::Receiver<bool>,
}

impl Driver {
    pub fn new(
        id: ConnId,
        config: &ConnectionConfig,
        settings: EngineSettings,
        status: Arc<StatusCell>,
        outbox: Outbox,
        events: mpsc::Sender<Event>,
        shutdown: watch::Receiver<bool>,
    ) -> Driver {
        Driver {
            id,
            server: config.server.clone(),
            port: config.port(),
            tls: config.tls,
            backoff: Backoff::new(settings.backoff_base, settings.backoff_max),
            settings,
            status,
            outbox,
            events,
            shutdown,
        }
    }

    /// Run until shutdown is requested or the engine goes away.
    pub async fn run(mut self) {
        loop {
            if *self.shutdown.borrow() {
                break;
            }

            self.status.set(Status::Connecting);
            match Transport::connect(&self.server, self.port, self.tls).await {
                Ok(transport) => {
                    let (read, write) = transport.split();
                    self.outbox.attach(self.id, write).await;
                    self.status.set(Status::Connected);
                    self.backoff.reset();
                    if self.events.send(Event::Up(self.id)).await.is_err() {
                        break;
                    }

                    let reason = self.read_loop(read).await;
                    self.outbox.detach(self.id).await;
                    self.status.set(Status::Disconnected);
                    debug!(conn = self.id, reason, "connection down");
                    if self.events.send(Event::Down(self.id, reason)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    self.status.set(Status::Disconnected);
                    if self
                        .events
                        .send(Event::ConnectFailed(self.id, e.to_string()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }

            if *self.shutdown.borrow() {
                break;
            }
            let delay = self.backoff.next_delay();
            info!(conn = self.id, server = %self.server, ?delay, "reconnecting");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.changed() => {}
            }
        }
        self.status.set(Status::Disconnected);
    }

    /// Read until the connection ends; returns the reason.
    async fn read_loop(&mut self, mut read: ReadHalf) -> String {
        let mut misses: u32 = 0;
        loop {
            tokio::select! {
                res = self.shutdown.changed() => {
                    if res.is_err() || *self.shutdown.borrow() {
                        return "closing".to_string();
                    }
                }
                res = tokio::time::timeout(
                    self.settings.keepalive_interval,
                    read.next_line(),
                ) => match res {
                    Err(_) => {
                        misses += 1;
                        if misses >= self.settings.keepalive_max_misses {
                            return "keepalive timeout".to_string();
                        }
                        self.outbox.send(self.id, "PING comlink".to_string()).await;
                    }
                    Ok(None) => return "connection closed by server".to_string(),
                    Ok(Some(Err(e))) => return format!("read error: {}", e),
                    Ok(Some(Ok(line))) => {
                        misses = 0;
                        let msg = Message::now(line);
                        if self.events.send(Event::Line(self.id, msg)).await.is_err() {
                            return "engine stopped".to_string();
                        }
                    }
                },
            }
        }
    }
}
