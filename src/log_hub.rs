//! Per-run publish/subscribe fan-out for live run output.
//!
//! A single long-lived task owns the `{run_id -> {subscriber}}` table so it
//! is only ever touched from one place, with commands
//! (`Register`/`Unregister`/`Broadcast`) travelling over an `mpsc` channel
//! rather than behind a `RwLock`. Subscribers are scoped per run rather
//! than sharing one global broadcast topic — see DESIGN.md for why a
//! single crate-wide broadcast channel doesn't fit here.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::store::{LogStream, RunStatus};

/// Internal command channel capacity (§4.5: "buffered >= 100").
const HUB_CHANNEL_CAPACITY: usize = 128;

/// Per-subscriber outbound channel capacity.
const SUBSCRIBER_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Log,
    Metric,
    Status,
}

/// `{ type, run_id, timestamp, data }` (§4.5 event schema).
#[derive(Debug, Clone, Serialize)]
pub struct LogEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl LogEvent {
    pub fn log(run_id: impl Into<String>, stream: LogStream, content: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Log,
            run_id: run_id.into(),
            timestamp: Utc::now(),
            data: json!({ "stream": stream.as_str(), "content": content.into() }),
        }
    }

    pub fn status(run_id: impl Into<String>, status: RunStatus) -> Self {
        Self {
            kind: EventKind::Status,
            run_id: run_id.into(),
            timestamp: Utc::now(),
            data: json!({ "status": status.as_str() }),
        }
    }

    pub fn metric(run_id: impl Into<String>, cpu_pct: f32, rss_bytes: i64, mem_pct: f32) -> Self {
        Self {
            kind: EventKind::Metric,
            run_id: run_id.into(),
            timestamp: Utc::now(),
            data: json!({ "cpu_pct": cpu_pct, "rss_bytes": rss_bytes, "mem_pct": mem_pct }),
        }
    }
}

enum HubCommand {
    Register {
        run_id: String,
        sub_id: Uuid,
        tx: mpsc::Sender<LogEvent>,
    },
    Unregister {
        run_id: String,
        sub_id: Uuid,
    },
    Broadcast(LogEvent),
}

/// A live subscription returned by [`LogHub::register`]. The gateway's WS
/// loop calls [`Subscription::recv`] and forwards events to the socket.
pub struct Subscription {
    run_id: String,
    sub_id: Uuid,
    rx: mpsc::Receiver<LogEvent>,
    cmd_tx: mpsc::Sender<HubCommand>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<LogEvent> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.cmd_tx.try_send(HubCommand::Unregister {
            run_id: self.run_id.clone(),
            sub_id: self.sub_id,
        });
    }
}

#[derive(Clone)]
pub struct LogHub {
    cmd_tx: mpsc::Sender<HubCommand>,
}

impl LogHub {
    /// Spawns the hub's worker task and returns a handle to it.
    pub fn start() -> Self {
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<HubCommand>(HUB_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut subscribers: HashMap<String, HashMap<Uuid, mpsc::Sender<LogEvent>>> =
                HashMap::new();

            while let Some(cmd) = cmd_rx.recv().await {
                match cmd {
                    HubCommand::Register { run_id, sub_id, tx } => {
                        subscribers.entry(run_id).or_default().insert(sub_id, tx);
                    }
                    HubCommand::Unregister { run_id, sub_id } => {
                        if let Some(set) = subscribers.get_mut(&run_id) {
                            set.remove(&sub_id);
                            if set.is_empty() {
                                subscribers.remove(&run_id);
                            }
                        }
                    }
                    HubCommand::Broadcast(event) => {
                        let Some(set) = subscribers.get_mut(&event.run_id) else {
                            continue;
                        };
                        let mut dead = Vec::new();
                        for (sub_id, tx) in set.iter() {
                            if tx.try_send(event.clone()).is_err() {
                                dead.push(*sub_id);
                            }
                        }
                        for sub_id in dead {
                            set.remove(&sub_id);
                        }
                        if set.is_empty() {
                            subscribers.remove(&event.run_id);
                        }
                    }
                }
            }
        });

        Self { cmd_tx }
    }

    /// Idempotent add of a new subscriber for `run_id`.
    pub async fn register(&self, run_id: impl Into<String>) -> Subscription {
        let run_id = run_id.into();
        let sub_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        let _ = self
            .cmd_tx
            .send(HubCommand::Register {
                run_id: run_id.clone(),
                sub_id,
                tx,
            })
            .await;
        Subscription {
            run_id,
            sub_id,
            rx,
            cmd_tx: self.cmd_tx.clone(),
        }
    }

    /// Publishes an event to every subscriber of `event.run_id`. A write
    /// error to any one subscriber only drops that subscriber; it never
    /// blocks delivery to the others.
    pub async fn broadcast(&self, event: LogEvent) {
        if self.cmd_tx.send(HubCommand::Broadcast(event)).await.is_err() {
            log::warn!("log_hub: worker task is gone, dropping event");
        }
    }
}

/// Origin allowlist gate for the WS upgrade (§4.5). An empty origin header
/// is let through (non-browser client); `*` in `allowed_origins` disables
/// the check entirely.
pub fn is_origin_allowed(origin: Option<&str>, allowed_origins: &[String]) -> bool {
    let Some(origin) = origin.filter(|o| !o.is_empty()) else {
        return true;
    };
    allowed_origins.iter().any(|a| a == "*" || a == origin)
}
