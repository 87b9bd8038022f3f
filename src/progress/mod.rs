//! Ordered progress-event stream for one request.
//!
//! Events travel over an mpsc channel to the transport layer (SSE at the
//! HTTP surface). The sender enforces the terminal contract: exactly one
//! `complete` or `error`, nothing after it. A dropped receiver means the
//! client went away; senders surface that as cancellation so orchestrators
//! stop promptly.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;

use crate::error::{AppError, AppResult};

/// Event kinds on the progress stream.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Stage,
    Partial,
    Complete,
    Error,
}

/// One progress event, framed as `{type, ts, data}` on the wire.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub kind: EventKind,
    pub ts: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl ProgressEvent {
    /// Wire representation.
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "type": match self.kind {
                EventKind::Stage => "stage",
                EventKind::Partial => "partial",
                EventKind::Complete => "complete",
                EventKind::Error => "error",
            },
            "ts": self.ts.to_rfc3339(),
            "data": self.data,
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, EventKind::Complete | EventKind::Error)
    }
}

/// Sending half handed to orchestrators.
pub struct ProgressSender {
    tx: mpsc::Sender<ProgressEvent>,
    terminal_sent: bool,
}

impl ProgressSender {
    /// Create a channel pair; the receiver feeds the transport.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            Self {
                tx,
                terminal_sent: false,
            },
            rx,
        )
    }

    async fn send(&mut self, event: ProgressEvent) -> AppResult<()> {
        if self.terminal_sent {
            // The stream contract is one terminal event; drop stragglers.
            return Ok(());
        }
        if event.is_terminal() {
            self.terminal_sent = true;
        }
        self.tx.send(event).await.map_err(|_| AppError::Cancelled)
    }

    /// Emit a stage progress event.
    pub async fn stage(&mut self, name: &str, pct: u8, detail: Option<String>) -> AppResult<()> {
        let mut data = json!({ "name": name, "pct": pct.min(100) });
        if let Some(detail) = detail {
            data["detail"] = json!(detail);
        }
        self.send(ProgressEvent {
            kind: EventKind::Stage,
            ts: Utc::now(),
            data,
        })
        .await
    }

    /// Emit intermediate data.
    pub async fn partial(&mut self, data: serde_json::Value) -> AppResult<()> {
        self.send(ProgressEvent {
            kind: EventKind::Partial,
            ts: Utc::now(),
            data,
        })
        .await
    }

    /// Emit the terminal payload.
    pub async fn complete(&mut self, data: serde_json::Value) -> AppResult<()> {
        self.send(ProgressEvent {
            kind: EventKind::Complete,
            ts: Utc::now(),
            data,
        })
        .await
    }

    /// Emit the terminal error.
    pub async fn error(&mut self, kind: &str, message: &str) -> AppResult<()> {
        self.send(ProgressEvent {
            kind: EventKind::Error,
            ts: Utc::now(),
            data: json!({ "kind": kind, "message": message }),
        })
        .await
    }

    /// Whether a terminal event already went out.
    pub fn finished(&self) -> bool {
        self.terminal_sent
    }
}
