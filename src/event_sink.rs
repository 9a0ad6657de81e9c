//! Outcome event sink
//!
//! The sink is at-least-once; consumers key on `plan_id` for idempotency.
//! The core publishes structured records and never formats user messages.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use crate::types::TradeOutcome;

#[async_trait]
pub trait EventSink: Send + Sync + 'static {
    async fn publish(&self, outcome: &TradeOutcome) -> Result<()>;
}

/// Structured-log sink; the default when no downstream consumer is wired
pub struct LogEventSink;

#[async_trait]
impl EventSink for LogEventSink {
    async fn publish(&self, outcome: &TradeOutcome) -> Result<()> {
        info!(
            target: "trade_outcomes",
            "{}",
            serde_json::to_string(outcome)?
        );
        Ok(())
    }
}

/// Channel sink feeding an in-process consumer (UI bridge, tests)
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<TradeOutcome>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TradeOutcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    async fn publish(&self, outcome: &TradeOutcome) -> Result<()> {
        // A dropped receiver means the consumer is gone; the outcome is
        // still logged by the caller so this is not fatal.
        let _ = self.tx.send(outcome.clone());
        Ok(())
    }
}
