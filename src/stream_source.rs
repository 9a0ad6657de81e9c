//! Stream source: near-real-time delivery of master-wallet transactions
//!
//! The live implementation subscribes over WebSocket pub-sub to logs
//! mentioning each watched master, then pulls the full confirmed
//! transaction through the RPC. The ingress owns reconnect policy; a source
//! signals failure by returning an error from `connect` or by closing the
//! delivery channel.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::chain_rpc::ChainRpc;
use crate::types::RawTransaction;

#[async_trait]
pub trait StreamSource: Send + Sync + 'static {
    /// Open a delivery stream for the given master set.
    ///
    /// Every master is registered before the first transaction is delivered,
    /// so a reconnect never loses membership. A closed receiver means the
    /// source went away and the caller should reconnect.
    async fn connect(&self, masters: &[Pubkey]) -> Result<mpsc::Receiver<RawTransaction>>;
}

/// WebSocket log-subscription source backed by an RPC transaction fetch
pub struct WsStreamSource {
    ws_url: String,
    rpc: Arc<dyn ChainRpc>,
}

impl WsStreamSource {
    pub fn new(ws_url: String, rpc: Arc<dyn ChainRpc>) -> Self {
        Self { ws_url, rpc }
    }
}

#[async_trait]
impl StreamSource for WsStreamSource {
    async fn connect(&self, masters: &[Pubkey]) -> Result<mpsc::Receiver<RawTransaction>> {
        let (stream, _) = connect_async(self.ws_url.as_str())
            .await
            .with_context(|| format!("connecting websocket {}", self.ws_url))?;
        let (mut write, mut read) = stream.split();

        // Register every master before consuming notifications
        for (id, master) in masters.iter().enumerate() {
            let request = json!({
                "jsonrpc": "2.0",
                "id": id + 1,
                "method": "logsSubscribe",
                "params": [
                    { "mentions": [master.to_string()] },
                    { "commitment": "confirmed" }
                ]
            });
            write
                .send(Message::Text(request.to_string()))
                .await
                .context("sending logsSubscribe")?;
        }
        info!(
            "stream source subscribed to {} masters via {}",
            masters.len(),
            self.ws_url
        );

        let (tx, rx) = mpsc::channel(256);
        let rpc = self.rpc.clone();
        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                let text = match message {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Ping(payload)) => {
                        let _ = write.send(Message::Pong(payload)).await;
                        continue;
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                let Some(signature) = extract_notified_signature(&text) else {
                    continue;
                };
                match rpc.get_transaction(&signature).await {
                    Ok(Some(raw)) => {
                        if tx.send(raw).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => debug!("notified signature {} not yet queryable", signature),
                    Err(e) => warn!("transaction fetch failed for {}: {}", signature, e),
                }
            }
            // Dropping tx closes the delivery channel; the ingress reconnects.
        });
        Ok(rx)
    }
}

/// Pull the signature out of a logsNotification; failed transactions and
/// non-notification frames return `None`.
fn extract_notified_signature(text: &str) -> Option<Signature> {
    let value: Value = serde_json::from_str(text).ok()?;
    if value.get("method")?.as_str()? != "logsNotification" {
        return None;
    }
    let result = value.get("params")?.get("result")?.get("value")?;
    if !result.get("err")?.is_null() {
        return None;
    }
    let signature = result.get("signature")?.as_str()?;
    Signature::from_str(signature).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_signature_from_notification() {
        let signature = Signature::new_unique();
        let frame = json!({
            "jsonrpc": "2.0",
            "method": "logsNotification",
            "params": {
                "result": {
                    "context": { "slot": 1234 },
                    "value": {
                        "signature": signature.to_string(),
                        "err": null,
                        "logs": ["Program log: swap"]
                    }
                },
                "subscription": 1
            }
        })
        .to_string();
        assert_eq!(extract_notified_signature(&frame), Some(signature));
    }

    #[test]
    fn test_failed_transactions_are_ignored() {
        let frame = json!({
            "jsonrpc": "2.0",
            "method": "logsNotification",
            "params": {
                "result": {
                    "context": { "slot": 1234 },
                    "value": {
                        "signature": Signature::new_unique().to_string(),
                        "err": { "InstructionError": [0, "Custom"] },
                        "logs": []
                    }
                },
                "subscription": 1
            }
        })
        .to_string();
        assert_eq!(extract_notified_signature(&frame), None);
    }

    #[test]
    fn test_subscription_confirmations_are_ignored() {
        let frame = json!({ "jsonrpc": "2.0", "result": 42, "id": 1 }).to_string();
        assert_eq!(extract_notified_signature(&frame), None);
    }
}
