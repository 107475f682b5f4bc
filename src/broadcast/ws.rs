//! WebSocket adapter for the live event stream
//!
//! Each socket gets its own [`Subscription`]; frames are written as JSON text
//! messages of the form `{"kind": ..., "payload": ...}`.

use crate::broadcast::frame::SubscriptionFilter;
use crate::broadcast::hub::Subscription;
use crate::error::Result;
use axum::extract::ws::{Message, WebSocket};
use serde::Deserialize;
use tracing::{debug, warn};

/// Query parameters accepted by the stream endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamQuery {
    /// Comma-separated event kinds; empty means all
    pub kinds: Option<String>,
    /// Only events concerning this player
    pub player_id: Option<String>,
}

impl StreamQuery {
    pub fn filter(&self) -> Result<SubscriptionFilter> {
        let filter = match &self.kinds {
            Some(raw) => SubscriptionFilter::parse_kinds(raw)?,
            None => SubscriptionFilter::all(),
        };
        Ok(match &self.player_id {
            Some(player_id) => filter.for_player(player_id.clone()),
            None => filter,
        })
    }
}

/// Pump frames from a subscription into a socket until either side closes
pub async fn serve_socket(mut socket: WebSocket, subscription: Subscription) {
    let id = subscription.id();
    debug!("Streaming events to connection {}", id);

    loop {
        tokio::select! {
            frame = subscription.recv() => {
                let Some(frame) = frame else { break };
                let text = match frame.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Skipping unserializable frame for connection {}: {}", id, e);
                        continue;
                    }
                };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // The stream is push-only; anything else from the client is ignored
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    debug!("Event stream for connection {} ended", id);
    // Dropping the subscription unsubscribes and discards its queue
}
