//! Ping handler for health checks

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Default, Deserialize)]
struct PingRequest {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct PongResponse {
    message: String,
    timestamp: String,
}

fn pong(request: PingRequest) -> PongResponse {
    PongResponse {
        message: request
            .message
            .map(|m| format!("Pong: {}", m))
            .unwrap_or_else(|| "Pong".to_string()),
        timestamp: chrono::Utc::now().to_rfc3339(),
    }
}

/// Handle `booking.ping` messages. An empty or unparsable body still gets a
/// pong; the probe only cares that the worker answers.
pub async fn handle_ping(client: Client, mut subscriber: Subscriber) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Ping message without reply subject");
                continue;
            }
        };

        let request: PingRequest = serde_json::from_slice(&msg.payload).unwrap_or_default();
        client.publish(reply, serde_json::to_vec(&pong(request))?.into()).await?;
        debug!("Sent pong response");
    }

    Ok(())
}
