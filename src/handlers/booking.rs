//! Booking submission handlers.
//!
//! Handlers exposed:
//!   - `handle_submit` — `booking.submit`
//!   - `handle_stats`  — `booking.gate.stats`
//!
//! Each submission is decided on its own task so one slow store call does not
//! hold up the queue. The gate itself is transport-agnostic; this module only
//! maps its decisions onto reply envelopes.

use std::sync::Arc;

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, warn};
use uuid::Uuid;

use crate::services::admission::{AdmissionDecision, AdmissionGate};
use crate::types::{
    BookingSubmitRequest, BookingSubmitResponse, EmptyPayload, ErrorResponse, Request,
    SuccessResponse,
};

/// Serialize the reply for one decision.
pub fn decision_reply(request_id: Uuid, decision: AdmissionDecision) -> Result<Vec<u8>> {
    let bytes = match decision {
        AdmissionDecision::Accepted { booking_id, .. } => serde_json::to_vec(&SuccessResponse::new(
            request_id,
            BookingSubmitResponse {
                ok: true,
                booking_id,
                message: "Your booking has been received.".into(),
            },
        ))?,
        AdmissionDecision::RejectedValidation(errors) => serde_json::to_vec(
            &ErrorResponse::new(request_id, "VALIDATION_ERROR", "Please correct the highlighted fields.")
                .with_details(json!({ "fields": errors })),
        )?,
        AdmissionDecision::RejectedRateLimited { retry_after_secs } => serde_json::to_vec(
            &ErrorResponse::new(request_id, "RATE_LIMITED", "Too many requests. Please try again later.")
                .with_details(json!({ "retryAfterSeconds": retry_after_secs })),
        )?,
        AdmissionDecision::RejectedCooldown { remaining_secs, remaining_minutes } => serde_json::to_vec(
            &ErrorResponse::new(
                request_id,
                "COOLDOWN_ACTIVE",
                format!(
                    "You have already submitted a booking. Please wait {} minute(s) before trying again.",
                    remaining_minutes
                ),
            )
            .with_details(json!({
                "remainingSeconds": remaining_secs,
                "remainingMinutes": remaining_minutes,
            })),
        )?,
        AdmissionDecision::PersistenceFailure { .. } => serde_json::to_vec(&ErrorResponse::new(
            request_id,
            "PERSISTENCE_ERROR",
            "Your booking could not be saved. Please try again.",
        ))?,
        AdmissionDecision::Cancelled => serde_json::to_vec(&ErrorResponse::new(
            request_id,
            "CANCELLED",
            "The request was cancelled.",
        ))?,
    };
    Ok(bytes)
}

/// Handle `booking.submit` messages. Stops taking new messages once
/// `shutdown` fires; submissions already running are left on `tracker`.
pub async fn handle_submit(
    client: Client,
    mut subscriber: Subscriber,
    gate: Arc<AdmissionGate>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
) -> Result<()> {
    loop {
        let msg = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            msg = subscriber.next() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => {
                warn!("booking.submit message without reply subject");
                continue;
            }
        };

        let request: Request<BookingSubmitRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(r) => r,
            Err(e) => {
                let err = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                if let Err(e) = client.publish(reply, serde_json::to_vec(&err)?.into()).await {
                    error!("Failed to publish booking.submit error reply: {}", e);
                }
                continue;
            }
        };

        let client = client.clone();
        let gate = Arc::clone(&gate);
        let cancel = shutdown.child_token();
        tracker.spawn(async move {
            let payload = request.payload;
            let decision = gate
                .admit(&payload.booking, payload.client_address.as_deref(), &cancel)
                .await;

            match decision_reply(request.id, decision) {
                Ok(bytes) => {
                    if let Err(e) = client.publish(reply, bytes.into()).await {
                        error!("Failed to publish booking.submit reply: {}", e);
                    }
                }
                Err(e) => error!("Failed to serialize booking.submit reply: {}", e),
            }
        });
    }

    Ok(())
}

/// Handle `booking.gate.stats` messages
pub async fn handle_stats(
    client: Client,
    mut subscriber: Subscriber,
    gate: Arc<AdmissionGate>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => continue,
        };

        let request_id = serde_json::from_slice::<Request<EmptyPayload>>(&msg.payload)
            .map(|r| r.id)
            .unwrap_or_else(|_| Uuid::nil());

        let resp = SuccessResponse::new(request_id, gate.stats());
        if let Err(e) = client.publish(reply, serde_json::to_vec(&resp)?.into()).await {
            error!("Failed to publish booking.gate.stats reply: {}", e);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::bot_verification::VerificationStatus;
    use crate::services::validation::validate;
    use crate::types::RawBooking;

    fn reply_json(decision: AdmissionDecision) -> serde_json::Value {
        serde_json::from_slice(&decision_reply(Uuid::nil(), decision).unwrap()).unwrap()
    }

    #[test]
    fn accepted_reply_carries_booking_id() {
        let id = Uuid::new_v4();
        let json = reply_json(AdmissionDecision::Accepted {
            booking_id: id,
            verification: VerificationStatus::Passed,
        });
        assert_eq!(json["payload"]["ok"], true);
        assert_eq!(json["payload"]["bookingId"], id.to_string());
    }

    #[test]
    fn validation_reply_lists_fields() {
        let errors = validate(&RawBooking::default()).unwrap_err();
        let json = reply_json(AdmissionDecision::RejectedValidation(errors));
        assert_eq!(json["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(json["error"]["details"]["fields"].as_array().unwrap().len(), 5);
    }

    #[test]
    fn rate_limited_reply_has_retry_after() {
        let json = reply_json(AdmissionDecision::RejectedRateLimited { retry_after_secs: 42 });
        assert_eq!(json["error"]["code"], "RATE_LIMITED");
        assert_eq!(json["error"]["details"]["retryAfterSeconds"], 42);
    }

    #[test]
    fn cooldown_reply_mentions_minutes() {
        let json = reply_json(AdmissionDecision::RejectedCooldown {
            remaining_secs: 61,
            remaining_minutes: 2,
        });
        assert_eq!(json["error"]["code"], "COOLDOWN_ACTIVE");
        assert_eq!(json["error"]["details"]["remainingMinutes"], 2);
        assert!(json["error"]["message"].as_str().unwrap().contains("2 minute"));
    }

    #[test]
    fn persistence_failure_hides_internal_reason() {
        let json = reply_json(AdmissionDecision::PersistenceFailure {
            reason: "database error: connection refused".into(),
        });
        assert_eq!(json["error"]["code"], "PERSISTENCE_ERROR");
        assert!(!json.to_string().contains("connection refused"));
    }
}
