//! Booking submission types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Booking form as submitted by the public site. Nothing here is trusted
/// until it has passed [`crate::services::validation::validate`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBooking {
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub bot_token: Option<String>,
}

/// Normalized booking produced by the validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedBooking {
    pub date: String,
    pub city: String,
    /// Trimmed
    pub name: String,
    /// Trimmed and lower-cased
    pub email: String,
    /// Trimmed, digits only
    pub phone: String,
    #[serde(skip)]
    pub bot_token: Option<String>,
}

impl ValidatedBooking {
    /// Composite key used by the session cooldown: `email_phone`.
    pub fn identity_key(&self) -> String {
        format!("{}_{}", self.email, self.phone)
    }
}

/// A booking ready to be written by the store.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub booking: ValidatedBooking,
    pub client_address: String,
    /// `None` when no verification was performed.
    pub bot_verified: Option<bool>,
}

/// `booking.submit` payload
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingSubmitRequest {
    pub booking: RawBooking,
    /// Client network address as seen by the HTTP edge.
    #[serde(default)]
    pub client_address: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingSubmitResponse {
    pub ok: bool,
    pub booking_id: Uuid,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_key_joins_email_and_phone() {
        let booking = ValidatedBooking {
            date: "2026-11-02".into(),
            city: "Brno".into(),
            name: "Jana".into(),
            email: "jana@gmail.com".into(),
            phone: "420777123456".into(),
            bot_token: None,
        };
        assert_eq!(booking.identity_key(), "jana@gmail.com_420777123456");
    }

    #[test]
    fn submit_request_parses_with_missing_optional_fields() {
        let raw = r#"{ "booking": { "date": "slot-1", "city": "Brno" } }"#;
        let req: BookingSubmitRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(req.booking.date, "slot-1");
        assert!(req.booking.email.is_empty());
        assert!(req.booking.bot_token.is_none());
        assert!(req.client_address.is_none());
    }

    #[test]
    fn submit_request_reads_bot_token_in_camel_case() {
        let raw = r#"{ "booking": { "botToken": "tok" }, "clientAddress": "10.0.0.1" }"#;
        let req: BookingSubmitRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(req.booking.bot_token.as_deref(), Some("tok"));
        assert_eq!(req.client_address.as_deref(), Some("10.0.0.1"));
    }
}
