//! Booking form validation.
//!
//! `validate` checks every field independently and reports all failures at
//! once, one entry per failing field, so the form can highlight everything in
//! a single round trip. On success it returns a fresh normalized record; the
//! input is never modified.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use serde::Serialize;
use thiserror::Error;
use validator::ValidateEmail;

use crate::types::{RawBooking, ValidatedBooking};

pub const MIN_CITY_LEN: usize = 2;
pub const MIN_NAME_LEN: usize = 2;
pub const MAX_NAME_LEN: usize = 50;
pub const MAX_EMAIL_LEN: usize = 255;
pub const MAX_EMAIL_LOCAL_LEN: usize = 40;
pub const MIN_PHONE_LEN: usize = 8;
pub const MAX_PHONE_LEN: usize = 20;

/// Public mailbox providers accepted for bookings.
static ALLOWED_EMAIL_DOMAINS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "gmail.com", "googlemail.com", "yahoo.com", "ymail.com", "outlook.com",
        "hotmail.com", "live.com", "msn.com", "icloud.com", "me.com", "mac.com",
        "aol.com", "protonmail.com", "proton.me", "zoho.com", "gmx.com", "gmx.net",
        "gmx.de", "mail.com", "yandex.com", "yandex.ru", "mail.ru", "seznam.cz",
        "email.cz", "centrum.cz", "post.cz", "web.de", "t-online.de", "orange.fr",
        "libero.it", "wp.pl", "o2.pl", "interia.pl",
    ]
    .into_iter()
    .collect()
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// All field failures for one submission.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("invalid booking fields: {}", field_list(.errors))]
#[serde(transparent)]
pub struct ValidationErrors {
    errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }
}

fn field_list(errors: &[FieldError]) -> String {
    errors.iter().map(|e| e.field).collect::<Vec<_>>().join(", ")
}

pub fn validate(raw: &RawBooking) -> Result<ValidatedBooking, ValidationErrors> {
    let mut errors = Vec::new();
    let mut collect = |field: &'static str, result: Result<String, String>| match result {
        Ok(value) => Some(value),
        Err(message) => {
            errors.push(FieldError { field, message });
            None
        }
    };

    let date = collect("date", check_date(&raw.date));
    let city = collect("city", check_city(&raw.city));
    let name = collect("name", check_name(&raw.name));
    let email = collect("email", normalize_and_check_email(&raw.email));
    let phone = collect("phone", check_phone(&raw.phone));

    match (date, city, name, email, phone) {
        (Some(date), Some(city), Some(name), Some(email), Some(phone)) => Ok(ValidatedBooking {
            date,
            city,
            name,
            email,
            phone,
            bot_token: raw.bot_token.clone().filter(|t| !t.trim().is_empty()),
        }),
        _ => Err(ValidationErrors { errors }),
    }
}

fn check_date(date: &str) -> Result<String, String> {
    if date.trim().is_empty() {
        return Err("Please choose a date.".into());
    }
    Ok(date.to_string())
}

fn check_city(city: &str) -> Result<String, String> {
    if city.chars().count() < MIN_CITY_LEN {
        return Err(format!("City must be at least {} characters.", MIN_CITY_LEN));
    }
    Ok(city.to_string())
}

fn check_name(name: &str) -> Result<String, String> {
    let name = name.trim();
    let len = name.chars().count();
    if !(MIN_NAME_LEN..=MAX_NAME_LEN).contains(&len) {
        return Err(format!(
            "Name must be between {} and {} characters.",
            MIN_NAME_LEN, MAX_NAME_LEN
        ));
    }
    Ok(name.to_string())
}

fn check_phone(phone: &str) -> Result<String, String> {
    let phone = phone.trim();
    if phone.is_empty() || !phone.chars().all(|c| c.is_ascii_digit()) {
        return Err("Phone number may contain digits only.".into());
    }
    if !(MIN_PHONE_LEN..=MAX_PHONE_LEN).contains(&phone.len()) {
        return Err(format!(
            "Phone number must have between {} and {} digits.",
            MIN_PHONE_LEN, MAX_PHONE_LEN
        ));
    }
    Ok(phone.to_string())
}

/// Trim and lower-case, then apply syntax, length and provider rules.
fn normalize_and_check_email(email: &str) -> Result<String, String> {
    let email = normalize_email(email);

    if email.chars().count() > MAX_EMAIL_LEN {
        return Err(format!("Email must be at most {} characters.", MAX_EMAIL_LEN));
    }
    if !email.validate_email() {
        return Err("Please enter a valid email address.".into());
    }

    let (local, domain) = match email.split_once('@') {
        Some(parts) => parts,
        None => return Err("Please enter a valid email address.".into()),
    };
    if local.chars().count() > MAX_EMAIL_LOCAL_LEN {
        return Err(format!(
            "The part before @ must be at most {} characters.",
            MAX_EMAIL_LOCAL_LEN
        ));
    }
    if !is_allowed_domain(domain) {
        return Err("Please use an address from a common email provider.".into());
    }
    Ok(email)
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn is_allowed_domain(domain: &str) -> bool {
    ALLOWED_EMAIL_DOMAINS.contains(domain.to_ascii_lowercase().as_str())
}
