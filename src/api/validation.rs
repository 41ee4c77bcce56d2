use std::sync::OnceLock;

use regex::Regex;

use super::ApiError;
use crate::constants::limits::MAX_NAME_LENGTH;

fn get_regex(re: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    re.get_or_init(|| Regex::new(pattern).expect("Invalid regex pattern defined in code"))
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    get_regex(&RE, r"^[^@\s]+@[^@\s]+\.[^@\s]+$")
}

fn registration_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    get_regex(&RE, r"^[A-Z0-9][A-Z0-9 -]{1,14}$")
}

pub const VEHICLE_STATUSES: &[&str] = &["available", "in_use", "maintenance", "retired"];

pub fn validate_id(id: i32, what: &str) -> Result<i32, ApiError> {
    if id <= 0 {
        return Err(ApiError::validation(format!(
            "Invalid {} ID: {}. ID must be a positive integer",
            what, id
        )));
    }
    Ok(id)
}

pub fn validate_email(email: &str) -> Result<String, ApiError> {
    let trimmed = email.trim();
    if trimmed.is_empty() {
        return Err(ApiError::validation("Email is required"));
    }
    if trimmed.len() > 254 || !email_regex().is_match(trimmed) {
        return Err(ApiError::validation("Invalid email address"));
    }
    Ok(trimmed.to_lowercase())
}

pub fn validate_name(name: &str) -> Result<&str, ApiError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ApiError::validation("Name cannot be empty"));
    }

    if trimmed.chars().count() > MAX_NAME_LENGTH {
        return Err(ApiError::validation(format!(
            "Name must be {} characters or less",
            MAX_NAME_LENGTH
        )));
    }

    Ok(trimmed)
}

pub fn validate_password_confirmation(password: &str, confirmation: &str) -> Result<(), ApiError> {
    if password != confirmation {
        return Err(ApiError::validation("Passwords do not match"));
    }
    Ok(())
}

pub fn validate_registration(registration: &str) -> Result<String, ApiError> {
    let normalized = registration.trim().to_uppercase();
    if !registration_regex().is_match(&normalized) {
        return Err(ApiError::validation(
            "Registration must be 2 to 15 letters, digits, spaces or hyphens",
        ));
    }
    Ok(normalized)
}

pub fn validate_vehicle_year(year: Option<i32>) -> Result<Option<i32>, ApiError> {
    const MIN_YEAR: i32 = 1950;
    const MAX_YEAR: i32 = 2100;

    match year {
        Some(y) if !(MIN_YEAR..=MAX_YEAR).contains(&y) => Err(ApiError::validation(format!(
            "Invalid year: {}. Year must be between {} and {}",
            y, MIN_YEAR, MAX_YEAR
        ))),
        other => Ok(other),
    }
}

pub fn validate_vehicle_status(status: &str) -> Result<&str, ApiError> {
    let trimmed = status.trim();
    if !VEHICLE_STATUSES.contains(&trimmed) {
        return Err(ApiError::validation(format!(
            "Invalid status '{}'. Expected one of: {}",
            trimmed,
            VEHICLE_STATUSES.join(", ")
        )));
    }
    Ok(trimmed)
}
