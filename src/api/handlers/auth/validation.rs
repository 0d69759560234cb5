//! Field-level validation shared by the auth handlers.
//!
//! Rules: name 2..=255 chars, email shape plus 255-char cap, password
//! 8..=255 chars with a matching confirmation. Collected messages become the
//! `errors` map of a 422 envelope.

use std::collections::BTreeMap;

use super::utils::valid_email;

pub(super) const VALIDATION_FAILED: &str = "The given data was invalid.";

const NAME_MIN: usize = 2;
const NAME_MAX: usize = 255;
const EMAIL_MAX: usize = 255;
const PASSWORD_MIN: usize = 8;
const PASSWORD_MAX: usize = 255;

/// Accumulates per-field validation messages in a stable order.
#[derive(Debug, Default)]
pub(super) struct FieldErrors {
    errors: BTreeMap<String, Vec<String>>,
}

impl FieldErrors {
    pub(super) fn new() -> Self {
        Self::default()
    }

    pub(super) fn add(&mut self, field: &str, message: impl Into<String>) {
        self.errors
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub(super) fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub(super) fn into_map(self) -> BTreeMap<String, Vec<String>> {
        self.errors
    }
}

pub(super) fn validate_name(errors: &mut FieldErrors, name: &str) {
    let length = name.chars().count();
    if !(NAME_MIN..=NAME_MAX).contains(&length) {
        errors.add(
            "name",
            format!("The name must be between {NAME_MIN} and {NAME_MAX} characters."),
        );
    }
}

/// Shape check only; uniqueness is decided against the database.
pub(super) fn validate_email_shape(errors: &mut FieldErrors, email_normalized: &str) {
    if email_normalized.chars().count() > EMAIL_MAX {
        errors.add(
            "email",
            format!("The email must not be greater than {EMAIL_MAX} characters."),
        );
    }
    if !valid_email(email_normalized) {
        errors.add("email", "The email must be a valid email address.");
    }
}

pub(super) fn validate_password_pair(
    errors: &mut FieldErrors,
    password: &str,
    password_confirmation: &str,
) {
    let length = password.chars().count();
    if length < PASSWORD_MIN {
        errors.add(
            "password",
            format!("The password must be at least {PASSWORD_MIN} characters."),
        );
    }
    if length > PASSWORD_MAX {
        errors.add(
            "password",
            format!("The password must not be greater than {PASSWORD_MAX} characters."),
        );
    }
    if password != password_confirmation {
        errors.add("password", "The password confirmation does not match.");
    }
}
