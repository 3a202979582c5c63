//! The email payload carried in broker message bodies.
//!
//! The wire format is JSON:
//!
//! ```json
//! {
//!   "receivers": [{ "name": "Ada", "email": "ada@example.com" }],
//!   "blindReceivers": [],
//!   "subject": "Welcome",
//!   "template": { "name": "welcome", "data": { "first_name": "Ada" } },
//!   "attachments": ["terms.pdf"]
//! }
//! ```
//!
//! Deserialisation only checks shape. [`Email::validate`] enforces the rules
//! and is invoked explicitly at the boundary through [`Email::decode`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::error::Category;

use crate::ValidationError;

/// A named mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

impl Recipient {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingName(self.email.clone()));
        }

        if has_control(&self.name) {
            return Err(ValidationError::UnsafeName(self.email.clone()));
        }

        if !is_valid_address(&self.email) {
            return Err(ValidationError::InvalidAddress(self.email.clone()));
        }

        Ok(())
    }
}

/// A reference to a stored template plus the values for its fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateRef {
    pub name: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Email {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub receivers: Vec<Recipient>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blind_receivers: Vec<Recipient>,
    #[serde(default)]
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<TemplateRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
}

impl Email {
    /// Parse and validate a message body.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Malformed`] if the body is not JSON of the
    /// expected shape, or the first rule violation reported by [`Email::validate`].
    pub fn decode(body: &[u8]) -> Result<Self, ValidationError> {
        let email: Self = serde_json::from_slice(body).map_err(|err| {
            // Positions differ per payload; the category is what gets reported.
            ValidationError::Malformed(
                match err.classify() {
                    Category::Syntax => "not valid JSON",
                    Category::Eof => "truncated JSON",
                    Category::Data => "JSON does not match the email schema",
                    Category::Io => "unreadable body",
                }
                .to_string(),
            )
        })?;
        email.validate()?;
        Ok(email)
    }

    /// Check the payload rules.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.receivers.is_empty() && self.blind_receivers.is_empty() {
            return Err(ValidationError::NoRecipients);
        }

        self.receivers
            .iter()
            .chain(&self.blind_receivers)
            .try_for_each(Recipient::validate)?;

        if self.subject.trim().is_empty() {
            return Err(ValidationError::MissingSubject);
        }

        match (&self.message, &self.template) {
            (Some(_), None) => {}
            (None, Some(template)) if template.name.trim().is_empty() => {
                return Err(ValidationError::MissingTemplateName);
            }
            (None, Some(_)) => {}
            _ => return Err(ValidationError::BodyConflict),
        }

        if self.attachments.iter().any(|a| a.trim().is_empty()) {
            return Err(ValidationError::EmptyAttachment);
        }

        if let Some(unsafe_name) = self.attachments.iter().find(|a| has_control(a)) {
            return Err(ValidationError::UnsafeAttachment(unsafe_name.clone()));
        }

        Ok(())
    }

    /// Every envelope recipient address, visible and blind.
    pub fn envelope_recipients(&self) -> impl Iterator<Item = &str> {
        self.receivers
            .iter()
            .chain(&self.blind_receivers)
            .map(|r| r.email.as_str())
    }
}

fn has_control(value: &str) -> bool {
    value.chars().any(char::is_control)
}

/// `true` when `address` parses as exactly one bare mailbox, with nothing
/// around it.
fn is_valid_address(address: &str) -> bool {
    if address.is_empty()
        || !address.contains('@')
        || address != address.trim()
        || has_control(address)
    {
        return false;
    }

    mailparse::addrparse(address).is_ok_and(|list| {
        matches!(
            list.as_slice(),
            [mailparse::MailAddr::Single(single)] if single.addr == address
        )
    })
}
