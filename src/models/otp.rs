use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Drops spaces and dashes so "+49 151-1234" and "+491511234" match.
pub fn normalize_mobile(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect()
}

/// Destination of a login code. Mobile and email are mutually exclusive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OtpTarget {
    Mobile(String),
    Email(String),
}

impl OtpTarget {
    /// Trims and lowercases so lookups do not depend on client formatting.
    pub fn normalized(&self) -> Self {
        match self {
            OtpTarget::Mobile(mobile) => OtpTarget::Mobile(normalize_mobile(mobile)),
            OtpTarget::Email(email) => OtpTarget::Email(email.trim().to_lowercase()),
        }
    }

    pub fn destination(&self) -> &str {
        match self {
            OtpTarget::Mobile(mobile) => mobile,
            OtpTarget::Email(email) => email,
        }
    }
}

impl fmt::Display for OtpTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OtpTarget::Mobile(mobile) => write!(f, "mobile:{mobile}"),
            OtpTarget::Email(email) => write!(f, "email:{email}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpAttempt {
    pub id: Uuid,
    pub target: OtpTarget,
    pub code: String,
    pub expires_at: DateTime<Utc>,
    pub verified: bool,
    pub attempts: u32,
    pub user_id: Option<Uuid>,
    pub driver_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl OtpAttempt {
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        !self.verified && self.expires_at > now
    }
}

/// A checkpoint code as submitted by a client: either a JSON string or a number.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum CodeInput {
    Text(String),
    Number(u64),
}

impl CodeInput {
    pub fn normalized(&self) -> String {
        match self {
            CodeInput::Text(text) => text.trim().to_string(),
            CodeInput::Number(number) => number.to_string(),
        }
    }
}
