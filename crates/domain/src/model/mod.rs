//! Typed records shared across the engine, the store and the transport.

mod import;
mod settings;

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use hex::encode as hex_encode;
use sha3::{Digest, Sha3_256};
use strum_macros::{AsRefStr, EnumString};
use thiserror::Error;

pub use import::*;
pub use settings::*;

/// Product name used when an import line omits it.
pub const DEFAULT_PRODUCT_NAME: &str = "Premium";

/// Short SHA3-256 fingerprint of a key so logs never carry the raw credential.
pub fn key_fingerprint(key_text: &str) -> String {
    let mut hasher = Sha3_256::new();
    hasher.update(key_text.as_bytes());
    let digest = hasher.finalize();
    hex_encode(&digest[..6])
}

/// Chat platform user identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(i64);

impl UserId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for UserId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of whoever sent a command, as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub id: UserId,
    pub handle: Option<String>,
}

impl UserProfile {
    pub fn new(id: impl Into<UserId>, handle: Option<String>) -> Self {
        Self {
            id: id.into(),
            handle,
        }
    }

    /// `@handle` when known, otherwise the numeric id.
    pub fn display_name(&self) -> String {
        display_name(self.id, self.handle.as_deref())
    }
}

pub(crate) fn display_name(id: UserId, handle: Option<&str>) -> String {
    match handle {
        Some(handle) if !handle.is_empty() => format!("@{handle}"),
        _ => id.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: UserId,
    pub handle: Option<String>,
    pub verified: bool,
    pub last_key_time: Option<DateTime<Utc>>,
    pub total_claims: i64,
    pub first_seen: DateTime<Utc>,
    pub blocked: bool,
    pub block_reason: Option<String>,
}

impl UserRecord {
    pub fn display_name(&self) -> String {
        display_name(self.id, self.handle.as_deref())
    }
}

/// Errors emitted when an admin-supplied channel handle is malformed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelFormatError {
    #[error("channel handle is empty")]
    Empty,
    #[error("channel handle `{0}` contains invalid characters")]
    InvalidCharacters(String),
}

/// Channel username (without the leading `@`) or numeric chat id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelHandle(String);

impl ChannelHandle {
    pub fn parse(input: &str) -> Result<Self, ChannelFormatError> {
        let trimmed = input.trim();
        let handle = trimmed.strip_prefix('@').unwrap_or(trimmed);
        if handle.is_empty() {
            return Err(ChannelFormatError::Empty);
        }
        let numeric = handle
            .strip_prefix('-')
            .unwrap_or(handle)
            .chars()
            .all(|c| c.is_ascii_digit());
        let username = handle.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !(numeric || username) {
            return Err(ChannelFormatError::InvalidCharacters(handle.to_string()));
        }
        Ok(Self(handle.to_string()))
    }

    /// Wraps a handle already validated by the store.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_numeric(&self) -> bool {
        self.0.starts_with('-') || self.0.chars().all(|c| c.is_ascii_digit())
    }

    /// Chat identifier understood by the platform: `@name` or the raw id.
    pub fn chat_ref(&self) -> String {
        if self.is_numeric() {
            self.0.clone()
        } else {
            format!("@{}", self.0)
        }
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.chat_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub handle: ChannelHandle,
    pub link: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum DurationUnit {
    Hours,
    Days,
}

/// Validity period attached to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyDuration {
    value: u32,
    unit: DurationUnit,
}

impl KeyDuration {
    pub fn new(value: u32, unit: DurationUnit) -> Self {
        Self { value, unit }
    }

    pub fn hours(value: u32) -> Self {
        Self::new(value, DurationUnit::Hours)
    }

    pub fn days(value: u32) -> Self {
        Self::new(value, DurationUnit::Days)
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn unit(&self) -> DurationUnit {
        self.unit
    }

    pub fn as_hours(&self) -> i64 {
        match self.unit {
            DurationUnit::Hours => i64::from(self.value),
            DurationUnit::Days => i64::from(self.value) * 24,
        }
    }

    pub fn to_chrono(&self) -> Duration {
        Duration::hours(self.as_hours())
    }
}

impl fmt::Display for KeyDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let noun = match (self.unit, self.value) {
            (DurationUnit::Hours, 1) => "hour",
            (DurationUnit::Hours, _) => "hours",
            (DurationUnit::Days, 1) => "day",
            (DurationUnit::Days, _) => "days",
        };
        write!(f, "{} {}", self.value, noun)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRecord {
    pub id: i64,
    pub key_text: String,
    pub duration: KeyDuration,
    pub product_name: String,
    pub product_link: String,
    pub used: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewKey {
    pub key_text: String,
    pub duration: KeyDuration,
    pub product_name: String,
    pub product_link: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyInsert {
    Inserted,
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaleRecord {
    pub id: i64,
    pub user_id: UserId,
    pub handle: Option<String>,
    pub key_id: i64,
    pub key_text: String,
    pub product_name: String,
    pub assigned_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub active: bool,
    pub left_channel: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitlistEntry {
    pub id: i64,
    pub user_id: UserId,
    pub handle: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub admin_notified: bool,
}

impl WaitlistEntry {
    pub fn profile(&self) -> UserProfile {
        UserProfile::new(self.user_id, self.handle.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitlistInsert {
    Added,
    AlreadyWaiting,
}

/// Input to the store's atomic claim primitive. The store re-validates the
/// user against `cooldown` inside the same transaction that marks the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyClaimRequest {
    pub user: UserProfile,
    pub now: DateTime<Utc>,
    pub cooldown: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignedKey {
    pub key: KeyRecord,
    pub sale: SaleRecord,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimAttempt {
    Assigned(AssignedKey),
    NoInventory,
    /// The user changed state (blocked, unverified, claimed concurrently)
    /// between the eligibility read and the atomic step.
    Ineligible,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InventoryStats {
    pub total: u64,
    pub used: u64,
    pub available: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserStats {
    pub total: u64,
    pub verified: u64,
    pub blocked: u64,
}
