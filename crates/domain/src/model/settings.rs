use chrono::Duration;
use thiserror::Error;

use super::AssignedKey;

pub const COOLDOWN_HOURS_KEY: &str = "cooldown_hours";
pub const KEY_MESSAGE_KEY: &str = "key_message";

pub const MIN_COOLDOWN_HOURS: u32 = 1;
pub const MAX_COOLDOWN_HOURS: u32 = 720;
pub const DEFAULT_COOLDOWN_HOURS: u32 = 24;

pub const DEFAULT_KEY_MESSAGE: &str = "🎉 Congratulations! Your key has been assigned:\n\n\
🔑 Key: {key}\n⏰ Duration: {duration}\n📦 Product: {product}\n🔗 Link: {link}";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SettingError {
    #[error("cooldown must be a whole number of hours")]
    CooldownNotANumber,
    #[error("cooldown must be between {MIN_COOLDOWN_HOURS} and {MAX_COOLDOWN_HOURS} hours")]
    CooldownOutOfRange,
    #[error("key message must contain the {{key}} placeholder")]
    MissingKeyPlaceholder,
}

/// Cooldown between two claims of the same user, bounded to [1, 720] hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownHours(u32);

impl CooldownHours {
    pub fn new(hours: u32) -> Result<Self, SettingError> {
        if !(MIN_COOLDOWN_HOURS..=MAX_COOLDOWN_HOURS).contains(&hours) {
            return Err(SettingError::CooldownOutOfRange);
        }
        Ok(Self(hours))
    }

    pub fn parse(input: &str) -> Result<Self, SettingError> {
        let hours: u32 = input
            .trim()
            .parse()
            .map_err(|_| SettingError::CooldownNotANumber)?;
        Self::new(hours)
    }

    /// Reads a stored value, falling back to the default when it is missing
    /// or has been corrupted.
    pub fn from_stored(value: Option<&str>) -> Self {
        value
            .and_then(|raw| Self::parse(raw).ok())
            .unwrap_or_default()
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn as_duration(self) -> Duration {
        Duration::hours(i64::from(self.0))
    }
}

impl Default for CooldownHours {
    fn default() -> Self {
        Self(DEFAULT_COOLDOWN_HOURS)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMessageTemplate(String);

impl KeyMessageTemplate {
    pub fn parse(input: &str) -> Result<Self, SettingError> {
        let trimmed = input.trim();
        if !trimmed.contains("{key}") {
            return Err(SettingError::MissingKeyPlaceholder);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn from_stored(value: Option<&str>) -> Self {
        value
            .and_then(|raw| Self::parse(raw).ok())
            .unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Substitutes `{key}`, `{duration}`, `{product}` and `{link}`. Unknown
    /// braces are left untouched.
    pub fn render(&self, assigned: &AssignedKey) -> String {
        let key = &assigned.key;
        self.0
            .replace("{key}", &key.key_text)
            .replace("{duration}", &key.duration.to_string())
            .replace("{product}", &key.product_name)
            .replace("{link}", &key.product_link)
    }
}

impl Default for KeyMessageTemplate {
    fn default() -> Self {
        Self(DEFAULT_KEY_MESSAGE.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{KeyDuration, KeyRecord, SaleRecord, UserId};
    use chrono::Utc;

    fn assigned() -> AssignedKey {
        let now = Utc::now();
        AssignedKey {
            key: KeyRecord {
                id: 1,
                key_text: "ABCD-1234".into(),
                duration: KeyDuration::days(7),
                product_name: "Basic".into(),
                product_link: "https://example.com/basic".into(),
                used: true,
                created_at: now,
            },
            sale: SaleRecord {
                id: 1,
                user_id: UserId::new(9),
                handle: None,
                key_id: 1,
                key_text: "ABCD-1234".into(),
                product_name: "Basic".into(),
                assigned_at: now,
                expires_at: now + Duration::days(7),
                active: true,
                left_channel: false,
            },
        }
    }

    #[test]
    fn cooldown_bounds_are_enforced() {
        assert_eq!(CooldownHours::parse("1").map(CooldownHours::get), Ok(1));
        assert_eq!(CooldownHours::parse(" 720 ").map(CooldownHours::get), Ok(720));
        assert_eq!(CooldownHours::parse("0"), Err(SettingError::CooldownOutOfRange));
        assert_eq!(CooldownHours::parse("721"), Err(SettingError::CooldownOutOfRange));
        assert_eq!(CooldownHours::parse("-3"), Err(SettingError::CooldownNotANumber));
        assert_eq!(CooldownHours::parse("abc"), Err(SettingError::CooldownNotANumber));
    }

    #[test]
    fn corrupted_cooldown_falls_back_to_default() {
        assert_eq!(CooldownHours::from_stored(Some("garbage")).get(), 24);
        assert_eq!(CooldownHours::from_stored(None).get(), 24);
        assert_eq!(CooldownHours::from_stored(Some("6")).get(), 6);
    }

    #[test]
    fn template_requires_key_placeholder() {
        assert_eq!(
            KeyMessageTemplate::parse("no placeholder"),
            Err(SettingError::MissingKeyPlaceholder)
        );
        assert!(KeyMessageTemplate::parse("here: {key}").is_ok());
    }

    #[test]
    fn template_renders_all_placeholders() {
        let template =
            KeyMessageTemplate::parse("{key} for {duration} of {product} at {link} {other}")
                .unwrap();
        assert_eq!(
            template.render(&assigned()),
            "ABCD-1234 for 7 days of Basic at https://example.com/basic {other}"
        );
    }
}
