//! Grammar for the admin's bulk key import.
//!
//! ```text
//! line     := key "|" duration [ "|" product [ "|" link ] ]
//! duration := number [ unit ]
//! unit     := "h" | "hour" | "hours" | "d" | "day" | "days"   (bare number = days)
//! ```

use std::str::FromStr;

use thiserror::Error;

use super::{DurationUnit, KeyDuration, NewKey, DEFAULT_PRODUCT_NAME};

const MAX_FIELDS: usize = 4;
/// Longest accepted validity period, one hundred years.
pub const MAX_DURATION_HOURS: i64 = 100 * 365 * 24;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("key text is empty")]
    MissingKey,
    #[error("duration is missing")]
    MissingDuration,
    #[error("invalid duration `{0}`")]
    InvalidDuration(String),
    #[error("duration must be greater than zero")]
    ZeroDuration,
    #[error("duration `{0}` exceeds one hundred years")]
    DurationTooLong(String),
    #[error("expected at most {MAX_FIELDS} fields, found {0}")]
    TooManyFields(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKeyImportLine {
    pub key_text: String,
    pub duration: KeyDuration,
    pub product_name: String,
    pub product_link: String,
}

impl ParsedKeyImportLine {
    pub fn into_new_key(self, created_at: chrono::DateTime<chrono::Utc>) -> NewKey {
        NewKey {
            key_text: self.key_text,
            duration: self.duration,
            product_name: self.product_name,
            product_link: self.product_link,
            created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedLine {
    /// 1-based line number within the submitted text.
    pub line_no: usize,
    pub error: ParseError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportBatch {
    pub lines: Vec<ParsedKeyImportLine>,
    pub rejected: Vec<RejectedLine>,
}

impl ImportBatch {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.rejected.is_empty()
    }
}

impl FromStr for KeyDuration {
    type Err = ParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ParseError::MissingDuration);
        }
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        let (number, suffix) = trimmed.split_at(split);
        let value: u32 = number
            .parse()
            .map_err(|_| ParseError::InvalidDuration(trimmed.to_string()))?;
        let unit = match suffix.trim().to_ascii_lowercase().as_str() {
            "" | "d" | "day" | "days" => DurationUnit::Days,
            "h" | "hour" | "hours" => DurationUnit::Hours,
            _ => return Err(ParseError::InvalidDuration(trimmed.to_string())),
        };
        if value == 0 {
            return Err(ParseError::ZeroDuration);
        }
        let duration = KeyDuration::new(value, unit);
        if duration.as_hours() > MAX_DURATION_HOURS {
            return Err(ParseError::DurationTooLong(trimmed.to_string()));
        }
        Ok(duration)
    }
}

pub fn parse_import_line(line: &str) -> Result<ParsedKeyImportLine, ParseError> {
    let fields: Vec<&str> = line.split('|').map(str::trim).collect();
    if fields.len() > MAX_FIELDS {
        return Err(ParseError::TooManyFields(fields.len()));
    }

    let key_text = fields.first().copied().unwrap_or_default();
    if key_text.is_empty() {
        return Err(ParseError::MissingKey);
    }
    let duration = fields
        .get(1)
        .ok_or(ParseError::MissingDuration)?
        .parse::<KeyDuration>()?;
    let product_name = match fields.get(2) {
        Some(name) if !name.is_empty() => (*name).to_string(),
        _ => DEFAULT_PRODUCT_NAME.to_string(),
    };
    let product_link = fields.get(3).map(|link| link.to_string()).unwrap_or_default();

    Ok(ParsedKeyImportLine {
        key_text: key_text.to_string(),
        duration,
        product_name,
        product_link,
    })
}

/// Parses every non-blank line; malformed lines are collected rather than
/// aborting the batch.
pub fn parse_import_batch(text: &str) -> ImportBatch {
    let mut batch = ImportBatch::default();
    for (index, raw) in text.lines().enumerate() {
        if raw.trim().is_empty() {
            continue;
        }
        match parse_import_line(raw) {
            Ok(line) => batch.lines.push(line),
            Err(error) => batch.rejected.push(RejectedLine {
                line_no: index + 1,
                error,
            }),
        }
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_line() {
        let parsed = parse_import_line("ABCD-EFGH | 30 | Premium | https://example.com").unwrap();
        assert_eq!(parsed.key_text, "ABCD-EFGH");
        assert_eq!(parsed.duration, KeyDuration::days(30));
        assert_eq!(parsed.product_name, "Premium");
        assert_eq!(parsed.product_link, "https://example.com");
    }

    #[test]
    fn link_and_product_are_optional() {
        let parsed = parse_import_line("XYZ-123|12h").unwrap();
        assert_eq!(parsed.duration, KeyDuration::hours(12));
        assert_eq!(parsed.product_name, DEFAULT_PRODUCT_NAME);
        assert_eq!(parsed.product_link, "");

        let parsed = parse_import_line("XYZ-124 | 7 days | Basic").unwrap();
        assert_eq!(parsed.duration, KeyDuration::days(7));
        assert_eq!(parsed.product_name, "Basic");
    }

    #[test]
    fn duration_suffixes() {
        assert_eq!("1 hour".parse::<KeyDuration>(), Ok(KeyDuration::hours(1)));
        assert_eq!("48H".parse::<KeyDuration>(), Ok(KeyDuration::hours(48)));
        assert_eq!("3d".parse::<KeyDuration>(), Ok(KeyDuration::days(3)));
        assert_eq!("0".parse::<KeyDuration>(), Err(ParseError::ZeroDuration));
        assert_eq!(
            "soon".parse::<KeyDuration>(),
            Err(ParseError::InvalidDuration("soon".into()))
        );
        assert_eq!(
            "5 weeks".parse::<KeyDuration>(),
            Err(ParseError::InvalidDuration("5 weeks".into()))
        );
    }

    #[test]
    fn durations_are_capped_at_a_century() {
        assert_eq!("36500".parse::<KeyDuration>(), Ok(KeyDuration::days(36_500)));
        assert_eq!(
            "876000h".parse::<KeyDuration>(),
            Ok(KeyDuration::hours(876_000))
        );
        assert_eq!(
            "36501 days".parse::<KeyDuration>(),
            Err(ParseError::DurationTooLong("36501 days".into()))
        );
        assert_eq!(
            parse_import_line("BIG | 100000000"),
            Err(ParseError::DurationTooLong("100000000".into()))
        );
        assert_eq!(
            "99999999999".parse::<KeyDuration>(),
            Err(ParseError::InvalidDuration("99999999999".into()))
        );
    }

    #[test]
    fn rejects_malformed_lines() {
        assert_eq!(parse_import_line(" | 30"), Err(ParseError::MissingKey));
        assert_eq!(parse_import_line("KEY"), Err(ParseError::MissingDuration));
        assert_eq!(parse_import_line("KEY |  "), Err(ParseError::MissingDuration));
        assert_eq!(
            parse_import_line("a|1|b|c|d"),
            Err(ParseError::TooManyFields(5))
        );
    }

    #[test]
    fn batch_skips_blank_lines_and_reports_line_numbers() {
        let batch = parse_import_batch("K1 | 30\n\n   \nK2 | nope\nK3 | 2h | Trial\n");
        assert_eq!(batch.lines.len(), 2);
        assert_eq!(
            batch.rejected,
            vec![RejectedLine {
                line_no: 4,
                error: ParseError::InvalidDuration("nope".into()),
            }]
        );
        assert_eq!(batch.lines[1].key_text, "K3");
    }
}
