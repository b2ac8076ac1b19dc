//! Deterministic test identifiers.
//!
//! Every artifact of a test run is addressed by a [`TestIdentifier`]: the
//! sanitized plan name followed by a fixed-width UTC timestamp with millisecond
//! precision (`basicrun20240102T030405678`). The storage folder is the same two
//! parts joined by a slash (`basicrun/20240102T030405678`).

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Datelike, NaiveDate, Utc};

use crate::error::{AppError, AppResult, TestIdError};

/// Name of the load-generator executable; plans may not be named after it.
pub const RESERVED_RUNNER_NAME: &str = "pewpew";

/// Width of `YYYYMMDDTHHMMSSmmm`.
const TIMESTAMP_LEN: usize = 18;
const DATE_SEPARATOR_INDEX: usize = 8;

/// Optional inputs to [`TestIdentifier::make`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TestIdOptions<'opts> {
    /// Appended to the plan name, so two profiles of one plan never collide.
    pub profile: Option<&'opts str>,
    /// Defaults to the current time.
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TestIdentifier {
    yaml_file: String,
    timestamp: String,
    date: DateTime<Utc>,
}

impl TestIdentifier {
    /// Builds an identifier from a plan file name.
    ///
    /// The directory and extension are dropped, the remainder is lower-cased and
    /// stripped of anything that is not ASCII alphanumeric.
    ///
    /// # Errors
    ///
    /// Returns an error when the sanitized name is empty or reserved, or when the
    /// timestamp cannot be represented with a four digit year.
    pub fn make(yaml_file: &str, options: TestIdOptions<'_>) -> AppResult<Self> {
        let stem = Path::new(yaml_file)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(yaml_file);
        let mut name = sanitize_name(stem);
        if let Some(profile) = options.profile {
            name.push_str(&sanitize_name(profile));
        }
        let date = truncate_to_millis(options.timestamp.unwrap_or_else(Utc::now))?;
        Self::from_parts(yaml_file, name, date)
    }

    /// Parses `{name}{timestamp}`.
    ///
    /// # Errors
    ///
    /// Returns an error when the trailing timestamp does not match the fixed
    /// width format or the name part is not a valid plan name.
    pub fn parse_from_test_id(test_id: &str) -> AppResult<Self> {
        let invalid = || {
            AppError::test_id(TestIdError::InvalidTestId {
                value: test_id.to_owned(),
            })
        };
        let split = test_id.len().checked_sub(TIMESTAMP_LEN).ok_or_else(invalid)?;
        let name = test_id.get(..split).ok_or_else(invalid)?;
        let timestamp = test_id.get(split..).ok_or_else(invalid)?;
        if !is_sanitized_name(name) {
            return Err(invalid());
        }
        let date = parse_timestamp(timestamp)?;
        Self::from_parts(test_id, name.to_owned(), date)
    }

    /// Parses `{name}/{timestamp}`, tolerating one trailing slash.
    ///
    /// # Errors
    ///
    /// Returns an error when the folder does not have exactly two segments or
    /// either segment is malformed.
    pub fn parse_from_folder(folder: &str) -> AppResult<Self> {
        let invalid = || {
            AppError::test_id(TestIdError::InvalidFolder {
                value: folder.to_owned(),
            })
        };
        let trimmed = folder.strip_suffix('/').unwrap_or(folder);
        let (name, timestamp) = trimmed.split_once('/').ok_or_else(invalid)?;
        if !is_sanitized_name(name) || timestamp.len() != TIMESTAMP_LEN {
            return Err(invalid());
        }
        let date = parse_timestamp(timestamp)?;
        Self::from_parts(folder, name.to_owned(), date)
    }

    fn from_parts(source: &str, name: String, date: DateTime<Utc>) -> AppResult<Self> {
        if name.is_empty() {
            return Err(AppError::test_id(TestIdError::EmptyName {
                yaml_file: source.to_owned(),
            }));
        }
        if name == RESERVED_RUNNER_NAME {
            return Err(AppError::test_id(TestIdError::ReservedName { name }));
        }
        Ok(Self {
            yaml_file: name,
            timestamp: format_timestamp(&date),
            date,
        })
    }

    /// Sanitized plan name.
    #[must_use]
    pub fn yaml_file(&self) -> &str {
        &self.yaml_file
    }

    #[must_use]
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    #[must_use]
    pub const fn date(&self) -> DateTime<Utc> {
        self.date
    }

    #[must_use]
    pub fn test_id(&self) -> String {
        format!("{}{}", self.yaml_file, self.timestamp)
    }

    /// Folder holding every object of this run, without a trailing slash.
    #[must_use]
    pub fn storage_folder(&self) -> String {
        format!("{}/{}", self.yaml_file, self.timestamp)
    }
}

impl fmt::Display for TestIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.yaml_file, self.timestamp)
    }
}

fn sanitize_name(value: &str) -> String {
    value
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|ch| ch.to_ascii_lowercase())
        .collect()
}

fn is_sanitized_name(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_digit() || ch.is_ascii_lowercase())
}

fn truncate_to_millis(date: DateTime<Utc>) -> AppResult<DateTime<Utc>> {
    let year = date.year();
    if !(0..=9999).contains(&year) {
        return Err(AppError::test_id(TestIdError::YearOutOfRange { year }));
    }
    DateTime::from_timestamp_millis(date.timestamp_millis()).ok_or_else(|| {
        AppError::test_id(TestIdError::InvalidTimestamp {
            value: date.to_rfc3339(),
        })
    })
}

pub(crate) fn format_timestamp(date: &DateTime<Utc>) -> String {
    format!(
        "{}{:03}",
        date.format("%Y%m%dT%H%M%S"),
        date.timestamp_subsec_millis()
    )
}

fn parse_timestamp(value: &str) -> AppResult<DateTime<Utc>> {
    let invalid = || {
        AppError::test_id(TestIdError::InvalidTimestamp {
            value: value.to_owned(),
        })
    };
    if value.len() != TIMESTAMP_LEN {
        return Err(invalid());
    }
    let well_formed = value.char_indices().all(|(index, ch)| {
        if index == DATE_SEPARATOR_INDEX {
            ch == 'T'
        } else {
            ch.is_ascii_digit()
        }
    });
    if !well_formed {
        return Err(invalid());
    }
    let field = |range: std::ops::Range<usize>| -> AppResult<u32> {
        value
            .get(range)
            .and_then(|digits| digits.parse::<u32>().ok())
            .ok_or_else(invalid)
    };
    let year = i32::try_from(field(0..4)?).map_err(|err| {
        AppError::test_id(TestIdError::InvalidTimestamp {
            value: format!("{} ({})", value, err),
        })
    })?;
    let (month, day) = (field(4..6)?, field(6..8)?);
    let (hour, minute, second, milli) = (
        field(9..11)?,
        field(11..13)?,
        field(13..15)?,
        field(15..18)?,
    );
    let naive = NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_milli_opt(hour, minute, second, milli))
        .ok_or_else(invalid)?;
    let date = naive.and_utc();
    if format_timestamp(&date) != value {
        return Err(invalid());
    }
    Ok(date)
}
