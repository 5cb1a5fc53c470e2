//! Publish-date resolution.
//!
//! Dates come from the first tier that yields one: the date line in the
//! post's markup, then the `YYYY_MM_` prefix of the saved file name, then the
//! current time.

use chrono::{NaiveDate, NaiveDateTime};

/// One way of reading a cleaned date line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateFormat {
    pub pattern: &'static str,
    /// The pattern carries no time of day; midnight is assumed.
    pub date_only: bool,
}

impl DateFormat {
    #[must_use]
    pub fn parse(&self, text: &str) -> Option<NaiveDateTime> {
        if self.date_only {
            NaiveDate::parse_from_str(text, self.pattern)
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        } else {
            NaiveDateTime::parse_from_str(text, self.pattern).ok()
        }
    }
}

/// Formats tried in order against the cleaned date line.
pub const MARKUP_FORMATS: [DateFormat; 3] = [
    // July 09, 2022 10:55 PM
    DateFormat {
        pattern: "%B %d, %Y %I:%M %p",
        date_only: false,
    },
    // October 14, 2015
    DateFormat {
        pattern: "%B %d, %Y",
        date_only: true,
    },
    // Oct 21, 2015 12:17:25 AM
    DateFormat {
        pattern: "%b %d, %Y %I:%M:%S %p",
        date_only: false,
    },
];

/// Where a post's publish date came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateSource {
    Markup,
    FileName,
    Now,
}

/// Strip the decoration around the date in a post footer line.
///
/// `Posted by Ron on July 09, 2022 at 10:55 PM in Travel | Permalink`
/// becomes `July 09, 2022 10:55 PM`.
#[must_use]
pub fn clean_date_text(raw: &str) -> String {
    let text = raw.split('|').next().unwrap_or_default();
    let text = text.split(" in ").next().unwrap_or_default();
    let text = text.rsplit(" on ").next().unwrap_or_default();
    text.replace("at ", "").trim().to_string()
}

/// Parse a date line from the markup.
#[must_use]
pub fn parse_markup_date(raw: &str) -> Option<NaiveDateTime> {
    let cleaned = clean_date_text(raw);
    if cleaned.is_empty() {
        return None;
    }
    MARKUP_FORMATS.iter().find_map(|format| format.parse(&cleaned))
}

/// First day of the month encoded as `YYYY_MM_` at the start of a file name.
#[must_use]
pub fn date_from_file_name(file_name: &str) -> Option<NaiveDateTime> {
    let mut parts = file_name.split('_');
    let year = parts.next()?;
    let month = parts.next()?;
    if year.len() != 4 || !year.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if month.is_empty() || !month.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, 1)?.and_hms_opt(0, 0, 0)
}

/// Resolve a publish date through every tier.
#[must_use]
pub fn resolve_publish_date(
    markup: Option<&str>,
    file_name: &str,
    now: NaiveDateTime,
) -> (NaiveDateTime, DateSource) {
    if let Some(date) = markup.and_then(parse_markup_date) {
        return (date, DateSource::Markup);
    }
    if let Some(date) = date_from_file_name(file_name) {
        return (date, DateSource::FileName);
    }
    (now, DateSource::Now)
}
