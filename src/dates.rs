//! Date-format inference and parsing.
//!
//! Legacy Shoebox date fields carry free-form values like `16-Aug-02` or
//! `1999/03/12`. Before the batch runs, every sample collected for a date
//! field is pushed through [`infer_formats`], which derives format pictures
//! (`d`, `dd`, `M`, `MM`, `MMM`, `MMMM`, `yy`, `yyyy` plus literal
//! separators) that provably round-trip their own sample. At load time
//! [`parse_date`] tries the inferred pictures in order.

use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use tracing::debug;

static COMPONENTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]+|[A-Za-z]+|[^0-9A-Za-z]+").expect("valid regex"));

const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

const MONTH_ABBREVS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// One tokenized element of a format picture.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Day,
    DayPad,
    MonthNum,
    MonthNumPad,
    MonthAbbr,
    MonthFull,
    Year2,
    Year4,
    Literal(String),
}

/// One alphanumeric component of a sample value.
#[derive(Debug, Clone)]
enum Component {
    Number { value: u32, text: String },
    MonthName { month: u32, text: String },
}

/// Infer formats for every sample and append the accepted, non-duplicate
/// ones to `formats`, preserving discovery order. Unparseable samples are
/// skipped, never an error.
pub fn infer_formats<'a>(samples: impl IntoIterator<Item = &'a str>, formats: &mut Vec<String>) {
    for sample in samples {
        let Some(picture) = infer_format(sample) else {
            debug!(sample, "no date format inferred, sample skipped");
            continue;
        };
        if !formats.contains(&picture) {
            formats.push(picture);
        }
    }
}

/// Derive a format picture from one sample, or `None` when the sample does
/// not look like a three-component date or the derived picture fails to
/// reproduce the sample.
#[must_use]
pub fn infer_format(sample: &str) -> Option<String> {
    let sample = sample.trim();
    let (components, separators) = split_components(sample)?;
    let [c1, c2, c3] = components;

    // Decide component order: month-first, year-first, day-first, then the
    // second-component disambiguation; anything else is rejected.
    let (month, day, year) = match (&c1, &c2, &c3) {
        (Component::MonthName { .. }, Component::Number { .. }, Component::Number { .. }) => {
            (&c1, &c2, &c3)
        }
        (Component::Number { value, .. }, _, Component::Number { .. })
            if *value == 0 || *value > 31 =>
        {
            // Year first: year + month + day.
            (&c2, &c3, &c1)
        }
        (Component::Number { value, .. }, _, Component::Number { .. }) if *value > 12 => {
            // Unambiguous day first.
            (&c2, &c1, &c3)
        }
        (Component::Number { .. }, Component::MonthName { .. }, Component::Number { .. }) => {
            (&c2, &c1, &c3)
        }
        (
            Component::Number { .. },
            Component::Number { value: second, .. },
            Component::Number { .. },
        ) if (13..=31).contains(second) => (&c1, &c2, &c3),
        _ => return None,
    };

    let date = resolve_date(month, day, year)?;
    let picture = build_picture(&[&c1, &c2, &c3], (month, day, year), &separators)?;

    // Accept only when the picture reproduces the sample it came from.
    if format_date(&picture, date).as_deref() == Some(sample) {
        Some(picture)
    } else {
        None
    }
}

/// Parse a value against the format pictures in order; first hit wins.
#[must_use]
pub fn parse_date(value: &str, formats: &[String]) -> Option<NaiveDate> {
    let value = value.trim();
    formats.iter().find_map(|f| parse_with(value, f))
}

/// Format a date with a picture; `None` when the picture is invalid.
#[must_use]
pub fn format_date(picture: &str, date: NaiveDate) -> Option<String> {
    let tokens = tokenize_picture(picture)?;
    let month = date.month() as usize;
    let mut out = String::new();
    for token in &tokens {
        match token {
            Token::Day => out.push_str(&date.day().to_string()),
            Token::DayPad => out.push_str(&format!("{:02}", date.day())),
            Token::MonthNum => out.push_str(&date.month().to_string()),
            Token::MonthNumPad => out.push_str(&format!("{:02}", date.month())),
            Token::MonthAbbr => out.push_str(MONTH_ABBREVS[month - 1]),
            Token::MonthFull => out.push_str(MONTHS[month - 1]),
            Token::Year2 => out.push_str(&format!("{:02}", date.year().rem_euclid(100))),
            Token::Year4 => out.push_str(&format!("{:04}", date.year())),
            Token::Literal(s) => out.push_str(s),
        }
    }
    Some(out)
}

fn parse_with(value: &str, picture: &str) -> Option<NaiveDate> {
    let tokens = tokenize_picture(picture)?;
    let mut rest = value;
    let mut day: Option<u32> = None;
    let mut month: Option<u32> = None;
    let mut year: Option<i32> = None;

    for token in &tokens {
        match token {
            Token::Literal(s) => {
                rest = rest.strip_prefix(s.as_str())?;
            }
            Token::Day | Token::DayPad => {
                let (n, tail) = take_number(rest)?;
                day = Some(n);
                rest = tail;
            }
            Token::MonthNum | Token::MonthNumPad => {
                let (n, tail) = take_number(rest)?;
                month = Some(n);
                rest = tail;
            }
            Token::MonthAbbr | Token::MonthFull => {
                let (m, tail) = take_month_name(rest)?;
                month = Some(m);
                rest = tail;
            }
            Token::Year2 => {
                let (n, tail) = take_number(rest)?;
                if rest.len() - tail.len() > 2 {
                    return None;
                }
                year = Some(expand_two_digit_year(n));
                rest = tail;
            }
            Token::Year4 => {
                let (n, tail) = take_number(rest)?;
                if rest.len() - tail.len() < 3 {
                    return None;
                }
                year = Some(n as i32);
                rest = tail;
            }
        }
    }
    if !rest.is_empty() {
        return None;
    }
    NaiveDate::from_ymd_opt(year?, month?, day?)
}

/// Two-digit years land in 2000-2068, everything above in the 1900s.
fn expand_two_digit_year(two: u32) -> i32 {
    if two <= 68 {
        2000 + two as i32
    } else {
        1900 + two as i32
    }
}

fn take_number(text: &str) -> Option<(u32, &str)> {
    let end = text
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map_or(text.len(), |(i, _)| i);
    if end == 0 {
        return None;
    }
    let value = text[..end].parse().ok()?;
    Some((value, &text[end..]))
}

fn take_month_name(text: &str) -> Option<(u32, &str)> {
    let end = text
        .char_indices()
        .find(|(_, c)| !c.is_ascii_alphabetic())
        .map_or(text.len(), |(i, _)| i);
    let word = &text[..end];
    let month = month_from_name(word)?;
    Some((month, &text[end..]))
}

/// Match an alphabetic run of at least three letters against the English
/// month names; the run must be a prefix of exactly one way of writing the
/// month.
fn month_from_name(word: &str) -> Option<u32> {
    if word.len() < 3 {
        return None;
    }
    let lower = word.to_ascii_lowercase();
    MONTHS
        .iter()
        .position(|m| m.to_ascii_lowercase().starts_with(&lower))
        .map(|i| (i + 1) as u32)
}

/// Split a sample into exactly three alphanumeric components plus the
/// literal separators around them.
fn split_components(sample: &str) -> Option<([Component; 3], [String; 4])> {
    let mut components: Vec<Component> = Vec::new();
    // Separators: before the first, between each pair, after the last.
    let mut separators = [const { String::new() }; 4];

    for m in COMPONENTS.find_iter(sample) {
        let text = m.as_str();
        let first = text.chars().next()?;
        if first.is_ascii_digit() {
            if components.len() >= 3 {
                return None;
            }
            components.push(Component::Number {
                value: text.parse().ok()?,
                text: text.to_string(),
            });
        } else if first.is_ascii_alphabetic() {
            if components.len() >= 3 {
                return None;
            }
            let month = month_from_name(text)?;
            components.push(Component::MonthName {
                month,
                text: text.to_string(),
            });
        } else {
            separators[components.len()].push_str(text);
        }
    }
    if components.len() != 3 {
        return None;
    }
    let [c1, c2, c3] = <[Component; 3]>::try_from(components).ok()?;
    Some(([c1, c2, c3], separators))
}

fn resolve_date(month: &Component, day: &Component, year: &Component) -> Option<NaiveDate> {
    let month = match month {
        Component::MonthName { month, .. } => *month,
        Component::Number { value, .. } => *value,
    };
    let day = match day {
        Component::Number { value, .. } => *value,
        Component::MonthName { .. } => return None,
    };
    let year = match year {
        Component::Number { value, text } if text.len() == 2 => expand_two_digit_year(*value),
        Component::Number { value, .. } => *value as i32,
        Component::MonthName { .. } => return None,
    };
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Build the picture: each component rendered the way the sample wrote it,
/// separators carried over literally.
fn build_picture(
    in_order: &[&Component; 3],
    roles: (&Component, &Component, &Component),
    separators: &[String; 4],
) -> Option<String> {
    let (month, day, year) = roles;
    let mut out = separators[0].clone();
    for (i, component) in in_order.iter().enumerate() {
        let piece = if std::ptr::eq(*component, month) {
            match component {
                Component::MonthName { text, .. } if text.len() == 3 => "MMM",
                Component::MonthName { .. } => "MMMM",
                Component::Number { text, .. } if padded(text) => "MM",
                Component::Number { .. } => "M",
            }
        } else if std::ptr::eq(*component, day) {
            match component {
                Component::Number { text, .. } if padded(text) => "dd",
                Component::Number { .. } => "d",
                Component::MonthName { .. } => return None,
            }
        } else {
            match component {
                Component::Number { text, .. } if text.len() == 2 => "yy",
                Component::Number { text, .. } if text.len() == 4 => "yyyy",
                _ => return None,
            }
        };
        out.push_str(piece);
        out.push_str(&separators[i + 1]);
    }
    Some(out)
}

/// Two digits with a leading zero, e.g. `08`.
fn padded(text: &str) -> bool {
    text.len() == 2 && text.starts_with('0')
}

fn tokenize_picture(picture: &str) -> Option<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = picture.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            'd' | 'M' | 'y' => {
                let mut count = 0;
                while chars.peek() == Some(&c) {
                    chars.next();
                    count += 1;
                }
                let token = match (c, count) {
                    ('d', 1) => Token::Day,
                    ('d', 2) => Token::DayPad,
                    ('M', 1) => Token::MonthNum,
                    ('M', 2) => Token::MonthNumPad,
                    ('M', 3) => Token::MonthAbbr,
                    ('M', 4) => Token::MonthFull,
                    ('y', 2) => Token::Year2,
                    ('y', 4) => Token::Year4,
                    _ => return None,
                };
                tokens.push(token);
            }
            _ => {
                let mut literal = String::new();
                while let Some(&c) = chars.peek() {
                    if matches!(c, 'd' | 'M' | 'y') {
                        break;
                    }
                    literal.push(c);
                    chars.next();
                }
                tokens.push(Token::Literal(literal));
            }
        }
    }
    Some(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_month_name_year() {
        let mut formats = Vec::new();
        infer_formats(["16-Aug-02", "20-Aug-02"], &mut formats);
        assert_eq!(formats, vec!["d-MMM-yy".to_string()]);

        let parsed = parse_date("16-Aug-02", &formats).unwrap();
        assert_eq!(parsed, NaiveDate::from_ymd_opt(2002, 8, 16).unwrap());
    }

    #[test]
    fn test_month_name_first() {
        assert_eq!(infer_format("August 16, 2002").as_deref(), Some("MMMM d, yyyy"));
        let formats = vec!["MMMM d, yyyy".to_string()];
        assert_eq!(
            parse_date("August 16, 2002", &formats),
            NaiveDate::from_ymd_opt(2002, 8, 16)
        );
    }

    #[test]
    fn test_year_first() {
        assert_eq!(infer_format("1999/03/12").as_deref(), Some("yyyy/MM/dd"));
        let formats = vec!["yyyy/MM/dd".to_string()];
        assert_eq!(
            parse_date("1999/03/12", &formats),
            NaiveDate::from_ymd_opt(1999, 3, 12)
        );
    }

    #[test]
    fn test_second_component_disambiguation() {
        // First component fits a month, second can only be a day.
        assert_eq!(infer_format("3/25/99").as_deref(), Some("M/d/yy"));
    }

    #[test]
    fn test_ambiguous_all_small_is_rejected() {
        // 3/4/5 could be anything.
        assert_eq!(infer_format("3/4/5"), None);
    }

    #[test]
    fn test_bad_samples_are_skipped() {
        let mut formats = Vec::new();
        infer_formats(
            ["not a date", "32/13/99", "16-Aug-02", ""],
            &mut formats,
        );
        assert_eq!(formats, vec!["d-MMM-yy".to_string()]);
    }

    #[test]
    fn test_duplicate_formats_not_appended() {
        let mut formats = vec!["d-MMM-yy".to_string()];
        infer_formats(["16-Aug-02", "12/Mar/99"], &mut formats);
        assert_eq!(
            formats,
            vec!["d-MMM-yy".to_string(), "d/MMM/yy".to_string()]
        );
    }

    #[test]
    fn test_two_digit_year_pivot() {
        let formats = vec!["d-MMM-yy".to_string()];
        assert_eq!(parse_date("1-Jan-68", &formats).unwrap().year(), 2068);
        assert_eq!(parse_date("1-Jan-69", &formats).unwrap().year(), 1969);
        assert_eq!(parse_date("1-Jan-99", &formats).unwrap().year(), 1999);
    }

    #[test]
    fn test_full_month_name_roundtrip() {
        assert_eq!(infer_format("16 August 2002").as_deref(), Some("d MMMM yyyy"));
        // "Sept" is a month-name prefix but no picture reproduces it.
        assert_eq!(infer_format("16 Sept 2002"), None);
    }

    #[test]
    fn test_format_order_tries_in_sequence() {
        let formats = vec!["MM/dd/yy".to_string(), "d-MMM-yy".to_string()];
        assert_eq!(
            parse_date("16-Aug-02", &formats),
            NaiveDate::from_ymd_opt(2002, 8, 16)
        );
        assert_eq!(parse_date("junk", &formats), None);
    }

    #[test]
    fn test_padded_components() {
        assert_eq!(infer_format("08/16/2002").as_deref(), Some("MM/d/yyyy"));
        assert_eq!(infer_format("8/16/2002").as_deref(), Some("M/d/yyyy"));
        assert_eq!(infer_format("16/08/2002").as_deref(), Some("d/MM/yyyy"));
    }

    #[test]
    fn test_invalid_calendar_dates_rejected() {
        assert_eq!(infer_format("31-Feb-99"), None);
        let formats = vec!["d-MMM-yy".to_string()];
        assert_eq!(parse_date("31-Feb-99", &formats), None);
    }
}
