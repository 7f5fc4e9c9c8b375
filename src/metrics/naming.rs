//! Column names that depend on template values.
//!
//! The query assembler and the report renderer both go through these
//! functions, so a generated column such as `ordered_4th_box` is spelled
//! identically on both sides.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

static RE_NTH_BOX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ordered_(\d+)(?:st|nd|rd|th)_box$").unwrap());
static RE_DELIVERY_SCHEDULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ordered_ds_([a-z0-9]+(?:_[a-z0-9]+)*)$").unwrap());

/// English ordinal for a positive integer: 1st, 2nd, 3rd, 4th, 11th, 22nd.
pub fn ordinal(n: u32) -> String {
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{n}{suffix}")
}

/// Boolean column flagging users whose nth delivery shipped in the window.
pub fn nth_box_column(n: u32) -> String {
    format!("ordered_{}_box", ordinal(n))
}

/// Boolean column flagging users who ordered on the given delivery schedule.
pub fn delivery_schedule_column(slug: &str) -> String {
    format!("ordered_ds_{slug}")
}

/// Lower-case a delivery schedule name and collapse everything that is not
/// alphanumeric into single underscores. Returns `None` if nothing is left.
pub fn delivery_schedule_slug(raw: &str) -> Option<String> {
    let mut slug = String::new();
    for ch in raw.trim().to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    while slug.ends_with('_') {
        slug.pop();
    }
    if slug.is_empty() {
        None
    } else {
        Some(slug)
    }
}

/// The delivery number encoded in an `ordered_<nth>_box` column, if it is one.
pub fn nth_from_column(column: &str) -> Option<u32> {
    RE_NTH_BOX
        .captures(column)
        .and_then(|caps| caps[1].parse().ok())
        .filter(|n| nth_box_column(*n) == column)
}

/// The delivery schedule slug encoded in an `ordered_ds_<slug>` column, if it is one.
pub fn delivery_schedule_from_column(column: &str) -> Option<&str> {
    RE_DELIVERY_SCHEDULE
        .captures(column)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// A delivery schedule requested in a template: the value as it appears in
/// the warehouse plus the slug used to name its column.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DeliverySchedule {
    pub value: String,
    pub slug: String,
}

impl DeliverySchedule {
    pub fn column(&self) -> String {
        delivery_schedule_column(&self.slug)
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split([',', ';', '|'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Parse a list of delivery numbers such as `"1, 4, 6"`.
///
/// Duplicates are dropped, keeping first-seen order.
pub fn parse_nth_list(raw: &str) -> Result<Vec<u32>> {
    let mut out = Vec::new();
    for part in split_list(raw) {
        // Spreadsheets hand back whole numbers as "4.0"
        let part = part.strip_suffix(".0").unwrap_or(part);
        let n: u32 = part.parse().map_err(|_| {
            Error::Config(format!("ordered_nth_box: `{part}` is not a delivery number"))
        })?;
        if n == 0 {
            return Err(Error::Config(
                "ordered_nth_box: delivery numbers start at 1".into(),
            ));
        }
        if !out.contains(&n) {
            out.push(n);
        }
    }
    Ok(out)
}

/// Parse a list of delivery schedules such as `"weekly, every other week"`.
pub fn parse_delivery_schedules(raw: &str) -> Result<Vec<DeliverySchedule>> {
    let mut out: Vec<DeliverySchedule> = Vec::new();
    for part in split_list(raw) {
        let slug = delivery_schedule_slug(part).ok_or_else(|| {
            Error::Config(format!("ordered_ds: `{part}` is not a delivery schedule name"))
        })?;
        if let Some(existing) = out.iter().find(|ds| ds.slug == slug) {
            if existing.value != part {
                return Err(Error::Config(format!(
                    "ordered_ds: `{}` and `{part}` would share the column {}",
                    existing.value,
                    delivery_schedule_column(&slug)
                )));
            }
            continue;
        }
        out.push(DeliverySchedule {
            value: part.to_string(),
            slug,
        });
    }
    Ok(out)
}
