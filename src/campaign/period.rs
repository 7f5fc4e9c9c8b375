use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::date_util::{format_date, is_current_date_sentinel, parse_template_date};
use crate::error::{Error, Result};

/// End of a promo period as written in the template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EndDate {
    Date(NaiveDate),
    /// Resolved to the wall-clock date when the query is generated.
    CurrentDate,
}

impl EndDate {
    pub fn parse(s: &str) -> Option<Self> {
        if is_current_date_sentinel(s) {
            Some(EndDate::CurrentDate)
        } else {
            parse_template_date(s).map(EndDate::Date)
        }
    }

    pub fn resolve(&self, today: NaiveDate) -> NaiveDate {
        match self {
            EndDate::Date(d) => *d,
            EndDate::CurrentDate => today,
        }
    }
}

/// A named `<period>_end_date` template column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeriodEnd {
    pub name: String,
    pub end: EndDate,
}

/// How consecutive promo periods relate to each other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum PeriodPolicy {
    /// Every period starts at the campaign start date; windows are nested.
    #[default]
    Cumulative,
    /// Each period starts the day after the previous one ends.
    Disjoint,
}

impl PeriodPolicy {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "cumulative" => Ok(PeriodPolicy::Cumulative),
            "disjoint" => Ok(PeriodPolicy::Disjoint),
            other => Err(Error::Config(format!(
                "period_policy must be `cumulative` or `disjoint`, got `{other}`"
            ))),
        }
    }
}

/// A named measurement window, inclusive on both ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromoPeriod {
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl PromoPeriod {
    pub fn contains(&self, d: NaiveDate) -> bool {
        self.start_date <= d && d <= self.end_date
    }
}

/// Turn the template's period end dates into concrete windows.
///
/// End dates must be strictly increasing (after resolving the current-date
/// sentinel against `today`) and no earlier than `start`.
pub fn resolve_periods(
    start: NaiveDate,
    ends: &[PeriodEnd],
    policy: PeriodPolicy,
    today: NaiveDate,
) -> Result<Vec<PromoPeriod>> {
    if ends.is_empty() {
        return Err(Error::Config(
            "template has no <period>_end_date columns".into(),
        ));
    }

    let mut periods: Vec<PromoPeriod> = Vec::with_capacity(ends.len());
    for pe in ends {
        let end_date = pe.end.resolve(today);
        if end_date < start {
            return Err(Error::Config(format!(
                "period {} ends {} before the campaign starts {}",
                pe.name,
                format_date(end_date),
                format_date(start)
            )));
        }
        let start_date = match (policy, periods.last()) {
            (PeriodPolicy::Disjoint, Some(prev)) => prev.end_date + Duration::days(1),
            _ => start,
        };
        if let Some(prev) = periods.last() {
            if end_date <= prev.end_date {
                return Err(Error::Config(format!(
                    "period {} ends {} which is not after {} ({})",
                    pe.name,
                    format_date(end_date),
                    prev.name,
                    format_date(prev.end_date)
                )));
            }
        }
        periods.push(PromoPeriod {
            name: pe.name.clone(),
            start_date,
            end_date,
        });
    }
    Ok(periods)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn ends() -> Vec<PeriodEnd> {
        vec![
            PeriodEnd {
                name: "week1".into(),
                end: EndDate::Date(d(2024, 1, 7)),
            },
            PeriodEnd {
                name: "week2".into(),
                end: EndDate::Date(d(2024, 1, 14)),
            },
        ]
    }

    #[test]
    fn test_cumulative_periods_share_start() {
        let periods =
            resolve_periods(d(2024, 1, 1), &ends(), PeriodPolicy::Cumulative, d(2024, 6, 1))
                .unwrap();
        assert_eq!(periods.len(), 2);
        assert_eq!(periods[0].start_date, d(2024, 1, 1));
        assert_eq!(periods[1].start_date, d(2024, 1, 1));
        assert_eq!(periods[1].end_date, d(2024, 1, 14));
    }

    #[test]
    fn test_disjoint_periods_follow_each_other() {
        let periods =
            resolve_periods(d(2024, 1, 1), &ends(), PeriodPolicy::Disjoint, d(2024, 6, 1))
                .unwrap();
        assert_eq!(periods[0].start_date, d(2024, 1, 1));
        assert_eq!(periods[0].end_date, d(2024, 1, 7));
        assert_eq!(periods[1].start_date, d(2024, 1, 8));
        assert!(periods[1].contains(d(2024, 1, 14)));
        assert!(!periods[1].contains(d(2024, 1, 7)));
    }

    #[test]
    fn test_current_date_resolves_to_today() {
        let mut e = ends();
        e[1].end = EndDate::CurrentDate;
        let periods =
            resolve_periods(d(2024, 1, 1), &e, PeriodPolicy::Cumulative, d(2024, 2, 3)).unwrap();
        assert_eq!(periods[1].end_date, d(2024, 2, 3));
    }

    #[test]
    fn test_rejects_unordered_or_early_ends() {
        let mut e = ends();
        e.swap(0, 1);
        assert!(
            resolve_periods(d(2024, 1, 1), &e, PeriodPolicy::Cumulative, d(2024, 6, 1)).is_err()
        );
        assert!(
            resolve_periods(d(2024, 1, 10), &ends(), PeriodPolicy::Cumulative, d(2024, 6, 1))
                .is_err()
        );
        assert!(resolve_periods(d(2024, 1, 1), &[], PeriodPolicy::Cumulative, d(2024, 6, 1))
            .is_err());
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!(PeriodPolicy::parse("").unwrap(), PeriodPolicy::Cumulative);
        assert_eq!(PeriodPolicy::parse("Disjoint").unwrap(), PeriodPolicy::Disjoint);
        assert!(PeriodPolicy::parse("rolling").is_err());
    }

    #[test]
    fn test_end_date_parse() {
        assert_eq!(EndDate::parse("current date"), Some(EndDate::CurrentDate));
        assert_eq!(
            EndDate::parse("2024-01-07"),
            Some(EndDate::Date(d(2024, 1, 7)))
        );
        assert_eq!(EndDate::parse("soon"), None);
    }
}
