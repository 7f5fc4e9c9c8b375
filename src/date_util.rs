use chrono::NaiveDate;

/// Today's date in local time. Used wherever a template says "current date".
pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// Whether a template cell is the "current date" sentinel rather than a literal date.
pub fn is_current_date_sentinel(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().replace(' ', "_").as_str(),
        "current_date" | "today"
    )
}

/// Parse a date as it shows up in campaign templates.
///
/// Accepts ISO dates (`2024-01-07`), US-style dates (`1/7/2024`) and the
/// `2024-01-07 00:00:00` form spreadsheets produce for date cells.
pub fn parse_template_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%m/%d/%Y"))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|dt| dt.date())
        })
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").map(|dt| dt.date())
        })
        .ok()
}

/// Render a date the way the warehouse expects it in literals.
pub fn format_date(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_template_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 7).unwrap();
        assert_eq!(parse_template_date("2024-01-07"), Some(expected));
        assert_eq!(parse_template_date("1/7/2024"), Some(expected));
        assert_eq!(parse_template_date(" 2024-01-07 00:00:00 "), Some(expected));
        assert_eq!(parse_template_date("2024-01-07T00:00:00"), Some(expected));
        assert_eq!(parse_template_date(""), None);
        assert_eq!(parse_template_date("next tuesday"), None);
    }

    #[test]
    fn test_current_date_sentinel() {
        assert!(is_current_date_sentinel("current_date"));
        assert!(is_current_date_sentinel("Current Date"));
        assert!(is_current_date_sentinel("today"));
        assert!(!is_current_date_sentinel("2024-01-07"));
    }

    #[test]
    fn test_format_date() {
        assert_eq!(
            format_date(NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()),
            "2024-03-09"
        );
    }
}
