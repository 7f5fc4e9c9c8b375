use crate::metrics::Format;

/// `numerator / denominator`, or `None` when either side is missing or the
/// denominator is zero.
pub fn ratio(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    match (numerator, denominator) {
        (Some(n), Some(d)) if d != 0.0 && d.is_finite() && n.is_finite() => Some(n / d),
        _ => None,
    }
}

fn with_thousands(int_part: &str) -> String {
    let mut out = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Render a report cell. Missing values render as an empty string.
pub fn format_value(value: Option<f64>, format: Format) -> String {
    let Some(v) = value.filter(|v| v.is_finite()) else {
        return String::new();
    };
    match format {
        Format::Count => format!("{}", v.round() as i64),
        Format::Float => format!("{v:.2}"),
        Format::Percent => format!("{:.2}%", v * 100.0),
        Format::Currency => {
            let fixed = format!("{:.2}", v.abs());
            let (int_part, frac) = fixed.split_once('.').unwrap_or((&fixed, "00"));
            let sign = if v < 0.0 && fixed != "0.00" { "-" } else { "" };
            format!("{sign}${}.{frac}", with_thousands(int_part))
        }
    }
}
