use serde::Serialize;

/// How a raw per-user column is aggregated per test cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ColumnKind {
    /// Per-user flag; aggregated as the number of users for which it is true.
    Boolean,
    /// Per-user quantity; aggregated with `SUM`.
    Numeric,
}

/// Metric families in the order the assembler evaluates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum MetricFamily {
    Redemptions,
    SubscriptionChanges,
    SubscriptionStatus,
    BoxOrders,
    FourWeekRetention,
    PlanChanges,
    GiftCards,
    AppUsage,
    Referrals,
}

impl MetricFamily {
    pub const ALL: [MetricFamily; 9] = [
        MetricFamily::Redemptions,
        MetricFamily::SubscriptionChanges,
        MetricFamily::SubscriptionStatus,
        MetricFamily::BoxOrders,
        MetricFamily::FourWeekRetention,
        MetricFamily::PlanChanges,
        MetricFamily::GiftCards,
        MetricFamily::AppUsage,
        MetricFamily::Referrals,
    ];

    /// Whether the family's per-user rows are keyed by promo period.
    /// Four-week retention follows the user's own delivery cohort instead.
    pub fn is_period_scoped(&self) -> bool {
        !matches!(self, MetricFamily::FourWeekRetention)
    }
}

/// A raw per-user column produced by a metric family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawColumn {
    pub name: String,
    pub kind: ColumnKind,
    pub family: MetricFamily,
}

impl RawColumn {
    pub fn boolean(name: impl Into<String>, family: MetricFamily) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::Boolean,
            family,
        }
    }

    pub fn numeric(name: impl Into<String>, family: MetricFamily) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::Numeric,
            family,
        }
    }
}

/// Display formatting for a report cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Format {
    /// Whole number, no separators.
    Count,
    /// Percentage with two decimals: `12.34%`.
    Percent,
    /// Dollars with thousands separators: `$1,234.50`.
    Currency,
    /// Plain number rounded to two decimals.
    Float,
}

/// What a derived ratio is divided by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Denominator {
    SegmentSize,
    Column(String),
    /// Four delivery weeks per user in the segment.
    CohortWeeks,
}

/// A report-facing ratio computed from aggregated columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DerivedMetric {
    pub name: String,
    /// Raw aggregate column name.
    pub numerator: String,
    pub denominator: Denominator,
    pub format: Format,
}

impl DerivedMetric {
    pub fn new(
        name: impl Into<String>,
        numerator: impl Into<String>,
        denominator: Denominator,
        format: Format,
    ) -> Self {
        Self {
            name: name.into(),
            numerator: numerator.into(),
            denominator,
            format,
        }
    }

    /// Percent of the segment, the shape of most rate metrics.
    pub fn rate(name: impl Into<String>, numerator: impl Into<String>) -> Self {
        Self::new(name, numerator, Denominator::SegmentSize, Format::Percent)
    }
}

/// Requested metrics whose concrete columns are generated from template values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Expansion {
    NthBox,
    DeliverySchedule,
}
