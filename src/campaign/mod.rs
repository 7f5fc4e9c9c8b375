pub mod matrix;
pub mod period;
pub mod template;

use std::path::PathBuf;

use chrono::NaiveDate;
use serde::Serialize;

use crate::date_util::parse_template_date;
use crate::error::{Error, Result};
use crate::metrics::{naming, MetricRequest};
use crate::query::dialect::validate_identifier;

pub use matrix::{DiscountShape, TestMatrix, TEST_MATRIX_COLUMNS};
pub use period::{resolve_periods, EndDate, PeriodEnd, PeriodPolicy, PromoPeriod};

/// Scalar campaign metadata from the first row of the template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CampaignInfo {
    pub campaign_name: String,
    pub campaign_short_name: String,
    /// Display name used for the report file; defaults to `campaign_name`.
    pub report_name: String,
    pub start_date: NaiveDate,
    /// `<period>_end_date` columns in template order.
    pub period_ends: Vec<PeriodEnd>,
    pub period_policy: PeriodPolicy,
    pub responder_action: String,
    pub responder_period: Option<String>,
    pub metrics: MetricRequest,
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "" | "false" | "f" | "no" | "n" | "0" | "0.0" => Ok(false),
        "true" | "t" | "yes" | "y" | "x" | "1" | "1.0" => Ok(true),
        other => Err(Error::Config(format!(
            "{key} must be a yes/no flag, got `{other}`"
        ))),
    }
}

impl CampaignInfo {
    /// Build from `(column, value)` pairs in template order. Column names are
    /// expected to be normalized already; blank values count as absent.
    pub fn from_fields<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Result<Self>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut campaign_name = None;
        let mut campaign_short_name = None;
        let mut report_name = None;
        let mut start_date = None;
        let mut period_ends: Vec<PeriodEnd> = Vec::new();
        let mut period_policy = PeriodPolicy::default();
        let mut responder_action = String::new();
        let mut responder_period = None;
        let mut metrics = MetricRequest::default();

        for (key, value) in fields {
            let key = key.as_ref().trim();
            let value = value.as_ref().trim();
            let present = (!value.is_empty()).then(|| value.to_string());

            if let Some(name) = key.strip_suffix("_end_date") {
                let Some(raw) = present else { continue };
                let name = validate_identifier("promo period", name)?.to_string();
                if period_ends.iter().any(|p| p.name == name) {
                    return Err(Error::Config(format!("promo period {name} is defined twice")));
                }
                let end = EndDate::parse(&raw).ok_or_else(|| {
                    Error::Config(format!("{key}: `{raw}` is not a date or current_date"))
                })?;
                period_ends.push(PeriodEnd { name, end });
                continue;
            }

            match key {
                "campaign_name" => campaign_name = present,
                "campaign_short_name" => campaign_short_name = present,
                "report_name" => report_name = present,
                "start_date" => {
                    start_date = match present {
                        Some(raw) => Some(parse_template_date(&raw).ok_or_else(|| {
                            Error::Config(format!("start_date: `{raw}` is not a date"))
                        })?),
                        None => None,
                    }
                }
                "period_policy" => period_policy = PeriodPolicy::parse(value)?,
                "responder_action" => responder_action = value.to_string(),
                "responder_period" => responder_period = present,
                "cancelations" => metrics.cancelations = parse_flag(key, value)?,
                "activations" => metrics.activations = parse_flag(key, value)?,
                "reactivations" => metrics.reactivations = parse_flag(key, value)?,
                "active_at_end" => metrics.active_at_end = parse_flag(key, value)?,
                "avg_boxes_ordered" => metrics.avg_boxes_ordered = parse_flag(key, value)?,
                "aov" => metrics.aov = parse_flag(key, value)?,
                "dessert_take_rate" => metrics.dessert_take_rate = parse_flag(key, value)?,
                "ordered_nth_box" => metrics.ordered_nth_box = naming::parse_nth_list(value)?,
                "ordered_ds" => metrics.ordered_ds = naming::parse_delivery_schedules(value)?,
                "four_week_retention" => {
                    metrics.four_week_retention = parse_flag(key, value)?
                }
                "upgrades" => metrics.upgrades = parse_flag(key, value)?,
                "downgrades" => metrics.downgrades = parse_flag(key, value)?,
                "gift_cards_purchased" => {
                    metrics.gift_cards_purchased = parse_flag(key, value)?
                }
                "app_usage" => metrics.app_usage = parse_flag(key, value)?,
                "referrals" => metrics.referrals = parse_flag(key, value)?,
                other => log::debug!("Ignoring template column {other}"),
            }
        }

        let campaign_name =
            campaign_name.ok_or_else(|| Error::Config("template has no campaign_name".into()))?;
        let campaign_short_name = campaign_short_name
            .ok_or_else(|| Error::Config("template has no campaign_short_name".into()))?;
        let start_date =
            start_date.ok_or_else(|| Error::Config("template has no start_date".into()))?;
        if period_ends.is_empty() {
            return Err(Error::Config(
                "template has no <period>_end_date columns".into(),
            ));
        }

        let info = Self {
            report_name: report_name.unwrap_or_else(|| campaign_name.clone()),
            campaign_name,
            campaign_short_name,
            start_date,
            period_ends,
            period_policy,
            responder_action,
            responder_period,
            metrics,
        };
        info.table_name()?;
        Ok(info)
    }

    /// Warehouse table holding this campaign's send lists.
    pub fn table_name(&self) -> Result<String> {
        let name = self
            .campaign_short_name
            .trim()
            .to_lowercase()
            .replace([' ', '-'], "_");
        validate_identifier("campaign_short_name", &name)?;
        Ok(name)
    }

    /// Promo periods with the current-date sentinel resolved against `today`.
    pub fn promo_periods(&self, today: NaiveDate) -> Result<Vec<PromoPeriod>> {
        resolve_periods(self.start_date, &self.period_ends, self.period_policy, today)
    }

    /// File name of the rendered report, derived from the display name.
    pub fn report_file_name(&self) -> String {
        let stem: String = self
            .report_name
            .trim()
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        format!("{stem}_report_metrics.csv")
    }
}

/// A campaign directory with its parsed template.
#[derive(Debug, Clone)]
pub struct Campaign {
    pub dir: PathBuf,
    pub template_path: PathBuf,
    pub info: CampaignInfo,
    pub matrix: TestMatrix,
}
