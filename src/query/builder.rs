use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

use super::catalog::SourceCatalog;
use super::chain::{GeneratedQuery, QueryChain};
use super::dialect::{validate_identifier, Dialect};
use super::families::{self, FamilyJoin};
use crate::campaign::{CampaignInfo, PromoPeriod, TestMatrix};
use crate::date_util;
use crate::error::{Error, Result};
use crate::metrics::{self, ColumnKind, MetricFamily, RawColumn};

static RE_RESPONDER_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+or\s+|,|\|").unwrap());

/// Builder for the campaign metrics query.
///
/// Defaults render for the local warehouse, resolve `current_date` against
/// today and validate metric sources against the standard schema.
#[derive(Debug, Clone)]
pub struct QueryAssembler<'a> {
    info: &'a CampaignInfo,
    matrix: &'a TestMatrix,
    dialect: Dialect,
    today: Option<NaiveDate>,
    catalog: Option<&'a SourceCatalog>,
}

/// Assemble the metrics query for the local warehouse as of today.
pub fn assemble_query(info: &CampaignInfo, matrix: &TestMatrix) -> Result<GeneratedQuery> {
    QueryAssembler::new(info, matrix).build()
}

/// The condition that makes a user a responder, over `individual_metrics`
/// columns aliased `im`.
fn responder_condition(
    action: &str,
    columns: &[RawColumn],
    redemptions: bool,
) -> Result<String> {
    let tokens: Vec<String> = RE_RESPONDER_SPLIT
        .split(action.trim())
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.is_empty() {
        if redemptions {
            return Ok("im.redeemed".to_string());
        }
        return Err(Error::Config(
            "responder_action is empty and the test matrix has no offers to redeem".into(),
        ));
    }
    let mut parts = Vec::new();
    for token in &tokens {
        let raw = metrics::raw_name(token);
        let col = columns.iter().find(|c| c.name == raw).ok_or_else(|| {
            Error::Config(format!(
                "responder_action refers to `{token}`, which is not a computed metric"
            ))
        })?;
        parts.push(match col.kind {
            ColumnKind::Boolean => format!("im.{}", col.name),
            ColumnKind::Numeric => format!("im.{} > 0", col.name),
        });
    }
    Ok(parts.join(" OR "))
}

/// The period responders are decided in.
fn baseline_period<'p>(
    periods: &'p [PromoPeriod],
    requested: Option<&str>,
) -> Result<&'p PromoPeriod> {
    match requested {
        Some(name) => periods.iter().find(|p| p.name == name).ok_or_else(|| {
            Error::Config(format!(
                "responder_period `{name}` is not one of the promo periods ({})",
                periods
                    .iter()
                    .map(|p| p.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        }),
        None => periods
            .last()
            .ok_or_else(|| Error::Config("campaign has no promo periods".into())),
    }
}

impl<'a> QueryAssembler<'a> {
    pub fn new(info: &'a CampaignInfo, matrix: &'a TestMatrix) -> Self {
        Self {
            info,
            matrix,
            dialect: Dialect::default(),
            today: None,
            catalog: None,
        }
    }

    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Date `current_date` end dates resolve to.
    pub fn as_of(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn catalog(mut self, catalog: &'a SourceCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn build(self) -> Result<GeneratedQuery> {
        let info = self.info;
        let matrix = self.matrix;
        let d = self.dialect;

        let table = info.table_name()?;
        let periods = info.promo_periods(self.today.unwrap_or_else(date_util::today))?;
        let shape = matrix.discount_shape();
        let redemptions = shape.is_some();

        let specs = info.metrics.specs(redemptions);
        let standard;
        let catalog = match self.catalog {
            Some(c) => c,
            None => {
                standard = SourceCatalog::standard();
                &standard
            }
        };
        catalog.check_metrics(&specs)?;
        if let Some(shape) = shape {
            catalog.check_redemptions(shape)?;
        }

        let columns = info.metrics.columns(redemptions);
        let condition = responder_condition(&info.responder_action, &columns, redemptions)?;
        let baseline = baseline_period(&periods, info.responder_period.as_deref())?;

        let matrix_cols = matrix
            .columns()
            .iter()
            .map(|c| validate_identifier("test matrix column", c))
            .collect::<Result<Vec<&str>>>()?;
        let prefixed = |alias: &str| {
            matrix_cols
                .iter()
                .map(|c| format!("{alias}.{c}"))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut chain = QueryChain::new(d);

        let promo_periods = periods
            .iter()
            .map(|p| {
                Ok(format!(
                    "  SELECT '{}' AS promo_period, {} AS start_date, {} AS end_date",
                    validate_identifier("promo period", &p.name)?,
                    d.date_literal(p.start_date),
                    d.date_literal(p.end_date)
                ))
            })
            .collect::<Result<Vec<_>>>()?
            .join("\n  UNION ALL\n");
        chain.push("promo_periods", promo_periods, &[])?;

        chain.push(
            "campaign_lists",
            format!(
                "  SELECT DISTINCT a.user_id, {}, pp.promo_period, pp.start_date, pp.end_date
  FROM {} a
  CROSS JOIN promo_periods pp
  WHERE a.user_id IS NOT NULL",
                prefixed("a"),
                d.upload_table(&table)
            ),
            &["promo_periods"],
        )?;

        chain.push(
            "campaign_users",
            "  SELECT DISTINCT cl.user_id, cl.promo_period, cl.start_date, cl.end_date
  FROM campaign_lists cl"
                .to_string(),
            &["campaign_lists"],
        )?;

        let mut joins: Vec<FamilyJoin> = Vec::new();
        if let Some(shape) = shape {
            joins.push(families::redemptions(&mut chain, matrix, shape)?);
        }
        for family in info.metrics.families(redemptions) {
            if family == MetricFamily::Redemptions {
                continue;
            }
            let family_columns: Vec<RawColumn> = columns
                .iter()
                .filter(|c| c.family == family)
                .cloned()
                .collect();
            joins.push(families::emit(
                &mut chain,
                family,
                &info.metrics,
                family_columns,
                info.start_date,
            )?);
        }
        log::debug!(
            "Assembling {} with {} metric sub-queries",
            table,
            joins.len()
        );

        let mut selects = vec![format!(
            "  SELECT cl.user_id, {}, cl.promo_period, cl.start_date, cl.end_date",
            prefixed("cl")
        )];
        let mut from = vec!["  FROM campaign_lists cl".to_string()];
        let mut deps = vec!["campaign_lists"];
        for join in &joins {
            for col in &join.columns {
                let default = match col.kind {
                    ColumnKind::Boolean => "false",
                    ColumnKind::Numeric => "0",
                };
                selects.push(format!(
                    "    COALESCE({}.{}, {default}) AS {}",
                    join.alias, col.name, col.name
                ));
            }
            let mut on = format!("{a}.user_id = cl.user_id", a = join.alias);
            if join.by_period() {
                on.push_str(&format!(" AND {a}.promo_period = cl.promo_period", a = join.alias));
            }
            if join.by_target {
                on.push_str(&format!(" AND {a}.target_name = cl.target_name", a = join.alias));
            }
            from.push(format!("  LEFT JOIN {} {} ON {on}", join.cte, join.alias));
            deps.push(join.cte);
        }
        chain.push(
            "individual_metrics",
            format!("{}\n{}", selects.join(",\n"), from.join("\n")),
            &deps,
        )?;

        chain.push(
            "responders",
            format!(
                "  SELECT im.user_id, im.target_name,
    MAX(CASE WHEN {condition} THEN 1 ELSE 0 END) = 1 AS responder
  FROM individual_metrics im
  WHERE im.promo_period = '{}'
  GROUP BY im.user_id, im.target_name",
                baseline.name
            ),
            &["individual_metrics"],
        )?;

        let group_count = matrix_cols.len() + 4;
        let ordinals = (1..=group_count)
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let mut aggregates = vec!["  COUNT(DISTINCT im.user_id) AS segment_size".to_string()];
        for col in &columns {
            aggregates.push(match col.kind {
                ColumnKind::Boolean => format!(
                    "  SUM(CASE WHEN im.{c} THEN 1 ELSE 0 END) AS {c}",
                    c = col.name
                ),
                ColumnKind::Numeric => format!("  SUM(im.{c}) AS {c}", c = col.name),
            });
        }
        let body = format!(
            "SELECT {}, im.promo_period, im.start_date, im.end_date,
  COALESCE(rs.responder, false) AS responder,
{}
FROM individual_metrics im
LEFT JOIN responders rs
  ON rs.user_id = im.user_id AND rs.target_name = im.target_name
GROUP BY {ordinals}
ORDER BY {ordinals}",
            prefixed("im"),
            aggregates.join(",\n"),
        );
        chain.finish(body, &["individual_metrics", "responders"])
    }
}
