//! Per-family sub-queries.
//!
//! Every period-scoped family reads `campaign_users` (one row per user and
//! promo period, with the period's `start_date`/`end_date`) and emits one row
//! per `(user_id, promo_period)` carrying only the columns that were requested.

use chrono::NaiveDate;

use super::chain::QueryChain;
use crate::campaign::{DiscountShape, TestMatrix};
use crate::error::{Error, Result};
use crate::metrics::{naming, MetricFamily, MetricRequest, RawColumn};

/// A family sub-query to be left-joined into `individual_metrics`.
#[derive(Debug, Clone)]
pub(crate) struct FamilyJoin {
    pub cte: &'static str,
    pub alias: &'static str,
    pub family: MetricFamily,
    /// Also joined on `target_name`.
    pub by_target: bool,
    pub columns: Vec<RawColumn>,
}

impl FamilyJoin {
    /// Joined on `(user_id, promo_period)`; otherwise on `user_id` alone.
    pub fn by_period(&self) -> bool {
        self.family.is_period_scoped()
    }
}

fn any(condition: &str) -> String {
    format!("MAX(CASE WHEN {condition} THEN 1 ELSE 0 END) = 1")
}

fn in_window(expr: &str) -> String {
    format!("{expr} BETWEEN cu.start_date AND cu.end_date")
}

fn has(columns: &[RawColumn], name: &str) -> bool {
    columns.iter().any(|c| c.name == name)
}

/// Emit the sub-query chain for one family.
pub(crate) fn emit(
    chain: &mut QueryChain,
    family: MetricFamily,
    request: &MetricRequest,
    columns: Vec<RawColumn>,
    campaign_start: NaiveDate,
) -> Result<FamilyJoin> {
    match family {
        MetricFamily::Redemptions => Err(Error::Config(
            "redemptions are emitted from the test matrix".into(),
        )),
        MetricFamily::SubscriptionChanges => subscription_changes(chain, columns),
        MetricFamily::SubscriptionStatus => latest_subscription_status(chain, columns),
        MetricFamily::BoxOrders => boxes_ordered(chain, request, columns),
        MetricFamily::FourWeekRetention => four_week_retention(chain, columns, campaign_start),
        MetricFamily::PlanChanges => plan_changes(chain, columns),
        MetricFamily::GiftCards => gift_cards(chain, columns),
        MetricFamily::AppUsage => app_usage(chain, columns),
        MetricFamily::Referrals => referrals_made(chain, columns),
    }
}

/// Users who redeemed the campaign's offer within the period, attributed to
/// the target cell whose offer they redeemed.
pub(crate) fn redemptions(
    chain: &mut QueryChain,
    matrix: &TestMatrix,
    shape: DiscountShape,
) -> Result<FamilyJoin> {
    let d = chain.dialect();
    let mut conditions = Vec::new();
    for row in 0..matrix.len() {
        let Some(target) = matrix.get(row, "target_name") else {
            continue;
        };
        let offer = matrix.get(row, "offer_campaign_name");
        let discount = matrix.get(row, "discount_name");
        let mut parts = Vec::new();
        match shape {
            DiscountShape::OfferCampaign => {
                let Some(offer) = offer else { continue };
                parts.push(format!("md.offer_campaign_name = {}", chain.bind(offer)));
                if let Some(discount) = discount {
                    parts.push(format!("md.discount_name = {}", chain.bind(discount)));
                }
            }
            DiscountShape::DiscountName => {
                let Some(discount) = discount else { continue };
                parts.push(format!("md.discount_name = {}", chain.bind(discount)));
            }
        }
        let target = chain.bind(target);
        conditions.push(format!("(cl.target_name = {target} AND {})", parts.join(" AND ")));
    }
    if conditions.is_empty() {
        return Err(Error::Config(
            "test matrix has no offer or discount names to match redemptions".into(),
        ));
    }
    let table = d.fact_table(match shape {
        DiscountShape::OfferCampaign => "marketing_offers",
        DiscountShape::DiscountName => "marketing_discounts",
    });
    let redeemed_on = d.event_date("md.redeemed_at");

    let sql = format!(
        "  SELECT cl.user_id, cl.target_name, cl.promo_period, true AS redeemed
  FROM campaign_lists cl
  INNER JOIN {table} md
    ON md.internal_user_id = cl.user_id
    AND {redeemed_on} BETWEEN cl.start_date AND cl.end_date
    AND ({})
  GROUP BY cl.user_id, cl.target_name, cl.promo_period",
        conditions.join("\n      OR ")
    );
    chain.push("redemptions", sql, &["campaign_lists"])?;
    Ok(FamilyJoin {
        cte: "redemptions",
        alias: "rd",
        family: MetricFamily::Redemptions,
        by_target: true,
        columns: vec![RawColumn::boolean("redeemed", MetricFamily::Redemptions)],
    })
}

const STATUS_EVENTS: [(&str, &str); 3] = [
    ("canceled", "cancelation"),
    ("activated", "activation"),
    ("reactivated", "reactivation"),
];

fn subscription_changes(chain: &mut QueryChain, columns: Vec<RawColumn>) -> Result<FamilyJoin> {
    let d = chain.dialect();
    let selects: Vec<String> = STATUS_EVENTS
        .iter()
        .filter(|(col, _)| has(&columns, col))
        .map(|(col, event)| {
            format!(
                "    {} AS {col}",
                any(&format!("se.subscription_status_change_event = '{event}'"))
            )
        })
        .collect();
    let sql = format!(
        "  SELECT cu.user_id, cu.promo_period,
{}
  FROM campaign_users cu
  INNER JOIN {} se
    ON se.internal_user_id = cu.user_id
    AND {}
  GROUP BY cu.user_id, cu.promo_period",
        selects.join(",\n"),
        d.fact_table("user_subscription_events"),
        in_window(&d.event_date("se.subscription_changed_at")),
    );
    chain.push("subscription_changes", sql, &["campaign_users"])?;
    Ok(FamilyJoin {
        cte: "subscription_changes",
        alias: "sc",
        family: MetricFamily::SubscriptionChanges,
        by_target: false,
        columns,
    })
}

/// The user's latest subscription event on or before the period end decides
/// whether they were active at the end of it.
fn latest_subscription_status(
    chain: &mut QueryChain,
    columns: Vec<RawColumn>,
) -> Result<FamilyJoin> {
    let d = chain.dialect();
    let sql = format!(
        "  SELECT ranked.user_id, ranked.promo_period,
    ranked.subscription_status_change_event IN ('activation', 'reactivation') AS active_at_end
  FROM (
    SELECT cu.user_id, cu.promo_period, se.subscription_status_change_event,
      ROW_NUMBER() OVER (
        PARTITION BY cu.user_id, cu.promo_period
        ORDER BY se.subscription_changed_at DESC, se.subscription_status_change_event
      ) AS event_rank
    FROM campaign_users cu
    INNER JOIN {} se
      ON se.internal_user_id = cu.user_id
      AND {} <= cu.end_date
  ) ranked
  WHERE ranked.event_rank = 1",
        d.fact_table("user_subscription_events"),
        d.event_date("se.subscription_changed_at"),
    );
    chain.push("latest_subscription_status", sql, &["campaign_users"])?;
    Ok(FamilyJoin {
        cte: "latest_subscription_status",
        alias: "ls",
        family: MetricFamily::SubscriptionStatus,
        by_target: false,
        columns,
    })
}

fn boxes_ordered(
    chain: &mut QueryChain,
    request: &MetricRequest,
    columns: Vec<RawColumn>,
) -> Result<FamilyJoin> {
    let d = chain.dialect();
    let mut selects = Vec::new();
    for col in &columns {
        let expr = match col.name.as_str() {
            "total_boxes_ordered" => "COUNT(*)".to_string(),
            "gov" => "SUM(bo.gov)".to_string(),
            "desserts_ordered" => {
                "SUM(CASE WHEN bo.dessert_plates > 0 THEN 1 ELSE 0 END)".to_string()
            }
            name => {
                if let Some(n) = naming::nth_from_column(name) {
                    any(&format!("bo.nth_delivery = {n}"))
                } else if let Some(ds) = request.ordered_ds.iter().find(|ds| ds.column() == name)
                {
                    any(&format!("bo.delivery_schedule = {}", chain.bind(ds.value.as_str())))
                } else {
                    return Err(Error::Config(format!(
                        "box orders cannot compute column {name}"
                    )));
                }
            }
        };
        selects.push(format!("    {expr} AS {}", col.name));
    }
    let sql = format!(
        "  SELECT cu.user_id, cu.promo_period,
{}
  FROM campaign_users cu
  INNER JOIN {} bo
    ON bo.internal_user_id = cu.user_id
    AND {}
    AND bo.status <> 'canceled'
  GROUP BY cu.user_id, cu.promo_period",
        selects.join(",\n"),
        d.fact_table("menu_order_boxes"),
        in_window("bo.ship_date"),
    );
    chain.push("boxes_ordered", sql, &["campaign_users"])?;
    Ok(FamilyJoin {
        cte: "boxes_ordered",
        alias: "bo",
        family: MetricFamily::BoxOrders,
        by_target: false,
        columns,
    })
}

/// Boxes in the first four calendar weeks after a user's first delivery on
/// or after the campaign start.
///
/// The cohort window belongs to the user, not to a promo period, so the
/// sub-query is keyed by user only and every period column of the report
/// repeats the same cohort value.
fn four_week_retention(
    chain: &mut QueryChain,
    columns: Vec<RawColumn>,
    campaign_start: NaiveDate,
) -> Result<FamilyJoin> {
    let d = chain.dialect();
    let boxes = d.fact_table("menu_order_boxes");
    let first = format!(
        "  SELECT mob.internal_user_id AS user_id, MIN(mob.ship_date) AS first_ship_date
  FROM {boxes} mob
  INNER JOIN (SELECT DISTINCT user_id FROM campaign_users) cu
    ON cu.user_id = mob.internal_user_id
  WHERE mob.ship_date >= {}
    AND mob.status <> 'canceled'
  GROUP BY mob.internal_user_id",
        d.date_literal(campaign_start),
    );
    chain.push("first_deliveries", first, &["campaign_users"])?;

    let week = d.week_diff("fd.first_ship_date", "mob.ship_date");
    let retention = format!(
        "  SELECT fd.user_id,
    COUNT(*) AS boxes_first_4wks,
    COUNT(DISTINCT {week}) AS weeks_ordered_first_4wks
  FROM first_deliveries fd
  INNER JOIN {boxes} mob
    ON mob.internal_user_id = fd.user_id
    AND mob.status <> 'canceled'
    AND {week} BETWEEN 0 AND 3
  GROUP BY fd.user_id"
    );
    chain.push("four_week_retention", retention, &["first_deliveries"])?;
    Ok(FamilyJoin {
        cte: "four_week_retention",
        alias: "fw",
        family: MetricFamily::FourWeekRetention,
        by_target: false,
        columns,
    })
}

/// Plan events compare plates per week (servings times recipes) of the new
/// plan against the old one.
fn plan_changes(chain: &mut QueryChain, columns: Vec<RawColumn>) -> Result<FamilyJoin> {
    let d = chain.dialect();
    let plates = |plan: &str| {
        format!(
            "{} * {}",
            d.json_number("pe.event_payload", &[plan, "servings"]),
            d.json_number("pe.event_payload", &[plan, "recipes"])
        )
    };
    let mut selects = Vec::new();
    if has(&columns, "upgraded") {
        selects.push(format!("    {} AS upgraded", any("p.new_plates > p.old_plates")));
    }
    if has(&columns, "downgraded") {
        selects.push(format!("    {} AS downgraded", any("p.new_plates < p.old_plates")));
    }
    let sql = format!(
        "  SELECT cu.user_id, cu.promo_period,
{}
  FROM campaign_users cu
  INNER JOIN (
    SELECT pe.internal_user_id,
      {} AS event_date,
      {} AS new_plates,
      {} AS old_plates
    FROM {} pe
  ) p
    ON p.internal_user_id = cu.user_id
    AND {}
  GROUP BY cu.user_id, cu.promo_period",
        selects.join(",\n"),
        d.event_date("pe.event_at"),
        plates("new_plan"),
        plates("old_plan"),
        d.fact_table("user_plan_events"),
        in_window("p.event_date"),
    );
    chain.push("plan_changes", sql, &["campaign_users"])?;
    Ok(FamilyJoin {
        cte: "plan_changes",
        alias: "pc",
        family: MetricFamily::PlanChanges,
        by_target: false,
        columns,
    })
}

fn gift_cards(chain: &mut QueryChain, columns: Vec<RawColumn>) -> Result<FamilyJoin> {
    let d = chain.dialect();
    let sql = format!(
        "  SELECT cu.user_id, cu.promo_period,
    COUNT(*) AS gift_cards_purchased,
    SUM(gc.amount) AS gift_card_value
  FROM campaign_users cu
  INNER JOIN {} gc
    ON gc.purchaser_user_id = cu.user_id
    AND {}
  GROUP BY cu.user_id, cu.promo_period",
        d.fact_table("gift_card_purchases"),
        in_window(&d.event_date("gc.purchased_at")),
    );
    chain.push("gift_cards", sql, &["campaign_users"])?;
    Ok(FamilyJoin {
        cte: "gift_cards",
        alias: "gc",
        family: MetricFamily::GiftCards,
        by_target: false,
        columns,
    })
}

/// Sessions from both mobile platforms, unioned before the window join.
fn app_usage(chain: &mut QueryChain, columns: Vec<RawColumn>) -> Result<FamilyJoin> {
    let d = chain.dialect();
    let sessions = ["ios_app_sessions", "android_app_sessions"]
        .iter()
        .map(|table| {
            format!(
                "  SELECT s.internal_user_id, {} AS session_date
  FROM {} s",
                d.event_date("s.session_started_at"),
                d.fact_table(table)
            )
        })
        .collect::<Vec<_>>()
        .join("\n  UNION ALL\n");
    chain.push("app_sessions", sessions, &[])?;

    let sql = format!(
        "  SELECT cu.user_id, cu.promo_period, true AS used_app
  FROM campaign_users cu
  INNER JOIN app_sessions aps
    ON aps.internal_user_id = cu.user_id
    AND {}
  GROUP BY cu.user_id, cu.promo_period",
        in_window("aps.session_date"),
    );
    chain.push("app_usage", sql, &["campaign_users", "app_sessions"])?;
    Ok(FamilyJoin {
        cte: "app_usage",
        alias: "au",
        family: MetricFamily::AppUsage,
        by_target: false,
        columns,
    })
}

fn referrals_made(chain: &mut QueryChain, columns: Vec<RawColumn>) -> Result<FamilyJoin> {
    let d = chain.dialect();
    let sql = format!(
        "  SELECT cu.user_id, cu.promo_period, COUNT(*) AS referrals_sent
  FROM campaign_users cu
  INNER JOIN {} rf
    ON rf.referrer_user_id = cu.user_id
    AND {}
  GROUP BY cu.user_id, cu.promo_period",
        d.fact_table("referrals"),
        in_window(&d.event_date("rf.referred_at")),
    );
    chain.push("referrals_made", sql, &["campaign_users"])?;
    Ok(FamilyJoin {
        cte: "referrals_made",
        alias: "rm",
        family: MetricFamily::Referrals,
        by_target: false,
        columns,
    })
}
