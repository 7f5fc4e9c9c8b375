pub mod naming;
pub mod types;

pub use types::*;

use serde::Serialize;

use naming::DeliverySchedule;

/// Raw column → report-facing name. Columns not listed keep their raw name.
const REPORT_NAMES: [(&str, &str); 9] = [
    ("canceled", "cancelations"),
    ("activated", "new_activations"),
    ("reactivated", "reactivations"),
    ("active_at_end", "active_subscribers"),
    ("redeemed", "redemptions"),
    ("upgraded", "upgrades"),
    ("downgraded", "downgrades"),
    ("used_app", "app_users"),
    ("referrals_sent", "referrals"),
];

/// Report-facing name for a raw aggregate column.
pub fn report_name(raw: &str) -> &str {
    REPORT_NAMES
        .iter()
        .find(|(r, _)| *r == raw)
        .map(|(_, display)| *display)
        .unwrap_or(raw)
}

/// Inverse of [`report_name`].
pub fn raw_name(display: &str) -> &str {
    REPORT_NAMES
        .iter()
        .find(|(_, d)| *d == display)
        .map(|(raw, _)| *raw)
        .unwrap_or(display)
}

/// How a raw aggregate column itself is displayed.
pub fn raw_format(raw: &str) -> Format {
    match raw {
        "gov" | "gift_card_value" => Format::Currency,
        _ => Format::Count,
    }
}

/// Which optional metric families a campaign asks for. Parsed from the
/// template's flag columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricRequest {
    pub cancelations: bool,
    pub activations: bool,
    pub reactivations: bool,
    pub active_at_end: bool,
    pub avg_boxes_ordered: bool,
    pub aov: bool,
    pub dessert_take_rate: bool,
    pub ordered_nth_box: Vec<u32>,
    pub ordered_ds: Vec<DeliverySchedule>,
    pub four_week_retention: bool,
    pub upgrades: bool,
    pub downgrades: bool,
    pub gift_cards_purchased: bool,
    pub app_usage: bool,
    pub referrals: bool,
}

/// One requested metric: the raw columns it needs, the family that computes
/// them, the warehouse columns the family reads and the ratios derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricSpec {
    pub name: &'static str,
    pub family: MetricFamily,
    pub columns: Vec<RawColumn>,
    pub derived: Vec<DerivedMetric>,
    pub expands: Option<Expansion>,
    /// `(table, column)` pairs the family's sub-query reads.
    pub sources: Vec<(&'static str, &'static str)>,
}

const SUBSCRIPTION_EVENTS: [(&str, &str); 3] = [
    ("user_subscription_events", "internal_user_id"),
    ("user_subscription_events", "subscription_changed_at"),
    ("user_subscription_events", "subscription_status_change_event"),
];

const BOXES: [(&str, &str); 3] = [
    ("menu_order_boxes", "internal_user_id"),
    ("menu_order_boxes", "ship_date"),
    ("menu_order_boxes", "status"),
];

fn boxes_with(column: &'static str) -> Vec<(&'static str, &'static str)> {
    let mut sources = BOXES.to_vec();
    sources.push(("menu_order_boxes", column));
    sources
}

impl MetricRequest {
    pub fn is_empty(&self) -> bool {
        self.specs(false).is_empty()
    }

    /// Every requested metric, in family evaluation order.
    ///
    /// `redemptions` adds the implicit redemption metric, which is driven by
    /// discount data in the test matrix rather than a template flag.
    pub fn specs(&self, redemptions: bool) -> Vec<MetricSpec> {
        use MetricFamily::*;
        let mut specs = Vec::new();

        let mut push = |name: &'static str,
                        family: MetricFamily,
                        columns: Vec<RawColumn>,
                        derived: Vec<DerivedMetric>,
                        sources: Vec<(&'static str, &'static str)>| {
            specs.push(MetricSpec {
                name,
                family,
                columns,
                derived,
                expands: None,
                sources,
            });
        };

        if redemptions {
            push(
                "redemptions",
                Redemptions,
                vec![RawColumn::boolean("redeemed", Redemptions)],
                vec![DerivedMetric::rate("redemption_rate", "redeemed")],
                Vec::new(),
            );
        }

        let status_changes = [
            (self.cancelations, "cancelations", "canceled", "cancelation_rate"),
            (self.activations, "activations", "activated", "activation_rate"),
            (self.reactivations, "reactivations", "reactivated", "reactivation_rate"),
        ];
        for (requested, name, column, rate) in status_changes {
            if requested {
                push(
                    name,
                    SubscriptionChanges,
                    vec![RawColumn::boolean(column, SubscriptionChanges)],
                    vec![DerivedMetric::rate(rate, column)],
                    SUBSCRIPTION_EVENTS.to_vec(),
                );
            }
        }

        if self.active_at_end {
            push(
                "active_at_end",
                SubscriptionStatus,
                vec![RawColumn::boolean("active_at_end", SubscriptionStatus)],
                vec![DerivedMetric::rate("active_rate", "active_at_end")],
                SUBSCRIPTION_EVENTS.to_vec(),
            );
        }

        if self.avg_boxes_ordered {
            push(
                "avg_boxes_ordered",
                BoxOrders,
                vec![RawColumn::numeric("total_boxes_ordered", BoxOrders)],
                vec![DerivedMetric::new(
                    "avg_boxes_ordered",
                    "total_boxes_ordered",
                    Denominator::SegmentSize,
                    Format::Float,
                )],
                BOXES.to_vec(),
            );
        }
        if self.aov {
            push(
                "aov",
                BoxOrders,
                vec![
                    RawColumn::numeric("total_boxes_ordered", BoxOrders),
                    RawColumn::numeric("gov", BoxOrders),
                ],
                vec![DerivedMetric::new(
                    "aov",
                    "gov",
                    Denominator::Column("total_boxes_ordered".into()),
                    Format::Currency,
                )],
                boxes_with("gov"),
            );
        }
        if self.dessert_take_rate {
            push(
                "dessert_take_rate",
                BoxOrders,
                vec![
                    RawColumn::numeric("total_boxes_ordered", BoxOrders),
                    RawColumn::numeric("desserts_ordered", BoxOrders),
                ],
                vec![DerivedMetric::new(
                    "dessert_take_rate",
                    "desserts_ordered",
                    Denominator::Column("total_boxes_ordered".into()),
                    Format::Percent,
                )],
                boxes_with("dessert_plates"),
            );
        }
        if !self.ordered_nth_box.is_empty() {
            push(
                "ordered_nth_box",
                BoxOrders,
                self.ordered_nth_box
                    .iter()
                    .map(|n| RawColumn::boolean(naming::nth_box_column(*n), BoxOrders))
                    .collect(),
                Vec::new(),
                boxes_with("nth_delivery"),
            );
        }
        if !self.ordered_ds.is_empty() {
            push(
                "ordered_ds",
                BoxOrders,
                self.ordered_ds
                    .iter()
                    .map(|ds| RawColumn::boolean(ds.column(), BoxOrders))
                    .collect(),
                Vec::new(),
                boxes_with("delivery_schedule"),
            );
        }

        if self.four_week_retention {
            push(
                "four_week_retention",
                FourWeekRetention,
                vec![
                    RawColumn::numeric("boxes_first_4wks", FourWeekRetention),
                    RawColumn::numeric("weeks_ordered_first_4wks", FourWeekRetention),
                ],
                vec![
                    DerivedMetric::new(
                        "avg_boxes_first_4wks",
                        "boxes_first_4wks",
                        Denominator::SegmentSize,
                        Format::Float,
                    ),
                    DerivedMetric::new(
                        "four_week_retention",
                        "weeks_ordered_first_4wks",
                        Denominator::CohortWeeks,
                        Format::Percent,
                    ),
                ],
                BOXES.to_vec(),
            );
        }

        let plan_events = vec![
            ("user_plan_events", "internal_user_id"),
            ("user_plan_events", "event_at"),
            ("user_plan_events", "event_payload"),
        ];
        if self.upgrades {
            push(
                "upgrades",
                PlanChanges,
                vec![RawColumn::boolean("upgraded", PlanChanges)],
                vec![DerivedMetric::rate("upgrade_rate", "upgraded")],
                plan_events.clone(),
            );
        }
        if self.downgrades {
            push(
                "downgrades",
                PlanChanges,
                vec![RawColumn::boolean("downgraded", PlanChanges)],
                vec![DerivedMetric::rate("downgrade_rate", "downgraded")],
                plan_events,
            );
        }

        if self.gift_cards_purchased {
            push(
                "gift_cards_purchased",
                GiftCards,
                vec![
                    RawColumn::numeric("gift_cards_purchased", GiftCards),
                    RawColumn::numeric("gift_card_value", GiftCards),
                ],
                Vec::new(),
                vec![
                    ("gift_card_purchases", "purchaser_user_id"),
                    ("gift_card_purchases", "purchased_at"),
                    ("gift_card_purchases", "amount"),
                ],
            );
        }

        if self.app_usage {
            push(
                "app_usage",
                AppUsage,
                vec![RawColumn::boolean("used_app", AppUsage)],
                vec![DerivedMetric::rate("app_usage_rate", "used_app")],
                vec![
                    ("ios_app_sessions", "internal_user_id"),
                    ("ios_app_sessions", "session_started_at"),
                    ("android_app_sessions", "internal_user_id"),
                    ("android_app_sessions", "session_started_at"),
                ],
            );
        }

        if self.referrals {
            push(
                "referrals",
                Referrals,
                vec![RawColumn::numeric("referrals_sent", Referrals)],
                Vec::new(),
                vec![
                    ("referrals", "referrer_user_id"),
                    ("referrals", "referred_at"),
                ],
            );
        }

        for spec in specs.iter_mut() {
            spec.expands = match spec.name {
                "ordered_nth_box" => Some(Expansion::NthBox),
                "ordered_ds" => Some(Expansion::DeliverySchedule),
                _ => None,
            };
        }
        specs
    }

    /// Raw columns of every requested metric, deduplicated, in the order the
    /// families are evaluated.
    pub fn columns(&self, redemptions: bool) -> Vec<RawColumn> {
        let mut out: Vec<RawColumn> = Vec::new();
        for spec in self.specs(redemptions) {
            for col in spec.columns {
                if !out.iter().any(|c| c.name == col.name) {
                    out.push(col);
                }
            }
        }
        out
    }

    /// Families with at least one requested metric, in evaluation order.
    pub fn families(&self, redemptions: bool) -> Vec<MetricFamily> {
        let specs = self.specs(redemptions);
        MetricFamily::ALL
            .into_iter()
            .filter(|f| specs.iter().any(|s| s.family == *f))
            .collect()
    }
}
