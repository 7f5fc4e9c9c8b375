use std::collections::{BTreeMap, BTreeSet};

use crate::campaign::DiscountShape;
use crate::error::{Error, Result};
use crate::metrics::MetricSpec;

/// Fact and dimension tables the assembler can read, with their columns.
///
/// [`SourceCatalog::standard`] describes the warehouse schema the queries
/// are written against; a live warehouse can be introspected instead so that
/// missing tables surface before a query is run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceCatalog {
    tables: BTreeMap<String, BTreeSet<String>>,
}

const STANDARD: &[(&str, &[&str])] = &[
    (
        "users",
        &["internal_user_id", "internal_marketing_prospect_id", "external_id", "email"],
    ),
    (
        "user_subscription_events",
        &["internal_user_id", "subscription_changed_at", "subscription_status_change_event"],
    ),
    (
        "menu_order_boxes",
        &[
            "internal_user_id",
            "ship_date",
            "status",
            "nth_delivery",
            "gov",
            "dessert_plates",
            "delivery_schedule",
        ],
    ),
    (
        "marketing_offers",
        &["internal_user_id", "offer_campaign_name", "discount_name", "redeemed_at"],
    ),
    (
        "marketing_discounts",
        &["internal_user_id", "discount_name", "redeemed_at"],
    ),
    (
        "user_plan_events",
        &["internal_user_id", "event_at", "event_payload"],
    ),
    (
        "gift_card_purchases",
        &["purchaser_user_id", "purchased_at", "amount"],
    ),
    ("ios_app_sessions", &["internal_user_id", "session_started_at"]),
    ("android_app_sessions", &["internal_user_id", "session_started_at"]),
    ("referrals", &["referrer_user_id", "referred_at"]),
];

impl SourceCatalog {
    pub fn standard() -> Self {
        let mut catalog = Self::default();
        for (table, columns) in STANDARD {
            for column in *columns {
                catalog.add(table, column);
            }
        }
        catalog
    }

    pub fn add(&mut self, table: &str, column: &str) {
        self.tables
            .entry(table.to_string())
            .or_default()
            .insert(column.to_string());
    }

    pub fn has(&self, table: &str, column: &str) -> bool {
        self.tables
            .get(table)
            .is_some_and(|cols| cols.contains(column))
    }

    /// Fail with a configuration error naming the first metric whose source
    /// columns are missing.
    pub fn check_metrics(&self, specs: &[MetricSpec]) -> Result<()> {
        for spec in specs {
            for (table, column) in &spec.sources {
                if !self.has(table, column) {
                    return Err(Error::Config(format!(
                        "metric {} needs {table}.{column}, which the warehouse does not have",
                        spec.name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn check_redemptions(&self, shape: DiscountShape) -> Result<()> {
        let (table, columns): (&str, &[&str]) = match shape {
            DiscountShape::OfferCampaign => (
                "marketing_offers",
                &["internal_user_id", "offer_campaign_name", "discount_name", "redeemed_at"],
            ),
            DiscountShape::DiscountName => (
                "marketing_discounts",
                &["internal_user_id", "discount_name", "redeemed_at"],
            ),
        };
        for column in columns {
            if !self.has(table, column) {
                return Err(Error::Config(format!(
                    "redemptions need {table}.{column}, which the warehouse does not have"
                )));
            }
        }
        Ok(())
    }
}
