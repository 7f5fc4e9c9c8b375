pub mod campaign;
pub mod config;
pub mod date_util;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod query;
pub mod report;
pub mod stage;
pub mod storage;

use std::path::{Path, PathBuf};

use serde::Serialize;

pub use campaign::{Campaign, CampaignInfo, TestMatrix};
pub use config::{Overrides, Settings};
pub use error::{Error, Result};
pub use query::{assemble_query, Dialect, GeneratedQuery, QueryAssembler, SourceCatalog};
pub use report::{render_report, ReportTable, ResultSet};
pub use stage::{LocalObjectStore, ObjectLocation, ObjectStore};
pub use storage::{Resolution, UploadRecord, Warehouse};

/// What an upload did, from send-list files to a resolved warehouse table.
#[derive(Debug, Clone, Serialize)]
pub struct UploadReport {
    pub table_name: String,
    pub files: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub rows: usize,
    pub object_uri: String,
    pub resolution: Resolution,
}

/// A report written to a campaign directory.
#[derive(Debug, Clone, Serialize)]
pub struct ReportOutput {
    pub report: ReportTable,
    pub path: PathBuf,
    pub query_path: PathBuf,
}

/// Settings and uploaded tables, for `status`.
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub settings: Settings,
    pub uploads: Vec<UploadRecord>,
}

/// Main entry point for the campaign data warehouse.
pub struct CampaignDW {
    warehouse: Warehouse,
    store: Box<dyn ObjectStore>,
    settings: Settings,
}

impl CampaignDW {
    pub fn new(warehouse: Warehouse, store: Box<dyn ObjectStore>, settings: Settings) -> Self {
        Self {
            warehouse,
            store,
            settings,
        }
    }

    /// Use a local object store rooted at `settings.stage_dir`.
    pub fn with_local_store(warehouse: Warehouse, settings: Settings) -> Self {
        let store = LocalObjectStore::new(settings.stage_dir.clone());
        Self::new(warehouse, Box::new(store), settings)
    }

    /// Access the warehouse (for direct queries in the CLI).
    pub fn warehouse(&self) -> &Warehouse {
        &self.warehouse
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Locate and parse the template of a campaign directory. Relative paths
    /// that do not exist are looked up under `root_dir`.
    pub fn campaign(&self, dir: &Path) -> Result<Campaign> {
        campaign::template::load_campaign(&self.settings.campaign_dir(dir))
    }

    /// Ingest the campaign's send lists, stage them, replace the warehouse
    /// table and resolve its user ids.
    pub async fn upload(&self, campaign: &Campaign) -> Result<UploadReport> {
        let table_name = campaign.info.table_name()?;
        let lists = ingest::process_send_lists(&campaign.dir, &campaign.matrix)?;

        let location = stage::stage_table(
            self.store.as_ref(),
            &lists.table,
            &self.settings.bucket,
            &self.settings.folder,
            &campaign.info.campaign_name,
            &table_name,
        )?;
        let outcome = storage::loader::load_from_object(
            &self.warehouse,
            self.store.as_ref(),
            &location,
            &table_name,
            &self.settings.grantees,
            &campaign.info.campaign_name,
        )
        .await?;
        let resolution = self.warehouse.resolve_identifiers(&table_name).await?;

        Ok(UploadReport {
            table_name,
            files: lists.files,
            skipped: lists.skipped,
            rows: outcome.rows,
            object_uri: outcome.object_uri,
            resolution,
        })
    }

    /// Assemble the campaign query for `dialect` and persist it next to the
    /// template. Local queries are checked against the live warehouse schema.
    pub async fn generate_query(
        &self,
        campaign: &Campaign,
        dialect: Dialect,
    ) -> Result<(GeneratedQuery, PathBuf)> {
        let catalog = match dialect {
            Dialect::Sqlite => self.warehouse.source_catalog().await?,
            Dialect::Redshift => SourceCatalog::standard(),
        };
        let query = QueryAssembler::new(&campaign.info, &campaign.matrix)
            .dialect(dialect)
            .catalog(&catalog)
            .build()?;
        let path = query.write_artifact(&campaign.dir, &campaign.info.campaign_name)?;
        Ok((query, path))
    }

    /// Run the whole pipeline against the local warehouse and write the
    /// report into the campaign directory.
    pub async fn report(&self, campaign: &Campaign) -> Result<ReportOutput> {
        let table_name = campaign.info.table_name()?;
        if !self.warehouse.table_exists(&table_name).await? {
            log::info!("{table_name} not in the warehouse yet, uploading");
            self.upload(campaign).await?;
        } else if !self.warehouse.is_resolved(&table_name).await? {
            self.warehouse.resolve_identifiers(&table_name).await?;
        }

        let (query, query_path) = self.generate_query(campaign, Dialect::Sqlite).await?;
        let result = self.warehouse.run_query(&query).await?;
        let report = render_report(&result, &campaign.info, campaign.matrix.columns())?;
        let path = campaign.dir.join(campaign.info.report_file_name());
        report.write_csv(&path)?;
        Ok(ReportOutput {
            report,
            path,
            query_path,
        })
    }

    /// Post-process a result set exported from an externally executed query.
    pub fn render_results(
        &self,
        campaign: &Campaign,
        results_csv: &Path,
    ) -> Result<(ReportTable, PathBuf)> {
        let bytes = std::fs::read(results_csv)?;
        let result = ResultSet::from_csv_bytes(&bytes)?;
        let report = render_report(&result, &campaign.info, campaign.matrix.columns())?;
        let path = campaign.dir.join(campaign.info.report_file_name());
        report.write_csv(&path)?;
        Ok((report, path))
    }

    pub async fn status(&self) -> Result<Status> {
        Ok(Status {
            settings: self.settings.clone(),
            uploads: self.warehouse.list_uploads().await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::template::tests::SAMPLE_TEMPLATE;

    struct Fixture {
        _root: tempfile::TempDir,
        dir: PathBuf,
        dw: CampaignDW,
    }

    async fn fixture() -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("winter");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("winter_template.csv"), SAMPLE_TEMPLATE).unwrap();
        std::fs::write(
            dir.join("a_list.csv"),
            "Email,First Name\nann@example.com,Ann\ncy@example.com,Cy\n",
        )
        .unwrap();
        std::fs::write(dir.join("b_list.csv"), "EMAIL\nbo@example.com\n").unwrap();
        std::fs::write(dir.join("notes.csv"), "email\nzed@example.com\n").unwrap();

        let wh = Warehouse::open_memory().await.unwrap();
        wh.writer()
            .call(|conn| {
                conn.execute_batch(
                    "INSERT INTO users VALUES (10, NULL, NULL, 'ann@example.com');
                     INSERT INTO users VALUES (11, NULL, NULL, 'bo@example.com');
                     INSERT INTO users VALUES (12, NULL, NULL, 'cy@example.com');
                     INSERT INTO user_subscription_events
                       (internal_user_id, subscription_changed_at, subscription_status_change_event)
                       VALUES (10, '2024-01-03 09:30:00', 'cancelation');
                     INSERT INTO user_subscription_events
                       (internal_user_id, subscription_changed_at, subscription_status_change_event)
                       VALUES (11, '2024-01-20 12:00:00', 'cancelation');",
                )
            })
            .await
            .unwrap();

        let settings = Settings {
            root_dir: root.path().to_path_buf(),
            bucket: "campaign-lists".into(),
            folder: "campaigns".into(),
            stage_dir: root.path().join("stage"),
            grantees: vec!["analysts".into()],
        };
        let dw = CampaignDW::with_local_store(wh, settings);
        Fixture {
            _root: root,
            dir,
            dw,
        }
    }

    #[tokio::test]
    async fn test_upload_stages_loads_and_resolves() {
        let f = fixture().await;
        let campaign = f.dw.campaign(Path::new("winter")).unwrap();
        let upload = f.dw.upload(&campaign).await.unwrap();

        assert_eq!(upload.table_name, "winter_winback");
        assert_eq!(upload.files.len(), 2);
        assert_eq!(upload.skipped.len(), 1);
        assert_eq!(upload.rows, 3);
        assert_eq!(
            upload.object_uri,
            "s3://campaign-lists/campaigns/Winter_Winback/winter_winback.csv"
        );
        assert_eq!(
            upload.resolution,
            Resolution::Enriched {
                from: "email".into(),
                matched: 3,
                unmatched: 0
            }
        );
        assert!(f.dw.warehouse().is_resolved("winter_winback").await.unwrap());
        assert_eq!(
            f.dw.warehouse().list_grants("winter_winback").await.unwrap(),
            vec!["analysts"]
        );
    }

    #[tokio::test]
    async fn test_report_end_to_end() {
        let f = fixture().await;
        let campaign = f.dw.campaign(&f.dir).unwrap();
        let out = f.dw.report(&campaign).await.unwrap();

        assert!(out.path.ends_with("Winter_Winback_report_metrics.csv"));
        assert!(out.path.exists());
        assert!(out.query_path.ends_with("generated_query.sql"));

        let r = &out.report;
        assert_eq!(r.rows.len(), 3);
        // Ann canceled in week 1: the A responder row sorts first.
        assert_eq!(r.cell(0, "target_name"), Some("A"));
        assert_eq!(r.cell(0, "responder"), Some("responder"));
        assert_eq!(r.cell(0, "segment_group"), Some("lapsed"));
        assert_eq!(r.cell(0, "response_rate"), Some("50.00%"));
        assert_eq!(r.cell(0, "segment_size_week1"), Some("1"));
        assert_eq!(r.cell(0, "cancelations_week1"), Some("1"));
        assert_eq!(r.cell(0, "cancelation_rate_week2"), Some("100.00%"));
        assert_eq!(r.cell(1, "responder"), Some("non-responder"));
        assert_eq!(r.cell(1, "cancelations_week2"), Some("0"));
        // Bo canceled after the campaign window.
        assert_eq!(r.cell(2, "target_name"), Some("B"));
        assert_eq!(r.cell(2, "cancelations_week2"), Some("0"));
        assert_eq!(r.cell(2, "response_rate"), Some("0.00%"));

        let status = f.dw.status().await.unwrap();
        assert_eq!(status.uploads.len(), 1);
        assert_eq!(
            status.uploads[0].resolution.as_deref(),
            Some("enriched from email (3 matched, 0 unmatched)")
        );
    }

    const FACTS: &str = "
        INSERT INTO marketing_discounts VALUES (20, 'SAVE10', '2024-03-12 18:00:00');
        INSERT INTO marketing_discounts VALUES (22, 'SAVE10', '2024-03-05 18:00:00');
        INSERT INTO marketing_discounts VALUES (23, 'SAVE20', '2024-03-06 18:00:00');

        INSERT INTO user_subscription_events VALUES (20, '2024-03-05 09:00:00', 'activation');
        INSERT INTO user_subscription_events VALUES (20, '2024-03-15 09:00:00', 'cancelation');
        INSERT INTO user_subscription_events VALUES (21, '2024-03-08 10:00:00', 'reactivation');
        INSERT INTO user_subscription_events VALUES (21, '2024-03-08 10:00:00', 'cancelation');

        INSERT INTO menu_order_boxes VALUES (20, '2024-03-06', 'delivered', 1, 60.0, 2, 'weekly');
        INSERT INTO menu_order_boxes VALUES (20, '2024-03-13', 'delivered', 2, 40.0, 0, 'weekly');
        INSERT INTO menu_order_boxes VALUES (20, '2024-03-14', 'canceled', NULL, 100.0, 1, 'weekly');
        INSERT INTO menu_order_boxes VALUES (23, '2024-03-12', 'delivered', 4, 50.0, 0, 'biweekly');
        INSERT INTO menu_order_boxes VALUES (23, '2024-03-26', 'delivered', 5, 50.0, 0, 'biweekly');

        INSERT INTO user_plan_events VALUES (20, '2024-03-07 10:00:00',
          '{\"new_plan\": {\"servings\": 4, \"recipes\": 3}, \"old_plan\": {\"servings\": 2, \"recipes\": 3}}');
        INSERT INTO user_plan_events VALUES (21, '2024-03-09 10:00:00',
          '{\"new_plan\": {\"servings\": 4, \"recipes\": 1}, \"old_plan\": {\"servings\": 2, \"recipes\": 3}}');
        INSERT INTO user_plan_events VALUES (22, '2024-03-16 10:00:00',
          '{\"new_plan\": {\"servings\": 2, \"recipes\": 2}, \"old_plan\": {\"servings\": 2, \"recipes\": 3}}');

        INSERT INTO gift_card_purchases VALUES (21, '2024-03-05 12:00:00', 25.0);
        INSERT INTO gift_card_purchases VALUES (21, '2024-03-15 12:00:00', 50.0);

        INSERT INTO ios_app_sessions VALUES (22, '2024-03-05 08:00:00');
        INSERT INTO android_app_sessions VALUES (22, '2024-03-05 20:00:00');
        INSERT INTO android_app_sessions VALUES (23, '2024-03-16 09:00:00');

        INSERT INTO referrals VALUES (23, '2024-03-05 11:00:00');
        INSERT INTO referrals VALUES (23, '2024-03-13 11:00:00');";

    /// Every family requested, redemptions on a discount-name matrix, and
    /// responders decided by redemption in week2.
    #[tokio::test]
    async fn test_report_all_families() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("spring");
        std::fs::create_dir_all(&dir).unwrap();
        let template = format!(
            "Campaign Name,Campaign Short Name,Start Date,week1_end_date,week2_end_date,\
             Responder Action,Responder Period,Activations,Reactivations,Active At End,\
             Avg Boxes Ordered,AOV,Dessert Take Rate,Ordered Nth Box,Ordered DS,\
             Four Week Retention,Upgrades,Downgrades,Gift Cards Purchased,App Usage,Referrals,\
             Target Name,Discount Name\n\
             Spring Rally,spring_rally,2024-03-04,2024-03-10,2024-03-17,,week2,\
             yes,yes,yes,yes,yes,yes,1;4,weekly,yes,yes,yes,yes,yes,yes,A,SAVE10\n\
             {}B,SAVE20\n",
            ",".repeat(21)
        );
        std::fs::write(dir.join("spring_template.csv"), template).unwrap();
        std::fs::write(dir.join("A_list.csv"), "user_id\n20\n21\n").unwrap();
        std::fs::write(dir.join("B_list.csv"), "user_id\n22\n23\n").unwrap();

        let wh = Warehouse::open_memory().await.unwrap();
        wh.writer()
            .call(|conn| conn.execute_batch(FACTS))
            .await
            .unwrap();
        let settings = Settings {
            root_dir: root.path().to_path_buf(),
            bucket: "campaign-lists".into(),
            folder: "campaigns".into(),
            stage_dir: root.path().join("stage"),
            grantees: vec![],
        };
        let dw = CampaignDW::with_local_store(wh, settings);
        let campaign = dw.campaign(&dir).unwrap();
        let out = dw.report(&campaign).await.unwrap();
        let r = &out.report;

        // Rows: A responder (20), A non-responder (21), B responder (23), B non-responder (22).
        assert_eq!(r.rows.len(), 4);
        let row = |i: usize, col: &str| r.cell(i, col).unwrap_or_else(|| panic!("no column {col}"));
        assert_eq!(row(0, "target_name"), "A");
        assert_eq!(row(0, "responder"), "responder");
        assert_eq!(row(0, "discount_name"), "SAVE10");
        assert_eq!(row(2, "target_name"), "B");
        assert_eq!(row(3, "responder"), "non-responder");

        // Redemptions: 20 redeemed in week2 only; 22 redeemed another cell's discount.
        assert_eq!(row(0, "response_rate"), "50.00%");
        assert_eq!(row(2, "response_rate"), "50.00%");
        assert_eq!(row(0, "redemptions_week1"), "0");
        assert_eq!(row(0, "redemptions_week2"), "1");
        assert_eq!(row(0, "redemption_rate_week2"), "100.00%");
        assert_eq!(row(2, "redemptions_week1"), "1");
        assert_eq!(row(3, "redemptions_week2"), "0");

        // Subscription changes and status at period end.
        assert_eq!(row(0, "new_activations_week1"), "1");
        assert_eq!(row(1, "reactivations_week1"), "1");
        assert_eq!(row(0, "active_subscribers_week1"), "1");
        assert_eq!(row(0, "active_subscribers_week2"), "0");
        // Same-instant events rank by event name, so the cancelation wins.
        assert_eq!(row(1, "active_subscribers_week1"), "0");

        // Box orders exclude canceled boxes.
        assert_eq!(row(0, "total_boxes_ordered_week1"), "1");
        assert_eq!(row(0, "total_boxes_ordered_week2"), "2");
        assert_eq!(row(0, "gov_week2"), "$100.00");
        assert_eq!(row(0, "aov_week1"), "$60.00");
        assert_eq!(row(0, "aov_week2"), "$50.00");
        assert_eq!(row(0, "avg_boxes_ordered_week2"), "2.00");
        assert_eq!(row(0, "dessert_take_rate_week2"), "50.00%");
        assert_eq!(row(0, "ordered_1st_box_week1"), "1");
        assert_eq!(row(0, "ordered_4th_box_week2"), "0");
        assert_eq!(row(0, "ordered_ds_weekly_week2"), "1");
        assert_eq!(row(2, "ordered_4th_box_week1"), "0");
        assert_eq!(row(2, "ordered_4th_box_week2"), "1");
        assert_eq!(row(2, "ordered_4th_box_rate_week2"), "100.00%");
        assert_eq!(row(2, "ordered_ds_weekly_week2"), "0");
        assert_eq!(row(1, "total_boxes_ordered_week2"), "0");
        assert_eq!(row(1, "aov_week2"), "");

        // Four-week cohort: the same value in every period column.
        assert_eq!(row(0, "boxes_first_4wks_week1"), "2");
        assert_eq!(row(0, "four_week_retention_week1"), "50.00%");
        assert_eq!(row(0, "four_week_retention_week2"), "50.00%");
        assert_eq!(row(2, "weeks_ordered_first_4wks_week2"), "2");
        assert_eq!(row(1, "four_week_retention_week2"), "0.00%");

        // Plan changes compare servings times recipes.
        assert_eq!(row(0, "upgrades_week1"), "1");
        assert_eq!(row(0, "upgrade_rate_week1"), "100.00%");
        assert_eq!(row(1, "upgrades_week1"), "0");
        assert_eq!(row(1, "downgrades_week1"), "1");
        assert_eq!(row(3, "downgrades_week1"), "0");
        assert_eq!(row(3, "downgrades_week2"), "1");

        // Gift cards, app sessions from both platforms, referrals.
        assert_eq!(row(1, "gift_cards_purchased_week1"), "1");
        assert_eq!(row(1, "gift_cards_purchased_week2"), "2");
        assert_eq!(row(1, "gift_card_value_week2"), "$75.00");
        assert_eq!(row(3, "app_users_week1"), "1");
        assert_eq!(row(3, "app_usage_rate_week1"), "100.00%");
        assert_eq!(row(2, "app_users_week1"), "0");
        assert_eq!(row(2, "app_users_week2"), "1");
        assert_eq!(row(2, "referrals_week1"), "1");
        assert_eq!(row(2, "referrals_week2"), "2");
    }

    #[tokio::test]
    async fn test_render_external_results() {
        let f = fixture().await;
        let campaign = f.dw.campaign(&f.dir).unwrap();
        let results = f.dir.join("results.csv");
        std::fs::write(
            &results,
            "target_name,segment_group,promo_period,start_date,end_date,responder,segment_size,canceled\n\
             A,lapsed,week1,2024-01-01,2024-01-07,t,4,4\n\
             A,lapsed,week1,2024-01-01,2024-01-07,f,6,0\n",
        )
        .unwrap();
        let (report, path) = f.dw.render_results(&campaign, &results).unwrap();
        assert!(path.exists());
        assert_eq!(report.cell(0, "response_rate"), Some("40.00%"));
        assert_eq!(report.cell(0, "cancelations_week1"), Some("4"));
        assert_eq!(report.cell(1, "segment_size_week1"), Some("6"));
    }

    #[tokio::test]
    async fn test_redshift_query_is_persisted() {
        let f = fixture().await;
        let campaign = f.dw.campaign(&f.dir).unwrap();
        let (query, path) = f.dw.generate_query(&campaign, Dialect::Redshift).await.unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.starts_with("-- campaign: Winter Winback"));
        assert!(text.contains("analytics.winter_winback"));
        assert_eq!(query.dialect, Dialect::Redshift);
    }
}
