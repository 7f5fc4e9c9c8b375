use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use campaigndw::{config, CampaignDW, Dialect, ReportTable, Settings, Warehouse};

#[derive(Parser)]
#[command(name = "campaigndw", about = "Campaign response reporting CLI")]
struct Cli {
    /// Database path (default: ~/.campaigndw/campaigndw.db)
    #[arg(long, global = true)]
    db: Option<String>,

    /// Increase logging verbosity
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Directory campaign paths are relative to (default: ~/campaigns)
    #[arg(long, global = true)]
    root_dir: Option<PathBuf>,

    /// Object-storage bucket send lists are staged to
    #[arg(long, global = true)]
    bucket: Option<String>,

    /// Folder inside the bucket
    #[arg(long, global = true)]
    folder: Option<String>,

    /// Root of the local object store (default: ~/.campaigndw/stage)
    #[arg(long, global = true)]
    stage_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a campaign's send lists into the warehouse
    Upload {
        /// Campaign directory
        campaign_dir: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Assemble the campaign query and write generated_query.sql
    Query {
        /// Campaign directory
        campaign_dir: PathBuf,
        /// SQL dialect: sqlite or redshift
        #[arg(long, default_value = "sqlite")]
        dialect: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run the campaign query and write the report
    Report {
        /// Campaign directory
        campaign_dir: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Turn an exported result CSV into the report
    Render {
        /// Campaign directory
        campaign_dir: PathBuf,
        /// Result set exported from an externally executed query
        #[arg(long)]
        results: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show settings and uploaded campaign tables
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// List all config values
    List,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            let code = e
                .downcast_ref::<campaigndw::Error>()
                .map(|e| e.exit_code())
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let warehouse = match &cli.db {
        Some(path) => Warehouse::open_at(path).await?,
        None => Warehouse::open().await?,
    };

    let overrides = campaigndw::Overrides {
        root_dir: cli.root_dir,
        bucket: cli.bucket,
        folder: cli.folder,
        stage_dir: cli.stage_dir,
        grantees: None,
    };
    let settings = Settings::load(&warehouse, Settings::defaults()?, overrides).await?;
    let dw = CampaignDW::with_local_store(warehouse, settings);

    match cli.command {
        Commands::Upload { campaign_dir, json } => {
            let campaign = dw.campaign(&campaign_dir)?;
            let upload = dw.upload(&campaign).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&upload)?);
            } else {
                println!("Uploaded {} rows to {}", upload.rows, upload.table_name);
                println!("  Files:      {}", upload.files.len());
                for path in &upload.skipped {
                    println!("  Skipped:    {}", path.display());
                }
                println!("  Staged at:  {}", upload.object_uri);
                println!("  Resolution: {}", upload.resolution.describe());
            }
        }
        Commands::Query {
            campaign_dir,
            dialect,
            json,
        } => {
            let dialect = Dialect::parse(&dialect)?;
            let campaign = dw.campaign(&campaign_dir)?;
            let (query, path) = dw.generate_query(&campaign, dialect).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&query)?);
            } else {
                println!("{}", query.artifact(&campaign.info.campaign_name));
                eprintln!("Written to {}", path.display());
            }
        }
        Commands::Report { campaign_dir, json } => {
            let campaign = dw.campaign(&campaign_dir)?;
            let out = dw.report(&campaign).await?;
            print_report(&out.report, json)?;
            eprintln!("Report written to {}", out.path.display());
        }
        Commands::Render {
            campaign_dir,
            results,
            json,
        } => {
            let campaign = dw.campaign(&campaign_dir)?;
            let (report, path) = dw.render_results(&campaign, &results)?;
            print_report(&report, json)?;
            eprintln!("Report written to {}", path.display());
        }
        Commands::Status => {
            print_status(&dw).await?;
        }
        Commands::Config { action } => {
            handle_config(dw.warehouse(), action).await?;
        }
    }
    Ok(())
}

fn print_report(report: &ReportTable, json: bool) -> anyhow::Result<()> {
    if json {
        let rows: Vec<serde_json::Map<String, serde_json::Value>> = report
            .rows
            .iter()
            .map(|row| {
                report
                    .columns
                    .iter()
                    .cloned()
                    .zip(row.iter().map(|v| serde_json::Value::String(v.clone())))
                    .collect()
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        print!("{}", String::from_utf8(report.to_csv_bytes()?)?);
    }
    Ok(())
}

async fn print_status(dw: &CampaignDW) -> anyhow::Result<()> {
    let status = dw.status().await?;
    let s = &status.settings;
    println!("Campaign Warehouse Status");
    println!("  Root dir:  {}", s.root_dir.display());
    println!("  Staging:   s3://{}/{} ({})", s.bucket, s.folder, s.stage_dir.display());
    if s.grantees.is_empty() {
        println!("  Grantees:  (none)");
    } else {
        println!("  Grantees:  {}", s.grantees.join(", "));
    }
    if status.uploads.is_empty() {
        println!("  No campaign tables uploaded yet.");
        return Ok(());
    }
    println!("  Uploads:");
    for u in &status.uploads {
        println!(
            "    {:<32} {:>8} rows  {}  {}",
            u.table_name,
            u.row_count,
            u.uploaded_at,
            u.resolution.as_deref().unwrap_or("unresolved")
        );
    }
    Ok(())
}

async fn handle_config(warehouse: &Warehouse, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => match warehouse.get_config(&key).await? {
            Some(v) => println!("{key} = {v}"),
            None => println!("{key} is not set"),
        },
        ConfigAction::Set { key, value } => {
            config::check_key(&key)?;
            warehouse.set_config(&key, &value).await?;
            println!("Config updated.");
        }
        ConfigAction::List => {
            let items = warehouse.list_config().await?;
            if items.is_empty() {
                println!("No configuration set.");
            } else {
                for (k, v) in items {
                    println!("{k} = {v}");
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "campaigndw",
            "report",
            "winter",
            "--db",
            "/tmp/dw.db",
            "-vv",
            "--bucket",
            "lists",
        ])
        .unwrap();
        assert_eq!(cli.db.as_deref(), Some("/tmp/dw.db"));
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.bucket.as_deref(), Some("lists"));
        assert!(matches!(cli.command, Commands::Report { json: false, .. }));
    }

    #[test]
    fn test_shared_flags_before_subcommand() {
        let cli = Cli::try_parse_from(["campaigndw", "-v", "--db", "dw.db", "status"]).unwrap();
        assert_eq!(cli.db.as_deref(), Some("dw.db"));
        assert_eq!(cli.verbose, 1);
        assert!(matches!(cli.command, Commands::Status));
    }
}
