use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use gfms_fetch::{CdxClient, CdxConfig, HttpRenderer, RendererConfig};
use gfms_run::{ColumnNames, RunConfig, RunController, StartMode};

#[derive(Debug, Parser)]
#[command(name = "gfms")]
#[command(about = "Scrapes crowdfunding campaign pages, live first, archive fallback")]
struct Cli {
    /// CSV table of campaign URLs to process.
    #[arg(long)]
    table: PathBuf,

    /// Directory the partitioned output files are written to.
    #[arg(long, default_value = "scrape_output")]
    out_dir: PathBuf,

    /// Column holding the primary campaign URL.
    #[arg(long, default_value = "cleaned_url")]
    url_column: String,

    /// Column holding an alternate form of the URL.
    #[arg(long, default_value = "original_url")]
    url_column2: String,

    /// Column holding the cleaned campaign id.
    #[arg(long, default_value = "cleaned_campaign_id")]
    id_column: String,

    /// Column holding the raw campaign id.
    #[arg(long, default_value = "campaign_id")]
    id_column2: String,

    /// Rows per output partition file.
    #[arg(long, default_value_t = 10_000)]
    partition_rows: usize,

    /// Continue after the last row recorded in the output directory.
    #[arg(long, conflicts_with_all = ["start_index", "start_campaign"])]
    resume: bool,

    /// Start at this row index of the input table.
    #[arg(long, conflicts_with = "start_campaign")]
    start_index: Option<usize>,

    /// Start at the row whose campaign id matches this value.
    #[arg(long)]
    start_campaign: Option<String>,

    /// Skip the archive fallback entirely.
    #[arg(long)]
    no_wayback: bool,

    /// Minimum quality score for a live page to count as scraped.
    #[arg(long, default_value_t = 20)]
    live_threshold: u32,

    /// Minimum quality score for an archived snapshot to count as scraped.
    #[arg(long, default_value_t = 17)]
    archive_threshold: u32,

    /// Snapshots tried per campaign before giving up on the archive.
    #[arg(long, default_value_t = 30)]
    max_snapshots: usize,

    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = 150)]
    timeout_secs: u64,

    /// User-Agent header sent with every request.
    #[arg(long)]
    user_agent: Option<String>,
}

impl Cli {
    fn start_mode(&self) -> StartMode {
        if self.resume {
            StartMode::Resume
        } else if let Some(index) = self.start_index {
            StartMode::StartIndex(index)
        } else if let Some(id) = &self.start_campaign {
            StartMode::StartCampaign(id.clone())
        } else {
            StartMode::Beginning
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let cli = Cli::parse();

    let renderer = HttpRenderer::new(RendererConfig {
        timeout: Duration::from_secs(cli.timeout_secs),
        user_agent: cli.user_agent.clone(),
        ..RendererConfig::default()
    })?;
    let archive = CdxClient::new(CdxConfig {
        timeout: Duration::from_secs(cli.timeout_secs),
        ..CdxConfig::default()
    })?;

    let mut config = RunConfig::new(cli.table.clone(), cli.out_dir.clone());
    config.columns = ColumnNames {
        url: cli.url_column.clone(),
        secondary_url: Some(cli.url_column2.clone()),
        campaign_id: Some(cli.id_column.clone()),
        secondary_campaign_id: Some(cli.id_column2.clone()),
    };
    config.partition_rows = cli.partition_rows;
    config.use_wayback = !cli.no_wayback;
    config.live_threshold = cli.live_threshold;
    config.archive_threshold = cli.archive_threshold;
    config.max_snapshots = cli.max_snapshots;

    let mode = cli.start_mode();
    let mut controller = RunController::new(config, Box::new(renderer), Box::new(archive))?;
    let summary = controller.deploy(mode).await?;
    println!(
        "run complete: run_id={} start_index={} rows={}",
        summary.run_id, summary.started_at_index, summary.rows_processed
    );

    Ok(())
}
