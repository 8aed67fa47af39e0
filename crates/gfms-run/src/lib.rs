//! Run orchestration: the live/archive resolution state machine, the
//! partitioned CSV ledger, and the controller that walks an input table
//! of campaign URLs and writes one outcome row per input row.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Local;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use gfms_core::{FieldRecord, ImportanceWeights, ResolutionOutcome, TargetIdentifier};
use gfms_extract::{
    archive_extractors, best_extraction, live_extractors, Classification, Extractor,
};
use gfms_fetch::{
    campaign_id_from_url, candidate_urls, clean_campaign_id, clean_captures,
    simplified_archive_query, snapshot_url, ArchiveSearch, Renderer,
};

pub const CRATE_NAME: &str = "gfms-run";

/// Placeholder timestamp for outcomes that never reached a dated snapshot.
pub const NO_TIMESTAMP: &str = "nat";

/// Outcome status strings. These are written verbatim into the ledger's
/// `wayback_status` column, so downstream consumers depend on the exact text.
pub mod status {
    pub const PRESENT_NONE: &str = "present: none";
    pub const PRESENT_REQUEST_FAILED: &str = "present: request failed";
    pub const PRESENT_INACTIVE: &str = "present: inactive";
    pub const PRESENT_NOT_FOUND: &str = "present: campaign not found";
    pub const PRESENT_SUCCESS: &str = "present: success";
    pub const PRESENT_INSUFFICIENT: &str = "present: scraped but did not meet success criteria";

    pub const WAYBACK_REQUEST_FAILED: &str = "wayback: request failed";
    pub const WAYBACK_INACTIVE: &str = "wayback: inactive";
    pub const WAYBACK_NOT_FOUND: &str = "wayback: campaign not found";
    pub const WAYBACK_SUCCESS: &str = "wayback: success";
    pub const WAYBACK_INSUFFICIENT: &str = "wayback: scraped but did not meet success standard";
    pub const WAYBACK_NO_ARCHIVES: &str = "wayback: url not found in archives";
    pub const WAYBACK_FAILED: &str = "wayback: failed completely";
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("input table {0} does not exist")]
    TableMissing(PathBuf),
    #[error("input table {0} is not a file")]
    TableNotFile(PathBuf),
    #[error("reading input table: {0}")]
    Table(#[from] csv::Error),
    #[error("column '{0}' is not present in the input table")]
    MissingColumn(String),
    #[error("output directory {0} does not exist and neither does its parent")]
    OutputDirUnusable(PathBuf),
    #[error("creating output directory {dir}: {source}")]
    OutputDirCreate {
        dir: PathBuf,
        source: std::io::Error,
    },
    #[error("no partition files found in {0}, nothing to resume from")]
    NoPartitions(PathBuf),
    #[error("reading partition {path}: {message}")]
    PartitionUnreadable { path: PathBuf, message: String },
    #[error("cannot locate campaign '{0}' in the input table")]
    ResumeTargetNotFound(String),
    #[error("start index {index} is beyond the input table ({rows} rows)")]
    IndexOutOfRange { index: usize, rows: usize },
}

/// Names of the input-table columns the controller reads. Only the primary
/// URL column is mandatory; the others are used when present and skipped
/// silently when the table lacks them.
#[derive(Clone, Debug)]
pub struct ColumnNames {
    pub url: String,
    pub secondary_url: Option<String>,
    pub campaign_id: Option<String>,
    pub secondary_campaign_id: Option<String>,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            url: "cleaned_url".to_string(),
            secondary_url: Some("original_url".to_string()),
            campaign_id: Some("cleaned_campaign_id".to_string()),
            secondary_campaign_id: Some("campaign_id".to_string()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RunConfig {
    pub table_path: PathBuf,
    pub columns: ColumnNames,
    pub out_dir: PathBuf,
    /// Rows per ledger partition file.
    pub partition_rows: usize,
    pub use_wayback: bool,
    /// Minimum quality score for a live page to count as a success.
    pub live_threshold: u32,
    /// Minimum quality score for an archived snapshot to count as a success.
    pub archive_threshold: u32,
    /// Upper bound on snapshots fetched per row during the archive walk.
    pub max_snapshots: usize,
}

impl RunConfig {
    pub fn new(table_path: PathBuf, out_dir: PathBuf) -> Self {
        Self {
            table_path,
            columns: ColumnNames::default(),
            out_dir,
            partition_rows: 10_000,
            use_wayback: true,
            live_threshold: 20,
            archive_threshold: 17,
            max_snapshots: 30,
        }
    }
}

/// Where in the input table a run begins.
#[derive(Clone, Debug)]
pub enum StartMode {
    Beginning,
    /// Continue after the last row recorded in the newest partition file.
    Resume,
    StartIndex(usize),
    StartCampaign(String),
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at_index: usize,
    pub rows_processed: usize,
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Drives the per-row state machine: try the live site, fall back to the
/// archive walk, merge the two outcomes into a single ledger row.
pub struct Resolver {
    renderer: Box<dyn Renderer>,
    archive: Box<dyn ArchiveSearch>,
    weights: ImportanceWeights,
    live_extractors: Vec<Box<dyn Extractor>>,
    archive_extractors: Vec<Box<dyn Extractor>>,
    live_threshold: u32,
    archive_threshold: u32,
    max_snapshots: usize,
    use_wayback: bool,
}

impl Resolver {
    pub fn new(
        renderer: Box<dyn Renderer>,
        archive: Box<dyn ArchiveSearch>,
        config: &RunConfig,
    ) -> Self {
        Self {
            renderer,
            archive,
            weights: ImportanceWeights::default(),
            live_extractors: live_extractors(),
            archive_extractors: archive_extractors(),
            live_threshold: config.live_threshold,
            archive_threshold: config.archive_threshold,
            max_snapshots: config.max_snapshots,
            use_wayback: config.use_wayback,
        }
    }

    pub async fn resolve(&self, target: &TargetIdentifier) -> ResolutionOutcome {
        let candidates = candidate_urls(target);
        let (live, live_success) = self.try_live(&candidates).await;
        if live_success || !self.use_wayback {
            return live;
        }

        let mut queries = Vec::new();
        for candidate in &candidates {
            let query = simplified_archive_query(candidate);
            if !queries.contains(&query) {
                queries.push(query);
            }
        }
        let archive = self.try_archive(&queries).await;
        merge_outcomes(live, archive)
    }

    /// Renders each candidate URL in turn, keeping the best-scoring
    /// extraction seen so far. Returns early on the first candidate whose
    /// content clears the live quality threshold.
    async fn try_live(&self, candidates: &[String]) -> (ResolutionOutcome, bool) {
        let scraped_at = Local::now().format("%Y%m%d%H%M%S").to_string();
        let mut best: Option<(FieldRecord, u32, String)> = None;
        let mut marker: Option<&'static str> = None;
        let mut any_rendered = false;

        for url in candidates {
            debug!(url, "rendering live candidate");
            let Some(page) = self.renderer.render(url).await else {
                warn!(url, "live render failed");
                continue;
            };
            any_rendered = true;
            let extraction =
                best_extraction(&page.body, &page.url, &self.live_extractors, &self.weights);
            match extraction.classification {
                Classification::Inactive => marker = Some(status::PRESENT_INACTIVE),
                Classification::NotFound => {
                    if marker.is_none() {
                        marker = Some(status::PRESENT_NOT_FOUND);
                    }
                }
                Classification::Content => {
                    if extraction.score >= self.live_threshold {
                        info!(url, score = extraction.score, "live scrape succeeded");
                        let outcome = ResolutionOutcome {
                            record: extraction.record,
                            archive_timestamp: scraped_at,
                            query_url: url.clone(),
                            campaign_url: url.clone(),
                            status: status::PRESENT_SUCCESS.to_string(),
                        };
                        return (outcome, true);
                    }
                }
            }
            let score = extraction.score;
            if best
                .as_ref()
                .map_or(true, |(_, best_score, _)| score > *best_score)
            {
                best = Some((extraction.record, score, url.clone()));
            }
        }

        let (record, url) = match best {
            Some((record, _, url)) => (record, url),
            None => {
                let url = candidates.first().cloned().unwrap_or_default();
                let record = FieldRecord::empty_for_url(&url, status::PRESENT_REQUEST_FAILED);
                (record, url)
            }
        };
        let status = if !any_rendered {
            status::PRESENT_REQUEST_FAILED
        } else if let Some(marker) = marker {
            marker
        } else {
            status::PRESENT_INSUFFICIENT
        };
        let outcome = ResolutionOutcome {
            record,
            archive_timestamp: scraped_at,
            query_url: url.clone(),
            campaign_url: url,
            status: status.to_string(),
        };
        (outcome, false)
    }

    async fn try_archive(&self, queries: &[String]) -> ResolutionOutcome {
        match self.archive_walk(queries).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, "archive phase failed");
                let url = queries.first().cloned().unwrap_or_default();
                ResolutionOutcome {
                    record: FieldRecord::empty_for_url(&url, &err.to_string()),
                    archive_timestamp: NO_TIMESTAMP.to_string(),
                    query_url: url.clone(),
                    campaign_url: url,
                    status: status::WAYBACK_FAILED.to_string(),
                }
            }
        }
    }

    /// Walks the archive's captures newest-first, stopping at the first
    /// snapshot that clears the archive quality threshold. When nothing
    /// succeeds, the best losing attempt is picked by status precedence:
    /// inactive beats insufficient beats whatever came first.
    async fn archive_walk(&self, queries: &[String]) -> anyhow::Result<ResolutionOutcome> {
        let mut raw = Vec::new();
        for query in queries {
            debug!(query, "searching archive index");
            raw.extend(self.archive.search(query).await);
        }
        // Re-clean after concatenation so captures returned by multiple
        // queries collapse to one entry, newest first. Cleaning can drop
        // every capture (excluded subdomains, unusable originals); that
        // counts as the archive knowing nothing about the URL.
        let captures = clean_captures(raw);
        if captures.is_empty() {
            let url = queries.first().cloned().unwrap_or_default();
            return Ok(ResolutionOutcome {
                record: FieldRecord::empty_for_url(&url, status::WAYBACK_NO_ARCHIVES),
                archive_timestamp: NO_TIMESTAMP.to_string(),
                query_url: url.clone(),
                campaign_url: url,
                status: status::WAYBACK_NO_ARCHIVES.to_string(),
            });
        }
        let mut attempts: Vec<Attempt> = Vec::new();
        for capture in captures.iter().take(self.max_snapshots) {
            let fetch_url = snapshot_url(capture);
            debug!(timestamp = %capture.timestamp, "rendering snapshot");
            let Some(page) = self.renderer.render(&fetch_url).await else {
                warn!(url = fetch_url, "snapshot render failed");
                attempts.push(Attempt {
                    record: FieldRecord::empty_for_url(&fetch_url, status::WAYBACK_REQUEST_FAILED),
                    status: status::WAYBACK_REQUEST_FAILED,
                    timestamp: capture.timestamp.clone(),
                    query_url: fetch_url,
                    campaign_url: capture.original.clone(),
                });
                continue;
            };
            let extraction =
                best_extraction(&page.body, &page.url, &self.archive_extractors, &self.weights);
            let attempt_status = match extraction.classification {
                Classification::Inactive => status::WAYBACK_INACTIVE,
                Classification::NotFound => status::WAYBACK_NOT_FOUND,
                Classification::Content if extraction.score >= self.archive_threshold => {
                    status::WAYBACK_SUCCESS
                }
                Classification::Content => status::WAYBACK_INSUFFICIENT,
            };
            let done = attempt_status == status::WAYBACK_SUCCESS;
            attempts.push(Attempt {
                record: extraction.record,
                status: attempt_status,
                timestamp: capture.timestamp.clone(),
                query_url: fetch_url,
                campaign_url: capture.original.clone(),
            });
            if done {
                info!(timestamp = %capture.timestamp, "archive scrape succeeded");
                break;
            }
        }

        let chosen = [
            status::WAYBACK_SUCCESS,
            status::WAYBACK_INACTIVE,
            status::WAYBACK_INSUFFICIENT,
        ]
        .iter()
        .find_map(|wanted| attempts.iter().find(|a| a.status == *wanted))
        .or_else(|| attempts.first())
        .context("archive walk recorded no attempts")?;

        Ok(ResolutionOutcome {
            record: chosen.record.clone(),
            archive_timestamp: chosen.timestamp.clone(),
            query_url: chosen.query_url.clone(),
            campaign_url: chosen.campaign_url.clone(),
            status: chosen.status.to_string(),
        })
    }
}

struct Attempt {
    record: FieldRecord,
    status: &'static str,
    timestamp: String,
    query_url: String,
    campaign_url: String,
}

/// Combines the live and archive outcomes for one row. The archive record
/// wins whenever the walk produced usable content (success, inactive, or
/// scraped-but-insufficient); otherwise the live record is kept. The status
/// column always carries both phases, joined with " ; ".
pub fn merge_outcomes(live: ResolutionOutcome, archive: ResolutionOutcome) -> ResolutionOutcome {
    let status = format!("{} ; {}", live.status, archive.status);
    let take_archive = matches!(
        archive.status.as_str(),
        status::WAYBACK_SUCCESS | status::WAYBACK_INACTIVE | status::WAYBACK_INSUFFICIENT
    );
    let mut merged = if take_archive { archive } else { live };
    merged.status = status;
    merged
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

const PARTITION_PREFIX: &str = "master_scraped_output_i";
const PARTITION_SUFFIX: &str = ".csv";

pub fn partition_floor(index: usize, threshold: usize) -> usize {
    (index / threshold) * threshold
}

pub fn partition_filename(floor: usize) -> String {
    format!("{PARTITION_PREFIX}{floor}{PARTITION_SUFFIX}")
}

pub fn parse_partition_number(name: &str) -> Option<usize> {
    name.strip_prefix(PARTITION_PREFIX)?
        .strip_suffix(PARTITION_SUFFIX)?
        .parse()
        .ok()
}

/// Appends outcome rows to per-partition CSV files. A partition holds
/// `threshold` consecutive rows; the file for floor F is created with a
/// header when row F itself is written, and opened in append mode when a
/// resumed run lands mid-partition. Every row is flushed immediately so an
/// interrupted run loses nothing already written.
pub struct LedgerWriter {
    dir: PathBuf,
    threshold: usize,
    open: Option<OpenPartition>,
}

struct OpenPartition {
    floor: usize,
    writer: csv::Writer<File>,
}

impl LedgerWriter {
    pub fn new(dir: PathBuf, threshold: usize) -> Self {
        Self {
            dir,
            threshold,
            open: None,
        }
    }

    pub fn append(&mut self, index: usize, outcome: &ResolutionOutcome) -> anyhow::Result<()> {
        let floor = partition_floor(index, self.threshold);
        if self.open.as_ref().map_or(true, |p| p.floor != floor) {
            self.close()?;
            let path = self.dir.join(partition_filename(floor));
            let writer = if index % self.threshold == 0 {
                info!(path = %path.display(), "starting new ledger partition");
                let file = File::create(&path)
                    .with_context(|| format!("creating {}", path.display()))?;
                let mut writer = csv::Writer::from_writer(file);
                writer.write_record(ResolutionOutcome::header())?;
                writer
            } else {
                info!(path = %path.display(), "appending to ledger partition");
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .with_context(|| format!("opening {} for append", path.display()))?;
                csv::Writer::from_writer(file)
            };
            self.open = Some(OpenPartition { floor, writer });
        }
        let open = self.open.as_mut().context("no open partition")?;
        open.writer.write_record(outcome.to_row())?;
        open.writer.flush()?;
        Ok(())
    }

    pub fn close(&mut self) -> anyhow::Result<()> {
        if let Some(mut open) = self.open.take() {
            open.writer.flush()?;
        }
        Ok(())
    }
}

/// Highest-numbered partition file in `dir`, if any.
pub fn latest_partition(dir: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            parse_partition_number(&name).map(|n| (n, entry.path()))
        })
        .max_by_key(|(n, _)| *n)
        .map(|(_, path)| path)
}

/// Campaign URL recorded in the last row of a partition file. Partitions
/// opened mid-run may lack a header, so rows are read positionally.
pub fn last_campaign_url(path: &Path) -> anyhow::Result<String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let mut last: Option<csv::StringRecord> = None;
    for record in reader.records() {
        last = Some(record?);
    }
    let record = last.with_context(|| format!("{} holds no rows", path.display()))?;
    let gfm_url_index = ResolutionOutcome::header().len() - 2;
    let url = record
        .get(gfm_url_index)
        .with_context(|| format!("last row of {} is too short", path.display()))?;
    Ok(url.to_string())
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Owns a validated configuration, the loaded input table, the resolver,
/// and the ledger. `deploy` walks the table sequentially from the starting
/// row and writes one outcome per input row, in input order.
pub struct RunController {
    config: RunConfig,
    targets: Vec<TargetIdentifier>,
    resolver: Resolver,
    ledger: LedgerWriter,
    run_id: Uuid,
}

impl RunController {
    pub fn new(
        config: RunConfig,
        renderer: Box<dyn Renderer>,
        archive: Box<dyn ArchiveSearch>,
    ) -> Result<Self, ConfigError> {
        if !config.table_path.exists() {
            return Err(ConfigError::TableMissing(config.table_path.clone()));
        }
        if !config.table_path.is_file() {
            return Err(ConfigError::TableNotFile(config.table_path.clone()));
        }
        if !config.out_dir.exists() {
            let parent_exists = config
                .out_dir
                .parent()
                .map_or(false, |parent| parent.as_os_str().is_empty() || parent.exists());
            if !parent_exists {
                return Err(ConfigError::OutputDirUnusable(config.out_dir.clone()));
            }
            warn!(dir = %config.out_dir.display(), "output directory missing, creating it");
            fs::create_dir(&config.out_dir).map_err(|source| ConfigError::OutputDirCreate {
                dir: config.out_dir.clone(),
                source,
            })?;
        }
        let targets = load_targets(&config.table_path, &config.columns)?;
        info!(rows = targets.len(), table = %config.table_path.display(), "input table loaded");
        let resolver = Resolver::new(renderer, archive, &config);
        let ledger = LedgerWriter::new(config.out_dir.clone(), config.partition_rows);
        Ok(Self {
            config,
            targets,
            resolver,
            ledger,
            run_id: Uuid::new_v4(),
        })
    }

    pub fn targets(&self) -> &[TargetIdentifier] {
        &self.targets
    }

    pub async fn deploy(&mut self, mode: StartMode) -> anyhow::Result<RunSummary> {
        let start = self.start_index(&mode)?;
        let run_id = self.run_id;
        let span = info_span!("scrape_run", %run_id, start);
        async {
            info!(rows = self.targets.len() - start, "run starting");
            for index in start..self.targets.len() {
                let target = self.targets[index].clone();
                let outcome = self.resolver.resolve(&target).await;
                info!(index, url = %target.url, status = %outcome.status, "row resolved");
                self.ledger.append(index, &outcome)?;
            }
            self.ledger.close()?;
            info!("run finished");
            Ok(RunSummary {
                run_id,
                started_at_index: start,
                rows_processed: self.targets.len() - start,
            })
        }
        .instrument(span)
        .await
    }

    fn start_index(&self, mode: &StartMode) -> Result<usize, ConfigError> {
        match mode {
            StartMode::Beginning => Ok(0),
            StartMode::StartIndex(index) => {
                if *index > self.targets.len() {
                    return Err(ConfigError::IndexOutOfRange {
                        index: *index,
                        rows: self.targets.len(),
                    });
                }
                Ok(*index)
            }
            StartMode::StartCampaign(id) => self
                .targets
                .iter()
                .position(|t| t.campaign_id.as_deref() == Some(id.as_str()))
                .ok_or_else(|| ConfigError::ResumeTargetNotFound(id.clone())),
            StartMode::Resume => self.resume_index(),
        }
    }

    /// Finds the row after the last one written to the newest partition.
    /// The recorded campaign URL is matched against the table's id columns
    /// first and its URL columns second, case-insensitively.
    fn resume_index(&self) -> Result<usize, ConfigError> {
        let path = latest_partition(&self.config.out_dir)
            .ok_or_else(|| ConfigError::NoPartitions(self.config.out_dir.clone()))?;
        let last_url = last_campaign_url(&path)
            .map_err(|err| ConfigError::PartitionUnreadable {
                path: path.clone(),
                message: err.to_string(),
            })?
            .to_lowercase();
        let last_id = clean_campaign_id(&campaign_id_from_url(&last_url)).to_lowercase();
        info!(partition = %path.display(), campaign = %last_id, "resuming after last recorded row");

        let matches_id = |field: &Option<String>| {
            field
                .as_deref()
                .map_or(false, |value| value.to_lowercase() == last_id)
        };
        let matches_url = |field: &Option<String>| {
            field
                .as_deref()
                .map_or(false, |value| value.to_lowercase() == last_url)
        };
        let found = self
            .targets
            .iter()
            .position(|t| matches_id(&t.campaign_id))
            .or_else(|| {
                self.targets
                    .iter()
                    .position(|t| matches_id(&t.secondary_campaign_id))
            })
            .or_else(|| {
                self.targets
                    .iter()
                    .position(|t| matches_url(&t.secondary_url))
            })
            .or_else(|| {
                self.targets
                    .iter()
                    .position(|t| t.url.to_lowercase() == last_url)
            });
        match found {
            Some(index) => Ok(index + 1),
            None => Err(ConfigError::ResumeTargetNotFound(last_id)),
        }
    }
}

/// Loads the input table into one identifier per row. Cells holding the
/// empty string are treated as absent.
pub fn load_targets(
    path: &Path,
    columns: &ColumnNames,
) -> Result<Vec<TargetIdentifier>, ConfigError> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let position = |name: &str| headers.iter().position(|h| h == name);
    let url_index = position(&columns.url)
        .ok_or_else(|| ConfigError::MissingColumn(columns.url.clone()))?;
    let optional = |name: &Option<String>| {
        let index = name.as_deref().and_then(position);
        if let (Some(name), None) = (name.as_deref(), index) {
            debug!(column = name, "optional column not in table, skipping");
        }
        index
    };
    let secondary_url_index = optional(&columns.secondary_url);
    let id_index = optional(&columns.campaign_id);
    let secondary_id_index = optional(&columns.secondary_campaign_id);

    let cell = |record: &csv::StringRecord, index: Option<usize>| {
        index
            .and_then(|i| record.get(i))
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };
    let mut targets = Vec::new();
    for record in reader.records() {
        let record = record?;
        let url = record.get(url_index).unwrap_or_default().to_string();
        targets.push(TargetIdentifier {
            url,
            secondary_url: cell(&record, secondary_url_index),
            campaign_id: cell(&record, id_index),
            secondary_campaign_id: cell(&record, secondary_id_index),
        });
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gfms_core::NONE_VALUE;

    fn outcome(url: &str, status: &str) -> ResolutionOutcome {
        ResolutionOutcome {
            record: FieldRecord::empty_for_url(url, NONE_VALUE),
            archive_timestamp: "20190101000000".to_string(),
            query_url: url.to_string(),
            campaign_url: url.to_string(),
            status: status.to_string(),
        }
    }

    #[test]
    fn partition_floor_rounds_down() {
        assert_eq!(partition_floor(0, 10_000), 0);
        assert_eq!(partition_floor(9_999, 10_000), 0);
        assert_eq!(partition_floor(10_000, 10_000), 10_000);
        assert_eq!(partition_floor(25_001, 10_000), 20_000);
    }

    #[test]
    fn partition_names_round_trip() {
        let name = partition_filename(20_000);
        assert_eq!(name, "master_scraped_output_i20000.csv");
        assert_eq!(parse_partition_number(&name), Some(20_000));
        assert_eq!(parse_partition_number("notes.csv"), None);
        assert_eq!(parse_partition_number("master_scraped_output_ix.csv"), None);
    }

    #[test]
    fn ledger_rotates_at_partition_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = LedgerWriter::new(dir.path().to_path_buf(), 100);
        ledger
            .append(99, &outcome("http://www.gofundme.com/a", status::PRESENT_SUCCESS))
            .unwrap();
        ledger
            .append(100, &outcome("http://www.gofundme.com/b", status::PRESENT_SUCCESS))
            .unwrap();
        ledger.close().unwrap();

        let first = dir.path().join("master_scraped_output_i0.csv");
        let second = dir.path().join("master_scraped_output_i100.csv");
        assert!(first.exists());
        assert!(second.exists());
        // Row 99 landed mid-partition, so its file has no header row.
        let first_body = fs::read_to_string(&first).unwrap();
        assert!(first_body.starts_with("http://www.gofundme.com/a"));
        // Row 100 opened its partition, so the header comes first.
        let second_body = fs::read_to_string(&second).unwrap();
        assert!(second_body.starts_with("url,"));
        assert!(second_body.contains("http://www.gofundme.com/b"));
    }

    #[test]
    fn latest_partition_picks_highest_number() {
        let dir = tempfile::tempdir().unwrap();
        for floor in [0usize, 10_000, 90_000, 100_000] {
            fs::write(dir.path().join(partition_filename(floor)), "x\n").unwrap();
        }
        fs::write(dir.path().join("notes.txt"), "x\n").unwrap();
        let latest = latest_partition(dir.path()).unwrap();
        assert_eq!(
            latest.file_name().unwrap().to_string_lossy(),
            "master_scraped_output_i100000.csv"
        );
    }

    #[test]
    fn last_campaign_url_reads_final_row() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = LedgerWriter::new(dir.path().to_path_buf(), 100);
        ledger
            .append(0, &outcome("http://www.gofundme.com/first", status::PRESENT_SUCCESS))
            .unwrap();
        ledger
            .append(1, &outcome("http://www.gofundme.com/second", status::PRESENT_SUCCESS))
            .unwrap();
        ledger.close().unwrap();

        let path = dir.path().join(partition_filename(0));
        assert_eq!(
            last_campaign_url(&path).unwrap(),
            "http://www.gofundme.com/second"
        );
    }

    #[test]
    fn merge_prefers_archive_content() {
        let live = outcome("http://www.gofundme.com/a", status::PRESENT_INSUFFICIENT);
        let archive = outcome("http://web.archive.org/web/x", status::WAYBACK_SUCCESS);
        let merged = merge_outcomes(live, archive);
        assert_eq!(merged.campaign_url, "http://web.archive.org/web/x");
        assert_eq!(
            merged.status,
            "present: scraped but did not meet success criteria ; wayback: success"
        );
    }

    #[test]
    fn merge_keeps_live_when_archive_empty_handed() {
        let live = outcome("http://www.gofundme.com/a", status::PRESENT_NOT_FOUND);
        let archive = outcome("gofundme.com/a", status::WAYBACK_NO_ARCHIVES);
        let merged = merge_outcomes(live, archive);
        assert_eq!(merged.campaign_url, "http://www.gofundme.com/a");
        assert_eq!(
            merged.status,
            "present: campaign not found ; wayback: url not found in archives"
        );
    }

    #[test]
    fn merge_takes_inactive_archive_record() {
        let live = outcome("http://www.gofundme.com/a", status::PRESENT_REQUEST_FAILED);
        let archive = outcome("http://web.archive.org/web/y", status::WAYBACK_INACTIVE);
        let merged = merge_outcomes(live, archive);
        assert_eq!(merged.campaign_url, "http://web.archive.org/web/y");
    }

    #[test]
    fn load_targets_requires_url_column() {
        let dir = tempfile::tempdir().unwrap();
        let table = dir.path().join("input.csv");
        fs::write(&table, "other\nvalue\n").unwrap();
        let err = load_targets(&table, &ColumnNames::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingColumn(ref c) if c == "cleaned_url"));
    }

    #[test]
    fn load_targets_degrades_without_optional_columns() {
        let dir = tempfile::tempdir().unwrap();
        let table = dir.path().join("input.csv");
        fs::write(
            &table,
            "cleaned_url\nhttp://www.gofundme.com/abc\nhttp://www.gofundme.com/def\n",
        )
        .unwrap();
        let targets = load_targets(&table, &ColumnNames::default()).unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].url, "http://www.gofundme.com/abc");
        assert!(targets[0].campaign_id.is_none());
        assert!(targets[0].secondary_url.is_none());
    }

    #[test]
    fn load_targets_keeps_every_row() {
        let dir = tempfile::tempdir().unwrap();
        let table = dir.path().join("input.csv");
        fs::write(
            &table,
            "cleaned_url,cleaned_campaign_id\n\
             http://www.gofundme.com/abc,abc\n\
             http://www.gofundme.com/abc,abc\n\
             http://www.gofundme.com/def,def\n",
        )
        .unwrap();
        let targets = load_targets(&table, &ColumnNames::default()).unwrap();
        assert_eq!(targets.len(), 3);
        assert_eq!(targets[2].campaign_id.as_deref(), Some("def"));
    }
}
