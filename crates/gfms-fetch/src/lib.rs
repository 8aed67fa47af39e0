//! Network edge: page rendering, archive (CDX) search, and URL derivation.
//!
//! Both network clients retry internally with a fixed sleep and surface
//! exhaustion as `None` / an empty capture list, never as an error. Callers
//! see every failure as an outcome, not an exception.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use percent_encoding::percent_decode_str;
use tracing::{info, info_span, warn, Instrument};
use url::Url;

use gfms_core::{Capture, TargetIdentifier};

pub const CRATE_NAME: &str = "gfms-fetch";

/// Campaign site host used in id-to-URL templating and archive queries.
pub const CAMPAIGN_DOMAIN: &str = "gofundme.com";
pub const CAMPAIGN_URL_PREFIX: &str = "http://www.gofundme.com/";

/// CDX search endpoint of the web archive.
pub const CDX_ENDPOINT: &str = "http://web.archive.org/cdx/search/cdx";
/// URL scheme for fetching a concrete snapshot.
pub const SNAPSHOT_PREFIX: &str = "http://web.archive.org/web/";

/// Page-count estimate used when the live `showNumPages` query fails.
/// Retrieved once from a browser session against the domain query.
pub const FALLBACK_PAGE_ESTIMATE: usize = 1775;

/// Subdomains that never host campaign pages; captures under them are noise.
pub const EXCLUDED_SUBDOMAINS: [&str; 5] = [
    "images.gofundme.com",
    "support.gofundme.com",
    "developer.gofundme.com",
    "api.gofundme.com",
    "email.gofundme.com",
];

/// Bounded-attempt retry with a fixed sleep between attempts. No backoff or
/// jitter; the archive rate-limits on burst patterns, not totals.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub sleep: Duration,
}

impl RetryPolicy {
    pub fn renderer_default() -> Self {
        Self {
            max_attempts: 5,
            sleep: Duration::from_secs(30),
        }
    }

    pub fn archive_default() -> Self {
        Self {
            max_attempts: 10,
            sleep: Duration::from_secs(60),
        }
    }
}

/// A fully fetched document body plus the URL it finally resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    pub url: String,
    pub body: String,
}

/// Rendering capability: fetch a URL and return its document body, or `None`
/// after internal retries are exhausted.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, url: &str) -> Option<RenderedPage>;
}

#[derive(Debug, Clone)]
pub struct RendererConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub retry: RetryPolicy,
    /// Upper bound of the randomized pre-request delay. Zero disables it.
    pub max_jitter: Duration,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(150),
            user_agent: None,
            retry: RetryPolicy::renderer_default(),
            max_jitter: Duration::from_secs(10),
        }
    }
}

/// HTTP-backed renderer. Stands behind the same trait a browser-based
/// renderer would; exclusively owned and reused for the whole run.
#[derive(Debug)]
pub struct HttpRenderer {
    client: reqwest::Client,
    retry: RetryPolicy,
    max_jitter: Duration,
}

impl HttpRenderer {
    pub fn new(config: RendererConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            retry: config.retry,
            max_jitter: config.max_jitter,
        })
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    async fn render(&self, url: &str) -> Option<RenderedPage> {
        let span = info_span!("render", url);
        self.render_inner(url).instrument(span).await
    }
}

impl HttpRenderer {
    async fn render_inner(&self, url: &str) -> Option<RenderedPage> {
        // Small randomized delay keeps the request pattern irregular.
        let jitter_secs = self.max_jitter.as_secs();
        if jitter_secs > 0 {
            tokio::time::sleep(Duration::from_secs(fastrand::u64(0..=jitter_secs))).await;
        }

        for attempt in 0..self.retry.max_attempts {
            if attempt > 0 {
                info!(attempt = attempt + 1, "request retry");
            }
            match self.client.get(url).send().await {
                Ok(resp) => {
                    // Error pages are still content: the not-found and
                    // inactive markers live in rendered bodies.
                    let final_url = resp.url().to_string();
                    match resp.text().await {
                        Ok(body) => {
                            return Some(RenderedPage {
                                url: final_url,
                                body,
                            })
                        }
                        Err(err) => warn!(%err, "reading response body failed"),
                    }
                }
                Err(err) => warn!(%err, "request failed"),
            }
            if attempt + 1 < self.retry.max_attempts {
                info!(sleep_secs = self.retry.sleep.as_secs(), "sleeping before retry");
                tokio::time::sleep(self.retry.sleep).await;
            }
        }
        warn!(attempts = self.retry.max_attempts, "render failed after retries");
        None
    }
}

/// Archive lookup capability: all known captures of a URL, cleaned and
/// ordered newest-first. Empty on exhaustion, never an error.
#[async_trait]
pub trait ArchiveSearch: Send + Sync {
    async fn search(&self, url: &str) -> Vec<Capture>;
}

#[derive(Debug, Clone)]
pub struct CdxConfig {
    pub endpoint: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for CdxConfig {
    fn default() -> Self {
        Self {
            endpoint: CDX_ENDPOINT.to_string(),
            timeout: Duration::from_secs(150),
            retry: RetryPolicy::archive_default(),
        }
    }
}

/// Client for the time-indexed archive's CDX search API.
#[derive(Debug)]
pub struct CdxClient {
    client: reqwest::Client,
    endpoint: String,
    retry: RetryPolicy,
}

impl CdxClient {
    pub fn new(config: CdxConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .timeout(config.timeout)
            .build()
            .context("building reqwest client")?;
        Ok(Self {
            client,
            endpoint: config.endpoint,
            retry: config.retry,
        })
    }

    async fn query_once(&self, url: &str) -> anyhow::Result<Vec<Capture>> {
        let query = format!("{}?url={}&matchType=prefix&output=json", self.endpoint, url);
        info!(%query, "searching archive");
        let body = self
            .client
            .get(&query)
            .send()
            .await
            .context("sending CDX query")?
            .text()
            .await
            .context("reading CDX response")?;
        parse_cdx_body(&body)
    }

    /// Upper bound on the number of CDX pages for a full-domain enumeration.
    /// Falls back to a hardcoded estimate when the live query fails.
    pub async fn estimate_total_pages(&self) -> usize {
        let query = format!(
            "{}?url={}&matchType=domain&showNumPages=true",
            self.endpoint, CAMPAIGN_DOMAIN
        );
        let fetched = async {
            let text = self.client.get(&query).send().await?.text().await?;
            anyhow::Ok(text.trim().parse::<usize>()?)
        }
        .await;
        match fetched {
            Ok(pages) => pages,
            Err(err) => {
                warn!(%err, fallback = FALLBACK_PAGE_ESTIMATE, "page count query failed");
                FALLBACK_PAGE_ESTIMATE
            }
        }
    }
}

#[async_trait]
impl ArchiveSearch for CdxClient {
    async fn search(&self, url: &str) -> Vec<Capture> {
        for attempt in 0..self.retry.max_attempts {
            if attempt > 0 {
                info!(attempt = attempt + 1, "search retry");
            }
            match self.query_once(url).await {
                Ok(captures) => return clean_captures(captures),
                Err(err) => {
                    warn!(%err, "archive search failed");
                    if attempt + 1 < self.retry.max_attempts {
                        info!(sleep_secs = self.retry.sleep.as_secs(), "sleeping before retry");
                        tokio::time::sleep(self.retry.sleep).await;
                    }
                }
            }
        }
        warn!(attempts = self.retry.max_attempts, url, "search exhausted retries");
        Vec::new()
    }
}

/// Parse the CDX JSON table: an array of rows whose first row is the header
/// `urlkey, timestamp, original, mimetype, statuscode, digest, length`.
pub fn parse_cdx_body(body: &str) -> anyhow::Result<Vec<Capture>> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let rows: Vec<Vec<String>> = serde_json::from_str(trimmed).context("parsing CDX JSON table")?;
    let Some((header, data)) = rows.split_first() else {
        return Ok(Vec::new());
    };
    let position = |name: &str| {
        header
            .iter()
            .position(|h| h == name)
            .with_context(|| format!("CDX header missing column {name}"))
    };
    let i_timestamp = position("timestamp")?;
    let i_original = position("original")?;
    let i_statuscode = position("statuscode")?;
    let i_digest = position("digest")?;

    let mut captures = Vec::with_capacity(data.len());
    for row in data {
        let cell = |i: usize| row.get(i).cloned().unwrap_or_default();
        captures.push(Capture {
            timestamp: cell(i_timestamp),
            original: cell(i_original),
            statuscode: cell(i_statuscode),
            digest: cell(i_digest),
        });
    }
    Ok(captures)
}

fn decoded(part: &str) -> String {
    percent_decode_str(part).decode_utf8_lossy().into_owned()
}

/// Drop the default-port suffix some archive originals carry.
pub fn remove_port(url: &str) -> String {
    url.replace(":80", "")
}

/// Trailing path segment of a campaign URL, i.e. the campaign identifier.
pub fn campaign_id_from_url(url: &str) -> String {
    let without_fragment = url.split(['#', '?']).next().unwrap_or(url);
    without_fragment
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("")
        .to_string()
}

/// Normalize a campaign identifier scraped out of an archived URL: strip a
/// leading non-alphanumeric character (encoded or not), smuggled query
/// fragments (`&pc=...`), and a trailing period.
pub fn clean_campaign_id(id: &str) -> String {
    let mut cleaned = decoded(id);
    if let Some(pos) = cleaned.find('&') {
        cleaned.truncate(pos);
    }
    while cleaned
        .chars()
        .next()
        .is_some_and(|c| !(c.is_ascii_alphanumeric() || c == '-'))
    {
        cleaned.remove(0);
    }
    if cleaned.ends_with('.') {
        cleaned.pop();
    }
    cleaned
}

/// Apply the capture-cleaning invariant: strip ports, drop excluded
/// subdomains, keep one capture per (unquoted path, minimal unquoted query)
/// preferring the newest timestamp, de-duplicate by cleaned campaign id, and
/// order newest-first.
pub fn clean_captures(captures: Vec<Capture>) -> Vec<Capture> {
    struct Keyed {
        capture: Capture,
        path: String,
        query: String,
    }

    let mut keyed = Vec::with_capacity(captures.len());
    for mut capture in captures {
        capture.original = remove_port(&capture.original);
        let Ok(parsed) = Url::parse(&capture.original) else {
            continue;
        };
        let host = parsed.host_str().unwrap_or("").to_ascii_lowercase();
        if EXCLUDED_SUBDOMAINS.contains(&host.as_str()) {
            continue;
        }
        keyed.push(Keyed {
            path: decoded(parsed.path()),
            query: decoded(parsed.query().unwrap_or("")),
            capture,
        });
    }

    // Per path keep the lexically smallest query; among equals, the newest.
    let mut by_path: HashMap<String, Keyed> = HashMap::new();
    for entry in keyed {
        match by_path.get_mut(&entry.path) {
            Some(kept) => {
                let replace = entry.query < kept.query
                    || (entry.query == kept.query
                        && entry.capture.timestamp > kept.capture.timestamp);
                if replace {
                    *kept = entry;
                }
            }
            None => {
                by_path.insert(entry.path.clone(), entry);
            }
        }
    }

    let mut selected: Vec<Keyed> = by_path.into_values().collect();
    selected.sort_by(|a, b| b.capture.timestamp.cmp(&a.capture.timestamp));

    // Distinct raw paths can still collapse to the same cleaned identifier.
    let mut seen_ids = Vec::new();
    let mut out = Vec::with_capacity(selected.len());
    for entry in selected {
        let id = clean_campaign_id(&campaign_id_from_url(&entry.path));
        if id.is_empty() || seen_ids.contains(&id) {
            continue;
        }
        seen_ids.push(id);
        out.push(entry.capture);
    }
    out
}

/// Rewrite https to http; the archive indexes the http form of old pages.
pub fn normalize_scheme(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("http://{rest}")
    } else {
        url.to_string()
    }
}

/// Toggle the `/f/` redirect path segment: campaigns moved under `/f/` in
/// later site generations, so both forms are worth trying.
pub fn toggle_f_segment(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let path = parsed.path();
    let toggled_path = if let Some(rest) = path.strip_prefix("/f/") {
        format!("/{rest}")
    } else if path.len() > 1 {
        format!("/f{path}")
    } else {
        return None;
    };
    let mut toggled = parsed.clone();
    toggled.set_path(&toggled_path);
    Some(toggled.to_string())
}

fn push_unique(urls: &mut Vec<String>, url: String) {
    if !url.is_empty() && !urls.contains(&url) {
        urls.push(url);
    }
}

/// Expand a target into the ordered, de-duplicated candidate URL set: the
/// known URLs (with and without the `/f/` segment) followed by templated
/// forms of the campaign ids, all scheme-normalized to http.
pub fn candidate_urls(target: &TargetIdentifier) -> Vec<String> {
    let mut urls = Vec::new();
    let mut known = vec![target.url.clone()];
    if let Some(secondary) = &target.secondary_url {
        known.push(secondary.clone());
    }
    for raw in known {
        let base = normalize_scheme(raw.trim());
        if let Some(toggled) = toggle_f_segment(&base) {
            push_unique(&mut urls, base);
            push_unique(&mut urls, toggled);
        } else {
            push_unique(&mut urls, base);
        }
    }
    for id in [&target.campaign_id, &target.secondary_campaign_id]
        .into_iter()
        .flatten()
    {
        let id = id.trim();
        if id.is_empty() {
            continue;
        }
        push_unique(&mut urls, format!("{CAMPAIGN_URL_PREFIX}{id}"));
        push_unique(&mut urls, format!("{CAMPAIGN_URL_PREFIX}f/{id}"));
    }
    urls
}

/// Scheme- and host-stripped form used as the archive search term, e.g.
/// `gofundme.com/f/help-mia?lang=en`.
pub fn simplified_archive_query(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return format!("{CAMPAIGN_DOMAIN}{url}");
    };
    let mut simplified = format!("{}{}", CAMPAIGN_DOMAIN, parsed.path());
    if let Some(query) = parsed.query() {
        simplified.push('?');
        simplified.push_str(query);
    }
    if let Some(fragment) = parsed.fragment() {
        simplified.push('#');
        simplified.push_str(fragment);
    }
    simplified
}

/// Fetch URL for one capture: the timestamp and original URL embedded into
/// the archive's snapshot scheme.
pub fn snapshot_url(capture: &Capture) -> String {
    format!("{}{}/{}", SNAPSHOT_PREFIX, capture.timestamp, capture.original)
}

/// Inverse of [`snapshot_url`]: pull the timestamp back out of a fetch URL.
pub fn timestamp_from_snapshot_url(url: &str) -> Option<String> {
    let rest = url.strip_prefix(SNAPSHOT_PREFIX)?;
    let ts: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if ts.is_empty() {
        None
    } else {
        Some(ts)
    }
}
