//! Page classification and per-layout field extraction.
//!
//! The campaign site changed markup several times over the years; each
//! generation gets its own [`Extractor`]. A field lookup that finds nothing
//! leaves the "none" sentinel in place — absence is not an error. The
//! resolver runs every applicable extractor against one rendered document
//! and keeps the highest-scoring record.

use scraper::{Html, Selector};

use gfms_core::{FieldRecord, ImportanceWeights};

pub const CRATE_NAME: &str = "gfms-extract";

/// Marker phrases for campaigns that stopped accepting donations.
const INACTIVE_MARKERS: [&str; 3] = [
    "campaign is complete and no longer active",
    "fundraiser is no longer accepting donations",
    "currently disabled new donations",
];

/// Marker phrase for removed campaigns.
const NOT_FOUND_MARKER: &str = "campaign not found";

/// What kind of page a rendered body turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Content,
    Inactive,
    NotFound,
}

/// Classify a rendered body by its marker phrases, case-insensitively.
/// Inactive wins over not-found when both somehow appear.
pub fn classify(body: &str) -> Classification {
    let lowered = body.to_lowercase();
    if INACTIVE_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        Classification::Inactive
    } else if lowered.contains(NOT_FOUND_MARKER) {
        Classification::NotFound
    } else {
        Classification::Content
    }
}

/// One page-layout generation's extraction capability.
pub trait Extractor: Send + Sync {
    /// Layout generation label, e.g. "2019".
    fn layout(&self) -> &'static str;

    fn extract(&self, document: &Html, url: &str) -> FieldRecord;
}

fn select_first_text(document: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    document
        .select(&sel)
        .next()
        .and_then(|node| text_or_none(node.text().collect::<String>()))
}

fn select_first_attr(document: &Html, selector: &str, attr: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    document
        .select(&sel)
        .next()
        .and_then(|node| node.value().attr(attr))
        .and_then(|value| text_or_none(value.to_string()))
}

fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn set_if_found(field: &mut String, value: Option<String>) {
    if let Some(value) = value {
        *field = value;
    }
}

/// Split a "City, ST" or "City, ST, Country" location string into the
/// record's location parts.
fn set_location_parts(record: &mut FieldRecord, location: Option<String>) {
    let Some(location) = location else {
        return;
    };
    let parts: Vec<&str> = location.split(',').map(str::trim).collect();
    match parts.as_slice() {
        [city] => record.location_city = city.to_string(),
        [city, state] => {
            record.location_city = city.to_string();
            record.location_stateprefix = state.to_string();
        }
        [city, state, country, ..] => {
            record.location_city = city.to_string();
            record.location_stateprefix = state.to_string();
            record.location_country = country.to_string();
        }
        [] => {}
    }
}

/// 2015-generation markup: the old `pg_msg` story block, `cbdate` creation
/// date, and the page `<title>` as the campaign title. Only seen on archived
/// snapshots.
#[derive(Debug, Clone, Copy)]
pub struct Layout2015;

impl Extractor for Layout2015 {
    fn layout(&self) -> &'static str {
        "2015"
    }

    fn extract(&self, document: &Html, url: &str) -> FieldRecord {
        let mut record = FieldRecord::default();
        record.url = url.to_string();
        set_if_found(&mut record.title, select_first_text(document, "head > title"));
        set_if_found(&mut record.story, select_first_text(document, r#"div[class*="pg_msg"]"#));
        set_if_found(
            &mut record.description,
            select_first_attr(document, r#"meta[name="description"]"#, "content"),
        );
        set_if_found(&mut record.goal, select_first_text(document, r#"div[class*="raised"]"#));
        set_if_found(
            &mut record.created_date,
            select_first_text(document, r#"div[class*="cbdate"]"#),
        );
        set_location_parts(&mut record, select_first_text(document, r#"a[class*="loc "]"#));
        set_if_found(&mut record.tag, select_first_text(document, r#"a[class="cat"]"#));
        set_if_found(&mut record.num_likes, select_first_text(document, r#"div[class*="fave-num"]"#));
        set_if_found(
            &mut record.num_shares,
            select_first_text(document, r#"div[id*="top-share-bar"]"#),
        );
        set_if_found(
            &mut record.last_donation_time,
            select_first_text(document, r#"div[class*="dtime"]"#),
        );
        record
    }
}

/// 2018-generation markup: sidebar progress block, heart/share counters.
#[derive(Debug, Clone, Copy)]
pub struct Layout2018;

impl Extractor for Layout2018 {
    fn layout(&self) -> &'static str {
        "2018"
    }

    fn extract(&self, document: &Html, url: &str) -> FieldRecord {
        let mut record = FieldRecord::default();
        record.url = url.to_string();
        set_if_found(&mut record.title, select_first_text(document, r#"h1[class*="campaign-title"]"#));
        set_if_found(&mut record.story, select_first_text(document, r#"div[class*="co-story"]"#));
        set_if_found(
            &mut record.description,
            select_first_attr(document, r#"meta[name="description"]"#, "content"),
        );
        set_if_found(&mut record.goal, select_first_text(document, r#"h2[class*="goal"]"#));
        set_if_found(
            &mut record.created_date,
            select_first_text(document, r#"div[class*="created-date"]"#),
        );
        set_location_parts(&mut record, select_first_text(document, r#"a[class*="location-name"]"#));
        set_if_found(&mut record.poster, select_first_text(document, r#"div[class*="campaign-organizer"]"#));
        set_if_found(&mut record.num_likes, select_first_text(document, r#"div[class*="fave-num"]"#));
        set_if_found(
            &mut record.num_shares,
            select_first_text(document, r#"strong[class*="share-count"]"#),
        );
        set_if_found(
            &mut record.last_donation_time,
            select_first_text(document, r#"div[class*="campaign-status"]"#),
        );
        set_if_found(
            &mut record.charity_details,
            select_first_text(document, r#"div[class*="charity-details"]"#),
        );
        record
    }
}

/// 2019-generation markup: `m-campaign-*` classes, byline block, meta
/// description.
#[derive(Debug, Clone, Copy)]
pub struct Layout2019;

impl Extractor for Layout2019 {
    fn layout(&self) -> &'static str {
        "2019"
    }

    fn extract(&self, document: &Html, url: &str) -> FieldRecord {
        let mut record = FieldRecord::default();
        record.url = url.to_string();
        set_if_found(&mut record.title, select_first_text(document, r#"h1[class*="campaign-title"]"#));
        set_if_found(&mut record.story, select_first_text(document, r#"div[class*="campaign-story"]"#));
        set_if_found(
            &mut record.description,
            select_first_attr(document, r#"meta[name="description"]"#, "content"),
        );
        let created = select_first_text(document, r#"span[class*="campaign-byline-created"]"#)
            .or_else(|| select_first_text(document, r#"span[class*="created-date"]"#));
        set_if_found(&mut record.created_date, created);
        set_if_found(
            &mut record.goal,
            select_first_text(document, r#"div[class*="campaign-sidebar-progress-meter"]"#),
        );
        set_if_found(&mut record.tag, select_first_text(document, r#"a[class*="campaign-byline-type"]"#));
        set_location_parts(
            &mut record,
            select_first_text(document, r#"div[class*="campaign-members-main-organizer"] div[class*="location"]"#)
                .or_else(|| select_first_text(document, r#"div[class*="campaign-location"]"#)),
        );
        set_if_found(
            &mut record.poster,
            select_first_text(document, r#"div[class*="campaign-members-main-organizer"] div[class*="name"]"#),
        );
        let stats = select_first_text(document, r#"div[class*="social-stats"] span[class*="likes"]"#);
        set_if_found(&mut record.num_likes, stats);
        set_if_found(
            &mut record.num_shares,
            select_first_text(document, r#"div[class*="social-stats"] span[class*="shares"]"#),
        );
        set_if_found(
            &mut record.num_donors,
            select_first_text(document, r#"span[class*="donation-count"]"#),
        );
        set_if_found(
            &mut record.last_update_time,
            select_first_text(document, r#"header[class*="update-info"]"#),
        );
        set_if_found(
            &mut record.charity_details,
            select_first_text(document, r#"div[class*="charity-details"]"#),
        );
        record
    }
}

/// Extractors worth running against a live page.
pub fn live_extractors() -> Vec<Box<dyn Extractor>> {
    vec![Box::new(Layout2018), Box::new(Layout2019)]
}

/// Extractors worth running against an archived snapshot; old snapshots can
/// carry any historical generation of the markup.
pub fn archive_extractors() -> Vec<Box<dyn Extractor>> {
    vec![Box::new(Layout2015), Box::new(Layout2018), Box::new(Layout2019)]
}

/// Best result of running a set of extractors over one rendered body.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub record: FieldRecord,
    pub score: u32,
    pub classification: Classification,
    pub layout: &'static str,
}

/// Parse the body once, run every extractor, keep the highest-scoring
/// record. The parsed document never leaves this function, so callers stay
/// `Send`.
pub fn best_extraction(
    body: &str,
    url: &str,
    extractors: &[Box<dyn Extractor>],
    weights: &ImportanceWeights,
) -> Extraction {
    let document = Html::parse_document(body);
    let classification = classify(body);

    let mut best: Option<(FieldRecord, u32, &'static str)> = None;
    for extractor in extractors {
        let record = extractor.extract(&document, url);
        let score = weights.score(&record);
        if best.as_ref().map_or(true, |(_, best_score, _)| score > *best_score) {
            best = Some((record, score, extractor.layout()));
        }
    }

    let (record, score, layout) = best.unwrap_or_else(|| {
        (FieldRecord::empty_for_url(url, "no extractors registered"), 0, "none")
    });
    Extraction {
        record,
        score,
        classification,
        layout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gfms_core::NONE_VALUE;

    const PAGE_2019: &str = r#"
        <html><head>
          <meta name="description" content="Help Mia cover treatment costs.">
        </head><body>
          <h1 class="a-campaign-title">Help Mia</h1>
          <span class="m-campaign-byline-created">Created March 2, 2019</span>
          <a class="m-campaign-byline-type">Medical</a>
          <div class="m-campaign-story">Mia needs our support after surgery.</div>
          <div class="m-campaign-sidebar-progress-meter">$1,250 raised of $5,000</div>
          <div class="campaign-members-main-organizer">
            <div class="m-person-name">Jordan Lee</div>
            <div class="m-person-location">Madison, WI</div>
          </div>
        </body></html>"#;

    const PAGE_2015: &str = r#"
        <html><head>
          <title>Mia's Medical Fund</title>
          <meta name="description" content="Raising money for Mia.">
        </head><body>
          <div class="pg_msg">Mia needs our support after surgery.</div>
          <div class="raised">$900 of $5,000</div>
          <div class="cbdate">Created on March 2, 2015</div>
          <a class="loc grey">Madison, WI</a>
          <a class="cat">Medical</a>
          <div class="fave-num">12</div>
          <div id="top-share-bar">88</div>
          <div class="dtime">3 days ago</div>
        </body></html>"#;

    #[test]
    fn content_page_classifies_as_content() {
        assert_eq!(classify(PAGE_2019), Classification::Content);
    }

    #[test]
    fn inactive_markers_classify_as_inactive() {
        let body = "<p>This Campaign is Complete and no longer active.</p>";
        assert_eq!(classify(body), Classification::Inactive);
        let body = "<p>This fundraiser is no longer accepting donations.</p>";
        assert_eq!(classify(body), Classification::Inactive);
        let body = "<p>We have currently disabled new donations to this campaign.</p>";
        assert_eq!(classify(body), Classification::Inactive);
    }

    #[test]
    fn not_found_marker_classifies_as_not_found() {
        let body = "<h2>Campaign Not Found</h2>";
        assert_eq!(classify(body), Classification::NotFound);
    }

    #[test]
    fn layout_2019_extracts_byline_fields() {
        let document = Html::parse_document(PAGE_2019);
        let record = Layout2019.extract(&document, "http://www.gofundme.com/f/help-mia");
        assert_eq!(record.url, "http://www.gofundme.com/f/help-mia");
        assert_eq!(record.title, "Help Mia");
        assert_eq!(record.created_date, "Created March 2, 2019");
        assert_eq!(record.tag, "Medical");
        assert_eq!(record.story, "Mia needs our support after surgery.");
        assert_eq!(record.goal, "$1,250 raised of $5,000");
        assert_eq!(record.location_city, "Madison");
        assert_eq!(record.location_stateprefix, "WI");
        assert_eq!(record.description, "Help Mia cover treatment costs.");
    }

    #[test]
    fn layout_2015_extracts_legacy_fields() {
        let document = Html::parse_document(PAGE_2015);
        let record = Layout2015.extract(&document, "http://www.gofundme.com/mias-fund");
        assert_eq!(record.title, "Mia's Medical Fund");
        assert_eq!(record.story, "Mia needs our support after surgery.");
        assert_eq!(record.goal, "$900 of $5,000");
        assert_eq!(record.created_date, "Created on March 2, 2015");
        assert_eq!(record.location_city, "Madison");
        assert_eq!(record.location_stateprefix, "WI");
        assert_eq!(record.tag, "Medical");
        assert_eq!(record.num_likes, "12");
        assert_eq!(record.num_shares, "88");
        assert_eq!(record.last_donation_time, "3 days ago");
    }

    #[test]
    fn archive_extraction_recognizes_legacy_markup() {
        let weights = ImportanceWeights::default();
        let extraction = best_extraction(
            PAGE_2015,
            "http://www.gofundme.com/mias-fund",
            &archive_extractors(),
            &weights,
        );
        assert_eq!(extraction.layout, "2015");
        assert_eq!(extraction.record.title, "Mia's Medical Fund");
    }

    #[test]
    fn missing_fields_keep_the_sentinel() {
        let document = Html::parse_document("<html><body><p>nothing here</p></body></html>");
        let record = Layout2019.extract(&document, "http://www.gofundme.com/x");
        assert_eq!(record.title, NONE_VALUE);
        assert_eq!(record.story, NONE_VALUE);
        assert_eq!(record.location_city, NONE_VALUE);
    }

    #[test]
    fn best_extraction_keeps_the_higher_scoring_layout() {
        let weights = ImportanceWeights::default();
        let extraction = best_extraction(
            PAGE_2019,
            "http://www.gofundme.com/f/help-mia",
            &archive_extractors(),
            &weights,
        );
        assert_eq!(extraction.layout, "2019");
        assert_eq!(extraction.classification, Classification::Content);
        assert!(extraction.score > 0);
        assert_eq!(extraction.record.title, "Help Mia");
    }

    #[test]
    fn three_part_locations_fill_country() {
        let mut record = FieldRecord::default();
        set_location_parts(&mut record, Some("Leeds, West Yorkshire, United Kingdom".to_string()));
        assert_eq!(record.location_city, "Leeds");
        assert_eq!(record.location_stateprefix, "West Yorkshire");
        assert_eq!(record.location_country, "United Kingdom");
    }
}
