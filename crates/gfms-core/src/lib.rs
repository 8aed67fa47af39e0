//! Core domain model for the campaign snapshot scraper.

use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "gfms-core";

/// Sentinel for "field not found on the page".
pub const NONE_VALUE: &str = "none";

/// Canonical column order shared by extractors, the scorer, and the ledger.
pub const FIELD_NAMES: [&str; 22] = [
    "url",
    "last_donation_time",
    "last_update_time",
    "created_date",
    "location_city",
    "location_country",
    "location_postalcode",
    "location_stateprefix",
    "description",
    "poster",
    "story",
    "title",
    "goal",
    "raised_amnt",
    "goal_amnt",
    "currency",
    "tag",
    "num_donors",
    "num_likes",
    "num_shares",
    "charity_details",
    "error_message",
];

/// Structured extraction result for one rendered page.
///
/// Every field is a string; the sentinel [`NONE_VALUE`] means
/// "not found". Field order mirrors [`FIELD_NAMES`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRecord {
    pub url: String,
    pub last_donation_time: String,
    pub last_update_time: String,
    pub created_date: String,
    pub location_city: String,
    pub location_country: String,
    pub location_postalcode: String,
    pub location_stateprefix: String,
    pub description: String,
    pub poster: String,
    pub story: String,
    pub title: String,
    pub goal: String,
    pub raised_amnt: String,
    pub goal_amnt: String,
    pub currency: String,
    pub tag: String,
    pub num_donors: String,
    pub num_likes: String,
    pub num_shares: String,
    pub charity_details: String,
    pub error_message: String,
}

impl Default for FieldRecord {
    fn default() -> Self {
        let none = || NONE_VALUE.to_string();
        Self {
            url: none(),
            last_donation_time: none(),
            last_update_time: none(),
            created_date: none(),
            location_city: none(),
            location_country: none(),
            location_postalcode: none(),
            location_stateprefix: none(),
            description: none(),
            poster: none(),
            story: none(),
            title: none(),
            goal: none(),
            raised_amnt: none(),
            goal_amnt: none(),
            currency: none(),
            tag: none(),
            num_donors: none(),
            num_likes: none(),
            num_shares: none(),
            charity_details: none(),
            error_message: none(),
        }
    }
}

impl FieldRecord {
    /// All-"none" record carrying only the attempted URL and an outcome
    /// message. Used whenever a page could not be fetched or parsed.
    pub fn empty_for_url(url: &str, message: &str) -> Self {
        Self {
            url: url.to_string(),
            error_message: message.to_string(),
            ..Self::default()
        }
    }

    /// Field values in [`FIELD_NAMES`] order.
    pub fn values(&self) -> [&str; 22] {
        [
            &self.url,
            &self.last_donation_time,
            &self.last_update_time,
            &self.created_date,
            &self.location_city,
            &self.location_country,
            &self.location_postalcode,
            &self.location_stateprefix,
            &self.description,
            &self.poster,
            &self.story,
            &self.title,
            &self.goal,
            &self.raised_amnt,
            &self.goal_amnt,
            &self.currency,
            &self.tag,
            &self.num_donors,
            &self.num_likes,
            &self.num_shares,
            &self.charity_details,
            &self.error_message,
        ]
    }

    pub fn fields(&self) -> impl Iterator<Item = (&'static str, &str)> {
        FIELD_NAMES.into_iter().zip(self.values())
    }
}

/// Fixed per-field importance weighting used to rank competing extraction
/// results from the *same* rendered page. Constructed once at startup and
/// passed explicitly; never mutated.
#[derive(Debug, Clone)]
pub struct ImportanceWeights {
    weights: Vec<(&'static str, u32)>,
}

impl Default for ImportanceWeights {
    fn default() -> Self {
        Self {
            weights: vec![
                ("url", 0),
                ("last_donation_time", 1),
                ("last_update_time", 1),
                ("created_date", 4),
                ("location_city", 4),
                ("location_country", 4),
                ("location_postalcode", 0),
                ("location_stateprefix", 1),
                ("description", 1),
                ("poster", 1),
                ("story", 4),
                ("title", 2),
                ("goal", 3),
                ("raised_amnt", 3),
                ("goal_amnt", 3),
                ("currency", 3),
                ("tag", 2),
                ("num_donors", 3),
                ("num_likes", 2),
                ("num_shares", 2),
                ("charity_details", 1),
                ("error_message", 0),
            ],
        }
    }
}

impl ImportanceWeights {
    pub fn weight_for(&self, field: &str) -> u32 {
        self.weights
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, w)| *w)
            .unwrap_or(0)
    }

    /// Completeness score: sum of weights over fields whose value is not
    /// the "none" sentinel.
    pub fn score(&self, record: &FieldRecord) -> u32 {
        record
            .fields()
            .filter(|(_, value)| *value != NONE_VALUE)
            .map(|(name, _)| self.weight_for(name))
            .sum()
    }
}

/// One campaign reference from a row of the input table. Immutable for the
/// duration of a resolution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetIdentifier {
    pub url: String,
    pub secondary_url: Option<String>,
    pub campaign_id: Option<String>,
    pub secondary_campaign_id: Option<String>,
}

impl TargetIdentifier {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            secondary_url: None,
            campaign_id: None,
            secondary_campaign_id: None,
        }
    }
}

/// A single historical archive record of a URL.
///
/// `timestamp` is the archive's canonical `YYYYMMDDhhmmss` form, which sorts
/// lexically in time order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capture {
    pub timestamp: String,
    pub original: String,
    pub statuscode: String,
    pub digest: String,
}

/// Metadata columns appended after the [`FIELD_NAMES`] columns in every
/// ledger row.
pub const METADATA_NAMES: [&str; 4] =
    ["archive_timestamp", "query_url", "gfm_url", "wayback_status"];

/// Final result of resolving one [`TargetIdentifier`]: extraction record plus
/// resolution metadata. Created once, appended to the ledger, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionOutcome {
    pub record: FieldRecord,
    /// Capture timestamp for archive results, wall clock for live results,
    /// "nat" when not applicable.
    pub archive_timestamp: String,
    /// URL actually fetched for the retained record.
    pub query_url: String,
    /// Best-known canonical campaign URL.
    pub campaign_url: String,
    /// Free-text outcome code, possibly "<live> ; <archive>".
    pub status: String,
}

impl ResolutionOutcome {
    pub fn header() -> Vec<&'static str> {
        FIELD_NAMES.iter().chain(METADATA_NAMES.iter()).copied().collect()
    }

    pub fn to_row(&self) -> Vec<String> {
        let mut row: Vec<String> = self.record.values().iter().map(|v| v.to_string()).collect();
        row.push(self.archive_timestamp.clone());
        row.push(self.query_url.clone());
        row.push(self.campaign_url.clone());
        row.push(self.status.clone());
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_none_record_scores_zero() {
        let weights = ImportanceWeights::default();
        assert_eq!(weights.score(&FieldRecord::default()), 0);
    }

    #[test]
    fn score_is_monotonic_in_populated_fields() {
        let weights = ImportanceWeights::default();
        let mut record = FieldRecord::default();
        let mut last = weights.score(&record);

        record.title = "Help Mia".to_string();
        let with_title = weights.score(&record);
        assert!(with_title >= last);
        assert_eq!(with_title, 2);
        last = with_title;

        record.story = "A long story".to_string();
        let with_story = weights.score(&record);
        assert!(with_story >= last);
        assert_eq!(with_story, 6);
    }

    #[test]
    fn zero_weight_fields_do_not_contribute() {
        let weights = ImportanceWeights::default();
        let record = FieldRecord::empty_for_url("http://www.gofundme.com/f/help-mia", "oops");
        // url and error_message both carry weight 0
        assert_eq!(weights.score(&record), 0);
    }

    #[test]
    fn unknown_fields_weigh_nothing() {
        let weights = ImportanceWeights::default();
        assert_eq!(weights.weight_for("not_a_field"), 0);
    }

    #[test]
    fn header_and_row_lengths_match() {
        let outcome = ResolutionOutcome {
            record: FieldRecord::default(),
            archive_timestamp: "nat".to_string(),
            query_url: "http://www.gofundme.com/x".to_string(),
            campaign_url: "http://www.gofundme.com/x".to_string(),
            status: "present: none".to_string(),
        };
        assert_eq!(ResolutionOutcome::header().len(), outcome.to_row().len());
        assert_eq!(ResolutionOutcome::header()[0], "url");
        assert_eq!(*ResolutionOutcome::header().last().unwrap(), "wayback_status");
    }

    #[test]
    fn values_follow_field_name_order() {
        let mut record = FieldRecord::default();
        record.created_date = "2019-01-01".to_string();
        let values = record.values();
        let idx = FIELD_NAMES.iter().position(|n| *n == "created_date").unwrap();
        assert_eq!(values[idx], "2019-01-01");
    }
}
