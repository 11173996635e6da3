use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One extracted review. Created at most once per review id per session;
/// any field that could not be extracted stays `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub review_id: String,
    pub review_url: Option<String>,
    pub rating: Option<f64>,
    pub date: Option<DateTime<Utc>>,
    pub author: Option<String>,
    pub author_url: Option<String>,
    pub author_photo: Option<String>,
    pub is_local_guide: bool,
    pub text: Option<String>,
    pub photo_urls: Vec<String>,
    /// Best-effort match against an intercepted review-list payload.
    pub raw_payload: Option<serde_json::Value>,
}

impl Review {
    pub fn empty(review_id: impl Into<String>) -> Self {
        Self {
            review_id: review_id.into(),
            review_url: None,
            rating: None,
            date: None,
            author: None,
            author_url: None,
            author_photo: None,
            is_local_guide: false,
            text: None,
            photo_urls: Vec::new(),
            raw_payload: None,
        }
    }
}

/// Why the scroll controller stopped. Every variant still returns the
/// accumulated records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    IdleExhausted,
    RoundLimit,
    TargetReached,
    HardBudget,
    NoProgressBudget,
}

/// The outcome of one successful place session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceScrape {
    pub place_title_ui: Option<String>,
    pub place_url_ui: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub ui_total: Option<u64>,
    pub stop_reason: StopReason,
    pub reviews: Vec<Review>,
}
