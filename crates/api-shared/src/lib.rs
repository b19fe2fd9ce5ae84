//! # API Shared
//!
//! Transport shapes shared by the lab's API surfaces.
//!
//! Contains:
//! - `HealthService` and its response
//! - The live-search form and response used by the front-desk AJAX lookups
//!
//! Used by `api-rest`; holds no business logic.

pub mod health;

pub use health::{HealthRes, HealthService};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Form posted by the live-search boxes.
///
/// Only requests carrying `ajax_request=true` are answered; anything else
/// gets an empty object.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct SearchForm {
    #[serde(default)]
    pub ajax_request: Option<String>,
    /// The typed fragment.
    #[serde(default)]
    pub nomes: Option<String>,
}

impl SearchForm {
    pub fn is_ajax(&self) -> bool {
        self.ajax_request.as_deref() == Some("true")
    }

    pub fn fragment(&self) -> &str {
        self.nomes.as_deref().unwrap_or_default()
    }
}

/// Either the hits of a search or the message shown when there are none.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SearchData<T> {
    Matches(Vec<T>),
    Message(String),
}

/// Body of a live-search response: `{"data": ...}` or `{}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchRes<T> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<SearchData<T>>,
}

impl<T> SearchRes<T> {
    /// Response for requests that are not AJAX lookups.
    pub fn ignored() -> Self {
        Self { data: None }
    }

    /// Wraps `matches`, substituting `no_results` when the list is empty.
    pub fn from_matches(matches: Vec<T>, no_results: &str) -> Self {
        let data = if matches.is_empty() {
            SearchData::Message(no_results.to_string())
        } else {
            SearchData::Matches(matches)
        };
        Self { data: Some(data) }
    }
}
