//! Route handlers, one module per resource.

pub mod billing;
pub mod documents;
pub mod exams;
pub mod health;
pub mod orders;
pub mod patients;
pub mod queue;
pub mod search;

use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use utoipa::IntoParams;

/// `?date=YYYY-MM-DD`, defaulting to today (UTC).
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DateQuery {
    pub date: Option<NaiveDate>,
}

impl DateQuery {
    pub fn or_today(&self) -> NaiveDate {
        self.date.unwrap_or_else(today)
    }
}

pub(crate) fn today() -> NaiveDate {
    Utc::now().date_naive()
}
