//! # Lab Core
//!
//! Core business logic for the clinical laboratory backend.
//!
//! This crate owns every data operation of the lab:
//! - Patient registration and live search
//! - Exam templates with reference ranges, factor tables and expected values
//! - Cloning templates into per-visit exams with price snapshots
//! - Orders, billing totals and period aggregation
//! - The daily arrival queue and collision-free sequence numbers
//! - PDF labels, receipts and result reports
//!
//! **No API concerns**: HTTP servers and transport shapes belong in `api-rest`
//! and `api-shared`.

pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod models;
pub mod reports;
pub mod repositories;
pub mod sequence;
pub mod validation;

pub use config::CoreConfig;
pub use db::Database;
pub use error::{LabError, LabResult};
pub use lab_types::{Cpf, NonEmptyText};
pub use repositories::billing::{
    BillingFilter, BillingPeriod, BillingPeriodQuery, BillingService, BillingSummary, PeriodKind,
};
pub use repositories::exams::ExamService;
pub use repositories::orders::OrderService;
pub use repositories::patients::PatientService;
pub use repositories::queue::QueueService;
pub use reports::DocumentService;
pub use sequence::SequenceKind;
