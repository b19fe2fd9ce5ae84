//! The daily arrival queue.
//!
//! Each walk-in patient gets a sequence of the form `DDMMYYYY` + 4 digits,
//! numbered per day starting at `0001`. Sequences come from the atomic
//! counter in [`crate::sequence`], keyed on the entry's own date.

use crate::db::Database;
use crate::error::{LabError, LabResult};
use crate::models::{convert_rows, QueueCounts, QueueEntry, QueueEntryRow, QueueStatus};
use crate::sequence::{next_identifier, SequenceKind};
use chrono::NaiveDate;

const QUEUE_COLUMNS: &str = "id, patient_id, sequence, entry_date, status";

/// Service for arrival-queue entries.
#[derive(Clone, Debug)]
pub struct QueueService {
    db: Database,
}

impl QueueService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Adds a patient to the queue of `date`.
    ///
    /// With no explicit `sequence` the next number of that day is allocated.
    /// An explicit sequence must carry `date` as its prefix and not be in use.
    ///
    /// # Errors
    ///
    /// - `LabError::NotFound` if the patient does not exist.
    /// - `LabError::InvalidInput` for a malformed, foreign-day or taken sequence.
    /// - `LabError::SequenceExhausted` once a day passes 9999 entries.
    pub async fn add_entry(
        &self,
        patient_id: i64,
        date: NaiveDate,
        sequence: Option<String>,
    ) -> LabResult<QueueEntry> {
        let mut tx = self.db.pool().begin().await?;

        let patient: Option<i64> = sqlx::query_scalar("SELECT id FROM patients WHERE id = ?1")
            .bind(patient_id)
            .fetch_optional(&mut *tx)
            .await?;
        if patient.is_none() {
            return Err(LabError::not_found("patient", patient_id));
        }

        let sequence = match sequence {
            Some(explicit) => {
                let explicit = explicit.trim().to_string();
                let (prefix, _) = SequenceKind::Queue.parse(&explicit)?;
                if prefix != SequenceKind::Queue.partition(date) {
                    return Err(LabError::InvalidInput(format!(
                        "sequence {explicit} does not belong to {date}"
                    )));
                }
                let taken: Option<i64> =
                    sqlx::query_scalar("SELECT id FROM queue_entries WHERE sequence = ?1")
                        .bind(&explicit)
                        .fetch_optional(&mut *tx)
                        .await?;
                if taken.is_some() {
                    return Err(LabError::InvalidInput(format!(
                        "sequence {explicit} is already in use"
                    )));
                }
                explicit
            }
            None => next_identifier(&mut tx, SequenceKind::Queue, date).await?,
        };

        let id = sqlx::query(
            "INSERT INTO queue_entries (patient_id, sequence, entry_date, status)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(patient_id)
        .bind(&sequence)
        .bind(date)
        .bind(QueueStatus::Waiting.as_str())
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        tx.commit().await?;

        tracing::info!(queue_entry_id = id, patient_id, %sequence, "patient added to queue");
        self.get_entry(id).await
    }

    pub async fn get_entry(&self, id: i64) -> LabResult<QueueEntry> {
        let row: Option<QueueEntryRow> = sqlx::query_as(&format!(
            "SELECT {QUEUE_COLUMNS} FROM queue_entries WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;
        row.ok_or_else(|| LabError::not_found("queue entry", id))?
            .try_into()
    }

    /// Entries of one day in arrival order.
    pub async fn list_for_date(&self, date: NaiveDate) -> LabResult<Vec<QueueEntry>> {
        let rows: Vec<QueueEntryRow> = sqlx::query_as(&format!(
            "SELECT {QUEUE_COLUMNS} FROM queue_entries WHERE entry_date = ?1 ORDER BY sequence"
        ))
        .bind(date)
        .fetch_all(self.db.pool())
        .await?;
        convert_rows(rows)
    }

    /// Visit history of one patient, most recent first.
    pub async fn entries_for_patient(&self, patient_id: i64) -> LabResult<Vec<QueueEntry>> {
        let rows: Vec<QueueEntryRow> = sqlx::query_as(&format!(
            "SELECT {QUEUE_COLUMNS} FROM queue_entries
             WHERE patient_id = ?1
             ORDER BY entry_date DESC, sequence DESC"
        ))
        .bind(patient_id)
        .fetch_all(self.db.pool())
        .await?;
        convert_rows(rows)
    }

    pub async fn update_status(&self, id: i64, status: QueueStatus) -> LabResult<QueueEntry> {
        let affected = sqlx::query("UPDATE queue_entries SET status = ?1 WHERE id = ?2")
            .bind(status.as_str())
            .bind(id)
            .execute(self.db.pool())
            .await?
            .rows_affected();

        if affected == 0 {
            return Err(LabError::not_found("queue entry", id));
        }
        tracing::info!(queue_entry_id = id, %status, "queue entry status changed");
        self.get_entry(id).await
    }

    /// Waiting, served and total entry counts for the dashboard.
    pub async fn day_counts(&self, date: NaiveDate) -> LabResult<QueueCounts> {
        let (waiting, served, total): (i64, i64, i64) = sqlx::query_as(
            "SELECT COALESCE(SUM(status = ?2), 0),
                    COALESCE(SUM(status = ?3), 0),
                    COUNT(*)
             FROM queue_entries
             WHERE entry_date = ?1",
        )
        .bind(date)
        .bind(QueueStatus::Waiting.as_str())
        .bind(QueueStatus::Served.as_str())
        .fetch_one(self.db.pool())
        .await?;

        Ok(QueueCounts {
            waiting,
            served,
            total,
        })
    }
}
