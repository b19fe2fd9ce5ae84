//! Per-partition counters for arrival-queue sequences and exam codes.
//!
//! Both identifiers are a date prefix followed by a zero-padded counter:
//!
//! ```text
//! queue sequence   DDMMYYYY + 4 digits   e.g. 190320260007
//! exam code        MMYYYY   + 6 digits   e.g. 032026000042
//! ```
//!
//! Allocation is a single `INSERT .. ON CONFLICT DO UPDATE .. RETURNING`
//! against `sequence_counters`, so two writers for the same partition can
//! never observe the same value. The counter row is seeded from the highest
//! suffix already stored for the partition, which keeps rows inserted with an
//! explicit sequence in the numbering.

use crate::constants::{
    EXAM_CODE_COUNTER_DIGITS, EXAM_COUNTER_SCOPE, QUEUE_COUNTER_DIGITS, QUEUE_COUNTER_SCOPE,
};
use crate::{LabError, LabResult};
use chrono::{Datelike, NaiveDate};
use sqlx::SqliteConnection;

/// The two kinds of partitioned identifiers the lab hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceKind {
    /// Daily arrival-queue sequence.
    Queue,
    /// Monthly exam code.
    ExamCode,
}

impl SequenceKind {
    fn scope(self) -> &'static str {
        match self {
            Self::Queue => QUEUE_COUNTER_SCOPE,
            Self::ExamCode => EXAM_COUNTER_SCOPE,
        }
    }

    fn counter_digits(self) -> usize {
        match self {
            Self::Queue => QUEUE_COUNTER_DIGITS,
            Self::ExamCode => EXAM_CODE_COUNTER_DIGITS,
        }
    }

    fn max_counter(self) -> i64 {
        10_i64.pow(self.counter_digits() as u32) - 1
    }

    /// Date prefix for the partition containing `date`.
    pub fn partition(self, date: NaiveDate) -> String {
        match self {
            Self::Queue => format!("{:02}{:02}{:04}", date.day(), date.month(), date.year()),
            Self::ExamCode => format!("{:02}{:04}", date.month(), date.year()),
        }
    }

    /// Full identifier for `counter` within the partition of `date`.
    pub fn format(self, date: NaiveDate, counter: i64) -> LabResult<String> {
        let partition = self.partition(date);
        if counter < 1 || counter > self.max_counter() {
            return Err(LabError::SequenceExhausted { partition });
        }
        Ok(format!(
            "{partition}{counter:0width$}",
            width = self.counter_digits()
        ))
    }

    /// Splits an identifier into its date prefix and counter.
    ///
    /// The prefix must be a real calendar date (or month) and the suffix
    /// must be a positive counter of the expected width.
    pub fn parse(self, value: &str) -> LabResult<(String, i64)> {
        let prefix_len = match self {
            Self::Queue => 8,
            Self::ExamCode => 6,
        };
        let invalid = || LabError::InvalidInput(format!("malformed identifier {value:?}"));

        if value.len() != prefix_len + self.counter_digits()
            || !value.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }

        let (prefix, suffix) = value.split_at(prefix_len);
        let prefix_ok = match self {
            Self::Queue => NaiveDate::parse_from_str(prefix, "%d%m%Y").is_ok(),
            Self::ExamCode => NaiveDate::parse_from_str(&format!("01{prefix}"), "%d%m%Y").is_ok(),
        };
        let counter: i64 = suffix.parse().map_err(|_| invalid())?;
        if !prefix_ok || counter == 0 {
            return Err(invalid());
        }

        Ok((prefix.to_string(), counter))
    }

    fn seed_sql(self) -> &'static str {
        match self {
            Self::Queue => {
                "SELECT COALESCE(MAX(CAST(substr(sequence, 9) AS INTEGER)), 0) + 1
                 FROM queue_entries WHERE substr(sequence, 1, 8) = ?2"
            }
            Self::ExamCode => {
                "SELECT COALESCE(MAX(CAST(substr(code, 7) AS INTEGER)), 0) + 1
                 FROM exams WHERE substr(code, 1, 6) = ?2"
            }
        }
    }
}

/// Allocates the next identifier of `kind` for the partition containing `date`.
///
/// Runs on the caller's connection so the allocation commits or rolls back
/// with the row that uses it.
pub async fn next_identifier(
    conn: &mut SqliteConnection,
    kind: SequenceKind,
    date: NaiveDate,
) -> LabResult<String> {
    let partition = kind.partition(date);
    let query = format!(
        "INSERT INTO sequence_counters (scope, partition_key, last_value)
         VALUES (?1, ?2, ({seed}))
         ON CONFLICT (scope, partition_key) DO UPDATE
             SET last_value = MAX(sequence_counters.last_value + 1, excluded.last_value)
         RETURNING last_value",
        seed = kind.seed_sql()
    );

    let counter: i64 = sqlx::query_scalar(&query)
        .bind(kind.scope())
        .bind(&partition)
        .fetch_one(&mut *conn)
        .await?;

    tracing::debug!(scope = kind.scope(), %partition, counter, "allocated sequence value");
    kind.format(date, counter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::setup_test_db;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_format_pads_counters() {
        let date = day(2026, 3, 7);
        assert_eq!(SequenceKind::Queue.format(date, 1).unwrap(), "070320260001");
        assert_eq!(
            SequenceKind::ExamCode.format(date, 42).unwrap(),
            "032026000042"
        );
    }

    #[test]
    fn test_format_rejects_overflow() {
        let err = SequenceKind::Queue
            .format(day(2026, 3, 7), 10_000)
            .expect_err("counter beyond four digits must fail");
        assert!(matches!(err, LabError::SequenceExhausted { .. }));
    }

    #[test]
    fn test_parse_splits_prefix_and_counter() {
        assert_eq!(
            SequenceKind::Queue.parse("070320260037").unwrap(),
            ("07032026".to_string(), 37)
        );
        assert!(SequenceKind::Queue.parse("320320260001").is_err());
        assert!(SequenceKind::Queue.parse("07032026000").is_err());
        assert!(SequenceKind::Queue.parse("070320260000").is_err());
        assert!(SequenceKind::ExamCode.parse("132026000001").is_err());
    }

    #[tokio::test]
    async fn test_first_allocation_of_the_day_is_one() {
        let (db, _temp_dir) = setup_test_db().await;
        let mut conn = db.pool().acquire().await.unwrap();

        let first = next_identifier(&mut conn, SequenceKind::Queue, day(2026, 10, 19))
            .await
            .unwrap();
        let second = next_identifier(&mut conn, SequenceKind::Queue, day(2026, 10, 19))
            .await
            .unwrap();

        assert_eq!(first, "191020260001");
        assert_eq!(second, "191020260002");
    }

    #[tokio::test]
    async fn test_partitions_are_independent() {
        let (db, _temp_dir) = setup_test_db().await;
        let mut conn = db.pool().acquire().await.unwrap();

        next_identifier(&mut conn, SequenceKind::Queue, day(2026, 10, 19))
            .await
            .unwrap();
        let other_day = next_identifier(&mut conn, SequenceKind::Queue, day(2026, 10, 20))
            .await
            .unwrap();
        let exam_code = next_identifier(&mut conn, SequenceKind::ExamCode, day(2026, 10, 19))
            .await
            .unwrap();

        assert_eq!(other_day, "201020260001");
        assert_eq!(exam_code, "102026000001");
    }
}
