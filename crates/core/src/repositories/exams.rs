//! Exam templates, their reference trees, and the results workflow.
//!
//! ## Reference ranges
//!
//! A reference range uses exactly one of three sub-structures:
//! plain lower/upper bounds, a factor table, or an expected-value table
//! (factor and expected tables may coexist). The flags on the range are kept
//! in step with its child rows:
//!
//! - adding a factor (expected) entry sets `has_factor` (`has_expected`) and
//!   clears the plain bounds;
//! - deleting the last factor (expected) entry clears the flag again.
//!
//! ## Codes
//!
//! Every inserted exam receives a unique `MMYYYY` + 6-digit code from the
//! monthly counter in [`crate::sequence`].

use crate::db::Database;
use crate::error::{LabError, LabResult};
use crate::models::{
    convert_rows, price_to_db, Exam, ExamDetail, ExamDraft, ExamMatch, ExamRow, ExamStatus,
    ExpectedValue, FactorEntry, NewExpected, NewFactor, NewPlan, NewReference, PricingPlan,
    PricingPlanRow, ReferenceDetail, ReferenceRange, ResultEntry,
};
use crate::repositories::billing::refresh_total;
use crate::sequence::{next_identifier, SequenceKind};
use crate::validation::{search_pattern, validate_pdf_attachment, validate_price};
use chrono::{NaiveDate, Utc};
use sqlx::{SqliteConnection, SqliteExecutor};

pub(crate) const EXAM_COLUMNS: &str = "id, name, material, method, code, attachment, \
     technician_id, status, comment, outsourced, is_template, active, template_id, \
     created_at, updated_at";

// ============================================================================
// SHARED QUERIES
// ============================================================================

pub(crate) async fn fetch_exam<'e, E>(executor: E, id: i64) -> LabResult<Exam>
where
    E: SqliteExecutor<'e>,
{
    let row: Option<ExamRow> =
        sqlx::query_as(&format!("SELECT {EXAM_COLUMNS} FROM exams WHERE id = ?1"))
            .bind(id)
            .fetch_optional(executor)
            .await?;
    row.ok_or_else(|| LabError::not_found("exam", id))?
        .try_into()
}

/// Plans linked to an exam, lowest id first.
pub(crate) async fn fetch_plans<'e, E>(executor: E, exam_id: i64) -> LabResult<Vec<PricingPlan>>
where
    E: SqliteExecutor<'e>,
{
    let rows: Vec<PricingPlanRow> = sqlx::query_as(
        "SELECT p.id, p.name, p.price, p.enabled
         FROM pricing_plans p
         JOIN exam_plans ep ON ep.plan_id = p.id
         WHERE ep.exam_id = ?1
         ORDER BY p.id",
    )
    .bind(exam_id)
    .fetch_all(executor)
    .await?;
    convert_rows(rows)
}

async fn fetch_reference<'e, E>(executor: E, id: i64) -> LabResult<ReferenceRange>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query_as("SELECT * FROM reference_ranges WHERE id = ?1")
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| LabError::not_found("reference range", id))
}

/// Inserts an exam row with a freshly allocated code and returns its id.
pub(crate) async fn insert_exam(
    conn: &mut SqliteConnection,
    draft: &ExamFields<'_>,
) -> LabResult<i64> {
    let code = next_identifier(conn, SequenceKind::ExamCode, Utc::now().date_naive()).await?;

    let id = sqlx::query(
        "INSERT INTO exams (name, material, method, code, comment, outsourced, is_template, template_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )
    .bind(draft.name)
    .bind(draft.material)
    .bind(draft.method)
    .bind(&code)
    .bind(draft.comment)
    .bind(draft.outsourced)
    .bind(draft.template_id.is_none())
    .bind(draft.template_id)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    tracing::debug!(exam_id = id, %code, "exam inserted");
    Ok(id)
}

/// Column values for a new exam row; `template_id` is set for clones only.
pub(crate) struct ExamFields<'a> {
    pub name: &'a str,
    pub material: &'a str,
    pub method: &'a str,
    pub comment: Option<&'a str>,
    pub outsourced: bool,
    pub template_id: Option<i64>,
}

/// Inserts a plan row and links it to `exam_id`.
pub(crate) async fn insert_plan(
    conn: &mut SqliteConnection,
    exam_id: i64,
    name: &str,
    price_text: &str,
    enabled: bool,
) -> LabResult<i64> {
    let plan_id = sqlx::query("INSERT INTO pricing_plans (name, price, enabled) VALUES (?1, ?2, ?3)")
        .bind(name)
        .bind(price_text)
        .bind(enabled)
        .execute(&mut *conn)
        .await?
        .last_insert_rowid();

    sqlx::query("INSERT INTO exam_plans (exam_id, plan_id) VALUES (?1, ?2)")
        .bind(exam_id)
        .bind(plan_id)
        .execute(&mut *conn)
        .await?;

    Ok(plan_id)
}

// ============================================================================
// EXAM SERVICE
// ============================================================================

/// Service for exam definitions and their results.
#[derive(Clone, Debug)]
pub struct ExamService {
    db: Database,
}

impl ExamService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Creates a reusable exam template.
    ///
    /// # Errors
    ///
    /// Returns `LabError::SequenceExhausted` if the monthly code space is used up.
    pub async fn create_template(&self, draft: ExamDraft) -> LabResult<Exam> {
        let mut tx = self.db.pool().begin().await?;
        let id = insert_exam(
            &mut tx,
            &ExamFields {
                name: draft.name.as_str(),
                material: draft.material.as_str(),
                method: draft.method.as_str(),
                comment: draft.comment.as_deref(),
                outsourced: draft.outsourced,
                template_id: None,
            },
        )
        .await?;
        let exam = fetch_exam(&mut *tx, id).await?;
        tx.commit().await?;

        tracing::info!(exam_id = id, code = %exam.code, "exam template created");
        Ok(exam)
    }

    pub async fn get_exam(&self, id: i64) -> LabResult<Exam> {
        fetch_exam(self.db.pool(), id).await
    }

    pub async fn update_exam(&self, id: i64, draft: ExamDraft) -> LabResult<Exam> {
        let affected = sqlx::query(
            "UPDATE exams
             SET name = ?1, material = ?2, method = ?3, comment = ?4, outsourced = ?5,
                 updated_at = CURRENT_TIMESTAMP
             WHERE id = ?6",
        )
        .bind(draft.name.as_str())
        .bind(draft.material.as_str())
        .bind(draft.method.as_str())
        .bind(&draft.comment)
        .bind(draft.outsourced)
        .bind(id)
        .execute(self.db.pool())
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(LabError::not_found("exam", id));
        }
        self.get_exam(id).await
    }

    /// Loads an exam with its plans and full reference tree.
    pub async fn get_exam_detail(&self, id: i64) -> LabResult<ExamDetail> {
        let mut conn = self.db.pool().acquire().await?;
        let exam = fetch_exam(&mut *conn, id).await?;
        let plans = fetch_plans(&mut *conn, id).await?;

        let ranges: Vec<ReferenceRange> =
            sqlx::query_as("SELECT * FROM reference_ranges WHERE exam_id = ?1 ORDER BY id")
                .bind(id)
                .fetch_all(&mut *conn)
                .await?;

        let mut references = Vec::with_capacity(ranges.len());
        for reference in ranges {
            let factors: Vec<FactorEntry> =
                sqlx::query_as("SELECT * FROM factor_entries WHERE reference_id = ?1 ORDER BY id")
                    .bind(reference.id)
                    .fetch_all(&mut *conn)
                    .await?;
            let expected: Vec<ExpectedValue> =
                sqlx::query_as("SELECT * FROM expected_values WHERE reference_id = ?1 ORDER BY id")
                    .bind(reference.id)
                    .fetch_all(&mut *conn)
                    .await?;
            references.push(ReferenceDetail {
                kind: reference.kind(),
                reference,
                factors,
                expected,
            });
        }

        Ok(ExamDetail {
            exam,
            plans,
            references,
        })
    }

    /// Active templates ordered by name.
    pub async fn list_templates(&self) -> LabResult<Vec<Exam>> {
        self.list_where("is_template = 1 AND active = 1 ORDER BY name")
            .await
    }

    pub async fn deactivate_exam(&self, id: i64) -> LabResult<()> {
        let affected = sqlx::query(
            "UPDATE exams SET active = 0, updated_at = CURRENT_TIMESTAMP WHERE id = ?1",
        )
        .bind(id)
        .execute(self.db.pool())
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(LabError::not_found("exam", id));
        }
        tracing::info!(exam_id = id, "exam deactivated");
        Ok(())
    }

    /// Deletes an exam together with the plan rows it owns.
    ///
    /// Deleting an exam copy drops it from its order and recomputes the
    /// order's total in the same transaction.
    pub async fn delete_exam(&self, id: i64) -> LabResult<()> {
        let mut tx = self.db.pool().begin().await?;
        delete_exam_in(&mut tx, id).await?;
        tx.commit().await?;

        tracing::info!(exam_id = id, "exam deleted");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Plans
    // ------------------------------------------------------------------------

    pub async fn add_plan(&self, exam_id: i64, plan: NewPlan) -> LabResult<PricingPlan> {
        validate_price(plan.price)?;

        let mut tx = self.db.pool().begin().await?;
        fetch_exam(&mut *tx, exam_id).await?;
        let plan_id = insert_plan(
            &mut tx,
            exam_id,
            plan.name.as_str(),
            &price_to_db(plan.price),
            plan.enabled,
        )
        .await?;
        tx.commit().await?;

        self.get_plan(plan_id).await
    }

    pub async fn get_plan(&self, plan_id: i64) -> LabResult<PricingPlan> {
        let row: Option<PricingPlanRow> =
            sqlx::query_as("SELECT id, name, price, enabled FROM pricing_plans WHERE id = ?1")
                .bind(plan_id)
                .fetch_optional(self.db.pool())
                .await?;
        row.ok_or_else(|| LabError::not_found("pricing plan", plan_id))?
            .try_into()
    }

    /// Changes a plan in place. Clones own separate plan rows, so editing a
    /// template's plan leaves existing orders alone; editing a clone's plan
    /// recomputes the total of the order billing it.
    pub async fn update_plan(&self, plan_id: i64, plan: NewPlan) -> LabResult<PricingPlan> {
        validate_price(plan.price)?;

        let mut tx = self.db.pool().begin().await?;
        let affected =
            sqlx::query("UPDATE pricing_plans SET name = ?1, price = ?2, enabled = ?3 WHERE id = ?4")
                .bind(plan.name.as_str())
                .bind(price_to_db(plan.price))
                .bind(plan.enabled)
                .bind(plan_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();

        if affected == 0 {
            return Err(LabError::not_found("pricing plan", plan_id));
        }
        let orders = orders_billing_plan(&mut tx, plan_id).await?;
        refresh_orders(&mut tx, &orders).await?;
        tx.commit().await?;

        self.get_plan(plan_id).await
    }

    /// Deletes a plan.
    ///
    /// # Errors
    ///
    /// - `LabError::NotFound` if the plan does not exist.
    /// - `LabError::MissingPrice` if it is the last plan of an exam copy on
    ///   an order; nothing is deleted.
    pub async fn delete_plan(&self, plan_id: i64) -> LabResult<()> {
        let mut tx = self.db.pool().begin().await?;
        let orders = orders_billing_plan(&mut tx, plan_id).await?;
        let affected = sqlx::query("DELETE FROM pricing_plans WHERE id = ?1")
            .bind(plan_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if affected == 0 {
            return Err(LabError::not_found("pricing plan", plan_id));
        }
        refresh_orders(&mut tx, &orders).await?;
        tx.commit().await?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Reference ranges
    // ------------------------------------------------------------------------

    pub async fn add_reference(
        &self,
        exam_id: i64,
        reference: NewReference,
    ) -> LabResult<ReferenceRange> {
        fetch_exam(self.db.pool(), exam_id).await?;

        let id = sqlx::query(
            "INSERT INTO reference_ranges (exam_id, label, lower_bound, upper_bound)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(exam_id)
        .bind(reference.label.as_str())
        .bind(&reference.lower_bound)
        .bind(&reference.upper_bound)
        .execute(self.db.pool())
        .await?
        .last_insert_rowid();

        fetch_reference(self.db.pool(), id).await
    }

    /// Updates the label and, for plain ranges, the bounds.
    ///
    /// # Errors
    ///
    /// Returns `LabError::InvalidInput` when bounds are given for a range that
    /// uses a factor or expected-value table.
    pub async fn update_reference(
        &self,
        id: i64,
        reference: NewReference,
    ) -> LabResult<ReferenceRange> {
        let current = fetch_reference(self.db.pool(), id).await?;
        let has_bounds = reference.lower_bound.is_some() || reference.upper_bound.is_some();
        if (current.has_factor || current.has_expected) && has_bounds {
            return Err(LabError::InvalidInput(format!(
                "reference range {id} uses a factor or expected-value table and cannot hold plain bounds"
            )));
        }

        sqlx::query(
            "UPDATE reference_ranges SET label = ?1, lower_bound = ?2, upper_bound = ?3 WHERE id = ?4",
        )
        .bind(reference.label.as_str())
        .bind(&reference.lower_bound)
        .bind(&reference.upper_bound)
        .bind(id)
        .execute(self.db.pool())
        .await?;

        fetch_reference(self.db.pool(), id).await
    }

    pub async fn delete_reference(&self, id: i64) -> LabResult<()> {
        let affected = sqlx::query("DELETE FROM reference_ranges WHERE id = ?1")
            .bind(id)
            .execute(self.db.pool())
            .await?
            .rows_affected();

        if affected == 0 {
            return Err(LabError::not_found("reference range", id));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Factor tables
    // ------------------------------------------------------------------------

    /// Adds a factor row and switches the range to factor mode.
    pub async fn add_factor(&self, reference_id: i64, factor: NewFactor) -> LabResult<FactorEntry> {
        let mut tx = self.db.pool().begin().await?;
        fetch_reference(&mut *tx, reference_id).await?;

        let id = sqlx::query(
            "INSERT INTO factor_entries (reference_id, label, age_bracket, lower_bound, upper_bound)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(reference_id)
        .bind(&factor.label)
        .bind(&factor.age_bracket)
        .bind(&factor.lower_bound)
        .bind(&factor.upper_bound)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        sqlx::query(
            "UPDATE reference_ranges SET has_factor = 1, lower_bound = NULL, upper_bound = NULL
             WHERE id = ?1",
        )
        .bind(reference_id)
        .execute(&mut *tx)
        .await?;

        let entry = sqlx::query_as("SELECT * FROM factor_entries WHERE id = ?1")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(entry)
    }

    pub async fn update_factor(&self, id: i64, factor: NewFactor) -> LabResult<FactorEntry> {
        let affected = sqlx::query(
            "UPDATE factor_entries SET label = ?1, age_bracket = ?2, lower_bound = ?3, upper_bound = ?4
             WHERE id = ?5",
        )
        .bind(&factor.label)
        .bind(&factor.age_bracket)
        .bind(&factor.lower_bound)
        .bind(&factor.upper_bound)
        .bind(id)
        .execute(self.db.pool())
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(LabError::not_found("factor entry", id));
        }
        let entry = sqlx::query_as("SELECT * FROM factor_entries WHERE id = ?1")
            .bind(id)
            .fetch_one(self.db.pool())
            .await?;
        Ok(entry)
    }

    /// Removes a factor row; the range leaves factor mode with its last row.
    pub async fn delete_factor(&self, id: i64) -> LabResult<()> {
        let mut tx = self.db.pool().begin().await?;
        let reference_id: i64 =
            sqlx::query_scalar("SELECT reference_id FROM factor_entries WHERE id = ?1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| LabError::not_found("factor entry", id))?;

        sqlx::query("DELETE FROM factor_entries WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE reference_ranges SET has_factor = 0
             WHERE id = ?1 AND NOT EXISTS (SELECT 1 FROM factor_entries WHERE reference_id = ?1)",
        )
        .bind(reference_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Expected-value tables
    // ------------------------------------------------------------------------

    /// Adds an expected value and switches the range to expected mode.
    pub async fn add_expected(
        &self,
        reference_id: i64,
        expected: NewExpected,
    ) -> LabResult<ExpectedValue> {
        let mut tx = self.db.pool().begin().await?;
        fetch_reference(&mut *tx, reference_id).await?;

        let id = sqlx::query(
            "INSERT INTO expected_values (reference_id, value_type, expected_value)
             VALUES (?1, ?2, ?3)",
        )
        .bind(reference_id)
        .bind(expected.value_type.as_str())
        .bind(expected.expected_value.as_str())
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        sqlx::query(
            "UPDATE reference_ranges SET has_expected = 1, lower_bound = NULL, upper_bound = NULL
             WHERE id = ?1",
        )
        .bind(reference_id)
        .execute(&mut *tx)
        .await?;

        let entry = sqlx::query_as("SELECT * FROM expected_values WHERE id = ?1")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(entry)
    }

    pub async fn update_expected(&self, id: i64, expected: NewExpected) -> LabResult<ExpectedValue> {
        let affected = sqlx::query(
            "UPDATE expected_values SET value_type = ?1, expected_value = ?2 WHERE id = ?3",
        )
        .bind(expected.value_type.as_str())
        .bind(expected.expected_value.as_str())
        .bind(id)
        .execute(self.db.pool())
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(LabError::not_found("expected value", id));
        }
        let entry = sqlx::query_as("SELECT * FROM expected_values WHERE id = ?1")
            .bind(id)
            .fetch_one(self.db.pool())
            .await?;
        Ok(entry)
    }

    pub async fn delete_expected(&self, id: i64) -> LabResult<()> {
        let mut tx = self.db.pool().begin().await?;
        let reference_id: i64 =
            sqlx::query_scalar("SELECT reference_id FROM expected_values WHERE id = ?1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| LabError::not_found("expected value", id))?;

        sqlx::query("DELETE FROM expected_values WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE reference_ranges SET has_expected = 0
             WHERE id = ?1 AND NOT EXISTS (SELECT 1 FROM expected_values WHERE reference_id = ?1)",
        )
        .bind(reference_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Results workflow
    // ------------------------------------------------------------------------

    /// Stores obtained values for a per-visit exam and marks it completed.
    ///
    /// # Errors
    ///
    /// Returns `LabError::InvalidInput` if the exam is a template, or if any
    /// submitted id does not belong to this exam. Nothing is written in that case.
    pub async fn record_results(&self, exam_id: i64, entry: ResultEntry) -> LabResult<Exam> {
        let mut tx = self.db.pool().begin().await?;
        let exam = fetch_exam(&mut *tx, exam_id).await?;
        if exam.is_template {
            return Err(LabError::InvalidInput(format!(
                "exam {exam_id} is a template and cannot hold results"
            )));
        }

        if let Some(technician_id) = entry.technician_id {
            let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM patients WHERE id = ?1")
                .bind(technician_id)
                .fetch_optional(&mut *tx)
                .await?;
            if exists.is_none() {
                return Err(LabError::not_found("technician", technician_id));
            }
        }

        for value in &entry.references {
            let affected = sqlx::query(
                "UPDATE reference_ranges SET obtained_value = ?1 WHERE id = ?2 AND exam_id = ?3",
            )
            .bind(&value.value)
            .bind(value.id)
            .bind(exam_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            ensure_owned(affected, "reference range", value.id, exam_id)?;
        }

        for value in &entry.factors {
            let affected = sqlx::query(
                "UPDATE factor_entries SET obtained_factor = ?1
                 WHERE id = ?2
                   AND reference_id IN (SELECT id FROM reference_ranges WHERE exam_id = ?3)",
            )
            .bind(&value.value)
            .bind(value.id)
            .bind(exam_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            ensure_owned(affected, "factor entry", value.id, exam_id)?;
        }

        for value in &entry.expected {
            let affected = sqlx::query(
                "UPDATE expected_values SET obtained_value = ?1
                 WHERE id = ?2
                   AND reference_id IN (SELECT id FROM reference_ranges WHERE exam_id = ?3)",
            )
            .bind(&value.value)
            .bind(value.id)
            .bind(exam_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            ensure_owned(affected, "expected value", value.id, exam_id)?;
        }

        sqlx::query(
            "UPDATE exams
             SET status = ?1,
                 technician_id = COALESCE(?2, technician_id),
                 comment = COALESCE(?3, comment),
                 updated_at = CURRENT_TIMESTAMP
             WHERE id = ?4",
        )
        .bind(ExamStatus::Completed.as_str())
        .bind(entry.technician_id)
        .bind(&entry.comment)
        .bind(exam_id)
        .execute(&mut *tx)
        .await?;

        let exam = fetch_exam(&mut *tx, exam_id).await?;
        tx.commit().await?;

        tracing::info!(exam_id, "exam results recorded");
        Ok(exam)
    }

    /// Records the path of an externally produced result PDF and completes the exam.
    pub async fn attach_outsourced_result(&self, exam_id: i64, path: &str) -> LabResult<Exam> {
        validate_pdf_attachment(path)?;

        let exam = self.get_exam(exam_id).await?;
        if exam.is_template {
            return Err(LabError::InvalidInput(format!(
                "exam {exam_id} is a template and cannot hold results"
            )));
        }

        sqlx::query(
            "UPDATE exams SET attachment = ?1, status = ?2, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?3",
        )
        .bind(path.trim())
        .bind(ExamStatus::Completed.as_str())
        .bind(exam_id)
        .execute(self.db.pool())
        .await?;

        tracing::info!(exam_id, "outsourced result attached");
        self.get_exam(exam_id).await
    }

    pub async fn set_status(&self, exam_id: i64, status: ExamStatus) -> LabResult<Exam> {
        let affected = sqlx::query(
            "UPDATE exams SET status = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2",
        )
        .bind(status.as_str())
        .bind(exam_id)
        .execute(self.db.pool())
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(LabError::not_found("exam", exam_id));
        }
        self.get_exam(exam_id).await
    }

    // ------------------------------------------------------------------------
    // Worklists
    // ------------------------------------------------------------------------

    /// In-house exams created on `date` still waiting to be run.
    pub async fn pending_in_house(&self, date: NaiveDate) -> LabResult<Vec<Exam>> {
        self.list_on_date(
            "is_template = 0 AND outsourced = 0 AND status = 'AGUARDANDO'",
            date,
        )
        .await
    }

    /// Outsourced exams still waiting for the partner lab's report.
    pub async fn pending_outsourced(&self) -> LabResult<Vec<Exam>> {
        self.list_where(
            "is_template = 0 AND outsourced = 1 AND status = 'AGUARDANDO' ORDER BY created_at, id",
        )
        .await
    }

    pub async fn completed_on(&self, date: NaiveDate) -> LabResult<Vec<Exam>> {
        self.list_on_date("is_template = 0 AND status = 'REALIZADO'", date)
            .await
    }

    /// Every active per-visit exam, newest first.
    pub async fn list_clones(&self) -> LabResult<Vec<Exam>> {
        self.list_where("is_template = 0 AND active = 1 ORDER BY created_at DESC, id DESC")
            .await
    }

    /// Case-insensitive substring search on exam codes.
    pub async fn search_by_code(&self, fragment: &str) -> LabResult<Vec<ExamMatch>> {
        let Some(pattern) = search_pattern(fragment) else {
            return Ok(Vec::new());
        };

        let matches = sqlx::query_as(
            "SELECT id, code, name FROM exams
             WHERE code LIKE ?1 ESCAPE '\\'
             ORDER BY code",
        )
        .bind(pattern)
        .fetch_all(self.db.pool())
        .await?;
        Ok(matches)
    }

    async fn list_where(&self, clause: &str) -> LabResult<Vec<Exam>> {
        let rows: Vec<ExamRow> =
            sqlx::query_as(&format!("SELECT {EXAM_COLUMNS} FROM exams WHERE {clause}"))
                .fetch_all(self.db.pool())
                .await?;
        convert_rows(rows)
    }

    async fn list_on_date(&self, clause: &str, date: NaiveDate) -> LabResult<Vec<Exam>> {
        let rows: Vec<ExamRow> = sqlx::query_as(&format!(
            "SELECT {EXAM_COLUMNS} FROM exams
             WHERE {clause} AND date(created_at) = ?1
             ORDER BY created_at, id"
        ))
        .bind(date)
        .fetch_all(self.db.pool())
        .await?;
        convert_rows(rows)
    }
}

/// Deletes an exam and its plan rows on the caller's connection.
pub(crate) async fn delete_exam_in(conn: &mut SqliteConnection, id: i64) -> LabResult<()> {
    let orders: Vec<i64> =
        sqlx::query_scalar("SELECT order_id FROM order_exams WHERE exam_id = ?1")
            .bind(id)
            .fetch_all(&mut *conn)
            .await?;

    sqlx::query(
        "DELETE FROM pricing_plans
         WHERE id IN (SELECT plan_id FROM exam_plans WHERE exam_id = ?1)",
    )
    .bind(id)
    .execute(&mut *conn)
    .await?;

    let affected = sqlx::query("DELETE FROM exams WHERE id = ?1")
        .bind(id)
        .execute(&mut *conn)
        .await?
        .rows_affected();

    if affected == 0 {
        return Err(LabError::not_found("exam", id));
    }
    refresh_orders(conn, &orders).await
}

/// Orders billing an exam that owns the plan.
async fn orders_billing_plan(conn: &mut SqliteConnection, plan_id: i64) -> LabResult<Vec<i64>> {
    let orders = sqlx::query_scalar(
        "SELECT DISTINCT oe.order_id
         FROM order_exams oe
         JOIN exam_plans ep ON ep.exam_id = oe.exam_id
         WHERE ep.plan_id = ?1",
    )
    .bind(plan_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(orders)
}

async fn refresh_orders(conn: &mut SqliteConnection, order_ids: &[i64]) -> LabResult<()> {
    for &order_id in order_ids {
        refresh_total(conn, order_id).await?;
    }
    Ok(())
}

fn ensure_owned(affected: u64, entity: &str, id: i64, exam_id: i64) -> LabResult<()> {
    if affected == 0 {
        return Err(LabError::InvalidInput(format!(
            "{entity} {id} does not belong to exam {exam_id}"
        )));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use lab_types::NonEmptyText;
    use rust_decimal::Decimal;

    pub fn draft(name: &str) -> ExamDraft {
        ExamDraft {
            name: NonEmptyText::new(name).unwrap(),
            material: NonEmptyText::new("Sangue").unwrap(),
            method: NonEmptyText::new("Automatizado").unwrap(),
            comment: None,
            outsourced: false,
        }
    }

    pub fn plan(name: &str, cents: i64) -> NewPlan {
        NewPlan {
            name: NonEmptyText::new(name).unwrap(),
            price: Decimal::new(cents, 2),
            enabled: true,
        }
    }

    pub fn reference(label: &str, lower: Option<&str>, upper: Option<&str>) -> NewReference {
        NewReference {
            label: NonEmptyText::new(label).unwrap(),
            lower_bound: lower.map(str::to_string),
            upper_bound: upper.map(str::to_string),
        }
    }

    pub fn expected(value_type: &str, value: &str) -> NewExpected {
        NewExpected {
            value_type: NonEmptyText::new(value_type).unwrap(),
            expected_value: NonEmptyText::new(value).unwrap(),
        }
    }

    /// Creates a template with one plan priced at `cents` and returns
    /// `(template_id, plan_id)`.
    pub async fn seed_template(db: &Database, name: &str, cents: i64) -> (i64, i64) {
        let service = ExamService::new(db.clone());
        let template = service
            .create_template(draft(name))
            .await
            .expect("template should be created");
        let plan = service
            .add_plan(template.id, plan("Particular", cents))
            .await
            .expect("plan should be added");
        (template.id, plan.id)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::db::test_support::setup_test_db;
    use crate::models::{ObtainedValue, ReferenceKind};
    use crate::repositories::cloning::clone_template;
    use crate::repositories::patients::test_support::seed_patient;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn test_create_template_assigns_monthly_code() {
        let (db, _temp_dir) = setup_test_db().await;
        let service = ExamService::new(db);

        let first = service.create_template(draft("Hemograma")).await.unwrap();
        let second = service.create_template(draft("Glicose")).await.unwrap();

        let prefix = SequenceKind::ExamCode.partition(Utc::now().date_naive());
        assert_eq!(first.code, format!("{prefix}000001"));
        assert_eq!(second.code, format!("{prefix}000002"));
        assert!(first.is_template);
        assert_eq!(first.status, ExamStatus::Waiting);
        assert_eq!(first.template_id, None);
    }

    #[tokio::test]
    async fn test_list_templates_skips_inactive_and_sorts_by_name() {
        let (db, _temp_dir) = setup_test_db().await;
        let service = ExamService::new(db);
        let urine = service.create_template(draft("Urina")).await.unwrap();
        service.create_template(draft("Glicose")).await.unwrap();
        service.create_template(draft("Colesterol")).await.unwrap();
        service.deactivate_exam(urine.id).await.unwrap();

        let names: Vec<String> = service
            .list_templates()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["Colesterol", "Glicose"]);
    }

    #[tokio::test]
    async fn test_factor_rows_drive_reference_flags() {
        let (db, _temp_dir) = setup_test_db().await;
        let service = ExamService::new(db);
        let exam = service.create_template(draft("Hemoglobina")).await.unwrap();
        let range = service
            .add_reference(exam.id, reference("Hemoglobina", Some("12"), Some("16")))
            .await
            .unwrap();
        assert_eq!(range.kind(), ReferenceKind::Plain);

        let first = service
            .add_factor(
                range.id,
                NewFactor {
                    label: Some("Homens".into()),
                    lower_bound: Some("13".into()),
                    upper_bound: Some("17".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let second = service
            .add_factor(
                range.id,
                NewFactor {
                    label: Some("Mulheres".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let detail = service.get_exam_detail(exam.id).await.unwrap();
        let stored = &detail.references[0];
        assert_eq!(stored.kind, ReferenceKind::Factor);
        assert_eq!(stored.reference.lower_bound, None);
        assert_eq!(stored.reference.upper_bound, None);
        assert_eq!(stored.factors.len(), 2);

        service.delete_factor(first.id).await.unwrap();
        let detail = service.get_exam_detail(exam.id).await.unwrap();
        assert_eq!(detail.references[0].kind, ReferenceKind::Factor);

        service.delete_factor(second.id).await.unwrap();
        let detail = service.get_exam_detail(exam.id).await.unwrap();
        assert_eq!(detail.references[0].kind, ReferenceKind::Plain);
    }

    #[tokio::test]
    async fn test_expected_rows_drive_reference_flags() {
        let (db, _temp_dir) = setup_test_db().await;
        let service = ExamService::new(db);
        let exam = service.create_template(draft("Urina tipo I")).await.unwrap();
        let range = service
            .add_reference(exam.id, reference("Cor", None, None))
            .await
            .unwrap();

        let entry = service
            .add_expected(range.id, expected("Cor", "Amarelo citrino"))
            .await
            .unwrap();
        let detail = service.get_exam_detail(exam.id).await.unwrap();
        assert_eq!(detail.references[0].kind, ReferenceKind::Expected);

        let updated = service
            .update_expected(entry.id, expected("Cor", "Amarelo claro"))
            .await
            .unwrap();
        assert_eq!(updated.expected_value, "Amarelo claro");

        service.delete_expected(entry.id).await.unwrap();
        let detail = service.get_exam_detail(exam.id).await.unwrap();
        assert_eq!(detail.references[0].kind, ReferenceKind::Plain);
        assert!(detail.references[0].expected.is_empty());
    }

    #[tokio::test]
    async fn test_update_reference_rejects_bounds_in_table_mode() {
        let (db, _temp_dir) = setup_test_db().await;
        let service = ExamService::new(db);
        let exam = service.create_template(draft("Hemoglobina")).await.unwrap();
        let range = service
            .add_reference(exam.id, reference("Hb", None, None))
            .await
            .unwrap();
        service
            .add_factor(range.id, NewFactor::default())
            .await
            .unwrap();

        let err = service
            .update_reference(range.id, reference("Hb", Some("1"), Some("2")))
            .await
            .unwrap_err();
        assert!(matches!(err, LabError::InvalidInput(_)));

        let renamed = service
            .update_reference(range.id, reference("Hemoglobina", None, None))
            .await
            .unwrap();
        assert_eq!(renamed.label, "Hemoglobina");
        assert!(renamed.has_factor);
    }

    #[tokio::test]
    async fn test_plan_price_validation_and_update() {
        let (db, _temp_dir) = setup_test_db().await;
        let service = ExamService::new(db.clone());
        let (template_id, plan_id) = seed_template(&db, "Glicose", 1500).await;

        let err = service
            .add_plan(template_id, plan("Convênio", -100))
            .await
            .unwrap_err();
        assert!(matches!(err, LabError::InvalidInput(_)));

        let mut sub_cent = plan("Convênio", 0);
        sub_cent.price = Decimal::new(12345, 3);
        let err = service.add_plan(template_id, sub_cent).await.unwrap_err();
        assert!(matches!(err, LabError::InvalidInput(_)));

        let updated = service
            .update_plan(plan_id, plan("Particular", 1890))
            .await
            .unwrap();
        assert_eq!(updated.price, Decimal::new(1890, 2));

        service.delete_plan(plan_id).await.unwrap();
        assert!(service.get_exam_detail(template_id).await.unwrap().plans.is_empty());
        assert!(matches!(
            service.delete_plan(plan_id).await,
            Err(LabError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_record_results_completes_clone() {
        let (db, _temp_dir) = setup_test_db().await;
        let service = ExamService::new(db.clone());
        let technician = seed_patient(&db, "Ana Técnica").await;
        let (template_id, plan_id) = seed_template(&db, "Glicose", 1500).await;
        service
            .add_reference(template_id, reference("Glicose", Some("70"), Some("99")))
            .await
            .unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        let clone_id = clone_template(&mut conn, template_id, &[plan_id]).await.unwrap();
        drop(conn);

        let detail = service.get_exam_detail(clone_id).await.unwrap();
        let reference_id = detail.references[0].reference.id;

        let exam = service
            .record_results(
                clone_id,
                ResultEntry {
                    technician_id: Some(technician),
                    comment: Some("Jejum de 8h".into()),
                    references: vec![ObtainedValue {
                        id: reference_id,
                        value: Some("87".into()),
                    }],
                    ..Default::default()
                },
            )
            .await
            .expect("record should succeed");

        assert_eq!(exam.status, ExamStatus::Completed);
        assert_eq!(exam.technician_id, Some(technician));
        let detail = service.get_exam_detail(clone_id).await.unwrap();
        assert_eq!(
            detail.references[0].reference.obtained_value.as_deref(),
            Some("87")
        );
    }

    #[tokio::test]
    async fn test_record_results_rejects_foreign_ids_atomically() {
        let (db, _temp_dir) = setup_test_db().await;
        let service = ExamService::new(db.clone());
        let (template_id, plan_id) = seed_template(&db, "Glicose", 1500).await;
        service
            .add_reference(template_id, reference("Glicose", Some("70"), Some("99")))
            .await
            .unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        let clone_id = clone_template(&mut conn, template_id, &[plan_id]).await.unwrap();
        drop(conn);
        let own = service.get_exam_detail(clone_id).await.unwrap().references[0]
            .reference
            .id;
        let template_reference = service.get_exam_detail(template_id).await.unwrap().references
            [0]
        .reference
        .id;

        let err = service
            .record_results(
                clone_id,
                ResultEntry {
                    references: vec![
                        ObtainedValue {
                            id: own,
                            value: Some("90".into()),
                        },
                        ObtainedValue {
                            id: template_reference,
                            value: Some("91".into()),
                        },
                    ],
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LabError::InvalidInput(_)));

        let detail = service.get_exam_detail(clone_id).await.unwrap();
        assert_eq!(detail.exam.status, ExamStatus::Waiting);
        assert_eq!(detail.references[0].reference.obtained_value, None);
    }

    #[tokio::test]
    async fn test_templates_cannot_hold_results() {
        let (db, _temp_dir) = setup_test_db().await;
        let service = ExamService::new(db.clone());
        let (template_id, _) = seed_template(&db, "Glicose", 1500).await;

        assert!(matches!(
            service.record_results(template_id, ResultEntry::default()).await,
            Err(LabError::InvalidInput(_))
        ));
        assert!(matches!(
            service
                .attach_outsourced_result(template_id, "laudo.pdf")
                .await,
            Err(LabError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_outsourced_worklist_and_attachment() {
        let (db, _temp_dir) = setup_test_db().await;
        let service = ExamService::new(db.clone());
        let mut outsourced = draft("Vitamina D");
        outsourced.outsourced = true;
        let template = service.create_template(outsourced).await.unwrap();
        let plan = service
            .add_plan(template.id, plan("Particular", 9000))
            .await
            .unwrap();
        let (in_house, in_house_plan) = seed_template(&db, "Glicose", 1500).await;

        let mut conn = db.pool().acquire().await.unwrap();
        let clone_id = clone_template(&mut conn, template.id, &[plan.id]).await.unwrap();
        let local_id = clone_template(&mut conn, in_house, &[in_house_plan]).await.unwrap();
        drop(conn);

        let pending: Vec<i64> = service
            .pending_outsourced()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(pending, vec![clone_id]);

        let today = sqlx::query_scalar::<_, NaiveDate>("SELECT date(created_at) FROM exams WHERE id = ?1")
            .bind(local_id)
            .fetch_one(db.pool())
            .await
            .unwrap();
        let waiting: Vec<i64> = service
            .pending_in_house(today)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(waiting, vec![local_id]);

        assert!(service
            .attach_outsourced_result(clone_id, "laudo.docx")
            .await
            .is_err());
        let exam = service
            .attach_outsourced_result(clone_id, "terceirizados/laudo.pdf")
            .await
            .unwrap();
        assert_eq!(exam.attachment.as_deref(), Some("terceirizados/laudo.pdf"));
        assert_eq!(exam.status, ExamStatus::Completed);
        assert!(service.pending_outsourced().await.unwrap().is_empty());

        let done: Vec<i64> = service
            .completed_on(today)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(done, vec![clone_id]);
        assert_eq!(service.list_clones().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_search_by_code_matches_fragment() {
        let (db, _temp_dir) = setup_test_db().await;
        let service = ExamService::new(db);
        let exam = service.create_template(draft("Glicose")).await.unwrap();

        let hits = service.search_by_code(&exam.code[6..]).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "Glicose");
        assert!(service.search_by_code(" ").await.unwrap().is_empty());
        assert!(service.search_by_code("999999999").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_exam_removes_owned_plans() {
        let (db, _temp_dir) = setup_test_db().await;
        let service = ExamService::new(db.clone());
        let (template_id, plan_id) = seed_template(&db, "Glicose", 1500).await;

        service.delete_exam(template_id).await.unwrap();
        assert!(matches!(
            service.get_plan(plan_id).await,
            Err(LabError::NotFound { .. })
        ));
        assert!(matches!(
            service.delete_exam(template_id).await,
            Err(LabError::NotFound { .. })
        ));
    }
}
