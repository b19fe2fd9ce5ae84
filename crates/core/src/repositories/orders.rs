//! Orders: the billing record for one patient visit.
//!
//! Every write that changes which exams an order holds runs in a single
//! transaction together with the template cloning it needs and the total
//! refresh, so a failure part-way leaves no order behind with only some of
//! its exams attached.

use crate::db::Database;
use crate::error::{LabError, LabResult};
use crate::models::{
    convert_rows, Exam, ExamRow, NewOrder, Order, OrderDetail, OrderExamLine, OrderMatch,
    OrderRow, PaymentUpdate, QueueStatus,
};
use crate::repositories::billing::refresh_total;
use crate::repositories::cloning::clone_template;
use crate::repositories::exams::{delete_exam_in, fetch_exam, fetch_plans, insert_plan, EXAM_COLUMNS};
use crate::validation::{search_pattern, validate_exam_selection};
use chrono::NaiveDate;
use sqlx::{SqliteConnection, SqliteExecutor};

const ORDER_COLUMNS: &str = "id, patient_id, total, payment_method, payment_status, comment, \
     cancelled, registered_on, updated_at";

async fn fetch_order<'e, E>(executor: E, id: i64) -> LabResult<Order>
where
    E: SqliteExecutor<'e>,
{
    let row: Option<OrderRow> =
        sqlx::query_as(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1"))
            .bind(id)
            .fetch_optional(executor)
            .await?;
    row.ok_or_else(|| LabError::not_found("order", id))?
        .try_into()
}

/// Clones each selected template and links the copies to `order_id`.
async fn attach_clones(
    conn: &mut SqliteConnection,
    order_id: i64,
    exam_ids: &[i64],
    plan_ids: &[i64],
) -> LabResult<Vec<i64>> {
    let mut clone_ids = Vec::with_capacity(exam_ids.len());
    for &template_id in exam_ids {
        let clone_id = clone_template(conn, template_id, plan_ids).await?;
        sqlx::query("INSERT INTO order_exams (order_id, exam_id) VALUES (?1, ?2)")
            .bind(order_id)
            .bind(clone_id)
            .execute(&mut *conn)
            .await?;
        clone_ids.push(clone_id);
    }
    Ok(clone_ids)
}

async fn ensure_linked(conn: &mut SqliteConnection, order_id: i64, exam_id: i64) -> LabResult<()> {
    fetch_order(&mut *conn, order_id).await?;
    let linked: Option<i64> =
        sqlx::query_scalar("SELECT exam_id FROM order_exams WHERE order_id = ?1 AND exam_id = ?2")
            .bind(order_id)
            .bind(exam_id)
            .fetch_optional(&mut *conn)
            .await?;
    if linked.is_none() {
        return Err(LabError::not_found("exam", exam_id));
    }
    Ok(())
}

/// Service for orders and their exams.
#[derive(Clone, Debug)]
pub struct OrderService {
    db: Database,
}

impl OrderService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Registers an order for the selected exam templates.
    ///
    /// In one transaction this inserts the order, clones every selected
    /// template with the plans chosen for it, stores the total and, when the
    /// order comes from the arrival queue, marks that entry served.
    ///
    /// # Errors
    ///
    /// - `LabError::InvalidInput` if no exam is selected, or the queue entry
    ///   belongs to another patient.
    /// - `LabError::NotFound` for a missing patient, template or queue entry.
    /// - `LabError::MissingPrice` if a selected exam ends up with no plan.
    pub async fn create_order(&self, new: NewOrder) -> LabResult<OrderDetail> {
        validate_exam_selection(&new.exam_ids)?;

        let mut tx = self.db.pool().begin().await?;

        let patient: Option<i64> = sqlx::query_scalar("SELECT id FROM patients WHERE id = ?1")
            .bind(new.patient_id)
            .fetch_optional(&mut *tx)
            .await?;
        if patient.is_none() {
            return Err(LabError::not_found("patient", new.patient_id));
        }

        let order_id = sqlx::query(
            "INSERT INTO orders (patient_id, payment_method, payment_status, comment, registered_on)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(new.patient_id)
        .bind(new.payment_method.as_str())
        .bind(new.payment_status.as_str())
        .bind(&new.comment)
        .bind(new.registered_on)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        attach_clones(&mut tx, order_id, &new.exam_ids, &new.plan_ids).await?;
        let total = refresh_total(&mut tx, order_id).await?;

        if let Some(entry_id) = new.queue_entry_id {
            let owner: i64 = sqlx::query_scalar("SELECT patient_id FROM queue_entries WHERE id = ?1")
                .bind(entry_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| LabError::not_found("queue entry", entry_id))?;
            if owner != new.patient_id {
                return Err(LabError::InvalidInput(format!(
                    "queue entry {entry_id} belongs to another patient"
                )));
            }
            sqlx::query("UPDATE queue_entries SET status = ?1 WHERE id = ?2")
                .bind(QueueStatus::Served.as_str())
                .bind(entry_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        tracing::info!(
            order_id,
            patient_id = new.patient_id,
            exams = new.exam_ids.len(),
            %total,
            "order created"
        );
        self.get_order(order_id).await
    }

    /// Clones more templates into an existing order.
    pub async fn add_exams(
        &self,
        order_id: i64,
        exam_ids: &[i64],
        plan_ids: &[i64],
    ) -> LabResult<OrderDetail> {
        validate_exam_selection(exam_ids)?;

        let mut tx = self.db.pool().begin().await?;
        fetch_order(&mut *tx, order_id).await?;
        attach_clones(&mut tx, order_id, exam_ids, plan_ids).await?;
        refresh_total(&mut tx, order_id).await?;
        tx.commit().await?;

        tracing::info!(order_id, added = exam_ids.len(), "exams added to order");
        self.get_order(order_id).await
    }

    /// Removes one exam copy from an order and deletes it.
    pub async fn remove_exam(&self, order_id: i64, exam_id: i64) -> LabResult<OrderDetail> {
        let mut tx = self.db.pool().begin().await?;
        ensure_linked(&mut tx, order_id, exam_id).await?;
        delete_exam_in(&mut tx, exam_id).await?;
        tx.commit().await?;

        tracing::info!(order_id, exam_id, "exam removed from order");
        self.get_order(order_id).await
    }

    /// Bills an exam copy under a different plan of its template.
    ///
    /// The copy's current plans are replaced by a fresh copy of
    /// `template_plan_id`, so the copy is left with exactly one plan.
    ///
    /// # Errors
    ///
    /// Returns `LabError::InvalidInput` if the plan does not belong to the
    /// template the exam was cloned from.
    pub async fn change_exam_plan(
        &self,
        order_id: i64,
        exam_id: i64,
        template_plan_id: i64,
    ) -> LabResult<OrderDetail> {
        let mut tx = self.db.pool().begin().await?;
        ensure_linked(&mut tx, order_id, exam_id).await?;

        let exam = fetch_exam(&mut *tx, exam_id).await?;
        let template_id = exam.template_id.ok_or_else(|| {
            LabError::InvalidInput(format!("exam {exam_id} has no template to take plans from"))
        })?;

        let plan: Option<(String, String)> = sqlx::query_as(
            "SELECT p.name, p.price
             FROM pricing_plans p
             JOIN exam_plans ep ON ep.plan_id = p.id
             WHERE ep.exam_id = ?1 AND p.id = ?2",
        )
        .bind(template_id)
        .bind(template_plan_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some((name, price)) = plan else {
            return Err(LabError::InvalidInput(format!(
                "plan {template_plan_id} does not belong to template {template_id}"
            )));
        };

        sqlx::query(
            "DELETE FROM pricing_plans
             WHERE id IN (SELECT plan_id FROM exam_plans WHERE exam_id = ?1)",
        )
        .bind(exam_id)
        .execute(&mut *tx)
        .await?;
        insert_plan(&mut tx, exam_id, &name, &price, true).await?;
        refresh_total(&mut tx, order_id).await?;
        tx.commit().await?;

        tracing::info!(order_id, exam_id, template_plan_id, "exam plan changed");
        self.get_order(order_id).await
    }

    pub async fn update_payment(&self, order_id: i64, update: PaymentUpdate) -> LabResult<Order> {
        let affected = sqlx::query(
            "UPDATE orders
             SET payment_method = ?1, payment_status = ?2, comment = ?3, cancelled = ?4,
                 updated_at = CURRENT_TIMESTAMP
             WHERE id = ?5",
        )
        .bind(update.payment_method.as_str())
        .bind(update.payment_status.as_str())
        .bind(&update.comment)
        .bind(update.cancelled)
        .bind(order_id)
        .execute(self.db.pool())
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(LabError::not_found("order", order_id));
        }
        tracing::info!(order_id, status = %update.payment_status, "order payment updated");
        fetch_order(self.db.pool(), order_id).await
    }

    /// Loads an order with its patient name and billed exams.
    pub async fn get_order(&self, order_id: i64) -> LabResult<OrderDetail> {
        let mut conn = self.db.pool().acquire().await?;
        let order = fetch_order(&mut *conn, order_id).await?;

        let patient_name: String = sqlx::query_scalar("SELECT name FROM patients WHERE id = ?1")
            .bind(order.patient_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| LabError::not_found("patient", order.patient_id))?;

        let rows: Vec<ExamRow> = sqlx::query_as(&format!(
            "SELECT {EXAM_COLUMNS} FROM exams
             WHERE id IN (SELECT exam_id FROM order_exams WHERE order_id = ?1)
             ORDER BY id"
        ))
        .bind(order_id)
        .fetch_all(&mut *conn)
        .await?;
        let exams: Vec<Exam> = convert_rows(rows)?;

        let mut lines = Vec::with_capacity(exams.len());
        for exam in exams {
            let plan = fetch_plans(&mut *conn, exam.id).await?.into_iter().next();
            lines.push(OrderExamLine { exam, plan });
        }

        Ok(OrderDetail {
            order,
            patient_name,
            exams: lines,
        })
    }

    /// Orders registered on `date`, oldest first.
    pub async fn list_for_date(&self, date: NaiveDate) -> LabResult<Vec<Order>> {
        let rows: Vec<OrderRow> = sqlx::query_as(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE registered_on = ?1 ORDER BY id"
        ))
        .bind(date)
        .fetch_all(self.db.pool())
        .await?;
        convert_rows(rows)
    }

    /// Case-insensitive search of orders by patient name.
    pub async fn search_by_patient_name(&self, fragment: &str) -> LabResult<Vec<OrderMatch>> {
        let Some(pattern) = search_pattern(fragment) else {
            return Ok(Vec::new());
        };

        let rows: Vec<(i64, String, NaiveDate)> = sqlx::query_as(
            "SELECT o.id, p.name, o.registered_on
             FROM orders o
             JOIN patients p ON p.id = o.patient_id
             WHERE p.name LIKE ?1 ESCAPE '\\'
             ORDER BY o.registered_on DESC, o.id DESC",
        )
        .bind(pattern)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, patient_name, registered_on)| OrderMatch {
                id,
                patient_name,
                date: registered_on.format("%d/%m/%Y").to_string(),
            })
            .collect())
    }

    /// The order an exam copy is billed on, if any.
    pub async fn order_for_exam(&self, exam_id: i64) -> LabResult<Option<Order>> {
        let row: Option<OrderRow> = sqlx::query_as(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders
             WHERE id = (SELECT order_id FROM order_exams WHERE exam_id = ?1 ORDER BY order_id LIMIT 1)"
        ))
        .bind(exam_id)
        .fetch_optional(self.db.pool())
        .await?;
        row.map(Order::try_from).transpose()
    }
}
