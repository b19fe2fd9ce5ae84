//! Order totals and period billing summaries.
//!
//! An order's total is derived, never typed in: it is the sum over the
//! order's exams of each exam's billing price. The billing price of an exam
//! is the price of its first plan, where first means lowest plan id. An exam
//! with no plan cannot be billed and is reported as
//! [`LabError::MissingPrice`] rather than counted as zero.

use crate::db::Database;
use crate::error::{LabError, LabResult};
use crate::models::{convert_rows, parse_price, price_to_db, Order, OrderRow, PaymentStatus};
use chrono::{Datelike, Days, Months, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use utoipa::{IntoParams, ToSchema};

/// Computes the total of one order from its exams' first plans.
///
/// # Errors
///
/// - `LabError::NotFound` if the order does not exist.
/// - `LabError::MissingPrice` if any linked exam has no plan.
pub async fn order_total(conn: &mut SqliteConnection, order_id: i64) -> LabResult<Decimal> {
    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM orders WHERE id = ?1")
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await?;
    if exists.is_none() {
        return Err(LabError::not_found("order", order_id));
    }

    let lines: Vec<(i64, Option<String>)> = sqlx::query_as(
        "SELECT oe.exam_id,
                (SELECT p.price
                 FROM exam_plans ep
                 JOIN pricing_plans p ON p.id = ep.plan_id
                 WHERE ep.exam_id = oe.exam_id
                 ORDER BY p.id
                 LIMIT 1)
         FROM order_exams oe
         WHERE oe.order_id = ?1
         ORDER BY oe.exam_id",
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut total = Decimal::ZERO;
    for (exam_id, price) in lines {
        let price = price.ok_or(LabError::MissingPrice { exam_id })?;
        total += parse_price(&price)?;
    }
    Ok(total)
}

/// Recomputes an order's total and stores it on the order row.
pub(crate) async fn refresh_total(conn: &mut SqliteConnection, order_id: i64) -> LabResult<Decimal> {
    let total = order_total(conn, order_id).await?;
    sqlx::query("UPDATE orders SET total = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2")
        .bind(price_to_db(total))
        .bind(order_id)
        .execute(&mut *conn)
        .await?;
    Ok(total)
}

// ============================================================================
// FILTERS
// ============================================================================

/// Inclusive registration-date range with an optional payment-status match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct BillingFilter {
    pub start: NaiveDate,
    pub end: NaiveDate,
    #[serde(default)]
    pub payment: Option<PaymentStatus>,
}

impl BillingFilter {
    pub fn day(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
            payment: None,
        }
    }

    pub fn range(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start,
            end,
            payment: None,
        }
    }

    pub fn with_payment(mut self, payment: PaymentStatus) -> Self {
        self.payment = Some(payment);
        self
    }
}

/// Named billing periods offered by the reports screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "period", rename_all = "snake_case")]
pub enum BillingPeriod {
    /// Paid orders registered today.
    TodayPaid,
    /// Monday to Sunday of the week containing today.
    ThisWeek,
    /// Calendar month containing today.
    ThisMonth,
    Day { date: NaiveDate },
    Range { start: NaiveDate, end: NaiveDate },
}

impl BillingPeriod {
    /// Turns the period into a concrete filter relative to `today`.
    pub fn resolve(self, today: NaiveDate) -> BillingFilter {
        match self {
            Self::TodayPaid => BillingFilter::day(today).with_payment(PaymentStatus::Paid),
            Self::ThisWeek => {
                let offset = u64::from(today.weekday().num_days_from_monday());
                let monday = today.checked_sub_days(Days::new(offset)).unwrap_or(today);
                let sunday = monday.checked_add_days(Days::new(6)).unwrap_or(today);
                BillingFilter::range(monday, sunday)
            }
            Self::ThisMonth => {
                let first = today.with_day(1).unwrap_or(today);
                let last = first
                    .checked_add_months(Months::new(1))
                    .and_then(|next| next.pred_opt())
                    .unwrap_or(today);
                BillingFilter::range(first, last)
            }
            Self::Day { date } => BillingFilter::day(date),
            Self::Range { start, end } => BillingFilter::range(start, end),
        }
    }
}

/// Period names accepted from query strings and the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PeriodKind {
    TodayPaid,
    ThisWeek,
    ThisMonth,
    Day,
    Range,
}

/// Flat form of [`BillingPeriod`]: a period name plus the dates it needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct BillingPeriodQuery {
    pub period: PeriodKind,
    /// Day for `day`.
    #[serde(default)]
    pub date: Option<NaiveDate>,
    /// First day for `range`.
    #[serde(default)]
    pub start: Option<NaiveDate>,
    /// Last day for `range`.
    #[serde(default)]
    pub end: Option<NaiveDate>,
}

impl TryFrom<BillingPeriodQuery> for BillingPeriod {
    type Error = LabError;

    fn try_from(query: BillingPeriodQuery) -> LabResult<Self> {
        let missing =
            |field: &str| LabError::InvalidInput(format!("{field} is required for this period"));
        Ok(match query.period {
            PeriodKind::TodayPaid => Self::TodayPaid,
            PeriodKind::ThisWeek => Self::ThisWeek,
            PeriodKind::ThisMonth => Self::ThisMonth,
            PeriodKind::Day => Self::Day {
                date: query.date.ok_or_else(|| missing("date"))?,
            },
            PeriodKind::Range => Self::Range {
                start: query.start.ok_or_else(|| missing("start"))?,
                end: query.end.ok_or_else(|| missing("end"))?,
            },
        })
    }
}

/// Sum of recomputed totals over the orders matching a filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BillingSummary {
    pub total: Decimal,
    /// Matching orders, newest first, each carrying its recomputed total.
    pub orders: Vec<Order>,
}

impl BillingSummary {
    pub fn empty() -> Self {
        Self {
            total: Decimal::ZERO,
            orders: Vec::new(),
        }
    }
}

// ============================================================================
// BILLING SERVICE
// ============================================================================

/// Read-only billing reports over orders.
#[derive(Clone, Debug)]
pub struct BillingService {
    db: Database,
}

impl BillingService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Aggregates the orders matching `filter`.
    ///
    /// A range whose start lies after its end matches nothing.
    ///
    /// # Errors
    ///
    /// Returns `LabError::MissingPrice` if a matching order holds an exam with
    /// no plan.
    pub async fn aggregate(&self, filter: BillingFilter) -> LabResult<BillingSummary> {
        if filter.start > filter.end {
            tracing::debug!(start = %filter.start, end = %filter.end, "empty billing range");
            return Ok(BillingSummary::empty());
        }

        let mut conn = self.db.pool().acquire().await?;
        let rows: Vec<OrderRow> = sqlx::query_as(
            "SELECT id, patient_id, total, payment_method, payment_status, comment, cancelled,
                    registered_on, updated_at
             FROM orders
             WHERE registered_on BETWEEN ?1 AND ?2
               AND (?3 IS NULL OR payment_status = ?3)
             ORDER BY registered_on DESC, id DESC",
        )
        .bind(filter.start)
        .bind(filter.end)
        .bind(filter.payment.map(|p| p.as_str()))
        .fetch_all(&mut *conn)
        .await?;
        let mut orders: Vec<Order> = convert_rows(rows)?;

        let mut total = Decimal::ZERO;
        for order in &mut orders {
            order.total = order_total(&mut conn, order.id).await?;
            total += order.total;
        }

        tracing::debug!(
            start = %filter.start,
            end = %filter.end,
            orders = orders.len(),
            %total,
            "billing aggregated"
        );
        Ok(BillingSummary { total, orders })
    }

    pub async fn summary(&self, period: BillingPeriod, today: NaiveDate) -> LabResult<BillingSummary> {
        self.aggregate(period.resolve(today)).await
    }
}
