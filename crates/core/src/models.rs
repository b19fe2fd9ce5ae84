//! Domain records stored by the lab and the inputs used to create them.
//!
//! Row structs (`*Row`) mirror the SQLite columns one to one; the public
//! models are built from them with `TryFrom` so that enum and money columns
//! are validated on the way out of the database.

use crate::{LabError, LabResult};
use chrono::{NaiveDate, NaiveDateTime};
use lab_types::{Cpf, NonEmptyText};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;

macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = LabError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(LabError::UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

/// Parses a price column. Prices are stored as canonical decimal text.
pub(crate) fn parse_price(raw: &str) -> LabResult<Decimal> {
    Decimal::from_str(raw).map_err(|source| LabError::InvalidPrice {
        value: raw.to_string(),
        source,
    })
}

pub(crate) fn price_to_db(price: Decimal) -> String {
    format!("{:.2}", price)
}

// ============================================================================
// ENUMERATIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum Sex {
    #[serde(rename = "M")]
    Male,
    #[serde(rename = "F")]
    Female,
}

text_enum!(Sex, "sex", { Male => "M", Female => "F" });

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum ExamStatus {
    #[default]
    #[serde(rename = "AGUARDANDO")]
    Waiting,
    #[serde(rename = "REALIZADO")]
    Completed,
    #[serde(rename = "CANCELADO")]
    Cancelled,
}

text_enum!(ExamStatus, "exam status", {
    Waiting => "AGUARDANDO",
    Completed => "REALIZADO",
    Cancelled => "CANCELADO",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum PaymentMethod {
    #[serde(rename = "DINHEIRO")]
    Cash,
    #[serde(rename = "CARTAO_CREDITO")]
    CreditCard,
    #[serde(rename = "CARTAO_DEBITO")]
    DebitCard,
    #[serde(rename = "PIX")]
    Pix,
    #[default]
    #[serde(rename = "OUTRO")]
    Other,
}

text_enum!(PaymentMethod, "payment method", {
    Cash => "DINHEIRO",
    CreditCard => "CARTAO_CREDITO",
    DebitCard => "CARTAO_DEBITO",
    Pix => "PIX",
    Other => "OUTRO",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum PaymentStatus {
    #[default]
    #[serde(rename = "PENDENTE")]
    Pending,
    #[serde(rename = "PAGO")]
    Paid,
    #[serde(rename = "PARCIAL")]
    Partial,
    #[serde(rename = "OUTRO")]
    Other,
}

text_enum!(PaymentStatus, "payment status", {
    Pending => "PENDENTE",
    Paid => "PAGO",
    Partial => "PARCIAL",
    Other => "OUTRO",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum QueueStatus {
    #[default]
    #[serde(rename = "AGUARDANDO")]
    Waiting,
    #[serde(rename = "ATENDIDO")]
    Served,
    #[serde(rename = "CANCELADO")]
    Cancelled,
}

text_enum!(QueueStatus, "queue status", {
    Waiting => "AGUARDANDO",
    Served => "ATENDIDO",
    Cancelled => "CANCELADO",
});

// ============================================================================
// PATIENTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Patient {
    pub id: i64,
    pub name: String,
    pub cpf: String,
    pub rg: Option<String>,
    pub sex: Sex,
    pub phone: String,
    pub birth_date: String,
    pub is_staff: bool,
    pub is_admin: bool,
    pub is_doctor: bool,
    pub is_patient: bool,
    pub active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PatientRow {
    id: i64,
    name: String,
    cpf: String,
    rg: Option<String>,
    sex: String,
    phone: String,
    birth_date: String,
    is_staff: bool,
    is_admin: bool,
    is_doctor: bool,
    is_patient: bool,
    active: bool,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

impl TryFrom<PatientRow> for Patient {
    type Error = LabError;

    fn try_from(row: PatientRow) -> LabResult<Self> {
        Ok(Self {
            id: row.id,
            name: row.name,
            cpf: row.cpf,
            rg: row.rg,
            sex: row.sex.parse()?,
            phone: row.phone,
            birth_date: row.birth_date,
            is_staff: row.is_staff,
            is_admin: row.is_admin,
            is_doctor: row.is_doctor,
            is_patient: row.is_patient,
            active: row.active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Registration form for a patient or staff member.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewPatient {
    #[schema(value_type = String)]
    pub name: NonEmptyText,
    #[schema(value_type = String)]
    pub cpf: Cpf,
    #[serde(default)]
    pub rg: Option<String>,
    pub sex: Sex,
    pub phone: String,
    pub birth_date: String,
    #[serde(default)]
    pub is_staff: bool,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub is_doctor: bool,
    #[serde(default = "default_true")]
    pub is_patient: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Address {
    pub id: i64,
    pub patient_id: i64,
    pub street: String,
    pub number: Option<String>,
    pub complement: Option<String>,
    pub district: String,
    pub postal_code: String,
    pub city: String,
    pub state: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewAddress {
    #[schema(value_type = String)]
    pub street: NonEmptyText,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub complement: Option<String>,
    #[schema(value_type = String)]
    pub district: NonEmptyText,
    #[serde(default)]
    pub postal_code: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
}

/// One live-search hit for a patient name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct PatientMatch {
    #[serde(rename = "pk")]
    pub id: i64,
    #[serde(rename = "nome")]
    pub name: String,
    pub cpf: String,
}

// ============================================================================
// PRICING PLANS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PricingPlan {
    pub id: i64,
    pub name: String,
    pub price: Decimal,
    pub enabled: bool,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PricingPlanRow {
    id: i64,
    name: String,
    price: String,
    enabled: bool,
}

impl TryFrom<PricingPlanRow> for PricingPlan {
    type Error = LabError;

    fn try_from(row: PricingPlanRow) -> LabResult<Self> {
        Ok(Self {
            id: row.id,
            name: row.name,
            price: parse_price(&row.price)?,
            enabled: row.enabled,
        })
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewPlan {
    #[schema(value_type = String)]
    pub name: NonEmptyText,
    pub price: Decimal,
    #[serde(default)]
    pub enabled: bool,
}

// ============================================================================
// EXAMS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Exam {
    pub id: i64,
    pub name: String,
    pub material: String,
    pub method: String,
    pub code: String,
    pub attachment: Option<String>,
    pub technician_id: Option<i64>,
    pub status: ExamStatus,
    pub comment: Option<String>,
    pub outsourced: bool,
    pub is_template: bool,
    pub active: bool,
    /// Template this exam was cloned from; `None` for templates.
    pub template_id: Option<i64>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ExamRow {
    id: i64,
    name: String,
    material: String,
    method: String,
    code: String,
    attachment: Option<String>,
    technician_id: Option<i64>,
    status: String,
    comment: Option<String>,
    outsourced: bool,
    is_template: bool,
    active: bool,
    template_id: Option<i64>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

impl TryFrom<ExamRow> for Exam {
    type Error = LabError;

    fn try_from(row: ExamRow) -> LabResult<Self> {
        Ok(Self {
            id: row.id,
            name: row.name,
            material: row.material,
            method: row.method,
            code: row.code,
            attachment: row.attachment,
            technician_id: row.technician_id,
            status: row.status.parse()?,
            comment: row.comment,
            outsourced: row.outsourced,
            is_template: row.is_template,
            active: row.active,
            template_id: row.template_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Editable fields of an exam definition.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ExamDraft {
    #[schema(value_type = String)]
    pub name: NonEmptyText,
    #[schema(value_type = String)]
    pub material: NonEmptyText,
    #[schema(value_type = String)]
    pub method: NonEmptyText,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub outsourced: bool,
}

/// Which of the three mutually exclusive sub-structures a reference range uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    /// Plain lower/upper bounds.
    Plain,
    Factor,
    Expected,
    FactorAndExpected,
}

impl ReferenceKind {
    pub fn from_flags(has_factor: bool, has_expected: bool) -> Self {
        match (has_factor, has_expected) {
            (false, false) => Self::Plain,
            (true, false) => Self::Factor,
            (false, true) => Self::Expected,
            (true, true) => Self::FactorAndExpected,
        }
    }

    pub fn has_factor(self) -> bool {
        matches!(self, Self::Factor | Self::FactorAndExpected)
    }

    pub fn has_expected(self) -> bool {
        matches!(self, Self::Expected | Self::FactorAndExpected)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct ReferenceRange {
    pub id: i64,
    pub exam_id: i64,
    pub label: String,
    pub lower_bound: Option<String>,
    pub upper_bound: Option<String>,
    pub obtained_value: Option<String>,
    pub has_factor: bool,
    pub has_expected: bool,
}

impl ReferenceRange {
    pub fn kind(&self) -> ReferenceKind {
        ReferenceKind::from_flags(self.has_factor, self.has_expected)
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewReference {
    #[schema(value_type = String)]
    pub label: NonEmptyText,
    #[serde(default)]
    pub lower_bound: Option<String>,
    #[serde(default)]
    pub upper_bound: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct FactorEntry {
    pub id: i64,
    pub reference_id: i64,
    pub label: Option<String>,
    pub age_bracket: Option<String>,
    pub lower_bound: Option<String>,
    pub upper_bound: Option<String>,
    pub obtained_factor: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct NewFactor {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub age_bracket: Option<String>,
    #[serde(default)]
    pub lower_bound: Option<String>,
    #[serde(default)]
    pub upper_bound: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct ExpectedValue {
    pub id: i64,
    pub reference_id: i64,
    pub value_type: String,
    pub expected_value: String,
    pub obtained_value: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewExpected {
    #[schema(value_type = String)]
    pub value_type: NonEmptyText,
    #[schema(value_type = String)]
    pub expected_value: NonEmptyText,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ReferenceDetail {
    pub reference: ReferenceRange,
    pub kind: ReferenceKind,
    pub factors: Vec<FactorEntry>,
    pub expected: Vec<ExpectedValue>,
}

/// An exam with its plans and full reference tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ExamDetail {
    pub exam: Exam,
    pub plans: Vec<PricingPlan>,
    pub references: Vec<ReferenceDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct ExamMatch {
    #[serde(rename = "pk")]
    pub id: i64,
    #[serde(rename = "codigo")]
    pub code: String,
    #[serde(rename = "nome")]
    pub name: String,
}

/// Values typed in by the technician when completing an exam.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ResultEntry {
    pub technician_id: Option<i64>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub references: Vec<ObtainedValue>,
    #[serde(default)]
    pub factors: Vec<ObtainedValue>,
    #[serde(default)]
    pub expected: Vec<ObtainedValue>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ObtainedValue {
    pub id: i64,
    pub value: Option<String>,
}

// ============================================================================
// ORDERS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Order {
    pub id: i64,
    pub patient_id: i64,
    pub total: Decimal,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub comment: Option<String>,
    pub cancelled: bool,
    pub registered_on: NaiveDate,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct OrderRow {
    id: i64,
    patient_id: i64,
    total: String,
    payment_method: String,
    payment_status: String,
    comment: Option<String>,
    cancelled: bool,
    registered_on: NaiveDate,
    updated_at: NaiveDateTime,
}

impl TryFrom<OrderRow> for Order {
    type Error = LabError;

    fn try_from(row: OrderRow) -> LabResult<Self> {
        Ok(Self {
            id: row.id,
            patient_id: row.patient_id,
            total: parse_price(&row.total)?,
            payment_method: row.payment_method.parse()?,
            payment_status: row.payment_status.parse()?,
            comment: row.comment,
            cancelled: row.cancelled,
            registered_on: row.registered_on,
            updated_at: row.updated_at,
        })
    }
}

/// Exam selection submitted at the front desk.
///
/// `plan_ids` is the flat list of every plan ticked on the form, across all
/// selected exams; each clone keeps only the ids that belong to its template.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewOrder {
    pub patient_id: i64,
    pub exam_ids: Vec<i64>,
    #[serde(default)]
    pub plan_ids: Vec<i64>,
    #[serde(default)]
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub payment_status: PaymentStatus,
    #[serde(default)]
    pub comment: Option<String>,
    pub registered_on: NaiveDate,
    /// Queue entry to mark as served once the order commits.
    #[serde(default)]
    pub queue_entry_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PaymentUpdate {
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderExamLine {
    pub exam: Exam,
    /// The plan the exam is billed under.
    pub plan: Option<PricingPlan>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderDetail {
    pub order: Order,
    pub patient_name: String,
    pub exams: Vec<OrderExamLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderMatch {
    #[serde(rename = "pk")]
    pub id: i64,
    #[serde(rename = "paciente")]
    pub patient_name: String,
    /// Registration date formatted `dd/mm/yyyy`.
    #[serde(rename = "data")]
    pub date: String,
}

// ============================================================================
// ARRIVAL QUEUE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct QueueEntry {
    pub id: i64,
    pub patient_id: i64,
    pub sequence: String,
    pub entry_date: NaiveDate,
    pub status: QueueStatus,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct QueueEntryRow {
    id: i64,
    patient_id: i64,
    sequence: String,
    entry_date: NaiveDate,
    status: String,
}

impl TryFrom<QueueEntryRow> for QueueEntry {
    type Error = LabError;

    fn try_from(row: QueueEntryRow) -> LabResult<Self> {
        Ok(Self {
            id: row.id,
            patient_id: row.patient_id,
            sequence: row.sequence,
            entry_date: row.entry_date,
            status: row.status.parse()?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct QueueCounts {
    pub waiting: i64,
    pub served: i64,
    pub total: i64,
}

/// Converts a batch of rows, failing on the first invalid one.
pub(crate) fn convert_rows<R, T>(rows: Vec<R>) -> LabResult<Vec<T>>
where
    T: TryFrom<R, Error = LabError>,
{
    rows.into_iter().map(T::try_from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_kind_covers_all_flag_pairs() {
        assert_eq!(ReferenceKind::from_flags(false, false), ReferenceKind::Plain);
        assert_eq!(ReferenceKind::from_flags(true, false), ReferenceKind::Factor);
        assert_eq!(ReferenceKind::from_flags(false, true), ReferenceKind::Expected);
        assert_eq!(
            ReferenceKind::from_flags(true, true),
            ReferenceKind::FactorAndExpected
        );

        for (f, e) in [(false, false), (true, false), (false, true), (true, true)] {
            let kind = ReferenceKind::from_flags(f, e);
            assert_eq!((kind.has_factor(), kind.has_expected()), (f, e));
        }
    }

    #[test]
    fn test_text_enums_round_trip_through_column_text() {
        for status in [PaymentStatus::Pending, PaymentStatus::Paid, PaymentStatus::Partial] {
            assert_eq!(status.as_str().parse::<PaymentStatus>().unwrap(), status);
        }
        assert_eq!("PIX".parse::<PaymentMethod>().unwrap(), PaymentMethod::Pix);
        assert!(matches!(
            "PAID".parse::<PaymentStatus>(),
            Err(LabError::UnknownVariant { .. })
        ));
    }

    #[test]
    fn test_serde_uses_column_text() {
        let json = serde_json::to_string(&QueueStatus::Served).unwrap();
        assert_eq!(json, "\"ATENDIDO\"");
        let method: PaymentMethod = serde_json::from_str("\"CARTAO_DEBITO\"").unwrap();
        assert_eq!(method, PaymentMethod::DebitCard);
    }

    #[test]
    fn test_price_text_is_two_decimal_places() {
        assert_eq!(price_to_db(Decimal::new(35, 0)), "35.00");
        assert_eq!(price_to_db(Decimal::new(1250, 2)), "12.50");
        assert_eq!(parse_price("12.50").unwrap(), Decimal::new(1250, 2));
        assert!(matches!(
            parse_price("twelve"),
            Err(LabError::InvalidPrice { .. })
        ));
    }

    #[test]
    fn test_new_patient_rejects_invalid_cpf() {
        let body = serde_json::json!({
            "name": "Maria",
            "cpf": "123.456.789-00",
            "sex": "F",
            "phone": "11999990000",
            "birth_date": "01/02/1980"
        });
        assert!(serde_json::from_value::<NewPatient>(body).is_err());
    }
}
