//! # API REST
//!
//! REST API for the clinical laboratory.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (JSON and form bodies, PDF downloads, CORS)
//!
//! Business rules live in `lab-core`; this crate only translates requests
//! and maps `LabError` onto status codes.

#![warn(rust_2018_idioms)]

pub mod error;
pub mod handlers;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use handlers::{billing, documents, exams, health, orders, patients, queue, search};
use lab_core::{
    models, BillingService, CoreConfig, Database, DocumentService, ExamService, OrderService,
    PatientService, QueueService,
};

/// Application state shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<CoreConfig>,
    pub patients: PatientService,
    pub exams: ExamService,
    pub orders: OrderService,
    pub queue: QueueService,
    pub billing: BillingService,
    pub documents: DocumentService,
}

impl AppState {
    pub fn new(cfg: Arc<CoreConfig>, db: Database) -> Self {
        Self {
            patients: PatientService::new(db.clone()),
            exams: ExamService::new(db.clone()),
            orders: OrderService::new(db.clone()),
            queue: QueueService::new(db.clone()),
            billing: BillingService::new(db.clone()),
            documents: DocumentService::new(db, &cfg),
            cfg,
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        patients::list_patients,
        patients::list_staff,
        patients::create_patient,
        patients::get_patient,
        patients::update_patient,
        patients::add_address,
        patients::primary_address,
        patients::patient_history,
        exams::list_templates,
        exams::create_template,
        exams::get_exam,
        exams::update_exam,
        exams::delete_exam,
        exams::deactivate_exam,
        exams::add_plan,
        exams::update_plan,
        exams::delete_plan,
        exams::add_reference,
        exams::update_reference,
        exams::delete_reference,
        exams::add_factor,
        exams::update_factor,
        exams::delete_factor,
        exams::add_expected,
        exams::update_expected,
        exams::delete_expected,
        exams::record_results,
        exams::attach_result,
        exams::set_status,
        exams::list_clones,
        exams::pending_in_house,
        exams::pending_outsourced,
        exams::completed_on,
        orders::create_order,
        orders::list_orders,
        orders::get_order,
        orders::update_payment,
        orders::add_exams,
        orders::remove_exam,
        orders::change_exam_plan,
        queue::add_entry,
        queue::list_queue,
        queue::update_status,
        queue::day_counts,
        billing::aggregate,
        billing::summary,
        documents::exam_label,
        documents::result_report,
        documents::order_receipt,
        search::search_patients,
        search::search_exams,
        search::search_orders,
    ),
    components(schemas(
        api_shared::HealthRes,
        api_shared::SearchForm,
        models::Sex,
        models::ExamStatus,
        models::PaymentMethod,
        models::PaymentStatus,
        models::QueueStatus,
        models::Patient,
        models::NewPatient,
        models::Address,
        models::NewAddress,
        models::PatientMatch,
        models::PricingPlan,
        models::NewPlan,
        models::Exam,
        models::ExamDraft,
        models::ReferenceKind,
        models::ReferenceRange,
        models::NewReference,
        models::FactorEntry,
        models::NewFactor,
        models::ExpectedValue,
        models::NewExpected,
        models::ReferenceDetail,
        models::ExamDetail,
        models::ExamMatch,
        models::ResultEntry,
        models::ObtainedValue,
        models::Order,
        models::NewOrder,
        models::PaymentUpdate,
        models::OrderExamLine,
        models::OrderDetail,
        models::OrderMatch,
        models::QueueEntry,
        models::QueueCounts,
        lab_core::BillingFilter,
        lab_core::BillingSummary,
        lab_core::PeriodKind,
        exams::AttachmentReq,
        exams::StatusReq,
        orders::AddExamsReq,
        orders::ChangePlanReq,
        queue::NewQueueEntryReq,
        queue::QueueStatusReq,
    ))
)]
pub struct ApiDoc;

/// Builds the full REST router with Swagger UI and permissive CORS.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route(
            "/patients",
            get(patients::list_patients).post(patients::create_patient),
        )
        .route(
            "/patients/:id",
            get(patients::get_patient).put(patients::update_patient),
        )
        .route(
            "/patients/:id/address",
            get(patients::primary_address).post(patients::add_address),
        )
        .route("/patients/:id/queue", get(patients::patient_history))
        .route("/staff", get(patients::list_staff))
        .route(
            "/exams/templates",
            get(exams::list_templates).post(exams::create_template),
        )
        .route("/exams/clones", get(exams::list_clones))
        .route(
            "/exams/:id",
            get(exams::get_exam)
                .put(exams::update_exam)
                .delete(exams::delete_exam),
        )
        .route("/exams/:id/deactivate", post(exams::deactivate_exam))
        .route("/exams/:id/plans", post(exams::add_plan))
        .route("/exams/:id/references", post(exams::add_reference))
        .route("/exams/:id/results", post(exams::record_results))
        .route("/exams/:id/attachment", post(exams::attach_result))
        .route("/exams/:id/status", put(exams::set_status))
        .route(
            "/plans/:id",
            put(exams::update_plan).delete(exams::delete_plan),
        )
        .route(
            "/references/:id",
            put(exams::update_reference).delete(exams::delete_reference),
        )
        .route("/references/:id/factors", post(exams::add_factor))
        .route("/references/:id/expected", post(exams::add_expected))
        .route(
            "/factors/:id",
            put(exams::update_factor).delete(exams::delete_factor),
        )
        .route(
            "/expected/:id",
            put(exams::update_expected).delete(exams::delete_expected),
        )
        .route("/worklists/pending", get(exams::pending_in_house))
        .route("/worklists/outsourced", get(exams::pending_outsourced))
        .route("/worklists/completed", get(exams::completed_on))
        .route(
            "/orders",
            get(orders::list_orders).post(orders::create_order),
        )
        .route("/orders/:id", get(orders::get_order))
        .route("/orders/:id/payment", put(orders::update_payment))
        .route("/orders/:id/exams", post(orders::add_exams))
        .route("/orders/:id/exams/:exam_id", delete(orders::remove_exam))
        .route(
            "/orders/:id/exams/:exam_id/plan",
            put(orders::change_exam_plan),
        )
        .route("/queue", get(queue::list_queue).post(queue::add_entry))
        .route("/queue/counts", get(queue::day_counts))
        .route("/queue/:id/status", put(queue::update_status))
        .route("/billing", get(billing::aggregate))
        .route("/billing/summary", get(billing::summary))
        .route("/documents/exams/:id/label", get(documents::exam_label))
        .route("/documents/exams/:id/report", get(documents::result_report))
        .route(
            "/documents/orders/:id/receipt",
            get(documents::order_receipt),
        )
        .route("/search/patients", post(search::search_patients))
        .route("/search/exams", post(search::search_exams))
        .route("/search/orders", post(search::search_orders))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use lab_core::NonEmptyText;
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;

    /// Router over a fresh migrated database.
    pub async fn test_app() -> (Router, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let url = format!("sqlite://{}", temp_dir.path().join("lab.db").display());
        let cfg = Arc::new(
            CoreConfig::new(url, 1, NonEmptyText::new("Lab Teste").unwrap())
                .expect("config should be valid"),
        );
        let db = Database::connect(&cfg).await.expect("database should open");
        (router(AppState::new(cfg, db)), temp_dir)
    }

    pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }

    pub async fn send_json(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let (status, bytes) = send(app, request).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    pub async fn send_form(app: &Router, uri: &str, form: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form.to_string()))
            .unwrap();
        let (status, bytes) = send(app, request).await;
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    pub fn patient_body(name: &str, cpf: &str) -> Value {
        serde_json::json!({
            "name": name,
            "cpf": cpf,
            "sex": "F",
            "phone": "11999990000",
            "birth_date": "01/02/1980"
        })
    }

    /// Creates a template with one plan priced `price`; returns (template, plan) ids.
    pub async fn seed_template(app: &Router, name: &str, price: &str) -> (i64, i64) {
        let (status, exam) = send_json(
            app,
            "POST",
            "/exams/templates",
            Some(serde_json::json!({
                "name": name,
                "material": "Sangue",
                "method": "Automatizado"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let exam_id = exam["id"].as_i64().unwrap();

        let (status, plan) = send_json(
            app,
            "POST",
            &format!("/exams/{exam_id}/plans"),
            Some(serde_json::json!({ "name": "Particular", "price": price, "enabled": true })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        (exam_id, plan["id"].as_i64().unwrap())
    }
}
