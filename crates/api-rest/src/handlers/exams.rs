//! Exam templates, their pricing plans and reference trees, result entry and
//! the technician worklists.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use lab_core::models::{
    Exam, ExamDetail, ExamDraft, ExamStatus, ExpectedValue, FactorEntry, NewExpected, NewFactor,
    NewPlan, NewReference, PricingPlan, ReferenceRange, ResultEntry,
};
use serde::Deserialize;
use utoipa::ToSchema;

use super::DateQuery;
use crate::error::{lab_error, ApiResult};
use crate::AppState;

/// Path of an outsourced result PDF already stored by the front end.
#[derive(Debug, Deserialize, ToSchema)]
pub struct AttachmentReq {
    pub path: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct StatusReq {
    pub status: ExamStatus,
}

// ============================================================================
// TEMPLATES
// ============================================================================

#[utoipa::path(
    get,
    path = "/exams/templates",
    responses((status = 200, description = "Active templates by name", body = [Exam]))
)]
#[axum::debug_handler]
pub async fn list_templates(State(state): State<AppState>) -> ApiResult<Json<Vec<Exam>>> {
    let exams = state
        .exams
        .list_templates()
        .await
        .map_err(lab_error("list templates"))?;
    Ok(Json(exams))
}

#[utoipa::path(
    post,
    path = "/exams/templates",
    request_body = ExamDraft,
    responses(
        (status = 201, description = "Template created with a fresh exam code", body = Exam),
        (status = 500, description = "Internal server error")
    )
)]
#[axum::debug_handler]
pub async fn create_template(
    State(state): State<AppState>,
    Json(req): Json<ExamDraft>,
) -> ApiResult<(StatusCode, Json<Exam>)> {
    let exam = state
        .exams
        .create_template(req)
        .await
        .map_err(lab_error("create template"))?;
    Ok((StatusCode::CREATED, Json(exam)))
}

#[utoipa::path(
    get,
    path = "/exams/{id}",
    params(("id" = i64, Path, description = "Exam id")),
    responses(
        (status = 200, description = "Exam with plans and references", body = ExamDetail),
        (status = 404, description = "Not found")
    )
)]
#[axum::debug_handler]
pub async fn get_exam(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ExamDetail>> {
    let detail = state
        .exams
        .get_exam_detail(id)
        .await
        .map_err(lab_error("get exam"))?;
    Ok(Json(detail))
}

#[utoipa::path(
    put,
    path = "/exams/{id}",
    params(("id" = i64, Path, description = "Exam id")),
    request_body = ExamDraft,
    responses(
        (status = 200, description = "Exam updated", body = Exam),
        (status = 404, description = "Not found")
    )
)]
#[axum::debug_handler]
pub async fn update_exam(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<ExamDraft>,
) -> ApiResult<Json<Exam>> {
    let exam = state
        .exams
        .update_exam(id, req)
        .await
        .map_err(lab_error("update exam"))?;
    Ok(Json(exam))
}

#[utoipa::path(
    delete,
    path = "/exams/{id}",
    params(("id" = i64, Path, description = "Exam id")),
    responses(
        (status = 204, description = "Exam and its own plans deleted"),
        (status = 404, description = "Not found")
    )
)]
#[axum::debug_handler]
pub async fn delete_exam(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state
        .exams
        .delete_exam(id)
        .await
        .map_err(lab_error("delete exam"))?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/exams/{id}/deactivate",
    params(("id" = i64, Path, description = "Exam id")),
    responses(
        (status = 204, description = "Exam hidden from listings"),
        (status = 404, description = "Not found")
    )
)]
#[axum::debug_handler]
pub async fn deactivate_exam(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state
        .exams
        .deactivate_exam(id)
        .await
        .map_err(lab_error("deactivate exam"))?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// PRICING PLANS
// ============================================================================

#[utoipa::path(
    post,
    path = "/exams/{id}/plans",
    params(("id" = i64, Path, description = "Exam id")),
    request_body = NewPlan,
    responses(
        (status = 201, description = "Plan added", body = PricingPlan),
        (status = 400, description = "Negative price"),
        (status = 404, description = "Not found")
    )
)]
#[axum::debug_handler]
pub async fn add_plan(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<NewPlan>,
) -> ApiResult<(StatusCode, Json<PricingPlan>)> {
    let plan = state
        .exams
        .add_plan(id, req)
        .await
        .map_err(lab_error("add plan"))?;
    Ok((StatusCode::CREATED, Json(plan)))
}

#[utoipa::path(
    put,
    path = "/plans/{id}",
    params(("id" = i64, Path, description = "Plan id")),
    request_body = NewPlan,
    responses(
        (status = 200, description = "Plan updated", body = PricingPlan),
        (status = 400, description = "Negative price"),
        (status = 404, description = "Not found")
    )
)]
#[axum::debug_handler]
pub async fn update_plan(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<NewPlan>,
) -> ApiResult<Json<PricingPlan>> {
    let plan = state
        .exams
        .update_plan(id, req)
        .await
        .map_err(lab_error("update plan"))?;
    Ok(Json(plan))
}

#[utoipa::path(
    delete,
    path = "/plans/{id}",
    params(("id" = i64, Path, description = "Plan id")),
    responses(
        (status = 204, description = "Plan deleted"),
        (status = 404, description = "Not found"),
        (status = 422, description = "Last plan of an exam billed on an order")
    )
)]
#[axum::debug_handler]
pub async fn delete_plan(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state
        .exams
        .delete_plan(id)
        .await
        .map_err(lab_error("delete plan"))?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// REFERENCE TREE
// ============================================================================

#[utoipa::path(
    post,
    path = "/exams/{id}/references",
    params(("id" = i64, Path, description = "Exam id")),
    request_body = NewReference,
    responses(
        (status = 201, description = "Reference range added", body = ReferenceRange),
        (status = 404, description = "Not found")
    )
)]
#[axum::debug_handler]
pub async fn add_reference(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<NewReference>,
) -> ApiResult<(StatusCode, Json<ReferenceRange>)> {
    let reference = state
        .exams
        .add_reference(id, req)
        .await
        .map_err(lab_error("add reference"))?;
    Ok((StatusCode::CREATED, Json(reference)))
}

#[utoipa::path(
    put,
    path = "/references/{id}",
    params(("id" = i64, Path, description = "Reference id")),
    request_body = NewReference,
    responses(
        (status = 200, description = "Reference range updated", body = ReferenceRange),
        (status = 400, description = "Bounds given for a tabular reference"),
        (status = 404, description = "Not found")
    )
)]
#[axum::debug_handler]
pub async fn update_reference(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<NewReference>,
) -> ApiResult<Json<ReferenceRange>> {
    let reference = state
        .exams
        .update_reference(id, req)
        .await
        .map_err(lab_error("update reference"))?;
    Ok(Json(reference))
}

#[utoipa::path(
    delete,
    path = "/references/{id}",
    params(("id" = i64, Path, description = "Reference id")),
    responses(
        (status = 204, description = "Reference range and its tables deleted"),
        (status = 404, description = "Not found")
    )
)]
#[axum::debug_handler]
pub async fn delete_reference(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state
        .exams
        .delete_reference(id)
        .await
        .map_err(lab_error("delete reference"))?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/references/{id}/factors",
    params(("id" = i64, Path, description = "Reference id")),
    request_body = NewFactor,
    responses(
        (status = 201, description = "Factor row added; plain bounds cleared", body = FactorEntry),
        (status = 404, description = "Not found")
    )
)]
#[axum::debug_handler]
pub async fn add_factor(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<NewFactor>,
) -> ApiResult<(StatusCode, Json<FactorEntry>)> {
    let factor = state
        .exams
        .add_factor(id, req)
        .await
        .map_err(lab_error("add factor"))?;
    Ok((StatusCode::CREATED, Json(factor)))
}

#[utoipa::path(
    put,
    path = "/factors/{id}",
    params(("id" = i64, Path, description = "Factor id")),
    request_body = NewFactor,
    responses(
        (status = 200, description = "Factor row updated", body = FactorEntry),
        (status = 404, description = "Not found")
    )
)]
#[axum::debug_handler]
pub async fn update_factor(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<NewFactor>,
) -> ApiResult<Json<FactorEntry>> {
    let factor = state
        .exams
        .update_factor(id, req)
        .await
        .map_err(lab_error("update factor"))?;
    Ok(Json(factor))
}

#[utoipa::path(
    delete,
    path = "/factors/{id}",
    params(("id" = i64, Path, description = "Factor id")),
    responses(
        (status = 204, description = "Factor row deleted"),
        (status = 404, description = "Not found")
    )
)]
#[axum::debug_handler]
pub async fn delete_factor(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state
        .exams
        .delete_factor(id)
        .await
        .map_err(lab_error("delete factor"))?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/references/{id}/expected",
    params(("id" = i64, Path, description = "Reference id")),
    request_body = NewExpected,
    responses(
        (status = 201, description = "Expected value added; plain bounds cleared", body = ExpectedValue),
        (status = 404, description = "Not found")
    )
)]
#[axum::debug_handler]
pub async fn add_expected(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<NewExpected>,
) -> ApiResult<(StatusCode, Json<ExpectedValue>)> {
    let expected = state
        .exams
        .add_expected(id, req)
        .await
        .map_err(lab_error("add expected value"))?;
    Ok((StatusCode::CREATED, Json(expected)))
}

#[utoipa::path(
    put,
    path = "/expected/{id}",
    params(("id" = i64, Path, description = "Expected value id")),
    request_body = NewExpected,
    responses(
        (status = 200, description = "Expected value updated", body = ExpectedValue),
        (status = 404, description = "Not found")
    )
)]
#[axum::debug_handler]
pub async fn update_expected(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<NewExpected>,
) -> ApiResult<Json<ExpectedValue>> {
    let expected = state
        .exams
        .update_expected(id, req)
        .await
        .map_err(lab_error("update expected value"))?;
    Ok(Json(expected))
}

#[utoipa::path(
    delete,
    path = "/expected/{id}",
    params(("id" = i64, Path, description = "Expected value id")),
    responses(
        (status = 204, description = "Expected value deleted"),
        (status = 404, description = "Not found")
    )
)]
#[axum::debug_handler]
pub async fn delete_expected(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state
        .exams
        .delete_expected(id)
        .await
        .map_err(lab_error("delete expected value"))?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// RESULTS
// ============================================================================

#[utoipa::path(
    post,
    path = "/exams/{id}/results",
    params(("id" = i64, Path, description = "Exam id")),
    request_body = ResultEntry,
    responses(
        (status = 200, description = "Results stored; exam completed", body = Exam),
        (status = 400, description = "Template exam or foreign ids"),
        (status = 404, description = "Exam or technician not found")
    )
)]
/// Stores obtained values typed in by the technician and completes the exam.
#[axum::debug_handler]
pub async fn record_results(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<ResultEntry>,
) -> ApiResult<Json<Exam>> {
    let exam = state
        .exams
        .record_results(id, req)
        .await
        .map_err(lab_error("record results"))?;
    Ok(Json(exam))
}

#[utoipa::path(
    post,
    path = "/exams/{id}/attachment",
    params(("id" = i64, Path, description = "Exam id")),
    request_body = AttachmentReq,
    responses(
        (status = 200, description = "Attachment recorded; exam completed", body = Exam),
        (status = 400, description = "Not a PDF path, or template exam"),
        (status = 404, description = "Not found")
    )
)]
#[axum::debug_handler]
pub async fn attach_result(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<AttachmentReq>,
) -> ApiResult<Json<Exam>> {
    let exam = state
        .exams
        .attach_outsourced_result(id, &req.path)
        .await
        .map_err(lab_error("attach result"))?;
    Ok(Json(exam))
}

#[utoipa::path(
    put,
    path = "/exams/{id}/status",
    params(("id" = i64, Path, description = "Exam id")),
    request_body = StatusReq,
    responses(
        (status = 200, description = "Status changed", body = Exam),
        (status = 404, description = "Not found")
    )
)]
#[axum::debug_handler]
pub async fn set_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<StatusReq>,
) -> ApiResult<Json<Exam>> {
    let exam = state
        .exams
        .set_status(id, req.status)
        .await
        .map_err(lab_error("set exam status"))?;
    Ok(Json(exam))
}

// ============================================================================
// WORKLISTS
// ============================================================================

#[utoipa::path(
    get,
    path = "/exams/clones",
    responses((status = 200, description = "Active exam copies, newest first", body = [Exam]))
)]
#[axum::debug_handler]
pub async fn list_clones(State(state): State<AppState>) -> ApiResult<Json<Vec<Exam>>> {
    let exams = state
        .exams
        .list_clones()
        .await
        .map_err(lab_error("list clones"))?;
    Ok(Json(exams))
}

#[utoipa::path(
    get,
    path = "/worklists/pending",
    params(DateQuery),
    responses((status = 200, description = "In-house exams waiting on the day", body = [Exam]))
)]
#[axum::debug_handler]
pub async fn pending_in_house(
    State(state): State<AppState>,
    Query(query): Query<DateQuery>,
) -> ApiResult<Json<Vec<Exam>>> {
    let exams = state
        .exams
        .pending_in_house(query.or_today())
        .await
        .map_err(lab_error("pending worklist"))?;
    Ok(Json(exams))
}

#[utoipa::path(
    get,
    path = "/worklists/outsourced",
    responses((status = 200, description = "Outsourced exams awaiting a result PDF", body = [Exam]))
)]
#[axum::debug_handler]
pub async fn pending_outsourced(State(state): State<AppState>) -> ApiResult<Json<Vec<Exam>>> {
    let exams = state
        .exams
        .pending_outsourced()
        .await
        .map_err(lab_error("outsourced worklist"))?;
    Ok(Json(exams))
}

#[utoipa::path(
    get,
    path = "/worklists/completed",
    params(DateQuery),
    responses((status = 200, description = "Exams completed on the day", body = [Exam]))
)]
#[axum::debug_handler]
pub async fn completed_on(
    State(state): State<AppState>,
    Query(query): Query<DateQuery>,
) -> ApiResult<Json<Vec<Exam>>> {
    let exams = state
        .exams
        .completed_on(query.or_today())
        .await
        .map_err(lab_error("completed worklist"))?;
    Ok(Json(exams))
}

#[cfg(test)]
mod tests {
    use crate::test_support::{seed_template, send_json, test_app};
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_template_detail_lists_plans_and_references() {
        let (app, _temp_dir) = test_app().await;
        let (exam_id, _) = seed_template(&app, "Hemograma", "35.00").await;

        let (status, reference) = send_json(
            &app,
            "POST",
            &format!("/exams/{exam_id}/references"),
            Some(json!({ "label": "Hemoglobina", "lower_bound": "12", "upper_bound": "16" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let reference_id = reference["id"].as_i64().unwrap();

        let (status, _) = send_json(
            &app,
            "POST",
            &format!("/references/{reference_id}/factors"),
            Some(json!({ "label": "Adulto", "age_bracket": "18+" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, detail) = send_json(&app, "GET", &format!("/exams/{exam_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detail["plans"][0]["price"], "35.00");
        assert_eq!(detail["references"][0]["kind"], "factor");
        assert!(detail["references"][0]["reference"]["lower_bound"].is_null());
    }

    #[tokio::test]
    async fn test_negative_price_is_bad_request() {
        let (app, _temp_dir) = test_app().await;
        let (exam_id, _) = seed_template(&app, "Glicose", "10.00").await;

        let (status, _) = send_json(
            &app,
            "POST",
            &format!("/exams/{exam_id}/plans"),
            Some(json!({ "name": "Convênio", "price": "-1.00" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_results_on_template_are_rejected() {
        let (app, _temp_dir) = test_app().await;
        let (exam_id, _) = seed_template(&app, "Glicose", "10.00").await;

        let (status, _) = send_json(
            &app,
            "POST",
            &format!("/exams/{exam_id}/results"),
            Some(json!({ "comment": "ok" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send_json(&app, "DELETE", "/exams/999", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
