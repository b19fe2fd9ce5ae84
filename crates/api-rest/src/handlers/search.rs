//! Live-search endpoints behind the front-desk autocomplete boxes.

use api_shared::{SearchForm, SearchRes};
use axum::{extract::State, response::Json, Form};
use lab_core::constants::{NO_EXAM_FOUND, NO_ORDER_FOUND, NO_PATIENT_FOUND};
use lab_core::models::{ExamMatch, OrderMatch, PatientMatch};

use crate::error::{lab_error, ApiResult};
use crate::AppState;

#[utoipa::path(
    post,
    path = "/search/patients",
    request_body(content = SearchForm, content_type = "application/x-www-form-urlencoded"),
    responses((status = 200, description = "Matching patients or a no-results message"))
)]
#[axum::debug_handler]
pub async fn search_patients(
    State(state): State<AppState>,
    Form(form): Form<SearchForm>,
) -> ApiResult<Json<SearchRes<PatientMatch>>> {
    if !form.is_ajax() {
        return Ok(Json(SearchRes::ignored()));
    }
    let matches = state
        .patients
        .search_by_name(form.fragment())
        .await
        .map_err(lab_error("search patients"))?;
    Ok(Json(SearchRes::from_matches(matches, NO_PATIENT_FOUND)))
}

#[utoipa::path(
    post,
    path = "/search/exams",
    request_body(content = SearchForm, content_type = "application/x-www-form-urlencoded"),
    responses((status = 200, description = "Exams whose code matches, or a no-results message"))
)]
#[axum::debug_handler]
pub async fn search_exams(
    State(state): State<AppState>,
    Form(form): Form<SearchForm>,
) -> ApiResult<Json<SearchRes<ExamMatch>>> {
    if !form.is_ajax() {
        return Ok(Json(SearchRes::ignored()));
    }
    let matches = state
        .exams
        .search_by_code(form.fragment())
        .await
        .map_err(lab_error("search exams"))?;
    Ok(Json(SearchRes::from_matches(matches, NO_EXAM_FOUND)))
}

#[utoipa::path(
    post,
    path = "/search/orders",
    request_body(content = SearchForm, content_type = "application/x-www-form-urlencoded"),
    responses((status = 200, description = "Orders whose patient matches, or a no-results message"))
)]
#[axum::debug_handler]
pub async fn search_orders(
    State(state): State<AppState>,
    Form(form): Form<SearchForm>,
) -> ApiResult<Json<SearchRes<OrderMatch>>> {
    if !form.is_ajax() {
        return Ok(Json(SearchRes::ignored()));
    }
    let matches = state
        .orders
        .search_by_patient_name(form.fragment())
        .await
        .map_err(lab_error("search orders"))?;
    Ok(Json(SearchRes::from_matches(matches, NO_ORDER_FOUND)))
}
