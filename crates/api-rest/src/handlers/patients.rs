use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use lab_core::models::{Address, NewAddress, NewPatient, Patient, QueueEntry};

use crate::error::{lab_error, ApiResult};
use crate::AppState;

#[utoipa::path(
    get,
    path = "/patients",
    responses(
        (status = 200, description = "Active non-staff people ordered by name", body = [Patient]),
        (status = 500, description = "Internal server error")
    )
)]
#[axum::debug_handler]
pub async fn list_patients(State(state): State<AppState>) -> ApiResult<Json<Vec<Patient>>> {
    let patients = state
        .patients
        .list_patients()
        .await
        .map_err(lab_error("list patients"))?;
    Ok(Json(patients))
}

#[utoipa::path(
    get,
    path = "/staff",
    responses(
        (status = 200, description = "Active staff members ordered by name", body = [Patient]),
        (status = 500, description = "Internal server error")
    )
)]
#[axum::debug_handler]
pub async fn list_staff(State(state): State<AppState>) -> ApiResult<Json<Vec<Patient>>> {
    let staff = state
        .patients
        .list_staff()
        .await
        .map_err(lab_error("list staff"))?;
    Ok(Json(staff))
}

#[utoipa::path(
    post,
    path = "/patients",
    request_body = NewPatient,
    responses(
        (status = 201, description = "Patient registered", body = Patient),
        (status = 400, description = "Bad request"),
        (status = 500, description = "Internal server error")
    )
)]
/// Registers a patient or staff member.
///
/// # Errors
/// Returns `400 Bad Request` if the CPF is already registered.
#[axum::debug_handler]
pub async fn create_patient(
    State(state): State<AppState>,
    Json(req): Json<NewPatient>,
) -> ApiResult<(StatusCode, Json<Patient>)> {
    let patient = state
        .patients
        .create_patient(req)
        .await
        .map_err(lab_error("create patient"))?;
    Ok((StatusCode::CREATED, Json(patient)))
}

#[utoipa::path(
    get,
    path = "/patients/{id}",
    params(("id" = i64, Path, description = "Patient id")),
    responses(
        (status = 200, description = "Patient", body = Patient),
        (status = 404, description = "Not found")
    )
)]
#[axum::debug_handler]
pub async fn get_patient(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Patient>> {
    let patient = state
        .patients
        .get_patient(id)
        .await
        .map_err(lab_error("get patient"))?;
    Ok(Json(patient))
}

#[utoipa::path(
    put,
    path = "/patients/{id}",
    params(("id" = i64, Path, description = "Patient id")),
    request_body = NewPatient,
    responses(
        (status = 200, description = "Patient updated", body = Patient),
        (status = 400, description = "Bad request"),
        (status = 404, description = "Not found")
    )
)]
#[axum::debug_handler]
pub async fn update_patient(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<NewPatient>,
) -> ApiResult<Json<Patient>> {
    let patient = state
        .patients
        .update_patient(id, req)
        .await
        .map_err(lab_error("update patient"))?;
    Ok(Json(patient))
}

#[utoipa::path(
    post,
    path = "/patients/{id}/address",
    params(("id" = i64, Path, description = "Patient id")),
    request_body = NewAddress,
    responses(
        (status = 201, description = "Address added", body = Address),
        (status = 404, description = "Not found")
    )
)]
#[axum::debug_handler]
pub async fn add_address(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<NewAddress>,
) -> ApiResult<(StatusCode, Json<Address>)> {
    let address = state
        .patients
        .add_address(id, req)
        .await
        .map_err(lab_error("add address"))?;
    Ok((StatusCode::CREATED, Json(address)))
}

#[utoipa::path(
    get,
    path = "/patients/{id}/address",
    params(("id" = i64, Path, description = "Patient id")),
    responses(
        (status = 200, description = "Primary address, or null when none is on file", body = Option<Address>),
        (status = 404, description = "Not found")
    )
)]
/// Returns the patient's first address, `null` when none was registered.
#[axum::debug_handler]
pub async fn primary_address(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Option<Address>>> {
    let address = state
        .patients
        .primary_address(id)
        .await
        .map_err(lab_error("primary address"))?;
    Ok(Json(address))
}

#[utoipa::path(
    get,
    path = "/patients/{id}/queue",
    params(("id" = i64, Path, description = "Patient id")),
    responses(
        (status = 200, description = "Queue entries of the patient, newest first", body = [QueueEntry])
    )
)]
#[axum::debug_handler]
pub async fn patient_history(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Vec<QueueEntry>>> {
    let entries = state
        .queue
        .entries_for_patient(id)
        .await
        .map_err(lab_error("patient history"))?;
    Ok(Json(entries))
}
