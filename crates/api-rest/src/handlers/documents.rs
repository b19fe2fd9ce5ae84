//! PDF downloads: exam labels, result reports and order receipts.

use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};

use crate::error::{lab_error, ApiResult};
use crate::AppState;

fn pdf_attachment(filename: String, bytes: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        bytes,
    )
        .into_response()
}

#[utoipa::path(
    get,
    path = "/documents/exams/{id}/label",
    params(("id" = i64, Path, description = "Exam copy id")),
    responses(
        (status = 200, description = "Tube label"),
        (status = 400, description = "Exam is not on any order"),
        (status = 404, description = "Not found")
    )
)]
#[axum::debug_handler]
pub async fn exam_label(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Response> {
    let bytes = state
        .documents
        .exam_label_pdf(id)
        .await
        .map_err(lab_error("exam label"))?;
    Ok(pdf_attachment(format!("etiqueta-{id}.pdf"), bytes))
}

#[utoipa::path(
    get,
    path = "/documents/exams/{id}/report",
    params(("id" = i64, Path, description = "Exam copy id")),
    responses(
        (status = 200, description = "Result report"),
        (status = 400, description = "Exam is not on any order"),
        (status = 404, description = "Not found")
    )
)]
#[axum::debug_handler]
pub async fn result_report(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Response> {
    let bytes = state
        .documents
        .result_report_pdf(id)
        .await
        .map_err(lab_error("result report"))?;
    Ok(pdf_attachment(format!("laudo-{id}.pdf"), bytes))
}

#[utoipa::path(
    get,
    path = "/documents/orders/{id}/receipt",
    params(("id" = i64, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order receipt"),
        (status = 404, description = "Not found")
    )
)]
#[axum::debug_handler]
pub async fn order_receipt(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Response> {
    let bytes = state
        .documents
        .order_receipt_pdf(id)
        .await
        .map_err(lab_error("order receipt"))?;
    Ok(pdf_attachment(format!("orcamento-{id}.pdf"), bytes))
}

#[cfg(test)]
mod tests {
    use crate::test_support::{patient_body, seed_template, send, send_json, test_app};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn test_receipt_is_pdf_attachment() {
        let (app, _temp_dir) = test_app().await;
        let (_, patient) =
            send_json(&app, "POST", "/patients", Some(patient_body("Ana", "52998224725"))).await;
        let (exam, plan) = seed_template(&app, "Hemograma", "35.00").await;
        let (_, detail) = send_json(
            &app,
            "POST",
            "/orders",
            Some(json!({
                "patient_id": patient["id"],
                "exam_ids": [exam],
                "plan_ids": [plan],
                "registered_on": "2026-10-19"
            })),
        )
        .await;
        let order_id = detail["order"]["id"].as_i64().unwrap();

        let response = tower::ServiceExt::oneshot(
            app.clone(),
            Request::builder()
                .uri(format!("/documents/orders/{order_id}/receipt"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/pdf"
        );
        assert!(response.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .starts_with("attachment"));

        let clone_id = detail["exams"][0]["exam"]["id"].as_i64().unwrap();
        let (status, bytes) = send(
            &app,
            Request::builder()
                .uri(format!("/documents/exams/{clone_id}/label"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn test_label_for_template_is_bad_request() {
        let (app, _temp_dir) = test_app().await;
        let (exam, _) = seed_template(&app, "Hemograma", "35.00").await;

        let (status, _) = send_json(&app, "GET", &format!("/documents/exams/{exam}/label"), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send_json(&app, "GET", "/documents/orders/99/receipt", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
