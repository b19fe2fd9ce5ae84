use axum::{
    extract::{Query, State},
    response::Json,
};
use lab_core::{BillingFilter, BillingPeriod, BillingPeriodQuery, BillingSummary};

use super::today;
use crate::error::{lab_error, ApiResult};
use crate::AppState;

#[utoipa::path(
    get,
    path = "/billing",
    params(BillingFilter),
    responses(
        (status = 200, description = "Total over the matching orders", body = BillingSummary),
        (status = 500, description = "Internal server error")
    )
)]
/// Sums recomputed order totals over an inclusive date range.
///
/// A range whose start is after its end yields an empty summary.
#[axum::debug_handler]
pub async fn aggregate(
    State(state): State<AppState>,
    Query(filter): Query<BillingFilter>,
) -> ApiResult<Json<BillingSummary>> {
    let summary = state
        .billing
        .aggregate(filter)
        .await
        .map_err(lab_error("billing aggregate"))?;
    Ok(Json(summary))
}

#[utoipa::path(
    get,
    path = "/billing/summary",
    params(BillingPeriodQuery),
    responses(
        (status = 200, description = "Total over the named period", body = BillingSummary),
        (status = 400, description = "Period is missing the dates it needs"),
        (status = 500, description = "Internal server error")
    )
)]
#[axum::debug_handler]
pub async fn summary(
    State(state): State<AppState>,
    Query(query): Query<BillingPeriodQuery>,
) -> ApiResult<Json<BillingSummary>> {
    let period = BillingPeriod::try_from(query).map_err(lab_error("billing period"))?;
    let summary = state
        .billing
        .summary(period, today())
        .await
        .map_err(lab_error("billing summary"))?;
    Ok(Json(summary))
}

#[cfg(test)]
mod tests {
    use crate::test_support::{patient_body, seed_template, send_json, test_app};
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_range_and_day_billing() {
        let (app, _temp_dir) = test_app().await;
        let (_, patient) =
            send_json(&app, "POST", "/patients", Some(patient_body("Ana", "52998224725"))).await;
        let (exam, plan) = seed_template(&app, "Hemograma", "35.00").await;

        for day in ["2026-10-01", "2026-10-02", "2026-10-03"] {
            let (status, _) = send_json(
                &app,
                "POST",
                "/orders",
                Some(json!({
                    "patient_id": patient["id"],
                    "exam_ids": [exam],
                    "plan_ids": [plan],
                    "registered_on": day
                })),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let (status, summary) = send_json(
            &app,
            "GET",
            "/billing?start=2026-10-01&end=2026-10-02",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(summary["total"], "70.00");

        let (_, by_day) = send_json(
            &app,
            "GET",
            "/billing/summary?period=day&date=2026-10-03",
            None,
        )
        .await;
        let (_, by_range) = send_json(
            &app,
            "GET",
            "/billing?start=2026-10-03&end=2026-10-03",
            None,
        )
        .await;
        assert_eq!(by_day, by_range);
        assert_eq!(by_day["total"], "35.00");

        let (_, reversed) = send_json(
            &app,
            "GET",
            "/billing?start=2026-10-03&end=2026-10-01",
            None,
        )
        .await;
        assert_eq!(reversed["total"], "0");
        assert_eq!(reversed["orders"], json!([]));

        let (status, _) =
            send_json(&app, "GET", "/billing/summary?period=range&start=2026-10-01", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
