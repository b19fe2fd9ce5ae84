use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use lab_core::models::{NewOrder, Order, OrderDetail, PaymentUpdate};
use serde::Deserialize;
use utoipa::ToSchema;

use super::DateQuery;
use crate::error::{lab_error, ApiResult};
use crate::AppState;

/// Further templates to clone into an existing order.
#[derive(Debug, Deserialize, ToSchema)]
pub struct AddExamsReq {
    pub exam_ids: Vec<i64>,
    #[serde(default)]
    pub plan_ids: Vec<i64>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChangePlanReq {
    /// A plan of the template the exam was cloned from.
    pub plan_id: i64,
}

#[utoipa::path(
    post,
    path = "/orders",
    request_body = NewOrder,
    responses(
        (status = 201, description = "Order registered with cloned exams", body = OrderDetail),
        (status = 400, description = "No exam selected or foreign queue entry"),
        (status = 404, description = "Patient, template or queue entry not found"),
        (status = 422, description = "A selected exam has no pricing plan")
    )
)]
/// Registers an order, cloning every selected template.
///
/// Nothing is stored unless every clone succeeds.
#[axum::debug_handler]
pub async fn create_order(
    State(state): State<AppState>,
    Json(req): Json<NewOrder>,
) -> ApiResult<(StatusCode, Json<OrderDetail>)> {
    let detail = state
        .orders
        .create_order(req)
        .await
        .map_err(lab_error("create order"))?;
    Ok((StatusCode::CREATED, Json(detail)))
}

#[utoipa::path(
    get,
    path = "/orders",
    params(DateQuery),
    responses((status = 200, description = "Orders registered on the day", body = [Order]))
)]
#[axum::debug_handler]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<DateQuery>,
) -> ApiResult<Json<Vec<Order>>> {
    let orders = state
        .orders
        .list_for_date(query.or_today())
        .await
        .map_err(lab_error("list orders"))?;
    Ok(Json(orders))
}

#[utoipa::path(
    get,
    path = "/orders/{id}",
    params(("id" = i64, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order with its exams", body = OrderDetail),
        (status = 404, description = "Not found")
    )
)]
#[axum::debug_handler]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<OrderDetail>> {
    let detail = state
        .orders
        .get_order(id)
        .await
        .map_err(lab_error("get order"))?;
    Ok(Json(detail))
}

#[utoipa::path(
    put,
    path = "/orders/{id}/payment",
    params(("id" = i64, Path, description = "Order id")),
    request_body = PaymentUpdate,
    responses(
        (status = 200, description = "Payment details updated", body = Order),
        (status = 404, description = "Not found")
    )
)]
#[axum::debug_handler]
pub async fn update_payment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<PaymentUpdate>,
) -> ApiResult<Json<Order>> {
    let order = state
        .orders
        .update_payment(id, req)
        .await
        .map_err(lab_error("update payment"))?;
    Ok(Json(order))
}

#[utoipa::path(
    post,
    path = "/orders/{id}/exams",
    params(("id" = i64, Path, description = "Order id")),
    request_body = AddExamsReq,
    responses(
        (status = 200, description = "Exams cloned into the order", body = OrderDetail),
        (status = 400, description = "No exam selected"),
        (status = 404, description = "Not found"),
        (status = 422, description = "A selected exam has no pricing plan")
    )
)]
#[axum::debug_handler]
pub async fn add_exams(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<AddExamsReq>,
) -> ApiResult<Json<OrderDetail>> {
    let detail = state
        .orders
        .add_exams(id, &req.exam_ids, &req.plan_ids)
        .await
        .map_err(lab_error("add exams to order"))?;
    Ok(Json(detail))
}

#[utoipa::path(
    delete,
    path = "/orders/{id}/exams/{exam_id}",
    params(
        ("id" = i64, Path, description = "Order id"),
        ("exam_id" = i64, Path, description = "Exam copy id")
    ),
    responses(
        (status = 200, description = "Exam removed; total recomputed", body = OrderDetail),
        (status = 404, description = "Not found")
    )
)]
#[axum::debug_handler]
pub async fn remove_exam(
    State(state): State<AppState>,
    Path((id, exam_id)): Path<(i64, i64)>,
) -> ApiResult<Json<OrderDetail>> {
    let detail = state
        .orders
        .remove_exam(id, exam_id)
        .await
        .map_err(lab_error("remove exam from order"))?;
    Ok(Json(detail))
}

#[utoipa::path(
    put,
    path = "/orders/{id}/exams/{exam_id}/plan",
    params(
        ("id" = i64, Path, description = "Order id"),
        ("exam_id" = i64, Path, description = "Exam copy id")
    ),
    request_body = ChangePlanReq,
    responses(
        (status = 200, description = "Exam billed under the new plan", body = OrderDetail),
        (status = 400, description = "Plan does not belong to the template"),
        (status = 404, description = "Not found")
    )
)]
#[axum::debug_handler]
pub async fn change_exam_plan(
    State(state): State<AppState>,
    Path((id, exam_id)): Path<(i64, i64)>,
    Json(req): Json<ChangePlanReq>,
) -> ApiResult<Json<OrderDetail>> {
    let detail = state
        .orders
        .change_exam_plan(id, exam_id, req.plan_id)
        .await
        .map_err(lab_error("change exam plan"))?;
    Ok(Json(detail))
}

#[cfg(test)]
mod tests {
    use crate::test_support::{patient_body, seed_template, send_json, test_app};
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_order_total_is_sum_of_selected_plans() {
        let (app, _temp_dir) = test_app().await;
        let (_, patient) =
            send_json(&app, "POST", "/patients", Some(patient_body("Ana", "52998224725"))).await;
        let (cbc, cbc_plan) = seed_template(&app, "Hemograma", "35.00").await;
        let (glucose, glucose_plan) = seed_template(&app, "Glicose", "12.50").await;

        let (status, detail) = send_json(
            &app,
            "POST",
            "/orders",
            Some(json!({
                "patient_id": patient["id"],
                "exam_ids": [cbc, glucose],
                "plan_ids": [cbc_plan, glucose_plan],
                "registered_on": "2026-10-19"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(detail["order"]["total"], "47.50");
        assert_eq!(detail["exams"].as_array().unwrap().len(), 2);
        assert_eq!(detail["exams"][0]["exam"]["template_id"], cbc);

        let order_id = detail["order"]["id"].as_i64().unwrap();
        let clone_id = detail["exams"][1]["exam"]["id"].as_i64().unwrap();
        let (status, detail) = send_json(
            &app,
            "DELETE",
            &format!("/orders/{order_id}/exams/{clone_id}"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detail["order"]["total"], "35.00");
    }

    #[tokio::test]
    async fn test_empty_selection_and_missing_price() {
        let (app, _temp_dir) = test_app().await;
        let (_, patient) =
            send_json(&app, "POST", "/patients", Some(patient_body("Ana", "52998224725"))).await;

        let (status, _) = send_json(
            &app,
            "POST",
            "/orders",
            Some(json!({
                "patient_id": patient["id"],
                "exam_ids": [],
                "registered_on": "2026-10-19"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, template) = send_json(
            &app,
            "POST",
            "/exams/templates",
            Some(json!({ "name": "Ureia", "material": "Soro", "method": "Enzimático" })),
        )
        .await;
        let (status, _) = send_json(
            &app,
            "POST",
            "/orders",
            Some(json!({
                "patient_id": patient["id"],
                "exam_ids": [template["id"]],
                "registered_on": "2026-10-19"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (_, orders) = send_json(&app, "GET", "/orders?date=2026-10-19", None).await;
        assert_eq!(orders.as_array().unwrap().len(), 0);
    }
}
