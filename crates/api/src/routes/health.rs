use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;

use crate::server::AppState;
use crate::types::HealthReport;

/// 各服务及实例的健康视图
///
/// 任一服务没有可用实例时返回 503，响应体不变。
#[utoipa::path(
    get,
    path = "/health",
    tag = "健康 (Health)",
    responses(
        (status = 200, description = "全部服务可用", body = HealthReport),
        (status = 503, description = "至少一个服务没有可用实例", body = HealthReport)
    )
)]
pub async fn get_health(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = HealthReport::from_registry(state.registry());
    let status = if report.is_serving() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}
