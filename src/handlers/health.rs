use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::AppState;

pub async fn health_check(data: web::Data<AppState>) -> HttpResponse {
    let uptime_seconds = data.start_time.elapsed().as_secs();

    match data.fellowship.stats().await {
        Ok(stats) => HttpResponse::Ok().json(json!({
            "status": "ok",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "uptime_seconds": uptime_seconds,
            "members": stats.members,
        })),
        Err(err) => HttpResponse::ServiceUnavailable().json(json!({
            "status": "unavailable",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "error": err.to_string(),
        })),
    }
}
