use std::sync::atomic::{AtomicU64, Ordering};

use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::services::coordinator::FellowshipError;
use crate::AppState;

pub async fn status_handler(data: web::Data<AppState>) -> Result<HttpResponse, FellowshipError> {
    let uptime_seconds = data.start_time.elapsed().as_secs();
    let stats = data.fellowship.stats().await?;
    let metrics = &data.metrics;
    let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

    Ok(HttpResponse::Ok().json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "fellowship": {
            "groups": stats.groups,
            "members": stats.members,
            "pending_fetches": stats.pending_fetches,
            "description": "Live groups, sessions and parked long-polls"
        },
        "fetches": {
            "total": load(&metrics.fetches),
            "deferred": load(&metrics.deferred_fetches),
            "cancelled": load(&metrics.cancelled_fetches),
            "avg_wait_ms": metrics.avg_fetch_wait_ms().await,
            "description": "Fetch calls since server start and how long they waited"
        },
        "deliveries": {
            "total": load(&metrics.deliveries),
            "stale": load(&metrics.stale_deliveries),
            "description": "Messages queued for live sessions, and ones dropped for unknown sessions"
        },
        "sessions": {
            "created": load(&metrics.sessions_created),
            "expired": load(&metrics.sessions_expired),
            "ttl_seconds": data.settings.session_ttl_secs,
        },
        "errors": {
            "count": load(&metrics.error_count),
            "description": "Total number of errors since server start"
        }
    })))
}

/// Plain-text exposition of the process counters.
pub async fn metrics_handler(data: web::Data<AppState>) -> HttpResponse {
    let stats = data.metrics.get_stats().await;
    let mut output = String::new();
    for (key, value) in stats {
        output.push_str(&format!("# HELP {} {}\n", key, key));
        output.push_str(&format!("# TYPE {} gauge\n", key));
        output.push_str(&format!("{} {}\n", key, value));
    }
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4; charset=utf-8")
        .body(output)
}
