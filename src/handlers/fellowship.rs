use actix_web::{web, HttpResponse};
use tracing::debug;

use crate::models::update::{DeliverRequest, FetchQuery};
use crate::services::coordinator::FellowshipError;
use crate::AppState;

/// Long-poll for new messages and members. Answers 204 if nothing arrives
/// within the poll timeout; the parked fetch is cancelled in that case.
pub async fn fetch_handler(
    data: web::Data<AppState>,
    group: web::Path<String>,
    query: web::Query<FetchQuery>,
) -> Result<HttpResponse, FellowshipError> {
    let group = group.into_inner();
    let FetchQuery { identity, session } = query.into_inner();

    let ticket = data.fellowship.begin_fetch(group.clone(), identity, session)?;
    match tokio::time::timeout(data.settings.poll_timeout(), ticket.wait()).await {
        Ok(update) => Ok(HttpResponse::Ok().json(update?)),
        Err(_) => {
            debug!("Long-poll timed out in group {}", group);
            Ok(HttpResponse::NoContent().finish())
        }
    }
}

pub async fn deliver_handler(
    data: web::Data<AppState>,
    group: web::Path<String>,
    request: web::Json<DeliverRequest>,
) -> Result<HttpResponse, FellowshipError> {
    let DeliverRequest { from, to, message } = request.into_inner();
    data.fellowship.deliver(group.into_inner(), from, to, message)?;
    Ok(HttpResponse::Accepted().finish())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/groups/{group}")
            .route("/fetch", web::get().to(fetch_handler))
            .route("/deliver", web::post().to(deliver_handler)),
    );
}
