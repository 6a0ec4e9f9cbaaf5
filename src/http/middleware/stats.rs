//! Outermost stage: load shedding and request accounting.

use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::http::response::RejectedWith;
use crate::http::server::AppState;
use crate::observability::metrics;

pub async fn track_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().to_string();

    let response = match state.in_flight.clone().try_acquire_owned() {
        Ok(_permit) => next.run(request).await,
        Err(_) => {
            tracing::warn!(path = %request.uri().path(), "In-flight request ceiling reached, shedding");
            (StatusCode::SERVICE_UNAVAILABLE, "Server busy").into_response()
        }
    };

    let status = response.status().as_u16();
    let rejection = response.extensions().get::<RejectedWith>().map(|r| r.0);
    state.stats.record(status, rejection);
    metrics::record_request(&method, status, started);
    if let Some(code) = rejection {
        metrics::record_rejection(code);
    }
    response
}
