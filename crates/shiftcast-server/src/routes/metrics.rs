//! Plain-text metrics endpoint.

use axum::extract::State;
use axum::response::IntoResponse;
use std::fmt::Write;

use shiftcast_db::pool::get_conn;
use shiftcast_db::queries::chunks;

use crate::context::AppContext;
use crate::error::AppError;

/// GET /metrics -- per-stream counters in Prometheus text format.
pub async fn metrics_handler(
    State(ctx): State<AppContext>,
) -> Result<impl IntoResponse, AppError> {
    let conn = get_conn(&ctx.db)?;

    let mut out = String::new();
    out.push_str("# TYPE shiftcast_indexed_chunks gauge\n");
    for (stream_id, count) in chunks::counts(&conn).map_err(AppError::new)? {
        writeln!(out, "shiftcast_indexed_chunks{{stream=\"{stream_id}\"}} {count}")
            .expect("writing to string");
    }

    out.push_str("# TYPE shiftcast_fetch_errors_total counter\n");
    for (stream_id, count) in ctx.fetch_errors.snapshot() {
        writeln!(out, "shiftcast_fetch_errors_total{{stream=\"{stream_id}\"}} {count}")
            .expect("writing to string");
    }

    Ok((
        axum::http::StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        out,
    ))
}
