//! Stored segment serving.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use crate::context::AppContext;
use crate::error::AppError;

/// GET /segment/{stream_id}/{chunk_id} -- serve a stored media segment.
pub async fn serve_segment(
    State(ctx): State<AppContext>,
    Path((stream_id, chunk_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let path = ctx.store.reader_path(&stream_id, &chunk_id)?;

    let data = tokio::fs::read(&path)
        .await
        .map_err(|_| shiftcast_core::Error::not_found("chunk", format!("{stream_id}/{chunk_id}")))?;

    Ok((StatusCode::OK, [("content-type", "video/mp2t")], data))
}
