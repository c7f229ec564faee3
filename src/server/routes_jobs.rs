//! Job submission, observation, and artifact delivery routes.
//!
//! This is the thin boundary over the dispatcher: it spools the multipart
//! upload into the scratch area, hands a path plus an operation to the
//! pipeline, and maps outcomes onto HTTP responses. Artifact downloads hold
//! the job's workspace guard inside the response body stream, so the
//! namespace is removed once delivery finishes -- or fails.

use crate::error::{Error, FailureKind};
use crate::job::{Failure, Job, Outcome};
use crate::operation::Operation;
use crate::server::AppContext;
use crate::workspace::Workspace;
use axum::{
    body::Body,
    extract::{multipart::Field, Multipart, Path, State},
    http::{header, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::get,
    routing::post,
    Json, Router,
};
use futures::stream::{Stream, StreamExt};
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

pub fn job_routes() -> Router<AppContext> {
    Router::new()
        .route("/jobs", post(submit_job).get(list_jobs))
        .route("/jobs/{id}", get(get_job).delete(cancel_job))
        .route("/jobs/{id}/events", get(job_events))
        .route("/jobs/{id}/result", get(job_result))
}

/// `POST /api/jobs` -- multipart submit: `file` plus `operation` and any
/// operation parameters as text fields.
async fn submit_job(State(ctx): State<AppContext>, mut multipart: Multipart) -> Response {
    match read_submission(&ctx, &mut multipart).await {
        Ok(job) => (StatusCode::CREATED, Json(job)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn read_submission(
    ctx: &AppContext,
    multipart: &mut Multipart,
) -> std::result::Result<Job, Error> {
    let mut operation_name: Option<String> = None;
    let mut width: Option<i64> = None;
    let mut height: Option<i64> = None;
    let mut spool: Option<(NamedTempFile, String)> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::InvalidParameters(format!("malformed multipart body: {}", e)))?
    {
        match field.name().unwrap_or("") {
            "operation" => operation_name = Some(text_field(field).await?),
            "width" => width = Some(numeric_field("width", field).await?),
            "height" => height = Some(numeric_field("height", field).await?),
            "file" => {
                let source_name = field.file_name().unwrap_or("upload").to_string();
                let temp = NamedTempFile::new_in(ctx.dispatcher.scratch_root())?;
                let mut out = tokio::fs::File::from_std(temp.reopen()?);

                while let Some(chunk) = field.chunk().await.map_err(|e| {
                    Error::InvalidParameters(format!("upload read error: {}", e))
                })? {
                    out.write_all(&chunk).await?;
                }
                out.flush().await?;

                spool = Some((temp, source_name));
            }
            other => {
                tracing::debug!(field = other, "Ignoring unknown multipart field");
            }
        }
    }

    let (spool, source_name) =
        spool.ok_or_else(|| Error::InvalidParameters("missing file field".to_string()))?;
    let name = operation_name
        .ok_or_else(|| Error::InvalidParameters("missing operation field".to_string()))?;

    let operation = Operation::from_request(&name, width, height)?;

    let id = ctx
        .dispatcher
        .submit(spool.path(), &source_name, operation)
        .await?;
    // The pipeline owns its input copy now; the spool file is deleted when
    // `spool` drops at the end of this function.

    ctx.dispatcher.snapshot(id).ok_or(Error::UnknownJob(id))
}

async fn text_field(field: Field<'_>) -> std::result::Result<String, Error> {
    field
        .text()
        .await
        .map_err(|e| Error::InvalidParameters(format!("unreadable field: {}", e)))
}

async fn numeric_field(name: &str, field: Field<'_>) -> std::result::Result<i64, Error> {
    let raw = text_field(field).await?;
    raw.trim()
        .parse::<i64>()
        .map_err(|_| Error::InvalidParameters(format!("{} must be an integer, got {:?}", name, raw)))
}

/// `GET /api/jobs` -- all known job records, newest first.
async fn list_jobs(State(ctx): State<AppContext>) -> Response {
    Json(ctx.dispatcher.list()).into_response()
}

/// `GET /api/jobs/{id}` -- one job record.
async fn get_job(State(ctx): State<AppContext>, Path(id): Path<Uuid>) -> Response {
    match ctx.dispatcher.snapshot(id) {
        Some(job) => Json(job).into_response(),
        None => error_response(Error::UnknownJob(id)),
    }
}

/// `DELETE /api/jobs/{id}` -- request cancellation. Idempotent: cancelling a
/// terminal job is accepted and changes nothing.
async fn cancel_job(State(ctx): State<AppContext>, Path(id): Path<Uuid>) -> Response {
    if ctx.dispatcher.cancel(id) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        error_response(Error::UnknownJob(id))
    }
}

/// `GET /api/jobs/{id}/events` -- SSE stream of `{state, progress}` updates.
/// The stream is finite and closes after the terminal update.
async fn job_events(State(ctx): State<AppContext>, Path(id): Path<Uuid>) -> Response {
    let updates = match ctx.dispatcher.observe(id) {
        Ok(updates) => updates,
        Err(e) => return error_response(e),
    };

    let stream = updates.map(|update| {
        let data = serde_json::to_string(&update)
            .unwrap_or_else(|e| format!(r#"{{"error": "serialization failed: {}"}}"#, e));
        Ok::<_, Infallible>(Event::default().data(data))
    });

    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("ping"),
        )
        .into_response()
}

/// `GET /api/jobs/{id}/result` -- wait for the terminal outcome and deliver
/// it: a streamed artifact download, the metadata record, or the typed
/// failure.
async fn job_result(State(ctx): State<AppContext>, Path(id): Path<Uuid>) -> Response {
    let fetched = match ctx.dispatcher.fetch(id).await {
        Ok(fetched) => fetched,
        Err(e) => return error_response(e),
    };

    match fetched.outcome {
        Ok(Outcome::Metadata(info)) => Json(info).into_response(),
        Ok(Outcome::File {
            path,
            file_name,
            content_type,
            size_bytes,
        }) => {
            let file = match tokio::fs::File::open(&path).await {
                Ok(file) => file,
                // Already delivered and cleaned up, or lost underneath us.
                Err(e) => return error_response(Error::Io(e)),
            };

            let stream = ArtifactStream {
                inner: ReaderStream::new(file),
                _workspace: fetched.workspace,
            };

            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::CONTENT_LENGTH, size_bytes.to_string())
                .header(
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", file_name),
                )
                .body(Body::from_stream(stream))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        Err(failure) => failure_response(failure),
    }
}

/// Streams an artifact while keeping its namespace alive; the workspace guard
/// drops (and the namespace is removed) when the body is dropped, whether the
/// download completed or the client went away.
struct ArtifactStream {
    inner: ReaderStream<tokio::fs::File>,
    _workspace: Option<Workspace>,
}

impl Stream for ArtifactStream {
    type Item = std::io::Result<bytes::Bytes>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        std::pin::Pin::new(&mut self.inner).poll_next(cx)
    }
}

fn status_for(kind: FailureKind) -> StatusCode {
    match kind {
        FailureKind::InvalidParameters => StatusCode::BAD_REQUEST,
        FailureKind::Cancelled => StatusCode::CONFLICT,
        FailureKind::EngineError | FailureKind::EmptyOutput => StatusCode::BAD_GATEWAY,
        FailureKind::IoError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn failure_response(failure: Failure) -> Response {
    (status_for(failure.kind), Json(failure)).into_response()
}

fn error_response(err: Error) -> Response {
    if let Error::UnknownJob(_) = err {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"kind": "not_found", "message": err.to_string()})),
        )
            .into_response();
    }
    failure_response(Failure::from(&err))
}
