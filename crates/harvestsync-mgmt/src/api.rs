use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{SubsecRound, Utc};
use harvestsync_sync::{
    naming::parse_timestamp, DocumentKind, DumpBuilder, Scope, StreamDestination, SyncContext,
    SyncError,
};
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Error returned by delivery handlers, rendered as a plain-text response.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        let status = match &err {
            e if e.is_not_found() => StatusCode::NOT_FOUND,
            SyncError::Render { .. } => StatusCode::NOT_FOUND,
            SyncError::InvalidTimestamp { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %err, "delivery request failed");
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        tracing::error!(error = %err, "dump task failed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

/// Serves materialized sync documents and on-demand dumps.
#[derive(Clone)]
pub struct DeliveryApi {
    ctx: Arc<SyncContext>,
    bind_addr: SocketAddr,
}

impl DeliveryApi {
    pub fn new(ctx: SyncContext, bind_addr: SocketAddr) -> Self {
        Self {
            ctx: Arc::new(ctx),
            bind_addr,
        }
    }

    pub fn router(self: Arc<Self>) -> Router {
        let documents = ServeDir::new(self.ctx.settings.output_dir.clone());

        Router::new()
            .route("/health", get(health_handler))
            .route("/dump/:scope/resourcedump.zip", get(resource_dump_handler))
            .route("/dump/:scope/changedump/:from", get(change_dump_handler))
            .route("/resource/:prefix/:suffix/:format", get(metadata_handler))
            .nest_service("/rs", documents)
            .layer(TraceLayer::new_for_http())
            .with_state(self)
    }

    pub async fn serve(self) -> anyhow::Result<()> {
        let addr = self.bind_addr;
        let router = Arc::new(self).router();

        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Delivery API listening on {}", addr);

        axum::serve(listener, router.into_make_service()).await?;
        Ok(())
    }

    fn scope(&self, segment: &str) -> Result<Scope, SyncError> {
        self.ctx
            .settings
            .scope_by_segment(segment)
            .cloned()
            .ok_or_else(|| SyncError::not_found(format!("scope {}", segment)))
    }
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Build a dump on the blocking pool into an anonymous temp file, so any
/// failure surfaces before a response header is sent.
async fn build_dump<F>(ctx: Arc<SyncContext>, build: F) -> Result<File, ApiError>
where
    F: FnOnce(&SyncContext, &StreamDestination<File>) -> Result<(), SyncError> + Send + 'static,
{
    let file = tokio::task::spawn_blocking(move || -> Result<File, SyncError> {
        let destination = StreamDestination::new(tempfile::tempfile()?);
        build(&ctx, &destination)?;
        let mut file = destination.into_inner()?;
        file.seek(SeekFrom::Start(0))?;
        Ok(file)
    })
    .await??;
    Ok(file)
}

fn zip_response(file: File, filename: &str) -> Response {
    let body = Body::from_stream(ReaderStream::new(tokio::fs::File::from_std(file)));
    (
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        body,
    )
        .into_response()
}

async fn resource_dump_handler(
    State(api): State<Arc<DeliveryApi>>,
    Path(segment): Path<String>,
) -> Result<Response, ApiError> {
    let scope = api.scope(&segment)?;
    let file = build_dump(api.ctx.clone(), move |ctx, destination| {
        DumpBuilder::new(ctx)
            .resource_dump(&scope, destination)
            .map(|_| ())
    })
    .await?;
    let filename = DocumentKind::ResourceDump.filename(None)?;
    Ok(zip_response(file, &filename))
}

async fn change_dump_handler(
    State(api): State<Arc<DeliveryApi>>,
    Path((segment, from)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let scope = api.scope(&segment)?;
    let from = parse_timestamp(&from)?;
    let until = Utc::now().trunc_subsecs(0);
    let file = build_dump(api.ctx.clone(), move |ctx, destination| {
        DumpBuilder::new(ctx)
            .change_dump(&scope, from, until, destination)
            .map(|_| ())
    })
    .await?;
    let filename = DocumentKind::ChangeDump.filename(Some(until))?;
    Ok(zip_response(file, &filename))
}

async fn metadata_handler(
    State(api): State<Arc<DeliveryApi>>,
    Path((prefix, suffix, format)): Path<(String, String, String)>,
) -> Result<Response, ApiError> {
    let ctx = api.ctx.clone();
    let handle = format!("{}/{}", prefix, suffix);
    let (mime_type, bytes) =
        tokio::task::spawn_blocking(move || -> Result<(String, Vec<u8>), SyncError> {
            let format = ctx.settings.format(&format)?;
            let item = ctx
                .repository
                .item_by_handle(&handle)?
                .filter(|item| !item.withdrawn)
                .ok_or_else(|| SyncError::not_found(format!("item {}", handle)))?;
            let bytes = ctx.renderer.render_to_vec(&item, format)?;
            Ok((format.mime_type.clone(), bytes))
        })
        .await??;
    Ok(([(header::CONTENT_TYPE, mime_type)], bytes).into_response())
}
