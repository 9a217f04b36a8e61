//! HTTP surface of the audit trail, mounted under `/api/v1/audit-logs`

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::{
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
        StatusCode,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rams_common::{Actor, Role};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::capture::SecurityCapture;
use super::context::{CallerIdentity, RequestContext};
use super::error::AuditError;
use super::filters::AuditQueryParams;
use super::service::{authorize_admin, authorize_read, required_role, AuditService};
use crate::api::response::ApiResponse;

/// State shared by the audit handlers
#[derive(Clone)]
pub struct AuditState {
    pub service: AuditService,
    pub security: SecurityCapture,
}

impl AuditState {
    /// Check the caller before anything else about the request is looked
    /// at; refusals are recorded as `ACCESS_DENIED`
    fn authorize(&self, ctx: &RequestContext, caller: Option<&Actor>, operation: &str) -> Result<(), AuditError> {
        let allowed = match required_role(operation) {
            Role::Auditor => authorize_read(caller),
            _ => authorize_admin(caller),
        };
        allowed.map(|_| ()).map_err(|err| self.reject(ctx, operation, err))
    }

    /// Record authorization failures as `ACCESS_DENIED` before returning them
    fn reject(&self, ctx: &RequestContext, operation: &str, err: AuditError) -> AuditError {
        if err.is_authorization() {
            self.security.access_denied(
                ctx,
                &format!("audit.{}", operation),
                Some(required_role(operation).as_str()),
            );
        }
        err
    }
}

pub fn audit_routes() -> Router<AuditState> {
    Router::new()
        .route("/", get(list_audit_logs))
        .route("/stats", get(audit_stats))
        .route("/export", get(export_audit_logs))
        .route("/cleanup", post(cleanup_audit_logs))
        .route("/:id", get(get_audit_log))
}

#[derive(Debug, Deserialize)]
pub struct StatsParams {
    pub days: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CleanupRequest {
    pub days_to_keep: i64,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub deleted: u64,
    pub days_to_keep: i64,
}

#[tracing::instrument(skip_all, fields(request_id = %ctx.request_id))]
async fn list_audit_logs(
    State(state): State<AuditState>,
    CallerIdentity(caller): CallerIdentity,
    ctx: RequestContext,
    params: Result<Query<AuditQueryParams>, QueryRejection>,
) -> Result<Response, AuditError> {
    state.authorize(&ctx, caller.as_ref(), "list")?;
    let Query(params) = params.map_err(|e| AuditError::Validation(e.body_text()))?;
    let page = state
        .service
        .list(caller.as_ref(), &params)
        .await
        .map_err(|e| state.reject(&ctx, "list", e))?;

    Ok(ApiResponse::success(page).into_response())
}

#[tracing::instrument(skip_all, fields(request_id = %ctx.request_id))]
async fn get_audit_log(
    State(state): State<AuditState>,
    CallerIdentity(caller): CallerIdentity,
    ctx: RequestContext,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Response, AuditError> {
    state.authorize(&ctx, caller.as_ref(), "get")?;
    let Path(id) = id.map_err(|e| AuditError::Validation(e.body_text()))?;
    let view = state
        .service
        .get_by_id(caller.as_ref(), id)
        .await
        .map_err(|e| state.reject(&ctx, "get", e))?;

    Ok(ApiResponse::success(view).into_response())
}

#[tracing::instrument(skip_all, fields(request_id = %ctx.request_id))]
async fn audit_stats(
    State(state): State<AuditState>,
    CallerIdentity(caller): CallerIdentity,
    ctx: RequestContext,
    params: Result<Query<StatsParams>, QueryRejection>,
) -> Result<Response, AuditError> {
    state.authorize(&ctx, caller.as_ref(), "stats")?;
    let Query(params) = params.map_err(|e| AuditError::Validation(e.body_text()))?;
    let stats = state
        .service
        .stats(caller.as_ref(), params.days)
        .await
        .map_err(|e| state.reject(&ctx, "stats", e))?;

    Ok(ApiResponse::success(stats).into_response())
}

#[tracing::instrument(skip_all, fields(request_id = %ctx.request_id))]
async fn export_audit_logs(
    State(state): State<AuditState>,
    CallerIdentity(caller): CallerIdentity,
    ctx: RequestContext,
    params: Result<Query<AuditQueryParams>, QueryRejection>,
) -> Result<Response, AuditError> {
    state.authorize(&ctx, caller.as_ref(), "export")?;
    let Query(params) = params.map_err(|e| AuditError::Validation(e.body_text()))?;
    let file = state
        .service
        .export(caller.as_ref(), &params)
        .await
        .map_err(|e| state.reject(&ctx, "export", e))?;

    let disposition = file.content_disposition();
    Ok((
        StatusCode::OK,
        [(CONTENT_TYPE, file.content_type.to_string()), (CONTENT_DISPOSITION, disposition)],
        file.body,
    )
        .into_response())
}

#[tracing::instrument(skip_all, fields(request_id = %ctx.request_id))]
async fn cleanup_audit_logs(
    State(state): State<AuditState>,
    CallerIdentity(caller): CallerIdentity,
    ctx: RequestContext,
    body: Result<Json<CleanupRequest>, JsonRejection>,
) -> Result<Response, AuditError> {
    state.authorize(&ctx, caller.as_ref(), "cleanup")?;
    let Json(request) = body.map_err(|e| AuditError::Validation(e.body_text()))?;
    let deleted = state
        .service
        .cleanup(caller.as_ref(), request.days_to_keep)
        .await
        .map_err(|e| state.reject(&ctx, "cleanup", e))?;

    tracing::info!(
        deleted,
        days_to_keep = request.days_to_keep,
        actor_id = ?caller.map(|a| a.id),
        "Audit cleanup via API"
    );

    Ok(ApiResponse::success(CleanupResponse {
        deleted,
        days_to_keep: request.days_to_keep,
    })
    .into_response())
}
