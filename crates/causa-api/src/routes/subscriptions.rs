//! Folder subscription routes.
//!
//! ## Routes
//!
//! - `POST   /associate-folder` - Link a folder (and its owner) to a case
//! - `DELETE /dissociate-folder` - Unlink a folder (and its owner) from a case
//! - `GET    /find-by-folder/{causaType}/{folderId}` - Case a folder tracks
//! - `PATCH  /update-status` - Fan a user's update preference out to every case
//! - `PATCH  /update-by-subscriptions` - Align preferences with the paid roster
//! - `POST   /migrate-array-fields/{causaType}` - Repair legacy record shapes (admin)

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use causa_ledger::ids::{CaseId, DocketKey, FolderId, UserId};
use causa_ledger::ledger::{AssociateFolder, BulkReport, CaseSummary, PartitionTally};
use causa_ledger::partition::Partition;

use crate::context::RequestContext;
use crate::error::{ApiError, ApiErrorBody};
use crate::routes::cases::CaseView;
use crate::server::AppState;

/// A docket component sent either as text or as a bare number.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DocketPart {
    /// Text form, e.g. `"12345"`.
    Text(String),
    /// Numeric form, e.g. `12345`.
    Number(u64),
}

impl DocketPart {
    fn to_text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Number(n) => n.to_string(),
        }
    }
}

/// Request to link a folder to a case.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssociateFolderRequest {
    /// Partition token (e.g. `CIV`, `civil`, `causas-civil`).
    pub causa_type: String,
    /// Docket number.
    #[schema(value_type = String)]
    pub number: DocketPart,
    /// Filing year (four digits).
    #[schema(value_type = String)]
    pub year: DocketPart,
    /// Folder owner.
    #[schema(value_type = String)]
    pub user_id: UserId,
    /// Folder that tracks the case.
    #[schema(value_type = String)]
    pub folder_id: FolderId,
    /// Whether the owner currently has a paid subscription.
    #[serde(default)]
    pub has_paid_subscription: bool,
}

/// Display fields of a verified case.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CaseSummaryView {
    /// Docket number.
    pub docket_number: String,
    /// Filing year.
    pub filing_year: String,
    /// Case caption.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    /// Court.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub court: Option<String>,
    /// Subject matter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Earliest known movement (RFC 3339).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub earliest_movement: Option<String>,
}

impl From<CaseSummary> for CaseSummaryView {
    fn from(value: CaseSummary) -> Self {
        Self {
            docket_number: value.docket_number,
            filing_year: value.filing_year,
            caption: value.caption,
            court: value.court,
            subject: value.subject,
            earliest_movement: value.earliest_movement.map(|t| t.to_rfc3339()),
        }
    }
}

/// Association response.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssociateFolderResponse {
    /// Always true.
    pub success: bool,
    /// Human-readable outcome.
    pub message: String,
    /// True if this call created the case record.
    pub created: bool,
    /// Whether any subscriber wants updates.
    pub needs_sync: bool,
    /// Record the folder is linked to.
    pub causa_id: String,
    /// Display fields, once the case is verified.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<CaseSummaryView>,
}

/// Request to unlink a folder from a case.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DissociateFolderRequest {
    /// Partition token.
    pub causa_type: String,
    /// Case record id.
    pub causa_id: String,
    /// Folder to unlink.
    #[schema(value_type = String)]
    pub folder_id: FolderId,
    /// Folder owner to unsubscribe.
    #[schema(value_type = String)]
    pub user_id: UserId,
}

/// Dissociation response.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DissociateFolderResponse {
    /// Always true.
    pub success: bool,
    /// Human-readable outcome.
    pub message: String,
    /// Always false; records are never created by dissociation.
    pub created: bool,
    /// False if the folder and user were already absent.
    pub changed: bool,
    /// Whether any remaining subscriber wants updates.
    pub needs_sync: bool,
    /// Record the folder was unlinked from.
    pub causa_id: String,
}

/// Lookup response.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FindByFolderResponse {
    /// Always true.
    pub success: bool,
    /// Whether the folder tracks a case in this partition.
    pub found: bool,
    /// The case, when found.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub causa: Option<CaseView>,
}

/// Request to set a user's update preference everywhere.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusRequest {
    /// User whose entries change.
    #[schema(value_type = String)]
    pub user_id: UserId,
    /// New preference.
    pub update_value: bool,
}

/// Request to align preferences with the paid roster.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBySubscriptionsRequest {
    /// Users that currently hold an active paid subscription.
    #[schema(value_type = Vec<String>)]
    pub user_ids: Vec<UserId>,
}

/// Bulk counts for one partition.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PartitionCount {
    /// Partition collection name.
    pub causa_type: String,
    /// Records visited.
    pub scanned: u64,
    /// Records written.
    pub updated: u64,
    /// Records that could not be read or written.
    pub failed: u64,
    /// Set when the partition could not be listed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_error: Option<String>,
}

impl PartitionCount {
    fn new(partition: Partition, tally: PartitionTally) -> Self {
        Self {
            causa_type: partition.collection().to_string(),
            scanned: tally.scanned,
            updated: tally.updated,
            failed: tally.failed,
            scan_error: tally.scan_error,
        }
    }
}

/// Bulk operation response.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BulkResponse {
    /// False if any record or partition failed.
    pub success: bool,
    /// Human-readable outcome.
    pub message: String,
    /// Records written across partitions.
    pub updated: u64,
    /// Records that failed across partitions.
    pub failed: u64,
    /// Per-partition counts.
    pub partitions: Vec<PartitionCount>,
}

impl BulkResponse {
    fn new(verb: &str, partitions: Vec<PartitionCount>) -> Self {
        let updated = partitions.iter().map(|p| p.updated).sum();
        let failed = partitions.iter().map(|p| p.failed).sum();
        let clean = failed == 0 && partitions.iter().all(|p| p.scan_error.is_none());
        Self {
            success: clean,
            message: format!("{verb} {updated} causas ({failed} failed)"),
            updated,
            failed,
            partitions,
        }
    }

    fn from_report(verb: &str, report: BulkReport) -> Self {
        Self::new(
            verb,
            report
                .partitions
                .into_iter()
                .map(|(partition, tally)| PartitionCount::new(partition, tally))
                .collect(),
        )
    }
}

/// Creates subscription routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/associate-folder", post(associate_folder))
        .route("/dissociate-folder", delete(dissociate_folder))
        .route("/find-by-folder/:causaType/:folderId", get(find_by_folder))
        .route("/update-status", patch(update_status))
        .route("/update-by-subscriptions", patch(update_by_subscriptions))
        .route("/migrate-array-fields/:causaType", post(migrate_array_fields))
}

/// Link a folder to a case, creating the case record on first use.
///
/// POST /api/v1/associate-folder
#[utoipa::path(
    post,
    path = "/api/v1/associate-folder",
    tag = "subscriptions",
    request_body = AssociateFolderRequest,
    responses(
        (status = 201, description = "Case created and folder linked", body = AssociateFolderResponse),
        (status = 200, description = "Folder linked to existing case", body = AssociateFolderResponse),
        (status = 400, description = "Bad request", body = ApiErrorBody),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 409, description = "Folder already associated", body = ApiErrorBody),
        (status = 500, description = "Store error", body = ApiErrorBody),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub(crate) async fn associate_folder(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    payload: Result<Json<AssociateFolderRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload.map_err(|e| ctx.error(e))?;
    let partition = Partition::resolve(&req.causa_type).map_err(|e| ctx.error(e))?;
    let docket = DocketKey::new(&req.number.to_text(), &req.year.to_text())
        .map_err(|e| ctx.error(e))?;

    tracing::info!(
        request_id = %ctx.request_id,
        partition = %partition,
        docket = %docket,
        folder_id = %req.folder_id,
        "Associating folder"
    );

    let association = state
        .ledger()
        .associate_folder(AssociateFolder {
            partition,
            docket,
            user_id: req.user_id,
            folder_id: req.folder_id,
            has_paid_subscription: req.has_paid_subscription,
        })
        .await
        .map_err(|e| ctx.error(e))?;

    let (status, message) = if association.created {
        (StatusCode::CREATED, "causa created and folder associated")
    } else {
        (StatusCode::OK, "folder associated with existing causa")
    };

    Ok((
        status,
        Json(AssociateFolderResponse {
            success: true,
            message: message.to_string(),
            created: association.created,
            needs_sync: association.needs_sync,
            causa_id: association.case_id.to_string(),
            summary: association.summary.map(CaseSummaryView::from),
        }),
    ))
}

/// Unlink a folder and its owner from a case. The record is kept.
///
/// DELETE /api/v1/dissociate-folder
#[utoipa::path(
    delete,
    path = "/api/v1/dissociate-folder",
    tag = "subscriptions",
    request_body = DissociateFolderRequest,
    responses(
        (status = 200, description = "Folder unlinked", body = DissociateFolderResponse),
        (status = 400, description = "Bad request", body = ApiErrorBody),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 404, description = "Case not found", body = ApiErrorBody),
        (status = 500, description = "Store error", body = ApiErrorBody),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub(crate) async fn dissociate_folder(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    payload: Result<Json<DissociateFolderRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload.map_err(|e| ctx.error(e))?;
    let partition = Partition::resolve(&req.causa_type).map_err(|e| ctx.error(e))?;
    let case_id = req.causa_id.parse::<CaseId>().map_err(|e| ctx.error(e))?;

    tracing::info!(
        request_id = %ctx.request_id,
        partition = %partition,
        case_id = %case_id,
        folder_id = %req.folder_id,
        "Dissociating folder"
    );

    let dissociation = state
        .ledger()
        .dissociate_folder(partition, case_id, &req.folder_id, &req.user_id)
        .await
        .map_err(|e| ctx.error(e))?;

    let message = if dissociation.changed {
        "folder dissociated from causa"
    } else {
        "folder was not associated with causa"
    };

    Ok(Json(DissociateFolderResponse {
        success: true,
        message: message.to_string(),
        created: false,
        changed: dissociation.changed,
        needs_sync: dissociation.needs_sync,
        causa_id: dissociation.case_id.to_string(),
    }))
}

/// Return the case a folder is linked to in a partition.
///
/// GET /api/v1/find-by-folder/{causaType}/{folderId}
#[utoipa::path(
    get,
    path = "/api/v1/find-by-folder/{causaType}/{folderId}",
    tag = "subscriptions",
    params(
        ("causaType" = String, Path, description = "Partition token"),
        ("folderId" = String, Path, description = "Folder id")
    ),
    responses(
        (status = 200, description = "Lookup result; `found` is false when unlinked", body = FindByFolderResponse),
        (status = 400, description = "Bad request", body = ApiErrorBody),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 500, description = "Store error", body = ApiErrorBody),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub(crate) async fn find_by_folder(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Path((causa_type, folder_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let partition = Partition::resolve(&causa_type).map_err(|e| ctx.error(e))?;
    let folder_id = FolderId::parse(&folder_id).map_err(|e| ctx.error(e))?;

    tracing::debug!(
        request_id = %ctx.request_id,
        partition = %partition,
        folder_id = %folder_id,
        "Finding case by folder"
    );

    let record = state
        .ledger()
        .find_case_by_folder(partition, &folder_id)
        .await
        .map_err(|e| ctx.error(e))?;

    Ok(Json(FindByFolderResponse {
        success: true,
        found: record.is_some(),
        causa: record.map(|r| CaseView::from_record(partition, &r)),
    }))
}

/// Set a user's update preference on every case they subscribe to.
///
/// PATCH /api/v1/update-status
#[utoipa::path(
    patch,
    path = "/api/v1/update-status",
    tag = "subscriptions",
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Per-partition counts", body = BulkResponse),
        (status = 400, description = "Bad request", body = ApiErrorBody),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub(crate) async fn update_status(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    payload: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload.map_err(|e| ctx.error(e))?;
    tracing::info!(
        request_id = %ctx.request_id,
        user_id = %req.user_id,
        enabled = req.update_value,
        "Updating subscription status"
    );

    let report = state
        .ledger()
        .set_user_update_preference(&req.user_id, req.update_value)
        .await
        .map_err(|e| ctx.error(e))?;

    Ok(Json(BulkResponse::from_report("updated", report)))
}

/// Set every entry's preference from the active paid-subscriber roster.
///
/// PATCH /api/v1/update-by-subscriptions
#[utoipa::path(
    patch,
    path = "/api/v1/update-by-subscriptions",
    tag = "subscriptions",
    request_body = UpdateBySubscriptionsRequest,
    responses(
        (status = 200, description = "Per-partition counts", body = BulkResponse),
        (status = 400, description = "Bad request", body = ApiErrorBody),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub(crate) async fn update_by_subscriptions(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    payload: Result<Json<UpdateBySubscriptionsRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload.map_err(|e| ctx.error(e))?;
    let roster: BTreeSet<UserId> = req.user_ids.into_iter().collect();
    tracing::info!(
        request_id = %ctx.request_id,
        active_users = roster.len(),
        "Reconciling subscriptions"
    );

    let report = state
        .ledger()
        .reconcile_active_subscribers(&roster)
        .await
        .map_err(|e| ctx.error(e))?;

    Ok(Json(BulkResponse::from_report("reconciled", report)))
}

/// Repair legacy folder and subscriber fields in one partition.
///
/// POST /api/v1/migrate-array-fields/{causaType}
#[utoipa::path(
    post,
    path = "/api/v1/migrate-array-fields/{causaType}",
    tag = "maintenance",
    params(
        ("causaType" = String, Path, description = "Partition token")
    ),
    responses(
        (status = 200, description = "Partition counts", body = BulkResponse),
        (status = 400, description = "Bad request", body = ApiErrorBody),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 403, description = "Admin role required", body = ApiErrorBody),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub(crate) async fn migrate_array_fields(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Path(causa_type): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    ctx.require_admin()?;
    let partition = Partition::resolve(&causa_type).map_err(|e| ctx.error(e))?;
    tracing::info!(
        request_id = %ctx.request_id,
        user_id = %ctx.user_id,
        partition = %partition,
        "Normalizing array fields"
    );

    let tally = state
        .ledger()
        .normalize_array_shape(partition)
        .await
        .map_err(|e| ctx.error(e))?;

    Ok(Json(BulkResponse::new(
        "normalized",
        vec![PartitionCount::new(partition, tally)],
    )))
}
