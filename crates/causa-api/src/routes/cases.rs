//! Read-only case routes.
//!
//! ## Routes
//!
//! - `GET /causas/{causaType}` - List case records in a partition
//! - `GET /causas/{causaType}/{causaId}` - Get a case record by id

use std::sync::Arc;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use causa_ledger::ids::{CaseId, UserId};
use causa_ledger::partition::Partition;
use causa_ledger::record::CaseRecord;

use crate::context::RequestContext;
use crate::error::{ApiError, ApiErrorBody};
use crate::server::AppState;

const DEFAULT_MAX_RESULTS: usize = 50;
const MAX_LIST_RESULTS: usize = 200;

/// One subscriber's update preference.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionEntryView {
    /// Subscribed user.
    pub user_id: String,
    /// Whether the user wants updates.
    pub enabled: bool,
}

/// Case record as returned to clients.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CaseView {
    /// Record id.
    pub id: String,
    /// Partition collection name.
    pub causa_type: String,
    /// Docket number.
    pub docket_number: String,
    /// Filing year.
    pub filing_year: String,
    /// Set by the sync worker once the docket was confirmed.
    pub verified: bool,
    /// Set by the sync worker once the docket was confirmed.
    pub is_valid: bool,
    /// Linked folders.
    pub folder_refs: Vec<String>,
    /// Subscribed users.
    pub subscriber_user_refs: Vec<String>,
    /// Per-user update preferences.
    pub subscription_entries: Vec<SubscriptionEntryView>,
    /// Whether any subscriber wants updates.
    pub needs_sync: bool,
    /// Provenance marker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_tag: Option<String>,
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
    /// Creation timestamp (RFC 3339).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Last update timestamp (RFC 3339).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl CaseView {
    pub(crate) fn from_record(partition: Partition, record: &CaseRecord) -> Self {
        Self {
            id: record.id.to_string(),
            causa_type: partition.collection().to_string(),
            docket_number: record.docket_number.clone(),
            filing_year: record.filing_year.clone(),
            verified: record.verified,
            is_valid: record.is_valid,
            folder_refs: record.folder_refs().iter().map(ToString::to_string).collect(),
            subscriber_user_refs: record
                .subscriber_user_refs()
                .iter()
                .map(ToString::to_string)
                .collect(),
            subscription_entries: record
                .subscription_entries()
                .iter()
                .map(|(user, enabled)| SubscriptionEntryView {
                    user_id: user.to_string(),
                    enabled,
                })
                .collect(),
            needs_sync: record.needs_sync(),
            source_tag: record.source_tag().map(str::to_string),
            caption: record.caption.clone(),
            court: record.court.clone(),
            subject: record.subject.clone(),
            earliest_movement: record.earliest_movement().map(|t| t.to_rfc3339()),
            created_at: record.created_at.map(|t| t.to_rfc3339()),
            updated_at: record.updated_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// Query parameters for listing cases.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListCasesQuery {
    /// Token from a previous page's `nextPageToken`.
    pub page_token: Option<String>,
    /// Maximum records to return (default 50, max 200).
    pub max_results: Option<usize>,
    /// Only return records this user subscribes to.
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
}

/// A page of case records.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListCasesResponse {
    /// Records on this page.
    pub causas: Vec<CaseView>,
    /// Pass as `page_token` to fetch the next page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

/// Creates case routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/causas/:causaType", get(list_cases))
        .route("/causas/:causaType/:causaId", get(get_case))
}

/// Get a case record by id.
///
/// GET /api/v1/causas/{causaType}/{causaId}
#[utoipa::path(
    get,
    path = "/api/v1/causas/{causaType}/{causaId}",
    tag = "causas",
    params(
        ("causaType" = String, Path, description = "Partition token"),
        ("causaId" = String, Path, description = "Case record id")
    ),
    responses(
        (status = 200, description = "Case found", body = CaseView),
        (status = 400, description = "Bad request", body = ApiErrorBody),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 404, description = "Not found", body = ApiErrorBody),
        (status = 500, description = "Store error", body = ApiErrorBody),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub(crate) async fn get_case(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Path((causa_type, causa_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let partition = Partition::resolve(&causa_type).map_err(|e| ctx.error(e))?;
    let case_id = causa_id.parse::<CaseId>().map_err(|e| ctx.error(e))?;
    tracing::debug!(
        request_id = %ctx.request_id,
        partition = %partition,
        case_id = %case_id,
        "Getting case"
    );

    let record = state
        .ledger()
        .get_case(partition, case_id)
        .await
        .map_err(|e| ctx.error(e))?
        .ok_or_else(|| ctx.error(ApiError::not_found(format!("causa not found: {case_id}"))))?;

    Ok(Json(CaseView::from_record(partition, &record)))
}

/// List case records in a partition, ordered by docket.
///
/// GET /api/v1/causas/{causaType}
#[utoipa::path(
    get,
    path = "/api/v1/causas/{causaType}",
    tag = "causas",
    params(
        ("causaType" = String, Path, description = "Partition token"),
        ListCasesQuery
    ),
    responses(
        (status = 200, description = "Cases listed", body = ListCasesResponse),
        (status = 400, description = "Bad request", body = ApiErrorBody),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 500, description = "Store error", body = ApiErrorBody),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub(crate) async fn list_cases(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Path(causa_type): Path<String>,
    query: Result<Query<ListCasesQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query.map_err(|e| ctx.error(e))?;
    let partition = Partition::resolve(&causa_type).map_err(|e| ctx.error(e))?;
    let offset = match query.page_token.as_deref() {
        None => 0,
        Some(token) => token
            .parse::<usize>()
            .map_err(|_| ctx.error(ApiError::bad_request(format!("invalid page_token: {token}"))))?,
    };
    let limit = query
        .max_results
        .unwrap_or(DEFAULT_MAX_RESULTS)
        .clamp(1, MAX_LIST_RESULTS);
    let subscriber = query
        .user_id
        .as_deref()
        .map(UserId::parse)
        .transpose()
        .map_err(|e| ctx.error(e))?;

    tracing::debug!(
        request_id = %ctx.request_id,
        partition = %partition,
        offset,
        limit,
        "Listing cases"
    );

    let page = state
        .ledger()
        .list_cases(partition, offset, limit, subscriber.as_ref())
        .await
        .map_err(|e| ctx.error(e))?;

    Ok(Json(ListCasesResponse {
        causas: page
            .records
            .iter()
            .map(|record| CaseView::from_record(partition, record))
            .collect(),
        next_page_token: page.next_offset.map(|offset| offset.to_string()),
    }))
}
