// Copyright 2025 Memophor Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! HTTP API handlers for libra-works.
//!
//! - `GET /healthz` - Service health check
//! - `GET /metrics` - Prometheus metrics export
//! - `POST /api/:kind` - Create a draft work
//! - `GET /api/:kind/:id` - Work details, gated by the access rules
//! - `PUT /api/:kind/:id` - Update a work and audit every change
//! - `POST /api/:kind/:id/publish` - Publish a draft
//! - `DELETE /api/:kind/:id` - Delete a work
//! - `GET /api/:kind/:id/files/:name` - Metadata of one attached file
//! - `POST /api/admin/:kind/:id/unpublish` - Return a work to draft
//! - `PUT /api/admin/:kind/:id/published` - Change the publish date
//!
//! `:kind` is `etd` or `oa`. Writes are version-checked against the stored
//! work and audit events go out only after the store accepted the write.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::access::{can_access, TrustedNetworks, WorkAccess};
use crate::audit::{
    publication_event, publish_date_event, update_events, AuditContext, AuditEvent, Auditor,
    UpdateAudit,
};
use crate::config::Namespaces;
use crate::error::AppError;
use crate::events::{EventBus, EventName};
use crate::identity::{Caller, IdentityVerifier};
use crate::metrics::Metrics;
use crate::model::{
    CreateRequest, EmbargoData, EtdWork, FileData, OaWork, PublishedDateRequest, UpdateRequest,
    WorkDetails, WorkFields, WorkKind, WorkMetadata, WorkObject, FIELD_CREATE_DATE,
    FIELD_DEPOSITOR, FIELD_MODIFY_DATE, FIELD_PUBLISH_DATE,
};
use crate::store::{Components, WorkStore};
use crate::visibility;

#[derive(Clone)]
pub struct AppState {
    pub store: WorkStore,
    pub bus: EventBus,
    pub auditor: Auditor,
    pub identity: IdentityVerifier,
    pub trusted: TrustedNetworks,
    pub metrics: Metrics,
    pub namespaces: Namespaces,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/metrics", get(metrics))
        .route("/api/:kind", post(create_work))
        .route(
            "/api/:kind/:id",
            get(get_work).put(update_work).delete(delete_work),
        )
        .route("/api/:kind/:id/publish", post(publish_work))
        .route("/api/:kind/:id/files/:name", get(get_file))
        .route("/api/admin/:kind/:id/unpublish", post(admin_unpublish))
        .route("/api/admin/:kind/:id/published", put(admin_published_date))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
pub async fn health() -> Result<Json<serde_json::Value>, AppError> {
    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": "libra-works",
        "version": env!("CARGO_PKG_VERSION"),
    })))
}

/// Metrics endpoint
pub async fn metrics(State(state): State<AppState>) -> Result<String, AppError> {
    state.metrics.export()
}

/// Create a draft work owned by the caller
pub async fn create_work(
    State(state): State<AppState>,
    Path(kind): Path<WorkKind>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<WorkDetails>), AppError> {
    let caller = state.identity.caller(&headers)?;
    match kind {
        WorkKind::Etd => create::<EtdWork>(&state, &caller, body).await,
        WorkKind::Oa => create::<OaWork>(&state, &caller, body).await,
    }
}

async fn create<M: WorkMetadata>(
    state: &AppState,
    caller: &Caller,
    body: serde_json::Value,
) -> Result<(StatusCode, Json<WorkDetails>), AppError> {
    let depositor = caller.require_signed_in()?;
    let request: CreateRequest<M> = decode_body(body)?;
    validate_release_date(request.embargo_release_date.as_deref())?;

    let kind = M::KIND;
    let now = Utc::now();
    let mut fields = WorkFields::new();
    fields.set_draft(true);
    fields.set(FIELD_DEPOSITOR, depositor);
    fields.set(FIELD_CREATE_DATE, now.to_rfc3339());
    fields.set(FIELD_MODIFY_DATE, now.to_rfc3339());
    fields.apply_visibility(
        kind,
        request.visibility,
        request.embargo_release_date.as_deref(),
        request.embargo_release_visibility,
    );

    let namespace = state.namespaces.get(kind);
    let work = WorkObject {
        id: format!("oid:{}", Uuid::new_v4()),
        namespace: namespace.to_string(),
        version: 1,
        fields,
        metadata: encode_metadata(&request.work)?,
        files: request
            .files
            .iter()
            .map(|name| FileData::new(name.as_str(), now))
            .collect(),
        created_at: now,
        modified_at: now,
    };

    let created = state.store.create(work).await?;
    tracing::info!(work_id = %created.id, %kind, depositor, "created draft work");
    state.bus.notify(EventName::WorkCreate, namespace, &created.id).await;

    Ok((StatusCode::CREATED, Json(work_details(kind, created, now))))
}

/// Get a work, hiding what the caller may not see
pub async fn get_work(
    State(state): State<AppState>,
    Path((kind, id)): Path<(WorkKind, String)>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Result<Json<WorkDetails>, AppError> {
    let caller = state.identity.caller(&headers)?;
    let trusted = from_trusted_network(&state.trusted, connect, &headers);

    let work = state.store.fetch(state.namespaces.get(kind), &id).await?;
    let owners = author_ids(kind, &work);
    let ids: Vec<&str> = owners.iter().map(String::as_str).collect();
    let access = WorkAccess {
        kind,
        fields: &work.fields,
        author_ids: &ids,
    };

    let now = Utc::now();
    let decision = can_access(&access, &caller, trusted, now);
    if !decision.can_read_metadata {
        state.metrics.record_metadata_denial();
        tracing::info!(work_id = %id, caller = ?caller.compute_id(), "work read denied");
        return Err(not_authorized(&id));
    }

    let mut details = work_details(kind, work, now);
    if !decision.can_read_files {
        state.metrics.record_file_denial();
        details.files.clear();
    }
    Ok(Json(details))
}

/// Metadata of one attached file
pub async fn get_file(
    State(state): State<AppState>,
    Path((kind, id, name)): Path<(WorkKind, String, String)>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Result<Json<FileData>, AppError> {
    let caller = state.identity.caller(&headers)?;
    let trusted = from_trusted_network(&state.trusted, connect, &headers);

    let work = state.store.fetch(state.namespaces.get(kind), &id).await?;
    let owners = author_ids(kind, &work);
    let ids: Vec<&str> = owners.iter().map(String::as_str).collect();
    let access = WorkAccess {
        kind,
        fields: &work.fields,
        author_ids: &ids,
    };

    let decision = can_access(&access, &caller, trusted, Utc::now());
    if !decision.can_read_metadata {
        state.metrics.record_metadata_denial();
        return Err(not_authorized(&id));
    }
    if !decision.can_read_files {
        state.metrics.record_file_denial();
        return Err(AppError::forbidden(format!(
            "access to files of {id} is not authorized"
        )));
    }

    work.files
        .into_iter()
        .find(|file| file.name == name)
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("{name} was not found in {id}")))
}

/// Update a work and audit the changes
pub async fn update_work(
    State(state): State<AppState>,
    Path((kind, id)): Path<(WorkKind, String)>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<WorkDetails>, AppError> {
    let caller = state.identity.caller(&headers)?;
    match kind {
        WorkKind::Etd => update::<EtdWork>(&state, &id, &caller, body).await,
        WorkKind::Oa => update::<OaWork>(&state, &id, &caller, body).await,
    }
}

async fn update<M: WorkMetadata>(
    state: &AppState,
    id: &str,
    caller: &Caller,
    body: serde_json::Value,
) -> Result<Json<WorkDetails>, AppError> {
    caller.require_signed_in()?;
    let request: UpdateRequest<M> = decode_body(body)?;
    validate_release_date(request.embargo_release_date.as_deref())?;

    let kind = M::KIND;
    let namespace = state.namespaces.get(kind);
    let work = state.store.fetch(namespace, id).await?;

    if let Some(version) = request.version {
        if version != work.version {
            state.metrics.record_version_conflict();
            return Err(AppError::conflict(format!(
                "{id} was modified by another request"
            )));
        }
    }

    let old_metadata = match work.decode_metadata::<M>() {
        Ok(metadata) => Some(metadata),
        Err(error) => {
            tracing::error!(%error, work_id = %id, "stored metadata is unreadable");
            None
        }
    };
    let owners = old_metadata.as_ref().map(owned_author_ids).unwrap_or_default();
    let actor = authorize_owner(caller, kind, &work, &owners)?;

    let now = Utc::now();
    let old_visibility = work.fields.default_visibility_raw().to_string();
    let current_files = work.file_names();
    let ctx = AuditContext::new(actor, namespace, id, now);
    let events = update_events(
        &ctx,
        &UpdateAudit {
            old_visibility: &old_visibility,
            new_visibility: request.visibility.as_str(),
            current_files: &current_files,
            added_files: &request.add_files,
            deleted_files: &request.del_files,
            old_metadata: old_metadata.as_ref(),
            new_metadata: &request.work,
        },
    );

    let mut next = work;
    next.fields.apply_visibility(
        kind,
        request.visibility,
        request.embargo_release_date.as_deref(),
        request.embargo_release_visibility,
    );
    next.metadata = encode_metadata(&request.work)?;
    next.files.retain(|file| !request.del_files.contains(&file.name));
    next.files.extend(
        request
            .add_files
            .iter()
            .map(|name| FileData::new(name.as_str(), now)),
    );

    let updated = commit(state, next, Components::ALL).await?;
    emit_audit(state, &events).await;
    state.metrics.record_work_updated(kind);
    tracing::info!(
        work_id = %id,
        version = updated.version,
        changes = events.len(),
        "work updated"
    );

    Ok(Json(work_details(kind, updated, now)))
}

/// Publish a draft work
pub async fn publish_work(
    State(state): State<AppState>,
    Path((kind, id)): Path<(WorkKind, String)>,
    headers: HeaderMap,
) -> Result<Json<WorkDetails>, AppError> {
    let caller = state.identity.caller(&headers)?;
    let namespace = state.namespaces.get(kind);
    let work = state.store.fetch(namespace, &id).await?;
    let actor = authorize_owner(&caller, kind, &work, &author_ids(kind, &work))?;

    if !work.fields.is_draft() {
        return Err(AppError::conflict(format!("{id} is already published")));
    }

    let now = Utc::now();
    let mut next = work;
    next.fields.set_draft(false);
    next.fields.set(FIELD_PUBLISH_DATE, now.to_rfc3339());
    let published = commit(&state, next, Components::FIELDS).await?;

    let ctx = AuditContext::new(actor, namespace, &id, now);
    emit_audit(&state, &[publication_event(&ctx, true)]).await;
    state.bus.notify(EventName::WorkPublish, namespace, &id).await;
    tracing::info!(work_id = %id, %kind, "work published");

    Ok(Json(work_details(kind, published, now)))
}

/// Delete a work. Depositors may only delete drafts.
pub async fn delete_work(
    State(state): State<AppState>,
    Path((kind, id)): Path<(WorkKind, String)>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let caller = state.identity.caller(&headers)?;
    let namespace = state.namespaces.get(kind);
    let work = state.store.fetch(namespace, &id).await?;

    if !caller.is_admin() {
        authorize_owner(&caller, kind, &work, &author_ids(kind, &work))?;
        if !work.fields.is_draft() {
            return Err(AppError::forbidden(format!(
                "{id} is published and can only be deleted by an admin"
            )));
        }
    }

    state.store.delete(namespace, &id).await?;
    tracing::info!(work_id = %id, %kind, caller = ?caller.compute_id(), "work deleted");
    state.bus.notify(EventName::WorkDelete, namespace, &id).await;

    Ok(StatusCode::NO_CONTENT)
}

/// Return a published work to draft
pub async fn admin_unpublish(
    State(state): State<AppState>,
    Path((kind, id)): Path<(WorkKind, String)>,
    headers: HeaderMap,
) -> Result<Json<WorkDetails>, AppError> {
    let caller = state.identity.caller(&headers)?;
    let actor = caller.require_admin()?;
    let namespace = state.namespaces.get(kind);
    let work = state.store.fetch(namespace, &id).await?;

    if work.fields.is_draft() {
        return Err(AppError::conflict(format!("{id} is not published")));
    }

    let now = Utc::now();
    let mut next = work;
    next.fields.set_draft(true);
    next.fields.remove(FIELD_PUBLISH_DATE);
    let unpublished = commit(&state, next, Components::FIELDS).await?;

    let ctx = AuditContext::new(actor, namespace, &id, now);
    emit_audit(&state, &[publication_event(&ctx, false)]).await;
    state.bus.notify(EventName::WorkUnpublish, namespace, &id).await;
    tracing::info!(work_id = %id, admin = actor, "work unpublished");

    Ok(Json(work_details(kind, unpublished, now)))
}

/// Change the publish date of a work
pub async fn admin_published_date(
    State(state): State<AppState>,
    Path((kind, id)): Path<(WorkKind, String)>,
    headers: HeaderMap,
    Json(request): Json<PublishedDateRequest>,
) -> Result<Json<WorkDetails>, AppError> {
    let caller = state.identity.caller(&headers)?;
    let actor = caller.require_admin()?;
    let new_date = DateTime::parse_from_rfc3339(request.new_date.trim())
        .map_err(|e| AppError::bad_request(format!("invalid publish date `{}`: {}", request.new_date, e)))?
        .with_timezone(&Utc);

    let namespace = state.namespaces.get(kind);
    let work = state.store.fetch(namespace, &id).await?;
    let before = work.fields.get(FIELD_PUBLISH_DATE).unwrap_or_default().to_string();
    let after = new_date.to_rfc3339();

    let mut next = work;
    next.fields.set(FIELD_PUBLISH_DATE, after.as_str());
    let updated = commit(&state, next, Components::FIELDS).await?;

    let now = Utc::now();
    let ctx = AuditContext::new(actor, namespace, &id, now);
    emit_audit(&state, &[publish_date_event(&ctx, &before, &after)]).await;

    Ok(Json(work_details(kind, updated, now)))
}

fn not_authorized(id: &str) -> AppError {
    AppError::forbidden(format!("access to {id} is not authorized"))
}

fn decode_body<T: DeserializeOwned>(body: serde_json::Value) -> Result<T, AppError> {
    serde_json::from_value(body)
        .map_err(|e| AppError::bad_request(format!("invalid request body: {}", e)))
}

fn encode_metadata<M: WorkMetadata>(metadata: &M) -> Result<serde_json::Value, AppError> {
    serde_json::to_value(metadata)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to serialize metadata: {}", e)))
}

fn validate_release_date(raw: Option<&str>) -> Result<(), AppError> {
    match raw.map(str::trim).filter(|date| !date.is_empty()) {
        Some(date) if visibility::parse_release_date(date).is_none() => Err(AppError::bad_request(
            format!("invalid embargo release date `{date}`"),
        )),
        _ => Ok(()),
    }
}

fn from_trusted_network(
    trusted: &TrustedNetworks,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: &HeaderMap,
) -> bool {
    let remote = connect.map(|ConnectInfo(addr)| addr.ip());
    let forwarded = headers.get("x-forwarded-for").and_then(|h| h.to_str().ok());
    trusted.is_trusted_origin(remote, forwarded)
}

fn owned_author_ids<M: WorkMetadata>(metadata: &M) -> Vec<String> {
    metadata.author_ids().into_iter().map(str::to_string).collect()
}

/// Author computing ids of a stored work; empty when the metadata is unreadable.
fn author_ids(kind: WorkKind, work: &WorkObject) -> Vec<String> {
    let decoded = match kind {
        WorkKind::Etd => work.decode_metadata::<EtdWork>().map(|m| owned_author_ids(&m)),
        WorkKind::Oa => work.decode_metadata::<OaWork>().map(|m| owned_author_ids(&m)),
    };
    decoded.unwrap_or_else(|error| {
        tracing::warn!(%error, work_id = %work.id, "authors unavailable; depositor is the only owner");
        Vec::new()
    })
}

/// The caller's computing id if they own the work or are an admin.
fn authorize_owner(
    caller: &Caller,
    kind: WorkKind,
    work: &WorkObject,
    owners: &[String],
) -> Result<String, AppError> {
    let compute_id = caller.require_signed_in()?;
    let ids: Vec<&str> = owners.iter().map(String::as_str).collect();
    let access = WorkAccess {
        kind,
        fields: &work.fields,
        author_ids: &ids,
    };

    if caller.is_admin() || access.is_owned_by(compute_id) {
        Ok(compute_id.to_string())
    } else {
        tracing::info!(work_id = %work.id, compute_id, "caller does not own work");
        Err(not_authorized(&work.id))
    }
}

async fn commit(
    state: &AppState,
    work: WorkObject,
    components: Components,
) -> Result<WorkObject, AppError> {
    match state.store.update(work, components).await {
        Err(AppError::Conflict(message)) => {
            state.metrics.record_version_conflict();
            Err(AppError::Conflict(message))
        }
        other => other,
    }
}

async fn emit_audit(state: &AppState, events: &[AuditEvent]) {
    let report = state.auditor.emit(events).await;
    state.metrics.record_audit(report.published, report.failed);
}

/// Response body for a work. `visibility` is what applies at `now`; the
/// stored release settings stay in `embargo`.
fn work_details(kind: WorkKind, work: WorkObject, now: DateTime<Utc>) -> WorkDetails {
    let stored = work.fields.default_visibility();
    let visibility = work.fields.effective_visibility(kind, now);
    let embargo = work
        .fields
        .embargo_release()
        .filter(|_| kind.allows_release_date(stored))
        .map(|date| EmbargoData {
            release_date: date.to_string(),
            release_visibility: work.fields.embargo_release_visibility(),
        });
    let is_draft = work.fields.is_draft();
    let date_published = work.fields.publish_date();

    WorkDetails {
        id: work.id,
        kind,
        is_draft,
        version: work.version,
        visibility,
        embargo,
        files: work.files,
        created_at: work.created_at,
        modified_at: work.modified_at,
        date_published,
        work: work.metadata,
    }
}
