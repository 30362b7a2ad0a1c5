// Copyright 2025 Memophor Labs
// SPDX-License-Identifier: Apache-2.0

//! Change auditing for work updates.
//!
//! An update is turned into one [`AuditEvent`] per changed value: the stored
//! default visibility, the attached file list, and every changed metadata
//! leaf. Events are handed to an [`AuditPublisher`]; a failed publish is
//! logged and never fails the update.

pub mod diff;
pub mod shape;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::model::{files_after_update, FIELD_DEFAULT_VISIBILITY, FIELD_DRAFT, FIELD_PUBLISH_DATE};

pub use diff::{diff, Change};
pub use shape::{classify, FieldKind, MetadataShape};

/// Joins file names in `files` audit events.
pub const FILE_DELIMITER: &str = ",";

/// Field name of the virtual attached-file list.
pub const FIELD_FILES: &str = "files";

/// Who changed which work, and when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditContext {
    pub actor: String,
    pub namespace: String,
    pub work_id: String,
    pub at: DateTime<Utc>,
}

impl AuditContext {
    pub fn new(
        actor: impl Into<String>,
        namespace: impl Into<String>,
        work_id: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            actor: actor.into(),
            namespace: namespace.into(),
            work_id: work_id.into(),
            at,
        }
    }

    pub fn event(
        &self,
        field_name: impl Into<String>,
        before: impl Into<String>,
        after: impl Into<String>,
    ) -> AuditEvent {
        AuditEvent {
            actor: self.actor.clone(),
            namespace: self.namespace.clone(),
            work_id: self.work_id.clone(),
            field_name: field_name.into(),
            before: before.into(),
            after: after.into(),
            timestamp: self.at,
        }
    }
}

/// A single field change attributed to an actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub actor: String,
    pub namespace: String,
    pub work_id: String,
    pub field_name: String,
    pub before: String,
    pub after: String,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait AuditPublisher: Send + Sync {
    async fn publish(&self, event: &AuditEvent) -> Result<(), AppError>;
}

/// The parts of an update that get audited.
pub struct UpdateAudit<'a, M> {
    pub old_visibility: &'a str,
    pub new_visibility: &'a str,
    pub current_files: &'a [String],
    pub added_files: &'a [String],
    pub deleted_files: &'a [String],
    /// `None` when the stored metadata could not be decoded.
    pub old_metadata: Option<&'a M>,
    pub new_metadata: &'a M,
}

/// Build the audit events for an update, in emission order.
pub fn update_events<M: MetadataShape>(ctx: &AuditContext, update: &UpdateAudit<'_, M>) -> Vec<AuditEvent> {
    let mut events = Vec::new();

    if update.old_visibility != update.new_visibility {
        events.push(ctx.event(
            FIELD_DEFAULT_VISIBILITY,
            update.old_visibility,
            update.new_visibility,
        ));
    }

    let updated_files = files_after_update(update.current_files, update.added_files, update.deleted_files);
    if updated_files.as_slice() != update.current_files {
        events.push(ctx.event(
            FIELD_FILES,
            update.current_files.join(FILE_DELIMITER),
            updated_files.join(FILE_DELIMITER),
        ));
    }

    match update.old_metadata {
        Some(old) => {
            events.extend(
                diff(old, update.new_metadata)
                    .into_iter()
                    .map(|change| ctx.event(change.field_path, change.before, change.after)),
            );
        }
        None => {
            tracing::error!(
                work_id = %ctx.work_id,
                "original metadata unavailable; metadata changes not audited"
            );
        }
    }

    events
}

/// Audit event for a publish (`published == true`) or unpublish.
pub fn publication_event(ctx: &AuditContext, published: bool) -> AuditEvent {
    let (before, after) = if published {
        ("true", "false")
    } else {
        ("false", "true")
    };
    ctx.event(FIELD_DRAFT, before, after)
}

/// Audit event for an administrative change of the publish date.
pub fn publish_date_event(ctx: &AuditContext, before: &str, after: &str) -> AuditEvent {
    ctx.event(FIELD_PUBLISH_DATE, before, after)
}

/// Outcome of handing a batch of events to the publisher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub published: usize,
    pub failed: usize,
}

/// Best-effort audit emission.
#[derive(Clone)]
pub struct Auditor {
    publisher: Arc<dyn AuditPublisher>,
}

impl Auditor {
    pub fn new(publisher: Arc<dyn AuditPublisher>) -> Self {
        Self { publisher }
    }

    /// Publish every event in order. Failures are logged and counted.
    pub async fn emit(&self, events: &[AuditEvent]) -> PublishReport {
        let mut report = PublishReport::default();
        for event in events {
            match self.publisher.publish(event).await {
                Ok(()) => report.published += 1,
                Err(error) => {
                    report.failed += 1;
                    tracing::error!(
                        %error,
                        work_id = %event.work_id,
                        field = %event.field_name,
                        "unable to publish audit event"
                    );
                }
            }
        }
        report
    }
}
