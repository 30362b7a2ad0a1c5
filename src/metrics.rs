// Copyright 2025 Memophor Labs
// SPDX-License-Identifier: Apache-2.0

//! Prometheus metrics collection for libra-works.
//!
//! Tracks audit publication, access denials and write contention.

use prometheus::{IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Arc;

use crate::error::AppError;
use crate::model::WorkKind;

/// Metrics collector for the works service
#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,

    // Audit metrics
    pub audit_published: IntCounter,
    pub audit_failures: IntCounter,

    // Access gate metrics
    pub metadata_denials: IntCounter,
    pub file_denials: IntCounter,

    // Write metrics
    pub works_updated: IntCounterVec,
    pub version_conflicts: IntCounter,
}

fn metric_error(e: prometheus::Error) -> AppError {
    AppError::Internal(anyhow::anyhow!("Failed to create metric: {}", e))
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, AppError> {
    let counter = IntCounter::with_opts(Opts::new(name, help)).map_err(metric_error)?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(metric_error)?;
    Ok(counter)
}

impl Metrics {
    pub fn new() -> Result<Self, AppError> {
        let registry = Registry::new();

        let audit_published = counter(
            &registry,
            "libra_audit_events_published_total",
            "Total number of audit events accepted by the publisher",
        )?;
        let audit_failures = counter(
            &registry,
            "libra_audit_publish_failures_total",
            "Total number of audit events the publisher rejected",
        )?;
        let metadata_denials = counter(
            &registry,
            "libra_metadata_denials_total",
            "Total number of work reads denied by the access gate",
        )?;
        let file_denials = counter(
            &registry,
            "libra_file_denials_total",
            "Total number of reads where file access was withheld",
        )?;
        let version_conflicts = counter(
            &registry,
            "libra_version_conflicts_total",
            "Total number of writes rejected against a stale version",
        )?;

        let works_updated = IntCounterVec::new(
            Opts::new("libra_works_updated_total", "Total number of committed work updates"),
            &["kind"],
        )
        .map_err(metric_error)?;
        registry
            .register(Box::new(works_updated.clone()))
            .map_err(metric_error)?;

        Ok(Self {
            registry: Arc::new(registry),
            audit_published,
            audit_failures,
            metadata_denials,
            file_denials,
            works_updated,
            version_conflicts,
        })
    }

    /// Record the outcome of one audit publication batch
    pub fn record_audit(&self, published: usize, failed: usize) {
        self.audit_published.inc_by(published as u64);
        self.audit_failures.inc_by(failed as u64);
    }

    pub fn record_metadata_denial(&self) {
        self.metadata_denials.inc();
    }

    pub fn record_file_denial(&self) {
        self.file_denials.inc();
    }

    pub fn record_version_conflict(&self) {
        self.version_conflicts.inc();
    }

    pub fn record_work_updated(&self, kind: WorkKind) {
        self.works_updated.with_label_values(&[kind.as_str()]).inc();
    }

    /// Export metrics in Prometheus format
    pub fn export(&self) -> Result<String, AppError> {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to encode metrics: {}", e)))?;

        String::from_utf8(buffer).map_err(|e| {
            AppError::Internal(anyhow::anyhow!(
                "Failed to convert metrics to string: {}",
                e
            ))
        })
    }
}
