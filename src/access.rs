// Copyright 2025 Memophor Labs
// SPDX-License-Identifier: Apache-2.0

//! Read access decisions for works.
//!
//! Owners (depositor or listed author) and admins see everything. Everyone
//! else sees nothing of a draft, and the metadata of a published work, with
//! file access decided by the work's effective visibility.

use std::net::IpAddr;

use anyhow::Context;
use chrono::{DateTime, Utc};
use ipnet::IpNet;
use serde::Serialize;

use crate::identity::Caller;
use crate::model::{WorkFields, WorkKind};
use crate::visibility::Visibility;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessDecision {
    pub can_read_metadata: bool,
    pub can_read_files: bool,
}

impl AccessDecision {
    pub const FULL: Self = Self {
        can_read_metadata: true,
        can_read_files: true,
    };
    pub const NONE: Self = Self {
        can_read_metadata: false,
        can_read_files: false,
    };
}

/// What the gate needs to know about a work.
#[derive(Debug, Clone, Copy)]
pub struct WorkAccess<'a> {
    pub kind: WorkKind,
    pub fields: &'a WorkFields,
    pub author_ids: &'a [&'a str],
}

impl WorkAccess<'_> {
    /// Depositor or listed author; an empty id never matches.
    pub fn is_owned_by(&self, compute_id: &str) -> bool {
        if compute_id.is_empty() {
            return false;
        }
        self.fields.depositor() == Some(compute_id) || self.author_ids.contains(&compute_id)
    }
}

/// Decide what `caller` may read of `work` at `now`.
pub fn can_access(
    work: &WorkAccess<'_>,
    caller: &Caller,
    from_trusted_network: bool,
    now: DateTime<Utc>,
) -> AccessDecision {
    let owner = caller.compute_id().is_some_and(|id| work.is_owned_by(id));
    if owner || caller.is_admin() {
        return AccessDecision::FULL;
    }

    if work.fields.is_draft() {
        return AccessDecision::NONE;
    }

    let can_read_files = match work.fields.effective_visibility(work.kind, now) {
        Visibility::Open => true,
        Visibility::Uva => from_trusted_network,
        Visibility::Restricted | Visibility::Embargo => false,
    };

    AccessDecision {
        can_read_metadata: true,
        can_read_files,
    }
}

/// Parse a CIDR range; a bare address is a single-host range.
pub fn parse_range(raw: &str) -> anyhow::Result<IpNet> {
    let raw = raw.trim();
    if raw.contains('/') {
        return raw
            .parse::<IpNet>()
            .with_context(|| format!("invalid address range `{raw}`"));
    }
    raw.parse::<IpAddr>()
        .map(IpNet::from)
        .with_context(|| format!("invalid address `{raw}`"))
}

/// Allowlist of address ranges whose callers count as on-network.
#[derive(Debug, Clone, Default)]
pub struct TrustedNetworks {
    ranges: Vec<IpNet>,
}

impl TrustedNetworks {
    pub fn new(ranges: Vec<IpNet>) -> Self {
        Self { ranges }
    }

    /// Parse one range per line or comma-separated entry; blanks and `#`
    /// comments are skipped.
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let ranges = raw
            .split(['\n', ','])
            .map(str::trim)
            .filter(|entry| !entry.is_empty() && !entry.starts_with('#'))
            .map(parse_range)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self { ranges })
    }

    pub fn extend(&mut self, other: TrustedNetworks) {
        self.ranges.extend(other.ranges);
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        self.ranges.iter().any(|range| range.contains(&ip))
    }

    /// Check the connection address and the first `X-Forwarded-For` hop.
    pub fn is_trusted_origin(&self, remote: Option<IpAddr>, forwarded_for: Option<&str>) -> bool {
        let forwarded = forwarded_for
            .and_then(|header| header.split(',').next())
            .and_then(|first| first.trim().parse::<IpAddr>().ok());

        let trusted = remote.into_iter().chain(forwarded).any(|ip| self.contains(ip));
        tracing::debug!(?remote, ?forwarded, trusted, "checked request origin");
        trusted
    }
}
