// Copyright 2025 Memophor Labs
// SPDX-License-Identifier: Apache-2.0

//! Visibility values and embargo resolution.
//!
//! A work stores a default visibility plus optional embargo fields. The
//! effective visibility is always derived from those at read time, never
//! written back, because an embargo ends on a wall-clock boundary with no
//! event to trigger a rewrite.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Who may see a work's files once the work is published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Anyone.
    Open,
    /// Callers on the trusted network.
    #[serde(alias = "uva-only")]
    Uva,
    /// Depositor, authors and admins only.
    #[serde(alias = "draft")]
    Restricted,
    /// Restricted until the embargo release date.
    Embargo,
}

impl Visibility {
    /// Values that can carry an embargo release date.
    pub fn is_embargo_capable(&self) -> bool {
        matches!(self, Visibility::Embargo | Visibility::Uva)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Open => "open",
            Visibility::Uva => "uva",
            Visibility::Restricted => "restricted",
            Visibility::Embargo => "embargo",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown visibility `{0}`")]
pub struct UnknownVisibility(pub String);

impl FromStr for Visibility {
    type Err = UnknownVisibility;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "open" => Ok(Visibility::Open),
            "uva" | "uva-only" => Ok(Visibility::Uva),
            "restricted" | "draft" => Ok(Visibility::Restricted),
            "embargo" => Ok(Visibility::Embargo),
            other => Err(UnknownVisibility(other.to_string())),
        }
    }
}

/// Parse an embargo release date.
///
/// Accepts RFC 3339 timestamps and plain `YYYY-MM-DD` dates, the latter taken
/// as midnight UTC.
pub fn parse_release_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Resolve the visibility in force at `now`.
///
/// Only `embargo` and `uva` can carry a release date; `uva` without one is
/// plain network-restricted access. An embargo without a release date never
/// ends. An unparsable release date or a missing post-embargo value leaves
/// the embargo in force.
pub fn effective_visibility(
    default: Visibility,
    release_at: Option<&str>,
    post_embargo: Option<Visibility>,
    now: DateTime<Utc>,
) -> Visibility {
    if !default.is_embargo_capable() {
        return default;
    }

    let Some(raw) = release_at.filter(|raw| !raw.trim().is_empty()) else {
        return default;
    };

    let Some(release) = parse_release_date(raw) else {
        tracing::warn!(release = raw, %default, "unable to parse embargo release date");
        return default;
    };

    if now < release {
        return default;
    }

    match post_embargo {
        Some(post) => post,
        None => {
            tracing::warn!(%default, "embargo elapsed without a release visibility");
            default
        }
    }
}
