// Copyright 2025 Memophor Labs
// SPDX-License-Identifier: Apache-2.0

//! Data models for deposited works.
//!
//! Defines the two metadata shapes (thesis and open access), the stored work
//! object with its administrative fields, and the request/response payloads.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::audit::shape::{Composite, FieldDescriptor, MetadataShape};
use crate::error::AppError;
use crate::visibility::{self, Visibility};

pub const FIELD_DRAFT: &str = "draft";
pub const FIELD_DEFAULT_VISIBILITY: &str = "default-visibility";
pub const FIELD_EMBARGO_RELEASE: &str = "embargo-release";
pub const FIELD_EMBARGO_RELEASE_VISIBILITY: &str = "embargo-release-visibility";
pub const FIELD_DEPOSITOR: &str = "depositor";
pub const FIELD_CREATE_DATE: &str = "create-date";
pub const FIELD_MODIFY_DATE: &str = "modify-date";
pub const FIELD_PUBLISH_DATE: &str = "publish-date";

/// Which family of work an object belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkKind {
    /// Theses and dissertations.
    Etd,
    /// Open-access deposits.
    Oa,
}

impl WorkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkKind::Etd => "etd",
            WorkKind::Oa => "oa",
        }
    }

    /// Whether `default` may carry an embargo release date for this kind.
    /// Theses use `uva` with an end date; open-access works use `embargo`.
    pub fn allows_release_date(&self, default: Visibility) -> bool {
        match self {
            WorkKind::Etd => default.is_embargo_capable(),
            WorkKind::Oa => default == Visibility::Embargo,
        }
    }
}

impl fmt::Display for WorkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A person attached to a work: author, advisor or contributor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContributorData {
    #[serde(rename = "computeID")]
    pub compute_id: String,
    pub first_name: String,
    pub last_name: String,
    pub department: String,
    pub institution: String,
}

impl Composite for ContributorData {
    fn leaves(&self) -> Vec<(&'static str, &str)> {
        vec![
            ("computeID", self.compute_id.as_str()),
            ("firstName", self.first_name.as_str()),
            ("lastName", self.last_name.as_str()),
            ("department", self.department.as_str()),
            ("institution", self.institution.as_str()),
        ]
    }
}

fn as_composites(people: &[ContributorData]) -> Vec<&dyn Composite> {
    people.iter().map(|person| person as &dyn Composite).collect()
}

/// Thesis metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EtdWork {
    pub schema_version: String,
    pub title: String,
    pub author: ContributorData,
    pub advisors: Vec<ContributorData>,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub license: String,
    pub language: String,
    pub keywords: Vec<String>,
    #[serde(rename = "relatedURLs")]
    pub related_urls: Vec<String>,
    pub sponsors: Vec<String>,
    pub notes: String,
    pub program: String,
    pub degree: String,
}

impl MetadataShape for EtdWork {
    fn descriptors() -> Vec<FieldDescriptor<Self>> {
        type F = FieldDescriptor<EtdWork>;
        vec![
            F::scalar("schemaVersion", |w| w.schema_version.as_str()),
            F::scalar("title", |w| w.title.as_str()),
            F::composite("author", |w| &w.author as &dyn Composite),
            F::composite_list("advisors", |w| as_composites(&w.advisors)),
            F::scalar("abstract", |w| w.abstract_text.as_str()),
            F::scalar("license", |w| w.license.as_str()),
            F::scalar("language", |w| w.language.as_str()),
            F::scalar_list("keywords", |w| w.keywords.as_slice()),
            F::scalar_list("relatedURLs", |w| w.related_urls.as_slice()),
            F::scalar_list("sponsors", |w| w.sponsors.as_slice()),
            F::scalar("notes", |w| w.notes.as_str()),
            F::scalar("program", |w| w.program.as_str()),
            F::scalar("degree", |w| w.degree.as_str()),
        ]
    }
}

/// Open-access deposit metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OaWork {
    pub schema_version: String,
    pub resource_type: String,
    pub title: String,
    pub authors: Vec<ContributorData>,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub license: String,
    pub languages: Vec<String>,
    pub keywords: Vec<String>,
    pub contributors: Vec<ContributorData>,
    pub publisher: String,
    pub citation: String,
    pub pub_date: String,
    #[serde(rename = "relatedURLs")]
    pub related_urls: Vec<String>,
    pub sponsors: Vec<String>,
    pub notes: String,
}

impl MetadataShape for OaWork {
    fn descriptors() -> Vec<FieldDescriptor<Self>> {
        type F = FieldDescriptor<OaWork>;
        vec![
            F::scalar("schemaVersion", |w| w.schema_version.as_str()),
            F::scalar("resourceType", |w| w.resource_type.as_str()),
            F::scalar("title", |w| w.title.as_str()),
            F::composite_list("authors", |w| as_composites(&w.authors)),
            F::scalar("abstract", |w| w.abstract_text.as_str()),
            F::scalar("license", |w| w.license.as_str()),
            F::scalar_list("languages", |w| w.languages.as_slice()),
            F::scalar_list("keywords", |w| w.keywords.as_slice()),
            F::composite_list("contributors", |w| as_composites(&w.contributors)),
            F::scalar("publisher", |w| w.publisher.as_str()),
            F::scalar("citation", |w| w.citation.as_str()),
            F::scalar("pubDate", |w| w.pub_date.as_str()),
            F::scalar_list("relatedURLs", |w| w.related_urls.as_slice()),
            F::scalar_list("sponsors", |w| w.sponsors.as_slice()),
            F::scalar("notes", |w| w.notes.as_str()),
        ]
    }
}

/// Behaviour shared by every metadata shape the service stores.
pub trait WorkMetadata:
    MetadataShape + Serialize + DeserializeOwned + Clone + Default + Send + Sync + 'static
{
    const KIND: WorkKind;

    /// Computing ids of the people who authored the work.
    fn author_ids(&self) -> Vec<&str>;
}

impl WorkMetadata for EtdWork {
    const KIND: WorkKind = WorkKind::Etd;

    fn author_ids(&self) -> Vec<&str> {
        vec![self.author.compute_id.as_str()]
    }
}

impl WorkMetadata for OaWork {
    const KIND: WorkKind = WorkKind::Oa;

    fn author_ids(&self) -> Vec<&str> {
        self.authors.iter().map(|a| a.compute_id.as_str()).collect()
    }
}

/// Administrative key/value fields stored alongside a work.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkFields(BTreeMap<String, String>);

impl WorkFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    /// Unreadable values count as draft so a damaged record stays hidden.
    pub fn is_draft(&self) -> bool {
        match self.get(FIELD_DRAFT) {
            Some("false") => false,
            Some("true") => true,
            other => {
                tracing::warn!(draft = ?other, "unreadable draft flag; treating work as draft");
                true
            }
        }
    }

    pub fn set_draft(&mut self, draft: bool) {
        self.set(FIELD_DRAFT, if draft { "true" } else { "false" });
    }

    /// Raw stored default visibility; empty when unset.
    pub fn default_visibility_raw(&self) -> &str {
        self.get(FIELD_DEFAULT_VISIBILITY).unwrap_or_default()
    }

    /// Unknown values resolve to `restricted`.
    pub fn default_visibility(&self) -> Visibility {
        match self.default_visibility_raw().parse() {
            Ok(vis) => vis,
            Err(err) => {
                tracing::warn!(error = %err, "unreadable default visibility; treating as restricted");
                Visibility::Restricted
            }
        }
    }

    pub fn embargo_release(&self) -> Option<&str> {
        self.get(FIELD_EMBARGO_RELEASE).filter(|v| !v.is_empty())
    }

    pub fn embargo_release_visibility(&self) -> Option<Visibility> {
        self.get(FIELD_EMBARGO_RELEASE_VISIBILITY)
            .filter(|v| !v.is_empty())
            .and_then(|v| v.parse().ok())
    }

    pub fn depositor(&self) -> Option<&str> {
        self.get(FIELD_DEPOSITOR).filter(|v| !v.is_empty())
    }

    pub fn publish_date(&self) -> Option<DateTime<Utc>> {
        self.get(FIELD_PUBLISH_DATE)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|ts| ts.with_timezone(&Utc))
    }

    /// Visibility in force at `now` for a work of `kind`.
    pub fn effective_visibility(&self, kind: WorkKind, now: DateTime<Utc>) -> Visibility {
        let default = self.default_visibility();
        let release = if kind.allows_release_date(default) {
            self.embargo_release()
        } else {
            None
        };
        visibility::effective_visibility(default, release, self.embargo_release_visibility(), now)
    }

    /// Store a requested visibility and its embargo settings. Embargo fields
    /// are cleared when the visibility cannot carry them.
    pub fn apply_visibility(
        &mut self,
        kind: WorkKind,
        requested: Visibility,
        release_date: Option<&str>,
        release_visibility: Option<Visibility>,
    ) {
        self.set(FIELD_DEFAULT_VISIBILITY, requested.as_str());
        if kind.allows_release_date(requested) {
            match release_date.filter(|d| !d.trim().is_empty()) {
                Some(date) => self.set(FIELD_EMBARGO_RELEASE, date),
                None => {
                    self.remove(FIELD_EMBARGO_RELEASE);
                }
            }
            match release_visibility {
                Some(vis) => self.set(FIELD_EMBARGO_RELEASE_VISIBILITY, vis.as_str()),
                None => {
                    self.remove(FIELD_EMBARGO_RELEASE_VISIBILITY);
                }
            }
        } else {
            self.remove(FIELD_EMBARGO_RELEASE);
            self.remove(FIELD_EMBARGO_RELEASE_VISIBILITY);
        }
    }
}

impl<const N: usize> From<[(&str, &str); N]> for WorkFields {
    fn from(pairs: [(&str, &str); N]) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

/// A file attached to a work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    pub name: String,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
}

impl FileData {
    pub fn new(name: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        let name = name.into();
        let mime_type = mime_guess::from_path(&name).first_or_octet_stream().to_string();
        Self {
            name,
            mime_type,
            created_at,
        }
    }
}

/// File list after removing `deleted` names and appending `added` ones,
/// keeping the existing order.
pub fn files_after_update(current: &[String], added: &[String], deleted: &[String]) -> Vec<String> {
    current
        .iter()
        .filter(|name| !deleted.contains(*name))
        .chain(added.iter())
        .cloned()
        .collect()
}

/// A work as held by the object store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkObject {
    pub id: String,
    pub namespace: String,
    /// Optimistic-concurrency token; bumped on every committed write.
    pub version: u64,
    pub fields: WorkFields,
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub files: Vec<FileData>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl WorkObject {
    pub fn decode_metadata<M: WorkMetadata>(&self) -> Result<M, AppError> {
        serde_json::from_value(self.metadata.clone()).map_err(|e| {
            AppError::Internal(anyhow::anyhow!(
                "unable to decode metadata of work {}: {}",
                self.id,
                e
            ))
        })
    }

    pub fn file_names(&self) -> Vec<String> {
        self.files.iter().map(|f| f.name.clone()).collect()
    }
}

/// Embargo settings echoed back to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbargoData {
    pub release_date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_visibility: Option<Visibility>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest<M> {
    pub work: M,
    pub visibility: Visibility,
    #[serde(default)]
    pub embargo_release_date: Option<String>,
    #[serde(default)]
    pub embargo_release_visibility: Option<Visibility>,
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest<M> {
    pub work: M,
    pub visibility: Visibility,
    #[serde(default)]
    pub embargo_release_date: Option<String>,
    #[serde(default)]
    pub embargo_release_visibility: Option<Visibility>,
    #[serde(default)]
    pub add_files: Vec<String>,
    #[serde(default)]
    pub del_files: Vec<String>,
    /// Version the client edited; a stale value is rejected.
    #[serde(default)]
    pub version: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedDateRequest {
    pub new_date: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkDetails {
    pub id: String,
    pub kind: WorkKind,
    pub is_draft: bool,
    pub version: u64,
    pub visibility: Visibility,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embargo: Option<EmbargoData>,
    pub files: Vec<FileData>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_published: Option<DateTime<Utc>>,
    pub work: serde_json::Value,
}
