//! Versioned, opaque rule documents for callers that evaluate rules themselves.
//!
//! The payload is never inspected; the only contract is that `(jurisdiction, app version)`
//! addresses at most one document at a time.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::catalog::EntityCatalog;
use super::domain::{AppVersion, EntityKind, JurisdictionId, VersionedRuleDocument};
use super::error::RuleError;
use super::repository::{StoreReader, StoreWriter};

/// Lookup behaviour when no document matches the requested version exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentFallback {
    #[default]
    Exact,
    /// Serve the highest stored version at or below the requested one. Only dotted
    /// numeric versions take part.
    NearestLower,
}

impl DocumentFallback {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "exact" => Some(Self::Exact),
            "nearest-lower" | "nearest_lower" => Some(Self::NearestLower),
            _ => None,
        }
    }
}

/// Stored document plus whether the write replaced an earlier payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentWrite {
    pub document: VersionedRuleDocument,
    pub replaced: bool,
}

/// Stored document addressed by `app_version`. Numeric versions match on their normalised
/// segments, so `1.2` and `1.2.0` name the same document.
fn equivalent<R: StoreReader + ?Sized>(
    reader: &R,
    jurisdiction_id: &JurisdictionId,
    app_version: &AppVersion,
) -> Result<Option<VersionedRuleDocument>, RuleError> {
    if let Some(document) = reader.document(jurisdiction_id, app_version)? {
        return Ok(Some(document));
    }
    let Some(requested) = app_version.numeric_segments() else {
        return Ok(None);
    };
    Ok(reader
        .documents_for(jurisdiction_id)?
        .into_iter()
        .find(|document| document.app_version.numeric_segments().as_ref() == Some(&requested)))
}

/// Upserts the document and hands back the one it replaced, if any.
pub(crate) fn put<W: StoreWriter + ?Sized>(
    tx: &mut W,
    jurisdiction_id: &JurisdictionId,
    app_version: AppVersion,
    payload: String,
    max_bytes: usize,
    now: DateTime<Utc>,
) -> Result<(DocumentWrite, Option<VersionedRuleDocument>), RuleError> {
    EntityCatalog::new(&*tx).jurisdiction(jurisdiction_id)?;

    if payload.len() > max_bytes {
        return Err(RuleError::InvalidArgument(format!(
            "ruleset payload of {} bytes exceeds the {max_bytes} byte limit",
            payload.len()
        )));
    }

    let previous = equivalent(&*tx, jurisdiction_id, &app_version)?;
    if let Some(stale) = previous
        .as_ref()
        .filter(|document| document.app_version != app_version)
    {
        tx.remove_document(jurisdiction_id, &stale.app_version)?;
    }

    let document = VersionedRuleDocument {
        jurisdiction_id: jurisdiction_id.clone(),
        app_version,
        payload,
        last_updated: now,
    };
    tx.upsert_document(document.clone())?;

    let write = DocumentWrite {
        document,
        replaced: previous.is_some(),
    };
    Ok((write, previous))
}

pub(crate) fn get<R: StoreReader + ?Sized>(
    reader: &R,
    jurisdiction_id: &JurisdictionId,
    app_version: &AppVersion,
    fallback: DocumentFallback,
) -> Result<VersionedRuleDocument, RuleError> {
    if let Some(document) = equivalent(reader, jurisdiction_id, app_version)? {
        return Ok(document);
    }

    let not_found = || {
        RuleError::not_found(
            EntityKind::VersionedRuleDocument,
            format!("{jurisdiction_id}@{app_version}"),
        )
    };

    if fallback == DocumentFallback::Exact {
        return Err(not_found());
    }
    let Some(requested) = app_version.numeric_segments() else {
        return Err(not_found());
    };

    reader
        .documents_for(jurisdiction_id)?
        .into_iter()
        .filter_map(|document| {
            let segments = document.app_version.numeric_segments()?;
            (segments <= requested).then_some((segments, document))
        })
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, document)| document)
        .ok_or_else(not_found)
}

/// Numeric versions first in ascending order, then the rest lexicographically.
fn compare_versions(a: &AppVersion, b: &AppVersion) -> Ordering {
    match (a.numeric_segments(), b.numeric_segments()) {
        (Some(left), Some(right)) => left.cmp(&right).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

pub(crate) fn versions<R: StoreReader + ?Sized>(
    reader: &R,
    jurisdiction_id: &JurisdictionId,
) -> Result<Vec<AppVersion>, RuleError> {
    EntityCatalog::new(reader).jurisdiction(jurisdiction_id)?;
    let mut versions: Vec<AppVersion> = reader
        .documents_for(jurisdiction_id)?
        .into_iter()
        .map(|document| document.app_version)
        .collect();
    versions.sort_by(compare_versions);
    Ok(versions)
}

pub(crate) fn remove<W: StoreWriter + ?Sized>(
    tx: &mut W,
    jurisdiction_id: &JurisdictionId,
    app_version: &AppVersion,
) -> Result<VersionedRuleDocument, RuleError> {
    let stored = equivalent(&*tx, jurisdiction_id, app_version)?
        .map(|document| document.app_version)
        .unwrap_or_else(|| app_version.clone());
    Ok(tx.remove_document(jurisdiction_id, &stored)?)
}
