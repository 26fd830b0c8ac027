//! Represents an uploaded photo and the set of sizes stored for it.

use crate::models::size::{self, SizeSpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeSet;

/// Metadata for one uploaded photo.
///
/// The content bytes live in the content store; `sizes` is the authoritative
/// record of which of them exist.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PhotoMetadata {
    /// Opaque unique identifier, immutable once created.
    pub id: String,

    /// The uploading user.
    pub owner: String,

    /// Filename supplied by the client.
    pub filename: String,

    /// MIME type of the original; derivatives are encoded with it.
    pub mime_type: String,

    #[serde(default)]
    pub description: String,

    /// When the metadata was created.
    pub uploaded_at: DateTime<Utc>,

    /// Names of sizes already in the content store. Only ever grows.
    #[serde(default)]
    pub sizes: BTreeSet<String>,
}

impl PhotoMetadata {
    /// A fresh record for a photo that has not been uploaded yet.
    pub fn new(
        id: impl Into<String>,
        owner: impl Into<String>,
        filename: impl Into<String>,
        mime_type: impl Into<String>,
        description: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            owner: owner.into(),
            filename: filename.into(),
            mime_type: mime_type.into(),
            description: description.unwrap_or_default(),
            uploaded_at: Utc::now(),
            sizes: BTreeSet::new(),
        }
    }

    /// A record can be stored only when it can later be found and rendered.
    pub fn is_valid(&self) -> bool {
        !(self.id.is_empty() || self.filename.is_empty() || self.mime_type.is_empty())
    }

    pub fn has_size(&self, spec: &SizeSpec) -> bool {
        self.sizes.contains(spec.name)
    }

    pub fn add_size(&mut self, spec: &SizeSpec) {
        self.sizes.insert(spec.name.to_string());
    }

    /// Scaled sizes not yet materialized, in catalog order.
    pub fn missing_sizes(&self) -> Vec<&'static SizeSpec> {
        size::derivatives()
            .filter(|spec| !self.has_size(spec))
            .collect()
    }

    /// The shape returned to clients: sizes expanded to their catalog details.
    pub fn to_view(&self) -> PhotoView {
        PhotoView {
            id: self.id.clone(),
            owner: self.owner.clone(),
            filename: self.filename.clone(),
            mime_type: self.mime_type.clone(),
            description: self.description.clone(),
            uploaded_at: self.uploaded_at,
            sizes: size::CATALOG
                .iter()
                .filter(|spec| self.has_size(spec))
                .copied()
                .collect(),
        }
    }
}

/// Row shape of the `photos` table; sizes are joined in separately.
#[derive(FromRow, Debug)]
pub struct PhotoRow {
    pub id: String,
    pub owner: String,
    pub filename: String,
    pub mime_type: String,
    pub description: String,
    pub uploaded_at: DateTime<Utc>,
}

impl PhotoRow {
    pub fn into_metadata(self, sizes: BTreeSet<String>) -> PhotoMetadata {
        PhotoMetadata {
            id: self.id,
            owner: self.owner,
            filename: self.filename,
            mime_type: self.mime_type,
            description: self.description,
            uploaded_at: self.uploaded_at,
            sizes,
        }
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PhotoView {
    pub id: String,
    pub owner: String,
    pub filename: String,
    pub mime_type: String,
    pub description: String,
    pub uploaded_at: DateTime<Utc>,
    pub sizes: Vec<SizeSpec>,
}
