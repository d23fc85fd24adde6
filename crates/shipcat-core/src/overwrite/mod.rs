//! File-content transformers applied while committing a deploy.
//!
//! An [`Overwrite`] turns the current bytes of a manifest into the new
//! structured document. It never touches the filesystem; the source-control
//! operator reads, serializes and stages.

mod cache_prefix;
mod image_tag;

pub use cache_prefix::{CACHE_PREFIX_KEY, ConfigMap};
pub use image_tag::{Kustomization, KustomizeImage};

use chrono::{DateTime, Local};
use serde_yaml_ng::Value;

/// Timestamp format written into the cache-prefix key.
pub const CACHE_PREFIX_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// The fixed set of manifest rewrites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Overwrite {
    /// Point `image` at `tag` in a kustomization's `images` list.
    ImageTag { image: String, tag: String },
    /// Replace the cache-prefix value in a ConfigMap's `data`, if present.
    CachePrefix { stamp: String },
}

impl Overwrite {
    pub fn image_tag(image: impl Into<String>, tag: impl Into<String>) -> Self {
        Overwrite::ImageTag {
            image: image.into(),
            tag: tag.into(),
        }
    }

    /// Cache-prefix rewrite stamped with `now`, at second precision.
    pub fn cache_prefix(now: DateTime<Local>) -> Self {
        Overwrite::CachePrefix {
            stamp: now.format(CACHE_PREFIX_FORMAT).to_string(),
        }
    }

    /// Apply the rewrite to the current file content.
    pub fn apply(&self, current: &[u8]) -> anyhow::Result<Value> {
        match self {
            Overwrite::ImageTag { image, tag } => {
                let mut doc: Kustomization = serde_yaml_ng::from_slice(current)?;
                doc.set_image_tag(image, tag);
                Ok(serde_yaml_ng::to_value(doc)?)
            }
            Overwrite::CachePrefix { stamp } => {
                let mut doc: ConfigMap = serde_yaml_ng::from_slice(current)?;
                doc.bust_cache_prefix(stamp);
                Ok(serde_yaml_ng::to_value(doc)?)
            }
        }
    }

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Overwrite::ImageTag { .. } => "image-tag",
            Overwrite::CachePrefix { .. } => "cache-prefix",
        }
    }
}
