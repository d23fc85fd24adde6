//! Kustomization `images` rewriting.

use serde::{Deserialize, Serialize};
use serde_yaml_ng::Mapping;

/// One entry of a kustomization's `images` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KustomizeImage {
    pub name: String,
    #[serde(rename = "newTag", default, skip_serializing_if = "Option::is_none")]
    pub new_tag: Option<String>,
    /// `newName`, `digest` and anything else, kept verbatim.
    #[serde(flatten)]
    pub rest: Mapping,
}

/// The parts of a kustomization the image-tag rewrite cares about.
///
/// Every other top-level key is carried through `rest` unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Kustomization {
    #[serde(flatten)]
    pub rest: Mapping,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<KustomizeImage>,
}

impl Kustomization {
    /// Set `newTag` on every entry named `image`, appending a new entry when
    /// none exists.
    pub fn set_image_tag(&mut self, image: &str, tag: &str) {
        let mut updated = false;
        for entry in self.images.iter_mut().filter(|entry| entry.name == image) {
            entry.new_tag = Some(tag.to_string());
            updated = true;
        }

        if !updated {
            self.images.push(KustomizeImage {
                name: image.to_string(),
                new_tag: Some(tag.to_string()),
                rest: Mapping::new(),
            });
        }
    }

    /// Current tag of `image`, if listed.
    pub fn image_tag(&self, image: &str) -> Option<&str> {
        self.images
            .iter()
            .find(|entry| entry.name == image)
            .and_then(|entry| entry.new_tag.as_deref())
    }
}
