//! Externally produced description records and per-chapter bundles.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// What a description talks about, as labelled by the extraction pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DescriptionKind {
    Location,
    Character,
    Atmosphere,
    Object,
    Action,
    #[default]
    #[serde(other)]
    Other,
}

impl DescriptionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Location => "location",
            Self::Character => "character",
            Self::Atmosphere => "atmosphere",
            Self::Object => "object",
            Self::Action => "action",
            Self::Other => "other",
        }
    }
}

/// Immutable text fragment to anchor onto rendered pages.
///
/// `content` is free text from an LLM/NLP step. It carries no reliable offset
/// and may start with a duplicated chapter header.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Description {
    pub id: String,
    #[serde(default, rename = "type", alias = "kind")]
    pub kind: DescriptionKind,
    pub content: String,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub priority: i32,
}

impl Description {
    pub fn new(id: impl Into<String>, kind: DescriptionKind, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            content: content.into(),
            confidence: 1.0,
            priority: 0,
        }
    }
}

/// Previously generated illustration for a description.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub description_id: String,
    pub url: String,
}

/// Descriptions and images for one logical chapter.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChapterBundle {
    pub chapter: u32,
    #[serde(default)]
    pub descriptions: Vec<Description>,
    /// Images keyed by description id.
    #[serde(default)]
    pub images: BTreeMap<String, GeneratedImage>,
}

impl ChapterBundle {
    pub fn new(chapter: u32, descriptions: Vec<Description>) -> Self {
        Self {
            chapter,
            descriptions,
            images: BTreeMap::new(),
        }
    }

    /// Attach an image to its description id.
    pub fn with_image(mut self, image: GeneratedImage) -> Self {
        self.images.insert(image.description_id.clone(), image);
        self
    }

    pub fn image_for(&self, description_id: &str) -> Option<&GeneratedImage> {
        self.images.get(description_id)
    }
}
