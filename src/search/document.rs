//! Documents held by the semantic index

use crate::models::{Node, NodeLabel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Text mirrored from a graph node, keyed by the node key string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedDocument {
    #[serde(rename = "doc_id")]
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl IndexedDocument {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Build the index entry for an Issue, Solution or Document node
    pub fn from_node(node: &Node) -> Option<Self> {
        let props = &node.properties;
        let (doc_type, parts): (&str, Vec<String>) = match node.label() {
            NodeLabel::Issue => (
                "issue",
                vec![
                    node.title().to_string(),
                    props.get_str("body").unwrap_or_default().to_string(),
                    props.get_strings("labels").join(" "),
                ],
            ),
            NodeLabel::Solution => (
                "solution",
                vec![
                    node.title().to_string(),
                    props.get_str("description").unwrap_or_default().to_string(),
                ],
            ),
            NodeLabel::Document => (
                "document",
                vec![
                    node.title().to_string(),
                    props.get_str("content").unwrap_or_default().to_string(),
                ],
            ),
            _ => return None,
        };

        let text = parts
            .into_iter()
            .filter(|p| !p.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        if text.is_empty() {
            return None;
        }

        let mut doc = IndexedDocument::new(node.key.to_string(), text)
            .with_meta("type", doc_type)
            .with_meta("title", node.title());
        if let Some(status) = props.get_str("status") {
            doc = doc.with_meta("status", status);
        }
        if let Some(category) = props.get_str("category") {
            doc = doc.with_meta("category", category);
        }
        Some(doc)
    }
}

/// A search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDocument {
    #[serde(rename = "doc_id")]
    pub id: String,
    pub score: f32,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Exact-match metadata filter; empty matches everything
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilter(pub BTreeMap<String, String>);

impl SearchFilter {
    pub fn doc_type(doc_type: &str) -> Self {
        Self(BTreeMap::from([("type".to_string(), doc_type.to_string())]))
    }

    pub fn matches(&self, metadata: &BTreeMap<String, String>) -> bool {
        self.0.iter().all(|(k, v)| metadata.get(k) == Some(v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
