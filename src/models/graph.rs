//! Graph node/edge types keyed by natural keys.
//!
//! Properties form a last-writer-wins map: every value remembers the
//! `occurred_at` of the event that wrote it and a merge only replaces it with
//! a value carrying a newer stamp. Equal stamps are settled by comparing the
//! serialized values, so merges are idempotent and commute regardless of
//! delivery order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use strum::{Display, EnumIter, EnumString};

use crate::error::AppError;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NodeLabel {
    Service,
    Issue,
    Solution,
    Commit,
    Document,
    Tenant,
}

impl NodeLabel {
    /// Labels whose text is mirrored into the semantic index
    pub fn is_indexed(&self) -> bool {
        matches!(self, NodeLabel::Issue | NodeLabel::Solution | NodeLabel::Document)
    }
}

/// Natural identity of a node, rendered as `<label>:<key>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey {
    pub label: NodeLabel,
    pub key: String,
}

impl NodeKey {
    pub fn new(label: NodeLabel, key: impl Into<String>) -> Self {
        Self {
            label,
            key: key.into(),
        }
    }

    pub fn service(name: impl Into<String>) -> Self {
        Self::new(NodeLabel::Service, name)
    }

    pub fn issue(key: impl Into<String>) -> Self {
        Self::new(NodeLabel::Issue, key)
    }

    pub fn solution(key: impl Into<String>) -> Self {
        Self::new(NodeLabel::Solution, key)
    }

    pub fn commit(hash: impl Into<String>) -> Self {
        Self::new(NodeLabel::Commit, hash)
    }

    pub fn document(path: impl Into<String>) -> Self {
        Self::new(NodeLabel::Document, path)
    }

    pub fn tenant(id: impl Into<String>) -> Self {
        Self::new(NodeLabel::Tenant, id)
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.label, self.key)
    }
}

impl FromStr for NodeKey {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (label, key) = s
            .split_once(':')
            .ok_or_else(|| AppError::Validation(format!("Malformed node key: {}", s)))?;
        let label = NodeLabel::from_str(label)
            .map_err(|_| AppError::Validation(format!("Unknown node label in key: {}", s)))?;
        if key.is_empty() {
            return Err(AppError::Validation(format!("Empty natural key: {}", s)));
        }
        Ok(NodeKey::new(label, key))
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeType {
    DependsOn,
    HadIssue,
    ResolvedBy,
    Documents,
    Modifies,
    Requires,
    AppliesTo,
    HasStep,
    NextStep,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeKey {
    pub from: NodeKey,
    pub edge_type: EdgeType,
    pub to: NodeKey,
}

impl EdgeKey {
    pub fn new(from: NodeKey, edge_type: EdgeType, to: NodeKey) -> Self {
        Self {
            from,
            edge_type,
            to,
        }
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})-[{}]->({})", self.from, self.edge_type, self.to)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StampedValue {
    pub value: Value,
    pub stamp: DateTime<Utc>,
}

impl StampedValue {
    fn supersedes(&self, other: &StampedValue) -> bool {
        match self.stamp.cmp(&other.stamp) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => self.value.to_string() > other.value.to_string(),
        }
    }
}

/// Last-writer-wins property map
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Properties(BTreeMap<String, StampedValue>);

impl Properties {
    /// Merge incoming values written at `stamp`; returns true if anything changed
    pub fn merge(&mut self, incoming: &BTreeMap<String, Value>, stamp: DateTime<Utc>) -> bool {
        let mut changed = false;

        for (name, value) in incoming {
            let candidate = StampedValue {
                value: value.clone(),
                stamp,
            };

            match self.0.get_mut(name) {
                Some(current) => {
                    if candidate.supersedes(current) {
                        *current = candidate;
                        changed = true;
                    }
                }
                None => {
                    self.0.insert(name.clone(), candidate);
                    changed = true;
                }
            }
        }

        changed
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name).map(|v| &v.value)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_f64)
    }

    pub fn get_u64(&self, name: &str) -> Option<u64> {
        self.get(name).and_then(Value::as_u64)
    }

    pub fn get_time(&self, name: &str) -> Option<DateTime<Utc>> {
        self.get_str(name)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
    }

    pub fn get_strings(&self, name: &str) -> Vec<String> {
        self.get(name)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Values without their stamps
    pub fn to_plain(&self) -> BTreeMap<String, Value> {
        self.0
            .iter()
            .map(|(k, v)| (k.clone(), v.value.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub key: NodeKey,
    pub properties: Properties,
    /// Earliest event stamp merged into this node
    pub first_seen: DateTime<Utc>,
    /// Latest event stamp merged into this node
    pub updated_at: DateTime<Utc>,
}

impl Node {
    pub fn from_merge(merge: &NodeMerge) -> Self {
        let mut properties = Properties::default();
        properties.merge(&merge.properties, merge.stamp);
        Self {
            key: merge.key.clone(),
            properties,
            first_seen: merge.stamp,
            updated_at: merge.stamp,
        }
    }

    pub fn apply(&mut self, merge: &NodeMerge) -> MergeOutcome {
        let mut changed = self.properties.merge(&merge.properties, merge.stamp);
        if merge.stamp < self.first_seen {
            self.first_seen = merge.stamp;
            changed = true;
        }
        if merge.stamp > self.updated_at {
            self.updated_at = merge.stamp;
            changed = true;
        }
        if changed {
            MergeOutcome::Updated
        } else {
            MergeOutcome::Unchanged
        }
    }

    pub fn label(&self) -> NodeLabel {
        self.key.label
    }

    pub fn name(&self) -> &str {
        &self.key.key
    }

    pub fn title(&self) -> &str {
        self.properties.get_str("title").unwrap_or_default()
    }

    /// Minutes between an issue's `opened_at` and `resolved_at`. None until
    /// both are known, or when the issue was reopened after resolving.
    pub fn resolution_minutes(&self) -> Option<u64> {
        let opened = self.properties.get_time("opened_at")?;
        let resolved = self.properties.get_time("resolved_at")?;
        (resolved >= opened).then(|| (resolved - opened).num_minutes() as u64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub key: EdgeKey,
    pub properties: Properties,
    pub first_seen: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Edge {
    pub fn from_merge(merge: &EdgeMerge) -> Self {
        let mut properties = Properties::default();
        properties.merge(&merge.properties, merge.stamp);
        Self {
            key: merge.key.clone(),
            properties,
            first_seen: merge.stamp,
            updated_at: merge.stamp,
        }
    }

    pub fn apply(&mut self, merge: &EdgeMerge) -> MergeOutcome {
        let mut changed = self.properties.merge(&merge.properties, merge.stamp);
        if merge.stamp < self.first_seen {
            self.first_seen = merge.stamp;
            changed = true;
        }
        if merge.stamp > self.updated_at {
            self.updated_at = merge.stamp;
            changed = true;
        }
        if changed {
            MergeOutcome::Updated
        } else {
            MergeOutcome::Unchanged
        }
    }
}

/// Create-if-absent, update-if-present request for one node
#[derive(Debug, Clone, PartialEq)]
pub struct NodeMerge {
    pub key: NodeKey,
    pub properties: BTreeMap<String, Value>,
    pub stamp: DateTime<Utc>,
}

impl NodeMerge {
    pub fn new(key: NodeKey, stamp: DateTime<Utc>) -> Self {
        Self {
            key,
            properties: BTreeMap::new(),
            stamp,
        }
    }

    pub fn set(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(name.to_string(), value.into());
        self
    }

    /// Absent values are left untouched rather than written as null
    pub fn set_opt<T: Into<Value>>(self, name: &str, value: Option<T>) -> Self {
        match value {
            Some(v) => self.set(name, v),
            None => self,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EdgeMerge {
    pub key: EdgeKey,
    pub properties: BTreeMap<String, Value>,
    pub stamp: DateTime<Utc>,
}

impl EdgeMerge {
    pub fn new(from: NodeKey, edge_type: EdgeType, to: NodeKey, stamp: DateTime<Utc>) -> Self {
        Self {
            key: EdgeKey::new(from, edge_type, to),
            properties: BTreeMap::new(),
            stamp,
        }
    }

    pub fn set(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(name.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOutcome {
    Created,
    Updated,
    Unchanged,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_node_key_round_trip() {
        let key = NodeKey::issue("payments#42");
        assert_eq!(key.to_string(), "issue:payments#42");
        assert_eq!("issue:payments#42".parse::<NodeKey>().unwrap(), key);

        // Only the first colon separates label and key
        let key: NodeKey = "document:docs/runbooks:db.md".parse().unwrap();
        assert_eq!(key.label, NodeLabel::Document);
        assert_eq!(key.key, "docs/runbooks:db.md");

        assert!("widget:x".parse::<NodeKey>().is_err());
        assert!("service:".parse::<NodeKey>().is_err());
        assert!("no-label".parse::<NodeKey>().is_err());
    }

    #[test]
    fn test_edge_type_names() {
        assert_eq!(EdgeType::ResolvedBy.to_string(), "RESOLVED_BY");
        assert_eq!("DEPENDS_ON".parse::<EdgeType>().unwrap(), EdgeType::DependsOn);
    }

    #[test]
    fn test_newer_stamp_wins() {
        let t0 = Utc::now();
        let mut props = Properties::default();
        props.merge(&BTreeMap::from([("status".into(), Value::from("open"))]), t0);

        let older = BTreeMap::from([("status".into(), Value::from("stale"))]);
        assert!(!props.merge(&older, t0 - Duration::seconds(5)));
        assert_eq!(props.get_str("status"), Some("open"));

        let newer = BTreeMap::from([("status".into(), Value::from("resolved"))]);
        assert!(props.merge(&newer, t0 + Duration::seconds(5)));
        assert_eq!(props.get_str("status"), Some("resolved"));
    }

    #[test]
    fn test_merge_order_does_not_matter() {
        let t0 = Utc::now();
        let a = NodeMerge::new(NodeKey::service("api"), t0).set("status", "degraded");
        let b = NodeMerge::new(NodeKey::service("api"), t0 + Duration::seconds(1))
            .set("status", "healthy")
            .set("owner", "platform");
        let c = NodeMerge::new(NodeKey::service("api"), t0).set("status", "down");

        let mut forward = Node::from_merge(&a);
        forward.apply(&b);
        forward.apply(&c);

        let mut backward = Node::from_merge(&c);
        backward.apply(&b);
        backward.apply(&a);

        assert_eq!(forward, backward);
        assert_eq!(forward.properties.get_str("status"), Some("healthy"));
        assert_eq!(forward.first_seen, t0);
    }

    #[test]
    fn test_reapplying_is_unchanged() {
        let merge = NodeMerge::new(NodeKey::issue("DB-1"), Utc::now())
            .set("title", "DB timeout")
            .set_opt::<String>("body", None);
        let mut node = Node::from_merge(&merge);
        assert_eq!(node.apply(&merge), MergeOutcome::Unchanged);
        assert!(node.properties.get("body").is_none());
        assert_eq!(node.title(), "DB timeout");
    }

    #[test]
    fn test_missing_properties_default() {
        let node = Node::from_merge(&NodeMerge::new(NodeKey::issue("X-1"), Utc::now()));
        assert_eq!(node.title(), "");
        assert!(node.properties.get_time("opened_at").is_none());
        assert!(node.properties.get_strings("labels").is_empty());
    }

    #[test]
    fn test_resolution_minutes_needs_both_stamps() {
        let opened = NodeMerge::new(NodeKey::issue("DB-1"), "2024-05-01T10:00:00Z".parse().unwrap())
            .set("opened_at", "2024-05-01T10:00:00+00:00");
        let resolved = NodeMerge::new(NodeKey::issue("DB-1"), "2024-05-01T10:45:00Z".parse().unwrap())
            .set("resolved_at", "2024-05-01T10:45:00+00:00");

        let mut node = Node::from_merge(&resolved);
        assert_eq!(node.resolution_minutes(), None);
        node.apply(&opened);
        assert_eq!(node.resolution_minutes(), Some(45));

        let reopened = NodeMerge::new(NodeKey::issue("DB-1"), "2024-05-01T11:00:00Z".parse().unwrap())
            .set("opened_at", "2024-05-01T11:00:00+00:00");
        node.apply(&reopened);
        assert_eq!(node.resolution_minutes(), None);
    }
}
