use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use strum::{Display, EnumIter, EnumString};
use uuid::Uuid;
use validator::Validate;

/// Characters of the description that take part in the fingerprint
pub const FINGERPRINT_DESCRIPTION_CHARS: usize = 100;

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
    Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Severity {
    Critical,
    High,
    #[default]
    Medium,
    Low,
    Info,
}

/// Alert trigger request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AlertInput {
    #[serde(rename = "type")]
    #[validate(length(min = 1, max = 255))]
    pub alert_type: String,

    #[serde(default)]
    pub severity: Severity,

    #[validate(length(min = 1, max = 500))]
    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl AlertInput {
    pub fn new(
        alert_type: impl Into<String>,
        severity: Severity,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            alert_type: alert_type.into(),
            severity,
            title: title.into(),
            description: description.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.alert_type, self.severity, &self.title, &self.description)
    }
}

/// Stable dedup identity of an alert.
///
/// Every field is written with its byte length first, so no two distinct
/// field tuples hash the same input.
pub fn fingerprint(alert_type: &str, severity: Severity, title: &str, description: &str) -> String {
    let preview: String = description
        .chars()
        .take(FINGERPRINT_DESCRIPTION_CHARS)
        .collect();
    let severity = severity.to_string();

    let mut hasher = Sha256::new();
    for field in [alert_type, severity.as_str(), title, preview.as_str()] {
        hasher.update((field.len() as u64).to_be_bytes());
        hasher.update(field.as_bytes());
    }

    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub fingerprint: String,
    #[serde(rename = "type")]
    pub alert_type: String,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub metadata: HashMap<String, Value>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub occurrence_count: u64,
    pub status: AlertStatus,
    pub resolved_at: Option<DateTime<Utc>>,
    pub escalated_at: Option<DateTime<Utc>>,
    pub escalation_level: u32,
    /// Name of the rule that matched when the alert was created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<String>,
    /// Rule override of the global escalation delay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_delay_secs: Option<u64>,
}

impl Alert {
    pub fn from_input(input: AlertInput, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            fingerprint: input.fingerprint(),
            alert_type: input.alert_type,
            severity: input.severity,
            title: input.title,
            description: input.description,
            metadata: input.metadata,
            first_seen: now,
            last_seen: now,
            occurrence_count: 1,
            status: AlertStatus::Active,
            resolved_at: None,
            escalated_at: None,
            escalation_level: 0,
            rule: None,
            channels: Vec::new(),
            escalation_delay_secs: None,
        }
    }

    /// Attach the routing of the rule that matched this alert
    pub fn with_rule(mut self, rule: &AlertRule) -> Self {
        self.rule = Some(rule.name.clone());
        self.channels = rule.channels.clone();
        self.escalation_delay_secs = Some(rule.escalation_delay);
        self
    }

    /// Escalation delay of this alert, `default` unless a rule set one
    pub fn escalation_delay(&self, default: chrono::Duration) -> chrono::Duration {
        self.escalation_delay_secs
            .and_then(|secs| i64::try_from(secs).ok())
            .map(chrono::Duration::seconds)
            .unwrap_or(default)
    }

    pub fn is_active(&self) -> bool {
        self.status == AlertStatus::Active
    }

    pub fn record_occurrence(&mut self, now: DateTime<Utc>) {
        self.occurrence_count += 1;
        if now > self.last_seen {
            self.last_seen = now;
        }
    }

    pub fn resolve(&mut self, now: DateTime<Utc>) {
        self.status = AlertStatus::Resolved;
        self.resolved_at = Some(now);
    }

    /// Active, not yet escalated and older than `delay`
    pub fn needs_escalation(&self, now: DateTime<Utc>, delay: chrono::Duration) -> bool {
        self.is_active() && self.escalated_at.is_none() && now - self.first_seen > delay
    }

    pub fn escalate(&mut self, now: DateTime<Utc>) {
        self.escalated_at = Some(now);
        self.escalation_level += 1;
    }

    pub fn age_minutes(&self, now: DateTime<Utc>) -> f64 {
        (now - self.first_seen).num_seconds() as f64 / 60.0
    }
}

/// Result of inserting under the one-active-alert-per-fingerprint rule
#[derive(Debug, Clone, PartialEq)]
pub enum ActiveUpsert {
    /// No active alert existed; this one was stored
    Created(Alert),
    /// An active alert already existed and had its occurrence recorded
    Occurrence(Alert),
}

/// Answer to a trigger request; exactly one of `triggered`/`deduplicated` is set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerOutcome {
    pub triggered: bool,
    pub deduplicated: bool,
    pub fingerprint: String,
    pub occurrence_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_id: Option<Uuid>,
}

impl TriggerOutcome {
    pub fn triggered(alert: &Alert) -> Self {
        Self {
            triggered: true,
            deduplicated: false,
            fingerprint: alert.fingerprint.clone(),
            occurrence_count: alert.occurrence_count,
            alert_id: Some(alert.id),
        }
    }

    pub fn deduplicated(alert: &Alert) -> Self {
        Self {
            triggered: false,
            deduplicated: true,
            fingerprint: alert.fingerprint.clone(),
            occurrence_count: alert.occurrence_count,
            alert_id: Some(alert.id),
        }
    }
}

fn default_rule_channels() -> Vec<String> {
    vec!["email".to_string()]
}

fn default_dedup_window() -> u64 {
    300
}

fn default_escalation_delay() -> u64 {
    900
}

fn default_true() -> bool {
    true
}

/// Routing and timing overrides for alerts of matching types.
///
/// A rule matches an alert when it is enabled and its `condition`
/// mentions the alert type, compared case-insensitively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct AlertRule {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,

    #[validate(length(min = 1, max = 255))]
    pub name: String,

    #[validate(length(min = 1, max = 1000))]
    pub condition: String,

    #[serde(default)]
    pub severity: Severity,

    #[serde(default = "default_rule_channels")]
    pub channels: Vec<String>,

    /// Seconds
    #[serde(default = "default_dedup_window")]
    #[validate(range(min = 1))]
    pub deduplication_window: u64,

    /// Seconds
    #[serde(default = "default_escalation_delay")]
    pub escalation_delay: u64,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl AlertRule {
    pub fn new(name: impl Into<String>, condition: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            condition: condition.into(),
            severity: Severity::default(),
            channels: default_rule_channels(),
            deduplication_window: default_dedup_window(),
            escalation_delay: default_escalation_delay(),
            enabled: true,
        }
    }

    pub fn matches(&self, alert_type: &str) -> bool {
        self.enabled
            && self
                .condition
                .to_lowercase()
                .contains(&alert_type.to_lowercase())
    }

    pub fn dedup_window(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.deduplication_window)
    }
}

/// First matching rule in name order
pub fn match_rule<'a>(rules: &'a [AlertRule], alert_type: &str) -> Option<&'a AlertRule> {
    rules
        .iter()
        .filter(|rule| rule.matches(alert_type))
        .min_by(|a, b| a.name.cmp(&b.name))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeverityCount {
    pub severity: Severity,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentAlert {
    #[serde(rename = "type")]
    pub alert_type: String,
    pub severity: Severity,
    pub title: String,
    pub occurrences: u64,
    pub age_minutes: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertStats {
    pub total_alerts: usize,
    pub active_alerts: usize,
    pub by_severity: Vec<SeverityCount>,
    pub recent_active: Vec<RecentAlert>,
}

impl AlertStats {
    const RECENT_LIMIT: usize = 10;

    pub fn from_alerts(alerts: &[Alert], now: DateTime<Utc>) -> Self {
        let mut active: Vec<&Alert> = alerts.iter().filter(|a| a.is_active()).collect();

        let mut counts: BTreeMap<Severity, usize> = BTreeMap::new();
        for alert in &active {
            *counts.entry(alert.severity).or_default() += 1;
        }

        active.sort_by(|a, b| b.first_seen.cmp(&a.first_seen));

        Self {
            total_alerts: alerts.len(),
            active_alerts: active.len(),
            by_severity: counts
                .into_iter()
                .map(|(severity, count)| SeverityCount { severity, count })
                .collect(),
            recent_active: active
                .into_iter()
                .take(Self::RECENT_LIMIT)
                .map(|a| RecentAlert {
                    alert_type: a.alert_type.clone(),
                    severity: a.severity,
                    title: a.title.clone(),
                    occurrences: a.occurrence_count,
                    age_minutes: a.age_minutes(now),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_fingerprint_is_stable() {
        let a = AlertInput::new("cpu", Severity::High, "CPU hot", "node-3 at 97%");
        let b = AlertInput::new("cpu", Severity::High, "CPU hot", "node-3 at 97%");
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_fingerprint_distinguishes_severity_and_title() {
        let base = fingerprint("cpu", Severity::High, "CPU hot", "x");
        assert_ne!(base, fingerprint("cpu", Severity::Critical, "CPU hot", "x"));
        assert_ne!(base, fingerprint("cpu", Severity::High, "CPU warm", "x"));
    }

    #[test]
    fn test_fingerprint_field_boundaries() {
        assert_ne!(
            fingerprint("ab", Severity::Low, "c", ""),
            fingerprint("a", Severity::Low, "bc", "")
        );
    }

    #[test]
    fn test_fingerprint_truncates_description() {
        let prefix = "d".repeat(100);
        let a = fingerprint("disk", Severity::Low, "Disk", &format!("{}first tail", prefix));
        let b = fingerprint("disk", Severity::Low, "Disk", &format!("{}second tail", prefix));
        assert_eq!(a, b);

        let c = fingerprint("disk", Severity::Low, "Disk", &"d".repeat(99));
        assert_ne!(a, c);
    }

    #[test]
    fn test_input_validation() {
        let input = AlertInput::new("", Severity::Low, "title", "");
        assert!(input.validate().is_err());

        let input = AlertInput::new("cpu", Severity::Low, "t".repeat(501), "");
        assert!(input.validate().is_err());

        let input = AlertInput::new("cpu", Severity::Low, "ok", "");
        assert!(input.validate().is_ok());
    }

    #[test]
    fn test_input_wire_form() {
        let input: AlertInput = serde_json::from_str(
            r#"{"type":"latency","severity":"critical","title":"p99 > 2s","description":"api"}"#,
        )
        .unwrap();
        assert_eq!(input.alert_type, "latency");
        assert_eq!(input.severity, Severity::Critical);
        assert!(input.metadata.is_empty());
    }

    #[test]
    fn test_escalation_eligibility() {
        let now = Utc::now();
        let mut alert = Alert::from_input(
            AlertInput::new("cpu", Severity::High, "CPU hot", ""),
            now - Duration::minutes(20),
        );
        let delay = Duration::minutes(15);

        assert!(alert.needs_escalation(now, delay));
        alert.escalate(now);
        assert!(!alert.needs_escalation(now, delay));
        assert_eq!(alert.escalation_level, 1);
    }

    #[test]
    fn test_rule_wire_defaults() {
        let rule: AlertRule =
            serde_json::from_str(r#"{"name":"db-rule","condition":"type == db"}"#).unwrap();
        assert_eq!(rule.severity, Severity::Medium);
        assert_eq!(rule.channels, vec!["email".to_string()]);
        assert_eq!(rule.deduplication_window, 300);
        assert_eq!(rule.escalation_delay, 900);
        assert!(rule.enabled);
        assert!(rule.validate().is_ok());
    }

    #[test]
    fn test_rule_matching() {
        let mut disabled = AlertRule::new("a-disabled", "DB latency");
        disabled.enabled = false;
        let rules = vec![
            AlertRule::new("z-db", "db"),
            AlertRule::new("m-db", "alerts where type is DB"),
            disabled,
        ];

        assert_eq!(match_rule(&rules, "db").map(|r| r.name.as_str()), Some("m-db"));
        assert!(match_rule(&rules, "cpu").is_none());
        assert!(match_rule(&rules, "latency").is_none());
    }

    #[test]
    fn test_rule_sets_escalation_delay() {
        let now = Utc::now();
        let mut rule = AlertRule::new("db", "db");
        rule.escalation_delay = 60;
        let alert = Alert::from_input(AlertInput::new("db", Severity::High, "DB down", ""), now)
            .with_rule(&rule);

        assert_eq!(alert.rule.as_deref(), Some("db"));
        assert_eq!(alert.escalation_delay(Duration::minutes(15)), Duration::minutes(1));
        assert!(alert.needs_escalation(now + Duration::minutes(2), alert.escalation_delay(Duration::minutes(15))));
    }

    #[test]
    fn test_stats_count_active_by_severity() {
        let now = Utc::now();
        let mut resolved = Alert::from_input(AlertInput::new("a", Severity::Low, "a", ""), now);
        resolved.resolve(now);
        let alerts = vec![
            Alert::from_input(AlertInput::new("b", Severity::High, "b", ""), now),
            Alert::from_input(AlertInput::new("c", Severity::High, "c", ""), now),
            resolved,
        ];

        let stats = AlertStats::from_alerts(&alerts, now);
        assert_eq!(stats.total_alerts, 3);
        assert_eq!(stats.active_alerts, 2);
        assert_eq!(
            stats.by_severity,
            vec![SeverityCount {
                severity: Severity::High,
                count: 2
            }]
        );
        assert_eq!(stats.recent_active.len(), 2);
    }
}
