use serde::{Deserialize, Deserializer, Serialize, Serializer};
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RcaQuery {
    /// Free-text description of the symptom
    #[serde(alias = "issue_description")]
    #[validate(length(max = 4000))]
    pub query: String,

    /// Service the symptom was observed on
    #[serde(default)]
    pub component: Option<String>,

    /// Error code reported with the symptom; searched along with the query
    #[serde(default)]
    pub error_code: Option<String>,
}

impl RcaQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            component: None,
            error_code: None,
        }
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    /// Text handed to the semantic index
    pub fn search_text(&self) -> String {
        match &self.error_code {
            Some(code) if !code.trim().is_empty() => format!("{} {}", self.query.trim(), code.trim()),
            _ => self.query.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarIssue {
    pub issue_id: String,
    pub title: String,
    /// Similarity score in [0, 1]; 0 for keyword matches
    pub similarity: f64,
    /// Title of the solution that resolved it, if any
    pub resolution: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendedSolution {
    pub solution_id: String,
    pub title: String,
    pub success_rate: Option<f64>,
    pub resolution_minutes: Option<u64>,
    /// Issue through which the solution was found
    pub issue_id: String,
}

/// Expected time to resolution; `Unknown` when no evidence exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimatedTime {
    Minutes(u64),
    Unknown,
}

impl EstimatedTime {
    /// Median of the known resolution times
    pub fn from_samples(samples: &[u64]) -> Self {
        if samples.is_empty() {
            return EstimatedTime::Unknown;
        }
        let mut sorted = samples.to_vec();
        sorted.sort_unstable();
        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2
        } else {
            sorted[mid]
        };
        EstimatedTime::Minutes(median)
    }
}

impl std::fmt::Display for EstimatedTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EstimatedTime::Minutes(m) => write!(f, "{} minutes", m),
            EstimatedTime::Unknown => write!(f, "unknown"),
        }
    }
}

impl Serialize for EstimatedTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EstimatedTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        if text == "unknown" {
            return Ok(EstimatedTime::Unknown);
        }
        text.strip_suffix(" minutes")
            .and_then(|n| n.parse().ok())
            .map(EstimatedTime::Minutes)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid estimated time: {}", text)))
    }
}

/// Which retrieval path produced the answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Evidence {
    Semantic,
    KeywordFallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RcaResult {
    pub similar_issues: Vec<SimilarIssue>,
    pub affected_services: Vec<String>,
    pub recommended_solutions: Vec<RecommendedSolution>,
    pub estimated_time: EstimatedTime,
    pub confidence: f64,
    pub evidence: Evidence,
    /// False when hits could not be checked against the graph
    #[serde(default = "default_verified")]
    pub verified: bool,
}

fn default_verified() -> bool {
    true
}
