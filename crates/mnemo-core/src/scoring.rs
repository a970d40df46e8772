//! Importance scoring.
//!
//! [`ImportanceScorer::score`] is a pure function of the item content and the
//! interaction signals: no I/O, no clock, no randomness. The numeric score is
//! a weighted mean of five normalized signals, and the tier is read off fixed
//! thresholds.
//!
//! Task complexity has no direct measurement, so it is approximated by a
//! bucketed content length plus a bonus when the content mentions one of the
//! configured complexity keywords.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{
    CRITICAL_TAG, ImportanceLevel, ImportanceScore, MILESTONE_TAG, MemoryItem,
};

/// Signals describing the interaction that produced an item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportanceSignals {
    /// Role of the producing agent, looked up in the role weight table.
    pub agent_role: Option<String>,
    pub has_human_input: bool,
    pub has_error: bool,
    pub is_milestone: bool,
}

impl ImportanceSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.agent_role = Some(role.into());
        self
    }

    pub fn with_human_input(mut self, value: bool) -> Self {
        self.has_human_input = value;
        self
    }

    pub fn with_error(mut self, value: bool) -> Self {
        self.has_error = value;
        self
    }

    pub fn with_milestone(mut self, value: bool) -> Self {
        self.is_milestone = value;
        self
    }
}

/// Relative weight of each signal in the weighted mean.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalWeights {
    pub role: f64,
    pub complexity: f64,
    pub human_input: f64,
    pub error: f64,
    pub milestone: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            role: 0.2,
            complexity: 0.2,
            human_input: 0.2,
            error: 0.2,
            milestone: 0.2,
        }
    }
}

impl SignalWeights {
    fn total(&self) -> f64 {
        self.role + self.complexity + self.human_input + self.error + self.milestone
    }
}

/// Minimum score for each tier. Anything below `low` is trivial.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierThresholds {
    pub critical: f64,
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            critical: 0.8,
            high: 0.6,
            medium: 0.4,
            low: 0.2,
        }
    }
}

/// Scoring configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Role name (lowercase) to weight in [0, 1].
    pub role_weights: BTreeMap<String, f64>,
    /// Weight for unknown or missing roles.
    pub default_role_weight: f64,
    pub weights: SignalWeights,
    pub thresholds: TierThresholds,
    /// Words that mark content as describing complex work.
    pub complexity_keywords: Vec<String>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let role_weights = [
            ("architect", 1.0),
            ("reviewer", 0.8),
            ("planner", 0.8),
            ("coder", 0.6),
            ("tester", 0.6),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            role_weights,
            default_role_weight: 0.4,
            weights: SignalWeights::default(),
            thresholds: TierThresholds::default(),
            complexity_keywords: [
                "architecture",
                "refactor",
                "migration",
                "design",
                "security",
                "performance",
                "concurrency",
                "deadlock",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

impl ScoringConfig {
    /// Check weights and thresholds. Returns the offending field and a message.
    pub fn validate(&self) -> Result<(), (&'static str, String)> {
        let w = &self.weights;
        for (name, value) in [
            ("scoring.weights.role", w.role),
            ("scoring.weights.complexity", w.complexity),
            ("scoring.weights.human_input", w.human_input),
            ("scoring.weights.error", w.error),
            ("scoring.weights.milestone", w.milestone),
        ] {
            if !(value >= 0.0 && value.is_finite()) {
                return Err((name, "must be a non-negative number".into()));
            }
        }
        if w.total() <= 0.0 {
            return Err(("scoring.weights", "at least one weight must be positive".into()));
        }

        let t = &self.thresholds;
        let ordered = 0.0 <= t.low && t.low < t.medium && t.medium < t.high && t.high < t.critical;
        if !ordered || t.critical > 1.0 {
            return Err((
                "scoring.thresholds",
                "must satisfy 0 <= low < medium < high < critical <= 1".into(),
            ));
        }

        if let Some((role, _)) = self
            .role_weights
            .iter()
            .find(|(_, v)| !(0.0..=1.0).contains(*v))
        {
            return Err(("scoring.role_weights", format!("weight for '{}' must be in [0, 1]", role)));
        }
        if !(0.0..=1.0).contains(&self.default_role_weight) {
            return Err(("scoring.default_role_weight", "must be in [0, 1]".into()));
        }
        Ok(())
    }
}

/// Deterministic importance scorer.
#[derive(Debug, Clone, Default)]
pub struct ImportanceScorer {
    config: ScoringConfig,
}

impl ImportanceScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Weight of the given agent role.
    pub fn role_weight(&self, role: Option<&str>) -> f64 {
        role.and_then(|r| self.config.role_weights.get(&r.to_ascii_lowercase()))
            .copied()
            .unwrap_or(self.config.default_role_weight)
    }

    /// Task complexity proxy in [0, 1].
    pub fn complexity(&self, content: &str) -> f64 {
        let base = match content.chars().count() {
            0..80 => 0.1,
            80..280 => 0.3,
            280..1000 => 0.6,
            _ => 0.8,
        };
        let lower = content.to_lowercase();
        let bonus = if self
            .config
            .complexity_keywords
            .iter()
            .any(|k| !k.is_empty() && lower.contains(&k.to_lowercase()))
        {
            0.2
        } else {
            0.0
        };
        f64::min(base + bonus, 1.0)
    }

    /// Map a score onto a tier.
    pub fn tier_for(&self, score: f64) -> ImportanceLevel {
        let t = &self.config.thresholds;
        if score >= t.critical {
            ImportanceLevel::Critical
        } else if score >= t.high {
            ImportanceLevel::High
        } else if score >= t.medium {
            ImportanceLevel::Medium
        } else if score >= t.low {
            ImportanceLevel::Low
        } else {
            ImportanceLevel::Trivial
        }
    }

    /// Score an item. An explicit `critical` tag pins the tier to critical,
    /// and a `milestone` tag counts as the milestone signal.
    pub fn score(&self, item: &MemoryItem, signals: &ImportanceSignals) -> ImportanceScore {
        let w = &self.config.weights;
        let milestone = signals.is_milestone || item.metadata.has_tag(MILESTONE_TAG);
        let flag = |b: bool| if b { 1.0 } else { 0.0 };

        let weighted = w.role * self.role_weight(signals.agent_role.as_deref())
            + w.complexity * self.complexity(item.content())
            + w.human_input * flag(signals.has_human_input)
            + w.error * flag(signals.has_error)
            + w.milestone * flag(milestone);

        let total = w.total();
        let score = if total > 0.0 {
            (weighted / total).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let level = if item.metadata.has_tag(CRITICAL_TAG) {
            ImportanceLevel::Critical
        } else {
            self.tier_for(score)
        };

        ImportanceScore { score, level }
    }

    /// Score an item and store the result on it.
    pub fn apply(&self, item: &mut MemoryItem, signals: &ImportanceSignals) -> ImportanceScore {
        let importance = self.score(item, signals);
        item.set_importance(importance);
        importance
    }

    /// A consolidated item is as important as its most important source.
    pub fn inherit(&self, summary: &mut MemoryItem, sources: &[MemoryItem]) -> ImportanceScore {
        let importance = sources.iter().fold(
            ImportanceScore {
                score: 0.0,
                level: ImportanceLevel::Trivial,
            },
            |acc, s| ImportanceScore {
                score: acc.score.max(s.importance_score()),
                level: acc.level.max(s.importance_level()),
            },
        );
        summary.set_importance(importance);
        importance
    }
}
