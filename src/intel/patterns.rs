//! Pattern database
//!
//! Condition-based launch patterns with rolling outcome statistics. All
//! patterns live in one KV hash keyed by id; a write-through cache keeps
//! matching cheap.

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::infra::KvStore;

/// Patterns need this many recorded outcomes before they match
const MIN_OUTCOMES_FOR_MATCH: u32 = 3;

/// Comparison operator for one condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionOperator {
    Gt,
    Lt,
    Eq,
    Gte,
    Lte,
    Between,
}

/// Condition operand: a scalar, or an inclusive `[low, high]` range for
/// `between`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    Scalar(f64),
    Range([f64; 2]),
}

/// One field comparison
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternCondition {
    pub field: String,
    pub operator: ConditionOperator,
    pub value: ConditionValue,
}

/// A named launch pattern with rolling outcome stats
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pattern {
    pub id: String,
    pub name: String,
    pub conditions: Vec<PatternCondition>,
    pub outcome_count: u32,
    pub positive_outcomes: u32,
    pub negative_outcomes: u32,
    pub avg_return_percent: f64,
    pub avg_hold_duration_ms: f64,
    pub last_matched_at_ms: Option<i64>,
    pub created_at_ms: i64,
}

impl Pattern {
    pub fn hit_rate(&self) -> f64 {
        if self.outcome_count == 0 {
            return 0.0;
        }
        self.positive_outcomes as f64 / self.outcome_count as f64
    }

    /// Ranking weight: sample size scaled by hit rate.
    pub fn weight(&self) -> f64 {
        self.outcome_count as f64 * self.hit_rate()
    }
}

/// Check one condition against an observed value.
pub fn match_condition(condition: &PatternCondition, value: f64) -> bool {
    match (&condition.operator, &condition.value) {
        (ConditionOperator::Gt, ConditionValue::Scalar(x)) => value > *x,
        (ConditionOperator::Lt, ConditionValue::Scalar(x)) => value < *x,
        (ConditionOperator::Eq, ConditionValue::Scalar(x)) => (value - x).abs() < f64::EPSILON,
        (ConditionOperator::Gte, ConditionValue::Scalar(x)) => value >= *x,
        (ConditionOperator::Lte, ConditionValue::Scalar(x)) => value <= *x,
        (ConditionOperator::Between, ConditionValue::Range([low, high])) => {
            value >= *low && value <= *high
        }
        // Operator/operand mismatch never matches
        _ => false,
    }
}

/// Pattern store
pub struct PatternDatabase {
    kv: Option<Arc<KvStore>>,
    prefix: String,
    cache: DashMap<String, Pattern>,
}

impl PatternDatabase {
    pub fn new(kv: Option<Arc<KvStore>>, prefix: &str) -> Self {
        Self {
            kv,
            prefix: prefix.to_string(),
            cache: DashMap::new(),
        }
    }

    fn hash_key(&self) -> String {
        format!("{}:patterns", self.prefix)
    }

    /// Load all patterns from the KV hash into the cache.
    pub async fn load(&self) -> Result<usize> {
        if let Some(kv) = &self.kv {
            let entries = kv.hgetall(&self.hash_key()).await?;
            for (id, raw) in entries {
                let pattern: Pattern = serde_json::from_str(&raw)?;
                self.cache.insert(id, pattern);
            }
        }
        Ok(self.cache.len())
    }

    pub async fn upsert(&self, pattern: Pattern) -> Result<()> {
        self.persist(&pattern).await
    }

    pub fn get(&self, id: &str) -> Option<Pattern> {
        self.cache.get(id).map(|p| p.clone())
    }

    /// Patterns whose every condition matches the context, excluding those
    /// with too few outcomes, ranked by `sample_size x hit_rate` descending.
    pub fn find_matches(&self, context: &HashMap<String, f64>) -> Vec<Pattern> {
        let mut matches: Vec<Pattern> = self
            .cache
            .iter()
            .filter(|p| p.outcome_count >= MIN_OUTCOMES_FOR_MATCH)
            .filter(|p| {
                p.conditions.iter().all(|c| {
                    context
                        .get(&c.field)
                        .map(|value| match_condition(c, *value))
                        .unwrap_or(false)
                })
            })
            .map(|p| p.clone())
            .collect();

        matches.sort_by(|a, b| {
            b.weight()
                .partial_cmp(&a.weight())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches
    }

    /// Fold one observed outcome into the rolling means and counters.
    pub async fn record_outcome(
        &self,
        pattern_id: &str,
        return_percent: f64,
        hold_duration_ms: f64,
        positive: bool,
    ) -> Result<Pattern> {
        let pattern = {
            let mut entry = self
                .cache
                .get_mut(pattern_id)
                .ok_or_else(|| Error::Internal(format!("unknown pattern: {}", pattern_id)))?;

            entry.outcome_count += 1;
            if positive {
                entry.positive_outcomes += 1;
            } else {
                entry.negative_outcomes += 1;
            }

            let n = entry.outcome_count as f64;
            entry.avg_return_percent =
                (entry.avg_return_percent * (n - 1.0) + return_percent) / n;
            entry.avg_hold_duration_ms =
                (entry.avg_hold_duration_ms * (n - 1.0) + hold_duration_ms) / n;
            entry.last_matched_at_ms = Some(Utc::now().timestamp_millis());
            entry.clone()
        };

        self.persist(&pattern).await?;
        Ok(pattern)
    }

    async fn persist(&self, pattern: &Pattern) -> Result<()> {
        self.cache.insert(pattern.id.clone(), pattern.clone());
        if let Some(kv) = &self.kv {
            let raw = serde_json::to_string(pattern)?;
            kv.hset(&self.hash_key(), &pattern.id, &raw).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(id: &str, outcomes: u32, positives: u32, conditions: Vec<PatternCondition>) -> Pattern {
        Pattern {
            id: id.to_string(),
            name: id.to_string(),
            conditions,
            outcome_count: outcomes,
            positive_outcomes: positives,
            negative_outcomes: outcomes - positives,
            avg_return_percent: 0.0,
            avg_hold_duration_ms: 0.0,
            last_matched_at_ms: None,
            created_at_ms: Utc::now().timestamp_millis(),
        }
    }

    fn condition(field: &str, operator: ConditionOperator, value: ConditionValue) -> PatternCondition {
        PatternCondition {
            field: field.to_string(),
            operator,
            value,
        }
    }

    #[test]
    fn all_six_operators_behave() {
        let gt = condition("x", ConditionOperator::Gt, ConditionValue::Scalar(5.0));
        assert!(match_condition(&gt, 6.0));
        assert!(!match_condition(&gt, 5.0));

        let lt = condition("x", ConditionOperator::Lt, ConditionValue::Scalar(5.0));
        assert!(match_condition(&lt, 4.0));

        let eq = condition("x", ConditionOperator::Eq, ConditionValue::Scalar(5.0));
        assert!(match_condition(&eq, 5.0));
        assert!(!match_condition(&eq, 5.1));

        let gte = condition("x", ConditionOperator::Gte, ConditionValue::Scalar(5.0));
        assert!(match_condition(&gte, 5.0));

        let lte = condition("x", ConditionOperator::Lte, ConditionValue::Scalar(5.0));
        assert!(match_condition(&lte, 5.0));
        assert!(!match_condition(&lte, 5.1));

        let between = condition(
            "x",
            ConditionOperator::Between,
            ConditionValue::Range([1.0, 10.0]),
        );
        assert!(match_condition(&between, 1.0));
        assert!(match_condition(&between, 10.0));
        assert!(!match_condition(&between, 10.5));
    }

    #[tokio::test]
    async fn matching_skips_thin_samples_and_ranks_by_weight() {
        let db = PatternDatabase::new(None, "test");
        let cond = vec![condition(
            "devScore",
            ConditionOperator::Gte,
            ConditionValue::Scalar(50.0),
        )];

        db.upsert(pattern("thin", 2, 2, cond.clone())).await.unwrap();
        db.upsert(pattern("weak", 10, 3, cond.clone())).await.unwrap();
        db.upsert(pattern("strong", 10, 9, cond)).await.unwrap();

        let mut context = HashMap::new();
        context.insert("devScore".to_string(), 60.0);

        let matches = db.find_matches(&context);
        let ids: Vec<&str> = matches.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["strong", "weak"]);
    }

    #[tokio::test]
    async fn missing_context_field_never_matches() {
        let db = PatternDatabase::new(None, "test");
        db.upsert(pattern(
            "p",
            5,
            5,
            vec![condition(
                "clusterSize",
                ConditionOperator::Lt,
                ConditionValue::Scalar(10.0),
            )],
        ))
        .await
        .unwrap();

        assert!(db.find_matches(&HashMap::new()).is_empty());
    }

    #[tokio::test]
    async fn outcomes_update_incremental_means() {
        let db = PatternDatabase::new(None, "test");
        db.upsert(pattern("p", 0, 0, Vec::new())).await.unwrap();

        db.record_outcome("p", 10.0, 1_000.0, true).await.unwrap();
        db.record_outcome("p", 20.0, 3_000.0, false).await.unwrap();
        let updated = db.record_outcome("p", 30.0, 5_000.0, true).await.unwrap();

        assert_eq!(updated.outcome_count, 3);
        assert_eq!(updated.positive_outcomes, 2);
        assert!((updated.avg_return_percent - 20.0).abs() < 1e-9);
        assert!((updated.avg_hold_duration_ms - 3_000.0).abs() < 1e-9);
        assert!(updated.last_matched_at_ms.is_some());
    }
}
