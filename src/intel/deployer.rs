//! Deployer reputation engine
//!
//! Scores launchpad deployers from their launch history, rug record and
//! wallet connectivity. Profiles live in the KV store under a 24 h expiry
//! with a write-through in-memory cache; a sorted-set index orders deployers
//! by score.

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::infra::KvStore;

const PROFILE_EXPIRY_SECS: u64 = 24 * 3600;

/// Reputation profile for one deployer wallet
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployerProfile {
    pub address: String,
    pub total_launches: u32,
    pub rug_count: u32,
    pub rug_rate: f64,
    pub avg_token_lifespan_ms: f64,
    pub connected_wallets: Vec<String>,
    /// Milliseconds since epoch
    pub last_seen_ms: i64,
    /// Reputation in [0,100], higher is better
    pub score: f64,
}

impl DeployerProfile {
    fn new(address: String) -> Self {
        Self {
            address,
            total_launches: 0,
            rug_count: 0,
            rug_rate: 0.0,
            avg_token_lifespan_ms: 0.0,
            connected_wallets: Vec::new(),
            last_seen_ms: Utc::now().timestamp_millis(),
            score: 50.0,
        }
    }
}

/// Score a profile. Pure; `now_ms` is injected so the staleness penalty is
/// reproducible.
pub fn compute_score(profile: &DeployerProfile, now_ms: i64) -> f64 {
    let lifespan_hours = profile.avg_token_lifespan_ms / 3_600_000.0;
    let days_since_seen = ((now_ms - profile.last_seen_ms) as f64 / 86_400_000.0).max(0.0);

    let score = 50.0 - 40.0 * profile.rug_rate
        + (profile.total_launches as f64 * 1.5).min(15.0)
        + (lifespan_hours * 2.0).min(20.0)
        - (profile.connected_wallets.len() as f64 * 3.0).min(15.0)
        - ((days_since_seen - 7.0).max(0.0) * 0.5).min(10.0);

    score.clamp(0.0, 100.0).round()
}

/// Deployer reputation store
pub struct DeployerScoreEngine {
    kv: Option<Arc<KvStore>>,
    prefix: String,
    cache: DashMap<String, DeployerProfile>,
}

impl DeployerScoreEngine {
    pub fn new(kv: Option<Arc<KvStore>>, prefix: &str) -> Self {
        Self {
            kv,
            prefix: prefix.to_string(),
            cache: DashMap::new(),
        }
    }

    fn profile_key(&self, address: &str) -> String {
        format!("{}:deployer:{}", self.prefix, address)
    }

    fn index_key(&self) -> String {
        format!("{}:deployers:by_score", self.prefix)
    }

    /// Fetch a profile from the cache, falling back to the KV store.
    pub async fn get_profile(&self, address: &str) -> Result<Option<DeployerProfile>> {
        if let Some(cached) = self.cache.get(address) {
            return Ok(Some(cached.clone()));
        }
        if let Some(kv) = &self.kv {
            if let Some(raw) = kv.get(&self.profile_key(address)).await? {
                let profile: DeployerProfile = serde_json::from_str(&raw)?;
                self.cache.insert(address.to_string(), profile.clone());
                return Ok(Some(profile));
            }
        }
        Ok(None)
    }

    /// Record one launch, deduplicating connected wallets and refreshing
    /// the score and index.
    pub async fn record_launch(
        &self,
        deployer: &str,
        mint: &str,
        connected_wallets: &[String],
    ) -> Result<DeployerProfile> {
        let mut profile = self
            .get_profile(deployer)
            .await?
            .unwrap_or_else(|| DeployerProfile::new(deployer.to_string()));

        profile.total_launches += 1;
        profile.last_seen_ms = Utc::now().timestamp_millis();

        let mut known: HashSet<String> = profile.connected_wallets.drain(..).collect();
        known.extend(connected_wallets.iter().cloned());
        profile.connected_wallets = known.into_iter().collect();
        profile.connected_wallets.sort();

        profile.score = compute_score(&profile, profile.last_seen_ms);
        debug!(
            "Deployer {} launched {}: {} launches, score {}",
            deployer, mint, profile.total_launches, profile.score
        );

        self.persist(&profile).await?;
        Ok(profile)
    }

    /// Record a rug pull, blending the token lifespan into the running mean.
    pub async fn record_rug(&self, deployer: &str, lifespan_ms: f64) -> Result<DeployerProfile> {
        let mut profile = self
            .get_profile(deployer)
            .await?
            .unwrap_or_else(|| DeployerProfile::new(deployer.to_string()));

        profile.rug_count += 1;
        if profile.total_launches == 0 {
            profile.total_launches = 1;
        }
        profile.rug_rate = profile.rug_count as f64 / profile.total_launches as f64;

        let n = profile.rug_count as f64;
        profile.avg_token_lifespan_ms =
            (profile.avg_token_lifespan_ms * (n - 1.0) + lifespan_ms) / n;

        profile.score = compute_score(&profile, Utc::now().timestamp_millis());
        self.persist(&profile).await?;
        Ok(profile)
    }

    async fn persist(&self, profile: &DeployerProfile) -> Result<()> {
        self.cache.insert(profile.address.clone(), profile.clone());
        if let Some(kv) = &self.kv {
            let raw = serde_json::to_string(profile)?;
            kv.set_ex(&self.profile_key(&profile.address), &raw, PROFILE_EXPIRY_SECS)
                .await?;
            kv.zadd(&self.index_key(), &profile.address, profile.score)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_matches_reference_profile() {
        let now = Utc::now().timestamp_millis();
        let profile = DeployerProfile {
            address: "dev".into(),
            total_launches: 10,
            rug_count: 2,
            rug_rate: 0.2,
            avg_token_lifespan_ms: 3_600_000.0,
            connected_wallets: vec!["w1".into(), "w2".into()],
            last_seen_ms: now,
            score: 0.0,
        };

        // 50 - 40*0.2 + min(15, 15) + min(20, 2) - min(15, 6) - 0
        assert_eq!(compute_score(&profile, now), 53.0);
    }

    #[test]
    fn score_is_clamped_to_bounds() {
        let now = Utc::now().timestamp_millis();
        let mut worst = DeployerProfile::new("bad".into());
        worst.rug_rate = 1.0;
        worst.connected_wallets = (0..50).map(|i| format!("w{}", i)).collect();
        worst.last_seen_ms = now - 90 * 86_400_000;
        let score = compute_score(&worst, now);
        assert!((0.0..=100.0).contains(&score));
        assert_eq!(score, 0.0);

        let mut best = DeployerProfile::new("good".into());
        best.total_launches = 100;
        best.avg_token_lifespan_ms = 1_000.0 * 3_600_000.0;
        best.last_seen_ms = now;
        let score = compute_score(&best, now);
        assert!((0.0..=100.0).contains(&score));
        assert_eq!(score, 85.0);
    }

    #[test]
    fn staleness_penalty_kicks_in_after_a_week() {
        let now = Utc::now().timestamp_millis();
        let mut profile = DeployerProfile::new("dev".into());
        profile.last_seen_ms = now - 9 * 86_400_000;
        // 50 - min(10, 2 * 0.5) = 49
        assert_eq!(compute_score(&profile, now), 49.0);
    }

    #[tokio::test]
    async fn launches_deduplicate_connected_wallets() {
        let engine = DeployerScoreEngine::new(None, "test");
        engine
            .record_launch("dev", "mint-1", &["a".into(), "b".into()])
            .await
            .unwrap();
        let profile = engine
            .record_launch("dev", "mint-2", &["b".into(), "c".into()])
            .await
            .unwrap();

        assert_eq!(profile.total_launches, 2);
        assert_eq!(profile.connected_wallets, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn rug_updates_rate_and_lifespan_mean() {
        let engine = DeployerScoreEngine::new(None, "test");
        for i in 0..4 {
            engine
                .record_launch("dev", &format!("mint-{}", i), &[])
                .await
                .unwrap();
        }
        engine.record_rug("dev", 1_000_000.0).await.unwrap();
        let profile = engine.record_rug("dev", 3_000_000.0).await.unwrap();

        assert_eq!(profile.rug_count, 2);
        assert!((profile.rug_rate - 0.5).abs() < 1e-9);
        assert!((profile.avg_token_lifespan_ms - 2_000_000.0).abs() < 1e-6);
    }
}
