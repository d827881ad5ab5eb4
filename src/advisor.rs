//! advisor.rs
//!
//! CrowdAdvisor: crowd check that gates route commitment.
//!
//! - risk = thresholds(density within `radius_m` of the destination)
//! - high/critical: up to `max_alternatives` registry places that are not
//!   themselves high/critical, registry order, never the destination itself.

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::crowd::CrowdModel;
use crate::error::{NavError, Result};
use crate::models::types::{AdvisorCfg, CrowdAssessment, Destination, RiskLevel};
use crate::registry::Registry;

pub struct CrowdAdvisor {
    crowd: Arc<RwLock<CrowdModel>>,
    registry: Arc<Registry>,
    cfg: AdvisorCfg,
}

impl CrowdAdvisor {
    pub fn new(crowd: Arc<RwLock<CrowdModel>>, registry: Arc<Registry>, mut cfg: AdvisorCfg) -> Self {
        cfg.thresholds = cfg.thresholds.validated();
        Self { crowd, registry, cfg }
    }

    pub fn cfg(&self) -> &AdvisorCfg {
        &self.cfg
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Assessment against the current sample set.
    pub async fn assess(&self, destination: &Destination) -> CrowdAssessment {
        let model = self.crowd.read().await;
        assess_with(&model, &self.registry, &self.cfg, destination)
    }

    pub async fn assess_id(&self, id: &str) -> Result<CrowdAssessment> {
        let d = self.registry.get(id).ok_or_else(|| NavError::InvalidDestination(id.to_string()))?;
        Ok(self.assess(d).await)
    }
}

fn risk_at(model: &CrowdModel, cfg: &AdvisorCfg, d: &Destination) -> (f64, RiskLevel) {
    let avg = model.density_near(d.coordinates, cfg.radius_m);
    (avg, RiskLevel::from_intensity(avg, &cfg.thresholds))
}

/// Synchronous core of `CrowdAdvisor::assess`, on an already locked model.
pub fn assess_with(
    model: &CrowdModel,
    registry: &Registry,
    cfg: &AdvisorCfg,
    destination: &Destination,
) -> CrowdAssessment {
    let (average_intensity, risk) = risk_at(model, cfg, destination);

    let alternatives = if risk.is_elevated() {
        registry
            .iter()
            .filter(|d| d.id != destination.id)
            .filter(|d| !risk_at(model, cfg, d).1.is_elevated())
            .take(cfg.max_alternatives)
            .cloned()
            .collect()
    } else {
        Vec::new()
    };

    debug!(
        "assess {}: avg {:.3} -> {:?} ({} alternatives)",
        destination.id,
        average_intensity,
        risk,
        alternatives.len()
    );
    CrowdAssessment { destination: destination.clone(), average_intensity, risk, alternatives }
}
