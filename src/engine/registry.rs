//! Model Registry - model versions, production pointer and candidate traffic per strategy

use std::collections::HashMap;

use crate::domain::ModelVersion;

#[derive(Debug, Default)]
pub struct ModelRegistry {
    versions: HashMap<String, Vec<ModelVersion>>,
    /// strategy -> version_id of the current production model
    production: HashMap<String, String>,
    /// strategy -> share of traffic (%) routed to the candidate under test
    traffic: HashMap<String, u8>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a version (replacing one with the same id)
    pub fn record_version(&mut self, model: ModelVersion) {
        let versions = self.versions.entry(model.strategy_name.clone()).or_default();
        match versions.iter_mut().find(|v| v.version_id == model.version_id) {
            Some(existing) => *existing = model,
            None => versions.push(model),
        }
    }

    pub fn production(&self, strategy_name: &str) -> Option<&ModelVersion> {
        let version_id = self.production.get(strategy_name)?;
        self.versions
            .get(strategy_name)?
            .iter()
            .find(|v| &v.version_id == version_id)
    }

    /// Make `model` the production version; returns the version it replaced
    pub fn promote(&mut self, model: ModelVersion) -> Option<ModelVersion> {
        let strategy = model.strategy_name.clone();
        let previous = self.production(&strategy).cloned();
        let version_id = model.version_id.clone();

        self.record_version(model);
        if let Some(versions) = self.versions.get_mut(&strategy) {
            for v in versions.iter_mut() {
                v.is_production = v.version_id == version_id;
            }
        }
        self.production.insert(strategy, version_id);
        previous
    }

    /// Reinstate `previous` as production (or clear the pointer when there was none)
    pub fn restore(&mut self, strategy_name: &str, previous: Option<&ModelVersion>) {
        match previous {
            Some(model) => {
                self.promote(model.clone());
            }
            None => {
                self.production.remove(strategy_name);
                if let Some(versions) = self.versions.get_mut(strategy_name) {
                    for v in versions.iter_mut() {
                        v.is_production = false;
                    }
                }
            }
        }
    }

    pub fn set_traffic(&mut self, strategy_name: &str, pct: u8) {
        self.traffic.insert(strategy_name.to_string(), pct.min(100));
    }

    pub fn traffic(&self, strategy_name: &str) -> u8 {
        self.traffic.get(strategy_name).copied().unwrap_or(0)
    }

    /// All versions of a strategy, newest first
    pub fn versions(&self, strategy_name: &str) -> Vec<ModelVersion> {
        let mut versions = self
            .versions
            .get(strategy_name)
            .cloned()
            .unwrap_or_default();
        versions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        versions
    }

    pub fn production_count(&self) -> usize {
        self.production.len()
    }
}
