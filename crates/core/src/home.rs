//! Home-automation snapshot types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Snapshot of the home-automation backend: every entity state grouped
/// by domain and by area. Built by the adapter, cached briefly by the
/// context resolver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HomeSnapshot {
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub areas: Vec<Value>,
    #[serde(default)]
    pub states: Vec<Value>,
    #[serde(default)]
    pub entities_by_domain: HashMap<String, Vec<Value>>,
    #[serde(default)]
    pub entities_by_area: HashMap<String, Vec<Value>>,
    #[serde(default)]
    pub total_entities: usize,
    /// Set when the backend was unreachable and this snapshot is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HomeSnapshot {
    /// Group raw entity states by domain and area.
    pub fn from_states(states: Vec<Value>, config: Value, areas: Vec<Value>) -> Self {
        let mut entities_by_domain: HashMap<String, Vec<Value>> = HashMap::new();
        let mut entities_by_area: HashMap<String, Vec<Value>> = HashMap::new();

        for state in &states {
            let entity_id = state
                .get("entity_id")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let domain = entity_id.split('.').next().unwrap_or("unknown").to_string();
            entities_by_domain
                .entry(domain)
                .or_default()
                .push(state.clone());

            if let Some(area) = state
                .pointer("/attributes/area_id")
                .and_then(Value::as_str)
            {
                entities_by_area
                    .entry(area.to_string())
                    .or_default()
                    .push(state.clone());
            }
        }

        Self {
            config,
            areas,
            total_entities: states.len(),
            states,
            entities_by_domain,
            entities_by_area,
            error: None,
        }
    }

    /// Empty snapshot carrying the fetch error.
    pub fn degraded(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Entities filtered by domain and/or area.
    pub fn extract_entities(&self, domain: Option<&str>, area: Option<&str>) -> Vec<Value> {
        let mut entities = Vec::new();
        if let Some(domain) = domain {
            if let Some(list) = self.entities_by_domain.get(domain) {
                entities.extend(list.iter().cloned());
            }
        }
        if let Some(area) = area {
            if let Some(list) = self.entities_by_area.get(area) {
                entities.extend(list.iter().cloned());
            }
        }
        entities
    }

    /// Area names, best-effort across backend versions.
    pub fn area_names(&self) -> Vec<String> {
        self.areas
            .iter()
            .filter_map(|a| {
                a.get("name")
                    .or_else(|| a.get("area_id"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_states() -> Vec<Value> {
        vec![
            json!({"entity_id": "light.bedroom", "state": "off", "attributes": {"area_id": "bedroom"}}),
            json!({"entity_id": "light.kitchen", "state": "on", "attributes": {"area_id": "kitchen"}}),
            json!({"entity_id": "switch.heater", "state": "off", "attributes": {}}),
        ]
    }

    #[test]
    fn test_grouping() {
        let snapshot = HomeSnapshot::from_states(sample_states(), json!({}), vec![]);
        assert_eq!(snapshot.total_entities, 3);
        assert_eq!(snapshot.entities_by_domain["light"].len(), 2);
        assert_eq!(snapshot.entities_by_domain["switch"].len(), 1);
        assert_eq!(snapshot.entities_by_area["bedroom"].len(), 1);
    }

    #[test]
    fn test_extract_entities() {
        let snapshot = HomeSnapshot::from_states(sample_states(), json!({}), vec![]);
        let lights = snapshot.extract_entities(Some("light"), None);
        assert_eq!(lights.len(), 2);
        let bedroom = snapshot.extract_entities(None, Some("bedroom"));
        assert_eq!(bedroom.len(), 1);
    }

    #[test]
    fn test_degraded_snapshot() {
        let snapshot = HomeSnapshot::degraded("connection refused");
        assert_eq!(snapshot.total_entities, 0);
        assert!(snapshot.error.is_some());
    }
}
