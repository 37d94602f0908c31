use serde::{Deserialize, Serialize};

use crate::connectivity::MAX_LEVEL;

/// Whether an entity with bounds occupies one cell or every cell its bounds touch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpanningPolicy {
    /// Index only the cell containing the entity position.
    #[default]
    AnchorCell,
    /// Index every cell the entity's bounds intersect.
    SpanCells,
}

/// Tuning knobs of the index store and balancer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TetreeConfig {
    /// Split a node when it holds more entities than this and may still refine.
    pub max_entities_per_node: usize,
    /// Deepest level splits may reach. At most [`MAX_LEVEL`].
    pub max_depth: u8,
    /// Allow the array storage form at all.
    pub use_array_nodes: bool,
    /// Force the array form regardless of occupancy.
    pub always_use_array_nodes: bool,
    /// Occupancy at which a set node converts to the array form; dropping below half of
    /// it converts back.
    pub array_threshold: usize,
    /// Initial capacity of freshly converted array nodes.
    pub array_initial_capacity: usize,
    /// Reclaim slack capacity of array nodes.
    pub enable_node_compaction: bool,
    /// Fill ratio under which a compaction pass shrinks an array node.
    pub compaction_threshold: f64,
    /// How bounded entities map to cells.
    pub spanning_policy: SpanningPolicy,
}

impl Default for TetreeConfig {
    fn default() -> Self {
        TetreeConfig {
            max_entities_per_node: 32,
            max_depth: MAX_LEVEL,
            use_array_nodes: true,
            always_use_array_nodes: false,
            array_threshold: 16,
            array_initial_capacity: 8,
            enable_node_compaction: false,
            compaction_threshold: 0.25,
            spanning_policy: SpanningPolicy::default(),
        }
    }
}

impl TetreeConfig {
    /// Clamps dependent fields into their admissible ranges.
    pub fn sanitized(mut self) -> Self {
        self.max_depth = self.max_depth.min(MAX_LEVEL);
        self.array_threshold = self.array_threshold.max(1);
        self.max_entities_per_node = self.max_entities_per_node.max(1);
        self
    }

    /// Reads a configuration from JSON, sanitizing it.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str::<TetreeConfig>(text).map(TetreeConfig::sanitized)
    }

    /// Writes the configuration as pretty JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_roundtrips_through_json() {
        let cfg = TetreeConfig::default();
        let back = TetreeConfig::from_json(&cfg.to_json().unwrap()).unwrap();
        assert_eq!(back.max_depth, cfg.max_depth);
        assert_eq!(back.spanning_policy, cfg.spanning_policy);
    }

    #[test]
    fn json_load_sanitizes() {
        let text = r#"{
            "max_entities_per_node": 0,
            "max_depth": 63,
            "use_array_nodes": true,
            "always_use_array_nodes": false,
            "array_threshold": 0,
            "array_initial_capacity": 4,
            "enable_node_compaction": false,
            "compaction_threshold": 0.25,
            "spanning_policy": "AnchorCell"
        }"#;
        let cfg = TetreeConfig::from_json(text).unwrap();
        assert_eq!(cfg.max_depth, MAX_LEVEL);
        assert_eq!(cfg.array_threshold, 1);
        assert_eq!(cfg.max_entities_per_node, 1);
    }

    #[test]
    fn sanitize_clamps_depth() {
        let cfg = TetreeConfig {
            max_depth: 40,
            array_threshold: 0,
            ..TetreeConfig::default()
        }
        .sanitized();
        assert_eq!(cfg.max_depth, MAX_LEVEL);
        assert_eq!(cfg.array_threshold, 1);
    }
}
