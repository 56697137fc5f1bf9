use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;

use anyhow::Context;

use crate::workspace::VertexId;

/// Externally supplied per-vertex potential, added with weight `lambda` to
/// the low-level heuristic and edge costs of the hybrid solver. Values are
/// clamped non-negative so the bias can only delay, never reward, a state;
/// with a non-zero lambda the search is bounded-suboptimal rather than
/// optimal.
#[derive(Debug, Clone, Default)]
pub struct PotentialField {
    values: HashMap<VertexId, f64>,
    lambda: f64,
}

impl PotentialField {
    pub fn new(lambda: f64) -> Self {
        PotentialField {
            values: HashMap::new(),
            lambda,
        }
    }

    pub fn from_values<I: IntoIterator<Item = (VertexId, f64)>>(lambda: f64, values: I) -> Self {
        let mut field = PotentialField::new(lambda);
        for (vertex, value) in values {
            field.set(vertex, value);
        }
        field
    }

    /// Load a plain `vertex id -> potential` YAML map.
    pub fn load(path: &str, lambda: f64) -> anyhow::Result<Self> {
        let file = File::open(path).with_context(|| format!("opening field file {path}"))?;
        let values: HashMap<VertexId, f64> = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing field file {path}"))?;
        Ok(PotentialField::from_values(lambda, values))
    }

    pub fn set(&mut self, vertex: VertexId, value: f64) {
        self.values.insert(vertex, value.max(0.0));
    }

    /// Weighted bias for a vertex; zero where the field is undefined.
    pub fn bias(&self, vertex: VertexId) -> f64 {
        self.lambda * self.values.get(&vertex).copied().unwrap_or(0.0)
    }
}
