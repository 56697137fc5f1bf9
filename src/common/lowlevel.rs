use std::cmp::Ordering;

use crate::workspace::VertexId;

/// Open-list entry of the 2D space-time search. `seq` is the insertion
/// discriminator that makes the ordering total and deterministic.
#[derive(Debug, Clone)]
pub(crate) struct SpaceTimeNode {
    pub(crate) vertex: VertexId,
    pub(crate) time: f64,
    pub(crate) g: f64,
    pub(crate) f: f64,
    pub(crate) seq: u64,
}

impl PartialEq for SpaceTimeNode {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for SpaceTimeNode {}

impl Ord for SpaceTimeNode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.f
            .total_cmp(&other.f)
            // Deeper states first: higher g wins ties on f.
            .then_with(|| other.g.total_cmp(&self.g))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for SpaceTimeNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Open-list entry of the 3D energy-aware search.
#[derive(Debug, Clone)]
pub(crate) struct AirborneNode {
    pub(crate) vertex: VertexId,
    pub(crate) time: f64,
    pub(crate) energy: f64,
    pub(crate) g: f64,
    pub(crate) f: f64,
    pub(crate) seq: u64,
}

impl PartialEq for AirborneNode {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for AirborneNode {}

impl Ord for AirborneNode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.f
            .total_cmp(&other.f)
            .then_with(|| other.g.total_cmp(&self.g))
            // Between equally deep states, prefer the fuller battery.
            .then_with(|| other.energy.total_cmp(&self.energy))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for AirborneNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
