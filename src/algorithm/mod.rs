mod astar;
mod astar3d;

pub(crate) use astar::plan_ground_path;
pub(crate) use astar3d::plan_aerial_path;

use std::time::Instant;

use crate::common::Constraint;
use crate::workspace::VertexId;

/// How often the low-level search polls the wall clock.
pub(crate) const DEADLINE_CHECK_INTERVAL: usize = 4096;

/// Quantum for collapsing nearly-equal timestamps into one search state.
const TIME_KEY_QUANTUM: f64 = 1e-4;

pub(crate) fn time_key(t: f64) -> i64 {
    (t / TIME_KEY_QUANTUM).round() as i64
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SearchLimits {
    /// Latest admissible plan time.
    pub(crate) horizon: f64,
    /// Wall-clock cutoff for the whole solve.
    pub(crate) deadline: Option<Instant>,
}

impl SearchLimits {
    pub(crate) fn expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// Whether the 3D search carries battery state. The energy repair loop plans
/// with `Ignored` and certifies feasibility through the simulator instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EnergyMode {
    Tracked,
    Ignored,
}

pub(crate) fn move_blocked(
    constraints: &[Constraint],
    from: VertexId,
    to: VertexId,
    t1: f64,
    t2: f64,
) -> bool {
    constraints.iter().any(|c| c.forbids_move(from, to, t1, t2))
}

pub(crate) fn wait_blocked(constraints: &[Constraint], vertex: VertexId, t1: f64, t2: f64) -> bool {
    constraints.iter().any(|c| c.forbids_wait(vertex, t1, t2))
}
