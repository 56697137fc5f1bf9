pub(crate) mod highlevel;
pub(crate) mod lowlevel;

pub(crate) use highlevel::{
    first_conflict, standard_split, Conflict, ConflictKind, Constraint, ConstraintKind,
    HighLevelOpenNode,
};
pub(crate) use lowlevel::{AirborneNode, SpaceTimeNode};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

use crate::workspace::{Edge, Layer, VertexId};

/// Absolute tolerance for time comparisons.
pub const TIME_EPS: f64 = 1e-6;

/// Duration of one wait/hover action. Also the tick size of the rail and
/// crossing segment locks.
pub const WAIT_QUANTUM: f64 = 1.0;

/// Half-open `[start, end)` overlap: the windows must share more than
/// `TIME_EPS` of time. A handoff where one agent arrives exactly when the
/// other departs is not an overlap.
pub(crate) fn intervals_overlap(a_start: f64, a_end: f64, b_start: f64, b_end: f64) -> bool {
    a_start < b_end - TIME_EPS && b_start < a_end - TIME_EPS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentClass {
    Rail,
    Ground,
    Aerial,
}

impl AgentClass {
    pub(crate) fn bit(self) -> u8 {
        match self {
            AgentClass::Rail => 1 << 0,
            AgentClass::Ground => 1 << 1,
            AgentClass::Aerial => 1 << 2,
        }
    }
}

/// Which kinematic classes may occupy a vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClassMask(u8);

impl ClassMask {
    pub const NONE: ClassMask = ClassMask(0);
    pub const ALL: ClassMask = ClassMask(0b111);

    pub fn with(self, class: AgentClass) -> Self {
        ClassMask(self.0 | class.bit())
    }

    pub fn admits(self, class: AgentClass) -> bool {
        self.0 & class.bit() != 0
    }
}

impl FromIterator<AgentClass> for ClassMask {
    fn from_iter<I: IntoIterator<Item = AgentClass>>(iter: I) -> Self {
        iter.into_iter().fold(ClassMask::NONE, ClassMask::with)
    }
}

/// Which task kinds an agent can perform. Task kinds are small bit indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskTypeMask(u32);

impl TaskTypeMask {
    pub const NONE: TaskTypeMask = TaskTypeMask(0);

    pub fn with(self, kind: u8) -> Self {
        TaskTypeMask(self.0 | 1 << kind)
    }

    pub fn admits(self, kind: u8) -> bool {
        self.0 & 1 << kind != 0
    }
}

impl FromIterator<u8> for TaskTypeMask {
    fn from_iter<I: IntoIterator<Item = u8>>(iter: I) -> Self {
        iter.into_iter().fold(TaskTypeMask::NONE, TaskTypeMask::with)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnergyAction {
    Horizontal,
    Hover,
    Climb,
    Descend,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Battery {
    pub capacity: f64,
    pub charge: f64,
    pub horizontal_power: f64,
    pub hover_power: f64,
    pub climb_power: f64,
    pub descend_power: f64,
}

impl Battery {
    /// Fixed dwell time of the recharge action at a ground-layer pad.
    pub const RECHARGE_SERVICE: f64 = 10.0;

    pub fn power(&self, action: EnergyAction) -> f64 {
        match action {
            EnergyAction::Horizontal => self.horizontal_power,
            EnergyAction::Hover => self.hover_power,
            EnergyAction::Climb => self.climb_power,
            EnergyAction::Descend => self.descend_power,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Agent {
    pub id: usize,
    pub class: AgentClass,
    pub start: VertexId,
    /// Home base. For aerial agents this is the designated pad.
    pub home: VertexId,
    pub speed: f64,
    pub vertical_speed: f64,
    pub capabilities: TaskTypeMask,
    pub battery: Option<Battery>,
}

impl Agent {
    pub fn can_perform(&self, kind: u8) -> bool {
        self.capabilities.admits(kind)
    }

    pub fn travel_time(&self, edge: &Edge) -> f64 {
        match edge.fixed_time {
            Some(t) => t,
            None => edge.distance / self.speed,
        }
    }

    /// Energy drawn over `dt` seconds of `action`. Zero for classes without
    /// a battery.
    pub fn energy_for_time(&self, dt: f64, action: EnergyAction) -> f64 {
        match self.battery {
            Some(ref battery) => battery.power(action) * dt,
            None => 0.0,
        }
    }

    /// Energy to cover `distance` under `action`, converting through the
    /// matching speed.
    pub fn energy_for_distance(&self, distance: f64, action: EnergyAction) -> f64 {
        let speed = match action {
            EnergyAction::Horizontal | EnergyAction::Hover => self.speed,
            EnergyAction::Climb | EnergyAction::Descend => self.vertical_speed,
        };
        self.energy_for_time(distance / speed, action)
    }

    pub fn energy_for_layer_change(&self, from: Layer, to: Layer) -> f64 {
        let action = if to > from {
            EnergyAction::Climb
        } else {
            EnergyAction::Descend
        };
        self.energy_for_distance((to.altitude() - from.altitude()).abs(), action)
    }

    /// Duration of a single-step layer transition.
    pub fn layer_change_time(&self, from: Layer, to: Layer) -> f64 {
        (to.altitude() - from.altitude()).abs() / self.vertical_speed
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: usize,
    pub kind: u8,
    pub location: VertexId,
    pub duration: f64,
    pub duration_std: Option<f64>,
}

/// Resolves the service time an agent spends at a task vertex. The stochastic
/// duration layer plugs in here; planning defaults to nominal durations.
pub trait DurationOracle {
    fn service_duration(&self, task: &Task) -> f64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NominalDurations;

impl DurationOracle for NominalDurations {
    fn service_duration(&self, task: &Task) -> f64 {
        task.duration
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimedVertex {
    pub vertex: VertexId,
    pub time: f64,
}

/// Timed vertices, non-decreasing in time, starting at the agent's start
/// vertex at time zero. Equal consecutive vertices encode a wait or hover.
pub type Path = Vec<TimedVertex>;

pub(crate) fn path_end_time(path: &Path) -> f64 {
    path.last().map_or(0.0, |entry| entry.time)
}

pub(crate) fn makespan_of(paths: &[Path]) -> f64 {
    paths.iter().map(|path| path_end_time(path)).fold(0.0, f64::max)
}

/// One stop an agent must make: a task location with its service time, or a
/// charging pad injected by the energy repair loop (service zero, hard
/// arrival deadline).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GoalSpec {
    pub vertex: VertexId,
    pub service: f64,
    pub deadline: Option<f64>,
}

impl GoalSpec {
    pub fn task(vertex: VertexId, service: f64) -> Self {
        GoalSpec {
            vertex,
            service,
            deadline: None,
        }
    }

    pub fn charging(vertex: VertexId, deadline: f64) -> Self {
        GoalSpec {
            vertex,
            service: 0.0,
            deadline: Some(deadline),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TaskCompletion {
    pub agent: usize,
    pub completion: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    pub assignment: BTreeMap<usize, usize>,
    pub paths: BTreeMap<usize, Path>,
    pub schedule: BTreeMap<usize, TaskCompletion>,
    pub makespan: f64,
    pub feasible: bool,
}

#[derive(Debug, Clone)]
pub struct Budget {
    /// Latest admissible plan time. States past the horizon are pruned.
    pub horizon: f64,
    pub wall_clock: Duration,
    pub max_high_level_expansions: usize,
}

impl Default for Budget {
    fn default() -> Self {
        Budget {
            horizon: 1e4,
            wall_clock: Duration::from_secs(60),
            max_high_level_expansions: 100_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SolveError {
    #[error("no capable agent for task {task}")]
    NoCapableAgent { task: usize },
    #[error("no path for agent {agent}")]
    NoPathForAgent { agent: usize },
    #[error("constraint tree exhausted without a conflict-free plan")]
    NoConflictFreePlan,
    #[error("wall-clock budget exceeded")]
    DeadlineExceeded,
    #[error("no battery-feasible repair for agent {agent}")]
    EnergyInfeasible { agent: usize },
}

/// Why a single low-level call produced no path. `Exhausted` prunes the
/// current constraint-tree branch; `DeadlineExceeded` aborts the solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PlanFailure {
    Exhausted,
    DeadlineExceeded,
}

/// Optional push-only consumer of high-level progress. Nothing feeds back
/// into the search.
pub trait ProgressSink {
    fn on_expansion(&mut self, high_level_expanded: usize);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_mask_admits_only_listed_classes() {
        let mask = ClassMask::NONE.with(AgentClass::Ground).with(AgentClass::Rail);
        assert!(mask.admits(AgentClass::Ground));
        assert!(mask.admits(AgentClass::Rail));
        assert!(!mask.admits(AgentClass::Aerial));
        assert!(ClassMask::ALL.admits(AgentClass::Aerial));
    }

    #[test]
    fn interval_overlap_is_half_open() {
        assert!(intervals_overlap(0.0, 2.0, 1.0, 3.0));
        assert!(intervals_overlap(0.5, 0.6, 0.0, 2.0));
        // A handoff boundary is not an overlap.
        assert!(!intervals_overlap(0.0, 1.0, 1.0, 2.0));
        assert!(!intervals_overlap(0.0, 1.0, 1.0 + TIME_EPS / 2.0, 2.0));
        assert!(!intervals_overlap(0.0, 1.0, 1.1, 2.0));
    }

    #[test]
    fn travel_time_prefers_fixed_time_edges() {
        let agent = Agent {
            id: 0,
            class: AgentClass::Ground,
            start: 0,
            home: 0,
            speed: 0.5,
            vertical_speed: 1.0,
            capabilities: TaskTypeMask::NONE.with(0),
            battery: None,
        };
        let free = Edge {
            from: 0,
            to: 1,
            distance: 2.0,
            fixed_time: None,
        };
        let lift = Edge {
            from: 1,
            to: 2,
            distance: 2.0,
            fixed_time: Some(7.5),
        };
        assert_eq!(agent.travel_time(&free), 4.0);
        assert_eq!(agent.travel_time(&lift), 7.5);
    }

    #[test]
    fn energy_helpers_scale_with_power_draw() {
        let agent = Agent {
            id: 1,
            class: AgentClass::Aerial,
            start: 0,
            home: 0,
            speed: 2.0,
            vertical_speed: 1.0,
            capabilities: TaskTypeMask::NONE,
            battery: Some(Battery {
                capacity: 100.0,
                charge: 100.0,
                horizontal_power: 4.0,
                hover_power: 1.0,
                climb_power: 8.0,
                descend_power: 2.0,
            }),
        };
        assert_eq!(agent.energy_for_time(3.0, EnergyAction::Hover), 3.0);
        // 10 units at speed 2 is 5 seconds of horizontal draw.
        assert_eq!(agent.energy_for_distance(10.0, EnergyAction::Horizontal), 20.0);
        let up = agent.energy_for_layer_change(Layer::Ground, Layer::L1);
        let down = agent.energy_for_layer_change(Layer::L1, Layer::Ground);
        assert!(up > down);
        assert_eq!(agent.layer_change_time(Layer::Ground, Layer::L1), 10.0);
    }

    #[test]
    fn grounded_agent_draws_no_energy() {
        let agent = Agent {
            id: 2,
            class: AgentClass::Ground,
            start: 0,
            home: 0,
            speed: 1.0,
            vertical_speed: 1.0,
            capabilities: TaskTypeMask::NONE,
            battery: None,
        };
        assert_eq!(agent.energy_for_time(10.0, EnergyAction::Horizontal), 0.0);
    }
}
