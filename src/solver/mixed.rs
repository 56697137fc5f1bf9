use std::time::Instant;

use tracing::debug;

use super::cbs::{run_constraint_tree, EngineOptions, SplitStrategy};
use super::{limits_for, prepare, SolveContext, Solver};
use crate::algorithm::EnergyMode;
use crate::assignment::AssignmentOrder;
use crate::common::{
    standard_split, Agent, AgentClass, Budget, Conflict, ConflictKind, Constraint, Plan,
    ProgressSink, SolveError, WAIT_QUANTUM,
};
use crate::instance::Instance;
use crate::stat::Stats;
use crate::workspace::{Layer, VertexId, Workspace};

/// Dimensional class of a conflict, determined by the kinematic classes of
/// the two agents (and the corridor flag for drone pairs).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConflictClass {
    Linear,
    Planar,
    Crossing,
    Aerial,
    Vertical,
    AirGround,
}

pub(crate) fn classify(ws: &Workspace, agents: &[Agent], conflict: &Conflict) -> ConflictClass {
    let a = agents[conflict.first].class;
    let b = agents[conflict.second].class;
    match (a, b) {
        (AgentClass::Rail, AgentClass::Rail) => ConflictClass::Linear,
        (AgentClass::Ground, AgentClass::Ground) => ConflictClass::Planar,
        (AgentClass::Rail, AgentClass::Ground) | (AgentClass::Ground, AgentClass::Rail) => {
            ConflictClass::Crossing
        }
        (AgentClass::Aerial, AgentClass::Aerial) => {
            let at_corridor = match conflict.kind {
                ConflictKind::Vertex { vertex } => ws.vertex(vertex).is_corridor,
                ConflictKind::Edge { from, to } => {
                    ws.vertex(from).is_corridor || ws.vertex(to).is_corridor
                }
            };
            if at_corridor {
                ConflictClass::Vertical
            } else {
                ConflictClass::Aerial
            }
        }
        _ => ConflictClass::AirGround,
    }
}

/// The vertex an agent is contesting: the conflict vertex itself, or the
/// endpoint it enters on a swap.
fn entry_vertex(conflict: &Conflict, agent: usize) -> VertexId {
    match conflict.kind {
        ConflictKind::Vertex { vertex } => vertex,
        ConflictKind::Edge { from, to } => {
            if agent == conflict.first {
                to
            } else {
                from
            }
        }
    }
}

/// Consecutive one-quantum vertex locks at `t + k` for each offset `k`.
fn lock_ticks(agent: usize, vertex: VertexId, t: f64, offsets: &[i32]) -> Vec<Constraint> {
    offsets
        .iter()
        .map(|&k| {
            let start = (t + f64::from(k) * WAIT_QUANTUM).max(0.0);
            Constraint::vertex(agent, vertex, start, start + WAIT_QUANTUM)
        })
        .collect()
}

/// Class-specific constraint shapes. Both children are always generated so
/// completeness is preserved; the class only decides interval, count and
/// target of the added constraints.
pub(crate) fn dimension_split(
    ws: &Workspace,
    agents: &[Agent],
    conflict: &Conflict,
) -> Vec<(usize, Vec<Constraint>)> {
    let class = classify(ws, agents, conflict);
    debug!(?class, "classified conflict");
    let t = conflict.start;

    match class {
        ConflictClass::Planar => standard_split(conflict),

        // Rail robots cannot step aside; lock the yielding one out of the
        // contested vertex for three consecutive ticks.
        ConflictClass::Linear => vec![
            (
                conflict.first,
                lock_ticks(conflict.first, entry_vertex(conflict, conflict.first), t, &[0, 1, 2]),
            ),
            (
                conflict.second,
                lock_ticks(conflict.second, entry_vertex(conflict, conflict.second), t, &[0, 1, 2]),
            ),
        ],

        // The ground agent yields first; the secondary branch delays the rail
        // agent over the contested window instead.
        ConflictClass::Crossing => {
            let (ground, rail) = if agents[conflict.first].class == AgentClass::Ground {
                (conflict.first, conflict.second)
            } else {
                (conflict.second, conflict.first)
            };
            vec![
                (
                    ground,
                    lock_ticks(ground, entry_vertex(conflict, ground), t, &[-1, 0, 1]),
                ),
                (
                    rail,
                    vec![Constraint::vertex(
                        rail,
                        entry_vertex(conflict, rail),
                        conflict.start,
                        conflict.end,
                    )],
                ),
            ]
        }

        // Standard split on the 3D vertex, plus a branch that holds the first
        // drone long enough for the other to clear via a layer change.
        ConflictClass::Aerial => {
            let mut children = standard_split(conflict);
            let hold = agents[conflict.first].layer_change_time(Layer::Ground, Layer::L1);
            children.push((
                conflict.first,
                vec![Constraint::vertex(
                    conflict.first,
                    entry_vertex(conflict, conflict.first),
                    conflict.start,
                    conflict.end + hold,
                )],
            ));
            children
        }

        // Corridors are used sequentially: each child keeps one drone out of
        // the corridor for a full layer-transition window.
        ConflictClass::Vertical => [conflict.first, conflict.second]
            .into_iter()
            .map(|agent| {
                let window = agents[agent].layer_change_time(Layer::Ground, Layer::L1);
                (
                    agent,
                    vec![Constraint::vertex(
                        agent,
                        entry_vertex(conflict, agent),
                        conflict.start,
                        conflict.start + window,
                    )],
                )
            })
            .collect(),

        // The drone yields first around the handoff vertex; the secondary
        // branch delays the surface agent instead.
        ConflictClass::AirGround => {
            let (drone, surface) = if agents[conflict.first].class == AgentClass::Aerial {
                (conflict.first, conflict.second)
            } else {
                (conflict.second, conflict.first)
            };
            vec![
                (
                    drone,
                    lock_ticks(drone, entry_vertex(conflict, drone), t, &[-1, 0, 1]),
                ),
                (
                    surface,
                    vec![Constraint::vertex(
                        surface,
                        entry_vertex(conflict, surface),
                        conflict.start,
                        conflict.end,
                    )],
                ),
            ]
        }
    }
}

/// CBS with dimension-aware conflict resolution.
pub struct MixedCbs<'a> {
    instance: &'a Instance,
    order: AssignmentOrder,
    sink: Option<&'a mut dyn ProgressSink>,
    stats: Stats,
}

impl<'a> MixedCbs<'a> {
    pub fn new(instance: &'a Instance) -> Self {
        MixedCbs {
            instance,
            order: AssignmentOrder::default(),
            sink: None,
            stats: Stats::default(),
        }
    }

    pub fn with_assignment_order(mut self, order: AssignmentOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_sink(mut self, sink: &'a mut dyn ProgressSink) -> Self {
        self.sink = Some(sink);
        self
    }
}

impl Solver for MixedCbs<'_> {
    fn solve(&mut self, budget: &Budget) -> Result<Plan, SolveError> {
        let started = Instant::now();
        let prepared = prepare(self.instance, self.order)?;
        let ctx = SolveContext {
            ws: &self.instance.workspace,
            agents: &self.instance.agents,
            tasks: &self.instance.tasks,
            assignment: &prepared.assignment,
            goal_lists: &prepared.goal_lists,
            limits: limits_for(budget, started),
            field: None,
            energy_mode: EnergyMode::Tracked,
        };
        run_constraint_tree(
            &ctx,
            budget,
            EngineOptions {
                strategy: SplitStrategy::DimensionAware,
                energy_repair: false,
            },
            started,
            &mut self.stats,
            &mut self.sink,
        )
    }

    fn stats(&self) -> &Stats {
        &self.stats
    }
}
