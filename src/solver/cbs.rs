use std::collections::BTreeSet;
use std::time::Instant;

use tracing::debug;

use super::{
    energy, finish_plan, limits_for, mixed, prepare, SolveContext, Solver,
};
use crate::algorithm::EnergyMode;
use crate::assignment::AssignmentOrder;
use crate::common::{
    standard_split, Budget, HighLevelOpenNode, Plan, ProgressSink, SolveError,
};
use crate::instance::Instance;
use crate::stat::Stats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum SplitStrategy {
    Standard,
    DimensionAware,
}

#[derive(Debug, Clone, Copy)]
pub(super) struct EngineOptions {
    pub(super) strategy: SplitStrategy,
    pub(super) energy_repair: bool,
}

/// Best-first search over the constraint tree. Pops the cheapest node,
/// resolves energy violations first (when enabled), then branches on the
/// earliest spatial conflict. A popped node with neither is the solution.
pub(super) fn run_constraint_tree(
    ctx: &SolveContext,
    budget: &Budget,
    options: EngineOptions,
    started: Instant,
    stats: &mut Stats,
    sink: &mut Option<&mut dyn ProgressSink>,
) -> Result<Plan, SolveError> {
    let mut open = BTreeSet::new();
    open.insert(HighLevelOpenNode::root(ctx, stats)?);

    let mut next_node_id = 0u64;
    let mut expansions = 0usize;
    let mut failed_energy_agent = None;

    while let Some(current) = open.pop_first() {
        if ctx.limits.expired() {
            return Err(SolveError::DeadlineExceeded);
        }
        if expansions >= budget.max_high_level_expansions {
            return Err(SolveError::NoConflictFreePlan);
        }
        expansions += 1;
        stats.high_level_expand_nodes += 1;
        if let Some(sink) = sink.as_mut() {
            sink.on_expansion(expansions);
        }

        // Battery problems are repaired by re-routing before any constraint
        // is spent on spatial conflicts.
        if options.energy_repair {
            if let Some(violation) = energy::first_violation(ctx, &current.paths) {
                next_node_id += 1;
                match energy::repair_child(ctx, &current, violation, next_node_id, stats)? {
                    Some(child) => {
                        open.insert(child);
                    }
                    None => failed_energy_agent = Some(violation.agent),
                }
                continue;
            }
        }

        let Some(conflict) = current.conflicts.first().copied() else {
            debug!(node_id = current.node_id, cost = current.cost, "solution found");
            return finish_plan(ctx, &current.paths, &current.charging, stats, started);
        };
        debug!("conflict: {conflict:?}");

        let children = match options.strategy {
            SplitStrategy::Standard => standard_split(&conflict),
            SplitStrategy::DimensionAware => mixed::dimension_split(ctx.ws, ctx.agents, &conflict),
        };
        for (agent, additions) in children {
            next_node_id += 1;
            if let Some(child) =
                current.child_with_constraints(agent, additions, next_node_id, ctx, stats)?
            {
                debug_assert!(child.cost >= current.cost - crate::common::TIME_EPS);
                open.insert(child);
            }
        }
    }

    match failed_energy_agent {
        Some(agent) => Err(SolveError::EnergyInfeasible { agent }),
        None => Err(SolveError::NoConflictFreePlan),
    }
}

/// Vanilla conflict-based search: optimal makespan under the standard
/// vertex/edge split.
pub struct Cbs<'a> {
    instance: &'a Instance,
    order: AssignmentOrder,
    sink: Option<&'a mut dyn ProgressSink>,
    stats: Stats,
}

impl<'a> Cbs<'a> {
    pub fn new(instance: &'a Instance) -> Self {
        Cbs {
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

impl Solver for Cbs<'_> {
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
                strategy: SplitStrategy::Standard,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{ClassMask, TaskTypeMask, TimedVertex};
    use crate::solver::{solve, SolverVariant};
    use crate::testutil;
    use std::time::Duration;

    fn budget(instance: &Instance) -> Budget {
        Budget {
            horizon: instance.deadline,
            wall_clock: Duration::from_secs(20),
            max_high_level_expansions: 10_000,
        }
    }

    #[test]
    fn single_task_on_a_grid_matches_the_hand_plan() {
        let ws = testutil::grid(3, 3, 1.0, ClassMask::ALL);
        let agents = vec![
            testutil::ground_agent(0, testutil::grid_id(0, 0, 3)),
            testutil::ground_agent(1, testutil::grid_id(2, 2, 3)),
        ];
        let tasks = vec![testutil::task(0, 0, testutil::grid_id(1, 1, 3), 3.0)];
        let instance = Instance {
            workspace: ws,
            agents,
            tasks,
            deadline: 100.0,
        };

        let plan = solve(&instance, SolverVariant::Cbs, &budget(&instance), None).unwrap();
        testutil::assert_plan_invariants(&instance, &plan);

        // Tie on distance goes to agent 0; it drives two edges and serves.
        assert_eq!(plan.assignment.get(&0), Some(&0));
        assert_eq!(
            plan.paths[&0],
            vec![
                TimedVertex { vertex: testutil::grid_id(0, 0, 3), time: 0.0 },
                TimedVertex { vertex: testutil::grid_id(1, 0, 3), time: 2.0 },
                TimedVertex { vertex: testutil::grid_id(1, 1, 3), time: 4.0 },
                TimedVertex { vertex: testutil::grid_id(1, 1, 3), time: 7.0 },
            ]
        );
        assert_eq!(plan.makespan, 7.0);
        let completion = plan.schedule.get(&0).unwrap();
        assert_eq!(completion.agent, 0);
        assert_eq!(completion.completion, 7.0);
        assert!(plan.feasible);
    }

    #[test]
    fn head_on_meeting_branches_and_resolves() {
        // Two ground agents must trade ends of a 3x2 grid; the second row is
        // the only passing bay, so one of them detours or waits.
        let ws = testutil::grid(3, 2, 1.0, ClassMask::ALL);
        let mut a = testutil::ground_agent(0, testutil::grid_id(0, 0, 3));
        a.capabilities = TaskTypeMask::NONE.with(0);
        let mut b = testutil::ground_agent(1, testutil::grid_id(2, 0, 3));
        b.capabilities = TaskTypeMask::NONE.with(1);
        let tasks = vec![
            testutil::task(0, 0, testutil::grid_id(2, 0, 3), 1.0),
            testutil::task(1, 1, testutil::grid_id(0, 0, 3), 1.0),
        ];
        let instance = Instance {
            workspace: ws,
            agents: vec![a, b],
            tasks,
            deadline: 100.0,
        };

        let mut solver = Cbs::new(&instance);
        let plan = solver.solve(&budget(&instance)).unwrap();
        testutil::assert_plan_invariants(&instance, &plan);

        // Unconstrained both would finish at t=5; the conflict costs one of
        // them four extra seconds (detour or wait-out).
        assert_eq!(plan.makespan, 9.0);
        assert!(solver.stats().high_level_expand_nodes > 1);
    }

    #[test]
    fn two_tasks_at_one_vertex_are_both_scheduled() {
        let ws = testutil::line(3, ClassMask::ALL);
        let agent = testutil::ground_agent(0, 0);
        let tasks = vec![
            testutil::task(0, 0, 2, 2.0),
            testutil::task(1, 0, 2, 0.0),
        ];
        let instance = Instance {
            workspace: ws,
            agents: vec![agent],
            tasks,
            deadline: 100.0,
        };

        let plan = solve(&instance, SolverVariant::Cbs, &budget(&instance), None).unwrap();
        testutil::assert_plan_invariants(&instance, &plan);

        // Drive out (t=4), serve the two-second task, and the zero-duration
        // task at the same vertex completes on the spot.
        assert_eq!(plan.schedule.get(&0).unwrap().completion, 6.0);
        assert_eq!(plan.schedule.get(&1).unwrap().completion, 6.0);
        assert_eq!(plan.makespan, 6.0);
    }

    #[test]
    fn corridor_swap_without_a_bay_is_unsolvable() {
        let ws = testutil::line(3, ClassMask::ALL);
        let mut a = testutil::ground_agent(0, 0);
        a.capabilities = TaskTypeMask::NONE.with(0);
        let mut b = testutil::ground_agent(1, 2);
        b.capabilities = TaskTypeMask::NONE.with(1);
        let tasks = vec![
            testutil::task(0, 0, 2, 0.0),
            testutil::task(1, 1, 0, 0.0),
        ];
        let instance = Instance {
            workspace: ws,
            agents: vec![a, b],
            tasks,
            deadline: 30.0,
        };

        let tight = Budget {
            horizon: instance.deadline,
            wall_clock: Duration::from_secs(20),
            max_high_level_expansions: 60,
        };
        let result = solve(&instance, SolverVariant::Cbs, &tight, None);
        assert_eq!(result, Err(SolveError::NoConflictFreePlan));
    }

    #[test]
    fn unreachable_task_within_the_horizon_fails_cleanly() {
        let ws = testutil::line(3, ClassMask::ALL);
        let agent = testutil::ground_agent(0, 0);
        let tasks = vec![testutil::task(0, 0, 2, 0.0)];
        let instance = Instance {
            workspace: ws,
            agents: vec![agent],
            tasks,
            deadline: 3.0, // the drive alone takes 4 seconds
        };

        let result = solve(&instance, SolverVariant::Cbs, &budget(&instance), None);
        assert_eq!(result, Err(SolveError::NoPathForAgent { agent: 0 }));
    }

    #[test]
    fn resolving_is_deterministic() {
        let ws = testutil::grid(3, 2, 1.0, ClassMask::ALL);
        let mut a = testutil::ground_agent(0, testutil::grid_id(0, 0, 3));
        a.capabilities = TaskTypeMask::NONE.with(0);
        let mut b = testutil::ground_agent(1, testutil::grid_id(2, 0, 3));
        b.capabilities = TaskTypeMask::NONE.with(1);
        let tasks = vec![
            testutil::task(0, 0, testutil::grid_id(2, 0, 3), 1.0),
            testutil::task(1, 1, testutil::grid_id(0, 0, 3), 1.0),
        ];
        let instance = Instance {
            workspace: ws,
            agents: vec![a, b],
            tasks,
            deadline: 100.0,
        };

        let one = solve(&instance, SolverVariant::Cbs, &budget(&instance), None).unwrap();
        let two = solve(&instance, SolverVariant::Cbs, &budget(&instance), None).unwrap();
        assert_eq!(
            serde_json::to_string(&one).unwrap(),
            serde_json::to_string(&two).unwrap()
        );
    }

    #[test]
    fn progress_sink_sees_every_expansion() {
        struct Counter(usize);
        impl ProgressSink for Counter {
            fn on_expansion(&mut self, expanded: usize) {
                self.0 = expanded;
            }
        }

        let ws = testutil::grid(3, 3, 1.0, ClassMask::ALL);
        let agents = vec![testutil::ground_agent(0, 0)];
        let tasks = vec![testutil::task(0, 0, testutil::grid_id(2, 2, 3), 0.0)];
        let instance = Instance {
            workspace: ws,
            agents,
            tasks,
            deadline: 100.0,
        };

        let mut counter = Counter(0);
        let mut solver = Cbs::new(&instance).with_sink(&mut counter);
        solver.solve(&budget(&instance)).unwrap();
        drop(solver);
        assert_eq!(counter.0, 1);
    }
}
