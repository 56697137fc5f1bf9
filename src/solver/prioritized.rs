use std::cmp::Reverse;
use std::time::Instant;

use tracing::debug;

use super::{finish_plan, limits_for, plan_agent, prepare, SolveContext, Solver};
use crate::algorithm::EnergyMode;
use crate::assignment::AssignmentOrder;
use crate::common::{
    AgentClass, Budget, Constraint, Path, Plan, PlanFailure, ProgressSink, SolveError,
};
use crate::instance::Instance;
use crate::stat::Stats;

/// Single-pass baseline: agents are planned in priority order and every
/// finished path is frozen as hard constraints for the agents that follow.
/// Fast, deterministic, and incomplete: any failed agent fails the plan.
pub struct Prioritized<'a> {
    instance: &'a Instance,
    order: AssignmentOrder,
    sink: Option<&'a mut dyn ProgressSink>,
    stats: Stats,
}

impl<'a> Prioritized<'a> {
    pub fn new(instance: &'a Instance) -> Self {
        Prioritized {
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

/// A finished path, frozen for every lower-priority agent: its occupancy
/// windows as vertex constraints, the reverse of each movement as an edge
/// constraint, and the final parking spot held to the horizon.
fn project_path(path: &Path, agent: usize, horizon: f64) -> Vec<Constraint> {
    let mut constraints = Vec::with_capacity(2 * path.len());
    for pair in path.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        constraints.push(Constraint::vertex(agent, a.vertex, a.time, b.time));
        if a.vertex != b.vertex {
            constraints.push(Constraint::edge(agent, b.vertex, a.vertex, a.time, b.time));
        }
    }
    let last = path.last().unwrap();
    constraints.push(Constraint::vertex(agent, last.vertex, last.time, horizon));
    constraints
}

impl Solver for Prioritized<'_> {
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

        // Rail agents go first, then the busier agents, then lower ids.
        let mut order: Vec<usize> = (0..ctx.agents.len()).collect();
        order.sort_by_key(|&idx| {
            (
                ctx.agents[idx].class != AgentClass::Rail,
                Reverse(ctx.goal_lists[idx].len()),
                idx,
            )
        });
        debug!("planning order: {order:?}");

        let num_agents = ctx.agents.len();
        let mut constraints: Vec<Vec<Constraint>> = vec![Vec::new(); num_agents];
        let mut paths: Vec<Path> = vec![Vec::new(); num_agents];

        for (rank, &idx) in order.iter().enumerate() {
            if ctx.limits.expired() {
                return Err(SolveError::DeadlineExceeded);
            }
            let path = match plan_agent(&ctx, idx, &constraints[idx], &[], &mut self.stats) {
                Ok(path) => path,
                Err(PlanFailure::Exhausted) => {
                    return Err(SolveError::NoPathForAgent { agent: idx })
                }
                Err(PlanFailure::DeadlineExceeded) => return Err(SolveError::DeadlineExceeded),
            };

            for &later in &order[rank + 1..] {
                constraints[later].extend(project_path(&path, later, ctx.limits.horizon));
            }
            paths[idx] = path;

            self.stats.high_level_expand_nodes += 1;
            if let Some(sink) = self.sink.as_mut() {
                sink.on_expansion(rank + 1);
            }
        }

        let charging = vec![Vec::new(); num_agents];
        finish_plan(&ctx, &paths, &charging, &mut self.stats, started)
    }

    fn stats(&self) -> &Stats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{ClassMask, TaskTypeMask, TimedVertex};
    use crate::testutil;
    use std::time::Duration;

    fn budget(deadline: f64) -> Budget {
        Budget {
            horizon: deadline,
            wall_clock: Duration::from_secs(20),
            max_high_level_expansions: 10_000,
        }
    }

    #[test]
    fn projection_freezes_occupancy_swaps_and_parking() {
        let path = vec![
            TimedVertex { vertex: 0, time: 0.0 },
            TimedVertex { vertex: 0, time: 1.0 },
            TimedVertex { vertex: 1, time: 3.0 },
        ];
        let constraints = project_path(&path, 7, 50.0);

        // Wait window, move window + reverse edge, terminal parking.
        assert_eq!(constraints.len(), 4);
        assert!(constraints.iter().all(|c| c.agent == 7));
        assert!(constraints[0].forbids_wait(0, 0.5, 1.5));
        assert!(constraints[1].forbids_wait(0, 1.5, 2.5));
        assert!(constraints[2].forbids_move(1, 0, 1.5, 2.5));
        assert!(constraints[3].forbids_move(2, 1, 40.0, 42.0));
    }

    #[test]
    fn later_agent_routes_around_the_frozen_path() {
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

        let mut solver = Prioritized::new(&instance);
        let plan = solver.solve(&budget(100.0)).unwrap();
        testutil::assert_plan_invariants(&instance, &plan);

        // Agent 0 drives straight through; agent 1 detours or waits it out.
        assert_eq!(plan.paths[&0].last().unwrap().time, 5.0);
        assert_eq!(plan.makespan, 9.0);
    }

    #[test]
    fn rail_agents_plan_before_everyone_else() {
        // The ground agent has the lower id, but the rail agent still gets
        // the contested cell first: planned in id order the rail could never
        // pass at all.
        let ws = testutil::grid(3, 2, 1.0, ClassMask::ALL);
        let mut ground = testutil::ground_agent(0, testutil::grid_id(1, 1, 3));
        ground.capabilities = TaskTypeMask::NONE.with(0);
        let mut rail = testutil::rail_agent(1, testutil::grid_id(0, 0, 3));
        rail.speed = 0.5;
        rail.capabilities = TaskTypeMask::NONE.with(1);
        let tasks = vec![
            testutil::task(0, 0, testutil::grid_id(1, 0, 3), 0.0),
            testutil::task(1, 1, testutil::grid_id(2, 0, 3), 0.0),
        ];
        let instance = Instance {
            workspace: ws,
            agents: vec![ground, rail],
            tasks,
            deadline: 100.0,
        };

        let mut solver = Prioritized::new(&instance);
        let plan = solver.solve(&budget(100.0)).unwrap();
        testutil::assert_plan_invariants(&instance, &plan);

        // Rail keeps its unconstrained schedule through the shared cell.
        assert_eq!(
            plan.paths[&1],
            vec![
                TimedVertex { vertex: testutil::grid_id(0, 0, 3), time: 0.0 },
                TimedVertex { vertex: testutil::grid_id(1, 0, 3), time: 2.0 },
                TimedVertex { vertex: testutil::grid_id(2, 0, 3), time: 4.0 },
            ]
        );
        // The ground agent holds off until the rail has cleared.
        assert_eq!(plan.paths[&0].last().unwrap().time, 4.0);
    }

    #[test]
    fn blocked_low_priority_agent_fails_the_plan() {
        // The high-priority rail agent parks exactly on the low-priority
        // agent's goal, so the single pass cannot succeed.
        let ws = testutil::line(3, ClassMask::ALL);
        let mut ground = testutil::ground_agent(0, 0);
        ground.capabilities = TaskTypeMask::NONE.with(0);
        let mut rail = testutil::rail_agent(1, 2);
        rail.capabilities = TaskTypeMask::NONE.with(1);
        let tasks = vec![
            testutil::task(0, 0, 2, 0.0),
            testutil::task(1, 1, 1, 0.0),
        ];
        let instance = Instance {
            workspace: ws,
            agents: vec![ground, rail],
            tasks,
            deadline: 30.0,
        };

        let mut solver = Prioritized::new(&instance);
        let result = solver.solve(&budget(30.0));
        assert_eq!(result, Err(SolveError::NoPathForAgent { agent: 0 }));
    }
}
