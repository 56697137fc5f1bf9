use std::time::Instant;

use tracing::debug;

use super::cbs::{run_constraint_tree, EngineOptions, SplitStrategy};
use super::{limits_for, prepare, SolveContext, Solver};
use crate::algorithm::EnergyMode;
use crate::assignment::AssignmentOrder;
use crate::common::{
    AgentClass, Budget, GoalSpec, HighLevelOpenNode, Path, Plan, ProgressSink, SolveError,
};
use crate::energy::{simulate, EnergyViolation};
use crate::instance::Instance;
use crate::stat::Stats;

/// The charging deadline sits this much plan time ahead of the projected
/// battery death.
pub(super) const REPAIR_SAFETY_MARGIN: f64 = 2.0;

/// Earliest battery death across the fleet, agents in ascending id order.
pub(super) fn first_violation(ctx: &SolveContext, paths: &[Path]) -> Option<EnergyViolation> {
    for agent in ctx.agents {
        if agent.class != AgentClass::Aerial {
            continue;
        }
        if let Err(violation) = simulate(ctx.ws, agent, &paths[agent.id]) {
            return Some(violation);
        }
    }
    None
}

/// Resolve a battery death by forcing the agent through the nearest pad
/// before the projected death time. `None` prunes the branch: either there
/// is no pad at all, or no path reaches it in time.
pub(super) fn repair_child(
    ctx: &SolveContext,
    node: &HighLevelOpenNode,
    violation: EnergyViolation,
    node_id: u64,
    stats: &mut Stats,
) -> Result<Option<HighLevelOpenNode>, SolveError> {
    let Some(pad) = ctx.ws.nearest_pad(violation.vertex) else {
        debug!(agent = violation.agent, "no pad to repair through");
        return Ok(None);
    };
    let deadline = (violation.time - REPAIR_SAFETY_MARGIN).max(0.0);
    debug!(
        agent = violation.agent,
        pad, deadline, "injecting charging stop"
    );
    node.child_with_charging_stop(
        violation.agent,
        GoalSpec::charging(pad, deadline),
        node_id,
        ctx,
        stats,
    )
}

/// CBS with battery repair: energy violations are resolved by re-routing
/// through charging pads before any spatial conflict is split on. Aerial
/// paths are planned with energy tracking off; the simulator is the arbiter.
pub struct EnergyCbs<'a> {
    instance: &'a Instance,
    order: AssignmentOrder,
    sink: Option<&'a mut dyn ProgressSink>,
    stats: Stats,
}

impl<'a> EnergyCbs<'a> {
    pub fn new(instance: &'a Instance) -> Self {
        EnergyCbs {
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

impl Solver for EnergyCbs<'_> {
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
            energy_mode: EnergyMode::Ignored,
        };
        run_constraint_tree(
            &ctx,
            budget,
            EngineOptions {
                strategy: SplitStrategy::Standard,
                energy_repair: true,
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
