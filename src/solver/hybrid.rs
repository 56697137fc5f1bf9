use std::time::Instant;

use super::cbs::{run_constraint_tree, EngineOptions, SplitStrategy};
use super::{limits_for, prepare, SolveContext, Solver};
use crate::algorithm::EnergyMode;
use crate::assignment::AssignmentOrder;
use crate::common::{Budget, Plan, ProgressSink, SolveError};
use crate::field::PotentialField;
use crate::instance::Instance;
use crate::stat::Stats;

/// CBS whose low level is shaped by an externally supplied potential field.
/// The field biases heuristic and edge costs only; with no field (or a zero
/// lambda) this is plain CBS.
pub struct HybridCbs<'a> {
    instance: &'a Instance,
    field: Option<&'a PotentialField>,
    order: AssignmentOrder,
    sink: Option<&'a mut dyn ProgressSink>,
    stats: Stats,
}

impl<'a> HybridCbs<'a> {
    pub fn new(instance: &'a Instance, field: Option<&'a PotentialField>) -> Self {
        HybridCbs {
            instance,
            field,
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

impl Solver for HybridCbs<'_> {
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
            field: self.field,
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
