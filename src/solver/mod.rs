mod cbs;
mod energy;
mod hybrid;
mod mixed;
mod prioritized;

pub use cbs::Cbs;
pub use energy::EnergyCbs;
pub use hybrid::HybridCbs;
pub use mixed::MixedCbs;
pub use prioritized::Prioritized;

use std::collections::BTreeMap;
use std::time::Instant;

use crate::algorithm::{plan_aerial_path, plan_ground_path, EnergyMode, SearchLimits};
use crate::assignment::{self, AssignmentOrder};
use crate::common::{
    first_conflict, makespan_of, Agent, AgentClass, Budget, Constraint, GoalSpec,
    NominalDurations, Path, Plan, PlanFailure, SolveError, Task, TaskCompletion,
};
use crate::energy::simulate as simulate_energy;
use crate::field::PotentialField;
use crate::instance::Instance;
use crate::stat::Stats;
use crate::workspace::Workspace;

/// The solver family. Every variant answers the same contract:
/// `solve(instance, budget) -> plan or failure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverVariant {
    Prioritized,
    Cbs,
    MixedCbs,
    EnergyCbs,
    HybridCbs,
}

impl SolverVariant {
    pub const NAMES: [&'static str; 5] =
        ["prioritized", "cbs", "mixed-cbs", "energy-cbs", "hybrid-cbs"];

    pub fn from_name(name: &str) -> Option<SolverVariant> {
        match name {
            "prioritized" => Some(SolverVariant::Prioritized),
            "cbs" => Some(SolverVariant::Cbs),
            "mixed-cbs" => Some(SolverVariant::MixedCbs),
            "energy-cbs" => Some(SolverVariant::EnergyCbs),
            "hybrid-cbs" => Some(SolverVariant::HybridCbs),
            _ => None,
        }
    }
}

pub trait Solver {
    fn solve(&mut self, budget: &Budget) -> Result<Plan, SolveError>;
    fn stats(&self) -> &Stats;
}

/// Uniform entry point over the solver family. The field is consulted by the
/// hybrid variant only.
pub fn solve(
    instance: &Instance,
    variant: SolverVariant,
    budget: &Budget,
    field: Option<&PotentialField>,
) -> Result<Plan, SolveError> {
    match variant {
        SolverVariant::Prioritized => Prioritized::new(instance).solve(budget),
        SolverVariant::Cbs => Cbs::new(instance).solve(budget),
        SolverVariant::MixedCbs => MixedCbs::new(instance).solve(budget),
        SolverVariant::EnergyCbs => EnergyCbs::new(instance).solve(budget),
        SolverVariant::HybridCbs => HybridCbs::new(instance, field).solve(budget),
    }
}

/// Everything a solve shares immutably across the constraint tree.
pub(crate) struct SolveContext<'a> {
    pub(crate) ws: &'a Workspace,
    pub(crate) agents: &'a [Agent],
    pub(crate) tasks: &'a [Task],
    pub(crate) assignment: &'a BTreeMap<usize, usize>,
    pub(crate) goal_lists: &'a [Vec<GoalSpec>],
    pub(crate) limits: SearchLimits,
    pub(crate) field: Option<&'a PotentialField>,
    pub(crate) energy_mode: EnergyMode,
}

pub(crate) struct Prepared {
    pub(crate) assignment: BTreeMap<usize, usize>,
    pub(crate) goal_lists: Vec<Vec<GoalSpec>>,
}

pub(crate) fn prepare(instance: &Instance, order: AssignmentOrder) -> Result<Prepared, SolveError> {
    let assignment = assignment::assign(
        &instance.workspace,
        &instance.agents,
        &instance.tasks,
        order,
    )?;
    let goal_lists = assignment::goal_lists(
        instance.agents.len(),
        &instance.tasks,
        &assignment,
        &NominalDurations,
    );
    Ok(Prepared {
        assignment,
        goal_lists,
    })
}

pub(crate) fn limits_for(budget: &Budget, started: Instant) -> SearchLimits {
    SearchLimits {
        horizon: budget.horizon,
        deadline: Some(started + budget.wall_clock),
    }
}

/// Dispatch one agent's replan to the class-matching low-level search.
/// `charging` stops precede the regular goal list.
pub(crate) fn plan_agent(
    ctx: &SolveContext,
    agent_idx: usize,
    constraints: &[Constraint],
    charging: &[GoalSpec],
    stats: &mut Stats,
) -> Result<Path, PlanFailure> {
    let agent = &ctx.agents[agent_idx];
    let goals: Vec<GoalSpec> = charging
        .iter()
        .chain(ctx.goal_lists[agent_idx].iter())
        .copied()
        .collect();

    match agent.class {
        AgentClass::Aerial => plan_aerial_path(
            ctx.ws,
            agent,
            &goals,
            constraints,
            ctx.limits,
            ctx.field,
            ctx.energy_mode,
            stats,
        ),
        AgentClass::Rail | AgentClass::Ground => plan_ground_path(
            ctx.ws,
            agent,
            &goals,
            constraints,
            ctx.limits,
            ctx.field,
            stats,
        ),
    }
}

/// Assemble the output bundle and re-verify the solution. A plan that fails
/// verification here is a planner bug; debug builds assert, release builds
/// degrade to `NoConflictFreePlan`.
pub(crate) fn finish_plan(
    ctx: &SolveContext,
    paths: &[Path],
    charging: &[Vec<GoalSpec>],
    stats: &mut Stats,
    started: Instant,
) -> Result<Plan, SolveError> {
    let spatially_clean = first_conflict(paths).is_none();
    let energy_ok = ctx.agents.iter().all(|agent| {
        agent.class != AgentClass::Aerial
            || simulate_energy(ctx.ws, agent, &paths[agent.id]).is_ok()
    });
    debug_assert!(
        spatially_clean && energy_ok,
        "solver accepted a conflicting or energy-infeasible solution"
    );
    if !(spatially_clean && energy_ok) {
        return Err(SolveError::NoConflictFreePlan);
    }

    let schedule = schedule(ctx, paths, charging)?;
    let makespan = makespan_of(paths);
    stats.makespan = makespan;
    stats.time_micros = started.elapsed().as_micros() as usize;

    Ok(Plan {
        assignment: ctx.assignment.clone(),
        paths: paths
            .iter()
            .enumerate()
            .map(|(agent, path)| (agent, path.clone()))
            .collect(),
        schedule,
        makespan,
        feasible: true,
    })
}

/// Task completion times, recovered by walking each agent's path along its
/// goal order (charging stops first, then tasks by id). Every goal owns one
/// arrival entry in the path, so a task that cannot be located is a planner
/// bug: debug builds assert, release builds degrade like `finish_plan`.
fn schedule(
    ctx: &SolveContext,
    paths: &[Path],
    charging: &[Vec<GoalSpec>],
) -> Result<BTreeMap<usize, TaskCompletion>, SolveError> {
    let mut tasks_by_agent: Vec<Vec<&Task>> = vec![Vec::new(); ctx.agents.len()];
    let mut ordered: Vec<&Task> = ctx.tasks.iter().collect();
    ordered.sort_by_key(|task| task.id);
    for task in ordered {
        if let Some(&agent) = ctx.assignment.get(&task.id) {
            tasks_by_agent[agent].push(task);
        }
    }

    let mut out = BTreeMap::new();
    for (agent, path) in paths.iter().enumerate() {
        let mut cursor = 0usize;
        for stop in &charging[agent] {
            while cursor < path.len() && path[cursor].vertex != stop.vertex {
                cursor += 1;
            }
            if cursor < path.len() {
                cursor += 1;
            }
        }
        for task in &tasks_by_agent[agent] {
            while cursor < path.len() && path[cursor].vertex != task.location {
                cursor += 1;
            }
            if cursor >= path.len() {
                debug_assert!(false, "assigned task {} is missing from the path", task.id);
                return Err(SolveError::NoConflictFreePlan);
            }
            out.insert(
                task.id,
                TaskCompletion {
                    agent,
                    completion: path[cursor].time + task.duration,
                },
            );
            cursor += 1;
            // Skip the service-wait entry so a later task at the same vertex
            // is matched afresh.
            if task.duration > 0.0 && cursor < path.len() && path[cursor].vertex == task.location
            {
                cursor += 1;
            }
        }
    }
    Ok(out)
}
