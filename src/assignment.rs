use std::collections::BTreeMap;

use tracing::debug;

use crate::common::{Agent, AgentClass, DurationOracle, GoalSpec, SolveError, Task, TIME_EPS};
use crate::workspace::Workspace;

const WORKLOAD_WEIGHT: f64 = 10.0;
const BATTERY_BONUS: f64 = 5.0;

/// Iteration order over tasks. `ByDurationDesc` fronts the long jobs for
/// deadline-pressed instances; `ById` is the deterministic default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssignmentOrder {
    #[default]
    ById,
    ByDurationDesc,
}

/// Greedy capability-aware assignment. Each task goes to the valid agent
/// with the lowest score (workload, then travel time, minus a small bonus
/// for a full battery); ties keep the lower agent id. A task no agent can
/// serve fails the whole solve.
pub(crate) fn assign(
    ws: &Workspace,
    agents: &[Agent],
    tasks: &[Task],
    order: AssignmentOrder,
) -> Result<BTreeMap<usize, usize>, SolveError> {
    let mut ordered: Vec<&Task> = tasks.iter().collect();
    match order {
        AssignmentOrder::ById => ordered.sort_by_key(|task| task.id),
        AssignmentOrder::ByDurationDesc => {
            ordered.sort_by(|a, b| b.duration.total_cmp(&a.duration).then(a.id.cmp(&b.id)))
        }
    }

    let mut workload = vec![0usize; agents.len()];
    let mut assignment = BTreeMap::new();

    for task in ordered {
        let mut best: Option<(f64, usize)> = None;
        for agent in agents {
            if !agent.can_perform(task.kind) {
                continue;
            }
            if !ws.can_occupy(task.location, agent.class) {
                continue;
            }
            if agent.class == AgentClass::Aerial && ws.vertex(task.location).no_fly_zone {
                continue;
            }

            let mut score = workload[agent.id] as f64 * WORKLOAD_WEIGHT
                + ws.distance(agent.start, task.location) / agent.speed;
            if let Some(battery) = agent.battery {
                score -= BATTERY_BONUS * battery.charge / battery.capacity;
            }

            if best.is_none_or(|(incumbent, _)| score < incumbent - TIME_EPS) {
                best = Some((score, agent.id));
            }
        }

        let Some((_, winner)) = best else {
            return Err(SolveError::NoCapableAgent { task: task.id });
        };
        assignment.insert(task.id, winner);
        workload[winner] += 1;
    }

    debug!("assignment: {assignment:?}");
    Ok(assignment)
}

/// Per-agent goal lists: assigned tasks sorted by task id, each with its
/// service duration from the oracle.
pub(crate) fn goal_lists(
    num_agents: usize,
    tasks: &[Task],
    assignment: &BTreeMap<usize, usize>,
    oracle: &dyn DurationOracle,
) -> Vec<Vec<GoalSpec>> {
    let mut ordered: Vec<&Task> = tasks.iter().collect();
    ordered.sort_by_key(|task| task.id);

    let mut lists = vec![Vec::new(); num_agents];
    for task in ordered {
        if let Some(&agent) = assignment.get(&task.id) {
            lists[agent].push(GoalSpec::task(task.location, oracle.service_duration(task)));
        }
    }
    lists
}
