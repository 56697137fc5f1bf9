use std::collections::{BTreeSet, HashMap};

use tracing::{debug, instrument, trace};

use super::{
    move_blocked, time_key, wait_blocked, SearchLimits, DEADLINE_CHECK_INTERVAL,
};
use crate::common::{
    Agent, Constraint, GoalSpec, Path, PlanFailure, SpaceTimeNode, TimedVertex, TIME_EPS,
    WAIT_QUANTUM,
};
use crate::field::PotentialField;
use crate::stat::Stats;
use crate::workspace::{VertexId, Workspace};

/// Space-time A* for rail and ground agents: chase each goal in order,
/// then sit out its service time. Any failed segment fails the whole plan.
#[instrument(skip_all, fields(agent = agent.id, start = agent.start, goals = goals.len()), level = "debug")]
pub(crate) fn plan_ground_path(
    ws: &Workspace,
    agent: &Agent,
    goals: &[GoalSpec],
    constraints: &[Constraint],
    limits: SearchLimits,
    field: Option<&PotentialField>,
    stats: &mut Stats,
) -> Result<Path, PlanFailure> {
    debug!("constraints: {constraints:?}");

    let mut path: Path = vec![TimedVertex {
        vertex: agent.start,
        time: 0.0,
    }];

    for (index, goal) in goals.iter().enumerate() {
        let from = *path.last().unwrap();
        let is_final = index + 1 == goals.len();
        let segment =
            search_segment(ws, agent, from, goal, is_final, constraints, limits, field, stats)?;
        if segment.len() > 1 {
            // The segment starts where the previous one ended; drop the joint.
            path.extend(segment.into_iter().skip(1));
        } else {
            // Already standing on the goal. Record the visit anyway: every
            // goal owns one arrival entry, so downstream consumers can match
            // repeated same-vertex goals one to one.
            path.push(TimedVertex {
                vertex: goal.vertex,
                time: from.time,
            });
        }

        if goal.service > 0.0 {
            let arrival = path.last().unwrap().time;
            let finish = arrival + goal.service;
            if finish > limits.horizon + TIME_EPS
                || wait_blocked(constraints, goal.vertex, arrival, finish)
            {
                debug!(vertex = goal.vertex, "service window is constrained");
                return Err(PlanFailure::Exhausted);
            }
            path.push(TimedVertex {
                vertex: goal.vertex,
                time: finish,
            });
        }
    }

    Ok(path)
}

#[allow(clippy::too_many_arguments)]
fn search_segment(
    ws: &Workspace,
    agent: &Agent,
    start: TimedVertex,
    goal: &GoalSpec,
    is_final: bool,
    constraints: &[Constraint],
    limits: SearchLimits,
    field: Option<&PotentialField>,
    stats: &mut Stats,
) -> Result<Vec<TimedVertex>, PlanFailure> {
    let latest = goal.deadline.unwrap_or(f64::INFINITY).min(limits.horizon);
    if start.time > latest + TIME_EPS {
        return Err(PlanFailure::Exhausted);
    }

    let mut open = BTreeSet::new();
    let mut best_g: HashMap<(VertexId, i64), f64> = HashMap::new();
    let mut came_from: HashMap<(VertexId, i64), TimedVertex> = HashMap::new();
    let mut seq = 0u64;

    open.insert(SpaceTimeNode {
        vertex: start.vertex,
        time: start.time,
        g: 0.0,
        f: heuristic(ws, agent, start.vertex, goal.vertex, field),
        seq,
    });
    best_g.insert((start.vertex, time_key(start.time)), 0.0);

    let mut expanded = 0usize;
    while let Some(current) = open.pop_first() {
        expanded += 1;
        stats.low_level_expand_nodes += 1;
        if expanded % DEADLINE_CHECK_INTERVAL == 0 && limits.expired() {
            return Err(PlanFailure::DeadlineExceeded);
        }
        trace!("expand node: {current:?}");

        let key = (current.vertex, time_key(current.time));
        if best_g.get(&key).is_some_and(|&g| g + TIME_EPS < current.g) {
            continue; // A cheaper route to this state was found meanwhile.
        }

        if current.vertex == goal.vertex {
            // After the last goal the agent parks here for good, so the
            // whole tail must be clear; otherwise keep searching for a
            // later arrival.
            let parks_clear = !is_final
                || !wait_blocked(constraints, goal.vertex, current.time, limits.horizon);
            if parks_clear {
                return Ok(reconstruct(&came_from, &current));
            }
        }

        let here = TimedVertex {
            vertex: current.vertex,
            time: current.time,
        };

        // Wait in place for one quantum.
        let wait_until = current.time + WAIT_QUANTUM;
        if wait_until <= latest + TIME_EPS
            && !wait_blocked(constraints, current.vertex, current.time, wait_until)
        {
            try_push(
                &mut open,
                &mut best_g,
                &mut came_from,
                &mut seq,
                here,
                current.vertex,
                wait_until,
                current.g + WAIT_QUANTUM,
                heuristic(ws, agent, current.vertex, goal.vertex, field),
            );
        }

        // Moves along outgoing edges.
        for edge in ws.neighbors(current.vertex) {
            if !ws.can_occupy(edge.to, agent.class) {
                continue;
            }
            let arrival = current.time + agent.travel_time(edge);
            if arrival > latest + TIME_EPS {
                continue;
            }
            if move_blocked(constraints, edge.from, edge.to, current.time, arrival) {
                continue;
            }
            let step = agent.travel_time(edge) + field.map_or(0.0, |f| f.bias(edge.to));
            try_push(
                &mut open,
                &mut best_g,
                &mut came_from,
                &mut seq,
                here,
                edge.to,
                arrival,
                current.g + step,
                heuristic(ws, agent, edge.to, goal.vertex, field),
            );
        }
    }

    debug!(goal = goal.vertex, "segment search exhausted");
    Err(PlanFailure::Exhausted)
}

/// Admissible time lower bound, optionally biased by the potential field.
fn heuristic(
    ws: &Workspace,
    agent: &Agent,
    from: VertexId,
    goal: VertexId,
    field: Option<&PotentialField>,
) -> f64 {
    ws.distance(from, goal) / agent.speed + field.map_or(0.0, |f| f.bias(from))
}

#[allow(clippy::too_many_arguments)]
fn try_push(
    open: &mut BTreeSet<SpaceTimeNode>,
    best_g: &mut HashMap<(VertexId, i64), f64>,
    came_from: &mut HashMap<(VertexId, i64), TimedVertex>,
    seq: &mut u64,
    from: TimedVertex,
    vertex: VertexId,
    time: f64,
    g: f64,
    h: f64,
) {
    let key = (vertex, time_key(time));
    if best_g.get(&key).is_some_and(|&known| known <= g + TIME_EPS) {
        return;
    }
    best_g.insert(key, g);
    *seq += 1;
    open.insert(SpaceTimeNode {
        vertex,
        time,
        g,
        f: g + h,
        seq: *seq,
    });
    came_from.insert(key, from);
}

fn reconstruct(
    came_from: &HashMap<(VertexId, i64), TimedVertex>,
    end: &SpaceTimeNode,
) -> Vec<TimedVertex> {
    let mut segment = vec![TimedVertex {
        vertex: end.vertex,
        time: end.time,
    }];
    let mut cursor = (end.vertex, time_key(end.time));
    while let Some(&prev) = came_from.get(&cursor) {
        segment.push(prev);
        cursor = (prev.vertex, time_key(prev.time));
    }
    segment.reverse();
    segment
}
