use std::collections::{BTreeSet, HashMap};

use tracing::{debug, instrument, trace};

use super::{
    move_blocked, time_key, wait_blocked, EnergyMode, SearchLimits, DEADLINE_CHECK_INTERVAL,
};
use crate::common::{
    Agent, AirborneNode, Battery, Constraint, EnergyAction, GoalSpec, Path, PlanFailure,
    TimedVertex, TIME_EPS, WAIT_QUANTUM,
};
use crate::field::PotentialField;
use crate::stat::Stats;
use crate::workspace::{Layer, VertexId, Workspace};

const ENERGY_EPS: f64 = 1e-6;

/// Fraction of capacity below which the heuristic starts pulling toward the
/// home pad. The pull term is non-negative and zero at the pad, so the search
/// stays bounded-suboptimal at worst.
const LOW_BATTERY_FRACTION: f64 = 0.3;

fn energy_key(energy: f64) -> i64 {
    (energy * 1e4).round() as i64
}

fn is_ground_pad(ws: &Workspace, v: VertexId) -> bool {
    let vertex = ws.vertex(v);
    vertex.is_pad && vertex.layer == Layer::Ground
}

/// Space-time A* over (vertex, time, layer, energy) for aerial agents.
/// Layer membership rides on the vertex id; energy is carried explicitly and
/// successors that drain the battery to zero are discarded when tracking.
#[instrument(skip_all, fields(agent = agent.id, start = agent.start, goals = goals.len()), level = "debug")]
#[allow(clippy::too_many_arguments)]
pub(crate) fn plan_aerial_path(
    ws: &Workspace,
    agent: &Agent,
    goals: &[GoalSpec],
    constraints: &[Constraint],
    limits: SearchLimits,
    field: Option<&PotentialField>,
    mode: EnergyMode,
    stats: &mut Stats,
) -> Result<Path, PlanFailure> {
    debug!("constraints: {constraints:?}");

    let tracked = mode == EnergyMode::Tracked && agent.battery.is_some();
    let mut energy = agent.battery.map_or(0.0, |battery| battery.charge);
    let mut path: Path = vec![TimedVertex {
        vertex: agent.start,
        time: 0.0,
    }];

    for (index, goal) in goals.iter().enumerate() {
        let from = *path.last().unwrap();
        let is_final = index + 1 == goals.len();
        let (segment, end_energy) = search_segment(
            ws, agent, from, energy, goal, is_final, constraints, limits, field, tracked, stats,
        )?;
        if segment.len() > 1 {
            path.extend(segment.into_iter().skip(1));
        } else {
            // Already standing on the goal; record the visit so every goal
            // owns one arrival entry.
            path.push(TimedVertex {
                vertex: goal.vertex,
                time: from.time,
            });
        }
        energy = end_energy;

        if goal.service > 0.0 {
            let arrival = path.last().unwrap().time;
            let finish = arrival + goal.service;
            if finish > limits.horizon + TIME_EPS
                || wait_blocked(constraints, goal.vertex, arrival, finish)
            {
                debug!(vertex = goal.vertex, "service window is constrained");
                return Err(PlanFailure::Exhausted);
            }
            if tracked && !is_ground_pad(ws, goal.vertex) {
                energy -= agent.energy_for_time(goal.service, EnergyAction::Hover);
                if energy <= 0.0 {
                    debug!(vertex = goal.vertex, "battery dies during service");
                    return Err(PlanFailure::Exhausted);
                }
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
    start_energy: f64,
    goal: &GoalSpec,
    is_final: bool,
    constraints: &[Constraint],
    limits: SearchLimits,
    field: Option<&PotentialField>,
    tracked: bool,
    stats: &mut Stats,
) -> Result<(Vec<TimedVertex>, f64), PlanFailure> {
    let latest = goal.deadline.unwrap_or(f64::INFINITY).min(limits.horizon);
    if start.time > latest + TIME_EPS {
        return Err(PlanFailure::Exhausted);
    }

    let mut open = BTreeSet::new();
    // Pareto frontier of (g, energy) per space-time state: a successor that
    // is both later and emptier than a known state is dropped.
    let mut frontier: HashMap<(VertexId, i64), Vec<(f64, f64)>> = HashMap::new();
    let mut came_from: HashMap<(VertexId, i64, i64), (VertexId, f64, f64)> = HashMap::new();
    let mut seq = 0u64;

    open.insert(AirborneNode {
        vertex: start.vertex,
        time: start.time,
        energy: start_energy,
        g: 0.0,
        f: heuristic(ws, agent, start.vertex, goal.vertex, start_energy, tracked, field),
        seq,
    });
    frontier
        .entry((start.vertex, time_key(start.time)))
        .or_default()
        .push((0.0, start_energy));

    let mut expanded = 0usize;
    while let Some(current) = open.pop_first() {
        expanded += 1;
        stats.low_level_expand_nodes += 1;
        if expanded % DEADLINE_CHECK_INTERVAL == 0 && limits.expired() {
            return Err(PlanFailure::DeadlineExceeded);
        }
        trace!("expand node: {current:?}");

        if current.vertex == goal.vertex {
            // The terminal vertex is held to the horizon; reject arrivals
            // whose parking tail would violate a constraint.
            let parks_clear = !is_final
                || !wait_blocked(constraints, goal.vertex, current.time, limits.horizon);
            if parks_clear {
                let segment = reconstruct(&came_from, &current);
                return Ok((segment, current.energy));
            }
        }

        let here = ws.vertex(current.vertex);
        let at_pad = is_ground_pad(ws, current.vertex);
        let from_state = (current.vertex, current.time, current.energy);

        // Hover (or sit on a pad) for one quantum.
        let wait_until = current.time + WAIT_QUANTUM;
        if wait_until <= latest + TIME_EPS
            && !wait_blocked(constraints, current.vertex, current.time, wait_until)
        {
            let next_energy = if tracked && !at_pad {
                current.energy - agent.energy_for_time(WAIT_QUANTUM, EnergyAction::Hover)
            } else {
                current.energy
            };
            if !tracked || next_energy > 0.0 {
                push(
                    &mut open,
                    &mut frontier,
                    &mut came_from,
                    &mut seq,
                    from_state,
                    current.vertex,
                    wait_until,
                    next_energy,
                    current.g + WAIT_QUANTUM,
                    heuristic(ws, agent, current.vertex, goal.vertex, next_energy, tracked, field),
                );
            }
        }

        // Recharge to capacity at a ground-layer pad.
        if tracked && at_pad {
            if let Some(battery) = agent.battery {
                let done = current.time + Battery::RECHARGE_SERVICE;
                if current.energy < battery.capacity - ENERGY_EPS
                    && done <= latest + TIME_EPS
                    && !wait_blocked(constraints, current.vertex, current.time, done)
                {
                    push(
                        &mut open,
                        &mut frontier,
                        &mut came_from,
                        &mut seq,
                        from_state,
                        current.vertex,
                        done,
                        battery.capacity,
                        current.g + Battery::RECHARGE_SERVICE,
                        heuristic(
                            ws,
                            agent,
                            current.vertex,
                            goal.vertex,
                            battery.capacity,
                            tracked,
                            field,
                        ),
                    );
                }
            }
        }

        // Horizontal moves within the current layer.
        for edge in ws.neighbors(current.vertex) {
            let to = ws.vertex(edge.to);
            if to.layer != here.layer {
                continue;
            }
            if !to.occupancy.admits(agent.class) || to.no_fly_zone {
                continue;
            }
            let dt = agent.travel_time(edge);
            let arrival = current.time + dt;
            if arrival > latest + TIME_EPS {
                continue;
            }
            if move_blocked(constraints, edge.from, edge.to, current.time, arrival) {
                continue;
            }
            let next_energy = if tracked {
                current.energy - agent.energy_for_time(dt, EnergyAction::Horizontal)
            } else {
                current.energy
            };
            if tracked && next_energy <= 0.0 {
                continue;
            }
            let step = dt + field.map_or(0.0, |f| f.bias(edge.to));
            push(
                &mut open,
                &mut frontier,
                &mut came_from,
                &mut seq,
                from_state,
                edge.to,
                arrival,
                next_energy,
                current.g + step,
                heuristic(ws, agent, edge.to, goal.vertex, next_energy, tracked, field),
            );
        }

        // Vertical transitions, corridor vertices only, one layer at a time.
        if here.is_corridor {
            for target_index in [here.layer.index().wrapping_sub(1), here.layer.index() + 1] {
                let Some(target_layer) = Layer::from_index(target_index) else {
                    continue;
                };
                let Some(above) = ws.vertex_at_layer(current.vertex, target_layer) else {
                    continue;
                };
                let to = ws.vertex(above);
                if !to.occupancy.admits(agent.class) || to.no_fly_zone {
                    continue;
                }
                let dt = agent.layer_change_time(here.layer, target_layer);
                let arrival = current.time + dt;
                if arrival > latest + TIME_EPS {
                    continue;
                }
                if move_blocked(constraints, current.vertex, above, current.time, arrival) {
                    continue;
                }
                let next_energy = if tracked {
                    current.energy - agent.energy_for_layer_change(here.layer, target_layer)
                } else {
                    current.energy
                };
                if tracked && next_energy <= 0.0 {
                    continue;
                }
                push(
                    &mut open,
                    &mut frontier,
                    &mut came_from,
                    &mut seq,
                    from_state,
                    above,
                    arrival,
                    next_energy,
                    current.g + dt,
                    heuristic(ws, agent, above, goal.vertex, next_energy, tracked, field),
                );
            }
        }
    }

    debug!(goal = goal.vertex, "segment search exhausted");
    Err(PlanFailure::Exhausted)
}

/// 3D Euclidean time bound, plus a home-pad pull once the battery runs low.
#[allow(clippy::too_many_arguments)]
fn heuristic(
    ws: &Workspace,
    agent: &Agent,
    from: VertexId,
    goal: VertexId,
    energy: f64,
    tracked: bool,
    field: Option<&PotentialField>,
) -> f64 {
    let mut h = ws.distance(from, goal) / agent.speed + field.map_or(0.0, |f| f.bias(from));
    if tracked {
        if let Some(battery) = agent.battery {
            if energy < LOW_BATTERY_FRACTION * battery.capacity {
                h += 0.5 * ws.distance(from, agent.home) / agent.speed;
            }
        }
    }
    h
}

#[allow(clippy::too_many_arguments)]
fn push(
    open: &mut BTreeSet<AirborneNode>,
    frontier: &mut HashMap<(VertexId, i64), Vec<(f64, f64)>>,
    came_from: &mut HashMap<(VertexId, i64, i64), (VertexId, f64, f64)>,
    seq: &mut u64,
    from: (VertexId, f64, f64),
    vertex: VertexId,
    time: f64,
    energy: f64,
    g: f64,
    h: f64,
) {
    let entries = frontier.entry((vertex, time_key(time))).or_default();
    if entries
        .iter()
        .any(|&(g0, e0)| g0 <= g + TIME_EPS && e0 >= energy - ENERGY_EPS)
    {
        return; // dominated
    }
    entries.retain(|&(g0, e0)| !(g <= g0 + TIME_EPS && energy >= e0 - ENERGY_EPS));
    entries.push((g, energy));

    *seq += 1;
    open.insert(AirborneNode {
        vertex,
        time,
        energy,
        g,
        f: g + h,
        seq: *seq,
    });
    came_from.insert((vertex, time_key(time), energy_key(energy)), from);
}

fn reconstruct(
    came_from: &HashMap<(VertexId, i64, i64), (VertexId, f64, f64)>,
    end: &AirborneNode,
) -> Vec<TimedVertex> {
    let mut segment = vec![TimedVertex {
        vertex: end.vertex,
        time: end.time,
    }];
    let mut cursor = (end.vertex, time_key(end.time), energy_key(end.energy));
    while let Some(&(vertex, time, energy)) = came_from.get(&cursor) {
        segment.push(TimedVertex { vertex, time });
        cursor = (vertex, time_key(time), energy_key(energy));
    }
    segment.reverse();
    segment
}
