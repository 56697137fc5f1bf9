use std::cmp::Ordering;

use tracing::debug;

use crate::common::{
    intervals_overlap, makespan_of, GoalSpec, Path, PlanFailure, SolveError, TIME_EPS,
};
use crate::solver::{plan_agent, SolveContext};
use crate::stat::Stats;
use crate::workspace::VertexId;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum ConstraintKind {
    Vertex { vertex: VertexId },
    Edge { from: VertexId, to: VertexId },
}

/// Time-scoped prohibition on one agent. Intervals are half-open
/// `[start, end)`, matching the occupancy model: arriving exactly at `end`
/// is a clean handoff and stays legal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Constraint {
    pub(crate) agent: usize,
    pub(crate) kind: ConstraintKind,
    pub(crate) start: f64,
    pub(crate) end: f64,
}

impl Constraint {
    pub(crate) fn vertex(agent: usize, vertex: VertexId, start: f64, end: f64) -> Self {
        Constraint {
            agent,
            kind: ConstraintKind::Vertex { vertex },
            start,
            end,
        }
    }

    pub(crate) fn edge(agent: usize, from: VertexId, to: VertexId, start: f64, end: f64) -> Self {
        Constraint {
            agent,
            kind: ConstraintKind::Edge { from, to },
            start,
            end,
        }
    }

    /// Does this constraint forbid moving from `u` to `v` over `[t1, t2]`?
    /// A vertex constraint blocks arriving at `v` inside the window, and also
    /// occupying `u` during it: under the piecewise-constant position model
    /// the mover stays at `u` until the arrival instant. An edge constraint
    /// blocks any overlapping traversal of its directed edge.
    pub(crate) fn forbids_move(&self, u: VertexId, v: VertexId, t1: f64, t2: f64) -> bool {
        match self.kind {
            ConstraintKind::Vertex { vertex } => {
                (vertex == v && t2 >= self.start - TIME_EPS && t2 < self.end - TIME_EPS)
                    || (vertex == u && intervals_overlap(self.start, self.end, t1, t2))
            }
            ConstraintKind::Edge { from, to } => {
                from == u && to == v && intervals_overlap(self.start, self.end, t1, t2)
            }
        }
    }

    /// Does this constraint forbid staying at `v` over `[t1, t2]`?
    pub(crate) fn forbids_wait(&self, v: VertexId, t1: f64, t2: f64) -> bool {
        match self.kind {
            ConstraintKind::Vertex { vertex } => {
                vertex == v && intervals_overlap(self.start, self.end, t1, t2)
            }
            ConstraintKind::Edge { .. } => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum ConflictKind {
    Vertex { vertex: VertexId },
    /// Swap: `first` traverses `from -> to` while `second` traverses
    /// `to -> from` over an overlapping window.
    Edge { from: VertexId, to: VertexId },
}

/// Canonical: `first < second` by agent id; the interval is the analytic
/// overlap of the two agents' occupancy or movement windows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Conflict {
    pub(crate) first: usize,
    pub(crate) second: usize,
    pub(crate) kind: ConflictKind,
    pub(crate) start: f64,
    pub(crate) end: f64,
}

/// Position under the piecewise-constant occupancy model: the vertex of the
/// most recent entry at or before `t`, the start vertex before the path
/// begins, the final vertex forever after it ends.
pub(crate) fn position_at(path: &Path, t: f64) -> VertexId {
    let idx = path.partition_point(|entry| entry.time <= t + TIME_EPS);
    if idx == 0 {
        path[0].vertex
    } else {
        path[idx - 1].vertex
    }
}

/// Maximal interval over which the agent stays at `position_at(path, t)`.
/// The departure of a parked final vertex is unbounded.
fn occupancy_window(path: &Path, t: f64) -> (f64, f64) {
    let idx = path.partition_point(|entry| entry.time <= t + TIME_EPS);
    let here = idx.saturating_sub(1);
    let vertex = path[here].vertex;

    let mut first = here;
    while first > 0 && path[first - 1].vertex == vertex {
        first -= 1;
    }
    let arrival = if first == 0 { path[0].time } else { path[first].time };

    let mut after = here + 1;
    while after < path.len() && path[after].vertex == vertex {
        after += 1;
    }
    let departure = if after < path.len() {
        path[after].time
    } else {
        f64::INFINITY
    };

    (arrival, departure)
}

/// The movement that brought the agent to `position_at(path, t2)`, provided
/// the previous sample saw the agent elsewhere. Walks back over the current
/// stay (which may contain zero-length visit entries) to the true arrival.
/// Returns (from, departure, arrival).
fn movement_window(path: &Path, t2: f64) -> Option<(VertexId, f64, f64)> {
    let idx = path.partition_point(|entry| entry.time <= t2 + TIME_EPS);
    let here = idx.checked_sub(1)?;
    let vertex = path[here].vertex;

    let mut first = here;
    while first > 0 && path[first - 1].vertex == vertex {
        first -= 1;
    }
    if first == 0 {
        return None; // never moved in
    }
    let departure = &path[first - 1];
    Some((departure.vertex, departure.time, path[first].time))
}

/// Sorted union of every path timestamp plus each movement midpoint, so a
/// vertex occupied mid-edge by one agent is still sampled against the others.
fn sample_times(paths: &[Path]) -> Vec<f64> {
    let mut times = Vec::new();
    for path in paths {
        for entry in path {
            times.push(entry.time);
        }
        for pair in path.windows(2) {
            if pair[0].vertex != pair[1].vertex {
                times.push((pair[0].time + pair[1].time) / 2.0);
            }
        }
    }
    times.sort_by(f64::total_cmp);
    times.dedup_by(|a, b| (*a - *b).abs() <= TIME_EPS);
    times
}

fn push_unique(conflicts: &mut Vec<Conflict>, conflict: Conflict) -> bool {
    let duplicate = conflicts.iter().any(|seen| {
        seen.first == conflict.first
            && seen.second == conflict.second
            && seen.kind == conflict.kind
            && intervals_overlap(seen.start, seen.end, conflict.start, conflict.end)
    });
    if !duplicate {
        conflicts.push(conflict);
    }
    !duplicate
}

fn detect(paths: &[Path], first_only: bool) -> Vec<Conflict> {
    let times = sample_times(paths);
    let mut conflicts = Vec::new();

    for (k, &t) in times.iter().enumerate() {
        // Vertex conflicts at this sample, agent pairs in ascending id order.
        for i in 0..paths.len() {
            for j in (i + 1)..paths.len() {
                let pos_i = position_at(&paths[i], t);
                if pos_i != position_at(&paths[j], t) {
                    continue;
                }
                let (arr_i, dep_i) = occupancy_window(&paths[i], t);
                let (arr_j, dep_j) = occupancy_window(&paths[j], t);
                let (start, end) = (arr_i.max(arr_j), dep_i.min(dep_j));
                if end - start <= TIME_EPS {
                    continue; // handoff boundary, not a co-occupancy
                }
                let pushed = push_unique(
                    &mut conflicts,
                    Conflict {
                        first: i,
                        second: j,
                        kind: ConflictKind::Vertex { vertex: pos_i },
                        start,
                        end,
                    },
                );
                if pushed && first_only {
                    return conflicts;
                }
            }
        }

        // Swaps between this sample and the next.
        let Some(&t2) = times.get(k + 1) else {
            continue;
        };
        for i in 0..paths.len() {
            for j in (i + 1)..paths.len() {
                let (a1, a2) = (position_at(&paths[i], t), position_at(&paths[i], t2));
                let (b1, b2) = (position_at(&paths[j], t), position_at(&paths[j], t2));
                if a1 == a2 || b1 == b2 || a1 != b2 || a2 != b1 {
                    continue;
                }
                let (Some((_, dep_a, arr_a)), Some((_, dep_b, arr_b))) =
                    (movement_window(&paths[i], t2), movement_window(&paths[j], t2))
                else {
                    continue;
                };
                let start = dep_a.max(dep_b);
                let end = arr_a.min(arr_b);
                if end - start <= TIME_EPS {
                    continue; // the traversals only brush each other
                }
                let pushed = push_unique(
                    &mut conflicts,
                    Conflict {
                        first: i,
                        second: j,
                        kind: ConflictKind::Edge { from: a1, to: a2 },
                        start,
                        end,
                    },
                );
                if pushed && first_only {
                    return conflicts;
                }
            }
        }
    }

    conflicts
}

/// Earliest conflict between any agent pair, or `None` for a clean plan.
pub(crate) fn first_conflict(paths: &[Path]) -> Option<Conflict> {
    detect(paths, true).into_iter().next()
}

/// Every conflict, earliest first; used for focal-style tie-breaking on the
/// high level.
pub(crate) fn all_conflicts(paths: &[Path]) -> Vec<Conflict> {
    detect(paths, false)
}

/// The ordinary CBS split: each child forbids one side of the conflict.
pub(crate) fn standard_split(conflict: &Conflict) -> Vec<(usize, Vec<Constraint>)> {
    match conflict.kind {
        ConflictKind::Vertex { vertex } => vec![
            (
                conflict.first,
                vec![Constraint::vertex(conflict.first, vertex, conflict.start, conflict.end)],
            ),
            (
                conflict.second,
                vec![Constraint::vertex(conflict.second, vertex, conflict.start, conflict.end)],
            ),
        ],
        ConflictKind::Edge { from, to } => vec![
            (
                conflict.first,
                vec![Constraint::edge(conflict.first, from, to, conflict.start, conflict.end)],
            ),
            (
                conflict.second,
                vec![Constraint::edge(conflict.second, to, from, conflict.start, conflict.end)],
            ),
        ],
    }
}

/// One node of the constraint tree: a constraint set per agent, the best
/// paths under it, and the makespan cost. Children own their copies; the
/// parent is never mutated.
#[derive(Debug, Clone)]
pub(crate) struct HighLevelOpenNode {
    pub(crate) node_id: u64,
    pub(crate) constraints: Vec<Vec<Constraint>>,
    /// Charging stops injected by the energy repair loop, oldest first; all
    /// of them precede the task goals in the agent's goal chain.
    pub(crate) charging: Vec<Vec<GoalSpec>>,
    pub(crate) paths: Vec<Path>,
    pub(crate) conflicts: Vec<Conflict>,
    pub(crate) cost: f64,
}

impl PartialEq for HighLevelOpenNode {
    fn eq(&self, other: &Self) -> bool {
        self.node_id == other.node_id
    }
}

impl Eq for HighLevelOpenNode {}

impl Ord for HighLevelOpenNode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cost
            .total_cmp(&other.cost)
            .then_with(|| self.conflicts.len().cmp(&other.conflicts.len()))
            .then_with(|| self.node_id.cmp(&other.node_id))
    }
}

impl PartialOrd for HighLevelOpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl HighLevelOpenNode {
    /// Plan every agent under empty constraints.
    pub(crate) fn root(ctx: &SolveContext, stats: &mut Stats) -> Result<Self, SolveError> {
        let num_agents = ctx.agents.len();
        let mut paths = Vec::with_capacity(num_agents);
        for agent in 0..num_agents {
            match plan_agent(ctx, agent, &[], &[], stats) {
                Ok(path) => paths.push(path),
                Err(PlanFailure::Exhausted) => return Err(SolveError::NoPathForAgent { agent }),
                Err(PlanFailure::DeadlineExceeded) => return Err(SolveError::DeadlineExceeded),
            }
        }

        let cost = makespan_of(&paths);
        let conflicts = all_conflicts(&paths);
        debug!(cost, conflicts = conflicts.len(), "root node planned");
        Ok(HighLevelOpenNode {
            node_id: 0,
            constraints: vec![Vec::new(); num_agents],
            charging: vec![Vec::new(); num_agents],
            paths,
            conflicts,
            cost,
        })
    }

    /// Child with `additions` appended to one agent's constraint set and only
    /// that agent replanned. `None` means the branch is pruned.
    pub(crate) fn child_with_constraints(
        &self,
        agent: usize,
        additions: Vec<Constraint>,
        node_id: u64,
        ctx: &SolveContext,
        stats: &mut Stats,
    ) -> Result<Option<Self>, SolveError> {
        let mut constraints = self.constraints.clone();
        constraints[agent].extend(additions);

        let path = match plan_agent(ctx, agent, &constraints[agent], &self.charging[agent], stats)
        {
            Ok(path) => path,
            Err(PlanFailure::Exhausted) => return Ok(None),
            Err(PlanFailure::DeadlineExceeded) => return Err(SolveError::DeadlineExceeded),
        };

        let mut paths = self.paths.clone();
        paths[agent] = path;
        let cost = makespan_of(&paths);
        let conflicts = all_conflicts(&paths);
        debug!(
            node_id,
            agent,
            cost,
            conflicts = conflicts.len(),
            "expanded constraint child"
        );
        Ok(Some(HighLevelOpenNode {
            node_id,
            constraints,
            charging: self.charging.clone(),
            paths,
            conflicts,
            cost,
        }))
    }

    /// Child that prepends a mandatory charging stop to one agent's goals.
    /// The replanned path must actually touch the pad by the stop's deadline,
    /// otherwise the branch is pruned.
    pub(crate) fn child_with_charging_stop(
        &self,
        agent: usize,
        stop: GoalSpec,
        node_id: u64,
        ctx: &SolveContext,
        stats: &mut Stats,
    ) -> Result<Option<Self>, SolveError> {
        let mut charging = self.charging.clone();
        charging[agent].push(stop);

        let path = match plan_agent(ctx, agent, &self.constraints[agent], &charging[agent], stats)
        {
            Ok(path) => path,
            Err(PlanFailure::Exhausted) => return Ok(None),
            Err(PlanFailure::DeadlineExceeded) => return Err(SolveError::DeadlineExceeded),
        };

        let deadline = stop.deadline.unwrap_or(f64::INFINITY);
        let touches_pad = path
            .iter()
            .any(|entry| entry.vertex == stop.vertex && entry.time <= deadline + TIME_EPS);
        if !touches_pad {
            return Ok(None);
        }

        let mut paths = self.paths.clone();
        paths[agent] = path;
        let cost = makespan_of(&paths);
        let conflicts = all_conflicts(&paths);
        debug!(node_id, agent, pad = stop.vertex, "expanded charging child");
        Ok(Some(HighLevelOpenNode {
            node_id,
            constraints: self.constraints.clone(),
            charging,
            paths,
            conflicts,
            cost,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::TimedVertex;

    fn tv(vertex: VertexId, time: f64) -> TimedVertex {
        TimedVertex { vertex, time }
    }

    #[test]
    fn vertex_constraint_blocks_arrival_and_overlapping_wait() {
        let constraint = Constraint::vertex(0, 5, 2.0, 4.0);
        // Arrival inside the window.
        assert!(constraint.forbids_move(4, 5, 1.0, 3.0));
        // Arrival exactly at the window end is a clean handoff.
        assert!(!constraint.forbids_move(4, 5, 2.0, 4.0));
        assert!(!constraint.forbids_move(4, 5, 4.5, 6.0));
        // The mover occupies its departure vertex until arrival, so leaving
        // mid-window is blocked while leaving at the window start is not.
        assert!(constraint.forbids_move(5, 4, 2.5, 3.5));
        assert!(!constraint.forbids_move(5, 4, 1.0, 2.0));
        // Waiting that overlaps the window is blocked.
        assert!(constraint.forbids_wait(5, 3.9, 4.9));
        assert!(!constraint.forbids_wait(5, 4.0, 5.0));
        assert!(!constraint.forbids_wait(6, 2.0, 4.0));
    }

    #[test]
    fn edge_constraint_blocks_only_its_direction() {
        let constraint = Constraint::edge(0, 1, 2, 2.0, 4.0);
        assert!(constraint.forbids_move(1, 2, 3.0, 5.0));
        assert!(!constraint.forbids_move(2, 1, 3.0, 5.0));
        // Entering the edge once the window has closed is fine.
        assert!(!constraint.forbids_move(1, 2, 4.0, 6.0));
        assert!(!constraint.forbids_wait(1, 2.0, 4.0));
    }

    #[test]
    fn position_follows_most_recent_entry() {
        let path = vec![tv(0, 0.0), tv(1, 2.0), tv(1, 5.0), tv(2, 7.0)];
        assert_eq!(position_at(&path, 0.0), 0);
        assert_eq!(position_at(&path, 1.9), 0);
        assert_eq!(position_at(&path, 2.0), 1);
        assert_eq!(position_at(&path, 6.0), 1);
        assert_eq!(position_at(&path, 100.0), 2);
    }

    #[test]
    fn clean_paths_have_no_conflict() {
        let paths = vec![
            vec![tv(0, 0.0), tv(1, 2.0)],
            vec![tv(3, 0.0), tv(4, 2.0)],
        ];
        assert!(first_conflict(&paths).is_none());
        assert!(all_conflicts(&paths).is_empty());
    }

    #[test]
    fn overlapping_service_wait_is_a_vertex_conflict() {
        // Agent 0 services vertex 1 during [2, 5]; agent 1 parks there at 3.
        let paths = vec![
            vec![tv(0, 0.0), tv(1, 2.0), tv(1, 5.0), tv(2, 7.0)],
            vec![tv(3, 0.0), tv(1, 3.0)],
        ];
        let conflict = first_conflict(&paths).expect("conflict");
        assert_eq!((conflict.first, conflict.second), (0, 1));
        assert_eq!(conflict.kind, ConflictKind::Vertex { vertex: 1 });
        assert!((conflict.start - 3.0).abs() < 1e-9);
        // Agent 0 occupies vertex 1 until it reaches vertex 2 at t=7.
        assert!((conflict.end - 7.0).abs() < 1e-9);
    }

    #[test]
    fn head_on_swap_is_an_edge_conflict_with_analytic_window() {
        let paths = vec![
            vec![tv(0, 0.0), tv(1, 2.0)],
            vec![tv(1, 0.0), tv(0, 2.0)],
        ];
        let conflict = first_conflict(&paths).expect("conflict");
        assert_eq!(conflict.kind, ConflictKind::Edge { from: 0, to: 1 });
        assert!((conflict.start - 0.0).abs() < 1e-9);
        assert!((conflict.end - 2.0).abs() < 1e-9);
    }

    #[test]
    fn detection_is_deterministic_across_pairs() {
        // Agents 0/1 and 0/2 both collide at vertex 1 at t=2; the lower pair
        // is reported first.
        let paths = vec![
            vec![tv(0, 0.0), tv(1, 2.0)],
            vec![tv(2, 0.0), tv(1, 2.0)],
            vec![tv(3, 0.0), tv(1, 2.0)],
        ];
        let conflicts = all_conflicts(&paths);
        assert_eq!((conflicts[0].first, conflicts[0].second), (0, 1));
        assert_eq!((conflicts[1].first, conflicts[1].second), (0, 2));
        assert_eq!((conflicts[2].first, conflicts[2].second), (1, 2));
    }

    #[test]
    fn mid_edge_occupancy_is_sampled() {
        // Agent 1 only touches vertex 1 strictly between agent 0's
        // timestamps; the midpoint sample still catches the overlap window.
        let paths = vec![
            vec![tv(0, 0.0), tv(1, 4.0), tv(2, 8.0)],
            vec![tv(3, 0.0), tv(1, 5.0), tv(4, 7.0)],
        ];
        let conflict = first_conflict(&paths).expect("conflict");
        assert_eq!(conflict.kind, ConflictKind::Vertex { vertex: 1 });
        assert!((conflict.start - 5.0).abs() < 1e-9);
        // Agent 0 leaves vertex 1 at t=8, agent 1 at t=7.
        assert!((conflict.end - 7.0).abs() < 1e-9);
    }

    #[test]
    fn standard_split_mirrors_the_edge_direction() {
        let conflict = Conflict {
            first: 0,
            second: 2,
            kind: ConflictKind::Edge { from: 4, to: 5 },
            start: 1.0,
            end: 3.0,
        };
        let children = standard_split(&conflict);
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].0, 0);
        assert_eq!(
            children[0].1[0].kind,
            ConstraintKind::Edge { from: 4, to: 5 }
        );
        assert_eq!(children[1].0, 2);
        assert_eq!(
            children[1].1[0].kind,
            ConstraintKind::Edge { from: 5, to: 4 }
        );
    }
}
