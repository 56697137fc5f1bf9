//! Shared fixtures for the colocated test modules.

use crate::common::{
    first_conflict, Agent, AgentClass, Battery, ClassMask, Path, Plan, Task, TaskTypeMask,
    TIME_EPS,
};
use crate::instance::Instance;
use crate::workspace::{Edge, Layer, Vertex, VertexId, Workspace};

pub(crate) fn grid_id(x: usize, y: usize, width: usize) -> VertexId {
    y * width + x
}

/// 4-connected `width` x `height` ground grid with symmetric unit-ish edges.
pub(crate) fn grid(width: usize, height: usize, spacing: f64, occupancy: ClassMask) -> Workspace {
    let mut vertices = Vec::with_capacity(width * height);
    for y in 0..height {
        for x in 0..width {
            vertices.push(Vertex {
                id: grid_id(x, y, width),
                x: x as f64 * spacing,
                y: y as f64 * spacing,
                z: 0.0,
                layer: Layer::Ground,
                occupancy,
                is_pad: false,
                is_corridor: false,
                no_fly_zone: false,
            });
        }
    }

    let mut edges = Vec::new();
    let mut connect = |a: VertexId, b: VertexId| {
        edges.push(Edge {
            from: a,
            to: b,
            distance: spacing,
            fixed_time: None,
        });
        edges.push(Edge {
            from: b,
            to: a,
            distance: spacing,
            fixed_time: None,
        });
    };
    for y in 0..height {
        for x in 0..width {
            if x + 1 < width {
                connect(grid_id(x, y, width), grid_id(x + 1, y, width));
            }
            if y + 1 < height {
                connect(grid_id(x, y, width), grid_id(x, y + 1, width));
            }
        }
    }

    Workspace::new(vertices, edges)
}

pub(crate) fn line(n: usize, occupancy: ClassMask) -> Workspace {
    grid(n, 1, 1.0, occupancy)
}

/// One vertical column: ground (id 0), L1 (id 1), L2 (id 2), all corridor.
pub(crate) fn airspace_column() -> Workspace {
    let mk = |id, layer: Layer| Vertex {
        id,
        x: 0.0,
        y: 0.0,
        z: layer.altitude(),
        layer,
        occupancy: ClassMask::NONE.with(AgentClass::Aerial),
        is_pad: layer == Layer::Ground,
        is_corridor: true,
        no_fly_zone: false,
    };
    Workspace::new(
        vec![mk(0, Layer::Ground), mk(1, Layer::L1), mk(2, Layer::L2)],
        Vec::new(),
    )
}

/// `columns` vertical columns spaced along x. Ground vertices are
/// `0..columns` (column 0 is a pad), L1 vertices are `columns..2*columns`
/// joined by horizontal edges. Every column is a corridor.
pub(crate) fn airspace_route(columns: usize, spacing: f64) -> Workspace {
    let mut vertices = Vec::new();
    for i in 0..columns {
        vertices.push(Vertex {
            id: i,
            x: i as f64 * spacing,
            y: 0.0,
            z: 0.0,
            layer: Layer::Ground,
            occupancy: ClassMask::NONE
                .with(AgentClass::Aerial)
                .with(AgentClass::Ground),
            is_pad: i == 0,
            is_corridor: true,
            no_fly_zone: false,
        });
    }
    for i in 0..columns {
        vertices.push(Vertex {
            id: columns + i,
            x: i as f64 * spacing,
            y: 0.0,
            z: Layer::L1.altitude(),
            layer: Layer::L1,
            occupancy: ClassMask::NONE.with(AgentClass::Aerial),
            is_pad: false,
            is_corridor: true,
            no_fly_zone: false,
        });
    }

    let mut edges = Vec::new();
    for i in 0..columns.saturating_sub(1) {
        let (a, b) = (columns + i, columns + i + 1);
        edges.push(Edge {
            from: a,
            to: b,
            distance: spacing,
            fixed_time: None,
        });
        edges.push(Edge {
            from: b,
            to: a,
            distance: spacing,
            fixed_time: None,
        });
    }

    Workspace::new(vertices, edges)
}

pub(crate) fn ground_agent(id: usize, start: VertexId) -> Agent {
    Agent {
        id,
        class: AgentClass::Ground,
        start,
        home: start,
        speed: 0.5,
        vertical_speed: 1.0,
        capabilities: TaskTypeMask::NONE.with(0),
        battery: None,
    }
}

pub(crate) fn rail_agent(id: usize, start: VertexId) -> Agent {
    Agent {
        id,
        class: AgentClass::Rail,
        start,
        home: start,
        speed: 1.0,
        vertical_speed: 1.0,
        capabilities: TaskTypeMask::NONE.with(1),
        battery: None,
    }
}

pub(crate) fn aerial_agent(id: usize, start: VertexId, capacity: f64, charge: f64) -> Agent {
    Agent {
        id,
        class: AgentClass::Aerial,
        start,
        home: start,
        speed: 2.0,
        vertical_speed: 2.0,
        capabilities: TaskTypeMask::NONE.with(2),
        battery: Some(Battery {
            capacity,
            charge,
            horizontal_power: 1.0,
            hover_power: 0.2,
            climb_power: 2.0,
            descend_power: 1.0,
        }),
    }
}

pub(crate) fn task(id: usize, kind: u8, location: VertexId, duration: f64) -> Task {
    Task {
        id,
        kind,
        location,
        duration,
        duration_std: None,
    }
}

/// Checks a returned plan against the solver contract: well-formed paths on
/// admissible vertices, every constraint of the instance respected, every
/// task assigned, visited and serviced, and no residual conflict or battery
/// death in a plan marked feasible.
pub(crate) fn assert_plan_invariants(instance: &Instance, plan: &Plan) {
    let ws = &instance.workspace;

    for agent in &instance.agents {
        let path = &plan.paths[&agent.id];
        assert!(!path.is_empty(), "agent {} has an empty path", agent.id);
        assert_eq!(path[0].vertex, agent.start);
        assert_eq!(path[0].time, 0.0);

        for pair in path.windows(2) {
            assert!(
                pair[1].time >= pair[0].time - TIME_EPS,
                "time goes backwards for agent {}",
                agent.id
            );
            if pair[0].vertex != pair[1].vertex {
                let by_edge = ws.edge(pair[0].vertex, pair[1].vertex).is_some();
                let from = ws.vertex(pair[0].vertex);
                let to = ws.vertex(pair[1].vertex);
                let by_corridor = from.is_corridor
                    && from.layer.adjacent(to.layer)
                    && ws.vertex_at_layer(pair[0].vertex, to.layer) == Some(pair[1].vertex);
                assert!(
                    by_edge || by_corridor,
                    "agent {} hops {} -> {} without a connection",
                    agent.id,
                    pair[0].vertex,
                    pair[1].vertex
                );
            }
        }

        for entry in path {
            assert!(
                ws.can_occupy(entry.vertex, agent.class),
                "agent {} on a vertex outside its class mask",
                agent.id
            );
            if agent.class == AgentClass::Aerial {
                assert!(!ws.vertex(entry.vertex).no_fly_zone);
                assert!(crate::energy::simulate(ws, agent, path).is_ok());
            }
        }
    }

    for task in &instance.tasks {
        let agent_id = *plan
            .assignment
            .get(&task.id)
            .unwrap_or_else(|| panic!("task {} unassigned", task.id));
        let agent = &instance.agents[agent_id];
        assert!(agent.can_perform(task.kind));
        assert!(ws.can_occupy(task.location, agent.class));

        let path = &plan.paths[&agent_id];
        let serviced = if task.duration > 0.0 {
            path.windows(2).any(|pair| {
                pair[0].vertex == task.location
                    && pair[1].vertex == task.location
                    && pair[1].time - pair[0].time >= task.duration - TIME_EPS
            })
        } else {
            path.iter().any(|entry| entry.vertex == task.location)
        };
        assert!(serviced, "task {} is never serviced", task.id);
    }

    if plan.feasible {
        let paths: Vec<Path> = instance
            .agents
            .iter()
            .map(|agent| plan.paths[&agent.id].clone())
            .collect();
        assert!(first_conflict(&paths).is_none(), "feasible plan conflicts");
    }
}
