use std::collections::BTreeSet;
use std::fs::File;
use std::io::BufReader;

use anyhow::{bail, ensure, Context, Result};
use rand::prelude::*;
use serde::Deserialize;
use tracing::info;

use crate::common::{Agent, AgentClass, Battery, ClassMask, Task, TaskTypeMask};
use crate::workspace::{Edge, Layer, Vertex, Workspace};

/// One solvable problem: the shared workspace, the fleet, the tasks, and the
/// global plan-time deadline. Immutable during a solve.
#[derive(Debug, Clone)]
pub struct Instance {
    pub workspace: Workspace,
    pub agents: Vec<Agent>,
    pub tasks: Vec<Task>,
    pub deadline: f64,
}

#[derive(Debug, Deserialize)]
struct RawInstance {
    deadline: f64,
    vertices: Vec<RawVertex>,
    #[serde(default)]
    edges: Vec<RawEdge>,
    agents: Vec<RawAgent>,
    #[serde(default)]
    tasks: Vec<RawTask>,
}

#[derive(Debug, Deserialize)]
struct RawVertex {
    id: usize,
    position: [f64; 3],
    #[serde(default = "ground_layer")]
    layer: Layer,
    classes: Vec<AgentClass>,
    #[serde(default)]
    pad: bool,
    #[serde(default)]
    corridor: bool,
    #[serde(default)]
    no_fly: bool,
}

fn ground_layer() -> Layer {
    Layer::Ground
}

#[derive(Debug, Deserialize)]
struct RawEdge {
    from: usize,
    to: usize,
    distance: Option<f64>,
    fixed_time: Option<f64>,
    #[serde(default)]
    directed: bool,
}

#[derive(Debug, Deserialize)]
struct RawAgent {
    id: usize,
    class: AgentClass,
    start: usize,
    home: Option<usize>,
    speed: f64,
    #[serde(default = "unit_speed")]
    vertical_speed: f64,
    capabilities: Vec<u8>,
    battery: Option<RawBattery>,
}

fn unit_speed() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
struct RawBattery {
    capacity: f64,
    charge: Option<f64>,
    horizontal_power: f64,
    hover_power: f64,
    climb_power: f64,
    descend_power: f64,
}

#[derive(Debug, Deserialize)]
struct RawTask {
    id: usize,
    kind: u8,
    location: usize,
    duration: f64,
    duration_std: Option<f64>,
}

impl Instance {
    pub fn load(path: &str) -> Result<Instance> {
        let file = File::open(path).with_context(|| format!("opening instance {path}"))?;
        let raw: RawInstance = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing instance {path}"))?;
        Instance::from_raw(raw)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Instance> {
        let raw: RawInstance = serde_yaml::from_str(yaml).context("parsing instance yaml")?;
        Instance::from_raw(raw)
    }

    fn from_raw(raw: RawInstance) -> Result<Instance> {
        ensure!(raw.deadline > 0.0, "deadline must be positive");
        ensure!(!raw.vertices.is_empty(), "instance has no vertices");

        let num_vertices = raw.vertices.len();
        let mut vertices = Vec::with_capacity(num_vertices);
        for (index, v) in raw.vertices.into_iter().enumerate() {
            ensure!(
                v.id == index,
                "vertex ids must be contiguous from 0, found {} at position {}",
                v.id,
                index
            );
            ensure!(
                !v.classes.is_empty(),
                "vertex {} admits no kinematic class",
                v.id
            );
            vertices.push(Vertex {
                id: v.id,
                x: v.position[0],
                y: v.position[1],
                z: v.position[2],
                layer: v.layer,
                occupancy: v.classes.into_iter().collect::<ClassMask>(),
                is_pad: v.pad,
                is_corridor: v.corridor,
                no_fly_zone: v.no_fly,
            });
        }

        let mut edges = Vec::new();
        for e in raw.edges {
            ensure!(
                e.from < num_vertices && e.to < num_vertices,
                "edge ({}, {}) references an unknown vertex",
                e.from,
                e.to
            );
            let distance = e.distance.unwrap_or_else(|| {
                let (a, b) = (&vertices[e.from], &vertices[e.to]);
                ((a.x - b.x).powi(2) + (a.y - b.y).powi(2) + (a.z - b.z).powi(2)).sqrt()
            });
            edges.push(Edge {
                from: e.from,
                to: e.to,
                distance,
                fixed_time: e.fixed_time,
            });
            if !e.directed {
                edges.push(Edge {
                    from: e.to,
                    to: e.from,
                    distance,
                    fixed_time: e.fixed_time,
                });
            }
        }

        let mut agents = Vec::with_capacity(raw.agents.len());
        let mut starts = BTreeSet::new();
        for (index, a) in raw.agents.into_iter().enumerate() {
            ensure!(
                a.id == index,
                "agent ids must be contiguous from 0, found {} at position {}",
                a.id,
                index
            );
            ensure!(a.start < num_vertices, "agent {} starts off-map", a.id);
            ensure!(
                starts.insert(a.start),
                "agent {} shares its start vertex with another agent",
                a.id
            );
            ensure!(a.speed > 0.0, "agent {} has non-positive speed", a.id);
            let battery = match (a.class, a.battery) {
                (AgentClass::Aerial, Some(b)) => {
                    ensure!(b.capacity > 0.0, "agent {} battery capacity", a.id);
                    Some(Battery {
                        capacity: b.capacity,
                        charge: b.charge.unwrap_or(b.capacity),
                        horizontal_power: b.horizontal_power,
                        hover_power: b.hover_power,
                        climb_power: b.climb_power,
                        descend_power: b.descend_power,
                    })
                }
                (AgentClass::Aerial, None) => {
                    bail!("aerial agent {} has no battery", a.id)
                }
                (_, Some(_)) => bail!("non-aerial agent {} carries a battery", a.id),
                (_, None) => None,
            };
            agents.push(Agent {
                id: a.id,
                class: a.class,
                start: a.start,
                home: a.home.unwrap_or(a.start),
                speed: a.speed,
                vertical_speed: a.vertical_speed,
                capabilities: a.capabilities.into_iter().collect::<TaskTypeMask>(),
                battery,
            });
        }

        let mut task_ids = BTreeSet::new();
        let mut tasks = Vec::with_capacity(raw.tasks.len());
        for t in raw.tasks {
            ensure!(t.location < num_vertices, "task {} is located off-map", t.id);
            ensure!(t.duration >= 0.0, "task {} has negative duration", t.id);
            ensure!(task_ids.insert(t.id), "duplicate task id {}", t.id);
            tasks.push(Task {
                id: t.id,
                kind: t.kind,
                location: t.location,
                duration: t.duration,
                duration_std: t.duration_std,
            });
        }

        Ok(Instance {
            workspace: Workspace::new(vertices, edges),
            agents,
            tasks,
            deadline: raw.deadline,
        })
    }

    /// Append `count` synthetic tasks on ground-accessible vertices, for
    /// benchmarking. Seeded, so runs stay reproducible.
    pub fn add_random_tasks(&mut self, count: usize, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        let candidates: Vec<usize> = (0..self.workspace.num_vertices())
            .filter(|&v| self.workspace.can_occupy(v, AgentClass::Ground))
            .collect();
        if candidates.is_empty() {
            return;
        }

        let next_id = self.tasks.iter().map(|t| t.id + 1).max().unwrap_or(0);
        for offset in 0..count {
            let location = *candidates.choose(&mut rng).unwrap();
            self.tasks.push(Task {
                id: next_id + offset,
                kind: 0,
                location,
                duration: rng.gen_range(1.0..5.0),
                duration_std: None,
            });
        }
        info!("Generated tasks: {:?}", &self.tasks[self.tasks.len() - count..]);
    }
}
