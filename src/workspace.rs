use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::common::{AgentClass, ClassMask};

pub type VertexId = usize;

/// Discrete airspace layers. `Ground` also hosts rail and ground agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Ground,
    L1,
    L2,
    L3,
}

impl Layer {
    pub const COUNT: usize = 4;

    pub fn index(self) -> usize {
        match self {
            Layer::Ground => 0,
            Layer::L1 => 1,
            Layer::L2 => 2,
            Layer::L3 => 3,
        }
    }

    pub fn from_index(index: usize) -> Option<Layer> {
        match index {
            0 => Some(Layer::Ground),
            1 => Some(Layer::L1),
            2 => Some(Layer::L2),
            3 => Some(Layer::L3),
            _ => None,
        }
    }

    /// Nominal altitude used for layer-transition durations and energy.
    pub fn altitude(self) -> f64 {
        self.index() as f64 * 10.0
    }

    /// Layer transitions are single-step: Ground <-> L1 <-> L2 <-> L3.
    pub fn adjacent(self, other: Layer) -> bool {
        self.index().abs_diff(other.index()) == 1
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Vertex {
    pub id: VertexId,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub layer: Layer,
    pub occupancy: ClassMask,
    pub is_pad: bool,
    pub is_corridor: bool,
    pub no_fly_zone: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub from: VertexId,
    pub to: VertexId,
    pub distance: f64,
    /// Class-independent traversal time, e.g. for lifts.
    pub fixed_time: Option<f64>,
}

/// Immutable directed workspace graph shared by every solver. Vertices are
/// indexed by compact ids; neighbor and edge lookup are O(degree).
#[derive(Debug, Clone)]
pub struct Workspace {
    vertices: Vec<Vertex>,
    edges: Vec<Edge>,
    adjacency: Vec<Vec<usize>>,
    edge_index: HashMap<(VertexId, VertexId), usize>,
    colocated: Vec<[Option<VertexId>; Layer::COUNT]>,
    pads: Vec<VertexId>,
}

impl Workspace {
    pub fn new(vertices: Vec<Vertex>, edges: Vec<Edge>) -> Self {
        let mut adjacency = vec![Vec::new(); vertices.len()];
        let mut edge_index = HashMap::new();
        for (idx, edge) in edges.iter().enumerate() {
            adjacency[edge.from].push(idx);
            edge_index.insert((edge.from, edge.to), idx);
        }

        // Vertices sharing a plan-view position form one vertical column.
        let mut columns: HashMap<(i64, i64), [Option<VertexId>; Layer::COUNT]> = HashMap::new();
        for vertex in &vertices {
            let column = columns.entry(plan_view_key(vertex.x, vertex.y)).or_default();
            column[vertex.layer.index()] = Some(vertex.id);
        }
        let colocated = vertices
            .iter()
            .map(|vertex| columns[&plan_view_key(vertex.x, vertex.y)])
            .collect();

        let pads = vertices
            .iter()
            .filter(|vertex| vertex.is_pad && vertex.layer == Layer::Ground)
            .map(|vertex| vertex.id)
            .collect();

        Workspace {
            vertices,
            edges,
            adjacency,
            edge_index,
            colocated,
            pads,
        }
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn vertex(&self, id: VertexId) -> &Vertex {
        &self.vertices[id]
    }

    /// Outgoing edges of `v`.
    pub fn neighbors(&self, v: VertexId) -> impl Iterator<Item = &Edge> {
        self.adjacency[v].iter().map(move |&idx| &self.edges[idx])
    }

    pub fn edge(&self, from: VertexId, to: VertexId) -> Option<&Edge> {
        self.edge_index.get(&(from, to)).map(|&idx| &self.edges[idx])
    }

    pub fn can_occupy(&self, v: VertexId, class: AgentClass) -> bool {
        self.vertices[v].occupancy.admits(class)
    }

    /// The co-located vertex of `v` in `layer`, if the column reaches it.
    pub fn vertex_at_layer(&self, v: VertexId, layer: Layer) -> Option<VertexId> {
        self.colocated[v][layer.index()]
    }

    pub fn pads(&self) -> &[VertexId] {
        &self.pads
    }

    /// Closest ground-layer pad by 3D Euclidean distance, ties broken by the
    /// lower vertex id. Pad ids are kept sorted, so the first strict
    /// improvement wins.
    pub fn nearest_pad(&self, v: VertexId) -> Option<VertexId> {
        let mut best: Option<(f64, VertexId)> = None;
        for &pad in &self.pads {
            let d = self.distance(v, pad);
            match best {
                Some((best_d, _)) if d >= best_d => {}
                _ => best = Some((d, pad)),
            }
        }
        best.map(|(_, pad)| pad)
    }

    /// 3D Euclidean distance between two vertex positions.
    pub fn distance(&self, u: VertexId, v: VertexId) -> f64 {
        let a = &self.vertices[u];
        let b = &self.vertices[v];
        ((a.x - b.x).powi(2) + (a.y - b.y).powi(2) + (a.z - b.z).powi(2)).sqrt()
    }
}

fn plan_view_key(x: f64, y: f64) -> (i64, i64) {
    ((x * 1e3).round() as i64, (y * 1e3).round() as i64)
}
