use crate::common::{Agent, EnergyAction, Path};
use crate::workspace::{Layer, VertexId, Workspace};

/// Battery death while replaying a path: the agent's energy hits zero at
/// `vertex` by `time`. Not an error; the energy repair loop turns it into a
/// mandatory charging stop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct EnergyViolation {
    pub(crate) agent: usize,
    pub(crate) vertex: VertexId,
    pub(crate) time: f64,
}

/// Replay a path against the battery model and return the final remaining
/// energy. Same-vertex entries drain hover power; same-layer moves drain
/// horizontal power over the travel time; layer changes are charged as pure
/// vertical work, so the two components are never double counted. Arriving
/// at (or starting on) a ground-layer pad resets the charge to capacity.
/// Agents without a battery are unconstrained.
pub(crate) fn simulate(ws: &Workspace, agent: &Agent, path: &Path) -> Result<f64, EnergyViolation> {
    let Some(battery) = agent.battery else {
        return Ok(f64::INFINITY);
    };

    let refills = |v: VertexId| {
        let vertex = ws.vertex(v);
        vertex.is_pad && vertex.layer == Layer::Ground
    };

    let mut energy = battery.charge;
    if refills(path[0].vertex) {
        energy = battery.capacity;
    }

    for pair in path.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let drain = if a.vertex == b.vertex {
            if refills(a.vertex) {
                0.0 // parked on a pad
            } else {
                agent.energy_for_time(b.time - a.time, EnergyAction::Hover)
            }
        } else {
            let from = ws.vertex(a.vertex).layer;
            let to = ws.vertex(b.vertex).layer;
            if from != to {
                agent.energy_for_layer_change(from, to)
            } else {
                agent.energy_for_time(b.time - a.time, EnergyAction::Horizontal)
            }
        };

        energy -= drain;
        if energy <= 0.0 {
            return Err(EnergyViolation {
                agent: agent.id,
                vertex: b.vertex,
                time: b.time,
            });
        }
        if refills(b.vertex) {
            energy = battery.capacity;
        }
    }

    Ok(energy)
}
