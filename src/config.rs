use anyhow::anyhow;
use clap::Parser;

use crate::solver::SolverVariant;

#[derive(Parser, Debug)]
#[command(
    name = "MAPF-HET",
    about = "Conflict-based multi-agent path finding for heterogeneous fleets.",
    version = "0.1"
)]
pub struct Cli {
    #[arg(
        long,
        help = "Path to the YAML instance file",
        default_value = "instances/demo.yaml"
    )]
    pub instance_path: String,

    #[arg(long, help = "Solver variant to run", default_value = "cbs")]
    pub solver: String,

    #[arg(long, help = "Write the plan bundle as JSON to this file")]
    pub plan_path: Option<String>,

    #[arg(long, help = "Append a stats CSV row to this file")]
    pub output_path: Option<String>,

    #[arg(long, help = "Override the instance's plan-time deadline")]
    pub horizon: Option<f64>,

    #[arg(long, help = "Wall-clock timeout in seconds", default_value_t = 60)]
    pub timeout_secs: u64,

    #[arg(
        long,
        help = "High-level expansion budget",
        default_value_t = 100_000
    )]
    pub max_expansions: usize,

    #[arg(long, help = "Append this many random tasks to the instance")]
    pub random_tasks: Option<usize>,

    #[arg(
        long,
        help = "Seed for the random task generator",
        default_value_t = 0
    )]
    pub seed: u64,

    #[arg(
        long,
        help = "Weight of the potential field bias (hybrid-cbs only)",
        default_value_t = 0.0
    )]
    pub lambda: f64,

    #[arg(long, help = "Per-vertex potential YAML map (hybrid-cbs only)")]
    pub field_path: Option<String>,

    #[arg(
        long,
        help = "Assign long tasks first instead of by task id",
        default_value_t = false
    )]
    pub assign_by_duration: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub instance_path: String,
    pub solver: String,
    pub plan_path: Option<String>,
    pub output_path: Option<String>,
    pub horizon: Option<f64>,
    pub timeout_secs: u64,
    pub max_expansions: usize,
    pub random_tasks: Option<usize>,
    pub seed: u64,
    pub lambda: f64,
    pub field_path: Option<String>,
    pub assign_by_duration: bool,
}

impl Config {
    pub fn new(cli: &Cli) -> Self {
        Self {
            instance_path: cli.instance_path.clone(),
            solver: cli.solver.clone(),
            plan_path: cli.plan_path.clone(),
            output_path: cli.output_path.clone(),
            horizon: cli.horizon,
            timeout_secs: cli.timeout_secs,
            max_expansions: cli.max_expansions,
            random_tasks: cli.random_tasks,
            seed: cli.seed,
            lambda: cli.lambda,
            field_path: cli.field_path.clone(),
            assign_by_duration: cli.assign_by_duration,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if SolverVariant::from_name(&self.solver).is_none() {
            return Err(anyhow!(
                "unknown solver '{}', expected one of {:?}",
                self.solver,
                SolverVariant::NAMES
            ));
        }

        let is_hybrid = self.solver == "hybrid-cbs";
        if !is_hybrid && (self.lambda != 0.0 || self.field_path.is_some()) {
            return Err(anyhow!(
                "potential field options only apply to hybrid-cbs, got solver '{}'",
                self.solver
            ));
        }
        if is_hybrid && self.field_path.is_some() && self.lambda <= 0.0 {
            return Err(anyhow!(
                "a field file needs a positive lambda, got {}",
                self.lambda
            ));
        }
        if self.lambda < 0.0 {
            return Err(anyhow!("lambda must be non-negative, got {}", self.lambda));
        }

        if let Some(horizon) = self.horizon {
            if horizon <= 0.0 {
                return Err(anyhow!("horizon must be positive, got {}", horizon));
            }
        }
        if self.timeout_secs == 0 {
            return Err(anyhow!("timeout must be at least one second"));
        }

        Ok(())
    }
}
