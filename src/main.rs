mod algorithm;
mod assignment;
mod common;
mod config;
mod energy;
mod field;
mod instance;
mod solver;
mod stat;
#[cfg(test)]
mod testutil;
mod workspace;

use std::fs;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::task;
use tokio::time::timeout;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::assignment::AssignmentOrder;
use crate::common::{Budget, Plan, SolveError};
use crate::config::{Cli, Config};
use crate::field::PotentialField;
use crate::instance::Instance;
use crate::solver::{Solver, SolverVariant};
use crate::stat::Stats;

fn run_solver(
    instance: &Instance,
    variant: SolverVariant,
    budget: &Budget,
    field: Option<&PotentialField>,
    order: AssignmentOrder,
) -> (Result<Plan, SolveError>, Stats) {
    macro_rules! run {
        ($solver:expr) => {{
            let mut solver = $solver.with_assignment_order(order);
            let outcome = solver.solve(budget);
            (outcome, solver.stats().clone())
        }};
    }

    match variant {
        SolverVariant::Prioritized => run!(solver::Prioritized::new(instance)),
        SolverVariant::Cbs => run!(solver::Cbs::new(instance)),
        SolverVariant::MixedCbs => run!(solver::MixedCbs::new(instance)),
        SolverVariant::EnergyCbs => run!(solver::EnergyCbs::new(instance)),
        SolverVariant::HybridCbs => run!(solver::HybridCbs::new(instance, field)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::new(&cli);
    config.validate()?;

    let mut instance = Instance::load(&config.instance_path)?;
    if let Some(count) = config.random_tasks {
        instance.add_random_tasks(count, config.seed);
    }
    info!(
        agents = instance.agents.len(),
        tasks = instance.tasks.len(),
        vertices = instance.workspace.num_vertices(),
        "instance loaded"
    );

    let field = match &config.field_path {
        Some(path) => Some(PotentialField::load(path, config.lambda)?),
        None => None,
    };

    let budget = Budget {
        horizon: config.horizon.unwrap_or(instance.deadline),
        wall_clock: Duration::from_secs(config.timeout_secs),
        max_high_level_expansions: config.max_expansions,
    };
    let variant = SolverVariant::from_name(&config.solver).expect("validated solver name");
    let order = if config.assign_by_duration {
        AssignmentOrder::ByDurationDesc
    } else {
        AssignmentOrder::ById
    };

    // The solver checks its own deadline cooperatively; the outer timeout is
    // a backstop with a little grace on top.
    let wall_clock = budget.wall_clock;
    let handle = task::spawn_blocking(move || {
        let (outcome, stats) = run_solver(&instance, variant, &budget, field.as_ref(), order);
        (outcome, stats)
    });
    let (outcome, stats) = match timeout(wall_clock + Duration::from_secs(5), handle).await {
        Ok(joined) => joined.context("solver task panicked")?,
        Err(_) => (Err(SolveError::DeadlineExceeded), Stats::default()),
    };

    stats.write_csv(&config);

    match outcome {
        Ok(plan) => {
            info!(
                makespan = plan.makespan,
                feasible = plan.feasible,
                "plan found"
            );
            let json = serde_json::to_string_pretty(&plan)?;
            match &config.plan_path {
                Some(path) => fs::write(path, json)
                    .with_context(|| format!("writing plan to {path}"))?,
                None => println!("{json}"),
            }
            Ok(())
        }
        Err(err) => {
            error!("no plan: {err}");
            Err(err.into())
        }
    }
}
