use std::fs::OpenOptions;
use std::io::Write;

use tracing::error;

use crate::config::Config;

#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub(crate) makespan: f64,
    pub(crate) time_micros: usize,
    pub(crate) low_level_expand_nodes: usize,
    pub(crate) high_level_expand_nodes: usize,
}

impl Stats {
    /// Append one CSV row to the configured output file.
    pub(crate) fn write_csv(&self, config: &Config) {
        let Some(output_path) = &config.output_path else {
            return;
        };

        let row = format!(
            "{},{},{},{},{},{},{}\n",
            config.instance_path,
            config.solver,
            config.seed,
            self.makespan,
            self.time_micros,
            self.high_level_expand_nodes,
            self.low_level_expand_nodes
        );

        let file = OpenOptions::new().create(true).append(true).open(output_path);
        match file {
            Ok(mut file) => {
                if let Err(e) = file.write_all(row.as_bytes()) {
                    error!("Failed to write to file '{}': {}", output_path, e);
                }
            }
            Err(e) => error!("Failed to open file '{}': {}", output_path, e),
        }
    }
}
