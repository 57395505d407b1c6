//! CLI configuration overrides.
//!
//! Mirrors the teacher's `DaemonConfig::from_env()` pattern: a `Default`
//! struct with documented fields, optionally overridden by environment
//! variables at startup.

/// Environment-derived overrides layered on top of the CLI flags.
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Root directory for `--key/--variant` named-dataset selection.
    pub dataset_root: std::path::PathBuf,
    /// Override for `solver_tolerances.eps_abs`/`eps_rel`.
    pub solver_eps: Option<f64>,
    /// Override for `solver_tolerances.max_iter`.
    pub solver_max_iter: Option<u32>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            dataset_root: std::path::PathBuf::from("data/synthetic"),
            solver_eps: None,
            solver_max_iter: None,
        }
    }
}

impl CliConfig {
    /// Build from `Default`, then apply environment variable overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(root) = std::env::var("QFLOW_DATASET_ROOT") {
            config.dataset_root = std::path::PathBuf::from(root);
        }
        if let Ok(eps) = std::env::var("QFLOW_SOLVER_EPS") {
            if let Ok(val) = eps.parse() {
                config.solver_eps = Some(val);
            }
        }
        if let Ok(iter) = std::env::var("QFLOW_SOLVER_MAX_ITER") {
            if let Ok(val) = iter.parse() {
                config.solver_max_iter = Some(val);
            }
        }

        config
    }
}
