//! QP reconciler (C3).
//!
//! Within one window, solves a convex QP for corrected `(i, o, q)` that
//! exactly satisfies conservation and non-negativity while minimizing a
//! weighted quadratic deviation from the measured `(a, b)`.

mod solver;

pub use solver::{OsqpSolver, QpProblem, QpSolution, QpSolver, SolverTolerances};

use crate::error::QueueError;
use tracing::debug;

/// Which measured channel feeds the adaptive inflow prior's activity proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivitySource {
    EntriesOnly,
    ExitsOnly,
    Sum,
    #[default]
    Max,
}

/// Configuration for QP flow reconciliation. See spec §4.3.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileConfig {
    pub q0: f64,
    pub w_in: f64,
    pub w_out: f64,
    pub smooth_in: f64,
    pub smooth_out: f64,
    pub nonnegative_flows: bool,
    pub adaptive_inflow_prior: bool,
    pub activity_source: ActivitySource,
    pub activity_window: usize,
    pub activity_eps: f64,
    pub inflow_weight_min_scale: f64,
    pub inflow_weight_max_scale: f64,
    pub solver_tolerances: SolverTolerances,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            q0: 0.0,
            w_in: 1.0,
            w_out: 4.0,
            smooth_in: 0.0,
            smooth_out: 0.0,
            nonnegative_flows: true,
            adaptive_inflow_prior: false,
            activity_source: ActivitySource::Max,
            activity_window: 7,
            activity_eps: 0.5,
            inflow_weight_min_scale: 0.25,
            inflow_weight_max_scale: 4.0,
            solver_tolerances: SolverTolerances::default(),
        }
    }
}

impl ReconcileConfig {
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.w_in <= 0.0 {
            return Err(QueueError::config("w_in", "must be > 0"));
        }
        if self.w_out <= 0.0 {
            return Err(QueueError::config("w_out", "must be > 0"));
        }
        if self.smooth_in < 0.0 {
            return Err(QueueError::config("smooth_in", "must be >= 0"));
        }
        if self.smooth_out < 0.0 {
            return Err(QueueError::config("smooth_out", "must be >= 0"));
        }
        if self.adaptive_inflow_prior {
            if self.activity_window < 1 {
                return Err(QueueError::config("activity_window", "must be >= 1"));
            }
            if self.activity_eps <= 0.0 {
                return Err(QueueError::config("activity_eps", "must be > 0"));
            }
            if self.inflow_weight_min_scale <= 0.0
                || self.inflow_weight_min_scale > self.inflow_weight_max_scale
            {
                return Err(QueueError::config(
                    "inflow_weight_min_scale",
                    "must be > 0 and <= inflow_weight_max_scale",
                ));
            }
        }
        if self.solver_tolerances.eps_abs <= 0.0 || self.solver_tolerances.eps_rel <= 0.0 {
            return Err(QueueError::config(
                "solver_tolerances",
                "eps_abs and eps_rel must be > 0",
            ));
        }
        if self.solver_tolerances.max_iter == 0 {
            return Err(QueueError::config("solver_tolerances.max_iter", "must be >= 1"));
        }
        Ok(())
    }
}

/// The reconciled flows and occupancy for one window, indexed like the
/// input slices it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledWindow {
    pub i: Vec<f64>,
    pub o: Vec<f64>,
    pub q: Vec<f64>,
}

/// Reconcile one measured `(a, b)` window into corrected `(i, o, q)`.
///
/// Empty windows short-circuit without invoking the solver, per spec §4.3's
/// "Empty window -> empty reconciled window (no solver invocation)".
pub fn reconcile_window(
    a: &[f64],
    b: &[f64],
    config: &ReconcileConfig,
    solver: &dyn QpSolver,
) -> Result<ReconciledWindow, QueueError> {
    config.validate()?;
    if a.len() != b.len() {
        return Err(QueueError::contract(
            "in_count/out_count",
            "measured entry and exit series must have equal length",
        ));
    }
    let m = a.len();
    if m == 0 {
        return Ok(ReconciledWindow {
            i: Vec::new(),
            o: Vec::new(),
            q: Vec::new(),
        });
    }

    let w_in = inflow_weights(a, b, config);

    let problem = build_problem(a, b, &w_in, config, m);
    let solution = solver.solve(&problem)?;

    let mut i: Vec<f64> = solution.x[0..m].to_vec();
    let mut o: Vec<f64> = solution.x[m..2 * m].to_vec();
    let mut q: Vec<f64> = solution.x[2 * m..3 * m].to_vec();

    // Post-solve projection: the solver can return marginally negative
    // values within its tolerance; clamp to the feasible region it was
    // supposed to already satisfy.
    if config.nonnegative_flows {
        for v in i.iter_mut() {
            *v = v.max(0.0);
        }
        for v in o.iter_mut() {
            *v = v.max(0.0);
        }
    }
    for v in q.iter_mut() {
        *v = v.max(0.0);
    }

    debug!(window_len = m, "reconciled window");
    Ok(ReconciledWindow { i, o, q })
}

/// Per-minute inflow fidelity weight. Constant `w_in` unless the adaptive
/// prior is enabled (spec §4.3 "Adaptive inflow prior").
fn inflow_weights(a: &[f64], b: &[f64], config: &ReconcileConfig) -> Vec<f64> {
    if !config.adaptive_inflow_prior {
        return vec![config.w_in; a.len()];
    }

    let proxy: Vec<f64> = (0..a.len())
        .map(|k| match config.activity_source {
            ActivitySource::EntriesOnly => a[k],
            ActivitySource::ExitsOnly => b[k],
            ActivitySource::Sum => a[k] + b[k],
            ActivitySource::Max => a[k].max(b[k]),
        })
        .collect();

    let smoothed = centered_moving_average(&proxy, config.activity_window);

    let mut raw_scale: Vec<f64> = smoothed
        .iter()
        .map(|p| 1.0 / (p + config.activity_eps))
        .collect();

    let mean_scale = raw_scale.iter().sum::<f64>() / raw_scale.len() as f64;
    if mean_scale > 0.0 {
        for s in raw_scale.iter_mut() {
            *s /= mean_scale;
        }
    }
    for s in raw_scale.iter_mut() {
        *s = s.clamp(config.inflow_weight_min_scale, config.inflow_weight_max_scale);
    }

    raw_scale.iter().map(|r| config.w_in * r).collect()
}

/// Centered moving average with boundary shrinkage (the window narrows near
/// the edges rather than wrapping or padding with zeros).
fn centered_moving_average(values: &[f64], window: usize) -> Vec<f64> {
    let radius = window / 2;
    let n = values.len();
    (0..n)
        .map(|k| {
            let lo = k.saturating_sub(radius);
            let hi = (k + radius).min(n - 1);
            let slice = &values[lo..=hi];
            slice.iter().sum::<f64>() / slice.len() as f64
        })
        .collect()
}

/// Lay out variables as `[i_0..i_{m-1}, o_0..o_{m-1}, q_0..q_{m-1}]` and
/// build the QP matching spec §4.3's objective and constraints.
fn build_problem(
    a: &[f64],
    b: &[f64],
    w_in: &[f64],
    config: &ReconcileConfig,
    m: usize,
) -> QpProblem {
    let n_vars = 3 * m;
    let idx_i = |k: usize| k;
    let idx_o = |k: usize| m + k;
    let idx_q = |k: usize| 2 * m + k;

    let mut p = Vec::with_capacity(4 * m);
    let mut q_lin = vec![0.0; n_vars];

    for k in 0..m {
        // w_in_k * (i_k - a_k)^2
        p.push((idx_i(k), idx_i(k), 2.0 * w_in[k]));
        q_lin[idx_i(k)] += -2.0 * w_in[k] * a[k];

        // w_out * (o_k - b_k)^2
        p.push((idx_o(k), idx_o(k), 2.0 * config.w_out));
        q_lin[idx_o(k)] += -2.0 * config.w_out * b[k];
    }

    if config.smooth_in > 0.0 {
        add_smoothing_terms(&mut p, idx_i, config.smooth_in, m);
    }
    if config.smooth_out > 0.0 {
        add_smoothing_terms(&mut p, idx_o, config.smooth_out, m);
    }

    // Constraints: m conservation equalities, plus bound rows for q (and for
    // i, o when non-negativity is enabled).
    let mut constraint_rows = Vec::with_capacity(m + m + if config.nonnegative_flows { 2 * m } else { 0 });
    let mut l = Vec::new();
    let mut u = Vec::new();

    // q_0 - i_0 + o_0 = q0 ; q_k - q_{k-1} - i_k + o_k = 0 for k >= 1.
    for k in 0..m {
        let row = l.len();
        constraint_rows.push((row, idx_q(k), 1.0));
        constraint_rows.push((row, idx_i(k), -1.0));
        constraint_rows.push((row, idx_o(k), 1.0));
        if k > 0 {
            constraint_rows.push((row, idx_q(k - 1), -1.0));
            l.push(0.0);
            u.push(0.0);
        } else {
            l.push(config.q0);
            u.push(config.q0);
        }
    }

    // q_k >= 0
    for k in 0..m {
        let row = l.len();
        constraint_rows.push((row, idx_q(k), 1.0));
        l.push(0.0);
        u.push(f64::INFINITY);
    }

    if config.nonnegative_flows {
        for k in 0..m {
            let row = l.len();
            constraint_rows.push((row, idx_i(k), 1.0));
            l.push(0.0);
            u.push(f64::INFINITY);
        }
        for k in 0..m {
            let row = l.len();
            constraint_rows.push((row, idx_o(k), 1.0));
            l.push(0.0);
            u.push(f64::INFINITY);
        }
    }

    let n_constraints = l.len();

    QpProblem {
        n_vars,
        p_upper_tri: p,
        q: q_lin,
        a: constraint_rows,
        n_constraints,
        l,
        u,
        tolerances: config.solver_tolerances,
    }
}

fn add_smoothing_terms(
    p: &mut Vec<(usize, usize, f64)>,
    idx: impl Fn(usize) -> usize,
    lambda: f64,
    m: usize,
) {
    for k in 1..m {
        p.push((idx(k), idx(k), 2.0 * lambda));
        p.push((idx(k - 1), idx(k - 1), 2.0 * lambda));
        // idx(k-1) < idx(k): already the upper-triangular entry.
        p.push((idx(k - 1), idx(k), -2.0 * lambda));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_window_short_circuits_without_solving() {
        struct PanicSolver;
        impl QpSolver for PanicSolver {
            fn solve(&self, _problem: &QpProblem) -> Result<QpSolution, QueueError> {
                panic!("solver must not be invoked for an empty window");
            }
        }
        let out = reconcile_window(&[], &[], &ReconcileConfig::default(), &PanicSolver).unwrap();
        assert!(out.i.is_empty() && out.o.is_empty() && out.q.is_empty());
    }

    #[test]
    fn mismatched_lengths_are_a_contract_error() {
        let err = reconcile_window(&[1.0], &[1.0, 2.0], &ReconcileConfig::default(), &OsqpSolver)
            .unwrap_err();
        assert!(matches!(err, QueueError::Contract { .. }));
    }

    #[test]
    fn invalid_config_is_rejected_before_any_solver_call() {
        struct PanicSolver;
        impl QpSolver for PanicSolver {
            fn solve(&self, _problem: &QpProblem) -> Result<QpSolution, QueueError> {
                panic!("solver must not be invoked for an invalid config");
            }
        }
        let cfg = ReconcileConfig {
            w_in: -1.0,
            ..Default::default()
        };
        let err = reconcile_window(&[1.0], &[1.0], &cfg, &PanicSolver).unwrap_err();
        assert!(matches!(err, QueueError::Config { .. }));
    }

    #[test]
    fn centered_moving_average_shrinks_at_boundaries() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let smoothed = centered_moving_average(&values, 3);
        assert_eq!(smoothed[0], 1.5); // avg(1,2)
        assert_eq!(smoothed[2], 3.0); // avg(2,3,4)
        assert_eq!(smoothed[4], 4.5); // avg(4,5)
    }

    #[test]
    fn adaptive_weights_reduce_to_constant_when_disabled() {
        let cfg = ReconcileConfig::default();
        let w = inflow_weights(&[1.0, 2.0, 3.0], &[0.0, 0.0, 0.0], &cfg);
        assert_eq!(w, vec![cfg.w_in; 3]);
    }
}
