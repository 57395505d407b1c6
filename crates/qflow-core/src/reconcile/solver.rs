//! QP backend abstraction (spec §9: "define an interface `QpSolver`").
//!
//! The reconciler never depends on a specific backend beyond this trait,
//! which keeps [`OsqpSolver`] — the only place that names an `osqp` type —
//! swappable for tests or for a different numerical trade-off.

use crate::error::QueueError;
use osqp::{CscMatrix, Problem, Settings};

/// Tolerances and iteration budget passed through to the QP backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverTolerances {
    pub eps_abs: f64,
    pub eps_rel: f64,
    pub max_iter: u32,
}

impl Default for SolverTolerances {
    fn default() -> Self {
        Self {
            eps_abs: 1e-5,
            eps_rel: 1e-5,
            max_iter: 50_000,
        }
    }
}

/// A convex quadratic program in OSQP's canonical form:
///
/// ```text
/// minimize   (1/2) x' P x + q' x
/// subject to l <= A x <= u
/// ```
///
/// `p_upper_tri` holds only the upper-triangular entries of the (symmetric)
/// objective matrix, as `(row, col, value)` triplets with `row <= col`.
/// `a` holds every entry of the constraint matrix as `(row, col, value)`
/// triplets.
pub struct QpProblem {
    pub n_vars: usize,
    pub p_upper_tri: Vec<(usize, usize, f64)>,
    pub q: Vec<f64>,
    pub a: Vec<(usize, usize, f64)>,
    pub n_constraints: usize,
    pub l: Vec<f64>,
    pub u: Vec<f64>,
    pub tolerances: SolverTolerances,
}

/// The solver's answer: one value per variable, in the order the problem
/// declared them.
pub struct QpSolution {
    pub x: Vec<f64>,
}

/// A pluggable convex QP backend.
///
/// `Send + Sync` so a single solver instance can be shared across the
/// worker pool the optional `parallel` feature spins up over independent
/// episodes (spec §5).
pub trait QpSolver: Send + Sync {
    fn solve(&self, problem: &QpProblem) -> Result<QpSolution, QueueError>;
}

/// The default backend: wraps the OSQP operator-splitting solver.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsqpSolver;

impl QpSolver for OsqpSolver {
    fn solve(&self, problem: &QpProblem) -> Result<QpSolution, QueueError> {
        let (p_indptr, p_indices, p_data) =
            csc_from_triplets(problem.n_vars, &problem.p_upper_tri);
        let (a_indptr, a_indices, a_data) =
            csc_from_triplets(problem.n_vars, &problem.a);

        let p = CscMatrix::new(
            problem.n_vars,
            problem.n_vars,
            p_indptr,
            p_indices,
            p_data,
        );
        let a = CscMatrix::new(
            problem.n_constraints,
            problem.n_vars,
            a_indptr,
            a_indices,
            a_data,
        );

        let settings = Settings::default()
            .eps_abs(problem.tolerances.eps_abs)
            .eps_rel(problem.tolerances.eps_rel)
            .max_iter(problem.tolerances.max_iter)
            .verbose(false);

        let mut prob = Problem::new(p, &problem.q, a, &problem.l, &problem.u, &settings)
            .map_err(|e| QueueError::solver("setup", e.to_string()))?;

        match prob.solve() {
            osqp::Status::Solved(solution) => Ok(QpSolution {
                x: solution.x().to_vec(),
            }),
            osqp::Status::SolvedInaccurate(solution) => Ok(QpSolution {
                x: solution.x().to_vec(),
            }),
            other => Err(QueueError::solver(format!("{other:?}"), "QP backend did not reach an optimal status")),
        }
    }
}

/// Build a CSC (compressed sparse column) matrix from `(row, col, value)`
/// triplets, summing duplicate entries at the same coordinate.
///
/// Returns `(indptr, indices, data)` with `indptr.len() == ncols + 1`.
fn csc_from_triplets(
    ncols: usize,
    triplets: &[(usize, usize, f64)],
) -> (Vec<usize>, Vec<usize>, Vec<f64>) {
    let mut sorted: Vec<(usize, usize, f64)> = triplets.to_vec();
    sorted.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));

    let mut indptr = vec![0usize; ncols + 1];
    let mut indices = Vec::new();
    let mut data: Vec<f64> = Vec::new();

    let mut iter = sorted.into_iter().peekable();
    for col in 0..ncols {
        while let Some(&(row, c, val)) = iter.peek() {
            if c != col {
                break;
            }
            iter.next();
            if indices.last() == Some(&row) {
                *data.last_mut().expect("indices and data stay in lockstep") += val;
            } else {
                indices.push(row);
                data.push(val);
            }
        }
        indptr[col + 1] = indices.len();
    }
    (indptr, indices, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csc_from_triplets_sums_duplicates_and_orders_by_column() {
        let triplets = vec![(0, 0, 2.0), (1, 1, 3.0), (0, 0, 1.0), (0, 1, 5.0)];
        let (indptr, indices, data) = csc_from_triplets(2, &triplets);
        assert_eq!(indptr, vec![0, 1, 3]);
        assert_eq!(indices, vec![0, 0, 1]);
        assert_eq!(data, vec![3.0, 5.0, 3.0]);
    }
}
