//! Episode detector (C2).
//!
//! Partitions a minute grid into independent busy windows by activity
//! thresholding, short-gap bridging, and minimum-length filtering.

use crate::grid::MinuteGrid;
use crate::error::QueueError;
use crate::reconcile::{reconcile_window, QpSolver, ReconcileConfig};
#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Configuration for queue episode detection. See spec §4.2.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeDetectConfig {
    /// A minute is "active" if `in_count + out_count >= active_threshold`.
    pub active_threshold: f64,
    /// Reject raw active-runs shorter than this many minutes.
    pub min_active_minutes: usize,
    /// Bridge inactive runs no longer than this when both sides are active.
    pub max_gap_minutes: usize,
    /// Reject final (buffered) episodes shorter than this many minutes.
    pub min_episode_minutes: usize,
    /// Left/right pad each active run, clamped to grid bounds.
    pub buffer_minutes: usize,
}

impl Default for EpisodeDetectConfig {
    fn default() -> Self {
        Self {
            active_threshold: 1.0,
            min_active_minutes: 5,
            max_gap_minutes: 10,
            min_episode_minutes: 20,
            buffer_minutes: 10,
        }
    }
}

impl EpisodeDetectConfig {
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.active_threshold < 0.0 {
            return Err(QueueError::config(
                "active_threshold",
                "must be >= 0",
            ));
        }
        if self.min_active_minutes < 1 {
            return Err(QueueError::config(
                "min_active_minutes",
                "must be >= 1",
            ));
        }
        if self.min_episode_minutes < 1 {
            return Err(QueueError::config(
                "min_episode_minutes",
                "must be >= 1",
            ));
        }
        Ok(())
    }
}

/// A contiguous busy window `[start, end]` (inclusive, 0-based indices).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Episode {
    pub id: u32,
    pub start: usize,
    pub end: usize,
}

impl Episode {
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Detect busy episodes in a minute grid.
pub fn detect_episodes(
    grid: &MinuteGrid,
    config: &EpisodeDetectConfig,
) -> Result<Vec<Episode>, QueueError> {
    config.validate()?;
    let n = grid.len();
    if n == 0 {
        return Ok(Vec::new());
    }

    let mut active: Vec<bool> = (0..n)
        .map(|k| grid.in_count[k] + grid.out_count[k] >= config.active_threshold)
        .collect();

    bridge_gaps(&mut active, config.max_gap_minutes);

    let mut episodes = Vec::new();
    let mut next_id = 1u32;
    for (start, end) in active_runs(&active) {
        let raw_len = end - start + 1;
        if raw_len < config.min_active_minutes {
            continue;
        }
        let buffered_start = start.saturating_sub(config.buffer_minutes);
        let buffered_end = (end + config.buffer_minutes).min(n - 1);
        let buffered_len = buffered_end - buffered_start + 1;
        if buffered_len < config.min_episode_minutes {
            continue;
        }
        episodes.push(Episode {
            id: next_id,
            start: buffered_start,
            end: buffered_end,
        });
        next_id += 1;
    }

    Ok(episodes)
}

/// Flip interior inactive runs of length `<= max_gap` to active, provided
/// both neighbors are active. Leading and trailing inactive runs are never
/// bridged.
fn bridge_gaps(active: &mut [bool], max_gap: usize) {
    if max_gap == 0 || active.is_empty() {
        return;
    }
    for (start, end) in inactive_runs(active) {
        let run_len = end - start + 1;
        if run_len > max_gap {
            continue;
        }
        let left_active = start > 0 && active[start - 1];
        let right_active = end + 1 < active.len() && active[end + 1];
        if left_active && right_active {
            for slot in active.iter_mut().take(end + 1).skip(start) {
                *slot = true;
            }
        }
    }
}

fn inactive_runs(active: &[bool]) -> Vec<(usize, usize)> {
    runs_matching(active, false)
}

fn active_runs(active: &[bool]) -> Vec<(usize, usize)> {
    runs_matching(active, true)
}

fn runs_matching(flags: &[bool], want: bool) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut k = 0;
    while k < flags.len() {
        if flags[k] != want {
            k += 1;
            continue;
        }
        let start = k;
        while k < flags.len() && flags[k] == want {
            k += 1;
        }
        runs.push((start, k - 1));
    }
    runs
}

/// Corrected flows for a whole grid, with per-minute episode annotations.
///
/// Outside any episode, `i_k = a_k`, `o_k = b_k`, `q_k = 0`, matching the
/// "zero-queue assumption" spec §4.5 documents as a trade-off: residual
/// imbalance outside an episode's buffered window is attributed to
/// measurement noise and left uncorrected.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeReconciliation {
    pub i: Vec<f64>,
    pub o: Vec<f64>,
    pub q: Vec<f64>,
    pub episode_id: Vec<Option<u32>>,
    pub in_episode: Vec<bool>,
}

/// A group of one or more episodes whose buffered windows overlap, unioned
/// into a single interval to present to the QP backend as one call.
///
/// Touching-but-not-overlapping episodes (one ends the minute before the
/// next starts) are kept as separate groups — only a *shared* index forces
/// coalescing, per spec §4.5.
fn group_overlapping(episodes: &[Episode]) -> Vec<(usize, usize, Vec<Episode>)> {
    let mut groups: Vec<(usize, usize, Vec<Episode>)> = Vec::new();
    for &ep in episodes {
        match groups.last_mut() {
            Some((_, group_end, members)) if ep.start <= *group_end => {
                *group_end = (*group_end).max(ep.end);
                members.push(ep);
            }
            _ => groups.push((ep.start, ep.end, vec![ep])),
        }
    }
    groups
}

/// Detect episodes and reconcile each (possibly coalesced) window
/// independently, composing the results back onto the full minute grid.
///
/// This is the C2 -> C3 half of the orchestrator (spec §4.5 steps 1-2);
/// callers needing the whole pipeline (including C1 and C4) go through
/// [`crate::estimate_queue`].
pub fn reconcile_by_episodes(
    grid: &MinuteGrid,
    reconcile_config: &ReconcileConfig,
    episode_config: &EpisodeDetectConfig,
    solver: &dyn QpSolver,
) -> Result<EpisodeReconciliation, QueueError> {
    let n = grid.len();
    let mut out = EpisodeReconciliation {
        i: grid.in_count.clone(),
        o: grid.out_count.clone(),
        q: vec![0.0; n],
        episode_id: vec![None; n],
        in_episode: vec![false; n],
    };

    let episodes = detect_episodes(grid, episode_config)?;
    if episodes.is_empty() {
        return Ok(out);
    }

    let groups = group_overlapping(&episodes);

    let solve_group = |group: &(usize, usize, Vec<Episode>)| -> Result<(usize, usize, crate::reconcile::ReconciledWindow), QueueError> {
        let (start, end, _) = group;
        let cfg = ReconcileConfig {
            q0: 0.0,
            ..reconcile_config.clone()
        };
        let window = reconcile_window(
            &grid.in_count[*start..=*end],
            &grid.out_count[*start..=*end],
            &cfg,
            solver,
        )?;
        Ok((*start, *end, window))
    };

    #[cfg(feature = "parallel")]
    let solved: Vec<Result<(usize, usize, crate::reconcile::ReconciledWindow), QueueError>> =
        groups.par_iter().map(solve_group).collect();
    #[cfg(not(feature = "parallel"))]
    let solved: Vec<Result<(usize, usize, crate::reconcile::ReconciledWindow), QueueError>> =
        groups.iter().map(solve_group).collect();

    for result in solved {
        let (start, end, window) = result?;
        out.i[start..=end].copy_from_slice(&window.i);
        out.o[start..=end].copy_from_slice(&window.o);
        out.q[start..=end].copy_from_slice(&window.q);
    }

    // Episode-id annotation is independent of the (possibly coalesced)
    // solve groups: written in ascending episode order, so a later episode
    // overwrites an earlier one's tag on any index they still share after
    // coalescing (matches the original's encounter-order write).
    for ep in &episodes {
        for k in ep.start..=ep.end {
            out.episode_id[k] = Some(ep.id);
            out.in_episode[k] = true;
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn grid_from_counts(in_count: Vec<f64>, out_count: Vec<f64>) -> MinuteGrid {
        let t0: DateTime<Utc> = "2026-01-01T00:00:00Z".parse().unwrap();
        let n = in_count.len();
        let timestamps = (0..n).map(|k| t0 + chrono::Duration::minutes(k as i64)).collect();
        MinuteGrid {
            timestamps,
            in_count,
            out_count,
        }
    }

    #[test]
    fn no_activity_yields_no_episodes() {
        let grid = grid_from_counts(vec![0.0; 60], vec![0.0; 60]);
        let episodes = detect_episodes(&grid, &EpisodeDetectConfig::default()).unwrap();
        assert!(episodes.is_empty());
    }

    #[test]
    fn short_spike_is_filtered() {
        let mut inc = vec![0.0; 30];
        let mut outc = vec![0.0; 30];
        inc[10] = 1.0;
        outc[11] = 1.0;
        let grid = grid_from_counts(inc, outc);
        let cfg = EpisodeDetectConfig {
            min_active_minutes: 5,
            min_episode_minutes: 20,
            buffer_minutes: 2,
            ..Default::default()
        };
        let episodes = detect_episodes(&grid, &cfg).unwrap();
        assert!(episodes.is_empty());
    }

    #[test]
    fn gap_bridging_only_bridges_interior_runs() {
        // active, gap(2), active, gap(2) at the tail — only the interior gap bridges.
        let mut active = vec![false; 10];
        active[0] = true;
        active[1] = true;
        active[4] = true;
        active[5] = true;
        let mut flags = active.clone();
        bridge_gaps(&mut flags, 3);
        // indices 2,3 are interior (between two active runs) -> bridged
        assert!(flags[2] && flags[3]);
        // indices 6..9 form a trailing inactive run -> never bridged
        assert!(!flags[6] && !flags[9]);
    }

    #[test]
    fn buffer_expands_and_clamps_to_grid_bounds() {
        let mut inc = vec![0.0; 20];
        let outc = vec![0.0; 20];
        for slot in inc.iter_mut().take(8).skip(2) {
            *slot = 2.0;
        }
        let grid = grid_from_counts(inc, outc);
        let cfg = EpisodeDetectConfig {
            min_active_minutes: 3,
            min_episode_minutes: 1,
            buffer_minutes: 100,
            max_gap_minutes: 0,
            active_threshold: 1.0,
        };
        let episodes = detect_episodes(&grid, &cfg).unwrap();
        assert_eq!(episodes.len(), 1);
        assert_eq!(episodes[0].start, 0);
        assert_eq!(episodes[0].end, 19);
    }

    #[test]
    fn group_overlapping_merges_only_shared_indices() {
        let touching = vec![
            Episode { id: 1, start: 0, end: 9 },
            Episode { id: 2, start: 10, end: 19 },
        ];
        assert_eq!(group_overlapping(&touching).len(), 2);

        let overlapping = vec![
            Episode { id: 1, start: 0, end: 10 },
            Episode { id: 2, start: 8, end: 19 },
        ];
        let groups = group_overlapping(&overlapping);
        assert_eq!(groups.len(), 1);
        assert_eq!((groups[0].0, groups[0].1), (0, 19));
    }

    #[test]
    fn outside_episodes_flows_pass_through_unchanged() {
        use crate::reconcile::OsqpSolver;
        let mut inc = vec![0.0; 40];
        let mut outc = vec![0.0; 40];
        for k in 10..30 {
            inc[k] = 2.0;
            outc[k] = 2.0;
        }
        let grid = grid_from_counts(inc.clone(), outc.clone());
        let cfg = EpisodeDetectConfig {
            buffer_minutes: 2,
            min_episode_minutes: 5,
            ..Default::default()
        };
        let rec = reconcile_by_episodes(&grid, &ReconcileConfig::default(), &cfg, &OsqpSolver)
            .unwrap();
        assert!(!rec.in_episode[0]);
        assert_eq!(rec.i[0], inc[0]);
        assert_eq!(rec.o[0], outc[0]);
        assert_eq!(rec.q[0], 0.0);
        assert!(rec.in_episode[15]);
        assert_eq!(rec.episode_id[15], Some(1));
    }
}
