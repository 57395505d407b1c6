//! Reconstructs a physically consistent queue-occupancy and flow time
//! series from noisy per-minute entry/exit counts.
//!
//! Pipeline (spec §2): minute-flow builder (C1) -> episode detector (C2) ->
//! QP reconciler (C3, per episode) -> FIFO wait reconstructor (C4) ->
//! orchestrator (C5, this module's [`estimate_queue`]).

pub mod episodes;
pub mod error;
pub mod fifo;
pub mod grid;
pub mod reconcile;

pub use episodes::{EpisodeDetectConfig, EpisodeReconciliation};
pub use error::QueueError;
pub use fifo::{FifoConfig, fifo_wait_series};
pub use grid::MinuteGrid;
pub use reconcile::{OsqpSolver, QpSolver, ReconcileConfig};

use chrono::{DateTime, Utc};
use tracing::info;

/// Options for the public `estimate_queue` entrypoint (spec §6).
#[derive(Debug, Clone)]
pub struct EstimateQueueOptions {
    /// Column name carrying entry timestamps, for diagnostics only (the
    /// core here takes already-split `in`/`out` slices; a table-shaped
    /// caller resolves this name to a slice before calling in).
    pub in_timestamp_column: String,
    pub out_timestamp_column: String,
    pub use_episode_splitting: bool,
    pub include_fifo_wait: bool,
    pub reconcile: ReconcileConfig,
    pub episodes: EpisodeDetectConfig,
    pub fifo: FifoConfig,
}

impl Default for EstimateQueueOptions {
    fn default() -> Self {
        Self {
            in_timestamp_column: "timestamp".to_string(),
            out_timestamp_column: "timestamp".to_string(),
            use_episode_splitting: true,
            include_fifo_wait: true,
            reconcile: ReconcileConfig::default(),
            episodes: EpisodeDetectConfig::default(),
            fifo: FifoConfig::default(),
        }
    }
}

impl EstimateQueueOptions {
    fn validate(&self) -> Result<(), QueueError> {
        self.reconcile.validate()?;
        if self.use_episode_splitting {
            self.episodes.validate()?;
        }
        Ok(())
    }
}

/// The user-facing output table (spec §6). One row per minute of the dense
/// grid, indexed by `timestamps[k]`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueTable {
    pub timestamps: Vec<DateTime<Utc>>,
    /// `Pax i kö`: corrected end-of-minute occupancy.
    pub occupancy: Vec<f64>,
    /// `Pax in i kö`: corrected entries.
    pub entries: Vec<f64>,
    /// `Pax ur kö`: corrected exits.
    pub exits: Vec<f64>,
    /// `Väntetid`: FIFO wait in minutes. `None` column when
    /// `include_fifo_wait` was false; `Some(vec![...])` otherwise, with
    /// per-minute `None` where the wait is undefined.
    pub wait_minutes: Option<Vec<Option<f64>>>,
}

impl QueueTable {
    fn empty() -> Self {
        Self {
            timestamps: Vec::new(),
            occupancy: Vec::new(),
            entries: Vec::new(),
            exits: Vec::new(),
            wait_minutes: None,
        }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// The debug variant of [`QueueTable`] (spec §6 "Debug schema"): adds
/// measured series and per-episode diagnostic columns.
#[derive(Debug, Clone, PartialEq)]
pub struct DebugTable {
    pub timestamps: Vec<DateTime<Utc>>,
    pub in_count_measured: Vec<f64>,
    pub out_count_measured: Vec<f64>,
    pub occupancy: Vec<f64>,
    pub entries: Vec<f64>,
    pub exits: Vec<f64>,
    pub episode_id: Vec<Option<u32>>,
    pub in_episode: Vec<bool>,
    pub wait_minutes: Option<Vec<Option<f64>>>,
}

impl DebugTable {
    fn empty() -> Self {
        Self {
            timestamps: Vec::new(),
            in_count_measured: Vec::new(),
            out_count_measured: Vec::new(),
            occupancy: Vec::new(),
            entries: Vec::new(),
            exits: Vec::new(),
            episode_id: Vec::new(),
            in_episode: Vec::new(),
            wait_minutes: None,
        }
    }
}

/// Public entrypoint (spec §6): maps raw entry/exit timestamp streams into
/// the reconstruction pipeline and returns the user-facing table.
///
/// Timestamps must be RFC 3339 strings; malformed entries are dropped
/// silently by C1 (spec §4.1). Empty inputs are not an error: they yield a
/// zero-row table with the correct schema.
pub fn estimate_queue(
    in_timestamps: &[String],
    out_timestamps: &[String],
    options: &EstimateQueueOptions,
) -> Result<QueueTable, QueueError> {
    Ok(estimate_queue_impl(in_timestamps, out_timestamps, options, false)?.0)
}

/// Like [`estimate_queue`], but also returns the [`DebugTable`] with
/// measured series and episode diagnostics (spec §6).
pub fn estimate_queue_with_debug(
    in_timestamps: &[String],
    out_timestamps: &[String],
    options: &EstimateQueueOptions,
) -> Result<(QueueTable, DebugTable), QueueError> {
    let (queue, debug) = estimate_queue_impl(in_timestamps, out_timestamps, options, true)?;
    Ok((queue, debug.expect("debug requested")))
}

fn estimate_queue_impl(
    in_timestamps: &[String],
    out_timestamps: &[String],
    options: &EstimateQueueOptions,
    want_debug: bool,
) -> Result<(QueueTable, Option<DebugTable>), QueueError> {
    options.validate()?;

    let grid = grid::build_minute_grid(
        in_timestamps,
        out_timestamps,
        &options.in_timestamp_column,
        &options.out_timestamp_column,
    );

    if grid.is_empty() {
        let debug = want_debug.then(DebugTable::empty);
        return Ok((QueueTable::empty(), debug));
    }

    let solver = OsqpSolver;
    let (i, o, q, episode_id, in_episode) = if options.use_episode_splitting {
        let rec = episodes::reconcile_by_episodes(&grid, &options.reconcile, &options.episodes, &solver)?;
        (rec.i, rec.o, rec.q, rec.episode_id, rec.in_episode)
    } else {
        let n = grid.len();
        let window = reconcile::reconcile_window(&grid.in_count, &grid.out_count, &options.reconcile, &solver)?;
        (window.i, window.o, window.q, vec![None; n], vec![false; n])
    };

    let wait = options
        .include_fifo_wait
        .then(|| fifo::fifo_wait_series(&i, &o, &episode_id, &options.fifo))
        .transpose()?;

    info!(
        minutes = grid.len(),
        episodes = episode_id.iter().filter_map(|id| *id).collect::<std::collections::HashSet<_>>().len(),
        "reconstructed queue series"
    );

    let queue = QueueTable {
        timestamps: grid.timestamps.clone(),
        occupancy: q.clone(),
        entries: i.clone(),
        exits: o.clone(),
        wait_minutes: wait.clone(),
    };

    let debug = want_debug.then(|| DebugTable {
        timestamps: grid.timestamps.clone(),
        in_count_measured: grid.in_count.clone(),
        out_count_measured: grid.out_count.clone(),
        occupancy: q,
        entries: i,
        exits: o,
        episode_id,
        in_episode,
        wait_minutes: wait,
    });

    Ok((queue, debug))
}
