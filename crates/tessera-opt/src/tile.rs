//! Tile-size optimization.
//!
//! Scores candidate tile tuples for a flat contraction against a
//! hardware description. The score combines work-group occupancy with a
//! roofline balance term (arithmetic intensity against the hardware's
//! ridge point); tiles that overflow shared memory or the register file
//! are disqualified outright.

use std::cmp::Ordering;
use std::fmt;

use itertools::Itertools;

use tessera_ir::{FlatContraction, FlatTensorAccess};

/// Hardware description consumed by the vectorizer and tile search.
#[derive(Clone, Debug, PartialEq)]
pub struct HardwareSettings {
    /// Threads per work group the device prefers.
    pub threads: u64,
    /// Preferred vector width in elements.
    pub vec_size: u64,
    /// Memory transaction width in bytes.
    pub mem_width: u64,
    /// Shared memory available per work group, bytes.
    pub max_mem: u64,
    /// Output registers available per work group, elements.
    pub max_regs: u64,
    /// Work groups needed to keep the device busy.
    pub goal_groups: u64,
    /// Arithmetic intensity (flops/byte) at the compute/memory ridge.
    pub goal_flops_per_byte: f64,
}

impl Default for HardwareSettings {
    fn default() -> Self {
        Self {
            threads: 256,
            vec_size: 4,
            mem_width: 128,
            max_mem: 32 * 1024,
            max_regs: 16 * 1024,
            goal_groups: 16,
            goal_flops_per_byte: 50.0,
        }
    }
}

impl HardwareSettings {
    /// Settings for a named device class.
    pub fn for_target(target: &str) -> Self {
        match target {
            "gpu-large" => Self {
                threads: 1024,
                vec_size: 4,
                mem_width: 128,
                max_mem: 48 * 1024,
                max_regs: 64 * 1024,
                goal_groups: 64,
                goal_flops_per_byte: 100.0,
            },
            "embedded" => Self {
                threads: 64,
                vec_size: 2,
                mem_width: 64,
                max_mem: 16 * 1024,
                max_regs: 4 * 1024,
                goal_groups: 4,
                goal_flops_per_byte: 20.0,
            },
            _ => Self::default(),
        }
    }
}

impl fmt::Display for HardwareSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "threads={} vec={} mem_width={} max_mem={} max_regs={} goal_groups={}",
            self.threads, self.vec_size, self.mem_width, self.max_mem, self.max_regs,
            self.goal_groups
        )
    }
}

/// Estimated execution statistics of a flat contraction under one tile.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PerfStats {
    /// Work groups launched (output tiles).
    pub work_groups: u64,
    /// Aggregation tile steps per work group.
    pub inner_loops: u64,
    /// Bytes read per inner loop per work group.
    pub mem_read: u64,
    /// Bytes written per work group.
    pub mem_write: u64,
    /// Total arithmetic operations for the whole kernel.
    pub true_ops: u64,
    /// Input tile footprint held in shared memory, bytes.
    pub shared_mem: u64,
    /// Output tile elements held in registers.
    pub out_regs: u64,
}

fn round_up(value: u64, to: u64) -> u64 {
    if to == 0 {
        return value;
    }
    value.div_ceil(to) * to
}

/// Bytes one access touches per tile step.
fn tile_footprint(a: &FlatTensorAccess, tile: &[u64], mem_width: u64) -> u64 {
    let elems: u64 = a
        .strides
        .iter()
        .zip(tile)
        .filter(|(&s, _)| s != 0)
        .map(|(_, &t)| t)
        .product();
    round_up(elems * a.vector * u64::from(a.ty.width), mem_width)
}

/// Compute [`PerfStats`] for `flat` under the given tile sizes.
pub fn compute_tile_stats(
    settings: &HardwareSettings,
    flat: &FlatContraction,
    tile: &[u64],
) -> PerfStats {
    let mut stats = PerfStats {
        work_groups: 1,
        inner_loops: 1,
        ..Default::default()
    };

    let mut out_elems = flat.agg_vec;
    let mut out_tile_elems = flat.agg_vec;
    for (k, (&range, &t)) in flat.ranges.iter().zip(tile).enumerate() {
        let t = t.clamp(1, range.max(1));
        let steps = range.div_ceil(t);
        if flat.access[0].strides[k] != 0 {
            stats.work_groups *= steps;
            out_elems *= range;
            out_tile_elems *= t;
        } else {
            stats.inner_loops *= steps;
        }
    }

    stats.mem_write = tile_footprint(&flat.access[0], tile, settings.mem_width);
    for a in flat.access[1..].iter().chain(flat.post_op_inputs.values()) {
        stats.mem_read += tile_footprint(a, tile, settings.mem_width);
    }
    stats.shared_mem = stats.mem_read;
    stats.out_regs = out_tile_elems;

    let has_agg = flat
        .access
        .first()
        .map(|a| a.strides.iter().any(|&s| s == 0))
        .unwrap_or(false);
    if flat.generate_contraction && has_agg {
        // One combine and one aggregate per point of the full space.
        let space: u64 = flat.ranges.iter().product();
        stats.true_ops += 2 * space * flat.agg_vec;
    }
    stats.true_ops += flat.post_ops.len() as u64 * out_elems;

    stats
}

/// Score a tile; higher is better, zero means infeasible.
fn score_tile(settings: &HardwareSettings, stats: &PerfStats) -> f64 {
    if stats.shared_mem > settings.max_mem || stats.out_regs > settings.max_regs {
        return 0.0;
    }
    let occupancy = (stats.work_groups as f64 / settings.goal_groups as f64).min(1.0);
    let util = if stats.out_regs >= settings.threads {
        settings.threads as f64 / stats.out_regs as f64
    } else {
        stats.out_regs as f64 / settings.threads as f64
    };
    let bytes =
        stats.work_groups * (stats.inner_loops * stats.mem_read + stats.mem_write);
    let balance = if bytes == 0 {
        0.0
    } else {
        (stats.true_ops as f64 / bytes as f64 / settings.goal_flops_per_byte).min(1.0)
    };
    occupancy * util * (0.25 + 0.75 * balance)
}

fn pow2_candidates(range: u64) -> Vec<u64> {
    let mut out = Vec::new();
    let mut v = 1u64;
    while v <= range {
        out.push(v);
        v *= 2;
    }
    if out.last() != Some(&range) {
        out.push(range);
    }
    out
}

/// Largest candidate grid an exhaustive search will walk.
const MAX_SEARCH: usize = 1 << 16;

/// Default per-index tile used when searching is skipped.
const FAST_TILE: u64 = 32;

/// Enumerate and score tile candidates for `flat`.
///
/// Returns `(score, tile)` pairs sorted ascending, best last; callers
/// walk from the back for as many trials as they want. With `fast` set
/// (single-trial compilations) only the clamped default tile is scored.
pub fn optimize_tiles(
    settings: &HardwareSettings,
    flat: &FlatContraction,
    fast: bool,
) -> Vec<(f64, Vec<u64>)> {
    if flat.names.is_empty() {
        return vec![(0.0, Vec::new())];
    }

    let fast_tile: Vec<u64> = flat.ranges.iter().map(|&r| r.min(FAST_TILE)).collect();
    let grid_size: usize = flat
        .ranges
        .iter()
        .map(|&r| pow2_candidates(r).len())
        .product();
    let tiles: Vec<Vec<u64>> = if fast {
        vec![fast_tile]
    } else if grid_size > MAX_SEARCH {
        log::warn!(
            "tile search space for {} has {grid_size} candidates; falling back to the default tile",
            flat.output
        );
        vec![fast_tile]
    } else {
        flat.ranges
            .iter()
            .map(|&r| pow2_candidates(r))
            .multi_cartesian_product()
            .collect()
    };
    let mut scored: Vec<(f64, Vec<u64>)> = tiles
        .into_iter()
        .map(|tile| {
            let stats = compute_tile_stats(settings, flat, &tile);
            (score_tile(settings, &stats), tile)
        })
        .collect();

    scored.sort_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.1.cmp(&b.1))
    });
    scored
}
