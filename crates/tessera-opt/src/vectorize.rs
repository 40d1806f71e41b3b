//! Aggregation vectorization.
//!
//! Folds the output's unit-stride index into vector lanes when every
//! access can follow: an access either does not advance along the index
//! (stride 0, read as a splat) or advances by exactly one element with
//! all its other strides, its offset, and its limit aligned to the lane
//! width. Folded accesses move to vector units.

use tessera_ir::{FlatContraction, FlatTensorAccess};

/// Attempt to vectorize `flat` at exactly `vec_size` lanes.
///
/// Returns true on success, leaving `flat.agg_vec == vec_size`. Callers
/// retry with halved widths until one fits or the width reaches 1.
pub fn vectorize(flat: &mut FlatContraction, vec_size: u64) -> bool {
    if vec_size <= 1 || flat.agg_vec != 1 || flat.access.is_empty() {
        return false;
    }
    let Some(lane) = (0..flat.names.len()).find(|&k| flat.access[0].strides[k] == 1) else {
        return false;
    };
    if flat.ranges[lane] % vec_size != 0 {
        return false;
    }

    let lane_ok = |a: &FlatTensorAccess| match a.strides[lane] {
        0 => true,
        1 => {
            a.offset % vec_size as i64 == 0
                && a.global_index_limit % vec_size == 0
                && a.strides
                    .iter()
                    .enumerate()
                    .all(|(k, &s)| k == lane || s % vec_size as i64 == 0)
        }
        _ => false,
    };
    if !flat.access.iter().all(|a| lane_ok(a)) || !flat.post_op_inputs.values().all(|a| lane_ok(a))
    {
        return false;
    }

    log::trace!(
        "vectorize: folding {} by {vec_size} for {}",
        flat.names[lane],
        flat.output
    );
    flat.ranges[lane] /= vec_size;
    let fold = |a: &mut FlatTensorAccess| {
        if a.strides[lane] == 1 {
            a.vector = vec_size;
            a.offset /= vec_size as i64;
            a.global_index_limit /= vec_size;
            for (k, s) in a.strides.iter_mut().enumerate() {
                if k != lane {
                    *s /= vec_size as i64;
                }
            }
        }
    };
    for a in &mut flat.access {
        fold(a);
    }
    for a in flat.post_op_inputs.values_mut() {
        fold(a);
    }
    flat.agg_vec = vec_size;
    true
}
