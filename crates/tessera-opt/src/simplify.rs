//! Flat index simplification.
//!
//! Combines pairs of indices whose strides form a perfect nesting
//! (`stride_i == range_j * stride_j` across every access), collapsing
//! logically-split dimensions produced by reshapes back into one loop.

use tessera_ir::{FlatContraction, FlatTensorAccess};

/// Attempt one index combination; returns true if anything changed.
///
/// Callers rerun to a fixed point — the index set changes under the
/// iteration, so each successful fold restarts the scan.
pub fn simplify_flat(flat: &mut FlatContraction) -> bool {
    // Constraints reference indices positionally; folding under them is
    // not attempted.
    if !flat.constraints.is_empty() {
        return false;
    }
    let sz = flat.ranges.len();
    for i in 0..sz {
        let i_stride = flat.access[0].strides[i];
        if i_stride == 0 {
            continue;
        }
        for j in 0..sz {
            if i == j {
                continue;
            }
            let j_stride = flat.access[0].strides[j];
            if j_stride == 0 {
                continue;
            }
            if i_stride != flat.ranges[j] as i64 * j_stride {
                continue;
            }
            let is_safe = |a: &FlatTensorAccess| {
                let perfect_match = a.strides[i] == i_stride && a.strides[j] == j_stride;
                let both_zeros = a.strides[i] == 0 && a.strides[j] == 0;
                perfect_match || both_zeros
            };
            let all_good = flat.access[1..].iter().all(|a| is_safe(a))
                && flat.post_op_inputs.values().all(|a| is_safe(a));
            if !all_good {
                continue;
            }

            log::trace!(
                "simplify_flat: combining {} and {}",
                flat.names[i],
                flat.names[j]
            );
            log::trace!("pre:\n{flat}");
            flat.names[j] = format!("{}_{}", flat.names[i], flat.names[j]);
            flat.names.remove(i);
            let outer_range = flat.ranges[i];
            flat.ranges[j] *= outer_range;
            flat.ranges.remove(i);
            for a in &mut flat.access {
                a.strides.remove(i);
            }
            for a in flat.post_op_inputs.values_mut() {
                a.strides.remove(i);
            }
            log::trace!("post:\n{flat}");
            return true;
        }
    }
    false
}

/// Rerun [`simplify_flat`] until no further fold applies.
pub fn simplify_to_fixed_point(flat: &mut FlatContraction) {
    while simplify_flat(flat) {}
}
