//! Output-coverage detection and prefill kernels.
//!
//! A contraction that does not write every element of its output needs
//! the output initialized first: either zeroed or broadcast-copied from
//! a default tensor. `needs_zero` decides; the prefill constructors
//! build the descriptors the driver emits ahead of the contraction.

use tessera_ir::{FlatContraction, TensorShape};
use tessera_opt::HardwareSettings;

use crate::kernel::{KernelInfo, KernelKind};

/// True if the aggregation loop leaves part of the output unwritten.
///
/// Any of: a nonzero output offset, a negative output stride, a
/// constraint touching only output indices (some positions are skipped
/// outright), or nonzero-stride output dimensions that do not pack the
/// full `[0, global_index_limit)` range densely.
pub fn needs_zero(flat: &FlatContraction) -> bool {
    let out = &flat.access[0];
    if out.offset != 0 {
        return true;
    }
    let mut out_pattern: Vec<(i64, u64)> = Vec::new();
    for i in 0..flat.names.len() {
        let stride = out.strides[i];
        if stride == 0 {
            continue;
        }
        if stride < 0 {
            // Don't try to be fancy, fall back.
            return true;
        }
        out_pattern.push((stride, flat.ranges[i]));
    }
    for fc in &flat.constraints {
        let output_only = (0..flat.names.len()).all(|i| fc.lhs[i] == 0 || out.strides[i] != 0);
        if output_only {
            return true;
        }
    }
    out_pattern.sort_unstable();
    let mut curskip: u64 = 1;
    for (stride, range) in out_pattern {
        if curskip != stride as u64 {
            return true;
        }
        curskip *= range;
    }
    curskip != out.global_index_limit
}

/// A prefill kernel writing zeros over `output`.
pub fn zero_kernel(
    shape: &TensorShape,
    output: &str,
    kname: String,
    settings: &HardwareSettings,
) -> KernelInfo {
    let mut ki = KernelInfo::new(kname, KernelKind::Zero, settings);
    ki.outputs.push(output.to_string());
    ki.key = format!("zero:{shape}");
    ki.tot_bytes = shape.byte_size();
    ki.info.ops.push(format!("{output} = zero()"));
    ki.info.bytes = ki.tot_bytes;
    ki
}

/// A prefill kernel broadcast-copying `default` over `output`.
pub fn copy_kernel(
    shape: &TensorShape,
    output: &str,
    default: &str,
    kname: String,
    settings: &HardwareSettings,
) -> KernelInfo {
    let mut ki = KernelInfo::new(kname, KernelKind::Copy, settings);
    ki.inputs.push(default.to_string());
    ki.outputs.push(output.to_string());
    ki.key = format!("copy:{shape}");
    ki.tot_bytes = 2 * shape.byte_size();
    ki.info.ops.push(format!("{output} = copy({default})"));
    ki.info.bytes = ki.tot_bytes;
    ki
}
