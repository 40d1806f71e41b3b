//! Special-function kernels.
//!
//! Special functions (PRNG stepping, gather/scatter) get dedicated
//! kernels and never fuse. The driver resolves the PRNG triple before
//! calling in; this module only packages the descriptor.

use tessera_ir::{Binding, Bindings, Op};
use tessera_opt::HardwareSettings;

use crate::error::GenerateError;
use crate::kernel::{KernelInfo, KernelKind};

/// Build the kernel descriptor for a special op.
///
/// For a `prng_step` whose params were extended with its state and value
/// outputs, those two names become the kernel outputs; the tuple
/// variable itself is never materialized.
pub fn special_kernel(
    op: &Op,
    vars: &Bindings,
    kname: String,
    settings: &HardwareSettings,
) -> Result<KernelInfo, GenerateError> {
    let func = op
        .function()
        .ok_or_else(|| GenerateError::Internal(format!("`{}` is not a function op", op.output)))?;

    let mut ki = KernelInfo::new(kname, KernelKind::Special, settings);
    ki.key = format!("special:{}", func.name);
    ki.info.ops.push(op.to_string());

    if func.name == "prng_step" && func.params.len() >= 2 {
        ki.outputs
            .extend(func.params[func.params.len() - 2..].iter().cloned());
    } else {
        ki.outputs.push(op.output.clone());
    }

    for input in &op.inputs {
        if let Some(Binding::Tensor(shape)) = vars.get(input) {
            ki.inputs.push(input.clone());
            ki.tot_bytes += shape.byte_size();
        }
    }
    for output in &ki.outputs {
        if let Some(Binding::Tensor(shape)) = vars.get(output) {
            ki.tot_bytes += shape.byte_size();
            ki.tot_flops += shape.elem_size();
        }
    }
    ki.info.bytes = ki.tot_bytes;
    ki.info.flops = ki.tot_flops;

    log::debug!("special {}: {}", ki.name, op);
    Ok(ki)
}
