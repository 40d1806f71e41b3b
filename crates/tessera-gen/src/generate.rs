//! The kernel-generation driver.
//!
//! Walks a program in source order and emits one kernel per contraction
//! seed (plus prefills), one per special function, and one per group of
//! connected elementwise ops, in ascending seed order — the execution
//! order the runtime must respect.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use tessera_ir::{
    bind_program, Binding, Bindings, Contraction, FlatContraction, FlatTensorAccess, Function,
    OpKind, Poly, Program, ShapeMap, TensorShape, UseDef,
};
use tessera_opt::{
    compute_tile_stats, flatten_contraction, optimize_tiles, simplify_to_fixed_point, vectorize,
    HardwareSettings,
};

use crate::error::GenerateError;
use crate::kernel::{ConstraintInfo, ContractionInfo, IndexInfo, KernelInfo, KernelKind, KernelList};
use crate::rewrite::VarRewrites;
use crate::special::special_kernel;
use crate::unify::{unify_with_downstream, UnifyEnv};
use crate::zero::{copy_kernel, needs_zero, zero_kernel};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

/// Compile `prog` into an ordered kernel list.
///
/// `inputs` and `outputs` name (and shape) the externally visible
/// variables; `id` seeds the kernel names; `tile_trials` bounds how many
/// ranked tilings each kernel carries.
pub fn generate_program(
    prog: &Program,
    inputs: &ShapeMap,
    outputs: &ShapeMap,
    settings: &HardwareSettings,
    id: &str,
    tile_trials: usize,
) -> Result<KernelList, GenerateError> {
    log::debug!("compiling program:\n{prog}");
    let kid = kernel_id(id);
    let mut prog = prog.clone();
    let vars = bind_program(&prog, inputs, outputs)?;
    let ud = UseDef::new(&prog);

    let mut r = KernelList::default();
    let mut computed: BTreeSet<usize> = BTreeSet::new();
    let mut knum = 0usize;
    let mut last_update = Instant::now();

    for i in 0..prog.ops.len() {
        if last_update.elapsed() >= PROGRESS_INTERVAL {
            log::info!("analyzing ops: {i} of {} operations complete", prog.ops.len());
            last_update = Instant::now();
        }
        let op = prog.ops[i].clone();
        let mut war_safe_reads: BTreeSet<String> = BTreeSet::new();

        match &op.kind {
            OpKind::Contraction(c) => {
                log::trace!("lowering contraction {op}");
                let tshapes = spec_shapes(c, &vars)?;
                let (mut flat, out_poly) = flatten_contraction(c, &tshapes)?;
                flat.output = op.output.clone();

                let kname = next_kname(&kid, &mut knum);
                if needs_zero(&flat) {
                    // Partial coverage: prefill the output and skip
                    // fusion with downstream ops entirely.
                    let prefill = match &c.use_default {
                        Some(d) => copy_kernel(
                            &tshapes[0],
                            &op.output,
                            d,
                            format!("copy_{kname}"),
                            settings,
                        ),
                        None => {
                            zero_kernel(&tshapes[0], &op.output, format!("zero_{kname}"), settings)
                        }
                    };
                    r.kernels.push(prefill);
                    flat.kernel_outputs.push(op.output.clone());
                } else {
                    let env = UnifyEnv {
                        prog: &prog,
                        vars: &vars,
                        ud: &ud,
                        inputs,
                        outputs,
                    };
                    unify_with_downstream(
                        &env,
                        &mut flat,
                        i,
                        &out_poly,
                        &mut computed,
                        &mut r.var_rewrites,
                        &mut war_safe_reads,
                    )?;
                }
                contraction_wrap(
                    &mut r,
                    Some(c),
                    flat,
                    &kname,
                    settings,
                    &vars,
                    tile_trials,
                    war_safe_reads,
                )?;
            }
            OpKind::Constant(_) => continue,
            OpKind::Function(f) => {
                if computed.contains(&i) {
                    continue;
                }
                if f.is_special() {
                    handle_special(
                        &mut prog,
                        i,
                        &vars,
                        &mut computed,
                        &mut r,
                        &kid,
                        &mut knum,
                        settings,
                    )?;
                    continue;
                }

                // An elementwise op no earlier kernel absorbed: seed a
                // contractionless flat from its output shape. Every
                // subsequent fused op must match that shape anyway.
                let shape = vars
                    .get(&op.output)
                    .and_then(Binding::shape)
                    .ok_or_else(|| GenerateError::MissingShape(op.output.clone()))?;
                let mut flat = FlatContraction {
                    generate_contraction: false,
                    output: op.output.clone(),
                    ..Default::default()
                };
                let mut out_poly = Vec::with_capacity(shape.dims.len());
                for (idx, dim) in shape.dims.iter().enumerate() {
                    let name = format!("i{}", idx + 1);
                    out_poly.push(Poly::index(&name));
                    flat.names.push(name);
                    flat.ranges.push(dim.size);
                }
                let mut access = FlatTensorAccess::new(shape.elem, shape.elem_size());
                access.strides = shape.dims.iter().map(|d| d.stride).collect();
                flat.access.push(access);

                let env = UnifyEnv {
                    prog: &prog,
                    vars: &vars,
                    ud: &ud,
                    inputs,
                    outputs,
                };
                unify_with_downstream(
                    &env,
                    &mut flat,
                    i,
                    &out_poly,
                    &mut computed,
                    &mut r.var_rewrites,
                    &mut war_safe_reads,
                )?;
                let kname = next_kname(&kid, &mut knum);
                contraction_wrap(
                    &mut r,
                    None,
                    flat,
                    &kname,
                    settings,
                    &vars,
                    tile_trials,
                    war_safe_reads,
                )?;
            }
        }
    }

    // Only typing info for variables that cross kernel boundaries.
    for ki in &r.kernels {
        for name in ki.inputs.iter().chain(&ki.outputs) {
            if let Some(Binding::Tensor(shape)) = vars.get(name) {
                r.types.insert(name.clone(), shape.clone());
            }
        }
    }
    Ok(r)
}

/// Resolve the PRNG triple and emit the special kernel.
///
/// `prng_step` scans forward for the `prng_state`/`prng_value` consumers
/// of its tuple output and absorbs them: both present extends the step's
/// params with their outputs; state-only rewrites the state op in place
/// as an `ident` of the PRNG input; value-only is malformed; neither
/// drops the op entirely.
#[allow(clippy::too_many_arguments)]
fn handle_special(
    prog: &mut Program,
    i: usize,
    vars: &Bindings,
    computed: &mut BTreeSet<usize>,
    r: &mut KernelList,
    kid: &str,
    knum: &mut usize,
    settings: &HardwareSettings,
) -> Result<(), GenerateError> {
    let op = prog.ops[i].clone();
    let func = op
        .function()
        .ok_or_else(|| GenerateError::Internal(format!("`{}` is not a function op", op.output)))?;
    if func.name == "prng_state" || func.name == "prng_value" {
        return Err(GenerateError::OrphanPrng(op.output.clone()));
    }

    let mut dop = op.clone();
    if func.name == "prng_step" {
        let tup = &op.output;
        let mut sout: Option<String> = None;
        let mut vout: Option<String> = None;
        let mut sout_pos = 0usize;
        for j in (i + 1)..prog.ops.len() {
            let nop = &prog.ops[j];
            let Some(nf) = nop.function() else { continue };
            if nf.name == "prng_state" && nop.inputs.len() == 1 && nop.inputs[0] == *tup {
                sout = Some(nop.output.clone());
                sout_pos = j;
                computed.insert(j);
            } else if nf.name == "prng_value" && nop.inputs.len() == 1 && nop.inputs[0] == *tup {
                vout = Some(nop.output.clone());
                computed.insert(j);
            }
        }
        match (sout, vout) {
            (None, None) => return Ok(()),
            (Some(_), None) => {
                // State passes through untouched: turn the state op into
                // an identity of the PRNG input and let the main walk
                // pick it up as a plain elementwise op.
                let xop = &mut prog.ops[sout_pos];
                xop.kind = OpKind::Function(Function::new("ident"));
                xop.inputs[0] = op.inputs[0].clone();
                computed.remove(&sout_pos);
                return Ok(());
            }
            (None, Some(_)) => {
                return Err(GenerateError::PrngMissingState(op.output.clone()));
            }
            (Some(s), Some(v)) => {
                if let OpKind::Function(df) = &mut dop.kind {
                    df.params.push(s);
                    df.params.push(v);
                }
            }
        }
    }

    let kname = next_kname(kid, knum);
    r.kernels.push(special_kernel(&dop, vars, kname, settings)?);
    Ok(())
}

/// Simplify, vectorize, search tiles, and append the kernel descriptor.
#[allow(clippy::too_many_arguments)]
fn contraction_wrap(
    r: &mut KernelList,
    c: Option<&Contraction>,
    mut flat: FlatContraction,
    kname: &str,
    settings: &HardwareSettings,
    vars: &Bindings,
    tile_trials: usize,
    war_safe_reads: BTreeSet<String>,
) -> Result<(), GenerateError> {
    if !flat.generate_contraction && flat.post_ops.is_empty() {
        // Every op in the kernel was elided; nothing to emit.
        return Ok(());
    }

    let mut inputs = Vec::new();
    if let Some(c) = c {
        for spec in &c.specs[1..] {
            if !vars.contains_key(&spec.id) {
                return Err(GenerateError::MissingShape(spec.id.clone()));
            }
            inputs.push(spec.id.clone());
        }
    }

    simplify_to_fixed_point(&mut flat);
    let mut vec_size = settings.vec_size;
    while flat.agg_vec == 1 && vec_size > 1 {
        vectorize(&mut flat, vec_size);
        vec_size /= 2;
    }

    log::trace!("optimizing {kname}");
    let by_score = optimize_tiles(settings, &flat, tile_trials == 1);
    let mut primary: Option<KernelInfo> = None;
    for (_, tile) in by_score.iter().rev().take(tile_trials.max(1)) {
        let ki = build_kernel(kname, settings, c, &flat, tile, &inputs, vars, &r.var_rewrites);
        match &mut primary {
            None => primary = Some(ki),
            Some(p) => p.candidates.push(ki),
        }
    }
    let mut primary = primary
        .ok_or_else(|| GenerateError::Internal("tile search returned no candidates".into()))?;
    primary.war_safe_reads = war_safe_reads;
    r.kernels.push(primary);
    Ok(())
}

/// Package one (kernel, tile) pair, including the debug record.
#[allow(clippy::too_many_arguments)]
fn build_kernel(
    kname: &str,
    settings: &HardwareSettings,
    c: Option<&Contraction>,
    flat: &FlatContraction,
    tile: &[u64],
    inputs: &[String],
    vars: &Bindings,
    var_rewrites: &VarRewrites,
) -> KernelInfo {
    let kind = if c.is_some() {
        KernelKind::Contraction
    } else {
        KernelKind::Elementwise
    };
    let mut ki = KernelInfo::new(kname, kind, settings);
    ki.tile_size = tile.to_vec();
    ki.outputs = flat.kernel_outputs.clone();
    ki.key = flat.key_string();

    for input in inputs {
        if vars.get(input).is_some_and(Binding::is_tensor) {
            ki.inputs.push(var_rewrites.lookup(input).to_string());
        }
    }
    for name in flat.post_op_inputs.keys() {
        ki.inputs.push(var_rewrites.lookup(name).to_string());
    }

    let perf = compute_tile_stats(settings, flat, tile);
    ki.tot_bytes = perf.work_groups * (perf.inner_loops * perf.mem_read + perf.mem_write);
    ki.tot_flops = perf.true_ops;

    let mut info = ContractionInfo::default();
    if let Some(c) = c {
        info.ops.push(c.to_string());
    }
    for op in &flat.post_ops {
        info.ops.push(op.to_string());
    }
    for (idx, name) in flat.names.iter().enumerate() {
        info.accesses.push(IndexInfo {
            name: name.clone(),
            range: flat.ranges[idx],
            strides: flat.access.iter().map(|a| a.strides[idx]).collect(),
        });
    }
    for a in &flat.access {
        info.offsets.push(a.offset);
        info.vectors.push(a.vector);
    }
    for fc in &flat.constraints {
        info.constraints.push(ConstraintInfo {
            lhs: fc.lhs.clone(),
            rhs: fc.rhs,
        });
    }
    info.flops = ki.tot_flops;
    info.bytes = ki.tot_bytes;
    ki.info = info;

    log::debug!(
        "kernel {kname}: tile={:?} tot_flops={} tot_bytes={}",
        ki.tile_size,
        ki.tot_flops,
        ki.tot_bytes
    );
    ki
}

fn spec_shapes(c: &Contraction, vars: &Bindings) -> Result<Vec<TensorShape>, GenerateError> {
    c.specs
        .iter()
        .map(|spec| {
            vars.get(&spec.id)
                .and_then(Binding::shape)
                .cloned()
                .ok_or_else(|| GenerateError::MissingShape(spec.id.clone()))
        })
        .collect()
}

/// Canonicalize a caller-supplied program id into a C-identifier prefix.
fn kernel_id(id: &str) -> String {
    let mut kid = String::with_capacity("kernel_".len() + id.len());
    kid.push_str("kernel_");
    kid.extend(
        id.chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' }),
    );
    kid
}

fn next_kname(kid: &str, knum: &mut usize) -> String {
    let n = *knum;
    *knum += 1;
    format!("{kid}_{n}")
}
