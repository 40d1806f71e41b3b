//! Kernel unification.
//!
//! Fuses downstream elementwise ops into the kernel seeded at a
//! contraction (or at an orphan elementwise op). During the seed's
//! output phase a growing set of values is available; any later
//! elementwise op depending only on those values, program inputs, or
//! constants can run inside the same kernel. Pure shape-identity ops
//! (`reshape`/`ident`) are elided where legal, with their output names
//! recorded as aliases of their inputs.

use std::collections::{BTreeMap, BTreeSet};

use tessera_ir::{
    Binding, Bindings, FlatContraction, FlatTensorAccess, Poly, Program, ShapeMap, TensorShape,
    UseDef,
};

use crate::error::GenerateError;
use crate::rewrite::VarRewrites;

/// Read-only context shared by the unification passes.
pub(crate) struct UnifyEnv<'a> {
    pub prog: &'a Program,
    pub vars: &'a Bindings,
    pub ud: &'a UseDef,
    pub inputs: &'a ShapeMap,
    pub outputs: &'a ShapeMap,
}

fn different_size(a: &Binding, b: &Binding) -> bool {
    match (a.shape(), b.shape()) {
        (Some(a), Some(b)) => a.elem_size() != b.elem_size(),
        _ => true,
    }
}

/// Same element count, or broadcastable against the output by trailing
/// alignment with unit dimensions.
fn same_size_or_broadcast_compatible(input: &TensorShape, output: &TensorShape) -> bool {
    if input.elem_size() == output.elem_size() {
        return true;
    }
    if output.dims.len() < input.dims.len() {
        return false;
    }
    let off = output.dims.len() - input.dims.len();
    input
        .dims
        .iter()
        .zip(&output.dims[off..])
        .all(|(i, o)| i.size == 1 || i.size == o.size)
}

/// The fusion predicate: can op `test` join a kernel seeded at `root`?
fn can_unify(env: &UnifyEnv, root: usize, test: usize) -> bool {
    let root_op = &env.prog.ops[root];
    let test_op = &env.prog.ops[test];
    log::trace!(target: "tessera::unify", "testing {root_op} with {test_op}");
    let Some(f) = test_op.function() else {
        log::trace!(target: "tessera::unify", "  not an elementwise op");
        return false;
    };
    if f.is_special() {
        log::trace!(target: "tessera::unify", "  special functions never fuse");
        return false;
    }

    let (Some(root_out), Some(test_out)) =
        (env.vars.get(&root_op.output), env.vars.get(&test_op.output))
    else {
        return false;
    };
    if different_size(root_out, test_out) {
        log::trace!(
            target: "tessera::unify",
            "  {} differs in size from {}", root_op.output, test_op.output
        );
        return false;
    }
    let Some(root_shape) = root_out.shape() else {
        return false;
    };

    for input in &test_op.inputs {
        let Some(shape) = env.vars.get(input).and_then(Binding::shape) else {
            continue;
        };
        if !same_size_or_broadcast_compatible(shape, root_shape) {
            // The broadcast is not dimensionally compatible with the
            // kernel output loop; an elided reshape is hiding here, and
            // such consumers are rejected rather than repaired.
            log::trace!(
                target: "tessera::unify",
                "  input {input} is incompatible with the output shape"
            );
            return false;
        }
    }
    true
}

/// Close a candidate op backwards over its inputs. Every ancestor that
/// is not already sequenced, computed, or constant must itself satisfy
/// the fusion predicate; if any fails, the whole set is discarded.
fn candidate_set(
    env: &UnifyEnv,
    root: usize,
    start: usize,
    unified: &BTreeSet<usize>,
    computed: &BTreeSet<usize>,
) -> Option<BTreeSet<usize>> {
    let mut candidates = BTreeSet::from([start]);
    let mut frontier = vec![start];
    while let Some(c) = frontier.pop() {
        for input in &env.prog.ops[c].inputs {
            let Some(i) = env.ud.def_of(input) else {
                continue;
            };
            if i < root || unified.contains(&i) || candidates.contains(&i) || computed.contains(&i)
            {
                continue;
            }
            if env.prog.ops[i].is_constant() {
                continue;
            }
            if !can_unify(env, root, i) {
                return None;
            }
            candidates.insert(i);
            frontier.push(i);
        }
    }
    Some(candidates)
}

/// The set of ops fusable with the kernel seeded at `root`: forward
/// reachability over consumers, with each consumer's ancestry closed
/// backwards by [`candidate_set`].
fn connected_components(
    env: &UnifyEnv,
    root: usize,
    computed: &BTreeSet<usize>,
) -> BTreeSet<usize> {
    let mut unified = BTreeSet::from([root]);
    let mut frontier = vec![root];

    while let Some(u) = frontier.pop() {
        let Some(consumers) = env.ud.uses_of(&env.prog.ops[u].output) else {
            continue;
        };
        for &c_start in consumers {
            if unified.contains(&c_start)
                || computed.contains(&c_start)
                || !can_unify(env, root, c_start)
            {
                continue;
            }
            if let Some(candidates) = candidate_set(env, root, c_start, &unified, computed) {
                frontier.extend(candidates.iter().copied());
                unified.extend(candidates);
            }
        }
    }
    unified
}

/// Fuse downstream ops into `flat`, filling its post-op list, post-op
/// input accesses, and kernel outputs, and recording elisions in the
/// rewrite table. `out_poly` holds the output-index polynomials, one per
/// output dimension.
#[allow(clippy::too_many_arguments)]
pub(crate) fn unify_with_downstream(
    env: &UnifyEnv,
    flat: &mut FlatContraction,
    opidx: usize,
    out_poly: &[Poly],
    computed: &mut BTreeSet<usize>,
    var_rewrites: &mut VarRewrites,
    war_safe_reads: &mut BTreeSet<String>,
) -> Result<(), GenerateError> {
    let op = &env.prog.ops[opidx];

    let mut post_contraction_inputs: BTreeSet<String> = BTreeSet::new();
    let mut local_rewrites: BTreeMap<String, String> = BTreeMap::new();
    let kernel_inputs: BTreeSet<&str> = op.inputs.iter().map(String::as_str).collect();

    let unified_opidxs = connected_components(env, opidx, computed);

    for &uidx in &unified_opidxs {
        let unified_op = &env.prog.ops[uidx];
        let Some(func) = unified_op.function() else {
            continue;
        };

        // Elide reshape/ident where legal. If both pre- and post-
        // variables are program outputs, both must be written, so the op
        // stays. Likewise when copying a program input to a program
        // output. Otherwise the post-name becomes an alias of the
        // pre-name and no post-op is emitted.
        if func.name == "reshape" || func.name == "ident" {
            let first = unified_op.inputs.first().ok_or_else(|| {
                GenerateError::ReshapeMissingInput(unified_op.output.clone())
            })?;
            let in_shape = env
                .vars
                .get(first)
                .and_then(Binding::shape)
                .ok_or_else(|| GenerateError::ReshapeNonTensor(first.clone()))?;
            let out_shape = env
                .vars
                .get(&unified_op.output)
                .and_then(Binding::shape)
                .ok_or_else(|| GenerateError::ReshapeNonTensor(unified_op.output.clone()))?;
            if in_shape.byte_size() != out_shape.byte_size()
                || in_shape.elem_size() != out_shape.elem_size()
            {
                return Err(GenerateError::ReshapeSizeMismatch {
                    from: first.clone(),
                    to: unified_op.output.clone(),
                });
            }

            let input = var_rewrites.lookup(first).to_string();
            if !env.outputs.contains_key(&unified_op.output)
                || (!env.outputs.contains_key(&input) && !env.inputs.contains_key(&input))
            {
                log::trace!(
                    target: "tessera::unify",
                    "eliding {unified_op}; {} becomes {input}", unified_op.output
                );
                var_rewrites.insert(unified_op.output.clone(), &input);
                local_rewrites.insert(unified_op.output.clone(), input);
                continue;
            }
            log::trace!(target: "tessera::unify", "keeping {unified_op}");
        }

        log::trace!(target: "tessera::unify", "unifying {unified_op}");
        let mut copied = unified_op.clone();
        for input in &mut copied.inputs {
            if let Some(repl) = local_rewrites.get(input) {
                *input = repl.clone();
            }
            let defined_in_kernel = env
                .ud
                .def_of(input)
                .is_some_and(|d| unified_opidxs.contains(&d));
            let is_tensor = env.vars.get(input.as_str()).is_some_and(Binding::is_tensor);
            if is_tensor && !defined_in_kernel {
                war_safe_reads.insert(input.clone());
                post_contraction_inputs.insert(input.clone());
            }
        }
        flat.post_ops.push(copied);
    }

    // Output selection: a unified op's output is written iff it is not
    // already a kernel input and either the program needs it or some
    // consumer lies outside the unified set. Elided outputs surface as
    // their pre-variable.
    let mut kernel_outputs: BTreeSet<String> = BTreeSet::new();
    for &uidx in &unified_opidxs {
        let unified_op = &env.prog.ops[uidx];
        let resolved = var_rewrites.lookup(&unified_op.output);
        if kernel_inputs.contains(resolved) {
            continue;
        }
        let mut needed = env.outputs.contains_key(&unified_op.output);
        if !needed {
            if let Some(uses) = env.ud.uses_of(&unified_op.output) {
                needed = uses.iter().any(|u| !unified_opidxs.contains(u));
            }
        }
        if needed {
            kernel_outputs.insert(resolved.to_string());
        }
    }
    flat.kernel_outputs.extend(kernel_outputs);

    computed.extend(unified_opidxs.iter().copied());

    // Post-op input accesses, derived from the output-index polynomials
    // and each input's dimension strides.
    let out_shape = env
        .vars
        .get(&flat.output)
        .and_then(Binding::shape)
        .ok_or_else(|| GenerateError::MissingShape(flat.output.clone()))?;
    for name in post_contraction_inputs {
        let in_shape = env
            .vars
            .get(&name)
            .and_then(Binding::shape)
            .ok_or_else(|| GenerateError::MissingShape(name.clone()))?;
        // Equal element counts use the output shape itself: the input
        // may be an arbitrary reshape of it, and an elementwise read
        // only needs a dense enumeration of the same space.
        let shape = if in_shape.elem_size() == out_shape.elem_size() {
            out_shape
        } else {
            in_shape
        };
        let off = out_poly
            .len()
            .checked_sub(shape.dims.len())
            .ok_or_else(|| {
                GenerateError::Internal(format!(
                    "post-op input `{name}` has higher rank than the kernel output"
                ))
            })?;
        let mut p = Poly::zero();
        for (i, dim) in shape.dims.iter().enumerate() {
            // Size-1 dims broadcast (stride dropped) unless the output
            // dim is also size 1.
            if dim.size != 1 || out_shape.dims[off + i].size == 1 {
                p += out_poly[off + i].clone() * dim.stride;
            }
        }
        let mut a = FlatTensorAccess::new(in_shape.elem, shape.elem_size());
        a.strides = flat.names.iter().map(|n| p.floor_coeff(n)).collect();
        log::trace!(
            target: "tessera::unify",
            "post-op input {name}: poly = {p}, strides = {:?}", a.strides
        );
        flat.post_op_inputs.insert(name, a);
    }

    Ok(())
}
