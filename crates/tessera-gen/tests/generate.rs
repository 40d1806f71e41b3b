//! End-to-end kernel generation scenarios.
//!
//! Each test builds a small program, runs `generate_program`, and checks
//! the emitted kernel list: kernel count and order, prefills, fusion and
//! elision, name rewrites, and the cost/debug fields.

use tessera_gen::{generate_program, GenerateError, KernelKind, KernelList};
use tessera_ir::{
    AggOp, ComboOp, ConstValue, Contraction, Function, Op, OpKind, Poly, Program, ScalarType,
    ShapeMap, SymbolicConstraint, TensorShape, TensorSpec,
};
use tessera_opt::{FlattenError, HardwareSettings};

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Scalar-only settings keep index ranges literal in assertions.
fn scalar_settings() -> HardwareSettings {
    HardwareSettings {
        vec_size: 1,
        ..Default::default()
    }
}

fn shape(sizes: &[u64]) -> TensorShape {
    TensorShape::row_major(ScalarType::F32, sizes)
}

fn shape_map(entries: &[(&str, &[u64])]) -> ShapeMap {
    entries
        .iter()
        .map(|(name, sizes)| (name.to_string(), shape(sizes)))
        .collect()
}

fn contraction_op(
    agg: AggOp,
    output: &str,
    specs: Vec<TensorSpec>,
    constraints: Vec<SymbolicConstraint>,
) -> Op {
    let inputs = specs[1..].iter().map(|s| s.id.clone()).collect();
    Op {
        output: output.into(),
        inputs,
        kind: OpKind::Contraction(Contraction {
            agg,
            combo: ComboOp::Mul,
            specs,
            constraints,
            use_default: None,
        }),
    }
}

fn func_op(name: &str, output: &str, inputs: &[&str]) -> Op {
    Op {
        output: output.into(),
        inputs: inputs.iter().map(|s| s.to_string()).collect(),
        kind: OpKind::Function(Function::new(name)),
    }
}

fn int_const(output: &str, value: i64) -> Op {
    Op {
        output: output.into(),
        inputs: vec![],
        kind: OpKind::Constant(ConstValue::Int(value)),
    }
}

fn identity_contraction(output: &str, input: &str) -> Op {
    contraction_op(
        AggOp::Assign,
        output,
        vec![
            TensorSpec::new(output, vec![Poly::index("i")]),
            TensorSpec::new(input, vec![Poly::index("i")]),
        ],
        vec![],
    )
}

fn matmul_contraction() -> Op {
    contraction_op(
        AggOp::Sum,
        "C",
        vec![
            TensorSpec::new("C", vec![Poly::index("i"), Poly::index("j")]),
            TensorSpec::new("A", vec![Poly::index("i"), Poly::index("k")]),
            TensorSpec::new("B", vec![Poly::index("k"), Poly::index("j")]),
        ],
        vec![],
    )
}

/// Every emitted kernel keeps its stride table parallel to its index
/// table, and never lists a variable as both input and output.
fn check_kernel_invariants(r: &KernelList) {
    for ki in &r.kernels {
        let accesses = ki.info.offsets.len();
        for idx in &ki.info.accesses {
            assert_eq!(idx.strides.len(), accesses, "kernel {}", ki.name);
        }
        assert_eq!(ki.info.vectors.len(), accesses, "kernel {}", ki.name);
        for input in &ki.inputs {
            assert!(
                !ki.outputs.contains(input),
                "kernel {} reads and writes {input}",
                ki.name
            );
        }
    }
}

#[test]
fn identity_contraction_scenario() {
    init_logs();
    let prog = Program {
        ops: vec![identity_contraction("out", "in")],
    };
    let r = generate_program(
        &prog,
        &shape_map(&[("in", &[8])]),
        &shape_map(&[("out", &[8])]),
        &scalar_settings(),
        "t",
        1,
    )
    .unwrap();

    assert_eq!(r.kernels.len(), 1);
    let k = &r.kernels[0];
    assert_eq!(k.name, "kernel_t_0");
    assert_eq!(k.kind, KernelKind::Contraction);
    assert_eq!(k.outputs, vec!["out"]);
    assert_eq!(k.inputs, vec!["in"]);
    assert_eq!(k.tot_flops, 0);
    assert_eq!(k.info.accesses.len(), 1);
    assert_eq!(k.info.accesses[0].name, "i1");
    assert_eq!(k.info.accesses[0].range, 8);
    assert_eq!(k.info.accesses[0].strides[0], 1);
    assert!(k.candidates.is_empty());
    check_kernel_invariants(&r);
}

#[test]
fn matmul_scenario() {
    init_logs();
    let prog = Program {
        ops: vec![matmul_contraction()],
    };
    let r = generate_program(
        &prog,
        &shape_map(&[("A", &[4, 8]), ("B", &[8, 16])]),
        &shape_map(&[("C", &[4, 16])]),
        &scalar_settings(),
        "mm",
        1,
    )
    .unwrap();

    assert_eq!(r.kernels.len(), 1);
    let k = &r.kernels[0];
    assert_eq!(k.kind, KernelKind::Contraction);
    assert_eq!(k.info.accesses.len(), 3, "no indices fold in a matmul");
    assert_eq!(k.tot_flops, 2 * 4 * 16 * 8);
    assert_eq!(k.inputs, vec!["A", "B"]);
    assert_eq!(k.outputs, vec!["C"]);
    assert!(k.candidates.is_empty(), "one trial yields no alternates");
    check_kernel_invariants(&r);
}

#[test]
fn matmul_extra_trials_attach_candidates() {
    init_logs();
    let prog = Program {
        ops: vec![matmul_contraction()],
    };
    let r = generate_program(
        &prog,
        &shape_map(&[("A", &[4, 8]), ("B", &[8, 16])]),
        &shape_map(&[("C", &[4, 16])]),
        &scalar_settings(),
        "mm",
        3,
    )
    .unwrap();
    assert_eq!(r.kernels.len(), 1);
    assert_eq!(r.kernels[0].candidates.len(), 2);
}

#[test]
fn matmul_bias_reshape_fuses_to_one_kernel() {
    init_logs();
    // C = matmul(A, B); D = reshape(C, 4, 16); E = D + b.
    let prog = Program {
        ops: vec![
            matmul_contraction(),
            int_const("c4", 4),
            int_const("c16", 16),
            func_op("reshape", "D", &["C", "c4", "c16"]),
            func_op("add", "E", &["D", "b"]),
        ],
    };
    let r = generate_program(
        &prog,
        &shape_map(&[("A", &[4, 8]), ("B", &[8, 16]), ("b", &[16])]),
        &shape_map(&[("E", &[4, 16])]),
        &scalar_settings(),
        "fuse",
        1,
    )
    .unwrap();

    assert_eq!(r.kernels.len(), 1, "reshape and add fold into the matmul");
    let k = &r.kernels[0];
    assert_eq!(k.outputs, vec!["E"]);
    assert_eq!(k.inputs, vec!["A", "B", "b"]);
    assert_eq!(r.var_rewrites.lookup("D"), "C");
    assert!(k.war_safe_reads.contains("b"));
    // The reshape is elided: only the add survives as a post-op.
    assert_eq!(k.info.ops.len(), 2);
    assert!(k.info.ops[1].contains("add"));
    assert!(r.types.contains_key("b"));
    assert!(r.types.contains_key("E"));
    check_kernel_invariants(&r);
}

#[test]
fn non_dense_output_gets_zero_prefill() {
    init_logs();
    // out[2*i] = in[i]: half the output positions are never written.
    let prog = Program {
        ops: vec![contraction_op(
            AggOp::Assign,
            "out",
            vec![
                TensorSpec::new("out", vec![Poly::index("i") * 2]),
                TensorSpec::new("in", vec![Poly::index("i")]),
            ],
            vec![],
        )],
    };
    let r = generate_program(
        &prog,
        &shape_map(&[("in", &[4])]),
        &shape_map(&[("out", &[8])]),
        &scalar_settings(),
        "sp",
        1,
    )
    .unwrap();

    assert_eq!(r.kernels.len(), 2);
    assert_eq!(r.kernels[0].kind, KernelKind::Zero);
    assert_eq!(r.kernels[0].name, "zero_kernel_sp_0");
    assert_eq!(r.kernels[0].outputs, vec!["out"]);
    assert_eq!(r.kernels[1].kind, KernelKind::Contraction);
    assert_eq!(r.kernels[1].name, "kernel_sp_0");
    assert_eq!(r.kernels[1].outputs, vec!["out"]);
    assert_eq!(r.kernels[1].info.accesses[0].strides[0], 2);
    assert!(r.kernels[1].info.ops.len() == 1, "no fusion after a prefill");
    check_kernel_invariants(&r);
}

#[test]
fn default_tensor_turns_prefill_into_copy() {
    init_logs();
    let mut op = contraction_op(
        AggOp::Assign,
        "out",
        vec![
            TensorSpec::new("out", vec![Poly::index("i") * 2]),
            TensorSpec::new("in", vec![Poly::index("i")]),
        ],
        vec![],
    );
    if let OpKind::Contraction(c) = &mut op.kind {
        c.use_default = Some("dflt".into());
    }
    let prog = Program { ops: vec![op] };
    let r = generate_program(
        &prog,
        &shape_map(&[("in", &[4]), ("dflt", &[8])]),
        &shape_map(&[("out", &[8])]),
        &scalar_settings(),
        "cp",
        1,
    )
    .unwrap();
    assert_eq!(r.kernels.len(), 2);
    assert_eq!(r.kernels[0].kind, KernelKind::Copy);
    assert_eq!(r.kernels[0].name, "copy_kernel_cp_0");
    assert_eq!(r.kernels[0].inputs, vec!["dflt"]);
}

#[test]
fn prng_triple_becomes_one_special_kernel() {
    init_logs();
    let prog = Program {
        ops: vec![
            func_op("prng_step", "T", &["s"]),
            func_op("prng_state", "s2", &["T"]),
            func_op("prng_value", "v", &["T"]),
        ],
    };
    let r = generate_program(
        &prog,
        &shape_map(&[("s", &[6])]),
        &shape_map(&[("s2", &[6]), ("v", &[16])]),
        &scalar_settings(),
        "rng",
        1,
    )
    .unwrap();

    assert_eq!(r.kernels.len(), 1);
    let k = &r.kernels[0];
    assert_eq!(k.kind, KernelKind::Special);
    assert_eq!(k.outputs, vec!["s2", "v"]);
    assert_eq!(k.inputs, vec!["s"]);
    check_kernel_invariants(&r);
}

#[test]
fn prng_state_only_lowers_to_identity() {
    init_logs();
    let prog = Program {
        ops: vec![
            func_op("prng_step", "T", &["s"]),
            func_op("prng_state", "s2", &["T"]),
        ],
    };
    let r = generate_program(
        &prog,
        &shape_map(&[("s", &[6])]),
        &shape_map(&[("s2", &[6])]),
        &scalar_settings(),
        "rng",
        1,
    )
    .unwrap();
    // No special kernel; the state op becomes an identity copy of s.
    assert_eq!(r.kernels.len(), 1);
    let k = &r.kernels[0];
    assert_eq!(k.kind, KernelKind::Elementwise);
    assert_eq!(k.inputs, vec!["s"]);
    assert_eq!(k.outputs, vec!["s2"]);
}

#[test]
fn prng_value_without_state_fails() {
    init_logs();
    let prog = Program {
        ops: vec![
            func_op("prng_step", "T", &["s"]),
            func_op("prng_value", "v", &["T"]),
        ],
    };
    let err = generate_program(
        &prog,
        &shape_map(&[("s", &[6])]),
        &shape_map(&[("v", &[16])]),
        &scalar_settings(),
        "rng",
        1,
    )
    .unwrap_err();
    assert!(matches!(err, GenerateError::PrngMissingState(_)));
}

#[test]
fn orphan_prng_state_fails() {
    init_logs();
    let prog = Program {
        ops: vec![func_op("prng_state", "s2", &["T"])],
    };
    let err = generate_program(
        &prog,
        &shape_map(&[("T", &[6])]),
        &shape_map(&[("s2", &[6])]),
        &scalar_settings(),
        "rng",
        1,
    )
    .unwrap_err();
    assert!(matches!(err, GenerateError::OrphanPrng(_)));
}

#[test]
fn constraint_gated_output_gets_prefill() {
    init_logs();
    let prog = Program {
        ops: vec![contraction_op(
            AggOp::Assign,
            "out",
            vec![
                TensorSpec::new("out", vec![Poly::index("i")]),
                TensorSpec::new("in", vec![Poly::index("i")]),
            ],
            vec![SymbolicConstraint {
                poly: Poly::index("i"),
                range: 3,
            }],
        )],
    };
    let r = generate_program(
        &prog,
        &shape_map(&[("in", &[4])]),
        &shape_map(&[("out", &[4])]),
        &scalar_settings(),
        "cg",
        1,
    )
    .unwrap();

    assert_eq!(r.kernels.len(), 2);
    assert_eq!(r.kernels[0].kind, KernelKind::Zero);
    let k = &r.kernels[1];
    assert_eq!(k.info.constraints.len(), 1);
    assert_eq!(k.info.constraints[0].lhs, vec![1]);
    assert_eq!(k.info.constraints[0].rhs, 2);
    check_kernel_invariants(&r);
}

#[test]
fn ident_chain_collapses_to_one_kernel() {
    init_logs();
    let prog = Program {
        ops: vec![
            identity_contraction("y0", "in"),
            func_op("ident", "x1", &["y0"]),
            func_op("ident", "x2", &["x1"]),
        ],
    };
    let r = generate_program(
        &prog,
        &shape_map(&[("in", &[8])]),
        &shape_map(&[("x2", &[8])]),
        &scalar_settings(),
        "chain",
        1,
    )
    .unwrap();

    assert_eq!(r.kernels.len(), 1);
    let k = &r.kernels[0];
    // Both idents elide; the kernel writes the canonical pre-name and
    // the rewrite table resolves the chain terminal onto it.
    assert_eq!(r.var_rewrites.lookup("x2"), "y0");
    assert_eq!(r.var_rewrites.lookup("x1"), "y0");
    assert_eq!(k.outputs, vec![r.var_rewrites.lookup("x2")]);
    let resolved = r.var_rewrites.lookup("x2");
    assert_eq!(r.var_rewrites.lookup(resolved), resolved);
    check_kernel_invariants(&r);
}

#[test]
fn reshape_between_program_outputs_is_preserved() {
    init_logs();
    let prog = Program {
        ops: vec![
            matmul_contraction(),
            int_const("c4", 4),
            int_const("c16", 16),
            func_op("reshape", "D", &["C", "c4", "c16"]),
        ],
    };
    let r = generate_program(
        &prog,
        &shape_map(&[("A", &[4, 8]), ("B", &[8, 16])]),
        &shape_map(&[("C", &[4, 16]), ("D", &[4, 16])]),
        &scalar_settings(),
        "keep",
        1,
    )
    .unwrap();

    assert_eq!(r.kernels.len(), 1);
    let k = &r.kernels[0];
    assert_eq!(k.outputs, vec!["C", "D"]);
    assert_eq!(r.var_rewrites.lookup("D"), "D");
    assert!(k.info.ops.iter().any(|op| op.contains("reshape")));
    check_kernel_invariants(&r);
}

#[test]
fn equal_count_post_op_input_uses_output_shape() {
    init_logs();
    // X has 64 elements in one dim; the kernel output is 4x16. The
    // access for X is derived from the output shape.
    let prog = Program {
        ops: vec![matmul_contraction(), func_op("add", "G", &["C", "X"])],
    };
    let r = generate_program(
        &prog,
        &shape_map(&[("A", &[4, 8]), ("B", &[8, 16]), ("X", &[64])]),
        &shape_map(&[("G", &[4, 16])]),
        &scalar_settings(),
        "eq",
        1,
    )
    .unwrap();

    assert_eq!(r.kernels.len(), 1);
    let k = &r.kernels[0];
    assert_eq!(k.inputs, vec!["A", "B", "X"]);
    assert_eq!(k.outputs, vec!["G"]);
    check_kernel_invariants(&r);
}

#[test]
fn invalid_reshape_is_rejected() {
    init_logs();
    let prog = Program {
        ops: vec![
            identity_contraction("y", "in"),
            int_const("c4", 4),
            func_op("reshape", "D", &["y", "c4"]),
        ],
    };
    // Declared output shape disagrees with the source element count.
    let err = generate_program(
        &prog,
        &shape_map(&[("in", &[8])]),
        &shape_map(&[("D", &[4])]),
        &scalar_settings(),
        "bad",
        1,
    )
    .unwrap_err();
    assert!(matches!(err, GenerateError::ReshapeSizeMismatch { .. }));
}

#[test]
fn four_spec_contraction_compiles() {
    init_logs();
    let prog = Program {
        ops: vec![contraction_op(
            AggOp::Sum,
            "out",
            vec![
                TensorSpec::new("out", vec![Poly::index("i")]),
                TensorSpec::new("a", vec![Poly::index("i"), Poly::index("k")]),
                TensorSpec::new("b", vec![Poly::index("k")]),
                TensorSpec::new("c", vec![Poly::index("k")]),
            ],
            vec![],
        )],
    };
    let r = generate_program(
        &prog,
        &shape_map(&[("a", &[8, 4]), ("b", &[4]), ("c", &[4])]),
        &shape_map(&[("out", &[8])]),
        &scalar_settings(),
        "quad",
        1,
    )
    .unwrap();
    assert_eq!(r.kernels.len(), 1);
    assert_eq!(r.kernels[0].inputs, vec!["a", "b", "c"]);
    check_kernel_invariants(&r);
}

#[test]
fn five_spec_contraction_fails() {
    init_logs();
    let prog = Program {
        ops: vec![contraction_op(
            AggOp::Sum,
            "out",
            vec![
                TensorSpec::new("out", vec![Poly::index("i")]),
                TensorSpec::new("a", vec![Poly::index("i")]),
                TensorSpec::new("b", vec![Poly::index("i")]),
                TensorSpec::new("c", vec![Poly::index("i")]),
                TensorSpec::new("d", vec![Poly::index("i")]),
            ],
            vec![],
        )],
    };
    let err = generate_program(
        &prog,
        &shape_map(&[("a", &[8]), ("b", &[8]), ("c", &[8]), ("d", &[8])]),
        &shape_map(&[("out", &[8])]),
        &scalar_settings(),
        "penta",
        1,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        GenerateError::Flatten(FlattenError::UnsupportedSpecCount(5))
    ));
}

#[test]
fn orphan_elementwise_op_gets_its_own_kernel() {
    init_logs();
    let prog = Program {
        ops: vec![func_op("relu", "y", &["x"])],
    };
    let r = generate_program(
        &prog,
        &shape_map(&[("x", &[8])]),
        &shape_map(&[("y", &[8])]),
        &scalar_settings(),
        "ew",
        1,
    )
    .unwrap();

    assert_eq!(r.kernels.len(), 1);
    let k = &r.kernels[0];
    assert_eq!(k.kind, KernelKind::Elementwise);
    assert_eq!(k.inputs, vec!["x"]);
    assert_eq!(k.outputs, vec!["y"]);
    assert_eq!(k.tot_flops, 8);
    check_kernel_invariants(&r);
}

#[test]
fn missing_input_shape_fails() {
    init_logs();
    let prog = Program {
        ops: vec![matmul_contraction()],
    };
    let err = generate_program(
        &prog,
        &shape_map(&[("A", &[4, 8])]),
        &shape_map(&[("C", &[4, 16])]),
        &scalar_settings(),
        "m",
        1,
    )
    .unwrap_err();
    assert!(matches!(err, GenerateError::Bind(_)));
}

#[test]
fn vectorization_folds_the_output_column() {
    init_logs();
    let prog = Program {
        ops: vec![matmul_contraction()],
    };
    let r = generate_program(
        &prog,
        &shape_map(&[("A", &[4, 8]), ("B", &[8, 16])]),
        &shape_map(&[("C", &[4, 16])]),
        &HardwareSettings::default(),
        "vec",
        1,
    )
    .unwrap();
    let k = &r.kernels[0];
    // The output access moves to 4-wide lanes; flops are unchanged.
    assert_eq!(k.info.vectors[0], 4);
    assert_eq!(k.tot_flops, 2 * 4 * 16 * 8);
    check_kernel_invariants(&r);
}

#[test]
fn program_outputs_are_covered_exactly_once() {
    init_logs();
    // Two independent results plus a prefilled one.
    let prog = Program {
        ops: vec![
            matmul_contraction(),
            contraction_op(
                AggOp::Assign,
                "out",
                vec![
                    TensorSpec::new("out", vec![Poly::index("i") * 2]),
                    TensorSpec::new("in", vec![Poly::index("i")]),
                ],
                vec![],
            ),
        ],
    };
    let outputs = shape_map(&[("C", &[4, 16]), ("out", &[8])]);
    let r = generate_program(
        &prog,
        &shape_map(&[("A", &[4, 8]), ("B", &[8, 16]), ("in", &[4])]),
        &outputs,
        &scalar_settings(),
        "multi",
        1,
    )
    .unwrap();

    for name in outputs.keys() {
        let resolved = r.var_rewrites.lookup(name);
        let writers = r
            .kernels
            .iter()
            .filter(|k| k.kind != KernelKind::Zero && k.kind != KernelKind::Copy)
            .filter(|k| k.outputs.iter().any(|o| o == resolved))
            .count();
        assert_eq!(writers, 1, "program output {name} written once");
    }
    check_kernel_invariants(&r);
}
