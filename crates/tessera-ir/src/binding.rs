//! Variable bindings and the shape binder.
//!
//! Full frontend type inference lives outside this crate; `bind_program`
//! derives just enough to drive kernel generation: program inputs and
//! outputs bind their declared shapes, constants bind their values, and
//! intermediate variables get shapes propagated from their producers.

use std::collections::BTreeMap;

use num_traits::Signed;

use crate::error::BindError;
use crate::ops::{ConstValue, Contraction, Op, OpKind, Program};
use crate::poly::Rat;
use crate::shape::{ScalarType, TensorShape};

/// The value bound to a variable name.
#[derive(Clone, Debug, PartialEq)]
pub enum Binding {
    Tensor(TensorShape),
    Int(i64),
    Float(f64),
}

impl Binding {
    /// The tensor shape, if this binding is a tensor.
    pub fn shape(&self) -> Option<&TensorShape> {
        match self {
            Self::Tensor(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_tensor(&self) -> bool {
        matches!(self, Self::Tensor(_))
    }
}

/// All variable bindings of a program, keyed by name.
pub type Bindings = BTreeMap<String, Binding>;

/// Shapes of externally visible variables, keyed by name.
pub type ShapeMap = BTreeMap<String, TensorShape>;

/// Derive bindings for every variable in `prog`.
///
/// Iterates ops in order, so producers bind before consumers. A variable
/// named in `outputs` always binds its declared shape.
pub fn bind_program(
    prog: &Program,
    inputs: &ShapeMap,
    outputs: &ShapeMap,
) -> Result<Bindings, BindError> {
    let mut vars: Bindings = inputs
        .iter()
        .map(|(name, shape)| (name.clone(), Binding::Tensor(shape.clone())))
        .collect();

    for op in &prog.ops {
        if vars.contains_key(&op.output) {
            continue;
        }
        let binding = match &op.kind {
            OpKind::Constant(ConstValue::Int(v)) => Binding::Int(*v),
            OpKind::Constant(ConstValue::Float(v)) => Binding::Float(*v),
            OpKind::Contraction(c) => match outputs.get(&op.output) {
                Some(shape) => Binding::Tensor(shape.clone()),
                None => Binding::Tensor(infer_contraction_shape(c, &op.output, &vars)?),
            },
            OpKind::Function(f) => match outputs.get(&op.output) {
                Some(shape) => Binding::Tensor(shape.clone()),
                None if f.name == "reshape" => Binding::Tensor(reshape_shape(op, &vars)?),
                None if f.is_special() => Binding::Tensor(special_shape(op, &vars)),
                None => Binding::Tensor(broadcast_shape(op, &vars)?),
            },
        };
        vars.insert(op.output.clone(), binding);
    }

    Ok(vars)
}

fn tensor_shape<'a>(vars: &'a Bindings, name: &str) -> Result<&'a TensorShape, BindError> {
    match vars.get(name) {
        Some(Binding::Tensor(shape)) => Ok(shape),
        Some(_) => Err(BindError::NotATensor(name.to_string())),
        None => Err(BindError::MissingShape(name.to_string())),
    }
}

/// Target shape of a reshape: the element type of the source, sized by
/// the trailing integer-constant inputs, packed row-major.
fn reshape_shape(op: &Op, vars: &Bindings) -> Result<TensorShape, BindError> {
    let src = op
        .inputs
        .first()
        .ok_or_else(|| BindError::BadReshapeDims(op.output.clone()))?;
    let elem = tensor_shape(vars, src)?.elem;
    let mut sizes = Vec::with_capacity(op.inputs.len() - 1);
    for dim in &op.inputs[1..] {
        match vars.get(dim) {
            Some(Binding::Int(v)) if *v > 0 => sizes.push(*v as u64),
            _ => return Err(BindError::BadReshapeDims(op.output.clone())),
        }
    }
    Ok(TensorShape::row_major(elem, &sizes))
}

/// Special functions pass their first tensor input's shape through.
fn special_shape(op: &Op, vars: &Bindings) -> TensorShape {
    op.inputs
        .iter()
        .find_map(|input| vars.get(input).and_then(Binding::shape))
        .cloned()
        .unwrap_or_else(|| TensorShape::row_major(ScalarType::F32, &[]))
}

/// Trailing-aligned broadcast of every tensor input.
fn broadcast_shape(op: &Op, vars: &Bindings) -> Result<TensorShape, BindError> {
    let shapes: Vec<&TensorShape> = op
        .inputs
        .iter()
        .filter_map(|input| vars.get(input).and_then(Binding::shape))
        .collect();
    let Some(first) = shapes.first() else {
        return Ok(TensorShape::row_major(ScalarType::F32, &[]));
    };
    let rank = shapes.iter().map(|s| s.rank()).max().unwrap_or(0);
    let mut sizes = vec![1u64; rank];
    for shape in &shapes {
        let off = rank - shape.rank();
        for (i, dim) in shape.dims.iter().enumerate() {
            let slot = &mut sizes[off + i];
            if *slot == 1 {
                *slot = dim.size;
            } else if dim.size != 1 && dim.size != *slot {
                return Err(BindError::BroadcastMismatch(op.output.clone()));
            }
        }
    }
    Ok(TensorShape::row_major(first.elem, &sizes))
}

/// Derive a contraction's output shape from its input specs: each index
/// takes the tightest range any input dimension implies for it, and each
/// output dimension spans its polynomial's maximum over that box.
fn infer_contraction_shape(
    c: &Contraction,
    output: &str,
    vars: &Bindings,
) -> Result<TensorShape, BindError> {
    if c.specs.len() < 2 {
        return Err(BindError::TooFewSpecs {
            output: output.to_string(),
            count: c.specs.len(),
        });
    }

    let mut ranges: BTreeMap<String, u64> = BTreeMap::new();
    let mut elem = None;
    for spec in &c.specs[1..] {
        let shape = tensor_shape(vars, &spec.id)?;
        elem.get_or_insert(shape.elem);
        for (poly, dim) in spec.spec.iter().zip(&shape.dims) {
            for idx in poly.indexes() {
                let coeff = poly.coeff(idx).abs();
                let bound = (Rat::from_integer(dim.size as i64 - 1) / coeff)
                    .floor()
                    .to_integer() as u64
                    + 1;
                ranges
                    .entry(idx.to_string())
                    .and_modify(|r| *r = (*r).min(bound))
                    .or_insert(bound);
            }
        }
    }

    let mut sizes = Vec::with_capacity(c.specs[0].spec.len());
    for poly in &c.specs[0].spec {
        let mut hi = poly.constant_term();
        for idx in poly.indexes() {
            let coeff = poly.coeff(idx);
            let range = *ranges.get(idx).ok_or_else(|| BindError::UnboundedIndex {
                idx: idx.to_string(),
                output: output.to_string(),
            })?;
            if coeff.is_positive() {
                hi += coeff * Rat::from_integer(range as i64 - 1);
            }
        }
        sizes.push(hi.floor().to_integer() as u64 + 1);
    }

    Ok(TensorShape::row_major(
        elem.unwrap_or(ScalarType::F32),
        &sizes,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{AggOp, ComboOp, Function, TensorSpec};
    use crate::poly::Poly;

    fn matmul_op() -> Op {
        Op {
            output: "C".into(),
            inputs: vec!["A".into(), "B".into()],
            kind: OpKind::Contraction(Contraction {
                agg: AggOp::Sum,
                combo: ComboOp::Mul,
                specs: vec![
                    TensorSpec::new("C", vec![Poly::index("i"), Poly::index("j")]),
                    TensorSpec::new("A", vec![Poly::index("i"), Poly::index("k")]),
                    TensorSpec::new("B", vec![Poly::index("k"), Poly::index("j")]),
                ],
                constraints: vec![],
                use_default: None,
            }),
        }
    }

    #[test]
    fn binds_inputs_and_infers_contraction_output() {
        let prog = Program {
            ops: vec![matmul_op()],
        };
        let mut inputs = ShapeMap::new();
        inputs.insert("A".into(), TensorShape::row_major(ScalarType::F32, &[4, 8]));
        inputs.insert(
            "B".into(),
            TensorShape::row_major(ScalarType::F32, &[8, 16]),
        );
        let vars = bind_program(&prog, &inputs, &ShapeMap::new()).unwrap();
        let c = vars["C"].shape().unwrap();
        assert_eq!(c.dims[0].size, 4);
        assert_eq!(c.dims[1].size, 16);
        assert_eq!(c.dims[0].stride, 16);
    }

    #[test]
    fn declared_output_shape_wins() {
        let prog = Program {
            ops: vec![matmul_op()],
        };
        let mut inputs = ShapeMap::new();
        inputs.insert("A".into(), TensorShape::row_major(ScalarType::F32, &[4, 8]));
        inputs.insert(
            "B".into(),
            TensorShape::row_major(ScalarType::F32, &[8, 16]),
        );
        let mut outputs = ShapeMap::new();
        outputs.insert("C".into(), TensorShape::row_major(ScalarType::F32, &[64]));
        let vars = bind_program(&prog, &inputs, &outputs).unwrap();
        assert_eq!(vars["C"].shape().unwrap().rank(), 1);
    }

    #[test]
    fn reshape_takes_dims_from_constants() {
        let prog = Program {
            ops: vec![
                Op {
                    output: "c4".into(),
                    inputs: vec![],
                    kind: OpKind::Constant(ConstValue::Int(4)),
                },
                Op {
                    output: "c16".into(),
                    inputs: vec![],
                    kind: OpKind::Constant(ConstValue::Int(16)),
                },
                Op {
                    output: "D".into(),
                    inputs: vec!["X".into(), "c4".into(), "c16".into()],
                    kind: OpKind::Function(Function::new("reshape")),
                },
            ],
        };
        let mut inputs = ShapeMap::new();
        inputs.insert("X".into(), TensorShape::row_major(ScalarType::F32, &[64]));
        let vars = bind_program(&prog, &inputs, &ShapeMap::new()).unwrap();
        let d = vars["D"].shape().unwrap();
        assert_eq!(d.dims[0].size, 4);
        assert_eq!(d.dims[1].size, 16);
    }

    #[test]
    fn broadcast_aligns_trailing_dims() {
        let prog = Program {
            ops: vec![Op {
                output: "E".into(),
                inputs: vec!["D".into(), "b".into()],
                kind: OpKind::Function(Function::new("add")),
            }],
        };
        let mut inputs = ShapeMap::new();
        inputs.insert(
            "D".into(),
            TensorShape::row_major(ScalarType::F32, &[4, 16]),
        );
        inputs.insert("b".into(), TensorShape::row_major(ScalarType::F32, &[16]));
        let vars = bind_program(&prog, &inputs, &ShapeMap::new()).unwrap();
        let e = vars["E"].shape().unwrap();
        assert_eq!(e.dims.len(), 2);
        assert_eq!(e.dims[0].size, 4);
        assert_eq!(e.dims[1].size, 16);
    }

    #[test]
    fn broadcast_mismatch_is_rejected() {
        let prog = Program {
            ops: vec![Op {
                output: "E".into(),
                inputs: vec!["x".into(), "y".into()],
                kind: OpKind::Function(Function::new("add")),
            }],
        };
        let mut inputs = ShapeMap::new();
        inputs.insert("x".into(), TensorShape::row_major(ScalarType::F32, &[4]));
        inputs.insert("y".into(), TensorShape::row_major(ScalarType::F32, &[5]));
        let err = bind_program(&prog, &inputs, &ShapeMap::new()).unwrap_err();
        assert!(matches!(err, BindError::BroadcastMismatch(_)));
    }

    #[test]
    fn missing_input_shape_is_an_error() {
        let prog = Program {
            ops: vec![matmul_op()],
        };
        let err = bind_program(&prog, &ShapeMap::new(), &ShapeMap::new()).unwrap_err();
        assert!(matches!(err, BindError::MissingShape(_)));
    }

    #[test]
    fn strided_output_derivation() {
        // out[2*i] = in[i] over in{4}: inferred size 2*(4-1)+1 = 7.
        let prog = Program {
            ops: vec![Op {
                output: "out".into(),
                inputs: vec!["in".into()],
                kind: OpKind::Contraction(Contraction {
                    agg: AggOp::Assign,
                    combo: ComboOp::Mul,
                    specs: vec![
                        TensorSpec::new("out", vec![Poly::index("i") * 2]),
                        TensorSpec::new("in", vec![Poly::index("i")]),
                    ],
                    constraints: vec![],
                    use_default: None,
                }),
            }],
        };
        let mut inputs = ShapeMap::new();
        inputs.insert("in".into(), TensorShape::row_major(ScalarType::F32, &[4]));
        let vars = bind_program(&prog, &inputs, &ShapeMap::new()).unwrap();
        assert_eq!(vars["out"].shape().unwrap().dims[0].size, 7);
    }
}
