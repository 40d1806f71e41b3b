//! Contraction flattening.
//!
//! Lowers a symbolic contraction to its flat form: canonical index
//! names, per-index ranges derived from operand dimensions, per-tensor
//! stride vectors extracted from the index polynomials, and linear
//! constraint rows. Also produces the output-index polynomial vector the
//! unifier uses to address post-op inputs.

use std::collections::BTreeMap;

use num_traits::Signed;

use tessera_ir::{
    Contraction, FlatConstraint, FlatContraction, FlatTensorAccess, Poly, Rat, TensorShape,
};

/// Errors raised while lowering a contraction.
#[derive(Debug, thiserror::Error)]
pub enum FlattenError {
    /// Only 2, 3, or 4 tensor operands are supported.
    #[error("contractions must have 2, 3, or 4 tensor specs, got {0}")]
    UnsupportedSpecCount(usize),

    /// An index is bounded by no operand dimension.
    #[error("cannot derive a range for index `{0}`")]
    UnboundedIndex(String),

    /// A spec's dimension count disagrees with its operand's rank.
    #[error("spec for `{id}` has {spec_dims} dims but its shape has {shape_dims}")]
    RankMismatch {
        id: String,
        spec_dims: usize,
        shape_dims: usize,
    },
}

/// Lower `c` to a [`FlatContraction`], given operand shapes parallel to
/// `c.specs`. Returns the flat form and the renamed output polynomials.
pub fn flatten_contraction(
    c: &Contraction,
    shapes: &[TensorShape],
) -> Result<(FlatContraction, Vec<Poly>), FlattenError> {
    if !(2..=4).contains(&c.specs.len()) {
        return Err(FlattenError::UnsupportedSpecCount(c.specs.len()));
    }
    for (spec, shape) in c.specs.iter().zip(shapes) {
        if spec.spec.len() != shape.dims.len() {
            return Err(FlattenError::RankMismatch {
                id: spec.id.clone(),
                spec_dims: spec.spec.len(),
                shape_dims: shape.dims.len(),
            });
        }
    }

    // Canonical index names, i1..iN in order of first appearance
    // (output spec first).
    let mut rename: BTreeMap<String, String> = BTreeMap::new();
    let mut names: Vec<String> = Vec::new();
    for spec in &c.specs {
        for poly in &spec.spec {
            for idx in poly.indexes() {
                if !rename.contains_key(idx) {
                    let canon = format!("i{}", names.len() + 1);
                    rename.insert(idx.to_string(), canon.clone());
                    names.push(canon);
                }
            }
        }
    }

    // Tightest range any operand dimension implies for each index.
    let mut range_of: BTreeMap<String, u64> = BTreeMap::new();
    for (spec, shape) in c.specs.iter().zip(shapes) {
        for (poly, dim) in spec.spec.iter().zip(&shape.dims) {
            for idx in poly.indexes() {
                let canon = rename[idx].clone();
                let coeff = poly.coeff(idx).abs();
                let bound = (Rat::from_integer(dim.size.max(1) as i64 - 1) / coeff)
                    .floor()
                    .to_integer() as u64
                    + 1;
                range_of
                    .entry(canon)
                    .and_modify(|r| *r = (*r).min(bound))
                    .or_insert(bound);
            }
        }
    }
    let mut ranges = Vec::with_capacity(names.len());
    for name in &names {
        ranges.push(
            *range_of
                .get(name)
                .ok_or_else(|| FlattenError::UnboundedIndex(name.clone()))?,
        );
    }

    // Stride extraction: fold each spec's polynomials against its
    // operand's dimension strides, then read off per-index coefficients.
    let mut access = Vec::with_capacity(c.specs.len());
    for (spec, shape) in c.specs.iter().zip(shapes) {
        let mut addr = Poly::zero();
        for (poly, dim) in spec.spec.iter().zip(&shape.dims) {
            addr += poly.rename_indexes(&rename) * dim.stride;
        }
        let mut a = FlatTensorAccess::new(shape.elem, shape.elem_size());
        a.offset = addr.floor_constant();
        a.strides = names.iter().map(|n| addr.floor_coeff(n)).collect();
        access.push(a);
    }

    // Constraint rows: `0 <= poly < range` becomes an upper row, plus a
    // lower row when the polynomial can actually go negative.
    let mut constraints = Vec::new();
    for sc in &c.constraints {
        let poly = sc.poly.rename_indexes(&rename);
        let lhs: Vec<i64> = names.iter().map(|n| poly.floor_coeff(n)).collect();
        let konst = poly.floor_constant();
        constraints.push(FlatConstraint {
            lhs: lhs.clone(),
            rhs: sc.range as i64 - 1 - konst,
        });
        if konst < 0 || lhs.iter().any(|&l| l < 0) {
            constraints.push(FlatConstraint {
                lhs: lhs.iter().map(|&l| -l).collect(),
                rhs: konst,
            });
        }
    }

    // Drop indices that no access ever advances along.
    let keep: Vec<usize> = (0..names.len())
        .filter(|&k| access.iter().any(|a| a.strides[k] != 0))
        .collect();
    if keep.len() != names.len() {
        names = keep.iter().map(|&k| names[k].clone()).collect();
        ranges = keep.iter().map(|&k| ranges[k]).collect();
        for a in &mut access {
            a.strides = keep.iter().map(|&k| a.strides[k]).collect();
        }
        for fc in &mut constraints {
            fc.lhs = keep.iter().map(|&k| fc.lhs[k]).collect();
        }
    }

    let out_poly: Vec<Poly> = c.specs[0]
        .spec
        .iter()
        .map(|p| p.rename_indexes(&rename))
        .collect();

    let flat = FlatContraction {
        agg: c.agg,
        combo: c.combo,
        names,
        ranges,
        access,
        constraints,
        output: c.specs[0].id.clone(),
        ..Default::default()
    };
    log::trace!("flattened contraction:\n{flat}");
    Ok((flat, out_poly))
}
