//! tessera intermediate representation.
//!
//! The program model consumed by the kernel generator: ops and
//! contractions over affine index polynomials, strided tensor shapes,
//! variable bindings, use-def maps, and the flat (lowered) contraction
//! form shared by the transformation passes.

mod binding;
mod error;
mod flat;
mod ops;
pub mod poly;
mod shape;
mod usedef;

pub use binding::{bind_program, Binding, Bindings, ShapeMap};
pub use error::BindError;
pub use flat::{FlatConstraint, FlatContraction, FlatTensorAccess};
pub use ops::{
    AggOp, ComboOp, ConstValue, Contraction, Function, Op, OpKind, Program, SymbolicConstraint,
    TensorSpec,
};
pub use poly::{Poly, Rat};
pub use shape::{Bytes, Dim, ScalarKind, ScalarType, TensorShape};
pub use usedef::UseDef;
