//! Affine index polynomials with rational coefficients.
//!
//! Contraction specs describe tensor accesses as affine expressions over
//! named loop indices, e.g. `2*i + j - 1`. Coefficients are rationals so
//! intermediate rewrites can divide freely; final strides are extracted
//! with [`Poly::floor_coeff`], which rounds toward negative infinity.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Neg, Sub};

use num_rational::Ratio;
use num_traits::{Signed, Zero};

/// Rational coefficient type used throughout the index algebra.
pub type Rat = Ratio<i64>;

/// An affine expression over named indices.
///
/// The constant term is stored under the empty-string key; every other
/// key is an index name. Terms with zero coefficient are never stored.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Poly {
    terms: BTreeMap<String, Rat>,
}

impl Poly {
    /// The zero polynomial.
    pub fn zero() -> Self {
        Self::default()
    }

    /// A constant polynomial.
    pub fn constant(value: impl Into<Rat>) -> Self {
        Self::term("", value.into())
    }

    /// The polynomial `1 * name`.
    pub fn index(name: &str) -> Self {
        Self::term(name, Rat::from_integer(1))
    }

    /// The polynomial `coeff * name`; an empty name means the constant term.
    pub fn term(name: &str, coeff: Rat) -> Self {
        let mut terms = BTreeMap::new();
        if !coeff.is_zero() {
            terms.insert(name.to_string(), coeff);
        }
        Self { terms }
    }

    /// The coefficient of `name`, or zero if absent.
    pub fn coeff(&self, name: &str) -> Rat {
        self.terms.get(name).copied().unwrap_or_else(Rat::zero)
    }

    /// The constant term.
    pub fn constant_term(&self) -> Rat {
        self.coeff("")
    }

    /// The coefficient of `name` rounded toward negative infinity.
    pub fn floor_coeff(&self, name: &str) -> i64 {
        self.coeff(name).floor().to_integer()
    }

    /// The constant term rounded toward negative infinity.
    pub fn floor_constant(&self) -> i64 {
        self.constant_term().floor().to_integer()
    }

    /// Iterate over the index names appearing with nonzero coefficient.
    pub fn indexes(&self) -> impl Iterator<Item = &str> {
        self.terms.keys().map(String::as_str).filter(|k| !k.is_empty())
    }

    /// True if no term (constant included) is present.
    pub fn is_zero(&self) -> bool {
        self.terms.is_empty()
    }

    /// True if the polynomial has no index terms.
    pub fn is_constant(&self) -> bool {
        self.indexes().next().is_none()
    }

    /// Rewrite index names through `map`; names absent from the map are kept.
    pub fn rename_indexes(&self, map: &BTreeMap<String, String>) -> Poly {
        let mut out = Poly::zero();
        for (name, &coeff) in &self.terms {
            let name = if name.is_empty() {
                name
            } else {
                map.get(name).unwrap_or(name)
            };
            out.add_term(name, coeff);
        }
        out
    }

    fn add_term(&mut self, name: &str, coeff: Rat) {
        if coeff.is_zero() {
            return;
        }
        let entry = self.terms.entry(name.to_string()).or_insert_with(Rat::zero);
        *entry += coeff;
        if entry.is_zero() {
            self.terms.remove(name);
        }
    }
}

impl Add for Poly {
    type Output = Poly;

    fn add(mut self, rhs: Poly) -> Poly {
        for (name, coeff) in rhs.terms {
            self.add_term(&name, coeff);
        }
        self
    }
}

impl AddAssign for Poly {
    fn add_assign(&mut self, rhs: Poly) {
        for (name, coeff) in rhs.terms {
            self.add_term(&name, coeff);
        }
    }
}

impl Sub for Poly {
    type Output = Poly;

    fn sub(self, rhs: Poly) -> Poly {
        self + (-rhs)
    }
}

impl Neg for Poly {
    type Output = Poly;

    fn neg(mut self) -> Poly {
        for coeff in self.terms.values_mut() {
            *coeff = -*coeff;
        }
        self
    }
}

impl Mul<Rat> for Poly {
    type Output = Poly;

    fn mul(mut self, rhs: Rat) -> Poly {
        if rhs.is_zero() {
            return Poly::zero();
        }
        for coeff in self.terms.values_mut() {
            *coeff *= rhs;
        }
        self
    }
}

impl Mul<i64> for Poly {
    type Output = Poly;

    fn mul(self, rhs: i64) -> Poly {
        self * Rat::from_integer(rhs)
    }
}

impl fmt::Display for Poly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.terms.is_empty() {
            return f.write_str("0");
        }
        let mut first = true;
        for (name, coeff) in &self.terms {
            if first {
                if coeff.is_negative() {
                    f.write_str("-")?;
                }
            } else if coeff.is_negative() {
                f.write_str(" - ")?;
            } else {
                f.write_str(" + ")?;
            }
            first = false;
            let mag = coeff.abs();
            if name.is_empty() {
                write!(f, "{mag}")?;
            } else if mag == Rat::from_integer(1) {
                write!(f, "{name}")?;
            } else {
                write!(f, "{mag}*{name}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rat(n: i64, d: i64) -> Rat {
        Rat::new(n, d)
    }

    #[test]
    fn coeff_lookup() {
        let p = Poly::index("i") * 2 + Poly::index("j") + Poly::constant(3);
        assert_eq!(p.coeff("i"), rat(2, 1));
        assert_eq!(p.coeff("j"), rat(1, 1));
        assert_eq!(p.coeff("k"), rat(0, 1));
        assert_eq!(p.constant_term(), rat(3, 1));
    }

    #[test]
    fn zero_terms_are_dropped() {
        let p = Poly::index("i") - Poly::index("i");
        assert!(p.is_zero());
        assert_eq!(p.indexes().count(), 0);
    }

    #[test]
    fn floor_rounds_toward_negative_infinity() {
        let p = Poly::term("i", rat(-3, 2));
        assert_eq!(p.floor_coeff("i"), -2);
        let q = Poly::term("i", rat(3, 2));
        assert_eq!(q.floor_coeff("i"), 1);
    }

    #[test]
    fn rename_merges_collisions() {
        let p = Poly::index("i") + Poly::index("j");
        let mut map = BTreeMap::new();
        map.insert("i".to_string(), "x".to_string());
        map.insert("j".to_string(), "x".to_string());
        let renamed = p.rename_indexes(&map);
        assert_eq!(renamed.coeff("x"), rat(2, 1));
        assert_eq!(renamed.indexes().count(), 1);
    }

    #[test]
    fn scalar_multiply() {
        let p = (Poly::index("i") + Poly::constant(1)) * rat(1, 2);
        assert_eq!(p.coeff("i"), rat(1, 2));
        assert_eq!(p.constant_term(), rat(1, 2));
        assert!((p * 0).is_zero());
    }

    #[test]
    fn display_format() {
        let p = Poly::index("i") * 2 - Poly::index("j") + Poly::constant(1);
        assert_eq!(p.to_string(), "1 + 2*i - j");
        assert_eq!(Poly::zero().to_string(), "0");
    }
}
