use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{One, ToPrimitive, Zero};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Exact symbolic coefficient: rational constants and named kinematic
/// invariants ("s", "t", "eps", ...) combined by field operations.
/// Coefficients are never floating point.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Coeff {
    Const(BigRational),
    Var(String),
    Add(Box<Coeff>, Box<Coeff>),
    Mul(Box<Coeff>, Box<Coeff>),
    Div(Box<Coeff>, Box<Coeff>),
    Neg(Box<Coeff>),
}

impl Coeff {
    pub fn var(name: &str) -> Self {
        Coeff::Var(name.to_string())
    }
    pub fn int(n: i64) -> Self {
        Coeff::Const(BigRational::from_integer(BigInt::from(n)))
    }
    pub fn rational(n: i64, d: i64) -> Self {
        Coeff::Const(BigRational::new(BigInt::from(n), BigInt::from(d)))
    }
    pub fn one() -> Self {
        Coeff::int(1)
    }
    pub fn zero() -> Self {
        Coeff::int(0)
    }
    pub fn add(a: Coeff, b: Coeff) -> Self {
        Coeff::Add(Box::new(a), Box::new(b))
    }
    pub fn mul(a: Coeff, b: Coeff) -> Self {
        Coeff::Mul(Box::new(a), Box::new(b))
    }
    pub fn div(a: Coeff, b: Coeff) -> Self {
        Coeff::Div(Box::new(a), Box::new(b))
    }
    pub fn neg(a: Coeff) -> Self {
        Coeff::Neg(Box::new(a))
    }

    /// Fold constants and strip neutral elements. Purely structural; no
    /// polynomial algebra beyond exact rational arithmetic.
    pub fn simplify(self) -> Coeff {
        match self {
            Coeff::Add(a, b) => {
                let sa = a.simplify();
                let sb = b.simplify();
                match (sa, sb) {
                    (Coeff::Const(c1), Coeff::Const(c2)) => Coeff::Const(c1 + c2),
                    (Coeff::Const(c), other) | (other, Coeff::Const(c)) if c.is_zero() => other,
                    (sa, sb) => Coeff::Add(Box::new(sa), Box::new(sb)),
                }
            }
            Coeff::Mul(a, b) => {
                let sa = a.simplify();
                let sb = b.simplify();
                match (sa, sb) {
                    (Coeff::Const(c1), Coeff::Const(c2)) => Coeff::Const(c1 * c2),
                    (Coeff::Const(c), _) | (_, Coeff::Const(c)) if c.is_zero() => Coeff::zero(),
                    (Coeff::Const(c), other) | (other, Coeff::Const(c)) if c.is_one() => other,
                    (sa, sb) => Coeff::Mul(Box::new(sa), Box::new(sb)),
                }
            }
            Coeff::Div(a, b) => {
                let sa = a.simplify();
                let sb = b.simplify();
                match (sa, sb) {
                    (Coeff::Const(c1), Coeff::Const(c2)) if !c2.is_zero() => Coeff::Const(c1 / c2),
                    (sa, Coeff::Const(c)) if c.is_one() => sa,
                    (Coeff::Const(c), sb) if c.is_zero() && !sb.is_zero() => Coeff::zero(),
                    (sa, sb) => Coeff::Div(Box::new(sa), Box::new(sb)),
                }
            }
            Coeff::Neg(a) => {
                let sa = a.simplify();
                match sa {
                    Coeff::Const(c) => Coeff::Const(-c),
                    Coeff::Neg(inner) => *inner,
                    sa => Coeff::Neg(Box::new(sa)),
                }
            }
            other => other,
        }
    }

    /// True for an exact zero constant (after the caller has simplified).
    pub fn is_zero(&self) -> bool {
        matches!(self, Coeff::Const(c) if c.is_zero())
    }

    pub fn is_one(&self) -> bool {
        matches!(self, Coeff::Const(c) if c.is_one())
    }

    /// Evaluate at a numeric kinematic point. Returns `None` if a variable
    /// is missing from the point or a division by zero occurs; the caller
    /// treats that as a fatal consistency failure, not as zero.
    pub fn eval(&self, point: &BTreeMap<String, f64>) -> Option<f64> {
        match self {
            Coeff::Const(c) => c.to_f64(),
            Coeff::Var(v) => point.get(v).copied(),
            Coeff::Add(a, b) => Some(a.eval(point)? + b.eval(point)?),
            Coeff::Mul(a, b) => Some(a.eval(point)? * b.eval(point)?),
            Coeff::Div(a, b) => {
                let d = b.eval(point)?;
                if d == 0.0 {
                    None
                } else {
                    Some(a.eval(point)? / d)
                }
            }
            Coeff::Neg(a) => Some(-a.eval(point)?),
        }
    }
}

impl fmt::Display for Coeff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Coeff::Const(c) => {
                if c.is_integer() {
                    write!(f, "{}", c.to_integer())
                } else {
                    write!(f, "{}/{}", c.numer(), c.denom())
                }
            }
            Coeff::Var(v) => write!(f, "{}", v),
            Coeff::Add(a, b) => write!(f, "({} + {})", a, b),
            Coeff::Mul(a, b) => write!(f, "({}*{})", a, b),
            Coeff::Div(a, b) => write!(f, "({}/{})", a, b),
            Coeff::Neg(a) => write!(f, "(-{})", a),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_folding() {
        let e = Coeff::add(Coeff::int(1), Coeff::mul(Coeff::int(2), Coeff::int(3)));
        assert_eq!(e.simplify(), Coeff::int(7));
    }

    #[test]
    fn neutral_elements_stripped() {
        let s = Coeff::var("s");
        assert_eq!(Coeff::add(Coeff::int(0), s.clone()).simplify(), s);
        assert_eq!(Coeff::mul(Coeff::int(1), s.clone()).simplify(), s);
        assert_eq!(
            Coeff::mul(Coeff::int(0), s.clone()).simplify(),
            Coeff::zero()
        );
        assert_eq!(Coeff::div(s.clone(), Coeff::int(1)).simplify(), s);
        assert_eq!(Coeff::neg(Coeff::neg(s.clone())).simplify(), s);
    }

    #[test]
    fn exact_rational_arithmetic() {
        let e = Coeff::div(Coeff::int(1), Coeff::int(3));
        assert_eq!(e.simplify(), Coeff::rational(1, 3));
        let sum = Coeff::add(Coeff::rational(1, 3), Coeff::rational(2, 3)).simplify();
        assert!(sum.is_one());
    }

    #[test]
    fn eval_at_point() {
        let e = Coeff::div(
            Coeff::mul(Coeff::var("t"), Coeff::var("u")),
            Coeff::mul(Coeff::int(2), Coeff::var("s")),
        );
        let mut point = BTreeMap::new();
        point.insert("s".to_string(), 2.0);
        point.insert("t".to_string(), -1.0);
        point.insert("u".to_string(), -1.0);
        assert_eq!(e.eval(&point), Some(0.25));
        point.remove("u");
        assert_eq!(e.eval(&point), None);
    }
}
