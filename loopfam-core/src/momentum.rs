use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A linear combination of momentum symbols with exact rational coefficients.
/// Used both for propagator momenta (e.g. `k1 - p2`) and for the replacement
/// side of a momentum shift.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MomentumLine {
    /// Maps symbol name to coefficient; zero coefficients are never stored.
    terms: BTreeMap<String, BigRational>,
}

impl MomentumLine {
    pub fn new() -> Self {
        Self {
            terms: BTreeMap::new(),
        }
    }

    /// The line consisting of a single symbol with coefficient 1.
    pub fn symbol(name: &str) -> Self {
        let mut terms = BTreeMap::new();
        terms.insert(name.to_string(), BigRational::from_integer(BigInt::from(1)));
        Self { terms }
    }

    pub fn is_zero(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn terms(&self) -> impl Iterator<Item = (&str, &BigRational)> {
        self.terms.iter().map(|(s, c)| (s.as_str(), c))
    }

    /// Add `coeff * symbol` to this line, dropping the entry if it cancels.
    pub fn add_term(&mut self, symbol: &str, coeff: BigRational) {
        if coeff.is_zero() {
            return;
        }
        let entry = self
            .terms
            .entry(symbol.to_string())
            .or_insert_with(BigRational::zero);
        *entry += coeff;
        if entry.is_zero() {
            self.terms.remove(symbol);
        }
    }

    /// Add `factor * other` to this line.
    pub fn add_scaled(&mut self, other: &MomentumLine, factor: &BigRational) {
        for (sym, c) in &other.terms {
            self.add_term(sym, c * factor);
        }
    }

    /// Flip the sign of every coefficient.
    pub fn negated(&self) -> Self {
        let terms = self.terms.iter().map(|(s, c)| (s.clone(), -c)).collect();
        Self { terms }
    }

    /// Canonical sign convention: the coefficient of the first symbol in
    /// symbol order is positive. A propagator momentum enters squared, so
    /// the two signs describe the same denominator.
    pub fn sign_normalized(&self) -> Self {
        match self.terms.values().next() {
            Some(first) if first < &BigRational::zero() => self.negated(),
            _ => self.clone(),
        }
    }
}

impl fmt::Display for MomentumLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.terms.is_empty() {
            return write!(f, "0");
        }
        let mut first = true;
        for (sym, c) in &self.terms {
            let neg = c < &BigRational::zero();
            let mag = if neg { -c } else { c.clone() };
            if first {
                if neg {
                    write!(f, "-")?;
                }
                first = false;
            } else {
                f.write_str(if neg { " - " } else { " + " })?;
            }
            if mag == BigRational::from_integer(BigInt::from(1)) {
                write!(f, "{}", sym)?;
            } else if mag.is_integer() {
                write!(f, "{}*{}", mag.to_integer(), sym)?;
            } else {
                write!(f, "{}/{}*{}", mag.numer(), mag.denom(), sym)?;
            }
        }
        Ok(())
    }
}

/// A substitution of loop-momentum symbols by linear combinations of
/// loop/external momenta, supplied by the external symmetry finder.
/// An empty map is the identity shift.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MomentumShift {
    map: BTreeMap<String, MomentumLine>,
}

impl MomentumShift {
    pub fn identity() -> Self {
        Self {
            map: BTreeMap::new(),
        }
    }

    pub fn with(mut self, symbol: &str, replacement: MomentumLine) -> Self {
        self.map.insert(symbol.to_string(), replacement);
        self
    }

    pub fn is_identity(&self) -> bool {
        self.map
            .iter()
            .all(|(sym, line)| *line == MomentumLine::symbol(sym))
    }

    /// Apply the shift to a momentum line, substituting every mapped symbol.
    pub fn apply(&self, line: &MomentumLine) -> MomentumLine {
        let mut out = MomentumLine::new();
        for (sym, coeff) in line.terms() {
            match self.map.get(sym) {
                Some(replacement) => out.add_scaled(replacement, coeff),
                None => out.add_term(sym, coeff.clone()),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rat(n: i64) -> BigRational {
        BigRational::from_integer(BigInt::from(n))
    }

    #[test]
    fn sign_normalization_identifies_opposite_lines() {
        let mut a = MomentumLine::symbol("k1");
        a.add_term("p1", rat(-1));
        let b = a.negated();
        assert_ne!(a, b);
        assert_eq!(a.sign_normalized(), b.sign_normalized());
    }

    #[test]
    fn cancelling_terms_vanish() {
        let mut line = MomentumLine::symbol("k1");
        line.add_term("k1", rat(-1));
        assert!(line.is_zero());
    }

    #[test]
    fn shift_substitutes_mapped_symbols_only() {
        // k2 -> k1 - p1, leaving k1 untouched
        let mut repl = MomentumLine::symbol("k1");
        repl.add_term("p1", rat(-1));
        let shift = MomentumShift::identity().with("k2", repl);

        let mut line = MomentumLine::symbol("k2");
        line.add_term("p1", rat(1));
        let shifted = shift.apply(&line);
        assert_eq!(shifted, MomentumLine::symbol("k1"));
    }

    #[test]
    fn identity_shift_detection() {
        assert!(MomentumShift::identity().is_identity());
        let explicit = MomentumShift::identity().with("k1", MomentumLine::symbol("k1"));
        assert!(explicit.is_identity());
        let real = MomentumShift::identity().with("k1", MomentumLine::symbol("k2"));
        assert!(!real.is_identity());
    }
}
