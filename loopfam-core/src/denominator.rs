use crate::momentum::{MomentumLine, MomentumShift};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// One propagator denominator `(sum_i c_i q_i)^2 - m^2`, identified up to the
/// overall sign of its momentum line.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Denominator {
    line: MomentumLine,
    /// Mass symbol; `None` for a massless propagator.
    mass: Option<String>,
}

impl Denominator {
    /// Construct with the canonical sign convention already applied.
    pub fn new(line: MomentumLine, mass: Option<&str>) -> Self {
        Self {
            line: line.sign_normalized(),
            mass: mass.map(str::to_string),
        }
    }

    pub fn massless(line: MomentumLine) -> Self {
        Self::new(line, None)
    }

    pub fn line(&self) -> &MomentumLine {
        &self.line
    }

    pub fn mass(&self) -> Option<&str> {
        self.mass.as_deref()
    }

    /// Apply a momentum shift and re-normalize the sign.
    pub fn shifted(&self, shift: &MomentumShift) -> Self {
        Self {
            line: shift.apply(&self.line).sign_normalized(),
            mass: self.mass.clone(),
        }
    }
}

impl fmt::Display for Denominator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.mass {
            Some(m) => write!(f, "({})^2 - {}^2", self.line, m),
            None => write!(f, "({})^2", self.line),
        }
    }
}

/// An unordered, deduplicated collection of denominators in canonical form.
/// Immutable once built; element order is the canonical `Denominator` order.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DenominatorSet {
    elements: BTreeSet<Denominator>,
}

impl DenominatorSet {
    /// Canonicalize every element and deduplicate. Never fails; an empty
    /// input yields the valid empty set.
    pub fn normalize<I: IntoIterator<Item = Denominator>>(denominators: I) -> Self {
        let elements = denominators
            .into_iter()
            .map(|d| Denominator::new(d.line.clone(), d.mass.as_deref()))
            .collect();
        Self { elements }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Denominator> {
        self.elements.iter()
    }

    pub fn contains(&self, d: &Denominator) -> bool {
        self.elements.contains(d)
    }

    /// True iff every element of `self` appears in `other`.
    pub fn is_subset(&self, other: &DenominatorSet) -> bool {
        self.elements.is_subset(&other.elements)
    }

    /// Apply a momentum shift to every element, then re-canonicalize.
    pub fn shifted(&self, shift: &MomentumShift) -> Self {
        if shift.is_identity() {
            return self.clone();
        }
        Self {
            elements: self.elements.iter().map(|d| d.shifted(shift)).collect(),
        }
    }

    /// Position of `d` in canonical element order, if present.
    pub fn position(&self, d: &Denominator) -> Option<usize> {
        self.elements.iter().position(|e| e == d)
    }
}

impl fmt::Display for DenominatorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, d) in self.elements.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigInt;
    use num_rational::BigRational;

    fn line(parts: &[(&str, i64)]) -> MomentumLine {
        let mut l = MomentumLine::new();
        for (s, c) in parts {
            l.add_term(s, BigRational::from_integer(BigInt::from(*c)));
        }
        l
    }

    #[test]
    fn opposite_sign_propagators_compare_equal() {
        let a = Denominator::massless(line(&[("k1", 1), ("p1", -1)]));
        let b = Denominator::massless(line(&[("k1", -1), ("p1", 1)]));
        assert_eq!(a, b);
    }

    #[test]
    fn normalize_deduplicates() {
        let a = Denominator::massless(line(&[("k1", 1)]));
        let b = Denominator::massless(line(&[("k1", -1)]));
        let set = DenominatorSet::normalize([a, b]);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn mass_distinguishes_denominators() {
        let a = Denominator::new(line(&[("k1", 1)]), Some("m"));
        let b = Denominator::massless(line(&[("k1", 1)]));
        assert_ne!(a, b);
        let set = DenominatorSet::normalize([a, b]);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn subset_test() {
        let d1 = Denominator::massless(line(&[("k1", 1)]));
        let d2 = Denominator::massless(line(&[("k1", 1), ("p1", -1)]));
        let small = DenominatorSet::normalize([d1.clone()]);
        let big = DenominatorSet::normalize([d1, d2]);
        assert!(small.is_subset(&big));
        assert!(!big.is_subset(&small));
        assert!(DenominatorSet::default().is_subset(&small));
    }

    #[test]
    fn shift_aligns_equivalent_sets() {
        // {k2} shifted by k2 -> k1 matches {k1}
        let shift = MomentumShift::identity().with("k2", MomentumLine::symbol("k1"));
        let a = DenominatorSet::normalize([Denominator::massless(MomentumLine::symbol("k2"))]);
        let b = DenominatorSet::normalize([Denominator::massless(MomentumLine::symbol("k1"))]);
        assert_eq!(a.shifted(&shift), b);
    }
}
