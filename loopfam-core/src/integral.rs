use crate::symbolic::Coeff;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Index into the representative list produced by consolidation.
pub type FamilyId = usize;

/// Canonical identifier of one integral inside one family: the family index
/// plus the propagator-power vector, one entry per denominator of the
/// family's representative in canonical order. Equality is structural.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IntegralKey {
    pub family: FamilyId,
    pub powers: Vec<i64>,
}

impl IntegralKey {
    pub fn new(family: FamilyId, powers: Vec<i64>) -> Self {
        Self { family, powers }
    }

    /// Denominator indices with positive power: the sector this integral
    /// lives in, used for zero-sector pruning.
    pub fn sector(&self) -> Vec<usize> {
        self.powers
            .iter()
            .enumerate()
            .filter(|(_, &a)| a > 0)
            .map(|(i, _)| i)
            .collect()
    }
}

impl fmt::Display for IntegralKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "J({};", self.family)?;
        for (i, a) in self.powers.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", a)?;
        }
        write!(f, ")")
    }
}

/// A linear combination of integrals with exact symbolic coefficients.
/// Terms whose coefficient folds to an exact zero are dropped on insertion,
/// so structural equality compares collected forms. Serialized as a list
/// of `(key, coefficient)` pairs in key order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    into = "Vec<(IntegralKey, Coeff)>",
    from = "Vec<(IntegralKey, Coeff)>"
)]
pub struct LinearCombination {
    terms: BTreeMap<IntegralKey, Coeff>,
}

impl From<LinearCombination> for Vec<(IntegralKey, Coeff)> {
    fn from(lc: LinearCombination) -> Self {
        lc.terms.into_iter().collect()
    }
}

impl From<Vec<(IntegralKey, Coeff)>> for LinearCombination {
    fn from(pairs: Vec<(IntegralKey, Coeff)>) -> Self {
        let mut lc = LinearCombination::new();
        for (key, coeff) in pairs {
            lc.add_term(key, coeff);
        }
        lc
    }
}

impl LinearCombination {
    pub fn new() -> Self {
        Self {
            terms: BTreeMap::new(),
        }
    }

    /// The combination consisting of `key` with coefficient 1.
    pub fn from_key(key: IntegralKey) -> Self {
        Self::single(key, Coeff::one())
    }

    pub fn single(key: IntegralKey, coeff: Coeff) -> Self {
        let mut lc = Self::new();
        lc.add_term(key, coeff);
        lc
    }

    /// Add `coeff * key`, collecting with any existing term and dropping
    /// the entry if the collected coefficient is an exact zero.
    pub fn add_term(&mut self, key: IntegralKey, coeff: Coeff) {
        let coeff = coeff.simplify();
        if coeff.is_zero() {
            return;
        }
        let collected = match self.terms.remove(&key) {
            Some(existing) => Coeff::add(existing, coeff).simplify(),
            None => coeff,
        };
        if !collected.is_zero() {
            self.terms.insert(key, collected);
        }
    }

    /// Add `factor * other` to this combination.
    pub fn add_scaled(&mut self, other: &LinearCombination, factor: &Coeff) {
        for (key, coeff) in &other.terms {
            self.add_term(key.clone(), Coeff::mul(factor.clone(), coeff.clone()));
        }
    }

    pub fn is_zero(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn coeff_of(&self, key: &IntegralKey) -> Option<&Coeff> {
        self.terms.get(key)
    }

    pub fn contains_key(&self, key: &IntegralKey) -> bool {
        self.terms.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &IntegralKey> {
        self.terms.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&IntegralKey, &Coeff)> {
        self.terms.iter()
    }

    /// True iff this is exactly `1 * key`, the identity rule for `key`.
    pub fn is_identity_for(&self, key: &IntegralKey) -> bool {
        self.terms.len() == 1
            && self
                .terms
                .get(key)
                .map(|c| c.clone().simplify().is_one())
                .unwrap_or(false)
    }
}

impl fmt::Display for LinearCombination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.terms.is_empty() {
            return write!(f, "0");
        }
        for (i, (key, coeff)) in self.terms.iter().enumerate() {
            if i > 0 {
                write!(f, " + ")?;
            }
            write!(f, "{} * {}", coeff, key)?;
        }
        Ok(())
    }
}
