use crate::denominator::Denominator;
use crate::integral::FamilyId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A symmetric scalar product of two momentum symbols, stored with the
/// smaller symbol first.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScalarProduct {
    a: String,
    b: String,
}

impl ScalarProduct {
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            Self {
                a: a.to_string(),
                b: b.to_string(),
            }
        } else {
            Self {
                a: b.to_string(),
                b: a.to_string(),
            }
        }
    }

    pub fn symbols(&self) -> (&str, &str) {
        (&self.a, &self.b)
    }
}

impl fmt::Display for ScalarProduct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}.{})", self.a, self.b)
    }
}

/// The completed basis of one integral family: the representative's
/// denominators in canonical order, a scalar-product basis sufficient to
/// express every denominator, and any extra non-physical denominators the
/// completion collaborator added so the basis spans the full
/// scalar-product space. Immutable once constructed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyBasis {
    pub family: FamilyId,
    pub denominators: Vec<Denominator>,
    pub scalar_products: Vec<ScalarProduct>,
    pub completion: Vec<Denominator>,
}

impl FamilyBasis {
    /// Total number of propagator slots, physical plus completion.
    pub fn width(&self) -> usize {
        self.denominators.len() + self.completion.len()
    }
}

/// One sub-family of denominators within a family, given by the indices of
/// the denominators that are present. Zero sectors reported by the
/// zero-sector collaborator use this shape.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SectorId {
    pub family: FamilyId,
    pub denominators: Vec<usize>,
}

/// Per-family basis lookup, populated once after consolidation.
#[derive(Clone, Debug, Default)]
pub struct BasisTable {
    bases: BTreeMap<FamilyId, FamilyBasis>,
}

impl BasisTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a basis; returns false (and leaves the table unchanged) if
    /// the family already has one. Bases are never replaced in place.
    pub fn insert(&mut self, basis: FamilyBasis) -> bool {
        if self.bases.contains_key(&basis.family) {
            return false;
        }
        self.bases.insert(basis.family, basis);
        true
    }

    pub fn get(&self, family: FamilyId) -> Option<&FamilyBasis> {
        self.bases.get(&family)
    }

    pub fn len(&self) -> usize {
        self.bases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }

    /// Iterate in family-id order.
    pub fn iter(&self) -> impl Iterator<Item = &FamilyBasis> {
        self.bases.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::momentum::MomentumLine;

    #[test]
    fn scalar_product_is_symmetric() {
        assert_eq!(ScalarProduct::new("k1", "p2"), ScalarProduct::new("p2", "k1"));
    }

    #[test]
    fn table_rejects_rebinding() {
        let basis = FamilyBasis {
            family: 0,
            denominators: vec![Denominator::massless(MomentumLine::symbol("k1"))],
            scalar_products: vec![ScalarProduct::new("k1", "k1")],
            completion: vec![],
        };
        let mut table = BasisTable::new();
        assert!(table.insert(basis.clone()));
        assert!(!table.insert(basis));
        assert_eq!(table.len(), 1);
    }
}
