//! Boundary contracts for the external computer-algebra collaborators.
//!
//! Diagram algebra, symmetry search, basis completion, zero-sector
//! detection, the integration-by-parts solve, and numerical master
//! evaluation all live in external engines. The core only specifies their
//! I/O shapes; every call is a scoped, fail-fast boundary and failures
//! propagate as fatal errors, never as guessed substitute values.

use crate::basis::{FamilyBasis, SectorId};
use crate::denominator::DenominatorSet;
use crate::integral::{FamilyId, IntegralKey, LinearCombination};
use crate::momentum::MomentumShift;
use std::collections::BTreeMap;
use thiserror::Error;

/// Failure of an external collaborator: non-zero exit status, malformed
/// output, or a contract violation detected when consuming its result.
#[derive(Debug, Error)]
#[error("collaborator `{tool}` failed: {message}")]
pub struct CollabError {
    pub tool: String,
    pub message: String,
}

impl CollabError {
    pub fn new(tool: &str, message: impl Into<String>) -> Self {
        Self {
            tool: tool.to_string(),
            message: message.into(),
        }
    }
}

/// Finds, per input set, a loop-momentum relabeling that aligns equivalent
/// families before consolidation. The identity shift is a valid answer.
pub trait SymmetryFinder {
    fn shifts(
        &self,
        sets: &[DenominatorSet],
        loop_symbols: &[String],
        external_symbols: &[String],
    ) -> Result<Vec<MomentumShift>, CollabError>;
}

/// Completes one representative into a full family basis: scalar products
/// spanning every denominator, plus extra non-physical denominators where
/// the physical ones do not span the space.
pub trait BasisCompleter {
    fn complete(
        &self,
        family: FamilyId,
        representative: &DenominatorSet,
        loop_symbols: &[String],
        external_symbols: &[String],
    ) -> Result<FamilyBasis, CollabError>;
}

/// Reports which sub-families are identically zero (scaleless), so their
/// integrals can be pruned before the reduction engine runs.
pub trait ZeroSectorDetector {
    fn zero_sectors(&self, bases: &[&FamilyBasis]) -> Result<Vec<SectorId>, CollabError>;
}

/// Output of one external reduction run over one family: the rules, plus
/// the keys the engine declared irreducible.
#[derive(Clone, Debug, Default)]
pub struct Reduction {
    pub rules: Vec<(IntegralKey, LinearCombination)>,
    pub masters: Vec<IntegralKey>,
}

/// The external integration-by-parts engine, invoked once per family with
/// the keys that need expanding.
pub trait ReductionEngine {
    fn reduce(
        &self,
        basis: &FamilyBasis,
        keys: &[IntegralKey],
    ) -> Result<Reduction, CollabError>;
}

/// A numeric kinematic point assigning values to the invariant symbols.
pub type KinematicPoint = BTreeMap<String, f64>;

/// Central value and uncertainty of one numerically evaluated master.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MasterValue {
    pub value: f64,
    pub uncertainty: f64,
}

/// Numerically evaluates master integrals at a kinematic point to the
/// requested expansion order.
pub trait MasterEvaluator {
    fn evaluate(
        &self,
        masters: &[IntegralKey],
        point: &KinematicPoint,
        order: u32,
    ) -> Result<Vec<MasterValue>, CollabError>;
}
