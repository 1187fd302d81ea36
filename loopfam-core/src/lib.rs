// Family subsystem: canonical denominator sets and superset consolidation
pub mod momentum;
pub mod denominator;
pub mod family;
pub mod basis;

// Reduction subsystem: symbolic coefficients, rule cache, and orchestration
pub mod symbolic;
pub mod integral;
pub mod store;
pub mod collab;
pub mod pipeline;

// Public family API
pub use crate::basis::{BasisTable, FamilyBasis, ScalarProduct, SectorId};
pub use crate::denominator::{Denominator, DenominatorSet};
pub use crate::family::{consolidate, embed_pairs, embed_powers, Consolidation};
pub use crate::momentum::{MomentumLine, MomentumShift};

// Public reduction API
pub use crate::collab::{
    BasisCompleter, CollabError, KinematicPoint, MasterEvaluator, MasterValue, Reduction,
    ReductionEngine, SymmetryFinder, ZeroSectorDetector,
};
pub use crate::integral::{FamilyId, IntegralKey, LinearCombination};
pub use crate::pipeline::{DiagramIntegral, Pipeline, PipelineError, RunOutput};
pub use crate::store::{LoadReport, RuleStore, StoreError};
pub use crate::symbolic::Coeff;
