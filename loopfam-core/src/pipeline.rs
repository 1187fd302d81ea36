//! Thin orchestration of one reduction run: symmetrize, consolidate,
//! complete bases, prune zero sectors, invoke the external engine per
//! representative, populate one store through a single writer, and
//! substitute the amplitude. Every boundary is fail-fast; nothing is
//! retried here — retries are an operator action.

use crate::basis::{BasisTable, SectorId};
use crate::collab::{
    BasisCompleter, CollabError, KinematicPoint, MasterEvaluator, MasterValue, ReductionEngine,
    SymmetryFinder, ZeroSectorDetector,
};
use crate::denominator::DenominatorSet;
use crate::family::{consolidate, embed_pairs, Consolidation};
use crate::integral::{FamilyId, IntegralKey, LinearCombination};
use crate::store::{RuleStore, StoreError};
use crate::symbolic::Coeff;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Collaborator(#[from] CollabError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("pipeline inconsistency: {0}")]
    Inconsistent(String),
}

/// One diagram's scalar integral: its denominator set, the propagator
/// powers (aligned to the set's canonical element order), and the symbolic
/// prefactor the diagram algebra produced.
#[derive(Clone, Debug)]
pub struct DiagramIntegral {
    pub denominators: DenominatorSet,
    pub powers: Vec<i64>,
    pub prefactor: Coeff,
}

/// Everything one run produces; the store carries the accumulated rules
/// and can be persisted for the next run.
#[derive(Debug)]
pub struct RunOutput {
    pub consolidation: Consolidation,
    pub bases: BasisTable,
    pub zero_sectors: Vec<SectorId>,
    pub store: RuleStore,
    /// The amplitude in family notation, zero sectors already pruned.
    pub amplitude: LinearCombination,
    /// The amplitude expressed in master integrals.
    pub reduced: LinearCombination,
}

pub struct Pipeline<'a> {
    pub symmetry: &'a dyn SymmetryFinder,
    pub completer: &'a dyn BasisCompleter,
    pub zero_detector: &'a dyn ZeroSectorDetector,
    pub engine: &'a dyn ReductionEngine,
    pub loop_symbols: Vec<String>,
    pub external_symbols: Vec<String>,
}

impl<'a> Pipeline<'a> {
    pub fn run(
        &self,
        diagrams: &[DiagramIntegral],
        store_name: &str,
    ) -> Result<RunOutput, PipelineError> {
        // Symmetrize: one shift per input set, identity allowed.
        let sets: Vec<DenominatorSet> =
            diagrams.iter().map(|d| d.denominators.clone()).collect();
        let shifts =
            self.symmetry
                .shifts(&sets, &self.loop_symbols, &self.external_symbols)?;
        if shifts.len() != sets.len() {
            return Err(PipelineError::Inconsistent(format!(
                "symmetry finder returned {} shifts for {} sets",
                shifts.len(),
                sets.len()
            )));
        }
        let symmetrized: Vec<DenominatorSet> = sets
            .iter()
            .zip(&shifts)
            .map(|(s, shift)| s.shifted(shift))
            .collect();

        let consolidation = consolidate(&symmetrized);
        info!(
            diagrams = diagrams.len(),
            families = consolidation.family_count(),
            "consolidated"
        );

        // One completed basis per representative, in family order.
        let mut bases = BasisTable::new();
        for (fid, rep) in consolidation.representatives.iter().enumerate() {
            let basis = self.completer.complete(
                fid,
                rep,
                &self.loop_symbols,
                &self.external_symbols,
            )?;
            if basis.family != fid {
                return Err(PipelineError::Inconsistent(format!(
                    "basis completion returned family {} for representative {}",
                    basis.family, fid
                )));
            }
            if !bases.insert(basis) {
                return Err(PipelineError::Inconsistent(format!(
                    "duplicate basis for family {fid}"
                )));
            }
        }

        let basis_refs: Vec<_> = bases.iter().collect();
        let zero_sectors = self.zero_detector.zero_sectors(&basis_refs)?;
        let zero_lookup: BTreeSet<&SectorId> = zero_sectors.iter().collect();

        // Express every diagram integral in its family's notation, dropping
        // integrals that live in a scaleless sector.
        let mut amplitude = LinearCombination::new();
        let mut needed: BTreeMap<FamilyId, BTreeSet<IntegralKey>> = BTreeMap::new();
        for (i, diagram) in diagrams.iter().enumerate() {
            if diagram.powers.len() != diagram.denominators.len() {
                return Err(PipelineError::Inconsistent(format!(
                    "diagram {i}: {} powers for {} denominators",
                    diagram.powers.len(),
                    diagram.denominators.len()
                )));
            }
            let fid = consolidation.family_index[i];
            let rep = &consolidation.representatives[fid];
            let shifted: Vec<_> = diagram
                .denominators
                .iter()
                .map(|d| d.shifted(&shifts[i]))
                .zip(diagram.powers.iter().copied())
                .collect();
            let key = embed_pairs(rep, fid, &shifted).ok_or_else(|| {
                PipelineError::Inconsistent(format!(
                    "diagram {i} not covered by representative {fid}"
                ))
            })?;
            let sector = SectorId {
                family: fid,
                denominators: key.sector(),
            };
            if zero_lookup.contains(&sector) {
                debug!(diagram = i, key = %key, "scaleless, pruned");
                continue;
            }
            needed.entry(fid).or_default().insert(key.clone());
            amplitude.add_term(key, diagram.prefactor.clone());
        }

        // Reductions run per family and are only written back here,
        // sequentially, through the conflict-checked store.
        let mut store = RuleStore::new(store_name);
        let mut pairs = Vec::new();
        for (fid, keys) in &needed {
            let basis = bases.get(*fid).ok_or_else(|| {
                PipelineError::Inconsistent(format!("no basis for family {fid}"))
            })?;
            let wanted: Vec<IntegralKey> = keys.iter().cloned().collect();
            let reduction = self.engine.reduce(basis, &wanted)?;
            for master in reduction.masters {
                store.declare_master(master)?;
            }
            pairs.extend(reduction.rules);
        }
        let report = store.load(pairs)?;
        info!(
            inserted = report.inserted,
            duplicates = report.duplicates,
            "store populated"
        );

        let reduced = store.apply(&amplitude)?;
        store.verify_masters()?;
        for key in reduced.keys() {
            if store.masters().all(|m| m != key) {
                return Err(PipelineError::Inconsistent(format!(
                    "amplitude still contains unreduced integral {key}"
                )));
            }
        }

        Ok(RunOutput {
            consolidation,
            bases,
            zero_sectors,
            store,
            amplitude,
            reduced,
        })
    }

    /// Substitute numeric master values into a reduced amplitude at one
    /// kinematic point. Uncertainties combine linearly; any residual
    /// symbolic dependence in a coefficient is fatal.
    pub fn evaluate(
        &self,
        evaluator: &dyn MasterEvaluator,
        reduced: &LinearCombination,
        point: &KinematicPoint,
        order: u32,
    ) -> Result<MasterValue, PipelineError> {
        let masters: Vec<IntegralKey> = reduced.keys().cloned().collect();
        let values = evaluator.evaluate(&masters, point, order)?;
        if values.len() != masters.len() {
            return Err(PipelineError::Inconsistent(format!(
                "evaluator returned {} values for {} masters",
                values.len(),
                masters.len()
            )));
        }
        let mut total = 0.0;
        let mut uncertainty = 0.0;
        for (key, value) in masters.iter().zip(&values) {
            let coeff = reduced
                .coeff_of(key)
                .and_then(|c| c.eval(point))
                .ok_or_else(|| {
                    PipelineError::Inconsistent(format!(
                        "coefficient of {key} does not evaluate at the given point"
                    ))
                })?;
            total += coeff * value.value;
            uncertainty += coeff.abs() * value.uncertainty;
        }
        Ok(MasterValue {
            value: total,
            uncertainty,
        })
    }
}
