use crate::denominator::{Denominator, DenominatorSet};
use crate::integral::{FamilyId, IntegralKey};
use std::collections::HashMap;
use tracing::debug;

/// Result of superset consolidation: a minimal list of representative
/// supersets plus, for every input set, the index of the representative
/// that covers it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Consolidation {
    pub representatives: Vec<DenominatorSet>,
    pub family_index: Vec<FamilyId>,
}

impl Consolidation {
    pub fn family_count(&self) -> usize {
        self.representatives.len()
    }

    pub fn representative_of(&self, input: usize) -> &DenominatorSet {
        &self.representatives[self.family_index[input]]
    }
}

/// Group input sets into integral families by greedy superset covering.
///
/// Sets are processed in order of decreasing cardinality, ties broken by
/// original input position (stable). Each set is assigned to the first
/// existing representative that contains it, in representative creation
/// order; otherwise it becomes a new representative itself. Larger sets
/// first makes later, smaller sets far more likely to land inside an
/// existing representative, keeping the family count small; this is a
/// heuristic, not a global minimum-cover solve, and the processing order is
/// part of the contract.
///
/// Repeated identical sets cost one representative search: the result is
/// memoized per distinct set value.
///
/// Cannot fail: empty sets are valid and collapse into whichever
/// representative is found first (every set covers the empty set).
pub fn consolidate(sets: &[DenominatorSet]) -> Consolidation {
    let mut order: Vec<usize> = (0..sets.len()).collect();
    order.sort_by(|&a, &b| sets[b].len().cmp(&sets[a].len()).then(a.cmp(&b)));

    let mut representatives: Vec<DenominatorSet> = Vec::new();
    let mut family_index = vec![0 as FamilyId; sets.len()];
    let mut memo: HashMap<DenominatorSet, FamilyId> = HashMap::new();

    for &i in &order {
        let set = &sets[i];
        if let Some(&fid) = memo.get(set) {
            family_index[i] = fid;
            continue;
        }
        let fid = match representatives.iter().position(|r| set.is_subset(r)) {
            Some(existing) => existing,
            None => {
                debug!(
                    family = representatives.len(),
                    size = set.len(),
                    input = i,
                    "new representative"
                );
                representatives.push(set.clone());
                representatives.len() - 1
            }
        };
        memo.insert(set.clone(), fid);
        family_index[i] = fid;
    }

    debug!(
        inputs = sets.len(),
        families = representatives.len(),
        "consolidation done"
    );
    Consolidation {
        representatives,
        family_index,
    }
}

/// Place `(denominator, power)` pairs at the denominators' positions in
/// the covering representative; absent positions get power 0, pairs
/// landing on the same denominator accumulate. Returns `None` if any
/// denominator is not in `rep`.
pub fn embed_pairs(
    rep: &DenominatorSet,
    family: FamilyId,
    pairs: &[(Denominator, i64)],
) -> Option<IntegralKey> {
    let mut out = vec![0i64; rep.len()];
    for (d, a) in pairs {
        let pos = rep.position(d)?;
        out[pos] += a;
    }
    Some(IntegralKey::new(family, out))
}

/// Express an integral given by powers over `set`'s denominators (in the
/// set's canonical element order) as a key over the covering
/// representative. Returns `None` if `powers` does not match `set` in
/// length or `set` is not contained in `rep`.
pub fn embed_powers(
    set: &DenominatorSet,
    rep: &DenominatorSet,
    family: FamilyId,
    powers: &[i64],
) -> Option<IntegralKey> {
    if powers.len() != set.len() {
        return None;
    }
    let pairs: Vec<_> = set.iter().cloned().zip(powers.iter().copied()).collect();
    embed_pairs(rep, family, &pairs)
}
