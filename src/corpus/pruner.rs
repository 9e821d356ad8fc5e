//! Coverage-subsumption pruning: periodically drops mutable sequences
//! whose coverage contribution is now redundant with the rest of the
//! mutable set, keeping the corpus from growing without bound over a long
//! campaign (§4.7 Design Notes, §9).
//!
//! Net new relative to the teacher, which has no analogous pass; grounded
//! on the general "replay everything else, diff coverage" technique
//! described in §9 and built in the teacher's worker-loop idiom (a
//! dedicated chain clone per replay, never touching the live corpus while
//! scoring it).

use tracing::{debug, info};

use crate::chain::{ChainTracer, TestChain};
use crate::coverage::CoverageMap;
use crate::error::Result;
use crate::sequence::CallSequence;

/// One round of pruning: given every currently-live mutable sequence and a
/// function that replays a sequence against a fresh chain clone and
/// returns its coverage, returns the ids that are safe to drop because the
/// rest of the set already reaches everything they reach.
///
/// Cancellation is cooperative: callers poll `cancelled` between
/// sequences and stop as soon as it reports true, leaving the corpus
/// exactly as it was before the round began.
pub fn find_redundant<F>(
    entries: &[(u64, CallSequence)],
    mut replay: F,
    cancelled: impl Fn() -> bool,
) -> Result<Vec<u64>>
where
    F: FnMut(&CallSequence) -> Result<CoverageMap>,
{
    if entries.len() <= 1 {
        return Ok(Vec::new());
    }

    let mut full = CoverageMap::new();
    let mut per_entry = Vec::with_capacity(entries.len());
    for (id, sequence) in entries {
        let coverage = replay(sequence)?;
        full.update(&coverage);
        per_entry.push((*id, coverage));
    }

    let mut redundant = Vec::new();
    for (index, (id, _)) in entries.iter().enumerate() {
        if cancelled() {
            info!("pruning round cancelled midway; keeping all remaining entries");
            break;
        }
        let mut without = CoverageMap::new();
        for (other_index, (_, coverage)) in per_entry.iter().enumerate() {
            if other_index != index {
                without.update(coverage);
            }
        }
        if without.branches_hit() >= full.branches_hit() {
            debug!(id, "mutable sequence is redundant; marking for removal");
            redundant.push(*id);
        }
    }
    Ok(redundant)
}

/// Replays a sequence against a throwaway clone of `base` for scoring
/// purposes, never touching `base` itself.
pub fn replay_for_scoring(base: &TestChain, sequence: &CallSequence) -> Result<CoverageMap> {
    let mut tracer = ChainTracer::new();
    let mut chain = base.clone_with_setup(|_| Ok(()))?;
    let mut coverage = CoverageMap::new();
    for element in &sequence.elements {
        let (_, outcomes) = chain.commit_block(
            &mut tracer,
            &[crate::chain::ChainCall {
                from: element.call.from,
                to: element.call.to,
                value: element.call.value,
                gas_limit: element.call.gas_limit,
                data: element.call.data.encode(),
            }],
            element.block_number_delay,
            element.block_timestamp_delay,
        )?;
        let reverted = outcomes.first().map(|o| !o.success).unwrap_or(true);
        coverage.update(&tracer.take_coverage(reverted));
    }
    Ok(coverage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_entry_set_has_nothing_redundant() {
        let entries = vec![(1u64, CallSequence::default())];
        let result = find_redundant(&entries, |_| Ok(CoverageMap::new()), || false).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn cancellation_stops_the_round_early() {
        let entries = vec![
            (1u64, CallSequence::default()),
            (2u64, CallSequence::default()),
            (3u64, CallSequence::default()),
        ];
        let result = find_redundant(&entries, |_| Ok(CoverageMap::new()), || true).unwrap();
        assert!(result.is_empty());
    }
}
