//! Exercises the corpus across a flush-to-disk/reload cycle: entries
//! written by `check_sequence_coverage_and_update` must survive a fresh
//! `Corpus::initialize` against the same directory with identical
//! dedup/partition placement.

use medusa::artifacts::ArtifactSet;
use medusa::corpus::Corpus;
use medusa::coverage::{marker, CoverageMap};
use medusa::sequence::{Call, CallData, CallSequence, CallSequenceElement};

use primitive_types::{H160, H256, U256};

fn raw_sequence(byte: u8) -> CallSequence {
    CallSequence {
        elements: vec![CallSequenceElement {
            call: Call {
                from: H160::repeat_byte(1),
                to: Some(H160::repeat_byte(2)),
                value: U256::zero(),
                gas_limit: 1_000_000,
                data: CallData::Raw(vec![byte, byte, byte]),
            },
            contract_name: None,
            block_number_delay: 1,
            block_timestamp_delay: 1,
        }],
    }
}

#[test]
fn flushed_mutable_entries_survive_a_fresh_initialize() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path().to_path_buf();

    let corpus = Corpus::new(root.clone());
    let mut cov = CoverageMap::new();
    cov.update_at(H160::repeat_byte(2), H256::repeat_byte(9), marker::jump_edge(1, 2));
    corpus
        .check_sequence_coverage_and_update(raw_sequence(0xAB), &cov, true)
        .expect("coverage update");
    assert_eq!(corpus.mutable_len(), 1);

    let artifacts = ArtifactSet::new(Vec::new());
    let reloaded = Corpus::new(root);
    let (active, total) = reloaded
        .initialize(&artifacts, |_sequence| Ok(CoverageMap::new()))
        .expect("initialize");

    assert_eq!(total, 1);
    assert_eq!(active, 1);
    assert_eq!(reloaded.mutable_len(), 1);
}

#[test]
fn duplicate_sequences_across_flushes_still_dedupe_on_reload() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path().to_path_buf();

    let corpus = Corpus::new(root.clone());
    let mut cov = CoverageMap::new();
    cov.update_at(H160::repeat_byte(2), H256::repeat_byte(9), marker::jump_edge(3, 4));
    corpus
        .check_sequence_coverage_and_update(raw_sequence(0x01), &cov, true)
        .expect("first flush");

    let mut cov2 = CoverageMap::new();
    cov2.update_at(H160::repeat_byte(2), H256::repeat_byte(9), marker::jump_edge(5, 6));
    corpus
        .check_sequence_coverage_and_update(raw_sequence(0x01), &cov2, true)
        .expect("second flush is identical content, new coverage though");

    // Same sequence content hashes identically regardless of the coverage
    // that produced it, so the second insert is a no-op at the corpus
    // level even though it carried new branches.
    assert_eq!(corpus.mutable_len(), 1);

    let artifacts = ArtifactSet::new(Vec::new());
    let reloaded = Corpus::new(root);
    let (_active, total) = reloaded
        .initialize(&artifacts, |_sequence| Ok(CoverageMap::new()))
        .expect("initialize");
    assert_eq!(total, 1);
}
