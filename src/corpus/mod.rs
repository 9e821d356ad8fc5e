//! The corpus (C7): partitioned in-memory call sequence sets, on-disk
//! persistence, replay at startup, and the weighted mutation chooser.
//!
//! Net new relative to the teacher — `indexed_corpus.rs`'s
//! `IndexedInMemoryCorpus` and `corpus_initializer.rs` ground the shape of
//! "replay persisted entries against a chain clone, measure coverage" but
//! neither partitions entries the way §4.7 requires, so the three-way
//! split and its dedup/flush contract are built from scratch in the
//! teacher's idiom (a single mutex-guarded struct, `parking_lot::Mutex`
//! per the concurrency discipline in §5).

pub mod chooser;
pub mod disk;
pub mod pruner;

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::artifacts::ArtifactSet;
use crate::coverage::CoverageMap;
use crate::error::Result;
use crate::sequence::CallSequence;

use self::chooser::WeightedChooser;
use self::disk::Partition;

struct PendingFile {
    partition: Partition,
    file_name: String,
    sequence: CallSequence,
}

struct CorpusInner {
    mutable: std::collections::HashMap<u64, CallSequence>,
    mutable_chooser: WeightedChooser,
    mutable_chooser_index: std::collections::HashMap<u64, usize>,
    immutable: Vec<CallSequence>,
    test_results: Vec<CallSequence>,
    dedup_hashes: HashSet<[u8; 32]>,
    unexecuted: VecDeque<CallSequence>,
    next_id: u64,
    pending: Vec<PendingFile>,
}

impl CorpusInner {
    fn new() -> Self {
        Self {
            mutable: Default::default(),
            mutable_chooser: WeightedChooser::new(),
            mutable_chooser_index: Default::default(),
            immutable: Vec::new(),
            test_results: Vec::new(),
            dedup_hashes: HashSet::new(),
            unexecuted: VecDeque::new(),
            next_id: 0,
            pending: Vec::new(),
        }
    }
}

impl Default for CorpusInner {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Corpus {
    root: PathBuf,
    inner: Mutex<CorpusInner>,
    coverage: Mutex<CoverageMap>,
}

fn unix_nanos_now() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}

impl Corpus {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            inner: Mutex::new(CorpusInner::new()),
            coverage: Mutex::new(CoverageMap::new()),
        }
    }

    fn read_partition_files(&self, partition: Partition) -> std::io::Result<Vec<(PathBuf, Vec<u8>)>> {
        let dir = disk::partition_path(&self.root, partition);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = std::fs::read(entry.path())?;
            out.push((entry.path(), bytes));
        }
        Ok(out)
    }

    /// Replays every persisted sequence against `replay` (a chain clone
    /// with a coverage tracer attached, per the caller's responsibility),
    /// in the order `test_results`, then `mutable`, then `immutable`
    /// (§4.7). Returns `(active, total)`: `active` counts sequences
    /// accepted as valid, `total` counts every file considered.
    pub fn initialize<F>(&self, artifacts: &ArtifactSet, mut replay: F) -> Result<(usize, usize)>
    where
        F: FnMut(&CallSequence) -> Result<CoverageMap>,
    {
        let mut active = 0usize;
        let mut total = 0usize;

        for partition in [Partition::TestResults, Partition::Mutable, Partition::Immutable] {
            let files = match self.read_partition_files(partition) {
                Ok(files) => files,
                Err(e) => {
                    warn!(?partition, error = %e, "failed to read corpus partition directory");
                    continue;
                }
            };
            for (path, bytes) in files {
                total += 1;
                let sequence = match disk::deserialize_sequence(&bytes, artifacts) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(file = %path.display(), error = %e, "dropping malformed corpus entry");
                        continue;
                    }
                };
                let coverage = match replay(&sequence) {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(file = %path.display(), error = %e, "dropping corpus entry that failed replay");
                        continue;
                    }
                };
                self.coverage.lock().update(&coverage);
                active += 1;

                let mut inner = self.inner.lock();
                inner.unexecuted.push_back(sequence.clone());
                if partition == Partition::Mutable {
                    let hash = disk::sequence_hash(&sequence);
                    if inner.dedup_hashes.insert(hash) {
                        let id = inner.next_id;
                        inner.next_id += 1;
                        let chooser_idx = inner.mutable_chooser.insert(id, 1);
                        inner.mutable_chooser_index.insert(id, chooser_idx);
                        inner.mutable.insert(id, sequence);
                    }
                }
            }
        }

        info!(active, total, "corpus replay complete");
        Ok((active, total))
    }

    /// Called after each worker-executed sequence. `new_nonrevert`/
    /// `new_revert` come from merging the sequence's tracer output into
    /// the global coverage map (§4.7, §8 seed scenario 3).
    pub fn check_sequence_coverage_and_update(
        &self,
        sequence: CallSequence,
        sequence_coverage: &CoverageMap,
        flush: bool,
    ) -> Result<()> {
        let (new_nonrevert, new_revert) = self.coverage.lock().update(sequence_coverage);

        if new_nonrevert {
            self.insert_mutable(sequence, 1);
        } else if new_revert {
            self.insert_immutable(sequence);
        } else {
            debug!("sequence discarded: no new coverage");
        }

        if flush {
            self.flush()?;
        }
        Ok(())
    }

    fn insert_mutable(&self, sequence: CallSequence, weight: u32) {
        let hash = disk::sequence_hash(&sequence);
        let mut inner = self.inner.lock();
        if !inner.dedup_hashes.insert(hash) {
            return;
        }
        let id = inner.next_id;
        inner.next_id += 1;
        let chooser_idx = inner.mutable_chooser.insert(id, weight);
        inner.mutable_chooser_index.insert(id, chooser_idx);
        inner.mutable.insert(id, sequence.clone());
        inner.pending.push(PendingFile {
            partition: Partition::Mutable,
            file_name: disk::file_name(unix_nanos_now()),
            sequence,
        });
    }

    fn insert_immutable(&self, sequence: CallSequence) {
        let hash = disk::sequence_hash(&sequence);
        let mut inner = self.inner.lock();
        if !inner.dedup_hashes.insert(hash) {
            return;
        }
        inner.immutable.push(sequence.clone());
        inner.pending.push(PendingFile {
            partition: Partition::Immutable,
            file_name: disk::file_name(unix_nanos_now()),
            sequence,
        });
    }

    /// Called by test case providers when a test fires (§4.11). Always
    /// stored, never added to the mutation chooser, and deduped exactly
    /// like the other partitions (§8 seed scenario 4).
    pub fn add_test_result_call_sequence(&self, sequence: CallSequence, flush: bool) -> Result<()> {
        let hash = disk::sequence_hash(&sequence);
        {
            let mut inner = self.inner.lock();
            if !inner.dedup_hashes.insert(hash) {
                return Ok(());
            }
            inner.test_results.push(sequence.clone());
            inner.pending.push(PendingFile {
                partition: Partition::TestResults,
                file_name: disk::file_name(unix_nanos_now()),
                sequence,
            });
        }
        if flush {
            self.flush()?;
        }
        Ok(())
    }

    pub fn random_mutation_target_sequence(&self, rng: &mut impl rand::Rng) -> Result<CallSequence> {
        let inner = self.inner.lock();
        let id = inner
            .mutable_chooser
            .pick(rng)
            .ok_or(crate::error::CorpusError::EmptyChooser)?;
        Ok(inner.mutable.get(&id).expect("chooser id must be present").clone())
    }

    pub fn unexecuted_call_sequence(&self) -> Option<CallSequence> {
        self.inner.lock().unexecuted.pop_front()
    }

    /// Writes every pending in-memory entry to disk. File-naming
    /// uniqueness (timestamp+uuid) means flush never needs to check for
    /// collisions with existing files.
    pub fn flush(&self) -> Result<()> {
        let pending = std::mem::take(&mut self.inner.lock().pending);
        for file in pending {
            let dir = disk::partition_path(&self.root, file.partition);
            if let Err(e) = std::fs::create_dir_all(&dir) {
                warn!(dir = %dir.display(), error = %e, "failed to create corpus directory; will retry next flush");
                self.inner.lock().pending.push(file);
                continue;
            }
            let bytes = disk::serialize_sequence(&file.sequence)?;
            let path = dir.join(&file.file_name);
            if let Err(e) = std::fs::write(&path, &bytes) {
                warn!(file = %path.display(), error = %e, "flush I/O error; will retry next flush");
                self.inner.lock().pending.push(file);
            }
        }
        Ok(())
    }

    /// Snapshot of every live mutable entry, for the pruner to score
    /// without holding the corpus lock across a replay.
    pub fn mutable_entries(&self) -> Vec<(u64, CallSequence)> {
        self.inner
            .lock()
            .mutable
            .iter()
            .map(|(id, sequence)| (*id, sequence.clone()))
            .collect()
    }

    /// Drops the given mutable entries from the in-memory set and the
    /// weighted chooser (§4.7 Pruner). Entries already removed (a worker
    /// raced the same id out from under a prior pruning round) are ignored.
    /// Pruning never touches on-disk partition files; a dropped entry stays
    /// absent from `mutable` in this process only, which is sufficient
    /// since `flush` never re-persists entries that were never inserted
    /// into `pending` by this call.
    pub fn remove_mutable(&self, ids: &[u64]) {
        let mut inner = self.inner.lock();
        for id in ids {
            if inner.mutable.remove(id).is_none() {
                continue;
            }
            if let Some(index) = inner.mutable_chooser_index.remove(id) {
                inner.mutable_chooser.remove(index);
            }
        }
    }

    pub fn mutable_len(&self) -> usize {
        self.inner.lock().mutable.len()
    }

    pub fn immutable_len(&self) -> usize {
        self.inner.lock().immutable.len()
    }

    pub fn branches_hit(&self) -> u64 {
        self.coverage.lock().branches_hit()
    }
}

impl crate::sequence::CorpusSource for Corpus {
    fn random_mutable_sequence(&self, rng: &mut dyn rand::RngCore) -> Option<CallSequence> {
        self.random_mutation_target_sequence(rng).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::marker;
    use primitive_types::{H160, H256, U256};

    fn sample_sequence(delay: u64) -> CallSequence {
        CallSequence {
            elements: vec![crate::sequence::CallSequenceElement {
                call: crate::sequence::Call {
                    from: H160::repeat_byte(1),
                    to: Some(H160::repeat_byte(2)),
                    value: U256::zero(),
                    gas_limit: 1,
                    data: crate::sequence::CallData::Raw(vec![1, 2, 3]),
                },
                contract_name: None,
                block_number_delay: delay,
                block_timestamp_delay: 1,
            }],
        }
    }

    #[test]
    fn new_nonrevert_coverage_routes_to_mutable() {
        let corpus = Corpus::new(PathBuf::from("/tmp/does-not-matter"));
        let mut cov = CoverageMap::new();
        cov.update_at(H160::repeat_byte(9), H256::repeat_byte(9), marker::jump_edge(1, 2));
        corpus
            .check_sequence_coverage_and_update(sample_sequence(1), &cov, false)
            .unwrap();
        assert_eq!(corpus.mutable_len(), 1);
        assert_eq!(corpus.immutable_len(), 0);
    }

    #[test]
    fn no_new_coverage_is_discarded() {
        let corpus = Corpus::new(PathBuf::from("/tmp/does-not-matter"));
        let empty = CoverageMap::new();
        corpus
            .check_sequence_coverage_and_update(sample_sequence(1), &empty, false)
            .unwrap();
        assert_eq!(corpus.mutable_len(), 0);
        assert_eq!(corpus.immutable_len(), 0);
    }

    #[test]
    fn duplicate_test_result_sequences_dedupe() {
        let corpus = Corpus::new(PathBuf::from("/tmp/does-not-matter"));
        corpus
            .add_test_result_call_sequence(sample_sequence(1), false)
            .unwrap();
        corpus
            .add_test_result_call_sequence(sample_sequence(1), false)
            .unwrap();
        assert_eq!(corpus.inner.lock().test_results.len(), 1);
    }

    #[test]
    fn empty_chooser_errors() {
        let corpus = Corpus::new(PathBuf::from("/tmp/does-not-matter"));
        let mut rng = rand::thread_rng();
        assert!(corpus.random_mutation_target_sequence(&mut rng).is_err());
    }
}
