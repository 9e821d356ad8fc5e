//! The fuzzer coordinator (C10): assembles the worker pool, registers the
//! built-in test case providers, wires the event bus, and drives stop
//! conditions and flush cadence.
//!
//! Grounded on `fuzzers/evm_fuzzer.rs` (worker-pool assembly) and
//! `state.rs`'s trait-based state composition, reworked around an explicit
//! synchronous event bus instead of LibAFL's `EventManager` (§9 Design
//! Note) — the teacher's `state.rs` composes `HasCorpus`/`HasRand`/etc.
//! traits onto a single `FuzzState` object threaded through LibAFL's
//! stages; this engine has no stage pipeline to thread it through, so the
//! coordinator owns its collaborators directly instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use parking_lot::Mutex as PLMutex;
use tracing::{info, warn};

use crate::artifacts::ArtifactSet;
use crate::chain::TestChain;
use crate::config::FuzzerConfig;
use crate::corpus::Corpus;
use crate::error::Result;
use crate::events::{Event, EventBus};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::providers::{assertion::AssertionProvider, optimization::OptimizationProvider, property::PropertyProvider};
use crate::providers::{CallSequenceTestFunc, TestCase, TestCaseStatus};
use crate::sequence::SequenceGenerator;
use crate::worker::{ChainSetupFunc, Worker, WorkerActivity};

pub struct FuzzerReport {
    pub test_cases: Vec<TestCase>,
    pub metrics: MetricsSnapshot,
}

pub struct Fuzzer {
    config: FuzzerConfig,
}

impl Fuzzer {
    pub fn new(config: FuzzerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    fn build_providers(&self, base_chain: &TestChain) -> Result<Vec<Box<dyn CallSequenceTestFunc>>> {
        let mut providers: Vec<Box<dyn CallSequenceTestFunc>> = Vec::new();
        if self.config.assertion_testing_enabled {
            providers.push(Box::new(AssertionProvider::new(
                self.config.enabled_panic_codes.clone(),
                base_chain.clone_with_setup(|_| Ok(()))?,
            )));
        }
        if self.config.property_testing_enabled {
            providers.push(Box::new(PropertyProvider::new(
                self.config.property_test_prefix.clone(),
                base_chain.clone_with_setup(|_| Ok(()))?,
            )));
        }
        if self.config.optimization_testing_enabled {
            providers.push(Box::new(OptimizationProvider::new(self.config.optimization_test_prefix.clone())));
        }
        Ok(providers)
    }

    /// Runs one complete campaign to a stop condition (timeout, test
    /// limit, cancellation, or first failure). `setup` deploys the fuzz
    /// target once per worker chain and returns its callable surface;
    /// `artifacts` is the compiled output the corpus resolves persisted
    /// sequences against on replay.
    pub fn run(&self, setup: Arc<ChainSetupFunc>, artifacts: &ArtifactSet, cancelled: Arc<AtomicBool>) -> Result<FuzzerReport> {
        let events = Arc::new(PLMutex::new(EventBus::new()));
        events.lock().publish(Event::FuzzerStarting)?;

        let base_chain = TestChain::new();
        let mut providers = self.build_providers(&base_chain)?;

        // Discover the deployed surface once, against a throwaway chain,
        // so providers can register their per-contract hooks before any
        // worker starts (§4.10's "register providers ... before workers
        // are started").
        let mut scratch_tracer = crate::chain::ChainTracer::new();
        let mut scratch_chain = base_chain.clone_with_setup(|_| Ok(()))?;
        let deployed = setup(&mut scratch_chain, &mut scratch_tracer)?;
        for target in &deployed {
            for provider in providers.iter_mut() {
                provider.on_deployment(target);
            }
            events.lock().publish(Event::ContractDeploymentAdded {
                address: target.address,
                name: target.name.clone(),
            })?;
        }
        events.lock().mark_started();

        let corpus = Arc::new(Corpus::new(self.config.corpus_dir.clone()));
        let (active, total) = corpus.initialize(artifacts, |sequence| replay_for_initialize(&base_chain, &setup, sequence))?;
        info!(active, total, "corpus replay finished");

        let providers = Arc::new(Mutex::new(providers));
        let metrics = Arc::new(Metrics::new());
        let config_for_workers = self.config.clone();
        let test_limit_hit = Arc::new(AtomicBool::new(false));

        let mut handles = Vec::with_capacity(self.config.worker_count as usize);

        for worker_id in 0..self.config.worker_count as usize {
            let worker_base = base_chain.clone_with_setup(|_| Ok(()))?;
            let setup = setup.clone();
            let corpus = corpus.clone();
            let providers = providers.clone();
            let metrics = metrics.clone();
            let cancelled = cancelled.clone();
            let config = config_for_workers.clone();
            let test_limit_hit = test_limit_hit.clone();

            events.lock().publish(Event::WorkerCreated { worker_id })?;

            let handle = std::thread::spawn(move || -> Result<()> {
                let generator = SequenceGenerator::from_config(&config);
                let mut worker = Worker::new(worker_id, &worker_base, setup.as_ref(), generator, config.worker_reset_limit, worker_id as u64)?;
                let mut reset_base = worker_base;

                while !cancelled.load(Ordering::Relaxed) {
                    if let Some(limit) = config.test_limit {
                        if metrics.sequences_tested() >= limit {
                            test_limit_hit.store(true, Ordering::Relaxed);
                            break;
                        }
                    }

                    let failed_before = metrics.failed_sequences();
                    let reset = {
                        let mut locked = providers.lock().expect("provider mutex poisoned");
                        worker.run_once(&corpus, &mut locked, &metrics, &cancelled)?
                    };

                    if config.stop_on_first_failure && metrics.failed_sequences() > failed_before {
                        cancelled.store(true, Ordering::Relaxed);
                        break;
                    }

                    if reset.is_some() {
                        let fresh_base = reset_base.clone_with_setup(|_| Ok(()))?;
                        let generator = SequenceGenerator::from_config(&config);
                        worker = Worker::new(worker_id, &fresh_base, setup.as_ref(), generator, config.worker_reset_limit, worker_id as u64)?;
                        reset_base = fresh_base;
                    }
                }
                Ok(())
            });
            handles.push(handle);
        }

        let timeout = self.config.timeout;
        let start = Instant::now();
        let mut last_prune = Instant::now();
        loop {
            std::thread::sleep(Duration::from_millis(200));
            if cancelled.load(Ordering::Relaxed) || test_limit_hit.load(Ordering::Relaxed) {
                cancelled.store(true, Ordering::Relaxed);
                break;
            }
            if let Some(timeout) = timeout {
                if start.elapsed() >= timeout {
                    cancelled.store(true, Ordering::Relaxed);
                    break;
                }
            }
            if let Some(interval) = self.config.pruner_interval {
                if last_prune.elapsed() >= interval {
                    if let Err(e) = run_pruning_round(&base_chain, &setup, &corpus, &cancelled) {
                        warn!(error = %e, "pruning round failed");
                    }
                    last_prune = Instant::now();
                }
            }
            if let Err(e) = corpus.flush() {
                warn!(error = %e, "periodic corpus flush failed");
            }
        }

        for handle in handles {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "worker exited with an error"),
                Err(_) => warn!("worker thread panicked"),
            }
        }

        corpus.flush()?;

        let test_cases: Vec<TestCase> = providers
            .lock()
            .expect("provider mutex poisoned")
            .iter()
            .flat_map(|p| p.test_cases())
            .collect();
        for test_case in &test_cases {
            if test_case.status == TestCaseStatus::Failed {
                events.lock().publish(Event::TestResultRecorded { test_case: test_case.clone() })?;
            }
        }

        events.lock().publish(Event::FuzzerStopping)?;

        let snapshot = metrics.snapshot(
            corpus.branches_hit(),
            corpus.mutable_len() + corpus.immutable_len(),
            Vec::<WorkerActivity>::new(),
        );
        Ok(FuzzerReport {
            test_cases,
            metrics: snapshot,
        })
    }
}

/// Replays a corpus-loaded sequence against a fresh per-replay chain
/// during `Corpus::initialize`, deploying first via `setup`.
fn replay_for_initialize(
    base_chain: &TestChain,
    setup: &Arc<ChainSetupFunc>,
    sequence: &crate::sequence::CallSequence,
) -> Result<crate::coverage::CoverageMap> {
    let mut tracer = crate::chain::ChainTracer::new();
    let mut chain = base_chain.clone_with_setup(|_| Ok(()))?;
    setup(&mut chain, &mut tracer)?;

    let mut coverage = crate::coverage::CoverageMap::new();
    for element in &sequence.elements {
        let call = crate::chain::ChainCall {
            from: element.call.from,
            to: element.call.to,
            value: element.call.value,
            gas_limit: element.call.gas_limit,
            data: element.call.data.encode(),
        };
        let (_, outcomes) = chain.commit_block(
            &mut tracer,
            std::slice::from_ref(&call),
            element.block_number_delay,
            element.block_timestamp_delay,
        )?;
        let reverted = outcomes.first().map(|o| !o.success).unwrap_or(true);
        coverage.update(&tracer.take_coverage(reverted));
    }
    Ok(coverage)
}

/// One pruning pass (§4.7 Pruner, §5 cancellation checkpoint): deploys the
/// fuzz target onto its own throwaway chain, scores every currently-live
/// mutable entry against it, and drops whichever ones turn out redundant.
/// Runs on the coordinator thread between worker ticks, never touching a
/// worker's own chain.
fn run_pruning_round(
    base_chain: &TestChain,
    setup: &Arc<ChainSetupFunc>,
    corpus: &Corpus,
    cancelled: &AtomicBool,
) -> Result<()> {
    let mut deploy_tracer = crate::chain::ChainTracer::new();
    let mut deployed_chain = base_chain.clone_with_setup(|_| Ok(()))?;
    setup(&mut deployed_chain, &mut deploy_tracer)?;

    let entries = corpus.mutable_entries();
    let redundant = crate::corpus::pruner::find_redundant(
        &entries,
        |sequence| crate::corpus::pruner::replay_for_scoring(&deployed_chain, sequence),
        || cancelled.load(Ordering::Relaxed),
    )?;
    if !redundant.is_empty() {
        info!(count = redundant.len(), "pruning redundant mutable corpus entries");
        corpus.remove_mutable(&redundant);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_config_is_rejected_before_any_thread_spawns() {
        let mut config = FuzzerConfig::default();
        config.worker_count = 0;
        assert!(Fuzzer::new(config).is_err());
    }
}
