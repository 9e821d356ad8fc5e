//! The worker (C9): a single-threaded loop owning one EVM chain, repeating
//! setup → generate/replay → execute → cover → test → shrink → rebase.
//!
//! Grounded on the teacher's `fuzzer.rs` `ItyFuzzer::fuzz_one`/`fuzz_loop`
//! and `Evaluator::evaluate_input_events` (execute → feedback → objective
//! → corpus-add), but restructured away from LibAFL's generic
//! `Fuzzer`/`Evaluator`/`Scheduler` stack into the concrete state machine
//! §4.9 describes — that stack assumes a pluggable multi-stage pipeline
//! this engine's fixed loop doesn't need. `WorkerActivity` is grounded on
//! the teacher's `AccessPattern`, a small owned per-run snapshot struct.

use std::sync::atomic::{AtomicBool, Ordering};

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::chain::{ChainCall, ChainTracer, TestChain};
use crate::corpus::Corpus;
use crate::coverage::CoverageMap;
use crate::error::Result;
use crate::metrics::Metrics;
use crate::providers::CallSequenceTestFunc;
use crate::sequence::{CallSequence, SequenceGenerator, TargetContract};
use crate::shrink::Shrinker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Replaying,
    Generating,
    Shrinking,
}

#[derive(Debug, Clone)]
pub struct WorkerActivity {
    pub worker_id: usize,
    pub state: WorkerState,
    pub strategy_name: Option<String>,
    pub shrink_progress: Option<f32>,
}

impl WorkerActivity {
    fn idle(worker_id: usize) -> Self {
        Self {
            worker_id,
            state: WorkerState::Idle,
            strategy_name: None,
            shrink_progress: None,
        }
    }
}

/// Deploys the fuzz target's contracts against a fresh chain and returns
/// their callable surface. Supplied by the caller (e.g. loaded from
/// artifacts) since contract selection is outside this engine's scope.
pub type ChainSetupFunc = dyn Fn(&mut TestChain, &mut ChainTracer) -> Result<Vec<TargetContract>> + Send + Sync;

/// Signals the coordinator should tear this worker down and replace it
/// with a fresh one cloned from the base chain (§4.9's memory-growth bound).
pub struct ResetSignal;

pub struct Worker {
    id: usize,
    chain: TestChain,
    tracer: ChainTracer,
    sequence_generator: SequenceGenerator,
    activity: WorkerActivity,
    testing_base_block_index: usize,
    executions_since_reset: u64,
    worker_reset_limit: u64,
    rng: StdRng,
}

impl Worker {
    pub fn new(
        id: usize,
        base_chain: &TestChain,
        setup: &ChainSetupFunc,
        sequence_generator: SequenceGenerator,
        worker_reset_limit: u64,
        seed: u64,
    ) -> Result<Self> {
        let mut tracer = ChainTracer::new();
        let mut chain = base_chain.clone_with_setup(|_| Ok(()))?;
        let deployed = setup(&mut chain, &mut tracer)?;
        let testing_base_block_index = chain.head_block_index();

        let mut generator = sequence_generator;
        for target in deployed {
            generator.note_deployment(target);
        }

        Ok(Self {
            id,
            chain,
            tracer,
            sequence_generator: generator,
            activity: WorkerActivity::idle(id),
            testing_base_block_index,
            executions_since_reset: 0,
            worker_reset_limit,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn activity(&self) -> WorkerActivity {
        self.activity.clone()
    }

    /// Runs exactly one iteration of the loop in §4.9: take-or-generate a
    /// sequence, execute it element by element against every registered
    /// provider, update the corpus, and rebase the chain. Returns
    /// `Some(ResetSignal)` once `worker_reset_limit` executions have
    /// elapsed since the last reset.
    pub fn run_once(
        &mut self,
        corpus: &Corpus,
        providers: &mut [Box<dyn CallSequenceTestFunc>],
        metrics: &Metrics,
        cancelled: &AtomicBool,
    ) -> Result<Option<ResetSignal>> {
        metrics.worker_became_active();

        let sequence = match corpus.unexecuted_call_sequence() {
            Some(sequence) => {
                self.activity.state = WorkerState::Replaying;
                self.activity.strategy_name = None;
                sequence
            }
            None => {
                self.activity.state = WorkerState::Generating;
                let sequence = self.sequence_generator.generate(&mut self.rng, corpus);
                self.activity.strategy_name = Some("generated".into());
                sequence
            }
        };

        let mut executed_so_far = CallSequence::default();
        let mut sequence_coverage = CoverageMap::new();
        let mut any_failure = false;

        for element in &sequence.elements {
            if cancelled.load(Ordering::Relaxed) {
                break;
            }
            let call = ChainCall {
                from: element.call.from,
                to: element.call.to,
                value: element.call.value,
                gas_limit: element.call.gas_limit,
                data: element.call.data.encode(),
            };
            let (_, outcomes) = self.chain.commit_block(
                &mut self.tracer,
                std::slice::from_ref(&call),
                element.block_number_delay,
                element.block_timestamp_delay,
            )?;
            let outcome = outcomes.into_iter().next().expect("exactly one tx committed");
            metrics.record_call(outcome.gas_used);

            executed_so_far.elements.push(element.clone());
            sequence_coverage.update(&self.tracer.take_coverage(!outcome.success));

            for provider in providers.iter_mut() {
                if let Some(request) = provider.after_element(&executed_so_far, element, &outcome) {
                    any_failure = true;
                    self.shrink_and_record(corpus, request, metrics);
                }
            }
        }

        for provider in providers.iter_mut() {
            if let Some(request) = provider.after_sequence(&mut self.chain, &mut self.tracer, &sequence) {
                any_failure = true;
                self.shrink_and_record(corpus, request, metrics);
            }
        }

        metrics.record_sequence(any_failure);
        corpus.check_sequence_coverage_and_update(sequence, &sequence_coverage, false)?;

        self.chain.revert_to_block_index(self.testing_base_block_index)?;
        self.activity.state = WorkerState::Idle;
        self.activity.strategy_name = None;
        metrics.worker_became_idle();

        self.executions_since_reset += 1;
        if self.executions_since_reset >= self.worker_reset_limit {
            Ok(Some(ResetSignal))
        } else {
            Ok(None)
        }
    }

    /// Runs the shrinker against a failing `ShrinkRequest` and stores the
    /// minimized sequence via `AddTestResultCallSequence`, exactly the
    /// handoff §4.9's "enter Shrinking" step describes.
    fn shrink_and_record(&mut self, corpus: &Corpus, request: crate::providers::ShrinkRequest, metrics: &Metrics) {
        self.activity.state = WorkerState::Shrinking;
        self.activity.shrink_progress = Some(0.0);
        metrics.worker_entered_shrinking();

        let mut verifier = request.verifier;
        let shrunk = Shrinker::shrink(&request.sequence_so_far, verifier.as_mut());

        self.activity.shrink_progress = Some(1.0);
        metrics.worker_left_shrinking();

        if let Err(e) = corpus.add_test_result_call_sequence(shrunk, false) {
            tracing::warn!(
                test_case = %request.test_case_name,
                error = %e,
                "failed to persist shrunk failing sequence"
            );
        }
        self.activity.state = WorkerState::Generating;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_activity_has_no_strategy() {
        let activity = WorkerActivity::idle(3);
        assert_eq!(activity.state, WorkerState::Idle);
        assert!(activity.strategy_name.is_none());
    }
}
