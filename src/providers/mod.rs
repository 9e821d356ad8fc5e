//! Test case providers (C11): the extension point that turns raw
//! execution results into pass/fail test cases and, on failure, a
//! `ShrinkRequest` for the worker to act on.
//!
//! Grounded on `evm/oracles/{echidna,invariant,erc20,selfdestruct}.rs`,
//! the teacher's existing oracle family — closest in shape to
//! `oracles/echidna.rs`'s prefix-based boolean view-method scan, which the
//! Property provider below generalizes directly. Assertion's panic-code
//! decoding and Optimization's running-maximum tracker are new but built
//! in that same prefix-scan idiom.

pub mod assertion;
pub mod optimization;
pub mod property;

use crate::chain::{CallOutcome, ChainTracer, TestChain};
use crate::sequence::{CallSequence, CallSequenceElement, TargetContract};
use crate::shrink::Verifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestCaseStatus {
    NotStarted,
    Running,
    Passed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct TestCase {
    pub name: String,
    pub status: TestCaseStatus,
    pub call_sequence: Option<CallSequence>,
    pub message: Option<String>,
}

impl TestCase {
    pub fn not_started(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: TestCaseStatus::NotStarted,
            call_sequence: None,
            message: None,
        }
    }
}

/// A verifier that replays a candidate sequence against a fresh clone of
/// `base` and re-runs a provider's own detection logic on it.
pub struct ReplayVerifier<F> {
    pub base: TestChain,
    pub detect: F,
}

impl<F> Verifier for ReplayVerifier<F>
where
    F: FnMut(&mut TestChain, &CallSequence) -> bool,
{
    fn check(&mut self, candidate: &CallSequence) -> crate::shrink::VerifierOutcome {
        let Ok(mut chain) = self.base.clone_with_setup(|_| Ok(())) else {
            return crate::shrink::VerifierOutcome::NoLongerFails;
        };
        if (self.detect)(&mut chain, candidate) {
            crate::shrink::VerifierOutcome::FailStillReproduces
        } else {
            crate::shrink::VerifierOutcome::NoLongerFails
        }
    }
}

/// Raised by a provider when it detects a failure; the worker shrinks
/// `sequence_so_far` against `verifier` and stores the result under
/// `test_case_name`.
pub struct ShrinkRequest {
    pub test_case_name: String,
    pub sequence_so_far: CallSequence,
    pub verifier: Box<dyn Verifier + Send>,
}

/// A registered test-case provider, called by the worker loop after every
/// element and after every completed sequence (§4.9, §4.11).
pub trait CallSequenceTestFunc: Send {
    fn on_deployment(&mut self, target: &TargetContract);

    /// Inspects one element's outcome as soon as it executes. Used by the
    /// Assertion provider, which must catch a revert's panic code before
    /// the sequence moves on.
    fn after_element(
        &mut self,
        sequence_so_far: &CallSequence,
        element: &CallSequenceElement,
        outcome: &CallOutcome,
    ) -> Option<ShrinkRequest>;

    /// Runs after a full sequence executes, with a live chain/tracer for
    /// static polling. Used by Property and Optimization, which need a
    /// post-sequence view call rather than per-element inspection.
    fn after_sequence(
        &mut self,
        chain: &mut TestChain,
        tracer: &mut ChainTracer,
        sequence: &CallSequence,
    ) -> Option<ShrinkRequest>;

    fn test_cases(&self) -> Vec<TestCase>;
}
