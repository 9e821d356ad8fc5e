//! Assertion provider: flags a `Panic(uint256)` revert carrying one of the
//! configured panic codes (§4.11). Closest in shape to the teacher's
//! `oracles/echidna.rs`, generalized from a boolean-view scan to revert-data
//! decoding.

use primitive_types::U256;

use crate::chain::{CallOutcome, ChainTracer, TestChain};
use crate::config::PanicCode;
use crate::sequence::{CallSequence, CallSequenceElement, TargetContract};

use super::{CallSequenceTestFunc, ReplayVerifier, ShrinkRequest, TestCase, TestCaseStatus};

/// Selector for Solidity's `Panic(uint256)` error, emitted by `assert`,
/// arithmetic overflow/underflow, division by zero, and friends.
pub const PANIC_SELECTOR: [u8; 4] = [0x4E, 0x48, 0x7B, 0x71];

fn decode_panic_code(revert_data: &[u8]) -> Option<u64> {
    if revert_data.len() < 4 + 32 || revert_data[..4] != PANIC_SELECTOR {
        return None;
    }
    let code = U256::from_big_endian(&revert_data[4..36]);
    Some(code.low_u64())
}

pub struct AssertionProvider {
    enabled_codes: Vec<PanicCode>,
    failed: Option<(String, CallSequence)>,
    base_chain: Option<TestChain>,
}

impl AssertionProvider {
    pub fn new(enabled_codes: Vec<PanicCode>, base_chain: TestChain) -> Self {
        Self {
            enabled_codes,
            failed: None,
            base_chain: Some(base_chain),
        }
    }

    fn code_is_enabled(&self, code: u64) -> bool {
        self.enabled_codes.iter().any(|c| c.code() == code)
    }
}

impl CallSequenceTestFunc for AssertionProvider {
    fn on_deployment(&mut self, _target: &TargetContract) {}

    fn after_element(
        &mut self,
        sequence_so_far: &CallSequence,
        _element: &CallSequenceElement,
        outcome: &CallOutcome,
    ) -> Option<ShrinkRequest> {
        if self.failed.is_some() {
            return None;
        }
        let revert_data = outcome.revert_data.as_deref()?;
        let code = decode_panic_code(revert_data)?;
        if !self.code_is_enabled(code) {
            return None;
        }

        let name = format!("assertion (panic code 0x{code:02x})");
        self.failed = Some((name.clone(), sequence_so_far.clone()));

        let base = self.base_chain.as_ref()?.clone_with_setup(|_| Ok(())).ok()?;
        let target_code = code;
        Some(ShrinkRequest {
            test_case_name: name,
            sequence_so_far: sequence_so_far.clone(),
            verifier: Box::new(ReplayVerifier {
                base,
                detect: move |chain: &mut TestChain, candidate: &CallSequence| {
                    replay_and_detect(chain, candidate, target_code)
                },
            }),
        })
    }

    fn after_sequence(
        &mut self,
        _chain: &mut TestChain,
        _tracer: &mut ChainTracer,
        _sequence: &CallSequence,
    ) -> Option<ShrinkRequest> {
        None
    }

    fn test_cases(&self) -> Vec<TestCase> {
        match &self.failed {
            Some((name, sequence)) => vec![TestCase {
                name: name.clone(),
                status: TestCaseStatus::Failed,
                call_sequence: Some(sequence.clone()),
                message: Some("assertion violation".into()),
            }],
            None => vec![TestCase::not_started("assertion")],
        }
    }
}

fn replay_and_detect(chain: &mut TestChain, candidate: &CallSequence, target_code: u64) -> bool {
    let mut tracer = ChainTracer::new();
    for element in &candidate.elements {
        let call = crate::chain::ChainCall {
            from: element.call.from,
            to: element.call.to,
            value: element.call.value,
            gas_limit: element.call.gas_limit,
            data: element.call.data.encode(),
        };
        let Ok((_, outcomes)) = chain.commit_block(
            &mut tracer,
            std::slice::from_ref(&call),
            element.block_number_delay,
            element.block_timestamp_delay,
        ) else {
            return false;
        };
        if let Some(outcome) = outcomes.first() {
            if let Some(revert_data) = &outcome.revert_data {
                if decode_panic_code(revert_data) == Some(target_code) {
                    return true;
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_assert_panic_code() {
        let mut data = PANIC_SELECTOR.to_vec();
        data.extend_from_slice(&[0u8; 31]);
        data.push(0x01);
        assert_eq!(decode_panic_code(&data), Some(0x01));
    }

    #[test]
    fn rejects_non_panic_selector() {
        let data = vec![0u8; 36];
        assert_eq!(decode_panic_code(&data), None);
    }
}
