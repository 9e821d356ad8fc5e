//! Optimization provider: polls configured-prefix methods returning a
//! single signed integer after every sequence and tracks the global
//! maximum observed; a new maximum records the sequence but is never a
//! failure (§4.11). Same prefix-scan shape as the Property provider.

use primitive_types::{H160, U256};

use crate::chain::{CallOutcome, ChainTracer, TestChain};
use crate::sequence::{CallSequence, CallSequenceElement, TargetContract};
use crate::value::AbiFunction;

use super::{CallSequenceTestFunc, ShrinkRequest, TestCase, TestCaseStatus};

struct Target {
    address: H160,
    method: AbiFunction,
    best: Option<(i128, CallSequence)>,
}

pub struct OptimizationProvider {
    prefix: String,
    targets: Vec<Target>,
}

impl OptimizationProvider {
    pub fn new(prefix: String) -> Self {
        Self {
            prefix,
            targets: Vec::new(),
        }
    }
}

/// Interprets a 32-byte big-endian two's-complement word as a signed
/// 128-bit value, saturating if the true value does not fit. Sufficient
/// for maximum-tracking without needing full bignum signed arithmetic.
fn decode_signed_word(word: &[u8]) -> Option<i128> {
    if word.len() != 32 {
        return None;
    }
    let negative = word[0] & 0x80 != 0;
    let value = U256::from_big_endian(word);
    if negative {
        let magnitude = (U256::MAX - value).saturating_add(U256::one());
        if magnitude > U256::from(i128::MAX as u128) {
            Some(i128::MIN)
        } else {
            Some(-(magnitude.low_u128() as i128))
        }
    } else if value > U256::from(i128::MAX as u128) {
        Some(i128::MAX)
    } else {
        Some(value.low_u128() as i128)
    }
}

impl CallSequenceTestFunc for OptimizationProvider {
    fn on_deployment(&mut self, target: &TargetContract) {
        for method in &target.methods {
            if method.name.starts_with(&self.prefix) && method.is_optimization_shaped() {
                self.targets.push(Target {
                    address: target.address,
                    method: method.clone(),
                    best: None,
                });
            }
        }
    }

    fn after_element(
        &mut self,
        _sequence_so_far: &CallSequence,
        _element: &CallSequenceElement,
        _outcome: &CallOutcome,
    ) -> Option<ShrinkRequest> {
        None
    }

    fn after_sequence(
        &mut self,
        chain: &mut TestChain,
        tracer: &mut ChainTracer,
        sequence: &CallSequence,
    ) -> Option<ShrinkRequest> {
        for target in &mut self.targets {
            let call = crate::chain::ChainCall {
                from: H160::zero(),
                to: Some(target.address),
                value: U256::zero(),
                gas_limit: 10_000_000,
                data: target.method.selector.to_vec(),
            };
            let Ok(outcome) = chain.call_static(tracer, &call) else {
                continue;
            };
            if !outcome.success || outcome.output.len() < 32 {
                continue;
            }
            let Some(value) = decode_signed_word(&outcome.output[..32]) else {
                continue;
            };
            let is_new_max = match &target.best {
                Some((best, _)) => value > *best,
                None => true,
            };
            if is_new_max {
                target.best = Some((value, sequence.clone()));
            }
        }
        None
    }

    fn test_cases(&self) -> Vec<TestCase> {
        self.targets
            .iter()
            .map(|t| match &t.best {
                Some((value, seq)) => TestCase {
                    name: t.method.name.clone(),
                    status: TestCaseStatus::Passed,
                    call_sequence: Some(seq.clone()),
                    message: Some(format!("max observed: {value}")),
                },
                None => TestCase::not_started(&t.method.name),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_positive_word() {
        let mut word = [0u8; 32];
        word[31] = 42;
        assert_eq!(decode_signed_word(&word), Some(42));
    }

    #[test]
    fn decodes_negative_word() {
        let word = [0xffu8; 32];
        assert_eq!(decode_signed_word(&word), Some(-1));
    }
}
