//! Property provider: polls configured-prefix, no-argument `view` methods
//! returning a single `bool` after every sequence; `false` is a failure
//! (§4.11). Direct generalization of the teacher's `oracles/echidna.rs`
//! boolean-view scan.

use primitive_types::{H160, U256};

use crate::chain::{CallOutcome, ChainTracer, TestChain};
use crate::sequence::{CallSequence, CallSequenceElement, TargetContract};
use crate::value::AbiFunction;

use super::{CallSequenceTestFunc, ReplayVerifier, ShrinkRequest, TestCase, TestCaseStatus};

struct Target {
    address: H160,
    method: AbiFunction,
}

pub struct PropertyProvider {
    prefix: String,
    targets: Vec<Target>,
    failed: Vec<(String, CallSequence)>,
    base_chain: Option<TestChain>,
}

impl PropertyProvider {
    pub fn new(prefix: String, base_chain: TestChain) -> Self {
        Self {
            prefix,
            targets: Vec::new(),
            failed: Vec::new(),
            base_chain: Some(base_chain),
        }
    }

    fn call_property(chain: &mut TestChain, tracer: &mut ChainTracer, target: &Target) -> Option<bool> {
        let call = crate::chain::ChainCall {
            from: H160::zero(),
            to: Some(target.address),
            value: U256::zero(),
            gas_limit: 10_000_000,
            data: target.method.selector.to_vec(),
        };
        let outcome = chain.call_static(tracer, &call).ok()?;
        decode_bool(&outcome)
    }
}

fn decode_bool(outcome: &CallOutcome) -> Option<bool> {
    if !outcome.success || outcome.output.len() < 32 {
        return None;
    }
    Some(outcome.output[31] != 0)
}

impl CallSequenceTestFunc for PropertyProvider {
    fn on_deployment(&mut self, target: &TargetContract) {
        for method in &target.methods {
            if method.name.starts_with(&self.prefix) && method.is_property_shaped() {
                self.targets.push(Target {
                    address: target.address,
                    method: method.clone(),
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
        for index in 0..self.targets.len() {
            let (address, selector, name) = {
                let target = &self.targets[index];
                (target.address, target.method.selector, target.method.name.clone())
            };
            if self.failed.iter().any(|(n, _)| n == &name) {
                continue;
            }
            let result = Self::call_property(chain, tracer, &self.targets[index]);
            if result == Some(false) {
                self.failed.push((name.clone(), sequence.clone()));
                let base = self.base_chain.as_ref()?.clone_with_setup(|_| Ok(())).ok()?;
                return Some(ShrinkRequest {
                    test_case_name: name,
                    sequence_so_far: sequence.clone(),
                    verifier: Box::new(ReplayVerifier {
                        base,
                        detect: move |chain: &mut TestChain, candidate: &CallSequence| {
                            replay_and_detect(chain, candidate, address, selector)
                        },
                    }),
                });
            }
        }
        None
    }

    fn test_cases(&self) -> Vec<TestCase> {
        self.targets
            .iter()
            .map(|t| {
                if let Some((_, seq)) = self.failed.iter().find(|(n, _)| n == &t.method.name) {
                    TestCase {
                        name: t.method.name.clone(),
                        status: TestCaseStatus::Failed,
                        call_sequence: Some(seq.clone()),
                        message: Some("property returned false".into()),
                    }
                } else {
                    TestCase {
                        name: t.method.name.clone(),
                        status: TestCaseStatus::Passed,
                        call_sequence: None,
                        message: None,
                    }
                }
            })
            .collect()
    }
}

fn replay_and_detect(chain: &mut TestChain, candidate: &CallSequence, address: H160, selector: [u8; 4]) -> bool {
    let mut tracer = ChainTracer::new();
    for element in &candidate.elements {
        let call = crate::chain::ChainCall {
            from: element.call.from,
            to: element.call.to,
            value: element.call.value,
            gas_limit: element.call.gas_limit,
            data: element.call.data.encode(),
        };
        if chain
            .commit_block(
                &mut tracer,
                std::slice::from_ref(&call),
                element.block_number_delay,
                element.block_timestamp_delay,
            )
            .is_err()
        {
            return false;
        }
    }
    let probe = crate::chain::ChainCall {
        from: H160::zero(),
        to: Some(address),
        value: U256::zero(),
        gas_limit: 10_000_000,
        data: selector.to_vec(),
    };
    match chain.call_static(&mut tracer, &probe) {
        Ok(outcome) => decode_bool(&outcome) == Some(false),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_bool_reads_last_byte_of_word() {
        let mut output = vec![0u8; 32];
        output[31] = 1;
        let outcome = CallOutcome {
            success: true,
            output,
            gas_used: 0,
            deployed_address: None,
            revert_data: None,
        };
        assert_eq!(decode_bool(&outcome), Some(true));
    }

    #[test]
    fn decode_bool_rejects_short_output() {
        let outcome = CallOutcome {
            success: true,
            output: vec![0u8; 4],
            gas_used: 0,
            deployed_address: None,
            revert_data: None,
        };
        assert_eq!(decode_bool(&outcome), None);
    }
}
