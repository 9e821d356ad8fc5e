//! The shrinker (C8): iterative minimization of a failing call sequence
//! while a verifier confirms the failure still reproduces.
//!
//! `minimizer.rs` in the teacher is a 19-line stub; the pass structure
//! below is grounded more substantially on `other_examples/…foundry…
//! invariant-replay.rs`'s `shrink_sequence` (shrink against an executor,
//! replay to confirm) generalized to the three-pass contract (element
//! removal, argument simplification, delay reduction).

use crate::sequence::{CallData, CallSequence};
use crate::value::AbiValue;

/// Outcome of replaying one shrink candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifierOutcome {
    /// The failure this shrink targets still reproduces.
    FailStillReproduces,
    /// The candidate no longer reproduces the failure; reject it.
    NoLongerFails,
}

/// Supplied by the test case provider that raised the `ShrinkRequest`;
/// re-runs its detection logic against a candidate sequence.
pub trait Verifier {
    fn check(&mut self, candidate: &CallSequence) -> VerifierOutcome;
}

/// Replaces every argument in `element` with the simplest canonical value
/// of its type: zero, empty bytes/string, the zero address, all-false
/// tuples/arrays collapsed to their shortest valid length.
fn canonical_value(value: &AbiValue) -> AbiValue {
    match value {
        AbiValue::Address(_) => AbiValue::Address(primitive_types::H160::zero()),
        AbiValue::Bool(_) => AbiValue::Bool(false),
        AbiValue::Uint(_, width) => AbiValue::Uint(primitive_types::U256::zero(), *width),
        AbiValue::Int(_, width) => AbiValue::Int(primitive_types::U256::zero(), *width),
        AbiValue::FixedBytes(bytes) => AbiValue::FixedBytes(vec![0u8; bytes.len()]),
        AbiValue::Bytes(_) => AbiValue::Bytes(Vec::new()),
        AbiValue::String(_) => AbiValue::String(String::new()),
        AbiValue::Array(_) => AbiValue::Array(Vec::new()),
        AbiValue::Tuple(items) => AbiValue::Tuple(items.iter().map(canonical_value).collect()),
    }
}

fn is_canonical(value: &AbiValue) -> bool {
    *value == canonical_value(value)
}

pub struct Shrinker;

impl Shrinker {
    /// Runs all three passes to a fixed point: repeats the full pass
    /// sequence until one entire round produces no further reduction.
    pub fn shrink(sequence: &CallSequence, verifier: &mut dyn Verifier) -> CallSequence {
        let mut current = sequence.clone();
        loop {
            let before = current.elements.len();
            let before_bytes = encoded_size(&current);

            current = Self::remove_elements(&current, verifier);
            current = Self::simplify_arguments(&current, verifier);
            current = Self::reduce_delays(&current, verifier);

            if current.elements.len() == before && encoded_size(&current) == before_bytes {
                break;
            }
        }
        current
    }

    fn remove_elements(sequence: &CallSequence, verifier: &mut dyn Verifier) -> CallSequence {
        let mut elements = sequence.elements.clone();
        let mut index = 0;
        while index < elements.len() {
            if elements.len() == 1 {
                break;
            }
            let mut candidate = elements.clone();
            candidate.remove(index);
            let trial = CallSequence { elements: candidate.clone() };
            if verifier.check(&trial) == VerifierOutcome::FailStillReproduces {
                elements = candidate;
                // Re-check the same index: the next element shifted into it.
            } else {
                index += 1;
            }
        }
        CallSequence { elements }
    }

    fn simplify_arguments(sequence: &CallSequence, verifier: &mut dyn Verifier) -> CallSequence {
        let mut elements = sequence.elements.clone();
        for i in 0..elements.len() {
            let CallData::Abi { args, .. } = &elements[i].call.data else {
                continue;
            };
            for arg_index in 0..args.len() {
                loop {
                    let current_arg = match &elements[i].call.data {
                        CallData::Abi { args, .. } => args[arg_index].clone(),
                        CallData::Raw(_) => break,
                    };
                    if is_canonical(&current_arg) {
                        break;
                    }
                    let mut candidate = elements.clone();
                    if let CallData::Abi { args, .. } = &mut candidate[i].call.data {
                        args[arg_index] = canonical_value(&current_arg);
                    }
                    let trial = CallSequence { elements: candidate.clone() };
                    if verifier.check(&trial) == VerifierOutcome::FailStillReproduces {
                        elements = candidate;
                    } else {
                        break;
                    }
                }
            }
        }
        CallSequence { elements }
    }

    fn reduce_delays(sequence: &CallSequence, verifier: &mut dyn Verifier) -> CallSequence {
        let mut elements = sequence.elements.clone();
        for i in 0..elements.len() {
            for field in [DelayField::Number, DelayField::Timestamp] {
                loop {
                    let current = field.get(&elements[i]);
                    if current <= 1 {
                        break;
                    }
                    let mut candidate = elements.clone();
                    field.set(&mut candidate[i], current / 2);
                    let trial = CallSequence { elements: candidate.clone() };
                    if verifier.check(&trial) == VerifierOutcome::FailStillReproduces {
                        elements = candidate;
                    } else {
                        break;
                    }
                }
            }
        }
        CallSequence { elements }
    }
}

#[derive(Clone, Copy)]
enum DelayField {
    Number,
    Timestamp,
}

impl DelayField {
    fn get(self, element: &crate::sequence::CallSequenceElement) -> u64 {
        match self {
            DelayField::Number => element.block_number_delay,
            DelayField::Timestamp => element.block_timestamp_delay,
        }
    }

    fn set(self, element: &mut crate::sequence::CallSequenceElement, value: u64) {
        match self {
            DelayField::Number => element.block_number_delay = value,
            DelayField::Timestamp => element.block_timestamp_delay = value,
        }
    }
}

fn encoded_size(sequence: &CallSequence) -> usize {
    sequence
        .elements
        .iter()
        .map(|e| match &e.call.data {
            CallData::Abi { args, .. } => args.len() + crate::value::encode::encode_args(args).len(),
            CallData::Raw(bytes) => bytes.len(),
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::{Call, CallSequenceElement};
    use primitive_types::{H160, U256};

    fn element_with_arg(value: AbiValue) -> CallSequenceElement {
        CallSequenceElement {
            call: Call {
                from: H160::repeat_byte(1),
                to: Some(H160::repeat_byte(2)),
                value: U256::zero(),
                gas_limit: 1,
                data: CallData::Abi {
                    method_signature: "f".into(),
                    selector: [0; 4],
                    args: vec![value],
                },
            },
            contract_name: None,
            block_number_delay: 8,
            block_timestamp_delay: 8,
        }
    }

    struct OnlyIndexMatters {
        needed_index: usize,
    }

    impl Verifier for OnlyIndexMatters {
        fn check(&mut self, candidate: &CallSequence) -> VerifierOutcome {
            if candidate.elements.len() > self.needed_index {
                VerifierOutcome::FailStillReproduces
            } else {
                VerifierOutcome::NoLongerFails
            }
        }
    }

    #[test]
    fn element_removal_converges_to_minimal_length() {
        let sequence = CallSequence {
            elements: (0..5)
                .map(|_| element_with_arg(AbiValue::Uint(U256::from(99u64), 256)))
                .collect(),
        };
        let mut verifier = OnlyIndexMatters { needed_index: 2 };
        let shrunk = Shrinker::shrink(&sequence, &mut verifier);
        assert_eq!(shrunk.elements.len(), 3);
    }

    struct AlwaysFails;
    impl Verifier for AlwaysFails {
        fn check(&mut self, _candidate: &CallSequence) -> VerifierOutcome {
            VerifierOutcome::FailStillReproduces
        }
    }

    #[test]
    fn argument_simplification_reaches_canonical_zero() {
        let sequence = CallSequence {
            elements: vec![element_with_arg(AbiValue::Uint(U256::from(12345u64), 256))],
        };
        let mut verifier = AlwaysFails;
        let shrunk = Shrinker::shrink(&sequence, &mut verifier);
        if let CallData::Abi { args, .. } = &shrunk.elements[0].call.data {
            assert_eq!(args[0], AbiValue::Uint(U256::zero(), 256));
        } else {
            panic!("expected abi call data");
        }
    }

    #[test]
    fn delay_reduction_approaches_minimum() {
        let sequence = CallSequence {
            elements: vec![element_with_arg(AbiValue::Bool(false))],
        };
        let mut verifier = AlwaysFails;
        let shrunk = Shrinker::shrink(&sequence, &mut verifier);
        assert_eq!(shrunk.elements[0].block_number_delay, 1);
        assert_eq!(shrunk.elements[0].block_timestamp_delay, 1);
    }
}
