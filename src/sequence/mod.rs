//! Call sequence generation (C6): the six weighted strategies that decide
//! what a worker executes next.
//!
//! Net new relative to the teacher, whose `evm/mutator.rs` mutates a single
//! `EVMInput` rather than a whole call sequence; the per-element target /
//! method / sender selection below generalizes that file's random-choice
//! idiom (`state.rand_mut().below(...)`) to sequence construction.

use primitive_types::{H160, U256};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::FuzzerConfig;
use crate::value::{AbiFunction, AbiValue, ValueGenerator};

#[derive(Debug, Clone)]
pub enum CallData {
    Abi {
        method_signature: String,
        selector: [u8; 4],
        args: Vec<AbiValue>,
    },
    Raw(Vec<u8>),
}

impl CallData {
    /// Flattens to the calldata bytes the chain layer actually sends.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            CallData::Abi { selector, args, .. } => crate::value::encode::encode_selector_and_args(*selector, args),
            CallData::Raw(bytes) => bytes.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Call {
    pub from: H160,
    pub to: Option<H160>,
    pub value: U256,
    pub gas_limit: u64,
    pub data: CallData,
}

/// One call sequence element. `contract_ref`/`chain_reference` are
/// resolution-time conveniences, never serialized (§6).
#[derive(Debug, Clone)]
pub struct CallSequenceElement {
    pub call: Call,
    pub contract_name: Option<String>,
    pub block_number_delay: u64,
    pub block_timestamp_delay: u64,
}

#[derive(Debug, Clone, Default)]
pub struct CallSequence {
    pub elements: Vec<CallSequenceElement>,
}

impl CallSequence {
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// One deployed contract's callable surface, as the generator needs it.
#[derive(Debug, Clone)]
pub struct TargetContract {
    pub address: H160,
    pub name: String,
    pub methods: Vec<AbiFunction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Fresh,
    CorpusHead,
    CorpusTail,
    Splice,
    Interleave,
    ArgumentMutation,
}

const STRATEGIES: [Strategy; 6] = [
    Strategy::Fresh,
    Strategy::CorpusHead,
    Strategy::CorpusTail,
    Strategy::Splice,
    Strategy::Interleave,
    Strategy::ArgumentMutation,
];

/// Supplies corpus sequences to strategies that need one or two of them.
/// Implemented by the corpus in production; a trait here so the generator
/// has no direct corpus dependency.
pub trait CorpusSource {
    fn random_mutable_sequence(&self, rng: &mut dyn rand::RngCore) -> Option<CallSequence>;
}

/// Extension point for code outside the generator to influence per-element
/// generation (§4.6). `pre_generation` may rewrite a freshly built element
/// before it's considered for inclusion; `post_generation` runs afterward
/// and may reject it outright, dropping it from the sequence being built.
/// Both default to a no-op so a hook only needs to implement the one side
/// it cares about.
pub trait SequenceHook: Send + Sync {
    fn pre_generation(&self, element: CallSequenceElement) -> CallSequenceElement {
        element
    }

    fn post_generation(&self, _element: &CallSequenceElement) -> bool {
        true
    }
}

pub struct SequenceGenerator {
    pub targets: Vec<TargetContract>,
    pub contract_weights: std::collections::HashMap<H160, u32>,
    pub senders: Vec<H160>,
    pub sequence_max_length: u32,
    pub block_number_delay_range: (u64, u64),
    pub block_timestamp_delay_range: (u64, u64),
    pub strategy_weights: [u32; 6],
    pub values: ValueGenerator,
    pub hooks: Vec<std::sync::Arc<dyn SequenceHook>>,
}

impl SequenceGenerator {
    pub fn from_config(config: &FuzzerConfig) -> Self {
        Self {
            targets: Vec::new(),
            contract_weights: config.contract_weights.clone(),
            senders: config.senders.clone(),
            sequence_max_length: config.sequence_max_length,
            block_number_delay_range: (
                config.block_number_delay_range.min,
                config.block_number_delay_range.max,
            ),
            block_timestamp_delay_range: (
                config.block_timestamp_delay_range.min,
                config.block_timestamp_delay_range.max,
            ),
            strategy_weights: config.strategy_weights,
            values: ValueGenerator::new(config.senders.clone()),
            hooks: Vec::new(),
        }
    }

    pub fn note_deployment(&mut self, target: TargetContract) {
        self.values.note_deployment(target.address);
        self.targets.push(target);
    }

    pub fn register_hook(&mut self, hook: std::sync::Arc<dyn SequenceHook>) {
        self.hooks.push(hook);
    }

    /// Runs a freshly generated element through every registered hook:
    /// each `pre_generation` gets a chance to rewrite it in registration
    /// order, then each `post_generation` gets a chance to veto it.
    fn apply_hooks(&self, mut element: CallSequenceElement) -> Option<CallSequenceElement> {
        for hook in &self.hooks {
            element = hook.pre_generation(element);
        }
        for hook in &self.hooks {
            if !hook.post_generation(&element) {
                return None;
            }
        }
        Some(element)
    }

    fn choose_strategy(&self, rng: &mut impl Rng) -> Strategy {
        let total: u32 = self.strategy_weights.iter().sum();
        if total == 0 {
            return Strategy::Fresh;
        }
        let mut pick = rng.gen_range(0..total);
        for (weight, strategy) in self.strategy_weights.iter().zip(STRATEGIES.iter()) {
            if pick < *weight {
                return *strategy;
            }
            pick -= *weight;
        }
        Strategy::Fresh
    }

    fn choose_target(&self, rng: &mut impl Rng) -> Option<&TargetContract> {
        if self.targets.is_empty() {
            return None;
        }
        let total: u32 = self
            .targets
            .iter()
            .map(|t| *self.contract_weights.get(&t.address).unwrap_or(&1))
            .sum();
        if total == 0 {
            return self.targets.first();
        }
        let mut pick = rng.gen_range(0..total);
        for target in &self.targets {
            let weight = *self.contract_weights.get(&target.address).unwrap_or(&1);
            if pick < weight {
                return Some(target);
            }
            pick -= weight;
        }
        self.targets.last()
    }

    fn choose_sender(&self, rng: &mut impl Rng) -> H160 {
        self.senders[rng.gen_range(0..self.senders.len())]
    }

    /// Builds one element and runs it through every registered
    /// [`SequenceHook`] (§4.6). Returns `None` either because no target was
    /// available or because a hook vetoed the result.
    fn fresh_element(&self, rng: &mut impl Rng) -> Option<CallSequenceElement> {
        let element = self.build_fresh_element(rng)?;
        self.apply_hooks(element)
    }

    fn build_fresh_element(&self, rng: &mut impl Rng) -> Option<CallSequenceElement> {
        let target = self.choose_target(rng)?;
        if target.methods.is_empty() {
            return None;
        }
        let method = &target.methods[rng.gen_range(0..target.methods.len())];
        let args = method
            .inputs
            .iter()
            .map(|ty| self.values.fresh(rng, ty))
            .collect();
        let from = self.choose_sender(rng);
        let number_delay = rng.gen_range(self.block_number_delay_range.0..=self.block_number_delay_range.1);
        let timestamp_delay =
            rng.gen_range(self.block_timestamp_delay_range.0..=self.block_timestamp_delay_range.1);

        Some(CallSequenceElement {
            call: Call {
                from,
                to: Some(target.address),
                value: U256::zero(),
                gas_limit: 10_000_000,
                data: CallData::Abi {
                    method_signature: method.signature(),
                    selector: method.selector,
                    args,
                },
            },
            contract_name: Some(target.name.clone()),
            block_number_delay: number_delay,
            block_timestamp_delay: timestamp_delay,
        })
    }

    fn fresh_sequence(&self, rng: &mut impl Rng, len: usize) -> CallSequence {
        CallSequence {
            elements: (0..len).filter_map(|_| self.fresh_element(rng)).collect(),
        }
    }

    fn mutate_element_args(&self, rng: &mut impl Rng, element: &CallSequenceElement) -> CallSequenceElement {
        let mut mutated = element.clone();
        if let CallData::Abi { args, .. } = &mut mutated.call.data {
            if !args.is_empty() {
                let idx = rng.gen_range(0..args.len());
                args[idx] = self.values.mutate(rng, &args[idx]);
            }
        }
        mutated
    }

    /// Generates one new sequence using `source` for corpus-backed
    /// strategies. Falls back to `Fresh` when a corpus-dependent strategy
    /// has no material to work with, rather than producing an empty
    /// sequence.
    pub fn generate(&self, rng: &mut impl Rng, source: &dyn CorpusSource) -> CallSequence {
        let max_len = self.sequence_max_length.max(1) as usize;
        let strategy = self.choose_strategy(rng);

        match strategy {
            Strategy::Fresh => self.fresh_sequence(rng, rng.gen_range(1..=max_len)),
            Strategy::CorpusHead => {
                let Some(base) = source.random_mutable_sequence(rng) else {
                    return self.fresh_sequence(rng, rng.gen_range(1..=max_len));
                };
                let prefix_len = rng.gen_range(0..=base.len().min(max_len));
                let mut elements: Vec<_> = base.elements.into_iter().take(prefix_len).collect();
                while elements.len() < max_len && rng.gen_ratio(1, 2) {
                    if let Some(e) = self.fresh_element(rng) {
                        elements.push(e);
                    } else {
                        break;
                    }
                }
                CallSequence { elements }
            }
            Strategy::CorpusTail => {
                let Some(base) = source.random_mutable_sequence(rng) else {
                    return self.fresh_sequence(rng, rng.gen_range(1..=max_len));
                };
                let suffix_len = rng.gen_range(0..=base.len().min(max_len));
                let start = base.len() - suffix_len;
                let mut prefix = Vec::new();
                while prefix.len() + suffix_len < max_len && rng.gen_ratio(1, 2) {
                    if let Some(e) = self.fresh_element(rng) {
                        prefix.push(e);
                    } else {
                        break;
                    }
                }
                prefix.extend(base.elements.into_iter().skip(start));
                CallSequence { elements: prefix }
            }
            Strategy::Splice => {
                let (Some(first), Some(second)) = (
                    source.random_mutable_sequence(rng),
                    source.random_mutable_sequence(rng),
                ) else {
                    return self.fresh_sequence(rng, rng.gen_range(1..=max_len));
                };
                let split = if first.is_empty() { 0 } else { rng.gen_range(0..first.len()) };
                let mut elements: Vec<_> = first.elements.into_iter().take(split).collect();
                let remaining = max_len.saturating_sub(elements.len());
                elements.extend(second.elements.into_iter().take(remaining));
                CallSequence { elements }
            }
            Strategy::Interleave => {
                let (Some(first), Some(second)) = (
                    source.random_mutable_sequence(rng),
                    source.random_mutable_sequence(rng),
                ) else {
                    return self.fresh_sequence(rng, rng.gen_range(1..=max_len));
                };
                let mut a = first.elements.into_iter();
                let mut b = second.elements.into_iter();
                let mut elements = Vec::new();
                loop {
                    if elements.len() >= max_len {
                        break;
                    }
                    match (a.next(), b.next()) {
                        (Some(x), Some(y)) => {
                            elements.push(x);
                            if elements.len() < max_len {
                                elements.push(y);
                            }
                        }
                        (Some(x), None) => elements.push(x),
                        (None, Some(y)) => elements.push(y),
                        (None, None) => break,
                    }
                }
                CallSequence { elements }
            }
            Strategy::ArgumentMutation => {
                let Some(base) = source.random_mutable_sequence(rng) else {
                    return self.fresh_sequence(rng, rng.gen_range(1..=max_len));
                };
                let elements = base
                    .elements
                    .iter()
                    .map(|e| self.mutate_element_args(rng, e))
                    .collect();
                CallSequence { elements }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    struct EmptyCorpus;
    impl CorpusSource for EmptyCorpus {
        fn random_mutable_sequence(&self, _rng: &mut dyn rand::RngCore) -> Option<CallSequence> {
            None
        }
    }

    fn generator_with_one_target() -> SequenceGenerator {
        let mut gen = SequenceGenerator {
            targets: Vec::new(),
            contract_weights: Default::default(),
            senders: vec![H160::repeat_byte(1)],
            sequence_max_length: 4,
            block_number_delay_range: (1, 1),
            block_timestamp_delay_range: (1, 1),
            strategy_weights: [1, 0, 0, 0, 0, 0],
            values: ValueGenerator::new(vec![H160::repeat_byte(1)]),
            hooks: Vec::new(),
        };
        gen.note_deployment(TargetContract {
            address: H160::repeat_byte(2),
            name: "A".into(),
            methods: vec![AbiFunction {
                name: "f".into(),
                selector: [1, 2, 3, 4],
                inputs: vec![crate::value::AbiType::Uint(256)],
                outputs: vec![],
                state_mutability: crate::value::StateMutability::Nonpayable,
            }],
        });
        gen
    }

    #[test]
    fn fresh_strategy_produces_nonempty_sequences() {
        let generator = generator_with_one_target();
        let mut rng = StdRng::seed_from_u64(1);
        let seq = generator.generate(&mut rng, &EmptyCorpus);
        assert!(!seq.is_empty());
        assert!(seq.len() <= 4);
    }

    #[test]
    fn falls_back_to_fresh_when_corpus_strategy_has_no_material() {
        let mut generator = generator_with_one_target();
        generator.strategy_weights = [0, 0, 0, 0, 0, 1];
        let mut rng = StdRng::seed_from_u64(2);
        let seq = generator.generate(&mut rng, &EmptyCorpus);
        assert!(!seq.is_empty());
    }

    struct RejectEverything;
    impl SequenceHook for RejectEverything {
        fn post_generation(&self, _element: &CallSequenceElement) -> bool {
            false
        }
    }

    #[test]
    fn post_generation_hook_veto_empties_the_sequence() {
        let mut generator = generator_with_one_target();
        generator.register_hook(std::sync::Arc::new(RejectEverything));
        let mut rng = StdRng::seed_from_u64(3);
        let seq = generator.generate(&mut rng, &EmptyCorpus);
        assert!(seq.is_empty());
    }

    struct RewriteSender(H160);
    impl SequenceHook for RewriteSender {
        fn pre_generation(&self, mut element: CallSequenceElement) -> CallSequenceElement {
            element.call.from = self.0;
            element
        }
    }

    #[test]
    fn pre_generation_hook_rewrites_every_element() {
        let mut generator = generator_with_one_target();
        let forced_sender = H160::repeat_byte(0xEE);
        generator.register_hook(std::sync::Arc::new(RewriteSender(forced_sender)));
        let mut rng = StdRng::seed_from_u64(4);
        let seq = generator.generate(&mut rng, &EmptyCorpus);
        assert!(!seq.is_empty());
        assert!(seq.elements.iter().all(|e| e.call.from == forced_sender));
    }
}
