//! Typed ABI values: representation, encoding, and the value generator
//! (C5) that produces and mutates them.
//!
//! The teacher hand-rolls ABI encoding rather than pulling in an external
//! ABI crate (`evm/abi.rs`'s `ABILossyType`/`BoxedABI`); this module keeps
//! that choice but replaces the teacher's lossy `{T256, TArray, TDynamic,
//! TEmpty, TUnknown}` type erasure with an explicit `AbiType`/`AbiValue`
//! pair so mutation and encoding can be type-directed. Mutation heuristics
//! (bit/byte flips, arithmetic deltas, truncation/extension) are grounded
//! on `mutation_utils.rs`'s `byte_mutator`/`byte_mutator_with_expansion`
//! and `ConstantPoolMetadata`.

pub mod encode;

use primitive_types::{H160, U256};
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbiType {
    Address,
    Bool,
    /// `uintN`, N in 8..=256, a multiple of 8.
    Uint(u16),
    /// `intN`, N in 8..=256, a multiple of 8.
    Int(u16),
    /// `bytesN`, N in 1..=32.
    FixedBytes(u8),
    Bytes,
    String,
    Array(Box<AbiType>),
    FixedArray(Box<AbiType>, usize),
    Tuple(Vec<AbiType>),
}

impl AbiType {
    pub fn is_dynamic(&self) -> bool {
        match self {
            AbiType::Bytes | AbiType::String | AbiType::Array(_) => true,
            AbiType::FixedArray(elem, _) => elem.is_dynamic(),
            AbiType::Tuple(fields) => fields.iter().any(AbiType::is_dynamic),
            _ => false,
        }
    }

    /// Canonical Solidity type string (`uint256`, `address[]`, `(bool,bytes32)`, ...),
    /// the form a method signature's parameter list is built from.
    pub fn canonical_name(&self) -> String {
        match self {
            AbiType::Address => "address".to_string(),
            AbiType::Bool => "bool".to_string(),
            AbiType::Uint(width) => format!("uint{width}"),
            AbiType::Int(width) => format!("int{width}"),
            AbiType::FixedBytes(width) => format!("bytes{width}"),
            AbiType::Bytes => "bytes".to_string(),
            AbiType::String => "string".to_string(),
            AbiType::Array(elem) => format!("{}[]", elem.canonical_name()),
            AbiType::FixedArray(elem, len) => format!("{}[{len}]", elem.canonical_name()),
            AbiType::Tuple(fields) => {
                let joined = fields.iter().map(AbiType::canonical_name).collect::<Vec<_>>().join(",");
                format!("({joined})")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbiValue {
    Address(H160),
    Bool(bool),
    /// Encoded as an unsigned 256-bit word regardless of declared width;
    /// `Uint`/`Int` values are masked to their declared width on encode.
    Uint(U256, u16),
    /// Two's-complement value stored in `U256`, declared width `u16`.
    Int(U256, u16),
    FixedBytes(Vec<u8>),
    Bytes(Vec<u8>),
    String(String),
    Array(Vec<AbiValue>),
    Tuple(Vec<AbiValue>),
}

impl AbiValue {
    pub fn value_type(&self) -> AbiType {
        match self {
            AbiValue::Address(_) => AbiType::Address,
            AbiValue::Bool(_) => AbiType::Bool,
            AbiValue::Uint(_, w) => AbiType::Uint(*w),
            AbiValue::Int(_, w) => AbiType::Int(*w),
            AbiValue::FixedBytes(b) => AbiType::FixedBytes(b.len() as u8),
            AbiValue::Bytes(_) => AbiType::Bytes,
            AbiValue::String(_) => AbiType::String,
            AbiValue::Array(items) => {
                let elem = items.first().map(|v| v.value_type()).unwrap_or(AbiType::Bytes);
                AbiType::Array(Box::new(elem))
            }
            AbiValue::Tuple(items) => AbiType::Tuple(items.iter().map(AbiValue::value_type).collect()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateMutability {
    Pure,
    View,
    Nonpayable,
    Payable,
}

/// A callable method from a contract's ABI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbiFunction {
    pub name: String,
    pub selector: [u8; 4],
    pub inputs: Vec<AbiType>,
    pub outputs: Vec<AbiType>,
    pub state_mutability: StateMutability,
}

impl AbiFunction {
    pub fn is_view(&self) -> bool {
        matches!(self.state_mutability, StateMutability::View | StateMutability::Pure)
    }

    /// Matches the property test case provider's shape: a view method
    /// returning exactly one boolean (§4.11).
    pub fn is_property_shaped(&self) -> bool {
        self.is_view() && self.outputs.len() == 1 && matches!(self.outputs[0], AbiType::Bool)
    }

    /// Matches the optimization test case provider's shape: a method
    /// returning exactly one signed integer (§4.11).
    pub fn is_optimization_shaped(&self) -> bool {
        self.outputs.len() == 1 && matches!(self.outputs[0], AbiType::Int(_))
    }

    /// Full `name(type1,type2,...)` signature, disambiguating overloaded
    /// methods that share a bare name but not a parameter list.
    pub fn signature(&self) -> String {
        let params = self.inputs.iter().map(AbiType::canonical_name).collect::<Vec<_>>().join(",");
        format!("{}({params})", self.name)
    }
}

/// Constants mined from runtime bytecode or seeded by an external Slither
/// analysis pass (`{type, value}` tuples, per §4.5); diversifies generated
/// values beyond uniform random draws the way the teacher's
/// `ConstantPoolMetadata` does for raw byte mutation.
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    pub uints: Vec<U256>,
    pub addresses: Vec<H160>,
    pub byte_strings: Vec<Vec<u8>>,
}

impl ConstantPool {
    pub fn add_uint(&mut self, value: U256) {
        if !self.uints.contains(&value) {
            self.uints.push(value);
        }
    }

    pub fn add_address(&mut self, address: H160) {
        if !self.addresses.contains(&address) {
            self.addresses.push(address);
        }
    }

    /// Mines every 32-byte-aligned PUSH-able constant out of runtime
    /// bytecode by scanning for `PUSH1..PUSH32` (`0x60..=0x7f`) opcodes and
    /// recording their immediates. A coarse but cheap heuristic; false
    /// positives (treating data as an opcode stream) are harmless, they
    /// just add noise to the pool.
    pub fn mine_bytecode(&mut self, code: &[u8]) {
        let mut i = 0;
        while i < code.len() {
            let op = code[i];
            if (0x60..=0x7f).contains(&op) {
                let width = (op - 0x5f) as usize;
                if i + 1 + width <= code.len() {
                    let imm = &code[i + 1..i + 1 + width];
                    self.uints.push(U256::from_big_endian(imm));
                    if width == 20 {
                        self.addresses.push(H160::from_slice(imm));
                    }
                }
                i += 1 + width;
            } else {
                i += 1;
            }
        }
    }
}

pub struct ValueGenerator {
    pub senders: Vec<H160>,
    pub deployed_addresses: Vec<H160>,
    pub constants: ConstantPool,
}

impl ValueGenerator {
    pub fn new(senders: Vec<H160>) -> Self {
        Self {
            senders,
            deployed_addresses: Vec::new(),
            constants: ConstantPool::default(),
        }
    }

    pub fn note_deployment(&mut self, address: H160) {
        self.deployed_addresses.push(address);
    }

    fn address_pool(&self) -> Vec<H160> {
        let mut pool = self.senders.clone();
        pool.extend(self.deployed_addresses.iter().copied());
        pool.extend(self.constants.addresses.iter().copied());
        pool
    }

    /// Boundary values a generator should always be able to produce:
    /// zero, max, and max-1 for the given width/signedness.
    pub fn boundary_values(&self, ty: &AbiType) -> Vec<AbiValue> {
        match ty {
            AbiType::Uint(width) => {
                let max = uint_max(*width);
                vec![
                    AbiValue::Uint(U256::zero(), *width),
                    AbiValue::Uint(max, *width),
                    AbiValue::Uint(max.saturating_sub(U256::one()), *width),
                ]
            }
            AbiType::Int(width) => {
                let max = int_max(*width);
                let min = int_min(*width);
                vec![
                    AbiValue::Int(U256::zero(), *width),
                    AbiValue::Int(max, *width),
                    AbiValue::Int(min, *width),
                ]
            }
            _ => Vec::new(),
        }
    }

    /// Generates a value from scratch for `ty`, drawing from the constant
    /// pool roughly a third of the time when one is available.
    pub fn fresh(&self, rng: &mut impl Rng, ty: &AbiType) -> AbiValue {
        match ty {
            AbiType::Address => {
                let pool = self.address_pool();
                if !pool.is_empty() {
                    AbiValue::Address(pool[rng.gen_range(0..pool.len())])
                } else {
                    AbiValue::Address(H160::from_low_u64_be(rng.gen()))
                }
            }
            AbiType::Bool => AbiValue::Bool(rng.gen()),
            AbiType::Uint(width) => {
                if !self.constants.uints.is_empty() && rng.gen_ratio(1, 3) {
                    let raw = self.constants.uints[rng.gen_range(0..self.constants.uints.len())];
                    AbiValue::Uint(raw & uint_max(*width), *width)
                } else {
                    AbiValue::Uint(random_u256(rng) & uint_max(*width), *width)
                }
            }
            AbiType::Int(width) => AbiValue::Int(random_u256(rng) & uint_max(256), *width),
            AbiType::FixedBytes(len) => {
                let mut bytes = vec![0u8; *len as usize];
                rng.fill(bytes.as_mut_slice());
                AbiValue::FixedBytes(bytes)
            }
            AbiType::Bytes => {
                let len = rng.gen_range(0..256);
                let mut bytes = vec![0u8; len];
                rng.fill(bytes.as_mut_slice());
                AbiValue::Bytes(bytes)
            }
            AbiType::String => {
                let len = rng.gen_range(0..32);
                let s: String = (0..len).map(|_| rng.gen_range(b'a'..=b'z') as char).collect();
                AbiValue::String(s)
            }
            AbiType::Array(elem) => {
                let len = rng.gen_range(0..8);
                AbiValue::Array((0..len).map(|_| self.fresh(rng, elem)).collect())
            }
            AbiType::FixedArray(elem, len) => {
                AbiValue::Array((0..*len).map(|_| self.fresh(rng, elem)).collect())
            }
            AbiType::Tuple(fields) => AbiValue::Tuple(fields.iter().map(|f| self.fresh(rng, f)).collect()),
        }
    }

    /// Perturbs an existing value in place via bit/byte flips, arithmetic
    /// deltas on numeric types, and truncation/extension on
    /// variable-length types. Structure (array length, tuple arity) is
    /// preserved except where truncation/extension targets it directly.
    pub fn mutate(&self, rng: &mut impl Rng, value: &AbiValue) -> AbiValue {
        match value {
            AbiValue::Address(_) => self.fresh(rng, &AbiType::Address),
            AbiValue::Bool(b) => AbiValue::Bool(!b),
            AbiValue::Uint(v, width) => AbiValue::Uint(mutate_u256(rng, *v) & uint_max(*width), *width),
            AbiValue::Int(v, width) => AbiValue::Int(mutate_u256(rng, *v) & uint_max(256), *width),
            AbiValue::FixedBytes(bytes) => {
                let mut out = bytes.clone();
                flip_random_byte(rng, &mut out);
                AbiValue::FixedBytes(out)
            }
            AbiValue::Bytes(bytes) => AbiValue::Bytes(mutate_byte_vec(rng, bytes)),
            AbiValue::String(s) => {
                let mutated = mutate_byte_vec(rng, s.as_bytes());
                AbiValue::String(String::from_utf8_lossy(&mutated).into_owned())
            }
            AbiValue::Array(items) => {
                let mut out = items.clone();
                if out.is_empty() {
                    return AbiValue::Array(out);
                }
                match rng.gen_range(0..3) {
                    0 if out.len() > 1 => {
                        out.pop();
                    }
                    1 => {
                        let clone_of = out[rng.gen_range(0..out.len())].clone();
                        let mutated = self.mutate(rng, &clone_of);
                        out.push(mutated);
                    }
                    _ => {
                        let idx = rng.gen_range(0..out.len());
                        out[idx] = self.mutate(rng, &out[idx]);
                    }
                }
                AbiValue::Array(out)
            }
            AbiValue::Tuple(items) => {
                let mut out = items.clone();
                if !out.is_empty() {
                    let idx = rng.gen_range(0..out.len());
                    out[idx] = self.mutate(rng, &out[idx]);
                }
                AbiValue::Tuple(out)
            }
        }
    }
}

fn uint_max(width: u16) -> U256 {
    if width >= 256 {
        U256::MAX
    } else {
        (U256::one() << width) - U256::one()
    }
}

fn int_max(width: u16) -> U256 {
    if width >= 256 {
        U256::MAX >> 1
    } else {
        (U256::one() << (width - 1)) - U256::one()
    }
}

fn int_min(width: u16) -> U256 {
    // Two's complement minimum: 1 followed by zeros, sign-extended to 256 bits.
    let magnitude = if width >= 256 {
        U256::one() << 255
    } else {
        U256::one() << (width - 1)
    };
    U256::MAX - magnitude + U256::one()
}

fn random_u256(rng: &mut impl Rng) -> U256 {
    let mut bytes = [0u8; 32];
    rng.fill(&mut bytes);
    U256::from_big_endian(&bytes)
}

const ARITHMETIC_DELTAS: [i64; 8] = [-2, -1, 1, 2, 8, 16, 64, 256];

fn mutate_u256(rng: &mut impl Rng, value: U256) -> U256 {
    match rng.gen_range(0..3) {
        0 => {
            // Bit flip.
            let bit = rng.gen_range(0..256u32);
            value ^ (U256::one() << bit)
        }
        1 => {
            // Arithmetic delta.
            let delta = ARITHMETIC_DELTAS[rng.gen_range(0..ARITHMETIC_DELTAS.len())];
            if delta >= 0 {
                value.overflowing_add(U256::from(delta)).0
            } else {
                value.overflowing_sub(U256::from(-delta)).0
            }
        }
        _ => random_u256(rng),
    }
}

fn flip_random_byte(rng: &mut impl Rng, bytes: &mut [u8]) {
    if bytes.is_empty() {
        return;
    }
    let idx = rng.gen_range(0..bytes.len());
    bytes[idx] ^= 1 << rng.gen_range(0..8u32);
}

fn mutate_byte_vec(rng: &mut impl Rng, bytes: &[u8]) -> Vec<u8> {
    let mut out = bytes.to_vec();
    if out.is_empty() {
        out.push(rng.gen());
        return out;
    }
    match rng.gen_range(0..3) {
        0 => flip_random_byte(rng, &mut out),
        1 => {
            // Truncate.
            let new_len = rng.gen_range(0..out.len());
            out.truncate(new_len);
        }
        _ => {
            // Extend.
            let extra = rng.gen_range(1..=32);
            out.extend((0..extra).map(|_| rng.gen::<u8>()));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn boundary_values_include_zero_and_max() {
        let gen = ValueGenerator::new(vec![H160::repeat_byte(1)]);
        let bounds = gen.boundary_values(&AbiType::Uint(8));
        assert!(bounds.contains(&AbiValue::Uint(U256::zero(), 8)));
        assert!(bounds.contains(&AbiValue::Uint(U256::from(255u64), 8)));
    }

    #[test]
    fn int_min_max_are_symmetric_around_zero_for_width_8() {
        assert_eq!(int_max(8), U256::from(127u64));
        // -128 as an unsigned 256-bit two's complement value.
        assert_eq!(int_min(8), U256::MAX - U256::from(127u64));
    }

    #[test]
    fn fresh_uint_respects_width_mask() {
        let mut rng = StdRng::seed_from_u64(7);
        let gen = ValueGenerator::new(vec![]);
        for _ in 0..50 {
            if let AbiValue::Uint(v, _) = gen.fresh(&mut rng, &AbiType::Uint(8)) {
                assert!(v <= U256::from(255u64));
            }
        }
    }

    #[test]
    fn mine_bytecode_extracts_push_immediates() {
        let mut pool = ConstantPool::default();
        // PUSH1 0x2a (42)
        pool.mine_bytecode(&[0x60, 0x2a]);
        assert!(pool.uints.contains(&U256::from(42u64)));
    }
}
