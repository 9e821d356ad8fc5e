//! Byte-level conversions between this crate's `primitive_types` address/uint
//! representation (matching the teacher's `EVMAddress`/`EVMU256` aliases in
//! `evm/types.rs`) and `revm`'s own primitive types.

use primitive_types::{H160, U256};

pub fn to_revm_address(address: H160) -> revm::primitives::B160 {
    revm::primitives::B160::from_slice(address.as_bytes())
}

pub fn from_revm_address(address: revm::primitives::B160) -> H160 {
    H160::from_slice(address.as_bytes())
}

pub fn to_revm_u256(value: U256) -> revm::primitives::U256 {
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    revm::primitives::U256::from_be_bytes(bytes)
}

pub fn from_revm_u256(value: revm::primitives::U256) -> U256 {
    U256::from_big_endian(&value.to_be_bytes::<32>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_round_trips() {
        let a = H160::repeat_byte(0x42);
        assert_eq!(from_revm_address(to_revm_address(a)), a);
    }

    #[test]
    fn u256_round_trips() {
        let v = U256::from(123456789u64);
        assert_eq!(from_revm_u256(to_revm_u256(v)), v);
    }
}
