use ethereum_types::Address;

/// Domain-separation constant folded into every signed L2 payload. Changing it invalidates all
/// existing signatures.
pub const SIGNATURE_CONSTANT: u32 = 0xC0DE_2D11;

/// The zero settlement-chain address.
pub const EMPTY_ADDR: Address = Address::zero();

/// The all-ones settlement-chain address: marks "any address" in transfers addressed to a bare
/// BJJ key.
pub const FF_ADDR: Address = Address::repeat_byte(0xffu8);

/// How many batch checkpoints a state store retains for rollback.
pub const KEEP_CHECKPOINTS_DEFAULT: usize = 128;
