//! Account predicates gating every instruction.

use solana_program::{account_info::AccountInfo, pubkey::Pubkey};

/// The fee payer: must have signed and be writable.
pub fn valid_funding_account(info: &AccountInfo) -> bool {
    info.is_signer && info.is_writable
}

/// A program-owned account being created or administered: signed, writable,
/// owned by this program and at least `dlen` bytes.
pub fn valid_signable_account(program_id: &Pubkey, info: &AccountInfo, dlen: usize) -> bool {
    info.is_signer && info.is_writable && info.owner == program_id && info.data_len() >= dlen
}

/// A program-owned account being updated without its signature.
pub fn valid_writable_account(program_id: &Pubkey, info: &AccountInfo, dlen: usize) -> bool {
    info.is_writable && info.owner == program_id && info.data_len() >= dlen
}

/// A program-owned account only read by the instruction.
pub fn valid_readable_account(program_id: &Pubkey, info: &AccountInfo, dlen: usize) -> bool {
    info.owner == program_id && info.data_len() >= dlen
}
