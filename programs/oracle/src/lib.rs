//! Polaris price oracle program.
//!
//! A deterministic state machine owning a chain of mapping accounts and,
//! under them, price accounts. Publishers post per-slot quotes; the program
//! recomputes the aggregate price exactly when the slot advances. All account
//! layouts are fixed, little-endian and consensus-observable.

pub mod aggregate;
pub mod instruction;
pub mod processor;
pub mod state;
pub mod validators;

#[cfg(test)]
mod tests;

solana_program::declare_id!("Po1aris111111111111111111111111111111111111");

#[cfg(not(feature = "no-entrypoint"))]
mod entrypoint {
    use solana_program::{
        account_info::AccountInfo, entrypoint, entrypoint::ProgramResult, pubkey::Pubkey,
    };

    entrypoint!(process_instruction);

    fn process_instruction(
        program_id: &Pubkey,
        accounts: &[AccountInfo],
        input: &[u8],
    ) -> ProgramResult {
        crate::processor::process(program_id, accounts, input)
    }
}
