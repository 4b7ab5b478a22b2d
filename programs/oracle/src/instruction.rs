//! Instruction wire format.
//!
//! Every instruction starts with the `{version, command}` header. Command
//! bodies are fixed-layout structs decoded by an exact-size cast, so a
//! buffer of the wrong length is rejected outright.

use std::mem::size_of;

use bytemuck::{Pod, Zeroable};
use solana_program::program_error::ProgramError;

use crate::state::{AccKey, Symbol};

// command ids
pub const CMD_INIT_MAPPING: u32 = 0;
pub const CMD_ADD_MAPPING: u32 = 1;
pub const CMD_ADD_SYMBOL: u32 = 2;
pub const CMD_ADD_PUBLISHER: u32 = 3;
pub const CMD_DEL_PUBLISHER: u32 = 4;
pub const CMD_UPD_PRICE: u32 = 5;
pub const CMD_AGG_PRICE: u32 = 6;

/// Common header; `init_mapping` and `add_mapping` carry nothing else.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct CmdHeader {
    pub ver: u32,
    pub cmd: u32,
}

/// Create a price account for a symbol under the tail mapping table.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct CmdAddSymbol {
    pub ver: u32,
    pub cmd: u32,
    pub sym: Symbol,
    pub expo: i32,
    pub ptype: u32,
}

/// Add or remove a publisher on a price account.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct CmdUpdPublisher {
    pub ver: u32,
    pub cmd: u32,
    pub sym: Symbol,
    pub ptype: u32,
    pub unused: u32,
    pub publisher: AccKey,
}

/// Publish a quote (`upd_price`) or trigger aggregation only (`agg_price`).
/// The publish slot comes from the clock sysvar, not the wire.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct CmdUpdPrice {
    pub ver: u32,
    pub cmd: u32,
    pub sym: Symbol,
    pub ptype: u32,
    pub status: u32,
    pub price: i64,
    pub conf: u64,
}

const _: [(); 8] = [(); size_of::<CmdHeader>()];
const _: [(); 48] = [(); size_of::<CmdAddSymbol>()];
const _: [(); 80] = [(); size_of::<CmdUpdPublisher>()];
const _: [(); 64] = [(); size_of::<CmdUpdPrice>()];

/// Decode a command body, requiring the exact wire size. Instruction data
/// carries no alignment guarantee, so the bytes are copied out rather than
/// viewed in place.
pub fn decode<T: Pod>(data: &[u8]) -> Result<T, ProgramError> {
    if data.len() != size_of::<T>() {
        return Err(ProgramError::InvalidArgument);
    }
    Ok(bytemuck::pod_read_unaligned(data))
}

/// Decode just the header from a buffer that is at least header-sized.
pub fn decode_header(data: &[u8]) -> Result<CmdHeader, ProgramError> {
    if data.len() < size_of::<CmdHeader>() {
        return Err(ProgramError::InvalidArgument);
    }
    Ok(bytemuck::pod_read_unaligned(&data[..size_of::<CmdHeader>()]))
}
