//! Ledger-visible account layouts.
//!
//! Every structure here is part of the external contract: fixed size,
//! little-endian, explicitly padded, 8-byte aligned. Accounts are versioned
//! by a magic word and a version number; an account written by version `v`
//! stays readable by any later version (new fields are only ever appended).

use std::mem::size_of;

use bytemuck::{Pod, Zeroable};
use solana_program::{program_error::ProgramError, pubkey::Pubkey};

/// Magic word marking an initialized oracle account.
pub const MAGIC: u32 = 0xa1b2_c3d4;
/// Current account/instruction version.
pub const VERSION: u32 = 1;

/// Hash index width of a mapping table.
pub const MAP_TABLE_SIZE: usize = 640;
/// Node capacity of a mapping table.
pub const MAP_NODE_SIZE: usize = 300;
/// Maximum publishers per price account.
pub const COMP_SIZE: usize = 32;
/// Exponent bound for price accounts: `-MAX_NUM_DECIMALS ..= MAX_NUM_DECIMALS`.
pub const MAX_NUM_DECIMALS: i32 = 8;

// price types
pub const PTYPE_UNKNOWN: u32 = 0;
pub const PTYPE_PRICE: u32 = 1;
pub const PTYPE_TWAP: u32 = 2;
pub const PTYPE_VOLATILITY: u32 = 3;

// quote / aggregate status
pub const STATUS_UNKNOWN: u32 = 0;
pub const STATUS_TRADING: u32 = 1;
pub const STATUS_HALTED: u32 = 2;
pub const STATUS_AUCTION: u32 = 3;

/// Account public key stored as four little-endian words so the layouts
/// keep 8-byte alignment without implicit padding.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct AccKey {
    pub k: [u64; 4],
}

impl AccKey {
    pub fn is_zero(&self) -> bool {
        self.k == [0u64; 4]
    }

    pub fn from_pubkey(key: &Pubkey) -> Self {
        AccKey {
            k: bytemuck::cast(key.to_bytes()),
        }
    }

    pub fn to_pubkey(self) -> Pubkey {
        Pubkey::new_from_array(bytemuck::cast(self.k))
    }
}

/// Symbol identifier: 32 bytes of ascii, zero-padded. The low word doubles
/// as the hash of the symbol for mapping-table bucketing.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Symbol {
    pub k: [u64; 4],
}

impl Symbol {
    pub fn is_zero(&self) -> bool {
        self.k == [0u64; 4]
    }

    /// Bucketing word.
    pub fn low_word(&self) -> u64 {
        self.k[0]
    }

    pub fn as_bytes(&self) -> [u8; 32] {
        bytemuck::cast(self.k)
    }

    /// Build a symbol from ascii text, truncated at 32 bytes.
    pub fn from_str(s: &str) -> Self {
        let mut buf = [0u8; 32];
        let n = s.len().min(32);
        buf[..n].copy_from_slice(&s.as_bytes()[..n]);
        Symbol {
            k: bytemuck::cast(buf),
        }
    }
}

/// One symbol entry in a mapping table. `next` is a 1-based index into the
/// owning table's node array chaining hash-bucket collisions; zero ends the
/// chain. `price_acc` heads the linked list of price accounts for the
/// symbol, one per price type.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct MapNode {
    pub sym: Symbol,
    pub next: u32,
    pub unused: u32,
    pub price_acc: AccKey,
}

/// One table in the append-only mapping chain. Only the tail (`next` zero)
/// may receive new symbols; a new table may be appended only once the tail
/// is full.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct MapTable {
    pub magic: u32,
    pub ver: u32,
    pub num: u32,
    pub unused: u32,
    pub next: AccKey,
    pub nodes: [MapNode; MAP_NODE_SIZE],
    pub tab: [u32; MAP_TABLE_SIZE],
}

/// A single quote: price, confidence interval, status and the slot it was
/// published in.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct PriceInfo {
    pub price: i64,
    pub conf: u64,
    pub status: u32,
    pub unused: u32,
    pub pub_slot: u64,
}

/// One publisher's entry in a price account: its roster key, the snapshot
/// taken at the start of the current aggregation slot, and its most recent
/// quote.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct PriceComp {
    pub publisher: AccKey,
    pub agg: PriceInfo,
    pub latest: PriceInfo,
}

/// Price account: one (symbol, price type) pair with its publisher roster
/// and the current aggregate. `next` chains further price types of the same
/// symbol.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct PriceAccount {
    pub magic: u32,
    pub ver: u32,
    pub size: u32,
    pub ptype: u32,
    pub expo: i32,
    pub num: u32,
    pub curr_slot: u64,
    pub valid_slot: u64,
    pub sym: Symbol,
    pub next: AccKey,
    pub agg_pub: AccKey,
    pub agg: PriceInfo,
    pub comp: [PriceComp; COMP_SIZE],
}

// layout guards
const _: [(); 72] = [(); size_of::<MapNode>()];
const _: [(); 24208] = [(); size_of::<MapTable>()];
const _: [(); 32] = [(); size_of::<PriceInfo>()];
const _: [(); 96] = [(); size_of::<PriceComp>()];
const _: [(); 3240] = [(); size_of::<PriceAccount>()];

/// View the head of an account's data as `T`. Account data is 8-byte
/// aligned in the program input buffer, so an in-place cast is sound.
pub fn load<T: Pod>(data: &[u8]) -> Result<&T, ProgramError> {
    let end = size_of::<T>();
    if data.len() < end {
        return Err(ProgramError::InvalidArgument);
    }
    bytemuck::try_from_bytes(&data[..end]).map_err(|_| ProgramError::InvalidArgument)
}

/// Mutable variant of [`load`].
pub fn load_mut<T: Pod>(data: &mut [u8]) -> Result<&mut T, ProgramError> {
    let end = size_of::<T>();
    if data.len() < end {
        return Err(ProgramError::InvalidArgument);
    }
    bytemuck::try_from_bytes_mut(&mut data[..end]).map_err(|_| ProgramError::InvalidArgument)
}
