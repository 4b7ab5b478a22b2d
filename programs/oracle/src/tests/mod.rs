//! Processor-level tests over synthetic accounts.

mod add_publisher;
mod del_publisher;

use std::mem::size_of;

use solana_program::{
    account_info::AccountInfo, clock::Clock, entrypoint::ProgramResult, pubkey::Pubkey,
    sysvar::clock,
};

use crate::instruction::{
    CmdAddSymbol, CmdHeader, CmdUpdPrice, CmdUpdPublisher, CMD_ADD_PUBLISHER, CMD_DEL_PUBLISHER,
    CMD_INIT_MAPPING, CMD_UPD_PRICE,
};
use crate::state::{AccKey, MapTable, PriceAccount, Symbol, MapNode, VERSION};

/// Backing storage for one synthetic account. Data lives in a `u64` vector
/// so in-place layout casts stay 8-byte aligned, as on the ledger.
pub struct Acct {
    pub key: Pubkey,
    pub owner: Pubkey,
    pub lamports: u64,
    pub data: Vec<u64>,
    pub signer: bool,
    pub writable: bool,
}

impl Acct {
    pub fn funding() -> Self {
        Acct {
            key: Pubkey::new_unique(),
            owner: Pubkey::default(),
            lamports: 1_000_000_000,
            data: Vec::new(),
            signer: true,
            writable: true,
        }
    }

    pub fn mapping() -> Self {
        Acct {
            key: Pubkey::new_unique(),
            owner: crate::id(),
            lamports: 1,
            data: vec![0u64; size_of::<MapTable>() / 8],
            signer: true,
            writable: true,
        }
    }

    pub fn price() -> Self {
        Acct {
            key: Pubkey::new_unique(),
            owner: crate::id(),
            lamports: 1,
            data: vec![0u64; size_of::<PriceAccount>() / 8],
            signer: true,
            writable: true,
        }
    }

    pub fn clock(slot: u64) -> Self {
        let clk = Clock {
            slot,
            ..Clock::default()
        };
        let bytes = bincode::serialize(&clk).unwrap();
        let mut data = vec![0u64; bytes.len().div_ceil(8)];
        bytemuck::cast_slice_mut::<u64, u8>(&mut data)[..bytes.len()].copy_from_slice(&bytes);
        Acct {
            key: clock::ID,
            owner: Pubkey::default(),
            lamports: 1,
            data,
            signer: false,
            writable: false,
        }
    }

    pub fn info(&mut self) -> AccountInfo<'_> {
        AccountInfo::new(
            &self.key,
            self.signer,
            self.writable,
            &mut self.lamports,
            bytemuck::cast_slice_mut(&mut self.data),
            &self.owner,
            false,
            0,
        )
    }

    pub fn map(&self) -> &MapTable {
        bytemuck::from_bytes(&bytemuck::cast_slice(&self.data)[..size_of::<MapTable>()])
    }

    pub fn map_mut(&mut self) -> &mut MapTable {
        bytemuck::from_bytes_mut(
            &mut bytemuck::cast_slice_mut(&mut self.data)[..size_of::<MapTable>()],
        )
    }

    pub fn price_acct(&self) -> &PriceAccount {
        bytemuck::from_bytes(&bytemuck::cast_slice(&self.data)[..size_of::<PriceAccount>()])
    }

    pub fn price_acct_mut(&mut self) -> &mut PriceAccount {
        bytemuck::from_bytes_mut(
            &mut bytemuck::cast_slice_mut(&mut self.data)[..size_of::<PriceAccount>()],
        )
    }
}

// instruction encoders

pub fn header_cmd(cmd: u32) -> Vec<u8> {
    bytemuck::bytes_of(&CmdHeader { ver: VERSION, cmd }).to_vec()
}

pub fn add_symbol_cmd(sym: Symbol, expo: i32, ptype: u32) -> Vec<u8> {
    bytemuck::bytes_of(&CmdAddSymbol {
        ver: VERSION,
        cmd: crate::instruction::CMD_ADD_SYMBOL,
        sym,
        expo,
        ptype,
    })
    .to_vec()
}

pub fn publisher_cmd(cmd: u32, sym: Symbol, ptype: u32, publisher: &Pubkey) -> Vec<u8> {
    bytemuck::bytes_of(&CmdUpdPublisher {
        ver: VERSION,
        cmd,
        sym,
        ptype,
        unused: 0,
        publisher: AccKey::from_pubkey(publisher),
    })
    .to_vec()
}

pub fn price_cmd(cmd: u32, sym: Symbol, ptype: u32, price: i64, conf: u64, status: u32) -> Vec<u8> {
    bytemuck::bytes_of(&CmdUpdPrice {
        ver: VERSION,
        cmd,
        sym,
        ptype,
        status,
        price,
        conf,
    })
    .to_vec()
}

// shorthand drivers

pub fn do_init_mapping(funder: &mut Acct, map: &mut Acct) -> ProgramResult {
    let accounts = [funder.info(), map.info()];
    crate::processor::process(&crate::id(), &accounts, &header_cmd(CMD_INIT_MAPPING))
}

pub fn do_add_symbol(
    funder: &mut Acct,
    map: &mut Acct,
    price: &mut Acct,
    sym: Symbol,
    expo: i32,
    ptype: u32,
) -> ProgramResult {
    let accounts = [funder.info(), map.info(), price.info()];
    crate::processor::process(&crate::id(), &accounts, &add_symbol_cmd(sym, expo, ptype))
}

pub fn do_add_publisher(
    funder: &mut Acct,
    price: &mut Acct,
    sym: Symbol,
    ptype: u32,
    publisher: &Pubkey,
) -> ProgramResult {
    let accounts = [funder.info(), price.info()];
    crate::processor::process(
        &crate::id(),
        &accounts,
        &publisher_cmd(CMD_ADD_PUBLISHER, sym, ptype, publisher),
    )
}

pub fn do_del_publisher(
    funder: &mut Acct,
    price: &mut Acct,
    sym: Symbol,
    ptype: u32,
    publisher: &Pubkey,
) -> ProgramResult {
    let accounts = [funder.info(), price.info()];
    crate::processor::process(
        &crate::id(),
        &accounts,
        &publisher_cmd(CMD_DEL_PUBLISHER, sym, ptype, publisher),
    )
}

/// Drive `upd_price`/`agg_price` from `publisher` at `slot`.
pub fn do_upd_price(
    publisher: &mut Acct,
    price: &mut Acct,
    slot: u64,
    input: &[u8],
) -> ProgramResult {
    let mut clk = Acct::clock(slot);
    let accounts = [publisher.info(), price.info(), clk.info()];
    crate::processor::process(&crate::id(), &accounts, input)
}

pub fn node(map: &MapTable, hidx: u32) -> &MapNode {
    &map.nodes[hidx as usize - 1]
}

/// A publisher quote driven through the processor with command `upd_price`.
pub fn publish(
    publisher: &mut Acct,
    price: &mut Acct,
    sym: Symbol,
    ptype: u32,
    slot: u64,
    px: i64,
    conf: u64,
    status: u32,
) -> ProgramResult {
    do_upd_price(
        publisher,
        price,
        slot,
        &price_cmd(CMD_UPD_PRICE, sym, ptype, px, conf, status),
    )
}
