//! Instruction dispatch and account operations.
//!
//! Every failure, whatever the cause, surfaces as `InvalidArgument`; the
//! ledger aborts the transaction and discards partial writes.

use std::mem::size_of;

use bytemuck::Zeroable;
use solana_program::{
    account_info::AccountInfo,
    clock::Clock,
    entrypoint::ProgramResult,
    program_error::ProgramError::InvalidArgument,
    pubkey::Pubkey,
    sysvar::{clock, Sysvar},
};

use crate::aggregate;
use crate::instruction::{
    self, CmdAddSymbol, CmdUpdPrice, CmdUpdPublisher, CMD_ADD_MAPPING, CMD_ADD_PUBLISHER,
    CMD_ADD_SYMBOL, CMD_AGG_PRICE, CMD_DEL_PUBLISHER, CMD_INIT_MAPPING, CMD_UPD_PRICE,
};
use crate::state::{
    self, AccKey, MapTable, PriceAccount, PriceComp, COMP_SIZE, MAGIC, MAP_NODE_SIZE,
    MAP_TABLE_SIZE, MAX_NUM_DECIMALS, PTYPE_UNKNOWN, VERSION,
};
use crate::validators::{valid_funding_account, valid_signable_account, valid_writable_account};

/// Version- and command-switched entry point.
pub fn process(program_id: &Pubkey, accounts: &[AccountInfo], input: &[u8]) -> ProgramResult {
    let hdr = instruction::decode_header(input)?;
    match hdr.ver {
        VERSION => dispatch(program_id, accounts, input, hdr.cmd),
        _ => Err(InvalidArgument),
    }
}

fn dispatch(
    program_id: &Pubkey,
    accounts: &[AccountInfo],
    input: &[u8],
    cmd: u32,
) -> ProgramResult {
    match cmd {
        CMD_UPD_PRICE | CMD_AGG_PRICE => upd_price(program_id, accounts, input),
        CMD_INIT_MAPPING => init_mapping(program_id, accounts),
        CMD_ADD_MAPPING => add_mapping(program_id, accounts),
        CMD_ADD_SYMBOL => add_symbol(program_id, accounts, input),
        CMD_ADD_PUBLISHER => add_publisher(program_id, accounts, input),
        CMD_DEL_PUBLISHER => del_publisher(program_id, accounts, input),
        _ => Err(InvalidArgument),
    }
}

/// Initialize the first mapping table of a chain.
/// Accounts: funder, blank table.
fn init_mapping(program_id: &Pubkey, accounts: &[AccountInfo]) -> ProgramResult {
    if accounts.len() < 2
        || !valid_funding_account(&accounts[0])
        || !valid_signable_account(program_id, &accounts[1], size_of::<MapTable>())
    {
        return Err(InvalidArgument);
    }

    let mut data = accounts[1]
        .try_borrow_mut_data()
        .map_err(|_| InvalidArgument)?;
    {
        let table = state::load::<MapTable>(&data[..])?;
        if table.magic != 0 || table.ver != 0 {
            return Err(InvalidArgument);
        }
    }
    data[..size_of::<MapTable>()].fill(0);
    let table = state::load_mut::<MapTable>(&mut data[..])?;
    table.magic = MAGIC;
    table.ver = VERSION;
    Ok(())
}

/// Append a blank table to a full tail.
/// Accounts: funder, tail table, new table.
fn add_mapping(program_id: &Pubkey, accounts: &[AccountInfo]) -> ProgramResult {
    if accounts.len() < 3
        || !valid_funding_account(&accounts[0])
        || !valid_signable_account(program_id, &accounts[1], size_of::<MapTable>())
        || !valid_signable_account(program_id, &accounts[2], size_of::<MapTable>())
    {
        return Err(InvalidArgument);
    }

    let mut tail_data = accounts[1]
        .try_borrow_mut_data()
        .map_err(|_| InvalidArgument)?;
    let mut new_data = accounts[2]
        .try_borrow_mut_data()
        .map_err(|_| InvalidArgument)?;

    let tail = state::load_mut::<MapTable>(&mut tail_data[..])?;
    {
        let fresh = state::load::<MapTable>(&new_data[..])?;
        // The tail must be initialized, full, and last in the chain; the new
        // table must be untouched.
        if tail.magic != MAGIC
            || fresh.magic != 0
            || (tail.num as usize) < MAP_NODE_SIZE
            || fresh.num != 0
            || !tail.next.is_zero()
        {
            return Err(InvalidArgument);
        }
    }

    new_data[..size_of::<MapTable>()].fill(0);
    let fresh = state::load_mut::<MapTable>(&mut new_data[..])?;
    fresh.magic = MAGIC;
    fresh.ver = VERSION;

    tail.next = AccKey::from_pubkey(accounts[2].key);
    Ok(())
}

/// Create a price account and bind it to its symbol in the tail table.
/// Accounts: funder, tail table, blank price account.
fn add_symbol(program_id: &Pubkey, accounts: &[AccountInfo], input: &[u8]) -> ProgramResult {
    let cmd: CmdAddSymbol = instruction::decode(input)?;
    if cmd.expo > MAX_NUM_DECIMALS
        || cmd.expo < -MAX_NUM_DECIMALS
        || cmd.ptype == PTYPE_UNKNOWN
        || cmd.sym.is_zero()
    {
        return Err(InvalidArgument);
    }

    if accounts.len() < 3
        || !valid_funding_account(&accounts[0])
        || !valid_signable_account(program_id, &accounts[1], size_of::<MapTable>())
        || !valid_signable_account(program_id, &accounts[2], size_of::<PriceAccount>())
    {
        return Err(InvalidArgument);
    }

    let mut map_data = accounts[1]
        .try_borrow_mut_data()
        .map_err(|_| InvalidArgument)?;
    let mut price_data = accounts[2]
        .try_borrow_mut_data()
        .map_err(|_| InvalidArgument)?;

    let map = state::load_mut::<MapTable>(&mut map_data[..])?;
    if map.magic != MAGIC {
        return Err(InvalidArgument);
    }
    {
        let head = state::load::<PriceAccount>(&price_data[..])?;
        if head.magic != 0 {
            return Err(InvalidArgument);
        }
    }

    price_data[..size_of::<PriceAccount>()].fill(0);
    let price = state::load_mut::<PriceAccount>(&mut price_data[..])?;
    price.magic = MAGIC;
    price.ver = VERSION;
    price.size = size_of::<PriceAccount>() as u32;
    price.expo = cmd.expo;
    price.ptype = cmd.ptype;
    price.sym = cmd.sym;

    // If the symbol is already present, prepend the new account to its
    // price-type chain.
    let key = AccKey::from_pubkey(accounts[2].key);
    let bucket = (cmd.sym.low_word() % MAP_TABLE_SIZE as u64) as usize;
    let mut vidx = map.tab[bucket];
    while vidx != 0 {
        let node = vidx as usize - 1;
        vidx = map.nodes[node].next;
        if map.nodes[node].sym == cmd.sym {
            price.next = map.nodes[node].price_acc;
            map.nodes[node].price_acc = key;
            return Ok(());
        }
    }

    // New symbols only land in a tail table with room to spare.
    if map.num as usize >= MAP_NODE_SIZE || !map.next.is_zero() {
        return Err(InvalidArgument);
    }
    map.num += 1;
    let hidx = map.num;
    let node = &mut map.nodes[hidx as usize - 1];
    node.next = map.tab[bucket];
    node.sym = cmd.sym;
    node.price_acc = key;
    map.tab[bucket] = hidx;
    Ok(())
}

/// Add a publisher to a price account's roster.
/// Accounts: funder, price account.
fn add_publisher(program_id: &Pubkey, accounts: &[AccountInfo], input: &[u8]) -> ProgramResult {
    let cmd: CmdUpdPublisher = instruction::decode(input)?;
    if cmd.ptype == PTYPE_UNKNOWN || cmd.sym.is_zero() || cmd.publisher.is_zero() {
        return Err(InvalidArgument);
    }

    if accounts.len() < 2
        || !valid_funding_account(&accounts[0])
        || !valid_signable_account(program_id, &accounts[1], size_of::<PriceAccount>())
    {
        return Err(InvalidArgument);
    }

    let mut data = accounts[1]
        .try_borrow_mut_data()
        .map_err(|_| InvalidArgument)?;
    let price = state::load_mut::<PriceAccount>(&mut data[..])?;
    if price.magic != MAGIC
        || price.ver != cmd.ver
        || price.ptype != cmd.ptype
        || price.sym != cmd.sym
    {
        return Err(InvalidArgument);
    }

    for i in 0..price.num as usize {
        if price.comp[i].publisher == cmd.publisher {
            return Err(InvalidArgument);
        }
    }
    if price.num as usize >= COMP_SIZE {
        return Err(InvalidArgument);
    }
    let idx = price.num as usize;
    price.comp[idx] = PriceComp::zeroed();
    price.comp[idx].publisher = cmd.publisher;
    price.num += 1;
    Ok(())
}

/// Remove a publisher, shifting the roster tail down one entry.
/// Accounts: funder, price account.
fn del_publisher(program_id: &Pubkey, accounts: &[AccountInfo], input: &[u8]) -> ProgramResult {
    let cmd: CmdUpdPublisher = instruction::decode(input)?;
    if cmd.ptype == PTYPE_UNKNOWN || cmd.sym.is_zero() || cmd.publisher.is_zero() {
        return Err(InvalidArgument);
    }

    if accounts.len() < 2
        || !valid_funding_account(&accounts[0])
        || !valid_signable_account(program_id, &accounts[1], size_of::<PriceAccount>())
    {
        return Err(InvalidArgument);
    }

    let mut data = accounts[1]
        .try_borrow_mut_data()
        .map_err(|_| InvalidArgument)?;
    let price = state::load_mut::<PriceAccount>(&mut data[..])?;
    if price.magic != MAGIC
        || price.ver != cmd.ver
        || price.ptype != cmd.ptype
        || price.sym != cmd.sym
    {
        return Err(InvalidArgument);
    }

    for i in 0..price.num as usize {
        if price.comp[i].publisher == cmd.publisher {
            for j in i + 1..price.num as usize {
                price.comp[j - 1] = price.comp[j];
            }
            price.num -= 1;
            price.comp[price.num as usize] = PriceComp::zeroed();
            return Ok(());
        }
    }
    Err(InvalidArgument)
}

/// Ingest a quote and recompute the aggregate on slot advance. `agg_price`
/// shares this path but skips the component write; on a stale slot neither
/// the aggregate nor the publisher's latest quote is touched.
/// Accounts: funder (publisher), price account, clock sysvar.
fn upd_price(program_id: &Pubkey, accounts: &[AccountInfo], input: &[u8]) -> ProgramResult {
    let cmd: CmdUpdPrice = instruction::decode(input)?;
    if cmd.sym.is_zero() {
        return Err(InvalidArgument);
    }

    if accounts.len() < 3
        || !valid_funding_account(&accounts[0])
        || !valid_writable_account(program_id, &accounts[1], size_of::<PriceAccount>())
        || *accounts[2].key != clock::ID
    {
        return Err(InvalidArgument);
    }
    let clock_now = Clock::from_account_info(&accounts[2]).map_err(|_| InvalidArgument)?;

    let mut data = accounts[1]
        .try_borrow_mut_data()
        .map_err(|_| InvalidArgument)?;
    let price = state::load_mut::<PriceAccount>(&mut data[..])?;
    // Accounts written by a newer program version are off limits.
    if price.magic != MAGIC
        || price.ver > VERSION
        || price.ptype != cmd.ptype
        || price.sym != cmd.sym
    {
        return Err(InvalidArgument);
    }

    let publisher = AccKey::from_pubkey(accounts[0].key);
    let idx = (0..price.num as usize)
        .find(|&i| price.comp[i].publisher == publisher)
        .ok_or(InvalidArgument)?;

    if clock_now.slot > price.curr_slot {
        aggregate::update(price, &publisher, clock_now.slot);
    }

    if cmd.cmd == CMD_UPD_PRICE {
        let latest = &mut price.comp[idx].latest;
        latest.price = cmd.price;
        latest.conf = cmd.conf;
        latest.status = cmd.status;
        latest.pub_slot = clock_now.slot;
    }
    Ok(())
}
