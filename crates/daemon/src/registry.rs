//! Account registry.
//!
//! Owns every product and price object for the life of the process; other
//! components hold indices, never references. Keys hash by their first
//! eight bytes, which for ledger account keys are already uniformly random.

use std::collections::HashMap;
use std::hash::{BuildHasherDefault, Hasher};
use std::mem::size_of;

use polaris_oracle::state::{PriceAccount, Symbol, MAGIC};
use solana_sdk::pubkey::Pubkey;

use crate::error::{DaemonError, Result};

#[derive(Default)]
pub struct KeyPrefixHasher(u64);

impl Hasher for KeyPrefixHasher {
    // Last write wins; the 32-byte key write lands after the slice-length
    // prefix and supplies the hash.
    fn write(&mut self, bytes: &[u8]) {
        if bytes.len() >= 8 {
            self.0 = u64::from_le_bytes(bytes[..8].try_into().unwrap());
        } else {
            let mut word = 0u64;
            for (i, b) in bytes.iter().enumerate() {
                word |= (*b as u64) << (8 * i);
            }
            self.0 = word;
        }
    }

    fn finish(&self) -> u64 {
        self.0
    }
}

pub type KeyPrefixBuild = BuildHasherDefault<KeyPrefixHasher>;

/// What a registered account key resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Mapping,
    Price(usize),
}

/// A symbol and the price accounts observed under it.
pub struct Product {
    pub symbol: Symbol,
    pub prices: Vec<usize>,
}

/// A local publisher quote waiting for its publish turn. Overwritten by a
/// newer quote; a missed cycle is simply lost.
#[derive(Debug, Clone, Copy)]
pub struct PendingQuote {
    pub price: i64,
    pub conf: u64,
    pub status: u32,
    /// Recompute the aggregate without contributing a new quote.
    pub aggregate_only: bool,
    /// Local client awaiting the submission callback.
    pub origin: Option<u64>,
}

pub struct PriceEntry {
    pub key: Pubkey,
    pub product: usize,
    /// Most recently observed on-ledger state.
    pub account: PriceAccount,
    /// Whether account data has been observed at least once.
    pub present: bool,
    /// Local clients subscribed to aggregate updates.
    pub subscribers: Vec<u64>,
    pub pending: Option<PendingQuote>,
}

#[derive(Default)]
pub struct Registry {
    accounts: HashMap<Pubkey, EntryKind, KeyPrefixBuild>,
    products: Vec<Product>,
    by_symbol: HashMap<[u64; 4], usize>,
    prices: Vec<PriceEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Track a mapping account key. Returns false when already known.
    pub fn add_mapping(&mut self, key: Pubkey) -> bool {
        if self.accounts.contains_key(&key) {
            return false;
        }
        self.accounts.insert(key, EntryKind::Mapping);
        true
    }

    /// Materialize the product for a symbol, reusing an existing one.
    pub fn add_product(&mut self, symbol: Symbol) -> (usize, bool) {
        if let Some(&idx) = self.by_symbol.get(&symbol.k) {
            return (idx, false);
        }
        let idx = self.products.len();
        self.products.push(Product {
            symbol,
            prices: Vec::new(),
        });
        self.by_symbol.insert(symbol.k, idx);
        (idx, true)
    }

    /// Register a price account under a product. Returns the new entry
    /// index, or None when the key is already present.
    pub fn add_price(&mut self, key: Pubkey, product: usize) -> Option<usize> {
        if self.accounts.contains_key(&key) {
            return None;
        }
        let idx = self.prices.len();
        self.prices.push(PriceEntry {
            key,
            product,
            account: bytemuck::Zeroable::zeroed(),
            present: false,
            subscribers: Vec::new(),
            pending: None,
        });
        self.products[product].prices.push(idx);
        self.accounts.insert(key, EntryKind::Price(idx));
        Some(idx)
    }

    pub fn lookup(&self, key: &Pubkey) -> Option<EntryKind> {
        self.accounts.get(key).copied()
    }

    pub fn product(&self, idx: usize) -> &Product {
        &self.products[idx]
    }

    pub fn num_products(&self) -> usize {
        self.products.len()
    }

    pub fn price(&self, idx: usize) -> &PriceEntry {
        &self.prices[idx]
    }

    pub fn price_mut(&mut self, idx: usize) -> &mut PriceEntry {
        &mut self.prices[idx]
    }

    pub fn num_prices(&self) -> usize {
        self.prices.len()
    }

    /// Resolve a (symbol, price type) pair to an observed price entry.
    pub fn find_price(&self, symbol: &Symbol, ptype: u32) -> Option<usize> {
        let product = *self.by_symbol.get(&symbol.k)?;
        self.products[product]
            .prices
            .iter()
            .copied()
            .find(|&i| self.prices[i].present && self.prices[i].account.ptype == ptype)
    }

    /// Ingest fresh account bytes for a registered price key. Returns the
    /// entry index and, when the account chains to an unseen price account,
    /// that key for discovery.
    pub fn update_price(
        &mut self,
        key: &Pubkey,
        data: &[u8],
        max_ver: u32,
    ) -> Result<(usize, Option<Pubkey>)> {
        let Some(EntryKind::Price(idx)) = self.lookup(key) else {
            return Err(DaemonError::Account(format!("unknown price account {key}")));
        };
        if data.len() < size_of::<PriceAccount>() {
            return Err(DaemonError::Account(format!(
                "price account {key} truncated to {} bytes",
                data.len()
            )));
        }
        let account: PriceAccount =
            bytemuck::pod_read_unaligned(&data[..size_of::<PriceAccount>()]);
        if account.magic != MAGIC {
            return Err(DaemonError::Account(format!("price account {key} not initialized")));
        }
        if account.ver > max_ver {
            return Err(DaemonError::Account(format!(
                "price account {key} version {} exceeds {max_ver}",
                account.ver
            )));
        }
        let entry = &mut self.prices[idx];
        entry.account = account;
        entry.present = true;

        let next = account.next;
        let chained = if next.is_zero() {
            None
        } else {
            let next_key = next.to_pubkey();
            (!self.accounts.contains_key(&next_key)).then_some(next_key)
        };
        Ok((idx, chained))
    }

    /// Drop a departed local client from every subscriber list and orphan
    /// its pending quotes.
    pub fn forget_user(&mut self, user: u64) {
        for entry in &mut self.prices {
            entry.subscribers.retain(|&u| u != user);
            if let Some(q) = entry.pending.as_mut() {
                if q.origin == Some(user) {
                    q.origin = None;
                }
            }
        }
    }
}
