//! Key material loaded from the key directory.
//!
//! `publish_key_pair.json` is a standard JSON key-pair file; the mapping and
//! program keys are single base58 strings.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{read_keypair_file, Keypair};

use crate::error::{DaemonError, Result};

pub const PUBLISH_KEY_PAIR_FILE: &str = "publish_key_pair.json";
pub const MAPPING_KEY_FILE: &str = "mapping_key.txt";
pub const PROGRAM_KEY_FILE: &str = "program_key.txt";

pub struct KeyStore {
    /// Signs every transaction the daemon submits.
    pub publish: Keypair,
    /// Root of the mapping chain.
    pub mapping: Pubkey,
    /// The on-ledger oracle program.
    pub program: Pubkey,
}

impl KeyStore {
    pub fn load(dir: &Path) -> Result<Self> {
        let pair_path = dir.join(PUBLISH_KEY_PAIR_FILE);
        let publish = read_keypair_file(&pair_path)
            .map_err(|e| DaemonError::Config(format!("{}: {e}", pair_path.display())))?;
        Ok(KeyStore {
            publish,
            mapping: read_pubkey(&dir.join(MAPPING_KEY_FILE))?,
            program: read_pubkey(&dir.join(PROGRAM_KEY_FILE))?,
        })
    }
}

fn read_pubkey(path: &Path) -> Result<Pubkey> {
    let text = fs::read_to_string(path)
        .map_err(|e| DaemonError::Config(format!("{}: {e}", path.display())))?;
    Pubkey::from_str(text.trim())
        .map_err(|e| DaemonError::Config(format!("{}: {e}", path.display())))
}
