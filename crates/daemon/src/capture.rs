//! Account-update capture and replay.
//!
//! The capture file is an append-only gzip stream written inline by the
//! event loop. Record layout: timestamp (i64 LE), account key (32 bytes),
//! data length (u32 LE), raw account data. Replay is strictly sequential,
//! exposing one record at a time.

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use solana_sdk::pubkey::Pubkey;

use crate::error::Result;

pub struct Capture {
    enc: GzEncoder<BufWriter<File>>,
}

impl Capture {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Capture {
            enc: GzEncoder::new(BufWriter::new(file), Compression::default()),
        })
    }

    pub fn write(&mut self, ts: i64, key: &Pubkey, data: &[u8]) -> Result<()> {
        self.enc.write_all(&ts.to_le_bytes())?;
        self.enc.write_all(key.as_ref())?;
        self.enc.write_all(&(data.len() as u32).to_le_bytes())?;
        self.enc.write_all(data)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.enc.flush()?;
        Ok(())
    }

    pub fn finish(self) -> Result<()> {
        self.enc.finish()?;
        Ok(())
    }
}

pub struct Replay {
    rdr: GzDecoder<BufReader<File>>,
    ts: i64,
    key: Pubkey,
    data: Vec<u8>,
}

impl Replay {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Replay {
            rdr: GzDecoder::new(BufReader::new(file)),
            ts: 0,
            key: Pubkey::default(),
            data: Vec::new(),
        })
    }

    /// Advance to the next record. False at a clean end of stream; a
    /// truncated record is an error.
    pub fn next_record(&mut self) -> Result<bool> {
        let mut ts_buf = [0u8; 8];
        match self.rdr.read_exact(&mut ts_buf) {
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(false),
            other => other?,
        }
        self.ts = i64::from_le_bytes(ts_buf);

        let mut key_buf = [0u8; 32];
        self.rdr.read_exact(&mut key_buf)?;
        self.key = Pubkey::new_from_array(key_buf);

        let mut len_buf = [0u8; 4];
        self.rdr.read_exact(&mut len_buf)?;
        let len = u32::from_le_bytes(len_buf) as usize;
        self.data.resize(len, 0);
        self.rdr.read_exact(&mut self.data)?;
        Ok(true)
    }

    pub fn time(&self) -> i64 {
        self.ts
    }

    pub fn account(&self) -> &Pubkey {
        &self.key
    }

    pub fn update(&self) -> &[u8] {
        &self.data
    }
}
