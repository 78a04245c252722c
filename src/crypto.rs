// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Sealing of fragments that leave a partition.
//!
//! A sealed block is laid out as
//! `[plain_len: u64][enc_len: u64][tag: 16][iv: 12][ciphertext: plain_len]`, both lengths little
//! endian, with `enc_len = 16 + 12 + plain_len`.

use crate::{Result, TableError};
use log::error;
use ring::{
    aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_128_GCM, NONCE_LEN},
    rand::{SecureRandom, SystemRandom},
};

/// Fixed demonstration key. Deployments must provision per-session keys instead.
pub const DEMO_KEY: [u8; 16] = [
    0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f,
];

pub const TAG_LEN: usize = 16;
pub const IV_LEN: usize = NONCE_LEN;
/// The two length words in front of the tag.
pub const HEADER_LEN: usize = 16;

/// AES-128-GCM with a random IV per block.
pub struct SlotCipher {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl std::fmt::Debug for SlotCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotCipher").finish_non_exhaustive()
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(word)
}

impl SlotCipher {
    pub fn new(key: &[u8; 16]) -> Result<Self> {
        let key = UnboundKey::new(&AES_128_GCM, key)
            .map_err(|_| TableError::Crypto("rejected AES-128 key"))?;
        Ok(Self {
            key: LessSafeKey::new(key),
            rng: SystemRandom::new(),
        })
    }

    /// A cipher keyed with [`DEMO_KEY`].
    pub fn demo() -> Result<Self> {
        Self::new(&DEMO_KEY)
    }

    /// Encrypts `plain` into a self-describing block.
    pub fn seal(&self, plain: &[u8]) -> Result<Vec<u8>> {
        let mut iv = [0u8; IV_LEN];
        self.rng
            .fill(&mut iv)
            .map_err(|_| TableError::Crypto("failed to draw an IV"))?;

        let mut ciphertext = plain.to_vec();
        let tag = self
            .key
            .seal_in_place_separate_tag(
                Nonce::assume_unique_for_key(iv),
                Aad::empty(),
                &mut ciphertext,
            )
            .map_err(|_| TableError::Crypto("encryption failed"))?;

        let plain_len = plain.len() as u64;
        let enc_len = (TAG_LEN + IV_LEN) as u64 + plain_len;
        let mut block = Vec::with_capacity(HEADER_LEN + TAG_LEN + IV_LEN + plain.len());
        block.extend_from_slice(&plain_len.to_le_bytes());
        block.extend_from_slice(&enc_len.to_le_bytes());
        block.extend_from_slice(tag.as_ref());
        block.extend_from_slice(&iv);
        block.extend_from_slice(&ciphertext);
        Ok(block)
    }

    /// Decrypts a block produced by [`SlotCipher::seal`]. Any malformed or tampered block is an
    /// error.
    pub fn open(&self, block: &[u8]) -> Result<Vec<u8>> {
        let overhead = HEADER_LEN + TAG_LEN + IV_LEN;
        if block.len() < overhead {
            error!("sealed block of {} bytes is truncated", block.len());
            return Err(TableError::Crypto("truncated block"));
        }
        let plain_len = usize::try_from(read_u64(&block[0..8]))?;
        let enc_len = usize::try_from(read_u64(&block[8..16]))?;
        if enc_len != TAG_LEN + IV_LEN + plain_len || block.len() != HEADER_LEN + enc_len {
            error!(
                "sealed block header disagrees with its size ({} bytes)",
                block.len()
            );
            return Err(TableError::Crypto("inconsistent block lengths"));
        }

        let tag = &block[HEADER_LEN..HEADER_LEN + TAG_LEN];
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&block[HEADER_LEN + TAG_LEN..overhead]);

        let mut in_out = Vec::with_capacity(plain_len + TAG_LEN);
        in_out.extend_from_slice(&block[overhead..]);
        in_out.extend_from_slice(tag);
        let plain = self
            .key
            .open_in_place(Nonce::assume_unique_for_key(iv), Aad::empty(), &mut in_out)
            .map_err(|_| {
                error!("sealed block failed authentication");
                TableError::Crypto("authentication failed")
            })?;
        Ok(plain.to_vec())
    }
}
