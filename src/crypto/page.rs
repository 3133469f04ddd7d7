// Copyright (c) 2025-present, clustertree-core authors
// Licensed under the MIT license or the Apache License, Version 2.0, at
// your option.

use crate::error::{Error, Result};
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// Plaintext page size: the unit of encryption and authentication.
pub const PAGE_SIZE: usize = 4096;

const IV_SIZE: usize = 16;
const MAC_SIZE: usize = 32;

/// On-disk bytes per page: ciphertext plus the IV+HMAC trailer appended
/// outside the plaintext 4 KiB.
pub const PHYSICAL_PAGE_SIZE: usize = PAGE_SIZE + IV_SIZE + MAC_SIZE;

/// Derived subkeys for the encrypted page layer: 32 bytes for AES-256-CBC,
/// 32 bytes for HMAC-SHA-256.
#[derive(Clone)]
pub struct PageKey {
    pub aes_key: [u8; 32],
    pub hmac_key: [u8; 32],
}

impl PageKey {
    /// Splits a 64-byte key (as accepted by [`crate::config::Config`]) into
    /// its AES and HMAC halves.
    #[must_use]
    pub fn from_bytes(key: &[u8; 64]) -> Self {
        let mut aes_key = [0_u8; 32];
        let mut hmac_key = [0_u8; 32];
        aes_key.copy_from_slice(&key[..32]);
        hmac_key.copy_from_slice(&key[32..]);
        Self { aes_key, hmac_key }
    }
}

fn mac_tag(hmac_key: &[u8; 32], iv: &[u8; IV_SIZE], ciphertext: &[u8]) -> [u8; MAC_SIZE] {
    let mut mac = HmacSha256::new_from_slice(hmac_key).expect("HMAC accepts any key length");
    mac.update(iv);
    mac.update(ciphertext);
    let result = mac.finalize().into_bytes();
    let mut out = [0_u8; MAC_SIZE];
    out.copy_from_slice(&result);
    out
}

/// Encrypts one plaintext page, returning the physical (ciphertext + trailer)
/// bytes written to disk.
pub fn encrypt_page(key: &PageKey, plaintext: &[u8; PAGE_SIZE], iv: [u8; IV_SIZE]) -> [u8; PHYSICAL_PAGE_SIZE] {
    let mut buf = *plaintext;
    let encryptor = Aes256CbcEnc::new(&key.aes_key.into(), &iv.into());
    // PAGE_SIZE is a multiple of the AES block size, so no padding is needed.
    encryptor
        .encrypt_padded_mut::<aes::cipher::block_padding::NoPadding>(&mut buf, PAGE_SIZE)
        .expect("page size is block-aligned");

    let tag = mac_tag(&key.hmac_key, &iv, &buf);

    let mut out = [0_u8; PHYSICAL_PAGE_SIZE];
    out[..PAGE_SIZE].copy_from_slice(&buf);
    out[PAGE_SIZE..PAGE_SIZE + IV_SIZE].copy_from_slice(&iv);
    out[PAGE_SIZE + IV_SIZE..].copy_from_slice(&tag);
    out
}

/// Decrypts and authenticates one physical page, failing with
/// [`Error::DecryptionFailed`] on HMAC mismatch.
pub fn decrypt_page(key: &PageKey, physical: &[u8; PHYSICAL_PAGE_SIZE]) -> Result<[u8; PAGE_SIZE]> {
    let mut ciphertext = [0_u8; PAGE_SIZE];
    ciphertext.copy_from_slice(&physical[..PAGE_SIZE]);

    let mut iv = [0_u8; IV_SIZE];
    iv.copy_from_slice(&physical[PAGE_SIZE..PAGE_SIZE + IV_SIZE]);

    let mut tag = [0_u8; MAC_SIZE];
    tag.copy_from_slice(&physical[PAGE_SIZE + IV_SIZE..]);

    let expected = mac_tag(&key.hmac_key, &iv, &ciphertext);
    if expected != tag {
        return Err(Error::DecryptionFailed);
    }

    let decryptor = Aes256CbcDec::new(&key.aes_key.into(), &iv.into());
    let mut buf = ciphertext;
    decryptor
        .decrypt_padded_mut::<aes::cipher::block_padding::NoPadding>(&mut buf)
        .map_err(|_| Error::DecryptionFailed)?;

    Ok(buf)
}

/// Draws a fresh random IV for a page about to be (re-)encrypted.
#[must_use]
pub fn fresh_iv() -> [u8; IV_SIZE] {
    use rand::RngCore;
    let mut iv = [0_u8; IV_SIZE];
    rand::rng().fill_bytes(&mut iv);
    iv
}
