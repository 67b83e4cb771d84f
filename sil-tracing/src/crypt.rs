// Copyright (C) 2025 The sil-tracing Developers
//
// This file is part of sil-tracing.
//
// sil-tracing is free software: you can redistribute it and/or modify it under the terms of the
// GNU General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// sil-tracing is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with sil-tracing.  If
// not, see <http://www.gnu.org/licenses/>.

//! Streaming log-file encryption.
//!
//! [`EncryptingWriter`] wraps the file protocol's sink in AES-128-CBC: plaintext is gathered
//! into cipher-block-sized chunks and encrypted as each fills; the final, possibly partial
//! block is PKCS7-padded when the stream is [`finish`]ed. Given a fixed key and IV the output
//! is byte-identical across runs -- there is no nonce or randomness past the IV the file
//! protocol writes after the magic.
//!
//! [`finish`]: EncryptingWriter::finish
//!
//! Dropping an `EncryptingWriter` without calling `finish` loses the buffered tail *and* the
//! padding, leaving a file standard decryptors will reject; the file protocol calls `finish`
//! from its disconnect path.

use aes::Aes128;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use cbc::{Decryptor, Encryptor};
use cipher::block_padding::Pkcs7;

use std::io::Write;

/// The cipher's block size, and the IV length.
pub const BLOCK_SIZE: usize = 16;
/// Key length after normalization (the `key` option pads or truncates to this).
pub const KEY_SIZE: usize = 16;

/// A [`Write`] adapter encrypting everything written through it.
pub struct EncryptingWriter<W: Write> {
    inner: W,
    cipher: Encryptor<Aes128>,
    block: [u8; BLOCK_SIZE],
    pos: usize,
}

impl<W: Write> EncryptingWriter<W> {
    /// Wrap `inner`. The caller has already emitted the file magic and the IV; everything
    /// written from here on is ciphertext.
    pub fn new(inner: W, key: &[u8; KEY_SIZE], iv: &[u8; BLOCK_SIZE]) -> EncryptingWriter<W> {
        EncryptingWriter {
            inner,
            cipher: Encryptor::<Aes128>::new(key.into(), iv.into()),
            block: [0u8; BLOCK_SIZE],
            pos: 0,
        }
    }

    /// Pad & flush the final block, returning the underlying sink.
    pub fn finish(mut self) -> std::io::Result<W> {
        let tail = self
            .cipher
            .encrypt_padded_mut::<Pkcs7>(&mut self.block, self.pos)
            .map_err(|err| {
                std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("{:?}", err))
            })?;
        self.inner.write_all(tail)?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for EncryptingWriter<W> {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        for &byte in data {
            self.block[self.pos] = byte;
            self.pos += 1;
            if self.pos == BLOCK_SIZE {
                // encrypt in place; the buffer is overwritten by the next block anyway
                self.cipher.encrypt_block_mut((&mut self.block).into());
                self.inner.write_all(&self.block)?;
                self.pos = 0;
            }
        }
        Ok(data.len())
    }

    /// Flushes the sink only; a partial block stays buffered until [`finish`], since CBC
    /// cannot emit it without padding.
    ///
    /// [`finish`]: EncryptingWriter::finish
    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Decrypt a complete ciphertext (everything after the IV in an encrypted log file).
pub fn decrypt(
    key: &[u8; KEY_SIZE],
    iv: &[u8; BLOCK_SIZE],
    ciphertext: &[u8],
) -> std::io::Result<Vec<u8>> {
    let mut buf = ciphertext.to_vec();
    let plain = Decryptor::<Aes128>::new(key.into(), iv.into())
        .decrypt_padded_mut::<Pkcs7>(&mut buf)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, format!("{:?}", err)))?;
    Ok(plain.to_vec())
}

#[cfg(test)]
mod test {
    use super::*;

    const KEY: [u8; KEY_SIZE] = *b"0123456789abcdef";
    const IV: [u8; BLOCK_SIZE] = *b"fedcba9876543210";

    fn encrypt(plaintext: &[u8]) -> Vec<u8> {
        let mut writer = EncryptingWriter::new(Vec::new(), &KEY, &IV);
        writer.write_all(plaintext).unwrap();
        writer.finish().unwrap()
    }

    #[test]
    fn test_round_trip_various_lengths() {
        for len in [0usize, 1, 15, 16, 17, 31, 32, 1000] {
            let plaintext: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let ciphertext = encrypt(&plaintext);
            // PKCS7 always pads, so ciphertext rounds *up* to the next whole block
            assert_eq!(ciphertext.len(), (len / BLOCK_SIZE + 1) * BLOCK_SIZE);
            assert_eq!(decrypt(&KEY, &IV, &ciphertext).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_determinism() {
        let plaintext = b"attack at dawn, or possibly mid-morning";
        assert_eq!(encrypt(plaintext), encrypt(plaintext));
    }

    #[test]
    fn test_incremental_writes_match_one_shot() {
        let plaintext: Vec<u8> = (0..100).collect();
        let mut writer = EncryptingWriter::new(Vec::new(), &KEY, &IV);
        for chunk in plaintext.chunks(7) {
            writer.write_all(chunk).unwrap();
        }
        assert_eq!(writer.finish().unwrap(), encrypt(&plaintext));
    }

    #[test]
    fn test_wrong_key_fails() {
        let ciphertext = encrypt(b"secret");
        let mut wrong = KEY;
        wrong[0] ^= 1;
        match decrypt(&wrong, &IV, &ciphertext) {
            Err(_) => (),
            Ok(garbage) => assert_ne!(garbage, b"secret"),
        }
    }
}
