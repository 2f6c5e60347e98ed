//! ChaCha20-Poly1305 for pairing sub-TLVs and the encrypted HAP session.
//!
//! A session frame is `len(u16 LE) | ciphertext | tag(16)` where `len` is
//! also the AAD. Each direction keeps its own 64-bit counter, written
//! little-endian into bytes 4..12 of the nonce.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use hap_core::error::CryptoError;

/// Largest plaintext carried by one frame.
pub const MAX_FRAME_PLAINTEXT: usize = 1024;

const LEN_PREFIX: usize = 2;
const TAG_LEN: usize = 16;

/// One direction of a session: key plus frame counter.
struct Direction {
    cipher: ChaCha20Poly1305,
    counter: u64,
}

impl Direction {
    fn new(key: [u8; 32]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(&key.into()),
            counter: 0,
        }
    }

    /// Nonce for the next frame; advances the counter.
    fn next_nonce(&mut self) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce[4..].copy_from_slice(&self.counter.to_le_bytes());
        self.counter += 1;
        nonce
    }
}

/// Writing half of a session.
pub struct FrameSealer(Direction);

/// Reading half of a session.
pub struct FrameOpener(Direction);

impl FrameSealer {
    pub fn new(key: [u8; 32]) -> Self {
        Self(Direction::new(key))
    }

    /// Encrypt `plaintext` as one frame per 1024-byte block.
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if plaintext.is_empty() {
            return Err(CryptoError::Encryption("nothing to seal".to_string()));
        }

        let frames = plaintext.len().div_ceil(MAX_FRAME_PLAINTEXT);
        let mut wire = Vec::with_capacity(plaintext.len() + frames * (LEN_PREFIX + TAG_LEN));

        for block in plaintext.chunks(MAX_FRAME_PLAINTEXT) {
            let aad = (block.len() as u16).to_le_bytes();
            let nonce = self.0.next_nonce();
            let sealed = self
                .0
                .cipher
                .encrypt(Nonce::from_slice(&nonce), Payload { msg: block, aad: &aad })
                .map_err(|e| CryptoError::Encryption(e.to_string()))?;

            wire.extend_from_slice(&aad);
            wire.extend_from_slice(&sealed);
        }
        Ok(wire)
    }

    /// Frames sealed so far.
    pub fn counter(&self) -> u64 {
        self.0.counter
    }
}

impl FrameOpener {
    pub fn new(key: [u8; 32]) -> Self {
        Self(Direction::new(key))
    }

    /// Decrypt the frame at the start of `buf`.
    ///
    /// `Ok(None)` means `buf` does not hold a whole frame yet; nothing is
    /// consumed and the counter is untouched. Otherwise returns the plaintext
    /// and how many bytes of `buf` the frame took.
    pub fn open_frame(&mut self, buf: &[u8]) -> Result<Option<(Vec<u8>, usize)>, CryptoError> {
        let [lo, hi, body @ ..] = buf else {
            return Ok(None);
        };
        let len = u16::from_le_bytes([*lo, *hi]);
        if usize::from(len) > MAX_FRAME_PLAINTEXT {
            return Err(CryptoError::Decryption(format!(
                "frame announces {len} bytes, limit is {MAX_FRAME_PLAINTEXT}"
            )));
        }

        let sealed_len = usize::from(len) + TAG_LEN;
        let Some(sealed) = body.get(..sealed_len) else {
            return Ok(None);
        };

        let nonce = self.0.next_nonce();
        let plaintext = self
            .0
            .cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: sealed,
                    aad: &len.to_le_bytes(),
                },
            )
            .map_err(|_| CryptoError::AuthTagMismatch)?;

        Ok(Some((plaintext, LEN_PREFIX + sealed_len)))
    }

    /// Decrypt a buffer made only of whole frames.
    pub fn open(&mut self, mut data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut plaintext = Vec::with_capacity(data.len());
        while !data.is_empty() {
            let (block, used) = self
                .open_frame(data)?
                .ok_or_else(|| CryptoError::Decryption("trailing partial frame".to_string()))?;
            plaintext.extend_from_slice(&block);
            data = &data[used..];
        }
        Ok(plaintext)
    }

    /// Frames opened so far.
    pub fn counter(&self) -> u64 {
        self.0.counter
    }
}

/// Both halves of a session, before a connection splits them.
pub struct ControlCipher {
    sealer: FrameSealer,
    opener: FrameOpener,
}

impl ControlCipher {
    pub fn new(write_key: [u8; 32], read_key: [u8; 32]) -> Self {
        Self {
            sealer: FrameSealer::new(write_key),
            opener: FrameOpener::new(read_key),
        }
    }

    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.sealer.seal(plaintext)
    }

    pub fn decrypt(&mut self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.opener.open(data)
    }

    pub fn split(self) -> (FrameSealer, FrameOpener) {
        (self.sealer, self.opener)
    }
}

/// Seal a pairing sub-TLV under one of the fixed `PS-Msg0x`/`PV-Msg0x` nonces.
pub fn encrypt_with_nonce(
    key: &[u8; 32],
    nonce: &[u8; 12],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    ChaCha20Poly1305::new(key.into())
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))
}

/// Open a pairing sub-TLV; the tag trails the ciphertext.
pub fn decrypt_with_nonce(
    key: &[u8; 32],
    nonce: &[u8; 12],
    sealed: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < TAG_LEN {
        return Err(CryptoError::Decryption(format!(
            "{} bytes cannot hold a tag",
            sealed.len()
        )));
    }
    ChaCha20Poly1305::new(key.into())
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|_| CryptoError::AuthTagMismatch)
}

/// Right-align an ASCII label in a 12-byte nonce, e.g. `PV-Msg02`.
pub fn nonce_from_string(label: &[u8]) -> [u8; 12] {
    let label = &label[label.len().saturating_sub(12)..];
    let mut nonce = [0u8; 12];
    nonce[12 - label.len()..].copy_from_slice(label);
    nonce
}
