//! The CryptoCycle mixing state: a 2048-byte buffer run through one
//! ChaCha20+Poly1305 round per cycle, with the round parameters packed into
//! a control word inside the state itself.

use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use chacha20::ChaCha20;
use curve25519_dalek::montgomery::MontgomeryPoint;
use poly1305::universal_hash::KeyInit;
use poly1305::Poly1305;

use crate::crypto::hash::{hash_compress32, hash_expand};
use crate::error::RandHashError;
use crate::params::ConsensusParams;
use crate::randhash::{interpret, Program};

/// Total state size in bytes.
pub const STATE_LEN: usize = 2048;

/// State size in 32-bit words.
pub const STATE_WORDS: usize = STATE_LEN / 4;

/// Message area capacity in 16-byte units (`(2048 - 48) / 16`).
const MAX_LEN_UNITS: u32 = 125;

/// The 2048-byte CryptoCycle state.
///
/// Layout: `[0..12)` ChaCha20 nonce, `[12..16)` packed control word,
/// `[16..48)` ChaCha20 key (the Poly1305 tag lands on `[16..32)`),
/// `[48..2048)` AAD region followed by the in-place message.
#[derive(Clone)]
pub struct State {
    bytes: [u8; STATE_LEN],
}

impl Default for State {
    fn default() -> Self {
        State { bytes: [0; STATE_LEN] }
    }
}

impl State {
    /// Seed every byte from `hash_expand`, set the nonce, and sanitize the
    /// control word for a first round.
    pub fn init(seed: &[u8; 32], nonce: u64) -> Self {
        let mut state = State::default();
        hash_expand(&mut state.bytes, seed, 0);
        state.bytes[..8].copy_from_slice(&nonce.to_le_bytes());
        state.bytes[8..12].fill(0);
        state.make_fuzzable();
        state
    }

    pub fn bytes(&self) -> &[u8; STATE_LEN] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8; STATE_LEN] {
        &mut self.bytes
    }

    /// Little-endian 32-bit word `i` of the state.
    pub(crate) fn word(&self, i: usize) -> u32 {
        let off = (i % STATE_WORDS) * 4;
        u32::from_le_bytes(self.bytes[off..off + 4].try_into().expect("4-byte slice"))
    }

    /// Wrapping-add `v` into word `i`.
    pub(crate) fn add_word(&mut self, i: usize, v: u32) {
        let off = (i % STATE_WORDS) * 4;
        let cur = u32::from_le_bytes(self.bytes[off..off + 4].try_into().expect("4-byte slice"));
        self.bytes[off..off + 4].copy_from_slice(&cur.wrapping_add(v).to_le_bytes());
    }

    fn ctrl(&self) -> u32 {
        u32::from_le_bytes(self.bytes[12..16].try_into().expect("4-byte slice"))
    }

    fn set_ctrl(&mut self, v: u32) {
        self.bytes[12..16].copy_from_slice(&v.to_le_bytes());
    }

    pub fn additional_zeros(&self) -> u32 {
        self.ctrl() & 0xf
    }

    pub fn set_additional_zeros(&mut self, v: u32) {
        self.set_ctrl((self.ctrl() & !0xf) | (v & 0xf));
    }

    pub fn trailing_zeros(&self) -> u32 {
        (self.ctrl() >> 8) & 0xf
    }

    pub fn set_trailing_zeros(&mut self, v: u32) {
        self.set_ctrl((self.ctrl() & !(0xf << 8)) | ((v & 0xf) << 8));
    }

    pub fn decrypt(&self) -> bool {
        self.ctrl() & (1 << 12) != 0
    }

    pub fn set_decrypt(&mut self, on: bool) {
        self.set_ctrl((self.ctrl() & !(1 << 12)) | (u32::from(on) << 12));
    }

    pub fn add_len(&self) -> u32 {
        (self.ctrl() >> 13) & 0x7
    }

    pub fn set_add_len(&mut self, v: u32) {
        self.set_ctrl((self.ctrl() & !(0x7 << 13)) | ((v & 0x7) << 13));
    }

    pub fn truncated(&self) -> bool {
        self.ctrl() & (1 << 16) != 0
    }

    fn set_truncated(&mut self, on: bool) {
        self.set_ctrl((self.ctrl() & !(1 << 16)) | (u32::from(on) << 16));
    }

    pub fn length(&self) -> u32 {
        (self.ctrl() >> 17) & 0x7f
    }

    pub fn set_length(&mut self, v: u32) {
        self.set_ctrl((self.ctrl() & !(0x7f << 17)) | ((v & 0x7f) << 17));
    }

    pub fn failed(&self) -> bool {
        self.ctrl() & (1 << 24) != 0
    }

    fn set_failed(&mut self, on: bool) {
        self.set_ctrl((self.ctrl() & !(1 << 24)) | (u32::from(on) << 24));
    }

    pub fn version(&self) -> u32 {
        self.ctrl() >> 25
    }

    /// Force the control word into a state the round cannot reject: version
    /// and failure cleared, parameters re-drawn from the nascent Poly1305
    /// key material, and the high length bit set so the round always mixes a
    /// non-degenerate message.
    pub fn make_fuzzable(&mut self) {
        let mut ctrl =
            u32::from_le_bytes(self.bytes[16..20].try_into().expect("4-byte slice"));
        ctrl &= !(0x7f << 25);
        ctrl &= !(1 << 24);
        ctrl |= 1 << 23;
        self.set_ctrl(ctrl);
    }

    /// One ChaCha20+Poly1305 mixing round over the state.
    pub fn crypto_cycle(&mut self) {
        if self.version() != 0 || self.failed() {
            self.set_failed(true);
            return;
        }

        let nonce: [u8; 12] = self.bytes[..12].try_into().expect("12-byte nonce");
        let key: [u8; 32] = self.bytes[16..48].try_into().expect("32-byte key");
        let mut cipher = ChaCha20::new(&key.into(), &nonce.into());

        let mut poly_key = [0u8; 32];
        cipher.apply_keystream(&mut poly_key);
        // Skip the rest of block 0; the message stream starts at counter 1.
        cipher.seek(64u64);

        let mut len = self.length();
        let max = MAX_LEN_UNITS - self.add_len();
        if len > max {
            len = max;
            self.set_truncated(true);
        }
        let aad_len = (self.add_len() * 16) as usize;
        let msg_len = (len * 16) as usize;
        let tzc = self.trailing_zeros() as usize;
        let azc = self.additional_zeros() as usize;
        let msg_start = 48 + aad_len;

        // AAD, then message (ciphertext form), then the two length words.
        let total = aad_len + msg_len + 16;
        let mut auth = [0u8; (MAX_LEN_UNITS as usize) * 16 + 16];
        auth[..aad_len].copy_from_slice(&self.bytes[48..48 + aad_len]);

        if self.decrypt() {
            // MAC the ciphertext as received, trailing bytes included, so a
            // malleated tail cannot escape authentication.
            auth[aad_len..aad_len + msg_len]
                .copy_from_slice(&self.bytes[msg_start..msg_start + msg_len]);
            cipher.apply_keystream(&mut self.bytes[msg_start..msg_start + msg_len]);
        } else {
            cipher.apply_keystream(&mut self.bytes[msg_start..msg_start + msg_len]);
            if tzc > 0 && tzc <= msg_len {
                self.bytes[msg_start + msg_len - tzc..msg_start + msg_len].fill(0);
            }
            auth[aad_len..aad_len + msg_len]
                .copy_from_slice(&self.bytes[msg_start..msg_start + msg_len]);
        }

        let tail = aad_len + msg_len;
        auth[tail..tail + 8]
            .copy_from_slice(&(aad_len as u64).wrapping_sub(azc as u64).to_le_bytes());
        auth[tail + 8..tail + 16]
            .copy_from_slice(&(msg_len as u64).wrapping_sub(tzc as u64).to_le_bytes());

        let mac = Poly1305::new(poly1305::Key::from_slice(&poly_key));
        let tag = mac.compute_unpadded(&auth[..total]);
        self.bytes[16..32].copy_from_slice(&tag);
    }

    /// Mix a 1024-byte item (and optionally a 32-byte content block) into the
    /// state: optional RandHash pass, then a sanitized CryptoCycle round.
    pub fn update(
        &mut self,
        item: &[u8; 1024],
        content_block: Option<&[u8; 32]>,
        randhash_cycles: u32,
        params: &ConsensusParams,
    ) -> Result<(), RandHashError> {
        if randhash_cycles > 0 {
            let seed: [u8; 32] = item[992..].try_into().expect("32-byte seed");
            let program = Program::generate(&seed, params)?;
            interpret(&program, self, program.memory(), randhash_cycles, params)?;
        }
        self.bytes[32..1056].copy_from_slice(item);
        if let Some(block) = content_block {
            self.bytes[1056..1088].copy_from_slice(block);
        }
        self.make_fuzzable();
        self.crypto_cycle();
        // Unreachable after make_fuzzable; a hit here is an implementation bug,
        // not bad input.
        assert!(!self.failed(), "CryptoCycle failed on a sanitized state");
        Ok(())
    }

    /// Curve25519 mixing step: `a = state[32..64]`, `b = a*G`, `c = a*b`,
    /// written back to `state[64..96]`.
    pub fn smul(&mut self) {
        let a: [u8; 32] = self.bytes[32..64].try_into().expect("32-byte scalar");
        let b = MontgomeryPoint::mul_base_clamped(a);
        let c = b.mul_clamped(a);
        self.bytes[64..96].copy_from_slice(c.as_bytes());
    }

    /// Compress the whole state into its leading 32 bytes and return them.
    pub fn finalize(&mut self) -> [u8; 32] {
        let hash = hash_compress32(&self.bytes);
        self.bytes[..32].copy_from_slice(&hash);
        hash
    }

    /// Item index for the next table lookup.
    pub fn item_no(&self) -> u64 {
        u64::from_le_bytes(self.bytes[16..24].try_into().expect("8-byte slice"))
    }
}
