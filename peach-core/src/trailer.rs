//! Block trailer wire format and the difficulty comparator.
//!
//! `BTrailer` mirrors the 160-byte little-endian record a pool hands out in
//! `mining.notify` and a miner hands back in `mining.submit`. Layout:
//!
//! ```text
//! offset  len  field
//!      0   32  previous block hash (phash)
//!     32   32  merkle root (mroot)
//!     64    8  block number (bnum), raw byte array, not an arithmetic count
//!     72    8  difficulty, only byte 0 is meaningful
//!     80    4  time0
//!     84    4  transaction count (tcount)
//!     88    4  reserved
//!     92   32  nonce: [0..16) seed half, [16..32) found half
//!    124   36  trailing fields passed through unexamined
//! ```

use packed_struct::prelude::*;

use crate::error::Error;

pub const BTRAILER_LEN: usize = 160;
pub const NONCE_LEN: usize = 32;
pub const SEED_HALF_LEN: usize = 16;

/// 160-byte block trailer, packable to and from its wire representation.
#[derive(PackedStruct, Debug, Clone, Copy, PartialEq, Eq)]
#[packed_struct(endian = "lsb")]
pub struct BTrailer {
    pub phash: [u8; 32],
    pub mroot: [u8; 32],
    pub bnum: [u8; 8],
    pub difficulty: [u8; 8],
    pub time0: [u8; 4],
    pub tcount: [u8; 4],
    pub reserved: [u8; 4],
    pub nonce: [u8; NONCE_LEN],
    pub tail: [u8; 36],
}

impl Default for BTrailer {
    fn default() -> Self {
        BTrailer {
            phash: [0; 32],
            mroot: [0; 32],
            bnum: [0; 8],
            difficulty: [0; 8],
            time0: [0; 4],
            tcount: [0; 4],
            reserved: [0; 4],
            nonce: [0; NONCE_LEN],
            tail: [0; 36],
        }
    }
}

impl BTrailer {
    /// Get binary representation of the block trailer.
    #[inline]
    pub fn into_bytes(self) -> [u8; BTRAILER_LEN] {
        self.pack().expect("fixed-size pack cannot fail")
    }

    pub fn from_bytes(bytes: &[u8; BTRAILER_LEN]) -> Result<Self, Error> {
        Self::unpack(bytes).map_err(|e| Error::Protocol(format!("malformed trailer: {}", e)))
    }

    pub fn time0_u32(&self) -> u32 {
        u32::from_le_bytes(self.time0)
    }

    pub fn set_time0(&mut self, t: u32) {
        self.time0 = t.to_le_bytes();
    }

    pub fn tcount_u32(&self) -> u32 {
        u32::from_le_bytes(self.tcount)
    }

    pub fn bnum_u64(&self) -> u64 {
        u64::from_le_bytes(self.bnum)
    }

    /// Difficulty byte as kept by the pool; only byte 0 of the wire field is
    /// meaningful, the rest is reserved and passed through unexamined.
    pub fn difficulty(&self) -> Difficulty {
        Difficulty(self.difficulty[0])
    }

    pub fn set_difficulty(&mut self, d: Difficulty) {
        self.difficulty[0] = d.0;
    }

    pub fn seed_half(&self) -> &[u8] {
        &self.nonce[..SEED_HALF_LEN]
    }

    pub fn set_seed_half(&mut self, bytes: [u8; SEED_HALF_LEN]) {
        self.nonce[..SEED_HALF_LEN].copy_from_slice(&bytes);
    }

    pub fn found_half(&self) -> &[u8] {
        &self.nonce[SEED_HALF_LEN..]
    }

    pub fn set_found_half(&mut self, bytes: &[u8]) {
        self.nonce[SEED_HALF_LEN..].copy_from_slice(bytes);
    }
}

/// Pool-visible difficulty, comparable like any ordinary integer newtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Difficulty(pub u8);

impl Difficulty {
    pub fn as_u8(self) -> u8 {
        self.0
    }
}

impl From<u8> for Difficulty {
    fn from(v: u8) -> Self {
        Difficulty(v)
    }
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(fmt, "{}", self.0)
    }
}

/// Decode exactly `dst.len()` bytes of lowercase-or-uppercase hex from `src`
/// with no intermediate allocation, rejecting anything that isn't a clean
/// nibble pair run of the expected length.
pub fn decode_hex_into(src: &str, dst: &mut [u8]) -> Result<(), Error> {
    let src = src.as_bytes();
    if src.len() != dst.len() * 2 {
        return Err(Error::Protocol(format!(
            "expected {} hex chars, got {}",
            dst.len() * 2,
            src.len()
        )));
    }
    for (i, out) in dst.iter_mut().enumerate() {
        let hi = nibble(src[i * 2])?;
        let lo = nibble(src[i * 2 + 1])?;
        *out = (hi << 4) | lo;
    }
    Ok(())
}

/// Decode up to `dst.len()` bytes of hex from `src`, like a pool's loose
/// wire fields: a field shorter than expected leaves the remainder of
/// `dst` untouched (the caller is expected to have zeroed it), and a field
/// longer than expected is truncated. Any non-hex nibble within the
/// consumed prefix is still rejected.
pub fn decode_hex_truncated(src: &str, dst: &mut [u8]) -> Result<usize, Error> {
    let src = src.as_bytes();
    let pairs = (src.len() / 2).min(dst.len());
    for (i, out) in dst.iter_mut().take(pairs).enumerate() {
        let hi = nibble(src[i * 2])?;
        let lo = nibble(src[i * 2 + 1])?;
        *out = (hi << 4) | lo;
    }
    Ok(pairs)
}

fn nibble(c: u8) -> Result<u8, Error> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(Error::Protocol(format!("non-hex nibble: {:#x}", c))),
    }
}

pub fn encode_hex(src: &[u8]) -> String {
    hex::encode(src)
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample() -> BTrailer {
        let mut t = BTrailer::default();
        t.phash[0] = 0xAA;
        t.mroot[0] = 0xBB;
        t.bnum = [1, 0, 0, 0, 0, 0, 0, 0];
        t.difficulty[0] = 28;
        t.set_time0(0x6000_0000);
        t.tcount = [2, 0, 0, 0];
        t.set_seed_half([0xAB; SEED_HALF_LEN]);
        t
    }

    #[test]
    fn round_trips_through_bytes() {
        let t = sample();
        let bytes = t.into_bytes();
        assert_eq!(bytes.len(), BTRAILER_LEN);
        let back = BTrailer::from_bytes(&bytes).unwrap();
        assert_eq!(t, back);
    }

    #[test]
    fn time0_is_little_endian() {
        let t = sample();
        let bytes = t.into_bytes();
        assert_eq!(&bytes[80..84], &0x6000_0000u32.to_le_bytes());
    }

    #[test]
    fn difficulty_byte_is_byte_zero_of_field() {
        let t = sample();
        assert_eq!(t.difficulty(), Difficulty(28));
        assert_eq!(t.into_bytes()[72], 28);
    }

    #[test]
    fn difficulty_ord_matches_wrapped_u8() {
        assert!(Difficulty(28) < Difficulty(30));
        assert!(Difficulty(5) < Difficulty(28));
    }

    #[test]
    fn seed_and_found_halves_are_disjoint() {
        let mut t = sample();
        t.set_found_half(&[0xCD; SEED_HALF_LEN]);
        assert_eq!(t.seed_half(), &[0xAB; SEED_HALF_LEN][..]);
        assert_eq!(t.found_half(), &[0xCD; SEED_HALF_LEN][..]);
    }

    #[test]
    fn decode_hex_into_rejects_wrong_length() {
        let mut out = [0u8; 4];
        assert!(decode_hex_into("aabb", &mut out).is_err());
        assert!(decode_hex_into("aabbccdd", &mut out).is_ok());
    }

    #[test]
    fn decode_hex_into_rejects_non_hex() {
        let mut out = [0u8; 1];
        assert!(decode_hex_into("zz", &mut out).is_err());
    }

    #[test]
    fn encode_hex_round_trips() {
        let mut out = [0u8; 3];
        decode_hex_into(&encode_hex(&[0xDE, 0xAD, 0xBE]), &mut out).unwrap();
        assert_eq!(out, [0xDE, 0xAD, 0xBE]);
    }
}
