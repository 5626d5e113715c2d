//! Job identifier generation.
//!
//! Ids are 20 bytes (160 bits) from the thread-local CSPRNG rendered as
//! lowercase RFC 4648 base32. 20 bytes is a multiple of 5, so the text is
//! exactly 32 characters with no padding.

use rand::RngCore;

use crate::types::JobId;

/// Number of random bytes in a job id.
pub const JOB_ID_BYTES: usize = 20;

/// Length of the textual job id.
pub const JOB_ID_LEN: usize = 32;

const BASE32_ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

/// Generate a fresh random job id.
pub fn generate_job_id() -> JobId {
    let mut bytes = [0u8; JOB_ID_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    base32_lower(&bytes)
}

/// Returns `true` if `s` has the shape of an id produced by [`generate_job_id`].
pub fn is_well_formed(s: &str) -> bool {
    s.len() == JOB_ID_LEN && s.bytes().all(|b| BASE32_ALPHABET.contains(&b))
}

fn base32_lower(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len().div_ceil(5) * 8);
    for chunk in bytes.chunks(5) {
        let mut block = [0u8; 5];
        block[..chunk.len()].copy_from_slice(chunk);
        let bits = block.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
        let symbols = (chunk.len() * 8).div_ceil(5);
        for i in 0..symbols {
            let index = (bits >> (35 - i * 5)) & 0x1f;
            out.push(BASE32_ALPHABET[index as usize] as char);
        }
    }
    out
}
