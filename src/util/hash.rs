//! Stable name hashing used to spread sampling collectors over their period.

/// IEEE CRC-32 of a plugin name.
#[must_use]
pub fn name_seed(name: &str) -> u32 {
    zlib_rs::crc32::crc32(0, name.as_bytes())
}
