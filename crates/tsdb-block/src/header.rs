//! Fixed 40-byte block header (spec §4.2).

use tsdb_core::error::Error;

pub const MAGIC: u64 = 0x4253445354534254;
pub const VERSION: u32 = 1;
pub const HEADER_LEN: usize = 40;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BlockFlags: u32 {
        const COMPRESSED = 0b001;
        const SORTED     = 0b010;
        const CHECKSUM   = 0b100;
    }
}

/// Layout (little-endian): magic(8) version(4) flags(4) crc32(4)
/// start_time(8) end_time(8) reserved(4) = 40 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub magic: u64,
    pub version: u32,
    pub flags: BlockFlags,
    pub crc32: u32,
    pub start_time: i64,
    pub end_time: i64,
    pub reserved: u32,
}

impl BlockHeader {
    pub fn new(start_time: i64, end_time: i64) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            flags: BlockFlags::empty(),
            crc32: 0,
            start_time,
            end_time,
            reserved: 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == MAGIC && self.version == VERSION
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..8].copy_from_slice(&self.magic.to_le_bytes());
        out[8..12].copy_from_slice(&self.version.to_le_bytes());
        out[12..16].copy_from_slice(&self.flags.bits().to_le_bytes());
        out[16..20].copy_from_slice(&self.crc32.to_le_bytes());
        out[20..28].copy_from_slice(&self.start_time.to_le_bytes());
        out[28..36].copy_from_slice(&self.end_time.to_le_bytes());
        out[36..40].copy_from_slice(&self.reserved.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::Corrupt("block header truncated".into()));
        }
        let magic = u64::from_le_bytes(bytes[0..8].try_into().expect("8 bytes"));
        let version = u32::from_le_bytes(bytes[8..12].try_into().expect("4 bytes"));
        let flags_bits = u32::from_le_bytes(bytes[12..16].try_into().expect("4 bytes"));
        let crc32 = u32::from_le_bytes(bytes[16..20].try_into().expect("4 bytes"));
        let start_time = i64::from_le_bytes(bytes[20..28].try_into().expect("8 bytes"));
        let end_time = i64::from_le_bytes(bytes[28..36].try_into().expect("8 bytes"));
        let reserved = u32::from_le_bytes(bytes[36..40].try_into().expect("4 bytes"));
        let header = Self {
            magic,
            version,
            flags: BlockFlags::from_bits_truncate(flags_bits),
            crc32,
            start_time,
            end_time,
            reserved,
        };
        if !header.is_valid() {
            return Err(Error::Corrupt(format!(
                "bad block header: magic={magic:#x} version={version}"
            )));
        }
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let mut header = BlockHeader::new(1000, 2000);
        header.flags = BlockFlags::COMPRESSED | BlockFlags::CHECKSUM;
        header.crc32 = 0xdead_beef;
        let encoded = header.encode();
        let decoded = BlockHeader::decode(&encoded).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut encoded = BlockHeader::new(0, 1).encode();
        encoded[0] = 0;
        assert!(BlockHeader::decode(&encoded).is_err());
    }

    #[test]
    fn rejects_bad_version() {
        let mut encoded = BlockHeader::new(0, 1).encode();
        encoded[8..12].copy_from_slice(&99u32.to_le_bytes());
        assert!(BlockHeader::decode(&encoded).is_err());
    }

    #[test]
    fn rejects_truncated() {
        let encoded = BlockHeader::new(0, 1).encode();
        assert!(BlockHeader::decode(&encoded[..HEADER_LEN - 1]).is_err());
    }
}
