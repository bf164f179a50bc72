//! Record and subrecord types produced by the ESM parser.

use byteorder::{ByteOrder, LittleEndian};
use sha2::{Digest, Sha256};

use crate::esm::constants::FLAG_COMPRESSED;

/// A single subrecord within an ESM record: 4-byte tag, u16 length, payload.
#[derive(Debug, Clone)]
pub struct Subrecord {
    /// 4-char type code (EDID, FULL, DATA, ...)
    pub tag: String,
    /// Raw subrecord payload
    pub data: Vec<u8>,
}

impl Subrecord {
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Decode as a NUL-terminated string.
    pub fn as_string(&self) -> String {
        let trimmed = match self.data.iter().position(|&b| b == 0) {
            Some(end) => &self.data[..end],
            None => &self.data[..],
        };
        String::from_utf8_lossy(trimmed).into_owned()
    }

    pub fn as_u32(&self) -> Option<u32> {
        self.read_u32(0)
    }

    pub fn read_u8(&self, offset: usize) -> Option<u8> {
        self.data.get(offset).copied()
    }

    pub fn read_u16(&self, offset: usize) -> Option<u16> {
        self.data
            .get(offset..offset + 2)
            .map(LittleEndian::read_u16)
    }

    pub fn read_u32(&self, offset: usize) -> Option<u32> {
        self.data
            .get(offset..offset + 4)
            .map(LittleEndian::read_u32)
    }

    pub fn read_i32(&self, offset: usize) -> Option<i32> {
        self.data
            .get(offset..offset + 4)
            .map(LittleEndian::read_i32)
    }

    pub fn read_f32(&self, offset: usize) -> Option<f32> {
        self.data
            .get(offset..offset + 4)
            .map(LittleEndian::read_f32)
    }

    /// Decode the payload as a packed array of FormIDs.
    pub fn as_form_id_array(&self) -> Vec<u32> {
        self.data
            .chunks_exact(4)
            .map(LittleEndian::read_u32)
            .collect()
    }
}

/// A parsed ESM record with its subrecords and raw uncompressed payload.
#[derive(Debug, Clone)]
pub struct Record {
    /// 4-char type code (WEAP, ARMO, ...). Unknown codes are retained as-is.
    pub kind: String,
    pub form_id: u32,
    pub flags: u32,
    pub revision: u32,
    pub version: u16,
    pub subrecords: Vec<Subrecord>,
    /// The uncompressed subrecord stream exactly as parsed.
    pub data: Vec<u8>,
}

impl Record {
    pub fn is_compressed(&self) -> bool {
        self.flags & FLAG_COMPRESSED != 0
    }

    pub fn form_id_hex(&self) -> String {
        format!("0x{:08X}", self.form_id)
    }

    /// First subrecord with the given tag, if any.
    pub fn subrecord(&self, tag: &str) -> Option<&Subrecord> {
        self.subrecords.iter().find(|s| s.tag == tag)
    }

    /// All subrecords with the given tag, in file order.
    pub fn subrecords_of<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Subrecord> + 'a {
        self.subrecords.iter().filter(move |s| s.tag == tag)
    }

    /// The EDID subrecord value, if present.
    pub fn editor_id(&self) -> Option<String> {
        self.subrecord("EDID").map(|s| s.as_string())
    }

    /// The FULL subrecord as a localized string id. Only 4-byte payloads are
    /// string ids; longer ones are inline text (see [`Record::full_name_inline`]).
    pub fn full_name_id(&self) -> Option<u32> {
        self.subrecord("FULL")
            .filter(|s| s.size() == 4)
            .and_then(|s| s.as_u32())
    }

    /// FULL carried as inline text rather than a string id.
    pub fn full_name_inline(&self) -> Option<String> {
        self.subrecord("FULL")
            .filter(|s| s.size() > 4)
            .map(|s| s.as_string())
    }

    /// Keyword FormIDs from the KWDA subrecord.
    pub fn keywords(&self) -> Vec<u32> {
        self.subrecord("KWDA")
            .map(|s| s.as_form_id_array())
            .unwrap_or_default()
    }

    /// SHA-256 of the uncompressed subrecord stream, hex-encoded. Two records
    /// with equal hashes are identical regardless of on-disk compression.
    pub fn data_hash(&self) -> String {
        hex::encode(Sha256::digest(&self.data))
    }
}
