//! Streaming parser for ESM master files (format version 208).
//!
//! The file opens with a `TES4` record followed by top-level `GRUP`
//! containers, one per record type. Records carry a subrecord stream that may
//! be zlib-compressed (flag `0x00040000`). Placement groups (REFR/NAVM/ACHR
//! and friends) are skipped wholesale for speed.
//!
//! Parsing is recoverable at the record level: malformed records are logged
//! and skipped, a truncated group terminates that group only. Header-level
//! problems (bad magic, wrong version) fail the open.

use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::cancel::CancelToken;
use crate::cursor::{inflate, Cursor};
use crate::error::{Error, Result};
use crate::esm::constants::{
    is_skipped_type, ESM_VERSION, FLAG_COMPRESSED, GROUP_CELL_PERSISTENT, GROUP_CELL_TEMPORARY,
    GROUP_TOP, HEADER_SIZE, SUBRECORD_HEADER_SIZE,
};
use crate::esm::records::{Record, Subrecord};

/// Parsed 24-byte record header.
struct RecordHeader {
    tag: [u8; 4],
    data_size: u32,
    flags: u32,
    form_id: u32,
    revision: u32,
    version: u16,
}

/// Parsed 24-byte GRUP header.
struct GroupHeader {
    group_size: u32,
    label: [u8; 4],
    group_type: i32,
}

fn read_record_header(cur: &mut Cursor) -> Result<RecordHeader> {
    let tag = cur.read_tag()?;
    let data_size = cur.read_u32()?;
    let flags = cur.read_u32()?;
    let form_id = cur.read_u32()?;
    let revision = cur.read_u32()?;
    let version = cur.read_u16()?;
    let _unknown = cur.read_u16()?;
    Ok(RecordHeader {
        tag,
        data_size,
        flags,
        form_id,
        revision,
        version,
    })
}

fn read_group_header(cur: &mut Cursor) -> Result<GroupHeader> {
    let _tag = cur.read_tag()?;
    let group_size = cur.read_u32()?;
    let label = cur.read_tag()?;
    let group_type = cur.read_i32()?;
    let _timestamp = cur.read_u16()?;
    let _version = cur.read_u16()?;
    let _unknown = cur.read_u32()?;
    Ok(GroupHeader {
        group_size,
        label,
        group_type,
    })
}

/// In-memory ESM file, validated and hashed on open.
#[derive(Debug)]
pub struct EsmReader {
    data: Vec<u8>,
    esm_sha256: String,
    /// Offset of the first top-level GRUP (just past the TES4 record).
    body_start: usize,
}

impl EsmReader {
    /// Open and validate a master file from disk.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::from_bytes(data)
    }

    /// Validate an in-memory master file image.
    ///
    /// Checks the leading `TES4` record and its format version, and computes
    /// the whole-file SHA-256 used for snapshot identity.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let mut cur = Cursor::new(&data);
        let header = read_record_header(&mut cur)?;
        if &header.tag != b"TES4" {
            return Err(Error::BadMagic {
                expected: "TES4".into(),
                found: String::from_utf8_lossy(&header.tag).into_owned(),
            });
        }
        if header.version != ESM_VERSION {
            return Err(Error::UnsupportedVersion {
                expected: ESM_VERSION.to_string(),
                found: header.version as u32,
            });
        }
        let body_start = HEADER_SIZE + header.data_size as usize;
        if body_start > data.len() {
            return Err(Error::Truncated { offset: data.len() });
        }

        let esm_sha256 = hex::encode(Sha256::digest(&data));
        Ok(EsmReader {
            data,
            esm_sha256,
            body_start,
        })
    }

    /// SHA-256 of the file as read, hex-encoded.
    pub fn esm_sha256(&self) -> &str {
        &self.esm_sha256
    }

    /// Size of the file as read.
    pub fn file_size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Iterate every datamineable record in file order.
    pub fn records(&self, cancel: CancelToken) -> RecordIter<'_> {
        RecordIter {
            data: &self.data,
            pos: self.body_start,
            group_ends: Vec::new(),
            cancel,
            done: false,
        }
    }
}

/// Iterator over records, descending nested groups depth-first.
///
/// Yields `Err(Cancelled)` once and stops if the token fires; recoverable
/// parse problems are logged and skipped.
pub struct RecordIter<'a> {
    data: &'a [u8],
    pos: usize,
    /// End offsets of the groups currently being walked, innermost last.
    group_ends: Vec<usize>,
    cancel: CancelToken,
    done: bool,
}

impl<'a> RecordIter<'a> {
    /// End of the innermost open container (or the file).
    fn limit(&self) -> usize {
        self.group_ends.last().copied().unwrap_or(self.data.len())
    }

    fn parse_one(&mut self) -> Option<Result<Record>> {
        loop {
            // Close any groups we have walked past the end of.
            while let Some(&end) = self.group_ends.last() {
                if self.pos >= end {
                    self.group_ends.pop();
                } else {
                    break;
                }
            }

            let limit = self.limit();
            if self.pos >= limit {
                if self.group_ends.is_empty() {
                    self.done = true;
                    return None;
                }
                continue;
            }

            if self.pos + HEADER_SIZE > limit {
                warn!(offset = self.pos, "truncated header at end of group");
                self.pos = limit;
                continue;
            }

            let mut cur = Cursor::new(&self.data[..limit]);
            if cur.seek(self.pos).is_err() {
                self.done = true;
                return None;
            }

            if &self.data[self.pos..self.pos + 4] == b"GRUP" {
                let header = match read_group_header(&mut cur) {
                    Ok(h) => h,
                    Err(_) => {
                        warn!(offset = self.pos, "unreadable group header");
                        self.pos = limit;
                        continue;
                    }
                };
                if (header.group_size as usize) < HEADER_SIZE {
                    warn!(offset = self.pos, size = header.group_size, "group smaller than its header");
                    self.pos = limit;
                    continue;
                }
                let group_end = self.pos + header.group_size as usize;
                if group_end > limit {
                    warn!(
                        offset = self.pos,
                        size = header.group_size,
                        "group overruns its container, clamping"
                    );
                }
                let group_end = group_end.min(limit);

                // Group boundary: honor cancellation here.
                if self.cancel.is_cancelled() {
                    self.done = true;
                    return Some(Err(Error::Cancelled));
                }

                let skip = (header.group_type == GROUP_TOP && is_skipped_type(&header.label))
                    || header.group_type == GROUP_CELL_PERSISTENT
                    || header.group_type == GROUP_CELL_TEMPORARY;
                if skip {
                    self.pos = group_end;
                    continue;
                }

                self.group_ends.push(group_end);
                self.pos += HEADER_SIZE;
                continue;
            }

            // A record.
            let header = match read_record_header(&mut cur) {
                Ok(h) => h,
                Err(_) => {
                    warn!(offset = self.pos, "unreadable record header");
                    self.pos = limit;
                    continue;
                }
            };
            let data_start = self.pos + HEADER_SIZE;
            let data_end = data_start + header.data_size as usize;
            if data_end > limit {
                warn!(
                    offset = self.pos,
                    form_id = %format!("0x{:08X}", header.form_id),
                    "record payload overruns group, dropping remainder"
                );
                self.pos = limit;
                continue;
            }
            self.pos = data_end;

            if is_skipped_type(&header.tag) {
                continue;
            }

            let raw = &self.data[data_start..data_end];
            let payload = if header.flags & FLAG_COMPRESSED != 0 {
                match inflate_record(raw) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(
                            form_id = %format!("0x{:08X}", header.form_id),
                            error = %e,
                            "failed to decompress record, skipping"
                        );
                        continue;
                    }
                }
            } else {
                raw.to_vec()
            };

            let subrecords = parse_subrecords(&payload, header.form_id);
            return Some(Ok(Record {
                kind: String::from_utf8_lossy(&header.tag).into_owned(),
                form_id: header.form_id,
                flags: header.flags,
                revision: header.revision,
                version: header.version,
                subrecords,
                data: payload,
            }));
        }
    }
}

impl<'a> Iterator for RecordIter<'a> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        self.parse_one()
    }
}

/// Inflate a compressed record payload: u32 unpacked length + zlib stream.
fn inflate_record(raw: &[u8]) -> Result<Vec<u8>> {
    let mut cur = Cursor::new(raw);
    let unpacked_len = cur.read_u32()? as usize;
    inflate(&raw[4..], unpacked_len)
}

/// Walk the subrecord stream, honoring `XXXX` length overrides.
///
/// An `XXXX` subrecord carries a u32 length in its payload that replaces the
/// 16-bit length of the subrecord that follows it. An override of `u32::MAX`
/// is malformed and drops the rest of the stream, as does any subrecord whose
/// length overruns the remaining payload.
fn parse_subrecords(payload: &[u8], form_id: u32) -> Vec<Subrecord> {
    let mut subrecords = Vec::new();
    let mut cur = Cursor::new(payload);
    let mut override_len: Option<usize> = None;

    while cur.remaining() >= SUBRECORD_HEADER_SIZE {
        // Remaining-length check above guarantees these reads succeed.
        let Ok(tag) = cur.read_tag() else { break };
        let Ok(size16) = cur.read_u16() else { break };

        if &tag == b"XXXX" {
            if size16 != 4 || cur.remaining() < 4 {
                warn!(
                    form_id = %format!("0x{:08X}", form_id),
                    "malformed XXXX override, dropping remaining subrecords"
                );
                break;
            }
            let Ok(value) = cur.read_u32() else { break };
            if value == u32::MAX {
                warn!(
                    form_id = %format!("0x{:08X}", form_id),
                    "XXXX override of u32::MAX, dropping remaining subrecords"
                );
                break;
            }
            override_len = Some(value as usize);
            continue;
        }

        let size = override_len.take().unwrap_or(size16 as usize);
        if cur.remaining() < size {
            warn!(
                form_id = %format!("0x{:08X}", form_id),
                tag = %String::from_utf8_lossy(&tag),
                size,
                "subrecord overruns payload, dropping"
            );
            break;
        }
        let Ok(data) = cur.take(size) else { break };
        subrecords.push(Subrecord {
            tag: String::from_utf8_lossy(&tag).into_owned(),
            data: data.to_vec(),
        });
    }

    subrecords
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::esm::testutil::{compress, group, record, subrecord, tes4, xxxx_override};

    fn parse_all(image: Vec<u8>) -> Vec<Record> {
        let reader = EsmReader::from_bytes(image).unwrap();
        reader
            .records(CancelToken::new())
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_rejects_bad_magic() {
        let err = EsmReader::from_bytes(vec![0u8; 64]).unwrap_err();
        assert!(matches!(err, Error::BadMagic { .. }));
    }

    #[test]
    fn test_rejects_wrong_version() {
        let mut image = tes4(131);
        image.extend(group(b"WEAP", &[]));
        let err = EsmReader::from_bytes(image).unwrap_err();
        assert!(matches!(err, Error::UnsupportedVersion { found: 131, .. }));
    }

    #[test]
    fn test_empty_group_yields_nothing() {
        let mut image = tes4(208);
        image.extend(group(b"WEAP", &[]));
        assert!(parse_all(image).is_empty());
    }

    #[test]
    fn test_single_record_with_subrecords() {
        let body = [
            subrecord("EDID", b"TestGun\0"),
            subrecord("DATA", &42u32.to_le_bytes()),
        ]
        .concat();
        let mut image = tes4(208);
        image.extend(group(b"WEAP", &record("WEAP", 0x0012_3456, 0, &body)));

        let records = parse_all(image);
        assert_eq!(records.len(), 1);
        let rec = &records[0];
        assert_eq!(rec.kind, "WEAP");
        assert_eq!(rec.form_id, 0x0012_3456);
        assert_eq!(rec.editor_id().as_deref(), Some("TestGun"));
        assert_eq!(rec.subrecords.len(), 2);
        // Raw payload is fully accounted for by subrecord headers + data.
        let consumed: usize = rec.subrecords.iter().map(|s| 6 + s.size()).sum();
        assert_eq!(rec.data.len(), consumed);
    }

    #[test]
    fn test_records_emitted_in_file_order() {
        let mut body = Vec::new();
        for fid in [5u32, 3, 9] {
            body.extend(record("MISC", fid, 0, &subrecord("EDID", b"x\0")));
        }
        let mut image = tes4(208);
        image.extend(group(b"MISC", &body));

        let ids: Vec<u32> = parse_all(image).iter().map(|r| r.form_id).collect();
        assert_eq!(ids, vec![5, 3, 9]);
    }

    #[test]
    fn test_compressed_record_round_trip() {
        let body = subrecord("EDID", b"Packed\0");
        let packed = compress(&body);
        let mut image = tes4(208);
        image.extend(group(
            b"NPC_",
            &record("NPC_", 0x42, FLAG_COMPRESSED, &packed),
        ));

        let records = parse_all(image);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].editor_id().as_deref(), Some("Packed"));
        // Hash covers the *uncompressed* stream.
        assert_eq!(records[0].data, body);
    }

    #[test]
    fn test_skip_set_drops_whole_groups_and_records() {
        let mut image = tes4(208);
        image.extend(group(b"REFR", &record("REFR", 1, 0, &[])));
        image.extend(group(b"MISC", &record("MISC", 2, 0, &[])));

        let records = parse_all(image);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].form_id, 2);
    }

    #[test]
    fn test_nested_groups_are_descended() {
        let inner = group(b"\0\0\0\0", &record("QUST", 7, 0, &[]));
        let mut image = tes4(208);
        image.extend(group(b"QUST", &inner));

        let records = parse_all(image);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].form_id, 7);
    }

    #[test]
    fn test_zero_size_record_has_no_subrecords() {
        let mut image = tes4(208);
        image.extend(group(b"KYWD", &record("KYWD", 11, 0, &[])));

        let records = parse_all(image);
        assert_eq!(records.len(), 1);
        assert!(records[0].subrecords.is_empty());
        assert!(records[0].data.is_empty());
    }

    #[test]
    fn test_xxxx_override_applies_to_next_subrecord() {
        let big = vec![0xABu8; 70_000];
        let mut body = xxxx_override(big.len() as u32);
        body.extend(subrecord_with_len("BLOB", 0, &big));
        let mut image = tes4(208);
        image.extend(group(b"MISC", &record("MISC", 3, 0, &body)));

        let records = parse_all(image);
        assert_eq!(records.len(), 1);
        let subs = &records[0].subrecords;
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].tag, "BLOB");
        assert_eq!(subs[0].data.len(), 70_000);
    }

    #[test]
    fn test_xxxx_override_u32_max_is_rejected() {
        let mut body = xxxx_override(u32::MAX);
        body.extend(subrecord("DATA", &[1, 2, 3, 4]));
        let mut image = tes4(208);
        image.extend(group(b"MISC", &record("MISC", 3, 0, &body)));

        let records = parse_all(image);
        assert_eq!(records.len(), 1);
        assert!(records[0].subrecords.is_empty());
    }

    #[test]
    fn test_overlong_subrecord_is_dropped() {
        let mut body = subrecord("EDID", b"ok\0");
        // Claims 100 bytes but only 4 follow.
        body.extend(b"DATA");
        body.extend(100u16.to_le_bytes());
        body.extend(&[1, 2, 3, 4]);
        let mut image = tes4(208);
        image.extend(group(b"MISC", &record("MISC", 3, 0, &body)));

        let records = parse_all(image);
        assert_eq!(records[0].subrecords.len(), 1);
        assert_eq!(records[0].subrecords[0].tag, "EDID");
    }

    #[test]
    fn test_truncated_group_keeps_earlier_records() {
        let mut body = record("MISC", 1, 0, &subrecord("EDID", b"a\0"));
        // A record header claiming more payload than the group holds.
        let mut partial = record("MISC", 2, 0, &[9u8; 100]);
        partial.truncate(24 + 2);
        body.extend(partial);
        let mut image = tes4(208);
        image.extend(group(b"MISC", &body));

        let records = parse_all(image);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].form_id, 1);
    }

    #[test]
    fn test_cancellation_stops_at_group_boundary() {
        let mut image = tes4(208);
        image.extend(group(b"MISC", &record("MISC", 1, 0, &[])));
        let reader = EsmReader::from_bytes(image).unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let result: Result<Vec<_>> = reader.records(cancel).collect();
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    /// Subrecord with an explicit (possibly wrong) 16-bit length field.
    fn subrecord_with_len(tag: &str, len16: u16, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(6 + data.len());
        out.extend(tag.as_bytes());
        out.extend(len16.to_le_bytes());
        out.extend(data);
        out
    }
}
