//! Builders for synthetic ESM images used by the parser tests.

use std::io::Write;

/// A minimal TES4 file header record with the given format version.
pub fn tes4(version: u16) -> Vec<u8> {
    record_with_version("TES4", 0, 0, version, &[])
}

/// A record with the default format version.
pub fn record(kind: &str, form_id: u32, flags: u32, body: &[u8]) -> Vec<u8> {
    record_with_version(kind, form_id, flags, 208, body)
}

pub fn record_with_version(
    kind: &str,
    form_id: u32,
    flags: u32,
    version: u16,
    body: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(24 + body.len());
    out.extend(kind.as_bytes());
    out.extend((body.len() as u32).to_le_bytes());
    out.extend(flags.to_le_bytes());
    out.extend(form_id.to_le_bytes());
    out.extend(0u32.to_le_bytes()); // revision
    out.extend(version.to_le_bytes());
    out.extend(0u16.to_le_bytes()); // unknown
    out.extend(body);
    out
}

/// A type-0 GRUP wrapping `contents`; `group_size` includes the header.
pub fn group(label: &[u8; 4], contents: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(24 + contents.len());
    out.extend(b"GRUP");
    out.extend((24 + contents.len() as u32).to_le_bytes());
    out.extend(label);
    out.extend(0i32.to_le_bytes()); // group type
    out.extend(0u16.to_le_bytes()); // timestamp
    out.extend(0u16.to_le_bytes()); // version
    out.extend(0u32.to_le_bytes()); // unknown
    out.extend(contents);
    out
}

/// A subrecord with a correct 16-bit length field.
pub fn subrecord(tag: &str, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(6 + data.len());
    out.extend(tag.as_bytes());
    out.extend((data.len() as u16).to_le_bytes());
    out.extend(data);
    out
}

/// An XXXX length-override subrecord.
pub fn xxxx_override(len: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(10);
    out.extend(b"XXXX");
    out.extend(4u16.to_le_bytes());
    out.extend(len.to_le_bytes());
    out
}

/// Compress a record payload the way the game does: u32 unpacked length
/// followed by a zlib stream.
pub fn compress(payload: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(payload).unwrap();
    let packed = encoder.finish().unwrap();

    let mut out = Vec::with_capacity(4 + packed.len());
    out.extend((payload.len() as u32).to_le_bytes());
    out.extend(packed);
    out
}
