//! BA2 (BTDX) archive reading.
//!
//! BA2 archives hold packed game assets in two layouts: `GNRL` (general byte
//! blobs, optionally zlib-compressed) and `DX10` (textures split into
//! per-mip chunks). Both share a header and a trailing name table of
//! u16-length-prefixed paths.
//!
//! Paths are normalized to forward slashes and case-folded for lookup; the
//! original spelling is kept for display.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::cursor::inflate;
use crate::error::{Error, Result};

const MAGIC: &[u8; 4] = b"BTDX";

/// Archive layout tag from the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ba2Kind {
    /// General-purpose blobs
    Gnrl,
    /// DX10 texture chunks
    Dx10,
}

/// A chunk of a DX10 texture entry.
#[derive(Debug, Clone)]
struct Dx10Chunk {
    offset: u64,
    packed_size: u32,
    unpacked_size: u32,
}

/// Per-entry payload location details.
#[derive(Debug, Clone)]
enum EntryData {
    Gnrl {
        offset: u64,
        packed_size: u32,
        unpacked_size: u32,
    },
    Dx10 {
        chunks: Vec<Dx10Chunk>,
    },
}

/// A file entry in a BA2 archive.
#[derive(Debug, Clone)]
pub struct Ba2Entry {
    /// Path as stored in the archive (separators normalized for display).
    pub name: String,
    /// Total unpacked payload size in bytes.
    pub unpacked_size: u64,
    pub kind: Ba2Kind,
    data: EntryData,
}

/// A BA2 archive reader over a seekable file.
#[derive(Debug)]
pub struct Ba2File {
    reader: BufReader<File>,
    entries: Vec<Ba2Entry>,
    /// Case-folded path -> index into `entries`.
    index: HashMap<String, usize>,
    kind: Ba2Kind,
}

fn fold(name: &str) -> String {
    name.replace('\\', "/").to_lowercase()
}

impl Ba2File {
    /// Open a BA2 archive and parse its entry and name tables.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(Error::BadMagic {
                expected: "BTDX".into(),
                found: String::from_utf8_lossy(&magic).into_owned(),
            });
        }

        // v1 is the classic layout; v7/v8 added fields this reader ignores.
        let version = reader.read_u32::<LittleEndian>()?;
        if version != 1 && version < 7 {
            return Err(Error::UnsupportedVersion {
                expected: "1 or 7+".into(),
                found: version,
            });
        }

        let mut kind_tag = [0u8; 4];
        reader.read_exact(&mut kind_tag)?;
        let kind = match &kind_tag {
            b"GNRL" => Ba2Kind::Gnrl,
            b"DX10" => Ba2Kind::Dx10,
            other => {
                return Err(Error::BadMagic {
                    expected: "GNRL or DX10".into(),
                    found: String::from_utf8_lossy(other).into_owned(),
                })
            }
        };

        let file_count = reader.read_u32::<LittleEndian>()?;
        let name_table_offset = reader.read_u64::<LittleEndian>()?;

        let data = match kind {
            Ba2Kind::Gnrl => Self::read_gnrl_entries(&mut reader, file_count)?,
            Ba2Kind::Dx10 => Self::read_dx10_entries(&mut reader, file_count)?,
        };

        // Name table: one u16-length-prefixed path per entry, in entry order.
        reader.seek(SeekFrom::Start(name_table_offset))?;
        let mut entries = Vec::with_capacity(data.len());
        let mut index = HashMap::with_capacity(data.len());
        for (i, entry_data) in data.into_iter().enumerate() {
            let name_len = reader.read_u16::<LittleEndian>()? as usize;
            let mut name_bytes = vec![0u8; name_len];
            reader.read_exact(&mut name_bytes)?;
            let raw_name = String::from_utf8_lossy(&name_bytes).into_owned();
            let name = raw_name.replace('\\', "/");

            let unpacked_size = match &entry_data {
                EntryData::Gnrl { unpacked_size, .. } => *unpacked_size as u64,
                EntryData::Dx10 { chunks } => {
                    chunks.iter().map(|c| c.unpacked_size as u64).sum()
                }
            };

            index.insert(fold(&name), i);
            entries.push(Ba2Entry {
                name,
                unpacked_size,
                kind,
                data: entry_data,
            });
        }

        Ok(Ba2File {
            reader,
            entries,
            index,
            kind,
        })
    }

    fn read_gnrl_entries(
        reader: &mut BufReader<File>,
        file_count: u32,
    ) -> Result<Vec<EntryData>> {
        let mut entries = Vec::with_capacity(file_count as usize);
        for _ in 0..file_count {
            // 36-byte entry
            let _name_hash = reader.read_u32::<LittleEndian>()?;
            let mut ext = [0u8; 4];
            reader.read_exact(&mut ext)?;
            let _dir_hash = reader.read_u32::<LittleEndian>()?;
            let _unknown = reader.read_u32::<LittleEndian>()?;
            let offset = reader.read_u64::<LittleEndian>()?;
            let packed_size = reader.read_u32::<LittleEndian>()?;
            let unpacked_size = reader.read_u32::<LittleEndian>()?;
            let _sentinel = reader.read_u32::<LittleEndian>()?;
            entries.push(EntryData::Gnrl {
                offset,
                packed_size,
                unpacked_size,
            });
        }
        Ok(entries)
    }

    fn read_dx10_entries(
        reader: &mut BufReader<File>,
        file_count: u32,
    ) -> Result<Vec<EntryData>> {
        let mut entries = Vec::with_capacity(file_count as usize);
        for _ in 0..file_count {
            // 24-byte texture header
            let _name_hash = reader.read_u32::<LittleEndian>()?;
            let mut ext = [0u8; 4];
            reader.read_exact(&mut ext)?;
            let _dir_hash = reader.read_u32::<LittleEndian>()?;
            let _unknown = reader.read_u8()?;
            let chunk_count = reader.read_u8()?;
            let _chunk_header_size = reader.read_u16::<LittleEndian>()?;
            let _height = reader.read_u16::<LittleEndian>()?;
            let _width = reader.read_u16::<LittleEndian>()?;
            let _mip_count = reader.read_u8()?;
            let _dxgi_format = reader.read_u8()?;
            let _tile_mode = reader.read_u16::<LittleEndian>()?;

            // 24-byte chunk descriptors, in mip order.
            let mut chunks = Vec::with_capacity(chunk_count as usize);
            for _ in 0..chunk_count {
                let offset = reader.read_u64::<LittleEndian>()?;
                let packed_size = reader.read_u32::<LittleEndian>()?;
                let unpacked_size = reader.read_u32::<LittleEndian>()?;
                let _start_mip = reader.read_u16::<LittleEndian>()?;
                let _end_mip = reader.read_u16::<LittleEndian>()?;
                let _sentinel = reader.read_u32::<LittleEndian>()?;
                chunks.push(Dx10Chunk {
                    offset,
                    packed_size,
                    unpacked_size,
                });
            }
            entries.push(EntryData::Dx10 { chunks });
        }
        Ok(entries)
    }

    pub fn kind(&self) -> Ba2Kind {
        self.kind
    }

    /// All entries in archive order.
    pub fn list(&self) -> &[Ba2Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an entry by exact path (case-insensitive, either separator).
    pub fn get_entry(&self, name: &str) -> Option<&Ba2Entry> {
        self.index.get(&fold(name)).map(|&i| &self.entries[i])
    }

    /// First entry whose path contains the fragment (case-insensitive).
    pub fn find(&self, fragment: &str) -> Option<&Ba2Entry> {
        let fragment = fragment.to_lowercase();
        self.entries
            .iter()
            .find(|e| fold(&e.name).contains(&fragment))
    }

    /// All entry paths matching a glob pattern (case-insensitive).
    pub fn find_glob(&self, pattern: &str) -> Result<Vec<String>> {
        let glob = globset::GlobBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| Error::EntryNotFound(format!("bad pattern {}: {}", pattern, e)))?
            .compile_matcher();
        Ok(self
            .entries
            .iter()
            .filter(|e| glob.is_match(fold(&e.name)))
            .map(|e| e.name.clone())
            .collect())
    }

    /// Extract a file by path and return its unpacked contents.
    pub fn read(&mut self, name: &str) -> Result<Vec<u8>> {
        let idx = *self
            .index
            .get(&fold(name))
            .ok_or_else(|| Error::EntryNotFound(name.to_string()))?;
        let entry = self.entries[idx].clone();
        self.read_entry(&entry)
    }

    /// Extract an entry's payload.
    ///
    /// GNRL payloads are read raw when `packed_size == 0`, else inflated to
    /// `unpacked_size`. DX10 payloads are the concatenation of all chunk
    /// payloads in descriptor order (DDS header synthesis is left to texture
    /// tooling).
    pub fn read_entry(&mut self, entry: &Ba2Entry) -> Result<Vec<u8>> {
        match &entry.data {
            EntryData::Gnrl {
                offset,
                packed_size,
                unpacked_size,
            } => self.read_blob(*offset, *packed_size, *unpacked_size),
            EntryData::Dx10 { chunks } => {
                let mut out = Vec::with_capacity(entry.unpacked_size as usize);
                for chunk in chunks {
                    out.extend(self.read_blob(
                        chunk.offset,
                        chunk.packed_size,
                        chunk.unpacked_size,
                    )?);
                }
                Ok(out)
            }
        }
    }

    fn read_blob(&mut self, offset: u64, packed: u32, unpacked: u32) -> Result<Vec<u8>> {
        self.reader.seek(SeekFrom::Start(offset))?;
        if packed == 0 {
            let mut out = vec![0u8; unpacked as usize];
            self.reader.read_exact(&mut out)?;
            Ok(out)
        } else {
            let mut compressed = vec![0u8; packed as usize];
            self.reader.read_exact(&mut compressed)?;
            inflate(&compressed, unpacked as usize)
        }
    }
}
