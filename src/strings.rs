//! Localized string tables (.strings / .dlstrings / .ilstrings).
//!
//! Each file starts with `count (u32)` and `data_size (u32)`, followed by a
//! directory of `(string_id u32, offset u32)` pairs. Offsets point into the
//! string section that follows the directory. `.strings` holds NUL-terminated
//! UTF-8; `.dlstrings` and `.ilstrings` hold u32-length-prefixed UTF-8 where
//! the length includes the trailing NUL.

use crate::ba2::Ba2File;
use crate::cursor::Cursor;
use crate::error::Result;

/// Merged `string_id -> text` lookup across the three table formats.
#[derive(Debug, Default)]
pub struct StringTable {
    strings: std::collections::HashMap<u32, String>,
}

/// Parse a `.strings` file (NUL-terminated heap).
fn parse_strings(data: &[u8]) -> Vec<(u32, String)> {
    parse_table(data, false)
}

/// Parse a `.dlstrings` / `.ilstrings` file (length-prefixed heap).
fn parse_dlstrings(data: &[u8]) -> Vec<(u32, String)> {
    parse_table(data, true)
}

fn parse_table(data: &[u8], length_prefixed: bool) -> Vec<(u32, String)> {
    let mut cur = Cursor::new(data);
    let Ok(count) = cur.read_u32() else {
        return Vec::new();
    };
    let Ok(_data_size) = cur.read_u32() else {
        return Vec::new();
    };

    let mut directory = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (Ok(id), Ok(offset)) = (cur.read_u32(), cur.read_u32()) else {
            return Vec::new();
        };
        directory.push((id, offset));
    }

    // Offsets are relative to the end of the directory.
    let heap_base = 8 + count as usize * 8;
    let mut entries = Vec::with_capacity(count as usize);
    for (id, offset) in directory {
        let start = heap_base + offset as usize;
        if cur.seek(start).is_err() {
            continue;
        }
        let text = if length_prefixed {
            match cur.read_string_u32() {
                Ok(t) => t,
                Err(_) => continue,
            }
        } else {
            match cur.read_cstring() {
                Ok(t) => t,
                Err(_) => continue,
            }
        };
        entries.push((id, text));
    }
    entries
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every string file for a language from a localization BA2.
    ///
    /// Matches members whose case-folded paths end in
    /// `strings/<stem>_<lang>.strings` (and the `.dlstrings` / `.ilstrings`
    /// variants). Duplicate ids within one file: last wins. Across files, the
    /// `.strings` table wins, so the length-prefixed tables load first.
    pub fn load_from_ba2(&mut self, ba2: &mut Ba2File, language: &str) -> Result<()> {
        for suffix in [".dlstrings", ".ilstrings", ".strings"] {
            let pattern = format!("**/strings/*_{}{}", language, suffix);
            for path in ba2.find_glob(&pattern)? {
                let raw = ba2.read(&path)?;
                let parsed = if suffix == ".strings" {
                    parse_strings(&raw)
                } else {
                    parse_dlstrings(&raw)
                };
                self.strings.extend(parsed);
            }
        }
        Ok(())
    }

    pub fn insert(&mut self, id: u32, text: String) {
        self.strings.insert(id, text);
    }

    pub fn lookup(&self, string_id: u32) -> Option<&str> {
        self.strings.get(&string_id).map(String::as_str)
    }

    /// Case-insensitive substring search, unsorted.
    pub fn search(&self, query: &str) -> Vec<(u32, &str)> {
        let query = query.to_lowercase();
        self.strings
            .iter()
            .filter(|(_, text)| text.to_lowercase().contains(&query))
            .map(|(&id, text)| (id, text.as_str()))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.strings.iter().map(|(&id, text)| (id, text.as_str()))
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a `.strings` image (NUL-terminated heap).
    pub fn build_strings(entries: &[(u32, &str)]) -> Vec<u8> {
        let mut heap = Vec::new();
        let mut directory = Vec::new();
        for (id, text) in entries {
            directory.push((*id, heap.len() as u32));
            heap.extend(text.as_bytes());
            heap.push(0);
        }
        encode(&directory, &heap)
    }

    /// Build a `.dlstrings` image (length-prefixed heap).
    pub fn build_dlstrings(entries: &[(u32, &str)]) -> Vec<u8> {
        let mut heap = Vec::new();
        let mut directory = Vec::new();
        for (id, text) in entries {
            directory.push((*id, heap.len() as u32));
            heap.extend((text.len() as u32 + 1).to_le_bytes());
            heap.extend(text.as_bytes());
            heap.push(0);
        }
        encode(&directory, &heap)
    }

    fn encode(directory: &[(u32, u32)], heap: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend((directory.len() as u32).to_le_bytes());
        out.extend((heap.len() as u32).to_le_bytes());
        for (id, offset) in directory {
            out.extend(id.to_le_bytes());
            out.extend(offset.to_le_bytes());
        }
        out.extend(heap);
        out
    }

    #[test]
    fn test_strings_round_trip() {
        let entries = [(0x10u32, "Stimpak"), (0x20, "10mm Pistol"), (0x30, "")];
        let parsed = parse_strings(&build_strings(&entries));
        assert_eq!(parsed.len(), 3);
        for ((id, text), (pid, ptext)) in entries.iter().zip(parsed.iter()) {
            assert_eq!(id, pid);
            assert_eq!(text, ptext);
        }
    }

    #[test]
    fn test_dlstrings_round_trip() {
        let entries = [(7u32, "A longer description.\nSecond line.")];
        let parsed = parse_dlstrings(&build_dlstrings(&entries));
        assert_eq!(parsed, vec![(7, entries[0].1.to_string())]);
    }

    #[test]
    fn test_short_file_is_empty() {
        assert!(parse_strings(&[1, 2, 3]).is_empty());
    }

    #[test]
    fn test_out_of_range_offset_is_skipped() {
        let mut image = build_strings(&[(1, "ok")]);
        // Corrupt the directory offset to point past the heap.
        image[12..16].copy_from_slice(&0xFFFF_FFF0u32.to_le_bytes());
        assert!(parse_strings(&image).is_empty());
    }

    #[test]
    fn test_duplicate_id_last_wins_within_file() {
        let parsed = parse_strings(&build_strings(&[(5, "first"), (5, "second")]));
        let mut table = StringTable::new();
        table.strings.extend(parsed);
        assert_eq!(table.lookup(5), Some("second"));
    }

    #[test]
    fn test_strings_table_wins_across_files() {
        let mut table = StringTable::new();
        // Load order in load_from_ba2: length-prefixed first, .strings last.
        table.strings.extend(parse_dlstrings(&build_dlstrings(&[(9, "dl text")])));
        table.strings.extend(parse_strings(&build_strings(&[(9, "plain text")])));
        assert_eq!(table.lookup(9), Some("plain text"));
    }

    #[test]
    fn test_search_case_insensitive() {
        let mut table = StringTable::new();
        table.insert(1, "Nuka-Cola Quantum".into());
        table.insert(2, "Laser Rifle".into());
        let hits = table.search("nuka");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, 1);
    }
}
