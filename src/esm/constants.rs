//! ESM format constants, flags, and magic numbers.

/// Record and GRUP headers share a 24-byte layout.
pub const HEADER_SIZE: usize = 24;
/// Subrecord header: 4-byte tag + u16 length.
pub const SUBRECORD_HEADER_SIZE: usize = 6;

/// Format version written by the game; anything else is rejected.
pub const ESM_VERSION: u16 = 208;

// Record flags
pub const FLAG_MASTER: u32 = 0x0000_0001;
pub const FLAG_LOCALIZED: u32 = 0x0000_0080;
pub const FLAG_COMPRESSED: u32 = 0x0004_0000;

// Group types
pub const GROUP_TOP: i32 = 0;
pub const GROUP_CELL_PERSISTENT: i32 = 8;
pub const GROUP_CELL_TEMPORARY: i32 = 9;

/// Placement data: millions of records, none of them datamineable.
/// Skipped both as top-level group labels and as individual record types.
pub const SKIP_TYPES: [&[u8; 4]; 7] = [
    b"REFR", // Object references (~5.1M)
    b"NAVM", // Navmeshes
    b"ACHR", // Placed NPCs
    b"PGRE", // Placed grenades
    b"PMIS", // Placed missiles
    b"PHZD", // Placed hazards
    b"PARW", // Placed arrows
];

pub fn is_skipped_type(tag: &[u8; 4]) -> bool {
    SKIP_TYPES.iter().any(|t| *t == tag)
}

/// Editor-id prefixes that mark unreleased or internal content.
pub const UNRELEASED_PREFIXES: [&str; 8] = [
    "ATX_",   // Atomic Shop items
    "zzz_",   // Disabled/cut content
    "CUT_",   // Cut content
    "TEST_",  // Test items
    "test_",
    "DEBUG_", // Debug items
    "DVLP_",  // Development items
    "DLC",    // Unreleased DLC
];
