//! ESM master file parsing.
//!
//! A master file is a `TES4` header record followed by top-level `GRUP`
//! containers, one per record type. Records are tagged, FormID-identified
//! units carrying a stream of tagged subrecords; the stream may be
//! zlib-compressed on disk.
//!
//! ## Example
//!
//! ```rust,no_run
//! use unesm::esm::EsmReader;
//! use unesm::CancelToken;
//!
//! let reader = EsmReader::open("SeventySix.esm")?;
//! for record in reader.records(CancelToken::new()) {
//!     let record = record?;
//!     println!("{} {}", record.kind, record.form_id_hex());
//! }
//! # Ok::<(), unesm::Error>(())
//! ```

pub mod constants;
pub mod decoders;
pub mod reader;
pub mod records;
#[cfg(test)]
pub mod testutil;

pub use decoders::{decode_record, resolve_full_name, DecodedField, FieldValue};
pub use reader::EsmReader;
pub use records::{Record, Subrecord};
