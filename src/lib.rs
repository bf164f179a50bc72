//! # unesm
//!
//! A Rust library for datamining Bethesda master files (ESM format v208) and
//! their BA2 asset archives.
//!
//! ## Overview
//!
//! A master file holds hundreds of thousands of typed, FormID-identified
//! records whose payloads are streams of tagged subrecords. This library
//! provides:
//!
//! - Streaming the master file's record groups, including compressed records
//! - Per-type subrecord decoders producing named, typed fields
//! - Reading BA2 archives (GNRL blobs and DX10 texture chunks)
//! - Resolving localized string ids against the game's string tables
//! - Persisting each parse as an immutable, content-addressed snapshot
//! - Field-level diffs between any two snapshots, across databases
//!
//! ## Example - Parsing
//!
//! ```rust,no_run
//! use unesm::esm::EsmReader;
//! use unesm::CancelToken;
//!
//! fn main() -> unesm::Result<()> {
//!     let reader = EsmReader::open("SeventySix.esm")?;
//!     for record in reader.records(CancelToken::new()) {
//!         let record = record?;
//!         if record.kind == "WEAP" {
//!             println!("{} {:?}", record.form_id_hex(), record.editor_id());
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Example - Snapshot and diff
//!
//! ```rust,no_run
//! use unesm::diff::DiffEngine;
//! use unesm::snapshot::{take_snapshot, SnapshotOptions};
//! use unesm::store::Store;
//! use unesm::CancelToken;
//!
//! #[tokio::main]
//! async fn main() -> unesm::Result<()> {
//!     let store = Store::open("unesm.db").await?;
//!     let cancel = CancelToken::new();
//!     let outcome = take_snapshot(
//!         &store,
//!         "SeventySix.esm".as_ref(),
//!         None,
//!         &SnapshotOptions::default(),
//!         &cancel,
//!     )
//!     .await?;
//!
//!     if let Some((old, new)) = store.two_latest().await? {
//!         let report = DiffEngine::new(&store)
//!             .compare(old.id, new.id, None, &cancel)
//!             .await?;
//!         println!("{} changes since {}", report.total_changes(), outcome.snapshot_id);
//!     }
//!     Ok(())
//! }
//! ```

pub mod ba2;
pub mod cancel;
pub mod config;
pub mod cursor;
pub mod diff;
pub mod error;
pub mod esm;
pub mod export;
pub mod query;
pub mod snapshot;
pub mod store;
pub mod strings;

pub use ba2::{Ba2Entry, Ba2File, Ba2Kind};
pub use cancel::CancelToken;
pub use diff::{DiffEngine, DiffReport};
pub use error::{Error, Result};
pub use esm::{EsmReader, FieldValue, Record, Subrecord};
pub use store::Store;
pub use strings::StringTable;
