//! tlkify-core: build Neverwinter Nights talk tables from 2DA overlays
//!
//! This library provides functionality to:
//! - Parse and write 2DA V2.0 tables
//! - Load JSON overlays that replace cell text per row
//! - Merge overlays into tables and derive inflected forms and labels
//! - Allocate stable, deduplicated string references into a talk table
//! - Read and write TLK V3.0 talk tables
//! - Stage, pack and publish the resulting HAK and TLK

pub mod charset;
pub mod config;
pub mod derive;
pub mod error;
pub mod merger;
pub mod overlay;
pub mod parser;
pub mod pipeline;
pub mod pool;
pub mod scanner;
pub mod table;
pub mod tlk;
pub mod tools;
pub mod validator;
pub mod writer;

pub use config::{BuildConfig, ToolsConfig, CONFIG_FILE_NAME};
pub use derive::DerivationRules;
pub use error::{Error, Result, Violation};
pub use merger::{merge_table, MergedTable, Origin, PendingString};
pub use overlay::{load_overlay, parse_overlay_str, Overlay, OverlayEntry, OverlayField};
pub use parser::{parse_2da, parse_2da_str};
pub use pipeline::{load_inputs, run_build, transform, Artifacts, BuildInputs, BuildOutput, BuildReport};
pub use pool::{Allocator, AllocationReport, StringPool, CUSTOM_TLK_OFFSET};
pub use scanner::{scan_directory, scan_overlays, scan_tables, ScanResult};
pub use table::{CellValue, Column, Row, Table, EMPTY_TOKEN};
pub use tlk::{load_talk_table, TalkTable};
pub use tools::{NwnErf, NwnTlk, Packager, TlkCompiler};
pub use writer::{render_2da, write_2da};
