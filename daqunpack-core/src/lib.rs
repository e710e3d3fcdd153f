//! Unpacker for NSCLDAQ VME module buffers.
//!
//! This crate decodes physics-event buffers read out from charge-to-digital
//! (conversion-type) and multi-hit time-to-digital (timing-type) modules into
//! per-channel records. Module blocks may appear in any order and be padded
//! with filler words; the scanner resynchronizes on block headers and never
//! fails on malformed input, reporting problems as defects on the decoded
//! blocks instead.
//!
//! # Example
//!
//! ```no_run
//! use daqunpack_core::{RingReader, UnpackConfig};
//!
//! let config = UnpackConfig::from_file("unpack.toml").unwrap();
//! let assembler = config.build_assembler().unwrap();
//!
//! for item in RingReader::open("run-0042-00.evt").unwrap() {
//!     let item = item.unwrap();
//!     if let Some(words) = item.physics_words() {
//!         for block in assembler.scan(&words) {
//!             println!("{} selector {}: {} channels", block.family, block.selector, block.channels.len());
//!         }
//!     }
//! }
//! ```
//!
//! # Features
//!
//! - Configurable bit-field layouts for both hardware revisions of each family
//! - Free-order, padding-tolerant block scanning with bounded cost
//! - NSCLDAQ ring-item run file reader
//! - CSV, wide-table CSV and binary output sinks
//! - Optional parallel scanning of independent buffers (`parallel` feature)

pub mod assembler;
pub mod config;
pub mod decoder;
pub mod output;
pub mod parser;
pub mod ring;
pub mod types;

// Re-export commonly used types
pub use assembler::EventAssembler;
pub use config::{ConfigError, FamilyConfig, ModuleSpec, TypeMaskVariant, UnpackConfig};
pub use decoder::ModuleDecoder;
pub use output::{OutputError, OutputFormat};
pub use ring::{RingError, RingItem, RingItemType, RingReader};
pub use types::{
    ChannelValue, DecodedEvent, Defect, Family, Hit, Word, WordKind, FILLER_WORD, INVALID_SELECTOR,
};
