//! Output sinks for decoded hits.
//!
//! Supports a long CSV format (one row per hit), a wide CSV table (one row
//! per physics event, 32 columns per configured module) and a packed binary
//! format.

use crate::config::ModuleSpec;
use crate::types::{DecodedEvent, Family, Hit, CHANNELS_PER_MODULE};
use byteorder::{LittleEndian, WriteBytesExt};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;
use thiserror::Error;

/// Magic bytes opening a binary hit file.
pub const BINARY_MAGIC: &[u8; 8] = b"DAQUNPK\0";

/// Binary format version.
pub const BINARY_VERSION: u32 = 1;

/// Byte offset of the hit count in the binary header.
const BINARY_COUNT_OFFSET: u64 = 12;

/// Errors that can occur during output writing.
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

/// Output file format, chosen by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Csv,
    Binary,
}

impl OutputFormat {
    /// Determines the format from a path's extension (`.csv` or `.bin`).
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, OutputError> {
        let ext = path
            .as_ref()
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        ext.parse()
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = OutputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "bin" | "binary" => Ok(Self::Binary),
            other => Err(OutputError::InvalidFormat(format!(
                "Unsupported output format: .{}. Use .csv or .bin",
                other
            ))),
        }
    }
}

/// CSV writer with one row per hit.
pub struct HitCsvWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> HitCsvWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    /// Writes the column header.
    pub fn write_header(&mut self) -> Result<(), OutputError> {
        writeln!(self.writer, "event,family,selector,channel,value,valid")?;
        Ok(())
    }

    /// Writes a batch of hits.
    pub fn write_hits<'a, I>(&mut self, hits: I) -> Result<(), OutputError>
    where
        I: IntoIterator<Item = &'a Hit>,
    {
        for hit in hits {
            self.write_hit(hit)?;
        }
        Ok(())
    }

    #[inline]
    pub fn write_hit(&mut self, hit: &Hit) -> Result<(), OutputError> {
        writeln!(
            self.writer,
            "{},{},{},{},{},{}",
            hit.event,
            hit.family,
            hit.selector,
            hit.channel,
            hit.value,
            u8::from(hit.valid)
        )?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), OutputError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Wide CSV writer: one row per physics event, one column per module channel.
///
/// Blocks whose selector names a configured module contribute their decoded
/// channels; placeholders and truncated blocks are left out. Channels
/// without a hit are left empty.
pub struct TableCsvWriter<W: Write> {
    writer: BufWriter<W>,
    names: Vec<String>,
    columns: HashMap<(Family, u16), usize>,
    row: Vec<Option<u16>>,
}

impl<W: Write> TableCsvWriter<W> {
    pub fn new(writer: W, modules: &[ModuleSpec]) -> Self {
        let names = modules.iter().map(|m| m.name.clone()).collect();
        let columns = modules
            .iter()
            .enumerate()
            .map(|(i, m)| ((m.family, m.selector), i))
            .collect();
        Self {
            writer: BufWriter::new(writer),
            names,
            columns,
            row: vec![None; modules.len() * CHANNELS_PER_MODULE],
        }
    }

    /// Writes `event,<module>_00,...,<module>_31,...`.
    pub fn write_header(&mut self) -> Result<(), OutputError> {
        write!(self.writer, "event")?;
        for name in &self.names {
            for channel in 0..CHANNELS_PER_MODULE {
                write!(self.writer, ",{}_{:02}", name, channel)?;
            }
        }
        writeln!(self.writer)?;
        Ok(())
    }

    /// Writes one row for the blocks of one physics event.
    ///
    /// A later hit on the same channel overwrites an earlier one.
    pub fn write_event(&mut self, event: u64, blocks: &[DecodedEvent]) -> Result<(), OutputError> {
        self.row.iter_mut().for_each(|v| *v = None);

        for block in blocks.iter().filter(|b| !b.is_truncated()) {
            let Some(&module) = self.columns.get(&(block.family, block.selector)) else {
                continue;
            };
            for cv in block.decoded_channels() {
                let channel = cv.channel as usize;
                if channel >= CHANNELS_PER_MODULE {
                    continue;
                }
                self.row[module * CHANNELS_PER_MODULE + channel] = Some(cv.value);
            }
        }

        write!(self.writer, "{}", event)?;
        for value in &self.row {
            match value {
                Some(v) => write!(self.writer, ",{}", v)?,
                None => write!(self.writer, ",")?,
            }
        }
        writeln!(self.writer)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), OutputError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Binary output format for hits.
///
/// Header (20 bytes):
/// - magic: `DAQUNPK\0` (8 bytes)
/// - version: u32
/// - hit count: u64, patched by [`finish`](Self::finish)
///
/// Each hit is written as a packed 16-byte record:
/// - event: u64
/// - family: u8
/// - valid: u8
/// - selector: u16
/// - channel: u8
/// - padding: u8
/// - value: u16
pub struct BinaryWriter<W: Write + Seek> {
    writer: BufWriter<W>,
    count: u64,
}

impl<W: Write + Seek> BinaryWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
            count: 0,
        }
    }

    /// Writes the file header with a zero hit count.
    pub fn write_header(&mut self) -> Result<(), OutputError> {
        self.writer.write_all(BINARY_MAGIC)?;
        self.writer.write_u32::<LittleEndian>(BINARY_VERSION)?;
        self.writer.write_u64::<LittleEndian>(0)?;
        Ok(())
    }

    /// Writes a batch of hits.
    pub fn write_hits<'a, I>(&mut self, hits: I) -> Result<(), OutputError>
    where
        I: IntoIterator<Item = &'a Hit>,
    {
        for hit in hits {
            self.writer.write_u64::<LittleEndian>(hit.event)?;
            self.writer.write_u8(hit.family as u8)?;
            self.writer.write_u8(u8::from(hit.valid))?;
            self.writer.write_u16::<LittleEndian>(hit.selector)?;
            self.writer.write_u8(hit.channel)?;
            self.writer.write_u8(0)?;
            self.writer.write_u16::<LittleEndian>(hit.value)?;
            self.count += 1;
        }
        Ok(())
    }

    /// Hits written so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Patches the hit count into the header and flushes.
    pub fn finish(mut self) -> Result<W, OutputError> {
        self.writer.flush()?;
        let mut inner = self
            .writer
            .into_inner()
            .map_err(|e| OutputError::Io(e.into_error()))?;
        let end = inner.stream_position()?;
        inner.seek(SeekFrom::Start(BINARY_COUNT_OFFSET))?;
        inner.write_u64::<LittleEndian>(self.count)?;
        inner.seek(SeekFrom::Start(end))?;
        inner.flush()?;
        Ok(inner)
    }
}

/// Writes hits to a CSV file.
pub fn write_csv<P: AsRef<Path>>(path: P, hits: &[Hit]) -> Result<(), OutputError> {
    let file = File::create(path)?;
    let mut writer = HitCsvWriter::new(file);
    writer.write_header()?;
    writer.write_hits(hits)?;
    writer.flush()?;
    Ok(())
}

/// Writes hits to a binary file.
pub fn write_binary<P: AsRef<Path>>(path: P, hits: &[Hit]) -> Result<(), OutputError> {
    let file = File::create(path)?;
    let mut writer = BinaryWriter::new(file);
    writer.write_header()?;
    writer.write_hits(hits)?;
    writer.finish()?;
    Ok(())
}
