//! NSCLDAQ ring-item reader.
//!
//! Run files are a sequence of little-endian ring items:
//!
//! ```text
//! u32 size              (inclusive of this field)
//! u32 type              (1 = begin run, 30 = physics event, ...)
//! u32 body_header_size  (0 or 4 when no body header is present)
//! ...body header...
//! ...body...
//! ```
//!
//! A physics body starts with a `u16` word count followed by that many
//! 16-bit words of module data, which is the buffer handed to
//! [`EventAssembler::scan`](crate::assembler::EventAssembler::scan).

use crate::types::Word;
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

/// Size of the `size` + `type` prefix.
const ITEM_HEADER_BYTES: usize = 8;

/// Smallest body header size field that still counts as "no body header".
const EMPTY_BODY_HEADER: usize = 4;

/// Items larger than this are treated as corrupt framing.
const MAX_ITEM_BYTES: usize = 64 * 1024 * 1024;

/// Errors that can occur while reading ring items.
#[derive(Error, Debug)]
pub enum RingError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Ring item truncated: expected {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    #[error("Invalid ring item size: {0}")]
    InvalidSize(u32),

    #[error("Odd byte count {0}: module data is made of 16-bit words")]
    OddByteCount(usize),
}

/// Ring item types of interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingItemType {
    BeginRun,
    EndRun,
    PauseRun,
    ResumeRun,
    PhysicsEvent,
    Other(u32),
}

impl RingItemType {
    pub fn from_u32(value: u32) -> Self {
        match value {
            1 => Self::BeginRun,
            2 => Self::EndRun,
            3 => Self::PauseRun,
            4 => Self::ResumeRun,
            30 => Self::PhysicsEvent,
            other => Self::Other(other),
        }
    }

    /// Returns true for begin/end/pause/resume items.
    pub fn is_state_change(self) -> bool {
        matches!(
            self,
            Self::BeginRun | Self::EndRun | Self::PauseRun | Self::ResumeRun
        )
    }
}

/// One ring item with its body header stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingItem {
    pub item_type: RingItemType,
    /// Raw body header, empty when absent
    pub body_header: Vec<u8>,
    pub body: Vec<u8>,
}

impl RingItem {
    /// Module data words of a physics event.
    ///
    /// Returns `None` for other item types. A word count larger than the
    /// body is clamped to the words actually present.
    pub fn physics_words(&self) -> Option<Vec<Word>> {
        if self.item_type != RingItemType::PhysicsEvent {
            return None;
        }
        if self.body.len() < 2 {
            return Some(Vec::new());
        }
        let declared = LittleEndian::read_u16(&self.body[..2]) as usize;
        let available = (self.body.len() - 2) / 2;
        if declared > available {
            warn!(declared, available, "physics event word count exceeds ring item");
        }
        let count = declared.min(available);
        let mut words = vec![0u16; count];
        LittleEndian::read_u16_into(&self.body[2..2 + 2 * count], &mut words);
        Some(words)
    }

    /// Run number of a state-change item.
    pub fn run_number(&self) -> Option<u32> {
        if !self.item_type.is_state_change() || self.body.len() < 4 {
            return None;
        }
        Some(LittleEndian::read_u32(&self.body[..4]))
    }
}

/// Iterator over the ring items of a run file or stream.
pub struct RingReader<R: Read> {
    reader: R,
    items_read: u64,
}

impl RingReader<BufReader<File>> {
    /// Opens a run file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RingError> {
        let file = File::open(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "opened run file");
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: Read> RingReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            items_read: 0,
        }
    }

    /// Number of items returned so far.
    pub fn items_read(&self) -> u64 {
        self.items_read
    }

    /// Reads the next item, or `None` at a clean end of stream.
    pub fn read_item(&mut self) -> Result<Option<RingItem>, RingError> {
        let mut prefix = [0u8; ITEM_HEADER_BYTES];
        let got = read_full(&mut self.reader, &mut prefix)?;
        if got == 0 {
            return Ok(None);
        }
        if got < ITEM_HEADER_BYTES {
            return Err(RingError::Truncated {
                expected: ITEM_HEADER_BYTES,
                got,
            });
        }

        let mut cursor = &prefix[..];
        let size = cursor.read_u32::<LittleEndian>()?;
        let item_type = RingItemType::from_u32(cursor.read_u32::<LittleEndian>()?);
        let size_bytes = size as usize;
        if size_bytes < ITEM_HEADER_BYTES || size_bytes > MAX_ITEM_BYTES {
            return Err(RingError::InvalidSize(size));
        }

        let mut rest = vec![0u8; size_bytes - ITEM_HEADER_BYTES];
        let got = read_full(&mut self.reader, &mut rest)?;
        if got < rest.len() {
            return Err(RingError::Truncated {
                expected: size_bytes,
                got: ITEM_HEADER_BYTES + got,
            });
        }
        self.items_read += 1;

        Ok(Some(split_body(item_type, rest)))
    }
}

impl<R: Read> Iterator for RingReader<R> {
    type Item = Result<RingItem, RingError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_item().transpose()
    }
}

/// Separates the body header from the body proper.
fn split_body(item_type: RingItemType, mut rest: Vec<u8>) -> RingItem {
    if rest.len() < 4 {
        // Items too short to carry a body header size are kept whole.
        return RingItem {
            item_type,
            body_header: Vec::new(),
            body: rest,
        };
    }
    let header_size = LittleEndian::read_u32(&rest[..4]) as usize;
    let header_end = if header_size <= EMPTY_BODY_HEADER {
        EMPTY_BODY_HEADER
    } else if header_size > rest.len() {
        warn!(
            header_size,
            item_bytes = rest.len(),
            "body header larger than ring item, ignoring it"
        );
        EMPTY_BODY_HEADER
    } else {
        header_size
    };

    let body = rest.split_off(header_end);
    rest.drain(..EMPTY_BODY_HEADER);
    RingItem {
        item_type,
        body_header: rest,
        body,
    }
}

/// Converts a raw little-endian payload (no ring framing, no word count)
/// into words.
pub fn words_from_le_bytes(bytes: &[u8]) -> Result<Vec<Word>, RingError> {
    if bytes.len() % 2 != 0 {
        return Err(RingError::OddByteCount(bytes.len()));
    }
    let mut words = vec![0u16; bytes.len() / 2];
    LittleEndian::read_u16_into(bytes, &mut words);
    Ok(words)
}

/// Fills `buf` as far as the stream allows, returning the bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
