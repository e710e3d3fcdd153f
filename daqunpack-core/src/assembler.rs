//! Resynchronizing buffer scanner.
//!
//! The assembler walks one physics-event buffer with a single forward
//! cursor. Modules may appear in any order with any amount of filler between
//! them; a block start is recognised by its header high word, and anything
//! that is neither filler nor a block start is stepped over one word at a
//! time.

use crate::decoder::ModuleDecoder;
use crate::types::{DecodedEvent, Family, Word, FILLER_WORD};
use tracing::debug;

/// Scans buffers for blocks of any configured family.
#[derive(Debug, Clone, Default)]
pub struct EventAssembler {
    decoders: Vec<ModuleDecoder>,
}

impl EventAssembler {
    /// Creates an assembler. Decoders are tried in the order given.
    pub fn new(decoders: Vec<ModuleDecoder>) -> Self {
        Self { decoders }
    }

    /// Families this assembler recognises, in priority order.
    pub fn families(&self) -> Vec<Family> {
        self.decoders.iter().map(ModuleDecoder::family).collect()
    }

    pub fn decoders(&self) -> &[ModuleDecoder] {
        &self.decoders
    }

    /// Decoder whose family claims the pair starting at `cursor`.
    #[inline]
    fn block_start(&self, words: &[Word], cursor: usize) -> Option<&ModuleDecoder> {
        if words[cursor] == FILLER_WORD {
            return None;
        }
        let high = *words.get(cursor + 1)?;
        if high == FILLER_WORD {
            return None;
        }
        self.decoders.iter().find(|d| d.is_header(high))
    }

    /// Decodes every module block in `words`, in buffer order.
    pub fn scan(&self, words: &[Word]) -> Vec<DecodedEvent> {
        let mut events = Vec::new();
        self.scan_into(words, &mut events);
        events
    }

    /// Like [`scan`](Self::scan), appending to a caller-owned vector.
    pub fn scan_into(&self, words: &[Word], events: &mut Vec<DecodedEvent>) {
        let end = words.len();
        let mut cursor = 0;
        let mut skipped = 0usize;
        let first = events.len();

        while cursor < end {
            match self.block_start(words, cursor) {
                Some(decoder) => {
                    let (next, event) = decoder.decode(words, cursor);
                    debug_assert!(next > cursor && next <= end);
                    cursor = next.clamp(cursor + 1, end);
                    events.push(event);
                }
                None => {
                    cursor += 1;
                    skipped += 1;
                }
            }
        }

        debug!(
            words = end,
            blocks = events.len() - first,
            skipped,
            "scanned buffer"
        );
    }

    /// Scans independent buffers, one result per buffer.
    #[cfg(not(feature = "parallel"))]
    pub fn scan_many<B: AsRef<[Word]>>(&self, buffers: &[B]) -> Vec<Vec<DecodedEvent>> {
        buffers.iter().map(|b| self.scan(b.as_ref())).collect()
    }

    /// Scans independent buffers in parallel, one result per buffer.
    #[cfg(feature = "parallel")]
    pub fn scan_many<B: AsRef<[Word]> + Sync>(&self, buffers: &[B]) -> Vec<Vec<DecodedEvent>> {
        use rayon::prelude::*;
        buffers.par_iter().map(|b| self.scan(b.as_ref())).collect()
    }
}
