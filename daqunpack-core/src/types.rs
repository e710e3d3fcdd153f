//! Core types shared by the classifier, decoder and assembler.
//!
//! A buffer is a slice of 16-bit words. Module blocks are framed in
//! word-pairs: each logical 32-bit record arrives low word first.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A raw 16-bit buffer element.
pub type Word = u16;

/// Pad value inserted between module blocks for buffer alignment.
pub const FILLER_WORD: Word = 0xFFFF;

/// Selector reported for blocks whose header could not be trusted.
///
/// No selector field is wide enough to produce this value and configuration
/// validation refuses to register it, so it never matches a real module.
pub const INVALID_SELECTOR: u16 = u16::MAX;

/// Number of channels addressable by one module.
pub const CHANNELS_PER_MODULE: usize = 32;

/// Module family sharing one header/data/trailer bit-field convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Family {
    /// Charge/peak conversion modules (ADC, and TDCs sharing the ADC format)
    Conversion = 0,
    /// Multi-hit timing modules whose word count includes the trailer
    Timing = 1,
}

impl Family {
    /// All families, in scan priority order.
    pub const ALL: [Family; 2] = [Family::Conversion, Family::Timing];

    /// Lowercase name used in configuration files and CSV output.
    pub fn name(self) -> &'static str {
        match self {
            Self::Conversion => "conversion",
            Self::Timing => "timing",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Role of a single word within a module block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordKind {
    Header,
    Data,
    Trailer,
    Unclassified,
}

/// One decoded channel entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct ChannelValue {
    /// Channel number (0-31)
    pub channel: u8,
    /// Raw converted value, masked to the family's value width
    pub value: u16,
}

impl ChannelValue {
    /// Creates a new channel entry.
    #[inline]
    pub fn new(channel: u8, value: u16) -> Self {
        Self { channel, value }
    }

    /// Zero-valued entry substituted for words that failed classification.
    pub const PLACEHOLDER: ChannelValue = ChannelValue {
        channel: 0,
        value: 0,
    };
}

/// A recoverable problem found while decoding one module block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Defect {
    /// The header's high word did not classify as a header.
    MalformedHeader { word: Word },
    /// Data pair `index` carried a high word that did not classify as data.
    MalformedData { index: usize, word: Word },
    /// The header named a module instance that is not configured.
    SelectorMismatch { selector: u16 },
    /// The block ran past the end of the buffer; `at` is the offending offset.
    Truncation { at: usize },
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedHeader { word } => {
                write!(f, "non-header word 0x{word:04x} where a header was expected")
            }
            Self::MalformedData { index, word } => {
                write!(f, "non-data word 0x{word:04x} at data pair {index}")
            }
            Self::SelectorMismatch { selector } => {
                write!(f, "unconfigured selector {selector}")
            }
            Self::Truncation { at } => write!(f, "block truncated at word {at}"),
        }
    }
}

/// One module block decoded from a buffer.
///
/// Defects never abort decoding; they are recorded here and the event is
/// considered valid only when none were found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEvent {
    /// Family whose layout decoded this block
    pub family: Family,
    /// Module address, or [`INVALID_SELECTOR`]
    pub selector: u16,
    /// Word count as declared by the header
    pub declared_count: u16,
    /// Auxiliary header field (crate number or output resolution)
    pub aux: u16,
    /// Channel entries in buffer order
    pub channels: Vec<ChannelValue>,
    /// Problems encountered, in the order they were found
    pub defects: Vec<Defect>,
}

impl DecodedEvent {
    /// Creates an empty event for `family` with the sentinel selector.
    pub fn new(family: Family) -> Self {
        Self {
            family,
            selector: INVALID_SELECTOR,
            declared_count: 0,
            aux: 0,
            channels: Vec::new(),
            defects: Vec::new(),
        }
    }

    /// Returns true when the block decoded without any defect.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.defects.is_empty()
    }

    /// Returns true when the header produced a usable selector.
    #[inline]
    pub fn has_selector(&self) -> bool {
        self.selector != INVALID_SELECTOR
    }

    /// Channel entries actually read from data words.
    ///
    /// Placeholders substituted for a malformed header or malformed data
    /// pairs are left out.
    pub fn decoded_channels(&self) -> impl Iterator<Item = &ChannelValue> + '_ {
        let header_ok = !self
            .defects
            .iter()
            .any(|d| matches!(d, Defect::MalformedHeader { .. }));
        self.channels
            .iter()
            .enumerate()
            .filter(move |&(index, _)| {
                header_ok
                    && !self
                        .defects
                        .iter()
                        .any(|d| matches!(d, Defect::MalformedData { index: i, .. } if *i == index))
            })
            .map(|(_, cv)| cv)
    }

    /// Returns true if the event was cut short by the buffer boundary.
    pub fn is_truncated(&self) -> bool {
        self.defects
            .iter()
            .any(|d| matches!(d, Defect::Truncation { .. }))
    }
}

/// A flattened `(selector, channel, value)` record handed to output sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    /// Index of the physics event this hit belongs to
    pub event: u64,
    pub family: Family,
    pub selector: u16,
    pub channel: u8,
    pub value: u16,
    /// Validity of the module block the hit came from
    pub valid: bool,
}

/// Flattens decoded blocks of one physics event into hits.
pub fn hits(event: u64, blocks: &[DecodedEvent]) -> impl Iterator<Item = Hit> + '_ {
    blocks.iter().flat_map(move |block| {
        let valid = block.is_valid();
        block.channels.iter().map(move |cv| Hit {
            event,
            family: block.family,
            selector: block.selector,
            channel: cv.channel,
            value: cv.value,
            valid,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_event_is_sentinel_and_valid() {
        let event = DecodedEvent::new(Family::Timing);
        assert_eq!(event.selector, INVALID_SELECTOR);
        assert!(!event.has_selector());
        assert!(event.is_valid());
        assert!(event.channels.is_empty());
    }

    #[test]
    fn test_defects_invalidate_event() {
        let mut event = DecodedEvent::new(Family::Conversion);
        event.defects.push(Defect::Truncation { at: 12 });
        assert!(!event.is_valid());
        assert!(event.is_truncated());
    }

    #[test]
    fn test_decoded_channels_skip_placeholders() {
        let mut event = DecodedEvent::new(Family::Conversion);
        event.selector = 5;
        event.channels = vec![
            ChannelValue::new(2, 100),
            ChannelValue::PLACEHOLDER,
            ChannelValue::new(19, 300),
        ];
        event.defects.push(Defect::MalformedData { index: 1, word: 0x2e07 });
        let kept: Vec<ChannelValue> = event.decoded_channels().copied().collect();
        assert_eq!(kept, vec![ChannelValue::new(2, 100), ChannelValue::new(19, 300)]);

        let mut bad_header = DecodedEvent::new(Family::Conversion);
        bad_header.channels.push(ChannelValue::PLACEHOLDER);
        bad_header.defects.push(Defect::MalformedHeader { word: 0x2c00 });
        assert_eq!(bad_header.decoded_channels().count(), 0);
    }

    #[test]
    fn test_hits_flatten_in_order() {
        let mut a = DecodedEvent::new(Family::Conversion);
        a.selector = 3;
        a.channels = vec![ChannelValue::new(1, 10), ChannelValue::new(2, 20)];
        let mut b = DecodedEvent::new(Family::Timing);
        b.selector = 9;
        b.channels = vec![ChannelValue::new(7, 70)];
        b.defects.push(Defect::MalformedData { index: 0, word: 0x4000 });

        let flat: Vec<Hit> = hits(4, &[a, b]).collect();
        assert_eq!(flat.len(), 3);
        assert_eq!(flat[0].selector, 3);
        assert_eq!(flat[1].channel, 2);
        assert_eq!(flat[2].family, Family::Timing);
        assert!(flat[0].valid);
        assert!(!flat[2].valid);
        assert!(flat.iter().all(|h| h.event == 4));
    }

    #[test]
    fn test_family_serde_names() {
        assert_eq!(Family::Conversion.to_string(), "conversion");
        assert_eq!(Family::Timing.name(), "timing");
    }
}
