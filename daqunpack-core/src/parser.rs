#![allow(clippy::unusual_byte_groupings)]
//! Low-level classification of raw 16-bit words.
//!
//! Every function here is a pure bit-field operation driven by a
//! [`FamilyConfig`]. Header and data pairs arrive low word first; the type
//! field lives in the high word.

use crate::config::{FamilyConfig, HeaderWord};
use crate::types::{Word, WordKind};

/// Reports the role of `word` under `config`'s type field.
#[inline]
pub fn classify(word: Word, config: &FamilyConfig) -> WordKind {
    let kind = word & config.type_mask;
    if kind == config.header_pattern {
        WordKind::Header
    } else if kind == config.data_pattern {
        WordKind::Data
    } else if kind == config.trailer_pattern {
        WordKind::Trailer
    } else {
        WordKind::Unclassified
    }
}

#[inline]
pub fn is_header(word: Word, config: &FamilyConfig) -> bool {
    classify(word, config) == WordKind::Header
}

#[inline]
fn field(word: Word, mask: Word, shift: u32) -> u16 {
    (word & mask) >> shift
}

// ============================================================================
// Header pair
// low: count (and timing resolution) | high: type, selector (and crate)
// ============================================================================

/// Extracts the declared word count from a header's low word.
#[inline]
pub fn header_count(low: Word, config: &FamilyConfig) -> u16 {
    field(low, config.count_mask, config.count_shift)
}

/// Extracts the selector (geo address / module id) from a header's high word.
#[inline]
pub fn header_selector(high: Word, config: &FamilyConfig) -> u16 {
    field(high, config.selector_mask, config.selector_shift)
}

/// Extracts the auxiliary header field from whichever word carries it.
#[inline]
pub fn header_aux(low: Word, high: Word, config: &FamilyConfig) -> u16 {
    let word = match config.aux_word {
        HeaderWord::Low => low,
        HeaderWord::High => high,
    };
    field(word, config.aux_mask, config.aux_shift)
}

// ============================================================================
// Data pair
// low: converted value | high: type, channel
// ============================================================================

/// Extracts the converted value from a data pair's low word.
#[inline]
pub fn data_value(low: Word, config: &FamilyConfig) -> u16 {
    low & config.value_mask
}

/// Extracts the channel number from a data pair's high word.
///
/// Always below 32 for a validated layout.
#[inline]
pub fn data_channel(high: Word, config: &FamilyConfig) -> u8 {
    field(high, config.channel_mask, config.channel_shift) as u8
}
