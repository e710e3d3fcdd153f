//! Single-block decoder.
//!
//! A module block is one header pair, `declared_count - count_baseline` data
//! pairs and one trailer pair. [`ModuleDecoder::decode`] consumes exactly
//! one block starting at a cursor and always returns a strictly advanced
//! cursor, recording any problem as a [`Defect`] instead of failing.

use crate::config::{ConfigError, FamilyConfig};
use crate::parser;
use crate::types::{ChannelValue, DecodedEvent, Defect, Family, Word, WordKind, INVALID_SELECTOR};
use std::collections::BTreeSet;
use tracing::trace;

/// Decoder for one module family with its set of valid selectors.
#[derive(Debug, Clone)]
pub struct ModuleDecoder {
    family: Family,
    config: FamilyConfig,
    selectors: BTreeSet<u16>,
}

/// Reads the word-pair at `at`, or `None` if it would cross the end.
#[inline]
fn read_pair(words: &[Word], at: usize) -> Option<(Word, Word)> {
    match words.get(at..at.checked_add(2)?) {
        Some(&[low, high]) => Some((low, high)),
        _ => None,
    }
}

impl ModuleDecoder {
    /// Creates a decoder after validating the layout and selectors.
    pub fn new(
        family: Family,
        config: FamilyConfig,
        selectors: impl IntoIterator<Item = u16>,
    ) -> Result<Self, ConfigError> {
        config.validate(family)?;
        let selectors: BTreeSet<u16> = selectors.into_iter().collect();
        for &selector in &selectors {
            config.check_selector(family, selector)?;
        }
        Ok(Self {
            family,
            config,
            selectors,
        })
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn config(&self) -> &FamilyConfig {
        &self.config
    }

    pub fn selectors(&self) -> &BTreeSet<u16> {
        &self.selectors
    }

    /// Returns true if `word` is a header high word for this family.
    #[inline]
    pub fn is_header(&self, word: Word) -> bool {
        parser::is_header(word, &self.config)
    }

    /// Decodes the block whose header pair starts at `cursor`.
    ///
    /// Returns the cursor just past the trailer, or `words.len()` if the
    /// block runs off the end of the buffer.
    pub fn decode(&self, words: &[Word], cursor: usize) -> (usize, DecodedEvent) {
        let end = words.len();
        let mut event = DecodedEvent::new(self.family);

        // Header
        let Some((low, high)) = read_pair(words, cursor) else {
            event.defects.push(Defect::Truncation { at: cursor });
            return (end, event);
        };
        if parser::classify(high, &self.config) == WordKind::Header {
            event.selector = parser::header_selector(high, &self.config);
            event.declared_count = parser::header_count(low, &self.config);
            event.aux = parser::header_aux(low, high, &self.config);
        } else {
            event.defects.push(Defect::MalformedHeader { word: high });
            event.channels.push(ChannelValue::PLACEHOLDER);
        }
        let mut cursor = cursor + 2;

        let data_pairs = event
            .declared_count
            .saturating_sub(self.config.count_baseline) as usize;

        if !self.selectors.contains(&event.selector) {
            if event.has_selector() {
                trace!(
                    family = %self.family,
                    selector = event.selector,
                    cursor,
                    "skipping block of unconfigured module"
                );
                event.defects.push(Defect::SelectorMismatch {
                    selector: event.selector,
                });
                event.selector = INVALID_SELECTOR;
            }
            // Skip the data unread.
            cursor += 2 * data_pairs;
            if cursor > end {
                event.defects.push(Defect::Truncation { at: end });
                return (end, event);
            }
        } else {
            event.channels.reserve(data_pairs);
            for index in 0..data_pairs {
                let Some((low, high)) = read_pair(words, cursor) else {
                    event.defects.push(Defect::Truncation { at: cursor });
                    return (end, event);
                };
                if parser::classify(high, &self.config) == WordKind::Data {
                    event.channels.push(ChannelValue::new(
                        parser::data_channel(high, &self.config),
                        parser::data_value(low, &self.config),
                    ));
                } else {
                    event.defects.push(Defect::MalformedData { index, word: high });
                    event.channels.push(ChannelValue::PLACEHOLDER);
                }
                cursor += 2;
            }
        }

        // Trailer: consumed without rejecting the block.
        let Some((_, high)) = read_pair(words, cursor) else {
            event.defects.push(Defect::Truncation { at: cursor });
            return (end, event);
        };
        if parser::classify(high, &self.config) != WordKind::Trailer {
            trace!(
                family = %self.family,
                selector = event.selector,
                word = high,
                "tolerating non-trailer word at end of block"
            );
        }

        (cursor + 2, event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TypeMaskVariant;

    fn conversion_block(selector: u16, data: &[(u8, u16)]) -> Vec<Word> {
        let geo = selector << 11;
        let mut words = vec![(data.len() as u16) << 8, geo | 0x0200];
        for &(channel, value) in data {
            words.push(value);
            words.push(geo | channel as u16);
        }
        words.extend_from_slice(&[0x0001, geo | 0x0400]);
        words
    }

    fn timing_block(id: u16, data: &[(u8, u16)]) -> Vec<Word> {
        let mut words = vec![data.len() as u16 + 1, 0x4000 | id];
        for &(channel, value) in data {
            words.push(value);
            words.push(0x0400 | channel as u16);
        }
        words.extend_from_slice(&[0x1234, 0xc000]);
        words
    }

    fn adc(selectors: &[u16]) -> ModuleDecoder {
        ModuleDecoder::new(
            Family::Conversion,
            FamilyConfig::conversion(TypeMaskVariant::Narrow),
            selectors.iter().copied(),
        )
        .unwrap()
    }

    fn mtdc(selectors: &[u16]) -> ModuleDecoder {
        ModuleDecoder::new(
            Family::Timing,
            FamilyConfig::timing(TypeMaskVariant::Wide),
            selectors.iter().copied(),
        )
        .unwrap()
    }

    #[test]
    fn test_decode_conversion_block() {
        let words = conversion_block(5, &[(2, 100), (7, 200), (19, 16383)]);
        let (cursor, event) = adc(&[5]).decode(&words, 0);

        assert_eq!(cursor, 10);
        assert!(event.is_valid());
        assert_eq!(event.selector, 5);
        assert_eq!(event.declared_count, 3);
        assert_eq!(
            event.channels,
            vec![
                ChannelValue::new(2, 100),
                ChannelValue::new(7, 200),
                ChannelValue::new(19, 16383),
            ]
        );
    }

    #[test]
    fn test_decode_timing_block_count_includes_trailer() {
        let words = timing_block(9, &[(1, 40000), (2, 41000)]);
        let (cursor, event) = mtdc(&[9]).decode(&words, 0);

        assert_eq!(cursor, words.len());
        assert!(event.is_valid());
        assert_eq!(event.declared_count, 3);
        assert_eq!(
            event.channels,
            vec![ChannelValue::new(1, 40000), ChannelValue::new(2, 41000)]
        );
    }

    #[test]
    fn test_decode_from_offset() {
        let mut words = vec![0xFFFF, 0xFFFF];
        words.extend(conversion_block(3, &[(0, 1)]));
        let (cursor, event) = adc(&[3]).decode(&words, 2);
        assert_eq!(cursor, 8);
        assert_eq!(event.channels, vec![ChannelValue::new(0, 1)]);
    }

    #[test]
    fn test_selector_mismatch_skips_full_block() {
        let words = conversion_block(9, &[(2, 100), (7, 200), (19, 16383)]);
        let (cursor, event) = adc(&[5]).decode(&words, 0);

        assert_eq!(cursor, 10);
        assert!(!event.is_valid());
        assert_eq!(event.selector, INVALID_SELECTOR);
        assert!(!event.has_selector());
        assert!(event.channels.is_empty());
        assert_eq!(event.defects, vec![Defect::SelectorMismatch { selector: 9 }]);
    }

    #[test]
    fn test_malformed_header_placeholder() {
        // high word type=100 (trailer) where a header is expected
        let words = vec![0x0300, 0x2C00, 0x0000, 0x2C00];
        let (cursor, event) = adc(&[5]).decode(&words, 0);

        assert_eq!(cursor, 4);
        assert_eq!(event.selector, INVALID_SELECTOR);
        assert_eq!(event.declared_count, 0);
        assert_eq!(event.channels, vec![ChannelValue::PLACEHOLDER]);
        assert_eq!(event.defects, vec![Defect::MalformedHeader { word: 0x2C00 }]);
    }

    #[test]
    fn test_malformed_header_timing_does_not_underflow() {
        let words = vec![0x0000, 0x0000, 0x0000, 0xc000];
        let (cursor, event) = mtdc(&[9]).decode(&words, 0);
        assert_eq!(cursor, 4);
        assert!(!event.is_valid());
        assert_eq!(event.channels.len(), 1);
    }

    #[test]
    fn test_malformed_data_placeholder_continues() {
        let mut words = conversion_block(5, &[(2, 100), (7, 200), (19, 300)]);
        // corrupt the second data pair's type field (110)
        words[5] = (5 << 11) | 0x0600 | 7;
        let (cursor, event) = adc(&[5]).decode(&words, 0);

        assert_eq!(cursor, 10);
        assert_eq!(
            event.channels,
            vec![
                ChannelValue::new(2, 100),
                ChannelValue::PLACEHOLDER,
                ChannelValue::new(19, 300),
            ]
        );
        assert_eq!(
            event.defects,
            vec![Defect::MalformedData {
                index: 1,
                word: words[5]
            }]
        );
    }

    #[test]
    fn test_bad_trailer_is_tolerated() {
        let mut words = conversion_block(5, &[(4, 44)]);
        let last = words.len() - 1;
        words[last] = 0x1234;
        let (cursor, event) = adc(&[5]).decode(&words, 0);
        assert_eq!(cursor, words.len());
        assert!(event.is_valid());
    }

    #[test]
    fn test_truncated_data() {
        // declares five data pairs but only two follow
        let mut words = vec![5 << 8, (5 << 11) | 0x0200];
        words.extend_from_slice(&[10, (5 << 11) | 1, 20, (5 << 11) | 2]);
        let (cursor, event) = adc(&[5]).decode(&words, 0);

        assert_eq!(cursor, words.len());
        assert!(event.is_truncated());
        assert_eq!(
            event.channels,
            vec![ChannelValue::new(1, 10), ChannelValue::new(2, 20)]
        );
    }

    #[test]
    fn test_truncated_odd_word() {
        let mut words = vec![1 << 8, (5 << 11) | 0x0200, 10];
        let (cursor, event) = adc(&[5]).decode(&words, 0);
        assert_eq!(cursor, 3);
        assert!(event.is_truncated());
        assert!(event.channels.is_empty());

        words.truncate(1);
        let (cursor, event) = adc(&[5]).decode(&words, 0);
        assert_eq!(cursor, 1);
        assert_eq!(event.defects, vec![Defect::Truncation { at: 0 }]);
    }

    #[test]
    fn test_truncated_skip() {
        let words = conversion_block(9, &[(1, 1), (2, 2)]);
        let (cursor, event) = adc(&[5]).decode(&words[..5], 0);
        assert_eq!(cursor, 5);
        assert!(event.is_truncated());
        assert!(event.channels.is_empty());
    }

    #[test]
    fn test_truncated_trailer() {
        let words = conversion_block(5, &[(1, 1)]);
        let (cursor, event) = adc(&[5]).decode(&words[..5], 0);
        assert_eq!(cursor, 5);
        assert!(event.is_truncated());
        assert_eq!(event.channels, vec![ChannelValue::new(1, 1)]);
    }

    #[test]
    fn test_decode_conversion_wide_variant() {
        let decoder = ModuleDecoder::new(
            Family::Conversion,
            FamilyConfig::conversion(TypeMaskVariant::Wide),
            [4, 6],
        )
        .unwrap();
        let words = conversion_block(6, &[(0, 7), (31, 16383)]);
        let (cursor, event) = decoder.decode(&words, 0);

        assert_eq!(cursor, words.len());
        assert!(event.is_valid());
        assert_eq!(event.selector, 6);
        assert_eq!(
            event.channels,
            vec![ChannelValue::new(0, 7), ChannelValue::new(31, 16383)]
        );
    }

    #[test]
    fn test_decode_timing_narrow_variant_with_error_bits() {
        let decoder = ModuleDecoder::new(
            Family::Timing,
            FamilyConfig::timing(TypeMaskVariant::Narrow),
            [9],
        )
        .unwrap();
        let mut words = timing_block(9, &[(3, 1234), (17, 65535)]);
        // readout error flags in bits 13:12 of the header high word
        words[1] |= 0x3000;
        let (cursor, event) = decoder.decode(&words, 0);

        assert_eq!(cursor, words.len());
        assert!(event.is_valid());
        assert_eq!(event.selector, 9);
        assert_eq!(event.declared_count, 3);
        assert_eq!(
            event.channels,
            vec![ChannelValue::new(3, 1234), ChannelValue::new(17, 65535)]
        );
    }

    #[test]
    fn test_rejects_selector_the_header_cannot_carry() {
        // bit 11 is both the geo LSB and part of the wide type mask
        let result = ModuleDecoder::new(
            Family::Conversion,
            FamilyConfig::conversion(TypeMaskVariant::Wide),
            [4, 5],
        );
        assert!(matches!(
            result,
            Err(ConfigError::UnreachableSelector { selector: 5, .. })
        ));
    }

    #[test]
    fn test_rejects_out_of_range_selector() {
        let result = ModuleDecoder::new(
            Family::Conversion,
            FamilyConfig::conversion(TypeMaskVariant::Narrow),
            [3, 40],
        );
        assert!(matches!(
            result,
            Err(ConfigError::SelectorOutOfRange { selector: 40, .. })
        ));
    }
}
