//! Family layouts and deployment configuration.
//!
//! A [`FamilyConfig`] describes where each field lives inside a module
//! family's words. Two hardware revisions disagree on the width of the type
//! mask, so the layout presets take a [`TypeMaskVariant`] and there is no
//! default: the deployment file must name the variant (or a full layout)
//! for every family it uses.

use crate::assembler::EventAssembler;
use crate::decoder::ModuleDecoder;
use crate::types::{Family, Word, CHANNELS_PER_MODULE, INVALID_SELECTOR};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Errors raised while loading or validating a deployment configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid {family} layout: {reason}")]
    InvalidLayout { family: Family, reason: String },

    #[error("Family {0} is used by a module but has no layout")]
    MissingFamily(Family),

    #[error("Duplicate module: {0}")]
    DuplicateModule(String),

    #[error("Selector {selector} does not fit the {family} selector field")]
    SelectorOutOfRange { family: Family, selector: u16 },

    #[error("Selector {selector} overlaps the {family} type field and can never match a header")]
    UnreachableSelector { family: Family, selector: u16 },
}

/// Which word of the header pair carries a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderWord {
    Low,
    High,
}

/// Width of the type field, which differs between hardware revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeMaskVariant {
    /// 0x0700 for conversion-type, 0xc000 for timing-type
    Narrow,
    /// 0x0f00 for conversion-type, 0xf000 for timing-type
    Wide,
}

/// Bit-field layout for one module family.
///
/// Type patterns apply to the high word of each pair. The count and value
/// fields come from low words, the selector and channel from high words.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FamilyConfig {
    pub type_mask: Word,
    pub header_pattern: Word,
    pub data_pattern: Word,
    pub trailer_pattern: Word,
    pub selector_mask: Word,
    pub selector_shift: u32,
    pub count_mask: Word,
    pub count_shift: u32,
    /// Words included in the declared count that are not data pairs
    pub count_baseline: u16,
    pub channel_mask: Word,
    pub channel_shift: u32,
    pub value_mask: Word,
    #[serde(default = "default_aux_word")]
    pub aux_word: HeaderWord,
    #[serde(default)]
    pub aux_mask: Word,
    #[serde(default)]
    pub aux_shift: u32,
}

fn default_aux_word() -> HeaderWord {
    HeaderWord::High
}

impl FamilyConfig {
    /// Conversion-type layout (CAEN V785/V775 style).
    ///
    /// Header: low word count @ [13:8]; high word geo @ [15:11], crate @ [7:0].
    /// Data: low word value @ [13:0]; high word channel @ [4:0].
    pub fn conversion(variant: TypeMaskVariant) -> Self {
        Self {
            type_mask: match variant {
                TypeMaskVariant::Narrow => 0x0700,
                TypeMaskVariant::Wide => 0x0f00,
            },
            header_pattern: 0x0200,
            data_pattern: 0x0000,
            trailer_pattern: 0x0400,
            selector_mask: 0xf800,
            selector_shift: 11,
            count_mask: 0x3f00,
            count_shift: 8,
            count_baseline: 0,
            channel_mask: 0x001f,
            channel_shift: 0,
            value_mask: 0x3fff,
            aux_word: HeaderWord::High,
            aux_mask: 0x00ff,
            aux_shift: 0,
        }
    }

    /// Timing-type layout (Mesytec MTDC style).
    ///
    /// Header: low word resolution @ [15:12], count @ [9:0]; high word id @ [7:0].
    /// Data: low word value @ [15:0]; high word channel @ [4:0].
    /// The declared count includes the trailer.
    pub fn timing(variant: TypeMaskVariant) -> Self {
        Self {
            type_mask: match variant {
                TypeMaskVariant::Narrow => 0xc000,
                TypeMaskVariant::Wide => 0xf000,
            },
            header_pattern: 0x4000,
            data_pattern: 0x0000,
            trailer_pattern: 0xc000,
            selector_mask: 0x00ff,
            selector_shift: 0,
            count_mask: 0x03ff,
            count_shift: 0,
            count_baseline: 1,
            channel_mask: 0x001f,
            channel_shift: 0,
            value_mask: 0xffff,
            aux_word: HeaderWord::Low,
            aux_mask: 0xf000,
            aux_shift: 12,
        }
    }

    /// Preset layout for `family`.
    pub fn preset(family: Family, variant: TypeMaskVariant) -> Self {
        match family {
            Family::Conversion => Self::conversion(variant),
            Family::Timing => Self::timing(variant),
        }
    }

    /// Largest selector the selector field can encode.
    pub fn max_selector(&self) -> u16 {
        self.selector_mask.checked_shr(self.selector_shift).unwrap_or(0)
    }

    /// Returns true if a header high word can carry `selector` and still
    /// classify as a header.
    pub fn header_carries(&self, selector: u16) -> bool {
        let bits = selector.checked_shl(self.selector_shift).unwrap_or(0) & self.selector_mask;
        (bits | self.header_pattern) & self.type_mask == self.header_pattern
    }

    /// Checks that `selector` can be configured for a module of this layout.
    pub fn check_selector(&self, family: Family, selector: u16) -> Result<(), ConfigError> {
        if selector > self.max_selector() || selector == INVALID_SELECTOR {
            return Err(ConfigError::SelectorOutOfRange { family, selector });
        }
        if !self.header_carries(selector) {
            return Err(ConfigError::UnreachableSelector { family, selector });
        }
        Ok(())
    }

    /// Checks the layout for contradictions.
    pub fn validate(&self, family: Family) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidLayout { family, reason };

        for (name, shift) in [
            ("selector_shift", self.selector_shift),
            ("count_shift", self.count_shift),
            ("channel_shift", self.channel_shift),
            ("aux_shift", self.aux_shift),
        ] {
            if shift >= Word::BITS {
                return Err(invalid(format!("{name} {shift} exceeds word width")));
            }
        }

        if self.type_mask == 0 {
            return Err(invalid("type_mask is zero".to_string()));
        }
        for (name, pattern) in [
            ("header_pattern", self.header_pattern),
            ("data_pattern", self.data_pattern),
            ("trailer_pattern", self.trailer_pattern),
        ] {
            if pattern & !self.type_mask != 0 {
                return Err(invalid(format!(
                    "{name} 0x{pattern:04x} has bits outside type_mask 0x{:04x}",
                    self.type_mask
                )));
            }
        }
        if self.header_pattern == self.data_pattern
            || self.header_pattern == self.trailer_pattern
            || self.data_pattern == self.trailer_pattern
        {
            return Err(invalid("type patterns are not distinct".to_string()));
        }

        // The filler word must never look like a header.
        if crate::types::FILLER_WORD & self.type_mask == self.header_pattern {
            return Err(invalid("filler word classifies as a header".to_string()));
        }

        let max_channel = self.channel_mask >> self.channel_shift;
        if max_channel as usize >= CHANNELS_PER_MODULE {
            return Err(invalid(format!(
                "channel field can encode {max_channel}, beyond {} channels",
                CHANNELS_PER_MODULE
            )));
        }

        if self.max_selector() == INVALID_SELECTOR {
            return Err(invalid(
                "selector field can produce the reserved invalid selector".to_string(),
            ));
        }
        if self.count_mask == 0 {
            return Err(invalid("count_mask is zero".to_string()));
        }

        Ok(())
    }
}

/// Layout section for one family: either a preset variant or an explicit layout.
#[derive(Debug, Clone, Deserialize)]
pub struct FamilySection {
    pub variant: Option<TypeMaskVariant>,
    pub layout: Option<FamilyConfig>,
}

impl FamilySection {
    /// Resolves the section to a concrete layout. An explicit layout wins.
    pub fn resolve(&self, family: Family) -> Result<FamilyConfig, ConfigError> {
        match (&self.layout, self.variant) {
            (Some(layout), _) => Ok(layout.clone()),
            (None, Some(variant)) => Ok(FamilyConfig::preset(family, variant)),
            (None, None) => Err(ConfigError::InvalidLayout {
                family,
                reason: "section needs either `variant` or `layout`".to_string(),
            }),
        }
    }
}

/// One physical module instance in the deployment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModuleSpec {
    /// Name used for output columns, e.g. "adc1"
    pub name: String,
    pub family: Family,
    /// Geographic address or module id
    pub selector: u16,
}

/// Layout sections keyed by family name.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FamilySections {
    pub conversion: Option<FamilySection>,
    pub timing: Option<FamilySection>,
}

impl FamilySections {
    /// Section for `family`, if the deployment uses it.
    pub fn get(&self, family: Family) -> Option<&FamilySection> {
        match family {
            Family::Conversion => self.conversion.as_ref(),
            Family::Timing => self.timing.as_ref(),
        }
    }
}

/// A complete deployment: family layouts plus the modules present.
#[derive(Debug, Clone, Deserialize)]
pub struct UnpackConfig {
    #[serde(default)]
    pub families: FamilySections,
    #[serde(default)]
    pub modules: Vec<ModuleSpec>,
}

impl UnpackConfig {
    /// Parses and validates a TOML deployment description.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: UnpackConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML deployment file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "loading unpack configuration");
        Self::from_toml_str(&text)
    }

    /// Checks layouts and module table for consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut layouts = BTreeMap::new();
        for family in Family::ALL {
            let Some(section) = self.families.get(family) else {
                continue;
            };
            let layout = section.resolve(family)?;
            layout.validate(family)?;
            layouts.insert(family, layout);
        }

        let mut names = HashSet::new();
        let mut addresses = HashSet::new();
        for module in &self.modules {
            let layout = layouts
                .get(&module.family)
                .ok_or(ConfigError::MissingFamily(module.family))?;
            layout.check_selector(module.family, module.selector)?;
            if !names.insert(module.name.as_str()) {
                return Err(ConfigError::DuplicateModule(module.name.clone()));
            }
            if !addresses.insert((module.family, module.selector)) {
                return Err(ConfigError::DuplicateModule(format!(
                    "{} selector {}",
                    module.family, module.selector
                )));
            }
        }
        Ok(())
    }

    /// Valid selectors per family, derived from the module table.
    pub fn selectors(&self, family: Family) -> BTreeSet<u16> {
        self.modules
            .iter()
            .filter(|m| m.family == family)
            .map(|m| m.selector)
            .collect()
    }

    /// Name of the module at `(family, selector)`, if configured.
    pub fn module_name(&self, family: Family, selector: u16) -> Option<&str> {
        self.modules
            .iter()
            .find(|m| m.family == family && m.selector == selector)
            .map(|m| m.name.as_str())
    }

    /// Builds an assembler with one decoder per configured family.
    ///
    /// Families are tried in [`Family::ALL`] order.
    pub fn build_assembler(&self) -> Result<EventAssembler, ConfigError> {
        let mut decoders = Vec::new();
        for family in Family::ALL {
            let Some(section) = self.families.get(family) else {
                continue;
            };
            let layout = section.resolve(family)?;
            decoders.push(ModuleDecoder::new(family, layout, self.selectors(family))?);
        }
        Ok(EventAssembler::new(decoders))
    }
}
