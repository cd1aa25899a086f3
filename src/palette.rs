use crate::error::{BuildWarning, RangePlateError};
use crate::types::Color;
use rangeplate_tables::{PaletteDef, PaletteKey};
use std::collections::BTreeMap;

/// Every color role a figure uses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Palette {
    pub land: Color,
    pub border: Color,
    pub range: Color,
    pub stroke: Color,
    pub focus_text: Color,
    pub context_text: Color,
    pub species_text: Color,
    pub ocean: Color,
}

impl Palette {
    fn from_def(def: &PaletteDef) -> Result<Self, RangePlateError> {
        let parse = |role: &str, hex: &str| {
            Color::from_hex(hex).ok_or_else(|| {
                RangePlateError::InvalidConfiguration(format!(
                    "palette '{}' role '{}' has invalid color '{}'",
                    def.key.as_str(),
                    role,
                    hex
                ))
            })
        };
        Ok(Self {
            land: parse("land", def.land)?,
            border: parse("border", def.border)?,
            range: parse("range", def.range)?,
            stroke: parse("stroke", def.stroke)?,
            focus_text: parse("focus_text", def.focus_text)?,
            context_text: parse("context_text", def.context_text)?,
            species_text: parse("species_text", def.species_text)?,
            ocean: parse("ocean", def.ocean)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPalette {
    pub key: PaletteKey,
    pub palette: Palette,
    pub warning: Option<BuildWarning>,
}

#[derive(Debug, Clone)]
pub struct PaletteResolver {
    palettes: BTreeMap<PaletteKey, Palette>,
    fallback: PaletteKey,
    fallback_palette: Palette,
}

impl PaletteResolver {
    /// Parses every table row up front so lookups during a build cannot fail.
    pub fn new(defs: &[PaletteDef], fallback: PaletteKey) -> Result<Self, RangePlateError> {
        let mut palettes = BTreeMap::new();
        for def in defs {
            palettes.insert(def.key, Palette::from_def(def)?);
        }
        let Some(fallback_palette) = palettes.get(&fallback).copied() else {
            return Err(RangePlateError::InvalidConfiguration(format!(
                "fallback palette '{}' is not in the palette table",
                fallback.as_str()
            )));
        };
        Ok(Self {
            palettes,
            fallback,
            fallback_palette,
        })
    }

    pub fn with_defaults() -> Result<Self, RangePlateError> {
        Self::new(
            rangeplate_tables::palette_defs_v1(),
            rangeplate_tables::DEFAULT_PALETTE,
        )
    }

    pub fn fallback_key(&self) -> PaletteKey {
        self.fallback
    }

    pub fn get(&self, key: PaletteKey) -> Option<&Palette> {
        self.palettes.get(&key)
    }

    /// Unknown or unlisted keys resolve to the fallback palette with a warning attached.
    pub fn resolve(&self, requested: &str) -> ResolvedPalette {
        if let Some(key) = PaletteKey::parse(requested) {
            if let Some(palette) = self.palettes.get(&key) {
                return ResolvedPalette {
                    key,
                    palette: *palette,
                    warning: None,
                };
            }
        }
        ResolvedPalette {
            key: self.fallback,
            palette: self.fallback_palette,
            warning: Some(BuildWarning::UnknownPalette {
                requested: requested.to_string(),
                fallback: self.fallback.as_str().to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_keys_resolve_without_warning() {
        let resolver = PaletteResolver::with_defaults().unwrap();
        for key in PaletteKey::ALL {
            let resolved = resolver.resolve(key.as_str());
            assert_eq!(resolved.key, key);
            assert!(resolved.warning.is_none());
        }
        let desert = resolver.resolve("Desert");
        assert_eq!(desert.key, PaletteKey::Desert);
        assert_eq!(desert.palette.range.to_rgba8(), [0xc8, 0x55, 0x3d, 255]);
    }

    #[test]
    fn unknown_key_falls_back_to_jungle_with_warning() {
        let resolver = PaletteResolver::with_defaults().unwrap();
        let resolved = resolver.resolve("nonexistent");
        assert_eq!(resolved.key, PaletteKey::Jungle);
        assert_eq!(
            Some(&resolved.palette),
            resolver.get(PaletteKey::Jungle)
        );
        assert_eq!(
            resolved.warning,
            Some(BuildWarning::UnknownPalette {
                requested: "nonexistent".into(),
                fallback: "jungle".into(),
            })
        );
    }

    #[test]
    fn key_missing_from_injected_table_falls_back() {
        let defs = [*rangeplate_tables::palette_def(PaletteKey::Ocean)];
        let resolver = PaletteResolver::new(&defs, PaletteKey::Ocean).unwrap();
        let resolved = resolver.resolve("desert");
        assert_eq!(resolved.key, PaletteKey::Ocean);
        assert!(resolved.warning.is_some());
    }

    #[test]
    fn fallback_must_exist_in_table() {
        let defs = [*rangeplate_tables::palette_def(PaletteKey::Ocean)];
        let err = PaletteResolver::new(&defs, PaletteKey::Jungle).unwrap_err();
        assert!(matches!(err, RangePlateError::InvalidConfiguration(_)));
    }
}
