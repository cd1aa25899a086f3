use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

pub const TABLES_ID: &str = "rangeplate.tables";
pub const TABLES_VERSION: &str = "1";

/// Closed set of palette names. Adding a palette means adding a variant here and a row in
/// `PALETTES_V1`; `palette_def` is an exhaustive match so the two cannot drift apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PaletteKey {
    Desert,
    Savanna,
    Jungle,
    Forest,
    Mountain,
    Ocean,
}

impl PaletteKey {
    pub const ALL: [PaletteKey; 6] = [
        PaletteKey::Desert,
        PaletteKey::Savanna,
        PaletteKey::Jungle,
        PaletteKey::Forest,
        PaletteKey::Mountain,
        PaletteKey::Ocean,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaletteKey::Desert => "desert",
            PaletteKey::Savanna => "savanna",
            PaletteKey::Jungle => "jungle",
            PaletteKey::Forest => "forest",
            PaletteKey::Mountain => "mountain",
            PaletteKey::Ocean => "ocean",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "desert" => Some(PaletteKey::Desert),
            "savanna" => Some(PaletteKey::Savanna),
            "jungle" => Some(PaletteKey::Jungle),
            "forest" => Some(PaletteKey::Forest),
            "mountain" => Some(PaletteKey::Mountain),
            "ocean" => Some(PaletteKey::Ocean),
            _ => None,
        }
    }
}

pub const DEFAULT_PALETTE: PaletteKey = PaletteKey::Jungle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Region {
    Asia,
    Africa,
    NorthAmerica,
    SouthAmerica,
    Europe,
    Oceania,
    World,
}

impl Region {
    pub const ALL: [Region; 7] = [
        Region::Asia,
        Region::Africa,
        Region::NorthAmerica,
        Region::SouthAmerica,
        Region::Europe,
        Region::Oceania,
        Region::World,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Region::Asia => "ASIA",
            Region::Africa => "AFRICA",
            Region::NorthAmerica => "NORTH_AMERICA",
            Region::SouthAmerica => "SOUTH_AMERICA",
            Region::Europe => "EUROPE",
            Region::Oceania => "OCEANIA",
            Region::World => "WORLD",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_uppercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "ASIA" => Some(Region::Asia),
            "AFRICA" => Some(Region::Africa),
            "NORTH_AMERICA" => Some(Region::NorthAmerica),
            "SOUTH_AMERICA" => Some(Region::SouthAmerica),
            "EUROPE" => Some(Region::Europe),
            "OCEANIA" => Some(Region::Oceania),
            "WORLD" => Some(Region::World),
            _ => None,
        }
    }

    /// Human-facing caption used on the locator inset.
    pub fn caption(&self) -> &'static str {
        match self {
            Region::Asia => "Asia",
            Region::Africa => "Africa",
            Region::NorthAmerica => "North America",
            Region::SouthAmerica => "South America",
            Region::Europe => "Europe",
            Region::Oceania => "Oceania",
            Region::World => "World",
        }
    }
}

/// Colors are `#rrggbb` hex strings; the renderer crate parses them once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaletteDef {
    pub key: PaletteKey,
    pub land: &'static str,
    pub border: &'static str,
    pub range: &'static str,
    pub stroke: &'static str,
    pub focus_text: &'static str,
    pub context_text: &'static str,
    pub species_text: &'static str,
    pub ocean: &'static str,
}

impl PaletteDef {
    pub fn roles(&self) -> [(&'static str, &'static str); 8] {
        [
            ("land", self.land),
            ("border", self.border),
            ("range", self.range),
            ("stroke", self.stroke),
            ("focus_text", self.focus_text),
            ("context_text", self.context_text),
            ("species_text", self.species_text),
            ("ocean", self.ocean),
        ]
    }
}

pub const PALETTES_V1: [PaletteDef; 6] = [
    PaletteDef { key: PaletteKey::Desert, land: "#eadbc0", border: "#b9a27f", range: "#c8553d", stroke: "#8a3324", focus_text: "#5a2e1a", context_text: "#9c8a70", species_text: "#3b2a1a", ocean: "#d8e6ec" },
    PaletteDef { key: PaletteKey::Savanna, land: "#e8dfb5", border: "#a89a5b", range: "#d98e04", stroke: "#8c5a02", focus_text: "#4a3b12", context_text: "#9b9070", species_text: "#2f2a14", ocean: "#d4e4e8" },
    PaletteDef { key: PaletteKey::Jungle, land: "#dce8d0", border: "#8fa67f", range: "#2e7d32", stroke: "#1b4d1e", focus_text: "#1f3a1f", context_text: "#7f907a", species_text: "#15291a", ocean: "#d6e8ee" },
    PaletteDef { key: PaletteKey::Forest, land: "#e3e6d4", border: "#99a08a", range: "#55733b", stroke: "#34471f", focus_text: "#2c3a22", context_text: "#8a917e", species_text: "#1e2618", ocean: "#dce6ea" },
    PaletteDef { key: PaletteKey::Mountain, land: "#e6e2dc", border: "#a39c92", range: "#6d5a8c", stroke: "#43365a", focus_text: "#3a3146", context_text: "#948c84", species_text: "#26212e", ocean: "#dde5eb" },
    PaletteDef { key: PaletteKey::Ocean, land: "#eeede6", border: "#a7adb0", range: "#1f6fa8", stroke: "#134a70", focus_text: "#163c58", context_text: "#8c979e", species_text: "#0f2638", ocean: "#c9deeb" },
];

/// Inclusive lon/lat rectangle in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionBucketDef {
    pub region: Region,
    pub lon_min: f64,
    pub lon_max: f64,
    pub lat_min: f64,
    pub lat_max: f64,
}

impl RegionBucketDef {
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.lon_min && lon <= self.lon_max && lat >= self.lat_min && lat <= self.lat_max
    }
}

// Order is significant: the rectangles overlap (Central America, the Middle East, the
// Indonesian archipelago) and the first match wins.
pub const REGION_BUCKETS_V1: [RegionBucketDef; 6] = [
    RegionBucketDef { region: Region::Asia, lon_min: 60.0, lon_max: 150.0, lat_min: 5.0, lat_max: 80.0 },
    RegionBucketDef { region: Region::Africa, lon_min: -20.0, lon_max: 55.0, lat_min: -35.0, lat_max: 37.0 },
    RegionBucketDef { region: Region::NorthAmerica, lon_min: -170.0, lon_max: -50.0, lat_min: 7.0, lat_max: 85.0 },
    RegionBucketDef { region: Region::SouthAmerica, lon_min: -90.0, lon_max: -30.0, lat_min: -60.0, lat_max: 13.0 },
    RegionBucketDef { region: Region::Europe, lon_min: -25.0, lon_max: 45.0, lat_min: 35.0, lat_max: 72.0 },
    RegionBucketDef { region: Region::Oceania, lon_min: 110.0, lon_max: 180.0, lat_min: -50.0, lat_max: 5.0 },
];

/// Fixed geographic window shown in the locator inset for a region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InsetWindowDef {
    pub region: Region,
    pub lon_min: f64,
    pub lon_max: f64,
    pub lat_min: f64,
    pub lat_max: f64,
}

impl InsetWindowDef {
    pub fn lon_span(&self) -> f64 {
        self.lon_max - self.lon_min
    }

    pub fn lat_span(&self) -> f64 {
        self.lat_max - self.lat_min
    }
}

pub const INSET_WINDOWS_V1: [InsetWindowDef; 7] = [
    InsetWindowDef { region: Region::Asia, lon_min: 40.0, lon_max: 150.0, lat_min: -10.0, lat_max: 60.0 },
    InsetWindowDef { region: Region::Africa, lon_min: -20.0, lon_max: 55.0, lat_min: -38.0, lat_max: 38.0 },
    InsetWindowDef { region: Region::NorthAmerica, lon_min: -170.0, lon_max: -50.0, lat_min: 5.0, lat_max: 75.0 },
    InsetWindowDef { region: Region::SouthAmerica, lon_min: -95.0, lon_max: -30.0, lat_min: -58.0, lat_max: 15.0 },
    InsetWindowDef { region: Region::Europe, lon_min: -25.0, lon_max: 45.0, lat_min: 33.0, lat_max: 72.0 },
    InsetWindowDef { region: Region::Oceania, lon_min: 110.0, lon_max: 180.0, lat_min: -50.0, lat_max: 0.0 },
    InsetWindowDef { region: Region::World, lon_min: -180.0, lon_max: 180.0, lat_min: -60.0, lat_max: 85.0 },
];

pub fn palette_defs_v1() -> &'static [PaletteDef] {
    &PALETTES_V1
}

pub fn palette_def(key: PaletteKey) -> &'static PaletteDef {
    match key {
        PaletteKey::Desert => &PALETTES_V1[0],
        PaletteKey::Savanna => &PALETTES_V1[1],
        PaletteKey::Jungle => &PALETTES_V1[2],
        PaletteKey::Forest => &PALETTES_V1[3],
        PaletteKey::Mountain => &PALETTES_V1[4],
        PaletteKey::Ocean => &PALETTES_V1[5],
    }
}

pub fn region_buckets_v1() -> &'static [RegionBucketDef] {
    &REGION_BUCKETS_V1
}

pub fn inset_windows_v1() -> &'static [InsetWindowDef] {
    &INSET_WINDOWS_V1
}

pub fn inset_window(region: Region) -> &'static InsetWindowDef {
    match region {
        Region::Asia => &INSET_WINDOWS_V1[0],
        Region::Africa => &INSET_WINDOWS_V1[1],
        Region::NorthAmerica => &INSET_WINDOWS_V1[2],
        Region::SouthAmerica => &INSET_WINDOWS_V1[3],
        Region::Europe => &INSET_WINDOWS_V1[4],
        Region::Oceania => &INSET_WINDOWS_V1[5],
        Region::World => &INSET_WINDOWS_V1[6],
    }
}

#[derive(Debug, Clone)]
pub struct TablesMetadata {
    pub tables_id: &'static str,
    pub tables_version: &'static str,
    pub tables_fingerprint_sha256: String,
    pub palette_count: usize,
    pub region_bucket_count: usize,
}

static TABLES_JSON_VALUE: OnceLock<Value> = OnceLock::new();
static TABLES_FINGERPRINT: OnceLock<String> = OnceLock::new();

fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Canonical JSON form of every table. Object keys serialize sorted, so the text is stable.
pub fn tables_json() -> &'static Value {
    TABLES_JSON_VALUE.get_or_init(|| {
        let palettes: Vec<Value> = PALETTES_V1
            .iter()
            .map(|def| {
                let mut roles = serde_json::Map::new();
                for (role, hex) in def.roles() {
                    roles.insert(role.to_string(), Value::from(hex));
                }
                json!({ "key": def.key.as_str(), "roles": roles })
            })
            .collect();
        let buckets: Vec<Value> = REGION_BUCKETS_V1
            .iter()
            .map(|def| {
                json!({
                    "region": def.region.as_str(),
                    "lon": [def.lon_min, def.lon_max],
                    "lat": [def.lat_min, def.lat_max],
                })
            })
            .collect();
        let insets: Vec<Value> = INSET_WINDOWS_V1
            .iter()
            .map(|def| {
                json!({
                    "region": def.region.as_str(),
                    "lon": [def.lon_min, def.lon_max],
                    "lat": [def.lat_min, def.lat_max],
                })
            })
            .collect();
        json!({
            "id": TABLES_ID,
            "version": TABLES_VERSION,
            "default_palette": DEFAULT_PALETTE.as_str(),
            "palettes": palettes,
            "region_buckets": buckets,
            "inset_windows": insets,
        })
    })
}

pub fn tables_fingerprint_sha256() -> String {
    TABLES_FINGERPRINT
        .get_or_init(|| hex_sha256(tables_json().to_string().as_bytes()))
        .clone()
}

pub fn metadata() -> TablesMetadata {
    TablesMetadata {
        tables_id: TABLES_ID,
        tables_version: TABLES_VERSION,
        tables_fingerprint_sha256: tables_fingerprint_sha256(),
        palette_count: PALETTES_V1.len(),
        region_bucket_count: REGION_BUCKETS_V1.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_nonempty() {
        let a = tables_fingerprint_sha256();
        let b = tables_fingerprint_sha256();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn palette_lookup_matches_table_rows() {
        for key in PaletteKey::ALL {
            assert_eq!(palette_def(key).key, key);
            assert_eq!(PaletteKey::parse(key.as_str()), Some(key));
        }
        assert_eq!(PaletteKey::parse("  Desert "), Some(PaletteKey::Desert));
        assert_eq!(PaletteKey::parse("tundra"), None);
    }

    #[test]
    fn palette_colors_are_hex_triplets() {
        for def in palette_defs_v1() {
            for (role, hex) in def.roles() {
                assert_eq!(hex.len(), 7, "{} {}", def.key.as_str(), role);
                assert!(hex.starts_with('#'));
                assert!(hex[1..].chars().all(|c| c.is_ascii_hexdigit()));
            }
        }
    }

    #[test]
    fn inset_windows_cover_every_region() {
        for region in Region::ALL {
            let window = inset_window(region);
            assert_eq!(window.region, region);
            assert!(window.lon_span() > 0.0);
            assert!(window.lat_span() > 0.0);
        }
    }

    #[test]
    fn region_buckets_follow_priority_order() {
        let order: Vec<Region> = region_buckets_v1().iter().map(|b| b.region).collect();
        assert_eq!(
            order,
            vec![
                Region::Asia,
                Region::Africa,
                Region::NorthAmerica,
                Region::SouthAmerica,
                Region::Europe,
                Region::Oceania,
            ]
        );
    }

    #[test]
    fn region_parse_accepts_display_forms() {
        assert_eq!(Region::parse("north america"), Some(Region::NorthAmerica));
        assert_eq!(Region::parse("SOUTH-AMERICA"), Some(Region::SouthAmerica));
        assert_eq!(Region::parse("atlantis"), None);
        for region in Region::ALL {
            assert_eq!(Region::parse(region.as_str()), Some(region));
        }
    }

    #[test]
    fn tables_json_lists_all_rows() {
        let root = tables_json();
        assert_eq!(root["palettes"].as_array().map(Vec::len), Some(6));
        assert_eq!(root["region_buckets"].as_array().map(Vec::len), Some(6));
        assert_eq!(root["inset_windows"].as_array().map(Vec::len), Some(7));
        assert_eq!(root["default_palette"], "jungle");
    }
}
