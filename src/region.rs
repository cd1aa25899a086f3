use crate::error::RangePlateError;
use crate::extent::Extent;
use rangeplate_tables::{InsetWindowDef, Region, RegionBucketDef};

/// Coarse continent bucketing by extent centroid. The bucket table is injected; the first
/// rectangle containing the centroid wins, `WORLD` otherwise.
#[derive(Debug, Clone)]
pub struct RegionClassifier {
    buckets: Vec<RegionBucketDef>,
    insets: Vec<InsetWindowDef>,
}

impl RegionClassifier {
    pub fn new(buckets: &[RegionBucketDef], insets: &[InsetWindowDef]) -> Result<Self, RangePlateError> {
        for region in Region::ALL {
            let Some(window) = insets.iter().find(|w| w.region == region) else {
                return Err(RangePlateError::InvalidConfiguration(format!(
                    "no inset window for region {}",
                    region.as_str()
                )));
            };
            Extent::new(window.lon_min, window.lon_max, window.lat_min, window.lat_max).map_err(
                |_| {
                    RangePlateError::InvalidConfiguration(format!(
                        "inset window for {} is degenerate",
                        region.as_str()
                    ))
                },
            )?;
        }
        Ok(Self {
            buckets: buckets.to_vec(),
            insets: insets.to_vec(),
        })
    }

    pub fn classify(&self, extent: &Extent) -> Region {
        let (cx, cy) = extent.center();
        self.buckets
            .iter()
            .find(|bucket| bucket.contains(cx, cy))
            .map(|bucket| bucket.region)
            .unwrap_or(Region::World)
    }

    /// The fixed locator-inset window for `region`.
    pub fn inset_window(&self, region: Region) -> Result<Extent, RangePlateError> {
        let window = self
            .insets
            .iter()
            .find(|w| w.region == region)
            .ok_or_else(|| {
                RangePlateError::InvalidConfiguration(format!(
                    "no inset window for region {}",
                    region.as_str()
                ))
            })?;
        Extent::new(window.lon_min, window.lon_max, window.lat_min, window.lat_max)
    }
}

impl Default for RegionClassifier {
    fn default() -> Self {
        Self {
            buckets: rangeplate_tables::region_buckets_v1().to_vec(),
            insets: rangeplate_tables::inset_windows_v1().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn around(lon: f64, lat: f64) -> Extent {
        Extent::new(lon - 5.0, lon + 5.0, lat - 5.0, lat + 5.0).unwrap()
    }

    #[test]
    fn centroids_land_in_expected_buckets() {
        let classifier = RegionClassifier::default();
        assert_eq!(classifier.classify(&around(100.0, 30.0)), Region::Asia);
        assert_eq!(classifier.classify(&around(20.0, 0.0)), Region::Africa);
        assert_eq!(classifier.classify(&around(-100.0, 40.0)), Region::NorthAmerica);
        assert_eq!(classifier.classify(&around(-60.0, -15.0)), Region::SouthAmerica);
        assert_eq!(classifier.classify(&around(10.0, 50.0)), Region::Europe);
        assert_eq!(classifier.classify(&around(135.0, -25.0)), Region::Oceania);
    }

    #[test]
    fn unmatched_centroid_is_world() {
        let classifier = RegionClassifier::default();
        assert_eq!(classifier.classify(&around(-30.0, -80.0)), Region::World);
        assert_eq!(classifier.classify(&around(-150.0, -20.0)), Region::World);
    }

    #[test]
    fn overlapping_buckets_resolve_by_priority() {
        let classifier = RegionClassifier::default();
        // Central America sits in both the North and South America rectangles.
        assert_eq!(classifier.classify(&around(-80.0, 10.0)), Region::NorthAmerica);
        // Northern Mediterranean coast of Africa overlaps Europe; Africa is checked first.
        assert_eq!(classifier.classify(&around(10.0, 36.0)), Region::Africa);
        // Borneo falls in both Asia and Oceania; Asia is checked first.
        assert_eq!(classifier.classify(&around(115.0, 5.0)), Region::Asia);
    }

    #[test]
    fn injected_tables_replace_defaults() {
        let buckets = [RegionBucketDef {
            region: Region::Europe,
            lon_min: -180.0,
            lon_max: 180.0,
            lat_min: -90.0,
            lat_max: 90.0,
        }];
        let classifier =
            RegionClassifier::new(&buckets, rangeplate_tables::inset_windows_v1()).unwrap();
        assert_eq!(classifier.classify(&around(100.0, 30.0)), Region::Europe);
    }

    #[test]
    fn missing_inset_window_is_a_configuration_error() {
        let insets = &rangeplate_tables::inset_windows_v1()[..3];
        let err = RegionClassifier::new(rangeplate_tables::region_buckets_v1(), insets).unwrap_err();
        assert!(matches!(err, RangePlateError::InvalidConfiguration(_)));
    }

    #[test]
    fn inset_window_matches_table() {
        let classifier = RegionClassifier::default();
        let window = classifier.inset_window(Region::Africa).unwrap();
        assert_eq!(window.lon_span(), 75.0);
        assert_eq!(window.lat_span(), 76.0);
    }
}
