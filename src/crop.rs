use crate::extent::Extent;
use crate::geometry::{self, BaseFeature};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CropStats {
    pub input: usize,
    pub repaired: usize,
    pub dropped_empty: usize,
}

/// Repairs every feature, clips it to `extent`, and drops features left empty.
/// Input order is preserved for the survivors.
pub fn crop_base_layer(extent: &Extent, features: &[BaseFeature]) -> (Vec<BaseFeature>, CropStats) {
    let window = extent.bounds();
    let mut stats = CropStats {
        input: features.len(),
        ..CropStats::default()
    };
    let mut out = Vec::with_capacity(features.len());
    for feature in features {
        // Repair first: clipping a self-intersecting ring can drop or invert regions.
        let fixed = if geometry::is_valid(&feature.geometry) {
            feature.geometry.clone()
        } else {
            stats.repaired += 1;
            geometry::make_valid(&feature.geometry)
        };
        if fixed.0.is_empty() {
            stats.dropped_empty += 1;
            continue;
        }
        // Features fully inside the window skip the boolean op entirely.
        let clipped = match geometry::bounding_box(&fixed) {
            Some(b) if window.contains_bounds(&b) => fixed,
            Some(b)
                if b.xmax < window.xmin
                    || b.xmin > window.xmax
                    || b.ymax < window.ymin
                    || b.ymin > window.ymax =>
            {
                stats.dropped_empty += 1;
                continue;
            }
            _ => geometry::clip_to_bounds(&fixed, &window),
        };
        if geometry::is_empty(&clipped) {
            stats.dropped_empty += 1;
            continue;
        }
        out.push(BaseFeature {
            name: feature.name.clone(),
            geometry: clipped,
        });
    }
    (out, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::test_shapes::{bowtie, rect};

    fn extent(xmin: f64, xmax: f64, ymin: f64, ymax: f64) -> Extent {
        Extent::new(xmin, xmax, ymin, ymax).unwrap()
    }

    #[test]
    fn features_outside_the_extent_are_dropped() {
        let features = vec![
            BaseFeature::new("Inside", rect(1.0, 1.0, 2.0, 2.0)),
            BaseFeature::new("Outside", rect(50.0, 50.0, 60.0, 60.0)),
            BaseFeature::new("Straddle", rect(8.0, 8.0, 12.0, 12.0)),
        ];
        let (cropped, stats) = crop_base_layer(&extent(0.0, 10.0, 0.0, 10.0), &features);
        let names: Vec<_> = cropped.iter().map(|f| f.label_name().unwrap()).collect();
        assert_eq!(names, vec!["Inside", "Straddle"]);
        assert_eq!(stats.dropped_empty, 1);
        let window = extent(0.0, 10.0, 0.0, 10.0).bounds().buffered(1e-6);
        for feature in &cropped {
            let b = geometry::bounding_box(&feature.geometry).unwrap();
            assert!(window.contains_bounds(&b));
        }
    }

    #[test]
    fn self_intersecting_feature_is_repaired_not_propagated() {
        let features = vec![
            BaseFeature::new("Bowtie", bowtie()),
            BaseFeature::new("Square", rect(0.5, 0.5, 1.5, 1.5)),
        ];
        let (cropped, stats) = crop_base_layer(&extent(-1.0, 3.0, -1.0, 3.0), &features);
        assert_eq!(stats.repaired, 1);
        assert_eq!(cropped.len(), 2);
        assert!(geometry::is_valid(&cropped[0].geometry));
    }

    #[test]
    fn clipped_geometry_stays_inside_window() {
        let features = vec![BaseFeature::new("Big", rect(-20.0, -20.0, 20.0, 20.0))];
        let (cropped, _) = crop_base_layer(&extent(0.0, 10.0, 0.0, 5.0), &features);
        assert_eq!(cropped.len(), 1);
        let b = geometry::bounding_box(&cropped[0].geometry).unwrap();
        assert!((b.xmin - 0.0).abs() < 1e-6 && (b.xmax - 10.0).abs() < 1e-6);
        assert!((b.ymin - 0.0).abs() < 1e-6 && (b.ymax - 5.0).abs() < 1e-6);
    }

    #[test]
    fn unnamed_features_survive_cropping() {
        let features = vec![BaseFeature::unnamed(rect(1.0, 1.0, 2.0, 2.0))];
        let (cropped, _) = crop_base_layer(&extent(0.0, 10.0, 0.0, 10.0), &features);
        assert_eq!(cropped.len(), 1);
        assert!(cropped[0].name.is_none());
    }
}
