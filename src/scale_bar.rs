use crate::error::RangePlateError;
use crate::extent::Extent;

pub const DEFAULT_SCALE_MILES: f64 = 500.0;
pub const KM_PER_DEGREE_EQUATOR: f64 = 111.32;
pub const KM_PER_MILE: f64 = 1.609;

/// Offsets from the extent's lower-left corner, in degrees.
const ANCHOR_DX: f64 = 2.0;
const MILES_DY: f64 = 3.0;
const KM_DY: f64 = 1.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceUnit {
    Miles,
    Kilometers,
}

impl DistanceUnit {
    pub fn suffix(&self) -> &'static str {
        match self {
            DistanceUnit::Miles => "mi",
            DistanceUnit::Kilometers => "km",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleBar {
    pub anchor_x: f64,
    pub anchor_y: f64,
    pub length_deg: f64,
    pub unit: DistanceUnit,
    pub magnitude: f64,
}

impl ScaleBar {
    pub fn label(&self) -> String {
        format!("{} {}", trim_number(self.magnitude), self.unit.suffix())
    }
}

fn trim_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{value:.1}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleBars {
    pub miles: ScaleBar,
    pub kilometers: ScaleBar,
}

/// Kilometres per degree of longitude at `lat_deg`.
pub fn km_per_degree(lat_deg: f64) -> f64 {
    KM_PER_DEGREE_EQUATOR * lat_deg.to_radians().cos()
}

/// Two bars for the same distance, latitude-corrected at the extent's centre. The kilometre
/// bar shows the rounded metric equivalent and is sized for that rounded value.
pub fn compute_scale_bars(extent: &Extent, miles: f64) -> Result<ScaleBars, RangePlateError> {
    if !miles.is_finite() || miles <= 0.0 {
        return Err(RangePlateError::InvalidConfiguration(format!(
            "scale bar distance must be a positive number of miles, got {miles}"
        )));
    }
    let (_, center_lat) = extent.center();
    let kpd = km_per_degree(center_lat);
    if !(kpd > 1e-9) {
        return Err(RangePlateError::InvalidGeometry(format!(
            "extent centre latitude {center_lat} leaves no usable degree length"
        )));
    }
    let anchor_x = extent.xmin() + ANCHOR_DX;
    let km = (miles * KM_PER_MILE).round();
    Ok(ScaleBars {
        miles: ScaleBar {
            anchor_x,
            anchor_y: extent.ymin() + MILES_DY,
            length_deg: miles * KM_PER_MILE / kpd,
            unit: DistanceUnit::Miles,
            magnitude: miles,
        },
        kilometers: ScaleBar {
            anchor_x,
            anchor_y: extent.ymin() + KM_DY,
            length_deg: km / kpd,
            unit: DistanceUnit::Kilometers,
            magnitude: km,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent_at(lat: f64) -> Extent {
        Extent::new(10.0, 40.0, lat - 5.0, lat + 5.0).unwrap()
    }

    #[test]
    fn degree_length_halves_at_sixty_degrees() {
        assert!((km_per_degree(0.0) - 111.32).abs() < 1e-9);
        assert!((km_per_degree(60.0) - 55.66).abs() < 1e-9);
        let equator = compute_scale_bars(&extent_at(0.0), 500.0).unwrap();
        let north = compute_scale_bars(&extent_at(60.0), 500.0).unwrap();
        let ratio = north.miles.length_deg / equator.miles.length_deg;
        assert!((ratio - 2.0).abs() < 1e-9);
    }

    #[test]
    fn default_distance_produces_matching_labels() {
        let bars = compute_scale_bars(&extent_at(0.0), DEFAULT_SCALE_MILES).unwrap();
        assert_eq!(bars.miles.label(), "500 mi");
        assert_eq!(bars.kilometers.label(), "805 km");
        assert!((bars.miles.length_deg - 804.5 / 111.32).abs() < 1e-9);
        assert!((bars.kilometers.length_deg - 805.0 / 111.32).abs() < 1e-9);
    }

    #[test]
    fn bars_share_anchor_x_and_sit_above_the_frame() {
        let extent = Extent::new(-20.0, 5.0, 30.0, 50.0).unwrap();
        let bars = compute_scale_bars(&extent, 300.0).unwrap();
        assert_eq!(bars.miles.anchor_x, -18.0);
        assert_eq!(bars.kilometers.anchor_x, -18.0);
        assert_eq!(bars.miles.anchor_y, 33.0);
        assert!((bars.kilometers.anchor_y - 31.8).abs() < 1e-12);
        assert_eq!(bars.kilometers.magnitude, 483.0);
    }

    #[test]
    fn polar_or_invalid_inputs_are_errors() {
        let pole = Extent::new(0.0, 10.0, 80.0, 100.0).unwrap();
        assert!(compute_scale_bars(&pole, 500.0).is_err());
        assert!(compute_scale_bars(&extent_at(0.0), 0.0).is_err());
        assert!(compute_scale_bars(&extent_at(0.0), f64::NAN).is_err());
    }
}
