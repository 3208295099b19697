use crate::motion::MotionType;
use crate::source::Fix;
use crate::storage::Point;

/// Accuracy gate between the position source and the bucket store.
#[derive(Debug, Clone, Copy)]
pub struct PointFilter {
    max_horizontal_accuracy: f64,
}

impl PointFilter {
    pub fn new(max_horizontal_accuracy: f64) -> Self {
        Self {
            max_horizontal_accuracy,
        }
    }

    pub fn max_horizontal_accuracy(&self) -> f64 {
        self.max_horizontal_accuracy
    }

    /// Accept a fix whose accuracy radius is at most the configured maximum,
    /// tagged with the motion type current at the time of capture.
    pub fn admit(&self, fix: &Fix, motion: MotionType) -> Option<Point> {
        if !fix.is_finite() || fix.horizontal_accuracy > self.max_horizontal_accuracy {
            return None;
        }
        Some(Point::from_fix(fix, motion))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn fix(accuracy: f64) -> Fix {
        Fix {
            timestamp: Utc.with_ymd_and_hms(2026, 1, 28, 10, 0, 15).unwrap(),
            latitude: 48.8566,
            longitude: 2.3522,
            altitude: 35.0,
            speed: 1.2,
            horizontal_accuracy: accuracy,
            vertical_accuracy: 3.0,
        }
    }

    #[test]
    fn test_inaccurate_fix_is_dropped() {
        let filter = PointFilter::new(50.0);
        assert!(filter.admit(&fix(80.0), MotionType::Walking).is_none());
    }

    #[test]
    fn test_accurate_fix_is_tagged_with_motion() {
        let filter = PointFilter::new(50.0);
        let point = filter.admit(&fix(30.0), MotionType::Walking).unwrap();
        assert_eq!(point.motion, MotionType::Walking);
        assert_eq!(point.horizontal_accuracy, 30.0);
        assert_eq!(point.latitude, 48.8566);
    }

    #[test]
    fn test_accuracy_equal_to_limit_is_kept() {
        let filter = PointFilter::new(50.0);
        assert!(filter.admit(&fix(50.0), MotionType::Stationary).is_some());
        assert!(filter.admit(&fix(50.000001), MotionType::Stationary).is_none());
    }

    #[test]
    fn test_non_finite_fix_is_dropped() {
        let filter = PointFilter::new(50.0);
        let mut bad = fix(10.0);
        bad.latitude = f64::NAN;
        assert!(filter.admit(&bad, MotionType::Walking).is_none());

        assert!(filter.admit(&fix(f64::NAN), MotionType::Walking).is_none());
    }

    #[test]
    fn test_any_non_finite_field_drops_the_fix() {
        let filter = PointFilter::new(50.0);
        let setters: [(&str, fn(&mut Fix)); 6] = [
            ("latitude", |f| f.latitude = f64::NAN),
            ("longitude", |f| f.longitude = f64::INFINITY),
            ("altitude", |f| f.altitude = f64::NAN),
            ("speed", |f| f.speed = f64::NEG_INFINITY),
            ("horizontal_accuracy", |f| f.horizontal_accuracy = f64::NAN),
            ("vertical_accuracy", |f| f.vertical_accuracy = f64::NAN),
        ];

        for (field, set) in setters {
            let mut bad = fix(10.0);
            set(&mut bad);
            assert!(
                filter.admit(&bad, MotionType::Walking).is_none(),
                "non-finite {} was admitted",
                field
            );
        }

        // Unknown measures are sent as -1 and stay admissible
        let mut unknown = fix(10.0);
        unknown.speed = -1.0;
        unknown.vertical_accuracy = -1.0;
        assert!(filter.admit(&unknown, MotionType::Walking).is_some());
    }
}
