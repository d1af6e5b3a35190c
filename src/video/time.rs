use std::cmp::Ordering;
use std::fmt;

/// Default media timescale (ticks per second)
pub const DEFAULT_TIMESCALE: i32 = 600;

/// Fraction of a frame by which a requested time may undershoot a frame's
/// presentation time and still address that frame. Absorbs tick rounding.
const FRAME_ADDRESS_TOLERANCE: f64 = 0.1;

/// A point in media time, expressed as `value / timescale` seconds
#[derive(Debug, Clone, Copy)]
pub struct MediaTime {
    pub value: i64,
    pub timescale: i32,
}

impl MediaTime {
    pub const ZERO: MediaTime = MediaTime {
        value: 0,
        timescale: DEFAULT_TIMESCALE,
    };

    pub fn new(value: i64, timescale: i32) -> Self {
        Self {
            value,
            timescale: timescale.max(1),
        }
    }

    /// Nearest tick to `seconds` in the given timescale
    pub fn from_seconds(seconds: f64, timescale: i32) -> Self {
        let timescale = timescale.max(1);
        let value = if seconds.is_finite() {
            (seconds * timescale as f64).round() as i64
        } else {
            0
        };
        Self { value, timescale }
    }

    pub fn seconds(&self) -> f64 {
        self.value as f64 / self.timescale as f64
    }

    /// Re-express this time in another timescale
    pub fn rescale(&self, timescale: i32) -> Self {
        if timescale == self.timescale {
            return *self;
        }
        Self::from_seconds(self.seconds(), timescale)
    }

    /// Add a number of seconds, keeping this timescale
    pub fn offset(&self, seconds: f64) -> Self {
        Self::from_seconds(self.seconds() + seconds, self.timescale)
    }
}

impl Default for MediaTime {
    fn default() -> Self {
        Self::ZERO
    }
}

impl PartialEq for MediaTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MediaTime {}

impl PartialOrd for MediaTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MediaTime {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.value as i128 * other.timescale as i128;
        let rhs = other.value as i128 * self.timescale as i128;
        lhs.cmp(&rhs)
    }
}

impl fmt::Display for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.seconds())
    }
}

/// Index of the frame displayed at `seconds` for a constant-rate track
pub fn frame_index_at(seconds: f64, fps: f64) -> i64 {
    if fps <= 0.0 || !seconds.is_finite() {
        return 0;
    }
    (seconds * fps + FRAME_ADDRESS_TOLERANCE).floor().max(0.0) as i64
}

/// Presentation time of frame `index` for a constant-rate track
pub fn frame_time(index: i64, fps: f64, timescale: i32) -> MediaTime {
    if fps <= 0.0 {
        return MediaTime::new(0, timescale);
    }
    MediaTime::from_seconds(index as f64 / fps, timescale)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_across_timescales() {
        let a = MediaTime::new(300, 600);
        let b = MediaTime::new(15, 30);
        assert_eq!(a, b);
        assert!(MediaTime::new(301, 600) > b);
        assert!(MediaTime::ZERO < a);
    }

    #[test]
    fn test_from_seconds_rounds_to_tick() {
        let t = MediaTime::from_seconds(1.0 / 30.0, 600);
        assert_eq!(t.value, 20);
        assert!((t.seconds() - 1.0 / 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_frame_index_tolerates_tick_rounding() {
        // 29.97 fps frames do not land on 600-tick boundaries
        let fps = 30000.0 / 1001.0;
        for index in 0..500 {
            let t = frame_time(index, fps, DEFAULT_TIMESCALE);
            assert_eq!(frame_index_at(t.seconds(), fps), index);
        }
    }

    #[test]
    fn test_frame_index_floor_within_frame() {
        assert_eq!(frame_index_at(0.0, 30.0), 0);
        assert_eq!(frame_index_at(0.05, 30.0), 1);
        assert_eq!(frame_index_at(-1.0, 30.0), 0);
    }
}
