//! Tempo conversions

/// Playback rate that makes a source recorded at `original` BPM play at `current` BPM
///
/// No clamping: both tempos are validated by the caller.
///
/// # Example
/// ```
/// use stepgrid::mapper::bpm_to_rate;
/// assert!((bpm_to_rate(120.0, 90.0) - 4.0 / 3.0).abs() < 1e-12);
/// ```
#[inline]
pub fn bpm_to_rate(current: f64, original: f64) -> f64 {
    current / original
}

/// Number of grid steps in one beat (quarter note)
#[inline]
pub fn steps_per_beat(grid_division: u32) -> f64 {
    grid_division as f64 / 4.0
}

/// Duration of one step in seconds: `(60 / bpm) / (grid_division / 4)`
///
/// # Example
/// ```
/// use stepgrid::mapper::step_duration;
/// assert_eq!(step_duration(120.0, 16), 0.125);
/// ```
#[inline]
pub fn step_duration(bpm: f64, grid_division: u32) -> f64 {
    (60.0 / bpm) / steps_per_beat(grid_division)
}

/// Duration of a full pattern cycle in seconds
#[inline]
pub fn pattern_duration(bpm: f64, grid_division: u32, pattern_length: usize) -> f64 {
    step_duration(bpm, grid_division) * pattern_length as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use test_case::test_case;

    #[test]
    fn test_rate_scenario() {
        assert_relative_eq!(bpm_to_rate(120.0, 90.0), 1.333_333_333_333, epsilon = 1e-9);
    }

    #[test]
    fn test_rate_unity() {
        assert_eq!(bpm_to_rate(128.0, 128.0), 1.0);
    }

    #[test_case(120.0, 16, 0.125 ; "sixteenths at 120")]
    #[test_case(120.0, 8, 0.25 ; "eighths at 120")]
    #[test_case(60.0, 4, 1.0 ; "quarters at 60")]
    #[test_case(90.0, 16, 1.0 / 6.0 ; "sixteenths at 90")]
    fn test_step_duration(bpm: f64, grid: u32, expected: f64) {
        assert_relative_eq!(step_duration(bpm, grid), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_full_loop_duration() {
        assert_relative_eq!(pattern_duration(120.0, 16, 16), 2.0, epsilon = 1e-12);
        assert_relative_eq!(pattern_duration(120.0, 16, 32), 4.0, epsilon = 1e-12);
    }
}
