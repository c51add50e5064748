//! Per-axis dead-zone and scale correction
//!
//! Normalizes a raw axis reading to the common [`AXIS_MIN`, `AXIS_MAX`] range
//! using the calibration the device reports: values inside `flat` around the
//! center read as zero, the rest is scaled linearly in 2^14 fixed point.

use super::descriptor::AbsInfo;

/// Corrected axis range
pub const AXIS_MIN: i32 = -32767;
pub const AXIS_MAX: i32 = 32767;

/// Correction state of one axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correction {
    /// Constant-value axis; readings pass through unchanged
    Identity,
    /// Dead zone `(lo, hi)` with separate scale factors below and above it
    DeadZone {
        lo: i64,
        hi: i64,
        k_lo: i64,
        k_hi: i64,
    },
}

impl Correction {
    /// Derives the correction from the device's native calibration
    pub fn from_abs_info(info: &AbsInfo) -> Self {
        if info.minimum == info.maximum {
            return Correction::Identity;
        }

        let min = i64::from(info.minimum);
        let max = i64::from(info.maximum);
        let flat = i64::from(info.flat);

        let center = (max + min) / 2;
        let half_range = (max - min) / 2 - 2 * flat;
        let k = if half_range != 0 {
            (1i64 << 29) / half_range
        } else {
            0
        };

        Correction::DeadZone {
            lo: center - flat,
            hi: center + flat,
            k_lo: k,
            k_hi: k,
        }
    }

    pub fn apply(&self, value: i32) -> i32 {
        let corrected = match *self {
            Correction::Identity => i64::from(value),
            Correction::DeadZone {
                lo, hi, k_lo, k_hi, ..
            } => {
                let v = i64::from(value);
                if v > lo {
                    if v < hi {
                        0
                    } else {
                        (k_hi * (v - hi)) >> 14
                    }
                } else {
                    (k_lo * (v - lo)) >> 14
                }
            }
        };

        corrected.clamp(i64::from(AXIS_MIN), i64::from(AXIS_MAX)) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calibration(minimum: i32, maximum: i32, flat: i32) -> AbsInfo {
        AbsInfo {
            minimum,
            maximum,
            flat,
            fuzz: 4,
            ..Default::default()
        }
    }

    #[test]
    fn constant_axis_is_identity() {
        let corr = Correction::from_abs_info(&calibration(5, 5, 0));
        assert_eq!(corr, Correction::Identity);
        assert_eq!(corr.apply(5), 5);
        assert_eq!(corr.apply(100_000), AXIS_MAX);
    }

    #[test]
    fn dead_zone_reads_zero() {
        let corr = Correction::from_abs_info(&calibration(0, 1023, 15));
        for raw in 497..526 {
            assert_eq!(corr.apply(raw), 0, "raw {raw}");
        }
        assert_eq!(corr.apply(526), 0);
        assert_eq!(corr.apply(496), 0);
        assert!(corr.apply(600) > 0);
        assert!(corr.apply(400) < 0);
    }

    #[test]
    fn extremes_saturate() {
        let corr = Correction::from_abs_info(&calibration(0, 1023, 15));
        assert_eq!(corr.apply(1023), AXIS_MAX);
        assert_eq!(corr.apply(0), AXIS_MIN);
    }

    #[test]
    fn odd_symmetric_around_center() {
        let corr = Correction::from_abs_info(&calibration(0, 1022, 15));
        let center = 511;
        for d in 0..=511 {
            let up = corr.apply(center + d);
            let down = corr.apply(center - d);
            assert!((up + down).abs() <= 1, "d={d}: {up} vs {down}");
        }
    }

    #[test]
    fn output_always_in_range() {
        let calibrations = [
            calibration(0, 255, 0),
            calibration(-32768, 32767, 128),
            calibration(0, 1023, 600),
            calibration(i32::MIN, i32::MAX, 0),
            calibration(-10, 10, 5),
        ];
        let probes = [i32::MIN, -1_000_000, -32768, -1, 0, 1, 511, 32767, 1_000_000, i32::MAX];
        for cal in &calibrations {
            let corr = Correction::from_abs_info(cal);
            for &raw in &probes {
                let out = corr.apply(raw);
                assert!((AXIS_MIN..=AXIS_MAX).contains(&out), "{cal:?} {raw} -> {out}");
            }
        }
    }

    #[test]
    fn zero_usable_range_flattens_outside_dead_zone() {
        // (20 - 0) / 2 - 2 * 5 == 0
        let corr = Correction::from_abs_info(&calibration(0, 20, 5));
        assert_eq!(corr.apply(20), 0);
        assert_eq!(corr.apply(0), 0);
    }

    #[test]
    fn corrected_values_are_fixed_points_of_canonical_range() {
        let canonical = Correction::from_abs_info(&calibration(AXIS_MIN, AXIS_MAX, 0));
        let device = Correction::from_abs_info(&calibration(0, 1023, 15));
        for raw in (0..=1023).step_by(7) {
            let once = device.apply(raw);
            assert_eq!(canonical.apply(once), once);
        }
    }
}
