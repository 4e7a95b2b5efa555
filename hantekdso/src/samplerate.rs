//! Samplerate planning.
//!
//! Maps a target rate onto the discrete downsampler domain of the model.
//! The rounding direction is fixed by the caller, never by proximity:
//! `maximum` rounds up so a record-time target is never overshot, the
//! normal mode rounds down so a rate target is never undershot.

use crate::protocol::bulk::BulkCode;
use crate::protocol::device::ModelSpec;

/// Largest downsampler the 2090's halved 16-bit encoding can carry.
const MAX_DOWNSAMPLER_2090: f64 = 2.0 * 0x10001 as f64;

/// Computes the nearest samplerate the device supports.
///
/// Returns the chosen downsampler (0 disables downsampling entirely) and
/// the realized rate. `None` if the target is invalid or the model has no
/// solver-driven samplerate command.
pub fn best_samplerate(
    spec: &ModelSpec,
    record_length_id: usize,
    samplerate: f64,
    fast_rate: bool,
    maximum: bool,
) -> Option<(u32, f64)> {
    if samplerate <= 0.0 {
        return None;
    }

    let limits = spec.limits(fast_rate);
    let divider = spec.buffer_dividers[record_length_id] as f64;

    // Downsampling factor that would provide the requested rate.
    let mut downsampler = limits.base / divider / samplerate;

    // Base samplerate sufficient, or is the maximum better?
    if downsampler < 1.0 && (samplerate <= limits.max / divider || !maximum) {
        return Some((0, limits.max / divider));
    }

    match spec.bulk.set_samplerate {
        Some(BulkCode::SetTriggerAndSamplerate) => {
            // The 2090 supports the factors 1, 2 and 5 through the fast
            // value and all even factors above through the slow value; 3
            // and 4 are not representable.
            if (maximum && downsampler <= 5.0) || (!maximum && downsampler < 6.0) {
                if maximum {
                    downsampler = downsampler.ceil();
                    if downsampler > 2.0 {
                        downsampler = 5.0;
                    }
                } else {
                    downsampler = downsampler.floor();
                    if downsampler > 2.0 && downsampler < 5.0 {
                        downsampler = 2.0;
                    }
                }
            } else {
                downsampler = if maximum {
                    (downsampler / 2.0).ceil() * 2.0
                } else {
                    (downsampler / 2.0).floor() * 2.0
                };
                if downsampler > MAX_DOWNSAMPLER_2090 {
                    downsampler = MAX_DOWNSAMPLER_2090;
                }
            }
        }
        Some(BulkCode::CSetTriggerOrSamplerate) | Some(BulkCode::ESetTriggerOrSamplerate) => {
            // The 5200 and 2250 carry the factor directly.
            downsampler = if maximum {
                downsampler.ceil()
            } else {
                downsampler.floor()
            };
        }
        _ => return None,
    }

    if downsampler > limits.max_downsampler as f64 {
        downsampler = limits.max_downsampler as f64;
    }

    Some((downsampler as u32, limits.base / downsampler / divider))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::protocol::device::{DSO2090, DSO2250, DSO5200};

    #[test]
    fn test_exact_divider_on_2090() {
        // 50 MHz base, divider 1: 10 MS/s needs downsampler 5.
        let (downsampler, rate) = best_samplerate(&DSO2090, 1, 10e6, false, false).unwrap();
        assert_eq!(downsampler, 5);
        assert_eq!(rate, 10e6);
    }

    #[test]
    fn test_unrepresentable_factors_on_2090() {
        // A raw factor of 3 skips to 5 when rounding up and to 2 when
        // rounding down.
        let (downsampler, rate) = best_samplerate(&DSO2090, 1, 16.67e6, false, true).unwrap();
        assert_eq!(downsampler, 5);
        assert_eq!(rate, 10e6);

        let (downsampler, rate) = best_samplerate(&DSO2090, 1, 16.67e6, false, false).unwrap();
        assert_eq!(downsampler, 2);
        assert_eq!(rate, 25e6);
    }

    #[test]
    fn test_even_slow_domain_on_2090() {
        // Raw factor 50e6 / 3e6 = 16.67 rounds to even values.
        let (downsampler, _) = best_samplerate(&DSO2090, 1, 3e6, false, false).unwrap();
        assert_eq!(downsampler, 16);
        let (downsampler, _) = best_samplerate(&DSO2090, 1, 3e6, false, true).unwrap();
        assert_eq!(downsampler, 18);
    }

    #[test]
    fn test_base_rate_sufficient() {
        let (downsampler, rate) = best_samplerate(&DSO2090, 1, 80e6, false, false).unwrap();
        assert_eq!(downsampler, 0);
        assert_eq!(rate, 50e6);
    }

    #[test]
    fn test_integer_domain_on_2250_and_5200() {
        let (downsampler, rate) = best_samplerate(&DSO2250, 1, 33e6, false, false).unwrap();
        assert_eq!(downsampler, 3);
        assert!((rate - 100e6 / 3.0).abs() < 1.0);

        let (downsampler, _) = best_samplerate(&DSO5200, 1, 33e6, false, true).unwrap();
        assert_eq!(downsampler, 4);
    }

    #[test]
    fn test_downsampler_cap() {
        let (downsampler, _) = best_samplerate(&DSO2250, 1, 0.1, false, false).unwrap();
        assert_eq!(downsampler, DSO2250.samplerate_single.max_downsampler);
    }

    #[test]
    fn test_invalid_target() {
        assert!(best_samplerate(&DSO2090, 1, 0.0, false, false).is_none());
        assert!(best_samplerate(&DSO2090, 1, -1.0, false, false).is_none());
    }

    #[test]
    fn test_solver_bounds_property() {
        // Min-allowed mode never undershoots the target, max-allowed mode
        // never overshoots it, and neither exceeds the base rate.
        for spec in [&DSO2090, &DSO2250, &DSO5200] {
            for fast_rate in [false, true] {
                let limits = spec.limits(fast_rate);
                let floor_rate = limits.base / limits.max_downsampler as f64;

                let mut target = 1e3;
                while target < 4e8 {
                    let (_, realized) =
                        best_samplerate(spec, 1, target, fast_rate, false).unwrap();
                    assert!(realized * (1.0 + 1e-12) >= target.min(limits.max));
                    assert!(realized <= limits.max);

                    // Max-allowed mode only stays below the target where
                    // the downsampler domain can express it.
                    if target >= floor_rate && target <= limits.base {
                        let (_, realized) =
                            best_samplerate(spec, 1, target, fast_rate, true).unwrap();
                        assert!(realized <= target * (1.0 + 1e-12));
                    }

                    target *= 1.37;
                }
            }
        }
    }

    #[test]
    fn test_solver_monotonicity_property() {
        // For a fixed mode, a higher target never picks a larger
        // downsampler under min-allowed rounding.
        for spec in [&DSO2090, &DSO2250, &DSO5200] {
            let mut previous = u32::MAX;
            let mut target = 1e3;
            while target < 2e8 {
                let (downsampler, _) = best_samplerate(spec, 1, target, false, false).unwrap();
                assert!(downsampler <= previous);
                previous = downsampler;
                target *= 1.13;
            }
        }
    }
}
