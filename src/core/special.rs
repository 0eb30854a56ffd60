//! Special functions used by the Green's function series.
//!
//! Rational/asymptotic approximations (absolute error around 1e-8 for the
//! Bessel functions, relative error below 1.2e-7 for `erfc`).

use std::f64::consts::PI;
use std::sync::OnceLock;

/// Bessel function of the first kind, order zero.
pub fn bessel_j0(x: f64) -> f64 {
    let ax = x.abs();
    if ax < 8.0 {
        let y = x * x;
        let num = 57_568_490_574.0
            + y * (-13_362_590_354.0
                + y * (651_619_640.7 + y * (-11_214_424.18 + y * (77_392.330_17 + y * -184.905_245_6))));
        let den = 57_568_490_411.0
            + y * (1_029_532_985.0 + y * (9_494_680.718 + y * (59_272.648_53 + y * (267.853_271_2 + y))));
        num / den
    } else {
        let z = 8.0 / ax;
        let y = z * z;
        let xx = ax - 0.785_398_164;
        let p = 1.0
            + y * (-0.109_862_862_7e-2
                + y * (0.273_451_040_7e-4 + y * (-0.207_337_063_9e-5 + y * 0.209_388_721_1e-6)));
        let q = -0.156_249_999_5e-1
            + y * (0.143_048_876_5e-3
                + y * (-0.691_114_765_1e-5 + y * (0.762_109_516_1e-6 - y * 0.934_935_152e-7)));
        (0.636_619_772 / ax).sqrt() * (xx.cos() * p - z * xx.sin() * q)
    }
}

/// Bessel function of the first kind, order one.
pub fn bessel_j1(x: f64) -> f64 {
    let ax = x.abs();
    if ax < 8.0 {
        let y = x * x;
        let num = x
            * (72_362_614_232.0
                + y * (-7_895_059_235.0
                    + y * (242_396_853.1 + y * (-2_972_611.439 + y * (15_704.482_60 + y * -30.160_366_06)))));
        let den = 144_725_228_442.0
            + y * (2_300_535_178.0 + y * (18_583_304.74 + y * (99_447.433_94 + y * (376.999_139_7 + y))));
        num / den
    } else {
        let z = 8.0 / ax;
        let y = z * z;
        let xx = ax - 2.356_194_491;
        let p = 1.0
            + y * (0.183_105e-2
                + y * (-0.351_639_649_6e-4 + y * (0.245_752_017_4e-5 + y * -0.240_337_019e-6)));
        let q = 0.046_874_999_95
            + y * (-0.200_269_087_3e-3
                + y * (0.844_919_909_6e-5 + y * (-0.882_289_87e-6 + y * 0.105_787_412e-6)));
        let ans = (0.636_619_772 / ax).sqrt() * (xx.cos() * p - z * xx.sin() * q);
        if x < 0.0 {
            -ans
        } else {
            ans
        }
    }
}

/// Number of cached zeros of `J0`.
pub const J0_ZERO_COUNT: usize = 500;

/// The first [`J0_ZERO_COUNT`] positive zeros of `J0`, ascending.
pub fn bessel_j0_zeros() -> &'static [f64] {
    static ZEROS: OnceLock<Vec<f64>> = OnceLock::new();
    ZEROS.get_or_init(|| {
        (1..=J0_ZERO_COUNT)
            .map(|n| {
                // McMahon's expansion, polished by Newton steps (J0' = -J1).
                let beta = (n as f64 - 0.25) * PI;
                let mut j = beta + 1.0 / (8.0 * beta) - 31.0 / (384.0 * beta.powi(3))
                    + 3779.0 / (15360.0 * beta.powi(5));
                for _ in 0..3 {
                    let j1 = bessel_j1(j);
                    if j1 == 0.0 {
                        break;
                    }
                    j += bessel_j0(j) / j1;
                }
                j
            })
            .collect()
    })
}

/// Complementary error function.
pub fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let poly = -z * z - 1.265_512_23
        + t * (1.000_023_68
            + t * (0.374_091_96
                + t * (0.096_784_18
                    + t * (-0.186_288_06
                        + t * (0.278_868_07
                            + t * (-1.135_203_98
                                + t * (1.488_515_87 + t * (-0.822_152_23 + t * 0.170_872_77))))))));
    let ans = t * poly.exp();
    if x >= 0.0 {
        ans
    } else {
        2.0 - ans
    }
}

/// Finds a root of `f` in `[lo, hi]` by bisection; `f(lo)` and `f(hi)` must
/// bracket zero. Returns the midpoint of the final interval.
pub fn bisect<F: Fn(f64) -> f64>(f: F, mut lo: f64, mut hi: f64, rel_tol: f64) -> f64 {
    let f_lo = f(lo);
    if f_lo == 0.0 {
        return lo;
    }
    let lo_negative = f_lo < 0.0;
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        let fm = f(mid);
        if fm == 0.0 {
            return mid;
        }
        if (fm < 0.0) == lo_negative {
            lo = mid;
        } else {
            hi = mid;
        }
        if (hi - lo).abs() <= rel_tol * hi.abs().max(lo.abs()) {
            break;
        }
    }
    0.5 * (lo + hi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn bessel_reference_values() {
        assert_abs_diff_eq!(bessel_j0(0.0), 1.0, epsilon = 1e-8);
        assert_abs_diff_eq!(bessel_j0(1.0), 0.765_197_686_6, epsilon = 1e-7);
        assert_abs_diff_eq!(bessel_j0(10.0), -0.245_935_764_5, epsilon = 1e-7);
        assert_abs_diff_eq!(bessel_j1(1.0), 0.440_050_585_7, epsilon = 1e-7);
        assert_abs_diff_eq!(bessel_j1(-1.0), -0.440_050_585_7, epsilon = 1e-7);
        assert_abs_diff_eq!(bessel_j1(10.0), 0.043_472_746_2, epsilon = 1e-7);
    }

    #[test]
    fn j0_zeros_match_tables() {
        let z = bessel_j0_zeros();
        assert_eq!(z.len(), J0_ZERO_COUNT);
        assert_abs_diff_eq!(z[0], 2.404_825_557_7, epsilon = 1e-6);
        assert_abs_diff_eq!(z[1], 5.520_078_110_3, epsilon = 1e-6);
        assert_abs_diff_eq!(z[2], 8.653_727_912_9, epsilon = 1e-6);
        assert!(z.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn erfc_reference_values() {
        assert_abs_diff_eq!(erfc(0.0), 1.0, epsilon = 1e-7);
        assert_abs_diff_eq!(erfc(1.0), 0.157_299_207_1, epsilon = 1e-7);
        assert_abs_diff_eq!(erfc(-1.0), 1.842_700_792_9, epsilon = 1e-7);
    }

    #[test]
    fn bisection_finds_root() {
        let r = bisect(|x| x * x - 2.0, 0.0, 2.0, 1e-14);
        assert_abs_diff_eq!(r, 2f64.sqrt(), epsilon = 1e-12);
        let r = bisect(|x| 1.0 - x, 0.0, 3.0, 1e-14);
        assert_abs_diff_eq!(r, 1.0, epsilon = 1e-12);
    }
}
