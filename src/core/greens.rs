//! Green's functions for free diffusion inside absorbing boundaries.
//!
//! Each function answers three questions for a particle that started at a
//! known point at time zero: how likely it is to still be inside at time `t`
//! ([`GreensFunction::survival`]), when it first leaves
//! ([`GreensFunction::draw_time`]) and, given that it has not left yet, how far
//! from the origin it is at `t` ([`GreensFunction::draw_r`]). The series are
//! eigenfunction expansions; times short enough that the boundary cannot be
//! felt fall back to free-space Gaussian draws.

use crate::core::geometry::{standard_normal, Vec3};
use crate::core::special::{bessel_j0_zeros, bessel_j1, bisect, J0_ZERO_COUNT};
use crate::error::{Error, Result};
use rand::Rng;
use std::f64::consts::PI;

/// Terms with `D k^2 t` above this are dropped.
const EXPONENT_CUTOFF: f64 = 40.0;
/// `dist^2 / (D t)` above which the nearest boundary is out of reach.
const FREE_RATIO: f64 = 160.0;
/// Relative tolerance of the bisection inversions.
const TOLERANCE: f64 = 1e-12;
/// Attempts before a rejected free-space draw is clamped.
const MAX_FREE_DRAWS: usize = 1000;
/// Upper bound on the number of radiating/absorbing roots kept.
const MAX_PAIR_ROOTS: usize = 2000;

pub trait GreensFunction {
    /// Probability that the particle has not hit an absorbing boundary by `t`.
    fn survival(&self, t: f64) -> f64;

    /// Probability of survival to `t` at distance less than `r` from the
    /// reference point.
    fn cumulative_r(&self, r: f64, t: f64) -> f64;

    /// Range of distances `draw_r` can return.
    fn r_range(&self) -> (f64, f64);

    /// Characteristic exit time; `+inf` for an immobile particle, zero for a
    /// degenerate domain.
    fn time_scale(&self) -> f64;

    /// Whether the boundaries are out of diffusive reach at `t`.
    fn is_free(&self, t: f64) -> bool;

    /// Distance drawn from unbounded diffusion, restricted to `r_range`.
    fn draw_free_r<R: Rng + ?Sized>(&self, t: f64, rng: &mut R) -> f64;

    /// First passage time.
    fn draw_time<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let scale = self.time_scale();
        if scale.is_infinite() {
            return f64::INFINITY;
        }
        if scale <= 0.0 {
            return 0.0;
        }
        let u = rng.random::<f64>().max(1e-300);
        let mut hi = scale;
        for _ in 0..200 {
            if self.survival(hi) <= u {
                break;
            }
            hi *= 2.0;
        }
        bisect(|t| self.survival(t) - u, 0.0, hi, TOLERANCE)
    }

    /// Distance at `t`, conditioned on survival.
    fn draw_r<R: Rng + ?Sized>(&self, t: f64, rng: &mut R) -> f64 {
        let (lo, hi) = self.r_range();
        if t <= 0.0 || hi <= lo {
            return self.draw_free_r(0.0, rng);
        }
        if self.is_free(t) {
            return self.draw_free_r(t, rng);
        }
        let target = rng.random::<f64>() * self.survival(t);
        bisect(|r| self.cumulative_r(r, t) - target, lo, hi, TOLERANCE)
    }
}

/// Free particle starting at the centre of an absorbing interval (1D),
/// disk (2D) or sphere (3D) of radius `a`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AbsorbingShell {
    pub dim: usize,
    pub d: f64,
    pub a: f64,
}

impl AbsorbingShell {
    pub fn new(dim: usize, d: f64, a: f64) -> Result<Self> {
        if !(1..=3).contains(&dim) {
            return Err(Error::InvalidParam(format!("unsupported dimension {dim}")));
        }
        if !d.is_finite() || d < 0.0 || !a.is_finite() || a < 0.0 {
            return Err(Error::InvalidParam(
                "absorbing shell needs finite D >= 0 and a >= 0".into(),
            ));
        }
        Ok(Self { dim, d, a })
    }

    /// Mean first passage time `a^2 / (2 dim D)`.
    pub fn mean_exit_time(&self) -> f64 {
        self.a * self.a / (2.0 * self.dim as f64 * self.d)
    }

    fn eigenvalue(&self, n: usize) -> f64 {
        match self.dim {
            1 => (2 * n - 1) as f64 * PI / (2.0 * self.a),
            2 => bessel_j0_zeros()[n - 1] / self.a,
            _ => n as f64 * PI / self.a,
        }
    }

    fn max_terms(&self) -> usize {
        match self.dim {
            2 => J0_ZERO_COUNT,
            _ => 500,
        }
    }

    /// Sums `term(n, k_n) * exp(-D k_n^2 t)` until the exponent cuts off.
    fn series<F: Fn(usize, f64) -> f64>(&self, t: f64, term: F) -> f64 {
        let mut sum = 0.0;
        for n in 1..=self.max_terms() {
            let k = self.eigenvalue(n);
            let x = self.d * k * k * t;
            if n > 1 && x > EXPONENT_CUTOFF {
                break;
            }
            sum += term(n, k) * (-x).exp();
        }
        sum
    }
}

impl GreensFunction for AbsorbingShell {
    fn survival(&self, t: f64) -> f64 {
        if t <= 0.0 || self.is_free(t) {
            return 1.0;
        }
        let a = self.a;
        let s = match self.dim {
            1 => self.series(t, |n, _| {
                let sign = if n % 2 == 1 { 1.0 } else { -1.0 };
                4.0 * sign / ((2 * n - 1) as f64 * PI)
            }),
            2 => self.series(t, |_, k| {
                let j = k * a;
                2.0 / (j * bessel_j1(j))
            }),
            _ => self.series(t, |n, _| if n % 2 == 1 { 2.0 } else { -2.0 }),
        };
        s.clamp(0.0, 1.0)
    }

    fn cumulative_r(&self, r: f64, t: f64) -> f64 {
        let a = self.a;
        let r = r.clamp(0.0, a);
        let c = match self.dim {
            1 => self.series(t, |_, k| 2.0 * (k * r).sin() / (k * a)),
            2 => self.series(t, |_, k| {
                let j = k * a;
                let j1 = bessel_j1(j);
                2.0 * r * bessel_j1(k * r) / (a * j * j1 * j1)
            }),
            _ => self.series(t, |_, k| 2.0 / a * ((k * r).sin() / k - r * (k * r).cos())),
        };
        c.max(0.0)
    }

    fn r_range(&self) -> (f64, f64) {
        (0.0, self.a)
    }

    fn time_scale(&self) -> f64 {
        if self.d == 0.0 {
            f64::INFINITY
        } else {
            self.a * self.a / self.d
        }
    }

    fn is_free(&self, t: f64) -> bool {
        self.a * self.a > FREE_RATIO * self.d * t
    }

    fn draw_free_r<R: Rng + ?Sized>(&self, t: f64, rng: &mut R) -> f64 {
        if t <= 0.0 || self.d == 0.0 {
            return 0.0;
        }
        let sigma = (2.0 * self.d * t).sqrt();
        let mut r = 0.0;
        for _ in 0..MAX_FREE_DRAWS {
            r = (0..self.dim)
                .map(|_| (sigma * standard_normal(rng)).powi(2))
                .sum::<f64>()
                .sqrt();
            if r < self.a {
                return r;
            }
        }
        r.min(self.a)
    }
}

/// Which boundary absorbed the inter-particle vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairExit {
    /// Outer absorbing sphere reached.
    Escape,
    /// Reaction at the contact distance `sigma`.
    Reaction,
}

/// Radial diffusion of the inter-particle distance between a radiating
/// sphere at `sigma` (intrinsic rate `k`) and an absorbing sphere at `a`,
/// starting from `r0`.
#[derive(Debug, Clone, PartialEq)]
pub struct PairGreensFunction {
    pub d: f64,
    pub k: f64,
    pub sigma: f64,
    pub a: f64,
    pub r0: f64,
    h: f64,
    /// Positive roots of `alpha cos(alpha L) + h sin(alpha L) = 0`.
    alphas: Vec<f64>,
    /// `sin(alpha (a - r0)) / (r0 N)` per root.
    weights: Vec<f64>,
}

impl PairGreensFunction {
    /// Errors:
    /// - `Error::InvalidParam` unless `0 < sigma < a`, `D > 0` and `k >= 0`.
    pub fn new(d: f64, k: f64, sigma: f64, a: f64, r0: f64) -> Result<Self> {
        if !(d.is_finite() && d > 0.0) {
            return Err(Error::InvalidParam("pair D must be finite and > 0".into()));
        }
        if !(k.is_finite() && k >= 0.0) {
            return Err(Error::InvalidParam("pair k must be finite and >= 0".into()));
        }
        if !(sigma > 0.0 && a > sigma && a.is_finite()) {
            return Err(Error::InvalidParam(format!(
                "pair needs 0 < sigma < a, got sigma={sigma} a={a}"
            )));
        }
        let r0 = r0.clamp(sigma, a);
        let l = a - sigma;
        let h = (k + 4.0 * PI * sigma * d) / (4.0 * PI * sigma * sigma * d);
        let dmin = (r0 - sigma).min(a - r0);
        let count = if dmin > 0.0 {
            ((25.5 * l / dmin).ceil() as usize).clamp(16, MAX_PAIR_ROOTS)
        } else {
            MAX_PAIR_ROOTS
        };
        let f = |alpha: f64| alpha * (alpha * l).cos() + h * (alpha * l).sin();
        let alphas: Vec<f64> = (1..=count)
            .map(|n| {
                let lo = (n as f64 - 0.5) * PI / l;
                let hi = n as f64 * PI / l;
                bisect(f, lo, hi, 1e-15)
            })
            .collect();
        let weights = alphas
            .iter()
            .map(|&alpha| {
                let norm = 0.5 * l - (2.0 * alpha * l).sin() / (4.0 * alpha);
                (alpha * (a - r0)).sin() / (r0 * norm)
            })
            .collect();
        Ok(Self {
            d,
            k,
            sigma,
            a,
            r0,
            h,
            alphas,
            weights,
        })
    }

    /// `integral_0^x (a - y) sin(alpha y) dy`.
    fn moment(&self, alpha: f64, x: f64) -> f64 {
        let (s, c) = (alpha * x).sin_cos();
        self.a * (1.0 - c) / alpha - s / (alpha * alpha) + x * c / alpha
    }

    fn series<F: Fn(f64, f64) -> f64>(&self, t: f64, term: F) -> f64 {
        let mut sum = 0.0;
        for (i, (&alpha, &w)) in self.alphas.iter().zip(&self.weights).enumerate() {
            let x = self.d * alpha * alpha * t;
            if i > 0 && x > EXPONENT_CUTOFF {
                break;
            }
            sum += term(alpha, w) * (-x).exp();
        }
        sum
    }

    fn nearest_boundary(&self) -> f64 {
        (self.r0 - self.sigma).min(self.a - self.r0)
    }

    /// Probability flux into the outer boundary at `t`.
    pub fn flux_escape(&self, t: f64) -> f64 {
        self.d * self.a * self.series(t, |alpha, w| alpha * w)
    }

    /// Probability flux into the reactive boundary at `t`.
    pub fn flux_reaction(&self, t: f64) -> f64 {
        if self.k == 0.0 {
            return 0.0;
        }
        let l = self.a - self.sigma;
        self.k / (4.0 * PI * self.sigma) * self.series(t, |alpha, w| w * (alpha * l).sin())
    }

    /// Decides which boundary absorbed a pair that left at `t`.
    pub fn draw_event_type<R: Rng + ?Sized>(&self, t: f64, rng: &mut R) -> PairExit {
        if self.k == 0.0 {
            return PairExit::Escape;
        }
        let (js, ja) = (self.flux_reaction(t), self.flux_escape(t));
        let total = js + ja;
        if !(total.is_finite() && total > 0.0 && js >= 0.0 && ja >= 0.0) {
            // series not resolved at this t: the nearer boundary wins
            return if self.r0 - self.sigma < self.a - self.r0 {
                PairExit::Reaction
            } else {
                PairExit::Escape
            };
        }
        if rng.random::<f64>() * total < js {
            PairExit::Reaction
        } else {
            PairExit::Escape
        }
    }

    /// Polar angle between the old and new inter-particle vectors for a pair
    /// at distance `r` after `t`, from the free-diffusion conditional
    /// (von Mises-Fisher) distribution.
    pub fn draw_theta<R: Rng + ?Sized>(&self, r: f64, t: f64, rng: &mut R) -> f64 {
        let u = rng.random::<f64>();
        if t <= 0.0 {
            return 0.0;
        }
        let kappa = r * self.r0 / (2.0 * self.d * t);
        let cos_theta = if kappa < 1e-8 {
            2.0 * u - 1.0
        } else {
            1.0 + (-u * -(-2.0 * kappa).exp_m1()).ln_1p() / kappa
        };
        cos_theta.clamp(-1.0, 1.0).acos()
    }

    /// Coefficient of the radiation boundary condition `u'(sigma) = h u(sigma)`.
    pub fn h(&self) -> f64 {
        self.h
    }
}

impl GreensFunction for PairGreensFunction {
    fn survival(&self, t: f64) -> f64 {
        if t <= 0.0 || self.is_free(t) {
            return 1.0;
        }
        let l = self.a - self.sigma;
        let s = self.series(t, |alpha, w| w * self.moment(alpha, l));
        s.clamp(0.0, 1.0)
    }

    fn cumulative_r(&self, r: f64, t: f64) -> f64 {
        let l = self.a - self.sigma;
        let x = self.a - r.clamp(self.sigma, self.a);
        let c = self.series(t, |alpha, w| w * (self.moment(alpha, l) - self.moment(alpha, x)));
        c.max(0.0)
    }

    fn r_range(&self) -> (f64, f64) {
        (self.sigma, self.a)
    }

    fn time_scale(&self) -> f64 {
        let l = self.a - self.sigma;
        l * l / self.d
    }

    fn is_free(&self, t: f64) -> bool {
        let dmin = self.nearest_boundary();
        dmin * dmin > FREE_RATIO * self.d * t
    }

    fn draw_free_r<R: Rng + ?Sized>(&self, t: f64, rng: &mut R) -> f64 {
        if t <= 0.0 {
            return self.r0;
        }
        let sigma_g = (2.0 * self.d * t).sqrt();
        let mut r = self.r0;
        for _ in 0..MAX_FREE_DRAWS {
            let v: Vec3 = [
                self.r0 + sigma_g * standard_normal(rng),
                sigma_g * standard_normal(rng),
                sigma_g * standard_normal(rng),
            ];
            r = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
            if r > self.sigma && r < self.a {
                return r;
            }
        }
        r.clamp(self.sigma, self.a)
    }
}

/// Exponentially distributed waiting time for total rate `k`; `+inf` when
/// `k` is zero.
pub fn draw_reaction_time<R: Rng + ?Sized>(k: f64, rng: &mut R) -> f64 {
    if k <= 0.0 {
        return f64::INFINITY;
    }
    let u = 1.0 - rng.random::<f64>();
    -u.ln() / k
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn survival_is_one_at_start_and_decays() -> Result<()> {
        for dim in 1..=3 {
            let gf = AbsorbingShell::new(dim, 1.0, 1.0)?;
            assert_relative_eq!(gf.survival(0.0), 1.0);
            let s1 = gf.survival(0.05);
            let s2 = gf.survival(0.2);
            let s3 = gf.survival(1.0);
            assert!(s1 > s2 && s2 > s3, "dim {dim}: {s1} {s2} {s3}");
            assert!(s3 < 0.05);
            // the series agrees with the free regime at the switch-over
            let t_switch = 1.0 / (FREE_RATIO * 0.999);
            assert!((gf.survival(t_switch) - 1.0).abs() < 1e-5, "dim {dim}");
        }
        Ok(())
    }

    #[test]
    fn cumulative_r_reaches_survival_at_boundary() -> Result<()> {
        for dim in 1..=3 {
            let gf = AbsorbingShell::new(dim, 1.0, 2.0)?;
            let t = 0.3;
            assert_relative_eq!(gf.cumulative_r(2.0, t), gf.survival(t), epsilon = 1e-6);
            assert!(gf.cumulative_r(0.0, t).abs() < 1e-9);
            assert!(gf.cumulative_r(1.0, t) < gf.cumulative_r(1.5, t));
        }
        Ok(())
    }

    #[test]
    fn mean_exit_time_matches_analytic() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(2024);
        for dim in 1..=3 {
            let gf = AbsorbingShell::new(dim, 2.0, 1.5)?;
            let n = 4000;
            let mean = (0..n).map(|_| gf.draw_time(&mut rng)).sum::<f64>() / n as f64;
            let expected = gf.mean_exit_time();
            assert!(
                (mean / expected - 1.0).abs() < 0.06,
                "dim {dim}: mean {mean} expected {expected}"
            );
        }
        Ok(())
    }

    #[test]
    fn degenerate_shells() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(AbsorbingShell::new(3, 0.0, 1.0)?.draw_time(&mut rng).is_infinite());
        assert_eq!(AbsorbingShell::new(3, 1.0, 0.0)?.draw_time(&mut rng), 0.0);
        assert!(AbsorbingShell::new(4, 1.0, 1.0).is_err());
        assert!(draw_reaction_time(0.0, &mut rng).is_infinite());
        Ok(())
    }

    #[test]
    fn draw_r_stays_inside() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(8);
        let gf = AbsorbingShell::new(3, 1.0, 1.0)?;
        for &t in &[1e-5, 0.01, 0.1, 0.5] {
            for _ in 0..50 {
                let r = gf.draw_r(t, &mut rng);
                assert!((0.0..=1.0).contains(&r));
            }
        }
        Ok(())
    }

    #[test]
    fn pair_roots_solve_the_radiation_condition() -> Result<()> {
        let gf = PairGreensFunction::new(1.0, 10.0, 1.0, 5.0, 2.0)?;
        let l = gf.a - gf.sigma;
        for &alpha in gf.alphas.iter().take(20) {
            let f = alpha * (alpha * l).cos() + gf.h() * (alpha * l).sin();
            assert!(f.abs() < 1e-8 * alpha.max(1.0), "residual {f}");
        }
        Ok(())
    }

    #[test]
    fn pair_reflecting_survival_matches_cumulative() -> Result<()> {
        let gf = PairGreensFunction::new(1.0, 0.0, 1.0, 4.0, 2.0)?;
        let t = 0.5;
        let s = gf.survival(t);
        assert!(s > 0.0 && s < 1.0);
        assert_relative_eq!(gf.cumulative_r(4.0, t), s, epsilon = 1e-6);
        assert!(gf.cumulative_r(1.0, t).abs() < 1e-9);
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(gf.draw_event_type(t, &mut rng), PairExit::Escape);
        Ok(())
    }

    #[test]
    fn pair_with_fast_reaction_mostly_reacts_near_contact() -> Result<()> {
        let gf = PairGreensFunction::new(1.0, 1e4, 1.0, 10.0, 1.05)?;
        let mut rng = StdRng::seed_from_u64(17);
        let n = 300;
        let reactions = (0..n)
            .filter(|_| {
                let t = gf.draw_time(&mut rng);
                gf.draw_event_type(t, &mut rng) == PairExit::Reaction
            })
            .count();
        assert!(reactions > n * 2 / 3, "reactions {reactions}");
        Ok(())
    }

    #[test]
    fn pair_draws_stay_in_range() -> Result<()> {
        let gf = PairGreensFunction::new(2.0, 5.0, 1.0, 3.0, 1.5)?;
        let mut rng = StdRng::seed_from_u64(4);
        for _ in 0..100 {
            let t = gf.draw_time(&mut rng);
            assert!(t.is_finite() && t >= 0.0);
            let r = gf.draw_r(t * 0.5, &mut rng);
            assert!((1.0..=3.0).contains(&r));
            let theta = gf.draw_theta(r, t * 0.5, &mut rng);
            assert!((0.0..=PI).contains(&theta));
        }
        Ok(())
    }
}
