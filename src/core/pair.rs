use crate::core::domain::{DomainId, EventType};
use crate::core::event::EventId;
use crate::core::geometry::{self, Shape, Sphere, Vec3};
use crate::core::greens::{
    draw_reaction_time, AbsorbingShell, GreensFunction, PairExit, PairGreensFunction,
};
use crate::core::rules::{self, ReactionRule};
use crate::core::shell::ShellId;
use crate::core::single::Single;
use crate::error::{Error, Result};
use rand::Rng;
use std::f64::consts::PI;

/// Two bulk particles sharing one spherical shell centred on their
/// diffusion-weighted centre of mass.
///
/// The motion is split into the centre of mass `R` (free diffusion with
/// `D1 D2 / (D1 + D2)` inside a sphere of radius `a_com`) and the
/// inter-particle vector (radial diffusion with `D1 + D2` between the
/// reactive contact distance `sigma` and `a_r`). The component Singles are
/// kept so that their domain and shell ids are reused when the pair dissolves.
#[derive(Debug, Clone)]
pub struct Pair {
    pub domain_id: DomainId,
    pub shell_id: ShellId,
    pub single1: Single,
    pub single2: Single,
    pub com: Vec3,
    /// Inter-particle distance at formation.
    pub r0: f64,
    shell_size: f64,
    /// Bimolecular rules between the two species.
    pub rules: Vec<ReactionRule>,
    pub k_tot: f64,
    pub a_r: f64,
    pub a_com: f64,
    iv_gf: PairGreensFunction,
    com_gf: AbsorbingShell,
    pub last_time: f64,
    pub dt: f64,
    pub event_type: EventType,
    /// Domain id of the component Single whose unimolecular reaction fires.
    pub reacting: Option<DomainId>,
    pub event_id: Option<EventId>,
}

impl Pair {
    /// Errors:
    /// - `Error::InvalidParam` if both particles are immobile or the shell is too
    ///   small to hold the pair at `r0`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        domain_id: DomainId,
        shell_id: ShellId,
        single1: Single,
        single2: Single,
        com: Vec3,
        r0: f64,
        shell_size: f64,
        rules: Vec<ReactionRule>,
    ) -> Result<Self> {
        let (d1, d2) = (single1.particle.d, single2.particle.d);
        let (radius1, radius2) = (single1.particle.radius, single2.particle.radius);
        let d12 = d1 + d2;
        if d12 <= 0.0 {
            return Err(Error::InvalidParam("pair of immobile particles".into()));
        }
        let sigma = radius1 + radius2;
        let (w1, w2) = (d1 / d12, d2 / d12);
        let g = (d1 * d2).sqrt() / d12;
        // Both particles stay inside the shell with equal exit time scales for
        // the two coordinates: a_com = g (a_r - r0), a_com + w_i a_r + radius_i <= shell.
        let a_r = [(w1, radius1), (w2, radius2)]
            .iter()
            .filter(|(w, _)| g + w > 0.0)
            .map(|&(w, radius)| (shell_size - radius + g * r0) / (g + w))
            .fold(f64::INFINITY, f64::min);
        if !(a_r > r0 && a_r > sigma) {
            return Err(Error::InvalidParam(format!(
                "pair shell {shell_size} too small for r0 {r0}"
            )));
        }
        let a_com = (g * (a_r - r0)).max(0.0);
        let k_tot = rules::total_rate(&rules);
        let iv_gf = PairGreensFunction::new(d12, k_tot, sigma, a_r, r0)?;
        let com_gf = AbsorbingShell::new(3, d1 * d2 / d12, a_com)?;
        Ok(Self {
            domain_id,
            shell_id,
            single1,
            single2,
            com,
            r0,
            shell_size,
            rules,
            k_tot,
            a_r,
            a_com,
            iv_gf,
            com_gf,
            last_time: 0.0,
            dt: 0.0,
            event_type: EventType::IvEvent,
            reacting: None,
            event_id: None,
        })
    }

    #[inline]
    pub fn shell(&self) -> Shape {
        Shape::Sphere(Sphere {
            center: self.com,
            radius: self.shell_size,
        })
    }

    #[inline]
    pub fn shell_size(&self) -> f64 {
        self.shell_size
    }

    pub fn sigma(&self) -> f64 {
        self.single1.particle.radius + self.single2.particle.radius
    }

    pub fn d_tot(&self) -> f64 {
        self.single1.particle.d + self.single2.particle.d
    }

    /// Draws the next event: centre-of-mass escape, inter-particle event or a
    /// unimolecular reaction of either particle, whichever comes first.
    pub fn determine_next_event<R: Rng + ?Sized>(&mut self, now: f64, rng: &mut R) {
        let candidates = [
            (self.com_gf.draw_time(rng), EventType::ComEscape, None),
            (self.iv_gf.draw_time(rng), EventType::IvEvent, None),
            (
                draw_reaction_time(self.single1.k_tot, rng),
                EventType::SingleReaction,
                Some(self.single1.domain_id),
            ),
            (
                draw_reaction_time(self.single2.k_tot, rng),
                EventType::SingleReaction,
                Some(self.single2.domain_id),
            ),
        ];
        let mut best = candidates[0];
        for c in &candidates[1..] {
            if c.0 < best.0 {
                best = *c;
            }
        }
        self.last_time = now;
        (self.dt, self.event_type, self.reacting) = best;
    }

    /// Resolves an `IvEvent` into an escape or a reaction by the boundary fluxes.
    pub fn draw_iv_event_type<R: Rng + ?Sized>(&self, rng: &mut R) -> EventType {
        match self.iv_gf.draw_event_type(self.dt, rng) {
            PairExit::Escape => EventType::IvEscape,
            PairExit::Reaction => EventType::IvReaction,
        }
    }

    /// Centre of mass after `dt` (not wrapped).
    pub fn draw_new_com<R: Rng + ?Sized>(&self, dt: f64, event_type: EventType, rng: &mut R) -> Vec3 {
        let r = if event_type == EventType::ComEscape {
            self.a_com
        } else {
            self.com_gf.draw_r(dt, rng)
        };
        geometry::add(&self.com, &geometry::scale(&geometry::random_unit_vector(rng), r))
    }

    /// Inter-particle vector after `dt`, rotated away from `old_iv` by an
    /// angle drawn for the new length.
    pub fn draw_new_iv<R: Rng + ?Sized>(
        &self,
        dt: f64,
        old_iv: &Vec3,
        event_type: EventType,
        rng: &mut R,
    ) -> Vec3 {
        let r = match event_type {
            EventType::IvEscape => self.a_r,
            EventType::IvReaction => self.sigma(),
            _ => self.iv_gf.draw_r(dt, rng),
        };
        let theta = self.iv_gf.draw_theta(r, dt, rng);
        let u = geometry::normalize(old_iv).unwrap_or_else(|| geometry::random_unit_vector(rng));
        let e1 = geometry::orthogonal_unit(&u);
        let e2 = geometry::cross(&u, &e1);
        let phi = 2.0 * PI * rng.random::<f64>();
        let (st, ct) = theta.sin_cos();
        let radial = geometry::add(
            &geometry::scale(&e1, st * phi.cos()),
            &geometry::scale(&e2, st * phi.sin()),
        );
        geometry::scale(&geometry::add(&geometry::scale(&u, ct), &radial), r)
    }

    /// New positions of both particles after `dt`, wrapped into the box.
    pub fn draw_new_positions<R: Rng + ?Sized>(
        &self,
        dt: f64,
        old_iv: &Vec3,
        event_type: EventType,
        world_size: f64,
        rng: &mut R,
    ) -> Result<(Vec3, Vec3)> {
        match event_type {
            EventType::ComEscape
            | EventType::IvEscape
            | EventType::SingleReaction
            | EventType::Burst => {}
            other => {
                return Err(Error::consistency(format!(
                    "pair {} cannot propagate for {other:?}",
                    self.domain_id
                )))
            }
        }
        let com = self.draw_new_com(dt, event_type, rng);
        let iv = self.draw_new_iv(dt, old_iv, event_type, rng);
        let d12 = self.d_tot();
        let w1 = self.single1.particle.d / d12;
        let w2 = self.single2.particle.d / d12;
        let pos1 = geometry::sub(&com, &geometry::scale(&iv, w1));
        let pos2 = geometry::add(&com, &geometry::scale(&iv, w2));
        Ok((
            geometry::apply_boundary(&pos1, world_size),
            geometry::apply_boundary(&pos2, world_size),
        ))
    }

    pub fn draw_reaction_rule<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<ReactionRule> {
        rules::draw_rule(&self.rules, rng).cloned().ok_or_else(|| {
            Error::consistency(format!(
                "pair {} fired an inter-particle reaction without rules",
                self.domain_id
            ))
        })
    }
}
