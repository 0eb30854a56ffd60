use crate::core::domain::{DomainId, EventType};
use crate::core::event::EventId;
use crate::core::geometry::{self, Shape, Vec3};
use crate::core::greens::{draw_reaction_time, AbsorbingShell, GreensFunction};
use crate::core::particle::Particle;
use crate::core::rules::{self, ReactionRule};
use crate::core::shell::ShellId;
use crate::core::structure::Structure;
use crate::error::{Error, Result};
use rand::Rng;

/// One particle protected by one shell.
///
/// The shell is centred on the particle's position at the last update;
/// its `size` is the mobility radius plus the particle radius. A Single is
/// *reset* when its size equals the particle radius (zero mobility).
#[derive(Debug, Clone)]
pub struct Single {
    pub domain_id: DomainId,
    pub shell_id: ShellId,
    pub particle: Particle,
    pub structure: Structure,
    /// Unimolecular rules of the particle's species.
    pub rules: Vec<ReactionRule>,
    pub k_tot: f64,
    shell: Shape,
    size: f64,
    pub last_time: f64,
    pub dt: f64,
    pub event_type: EventType,
    pub event_id: Option<EventId>,
}

impl Single {
    /// A reset Single at the particle's position; call [`Single::initialize`]
    /// before scheduling it.
    pub fn new(
        domain_id: DomainId,
        shell_id: ShellId,
        particle: Particle,
        structure: Structure,
        rules: Vec<ReactionRule>,
    ) -> Self {
        let size = particle.radius;
        let shell = structure.shell_shape(particle.position, size, particle.radius);
        let k_tot = rules::total_rate(&rules);
        Self {
            domain_id,
            shell_id,
            particle,
            structure,
            rules,
            k_tot,
            shell,
            size,
            last_time: 0.0,
            dt: 0.0,
            event_type: EventType::SingleEscape,
            event_id: None,
        }
    }

    #[inline]
    pub fn shell(&self) -> Shape {
        self.shell
    }

    #[inline]
    pub fn size(&self) -> f64 {
        self.size
    }

    /// Centre of the shell, which is where the particle was at the last update.
    #[inline]
    pub fn position(&self) -> Vec3 {
        self.shell.center()
    }

    #[inline]
    pub fn mobility_radius(&self) -> f64 {
        (self.size - self.particle.radius).max(0.0)
    }

    #[inline]
    pub fn is_reset(&self) -> bool {
        self.size <= self.particle.radius
    }

    /// Replaces the shell by one of `size` at `center`.
    pub fn set_shell(&mut self, center: Vec3, size: f64) {
        self.size = size;
        self.shell = self
            .structure
            .shell_shape(center, size, self.particle.radius);
    }

    /// Shrinks the shell to the particle at its current position.
    pub fn reset(&mut self) {
        self.set_shell(self.particle.position, self.particle.radius);
    }

    /// Resets the shell at the particle's position and draws the next event.
    pub fn initialize<R: Rng + ?Sized>(&mut self, now: f64, rng: &mut R) -> Result<()> {
        self.reset();
        self.last_time = now;
        let (dt, event_type) = self.determine_next_event(rng)?;
        self.dt = dt;
        self.event_type = event_type;
        Ok(())
    }

    pub fn greens_function(&self) -> Result<AbsorbingShell> {
        AbsorbingShell::new(
            self.structure.dimension(),
            self.particle.d,
            self.mobility_radius(),
        )
    }

    /// Earliest of the escape time and the reaction time.
    ///
    /// A reset mobile Single escapes immediately; an immobile one never escapes.
    pub fn determine_next_event<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<(f64, EventType)> {
        let escape_dt = if self.particle.d == 0.0 {
            f64::INFINITY
        } else if self.mobility_radius() == 0.0 {
            0.0
        } else {
            self.greens_function()?.draw_time(rng)
        };
        if escape_dt == 0.0 {
            return Ok((0.0, EventType::SingleEscape));
        }
        let reaction_dt = draw_reaction_time(self.k_tot, rng);
        if reaction_dt < escape_dt {
            Ok((reaction_dt, EventType::SingleReaction))
        } else {
            Ok((escape_dt, EventType::SingleEscape))
        }
    }

    pub fn draw_reaction_rule<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<ReactionRule> {
        rules::draw_rule(&self.rules, rng).cloned().ok_or_else(|| {
            Error::consistency(format!(
                "single {} fired a reaction without reaction rules",
                self.domain_id
            ))
        })
    }

    /// Position after `dt` given the kind of event, wrapped into the box.
    ///
    /// Escapes land on the mobility boundary; reactions and bursts sample the
    /// interior at `dt`.
    pub fn draw_new_position<R: Rng + ?Sized>(
        &self,
        dt: f64,
        event_type: EventType,
        world_size: f64,
        rng: &mut R,
    ) -> Result<Vec3> {
        let a = self.mobility_radius();
        let r = match event_type {
            EventType::SingleEscape => a,
            EventType::SingleReaction | EventType::Burst => {
                if dt > 0.0 && a > 0.0 {
                    self.greens_function()?.draw_r(dt, rng)
                } else {
                    0.0
                }
            }
            other => {
                return Err(Error::consistency(format!(
                    "single {} cannot propagate for {other:?}",
                    self.domain_id
                )))
            }
        };
        let displacement = self.structure.random_vector(r, rng);
        Ok(geometry::apply_boundary(
            &geometry::add(&self.position(), &displacement),
            world_size,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::particle::{ParticleId, Species, SpeciesId};
    use crate::core::structure::StructureId;
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, SeedableRng};

    fn single(d: f64, rules: Vec<ReactionRule>) -> Result<Single> {
        let sp = Species::new(SpeciesId(0), "A", 0.5, d, StructureId::BULK)?;
        let p = Particle::new(ParticleId(0), &sp, [5.0, 5.0, 5.0])?;
        Ok(Single::new(DomainId(0), ShellId(0), p, Structure::Region, rules))
    }

    #[test]
    fn reset_single_escapes_immediately() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(1);
        let mut s = single(1.0, vec![])?;
        s.initialize(2.0, &mut rng)?;
        assert!(s.is_reset());
        assert_eq!(s.dt, 0.0);
        assert_eq!(s.event_type, EventType::SingleEscape);
        assert_eq!(s.last_time, 2.0);
        Ok(())
    }

    #[test]
    fn immobile_inert_single_never_fires() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(1);
        let mut s = single(0.0, vec![])?;
        s.initialize(0.0, &mut rng)?;
        assert!(s.dt.is_infinite());
        let rule = ReactionRule::unimolecular(SpeciesId(0), vec![], 2.0)?;
        let mut s = single(0.0, vec![rule])?;
        s.initialize(0.0, &mut rng)?;
        assert!(s.dt.is_finite());
        assert_eq!(s.event_type, EventType::SingleReaction);
        Ok(())
    }

    #[test]
    fn escape_lands_on_mobility_boundary() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(9);
        let mut s = single(1.0, vec![])?;
        s.set_shell([5.0, 5.0, 5.0], 2.0);
        let (dt, kind) = s.determine_next_event(&mut rng)?;
        assert!(dt > 0.0 && dt.is_finite());
        assert_eq!(kind, EventType::SingleEscape);
        let pos = s.draw_new_position(dt, kind, 100.0, &mut rng)?;
        let moved = geometry::periodic_distance(&pos, &s.position(), 100.0);
        assert_relative_eq!(moved, 1.5, epsilon = 1e-12);
        let burst = s.draw_new_position(dt * 0.5, EventType::Burst, 100.0, &mut rng)?;
        assert!(geometry::periodic_distance(&burst, &s.position(), 100.0) <= 1.5);
        assert!(s
            .draw_new_position(dt, EventType::ComEscape, 100.0, &mut rng)
            .is_err());
        Ok(())
    }
}
