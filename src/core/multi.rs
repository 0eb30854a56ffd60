use crate::core::domain::{DomainId, EventType};
use crate::core::event::EventId;
use crate::core::geometry::{self, Sphere, Vec3};
use crate::core::particle::{Particle, ParticleId};
use crate::core::rules::{self, NetworkRules, ReactionRule};
use crate::core::shell::ShellId;
use std::collections::BTreeMap;

/// Upper bound on the per-step probability of a unimolecular reaction.
const MAX_REACTION_PROBABILITY: f64 = 0.01;

/// Many particles in contact, advanced by fixed-step Brownian dynamics.
///
/// Every member contributes one spherical shell fixed at the position it
/// had when it joined; a member that moves out of all shells ends the Multi.
#[derive(Debug, Clone)]
pub struct Multi {
    pub domain_id: DomainId,
    pub particles: BTreeMap<ParticleId, Particle>,
    pub shells: Vec<(ShellId, Sphere)>,
    pub last_time: f64,
    pub dt: f64,
    pub event_id: Option<EventId>,
    /// Outcome of the last Brownian step, `None` if nothing happened.
    pub last_event: Option<EventType>,
    pub last_reaction: Option<rules::ReactionRecord>,
}

impl Multi {
    pub fn new(domain_id: DomainId) -> Self {
        Self {
            domain_id,
            particles: BTreeMap::new(),
            shells: Vec::new(),
            last_time: 0.0,
            dt: 0.0,
            event_id: None,
            last_event: None,
            last_reaction: None,
        }
    }

    pub fn add_particle(&mut self, particle: Particle) {
        self.particles.insert(particle.id, particle);
    }

    pub fn add_shell(&mut self, id: ShellId, shell: Sphere) {
        self.shells.push((id, shell));
    }

    #[inline]
    pub fn has_particle(&self, id: ParticleId) -> bool {
        self.particles.contains_key(&id)
    }

    /// Whether the ball `(pos, radius)` lies inside one of the Multi's shells.
    pub fn within_shell(&self, pos: &Vec3, radius: f64, world_size: f64) -> bool {
        self.shells.iter().any(|(_, s)| {
            geometry::periodic_distance(&s.center, pos, world_size) + radius <= s.radius
        })
    }

    /// Starts a new Brownian step sequence at `now`.
    pub fn initialize(&mut self, now: f64, bd_dt_factor: f64, network: &NetworkRules) {
        self.last_time = now;
        self.dt = self.calculate_dt(bd_dt_factor, network);
    }

    /// Step length: `bd_dt_factor * min(radius^2 / D)` over mobile members,
    /// shortened so no unimolecular reaction exceeds a small per-step
    /// probability. Infinite when nothing can move or react.
    pub fn calculate_dt(&self, bd_dt_factor: f64, network: &NetworkRules) -> f64 {
        let diffusion = self
            .particles
            .values()
            .filter(|p| p.d > 0.0)
            .map(|p| bd_dt_factor * p.radius * p.radius / p.d)
            .fold(f64::INFINITY, f64::min);
        let k_max = self
            .particles
            .values()
            .map(|p| rules::total_rate(network.query_reaction_rule(p.species)))
            .fold(0.0, f64::max);
        let reaction = if k_max > 0.0 {
            MAX_REACTION_PROBABILITY / k_max
        } else {
            f64::INFINITY
        };
        diffusion.min(reaction)
    }

    /// Records the outcome of a step; reactions take precedence over escapes.
    pub fn record_event(&mut self, event: EventType) {
        let is_reaction = |e: EventType| {
            matches!(
                e,
                EventType::MultiUnimolecularReaction | EventType::MultiBimolecularReaction
            )
        };
        match self.last_event {
            Some(prev) if is_reaction(prev) && !is_reaction(event) => {}
            _ => self.last_event = Some(event),
        }
    }

    /// Unimolecular rules of a member, for the Brownian propagator.
    pub fn unimolecular_rules<'a>(
        &self,
        network: &'a NetworkRules,
        id: ParticleId,
    ) -> &'a [ReactionRule] {
        match self.particles.get(&id) {
            Some(p) => network.query_reaction_rule(p.species),
            None => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::particle::{Species, SpeciesId};
    use crate::core::structure::StructureId;
    use crate::error::Result;
    use approx::assert_relative_eq;

    fn particle(id: u64, pos: Vec3, d: f64) -> Result<Particle> {
        let sp = Species::new(SpeciesId(0), "A", 1.0, d, StructureId::BULK)?;
        Particle::new(ParticleId(id), &sp, pos)
    }

    #[test]
    fn dt_follows_fastest_member() -> Result<()> {
        let mut m = Multi::new(DomainId(0));
        m.add_particle(particle(0, [0.0; 3], 1.0)?);
        m.add_particle(particle(1, [2.0, 0.0, 0.0], 4.0)?);
        let network = NetworkRules::new();
        m.initialize(1.0, 1e-5, &network);
        assert_relative_eq!(m.dt, 1e-5 / 4.0);
        assert_eq!(m.last_time, 1.0);

        let mut m = Multi::new(DomainId(1));
        m.add_particle(particle(0, [0.0; 3], 0.0)?);
        assert!(m.calculate_dt(1e-5, &network).is_infinite());
        Ok(())
    }

    #[test]
    fn within_shell_checks_every_shell() {
        let mut m = Multi::new(DomainId(0));
        m.add_shell(ShellId(0), Sphere { center: [1.0, 1.0, 1.0], radius: 1.05 });
        m.add_shell(ShellId(1), Sphere { center: [3.0, 1.0, 1.0], radius: 1.05 });
        assert!(m.within_shell(&[1.02, 1.0, 1.0], 1.0, 10.0));
        assert!(m.within_shell(&[3.0, 1.04, 1.0], 1.0, 10.0));
        assert!(!m.within_shell(&[2.0, 1.0, 1.0], 1.0, 10.0));
    }

    #[test]
    fn reaction_outranks_escape() {
        let mut m = Multi::new(DomainId(0));
        m.record_event(EventType::MultiEscape);
        m.record_event(EventType::MultiBimolecularReaction);
        m.record_event(EventType::MultiEscape);
        assert_eq!(m.last_event, Some(EventType::MultiBimolecularReaction));
    }
}
