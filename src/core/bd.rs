//! Brownian dynamics inside a Multi.

use crate::core::domain::EventType;
use crate::core::geometry;
use crate::core::multi::Multi;
use crate::core::particle::Particle;
use crate::core::rules::{self, ReactionRecord, ReactionRule};
use crate::core::sim::Simulator;
use crate::core::special::erfc;
use crate::error::{Error, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use std::f64::consts::PI;
use tracing::trace;

/// Integrated reaction flux for two spheres at contact distance `sigma`
/// after one Brownian step of length `t` with relative diffusion `d`.
///
/// Normalises the acceptance probability of a bimolecular reaction between
/// two overlapping Multi members.
pub fn i_bd(sigma: f64, t: f64, d: f64) -> f64 {
    let sqrt_pi = PI.sqrt();
    let dt = d * t;
    let sqrt_dt = dt.sqrt();
    let sigma_sq = sigma * sigma;
    let term1 = 1.0 / (3.0 * sqrt_pi);
    let term2 = sigma_sq - 2.0 * dt;
    let term3 = 2.0 * dt - 3.0 * sigma_sq;
    let term4 = sqrt_pi * sigma_sq * sigma * erfc(sigma / sqrt_dt);
    term1 * (-sqrt_dt * (term2 * (-sigma_sq / dt).exp() + term3) + term4)
}

impl Simulator {
    /// Advances every member of `multi` by one step of `multi.dt`, in random
    /// order. The outcome is left in `multi.last_event`.
    pub(crate) fn step_multi(&mut self, multi: &mut Multi) -> Result<()> {
        multi.last_event = None;
        multi.last_reaction = None;
        let dt = multi.dt;
        let mut order: Vec<_> = multi.particles.keys().copied().collect();
        order.shuffle(&mut self.rng);

        for id in order {
            // consumed by a reaction earlier in this step
            let Some(particle) = multi.particles.get(&id).cloned() else {
                continue;
            };
            if self.attempt_unimolecular(multi, &particle, dt)? {
                continue;
            }
            if particle.d == 0.0 {
                continue;
            }
            self.move_member(multi, &particle, dt)?;
        }
        multi.last_time = self.t;
        Ok(())
    }

    /// Returns true if the particle reacted or tried to and was rejected;
    /// either way it does not move this step.
    fn attempt_unimolecular(&mut self, multi: &mut Multi, particle: &Particle, dt: f64) -> Result<bool> {
        let rules = multi.unimolecular_rules(&self.network, particle.id).to_vec();
        if rules::total_rate(&rules) <= 0.0 {
            return Ok(false);
        }
        let rnd: f64 = self.rng.random();
        let mut acc = 0.0;
        let Some(rule) = rules.into_iter().find(|r| {
            acc += r.k * dt;
            acc > rnd
        }) else {
            return Ok(false);
        };
        match self.fire_multi_unimolecular(multi, particle, rule) {
            Ok(()) => Ok(true),
            Err(Error::NoSpace) => {
                self.counters.rejected_moves += 1;
                trace!(multi = %multi.domain_id, particle = %particle.id, "multi reaction rejected: no space");
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    fn fire_multi_unimolecular(
        &mut self,
        multi: &mut Multi,
        reactant: &Particle,
        rule: ReactionRule,
    ) -> Result<()> {
        let origin = reactant.position;
        let products = match rule.products.as_slice() {
            [] => {
                self.world.remove_particle(reactant.id)?;
                multi.particles.remove(&reactant.id);
                Vec::new()
            }
            [product] => {
                let radius = self.world.get_species(*product)?.radius;
                if radius > reactant.radius {
                    self.clear_volume(&origin, radius, &[multi.domain_id])?;
                }
                if self.world.check_overlap(&origin, radius, &[reactant.id]) {
                    return Err(Error::NoSpace);
                }
                self.world.remove_particle(reactant.id)?;
                multi.particles.remove(&reactant.id);
                let particle = self.world.new_particle(*product, origin)?;
                multi.add_particle(particle.clone());
                vec![particle]
            }
            [product1, product2] => {
                let structure = *self.world.structure_of(reactant.species)?;
                let (pos1, pos2) = self.place_product_pair(
                    &origin,
                    &structure,
                    *product1,
                    *product2,
                    &[reactant.id],
                    &[multi.domain_id],
                )?;
                self.world.remove_particle(reactant.id)?;
                multi.particles.remove(&reactant.id);
                let particle1 = self.world.new_particle(*product1, pos1)?;
                let particle2 = self.world.new_particle(*product2, pos2)?;
                multi.add_particle(particle1.clone());
                multi.add_particle(particle2.clone());
                vec![particle1, particle2]
            }
            _ => {
                return Err(Error::consistency(format!(
                    "rule with {} products fired in multi {}",
                    rule.products.len(),
                    multi.domain_id
                )))
            }
        };
        multi.record_event(EventType::MultiUnimolecularReaction);
        multi.last_reaction = Some(ReactionRecord {
            rule,
            reactants: vec![reactant.clone()],
            products,
        });
        Ok(())
    }

    /// Gaussian move of one member. Moves onto another member are rejected
    /// unless they are a single contact that reacts; moves out of all shells
    /// mark an escape and clear the space around the new position first.
    fn move_member(&mut self, multi: &mut Multi, particle: &Particle, dt: f64) -> Result<()> {
        let structure = *self.world.structure_of(particle.species)?;
        let ws = self.world.world_size();
        let sigma = (2.0 * particle.d * dt).sqrt();
        let displacement = structure.gaussian_displacement(sigma, &mut self.rng);
        let new_pos = self
            .world
            .apply_boundary(&geometry::add(&particle.position, &displacement));

        let contacts: Vec<_> = multi
            .particles
            .values()
            .filter(|p| p.id != particle.id)
            .filter(|p| self.world.distance(&new_pos, &p.position) < particle.radius + p.radius)
            .map(|p| p.id)
            .collect();
        if let [partner] = contacts.as_slice() {
            if let Some(partner) = multi.particles.get(partner).cloned() {
                self.attempt_bimolecular(multi, particle, &partner, dt)?;
            }
            return Ok(());
        }
        if !contacts.is_empty() {
            return Ok(());
        }

        if !multi.within_shell(&new_pos, particle.radius, ws) {
            multi.record_event(EventType::MultiEscape);
            self.clear_volume(&new_pos, particle.radius, &[multi.domain_id])?;
            if self.world.check_overlap(&new_pos, particle.radius, &[particle.id]) {
                return Ok(());
            }
        }

        let moved = particle.moved_to(new_pos);
        self.world.update_particle(moved.clone())?;
        multi.particles.insert(moved.id, moved);
        Ok(())
    }

    fn attempt_bimolecular(
        &mut self,
        multi: &mut Multi,
        particle: &Particle,
        partner: &Particle,
        dt: f64,
    ) -> Result<()> {
        let rules = self
            .network
            .query_reaction_rule_pair(particle.species, partner.species)
            .to_vec();
        let k_tot = rules::total_rate(&rules);
        if k_tot <= 0.0 {
            return Ok(());
        }
        let sigma = particle.radius + partner.radius;
        let i = i_bd(sigma, dt, particle.d + partner.d);
        if !(i > 0.0) {
            return Ok(());
        }
        let p = (k_tot * dt / (4.0 * PI * i)).min(1.0);
        let rnd: f64 = self.rng.random();
        if rnd >= p {
            return Ok(());
        }
        // pick the rule proportionally to k
        let target = rnd / p * k_tot;
        let mut acc = 0.0;
        let Some(rule) = rules.into_iter().find(|r| {
            acc += r.k;
            acc > target
        }) else {
            return Ok(());
        };

        match self.fire_multi_bimolecular(multi, particle, partner, rule) {
            Err(Error::NoSpace) => {
                self.counters.rejected_moves += 1;
                trace!(multi = %multi.domain_id, "multi pair reaction rejected: no space");
                Ok(())
            }
            other => other,
        }
    }

    fn fire_multi_bimolecular(
        &mut self,
        multi: &mut Multi,
        particle: &Particle,
        partner: &Particle,
        rule: ReactionRule,
    ) -> Result<()> {
        let reactant_ids = [particle.id, partner.id];
        let products = match rule.products.as_slice() {
            [] => Vec::new(),
            [product] => {
                let radius = self.world.get_species(*product)?.radius;
                let com = self.world.calculate_pair_com(
                    &particle.position,
                    &partner.position,
                    particle.d,
                    partner.d,
                );
                self.clear_volume(&com, radius, &[multi.domain_id])?;
                if self.world.check_overlap(&com, radius, &reactant_ids) {
                    return Err(Error::NoSpace);
                }
                vec![(*product, com)]
            }
            _ => {
                return Err(Error::consistency(format!(
                    "bimolecular rule with {} products fired in multi {}",
                    rule.products.len(),
                    multi.domain_id
                )))
            }
        };
        for id in reactant_ids {
            self.world.remove_particle(id)?;
            multi.particles.remove(&id);
        }
        let mut placed = Vec::with_capacity(products.len());
        for (species, pos) in products {
            let p = self.world.new_particle(species, pos)?;
            multi.add_particle(p.clone());
            placed.push(p);
        }
        multi.record_event(EventType::MultiBimolecularReaction);
        multi.last_reaction = Some(ReactionRecord {
            rule,
            reactants: vec![particle.clone(), partner.clone()],
            products: placed,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn i_bd_matches_short_time_limit() {
        // sigma^2 sqrt(D t / pi) when the step is much shorter than sigma^2 / D
        let (sigma, t, d) = (1.0, 1e-5, 2.0);
        let expected = sigma * sigma * (d * t / PI).sqrt();
        assert_relative_eq!(i_bd(sigma, t, d), expected, max_relative = 1e-4);
    }

    #[test]
    fn i_bd_grows_with_step() {
        let a = i_bd(1.0, 1e-3, 2.0);
        let b = i_bd(1.0, 0.1, 2.0);
        assert!(a > 0.0 && b > a);
        assert_relative_eq!(b, 0.218_853_271_330_313_9, max_relative = 1e-5);
    }
}
