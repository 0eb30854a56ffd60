//! Shell sizing and domain formation around a freshly propagated Single.
//!
//! After a Single fires it either gets a new shell sized against its
//! neighbours, or, when neighbours are too close, is paired with the nearest
//! one or absorbed into a Multi together with everything in contact.

use crate::core::domain::{Domain, DomainId};
use crate::core::geometry::{Shape, Sphere, Vec3};
use crate::core::multi::Multi;
use crate::core::pair::Pair;
use crate::core::shell::Neighbor;
use crate::core::sim::{Simulator, SAFETY};
use crate::core::single::Single;
use crate::error::{Error, Result};
use tracing::{debug, trace};

/// A Pair shell must beat the two Singles' protective radii by this ratio.
const PAIR_SHELL_ADVANTAGE: f64 = 1.3;

/// Cap on a Pair shell relative to the gap between its particles.
const PAIR_GAP_FACTOR: f64 = 100.0;

impl Simulator {
    /// Radius around a Single inside which neighbouring shells are burst.
    pub(crate) fn intruder_radius(&self, single: &Single) -> f64 {
        let r = single.particle.radius;
        let reach = r * self.config.shells.single_shell_factor;
        if single.structure.is_bulk() {
            reach
        } else {
            // a reset surface shell extends sqrt(2) r from its centre
            (reach * reach + r * r).sqrt()
        }
    }

    /// Radius within which neighbours join a Single in a Multi.
    fn multi_threshold(&self, single: &Single) -> f64 {
        let contact = single.particle.radius * (1.0 + self.config.shells.multi_shell_factor);
        if single.structure.is_bulk() {
            contact
        } else {
            contact.max(self.intruder_radius(single))
        }
    }

    /// Domains with a shell closer than `radius` to `pos`, and the closest
    /// shell of any other domain.
    pub(crate) fn get_intruders(
        &self,
        pos: &Vec3,
        radius: f64,
        ignore: &[DomainId],
    ) -> (Vec<DomainId>, Option<Neighbor>) {
        let intruders = self.neighbor_domains_within(pos, radius, ignore);
        let mut skip = ignore.to_vec();
        skip.extend_from_slice(&intruders);
        let closest = self.containers.closest(pos, &skip);
        (intruders, closest)
    }

    pub(crate) fn get_closest_obj(&self, pos: &Vec3, ignore: &[DomainId]) -> Option<Neighbor> {
        self.containers.closest(pos, ignore)
    }

    /// Distance from `pos` to the nearest shell surface of domain `id`.
    pub(crate) fn obj_distance(&self, pos: &Vec3, id: DomainId) -> Result<f64> {
        let domain = self
            .domains
            .get(&id)
            .ok_or_else(|| Error::consistency(format!("distance to missing domain {id}")))?;
        let ws = self.world.world_size();
        Ok(domain
            .shells()
            .iter()
            .map(|(_, shape)| shape.distance(pos, ws))
            .fold(f64::INFINITY, f64::min))
    }

    /// Gives `single` the largest shell its surroundings allow and draws its
    /// next event. `single` must not be in the domain table.
    pub(crate) fn update_single(
        &mut self,
        single: &mut Single,
        closest: Option<Neighbor>,
    ) -> Result<()> {
        let size = self.calculate_single_shell_size(single, closest)?;
        let center = single.position();
        single.set_shell(center, size);
        let (dt, event_type) = single.determine_next_event(&mut self.rng)?;
        single.dt = dt;
        single.event_type = event_type;
        single.last_time = self.t;
        trace!(single = %single.domain_id, size, dt, "update single");
        self.containers
            .update(single.shell_id, single.domain_id, single.shell())
    }

    /// Sizes `single` against `closest` and schedules it. A mobile Single
    /// whose neighbours leave it no room to move is put in a Multi with them.
    pub(crate) fn settle_single(
        &mut self,
        mut single: Single,
        closest: Option<Neighbor>,
    ) -> Result<()> {
        self.update_single(&mut single, closest)?;
        let Some(neighbor) = self.squeezing_neighbor(&single, closest) else {
            return self.add_domain_event(Domain::Single(single));
        };

        let pos = single.position();
        let reach = self.multi_threshold(&single).max(neighbor.distance);
        let around = self.neighbor_domains_within(&pos, reach, &[single.domain_id]);
        let burst = self.burst_non_multis(&around)?;
        let mut neighbors = Vec::with_capacity(burst.len());
        for id in burst {
            neighbors.push((id, self.obj_distance(&pos, id)?));
        }
        neighbors.sort_by(|a, b| a.1.total_cmp(&b.1));
        let nearest = neighbors.first().map_or(0.0, |n| n.1);
        let threshold = self.multi_threshold(&single).max(nearest);
        debug!(
            single = %single.domain_id,
            neighbor = %neighbor.domain_id,
            threshold,
            "no room to move"
        );
        match self.form_multi(single, &neighbors, threshold)? {
            None => Ok(()),
            Some(single) => self.add_domain_event(Domain::Single(single)),
        }
    }

    /// The neighbour that pinned a mobile Single to a reset shell, if the
    /// structure would otherwise allow it to move.
    fn squeezing_neighbor(&self, single: &Single, closest: Option<Neighbor>) -> Option<Neighbor> {
        let r = single.particle.radius;
        if single.particle.d == 0.0 || !single.is_reset() {
            return None;
        }
        if single.structure.fit_size(self.max_shell_size(), r) <= r {
            return None;
        }
        closest
    }

    fn calculate_single_shell_size(
        &self,
        single: &Single,
        closest: Option<Neighbor>,
    ) -> Result<f64> {
        let r = single.particle.radius;
        let max_size = self.max_shell_size();
        let shell_limit = closest.map_or(f64::INFINITY, |n| n.distance / SAFETY);
        let partition = match closest {
            None => None,
            Some(n) => match self.domains.get(&n.domain_id) {
                Some(Domain::Single(other)) => Some(self.partition_size(single, other)),
                Some(_) => None,
                None => {
                    return Err(Error::consistency(format!(
                        "closest domain {} of single {} is not in the domain table",
                        n.domain_id, single.domain_id
                    )))
                }
            },
        };

        if single.structure.is_bulk() {
            let size = match partition {
                Some(_) if single.particle.d == 0.0 => r,
                Some(p) => p.min(shell_limit).max(r),
                None => shell_limit.max(r),
            };
            return Ok(size.min(max_size));
        }

        // Surface shells: the limit bounds the shell's enclosing ball.
        let fit = |limit: f64| single.structure.fit_size(limit.min(max_size), r);
        let mut size = fit(partition.map_or(shell_limit, |p| p.min(shell_limit)));
        if size <= r {
            size = fit(shell_limit);
        }
        Ok(size.max(r))
    }

    /// Share of the gap between two Singles that goes to `single`, in
    /// proportion to the square roots of the diffusion constants.
    fn partition_size(&self, single: &Single, other: &Single) -> f64 {
        let (r1, r2) = (single.particle.radius, other.particle.radius);
        let (s1, s2) = (single.particle.d.sqrt(), other.particle.d.sqrt());
        let distance = self.world.distance(&single.position(), &other.position());
        if s1 + s2 == 0.0 {
            return r1;
        }
        s1 / (s1 + s2) * (distance - r1 - r2) + r1
    }

    /// Tries a Pair with the nearest burst Single, then a Multi.
    ///
    /// Returns the Single back if it stays on its own.
    pub(crate) fn form_pair_or_multi(
        &mut self,
        single: Single,
        burst: &[DomainId],
    ) -> Result<Option<Single>> {
        let pos = single.position();
        let mut neighbors = Vec::with_capacity(burst.len());
        for &id in burst {
            neighbors.push((id, self.obj_distance(&pos, id)?));
        }
        neighbors.sort_by(|a, b| a.1.total_cmp(&b.1));

        let mut single = single;
        if let Some(&(nearest, _)) = neighbors.first() {
            if matches!(self.domains.get(&nearest), Some(Domain::Single(_))) {
                let rest: Vec<DomainId> = neighbors[1..].iter().map(|n| n.0).collect();
                match self.form_pair(single, nearest, &rest)? {
                    None => return Ok(None),
                    Some(s) => single = s,
                }
            }
        }
        let threshold = self.multi_threshold(&single);
        self.form_multi(single, &neighbors, threshold)
    }

    /// Pairs `single1` with the Single `id2` when a shared shell is worth it.
    ///
    /// `others` are the remaining burst domains. Returns `single1` back if
    /// no Pair was formed.
    fn form_pair(
        &mut self,
        single1: Single,
        id2: DomainId,
        others: &[DomainId],
    ) -> Result<Option<Single>> {
        let Some(Domain::Single(single2)) = self.domains.get(&id2) else {
            return Ok(Some(single1));
        };
        if !single1.structure.is_bulk() || !single2.structure.is_bulk() {
            return Ok(Some(single1));
        }
        let (p1, p2) = (&single1.particle, &single2.particle);
        let d12 = p1.d + p2.d;
        if d12 <= 0.0 {
            return Ok(Some(single1));
        }
        let sigma = p1.radius + p2.radius;
        let r0 = self.world.distance(&p1.position, &p2.position);
        if r0 < sigma * (1.0 - 1e-9) {
            return Err(Error::consistency(format!(
                "particles {} and {} overlap: distance {r0} < {sigma}",
                p1.id, p2.id
            )));
        }
        let gap = (r0 - sigma).max(0.0);

        // 1. room both particles need to move proportionally to their D
        let need1 = r0 * p1.d / d12 + p1.radius;
        let need2 = r0 * p2.d / d12 + p2.radius;
        let (margin1, margin2) = (2.0 * p1.radius, 2.0 * p2.radius);
        let (min_shell, margin) = if need1 + margin1 >= need2 + margin2 {
            (need1, margin1)
        } else {
            (need2, margin2)
        };
        let min_with_margin = min_shell + margin;
        let com = self
            .world
            .calculate_pair_com(&p1.position, &p2.position, p1.d, p2.d);

        // 2. the shell must fit under the global and gap-scaled caps
        let max_shell = self
            .max_shell_size()
            .min(gap * PAIR_GAP_FACTOR + sigma + margin);
        if min_with_margin >= max_shell {
            debug!(single1 = %single1.domain_id, single2 = %id2, min_with_margin, max_shell, "no pair: shell too large");
            return Ok(Some(single1));
        }

        // 3. nearest burst Single around the centre of mass
        let ss_factor = self.config.shells.single_shell_factor;
        let mut closest: Option<DomainId> = None;
        let mut closest_distance = f64::INFINITY;
        for &id in others {
            if let Some(Domain::Single(b)) = self.domains.get(&id) {
                let d = self.world.distance(&com, &b.position()) - b.particle.radius * ss_factor;
                if d < closest_distance {
                    closest = Some(id);
                    closest_distance = d;
                }
            }
        }
        if closest_distance <= min_with_margin {
            debug!(single1 = %single1.domain_id, single2 = %id2, closest_distance, "no pair: squeezed by burst single");
            return Ok(Some(single1));
        }

        // 4. nearest other shell; grow as far as it allows
        if let Some(n) = self.get_closest_obj(&com, &[single1.domain_id, id2]) {
            if n.distance < closest_distance {
                closest = Some(n.domain_id);
                closest_distance = n.distance;
            }
        }
        let shell_size = match closest.map(|id| (id, self.domains.get(&id))) {
            Some((_, Some(Domain::Single(c)))) => {
                let d_tot = c.particle.d + d12;
                let to_closest = self.world.distance(&com, &c.particle.position);
                let ideal = (d12 / d_tot) * (to_closest - min_shell - c.particle.radius) + min_shell;
                ideal
                    .min(to_closest - c.particle.radius * ss_factor)
                    .min(closest_distance)
            }
            Some((_, Some(_))) | None => closest_distance,
            Some((id, None)) => {
                return Err(Error::consistency(format!(
                    "closest domain {id} of a pair candidate is not in the domain table"
                )))
            }
        } / SAFETY;
        if shell_size <= min_with_margin {
            debug!(single1 = %single1.domain_id, single2 = %id2, shell_size, "no pair: squeezed");
            return Ok(Some(single1));
        }

        // 5. not worth it if two Singles would do nearly as well
        let d1 = self.world.distance(&com, &p1.position);
        let d2 = self.world.distance(&com, &p2.position);
        let singles_reach = (d1 + p1.radius * ss_factor).max(d2 + p2.radius * ss_factor);
        if shell_size < singles_reach * PAIR_SHELL_ADVANTAGE {
            debug!(single1 = %single1.domain_id, single2 = %id2, shell_size, singles_reach, "no pair: singles better");
            return Ok(Some(single1));
        }
        let shell_size = shell_size.min(max_shell);

        // 6. commit
        let rules = self
            .network
            .query_reaction_rule_pair(p1.species, p2.species)
            .to_vec();
        let mut single2 = match self.take_domain(id2)? {
            Domain::Single(s) => s,
            other => {
                self.domains.insert(id2, other);
                return Err(Error::consistency(format!("pair partner {id2} is not a single")));
            }
        };
        self.cancel_event(single2.event_id.take())?;
        self.containers.remove(single1.shell_id)?;
        self.containers.remove(single2.shell_id)?;

        let pair_id = self.new_domain_id();
        let shell_id = self.new_shell_id();
        let mut pair = Pair::new(
            pair_id, shell_id, single1, single2, com, r0, shell_size, rules,
        )?;
        pair.determine_next_event(self.t, &mut self.rng);
        self.containers.update(shell_id, pair_id, pair.shell())?;
        debug!(
            pair = %pair_id,
            single1 = %pair.single1.domain_id,
            single2 = %pair.single2.domain_id,
            r0,
            shell_size,
            dt = pair.dt,
            event = ?pair.event_type,
            "pair formed"
        );
        self.add_domain_event(Domain::Pair(pair))?;
        Ok(None)
    }

    /// Absorbs `single` and every neighbour within `threshold` into a Multi.
    ///
    /// `neighbors` are the burst domains with their distance from the
    /// Single, nearest first. Returns `single` back if nothing is in contact.
    fn form_multi(
        &mut self,
        single: Single,
        neighbors: &[(DomainId, f64)],
        threshold: f64,
    ) -> Result<Option<Single>> {
        match neighbors.first() {
            Some(&(_, d)) if d <= threshold => {}
            _ => return Ok(Some(single)),
        }
        let members: Vec<DomainId> = neighbors
            .iter()
            .filter(|n| n.1 <= threshold)
            .map(|n| n.0)
            .collect();
        let nearest = members[0];

        let (mut multi, existing) = match self.take_domain(nearest)? {
            Domain::Multi(m) => (m, true),
            other => {
                self.domains.insert(nearest, other);
                (Multi::new(self.new_domain_id()), false)
            }
        };
        let single_id = single.domain_id;
        self.add_to_multi(&mut multi, single)?;
        let pending = if existing { &members[1..] } else { &members[..] };
        self.absorb_into_multi(&mut multi, pending)?;
        multi.initialize(self.t, self.config.bd_dt_factor, &self.network);
        debug!(
            multi = %multi.domain_id,
            single = %single_id,
            particles = multi.particles.len(),
            shells = multi.shells.len(),
            existing,
            "multi formed"
        );

        if existing {
            let event_id = multi.event_id.ok_or_else(|| {
                Error::consistency(format!("multi {} lost its event", multi.domain_id))
            })?;
            self.scheduler
                .update(event_id, self.t + multi.dt, multi.domain_id)?;
            self.domains.insert(multi.domain_id, Domain::Multi(multi));
            Ok(None)
        } else {
            self.add_domain_event(Domain::Multi(multi))?;
            Ok(None)
        }
    }

    /// Moves a reset Single's particle into `multi` with a contact shell.
    /// The Single's own shell is dropped.
    fn add_to_multi(&mut self, multi: &mut Multi, single: Single) -> Result<()> {
        self.containers.remove(single.shell_id)?;
        let shell = Sphere {
            center: single.particle.position,
            radius: single.particle.radius * (1.0 + self.config.shells.multi_shell_factor),
        };
        let shell_id = self.new_shell_id();
        self.containers
            .update(shell_id, multi.domain_id, Shape::Sphere(shell))?;
        multi.add_shell(shell_id, shell);
        multi.add_particle(single.particle);
        Ok(())
    }

    /// Depth-first absorption of everything in contact with the Multi.
    fn absorb_into_multi(&mut self, multi: &mut Multi, pending: &[DomainId]) -> Result<()> {
        let mut stack: Vec<DomainId> = pending.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            let Some(domain) = self.domains.remove(&id) else {
                continue;
            };
            match domain {
                Domain::Single(mut single) => {
                    self.cancel_event(single.event_id.take())?;
                    let pos = single.particle.position;
                    let radius = self.multi_threshold(&single);
                    self.add_to_multi(multi, single)?;
                    let around = self.neighbor_domains_within(&pos, radius, &[multi.domain_id]);
                    let burst = self.burst_non_multis(&around)?;
                    let mut next = Vec::new();
                    for b in burst {
                        if self.obj_distance(&pos, b)? <= radius {
                            next.push(b);
                        }
                    }
                    stack.extend(next.into_iter().rev());
                }
                Domain::Multi(mut other) => {
                    self.cancel_event(other.event_id.take())?;
                    self.merge_multis(other, multi)?;
                }
                Domain::Pair(pair) => {
                    self.domains.insert(id, Domain::Pair(pair));
                    return Err(Error::consistency(format!(
                        "pair {id} reached multi {} without being burst",
                        multi.domain_id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Moves every particle and shell of `from` into `into`.
    fn merge_multis(&mut self, from: Multi, into: &mut Multi) -> Result<()> {
        trace!(from = %from.domain_id, into = %into.domain_id, "merge multis");
        for (shell_id, shell) in from.shells {
            self.containers
                .update(shell_id, into.domain_id, Shape::Sphere(shell))?;
            into.add_shell(shell_id, shell);
        }
        for particle in from.particles.into_values() {
            into.add_particle(particle);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::SimConfig;
    use crate::core::domain::Domain;
    use crate::core::rules::NetworkRules;
    use crate::core::sim::{Simulator, SAFETY};
    use crate::core::structure::{Structure, StructureId};
    use crate::core::world::World;
    use crate::error::Result;
    use approx::assert_relative_eq;

    fn config() -> SimConfig {
        let mut config = SimConfig::default();
        config.world.world_size = 100.0;
        config.world.matrix_size = 5;
        config.seed = Some(5);
        config
    }

    #[test]
    fn neighbouring_singles_split_the_gap() -> Result<()> {
        let mut world = World::new(100.0)?;
        let a = world.add_species("A", 0.5, 1.0, StructureId::BULK)?;
        world.new_particle(a, [50.0, 50.0, 50.0])?;
        world.new_particle(a, [56.0, 50.0, 50.0])?;
        let mut sim = Simulator::new(world, NetworkRules::new(), config())?;
        sim.step()?;
        sim.step()?;
        assert_eq!(sim.count_domains(), (2, 0, 0));
        // equal D: the first Single takes half the gap, the second what is left
        let mut sizes: Vec<f64> = sim
            .domains
            .values()
            .filter_map(|d| match d {
                Domain::Single(s) => Some(s.size()),
                _ => None,
            })
            .collect();
        sizes.sort_by(f64::total_cmp);
        assert_relative_eq!(sizes[0], 3.0 / SAFETY, epsilon = 1e-9);
        assert_relative_eq!(sizes[1], 3.0, epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn surface_intruder_radius_covers_reset_shell() -> Result<()> {
        let mut world = World::new(100.0)?;
        let plane = world.add_structure(Structure::plane([0.0, 0.0, 50.0], [0.0, 0.0, 1.0])?);
        let m = world.add_species("M", 1.0, 1.0, plane)?;
        world.new_particle(m, [10.0, 10.0, 50.0])?;
        let mut sim = Simulator::new(world, NetworkRules::new(), config())?;
        sim.initialize()?;
        let Some(Domain::Single(s)) = sim.domains.values().next() else {
            panic!("expected a single");
        };
        let reach = sim.intruder_radius(s);
        assert_relative_eq!(reach, (1.1f64 * 1.1 + 1.0).sqrt(), epsilon = 1e-12);
        assert!(reach >= s.shell().bounding_radius());
        Ok(())
    }

    /// Two plane Singles whose shells leave each other no room end up in a
    /// Multi instead of resetting one another forever.
    #[test]
    fn squeezed_surface_single_joins_multi() -> Result<()> {
        let mut world = World::new(100.0)?;
        let plane = world.add_structure(Structure::plane([0.0, 0.0, 50.0], [0.0, 0.0, 1.0])?);
        let m = world.add_species("M", 0.5, 1.0, plane)?;
        world.new_particle(m, [50.0, 50.0, 50.0])?;
        world.new_particle(m, [51.3, 50.0, 50.0])?;
        let mut sim = Simulator::new(world, NetworkRules::new(), config())?;
        sim.initialize()?;
        for _ in 0..3 {
            sim.step()?;
            sim.check()?;
            if sim.count_domains().2 == 1 {
                break;
            }
        }
        assert_eq!(sim.count_domains(), (0, 0, 1));
        Ok(())
    }
}
