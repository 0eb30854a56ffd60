use crate::config::SimConfig;
use crate::core::domain::{Domain, DomainId, EventType};
use crate::core::event::{EventId, EventScheduler};
use crate::core::geometry::{self, Vec3};
use crate::core::multi::Multi;
use crate::core::pair::Pair;
use crate::core::particle::{Particle, ParticleId, SpeciesId};
use crate::core::rules::{NetworkRules, ReactionRecord, ReactionRule};
use crate::core::shell::{ShellContainers, ShellId};
use crate::core::single::Single;
use crate::core::stats::StepCounters;
use crate::core::structure::{Structure, StructureId};
use crate::core::world::World;
use crate::error::{Error, Result};
use rand::{rng, rngs::StdRng, Rng, SeedableRng};
use std::collections::BTreeMap;
use tracing::{debug, info, trace};

/// Shells are shrunk by this factor to keep a gap to their neighbours.
pub(crate) const SAFETY: f64 = 1.0 + 1e-5;

/// Relative gap kept between freshly placed product particles.
pub(crate) const MINIMAL_SEPARATION_FACTOR: f64 = 1.0 + 1e-7;

/// Floor of the consecutive zero-length step limit.
const MIN_ZERO_STEP_LIMIT: usize = 10;

/// Event-driven reaction-diffusion simulator.
///
/// Every particle is owned by exactly one domain (Single, Pair or Multi);
/// every domain owns its shells in the containers and exactly one event in
/// the scheduler. A domain that is being fired or burst is taken out of the
/// domain table for the duration of the operation.
#[derive(Debug)]
pub struct Simulator {
    pub(crate) world: World,
    pub(crate) network: NetworkRules,
    pub(crate) config: SimConfig,
    pub(crate) rng: StdRng,
    pub(crate) scheduler: EventScheduler<DomainId>,
    pub(crate) containers: ShellContainers,
    pub(crate) domains: BTreeMap<DomainId, Domain>,
    next_domain_id: u64,
    next_shell_id: u64,
    pub(crate) t: f64,
    pub(crate) dt: f64,
    pub(crate) counters: StepCounters,
    zero_steps: usize,
    is_dirty: bool,
    pub(crate) last_reaction: Option<ReactionRecord>,
}

impl Simulator {
    /// Creates a simulator seeded from `config.seed`, or from the OS when unset.
    pub fn new(world: World, network: NetworkRules, config: SimConfig) -> Result<Self> {
        let rng: StdRng = match config.seed {
            Some(s) => SeedableRng::seed_from_u64(s),
            None => SeedableRng::seed_from_u64(rng().random()),
        };
        Self::with_rng(world, network, config, rng)
    }

    /// Errors:
    /// - `Error::InvalidParam` if the configuration is unusable or its world
    ///   size differs from the world's.
    pub fn with_rng(
        mut world: World,
        network: NetworkRules,
        config: SimConfig,
        rng: StdRng,
    ) -> Result<Self> {
        config.validate()?;
        if world.world_size() != config.world.world_size {
            return Err(Error::InvalidParam(format!(
                "world size {} does not match configured world size {}",
                world.world_size(),
                config.world.world_size
            )));
        }
        world.set_matrix_size(config.world.matrix_size)?;
        let containers = ShellContainers::new(config.world.world_size, config.world.matrix_size)?;
        Ok(Self {
            world,
            network,
            config,
            rng,
            scheduler: EventScheduler::new(),
            containers,
            domains: BTreeMap::new(),
            next_domain_id: 0,
            next_shell_id: 0,
            t: 0.0,
            dt: 0.0,
            counters: StepCounters::default(),
            zero_steps: 0,
            is_dirty: true,
            last_reaction: None,
        })
    }

    #[inline]
    pub fn time(&self) -> f64 {
        self.t
    }

    /// Length of the last step.
    #[inline]
    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn counters(&self) -> &StepCounters {
        &self.counters
    }

    /// Reaction fired by the last step, if any.
    pub fn last_reaction(&self) -> Option<&ReactionRecord> {
        self.last_reaction.as_ref()
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn network(&self) -> &NetworkRules {
        &self.network
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn num_events(&self) -> usize {
        self.scheduler.len()
    }

    /// Time of the next scheduled event; infinite when nothing is scheduled.
    pub fn next_time(&self) -> f64 {
        self.scheduler.top_time().unwrap_or(f64::INFINITY)
    }

    /// Number of (Singles, Pairs, Multis) in the domain table.
    pub fn count_domains(&self) -> (usize, usize, usize) {
        self.domains
            .values()
            .fold((0, 0, 0), |(s, p, m), d| match d {
                Domain::Single(_) => (s + 1, p, m),
                Domain::Pair(_) => (s, p + 1, m),
                Domain::Multi(_) => (s, p, m + 1),
            })
    }

    /// Largest shell size allowed: half a container cell, further bounded by
    /// the user limit.
    pub fn max_shell_size(&self) -> f64 {
        let cell_limit = self.config.world.cell_size() * 0.5 / SAFETY;
        cell_limit.min(self.config.shells.user_max_shell_size)
    }

    pub fn set_user_max_shell_size(&mut self, size: f64) -> Result<()> {
        if size.is_nan() || size <= 0.0 {
            return Err(Error::InvalidParam("user_max_shell_size must be > 0".into()));
        }
        self.config.shells.user_max_shell_size = size;
        Ok(())
    }

    /// Positions of all particles, in particle id order.
    pub fn positions(&self) -> Vec<Vec3> {
        self.world.positions()
    }

    pub fn add_structure(&mut self, structure: Structure) -> StructureId {
        self.world.add_structure(structure)
    }

    pub fn add_species(
        &mut self,
        name: impl Into<String>,
        radius: f64,
        d: f64,
        structure: StructureId,
    ) -> Result<SpeciesId> {
        self.world.add_species(name, radius, d, structure)
    }

    /// Adds a particle at `pos` (projected onto its structure).
    ///
    /// Errors:
    /// - `Error::NoSpace` if it would overlap an existing particle.
    pub fn add_particle(&mut self, species: SpeciesId, pos: Vec3) -> Result<ParticleId> {
        let sp = self.world.get_species(species)?;
        let radius = sp.radius;
        let structure = *self.world.get_structure(sp.structure)?;
        let pos = self.world.apply_boundary(&structure.project(&pos));
        if self.world.check_overlap(&pos, radius, &[]) {
            return Err(Error::NoSpace);
        }
        let particle = self.world.new_particle(species, pos)?;
        self.is_dirty = true;
        Ok(particle.id)
    }

    /// Places `n` particles of `species` at random free positions.
    pub fn throw_in_particles(&mut self, species: SpeciesId, n: usize) -> Result<Vec<ParticleId>> {
        let ids = self.world.throw_in_particles(species, n, &mut self.rng)?;
        self.is_dirty = true;
        Ok(ids)
    }

    /// Errors:
    /// - `Error::InvalidParam` if a reactant or product species is unknown.
    pub fn add_reaction_rule(&mut self, rule: ReactionRule) -> Result<()> {
        for s in rule.reactants.iter().chain(&rule.products) {
            self.world.get_species(*s)?;
        }
        self.network.add_reaction_rule(rule);
        self.is_dirty = true;
        Ok(())
    }

    /// Rewinds time and counters; domains are rebuilt on the next step.
    pub fn reset(&mut self) {
        self.t = 0.0;
        self.dt = 0.0;
        self.counters = StepCounters::default();
        self.zero_steps = 0;
        self.last_reaction = None;
        self.is_dirty = true;
        info!("reset");
    }

    /// Drops every domain and builds one reset Single per particle.
    pub fn initialize(&mut self) -> Result<()> {
        self.scheduler.clear();
        self.containers.clear()?;
        self.domains.clear();
        let particles: Vec<Particle> = self.world.particles().cloned().collect();
        for particle in particles {
            let single = self.create_single(particle)?;
            self.add_domain_event(Domain::Single(single))?;
        }
        self.is_dirty = false;
        info!(
            t = self.t,
            particles = self.world.num_particles(),
            max_shell_size = self.max_shell_size(),
            "initialized"
        );
        Ok(())
    }

    /// Fires the earliest event.
    ///
    /// Errors:
    /// - `Error::Settled` if no finite event is left.
    /// - `Error::Exhausted` if the scheduler ran dry while particles remain,
    ///   or after too many zero-length steps.
    /// - `Error::Consistency` on a broken internal invariant.
    pub fn step(&mut self) -> Result<()> {
        self.last_reaction = None;
        if self.is_dirty {
            self.initialize()?;
        }
        if cfg!(debug_assertions) && self.config.check_consistency {
            self.check()?;
        }
        if !self.scheduler.top_time().is_some_and(f64::is_finite) {
            return Err(Error::Settled { t: self.t });
        }
        let (singles, pairs, multis) = self.count_domains();
        let (event_id, event) = self
            .scheduler
            .pop_min()
            .ok_or_else(|| Error::consistency("scheduler emptied under peek"))?;
        self.counters.steps += 1;
        self.t = event.time_f64();
        let mut domain = self.take_domain(event.payload)?;
        domain.set_event_id(None);
        debug!(
            step = self.counters.steps,
            t = self.t,
            dt = self.dt,
            singles,
            pairs,
            multis,
            event = %event_id,
            domain = %domain,
            "fire"
        );

        match domain {
            Domain::Single(single) => self.fire_single(single)?,
            Domain::Pair(pair) => self.fire_pair(pair)?,
            Domain::Multi(multi) => self.fire_multi(multi)?,
        }

        if self.scheduler.is_empty() && self.world.num_particles() > 0 {
            return Err(Error::Exhausted(format!(
                "scheduler empty with {} particles at t = {}",
                self.world.num_particles(),
                self.t
            )));
        }
        self.dt = self.next_time() - self.t;
        if self.dt == 0.0 {
            self.zero_steps += 1;
            self.counters.zero_steps += 1;
            let limit = (self.scheduler.len() * 3).max(MIN_ZERO_STEP_LIMIT);
            if self.zero_steps >= limit {
                return Err(Error::Exhausted(format!(
                    "{} consecutive zero-length steps at t = {}",
                    self.zero_steps, self.t
                )));
            }
        } else {
            self.zero_steps = 0;
        }
        Ok(())
    }

    /// Bursts every domain to `t`, leaving a synchronised snapshot.
    ///
    /// Errors:
    /// - `Error::Consistency` if `t` is before the current time or not
    ///   before the next scheduled event.
    pub fn stop(&mut self, t: f64) -> Result<()> {
        info!(t, "stop");
        if t == self.t {
            return Ok(());
        }
        let next = self.next_time();
        if !(t < next) {
            return Err(Error::consistency(format!(
                "stop time {t} is not before the next event at {next}"
            )));
        }
        if t < self.t {
            return Err(Error::consistency(format!(
                "stop time {t} is before the current time {}",
                self.t
            )));
        }
        self.t = t;

        let mut singles = Vec::new();
        let mut others = Vec::new();
        for (event_id, event) in self.scheduler.iter() {
            match self.domains.get(&event.payload) {
                Some(Domain::Single(_)) => singles.push(event.payload),
                Some(_) => others.push(event.payload),
                None => {
                    return Err(Error::consistency(format!(
                        "event {event_id} refers to missing domain {}",
                        event.payload
                    )))
                }
            }
        }
        for id in singles.into_iter().chain(others) {
            self.burst_obj(id)?;
        }
        self.dt = 0.0;
        Ok(())
    }

    /// Steps until the next event lies after `t`, then stops at `t`.
    pub fn run_until(&mut self, t: f64) -> Result<()> {
        if !t.is_finite() || t < self.t {
            return Err(Error::InvalidParam(format!(
                "cannot run to {t} from t = {}",
                self.t
            )));
        }
        if self.is_dirty {
            self.initialize()?;
        }
        while self.next_time() <= t {
            self.step()?;
        }
        if t > self.t {
            self.stop(t)?;
        }
        Ok(())
    }

    /// Human-readable statistics.
    pub fn report(&self) -> String {
        format!("t = {}\n{}", self.t, self.counters)
    }

    // ---- domain and event bookkeeping ----

    pub(crate) fn new_domain_id(&mut self) -> DomainId {
        let id = DomainId(self.next_domain_id);
        self.next_domain_id += 1;
        id
    }

    pub(crate) fn new_shell_id(&mut self) -> ShellId {
        let id = ShellId(self.next_shell_id);
        self.next_shell_id += 1;
        id
    }

    pub(crate) fn take_domain(&mut self, id: DomainId) -> Result<Domain> {
        self.domains
            .remove(&id)
            .ok_or_else(|| Error::consistency(format!("domain {id} is not in the domain table")))
    }

    /// Stores `domain` and schedules its event at `t + dt`.
    pub(crate) fn add_domain_event(&mut self, mut domain: Domain) -> Result<()> {
        let time = self.t + domain.dt();
        let id = domain.id();
        let event_id = self.scheduler.insert(time, id)?;
        trace!(domain = %domain, event = %event_id, time, "schedule");
        domain.set_event_id(Some(event_id));
        self.domains.insert(id, domain);
        Ok(())
    }

    pub(crate) fn cancel_event(&mut self, event_id: Option<EventId>) -> Result<()> {
        if let Some(id) = event_id {
            self.scheduler.cancel(id)?;
        }
        Ok(())
    }

    /// Builds a reset Single around `particle` and registers its shell.
    /// The caller schedules it.
    pub(crate) fn create_single(&mut self, particle: Particle) -> Result<Single> {
        let structure = *self.world.structure_of(particle.species)?;
        let rules = self.network.query_reaction_rule(particle.species).to_vec();
        let domain_id = self.new_domain_id();
        let shell_id = self.new_shell_id();
        let mut single = Single::new(domain_id, shell_id, particle, structure, rules);
        single.initialize(self.t, &mut self.rng)?;
        self.containers
            .update(shell_id, domain_id, single.shell())?;
        Ok(single)
    }

    fn move_single_particle(&mut self, single: &mut Single, pos: Vec3) -> Result<()> {
        let particle = single.particle.moved_to(pos);
        self.world.update_particle(particle.clone())?;
        single.particle = particle;
        Ok(())
    }

    /// Moves the particle for `single.dt` and `single.event_type`, then
    /// shrinks the shell to the particle.
    pub(crate) fn propagate_single(&mut self, single: &mut Single) -> Result<()> {
        let ws = self.world.world_size();
        let pos = single.draw_new_position(single.dt, single.event_type, ws, &mut self.rng)?;
        self.move_single_particle(single, pos)?;
        single.initialize(self.t, &mut self.rng)?;
        self.containers
            .update(single.shell_id, single.domain_id, single.shell())
    }

    // ---- bursting ----

    /// Synchronises a domain to the current time.
    ///
    /// Returns the ids of the resulting Singles.
    pub(crate) fn burst_obj(&mut self, id: DomainId) -> Result<Vec<DomainId>> {
        let domain = self.take_domain(id)?;
        trace!(domain = %domain, "burst");
        match domain {
            Domain::Single(single) => {
                self.burst_single(single)?;
                Ok(vec![id])
            }
            Domain::Pair(mut pair) => {
                self.cancel_event(pair.event_id.take())?;
                let (s1, s2) = self.burst_pair(pair)?;
                let ids = vec![s1.domain_id, s2.domain_id];
                self.add_domain_event(Domain::Single(s1))?;
                self.add_domain_event(Domain::Single(s2))?;
                Ok(ids)
            }
            Domain::Multi(mut multi) => {
                self.cancel_event(multi.event_id.take())?;
                self.break_up_multi(multi)
            }
        }
    }

    /// Bursts each domain; Multis are left as they are.
    pub(crate) fn burst_non_multis(&mut self, ids: &[DomainId]) -> Result<Vec<DomainId>> {
        let mut out = Vec::new();
        for &id in ids {
            if matches!(self.domains.get(&id), Some(Domain::Multi(_))) {
                out.push(id);
            } else {
                out.extend(self.burst_obj(id)?);
            }
        }
        Ok(out)
    }

    /// Bursts every domain with a shell within `radius` of `pos`.
    pub(crate) fn clear_volume(
        &mut self,
        pos: &Vec3,
        radius: f64,
        ignore: &[DomainId],
    ) -> Result<Vec<DomainId>> {
        let mut out = Vec::new();
        for id in self.neighbor_domains_within(pos, radius, ignore) {
            out.extend(self.burst_obj(id)?);
        }
        Ok(out)
    }

    /// Domains owning a shell within `radius` of `pos`, nearest first.
    pub(crate) fn neighbor_domains_within(
        &self,
        pos: &Vec3,
        radius: f64,
        ignore: &[DomainId],
    ) -> Vec<DomainId> {
        let mut ids: Vec<DomainId> = Vec::new();
        for n in self.containers.neighbors_within(pos, radius) {
            if !ignore.contains(&n.domain_id) && !ids.contains(&n.domain_id) {
                ids.push(n.domain_id);
            }
        }
        ids
    }

    fn burst_single(&mut self, mut single: Single) -> Result<()> {
        single.dt = self.t - single.last_time;
        single.event_type = EventType::Burst;
        self.propagate_single(&mut single)?;
        let event_id = single.event_id.ok_or_else(|| {
            Error::consistency(format!("burst of unscheduled single {}", single.domain_id))
        })?;
        let time = self.t + single.dt;
        self.scheduler.update(event_id, time, single.domain_id)?;
        self.domains.insert(single.domain_id, Domain::Single(single));
        Ok(())
    }

    fn burst_pair(&mut self, pair: Pair) -> Result<(Single, Single)> {
        let dt = self.t - pair.last_time;
        self.propagate_pair(pair, dt, EventType::Burst)
    }

    /// Moves both particles of `pair` for `dt` and dissolves it into two
    /// reset Singles that keep their original domain and shell ids. The
    /// caller schedules them.
    pub(crate) fn propagate_pair(
        &mut self,
        pair: Pair,
        dt: f64,
        event_type: EventType,
    ) -> Result<(Single, Single)> {
        let pos1 = pair.single1.particle.position;
        let pos2 = pair.single2.particle.position;
        let (new1, new2) = if dt > 0.0 {
            let old_iv = geometry::sub(&self.world.cyclic_transpose(&pos2, &pos1), &pos1);
            let ws = self.world.world_size();
            pair.draw_new_positions(dt, &old_iv, event_type, ws, &mut self.rng)?
        } else {
            (pos1, pos2)
        };
        self.containers.remove(pair.shell_id)?;
        let Pair {
            mut single1,
            mut single2,
            ..
        } = pair;
        self.move_single_particle(&mut single1, new1)?;
        self.move_single_particle(&mut single2, new2)?;
        for single in [&mut single1, &mut single2] {
            single.initialize(self.t, &mut self.rng)?;
            single.event_id = None;
            self.containers
                .update(single.shell_id, single.domain_id, single.shell())?;
        }
        Ok((single1, single2))
    }

    /// Dissolves a Multi into one scheduled Single per member.
    pub(crate) fn break_up_multi(&mut self, multi: Multi) -> Result<Vec<DomainId>> {
        for (shell_id, _) in &multi.shells {
            self.containers.remove(*shell_id)?;
        }
        let mut ids = Vec::with_capacity(multi.particles.len());
        for particle in multi.particles.into_values() {
            let single = self.create_single(particle)?;
            ids.push(single.domain_id);
            self.add_domain_event(Domain::Single(single))?;
        }
        Ok(ids)
    }

    // ---- firing ----

    fn fire_single(&mut self, mut single: Single) -> Result<()> {
        self.counters.record_single(single.event_type);

        if single.event_type == EventType::SingleReaction {
            let ws = self.world.world_size();
            let pos =
                single.draw_new_position(single.dt, EventType::SingleReaction, ws, &mut self.rng)?;
            self.move_single_particle(&mut single, pos)?;
            self.containers.remove(single.shell_id)?;
            return self.react_single(single);
        }

        // Immobile particles only wait for their next reaction.
        if single.particle.d == 0.0 {
            let (dt, event_type) = single.determine_next_event(&mut self.rng)?;
            single.dt = dt;
            single.event_type = event_type;
            single.last_time = self.t;
            return self.add_domain_event(Domain::Single(single));
        }

        if single.dt != 0.0 {
            self.propagate_single(&mut single)?;
        }

        let pos = single.position();
        let radius = self.intruder_radius(&single);
        let (intruders, closest) = self.get_intruders(&pos, radius, &[single.domain_id]);
        if intruders.is_empty() {
            return self.settle_single(single, closest);
        }

        trace!(single = %single.domain_id, intruders = intruders.len(), "intruders");
        let burst = self.burst_non_multis(&intruders)?;
        let Some(single) = self.form_pair_or_multi(single, &burst)? else {
            return Ok(());
        };

        let closest = self.get_closest_obj(&pos, &[single.domain_id]);
        self.settle_single(single, closest)?;

        // Neighbours burst for nothing get proper shells again.
        for id in burst {
            let mut s = match self.domains.remove(&id) {
                Some(Domain::Single(s)) if s.is_reset() => s,
                Some(other) => {
                    self.domains.insert(id, other);
                    continue;
                }
                None => continue,
            };
            self.cancel_event(s.event_id.take())?;
            let closest = self.get_closest_obj(&s.position(), &[id]);
            self.settle_single(s, closest)?;
        }
        Ok(())
    }

    /// Fires the reaction of a Single whose shell is already removed; a
    /// reaction without room for its products is rolled back.
    fn react_single(&mut self, single: Single) -> Result<()> {
        match self.fire_single_reaction(&single) {
            Err(Error::NoSpace) => self.reject_single_reaction(single),
            other => other,
        }
    }

    fn reject_single_reaction(&mut self, mut single: Single) -> Result<()> {
        self.counters.rejected_moves += 1;
        debug!(single = %single.domain_id, particle = %single.particle.id, "reaction rejected: no space");
        single.initialize(self.t, &mut self.rng)?;
        self.containers
            .update(single.shell_id, single.domain_id, single.shell())?;
        self.add_domain_event(Domain::Single(single))
    }

    /// Executes one unimolecular rule of the Single's particle.
    ///
    /// Errors:
    /// - `Error::NoSpace` if the products cannot be placed; the world is
    ///   then unchanged apart from burst neighbours.
    fn fire_single_reaction(&mut self, single: &Single) -> Result<()> {
        let rule = single.draw_reaction_rule(&mut self.rng)?;
        let reactant = single.particle.clone();
        let origin = reactant.position;

        let products = match rule.products.as_slice() {
            [] => {
                self.world.remove_particle(reactant.id)?;
                Vec::new()
            }
            [product] => {
                let radius = self.world.get_species(*product)?.radius;
                if reactant.radius < radius {
                    self.clear_volume(&origin, radius, &[single.domain_id])?;
                }
                if self.world.check_overlap(&origin, radius, &[reactant.id]) {
                    return Err(Error::NoSpace);
                }
                self.world.remove_particle(reactant.id)?;
                let particle = self.world.new_particle(*product, origin)?;
                let product_single = self.create_single(particle.clone())?;
                self.add_domain_event(Domain::Single(product_single))?;
                vec![particle]
            }
            [product1, product2] => {
                let (pos1, pos2) = self.place_product_pair(
                    &origin,
                    &single.structure,
                    *product1,
                    *product2,
                    &[reactant.id],
                    &[single.domain_id],
                )?;
                self.world.remove_particle(reactant.id)?;
                let particle1 = self.world.new_particle(*product1, pos1)?;
                let particle2 = self.world.new_particle(*product2, pos2)?;
                for particle in [&particle1, &particle2] {
                    let s = self.create_single(particle.clone())?;
                    self.add_domain_event(Domain::Single(s))?;
                }
                vec![particle1, particle2]
            }
            _ => {
                return Err(Error::consistency(format!(
                    "rule with {} products fired in single {}",
                    rule.products.len(),
                    single.domain_id
                )))
            }
        };

        debug!(single = %single.domain_id, reactant = %reactant.id, products = products.len(), "single reaction");
        self.counters.reaction_events += 1;
        self.last_reaction = Some(ReactionRecord {
            rule,
            reactants: vec![reactant],
            products,
        });
        Ok(())
    }

    /// Finds room for the two products of a dissociation at `origin`,
    /// bursting the domains around it first.
    ///
    /// Errors:
    /// - `Error::NoSpace` if none of the `dissociation_retry_moves` attempts
    ///   places both products free of overlaps (also when zero attempts are
    ///   configured).
    pub(crate) fn place_product_pair(
        &mut self,
        origin: &Vec3,
        structure: &Structure,
        species1: SpeciesId,
        species2: SpeciesId,
        ignore: &[ParticleId],
        ignore_domains: &[DomainId],
    ) -> Result<(Vec3, Vec3)> {
        let sp1 = self.world.get_species(species1)?;
        let sp2 = self.world.get_species(species2)?;
        let (r1, r2) = (sp1.radius, sp2.radius);
        let (w1, w2) = diffusion_weights(sp1.d, sp2.d);
        let r12 = r1 + r2;
        let reach = (r12 * w1 + r1).max(r12 * w2 + r2);
        self.clear_volume(origin, reach, ignore_domains)?;

        for _ in 0..self.config.dissociation_retry_moves {
            let (pos1, pos2) = self.draw_product_positions(origin, structure, r12, w1, w2);
            if !self.world.check_overlap(&pos1, r1, ignore)
                && !self.world.check_overlap(&pos2, r2, ignore)
            {
                return Ok((pos1, pos2));
            }
        }
        Err(Error::NoSpace)
    }

    /// Product positions separated by slightly more than `r12`, split around
    /// `origin` by the diffusion weights.
    fn draw_product_positions(
        &mut self,
        origin: &Vec3,
        structure: &Structure,
        r12: f64,
        w1: f64,
        w2: f64,
    ) -> (Vec3, Vec3) {
        let mut v = structure.random_vector(r12 * MINIMAL_SEPARATION_FACTOR, &mut self.rng);
        let place = |v: &Vec3| {
            (
                self.world
                    .apply_boundary(&geometry::add(origin, &geometry::scale(v, w1))),
                self.world
                    .apply_boundary(&geometry::sub(origin, &geometry::scale(v, w2))),
            )
        };
        let (mut pos1, mut pos2) = place(&v);
        // Rounding in the wrap can bring the products into contact.
        for _ in 0..100 {
            if self.world.distance(&pos1, &pos2) >= r12 {
                break;
            }
            v = geometry::scale(&v, MINIMAL_SEPARATION_FACTOR);
            (pos1, pos2) = place(&v);
        }
        (pos1, pos2)
    }

    fn fire_pair(&mut self, mut pair: Pair) -> Result<()> {
        if pair.event_type == EventType::IvEvent {
            pair.event_type = pair.draw_iv_event_type(&mut self.rng);
        }
        self.counters.record_pair(pair.event_type);

        match pair.event_type {
            EventType::SingleReaction => {
                let reacting = pair.reacting.ok_or_else(|| {
                    Error::consistency(format!("pair {} reaction without reactant", pair.domain_id))
                })?;
                let (s1, s2) = self.burst_pair(pair)?;
                let (reactant, other) = if s1.domain_id == reacting {
                    (s1, s2)
                } else {
                    (s2, s1)
                };
                self.add_domain_event(Domain::Single(other))?;
                self.containers.remove(reactant.shell_id)?;
                self.react_single(reactant)
            }
            EventType::IvReaction => self.fire_pair_reaction(pair),
            EventType::IvEscape | EventType::ComEscape => {
                let (dt, event_type) = (pair.dt, pair.event_type);
                let (s1, s2) = self.propagate_pair(pair, dt, event_type)?;
                self.add_domain_event(Domain::Single(s1))?;
                self.add_domain_event(Domain::Single(s2))
            }
            other => Err(Error::consistency(format!(
                "pair {} fired unexpected event {other:?}",
                pair.domain_id
            ))),
        }
    }

    fn fire_pair_reaction(&mut self, pair: Pair) -> Result<()> {
        let rule = pair.draw_reaction_rule(&mut self.rng)?;
        let particle1 = pair.single1.particle.clone();
        let particle2 = pair.single2.particle.clone();
        let reactant_ids = [particle1.id, particle2.id];

        let products = match rule.products.as_slice() {
            [] => {
                self.containers.remove(pair.shell_id)?;
                self.world.remove_particle(particle1.id)?;
                self.world.remove_particle(particle2.id)?;
                Vec::new()
            }
            [product] => {
                let radius = self.world.get_species(*product)?.radius;
                let com = pair.draw_new_com(pair.dt, EventType::IvReaction, &mut self.rng);
                let com = self.world.apply_boundary(&com);
                self.clear_volume(&com, radius, &[pair.domain_id])?;
                if self.world.check_overlap(&com, radius, &reactant_ids) {
                    self.counters.rejected_moves += 1;
                    debug!(pair = %pair.domain_id, "pair reaction rejected: no space");
                    let dt = pair.dt;
                    let (s1, s2) = self.propagate_pair(pair, dt, EventType::Burst)?;
                    self.add_domain_event(Domain::Single(s1))?;
                    return self.add_domain_event(Domain::Single(s2));
                }
                self.containers.remove(pair.shell_id)?;
                self.world.remove_particle(particle1.id)?;
                self.world.remove_particle(particle2.id)?;
                let particle = self.world.new_particle(*product, com)?;
                let single = self.create_single(particle.clone())?;
                self.add_domain_event(Domain::Single(single))?;
                vec![particle]
            }
            _ => {
                return Err(Error::consistency(format!(
                    "bimolecular rule with {} products fired in pair {}",
                    rule.products.len(),
                    pair.domain_id
                )))
            }
        };

        debug!(pair = %pair.domain_id, products = products.len(), "pair reaction");
        self.counters.reaction_events += 1;
        self.last_reaction = Some(ReactionRecord {
            rule,
            reactants: vec![particle1, particle2],
            products,
        });
        Ok(())
    }

    fn fire_multi(&mut self, mut multi: Multi) -> Result<()> {
        self.counters.multi_steps += 1;
        self.step_multi(&mut multi)?;

        let Some(event) = multi.last_event else {
            return self.add_domain_event(Domain::Multi(multi));
        };
        if matches!(
            event,
            EventType::MultiUnimolecularReaction | EventType::MultiBimolecularReaction
        ) {
            self.counters.reaction_events += 1;
            self.last_reaction = multi.last_reaction.take();
        }
        self.counters.record_multi(event);
        debug!(multi = %multi.domain_id, ?event, "multi break-up");
        self.break_up_multi(multi)?;
        Ok(())
    }
}

/// Displacement weights `D_i / (D1 + D2)`; even split for immobile pairs.
pub(crate) fn diffusion_weights(d1: f64, d2: f64) -> (f64, f64) {
    let d12 = d1 + d2;
    if d12 > 0.0 {
        (d1 / d12, d2 / d12)
    } else {
        (0.5, 0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn config(world_size: f64, seed: u64) -> SimConfig {
        let mut config = SimConfig::default();
        config.world.world_size = world_size;
        config.world.matrix_size = 5;
        config.seed = Some(seed);
        config
    }

    fn lone_particle(d: f64) -> Result<Simulator> {
        let mut world = World::new(50.0)?;
        let a = world.add_species("A", 0.5, d, StructureId::BULK)?;
        world.new_particle(a, [25.0, 25.0, 25.0])?;
        Simulator::new(world, NetworkRules::new(), config(50.0, 3))
    }

    #[test]
    fn rejects_mismatched_world_size() -> Result<()> {
        let world = World::new(10.0)?;
        let err = Simulator::new(world, NetworkRules::new(), config(20.0, 0));
        assert!(matches!(err, Err(Error::InvalidParam(_))));
        Ok(())
    }

    #[test]
    fn max_shell_size_follows_cell_and_user_limit() -> Result<()> {
        let mut sim = lone_particle(1.0)?;
        assert_relative_eq!(sim.max_shell_size(), 5.0 / SAFETY);
        sim.set_user_max_shell_size(2.0)?;
        assert_relative_eq!(sim.max_shell_size(), 2.0);
        assert!(sim.set_user_max_shell_size(-1.0).is_err());
        Ok(())
    }

    #[test]
    fn lone_single_grows_to_max_shell() -> Result<()> {
        let mut sim = lone_particle(1.0)?;
        sim.step()?;
        assert_eq!(sim.count_domains(), (1, 0, 0));
        let Some(Domain::Single(s)) = sim.domains.values().next() else {
            panic!("expected a single");
        };
        assert_relative_eq!(s.size(), sim.max_shell_size());
        assert!(sim.next_time() > 0.0);
        Ok(())
    }

    #[test]
    fn stop_is_idempotent_and_bounded() -> Result<()> {
        let mut sim = lone_particle(1.0)?;
        sim.step()?;
        sim.step()?;
        let next = sim.next_time();
        let t = sim.time() + 0.5 * (next - sim.time());
        sim.stop(t)?;
        let positions = sim.positions();
        sim.stop(t)?;
        assert_eq!(sim.positions(), positions);
        assert_eq!(sim.time(), t);
        assert!(sim.stop(t - 1.0).is_err());
        assert!(sim.stop(sim.next_time() + 1.0).is_err());
        Ok(())
    }

    #[test]
    fn immobile_inert_particle_settles() -> Result<()> {
        let mut sim = lone_particle(0.0)?;
        assert!(matches!(sim.step(), Err(Error::Settled { t }) if t == 0.0));
        assert_eq!(sim.num_events(), 1);
        assert!(sim.next_time().is_infinite());
        Ok(())
    }

    #[test]
    fn diffusion_weights_split_evenly_when_immobile() {
        assert_eq!(diffusion_weights(0.0, 0.0), (0.5, 0.5));
        let (w1, w2) = diffusion_weights(1.0, 3.0);
        assert_relative_eq!(w1, 0.25);
        assert_relative_eq!(w2, 0.75);
    }
}
