//! Full consistency check of the simulator state.

use crate::core::domain::{Domain, DomainId};
use crate::core::geometry::Shape;
use crate::core::shell::ShellId;
use crate::core::sim::Simulator;
use crate::error::{Error, Result};
use std::collections::BTreeMap;

/// Relative slack on size limits.
const SIZE_TOLERANCE: f64 = 1e-12;

impl Simulator {
    /// Verifies the scheduler, the shell containers and the domain table
    /// against each other and against the world.
    ///
    /// Errors:
    /// - `Error::Consistency` naming the offending domain, shell or count.
    pub fn check(&self) -> Result<()> {
        self.scheduler.check()?;
        if !(self.t >= 0.0) {
            return Err(Error::consistency(format!("negative time {}", self.t)));
        }
        if !(self.dt >= 0.0) {
            return Err(Error::consistency(format!("negative step {}", self.dt)));
        }
        self.check_shell_matrix()?;
        self.check_events()?;
        self.check_population()?;
        for domain in self.domains.values() {
            self.check_shell_sizes(domain)?;
            self.check_overlaps(domain)?;
        }
        Ok(())
    }

    fn check_shell_matrix(&self) -> Result<()> {
        let mut registered: BTreeMap<DomainId, Vec<ShellId>> = BTreeMap::new();
        for (shell_id, domain_id, _) in self.containers.iter() {
            registered.entry(domain_id).or_default().push(shell_id);
        }
        let mut total = 0;
        for domain in self.domains.values() {
            let shells = domain.shells();
            total += shells.len();
            for (shell_id, shape) in &shells {
                match self.containers.get(*shell_id) {
                    Some((owner, stored)) if owner == domain.id() && stored == *shape => {}
                    Some((owner, _)) if owner != domain.id() => {
                        return Err(Error::consistency(format!(
                            "shell {shell_id} of {domain} is registered to {owner}"
                        )))
                    }
                    Some(_) => {
                        return Err(Error::consistency(format!(
                            "shell {shell_id} of {domain} is stale in the containers"
                        )))
                    }
                    None => {
                        return Err(Error::consistency(format!(
                            "shell {shell_id} of {domain} is not in the containers"
                        )))
                    }
                }
            }
            let count = registered.get(&domain.id()).map_or(0, Vec::len);
            if count != shells.len() {
                return Err(Error::consistency(format!(
                    "{domain} owns {} shells but {count} are registered",
                    shells.len()
                )));
            }
        }
        if total != self.containers.len() {
            return Err(Error::consistency(format!(
                "containers hold {} shells, domains own {total}",
                self.containers.len()
            )));
        }
        Ok(())
    }

    fn check_events(&self) -> Result<()> {
        if self.scheduler.len() != self.domains.len() {
            return Err(Error::consistency(format!(
                "{} events for {} domains",
                self.scheduler.len(),
                self.domains.len()
            )));
        }
        for domain in self.domains.values() {
            let event_id = domain
                .event_id()
                .ok_or_else(|| Error::consistency(format!("{domain} has no event")))?;
            let event = self.scheduler.get(event_id).ok_or_else(|| {
                Error::consistency(format!("event {event_id} of {domain} is not scheduled"))
            })?;
            if event.payload != domain.id() {
                return Err(Error::consistency(format!(
                    "event {event_id} of {domain} points at {}",
                    event.payload
                )));
            }
        }
        Ok(())
    }

    fn check_population(&self) -> Result<()> {
        let population = self.world.num_particles();
        let covered: usize = self.domains.values().map(Domain::multiplicity).sum();
        if covered != population {
            return Err(Error::consistency(format!(
                "domains cover {covered} particles, world has {population}"
            )));
        }
        Ok(())
    }

    fn check_shell_sizes(&self, domain: &Domain) -> Result<()> {
        let max = self.max_shell_size() * (1.0 + SIZE_TOLERANCE);
        let size = match domain {
            Domain::Single(s) if !s.is_reset() => s.size(),
            Domain::Pair(p) => p.shell_size(),
            _ => return Ok(()),
        };
        if size > max {
            return Err(Error::consistency(format!(
                "{domain} has shell size {size} above the limit {max}"
            )));
        }
        Ok(())
    }

    fn check_overlaps(&self, domain: &Domain) -> Result<()> {
        if self.is_exempt(domain) {
            return Ok(());
        }
        let ws = self.world.world_size();
        for (shell_id, shape) in domain.shells() {
            let hits = self
                .containers
                .neighbors_within(&shape.center(), shape.bounding_radius());
            for hit in hits {
                if hit.domain_id == domain.id() {
                    continue;
                }
                let Some(other) = self.domains.get(&hit.domain_id) else {
                    return Err(Error::consistency(format!(
                        "shell {} belongs to missing domain {}",
                        hit.shell_id, hit.domain_id
                    )));
                };
                if self.is_exempt(other) {
                    continue;
                }
                let Some((_, other_shape)) = self.containers.get(hit.shell_id) else {
                    continue;
                };
                if shape.overlaps(&other_shape, ws) {
                    let gap = center_gap(&shape, &other_shape, ws);
                    return Err(Error::consistency(format!(
                        "shell {shell_id} of {domain} overlaps shell {} of {other} (centre gap {gap})",
                        hit.shell_id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Reset surface Singles have a shell larger than their particle, which
    /// may touch a close neighbour until they fire.
    fn is_exempt(&self, domain: &Domain) -> bool {
        matches!(domain, Domain::Single(s) if s.is_reset() && !s.structure.is_bulk())
    }
}

fn center_gap(a: &Shape, b: &Shape, world_size: f64) -> f64 {
    crate::core::geometry::periodic_distance(&a.center(), &b.center(), world_size)
}
