use crate::core::event::EventId;
use crate::core::geometry::Shape;
use crate::core::multi::Multi;
use crate::core::pair::Pair;
use crate::core::shell::ShellId;
use crate::core::single::Single;
use std::fmt;

/// Domain identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DomainId(pub u64);

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "d{}", self.0)
    }
}

/// What a domain's scheduled event will do when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventType {
    SingleEscape,
    SingleReaction,
    /// Pair inter-particle event; resolved into `IvEscape` or `IvReaction`
    /// when the pair fires.
    IvEvent,
    IvEscape,
    IvReaction,
    ComEscape,
    MultiEscape,
    MultiUnimolecularReaction,
    MultiBimolecularReaction,
    /// Forced synchronisation before the scheduled event.
    Burst,
}

/// A protective domain.
#[derive(Debug, Clone)]
pub enum Domain {
    Single(Single),
    Pair(Pair),
    Multi(Multi),
}

impl Domain {
    pub fn id(&self) -> DomainId {
        match self {
            Domain::Single(s) => s.domain_id,
            Domain::Pair(p) => p.domain_id,
            Domain::Multi(m) => m.domain_id,
        }
    }

    pub fn event_id(&self) -> Option<EventId> {
        match self {
            Domain::Single(s) => s.event_id,
            Domain::Pair(p) => p.event_id,
            Domain::Multi(m) => m.event_id,
        }
    }

    pub fn set_event_id(&mut self, id: Option<EventId>) {
        match self {
            Domain::Single(s) => s.event_id = id,
            Domain::Pair(p) => p.event_id = id,
            Domain::Multi(m) => m.event_id = id,
        }
    }

    /// Time step from the domain's last update to its next event.
    pub fn dt(&self) -> f64 {
        match self {
            Domain::Single(s) => s.dt,
            Domain::Pair(p) => p.dt,
            Domain::Multi(m) => m.dt,
        }
    }

    pub fn last_time(&self) -> f64 {
        match self {
            Domain::Single(s) => s.last_time,
            Domain::Pair(p) => p.last_time,
            Domain::Multi(m) => m.last_time,
        }
    }

    /// Number of particles the domain is responsible for.
    pub fn multiplicity(&self) -> usize {
        match self {
            Domain::Single(_) => 1,
            Domain::Pair(_) => 2,
            Domain::Multi(m) => m.particles.len(),
        }
    }

    /// Every shell the domain owns.
    pub fn shells(&self) -> Vec<(ShellId, Shape)> {
        match self {
            Domain::Single(s) => vec![(s.shell_id, s.shell())],
            Domain::Pair(p) => vec![(p.shell_id, p.shell())],
            Domain::Multi(m) => m
                .shells
                .iter()
                .map(|(id, s)| (*id, Shape::Sphere(*s)))
                .collect(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Domain::Single(_) => "Single",
            Domain::Pair(_) => "Pair",
            Domain::Multi(_) => "Multi",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Domain::Single(s) => write!(f, "Single[{}: {}]", s.domain_id, s.particle.id),
            Domain::Pair(p) => write!(
                f,
                "Pair[{}: {}, {}]",
                p.domain_id, p.single1.particle.id, p.single2.particle.id
            ),
            Domain::Multi(m) => write!(f, "Multi[{}: {} particles]", m.domain_id, m.particles.len()),
        }
    }
}
