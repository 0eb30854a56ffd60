use crate::core::geometry::Vec3;
use crate::core::structure::StructureId;
use crate::error::{Error, Result};
use std::fmt;

/// Stable particle identifier, assigned by the [`World`](crate::core::World).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParticleId(pub u64);

/// Species identifier, assigned by the [`World`](crate::core::World).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpeciesId(pub u32);

impl fmt::Display for ParticleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

impl fmt::Display for SpeciesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// A species: radius, diffusion coefficient and the structure its particles
/// live on.
#[derive(Debug, Clone, PartialEq)]
pub struct Species {
    pub id: SpeciesId,
    pub name: String,
    /// Hard-sphere radius (> 0).
    pub radius: f64,
    /// Diffusion coefficient (>= 0).
    pub d: f64,
    pub structure: StructureId,
}

impl Species {
    /// Errors:
    /// - `Error::InvalidParam` if `radius` is not finite and > 0 or `d` is negative/NaN/inf.
    pub fn new(
        id: SpeciesId,
        name: impl Into<String>,
        radius: f64,
        d: f64,
        structure: StructureId,
    ) -> Result<Self> {
        if !radius.is_finite() || radius <= 0.0 {
            return Err(Error::InvalidParam("radius must be finite and > 0".into()));
        }
        if !d.is_finite() || d < 0.0 {
            return Err(Error::InvalidParam(
                "diffusion coefficient must be finite and >= 0".into(),
            ));
        }
        Ok(Self {
            id,
            name: name.into(),
            radius,
            d,
            structure,
        })
    }
}

/// An immutable particle record.
///
/// The simulator never edits a particle in place; it builds a new record
/// with [`Particle::moved_to`] and hands it to the world store.
#[derive(Debug, Clone, PartialEq)]
pub struct Particle {
    pub id: ParticleId,
    pub species: SpeciesId,
    /// Position, wrapped into the periodic box.
    pub position: Vec3,
    pub radius: f64,
    pub d: f64,
}

impl Particle {
    pub fn new(id: ParticleId, species: &Species, position: Vec3) -> Result<Self> {
        if !position.iter().all(|x| x.is_finite()) {
            return Err(Error::InvalidParam("position must be finite".into()));
        }
        Ok(Self {
            id,
            species: species.id,
            position,
            radius: species.radius,
            d: species.d,
        })
    }

    /// Same particle at a new position.
    #[inline]
    pub fn moved_to(&self, position: Vec3) -> Self {
        Self {
            position,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn species_validation() {
        let s = StructureId(0);
        assert!(Species::new(SpeciesId(0), "A", 0.0, 1.0, s).is_err());
        assert!(Species::new(SpeciesId(0), "A", 1.0, -1.0, s).is_err());
        assert!(Species::new(SpeciesId(0), "A", 1.0, f64::NAN, s).is_err());
        assert!(Species::new(SpeciesId(0), "A", 1.0, 0.0, s).is_ok());
    }

    #[test]
    fn moved_to_keeps_identity() -> Result<()> {
        let sp = Species::new(SpeciesId(3), "B", 0.5, 2.0, StructureId(0))?;
        let p = Particle::new(ParticleId(9), &sp, [1.0, 2.0, 3.0])?;
        let q = p.moved_to([4.0, 5.0, 6.0]);
        assert_eq!(q.id, p.id);
        assert_eq!(q.species, SpeciesId(3));
        assert_eq!(q.position, [4.0, 5.0, 6.0]);
        assert!((q.radius - 0.5).abs() < 1e-15);
        assert!(Particle::new(ParticleId(1), &sp, [f64::NAN, 0.0, 0.0]).is_err());
        Ok(())
    }
}
