//! Structures particles live on: the bulk, planes and filaments.

use crate::core::geometry::{
    self, add, cross, dot, orthogonal_unit, random_unit_vector, scale, standard_normal, sub,
    Cylinder, Shape, Sphere, Vec3,
};
use crate::error::{Error, Result};
use rand::Rng;
use std::f64::consts::PI;

/// Index into the world's structure table. `StructureId(0)` is always the bulk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StructureId(pub u32);

impl StructureId {
    pub const BULK: StructureId = StructureId(0);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Structure {
    /// 3D bulk.
    Region,
    /// Infinite plane through `origin` with unit `normal`; `unit_x` and
    /// `unit_y` span the plane.
    Plane {
        origin: Vec3,
        normal: Vec3,
        unit_x: Vec3,
        unit_y: Vec3,
    },
    /// Infinite line through `origin` along unit `axis`.
    Filament { origin: Vec3, axis: Vec3 },
}

impl Structure {
    pub fn plane(origin: Vec3, normal: Vec3) -> Result<Self> {
        let normal = geometry::normalize(&normal)
            .ok_or_else(|| Error::InvalidParam("plane normal must be non-zero".into()))?;
        let unit_x = orthogonal_unit(&normal);
        let unit_y = cross(&normal, &unit_x);
        Ok(Structure::Plane {
            origin,
            normal,
            unit_x,
            unit_y,
        })
    }

    pub fn filament(origin: Vec3, axis: Vec3) -> Result<Self> {
        let axis = geometry::normalize(&axis)
            .ok_or_else(|| Error::InvalidParam("filament axis must be non-zero".into()))?;
        Ok(Structure::Filament { origin, axis })
    }

    /// Number of dimensions a particle on this structure diffuses in.
    pub fn dimension(&self) -> usize {
        match self {
            Structure::Region => 3,
            Structure::Plane { .. } => 2,
            Structure::Filament { .. } => 1,
        }
    }

    #[inline]
    pub fn is_bulk(&self) -> bool {
        matches!(self, Structure::Region)
    }

    /// Orthogonal projection of `pos` onto the structure.
    pub fn project(&self, pos: &Vec3) -> Vec3 {
        match self {
            Structure::Region => *pos,
            Structure::Plane { origin, normal, .. } => {
                let off = dot(&sub(pos, origin), normal);
                sub(pos, &scale(normal, off))
            }
            Structure::Filament { origin, axis } => {
                let along = dot(&sub(pos, origin), axis);
                add(origin, &scale(axis, along))
            }
        }
    }

    /// Vector of length `r` in a uniformly random direction within the structure.
    pub fn random_vector<R: Rng + ?Sized>(&self, r: f64, rng: &mut R) -> Vec3 {
        match self {
            Structure::Region => scale(&random_unit_vector(rng), r),
            Structure::Plane { unit_x, unit_y, .. } => {
                let phi = 2.0 * PI * rng.random::<f64>();
                add(&scale(unit_x, r * phi.cos()), &scale(unit_y, r * phi.sin()))
            }
            Structure::Filament { axis, .. } => {
                let sign = if rng.random::<bool>() { 1.0 } else { -1.0 };
                scale(axis, sign * r)
            }
        }
    }

    /// Free Brownian displacement with per-dimension standard deviation `sigma`.
    pub fn gaussian_displacement<R: Rng + ?Sized>(&self, sigma: f64, rng: &mut R) -> Vec3 {
        match self {
            Structure::Region => [
                sigma * standard_normal(rng),
                sigma * standard_normal(rng),
                sigma * standard_normal(rng),
            ],
            Structure::Plane { unit_x, unit_y, .. } => add(
                &scale(unit_x, sigma * standard_normal(rng)),
                &scale(unit_y, sigma * standard_normal(rng)),
            ),
            Structure::Filament { axis, .. } => scale(axis, sigma * standard_normal(rng)),
        }
    }

    /// Protective shell of a single particle of `radius` with shell size `size`
    /// (mobility radius plus particle radius).
    pub fn shell_shape(&self, center: Vec3, size: f64, radius: f64) -> Shape {
        match self {
            Structure::Region => Shape::Sphere(Sphere {
                center,
                radius: size,
            }),
            Structure::Plane { normal, .. } => Shape::Cylinder(Cylinder {
                center,
                axis: *normal,
                radius: size,
                half_length: radius,
            }),
            Structure::Filament { axis, .. } => Shape::Cylinder(Cylinder {
                center,
                axis: *axis,
                radius,
                half_length: size,
            }),
        }
    }

    /// Largest shell size whose shell stays within a ball of `limit`.
    pub fn fit_size(&self, limit: f64, radius: f64) -> f64 {
        match self {
            Structure::Region => limit,
            _ if limit > radius => (limit * limit - radius * radius).sqrt(),
            _ => radius,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geometry::length;
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn projection_onto_plane_and_filament() -> Result<()> {
        let plane = Structure::plane([0.0, 0.0, 5.0], [0.0, 0.0, 2.0])?;
        let p = plane.project(&[1.0, 2.0, 7.5]);
        assert_relative_eq!(p[2], 5.0, epsilon = 1e-12);
        assert_relative_eq!(p[0], 1.0, epsilon = 1e-12);

        let fil = Structure::filament([5.0, 5.0, 0.0], [0.0, 0.0, 1.0])?;
        let q = fil.project(&[1.0, 2.0, 3.0]);
        assert_eq!(q, [5.0, 5.0, 3.0]);
        assert!(Structure::plane([0.0; 3], [0.0; 3]).is_err());
        Ok(())
    }

    #[test]
    fn displacements_stay_in_structure() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(11);
        let plane = Structure::plane([0.0; 3], [0.0, 1.0, 0.0])?;
        for _ in 0..50 {
            let v = plane.random_vector(2.0, &mut rng);
            assert_relative_eq!(length(&v), 2.0, epsilon = 1e-12);
            assert!(v[1].abs() < 1e-12);
            let g = plane.gaussian_displacement(1.0, &mut rng);
            assert!(g[1].abs() < 1e-12);
        }
        let fil = Structure::filament([0.0; 3], [1.0, 0.0, 0.0])?;
        let v = fil.random_vector(3.0, &mut rng);
        assert_relative_eq!(v[0].abs(), 3.0, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn surface_shells_fit_inside_limit() -> Result<()> {
        let plane = Structure::plane([0.0; 3], [0.0, 0.0, 1.0])?;
        let size = plane.fit_size(5.0, 3.0);
        assert_relative_eq!(size, 4.0, epsilon = 1e-12);
        let shell = plane.shell_shape([1.0; 3], size, 3.0);
        assert_relative_eq!(shell.bounding_radius(), 5.0, epsilon = 1e-12);
        assert_relative_eq!(Structure::Region.fit_size(5.0, 3.0), 5.0);
        Ok(())
    }
}
