//! Vector helpers, shell shapes and periodic-boundary distances.

use rand::Rng;
use std::f64::consts::PI;

/// Fixed spatial dimension (3D).
pub const DIM: usize = 3;

/// A point or vector in the simulation box.
pub type Vec3 = [f64; DIM];

/// Relative slack accepted when deciding whether two shells overlap.
const TOUCH_TOLERANCE: f64 = 1e-10;

#[inline]
pub fn add(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

#[inline]
pub fn sub(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
pub fn scale(a: &Vec3, s: f64) -> Vec3 {
    [a[0] * s, a[1] * s, a[2] * s]
}

#[inline]
pub fn dot(a: &Vec3, b: &Vec3) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[inline]
pub fn cross(a: &Vec3, b: &Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[inline]
pub fn length(a: &Vec3) -> f64 {
    dot(a, a).sqrt()
}

/// Returns `a / |a|`, or `None` for a (numerically) zero vector.
pub fn normalize(a: &Vec3) -> Option<Vec3> {
    let l = length(a);
    if l <= f64::MIN_POSITIVE || !l.is_finite() {
        return None;
    }
    Some(scale(a, 1.0 / l))
}

/// Any unit vector orthogonal to the unit vector `u`.
pub fn orthogonal_unit(u: &Vec3) -> Vec3 {
    // Cross with the coordinate axis least aligned with u.
    let mut axis = [0.0; DIM];
    let k = (0..DIM)
        .min_by(|&i, &j| u[i].abs().total_cmp(&u[j].abs()))
        .unwrap_or(0);
    axis[k] = 1.0;
    let c = cross(u, &axis);
    normalize(&c).unwrap_or([1.0, 0.0, 0.0])
}

/// Standard normal deviate (Box-Muller).
pub fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1: f64 = 1.0 - rng.random::<f64>();
    let u2: f64 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

/// Uniformly distributed direction on the unit sphere.
pub fn random_unit_vector<R: Rng + ?Sized>(rng: &mut R) -> Vec3 {
    let z: f64 = 2.0 * rng.random::<f64>() - 1.0;
    let phi: f64 = 2.0 * PI * rng.random::<f64>();
    let rho = (1.0 - z * z).max(0.0).sqrt();
    [rho * phi.cos(), rho * phi.sin(), z]
}

/// Wraps every coordinate into `[0, world_size)`.
pub fn apply_boundary(pos: &Vec3, world_size: f64) -> Vec3 {
    let mut out = *pos;
    for x in &mut out {
        *x = x.rem_euclid(world_size);
        // rem_euclid can round up to exactly world_size for tiny negatives
        if *x >= world_size {
            *x = 0.0;
        }
    }
    out
}

/// Image of `pos` closest to `reference` under periodic boundaries.
pub fn cyclic_transpose(pos: &Vec3, reference: &Vec3, world_size: f64) -> Vec3 {
    let half = world_size * 0.5;
    let mut out = *pos;
    for k in 0..DIM {
        let d = pos[k] - reference[k];
        if d > half {
            out[k] -= world_size;
        } else if d < -half {
            out[k] += world_size;
        }
    }
    out
}

/// Minimum-image separation vector `b - a`.
pub fn periodic_delta(a: &Vec3, b: &Vec3, world_size: f64) -> Vec3 {
    sub(&cyclic_transpose(b, a, world_size), a)
}

/// Minimum-image distance between two points.
pub fn periodic_distance(a: &Vec3, b: &Vec3, world_size: f64) -> f64 {
    length(&periodic_delta(a, b, world_size))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sphere {
    pub center: Vec3,
    pub radius: f64,
}

/// Finite cylinder; `axis` is a unit vector and the cylinder spans
/// `center ± half_length * axis`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cylinder {
    pub center: Vec3,
    pub axis: Vec3,
    pub radius: f64,
    pub half_length: f64,
}

/// Geometry kinds understood by the shell containers.
pub trait ShellShape {
    fn center(&self) -> Vec3;

    /// Signed distance from `pos` (already in the shape's local image) to the
    /// surface; negative inside.
    fn local_distance(&self, pos: &Vec3) -> f64;

    /// Radius of the smallest centred ball enclosing the shape.
    fn bounding_radius(&self) -> f64;

    /// Signed minimum-image distance from `pos` to the surface.
    fn distance(&self, pos: &Vec3, world_size: f64) -> f64 {
        let center = self.center();
        let local = cyclic_transpose(pos, &center, world_size);
        self.local_distance(&local)
    }
}

impl ShellShape for Sphere {
    fn center(&self) -> Vec3 {
        self.center
    }

    fn local_distance(&self, pos: &Vec3) -> f64 {
        length(&sub(pos, &self.center)) - self.radius
    }

    fn bounding_radius(&self) -> f64 {
        self.radius
    }
}

impl Cylinder {
    /// Axial and radial coordinates of `pos` relative to the cylinder.
    fn decompose(&self, pos: &Vec3) -> (f64, f64) {
        let v = sub(pos, &self.center);
        let z = dot(&v, &self.axis);
        let radial = sub(&v, &scale(&self.axis, z));
        (z, length(&radial))
    }
}

impl ShellShape for Cylinder {
    fn center(&self) -> Vec3 {
        self.center
    }

    fn local_distance(&self, pos: &Vec3) -> f64 {
        let (z, rho) = self.decompose(pos);
        let dz = z.abs() - self.half_length;
        let dr = rho - self.radius;
        match (dz > 0.0, dr > 0.0) {
            (true, true) => (dz * dz + dr * dr).sqrt(),
            (true, false) => dz,
            (false, true) => dr,
            (false, false) => dz.max(dr),
        }
    }

    fn bounding_radius(&self) -> f64 {
        (self.radius * self.radius + self.half_length * self.half_length).sqrt()
    }
}

/// A shell's shape, tagged by kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Shape {
    Sphere(Sphere),
    Cylinder(Cylinder),
}

impl Shape {
    pub fn center(&self) -> Vec3 {
        match self {
            Shape::Sphere(s) => s.center,
            Shape::Cylinder(c) => c.center,
        }
    }

    pub fn distance(&self, pos: &Vec3, world_size: f64) -> f64 {
        match self {
            Shape::Sphere(s) => s.distance(pos, world_size),
            Shape::Cylinder(c) => c.distance(pos, world_size),
        }
    }

    pub fn bounding_radius(&self) -> f64 {
        match self {
            Shape::Sphere(s) => s.radius,
            Shape::Cylinder(c) => c.bounding_radius(),
        }
    }

    /// Whether the two shapes share interior volume (touching is allowed).
    ///
    /// Exact for sphere/sphere, sphere/cylinder and parallel cylinders. For
    /// skewed cylinders the test reports no overlap only when the bounding ball
    /// of one shape is clear of the other.
    pub fn overlaps(&self, other: &Shape, world_size: f64) -> bool {
        let tol = TOUCH_TOLERANCE * self.bounding_radius().max(other.bounding_radius());
        match (self, other) {
            (Shape::Sphere(a), Shape::Sphere(b)) => {
                periodic_distance(&a.center, &b.center, world_size) < a.radius + b.radius - tol
            }
            (Shape::Sphere(s), Shape::Cylinder(c)) | (Shape::Cylinder(c), Shape::Sphere(s)) => {
                c.distance(&s.center, world_size) < s.radius - tol
            }
            (Shape::Cylinder(a), Shape::Cylinder(b)) => {
                if dot(&a.axis, &b.axis).abs() > 1.0 - 1e-9 {
                    let local = cyclic_transpose(&b.center, &a.center, world_size);
                    let (z, rho) = a.decompose(&local);
                    z.abs() < a.half_length + b.half_length - tol
                        && rho < a.radius + b.radius - tol
                } else {
                    let clear_a = b.distance(&a.center, world_size) >= a.bounding_radius() - tol;
                    let clear_b = a.distance(&b.center, world_size) >= b.bounding_radius() - tol;
                    !(clear_a || clear_b)
                }
            }
        }
    }
}
