//! Spatial indices over domain shells.
//!
//! Shells are bucketed by centre into an `n x n x n` grid of cells covering the
//! periodic world. Queries scan the cells that can hold a shell within reach and
//! measure exact signed distances with the shell's own geometry.

use crate::core::domain::DomainId;
use crate::core::geometry::{Cylinder, Shape, ShellShape, Sphere, Vec3};
use crate::core::grid::CellGrid;
use crate::error::{Error, Result};
use ordered_float::NotNan;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Shell identifier, unique across all containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShellId(pub u64);

impl fmt::Display for ShellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sh{}", self.0)
    }
}

/// A neighbour query hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub shell_id: ShellId,
    pub domain_id: DomainId,
    /// Signed distance from the query point to the shell surface.
    pub distance: f64,
}

#[derive(Debug, Clone)]
struct Entry<S> {
    domain_id: DomainId,
    shape: S,
    cell: usize,
}

/// Cell-grid index over shells of one geometry kind.
#[derive(Debug, Clone)]
pub struct ShellContainer<S> {
    grid: CellGrid,
    cells: Vec<BTreeSet<ShellId>>,
    entries: HashMap<ShellId, Entry<S>>,
    /// Multiset of bounding radii, so the largest one is known after removals.
    extents: BTreeMap<NotNan<f64>, usize>,
}

impl<S: ShellShape + Clone> ShellContainer<S> {
    pub fn new(world_size: f64, matrix_size: usize) -> Result<Self> {
        let grid = CellGrid::new(world_size, matrix_size)?;
        Ok(Self {
            grid,
            cells: vec![BTreeSet::new(); grid.num_cells()],
            entries: HashMap::new(),
            extents: BTreeMap::new(),
        })
    }

    #[inline]
    pub fn world_size(&self) -> f64 {
        self.grid.world_size()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: ShellId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn get(&self, id: ShellId) -> Option<(DomainId, &S)> {
        self.entries.get(&id).map(|e| (e.domain_id, &e.shape))
    }

    /// All shells, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (ShellId, DomainId, &S)> {
        self.entries.iter().map(|(&id, e)| (id, e.domain_id, &e.shape))
    }

    /// Inserts or replaces the shell `id`.
    pub fn update(&mut self, id: ShellId, domain_id: DomainId, shape: S) -> Result<()> {
        let extent = NotNan::new(shape.bounding_radius())
            .map_err(|_| Error::consistency(format!("shell {id} has a NaN size")))?;
        self.remove(id);
        let cell = self.grid.cell_index(&shape.center());
        self.cells[cell].insert(id);
        *self.extents.entry(extent).or_insert(0) += 1;
        self.entries.insert(
            id,
            Entry {
                domain_id,
                shape,
                cell,
            },
        );
        Ok(())
    }

    /// Removes the shell `id`, returning its owner and shape if it was present.
    pub fn remove(&mut self, id: ShellId) -> Option<(DomainId, S)> {
        let entry = self.entries.remove(&id)?;
        self.cells[entry.cell].remove(&id);
        if let Ok(extent) = NotNan::new(entry.shape.bounding_radius()) {
            if let Some(count) = self.extents.get_mut(&extent) {
                *count -= 1;
                if *count == 0 {
                    self.extents.remove(&extent);
                }
            }
        }
        Some((entry.domain_id, entry.shape))
    }

    /// Shells whose surface lies within `radius` of `pos` (inclusive), sorted
    /// by ascending distance (ties by shell id).
    pub fn neighbors_within(&self, pos: &Vec3, radius: f64) -> Vec<Neighbor> {
        let reach = radius + self.max_extent();
        let ws = self.grid.world_size();
        let mut hits: Vec<Neighbor> = self
            .grid
            .candidate_cells(pos, reach)
            .into_iter()
            .flat_map(|c| self.cells[c].iter())
            .filter_map(|&id| {
                let e = self.entries.get(&id)?;
                let distance = e.shape.distance(pos, ws);
                (distance <= radius).then_some(Neighbor {
                    shell_id: id,
                    domain_id: e.domain_id,
                    distance,
                })
            })
            .collect();
        sort_neighbors(&mut hits);
        hits
    }

    /// Every shell in ascending distance from `pos`, produced lazily in
    /// widening search shells.
    pub fn neighbors(&self, pos: Vec3) -> Neighbors<'_, S> {
        Neighbors {
            container: self,
            pos,
            lower: f64::NEG_INFINITY,
            upper: self.grid.cell_size(),
            buffer: Vec::new(),
            done: self.entries.is_empty(),
        }
    }

    fn max_extent(&self) -> f64 {
        self.extents
            .last_key_value()
            .map(|(e, _)| e.into_inner())
            .unwrap_or(0.0)
    }

}

fn sort_neighbors(hits: &mut [Neighbor]) {
    hits.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then(a.shell_id.cmp(&b.shell_id))
    });
}

/// Lazy ascending neighbour sequence, see [`ShellContainer::neighbors`].
pub struct Neighbors<'a, S> {
    container: &'a ShellContainer<S>,
    pos: Vec3,
    lower: f64,
    upper: f64,
    /// Current band, stored in descending order so `pop` yields the nearest.
    buffer: Vec<Neighbor>,
    done: bool,
}

impl<S: ShellShape + Clone> Iterator for Neighbors<'_, S> {
    type Item = Neighbor;

    fn next(&mut self) -> Option<Neighbor> {
        loop {
            if let Some(n) = self.buffer.pop() {
                return Some(n);
            }
            if self.done {
                return None;
            }
            let c = self.container;
            // Once the band covers the whole periodic box every shell has been seen.
            let limit = c.grid.world_size() * 3f64.sqrt() + c.max_extent();
            let mut band: Vec<Neighbor> = c
                .neighbors_within(&self.pos, self.upper)
                .into_iter()
                // the previous band already yielded distances up to `lower`
                .filter(|n| n.distance > self.lower)
                .collect();
            band.reverse();
            self.buffer = band;
            if self.upper > limit {
                self.done = true;
            }
            self.lower = self.upper;
            self.upper *= 2.0;
        }
    }
}

/// One container per shell geometry, addressed through [`Shape`].
#[derive(Debug, Clone)]
pub struct ShellContainers {
    pub spheres: ShellContainer<Sphere>,
    pub cylinders: ShellContainer<Cylinder>,
}

impl ShellContainers {
    pub fn new(world_size: f64, matrix_size: usize) -> Result<Self> {
        Ok(Self {
            spheres: ShellContainer::new(world_size, matrix_size)?,
            cylinders: ShellContainer::new(world_size, matrix_size)?,
        })
    }

    /// Upserts a shell; a shell that changed kind is dropped from the other container.
    pub fn update(&mut self, id: ShellId, domain_id: DomainId, shape: Shape) -> Result<()> {
        match shape {
            Shape::Sphere(s) => {
                self.cylinders.remove(id);
                self.spheres.update(id, domain_id, s)
            }
            Shape::Cylinder(c) => {
                self.spheres.remove(id);
                self.cylinders.update(id, domain_id, c)
            }
        }
    }

    pub fn remove(&mut self, id: ShellId) -> Result<(DomainId, Shape)> {
        if let Some((d, s)) = self.spheres.remove(id) {
            return Ok((d, Shape::Sphere(s)));
        }
        if let Some((d, c)) = self.cylinders.remove(id) {
            return Ok((d, Shape::Cylinder(c)));
        }
        Err(Error::consistency(format!("remove of unregistered shell {id}")))
    }

    pub fn get(&self, id: ShellId) -> Option<(DomainId, Shape)> {
        if let Some((d, s)) = self.spheres.get(id) {
            return Some((d, Shape::Sphere(*s)));
        }
        self.cylinders
            .get(id)
            .map(|(d, c)| (d, Shape::Cylinder(*c)))
    }

    pub fn len(&self) -> usize {
        self.spheres.len() + self.cylinders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) -> Result<()> {
        *self = Self::new(self.spheres.world_size(), self.spheres.grid.matrix_size())?;
        Ok(())
    }

    /// All shells of all kinds.
    pub fn iter(&self) -> impl Iterator<Item = (ShellId, DomainId, Shape)> + '_ {
        self.spheres
            .iter()
            .map(|(id, d, s)| (id, d, Shape::Sphere(*s)))
            .chain(
                self.cylinders
                    .iter()
                    .map(|(id, d, c)| (id, d, Shape::Cylinder(*c))),
            )
    }

    /// Merged, sorted [`ShellContainer::neighbors_within`] over every kind.
    pub fn neighbors_within(&self, pos: &Vec3, radius: f64) -> Vec<Neighbor> {
        let mut hits = self.spheres.neighbors_within(pos, radius);
        hits.extend(self.cylinders.neighbors_within(pos, radius));
        sort_neighbors(&mut hits);
        hits
    }

    /// Nearest shell not owned by a domain in `ignore`.
    pub fn closest(&self, pos: &Vec3, ignore: &[DomainId]) -> Option<Neighbor> {
        let a = self
            .spheres
            .neighbors(*pos)
            .find(|n| !ignore.contains(&n.domain_id));
        let b = self
            .cylinders
            .neighbors(*pos)
            .find(|n| !ignore.contains(&n.domain_id));
        match (a, b) {
            (Some(a), Some(b)) => Some(if b.distance < a.distance { b } else { a }),
            (a, b) => a.or(b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sphere(x: f64, y: f64, z: f64, r: f64) -> Sphere {
        Sphere {
            center: [x, y, z],
            radius: r,
        }
    }

    #[test]
    fn neighbors_within_sorted_and_periodic() -> Result<()> {
        let mut c = ShellContainer::new(10.0, 5)?;
        c.update(ShellId(1), DomainId(1), sphere(5.0, 5.0, 5.0, 1.0))?;
        c.update(ShellId(2), DomainId(2), sphere(8.0, 5.0, 5.0, 0.5))?;
        c.update(ShellId(3), DomainId(3), sphere(0.5, 5.0, 5.0, 0.5))?;
        let hits = c.neighbors_within(&[9.5, 5.0, 5.0], 2.0);
        let ids: Vec<_> = hits.iter().map(|n| n.shell_id).collect();
        assert_eq!(ids, vec![ShellId(3), ShellId(2)]);
        assert_relative_eq!(hits[0].distance, 0.5, epsilon = 1e-12);
        assert_relative_eq!(hits[1].distance, 1.0, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn neighbors_within_includes_the_boundary() -> Result<()> {
        let mut c = ShellContainer::new(10.0, 5)?;
        c.update(ShellId(1), DomainId(1), sphere(6.25, 5.0, 5.0, 0.5))?;
        // surface exactly 0.75 away
        let hits = c.neighbors_within(&[5.0, 5.0, 5.0], 0.75);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].distance, 0.75);
        assert!(c.neighbors_within(&[5.0, 5.0, 5.0], 0.7).is_empty());
        // a shell sitting on a band edge is produced once by the lazy scan
        c.update(ShellId(2), DomainId(2), sphere(5.0, 5.0, 9.0, 2.0))?;
        assert_eq!(c.neighbors([5.0, 5.0, 5.0]).count(), 2);
        Ok(())
    }

    #[test]
    fn update_moves_and_resizes() -> Result<()> {
        let mut c = ShellContainer::new(10.0, 5)?;
        c.update(ShellId(1), DomainId(1), sphere(1.0, 1.0, 1.0, 0.5))?;
        c.update(ShellId(1), DomainId(1), sphere(7.0, 7.0, 7.0, 3.0))?;
        assert_eq!(c.len(), 1);
        assert!(c.neighbors_within(&[1.0, 1.0, 1.0], 0.5).is_empty());
        // a large shell is found even though its centre is several cells away
        assert_eq!(c.neighbors_within(&[3.5, 7.0, 7.0], 1.0).len(), 1);
        assert!(c.remove(ShellId(1)).is_some());
        assert!(c.remove(ShellId(1)).is_none());
        assert!(c.is_empty());
        Ok(())
    }

    #[test]
    fn lazy_neighbors_visit_every_shell_in_order() -> Result<()> {
        let mut c = ShellContainer::new(30.0, 6)?;
        for i in 0..20u64 {
            let x = (i as f64 * 7.3) % 30.0;
            let y = (i as f64 * 3.1) % 30.0;
            c.update(ShellId(i), DomainId(i), sphere(x, y, 15.0, 0.3))?;
        }
        let all: Vec<_> = c.neighbors([2.0, 2.0, 2.0]).collect();
        assert_eq!(all.len(), 20);
        assert!(all.windows(2).all(|w| w[0].distance <= w[1].distance));
        let mut c = ShellContainer::<Sphere>::new(30.0, 6)?;
        assert!(c.neighbors([0.0; 3]).next().is_none());
        c.update(ShellId(0), DomainId(0), sphere(29.0, 29.0, 29.0, 0.1))?;
        assert_eq!(c.neighbors([14.0; 3]).count(), 1);
        Ok(())
    }

    #[test]
    fn containers_dispatch_on_shape() -> Result<()> {
        let mut cs = ShellContainers::new(10.0, 5)?;
        cs.update(
            ShellId(1),
            DomainId(1),
            Shape::Sphere(sphere(2.0, 2.0, 2.0, 1.0)),
        )?;
        cs.update(
            ShellId(2),
            DomainId(2),
            Shape::Cylinder(Cylinder {
                center: [6.0, 2.0, 2.0],
                axis: [0.0, 0.0, 1.0],
                radius: 1.0,
                half_length: 0.5,
            }),
        )?;
        assert_eq!(cs.len(), 2);
        let near = cs.closest(&[4.5, 2.0, 2.0], &[])
            .ok_or_else(|| Error::consistency("no shell"))?;
        assert_eq!(near.shell_id, ShellId(2));
        let near = cs.closest(&[4.5, 2.0, 2.0], &[DomainId(2)])
            .ok_or_else(|| Error::consistency("no shell"))?;
        assert_eq!(near.shell_id, ShellId(1));
        assert_eq!(cs.neighbors_within(&[4.0, 2.0, 2.0], 1.5).len(), 2);
        cs.remove(ShellId(2))?;
        assert!(cs.remove(ShellId(2)).is_err());
        Ok(())
    }
}
