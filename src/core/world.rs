use crate::core::geometry::{self, Vec3};
use crate::core::grid::CellGrid;
use crate::core::particle::{Particle, ParticleId, Species, SpeciesId};
use crate::core::structure::{Structure, StructureId};
use crate::error::{Error, Result};
use rand::Rng;
use std::collections::{BTreeMap, BTreeSet};

/// Placement attempts per particle in [`World::throw_in_particles`].
const MAX_PLACEMENT_ATTEMPTS: usize = 100_000;

/// Cells per edge of the particle grid until the simulator sets its own.
const DEFAULT_MATRIX_SIZE: usize = 10;

/// In-process particle store: a cubic periodic box with species, structures
/// and particles.
///
/// Particles are kept in a `BTreeMap` so that iteration order (and therefore
/// the order in which the simulator builds its domains) is deterministic.
/// A cell grid over particle centres answers overlap queries.
#[derive(Debug, Clone)]
pub struct World {
    world_size: f64,
    structures: Vec<Structure>,
    species: Vec<Species>,
    particles: BTreeMap<ParticleId, Particle>,
    grid: CellGrid,
    cells: Vec<BTreeSet<ParticleId>>,
    next_particle_id: u64,
}

impl World {
    /// Creates an empty world containing only the bulk region.
    pub fn new(world_size: f64) -> Result<Self> {
        if !world_size.is_finite() || world_size <= 0.0 {
            return Err(Error::InvalidParam(
                "world_size must be finite and > 0".into(),
            ));
        }
        let grid = CellGrid::new(world_size, DEFAULT_MATRIX_SIZE)?;
        Ok(Self {
            world_size,
            structures: vec![Structure::Region],
            species: Vec::new(),
            particles: BTreeMap::new(),
            grid,
            cells: vec![BTreeSet::new(); grid.num_cells()],
            next_particle_id: 0,
        })
    }

    /// Re-buckets every particle into a grid of `matrix_size` cells per edge.
    pub fn set_matrix_size(&mut self, matrix_size: usize) -> Result<()> {
        let grid = CellGrid::new(self.world_size, matrix_size)?;
        let mut cells = vec![BTreeSet::new(); grid.num_cells()];
        for p in self.particles.values() {
            cells[grid.cell_index(&p.position)].insert(p.id);
        }
        self.grid = grid;
        self.cells = cells;
        Ok(())
    }

    #[inline]
    pub fn matrix_size(&self) -> usize {
        self.grid.matrix_size()
    }

    #[inline]
    pub fn world_size(&self) -> f64 {
        self.world_size
    }

    pub fn add_structure(&mut self, structure: Structure) -> StructureId {
        self.structures.push(structure);
        StructureId(self.structures.len() as u32 - 1)
    }

    pub fn get_structure(&self, id: StructureId) -> Result<&Structure> {
        self.structures
            .get(id.0 as usize)
            .ok_or_else(|| Error::InvalidParam(format!("unknown structure {}", id.0)))
    }

    pub fn add_species(
        &mut self,
        name: impl Into<String>,
        radius: f64,
        d: f64,
        structure: StructureId,
    ) -> Result<SpeciesId> {
        self.get_structure(structure)?;
        let id = SpeciesId(self.species.len() as u32);
        self.species
            .push(Species::new(id, name, radius, d, structure)?);
        Ok(id)
    }

    pub fn get_species(&self, id: SpeciesId) -> Result<&Species> {
        self.species
            .get(id.0 as usize)
            .ok_or_else(|| Error::InvalidParam(format!("unknown species {id}")))
    }

    pub fn species(&self) -> impl Iterator<Item = &Species> {
        self.species.iter()
    }

    /// Structure the particles of `species` live on.
    pub fn structure_of(&self, species: SpeciesId) -> Result<&Structure> {
        let sp = self.get_species(species)?;
        self.get_structure(sp.structure)
    }

    /// Creates a particle of `species`, projected onto its structure and
    /// wrapped into the box. No overlap check is done here.
    pub fn new_particle(&mut self, species: SpeciesId, position: Vec3) -> Result<Particle> {
        let structure = *self.structure_of(species)?;
        let position = self.apply_boundary(&structure.project(&position));
        let id = ParticleId(self.next_particle_id);
        let particle = Particle::new(id, self.get_species(species)?, position)?;
        self.next_particle_id += 1;
        self.cells[self.grid.cell_index(&position)].insert(id);
        self.particles.insert(id, particle.clone());
        Ok(particle)
    }

    pub fn remove_particle(&mut self, id: ParticleId) -> Result<Particle> {
        let particle = self
            .particles
            .remove(&id)
            .ok_or_else(|| Error::consistency(format!("remove of unknown particle {id}")))?;
        self.cells[self.grid.cell_index(&particle.position)].remove(&id);
        Ok(particle)
    }

    /// Replaces the stored record of an existing particle.
    pub fn update_particle(&mut self, particle: Particle) -> Result<()> {
        let Some(slot) = self.particles.get_mut(&particle.id) else {
            return Err(Error::consistency(format!(
                "update of unknown particle {}",
                particle.id
            )));
        };
        let (from, to) = (
            self.grid.cell_index(&slot.position),
            self.grid.cell_index(&particle.position),
        );
        if from != to {
            self.cells[from].remove(&particle.id);
            self.cells[to].insert(particle.id);
        }
        *slot = particle;
        Ok(())
    }

    pub fn get_particle(&self, id: ParticleId) -> Result<&Particle> {
        self.particles
            .get(&id)
            .ok_or_else(|| Error::InvalidParam(format!("unknown particle {id}")))
    }

    pub fn particles(&self) -> impl Iterator<Item = &Particle> {
        self.particles.values()
    }

    #[inline]
    pub fn num_particles(&self) -> usize {
        self.particles.len()
    }

    pub fn positions(&self) -> Vec<Vec3> {
        self.particles.values().map(|p| p.position).collect()
    }

    /// Particles from the grid cells that can reach the ball `(center, radius)`.
    fn nearby(&self, center: &Vec3, radius: f64) -> impl Iterator<Item = &Particle> + '_ {
        let largest = self.species.iter().map(|s| s.radius).fold(0.0, f64::max);
        self.grid
            .candidate_cells(center, radius + largest)
            .into_iter()
            .flat_map(move |c| self.cells[c].iter())
            .filter_map(move |id| self.particles.get(id))
    }

    /// Particles (not in `ignore`) whose sphere intersects the ball
    /// `(center, radius)`, in id order.
    pub fn overlapping(&self, center: &Vec3, radius: f64, ignore: &[ParticleId]) -> Vec<ParticleId> {
        let mut ids: Vec<ParticleId> = self
            .nearby(center, radius)
            .filter(|p| !ignore.contains(&p.id))
            .filter(|p| self.distance(center, &p.position) < radius + p.radius)
            .map(|p| p.id)
            .collect();
        ids.sort();
        ids
    }

    /// Whether any particle not in `ignore` intersects the ball `(center, radius)`.
    pub fn check_overlap(&self, center: &Vec3, radius: f64, ignore: &[ParticleId]) -> bool {
        self.nearby(center, radius).any(|p| {
            !ignore.contains(&p.id) && self.distance(center, &p.position) < radius + p.radius
        })
    }

    #[inline]
    pub fn distance(&self, a: &Vec3, b: &Vec3) -> f64 {
        geometry::periodic_distance(a, b, self.world_size)
    }

    #[inline]
    pub fn apply_boundary(&self, pos: &Vec3) -> Vec3 {
        geometry::apply_boundary(pos, self.world_size)
    }

    #[inline]
    pub fn cyclic_transpose(&self, pos: &Vec3, reference: &Vec3) -> Vec3 {
        geometry::cyclic_transpose(pos, reference, self.world_size)
    }

    /// Diffusion-weighted centre of mass `(D2 x1 + D1 x2) / (D1 + D2)`,
    /// wrapped into the box. Immobile pairs use the midpoint.
    pub fn calculate_pair_com(&self, pos1: &Vec3, pos2: &Vec3, d1: f64, d2: f64) -> Vec3 {
        let pos2t = self.cyclic_transpose(pos2, pos1);
        let d12 = d1 + d2;
        let (w1, w2) = if d12 > 0.0 {
            (d2 / d12, d1 / d12)
        } else {
            (0.5, 0.5)
        };
        let com = geometry::add(&geometry::scale(pos1, w1), &geometry::scale(&pos2t, w2));
        self.apply_boundary(&com)
    }

    /// Places `n` particles of `species` at random, non-overlapping positions
    /// on the species' structure.
    pub fn throw_in_particles<R: Rng + ?Sized>(
        &mut self,
        species: SpeciesId,
        n: usize,
        rng: &mut R,
    ) -> Result<Vec<ParticleId>> {
        let radius = self.get_species(species)?.radius;
        let structure = *self.structure_of(species)?;
        let mut placed = Vec::with_capacity(n);
        for _ in 0..n {
            let mut attempts = 0usize;
            let pos = loop {
                if attempts >= MAX_PLACEMENT_ATTEMPTS {
                    return Err(Error::InvalidParam(format!(
                        "failed to place particle of species {species} without overlap after {} particles",
                        placed.len()
                    )));
                }
                attempts += 1;
                let raw = [
                    rng.random::<f64>() * self.world_size,
                    rng.random::<f64>() * self.world_size,
                    rng.random::<f64>() * self.world_size,
                ];
                let pos = self.apply_boundary(&structure.project(&raw));
                if !self.check_overlap(&pos, radius, &[]) {
                    break pos;
                }
            };
            placed.push(self.new_particle(species, pos)?.id);
        }
        Ok(placed)
    }
}
