use numpy::ndarray::Array2;
use numpy::{IntoPyArray, PyArray2};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyDict;

use crate::config::SimConfig;
use crate::core::{
    NetworkRules, ParticleId, ReactionRule, Simulator, SpeciesId, Structure, StructureId, World,
};

fn py_err<E: ToString>(e: E) -> PyErr {
    PyValueError::new_err(e.to_string())
}

/// Python-facing wrapper around the eGFRD simulator.
///
/// API:
/// - __new__(world_size, matrix_size=10, seed=None)
/// - add_species / add_planar_surface / add_cylindrical_surface
/// - add_reaction_rule / add_particle / throw_in_particles
/// - step(), stop(t), run(t)
/// - get_positions() -> np.ndarray, shape (N, 3)
/// - get_counters() -> dict, report() -> str
#[pyclass]
pub struct EgfrdSim {
    sim: Simulator,
}

#[pymethods]
impl EgfrdSim {
    /// Create an empty periodic world of edge `world_size`.
    ///
    /// Errors: raises ValueError on invalid parameters.
    #[new]
    #[pyo3(signature = (world_size, matrix_size=10, seed=None))]
    fn new(world_size: f64, matrix_size: usize, seed: Option<u64>) -> PyResult<Self> {
        let mut config = SimConfig::default();
        config.world.world_size = world_size;
        config.world.matrix_size = matrix_size;
        config.seed = seed;
        let world = World::new(world_size).map_err(py_err)?;
        let sim = Simulator::new(world, NetworkRules::new(), config).map_err(py_err)?;
        Ok(Self { sim })
    }

    /// Register a species and return its id. `structure` 0 is the bulk.
    #[pyo3(signature = (name, radius, d, structure=0))]
    fn add_species(&mut self, name: String, radius: f64, d: f64, structure: u32) -> PyResult<u32> {
        let id = self
            .sim
            .add_species(name, radius, d, StructureId(structure))
            .map_err(py_err)?;
        Ok(id.0)
    }

    /// Add an infinite plane through `origin` and return its structure id.
    fn add_planar_surface(&mut self, origin: [f64; 3], normal: [f64; 3]) -> PyResult<u32> {
        let plane = Structure::plane(origin, normal).map_err(py_err)?;
        Ok(self.sim.add_structure(plane).0)
    }

    /// Add an infinite filament through `origin` and return its structure id.
    fn add_cylindrical_surface(&mut self, origin: [f64; 3], axis: [f64; 3]) -> PyResult<u32> {
        let filament = Structure::filament(origin, axis).map_err(py_err)?;
        Ok(self.sim.add_structure(filament).0)
    }

    /// Add `reactants -> products` with rate `k`.
    fn add_reaction_rule(&mut self, reactants: Vec<u32>, products: Vec<u32>, k: f64) -> PyResult<()> {
        let rule = ReactionRule::new(
            reactants.into_iter().map(SpeciesId).collect(),
            products.into_iter().map(SpeciesId).collect(),
            k,
        )
        .map_err(py_err)?;
        self.sim.add_reaction_rule(rule).map_err(py_err)
    }

    fn add_particle(&mut self, species: u32, position: [f64; 3]) -> PyResult<u64> {
        let id = self
            .sim
            .add_particle(SpeciesId(species), position)
            .map_err(py_err)?;
        Ok(id.0)
    }

    fn throw_in_particles(&mut self, species: u32, n: usize) -> PyResult<Vec<u64>> {
        let ids = self
            .sim
            .throw_in_particles(SpeciesId(species), n)
            .map_err(py_err)?;
        Ok(ids.into_iter().map(|ParticleId(id)| id).collect())
    }

    fn step(&mut self) -> PyResult<()> {
        self.sim.step().map_err(py_err)
    }

    /// Synchronise every particle to time `t`.
    fn stop(&mut self, t: f64) -> PyResult<()> {
        self.sim.stop(t).map_err(py_err)
    }

    /// Run to the absolute time `t` (releases the GIL during computation).
    fn run(&mut self, py: Python<'_>, t: f64) -> PyResult<()> {
        py.detach(|| self.sim.run_until(t)).map_err(py_err)
    }

    fn time(&self) -> f64 {
        self.sim.time()
    }

    /// Return positions as a NumPy array of shape (N, 3), dtype=float64.
    fn get_positions<'py>(&self, py: Python<'py>) -> PyResult<Py<PyArray2<f64>>> {
        let positions = self.sim.positions();
        let mut arr = Array2::<f64>::zeros((positions.len(), 3));
        for (i, p) in positions.iter().enumerate() {
            for k in 0..3 {
                arr[[i, k]] = p[k];
            }
        }
        Ok(arr.into_pyarray(py).to_owned().into())
    }

    /// Return the step counters as {name: count}.
    fn get_counters<'py>(&self, py: Python<'py>) -> PyResult<Py<PyDict>> {
        let out = PyDict::new(py);
        for (name, value) in self.sim.counters().entries() {
            out.set_item(name, value)?;
        }
        Ok(out.into())
    }

    fn report(&self) -> String {
        self.sim.report()
    }
}

/// The egfrd Python module entry point.
#[pymodule]
fn egfrd(_py: Python<'_>, m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<EgfrdSim>()?;
    Ok(())
}
