use approx::assert_relative_eq;
use egfrd::core::{NetworkRules, ReactionRule, Simulator, StructureId, World};
use egfrd::error::Result;
use egfrd::SimConfig;

const SAMPLES: usize = 2_000;

fn lone_particle(k: Option<f64>, seed: u64) -> Result<Simulator> {
    let mut config = SimConfig::default();
    config.world.world_size = 50.0;
    config.world.matrix_size = 5;
    config.seed = Some(seed);
    let mut sim = Simulator::new(World::new(50.0)?, NetworkRules::new(), config)?;
    let a = sim.add_species("A", 0.5, 1.0, StructureId::BULK)?;
    if let Some(k) = k {
        sim.add_reaction_rule(ReactionRule::unimolecular(a, vec![a], k)?)?;
    }
    sim.add_particle(a, [25.0, 25.0, 25.0])?;
    Ok(sim)
}

/// A lone particle always gets the largest shell, so its escape times
/// average to a^2 / 6D for the mobility radius a.
#[test]
fn mean_escape_time_matches_sphere() -> Result<()> {
    let mut sim = lone_particle(None, 41)?;
    let a = sim.max_shell_size() - 0.5;
    let expected = a * a / 6.0;

    // the first step only turns the reset Single into a sized one
    sim.step()?;
    let mut total = 0.0;
    for _ in 0..SAMPLES {
        total += sim.dt();
        sim.step()?;
    }
    let mean = total / SAMPLES as f64;
    assert_relative_eq!(mean, expected, max_relative = 0.06);
    assert_eq!(sim.counters().single_escape as usize, SAMPLES + 1);
    Ok(())
}

/// A unimolecular rule competes with escape: for k = 0.3 about 58% of sized
/// Singles react before escaping, and every product starts as a reset Single
/// that escapes at once, so reactions make up roughly p / (1 + p) of events.
#[test]
fn reactions_compete_with_escape() -> Result<()> {
    let k = 0.3;
    let mut sim = lone_particle(Some(k), 42)?;
    for _ in 0..SAMPLES {
        sim.step()?;
    }
    let counters = sim.counters();
    let total = (counters.single_escape + counters.single_reaction) as f64;
    let fraction = counters.single_reaction as f64 / total;
    assert!(fraction > 0.2 && fraction < 0.6, "reaction fraction {fraction}");
    assert_eq!(sim.world().num_particles(), 1);
    sim.check()?;
    Ok(())
}
