use egfrd::core::{NetworkRules, Simulator, StructureId, World};
use egfrd::error::Result;
use egfrd::SimConfig;

fn config(world_size: f64, matrix_size: usize, seed: u64) -> SimConfig {
    let mut config = SimConfig::default();
    config.world.world_size = world_size;
    config.world.matrix_size = matrix_size;
    config.seed = Some(seed);
    config
}

/// Two Singles at the pairing distance become one Pair when the first of
/// them fires.
#[test]
fn singles_at_threshold_form_pair() -> Result<()> {
    let mut world = World::new(100.0)?;
    let a = world.add_species("A", 0.5, 1.0, StructureId::BULK)?;
    // the intruder radius is radius * single_shell_factor = 0.55
    world.new_particle(a, [50.0, 50.0, 50.0])?;
    world.new_particle(a, [51.05, 50.0, 50.0])?;
    let mut sim = Simulator::new(world, NetworkRules::new(), config(100.0, 5, 11))?;

    sim.initialize()?;
    assert_eq!(sim.count_domains(), (2, 0, 0));
    sim.step()?;
    assert_eq!(sim.count_domains(), (0, 1, 0));
    assert_eq!(sim.num_events(), 1);
    sim.check()?;

    for _ in 0..50 {
        sim.step()?;
        sim.check()?;
    }
    assert_eq!(sim.world().num_particles(), 2);
    Ok(())
}

/// A neighbour whose reset shell lies exactly on the intruder radius is
/// still an intruder.
#[test]
fn exact_intruder_distance_forms_pair() -> Result<()> {
    let mut world = World::new(100.0)?;
    let a = world.add_species("A", 0.5, 1.0, StructureId::BULK)?;
    // gap 0.75 == radius * single_shell_factor, both exact in binary
    world.new_particle(a, [50.0, 50.0, 50.0])?;
    world.new_particle(a, [51.25, 50.0, 50.0])?;
    let mut config = config(100.0, 5, 14);
    config.shells.single_shell_factor = 1.5;
    let mut sim = Simulator::new(world, NetworkRules::new(), config)?;

    sim.initialize()?;
    sim.step()?;
    assert_eq!(sim.count_domains(), (0, 1, 0));
    sim.check()?;
    Ok(())
}

/// Singles farther apart than the intruder radius keep their own shells.
#[test]
fn distant_singles_stay_single() -> Result<()> {
    let mut world = World::new(100.0)?;
    let a = world.add_species("A", 0.5, 1.0, StructureId::BULK)?;
    world.new_particle(a, [50.0, 50.0, 50.0])?;
    world.new_particle(a, [51.2, 50.0, 50.0])?;
    let mut sim = Simulator::new(world, NetworkRules::new(), config(100.0, 5, 12))?;

    sim.step()?;
    sim.step()?;
    assert_eq!(sim.count_domains(), (2, 0, 0));
    sim.check()?;
    Ok(())
}

/// A chain of particles in contact is absorbed into one Multi: the Pair
/// candidate is squeezed by the third particle and the chain is contiguous.
#[test]
fn contact_chain_forms_multi() -> Result<()> {
    let mut world = World::new(100.0)?;
    let a = world.add_species("A", 0.5, 1.0, StructureId::BULK)?;
    for i in 0..3 {
        world.new_particle(a, [50.0 + 1.02 * i as f64, 50.0, 50.0])?;
    }
    let mut sim = Simulator::new(world, NetworkRules::new(), config(100.0, 5, 13))?;

    sim.step()?;
    assert_eq!(sim.count_domains(), (0, 0, 1));
    assert_eq!(sim.num_events(), 1);
    sim.check()?;

    for _ in 0..200 {
        sim.step()?;
        sim.check()?;
    }
    assert_eq!(sim.world().num_particles(), 3);
    Ok(())
}
