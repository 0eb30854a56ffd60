use egfrd::core::{NetworkRules, ReactionRule, Simulator, Structure, StructureId, World};
use egfrd::error::{Error, Result};
use egfrd::SimConfig;

/// Debug-level logs, captured per test by the harness.
fn init_logging() {
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .finish(),
    )
    .ok();
}

fn checked_sim(world_size: f64, matrix_size: usize, seed: u64) -> Result<Simulator> {
    let mut config = SimConfig::default();
    config.world.world_size = world_size;
    config.world.matrix_size = matrix_size;
    config.seed = Some(seed);
    config.check_consistency = true;
    Simulator::new(World::new(world_size)?, NetworkRules::new(), config)
}

/// A dense bulk mixture passes the full consistency check after every step.
#[test]
fn dense_bulk_run_stays_consistent() -> Result<()> {
    init_logging();
    let mut sim = checked_sim(10.0, 3, 31)?;
    let a = sim.add_species("A", 0.3, 1.0, StructureId::BULK)?;
    let b = sim.add_species("B", 0.4, 0.2, StructureId::BULK)?;
    sim.throw_in_particles(a, 30)?;
    sim.throw_in_particles(b, 10)?;

    for _ in 0..500 {
        sim.step()?;
        sim.check()?;
        assert!(sim.dt() >= 0.0);
    }
    assert_eq!(sim.world().num_particles(), 40);
    let (singles, pairs, multis) = sim.count_domains();
    assert!(singles + pairs + multis > 0);
    Ok(())
}

/// Surface-bound particles and bulk particles share the box without
/// breaking shell bookkeeping.
#[test]
fn planar_surface_run_stays_consistent() -> Result<()> {
    let mut sim = checked_sim(20.0, 4, 32)?;
    let membrane = sim.add_structure(Structure::plane([0.0, 0.0, 10.0], [0.0, 0.0, 1.0])?);
    let m = sim.add_species("M", 0.3, 1.0, membrane)?;
    let c = sim.add_species("C", 0.3, 1.0, StructureId::BULK)?;
    sim.add_reaction_rule(ReactionRule::unimolecular(m, vec![m, m], 0.05)?)?;
    sim.throw_in_particles(m, 15)?;
    sim.throw_in_particles(c, 10)?;

    for _ in 0..300 {
        sim.step()?;
        sim.check()?;
    }
    for p in sim.world().particles().filter(|p| p.species == m) {
        assert!((p.position[2] - 10.0).abs() < 1e-9, "{:?} left the plane", p.position);
    }
    Ok(())
}

/// Stopping synchronises every domain and is a no-op at the current time.
#[test]
fn stop_synchronises_and_is_idempotent() -> Result<()> {
    let mut sim = checked_sim(20.0, 4, 33)?;
    let a = sim.add_species("A", 0.3, 1.0, StructureId::BULK)?;
    sim.throw_in_particles(a, 20)?;

    sim.run_until(0.5)?;
    assert_eq!(sim.time(), 0.5);
    assert!(sim.next_time() > 0.5);
    sim.check()?;

    let before = sim.positions();
    let events = sim.num_events();
    sim.stop(0.5)?;
    assert_eq!(sim.positions(), before);
    assert_eq!(sim.num_events(), events);

    assert!(matches!(sim.stop(0.25), Err(Error::Consistency(_))));
    assert!(matches!(sim.run_until(0.25), Err(Error::InvalidParam(_))));

    sim.run_until(1.0)?;
    assert_eq!(sim.time(), 1.0);
    sim.check()?;
    Ok(())
}

/// An immobile particle without reactions never moves, and stepping past
/// the last finite event reports a settled system rather than a stall.
#[test]
fn inert_immobile_particle_settles() -> Result<()> {
    let mut sim = checked_sim(20.0, 4, 34)?;
    let a = sim.add_species("A", 0.5, 0.0, StructureId::BULK)?;
    sim.add_particle(a, [3.0, 4.0, 5.0])?;
    let start = sim.positions();

    sim.run_until(5.0)?;
    assert_eq!(sim.time(), 5.0);
    assert_eq!(sim.positions(), start);
    assert_eq!(sim.counters().steps, 0);
    let err = sim.step();
    assert!(matches!(err, Err(Error::Settled { t }) if t == 5.0), "{err:?}");
    Ok(())
}

/// Resetting rewinds the clock and the domains are rebuilt on the next step.
#[test]
fn reset_rebuilds_domains() -> Result<()> {
    let mut sim = checked_sim(20.0, 4, 35)?;
    let a = sim.add_species("A", 0.3, 1.0, StructureId::BULK)?;
    sim.throw_in_particles(a, 10)?;
    for _ in 0..50 {
        sim.step()?;
    }
    assert!(sim.time() > 0.0);

    sim.reset();
    assert_eq!(sim.time(), 0.0);
    assert_eq!(sim.counters().steps, 0);
    sim.step()?;
    assert_eq!(sim.counters().steps, 1);
    sim.check()?;
    Ok(())
}

/// The simulator refuses a world that disagrees with its configuration.
#[test]
fn mismatched_world_is_rejected() -> Result<()> {
    let mut config = SimConfig::default();
    config.world.world_size = 10.0;
    let err = Simulator::new(World::new(20.0)?, NetworkRules::new(), config);
    assert!(matches!(err, Err(Error::InvalidParam(_))));
    Ok(())
}
