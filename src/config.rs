//! Simulator configuration.
//!
//! Every parameter has a default (see the `Default` impls); a TOML document
//! only needs to name the values it overrides.
//!
//! ```toml
//! seed = 42
//! dissociation_retry_moves = 3
//!
//! [world]
//! world_size = 1e-6
//! matrix_size = 10
//!
//! [shells]
//! single_shell_factor = 1.1
//! multi_shell_factor = 0.05
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Geometry of the periodic simulation box and its shell container grid.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct WorldConfig {
    /// Edge length of the cubic, periodic world.
    pub world_size: f64,
    /// Number of container cells per edge.
    pub matrix_size: usize,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            world_size: 1.0,
            matrix_size: 10,
        }
    }
}

impl WorldConfig {
    /// Edge length of one container cell.
    pub fn cell_size(&self) -> f64 {
        self.world_size / self.matrix_size as f64
    }
}

/// Protective shell sizing parameters.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ShellConfig {
    /// A Single whose shell would be smaller than `radius * single_shell_factor`
    /// tries to form a Pair or a Multi with its neighbours.
    pub single_shell_factor: f64,
    /// Multi shells have radius `radius * (1 + multi_shell_factor)`.
    pub multi_shell_factor: f64,
    /// Upper bound on any shell size, on top of the container limit.
    pub user_max_shell_size: f64,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            single_shell_factor: 1.1,
            multi_shell_factor: 0.05,
            user_max_shell_size: f64::INFINITY,
        }
    }
}

/// Top-level simulator configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SimConfig {
    pub world: WorldConfig,
    pub shells: ShellConfig,
    /// Placement attempts for the two products of a dissociation.
    pub dissociation_retry_moves: usize,
    /// Multi time step as a fraction of the fastest member's `radius^2 / D`.
    pub bd_dt_factor: f64,
    /// Seed for the simulator RNG; `None` draws one from the OS.
    pub seed: Option<u64>,
    /// Run the full consistency checker before every step (debug builds only).
    pub check_consistency: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            world: WorldConfig::default(),
            shells: ShellConfig::default(),
            dissociation_retry_moves: 1,
            bd_dt_factor: 1e-5,
            seed: None,
            check_consistency: false,
        }
    }
}

impl SimConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config = toml::from_str::<Self>(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Checks every parameter for a usable value.
    pub fn validate(&self) -> Result<()> {
        ensure(
            self.world.world_size.is_finite() && self.world.world_size > 0.0,
            "world_size must be finite and > 0",
        )?;
        ensure(self.world.matrix_size >= 3, "matrix_size must be >= 3")?;
        ensure(
            self.shells.single_shell_factor.is_finite() && self.shells.single_shell_factor >= 1.0,
            "single_shell_factor must be finite and >= 1",
        )?;
        ensure(
            self.shells.multi_shell_factor.is_finite() && self.shells.multi_shell_factor > 0.0,
            "multi_shell_factor must be finite and > 0",
        )?;
        ensure(
            self.shells.multi_shell_factor < self.shells.single_shell_factor,
            "multi_shell_factor must be smaller than single_shell_factor",
        )?;
        ensure(
            !self.shells.user_max_shell_size.is_nan() && self.shells.user_max_shell_size > 0.0,
            "user_max_shell_size must be > 0",
        )?;
        ensure(
            self.bd_dt_factor.is_finite() && self.bd_dt_factor > 0.0,
            "bd_dt_factor must be finite and > 0",
        )?;
        Ok(())
    }
}

fn ensure(cond: bool, msg: &str) -> Result<()> {
    if cond {
        Ok(())
    } else {
        Err(Error::InvalidParam(msg.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() -> Result<()> {
        let config = SimConfig::default();
        config.validate()?;
        assert_eq!(config.dissociation_retry_moves, 1);
        assert!(config.shells.user_max_shell_size.is_infinite());
        Ok(())
    }

    #[test]
    fn partial_toml_overrides_defaults() -> Result<()> {
        let config = SimConfig::from_toml_str(
            r#"
            seed = 7
            dissociation_retry_moves = 0

            [world]
            world_size = 50.0
            matrix_size = 5
            "#,
        )?;
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.dissociation_retry_moves, 0);
        assert_eq!(config.world.matrix_size, 5);
        assert!((config.world.cell_size() - 10.0).abs() < 1e-12);
        assert!((config.shells.single_shell_factor - 1.1).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn invalid_values_rejected() {
        let err = SimConfig::from_toml_str("[world]\nmatrix_size = 2\n").unwrap_err();
        assert!(err.to_string().contains("matrix_size"));

        let err = SimConfig::from_toml_str("bd_dt_factor = -1.0\n").unwrap_err();
        assert!(err.to_string().contains("bd_dt_factor"));
    }

    #[test]
    fn malformed_toml_is_config_error() {
        let err = SimConfig::from_toml_str("seed = \"abc\"").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
