use thiserror::Error;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the simulation core.
///
/// `NoSpace` is the only recoverable variant: it is raised while placing
/// reaction products and is always handled inside the firing functions.
/// `Consistency` and `Exhausted` indicate a logic defect and should abort the run.
/// `Settled` is not a defect: nothing in the system can change any more.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid user or API parameter.
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// Reaction products could not be placed without overlapping another particle.
    #[error("no space for reaction products")]
    NoSpace,

    /// An internal invariant or a call precondition was violated.
    #[error("consistency violation: {0}")]
    Consistency(String),

    /// The simulation cannot make progress.
    #[error("simulation exhausted: {0}")]
    Exhausted(String),

    /// Every pending event lies at infinite time, or none is left.
    #[error("system settled at t = {t}: no finite event left")]
    Settled { t: f64 },

    /// Malformed configuration file.
    #[error(transparent)]
    Config(#[from] toml::de::Error),

    /// Propagated I/O errors (configuration loading).
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for building a [`Error::Consistency`] from anything printable.
    pub(crate) fn consistency(msg: impl Into<String>) -> Self {
        Error::Consistency(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_is_informative() {
        let e = Error::InvalidParam("radius must be > 0".to_string());
        let msg = format!("{e}");
        assert!(msg.contains("invalid parameter"));
        assert!(msg.contains("radius"));

        let e = Error::consistency("shell 3 of domain 7 overlaps domain 2 by 0.01");
        let msg = e.to_string();
        assert!(msg.contains("consistency"));
        assert!(msg.contains("domain 7"));
    }

    #[test]
    fn no_space_is_matchable() {
        let r: Result<()> = Err(Error::NoSpace);
        assert!(matches!(r, Err(Error::NoSpace)));
    }
}
