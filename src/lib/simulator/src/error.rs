//! The closed error taxonomy returned by [`crate::solver::DarcySolver::solve`].
//!
//! Ground: `feos-core`'s `EosError` (`errors.rs`) — a flat `thiserror` enum
//! with one variant per failure mode and `#[from]` wraps for collaborator
//! errors, returned as `Result<T, EosError>` from every fallible entry
//! point rather than via an out-parameter or boolean return.

use thiserror::Error;

use crate::fields::GhostExchangeError;

/// Errors that can terminate a Darcy transport solve. Closed taxonomy:
/// no `#[non_exhaustive]`, since every failure mode the solver can hit is
/// enumerated here (saturation out of range, concentration out of range,
/// communication failure, or a caller-supplied configuration problem).
#[derive(Debug, Error)]
pub enum DarcyError {
    /// A computed saturation triple failed `Saturation::is_physical`:
    /// out of `[0, 1]` range or not summing to one within tolerance.
    #[error("saturation out of range in element {element_index}: liquid={liquid}, vapour={vapour}, water={water}")]
    ErrorCalculatingSaturation {
        element_index: usize,
        liquid: f64,
        vapour: f64,
        water: f64,
    },

    /// A transported concentration failed `PVTComponents::is_physical`:
    /// negative or non-finite component concentration after the
    /// explicit transport update.
    #[error("concentration out of range in element {element_index}, component {component_index}: {value}")]
    ErrorCalculatingConcentration {
        element_index: usize,
        component_index: usize,
        value: f64,
    },

    /// Ghost exchange between workers failed (single-process builds
    /// never hit this; kept for forward compatibility with a real
    /// multi-worker `GhostExchange` implementation).
    #[error(transparent)]
    GhostExchange(#[from] GhostExchangeError),

    /// A configuration value makes the solve ill-posed (e.g. a negative
    /// maximum time step, or a quadrature degree of zero).
    #[error("invalid solver configuration: {0}")]
    InvalidConfiguration(String),
}

pub type DarcyResult<T> = Result<T, DarcyError>;
