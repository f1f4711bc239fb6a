//! Explicit, finite-element, multi-component hydrocarbon Darcy transport
//! over a 3D subdomain of geological formations, coupled to two-phase PVT
//! flash, OTGC cracking kinetics, and linear/cubic-Hermite interpolation of
//! background geological state between two age snapshots.
//!
//! UNIT SYSTEM: SI THROUGHOUT
//! ==========================
//! Pressure: pascal (Pa)
//! Distance: metre (m)
//! Time: second (s) internally; geological ages are given in millions of
//!       years (Ma) at the `DarcySolver::solve` boundary and converted via
//!       `solver::SECONDS_PER_MA`
//! Volume: cubic metre (m³)
//! Permeability: square metre (m²)
//! Viscosity: pascal-second (Pa·s)
//! Temperature: degrees Celsius (°C) at module boundaries, kelvin (K)
//!   internally to Arrhenius kinetics
//! Saturation, porosity: dimensionless [0, 1]
//!
//! Module map (spec.md §[MODULE] numbering in parentheses):
//! - [`composition`] (§2) — fixed-width per-component and per-phase value
//!   types shared by every other module.
//! - [`config`] (§9) — solver-wide tunables and their validation.
//! - [`grid`] (§3) — subdomain/formation/element topology and face
//!   adjacency.
//! - [`lithology`] (§4.4) — Athy's-law compaction, Corey relative
//!   permeability, Brooks-Corey capillary pressure, fluid PVT correlations.
//! - [`interpolation`] (§4.1) — linear and cubic-Hermite temporal
//!   interpolation of background geological state.
//! - [`pvt`] (§4.2, §4.3) — Rachford-Rice flash and the cheaper saturation
//!   estimator.
//! - [`pressure`] (§4.5) — per-phase pore + capillary pressure.
//! - [`flux`] (§4.6) — Darcy face flux, upwind numerical flux, CFL stepping.
//! - [`transport`] (§4.7, §4.8) — explicit mass-matrix update and the
//!   per-component CFL constraint.
//! - [`otgc`] (§4.8) — oil-to-gas cracking kinetics.
//! - [`saturation`] (§4.9) — volume-weighted nodal saturation projection.
//! - [`solver`] (§4.10) — the top-level `DarcySolver` orchestration.
//! - [`fields`] (§9) — ghost-exchange and cross-worker reduction seams.
//! - [`error`] (§9) — the closed `DarcyError` taxonomy.
//! - [`telemetry`] (§9) — per-phase timing and operation counters.

pub mod composition;
pub mod config;
pub mod error;
pub mod fields;
pub mod flux;
pub mod grid;
pub mod interpolation;
pub mod lithology;
pub mod otgc;
pub mod pressure;
pub mod pvt;
pub mod saturation;
pub mod solver;
pub mod telemetry;
pub mod transport;

pub use composition::{ComponentId, MolarMasses, PVTComponents, PVTPhase, Saturation};
pub use config::DarcySolverConfig;
pub use error::{DarcyError, DarcyResult};
pub use solver::{DarcySolver, FormationInterval, FormationSnapshot, FormationState, SolveReport};
