//! Solver configuration knobs (spec.md §6 "Configuration").
//!
//! Ground: the teacher loads its handful of tunables as plain struct
//! fields with a `Default` impl rather than a config-file layer; this
//! crate follows the same convention, scaled up to the larger knob set
//! the original core exposes via its debug/config file.

use serde::{Deserialize, Serialize};

/// All tunables accepted by [`crate::solver::DarcySolver`]. Grouped in
/// declaration order to match spec.md §6's listing.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct DarcySolverConfig {
    /// Enable CFL-governed adaptive time stepping; when false, every step
    /// uses `maximum_time_step_size` directly.
    pub adaptive_time_stepping: bool,
    /// Fraction of the CFL-stable step actually taken, `(0, 1]`.
    pub adaptive_time_step_fraction: f64,
    /// Hard ceiling on any single step, in seconds.
    pub maximum_time_step_size: f64,
    /// Smooth the step size across iterations rather than jumping
    /// straight to the CFL-calculated value.
    pub apply_time_step_smoothing: bool,
    /// `Δt_new = min(smoothing_factor * Δt_prev, Δt_calc)`.
    pub time_step_smoothing_factor: f64,

    /// Include the capillary-pressure term in the per-phase pressure
    /// used for flux computation.
    pub include_capillary_pressure: bool,
    /// Treat saturations below the residual as immobile (zero relative
    /// permeability) rather than letting Corey/Brooks-Corey saturate at
    /// zero naturally.
    pub use_immobile_saturation: bool,
    /// Use the cheaper saturation estimate (`estimateHcTransport`) rather
    /// than a full flash every sub-step.
    pub use_saturation_estimate: bool,
    /// Scaling applied to the residual HC saturation when estimating.
    pub residual_hc_saturation_scaling: f64,

    /// Use the precomputed [`crate::interpolation::PoreVolumeInterpolator`]
    /// instead of recomputing pore volume via quadrature every step.
    pub interpolate_pore_volume: bool,
    /// Use the precomputed [`crate::interpolation::FaceAreaInterpolator`].
    pub interpolate_face_area: bool,
    /// Use the precomputed [`crate::interpolation::FacePermeabilityInterpolator`].
    pub interpolate_permeability: bool,

    /// Clamp the pressure gradient magnitude used in flux computation.
    pub limit_grad_pressure: bool,
    pub grad_pressure_maximum: f64,
    /// Clamp face permeability used in flux computation.
    pub limit_flux_permeability: bool,
    pub flux_permeability_maximum: f64,

    /// Gauss quadrature degree used when a quantity is recomputed rather
    /// than read from an interpolator.
    pub quadrature_degree: usize,

    /// Stop applying the genex/expulsion source term once the formation
    /// is older than this age, Ma (0 disables the cutoff).
    pub remove_source_term: bool,
    pub remove_source_term_age_ma: f64,
    /// Stop transporting HC altogether once the formation is older than
    /// this age, Ma.
    pub remove_hc_transport: bool,
    pub remove_hc_transport_age_ma: f64,

    /// Run the OTGC cracking sub-step after each transport step.
    pub apply_otgc: bool,
}

impl Default for DarcySolverConfig {
    fn default() -> Self {
        DarcySolverConfig {
            adaptive_time_stepping: true,
            // spec.md §6: CFL safety factor, default ~0.5.
            adaptive_time_step_fraction: 0.5,
            // ~1 Ma, in seconds: a generous ceiling since the CFL
            // constraint is normally the binding one long before this is
            // reached (spec.md §6 "maximumTimeStepSize (Ma)").
            maximum_time_step_size: 3.155_76e13,
            apply_time_step_smoothing: true,
            time_step_smoothing_factor: 1.5,

            include_capillary_pressure: true,
            use_immobile_saturation: true,
            use_saturation_estimate: false,
            residual_hc_saturation_scaling: 1.0,

            interpolate_pore_volume: true,
            interpolate_face_area: true,
            interpolate_permeability: true,

            limit_grad_pressure: false,
            grad_pressure_maximum: 1.0e6,
            limit_flux_permeability: false,
            flux_permeability_maximum: 1.0e-9,

            quadrature_degree: 2,

            remove_source_term: false,
            remove_source_term_age_ma: 0.0,
            remove_hc_transport: false,
            remove_hc_transport_age_ma: 0.0,

            apply_otgc: true,
        }
    }
}

impl DarcySolverConfig {
    /// Rejects configurations that would make the solve ill-posed.
    /// Called once at `DarcySolver` construction.
    pub fn validate(&self) -> Result<(), String> {
        if self.maximum_time_step_size <= 0.0 {
            return Err("maximum_time_step_size must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&self.adaptive_time_step_fraction) || self.adaptive_time_step_fraction <= 0.0 {
            return Err("adaptive_time_step_fraction must lie in (0, 1]".to_string());
        }
        if self.time_step_smoothing_factor <= 1.0 {
            return Err("time_step_smoothing_factor must exceed 1.0".to_string());
        }
        if self.quadrature_degree == 0 {
            return Err("quadrature_degree must be at least 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(DarcySolverConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_non_positive_max_step() {
        let mut cfg = DarcySolverConfig::default();
        cfg.maximum_time_step_size = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_smoothing_factor_at_or_below_one() {
        let mut cfg = DarcySolverConfig::default();
        cfg.time_step_smoothing_factor = 1.0;
        assert!(cfg.validate().is_err());
    }
}
