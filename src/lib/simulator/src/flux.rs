//! Face-by-face Darcy flux assembly and the CFL-governed adaptive
//! time-step governor (spec.md §4.5 "DarcySolver" flux hot path, §4.6
//! "adaptive time stepping").
//!
//! Ground: `ExplicitMultiComponentFlowSolver::computeFluxForPhase` /
//! `computeFluxTerms` in `examples/original_source/.../
//! ExplicitMultiComponentFlowSolver.C` compute, per face, a pressure
//! difference (with an optional gravity correction on vertical faces),
//! a face permeability, and a face area, then convert the Darcy velocity
//! to a molar flux per phase; the same routine tracks the worst-case CFL
//! ratio across all faces to drive the next step size.

use crate::composition::PVTPhase;
use crate::config::DarcySolverConfig;
use crate::grid::Face;
use crate::lithology::{Fluid, Lithology};
use crate::pressure::ElementPressure;

/// Gravitational acceleration, m/s².
const GRAVITY_M_S2: f64 = 9.81;

/// Per-face scalar, indexed the same way as `grid::ALL_FACES` and
/// `composition::ElementFaceValues`.
pub type FaceArray = [f64; 6];

/// Darcy volumetric flux (m³/s, positive = flow from `self` toward the
/// neighbour across this face) for one phase.
///
/// `pressure_self`/`pressure_neighbour` are the phase pressures either
/// side of the face; `depth_self`/`depth_neighbour` (m, positive down)
/// only matter for `Face::Shallow`/`Face::Deep`, where the hydrostatic
/// head difference is folded into the driving pressure difference.
#[allow(clippy::too_many_arguments)]
pub fn darcy_face_flux(
    face: Face,
    phase: PVTPhase,
    pressure_self: &ElementPressure,
    pressure_neighbour: &ElementPressure,
    depth_self_m: f64,
    depth_neighbour_m: f64,
    fluid: &Fluid,
    temperature_c: f64,
    k_face_m2: f64,
    face_area_m2: f64,
    distance_m: f64,
    relative_permeability: f64,
    config: &DarcySolverConfig,
) -> f64 {
    let k_face = if config.limit_flux_permeability {
        k_face_m2.min(config.flux_permeability_maximum)
    } else {
        k_face_m2
    };

    let mut dp = pressure_self.of_phase(phase) - pressure_neighbour.of_phase(phase);
    // Ground truth (computeElementFaceFlux): ShallowFace subtracts rho*g
    // from the gradient, DeepFace adds it — a face-fixed sign, not one
    // that depends on which side happens to be numerically deeper, so
    // gravity alone always drives flow toward the Deep face.
    if matches!(face, Face::Shallow | Face::Deep) {
        let rho = fluid.density(phase, temperature_c);
        let gravity_term = rho * GRAVITY_M_S2 * (depth_neighbour_m - depth_self_m).abs();
        dp += match face {
            Face::Shallow => -gravity_term,
            Face::Deep => gravity_term,
            _ => unreachable!(),
        };
    }

    let mut grad_p = dp / distance_m.max(1e-9);
    if config.limit_grad_pressure {
        grad_p = grad_p.clamp(-config.grad_pressure_maximum, config.grad_pressure_maximum);
    }

    let viscosity = fluid.viscosity(phase, temperature_c);
    let mobility = relative_permeability / viscosity.max(1e-12);

    // Darcy's law: q = -(k * krel / mu) * A * dP/dx. The sign convention
    // here keeps q positive when flow leaves `self` (grad_p > 0 drives
    // flow down-gradient, i.e. away from self).
    k_face * mobility * face_area_m2 * grad_p
}

/// Upwind numerical flux at a face (spec.md §4.5): evaluates the
/// transported quantity `f` at the upstream element, determined by the
/// sign of the volumetric flux relative to the face's outward normal.
///
/// `value_self`/`value_neighbour` are the per-unit-volume quantity (e.g.
/// component concentration) on either side; `volumetric_flux_m3_s` is
/// signed positive when flow leaves `self` (matches `darcy_face_flux`).
/// Returns the flux of `value` across the face, in the same sign
/// convention (positive = leaving `self`).
pub fn upwind_numerical_flux(value_self: f64, value_neighbour: f64, volumetric_flux_m3_s: f64) -> f64 {
    if volumetric_flux_m3_s >= 0.0 {
        value_self * volumetric_flux_m3_s
    } else {
        value_neighbour * volumetric_flux_m3_s
    }
}

/// The CFL-stable time step implied by a single element: its pore
/// volume divided by the total positive (outflow) volumetric flux
/// across all its faces. Infinite when there is no outflow.
pub fn cfl_time_step(pore_volume_m3: f64, total_outflow_m3_s: f64) -> f64 {
    if total_outflow_m3_s <= 0.0 {
        f64::INFINITY
    } else {
        pore_volume_m3 / total_outflow_m3_s
    }
}

/// Adapts the next time step from the CFL-stable step computed this
/// iteration, the previous step, and the distance remaining to the end
/// of the current geological-time interval (spec.md §4.6):
///
/// - `Δt_new = min(smoothing_factor * Δt_prev, Δt_calc)` when smoothing
///   is enabled, else `Δt_calc` directly.
/// - Always capped at `maximum_time_step_size`.
/// - Snapped to the interval end when within 5% of it, so the solve
///   lands exactly on the boundary instead of taking one tiny trailing
///   step.
pub fn next_time_step(
    cfl_time_step_s: f64,
    previous_time_step_s: f64,
    remaining_interval_s: f64,
    config: &DarcySolverConfig,
) -> f64 {
    let scaled = cfl_time_step_s * config.adaptive_time_step_fraction;

    let mut dt = if config.adaptive_time_stepping {
        if config.apply_time_step_smoothing && previous_time_step_s > 0.0 {
            (config.time_step_smoothing_factor * previous_time_step_s).min(scaled)
        } else {
            scaled
        }
    } else {
        config.maximum_time_step_size
    };

    dt = dt.min(config.maximum_time_step_size);

    if remaining_interval_s > 0.0 && dt >= remaining_interval_s * 0.95 {
        dt = remaining_interval_s;
    }

    dt.min(remaining_interval_s.max(0.0))
}

/// Mobility-weighted relative permeability lookup, a small convenience
/// wrapper kept here rather than in `lithology.rs` since it is only ever
/// called from the flux hot path (spec.md §4.5).
pub fn relative_permeability(lithology: &Lithology, phase: PVTPhase, saturation: f64, use_immobile: bool) -> f64 {
    let kr = lithology.relative_permeability.of_phase(phase, saturation);
    if use_immobile && saturation <= lithology.relative_permeability.s_or {
        0.0
    } else {
        kr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lithology::{CapillaryPressure, RelativePermeability};

    fn sample_lithology() -> Lithology {
        Lithology {
            surface_porosity: 0.4,
            compaction_coefficient: 1e-8,
            surface_permeability_m2: 1e-13,
            permeability_anisotropy: 0.5,
            permeability_porosity_exponent: 3.0,
            relative_permeability: RelativePermeability::default(),
            capillary_pressure: CapillaryPressure::default(),
        }
    }

    #[test]
    fn flux_flows_down_gradient() {
        let config = DarcySolverConfig::default();
        let fluid = Fluid::default();
        let p_self = ElementPressure { liquid_pa: 2.0e7, vapour_pa: 2.0e7 };
        let p_neighbour = ElementPressure { liquid_pa: 1.0e7, vapour_pa: 1.0e7 };
        let q = darcy_face_flux(
            Face::Right,
            PVTPhase::Liquid,
            &p_self,
            &p_neighbour,
            0.0,
            0.0,
            &fluid,
            60.0,
            1e-13,
            100.0,
            50.0,
            0.5,
            &config,
        );
        assert!(q > 0.0);
    }

    #[test]
    fn no_gravity_term_on_horizontal_faces() {
        let config = DarcySolverConfig::default();
        let fluid = Fluid::default();
        let p_self = ElementPressure { liquid_pa: 1.0e7, vapour_pa: 1.0e7 };
        let p_neighbour = ElementPressure { liquid_pa: 1.0e7, vapour_pa: 1.0e7 };
        let q = darcy_face_flux(
            Face::Right,
            PVTPhase::Liquid,
            &p_self,
            &p_neighbour,
            0.0,
            1000.0,
            &fluid,
            60.0,
            1e-13,
            100.0,
            50.0,
            0.5,
            &config,
        );
        assert_eq!(q, 0.0);
    }

    #[test]
    fn gravity_alone_drives_flow_into_deep_face() {
        let config = DarcySolverConfig::default();
        let fluid = Fluid::default();
        let p_equal = ElementPressure { liquid_pa: 1.0e7, vapour_pa: 1.0e7 };
        let q = darcy_face_flux(
            Face::Deep,
            PVTPhase::Liquid,
            &p_equal,
            &p_equal,
            0.0,
            10.0,
            &fluid,
            60.0,
            1e-13,
            100.0,
            10.0,
            0.5,
            &config,
        );
        assert!(q > 0.0, "gravity should push liquid toward the deeper neighbour");
    }

    #[test]
    fn gravity_alone_holds_flow_back_from_shallow_face() {
        let config = DarcySolverConfig::default();
        let fluid = Fluid::default();
        let p_equal = ElementPressure { liquid_pa: 1.0e7, vapour_pa: 1.0e7 };
        let q = darcy_face_flux(
            Face::Shallow,
            PVTPhase::Liquid,
            &p_equal,
            &p_equal,
            10.0,
            0.0,
            &fluid,
            60.0,
            1e-13,
            100.0,
            10.0,
            0.5,
            &config,
        );
        assert!(q < 0.0, "gravity should not push liquid up toward the shallower neighbour");
    }

    #[test]
    fn upwind_picks_self_on_outflow() {
        let f = upwind_numerical_flux(2.0, 5.0, 1.0);
        assert_eq!(f, 2.0);
        let f = upwind_numerical_flux(2.0, 5.0, -1.0);
        assert_eq!(f, -5.0);
    }

    #[test]
    fn cfl_time_step_is_infinite_with_no_outflow() {
        assert!(cfl_time_step(100.0, 0.0).is_infinite());
        assert!((cfl_time_step(100.0, 10.0) - 10.0).abs() < 1e-12);
    }

    #[test]
    fn next_time_step_snaps_to_interval_end() {
        let config = DarcySolverConfig::default();
        let dt = next_time_step(1.0e5, 1.0e4, 9.8e4, &config);
        assert!((dt - 9.8e4).abs() < 1.0);
    }

    #[test]
    fn next_time_step_never_exceeds_remaining_interval() {
        let config = DarcySolverConfig::default();
        let dt = next_time_step(1.0e9, 1.0e4, 500.0, &config);
        assert!(dt <= 500.0);
    }

    #[test]
    fn immobile_saturation_zeroes_relative_permeability() {
        let lith = sample_lithology();
        let kr = relative_permeability(&lith, PVTPhase::Liquid, 0.05, true);
        assert_eq!(kr, 0.0);
    }
}
