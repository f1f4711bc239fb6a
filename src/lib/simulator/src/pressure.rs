//! Per-phase pore pressure (spec.md §4.4 "computePressure").
//!
//! Ground: `ExplicitMultiComponentFlowSolver::computePressure` in
//! `examples/original_source/.../ExplicitMultiComponentFlowSolver.C`
//! computes, for each active element and phase, the pore pressure plus a
//! phase-specific capillary term; unlike the teacher's IMPES solver there
//! is no implicit global pressure matrix here, so this is a direct
//! per-element evaluation, not a linear solve.

use crate::composition::{PVTPhase, Saturation};
use crate::lithology::Lithology;

/// Per-phase pressure at a single active element: pore pressure plus the
/// phase's capillary-pressure contribution when enabled.
#[derive(Clone, Copy, Debug, Default)]
pub struct ElementPressure {
    pub liquid_pa: f64,
    pub vapour_pa: f64,
}

impl ElementPressure {
    pub fn of_phase(&self, phase: PVTPhase) -> f64 {
        match phase {
            PVTPhase::Liquid => self.liquid_pa,
            PVTPhase::Vapour => self.vapour_pa,
        }
    }
}

/// Computes per-phase pressure for one active element (spec.md §4.4).
/// `pore_pressure_pa` is the element's overburden/hydrostatic pore
/// pressure from the background geological state; `k_normal_m2` is the
/// element's (possibly interpolated) normal permeability, used to scale
/// the capillary-entry term.
pub fn compute_pressure(
    pore_pressure_pa: f64,
    saturation: Saturation,
    lithology: &Lithology,
    k_normal_m2: f64,
    include_capillary_pressure: bool,
) -> ElementPressure {
    if !include_capillary_pressure {
        return ElementPressure {
            liquid_pa: pore_pressure_pa,
            vapour_pa: pore_pressure_pa,
        };
    }

    let pc_liquid = lithology
        .capillary_pressure
        .capillary_pressure(PVTPhase::Liquid, saturation.liquid, k_normal_m2);
    let pc_vapour = lithology
        .capillary_pressure
        .capillary_pressure(PVTPhase::Vapour, saturation.vapour, k_normal_m2);

    ElementPressure {
        liquid_pa: pore_pressure_pa + pc_liquid,
        vapour_pa: pore_pressure_pa + pc_vapour,
    }
}
