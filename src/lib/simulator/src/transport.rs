//! Explicit per-element mass-matrix bookkeeping: carrying the previous
//! step's concentration forward, adding face flux and source-term
//! contributions, and dividing by the current pore volume to recover a
//! concentration (spec.md §4.7 "transportComponents").
//!
//! Ground: `ExplicitMultiComponentFlowSolver::transportComponents` /
//! `divideByMassMatrix` / `updateTransportedMasses` in
//! `examples/original_source/.../ExplicitMultiComponentFlowSolver.C`
//! separate exactly these three pieces — carry-forward term, net flux
//! plus source, then a division by the (possibly time-varying) pore
//! volume — rather than computing a single update formula inline.

use crate::composition::{ComponentId, PVTComponents};

/// Moles present at the start of the step, computed by scaling the
/// previous concentration by the previous pore volume (spec.md §4.7
/// "previous term").
pub fn previous_term(previous_concentration: &PVTComponents, previous_pore_volume_m3: f64) -> PVTComponents {
    let mut moles = PVTComponents::zero();
    moles.add_scaled(previous_concentration, previous_pore_volume_m3);
    moles
}

/// Converts accumulated moles back to a concentration by dividing by
/// the current pore volume (spec.md §4.7 "mass matrix division"). A
/// degenerate (non-positive) pore volume leaves the element's moles as
/// zero concentration rather than dividing by zero.
pub fn divide_by_mass_matrix(accumulated_moles: &PVTComponents, current_pore_volume_m3: f64) -> PVTComponents {
    if current_pore_volume_m3 <= 0.0 {
        return PVTComponents::zero();
    }
    let mut result = PVTComponents::zero();
    result.add_scaled(accumulated_moles, 1.0 / current_pore_volume_m3);
    result
}

/// One explicit transport step for a single element (spec.md §4.7):
/// carries the previous concentration forward, adds the net face flux
/// (signed positive when leaving the element, so it is subtracted) and
/// the source term (signed positive when entering), then divides by the
/// current pore volume.
pub fn transport_components(
    previous_concentration: &PVTComponents,
    previous_pore_volume_m3: f64,
    current_pore_volume_m3: f64,
    net_face_flux_mol: &PVTComponents,
    source_term_mol: &PVTComponents,
) -> PVTComponents {
    let mut moles = previous_term(previous_concentration, previous_pore_volume_m3);
    moles.add_scaled(source_term_mol, 1.0);
    moles.add_scaled(net_face_flux_mol, -1.0);
    divide_by_mass_matrix(&moles, current_pore_volume_m3)
}

/// An element is considered to contain transportable hydrocarbon once
/// its total molar concentration exceeds a small threshold (spec.md §4.8
/// "elementContainsHc"), gating whether OTGC cracking runs there at all.
pub fn element_contains_hc(total: &PVTComponents, threshold_mol_m3: f64) -> bool {
    total.sum() > threshold_mol_m3
}

/// Per-component CFL time-step bound for one element: how long its
/// slowest-draining component can sustain its current outflow rate before
/// running out, `min_i(volume * concentration_i / outflow_rate_i)` over
/// components that are actually present and actually draining (spec.md
/// §4.6 "per-component CFL constraint") — a tighter bound than the
/// phase-level `flux::cfl_time_step`, since different components can clear
/// an element at different rates even when the bulk phase flux is modest.
/// Returns `f64::INFINITY` when nothing is draining.
pub fn component_cfl_time_step(volume_m3: f64, concentration: &PVTComponents, outflow_rate_mol_s: &PVTComponents) -> f64 {
    let mut min_dt = f64::INFINITY;
    for c in ComponentId::ALL {
        let rate = outflow_rate_mol_s.get(c);
        let amount = concentration.get(c);
        if rate > 0.0 && amount > 0.0 {
            min_dt = min_dt.min(volume_m3 * amount / rate);
        }
    }
    min_dt
}

/// Running in/out/total mass counters for one sub-step, used by
/// `telemetry.rs` (spec.md §4.10 "updateTransportedMasses").
#[derive(Clone, Copy, Debug, Default)]
pub struct TransportedMassCounters {
    pub inflow_mol: f64,
    pub outflow_mol: f64,
}

impl TransportedMassCounters {
    pub fn accumulate(&mut self, net_face_flux_mol: &PVTComponents) {
        let net = net_face_flux_mol.sum();
        if net >= 0.0 {
            self.outflow_mol += net;
        } else {
            self.inflow_mol += -net;
        }
    }

    pub fn total_mol(&self) -> f64 {
        self.inflow_mol + self.outflow_mol
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composition::ComponentId;

    #[test]
    fn previous_term_scales_by_pore_volume() {
        let mut conc = PVTComponents::zero();
        conc.set(ComponentId::C1, 2.0);
        let moles = previous_term(&conc, 10.0);
        assert_eq!(moles.get(ComponentId::C1), 20.0);
    }

    #[test]
    fn divide_by_mass_matrix_recovers_concentration() {
        let mut moles = PVTComponents::zero();
        moles.set(ComponentId::C1, 20.0);
        let conc = divide_by_mass_matrix(&moles, 10.0);
        assert_eq!(conc.get(ComponentId::C1), 2.0);
    }

    #[test]
    fn divide_by_mass_matrix_handles_degenerate_volume() {
        let mut moles = PVTComponents::zero();
        moles.set(ComponentId::C1, 20.0);
        let conc = divide_by_mass_matrix(&moles, 0.0);
        assert_eq!(conc.get(ComponentId::C1), 0.0);
    }

    #[test]
    fn transport_step_with_zero_flux_holds_concentration_steady() {
        let mut conc = PVTComponents::zero();
        conc.set(ComponentId::C1, 3.0);
        let zero = PVTComponents::zero();
        let updated = transport_components(&conc, 10.0, 10.0, &zero, &zero);
        assert!((updated.get(ComponentId::C1) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn transport_step_outflow_reduces_concentration() {
        let mut conc = PVTComponents::zero();
        conc.set(ComponentId::C1, 3.0);
        let mut outflow = PVTComponents::zero();
        outflow.set(ComponentId::C1, 5.0);
        let zero = PVTComponents::zero();
        let updated = transport_components(&conc, 10.0, 10.0, &outflow, &zero);
        assert!(updated.get(ComponentId::C1) < 3.0);
    }

    #[test]
    fn hc_presence_threshold() {
        let mut total = PVTComponents::zero();
        total.set(ComponentId::C1, 1e-9);
        assert!(!element_contains_hc(&total, 1e-6));
        total.set(ComponentId::C1, 1.0);
        assert!(element_contains_hc(&total, 1e-6));
    }

    #[test]
    fn component_cfl_time_step_uses_slowest_component() {
        let mut conc = PVTComponents::zero();
        conc.set(ComponentId::C1, 10.0);
        conc.set(ComponentId::C3, 2.0);
        let mut outflow = PVTComponents::zero();
        outflow.set(ComponentId::C1, 1.0);
        outflow.set(ComponentId::C3, 4.0);
        let dt = component_cfl_time_step(100.0, &conc, &outflow);
        assert!((dt - 50.0).abs() < 1e-9);
    }

    #[test]
    fn component_cfl_time_step_is_infinite_without_outflow() {
        let mut conc = PVTComponents::zero();
        conc.set(ComponentId::C1, 10.0);
        let outflow = PVTComponents::zero();
        assert!(component_cfl_time_step(100.0, &conc, &outflow).is_infinite());
    }

    #[test]
    fn mass_counters_split_inflow_outflow() {
        let mut counters = TransportedMassCounters::default();
        let mut flux = PVTComponents::zero();
        flux.set(ComponentId::C1, -2.0);
        counters.accumulate(&flux);
        assert_eq!(counters.inflow_mol, 2.0);
        assert_eq!(counters.outflow_mol, 0.0);
    }
}
