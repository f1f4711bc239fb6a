//! Two-phase (liquid/vapour) flash equilibrium, warm-started by K-values,
//! and the cheaper saturation estimator used in place of a full flash when
//! `use_saturation_estimate` is set (spec.md §4.2, §4.3).
//!
//! Ground: `examples/original_source/.../ExplicitMultiComponentFlowSolver.C`
//! calls out to an external PVT calculator for the flash itself and only
//! owns the warm-start/estimate bookkeeping around it; since that
//! calculator isn't part of the retrieval pack, the flash here is a
//! self-contained Rachford-Rice solve (standard two-phase flash: Michelsen
//! & Mollerup, *Thermodynamic Models*), with an invented molar-mass-based
//! K-value correlation standing in for the original's PVT-table lookup on
//! cold start (spec.md §4.2 "[SUPPLEMENT]").

use crate::composition::{
    cold_start_k_values, needs_cold_start, ComponentId, KValues, MolarMasses, PVTComponents, PVTPhase,
    PVTPhaseComponents, Saturation,
};

/// Rachford-Rice bisection tolerance on the vapour mole fraction.
const RACHFORD_RICE_TOLERANCE: f64 = 1e-10;
const RACHFORD_RICE_MAX_ITERATIONS: usize = 100;

/// Invented cold-start K-value correlation: lighter components (lower
/// molar mass) get a higher K (more volatile), anchored so the heaviest
/// tracked component starts at K=1. Replaces a real PVT-table lookup,
/// which is out of scope here (spec.md §4.2).
pub fn initial_k_value_guess(molar_masses: &MolarMasses) -> KValues {
    let heaviest = molar_masses
        .0
        .iter()
        .cloned()
        .fold(f64::MIN_POSITIVE, f64::max);
    let mut k = KValues::zero();
    for c in ComponentId::ALL {
        let mass = molar_masses.get(c);
        k.set(c, (heaviest / mass).powf(1.5));
    }
    k
}

/// `sum_i z_i*(K_i - 1) / (1 + V*(K_i - 1))`, the Rachford-Rice objective
/// whose root in `[0, 1]` is the equilibrium vapour mole fraction.
fn rachford_rice_residual(z: &[f64], k: &KValues, vapour_fraction: f64) -> f64 {
    ComponentId::ALL
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            let km1 = k.get(c) - 1.0;
            z[i] * km1 / (1.0 + vapour_fraction * km1)
        })
        .sum()
}

fn solve_vapour_fraction(z: &[f64], k: &KValues) -> f64 {
    let f_all_liquid = rachford_rice_residual(z, k, 0.0);
    let f_all_vapour = rachford_rice_residual(z, k, 1.0);

    if f_all_liquid <= 0.0 {
        return 0.0;
    }
    if f_all_vapour >= 0.0 {
        return 1.0;
    }

    let mut lo = 0.0_f64;
    let mut hi = 1.0_f64;
    let mut mid = 0.5_f64;
    for _ in 0..RACHFORD_RICE_MAX_ITERATIONS {
        mid = 0.5 * (lo + hi);
        let f_mid = rachford_rice_residual(z, k, mid);
        if f_mid.abs() < RACHFORD_RICE_TOLERANCE {
            break;
        }
        if f_mid > 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    mid
}

/// Result of a flash: the two-phase component split and the K-values to
/// warm-start the next flash at this element.
pub struct FlashResult {
    pub phase_components: PVTPhaseComponents,
    pub k_values: KValues,
}

/// Splits a total per-element composition into liquid and vapour phases
/// via Rachford-Rice, warm-started from `k_values_in` unless it carries
/// the cold-start sentinel (spec.md §4.2).
pub fn flash_components(
    total: &PVTComponents,
    k_values_in: &KValues,
    molar_masses: &MolarMasses,
) -> FlashResult {
    let total_moles = total.sum();
    if total_moles <= 0.0 {
        return FlashResult {
            phase_components: PVTPhaseComponents::zero(),
            k_values: *k_values_in,
        };
    }

    let k_start = if needs_cold_start(k_values_in) {
        initial_k_value_guess(molar_masses)
    } else {
        *k_values_in
    };

    let z: Vec<f64> = ComponentId::ALL.iter().map(|&c| total.get(c) / total_moles).collect();
    let vapour_fraction = solve_vapour_fraction(&z, &k_start);

    let mut phase_components = PVTPhaseComponents::zero();
    let mut k_out = KValues::zero();
    for (i, &c) in ComponentId::ALL.iter().enumerate() {
        let km1 = k_start.get(c) - 1.0;
        let denom = 1.0 + vapour_fraction * km1;
        let x_i = if denom.abs() > 1e-15 { z[i] / denom } else { z[i] };
        let y_i = k_start.get(c) * x_i;

        phase_components.liquid.set(c, (x_i * (1.0 - vapour_fraction) * total_moles).max(0.0));
        phase_components.vapour.set(c, (y_i * vapour_fraction * total_moles).max(0.0));

        k_out.set(c, if x_i > 1e-12 { (y_i / x_i).max(1e-6) } else { k_start.get(c) });
    }

    FlashResult {
        phase_components,
        k_values: k_out,
    }
}

/// Converts a phase split into a physical `Saturation` given each phase's
/// molar volume (density / molar mass), returning `None` when the result
/// would violate `Saturation::is_physical` (caller maps this to
/// `DarcyError::ErrorCalculatingSaturation`, spec.md §4.3).
pub fn set_saturations(
    phase_components: &PVTPhaseComponents,
    molar_masses: &MolarMasses,
    liquid_density_kg_m3: f64,
    vapour_density_kg_m3: f64,
    pore_volume_m3: f64,
    eps: f64,
) -> Option<Saturation> {
    let liquid_volume_m3 = phase_components.liquid.mass(molar_masses) / liquid_density_kg_m3.max(1e-9);
    let vapour_volume_m3 = phase_components.vapour.mass(molar_masses) / vapour_density_kg_m3.max(1e-9);

    let saturation = if pore_volume_m3 <= 0.0 {
        Saturation::new(0.0, 0.0)
    } else {
        Saturation::new(liquid_volume_m3 / pore_volume_m3, vapour_volume_m3 / pore_volume_m3)
    };

    if saturation.is_physical(eps) {
        Some(saturation)
    } else {
        None
    }
}

/// Cheaper stand-in for a full flash: scales the previous saturation by
/// the ratio of current to previous total HC moles, without resolving
/// phase compositions (spec.md §4.3 "estimateHcTransport"). Used when
/// `use_saturation_estimate` is enabled to avoid a flash on every
/// sub-step within a time interval.
pub fn estimate_hc_saturation(
    previous_saturation: Saturation,
    previous_total_moles: f64,
    current_total_moles: f64,
    residual_hc_saturation: f64,
    residual_scaling: f64,
) -> Saturation {
    if previous_total_moles <= 0.0 {
        return previous_saturation;
    }
    let ratio = (current_total_moles / previous_total_moles).max(0.0);
    let residual = residual_hc_saturation * residual_scaling;
    let hc = (1.0 - previous_saturation.water) * ratio;
    let hc = hc.max(0.0);
    let liquid_frac = if previous_saturation.liquid + previous_saturation.vapour > 1e-12 {
        previous_saturation.liquid / (previous_saturation.liquid + previous_saturation.vapour)
    } else {
        0.5
    };
    let hc_clamped = if hc < residual { 0.0 } else { hc.min(1.0 - previous_saturation.water) };
    Saturation::new(liquid_frac * hc_clamped, (1.0 - liquid_frac) * hc_clamped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn zero_composition_flashes_to_zero() {
        let total = PVTComponents::zero();
        let k = cold_start_k_values();
        let masses = MolarMasses::default();
        let result = flash_components(&total, &k, &masses);
        assert_eq!(result.phase_components.liquid.sum(), 0.0);
        assert_eq!(result.phase_components.vapour.sum(), 0.0);
    }

    #[test]
    fn flash_conserves_total_moles() {
        let mut total = PVTComponents::zero();
        total.set(ComponentId::C1, 5.0);
        total.set(ComponentId::C15PlusSat, 3.0);
        let k = cold_start_k_values();
        let masses = MolarMasses::default();
        let result = flash_components(&total, &k, &masses);
        let recovered = result.phase_components.liquid.sum() + result.phase_components.vapour.sum();
        assert_relative_eq!(recovered, total.sum(), max_relative = 1e-6);
    }

    #[test]
    fn light_component_prefers_vapour() {
        let mut total = PVTComponents::zero();
        total.set(ComponentId::C1, 10.0);
        total.set(ComponentId::Asphaltenes, 10.0);
        let k = cold_start_k_values();
        let masses = MolarMasses::default();
        let result = flash_components(&total, &k, &masses);
        assert!(result.phase_components.vapour.get(ComponentId::C1) >= result.phase_components.liquid.get(ComponentId::C1));
        assert!(result.phase_components.liquid.get(ComponentId::Asphaltenes) >= result.phase_components.vapour.get(ComponentId::Asphaltenes));
    }

    #[test]
    fn warm_start_k_values_are_not_sentinel() {
        let mut total = PVTComponents::zero();
        total.set(ComponentId::C3, 4.0);
        let k = cold_start_k_values();
        let masses = MolarMasses::default();
        let result = flash_components(&total, &k, &masses);
        assert!(!needs_cold_start(&result.k_values));
    }

    #[test]
    fn estimate_hc_saturation_scales_with_moles_ratio() {
        let prev = Saturation::new(0.3, 0.2);
        let estimated = estimate_hc_saturation(prev, 10.0, 5.0, 0.02, 1.0);
        assert!(estimated.liquid + estimated.vapour < prev.liquid + prev.vapour);
    }
}
