//! OTGC (oil-to-gas cracking) kinetics sub-step (spec.md §4.8).
//!
//! Ground: the original core delegates cracking to an external
//! `OTGC_kernel6` library not present in the retrieval pack (spec.md §4.8
//! "[SUPPLEMENT]"); this module implements a first-order Arrhenius
//! irreversible cracking cascade instead — each pseudo-component decays
//! into the next-lighter one at a temperature-dependent rate, integrated
//! analytically (exact exponential decay per reaction, rather than a
//! finite-difference sub-stepping loop) so one call per transport step is
//! enough regardless of step size. The disabled sub-sampling branch in
//! the original (`#if 0`) has no analogue here; see SPEC_FULL.md §4.8.

use crate::composition::{ComponentId, MolarMasses, PVTComponents};

/// Gas constant, J/(mol·K).
const GAS_CONSTANT: f64 = 8.314;

/// One irreversible first-order cracking reaction `from -> to`.
#[derive(Clone, Copy, Debug)]
pub struct CrackingReaction {
    pub from: ComponentId,
    pub to: ComponentId,
    pub pre_exponential_s: f64,
    pub activation_energy_j_mol: f64,
}

impl CrackingReaction {
    pub fn rate_constant(&self, temperature_k: f64) -> f64 {
        self.pre_exponential_s * (-self.activation_energy_j_mol / (GAS_CONSTANT * temperature_k.max(1.0))).exp()
    }
}

/// The cracking cascade in heavy-to-light order. Every tracked
/// hydrocarbon component feeds the next except `C1`, which is the
/// terminal product; `COxN2H2S` is inert and never appears.
pub fn default_cascade() -> Vec<CrackingReaction> {
    let links = [
        (ComponentId::Asphaltenes, ComponentId::Resins, 1.2e13, 2.10e5),
        (ComponentId::Resins, ComponentId::C15PlusAro, 1.0e13, 2.05e5),
        (ComponentId::C15PlusAro, ComponentId::C15PlusSat, 8.0e12, 2.00e5),
        (ComponentId::C15PlusSat, ComponentId::C6To14Aro, 6.0e12, 1.95e5),
        (ComponentId::C6To14Aro, ComponentId::C6To14Sat, 5.0e12, 1.90e5),
        (ComponentId::C6To14Sat, ComponentId::C5, 4.0e12, 1.85e5),
        (ComponentId::C5, ComponentId::C4, 3.0e12, 1.80e5),
        (ComponentId::C4, ComponentId::C3, 2.0e12, 1.75e5),
        (ComponentId::C3, ComponentId::C2, 1.0e12, 1.70e5),
        (ComponentId::C2, ComponentId::C1, 5.0e11, 1.65e5),
    ];
    links
        .into_iter()
        .map(|(from, to, a, ea)| CrackingReaction {
            from,
            to,
            pre_exponential_s: a,
            activation_energy_j_mol: ea,
        })
        .collect()
}

/// Advances `total` through one OTGC sub-step: each reaction in the
/// cascade is integrated exactly (`n(t+dt) = n(t) * exp(-k*dt)`) and the
/// decayed mass is converted to moles of the product component, feeding
/// forward into reactions processed later in the same call (spec.md
/// §4.8). Total mass is conserved; total moles are not, since cracking a
/// heavy component into a lighter one increases the mole count.
pub fn step_otgc(total: &mut PVTComponents, molar_masses: &MolarMasses, cascade: &[CrackingReaction], temperature_k: f64, dt_s: f64) {
    for reaction in cascade {
        let k = reaction.rate_constant(temperature_k);
        if k <= 0.0 || dt_s <= 0.0 {
            continue;
        }
        let n0 = total.get(reaction.from);
        if n0 <= 0.0 {
            continue;
        }
        let n1 = n0 * (-k * dt_s).exp();
        let moles_lost = n0 - n1;
        total.set(reaction.from, n1);

        let mass_lost = moles_lost * molar_masses.get(reaction.from);
        let moles_gained = mass_lost / molar_masses.get(reaction.to).max(1e-12);
        total.set(reaction.to, total.get(reaction.to) + moles_gained);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn cracking_conserves_mass() {
        let masses = MolarMasses::default();
        let cascade = default_cascade();
        let mut total = PVTComponents::zero();
        total.set(ComponentId::Asphaltenes, 10.0);
        let mass_before = total.mass(&masses);
        step_otgc(&mut total, &masses, &cascade, 420.0, 1.0e6);
        let mass_after = total.mass(&masses);
        assert_relative_eq!(mass_before, mass_after, max_relative = 1e-6);
    }

    #[test]
    fn heavy_component_depletes_over_long_exposure() {
        let masses = MolarMasses::default();
        let cascade = default_cascade();
        let mut total = PVTComponents::zero();
        total.set(ComponentId::Asphaltenes, 10.0);
        step_otgc(&mut total, &masses, &cascade, 450.0, 3.0e13);
        assert!(total.get(ComponentId::Asphaltenes) < 10.0);
        assert!(total.get(ComponentId::Resins) > 0.0);
    }

    #[test]
    fn higher_temperature_cracks_faster() {
        let masses = MolarMasses::default();
        let cascade = default_cascade();
        let mut cool = PVTComponents::zero();
        cool.set(ComponentId::Asphaltenes, 10.0);
        let mut hot = cool;
        step_otgc(&mut cool, &masses, &cascade, 350.0, 1.0e9);
        step_otgc(&mut hot, &masses, &cascade, 480.0, 1.0e9);
        assert!(hot.get(ComponentId::Asphaltenes) < cool.get(ComponentId::Asphaltenes));
    }

    #[test]
    fn terminal_component_only_accumulates() {
        let masses = MolarMasses::default();
        let cascade = default_cascade();
        let mut total = PVTComponents::zero();
        total.set(ComponentId::C2, 5.0);
        step_otgc(&mut total, &masses, &cascade, 450.0, 1.0e10);
        assert!(total.get(ComponentId::C1) > 0.0);
    }

    #[test]
    fn zero_time_step_is_a_no_op() {
        let masses = MolarMasses::default();
        let cascade = default_cascade();
        let mut total = PVTComponents::zero();
        total.set(ComponentId::Asphaltenes, 10.0);
        step_otgc(&mut total, &masses, &cascade, 450.0, 0.0);
        assert_eq!(total.get(ComponentId::Asphaltenes), 10.0);
    }
}
