//! Lithology and fluid strategy objects: porosity, the normal/plane
//! permeability tensor, relative permeability, and capillary pressure as
//! functions of VES, MaxVES, saturation and temperature (spec.md §4.4,
//! component table §2 "Lithology/Fluid").
//!
//! Ground: the teacher's `RockFluidProps` (Corey relative permeability) and
//! `CapillaryPressure` (Brooks-Corey) are kept verbatim in spirit and
//! extended with an Athy's-law porosity/permeability model, matching
//! spec.md's "polymorphism over lithology/fluid" design note (§9): these
//! are small strategy objects chosen once at setup and held by value.

use serde::{Deserialize, Serialize};

use crate::composition::PVTPhase;

/// Compound porosity + permeability (normal/plane) evaluated together,
/// since both depend on the same effective-stress history.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct CompoundPorosityPermeability {
    pub porosity: f64,
    pub permeability_normal_m2: f64,
    pub permeability_plane_m2: f64,
}

/// Athy's-law exponential compaction lithology (spec.md §2 "Lithology/Fluid").
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Lithology {
    /// Surface (zero-stress) porosity, dimensionless.
    pub surface_porosity: f64,
    /// Athy compaction coefficient, 1/Pa.
    pub compaction_coefficient: f64,
    /// Permeability at surface porosity, m² (isotropic baseline).
    pub surface_permeability_m2: f64,
    /// Anisotropy ratio k_plane / k_normal.
    pub permeability_anisotropy: f64,
    /// Kozeny-Carman-like permeability/porosity sensitivity exponent.
    pub permeability_porosity_exponent: f64,
    pub relative_permeability: RelativePermeability,
    pub capillary_pressure: CapillaryPressure,
}

impl Lithology {
    /// Compound porosity and N/P permeability at the given effective
    /// stress history (spec.md §4.4 step 2). `MaxVES` controls
    /// irreversible compaction: porosity follows the *maximum* stress
    /// ever seen, not just the current one.
    pub fn porosity_permeability(&self, ves_pa: f64, max_ves_pa: f64) -> CompoundPorosityPermeability {
        let governing_ves = ves_pa.max(max_ves_pa).max(0.0);
        let porosity = (self.surface_porosity * (-self.compaction_coefficient * governing_ves).exp())
            .clamp(1e-6, self.surface_porosity);

        let ratio = (porosity / self.surface_porosity).max(1e-9);
        let k_normal = self.surface_permeability_m2 * ratio.powf(self.permeability_porosity_exponent);
        let k_plane = k_normal * self.permeability_anisotropy;

        CompoundPorosityPermeability {
            porosity,
            permeability_normal_m2: k_normal,
            permeability_plane_m2: k_plane,
        }
    }
}

/// Corey relative permeability (ground: teacher `RockFluidProps`),
/// extended to the three-phase liquid/vapour/water system used here.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RelativePermeability {
    /// Residual (connate) water saturation, dimensionless.
    pub s_wc: f64,
    /// Residual oil (liquid HC) saturation — Brooks-Corey `Sor`
    /// (spec.md GLOSSARY "Sor").
    pub s_or: f64,
    pub corey_exponent_liquid: f64,
    pub corey_exponent_vapour: f64,
}

impl Default for RelativePermeability {
    fn default() -> Self {
        RelativePermeability {
            s_wc: 0.2,
            s_or: 0.15,
            corey_exponent_liquid: 2.0,
            corey_exponent_vapour: 2.0,
        }
    }
}

impl RelativePermeability {
    fn mobile_range(&self) -> f64 {
        (1.0 - self.s_wc - self.s_or).max(1e-9)
    }

    pub fn liquid(&self, s_liquid: f64) -> f64 {
        let s_eff = ((s_liquid - self.s_or) / self.mobile_range()).clamp(0.0, 1.0);
        s_eff.powf(self.corey_exponent_liquid)
    }

    pub fn vapour(&self, s_vapour: f64) -> f64 {
        let s_eff = (s_vapour / self.mobile_range()).clamp(0.0, 1.0);
        s_eff.powf(self.corey_exponent_vapour)
    }

    pub fn of_phase(&self, phase: PVTPhase, saturation: f64) -> f64 {
        match phase {
            PVTPhase::Liquid => self.liquid(saturation),
            PVTPhase::Vapour => self.vapour(saturation),
        }
    }
}

/// Brooks-Corey capillary pressure (ground: teacher `CapillaryPressure`).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CapillaryPressure {
    /// Entry (displacement) pressure, Pa.
    pub entry_pressure_pa: f64,
    /// Brooks-Corey pore-size distribution exponent.
    pub lambda: f64,
}

impl Default for CapillaryPressure {
    fn default() -> Self {
        CapillaryPressure {
            entry_pressure_pa: 5.0e5,
            lambda: 2.0,
        }
    }
}

impl CapillaryPressure {
    /// Capillary pressure, Pa, for the given phase at the given
    /// saturation and normal permeability (spec.md §4.4: `P_c(phase) =
    /// lithology.capillaryPressure(phase, saturation, k_normal)`). Entry
    /// pressure is scaled by `1/sqrt(k_normal)` (Leverett-J-like scaling)
    /// so tighter rock shows a higher capillary entry pressure.
    pub fn capillary_pressure(&self, phase: PVTPhase, saturation: f64, k_normal_m2: f64) -> f64 {
        let wetting_saturation = match phase {
            PVTPhase::Liquid => saturation,
            PVTPhase::Vapour => 1.0 - saturation,
        };
        let s_eff = wetting_saturation.clamp(1e-6, 1.0);
        if s_eff >= 1.0 - 1e-9 {
            return 0.0;
        }
        let k_ref = 1e-15_f64; // 1 mD reference permeability, m²
        let scaling = (k_ref / k_normal_m2.max(1e-21)).sqrt();
        (self.entry_pressure_pa * scaling * s_eff.powf(-1.0 / self.lambda)).clamp(0.0, 5.0e7)
    }
}

/// Fluid density/viscosity as functions of temperature and pressure
/// (spec.md §6 "fluid types"). A compact linearised model: density and
/// viscosity each vary linearly with temperature about a reference point.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Fluid {
    pub reference_temperature_c: f64,
    pub liquid_density_kg_m3: f64,
    pub vapour_density_kg_m3: f64,
    pub water_density_kg_m3: f64,
    pub liquid_density_temperature_gradient: f64,
    pub vapour_density_temperature_gradient: f64,
    pub liquid_viscosity_pa_s: f64,
    pub vapour_viscosity_pa_s: f64,
    pub liquid_viscosity_temperature_gradient: f64,
    pub vapour_viscosity_temperature_gradient: f64,
}

impl Default for Fluid {
    fn default() -> Self {
        Fluid {
            reference_temperature_c: 60.0,
            liquid_density_kg_m3: 800.0,
            vapour_density_kg_m3: 150.0,
            water_density_kg_m3: 1030.0,
            liquid_density_temperature_gradient: -0.6,
            vapour_density_temperature_gradient: -0.3,
            liquid_viscosity_pa_s: 5.0e-4,
            vapour_viscosity_pa_s: 1.5e-5,
            liquid_viscosity_temperature_gradient: -3.0e-6,
            vapour_viscosity_temperature_gradient: -3.0e-8,
        }
    }
}

impl Fluid {
    pub fn density(&self, phase: PVTPhase, temperature_c: f64) -> f64 {
        let dt = temperature_c - self.reference_temperature_c;
        let (rho0, grad) = match phase {
            PVTPhase::Liquid => (self.liquid_density_kg_m3, self.liquid_density_temperature_gradient),
            PVTPhase::Vapour => (self.vapour_density_kg_m3, self.vapour_density_temperature_gradient),
        };
        (rho0 + grad * dt).max(1.0)
    }

    pub fn viscosity(&self, phase: PVTPhase, temperature_c: f64) -> f64 {
        let dt = temperature_c - self.reference_temperature_c;
        let (mu0, grad) = match phase {
            PVTPhase::Liquid => (self.liquid_viscosity_pa_s, self.liquid_viscosity_temperature_gradient),
            PVTPhase::Vapour => (self.vapour_viscosity_pa_s, self.vapour_viscosity_temperature_gradient),
        };
        (mu0 + grad * dt).max(1e-8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_lithology() -> Lithology {
        Lithology {
            surface_porosity: 0.5,
            compaction_coefficient: 1.5e-8,
            surface_permeability_m2: 1e-13,
            permeability_anisotropy: 0.3,
            permeability_porosity_exponent: 3.0,
            relative_permeability: RelativePermeability::default(),
            capillary_pressure: CapillaryPressure::default(),
        }
    }

    #[test]
    fn porosity_decreases_with_stress() {
        let lith = sample_lithology();
        let shallow = lith.porosity_permeability(0.0, 0.0);
        let deep = lith.porosity_permeability(50e6, 50e6);
        assert!(deep.porosity < shallow.porosity);
        assert!(deep.permeability_normal_m2 < shallow.permeability_normal_m2);
    }

    #[test]
    fn max_ves_governs_irreversible_compaction() {
        let lith = sample_lithology();
        // Unloading: current VES is lower than the historical max, porosity
        // should follow the max (irreversible compaction), not rebound.
        let unloaded = lith.porosity_permeability(10e6, 50e6);
        let loaded = lith.porosity_permeability(50e6, 50e6);
        assert!((unloaded.porosity - loaded.porosity).abs() < 1e-12);
    }

    #[test]
    fn relative_permeability_bounds() {
        let rp = RelativePermeability::default();
        assert_eq!(rp.liquid(0.0), 0.0);
        assert!(rp.liquid(1.0) > 0.0);
        assert!(rp.liquid(1.0) <= 1.0);
    }

    #[test]
    fn capillary_pressure_vanishes_at_full_wetting() {
        let pc = CapillaryPressure::default();
        let p = pc.capillary_pressure(PVTPhase::Liquid, 1.0, 1e-13);
        assert_eq!(p, 0.0);
    }

    #[test]
    fn capillary_pressure_increases_in_tighter_rock() {
        let pc = CapillaryPressure::default();
        let loose = pc.capillary_pressure(PVTPhase::Liquid, 0.3, 1e-12);
        let tight = pc.capillary_pressure(PVTPhase::Liquid, 0.3, 1e-15);
        assert!(tight > loose);
    }

    #[test]
    fn fluid_density_decreases_with_temperature() {
        let fluid = Fluid::default();
        let cold = fluid.density(PVTPhase::Liquid, 20.0);
        let hot = fluid.density(PVTPhase::Liquid, 150.0);
        assert!(hot < cold);
    }
}
