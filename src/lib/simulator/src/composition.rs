//! Fixed-width multi-component hydrocarbon composition types.
//!
//! Component ids mirror the original core's `ComponentId` enumeration
//! (asphaltenes, resins, two aromatic/saturate C-fraction pairs, then the
//! light-end ladder C5..C1, plus the inert gases). The count is a
//! compile-time constant so `PVTComponents`/`PVTPhaseComponents` can live on
//! the stack instead of behind a heap allocation per element.

use serde::{Deserialize, Serialize};

/// Number of tracked PVT components (`NumberOfPVTComponents` in spec.md §3).
pub const NUM_COMPONENTS: usize = 12;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(usize)]
pub enum ComponentId {
    Asphaltenes = 0,
    Resins = 1,
    C15PlusAro = 2,
    C15PlusSat = 3,
    C6To14Aro = 4,
    C6To14Sat = 5,
    C5 = 6,
    C4 = 7,
    C3 = 8,
    C2 = 9,
    C1 = 10,
    COxN2H2S = 11,
}

impl ComponentId {
    pub const ALL: [ComponentId; NUM_COMPONENTS] = [
        ComponentId::Asphaltenes,
        ComponentId::Resins,
        ComponentId::C15PlusAro,
        ComponentId::C15PlusSat,
        ComponentId::C6To14Aro,
        ComponentId::C6To14Sat,
        ComponentId::C5,
        ComponentId::C4,
        ComponentId::C3,
        ComponentId::C2,
        ComponentId::C1,
        ComponentId::COxN2H2S,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Per-component molar mass table, `kg/mol`. Built once at solver
/// construction (mirrors `m_defaultMolarMasses` in the original, which is
/// loaded from the PVT calculator and rescaled from g/mol to kg/mol).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct MolarMasses(pub [f64; NUM_COMPONENTS]);

impl Default for MolarMasses {
    fn default() -> Self {
        // kg/mol, representative values for each pseudo-component.
        MolarMasses([
            0.750, // asphaltenes
            0.550, // resins
            0.380, // C15+ aromatics
            0.380, // C15+ saturates
            0.150, // C6-14 aromatics
            0.150, // C6-14 saturates
            0.072, // C5
            0.058, // C4
            0.044, // C3
            0.030, // C2
            0.016, // C1
            0.030, // COx/N2/H2S lump
        ])
    }
}

impl MolarMasses {
    #[inline]
    pub fn get(&self, c: ComponentId) -> f64 {
        self.0[c.index()]
    }
}

/// Fixed-width vector over component ids. Units: mol/m³ when stored
/// per element (spec.md §3, `PVTComponents`).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PVTComponents(pub [f64; NUM_COMPONENTS]);

impl Default for PVTComponents {
    fn default() -> Self {
        Self::zero()
    }
}

impl PVTComponents {
    pub const fn zero() -> Self {
        PVTComponents([0.0; NUM_COMPONENTS])
    }

    pub fn fill(value: f64) -> Self {
        PVTComponents([value; NUM_COMPONENTS])
    }

    #[inline]
    pub fn get(&self, c: ComponentId) -> f64 {
        self.0[c.index()]
    }

    #[inline]
    pub fn set(&mut self, c: ComponentId, value: f64) {
        self.0[c.index()] = value;
    }

    /// Sum of all component concentrations, mol/m³.
    pub fn sum(&self) -> f64 {
        self.0.iter().sum()
    }

    /// Mass, kg/m³, given the component molar-mass table.
    pub fn mass(&self, molar_masses: &MolarMasses) -> f64 {
        self.0
            .iter()
            .zip(molar_masses.0.iter())
            .map(|(c, m)| c * m)
            .sum()
    }

    /// True when every component is finite and non-negative
    /// (invariant 1 in spec.md §3).
    pub fn is_physical(&self) -> bool {
        self.0.iter().all(|c| c.is_finite() && *c >= 0.0)
    }

    pub fn add_scaled(&mut self, other: &PVTComponents, scale: f64) {
        for (a, b) in self.0.iter_mut().zip(other.0.iter()) {
            *a += b * scale;
        }
    }
}

impl std::ops::AddAssign<&PVTComponents> for PVTComponents {
    fn add_assign(&mut self, rhs: &PVTComponents) {
        for (a, b) in self.0.iter_mut().zip(rhs.0.iter()) {
            *a += b;
        }
    }
}

impl std::ops::Index<ComponentId> for PVTComponents {
    type Output = f64;
    fn index(&self, c: ComponentId) -> &f64 {
        &self.0[c.index()]
    }
}

impl std::ops::IndexMut<ComponentId> for PVTComponents {
    fn index_mut(&mut self, c: ComponentId) -> &mut f64 {
        &mut self.0[c.index()]
    }
}

/// PVT phase identifiers, convertible to/from `Saturation::Phase`
/// (spec.md §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PVTPhase {
    Liquid,
    Vapour,
}

pub const NUM_PHASES: usize = 2;

/// A (2 × NumberOfPVTComponents) matrix: LIQUID/VAPOUR × component,
/// storing per-phase molar concentration (spec.md §3, `PVTPhaseComponents`).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PVTPhaseComponents {
    pub liquid: PVTComponents,
    pub vapour: PVTComponents,
}

impl Default for PVTPhaseComponents {
    fn default() -> Self {
        Self::zero()
    }
}

impl PVTPhaseComponents {
    pub const fn zero() -> Self {
        PVTPhaseComponents {
            liquid: PVTComponents::zero(),
            vapour: PVTComponents::zero(),
        }
    }

    #[inline]
    pub fn phase(&self, phase: PVTPhase) -> &PVTComponents {
        match phase {
            PVTPhase::Liquid => &self.liquid,
            PVTPhase::Vapour => &self.vapour,
        }
    }

    #[inline]
    pub fn phase_mut(&mut self, phase: PVTPhase) -> &mut PVTComponents {
        match phase {
            PVTPhase::Liquid => &mut self.liquid,
            PVTPhase::Vapour => &mut self.vapour,
        }
    }

    pub fn zero_phases(&mut self) {
        self.liquid = PVTComponents::zero();
        self.vapour = PVTComponents::zero();
    }
}

/// Per-phase scalar values (density, viscosity, pressure, ...).
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct PhaseValues {
    pub liquid: f64,
    pub vapour: f64,
}

impl PhaseValues {
    pub fn get(&self, phase: PVTPhase) -> f64 {
        match phase {
            PVTPhase::Liquid => self.liquid,
            PVTPhase::Vapour => self.vapour,
        }
    }

    pub fn set(&mut self, phase: PVTPhase, value: f64) {
        match phase {
            PVTPhase::Liquid => self.liquid = value,
            PVTPhase::Vapour => self.vapour = value,
        }
    }
}

/// Saturation 3-tuple (LIQUID, VAPOUR, WATER) with invariant `∑ = 1`
/// (water is residual) — spec.md §3.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct Saturation {
    pub liquid: f64,
    pub vapour: f64,
    pub water: f64,
}

impl Saturation {
    pub fn new(liquid: f64, vapour: f64) -> Self {
        Saturation {
            liquid,
            vapour,
            water: 1.0 - liquid - vapour,
        }
    }

    /// True when all three fractions lie in `[0, 1 + eps]` and sum to
    /// `1 ± eps` (testable property 1 in spec.md §8, error condition in
    /// §4.2).
    pub fn is_physical(&self, eps: f64) -> bool {
        let in_range = |s: f64| s.is_finite() && s >= -eps && s <= 1.0 + eps;
        in_range(self.liquid)
            && in_range(self.vapour)
            && in_range(self.water)
            && (self.liquid + self.vapour + self.water - 1.0).abs() <= 1e-6_f64.max(eps)
    }

    pub fn of_phase(&self, phase: PVTPhase) -> f64 {
        match phase {
            PVTPhase::Liquid => self.liquid,
            PVTPhase::Vapour => self.vapour,
        }
    }
}

/// Per-element, per-component warm-start state for flash equilibrium
/// (spec.md §3, "K-values"). A value of `-1` on component 0 signals
/// "not initialised — cold start next flash" (ground: the original
/// constructor primes every element's `kValues(...)(ComponentId(0))`
/// to `-1.0` before the first iteration).
pub type KValues = PVTComponents;

pub const COLD_START_SENTINEL: f64 = -1.0;

pub fn cold_start_k_values() -> KValues {
    let mut k = KValues::fill(1.0);
    k.set(ComponentId::Asphaltenes, COLD_START_SENTINEL);
    k
}

pub fn needs_cold_start(k: &KValues) -> bool {
    k.get(ComponentId::Asphaltenes) == COLD_START_SENTINEL
}

/// A 6-tuple of scalars (one per face), with `sumGt0` (sum of positive
/// faces — outflow budget) and `zero()` (spec.md §3, `ElementFaceValues`).
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct ElementFaceValues {
    pub shallow: f64,
    pub deep: f64,
    pub front: f64,
    pub back: f64,
    pub left: f64,
    pub right: f64,
}

pub const NUM_FACES: usize = 6;

impl ElementFaceValues {
    pub const fn zero() -> Self {
        ElementFaceValues {
            shallow: 0.0,
            deep: 0.0,
            front: 0.0,
            back: 0.0,
            left: 0.0,
            right: 0.0,
        }
    }

    pub fn as_array(&self) -> [f64; NUM_FACES] {
        [
            self.shallow,
            self.deep,
            self.front,
            self.back,
            self.left,
            self.right,
        ]
    }

    pub fn from_array(v: [f64; NUM_FACES]) -> Self {
        ElementFaceValues {
            shallow: v[0],
            deep: v[1],
            front: v[2],
            back: v[3],
            left: v[4],
            right: v[5],
        }
    }

    /// Sum of the positive (outflow) faces only.
    pub fn sum_gt0(&self) -> f64 {
        self.as_array().into_iter().filter(|v| *v > 0.0).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_sum_and_mass() {
        let mut c = PVTComponents::zero();
        c.set(ComponentId::C1, 2.0);
        c.set(ComponentId::C2, 1.0);
        assert_eq!(c.sum(), 3.0);
        let masses = MolarMasses::default();
        let expected = 2.0 * masses.get(ComponentId::C1) + 1.0 * masses.get(ComponentId::C2);
        assert!((c.mass(&masses) - expected).abs() < 1e-12);
    }

    #[test]
    fn is_physical_rejects_negative() {
        let mut c = PVTComponents::zero();
        c.set(ComponentId::C1, -1.0);
        assert!(!c.is_physical());
        c.set(ComponentId::C1, 1.0);
        assert!(c.is_physical());
    }

    #[test]
    fn saturation_sums_to_one() {
        let s = Saturation::new(0.3, 0.2);
        assert!((s.liquid + s.vapour + s.water - 1.0).abs() < 1e-12);
        assert!(s.is_physical(1e-9));
    }

    #[test]
    fn saturation_out_of_range_detected() {
        let s = Saturation {
            liquid: 1.2,
            vapour: 0.0,
            water: -0.2,
        };
        assert!(!s.is_physical(1e-9));
    }

    #[test]
    fn face_values_sum_gt0() {
        let f = ElementFaceValues::from_array([1.0, -2.0, 3.0, 0.0, -0.5, 4.0]);
        assert_eq!(f.sum_gt0(), 8.0);
    }

    #[test]
    fn cold_start_sentinel_detected() {
        let k = cold_start_k_values();
        assert!(needs_cold_start(&k));
        let mut k2 = k;
        k2.set(ComponentId::Asphaltenes, 2.5);
        assert!(!needs_cold_start(&k2));
    }
}
