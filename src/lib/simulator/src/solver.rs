//! Top-level explicit transport solve (spec.md §4.10 "DarcySolver"):
//! drives the Setup/Iteration/Finalise state machine over a geological-age
//! interval, gluing together flash (`pvt.rs`), per-phase pressure
//! (`pressure.rs`), face flux assembly and CFL stepping (`flux.rs`), the
//! explicit mass-matrix update (`transport.rs`), cracking (`otgc.rs`) and
//! nodal saturation projection (`saturation.rs`).
//!
//! Ground: `ExplicitMultiComponentFlowSolver::solve` in
//! `examples/original_source/.../ExplicitMultiComponentFlowSolver.C` is the
//! analogous top-level loop: one pass of flash/pressure/flux/transport/OTGC
//! per sub-step, advancing a normalised interpolation parameter until it
//! reaches the end of the current geological-time interval. Unlike the
//! teacher's `ReservoirSimulator::step`, there is no implicit pressure
//! matrix to assemble or solve here; every quantity is computed directly
//! from the previous sub-step's state.

use crate::composition::{
    cold_start_k_values, needs_cold_start, ComponentId, KValues, MolarMasses, PVTComponents,
    PVTPhase, PVTPhaseComponents, Saturation,
};
use crate::config::DarcySolverConfig;
use crate::error::{DarcyError, DarcyResult};
use crate::fields::{FieldContainer, GhostExchange, Reduction};
use crate::flux;
use crate::grid::{Element, Face, Formation, Subdomain, ALL_FACES};
use crate::interpolation::{
    face_permeability_indices, FaceAreaInterpolator, FacePermeabilityInterpolator,
    PoreVolumeInterpolator, PORE_VOLUME_INDEX, ROCK_COMPRESSION_INDEX,
};
use crate::lithology::{Fluid, Lithology};
use crate::otgc::{self, CrackingReaction};
use crate::pressure::{self, ElementPressure};
use crate::pvt;
use crate::saturation::{self, NodalAccumulator};
use crate::telemetry::{Phase as TelemetryPhase, SolverTelemetry};
use crate::transport;

/// Seconds in one million years, used to convert geological ages (Ma) to
/// the SI time base every other quantity in this crate is expressed in.
pub const SECONDS_PER_MA: f64 = 3.155_76e13;

/// An element is treated as containing transportable hydrocarbon once its
/// total molar concentration exceeds this (spec.md §4.8 "elementContainsHc").
const HC_PRESENCE_THRESHOLD_MOL_M3: f64 = 1.0e-6;
const SATURATION_VALIDATION_EPS: f64 = 1.0e-6;
const RESIDUAL_HC_SATURATION: f64 = 0.05;
/// Pressure offset used to estimate a neighbour across the top/bottom
/// domain boundary, where no real neighbour element exists (spec.md §4.5).
const BOUNDARY_PRESSURE_OFFSET_PA: f64 = 1.0e6;

#[inline]
fn lerp(start: f64, end: f64, lambda: f64) -> f64 {
    start + (end - start) * lambda.clamp(0.0, 1.0)
}

/// The background geological state known at one snapshot age, per element
/// of a formation (spec.md §3 "primary fields").
#[derive(Clone, Debug)]
pub struct FormationSnapshot {
    pub pore_pressure_pa: Vec<f64>,
    pub temperature_c: Vec<f64>,
    pub ves_pa: Vec<f64>,
    pub max_ves_pa: Vec<f64>,
    pub depth_m: Vec<f64>,
}

impl FormationSnapshot {
    pub fn filled(n: usize, pore_pressure_pa: f64, temperature_c: f64, ves_pa: f64, max_ves_pa: f64, depth_m: f64) -> Self {
        FormationSnapshot {
            pore_pressure_pa: vec![pore_pressure_pa; n],
            temperature_c: vec![temperature_c; n],
            ves_pa: vec![ves_pa; n],
            max_ves_pa: vec![max_ves_pa; n],
            depth_m: vec![depth_m; n],
        }
    }
}

/// The two endpoint snapshots bracketing the geological-time interval a
/// `solve` call advances through.
#[derive(Clone, Debug)]
pub struct FormationInterval {
    pub start: FormationSnapshot,
    pub end: FormationSnapshot,
}

/// Per-element state persisted across calls to [`DarcySolver::solve`]
/// (spec.md §3 "previousComponent", "phaseSaturation", "transportedMasses",
/// "timeOfElementInvasion"). K-values are *not* part of this: they are
/// solve()-scoped warm-start scratch, reset to the cold-start sentinel at
/// the start of every call (spec.md §4.10 Setup).
#[derive(Clone, Debug)]
pub struct FormationState {
    pub previous_component: Vec<PVTComponents>,
    pub previous_phase_components: Vec<PVTPhaseComponents>,
    pub previous_total_moles: Vec<f64>,
    pub phase_saturation: Vec<Saturation>,
    pub transported_masses_kg: Vec<f64>,
    /// Geological age (Ma) at which this element first carried transportable
    /// hydrocarbon; `NaN` until that happens.
    pub time_of_invasion_ma: Vec<f64>,
    /// Volume-weighted nodal saturation projection from the most recent
    /// `solve` call's Finalise phase (spec.md §4.9), `None` until a solve
    /// has run at least once.
    pub nodal_saturation: Option<FieldContainer<Saturation>>,
}

impl FormationState {
    pub fn new(n: usize) -> Self {
        FormationState {
            previous_component: vec![PVTComponents::zero(); n],
            previous_phase_components: vec![PVTPhaseComponents::zero(); n],
            previous_total_moles: vec![0.0; n],
            phase_saturation: vec![Saturation::new(0.0, 0.0); n],
            transported_masses_kg: vec![0.0; n],
            time_of_invasion_ma: vec![f64::NAN; n],
            nodal_saturation: None,
        }
    }
}

/// Source-rock hydrocarbon generation, external to this crate's scope
/// (spec.md §9 "genex/expulsion is an external collaborator"). A build
/// wiring in a real genex model implements this; [`NoSourceRock`] is the
/// default for subdomains with no active source rock.
pub trait SourceRockField {
    fn generation_rate_mol_per_s(&self, formation_index: usize, element_index: usize, age_ma: f64) -> PVTComponents;
}

#[derive(Default)]
pub struct NoSourceRock;

impl SourceRockField for NoSourceRock {
    fn generation_rate_mol_per_s(&self, _formation_index: usize, _element_index: usize, _age_ma: f64) -> PVTComponents {
        PVTComponents::zero()
    }
}

/// Pre/post bookkeeping hook around a solve, mirroring the property
/// activation pattern the original core wraps its derived-property managers
/// in (spec.md §9). The default is a no-op; it exists so a caller wiring in
/// a real activation manager has a seam to hook into without this crate
/// depending on it.
pub trait PropertyActivation {
    fn enter(&self) {}
    fn exit(&self) {}
}

#[derive(Default)]
pub struct NoopPropertyActivation;

impl PropertyActivation for NoopPropertyActivation {}

/// Summary of one `solve` call (spec.md §4.10).
#[derive(Clone, Copy, Debug, Default)]
pub struct SolveReport {
    pub steps_taken: usize,
    pub elements_flashed: u64,
    pub transport_events: u64,
    pub total_source_mass_kg: f64,
    pub final_age_ma: f64,
}

/// Per-formation precomputed temporal interpolators, built once at Setup
/// (spec.md §4.1 / §9's "interpolate vs recompute" toggles). When a
/// toggle is off the corresponding field is `None` and the raw endpoint
/// arrays are used to recompute the quantity directly every access.
struct FormationDerived {
    pore_volume: Option<PoreVolumeInterpolator>,
    face_area: Option<FaceAreaInterpolator>,
    face_permeability: Option<FacePermeabilityInterpolator>,
    phi_start: Vec<f64>,
    phi_end: Vec<f64>,
    k_normal_start: Vec<f64>,
    k_normal_end: Vec<f64>,
    k_plane_start: Vec<f64>,
    k_plane_end: Vec<f64>,
}

/// `-(phi_end - phi_start) / (1 - phi_end)`: the constant-over-the-interval
/// rock-compression term that scales the carry-forward pore volume by the
/// fraction of the sub-step elapsed (spec.md §4.7 "rock compression term").
fn rock_compression_term(phi_start: f64, phi_end: f64) -> f64 {
    let denom = (1.0 - phi_end).max(1e-6);
    -(phi_end - phi_start) / denom
}

fn formation_derived(
    formation: &Formation,
    lithologies: &[Lithology],
    start: &FormationSnapshot,
    end: &FormationSnapshot,
    config: &DarcySolverConfig,
) -> FormationDerived {
    let n = formation.num_elements();
    let mut phi_start = vec![0.0; n];
    let mut phi_end = vec![0.0; n];
    let mut k_normal_start = vec![0.0; n];
    let mut k_normal_end = vec![0.0; n];
    let mut k_plane_start = vec![0.0; n];
    let mut k_plane_end = vec![0.0; n];

    for idx in 0..n {
        let element = &formation.elements[idx];
        let Some(lith_id) = element.lithology_id else {
            continue;
        };
        let lith = &lithologies[lith_id];
        let cp_start = lith.porosity_permeability(start.ves_pa[idx], start.max_ves_pa[idx]);
        let cp_end = lith.porosity_permeability(end.ves_pa[idx], end.max_ves_pa[idx]);
        phi_start[idx] = cp_start.porosity;
        phi_end[idx] = cp_end.porosity;
        k_normal_start[idx] = cp_start.permeability_normal_m2;
        k_normal_end[idx] = cp_end.permeability_normal_m2;
        k_plane_start[idx] = cp_start.permeability_plane_m2;
        k_plane_end[idx] = cp_end.permeability_plane_m2;
    }

    let pore_volume = if config.interpolate_pore_volume {
        let values0: Vec<[f64; 2]> = (0..n)
            .map(|idx| {
                let volume = formation.elements[idx].volume_m3;
                [phi_start[idx] * volume, rock_compression_term(phi_start[idx], phi_end[idx]) * volume]
            })
            .collect();
        let values1: Vec<[f64; 2]> = (0..n)
            .map(|idx| {
                let volume = formation.elements[idx].volume_m3;
                [phi_end[idx] * volume, rock_compression_term(phi_start[idx], phi_end[idx]) * volume]
            })
            .collect();
        Some(PoreVolumeInterpolator::from_flat_endpoints(&values0, &values1))
    } else {
        None
    };

    let face_area = if config.interpolate_face_area {
        let areas: Vec<[f64; 6]> = (0..n).map(|idx| recompute_face_areas(formation, &formation.elements[idx])).collect();
        Some(FaceAreaInterpolator::from_flat_endpoints(&areas, &areas))
    } else {
        None
    };

    let face_permeability = if config.interpolate_permeability {
        let values0: Vec<[f64; 12]> = (0..n)
            .map(|idx| flatten_face_permeability(k_normal_start[idx], k_plane_start[idx]))
            .collect();
        let values1: Vec<[f64; 12]> = (0..n)
            .map(|idx| flatten_face_permeability(k_normal_end[idx], k_plane_end[idx]))
            .collect();
        Some(FacePermeabilityInterpolator::from_flat_endpoints(&values0, &values1))
    } else {
        None
    };

    FormationDerived {
        pore_volume,
        face_area,
        face_permeability,
        phi_start,
        phi_end,
        k_normal_start,
        k_normal_end,
        k_plane_start,
        k_plane_end,
    }
}

fn flatten_face_permeability(k_normal: f64, k_plane: f64) -> [f64; 12] {
    let mut out = [0.0; 12];
    for face_index in 0..6 {
        let (n_idx, p_idx) = face_permeability_indices(face_index);
        out[n_idx] = k_normal;
        out[p_idx] = k_plane;
    }
    out
}

/// Face-area geometry is treated as static over a solve() interval (the
/// grid has no start/end geometry pair), so start and end endpoints are
/// identical here; the interpolator machinery still runs so a caller
/// toggling `interpolate_face_area` off sees the same code path recompute
/// the same numbers directly (see DESIGN.md).
fn recompute_face_areas(formation: &Formation, element: &Element) -> [f64; 6] {
    let thickness = element.thickness_m();
    [
        formation.dx * formation.dy, // shallow
        formation.dx * formation.dy, // deep
        formation.dx * thickness,    // front
        formation.dx * thickness,    // back
        formation.dy * thickness,    // left
        formation.dy * thickness,    // right
    ]
}

fn pore_volume_prev_and_current(
    derived: &FormationDerived,
    idx: usize,
    element_volume_m3: f64,
    lambda_start: f64,
    lambda_end: f64,
) -> (f64, f64) {
    if let Some(interp) = &derived.pore_volume {
        let v0 = interp.evaluate(idx, lambda_start);
        let v1 = interp.evaluate(idx, lambda_end);
        let previous = v0[PORE_VOLUME_INDEX] + v0[ROCK_COMPRESSION_INDEX] * (lambda_end - lambda_start);
        (previous.max(0.0), v1[PORE_VOLUME_INDEX].max(0.0))
    } else {
        let phi_s = lerp(derived.phi_start[idx], derived.phi_end[idx], lambda_start);
        let phi_e = lerp(derived.phi_start[idx], derived.phi_end[idx], lambda_end);
        let rc = rock_compression_term(derived.phi_start[idx], derived.phi_end[idx]) * element_volume_m3;
        let previous = phi_s * element_volume_m3 + rc * (lambda_end - lambda_start);
        (previous.max(0.0), (phi_e * element_volume_m3).max(0.0))
    }
}

/// Pore volume (m³) at a single point in the interval, used for the
/// saturation conversion in Phase A (spec.md §4.3).
fn porosity_volume_at(derived: &FormationDerived, idx: usize, element_volume_m3: f64, lambda: f64) -> f64 {
    if let Some(interp) = &derived.pore_volume {
        interp.evaluate(idx, lambda)[PORE_VOLUME_INDEX].max(0.0)
    } else {
        (lerp(derived.phi_start[idx], derived.phi_end[idx], lambda) * element_volume_m3).max(0.0)
    }
}

/// Pure porosity fraction (dimensionless) at a point in the interval —
/// unlike `porosity_volume_at`, divides back out the volume baked into the
/// interpolated quantity so the result is comparable across elements of
/// different sizes.
fn porosity_at(derived: &FormationDerived, idx: usize, element_volume_m3: f64, lambda: f64) -> f64 {
    if let Some(interp) = &derived.pore_volume {
        (interp.evaluate(idx, lambda)[PORE_VOLUME_INDEX] / element_volume_m3.max(1e-12)).max(0.0)
    } else {
        lerp(derived.phi_start[idx], derived.phi_end[idx], lambda).max(0.0)
    }
}

fn face_areas_at(derived: &FormationDerived, idx: usize, formation: &Formation, element: &Element, lambda: f64) -> [f64; 6] {
    if let Some(interp) = &derived.face_area {
        interp.evaluate(idx, lambda)
    } else {
        recompute_face_areas(formation, element)
    }
}

fn face_permeabilities_at(derived: &FormationDerived, idx: usize, lambda: f64) -> [f64; 6] {
    if let Some(interp) = &derived.face_permeability {
        let all = interp.evaluate(idx, lambda);
        let mut out = [0.0; 6];
        for face_index in 0..6 {
            let (n_idx, p_idx) = face_permeability_indices(face_index);
            out[face_index] = if face_index < 2 { all[n_idx] } else { all[p_idx] };
        }
        out
    } else {
        let k_normal = lerp(derived.k_normal_start[idx], derived.k_normal_end[idx], lambda);
        let k_plane = lerp(derived.k_plane_start[idx], derived.k_plane_end[idx], lambda);
        [k_normal, k_normal, k_plane, k_plane, k_plane, k_plane]
    }
}

/// Converts a face-local volumetric phase flux into a component molar
/// flux (spec.md §4.6 "upwind numerical flux"): each component's
/// concentration either side is recovered from its share of the phase,
/// `upwind_numerical_flux` then picks the upstream side per the sign of
/// the volumetric flux, matching the scalar-field convention exactly.
fn phase_component_flux_mol_s(
    volumetric_flux_m3_s: f64,
    self_components: &PVTComponents,
    self_phase_volume_m3: f64,
    neighbour_components: &PVTComponents,
    neighbour_phase_volume_m3: f64,
) -> PVTComponents {
    let mut out = PVTComponents::zero();
    let self_denom = self_phase_volume_m3.max(1e-12);
    let neighbour_denom = neighbour_phase_volume_m3.max(1e-12);
    for c in ComponentId::ALL {
        let v_self = self_components.get(c) / self_denom;
        let v_neighbour = neighbour_components.get(c) / neighbour_denom;
        out.set(c, flux::upwind_numerical_flux(v_self, v_neighbour, volumetric_flux_m3_s));
    }
    out
}

/// Drives the explicit transport solve over a geological-time interval.
pub struct DarcySolver {
    config: DarcySolverConfig,
    molar_masses: MolarMasses,
    cascade: Vec<CrackingReaction>,
    telemetry: SolverTelemetry,
    /// The most recently taken step size, seconds. Carried across `solve`
    /// calls (not reset to zero each time) so smoothing at the start of a
    /// new interval continues from the previous interval's pace rather
    /// than restarting cold — the "calculated time step size" persists at
    /// the solver, while "element time step" below is this iteration's
    /// freshly computed CFL value (spec.md §9, resolved open question).
    calculated_time_step_size: f64,
}

impl DarcySolver {
    pub fn new(config: DarcySolverConfig, molar_masses: MolarMasses) -> DarcyResult<Self> {
        config.validate().map_err(DarcyError::InvalidConfiguration)?;
        Ok(DarcySolver {
            config,
            molar_masses,
            cascade: otgc::default_cascade(),
            telemetry: SolverTelemetry::new(),
            calculated_time_step_size: 0.0,
        })
    }

    pub fn telemetry(&self) -> &SolverTelemetry {
        &self.telemetry
    }

    pub fn config(&self) -> &DarcySolverConfig {
        &self.config
    }

    /// Advances `states` from `t_start_ma` to `t_end_ma` (spec.md §4.10).
    /// `lithology_tables`, `states` and `intervals` are one entry per
    /// formation in `subdomain.formations`, in the same order.
    #[allow(clippy::too_many_arguments)]
    pub fn solve<E, R>(
        &mut self,
        subdomain: &Subdomain,
        lithology_tables: &[Vec<Lithology>],
        fluid: &Fluid,
        states: &mut [FormationState],
        intervals: &[FormationInterval],
        source_rock: &dyn SourceRockField,
        activation: &dyn PropertyActivation,
        t_start_ma: f64,
        t_end_ma: f64,
        exchange: &E,
        reduction: &R,
    ) -> DarcyResult<SolveReport>
    where
        E: GhostExchange<NodalAccumulator>,
        R: Reduction,
    {
        assert_eq!(subdomain.formations.len(), lithology_tables.len());
        assert_eq!(subdomain.formations.len(), states.len());
        assert_eq!(subdomain.formations.len(), intervals.len());

        activation.enter();
        let result = self.solve_inner(subdomain, lithology_tables, fluid, states, intervals, source_rock, t_start_ma, t_end_ma, exchange, reduction);
        activation.exit();
        self.telemetry.report();
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn solve_inner<E, R>(
        &mut self,
        subdomain: &Subdomain,
        lithology_tables: &[Vec<Lithology>],
        fluid: &Fluid,
        states: &mut [FormationState],
        intervals: &[FormationInterval],
        source_rock: &dyn SourceRockField,
        t_start_ma: f64,
        t_end_ma: f64,
        exchange: &E,
        reduction: &R,
    ) -> DarcyResult<SolveReport>
    where
        E: GhostExchange<NodalAccumulator>,
        R: Reduction,
    {
        let mut report = SolveReport {
            final_age_ma: t_start_ma,
            ..Default::default()
        };

        let total_interval_ma = (t_start_ma - t_end_ma).abs();
        if total_interval_ma <= 0.0 {
            return Ok(report);
        }
        let total_interval_s = total_interval_ma * SECONDS_PER_MA;

        // --- Setup ---
        let derived: Vec<FormationDerived> = subdomain
            .formations
            .iter()
            .zip(lithology_tables.iter())
            .zip(intervals.iter())
            .map(|((formation, table), interval)| formation_derived(formation, table, &interval.start, &interval.end, &self.config))
            .collect();

        let mut k_values: Vec<Vec<KValues>> = subdomain
            .formations
            .iter()
            .map(|formation| vec![cold_start_k_values(); formation.num_elements()])
            .collect();

        let mut lambda_start = 0.0_f64;

        // --- Iteration ---
        while lambda_start < 1.0 - 1.0e-9 {
            let remaining_s = (1.0 - lambda_start) * total_interval_s;
            let age_ma_now = lerp(t_start_ma, t_end_ma, lambda_start);

            let mut phase_components: Vec<Vec<PVTPhaseComponents>> = Vec::with_capacity(subdomain.formations.len());
            let mut saturation_now: Vec<Vec<Saturation>> = Vec::with_capacity(subdomain.formations.len());
            let mut pressure_now: Vec<Vec<ElementPressure>> = Vec::with_capacity(subdomain.formations.len());

            // Phase A: flash / saturation estimate.
            for (f_idx, formation) in subdomain.formations.iter().enumerate() {
                let n = formation.num_elements();
                let mut pc = vec![PVTPhaseComponents::zero(); n];
                let mut sat = vec![Saturation::new(0.0, 0.0); n];
                let state = &states[f_idx];
                let lith_table = &lithology_tables[f_idx];

                for idx in 0..n {
                    let element = &formation.elements[idx];
                    if !element.is_active() {
                        continue;
                    }
                    let total = state.previous_component[idx];
                    if !transport::element_contains_hc(&total, HC_PRESENCE_THRESHOLD_MOL_M3) {
                        continue;
                    }
                    let temperature_c = lerp(
                        intervals[f_idx].start.temperature_c[idx],
                        intervals[f_idx].end.temperature_c[idx],
                        lambda_start,
                    );

                    if self.config.use_saturation_estimate && !needs_cold_start(&k_values[f_idx][idx]) {
                        let previous_total = state.previous_total_moles[idx];
                        let ratio = if previous_total > 0.0 { (total.sum() / previous_total).max(0.0) } else { 1.0 };
                        let mut liquid = PVTComponents::zero();
                        liquid.add_scaled(&state.previous_phase_components[idx].liquid, ratio);
                        let mut vapour = PVTComponents::zero();
                        vapour.add_scaled(&state.previous_phase_components[idx].vapour, ratio);
                        pc[idx] = PVTPhaseComponents { liquid, vapour };
                        sat[idx] = pvt::estimate_hc_saturation(
                            state.phase_saturation[idx],
                            previous_total,
                            total.sum(),
                            RESIDUAL_HC_SATURATION,
                            self.config.residual_hc_saturation_scaling,
                        );
                    } else {
                        let flash = self.telemetry.time(TelemetryPhase::Flash, || pvt::flash_components(&total, &k_values[f_idx][idx], &self.molar_masses));
                        self.telemetry.record_flash();
                        k_values[f_idx][idx] = flash.k_values;

                        let liquid_density = fluid.density(PVTPhase::Liquid, temperature_c);
                        let vapour_density = fluid.density(PVTPhase::Vapour, temperature_c);
                        let pore_volume_now = porosity_volume_at(&derived[f_idx], idx, element.volume_m3, lambda_start);
                        let computed = pvt::set_saturations(&flash.phase_components, &self.molar_masses, liquid_density, vapour_density, pore_volume_now, SATURATION_VALIDATION_EPS);
                        pc[idx] = flash.phase_components;
                        match computed {
                            Some(s) => sat[idx] = s,
                            None => {
                                let liquid_volume = flash.phase_components.liquid.mass(&self.molar_masses) / liquid_density.max(1e-9);
                                let vapour_volume = flash.phase_components.vapour.mass(&self.molar_masses) / vapour_density.max(1e-9);
                                let (l, v) = if pore_volume_now > 0.0 {
                                    (liquid_volume / pore_volume_now, vapour_volume / pore_volume_now)
                                } else {
                                    (0.0, 0.0)
                                };
                                return Err(DarcyError::ErrorCalculatingSaturation {
                                    element_index: idx,
                                    liquid: l,
                                    vapour: v,
                                    water: 1.0 - l - v,
                                });
                            }
                        }
                    }

                    if !sat[idx].is_physical(SATURATION_VALIDATION_EPS) {
                        return Err(DarcyError::ErrorCalculatingSaturation {
                            element_index: idx,
                            liquid: sat[idx].liquid,
                            vapour: sat[idx].vapour,
                            water: sat[idx].water,
                        });
                    }
                }
                phase_components.push(pc);
                saturation_now.push(sat);
            }

            // Phase B: per-phase pressure.
            for (f_idx, formation) in subdomain.formations.iter().enumerate() {
                let n = formation.num_elements();
                let mut pressures = vec![ElementPressure::default(); n];
                let lith_table = &lithology_tables[f_idx];
                for idx in 0..n {
                    let element = &formation.elements[idx];
                    if !element.is_active() {
                        continue;
                    }
                    let lith = &lith_table[element.lithology_id.unwrap()];
                    let pore_pressure_now = lerp(intervals[f_idx].start.pore_pressure_pa[idx], intervals[f_idx].end.pore_pressure_pa[idx], lambda_start);
                    let k_normal_now = face_permeabilities_at(&derived[f_idx], idx, lambda_start)[0];
                    pressures[idx] = pressure::compute_pressure(pore_pressure_now, saturation_now[f_idx][idx], lith, k_normal_now, self.config.include_capillary_pressure);
                }
                pressure_now.push(pressures);
            }

            // Phase C: face flux assembly plus CFL-governed step size.
            let mut net_face_flux_mol: Vec<Vec<PVTComponents>> = Vec::with_capacity(subdomain.formations.len());
            let mut outflow_mol_s: Vec<Vec<PVTComponents>> = Vec::with_capacity(subdomain.formations.len());
            let mut inflow_mol_s: Vec<Vec<PVTComponents>> = Vec::with_capacity(subdomain.formations.len());
            let mut element_time_step = f64::INFINITY;

            for (f_idx, formation) in subdomain.formations.iter().enumerate() {
                let n = formation.num_elements();
                let mut net = vec![PVTComponents::zero(); n];
                let mut outflow = vec![PVTComponents::zero(); n];
                let mut inflow = vec![PVTComponents::zero(); n];
                let lith_table = &lithology_tables[f_idx];
                let transport_active = !(self.config.remove_hc_transport && age_ma_now >= self.config.remove_hc_transport_age_ma);

                if transport_active {
                    self.telemetry.time(TelemetryPhase::Flux, || {
                        for idx in 0..n {
                            let element = &formation.elements[idx];
                            if !element.is_active() {
                                continue;
                            }
                            let lith = &lith_table[element.lithology_id.unwrap()];
                            let temperature_c = lerp(intervals[f_idx].start.temperature_c[idx], intervals[f_idx].end.temperature_c[idx], lambda_start);
                            let depth_self = lerp(intervals[f_idx].start.depth_m[idx], intervals[f_idx].end.depth_m[idx], lambda_start);
                            let areas = face_areas_at(&derived[f_idx], idx, formation, element, lambda_start);
                            let permeabilities = face_permeabilities_at(&derived[f_idx], idx, lambda_start);
                            let neighbours = formation.neighbours(element.local.i, element.local.j, element.local.k);
                            let self_porosity = porosity_at(&derived[f_idx], idx, element.volume_m3, lambda_start);

                            for (face_pos, face) in ALL_FACES.into_iter().enumerate() {
                                let is_vertical = matches!(face, Face::Shallow | Face::Deep);
                                // True domain edge: no cell at all beyond this face (not just
                                // an inactive one) — only here is a boundary pressure estimated.
                                let is_domain_edge = match face {
                                    Face::Shallow => element.local.k == 0,
                                    Face::Deep => element.local.k + 1 == formation.nz,
                                    _ => false,
                                };
                                if neighbours[face_pos].is_none() && !(is_vertical && is_domain_edge) {
                                    continue; // inactive neighbour or lateral boundary: zero flux.
                                }

                                let (neighbour_pressure, depth_neighbour, distance, neighbour_idx) = match neighbours[face_pos] {
                                    Some(nbr) => {
                                        let n_idx = formation.index(nbr.i, nbr.j, nbr.k);
                                        let depth_nb = lerp(intervals[f_idx].start.depth_m[n_idx], intervals[f_idx].end.depth_m[n_idx], lambda_start);
                                        let distance = if is_vertical {
                                            (depth_nb - depth_self).abs().max(1.0)
                                        } else if matches!(face, Face::Front | Face::Back) {
                                            formation.dy
                                        } else {
                                            formation.dx
                                        };
                                        (pressure_now[f_idx][n_idx], depth_nb, distance, Some(n_idx))
                                    }
                                    None => {
                                        let sign = if face == Face::Shallow { -1.0 } else { 1.0 };
                                        let pore_pressure_now = lerp(intervals[f_idx].start.pore_pressure_pa[idx], intervals[f_idx].end.pore_pressure_pa[idx], lambda_start);
                                        let boundary = ElementPressure {
                                            liquid_pa: pore_pressure_now + sign * BOUNDARY_PRESSURE_OFFSET_PA,
                                            vapour_pa: pore_pressure_now + sign * BOUNDARY_PRESSURE_OFFSET_PA,
                                        };
                                        (boundary, depth_self + sign * element.thickness_m(), element.thickness_m().max(1.0), None)
                                    }
                                };

                                for phase in [PVTPhase::Liquid, PVTPhase::Vapour] {
                                    let probe = flux::darcy_face_flux(
                                        face,
                                        phase,
                                        &pressure_now[f_idx][idx],
                                        &neighbour_pressure,
                                        depth_self,
                                        depth_neighbour,
                                        fluid,
                                        temperature_c,
                                        permeabilities[face_pos],
                                        areas[face_pos],
                                        distance,
                                        1.0,
                                        &self.config,
                                    );
                                    let upstream_saturation = if probe >= 0.0 {
                                        saturation_now[f_idx][idx].of_phase(phase)
                                    } else {
                                        neighbour_idx.map(|n| saturation_now[f_idx][n].of_phase(phase)).unwrap_or_else(|| saturation_now[f_idx][idx].of_phase(phase))
                                    };
                                    let relperm = flux::relative_permeability(lith, phase, upstream_saturation, self.config.use_immobile_saturation);
                                    let volumetric_flux = flux::darcy_face_flux(
                                        face,
                                        phase,
                                        &pressure_now[f_idx][idx],
                                        &neighbour_pressure,
                                        depth_self,
                                        depth_neighbour,
                                        fluid,
                                        temperature_c,
                                        permeabilities[face_pos],
                                        areas[face_pos],
                                        distance,
                                        relperm,
                                        &self.config,
                                    );

                                    let self_phase_volume = self_porosity * element.volume_m3 * saturation_now[f_idx][idx].of_phase(phase);
                                    let (neighbour_components, neighbour_phase_volume) = match neighbour_idx {
                                        Some(n) => {
                                            let nb_element = &formation.elements[n];
                                            let nb_porosity = porosity_at(&derived[f_idx], n, nb_element.volume_m3, lambda_start);
                                            (
                                                *phase_components[f_idx][n].phase(phase),
                                                nb_porosity * nb_element.volume_m3 * saturation_now[f_idx][n].of_phase(phase),
                                            )
                                        }
                                        None => (PVTComponents::zero(), self_phase_volume),
                                    };

                                    let contribution = phase_component_flux_mol_s(volumetric_flux, phase_components[f_idx][idx].phase(phase), self_phase_volume, &neighbour_components, neighbour_phase_volume);

                                    if volumetric_flux >= 0.0 {
                                        outflow[idx].add_scaled(&contribution, 1.0);
                                    } else {
                                        inflow[idx].add_scaled(&contribution, -1.0);
                                    }
                                    net[idx].add_scaled(&contribution, 1.0);
                                }
                            }
                        }
                    });
                }

                for idx in 0..n {
                    let element = &formation.elements[idx];
                    if !element.is_active() {
                        continue;
                    }
                    let total = states[f_idx].previous_component[idx];
                    let dt = transport::component_cfl_time_step(element.volume_m3, &total, &outflow[idx]);
                    if dt.is_finite() {
                        element_time_step = element_time_step.min(self.config.adaptive_time_step_fraction * dt);
                    }
                }

                net_face_flux_mol.push(net);
                outflow_mol_s.push(outflow);
                inflow_mol_s.push(inflow);
            }

            let reduced_step = reduction.min_f64(element_time_step);
            let dt_s = flux::next_time_step(reduced_step, self.calculated_time_step_size, remaining_s, &self.config).max(0.0);
            if dt_s <= 0.0 {
                break;
            }
            self.calculated_time_step_size = dt_s;

            let lambda_end = (lambda_start + dt_s / total_interval_s).min(1.0);
            let age_ma_end = lerp(t_start_ma, t_end_ma, lambda_end);

            // Phase D: source term plus mass-matrix update, computed into
            // scratch so a concentration failure leaves `states` entirely
            // untouched, per spec.md §4.2's error contract.
            let mut new_conc: Vec<Vec<PVTComponents>> = Vec::with_capacity(subdomain.formations.len());
            let mut source_mol: Vec<Vec<PVTComponents>> = Vec::with_capacity(subdomain.formations.len());

            for (f_idx, formation) in subdomain.formations.iter().enumerate() {
                let n = formation.num_elements();
                let mut conc = vec![PVTComponents::zero(); n];
                let mut source = vec![PVTComponents::zero(); n];
                let source_gated = self.config.remove_source_term && age_ma_end >= self.config.remove_source_term_age_ma;

                for idx in 0..n {
                    let element = &formation.elements[idx];
                    if !element.is_active() {
                        conc[idx] = states[f_idx].previous_component[idx];
                        continue;
                    }

                    if !source_gated {
                        let rate = source_rock.generation_rate_mol_per_s(f_idx, idx, age_ma_now);
                        source[idx].add_scaled(&rate, dt_s);
                    }

                    let (previous_pore_volume, current_pore_volume) = pore_volume_prev_and_current(&derived[f_idx], idx, element.volume_m3, lambda_start, lambda_end);

                    let mut net_moles = PVTComponents::zero();
                    net_moles.add_scaled(&net_face_flux_mol[f_idx][idx], dt_s);

                    let updated = transport::transport_components(&states[f_idx].previous_component[idx], previous_pore_volume, current_pore_volume, &net_moles, &source[idx]);

                    if !updated.is_physical() {
                        let bad = ComponentId::ALL
                            .iter()
                            .find(|&&c| !(updated.get(c).is_finite() && updated.get(c) >= 0.0))
                            .copied()
                            .unwrap_or(ComponentId::C1);
                        return Err(DarcyError::ErrorCalculatingConcentration {
                            element_index: idx,
                            component_index: bad.index(),
                            value: updated.get(bad),
                        });
                    }
                    conc[idx] = updated;
                }
                new_conc.push(conc);
                source_mol.push(source);
            }

            // --- Commit: OTGC, then write every persisted field for this
            // iteration at once. ---
            for (f_idx, formation) in subdomain.formations.iter().enumerate() {
                let n = formation.num_elements();
                for idx in 0..n {
                    let element = &formation.elements[idx];
                    if !element.is_active() {
                        continue;
                    }

                    if self.config.apply_otgc {
                        let temperature_end_c = lerp(intervals[f_idx].start.temperature_c[idx], intervals[f_idx].end.temperature_c[idx], lambda_end);
                        self.telemetry.time(TelemetryPhase::Otgc, || {
                            otgc::step_otgc(&mut new_conc[f_idx][idx], &self.molar_masses, &self.cascade, temperature_end_c + 273.15, dt_s);
                        });
                    }

                    let mass_out = outflow_mol_s[f_idx][idx].mass(&self.molar_masses) * dt_s;
                    let mass_in = inflow_mol_s[f_idx][idx].mass(&self.molar_masses) * dt_s;
                    states[f_idx].transported_masses_kg[idx] += mass_out + mass_in;
                    self.telemetry.record_transport(mass_in >= mass_out);

                    states[f_idx].previous_total_moles[idx] = states[f_idx].previous_component[idx].sum();
                    states[f_idx].previous_phase_components[idx] = phase_components[f_idx][idx];
                    states[f_idx].phase_saturation[idx] = saturation_now[f_idx][idx];
                    states[f_idx].previous_component[idx] = new_conc[f_idx][idx];

                    if transport::element_contains_hc(&new_conc[f_idx][idx], HC_PRESENCE_THRESHOLD_MOL_M3) && states[f_idx].time_of_invasion_ma[idx].is_nan() {
                        states[f_idx].time_of_invasion_ma[idx] = age_ma_end;
                    }

                    report.total_source_mass_kg += source_mol[f_idx][idx].mass(&self.molar_masses);
                }
            }

            lambda_start = lambda_end;
            report.steps_taken += 1;
            report.final_age_ma = age_ma_end;
            report.elements_flashed = self.telemetry.flash_count();
            report.transport_events = self.telemetry.transport_total_count();
        }

        // --- Finalise ---
        let element_saturations: Vec<Vec<Saturation>> = states.iter().map(|s| s.phase_saturation.clone()).collect();
        let nodal_saturation = self
            .telemetry
            .time(TelemetryPhase::Saturation, || saturation::average_global_saturation(subdomain, &element_saturations, exchange))?;
        for (state, projected) in states.iter_mut().zip(nodal_saturation.into_iter()) {
            state.nodal_saturation = Some(projected);
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crate::fields::{SingleProcessExchange, SingleProcessReduction};
    use crate::grid::ElementIndex;
    use crate::lithology::{CapillaryPressure, RelativePermeability};

    fn sample_lithology() -> Lithology {
        Lithology {
            surface_porosity: 0.4,
            compaction_coefficient: 1.0e-8,
            surface_permeability_m2: 1.0e-13,
            permeability_anisotropy: 0.5,
            permeability_porosity_exponent: 3.0,
            relative_permeability: RelativePermeability::default(),
            capillary_pressure: CapillaryPressure::default(),
        }
    }

    fn uniform_formation(nx: usize, ny: usize, nz: usize, top_depth_m: f64) -> Formation {
        let mut f = Formation::new("f", nx, ny, nz, 100.0, 100.0);
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let e = f.element_mut(i, j, k);
                    e.local = ElementIndex::new(i, j, k);
                    e.lithology_id = Some(0);
                    e.volume_m3 = 100.0 * 100.0 * 10.0;
                    e.z_top = top_depth_m + k as f64 * 10.0;
                    e.z_bottom = top_depth_m + (k as f64 + 1.0) * 10.0;
                }
            }
        }
        f
    }

    fn flat_interval(n: usize, pore_pressure_pa: f64, temperature_c: f64, ves_pa: f64, depth_m: f64) -> FormationInterval {
        let snapshot = FormationSnapshot::filled(n, pore_pressure_pa, temperature_c, ves_pa, ves_pa, depth_m);
        FormationInterval {
            start: snapshot.clone(),
            end: snapshot,
        }
    }

    fn with_uniform_hc(total: &mut PVTComponents) {
        total.set(ComponentId::C1, 200.0);
        total.set(ComponentId::C3, 50.0);
    }

    #[test]
    fn zero_composition_is_idempotent() {
        let formation = uniform_formation(2, 2, 2, 2000.0);
        let n = formation.num_elements();
        let subdomain = Subdomain::new(vec![formation]);
        let mut solver = DarcySolver::new(DarcySolverConfig::default(), MolarMasses::default()).unwrap();
        let mut states = vec![FormationState::new(n)];
        let intervals = vec![flat_interval(n, 2.0e7, 80.0, 3.0e7, 2000.0)];

        let report = solver
            .solve(
                &subdomain,
                &[vec![sample_lithology()]],
                &Fluid::default(),
                &mut states,
                &intervals,
                &NoSourceRock,
                &NoopPropertyActivation,
                10.0,
                9.0,
                &SingleProcessExchange,
                &SingleProcessReduction,
            )
            .unwrap();

        assert!(report.steps_taken > 0);
        for c in states[0].previous_component.iter() {
            assert_eq!(c.sum(), 0.0);
        }
    }

    #[test]
    fn uniform_column_has_no_lateral_imbalance() {
        let formation = uniform_formation(2, 2, 1, 2000.0);
        let n = formation.num_elements();
        let subdomain = Subdomain::new(vec![formation]);
        let mut solver = DarcySolver::new(DarcySolverConfig::default(), MolarMasses::default()).unwrap();
        let mut states = vec![FormationState::new(n)];
        for c in states[0].previous_component.iter_mut() {
            with_uniform_hc(c);
        }
        let intervals = vec![flat_interval(n, 2.0e7, 80.0, 3.0e7, 2000.0)];

        solver
            .solve(
                &subdomain,
                &[vec![sample_lithology()]],
                &Fluid::default(),
                &mut states,
                &intervals,
                &NoSourceRock,
                &NoopPropertyActivation,
                1.0,
                0.9,
                &SingleProcessExchange,
                &SingleProcessReduction,
            )
            .unwrap();

        let first = states[0].previous_component[0].sum();
        for c in states[0].previous_component.iter() {
            assert_relative_eq!(c.sum(), first, max_relative = 1.0e-6);
        }
    }

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let mut config = DarcySolverConfig::default();
        config.maximum_time_step_size = -1.0;
        assert!(DarcySolver::new(config, MolarMasses::default()).is_err());
    }

    #[test]
    fn hydrostatic_column_with_gravity_drains_downward() {
        let formation = uniform_formation(1, 1, 3, 2000.0);
        let n = formation.num_elements();
        let subdomain = Subdomain::new(vec![formation]);
        let mut solver = DarcySolver::new(DarcySolverConfig::default(), MolarMasses::default()).unwrap();
        let mut states = vec![FormationState::new(n)];
        with_uniform_hc(&mut states[0].previous_component[0]);
        let snapshot_start = FormationSnapshot::filled(n, 2.0e7, 80.0, 3.0e7, 2000.0);
        let snapshot_end = snapshot_start.clone();
        let intervals = vec![FormationInterval { start: snapshot_start, end: snapshot_end }];

        solver
            .solve(
                &subdomain,
                &[vec![sample_lithology()]],
                &Fluid::default(),
                &mut states,
                &intervals,
                &NoSourceRock,
                &NoopPropertyActivation,
                1.0,
                0.9,
                &SingleProcessExchange,
                &SingleProcessReduction,
            )
            .unwrap();

        // Gravity drives the top element's hydrocarbon downward into its
        // (initially empty) deeper neighbours.
        assert!(states[0].previous_component[1].sum() > 0.0 || states[0].previous_component[2].sum() > 0.0);
    }
}
