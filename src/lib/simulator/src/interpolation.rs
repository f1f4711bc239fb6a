//! Temporal interpolation of background geological state between two
//! snapshot ages, and the precomputed per-element polynomials that avoid
//! recomputing expensive derived quantities (pore volume, face area, face
//! permeability) at every iteration within an interval.
//!
//! Ground: none of the example repos carry an exact analogue (the teacher
//! is a single-snapshot reservoir model with no time-dependent geometry),
//! so this module follows the numerical-methods idiom used throughout the
//! pack for piecewise-smooth interpolation: cubic Hermite segments, reduced
//! once to plain polynomial coefficients and evaluated by Horner's method
//! in the hot loop rather than re-evaluating basis functions every call.

use serde::{Deserialize, Serialize};

/// Interpolation progress within a geological-time interval: 0.0 at the
/// older (deeper-buried) snapshot, 1.0 at the younger one.
pub type Lambda = f64;

/// Scalar linear interpolation between two endpoint values. Used for
/// quantities that are cheap enough not to warrant a precomputed
/// polynomial (temperature, pressure boundary conditions).
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct TemporalInterpolator {
    pub start: f64,
    pub end: f64,
}

impl TemporalInterpolator {
    pub fn new(start: f64, end: f64) -> Self {
        TemporalInterpolator { start, end }
    }

    pub fn evaluate(&self, lambda: Lambda) -> f64 {
        self.start + (self.end - self.start) * lambda.clamp(0.0, 1.0)
    }
}

/// Four coefficients `[a0, a1, a2, a3]` of `a0 + a1*t + a2*t^2 + a3*t^3`,
/// evaluated with Horner's method.
pub type CubicCoefficients = [f64; 4];

#[inline]
fn horner(coeffs: &CubicCoefficients, t: f64) -> f64 {
    ((coeffs[3] * t + coeffs[2]) * t + coeffs[1]) * t + coeffs[0]
}

/// Reduces a cubic Hermite segment (value and slope at both ends, with `t`
/// normalised to `[0, 1]`) to plain polynomial coefficients, so the hot
/// loop only ever does a Horner evaluation.
fn hermite_to_polynomial(p0: f64, p1: f64, m0: f64, m1: f64) -> CubicCoefficients {
    let a3 = 2.0 * p0 + m0 - 2.0 * p1 + m1;
    let a2 = -3.0 * p0 - 2.0 * m0 + 3.0 * p1 - m1;
    let a1 = m0;
    let a0 = p0;
    [a0, a1, a2, a3]
}

/// Precomputed per-element degree-3 polynomials for `N` derived scalar
/// quantities, built once per geological-time interval from the endpoint
/// snapshots and evaluated many times as the iteration sweeps `lambda`
/// from 0 to 1.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MultiInterpolator<const N: usize> {
    polynomials: Vec<[CubicCoefficients; N]>,
}

impl<const N: usize> MultiInterpolator<N> {
    /// Builds one polynomial per element per quantity from the value and
    /// slope at each endpoint snapshot. `values0`/`values1` are the
    /// quantity values at lambda=0/1; `slopes0`/`slopes1` are their
    /// derivatives with respect to lambda at those same points (zero
    /// slopes degrade gracefully to a smooth ease between the two values).
    pub fn from_hermite_endpoints(
        values0: &[[f64; N]],
        slopes0: &[[f64; N]],
        values1: &[[f64; N]],
        slopes1: &[[f64; N]],
    ) -> Self {
        assert_eq!(values0.len(), values1.len());
        assert_eq!(values0.len(), slopes0.len());
        assert_eq!(values0.len(), slopes1.len());
        let polynomials = values0
            .iter()
            .zip(slopes0)
            .zip(values1.iter().zip(slopes1))
            .map(|((v0, s0), (v1, s1))| {
                let mut per_element = [[0.0_f64; 4]; N];
                for n in 0..N {
                    per_element[n] = hermite_to_polynomial(v0[n], v1[n], s0[n], s1[n]);
                }
                per_element
            })
            .collect();
        MultiInterpolator { polynomials }
    }

    /// Flat endpoints with zero interior slope (a plain smoothstep
    /// between the two snapshots), for quantities where no slope
    /// information is available.
    pub fn from_flat_endpoints(values0: &[[f64; N]], values1: &[[f64; N]]) -> Self {
        let zero_slopes = vec![[0.0_f64; N]; values0.len()];
        Self::from_hermite_endpoints(values0, &zero_slopes, values1, &zero_slopes)
    }

    pub fn num_elements(&self) -> usize {
        self.polynomials.len()
    }

    /// Evaluates all `N` quantities for the given element at `lambda`.
    pub fn evaluate(&self, element_idx: usize, lambda: Lambda) -> [f64; N] {
        let t = lambda.clamp(0.0, 1.0);
        let polys = &self.polynomials[element_idx];
        let mut out = [0.0_f64; N];
        for n in 0..N {
            out[n] = horner(&polys[n], t);
        }
        out
    }
}

/// Index of the pore-volume quantity within `PoreVolumeInterpolator`.
pub const PORE_VOLUME_INDEX: usize = 0;
/// Index of the rock-compression (porosity time-derivative) term.
pub const ROCK_COMPRESSION_INDEX: usize = 1;

/// Per-element pore volume (`phi * |J|`, integrated by the same Gauss
/// quadrature as the direct recomputation path) and the rock-compression
/// term (the time-derivative of porosity that contributes to the
/// pressure equation's storage term).
pub type PoreVolumeInterpolator = MultiInterpolator<2>;

/// Per-element face areas, one per face (`grid::ALL_FACES` order).
pub type FaceAreaInterpolator = MultiInterpolator<6>;

/// Per-element face permeabilities: for each of the 6 faces, the normal
/// and in-plane components, flattened `[face0_normal, face0_plane,
/// face1_normal, face1_plane, ...]`.
pub type FacePermeabilityInterpolator = MultiInterpolator<12>;

/// Flattened `(normal, plane)` index pair for a given face within the
/// 12-entry `FacePermeabilityInterpolator` layout.
#[inline]
pub fn face_permeability_indices(face_index: usize) -> (usize, usize) {
    (face_index * 2, face_index * 2 + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn temporal_interpolator_bounds() {
        let t = TemporalInterpolator::new(10.0, 20.0);
        assert_eq!(t.evaluate(0.0), 10.0);
        assert_eq!(t.evaluate(1.0), 20.0);
        assert_eq!(t.evaluate(0.5), 15.0);
    }

    #[test]
    fn temporal_interpolator_clamps_out_of_range_lambda() {
        let t = TemporalInterpolator::new(10.0, 20.0);
        assert_eq!(t.evaluate(-1.0), 10.0);
        assert_eq!(t.evaluate(2.0), 20.0);
    }

    #[test]
    fn hermite_matches_endpoints() {
        let coeffs = hermite_to_polynomial(1.0, 4.0, 0.5, -0.5);
        assert_abs_diff_eq!(horner(&coeffs, 0.0), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(horner(&coeffs, 1.0), 4.0, epsilon = 1e-12);
    }

    #[test]
    fn multi_interpolator_reproduces_flat_endpoints() {
        let values0 = vec![[1.0, 2.0]];
        let values1 = vec![[3.0, 4.0]];
        let interp: MultiInterpolator<2> = MultiInterpolator::from_flat_endpoints(&values0, &values1);
        let at_start = interp.evaluate(0, 0.0);
        let at_end = interp.evaluate(0, 1.0);
        assert_abs_diff_eq!(at_start[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(at_start[1], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(at_end[0], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(at_end[1], 4.0, epsilon = 1e-12);
    }

    #[test]
    fn face_permeability_index_layout() {
        assert_eq!(face_permeability_indices(0), (0, 1));
        assert_eq!(face_permeability_indices(5), (10, 11));
    }
}
