//! Volume-weighted nodal projection of element saturation, used for
//! reporting and for the smoothed visualisation grid (spec.md §4.9
//! "averageGlobalSaturation").
//!
//! Ground: `ExplicitMultiComponentFlowSolver::collectGlobalSaturation` /
//! `averageGlobalSaturation` / `assignGlobalSaturation` in
//! `examples/original_source/.../ExplicitMultiComponentFlowSolver.C`
//! accumulate each element's saturation onto its 8 incident nodes
//! weighted by element volume, exchange the accumulators across worker
//! boundaries, then divide — with nodes that received no contribution
//! (inactive on every incident element) falling back to a default value
//! rather than dividing by zero.

use crate::composition::Saturation;
use crate::fields::{FieldContainer, GhostExchange, GhostExchangeError, UpdateMode};
use crate::grid::{Formation, Subdomain};

/// Volume-weighted accumulator at one node: running sums of
/// `weight * saturation` per phase plus the total weight, so dividing
/// at the end recovers the weighted average.
#[derive(Clone, Copy, Debug, Default)]
pub struct NodalAccumulator {
    pub weight: f64,
    pub liquid: f64,
    pub vapour: f64,
    pub water: f64,
}

impl NodalAccumulator {
    fn accumulate(&mut self, saturation: Saturation, weight: f64) {
        self.weight += weight;
        self.liquid += saturation.liquid * weight;
        self.vapour += saturation.vapour * weight;
        self.water += saturation.water * weight;
    }

    fn merge(&mut self, other: &NodalAccumulator) {
        self.weight += other.weight;
        self.liquid += other.liquid;
        self.vapour += other.vapour;
        self.water += other.water;
    }
}

#[inline]
fn node_index(nx: usize, ny: usize, ni: usize, nj: usize, nk: usize) -> usize {
    (nk * (ny + 1) + nj) * (nx + 1) + ni
}

/// Saturation assumed at a node with zero accumulated weight: fully
/// water, since there is no evidence of hydrocarbon there at all
/// (spec.md §4.9, the divisor==0 fallback).
pub fn default_node_saturation() -> Saturation {
    Saturation::new(0.0, 0.0)
}

/// Scatters one formation's element saturations onto its `(nx+1) *
/// (ny+1) * (nz+1)` node grid, weighted by element volume.
pub fn accumulate_formation(formation: &Formation, element_saturations: &[Saturation]) -> FieldContainer<NodalAccumulator> {
    assert_eq!(element_saturations.len(), formation.num_elements());
    let num_nodes = (formation.nx + 1) * (formation.ny + 1) * (formation.nz + 1);
    let mut nodes = FieldContainer::filled(num_nodes, NodalAccumulator::default());

    for k in 0..formation.nz {
        for j in 0..formation.ny {
            for i in 0..formation.nx {
                let element = formation.element(i, j, k);
                if !element.is_active() {
                    continue;
                }
                let saturation = element_saturations[formation.index(i, j, k)];
                for &nk in &[k, k + 1] {
                    for &nj in &[j, j + 1] {
                        for &ni in &[i, i + 1] {
                            let idx = node_index(formation.nx, formation.ny, ni, nj, nk);
                            nodes.get_mut(idx).accumulate(saturation, element.volume_m3);
                        }
                    }
                }
            }
        }
    }
    nodes
}

/// Merges the shared horizon between two vertically adjacent formations
/// with matching `(nx, ny)`: the bottom node layer of `upper` and the
/// top node layer of `lower` represent the same physical surface and
/// must see each other's contributions before either is divided
/// (spec.md §4.9 "reverse-active-layer vertical dof numbering").
fn stitch_boundary(upper: &Formation, upper_nodes: &mut FieldContainer<NodalAccumulator>, lower: &Formation, lower_nodes: &mut FieldContainer<NodalAccumulator>) {
    if upper.nx != lower.nx || upper.ny != lower.ny {
        return;
    }
    let (nx, ny) = (upper.nx, upper.ny);
    for j in 0..=ny {
        for i in 0..=nx {
            let upper_idx = node_index(nx, ny, i, j, upper.nz);
            let lower_idx = node_index(nx, ny, i, j, 0);
            let combined = {
                let mut merged = *upper_nodes.get(upper_idx);
                merged.merge(lower_nodes.get(lower_idx));
                merged
            };
            *upper_nodes.get_mut(upper_idx) = combined;
            *lower_nodes.get_mut(lower_idx) = combined;
        }
    }
}

fn divide(accumulators: &FieldContainer<NodalAccumulator>) -> FieldContainer<Saturation> {
    let mut out = FieldContainer::filled(accumulators.len(), default_node_saturation());
    for idx in 0..accumulators.len() {
        let acc = accumulators.get(idx);
        if acc.weight > 0.0 {
            *out.get_mut(idx) = Saturation::new(acc.liquid / acc.weight, acc.vapour / acc.weight);
        }
    }
    out
}

/// Full nodal projection over a subdomain: accumulate per formation,
/// stitch shared horizons between vertically adjacent formations
/// (walked bottom-to-top via `reverse_active_layers`, spec.md §4.9),
/// ghost-exchange the accumulators, then divide.
///
/// Propagates the first ghost-exchange failure rather than discarding it:
/// a worker that can't reconcile its boundary accumulators with its
/// neighbours has no physically meaningful nodal saturation to report.
pub fn average_global_saturation<G: GhostExchange<NodalAccumulator>>(
    subdomain: &Subdomain,
    element_saturations: &[Vec<Saturation>],
    exchange: &G,
) -> Result<Vec<FieldContainer<Saturation>>, GhostExchangeError> {
    assert_eq!(element_saturations.len(), subdomain.formations.len());

    let mut accumulators: Vec<FieldContainer<NodalAccumulator>> = subdomain
        .formations
        .iter()
        .zip(element_saturations.iter())
        .map(|(formation, sats)| accumulate_formation(formation, sats))
        .collect();

    for f in 0..accumulators.len().saturating_sub(1) {
        let (left, right) = accumulators.split_at_mut(f + 1);
        stitch_boundary(
            &subdomain.formations[f],
            &mut left[f],
            &subdomain.formations[f + 1],
            &mut right[0],
        );
    }

    for acc in accumulators.iter_mut() {
        exchange.exchange(acc, UpdateMode::UpdateIncludingGhosts)?;
    }

    Ok(accumulators.iter().map(divide).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use crate::fields::SingleProcessExchange;
    use crate::grid::ElementIndex;

    fn uniform_formation(name: &str, nx: usize, ny: usize, nz: usize) -> Formation {
        let mut f = Formation::new(name, nx, ny, nz, 100.0, 100.0);
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let e = f.element_mut(i, j, k);
                    e.local = ElementIndex::new(i, j, k);
                    e.lithology_id = Some(0);
                    e.volume_m3 = 1000.0;
                    e.z_top = 100.0 - k as f64 * 10.0;
                    e.z_bottom = 90.0 - k as f64 * 10.0;
                }
            }
        }
        f
    }

    #[test]
    fn uniform_saturation_projects_unchanged() {
        let formation = uniform_formation("f", 2, 2, 2);
        let sats = vec![Saturation::new(0.3, 0.2); formation.num_elements()];
        let nodes = accumulate_formation(&formation, &sats);
        let projected = divide(&nodes);
        for idx in 0..projected.len() {
            let s = projected.get(idx);
            assert_abs_diff_eq!(s.liquid, 0.3, epsilon = 1e-9);
            assert_abs_diff_eq!(s.vapour, 0.2, epsilon = 1e-9);
        }
    }

    #[test]
    fn empty_weight_node_falls_back_to_default() {
        let mut formation = uniform_formation("f", 1, 1, 1);
        formation.element_mut(0, 0, 0).lithology_id = None;
        let sats = vec![Saturation::new(0.3, 0.2); formation.num_elements()];
        let nodes = accumulate_formation(&formation, &sats);
        let projected = divide(&nodes);
        let s = projected.get(0);
        assert_eq!(s.liquid, 0.0);
        assert_eq!(s.water, 1.0);
    }

    #[test]
    fn shared_horizon_is_stitched_between_formations() {
        let sub = Subdomain::new(vec![uniform_formation("top", 1, 1, 1), uniform_formation("bottom", 1, 1, 1)]);
        let top_sats = vec![Saturation::new(0.1, 0.1); sub.formations[0].num_elements()];
        let bottom_sats = vec![Saturation::new(0.5, 0.3); sub.formations[1].num_elements()];
        let exchange = SingleProcessExchange;
        let projected = average_global_saturation(&sub, &[top_sats, bottom_sats], &exchange).unwrap();

        let (nx, ny) = (sub.formations[0].nx, sub.formations[0].ny);
        let shared_idx_in_top = node_index(nx, ny, 0, 0, sub.formations[0].nz);
        let shared_idx_in_bottom = node_index(nx, ny, 0, 0, 0);
        let from_top = projected[0].get(shared_idx_in_top);
        let from_bottom = projected[1].get(shared_idx_in_bottom);
        assert!((from_top.liquid - from_bottom.liquid).abs() < 1e-12);
    }

    struct FailingExchange;

    impl GhostExchange<NodalAccumulator> for FailingExchange {
        fn exchange(&self, _field: &mut FieldContainer<NodalAccumulator>, _mode: UpdateMode) -> Result<(), GhostExchangeError> {
            Err(GhostExchangeError("simulated boundary timeout".to_string()))
        }
    }

    #[test]
    fn ghost_exchange_failure_propagates_instead_of_being_swallowed() {
        let sub = Subdomain::new(vec![uniform_formation("f", 1, 1, 1)]);
        let sats = vec![Saturation::new(0.3, 0.2); sub.formations[0].num_elements()];
        let result = average_global_saturation(&sub, &[sats], &FailingExchange);
        assert!(result.is_err());
    }
}
