//! Per-element and per-node field containers backed by the distributed
//! grids, with ghost-exchange operations (spec.md §3 "FieldContainers",
//! §5 "shared resources").
//!
//! In the original MPI/PETSc core these are `Vec`/`DM`-backed arrays with
//! `setVector`/`restoreVector(NO_UPDATE | UPDATE_EXCLUDING_GHOSTS |
//! UPDATE_INCLUDING_GHOSTS)` semantics. This crate's scope is a single
//! worker's local tile (spec.md §5 "[AMBIENT]" in SPEC_FULL.md §5), so a
//! `FieldContainer` owns flat contiguous storage and the ghost-exchange
//! step is delegated to a `GhostExchange` collaborator that a
//! multi-worker build would implement with real message passing; the
//! default here is the single-process identity exchange.

use std::fmt;

/// Mirrors the original's `restoreVector` update modes (spec.md §5).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateMode {
    NoUpdate,
    UpdateExcludingGhosts,
    UpdateIncludingGhosts,
}

/// A flat, arena-allocated container over a formation's elements
/// (spec.md §9 "avoid per-element heap allocations").
#[derive(Clone, Debug)]
pub struct FieldContainer<T> {
    data: Vec<T>,
}

impl<T: Clone> FieldContainer<T> {
    pub fn filled(len: usize, value: T) -> Self {
        FieldContainer {
            data: vec![value; len],
        }
    }

    pub fn from_vec(data: Vec<T>) -> Self {
        FieldContainer { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, idx: usize) -> &T {
        &self.data[idx]
    }

    pub fn get_mut(&mut self, idx: usize) -> &mut T {
        &mut self.data[idx]
    }

    pub fn fill(&mut self, value: T) {
        for slot in self.data.iter_mut() {
            *slot = value.clone();
        }
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Pairs a logical "acquire" with a `restore` on every exit path
    /// (spec.md §5). A no-op for the single-process container; recorded
    /// explicitly so callers keep the acquire/restore discipline the
    /// distributed version requires.
    pub fn restore(&mut self, _mode: UpdateMode) {}
}

/// Error returned when a ghost exchange round fails (would be a
/// communication fault in a real multi-worker build).
#[derive(Debug)]
pub struct GhostExchangeError(pub String);

impl fmt::Display for GhostExchangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ghost exchange failed: {}", self.0)
    }
}

impl std::error::Error for GhostExchangeError {}

/// Communication of shared-boundary values between adjacent workers
/// (spec.md GLOSSARY "Ghost exchange"). The single-process
/// implementation is the identity: there are no other workers to
/// exchange with, so exchanging twice is trivially idempotent
/// (testable property 5, spec.md §8).
pub trait GhostExchange<T> {
    fn exchange(&self, field: &mut FieldContainer<T>, mode: UpdateMode) -> Result<(), GhostExchangeError>;
}

#[derive(Default)]
pub struct SingleProcessExchange;

impl<T> GhostExchange<T> for SingleProcessExchange {
    fn exchange(&self, _field: &mut FieldContainer<T>, _mode: UpdateMode) -> Result<(), GhostExchangeError> {
        Ok(())
    }
}

/// A cross-worker reduction (spec.md §5: global Δt minimum, total mass
/// added, telemetry aggregation).
pub trait Reduction {
    fn min_f64(&self, local: f64) -> f64;
    fn sum_f64(&self, local: f64) -> f64;
}

#[derive(Default)]
pub struct SingleProcessReduction;

impl Reduction for SingleProcessReduction {
    fn min_f64(&self, local: f64) -> f64 {
        local
    }

    fn sum_f64(&self, local: f64) -> f64 {
        local
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_container_fill_and_access() {
        let mut c = FieldContainer::filled(4, 0.0_f64);
        c.fill(2.5);
        assert_eq!(*c.get(0), 2.5);
        *c.get_mut(1) = 9.0;
        assert_eq!(*c.get(1), 9.0);
    }

    #[test]
    fn ghost_exchange_idempotent_single_process() {
        let mut c = FieldContainer::filled(3, 1.0_f64);
        let ex = SingleProcessExchange;
        ex.exchange(&mut c, UpdateMode::UpdateIncludingGhosts).unwrap();
        let snapshot = c.as_slice().to_vec();
        ex.exchange(&mut c, UpdateMode::UpdateIncludingGhosts).unwrap();
        assert_eq!(snapshot, c.as_slice());
    }

    #[test]
    fn single_process_reduction_is_identity() {
        let r = SingleProcessReduction;
        assert_eq!(r.min_f64(3.0), 3.0);
        assert_eq!(r.sum_f64(4.0), 4.0);
    }
}
