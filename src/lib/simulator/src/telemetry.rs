//! Per-phase wall-clock timers and operation counters, reported through
//! `tracing` at the end of a solve (spec.md §4.10 "[AMBIENT] telemetry").
//!
//! Ground: the original core's constructor/destructor
//! (`examples/original_source/.../ExplicitMultiComponentFlowSolver.C`,
//! lines 1-250) start a timer per phase at construction and, in the
//! destructor, print each phase's share of total wall time via
//! `PetscPrintf`. This crate has no MPI rank to gate printing on, so the
//! report goes through `tracing::info!` instead, structured the same way
//! (one line per phase, with the percentage of total solve time).

use std::time::{Duration, Instant};

/// The phases the original core times individually.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    Pressure,
    Flux,
    Transport,
    Flash,
    Otgc,
    Saturation,
}

const ALL_PHASES: [Phase; 6] = [
    Phase::Pressure,
    Phase::Flux,
    Phase::Transport,
    Phase::Flash,
    Phase::Otgc,
    Phase::Saturation,
];

impl Phase {
    fn label(self) -> &'static str {
        match self {
            Phase::Pressure => "pressure",
            Phase::Flux => "flux",
            Phase::Transport => "transport",
            Phase::Flash => "flash",
            Phase::Otgc => "otgc",
            Phase::Saturation => "saturation",
        }
    }
}

/// Wall-time accumulators and the flash/transport operation counters
/// tracked across a solve.
#[derive(Debug)]
pub struct SolverTelemetry {
    durations: [Duration; 6],
    flash_count: u64,
    transport_inflow_count: u64,
    transport_outflow_count: u64,
    start: Instant,
}

impl Default for SolverTelemetry {
    fn default() -> Self {
        SolverTelemetry {
            durations: [Duration::ZERO; 6],
            flash_count: 0,
            transport_inflow_count: 0,
            transport_outflow_count: 0,
            start: Instant::now(),
        }
    }
}

impl SolverTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, phase: Phase) -> &mut Duration {
        &mut self.durations[ALL_PHASES.iter().position(|p| *p == phase).unwrap()]
    }

    /// Times a closure and accumulates its wall-clock duration under
    /// `phase`, returning the closure's result unchanged.
    pub fn time<F, R>(&mut self, phase: Phase, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let started = Instant::now();
        let result = f();
        let elapsed = started.elapsed();
        *self.slot(phase) += elapsed;
        result
    }

    pub fn record_flash(&mut self) {
        self.flash_count += 1;
    }

    pub fn record_transport(&mut self, net_flux_is_inflow: bool) {
        if net_flux_is_inflow {
            self.transport_inflow_count += 1;
        } else {
            self.transport_outflow_count += 1;
        }
    }

    pub fn flash_count(&self) -> u64 {
        self.flash_count
    }

    pub fn transport_total_count(&self) -> u64 {
        self.transport_inflow_count + self.transport_outflow_count
    }

    /// Emits one `tracing::info!` line per phase with its share of the
    /// total wall time since this telemetry object was created, mirroring
    /// the original's destructor report.
    pub fn report(&self) {
        let total = self.start.elapsed().as_secs_f64().max(1e-12);
        for phase in ALL_PHASES {
            let seconds = self.durations[phase as usize].as_secs_f64();
            let percent = 100.0 * seconds / total;
            tracing::info!(phase = phase.label(), seconds, percent, "solver phase timing");
        }
        tracing::info!(
            flash_count = self.flash_count,
            transport_count = self.transport_total_count(),
            "solver operation counts"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn time_accumulates_across_calls() {
        let mut telemetry = SolverTelemetry::new();
        telemetry.time(Phase::Flash, || sleep(Duration::from_millis(1)));
        telemetry.time(Phase::Flash, || sleep(Duration::from_millis(1)));
        assert!(telemetry.durations[Phase::Flash as usize] >= Duration::from_millis(2));
    }

    #[test]
    fn counters_increment_independently() {
        let mut telemetry = SolverTelemetry::new();
        telemetry.record_flash();
        telemetry.record_flash();
        telemetry.record_transport(true);
        assert_eq!(telemetry.flash_count(), 2);
        assert_eq!(telemetry.transport_total_count(), 1);
    }
}
