//! Resource metering.
//!
//! The meter carries three budgets (compute, disk storage, network) with a
//! per-unit resource-credit cost each. Block application owns the budgets;
//! while a transaction session is attached, every charge is additionally
//! debited from the payer's credits. Compute doubles as the sandbox's tick
//! currency.

use crate::session::Session;
use crate::{ChainError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Weak;

/// Per-block resource limits and unit costs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimitData {
    /// Disk storage units available per block
    pub disk_limit: u64,
    /// Resource credits per disk unit
    pub disk_cost: u64,
    /// Network units available per block
    pub network_limit: u64,
    /// Resource credits per network unit
    pub network_cost: u64,
    /// Compute units available per block
    pub compute_limit: u64,
    /// Resource credits per compute unit
    pub compute_cost: u64,
}

impl Default for ResourceLimitData {
    fn default() -> Self {
        Self {
            disk_limit: 102_400,
            disk_cost: 10,
            network_limit: 1_048_576,
            network_cost: 5,
            compute_limit: 100_000_000,
            compute_cost: 1,
        }
    }
}

impl ResourceLimitData {
    /// Limits that never bind; the meter's state before a block is bound.
    pub fn unlimited() -> Self {
        Self {
            disk_limit: u64::MAX,
            disk_cost: 0,
            network_limit: u64::MAX,
            network_cost: 0,
            compute_limit: u64::MAX,
            compute_cost: 0,
        }
    }
}

/// Tracks remaining budgets and charges the attached session.
pub struct ResourceMeter {
    limits: ResourceLimitData,
    disk_remaining: u64,
    network_remaining: u64,
    compute_remaining: u64,
    session: Weak<Session>,
}

impl Default for ResourceMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceMeter {
    /// Creates an unlimited meter with no session attached.
    pub fn new() -> Self {
        let limits = ResourceLimitData::unlimited();
        Self {
            disk_remaining: limits.disk_limit,
            network_remaining: limits.network_limit,
            compute_remaining: limits.compute_limit,
            limits,
            session: Weak::new(),
        }
    }

    /// Installs fresh limits, resetting all remaining budgets.
    pub fn set_limits(&mut self, limits: ResourceLimitData) {
        self.disk_remaining = limits.disk_limit;
        self.network_remaining = limits.network_limit;
        self.compute_remaining = limits.compute_limit;
        self.limits = limits;
    }

    /// Attaches a transaction session; all further charges debit it while it
    /// stays alive.
    pub fn set_session(&mut self, session: Weak<Session>) {
        self.session = session;
    }

    /// Detaches the current session.
    pub fn clear_session(&mut self) {
        self.session = Weak::new();
    }

    fn charge_session(&self, units: u64, cost: u64) -> Result<()> {
        if let Some(session) = self.session.upgrade() {
            let rc = units
                .checked_mul(cost)
                .ok_or(ChainError::ResourceExhausted)?;
            session.use_rc(rc)?;
        }
        Ok(())
    }

    /// Consumes disk-storage units.
    ///
    /// Exceeding the remaining budget consumes the remainder before failing,
    /// so the accounting reflects the attempt.
    pub fn use_disk_storage(&mut self, units: u64) -> Result<()> {
        if units > self.disk_remaining {
            self.disk_remaining = 0;
            return Err(ChainError::ResourceExhausted);
        }
        self.charge_session(units, self.limits.disk_cost)?;
        self.disk_remaining -= units;
        Ok(())
    }

    /// Consumes network units.
    pub fn use_network_bandwidth(&mut self, units: u64) -> Result<()> {
        if units > self.network_remaining {
            self.network_remaining = 0;
            return Err(ChainError::ResourceExhausted);
        }
        self.charge_session(units, self.limits.network_cost)?;
        self.network_remaining -= units;
        Ok(())
    }

    /// Consumes compute units.
    pub fn use_compute_bandwidth(&mut self, units: u64) -> Result<()> {
        if units > self.compute_remaining {
            self.compute_remaining = 0;
            return Err(ChainError::ResourceExhausted);
        }
        self.charge_session(units, self.limits.compute_cost)?;
        self.compute_remaining -= units;
        Ok(())
    }

    /// Disk units consumed so far.
    pub fn disk_storage_used(&self) -> u64 {
        self.limits.disk_limit - self.disk_remaining
    }

    /// Network units consumed so far.
    pub fn network_bandwidth_used(&self) -> u64 {
        self.limits.network_limit - self.network_remaining
    }

    /// Compute units consumed so far.
    pub fn compute_bandwidth_used(&self) -> u64 {
        self.limits.compute_limit - self.compute_remaining
    }

    /// Compute units still spendable, bounded by the session's credits while
    /// one is attached.
    pub fn compute_bandwidth_remaining(&self) -> u64 {
        if let Some(session) = self.session.upgrade() {
            let cost = self.limits.compute_cost;
            if cost > 0 {
                return (session.remaining_rc() / cost).min(self.compute_remaining);
            }
        }
        self.compute_remaining
    }

    /// Remaining compute as sandbox ticks, clamped to `i64::MAX`.
    pub fn get_meter_ticks(&self) -> i64 {
        self.compute_bandwidth_remaining().min(i64::MAX as u64) as i64
    }

    /// Consumes sandbox ticks, saturating at zero.
    ///
    /// Overdraw drains the budget silently; the next explicit check fails
    /// with `resource_exhausted`.
    pub fn use_meter_ticks(&mut self, ticks: u64) {
        let _ = self.use_compute_bandwidth(ticks);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn metered() -> ResourceMeter {
        let mut meter = ResourceMeter::new();
        meter.set_limits(ResourceLimitData {
            disk_limit: 100,
            disk_cost: 10,
            network_limit: 1000,
            network_cost: 5,
            compute_limit: 10_000,
            compute_cost: 1,
        });
        meter
    }

    #[test]
    fn test_budget_decrements() {
        let mut meter = metered();
        meter.use_disk_storage(40).unwrap();
        meter.use_disk_storage(40).unwrap();
        assert_eq!(meter.disk_storage_used(), 80);
    }

    #[test]
    fn test_overdraw_consumes_remainder_then_fails() {
        let mut meter = metered();
        meter.use_network_bandwidth(900).unwrap();
        assert!(matches!(
            meter.use_network_bandwidth(200),
            Err(ChainError::ResourceExhausted)
        ));
        // The remainder was consumed by the failing attempt.
        assert_eq!(meter.network_bandwidth_used(), 1000);
        assert!(matches!(
            meter.use_network_bandwidth(1),
            Err(ChainError::ResourceExhausted)
        ));
    }

    #[test]
    fn test_session_is_charged_at_unit_cost() {
        let mut meter = metered();
        let session = Session::new(1_000);
        meter.set_session(Arc::downgrade(&session));

        meter.use_disk_storage(30).unwrap(); // 30 * 10 = 300 rc
        assert_eq!(session.used_rc(), 300);

        meter.clear_session();
        meter.use_disk_storage(30).unwrap();
        assert_eq!(session.used_rc(), 300);
    }

    #[test]
    fn test_session_credits_bound_ticks() {
        let mut meter = metered();
        let session = Session::new(500);
        meter.set_session(Arc::downgrade(&session));
        // compute_cost is 1, so ticks are capped by the session's credits.
        assert_eq!(meter.get_meter_ticks(), 500);
    }

    #[test]
    fn test_tick_overdraw_saturates_silently() {
        let mut meter = metered();
        meter.use_meter_ticks(20_000);
        assert_eq!(meter.compute_bandwidth_remaining(), 0);
        assert!(matches!(
            meter.use_compute_bandwidth(1),
            Err(ChainError::ResourceExhausted)
        ));
    }
}
