// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `RelayController`: eight on/off outputs, each with an optional bounded
//! auto-off timer (§3.5, §4.3).

use crate::error::{Error, IoError, Result};
use crate::wire::RelayAction;

/// Number of relay outputs.
pub const RELAY_COUNT: usize = 8;
/// Default maximum timer length.
pub const MAX_RELAY_DURATION_S: u32 = 3600;
/// Absolute ceiling a deployment may configure a relay's timer up to.
pub const MAX_RELAY_DURATION_CEILING_S: u32 = 24 * 3600;

/// Collaborator driving the physical outputs (GPIO expander, relay board).
pub trait IoExpander: Send + Sync {
    /// Physically set relay `index` to `on`. Returns an error describing
    /// the driver failure on a write fault.
    fn write(&self, index: u8, on: bool) -> std::result::Result<(), String>;
}

/// An in-memory-only expander for hosts without physical relays (tests,
/// bridge-only deployments).
#[derive(Debug, Default)]
pub struct NullExpander;

impl IoExpander for NullExpander {
    fn write(&self, _index: u8, _on: bool) -> std::result::Result<(), String> {
        Ok(())
    }
}

/// State of one relay output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOutput {
    /// Current boolean state.
    pub on: bool,
    /// Monotonic ms of the last transition to on.
    pub started_at_ms: u64,
    /// Auto-off timer length in seconds; 0 = no timer.
    pub timer_s: u32,
}

impl Default for RelayOutput {
    fn default() -> Self {
        Self {
            on: false,
            started_at_ms: 0,
            timer_s: 0,
        }
    }
}

/// A firing of a relay's output during [`RelayController::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    /// Relay index.
    pub index: u8,
    /// New state.
    pub on: bool,
    /// Remaining timer seconds (always 0 after an auto-off).
    pub remaining_s: u32,
}

/// Drives and tracks the eight relay outputs.
pub struct RelayController {
    outputs: [RelayOutput; RELAY_COUNT],
    names: [String; RELAY_COUNT],
    max_duration_s: u32,
    expander: Box<dyn IoExpander>,
}

impl RelayController {
    /// Build a controller with the default maximum timer duration.
    pub fn new(expander: Box<dyn IoExpander>) -> Self {
        Self::with_max_duration(expander, MAX_RELAY_DURATION_S)
    }

    /// Build a controller with an explicit (deployment-configured) maximum
    /// timer duration, clamped to [`MAX_RELAY_DURATION_CEILING_S`].
    pub fn with_max_duration(expander: Box<dyn IoExpander>, max_duration_s: u32) -> Self {
        Self {
            outputs: [RelayOutput::default(); RELAY_COUNT],
            names: Default::default(),
            max_duration_s: max_duration_s.min(MAX_RELAY_DURATION_CEILING_S),
            expander,
        }
    }

    fn validate_index(index: u8) -> Result<()> {
        if (index as usize) < RELAY_COUNT {
            Ok(())
        } else {
            Err(Error::InvalidIndex(index))
        }
    }

    /// Current state of relay `index`.
    pub fn state(&self, index: u8) -> Result<RelayOutput> {
        Self::validate_index(index)?;
        Ok(self.outputs[index as usize])
    }

    /// Display name of relay `index`, if configured.
    pub fn name(&self, index: u8) -> Result<&str> {
        Self::validate_index(index)?;
        Ok(&self.names[index as usize])
    }

    /// Configure relay `index`'s display name.
    pub fn set_name(&mut self, index: u8, name: impl Into<String>) -> Result<()> {
        Self::validate_index(index)?;
        self.names[index as usize] = name.into();
        Ok(())
    }

    /// Unconditionally set relay `index` to `on`, clearing any timer.
    /// The in-memory record is only updated after the physical write
    /// succeeds; a write failure leaves the prior state untouched and
    /// returns `Err`.
    pub fn set(&mut self, index: u8, on: bool, now: u64) -> Result<RelayOutput> {
        Self::validate_index(index)?;
        self.expander
            .write(index, on)
            .map_err(|reason| Error::Io(IoError { index, reason }))?;

        let out = &mut self.outputs[index as usize];
        out.on = on;
        out.timer_s = 0;
        if on {
            out.started_at_ms = now;
        }
        Ok(*out)
    }

    /// Set relay `index` on with a bounded auto-off timer.
    pub fn set_with_timer(&mut self, index: u8, on: bool, seconds: u32, now: u64) -> Result<RelayOutput> {
        Self::validate_index(index)?;
        let clamped = seconds.clamp(1, self.max_duration_s);

        self.expander
            .write(index, on)
            .map_err(|reason| Error::Io(IoError { index, reason }))?;

        let out = &mut self.outputs[index as usize];
        out.on = on;
        out.timer_s = clamped;
        out.started_at_ms = now;
        Ok(*out)
    }

    /// Flip relay `index`'s current state.
    pub fn toggle(&mut self, index: u8, now: u64) -> Result<RelayOutput> {
        let current = self.state(index)?;
        self.set(index, !current.on, now)
    }

    /// Top-level entry point for dispatch/CLI: maps a `RelayAction` plus
    /// duration onto the right controller call.
    pub fn apply(&mut self, index: u8, action: RelayAction, duration_s: u32, now: u64) -> Result<RelayOutput> {
        match action {
            RelayAction::On if duration_s > 0 => self.set_with_timer(index, true, duration_s, now),
            RelayAction::On | RelayAction::OnForever => self.set(index, true, now),
            RelayAction::Off => self.set(index, false, now),
            RelayAction::Toggle => self.toggle(index, now),
            RelayAction::Status => self.state(index),
        }
    }

    /// Called at >=10 Hz: auto-off any relay whose timer deadline passed.
    pub fn tick(&mut self, now: u64) -> Vec<StateChange> {
        let mut changes = Vec::new();
        for i in 0..RELAY_COUNT {
            let out = self.outputs[i];
            if out.on && out.timer_s > 0 {
                let deadline = out.started_at_ms + out.timer_s as u64 * 1000;
                if now >= deadline {
                    let _ = self.expander.write(i as u8, false);
                    self.outputs[i].on = false;
                    self.outputs[i].timer_s = 0;
                    changes.push(StateChange {
                        index: i as u8,
                        on: false,
                        remaining_s: 0,
                    });
                }
            }
        }
        changes
    }

    /// Remaining timer seconds for relay `index`, given the current clock.
    pub fn remaining_s(&self, index: u8, now: u64) -> Result<u32> {
        let out = self.state(index)?;
        if !out.on || out.timer_s == 0 {
            return Ok(0);
        }
        let deadline = out.started_at_ms + out.timer_s as u64 * 1000;
        Ok(deadline.saturating_sub(now).div_ceil(1000) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_on_with_duration_sets_timer() {
        let mut ctrl = RelayController::new(Box::new(NullExpander));
        let out = ctrl.apply(3, RelayAction::On, 10, 0).unwrap();
        assert!(out.on);
        assert_eq!(out.timer_s, 10);
    }

    #[test]
    fn test_apply_invalid_index() {
        let mut ctrl = RelayController::new(Box::new(NullExpander));
        let err = ctrl.apply(9, RelayAction::On, 0, 0).unwrap_err();
        assert!(matches!(err, Error::InvalidIndex(9)));
    }

    #[test]
    fn test_timer_boundedness() {
        let mut ctrl = RelayController::new(Box::new(NullExpander));
        ctrl.apply(0, RelayAction::On, 5, 0).unwrap();
        let changes = ctrl.tick(4_999);
        assert!(changes.is_empty());
        let changes = ctrl.tick(5_000);
        assert_eq!(changes.len(), 1);
        assert!(!ctrl.state(0).unwrap().on);
    }

    #[test]
    fn test_toggle() {
        let mut ctrl = RelayController::new(Box::new(NullExpander));
        assert!(!ctrl.state(2).unwrap().on);
        ctrl.toggle(2, 0).unwrap();
        assert!(ctrl.state(2).unwrap().on);
        ctrl.toggle(2, 0).unwrap();
        assert!(!ctrl.state(2).unwrap().on);
    }

    struct FailingExpander;
    impl IoExpander for FailingExpander {
        fn write(&self, _index: u8, _on: bool) -> std::result::Result<(), String> {
            Err("bus fault".into())
        }
    }

    #[test]
    fn test_physical_write_failure_surfaces_error() {
        let mut ctrl = RelayController::new(Box::new(FailingExpander));
        let err = ctrl.set(0, true, 0).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(!ctrl.state(0).unwrap().on);
    }
}
