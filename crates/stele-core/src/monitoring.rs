//! Monitoring units consumed by the external monitoring collaborator.
//!
//! The engine computes values and thresholds and sets unit statuses; it
//! never renders or ships them. A unit holds the latest ok/warning/critical
//! state plus an optional message.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::Serialize;

/// Severity reported by a monitoring unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonitoringStatus {
    /// Everything within thresholds.
    Ok,
    /// Degraded but operating.
    Warning,
    /// Requires attention.
    Critical,
}

#[derive(Debug, Clone)]
struct UnitState {
    status: MonitoringStatus,
    message: Option<String>,
}

/// A named monitoring signal (e.g. "ingestion queue").
#[derive(Debug)]
pub struct MonitoringUnit {
    name: String,
    state: Mutex<UnitState>,
}

impl MonitoringUnit {
    /// Creates a unit in the `Ok` state.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(UnitState {
                status: MonitoringStatus::Ok,
                message: None,
            }),
        }
    }

    /// Unit name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Clears the unit back to `Ok`.
    pub fn ok(&self) {
        self.update(MonitoringStatus::Ok, None);
    }

    /// Raises a warning.
    pub fn warning(&self, message: impl Into<String>) {
        self.update(MonitoringStatus::Warning, Some(message.into()));
    }

    /// Raises a critical.
    pub fn critical(&self, message: impl Into<String>) {
        self.update(MonitoringStatus::Critical, Some(message.into()));
    }

    /// Current severity.
    #[must_use]
    pub fn status(&self) -> MonitoringStatus {
        self.lock().status
    }

    /// Current message, if any.
    #[must_use]
    pub fn message(&self) -> Option<String> {
        self.lock().message.clone()
    }

    fn update(&self, status: MonitoringStatus, message: Option<String>) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state.status = status;
        state.message = message;
    }

    fn lock(&self) -> UnitState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Snapshot of one unit, as handed to the monitoring collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct UnitSnapshot {
    /// Unit name.
    pub name: String,
    /// Current severity.
    pub status: MonitoringStatus,
    /// Current message, if any.
    pub message: Option<String>,
}

/// Registry of monitoring units, keyed by name.
#[derive(Debug, Default)]
pub struct Monitoring {
    units: RwLock<HashMap<String, Arc<MonitoringUnit>>>,
}

impl Monitoring {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a unit. Re-registering a name replaces the old unit.
    pub fn add_unit(&self, unit: Arc<MonitoringUnit>) {
        self.units
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(unit.name().to_string(), unit);
    }

    /// Looks up a unit by name.
    #[must_use]
    pub fn unit(&self, name: &str) -> Option<Arc<MonitoringUnit>> {
        self.units
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// The worst severity across all units.
    #[must_use]
    pub fn overall(&self) -> MonitoringStatus {
        self.units
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|unit| unit.status())
            .max()
            .unwrap_or(MonitoringStatus::Ok)
    }

    /// Snapshot of every unit, sorted by name.
    #[must_use]
    pub fn snapshot(&self) -> Vec<UnitSnapshot> {
        let mut snapshots: Vec<UnitSnapshot> = self
            .units
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|unit| UnitSnapshot {
                name: unit.name().to_string(),
                status: unit.status(),
                message: unit.message(),
            })
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }
}
