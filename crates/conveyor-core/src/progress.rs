//! Unit progress: the append-only log of named sub-phases of a step.
//!
//! Entries are ordered by first appearance and overwritten by name. Status
//! only moves forward: `Queued → Running → {Success, Failure}`. A unit may
//! jump straight from `Queued` to a terminal status when it completes
//! without a visible running phase.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CoreError, CoreResult};

/// Status of one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitStatus {
    Queued,
    Running,
    Success,
    Failure,
}

impl UnitStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, UnitStatus::Success | UnitStatus::Failure)
    }

    /// Ordering rank used to reject backward transitions.
    fn rank(self) -> u8 {
        match self {
            UnitStatus::Queued => 0,
            UnitStatus::Running => 1,
            UnitStatus::Success | UnitStatus::Failure => 2,
        }
    }

    /// Whether `self → next` is a legal forward move.
    pub fn can_move_to(self, next: UnitStatus) -> bool {
        if self == next {
            return !self.is_terminal();
        }
        !self.is_terminal() && next.rank() > self.rank()
    }
}

/// Progress record for a single unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitProgress {
    pub unit_name: String,
    pub status: UnitStatus,
    /// Epoch milliseconds.
    pub started_at: Option<u64>,
    /// Epoch milliseconds.
    pub ended_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl UnitProgress {
    pub fn queued(name: &str) -> Self {
        Self {
            unit_name: name.to_string(),
            status: UnitStatus::Queued,
            started_at: None,
            ended_at: None,
            note: None,
        }
    }
}

/// Ordered, monotonic log of unit progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitProgressLog {
    entries: Vec<UnitProgress>,
}

impl UnitProgressLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a log with every unit queued, in order.
    pub fn with_units<I, S>(units: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut log = Self::new();
        for unit in units {
            log.queue(unit.as_ref());
        }
        log
    }

    pub fn from_entries(entries: Vec<UnitProgress>) -> Self {
        let mut log = Self::new();
        log.merge(&entries);
        log
    }

    pub fn entries(&self) -> &[UnitProgress] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<UnitProgress> {
        self.entries
    }

    pub fn get(&self, name: &str) -> Option<&UnitProgress> {
        self.entries.iter().find(|u| u.unit_name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when every entry has reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.entries.iter().all(|u| u.status.is_terminal())
    }

    /// Append a queued unit. Existing entries are left untouched.
    pub fn queue(&mut self, name: &str) {
        if self.get(name).is_none() {
            self.entries.push(UnitProgress::queued(name));
        }
    }

    /// Mark a unit running, appending it if absent.
    pub fn start(&mut self, name: &str) -> CoreResult<()> {
        self.transition(name, UnitStatus::Running, None)
    }

    /// Mark a unit successful, appending it if absent.
    pub fn succeed(&mut self, name: &str, note: Option<&str>) -> CoreResult<()> {
        self.transition(name, UnitStatus::Success, note)
    }

    /// Mark a unit failed, appending it if absent.
    pub fn fail(&mut self, name: &str, note: Option<&str>) -> CoreResult<()> {
        self.transition(name, UnitStatus::Failure, note)
    }

    fn transition(&mut self, name: &str, to: UnitStatus, note: Option<&str>) -> CoreResult<()> {
        self.queue(name);
        let now = now_millis();
        let Some(entry) = self.entries.iter_mut().find(|u| u.unit_name == name) else {
            return Err(CoreError::UnknownUnit(name.to_string()));
        };

        if !entry.status.can_move_to(to) {
            return Err(CoreError::IllegalTransition {
                unit: name.to_string(),
                from: entry.status,
                to,
            });
        }

        if entry.started_at.is_none() {
            entry.started_at = Some(now);
        }
        if to.is_terminal() {
            entry.ended_at = Some(now);
        }
        if let Some(note) = note {
            entry.note = Some(note.to_string());
        }
        entry.status = to;
        Ok(())
    }

    /// Fold a snapshot reported by a worker into this log.
    ///
    /// New units are appended in snapshot order. Entries that would move
    /// backward, or out of a terminal status, are ignored.
    pub fn merge(&mut self, snapshot: &[UnitProgress]) {
        for incoming in snapshot {
            match self
                .entries
                .iter_mut()
                .find(|u| u.unit_name == incoming.unit_name)
            {
                None => self.entries.push(incoming.clone()),
                Some(existing) if existing == incoming => {}
                Some(existing) => {
                    if existing.status.can_move_to(incoming.status) {
                        *existing = UnitProgress {
                            started_at: existing.started_at.or(incoming.started_at),
                            ..incoming.clone()
                        };
                    } else {
                        warn!(
                            unit = %incoming.unit_name,
                            current = ?existing.status,
                            reported = ?incoming.status,
                            "ignoring regressive unit progress"
                        );
                    }
                }
            }
        }
    }

    /// Force every non-terminal unit to `Failure` at `now`.
    ///
    /// Returns the number of units closed.
    pub fn close_dangling(&mut self, now: u64, note: Option<&str>) -> usize {
        self.settle_dangling(now, UnitStatus::Failure, note)
    }

    /// Force every non-terminal unit to the terminal status `to` at `now`.
    pub fn settle_dangling(&mut self, now: u64, to: UnitStatus, note: Option<&str>) -> usize {
        debug_assert!(to.is_terminal());
        let mut closed = 0;
        for entry in self.entries.iter_mut().filter(|u| !u.status.is_terminal()) {
            entry.status = to;
            entry.started_at.get_or_insert(now);
            entry.ended_at = Some(now);
            if let Some(note) = note {
                entry.note = Some(note.to_string());
            }
            closed += 1;
        }
        closed
    }
}

// ── Shared log ──────────────────────────────────────────────────

#[derive(Debug, Default)]
struct SharedLog {
    log: UnitProgressLog,
    frozen: bool,
}

/// A progress log shared between a running handler and the worker that
/// supervises it.
///
/// The worker freezes the log when it gives up on the handler (timeout).
/// Updates after that are rejected, so the frozen snapshot is final.
#[derive(Debug, Clone, Default)]
pub struct SharedProgress {
    inner: Arc<Mutex<SharedLog>>,
}

impl SharedProgress {
    pub fn new(log: UnitProgressLog) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SharedLog { log, frozen: false })),
        }
    }

    pub fn with_units<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(UnitProgressLog::with_units(names))
    }

    pub fn start(&self, name: &str) -> CoreResult<()> {
        self.update(name, |log| log.start(name))
    }

    pub fn succeed(&self, name: &str, note: Option<&str>) -> CoreResult<()> {
        self.update(name, |log| log.succeed(name, note))
    }

    pub fn fail(&self, name: &str, note: Option<&str>) -> CoreResult<()> {
        self.update(name, |log| log.fail(name, note))
    }

    /// Whether the supervising worker has stopped listening.
    pub fn is_frozen(&self) -> bool {
        self.lock().frozen
    }

    /// Stop accepting updates and return the final snapshot.
    pub fn freeze(&self) -> UnitProgressLog {
        let mut shared = self.lock();
        shared.frozen = true;
        shared.log.clone()
    }

    pub fn snapshot(&self) -> UnitProgressLog {
        self.lock().log.clone()
    }

    fn update(&self, name: &str, apply: impl FnOnce(&mut UnitProgressLog) -> CoreResult<()>) -> CoreResult<()> {
        let mut shared = self.lock();
        if shared.frozen {
            return Err(CoreError::ProgressFrozen(name.to_string()));
        }
        apply(&mut shared.log)
    }

    fn lock(&self) -> MutexGuard<'_, SharedLog> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
