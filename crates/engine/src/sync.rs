//! Transient edit state of the active curve and the pull/version protocol
//! with the editing surface.
//!
//! The coordinator never touches the store or the rows; the session performs
//! those writes and reports back through [`SyncCoordinator::mark_committed`]
//! and [`SyncCoordinator::reset_to`].

use std::collections::BTreeMap;

use tracing::{debug, warn};

use curvesim_core::{CoreError, CurveKey, MonthlySeries};

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Showing the stored override or the analytic baseline.
    Loaded,
    /// The surface holds a transient curve that has not been pulled yet.
    Editing,
    /// The surface's curve was pulled and adopted.
    Synced,
    /// The current curve was written through the store.
    Committed,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Loaded => "loaded",
            Self::Editing => "editing",
            Self::Synced => "synced",
            Self::Committed => "committed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PullResult {
    Accepted { version: u64 },
    /// Tagged with a version older than one already accepted or invalidated.
    Stale { version: u64, last_accepted: u64 },
    /// Tagged with a version [`SyncCoordinator::request_sync`] never handed out.
    Unissued { version: u64, issued: u64 },
    /// Not exactly 12 finite values; nothing changed.
    Invalid { reason: CoreError },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetScope {
    /// Drop the adopted curve and go back to the analytic baseline.
    Transient,
    /// Also remove the stored override and restore the rows.
    ClearPersisted,
}

impl ResetScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::ClearPersisted => "clear_persisted",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActiveCurve {
    pub key: CurveKey,
    pub phase: SyncPhase,
    /// Value shown on open: stored override, else analytic baseline.
    pub loaded: MonthlySeries,
    /// Last curve accepted from the surface since the last load, commit or reset.
    pub adopted: Option<MonthlySeries>,
    /// Latest year of the key's rows, if any.
    pub year: Option<i32>,
}

impl ActiveCurve {
    pub fn current(&self) -> MonthlySeries {
        self.adopted.unwrap_or(self.loaded)
    }

    /// Whether the current curve differs from what was loaded.
    pub fn is_dirty(&self) -> bool {
        self.adopted.is_some_and(|c| c != self.loaded)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct VersionState {
    issued: u64,
    last_accepted: u64,
}

impl VersionState {
    fn next(&mut self) -> Result<u64, EngineError> {
        self.issued = self.issued.checked_add(1).ok_or(EngineError::VersionExhausted)?;
        Ok(self.issued)
    }

    /// Every version issued so far becomes stale.
    fn invalidate(&mut self) -> Result<(), EngineError> {
        self.last_accepted = self.next()?;
        Ok(())
    }
}

/// Tracks the single active key and per-key sync counters.
#[derive(Debug, Default)]
pub struct SyncCoordinator {
    active: Option<ActiveCurve>,
    versions: BTreeMap<CurveKey, VersionState>,
}

impl SyncCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<&ActiveCurve> {
        self.active.as_ref()
    }

    pub fn active_key(&self) -> Option<&CurveKey> {
        self.active.as_ref().map(|a| &a.key)
    }

    pub fn phase(&self) -> Option<SyncPhase> {
        self.active.as_ref().map(|a| a.phase)
    }

    /// Last version handed out for `key`; 0 if none.
    pub fn issued_version(&self, key: &CurveKey) -> u64 {
        self.versions.get(key).map_or(0, |v| v.issued)
    }

    pub fn last_accepted_version(&self, key: &CurveKey) -> u64 {
        self.versions.get(key).map_or(0, |v| v.last_accepted)
    }

    /// Makes `key` active, discarding any uncommitted state. Pulls tagged
    /// before this call are stale, including ones for `key` itself.
    pub fn open(
        &mut self,
        key: CurveKey,
        loaded: MonthlySeries,
        year: Option<i32>,
    ) -> Result<(), EngineError> {
        self.versions.entry(key.clone()).or_default().invalidate()?;
        if let Some(prev) = self.active.take() {
            if prev.key != key && prev.is_dirty() {
                debug!(key = %prev.key, "discarding uncommitted edit");
            }
        }
        self.active = Some(ActiveCurve {
            key,
            phase: SyncPhase::Loaded,
            loaded,
            adopted: None,
            year,
        });
        Ok(())
    }

    pub fn begin_edit(&mut self) -> Result<(), EngineError> {
        let active = self.active.as_mut().ok_or(EngineError::NoActiveCurve)?;
        active.phase = SyncPhase::Editing;
        Ok(())
    }

    /// Issues the next version the surface must tag its pull with.
    pub fn request_sync(&mut self) -> Result<u64, EngineError> {
        let key = self.active_key().ok_or(EngineError::NoActiveCurve)?.clone();
        self.versions.entry(key).or_default().next()
    }

    pub fn pull_edit(
        &mut self,
        key: &CurveKey,
        values: &[f64],
        version: u64,
    ) -> Result<PullResult, EngineError> {
        let active = self.active.as_mut().ok_or(EngineError::NoActiveCurve)?;
        if active.key != *key {
            return Err(EngineError::KeyMismatch {
                expected: active.key.storage_key().to_string(),
                got: key.storage_key().to_string(),
            });
        }

        let curve = match MonthlySeries::try_from_slice(values) {
            Ok(curve) => curve,
            Err(reason) => {
                warn!(key = %key, version, %reason, "rejected invalid pull");
                return Ok(PullResult::Invalid { reason });
            }
        };

        let state = self.versions.entry(key.clone()).or_default();
        if version < state.last_accepted {
            warn!(
                key = %key,
                version,
                last_accepted = state.last_accepted,
                "ignored stale pull"
            );
            return Ok(PullResult::Stale {
                version,
                last_accepted: state.last_accepted,
            });
        }
        if version > state.issued {
            warn!(
                key = %key,
                version,
                issued = state.issued,
                "ignored pull with unissued version"
            );
            return Ok(PullResult::Unissued {
                version,
                issued: state.issued,
            });
        }

        state.last_accepted = version;
        active.adopted = Some(curve);
        active.phase = SyncPhase::Synced;
        debug!(key = %key, version, "accepted pull");
        Ok(PullResult::Accepted { version })
    }

    /// Records that `curve` was written through the store.
    pub fn mark_committed(&mut self, curve: MonthlySeries) -> Result<(), EngineError> {
        let active = self.active.as_mut().ok_or(EngineError::NoActiveCurve)?;
        active.loaded = curve;
        active.adopted = None;
        active.phase = SyncPhase::Committed;
        Ok(())
    }

    /// Returns to `baseline` and invalidates in-flight pulls.
    pub fn reset_to(&mut self, baseline: MonthlySeries) -> Result<(), EngineError> {
        let active = self.active.as_mut().ok_or(EngineError::NoActiveCurve)?;
        self.versions.entry(active.key.clone()).or_default().invalidate()?;
        active.loaded = baseline;
        active.adopted = None;
        active.phase = SyncPhase::Loaded;
        Ok(())
    }

    /// Drops the active key. Counters are kept and invalidated so no tag
    /// handed out before can be accepted afterwards.
    pub fn clear(&mut self) -> Result<(), EngineError> {
        self.active = None;
        for state in self.versions.values_mut() {
            state.invalidate()?;
        }
        Ok(())
    }
}
