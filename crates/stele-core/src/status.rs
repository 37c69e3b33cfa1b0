//! The per-node visibility/ban state machine.
//!
//! Every directory and metric in the namespace carries a [`MetricStatus`].
//! All mutation goes through [`MetricStatus::select`]: a status may resist
//! being overwritten by a lower-priority automatic status, and that
//! transition table is the single invariant governing visibility in the
//! whole engine. Assigning a status field directly anywhere outside the
//! banned index (which mirrors authoritative storage) is a correctness bug.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// Status of a namespace node (directory or metric).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum MetricStatus {
    /// Default status on creation. Visible, automatic.
    Simple,
    /// Banned by explicit administrative action: the node and everything
    /// under it disappears from search, and its samples stop being
    /// accepted. Only an explicit `Approved` reopens it.
    Ban,
    /// Explicitly approved; resists automatic downgrades.
    Approved,
    /// Explicitly hidden; reappears as soon as a new sample arrives.
    Hidden,
    /// Automatically hidden because every child is invisible. Reopens to
    /// `Simple` when a visible child (re)appears. Never persisted as user
    /// intent.
    AutoHidden,
    /// Automatically banned (directory fan-out exceeded the cardinality
    /// limit). Lifted only by a handmade status. Never persisted as user
    /// intent.
    AutoBan,
}

impl MetricStatus {
    /// Returns whether nodes with this status appear in search results.
    ///
    /// An invisible directory also hides everything below it.
    #[must_use]
    pub const fn visible(self) -> bool {
        matches!(self, Self::Simple | Self::Approved)
    }

    /// Returns whether this status was set by explicit human/API action,
    /// as opposed to being derived automatically by the system.
    #[must_use]
    pub const fn handmade(self) -> bool {
        matches!(self, Self::Ban | Self::Approved | Self::Hidden)
    }

    /// The proposed statuses this status refuses to be overwritten by.
    #[must_use]
    pub const fn blocked_transitions(self) -> &'static [MetricStatus] {
        match self {
            Self::Ban | Self::AutoBan | Self::Approved => &[Self::Simple, Self::AutoHidden],
            Self::Hidden => &[Self::AutoHidden],
            Self::Simple | Self::AutoHidden => &[],
        }
    }

    /// Resolves a proposed status change against the transition graph.
    ///
    /// Returns `old` unchanged when the proposal is blocked, the proposal
    /// otherwise. Pure and total; must be called on every status mutation.
    #[must_use]
    pub fn select(old: Self, proposed: Self) -> Self {
        if old == proposed {
            return old;
        }
        if old.blocked_transitions().contains(&proposed) {
            old
        } else {
            proposed
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Simple,
            1 => Self::Ban,
            2 => Self::Approved,
            3 => Self::Hidden,
            4 => Self::AutoHidden,
            _ => Self::AutoBan,
        }
    }

    /// Canonical storage/wire spelling of this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Simple => "SIMPLE",
            Self::Ban => "BAN",
            Self::Approved => "APPROVED",
            Self::Hidden => "HIDDEN",
            Self::AutoHidden => "AUTO_HIDDEN",
            Self::AutoBan => "AUTO_BAN",
        }
    }
}

impl fmt::Display for MetricStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status cell with atomic read-modify-write through the transition graph.
///
/// Concurrent writers may interleave, but each writer reads a fresh prior
/// status and applies [`MetricStatus::select`] in a single compare-and-swap,
/// so no update is lost.
#[derive(Debug)]
pub struct AtomicStatus(AtomicU8);

impl AtomicStatus {
    /// Creates a new cell holding `status`.
    #[must_use]
    pub const fn new(status: MetricStatus) -> Self {
        Self(AtomicU8::new(status as u8))
    }

    /// Returns the current status.
    #[must_use]
    pub fn load(&self) -> MetricStatus {
        MetricStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Sets the status directly, bypassing the transition graph.
    ///
    /// Reserved for the banned index, which always reflects the latest
    /// known truth as reported by the authoritative store.
    pub fn store(&self, status: MetricStatus) {
        self.0.store(status as u8, Ordering::Release);
    }

    /// Applies `proposed` through [`MetricStatus::select`] atomically.
    ///
    /// Returns `(old, new)`; `old == new` means the proposal was blocked
    /// (or was a no-op).
    pub fn apply(&self, proposed: MetricStatus) -> (MetricStatus, MetricStatus) {
        let outcome = self.0.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            let current = MetricStatus::from_u8(current);
            let next = MetricStatus::select(current, proposed);
            if next == current {
                None
            } else {
                Some(next as u8)
            }
        });
        match outcome {
            Ok(old) => {
                let old = MetricStatus::from_u8(old);
                (old, MetricStatus::select(old, proposed))
            }
            Err(unchanged) => {
                let unchanged = MetricStatus::from_u8(unchanged);
                (unchanged, unchanged)
            }
        }
    }

    /// Swaps in `status` directly and returns the previous value.
    pub fn swap(&self, status: MetricStatus) -> MetricStatus {
        MetricStatus::from_u8(self.0.swap(status as u8, Ordering::AcqRel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [MetricStatus; 6] = [
        MetricStatus::Simple,
        MetricStatus::Ban,
        MetricStatus::Approved,
        MetricStatus::Hidden,
        MetricStatus::AutoHidden,
        MetricStatus::AutoBan,
    ];

    #[test]
    fn test_select_is_identity_on_equal_statuses() {
        for status in ALL {
            assert_eq!(MetricStatus::select(status, status), status);
        }
    }

    #[test]
    fn test_select_honors_restricted_edges() {
        for old in ALL {
            for proposed in ALL {
                let expected = if old == proposed || old.blocked_transitions().contains(&proposed)
                {
                    old
                } else {
                    proposed
                };
                assert_eq!(
                    MetricStatus::select(old, proposed),
                    expected,
                    "select({old:?}, {proposed:?})"
                );
            }
        }
    }

    #[test]
    fn test_ban_resists_automatic_reopen() {
        assert_eq!(
            MetricStatus::select(MetricStatus::Ban, MetricStatus::Simple),
            MetricStatus::Ban
        );
        assert_eq!(
            MetricStatus::select(MetricStatus::Ban, MetricStatus::AutoHidden),
            MetricStatus::Ban
        );
        // An explicit approval does reopen a ban.
        assert_eq!(
            MetricStatus::select(MetricStatus::Ban, MetricStatus::Approved),
            MetricStatus::Approved
        );
    }

    #[test]
    fn test_hidden_reopens_on_new_value() {
        // A new sample proposes SIMPLE, which HIDDEN does not block.
        assert_eq!(
            MetricStatus::select(MetricStatus::Hidden, MetricStatus::Simple),
            MetricStatus::Simple
        );
        assert_eq!(
            MetricStatus::select(MetricStatus::Hidden, MetricStatus::AutoHidden),
            MetricStatus::Hidden
        );
    }

    #[test]
    fn test_visibility_and_handmade_partition() {
        assert!(MetricStatus::Simple.visible());
        assert!(MetricStatus::Approved.visible());
        for status in [
            MetricStatus::Ban,
            MetricStatus::Hidden,
            MetricStatus::AutoHidden,
            MetricStatus::AutoBan,
        ] {
            assert!(!status.visible(), "{status:?} should be invisible");
        }
        for status in ALL {
            assert_eq!(
                status.handmade(),
                matches!(
                    status,
                    MetricStatus::Ban | MetricStatus::Approved | MetricStatus::Hidden
                )
            );
        }
    }

    #[test]
    fn test_atomic_apply_reports_old_and_new() {
        let cell = AtomicStatus::new(MetricStatus::Simple);
        let (old, new) = cell.apply(MetricStatus::Ban);
        assert_eq!(old, MetricStatus::Simple);
        assert_eq!(new, MetricStatus::Ban);

        // Blocked edge: BAN -> SIMPLE keeps BAN.
        let (old, new) = cell.apply(MetricStatus::Simple);
        assert_eq!(old, MetricStatus::Ban);
        assert_eq!(new, MetricStatus::Ban);
        assert_eq!(cell.load(), MetricStatus::Ban);
    }

    #[test]
    fn test_serde_round_trip_uses_storage_spelling() {
        let json = serde_json::to_string(&MetricStatus::AutoHidden).expect("serialize");
        assert_eq!(json, "\"AUTO_HIDDEN\"");
        let parsed: MetricStatus = serde_json::from_str("\"BAN\"").expect("deserialize");
        assert_eq!(parsed, MetricStatus::Ban);
    }
}
