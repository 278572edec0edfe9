//! The assembly flag.
//!
//! A single atomic state word tells whether an assembly (or a janitor sweep)
//! currently owns the segment directory. Acquisition is one compare-and-swap
//! from `Idle`, so two triggers can never both win. The returned guard puts
//! the word back to `Idle` when dropped, on every exit path.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Stage of the assembly state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum AssemblyState {
    /// Nothing owns the segment directory.
    Idle = 0,
    /// A trigger was accepted.
    Triggered = 1,
    /// Scanning the directory and choosing the window.
    Selecting = 2,
    /// The muxer is joining the window.
    Concatenating = 3,
    /// Removing the manifest and stale segments.
    Cleaning = 4,
    /// The janitor is pruning between triggers.
    Sweeping = 5,
}

impl AssemblyState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Triggered,
            2 => Self::Selecting,
            3 => Self::Concatenating,
            4 => Self::Cleaning,
            5 => Self::Sweeping,
            _ => Self::Idle,
        }
    }
}

impl fmt::Display for AssemblyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Triggered => write!(f, "triggered"),
            Self::Selecting => write!(f, "selecting"),
            Self::Concatenating => write!(f, "concatenating"),
            Self::Cleaning => write!(f, "cleaning"),
            Self::Sweeping => write!(f, "sweeping"),
        }
    }
}

/// Process-wide "assembly in progress" flag.
///
/// Cloning shares the same underlying state.
#[derive(Debug, Clone, Default)]
pub struct AssemblyFlag {
    state: Arc<AtomicU8>,
}

impl AssemblyFlag {
    /// Create a cleared flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the flag for an assembly. Returns `None` if it is already set.
    #[must_use]
    pub fn try_acquire(&self) -> Option<AssemblyGuard> {
        self.acquire_as(AssemblyState::Triggered)
    }

    /// Claim the flag for a janitor sweep. Returns `None` if it is already set.
    #[must_use]
    pub fn try_acquire_sweep(&self) -> Option<AssemblyGuard> {
        self.acquire_as(AssemblyState::Sweeping)
    }

    fn acquire_as(&self, state: AssemblyState) -> Option<AssemblyGuard> {
        self.state
            .compare_exchange(
                AssemblyState::Idle as u8,
                state as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok()
            .map(|_| AssemblyGuard {
                state: Arc::clone(&self.state),
            })
    }

    /// The current stage.
    #[must_use]
    pub fn state(&self) -> AssemblyState {
        AssemblyState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Check if anything currently owns the flag.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.state() != AssemblyState::Idle
    }
}

/// Ownership of the assembly flag. Clears the flag when dropped.
#[derive(Debug)]
pub struct AssemblyGuard {
    state: Arc<AtomicU8>,
}

impl AssemblyGuard {
    /// Move the state machine to `state`.
    pub fn advance(&self, state: AssemblyState) {
        if state != AssemblyState::Idle {
            self.state.store(state as u8, Ordering::Release);
        }
    }

    /// The stage this guard last recorded.
    #[must_use]
    pub fn state(&self) -> AssemblyState {
        AssemblyState::from_u8(self.state.load(Ordering::Acquire))
    }
}

impl Drop for AssemblyGuard {
    fn drop(&mut self) {
        self.state
            .store(AssemblyState::Idle as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_flag_is_idle() {
        let flag = AssemblyFlag::new();
        assert_eq!(flag.state(), AssemblyState::Idle);
        assert!(!flag.is_set());
    }

    #[test]
    fn test_second_acquire_is_rejected() {
        let flag = AssemblyFlag::new();
        let guard = flag.try_acquire();
        assert!(guard.is_some());
        assert!(flag.try_acquire().is_none());
        assert!(flag.try_acquire_sweep().is_none());
        assert_eq!(flag.state(), AssemblyState::Triggered);
    }

    #[test]
    fn test_drop_clears_flag() {
        let flag = AssemblyFlag::new();
        {
            let guard = flag.try_acquire().unwrap();
            guard.advance(AssemblyState::Concatenating);
            assert_eq!(flag.state(), AssemblyState::Concatenating);
        }
        assert!(!flag.is_set());
        assert!(flag.try_acquire().is_some());
    }

    #[test]
    fn test_advance_to_idle_is_ignored() {
        let flag = AssemblyFlag::new();
        let guard = flag.try_acquire().unwrap();
        guard.advance(AssemblyState::Idle);
        assert!(flag.is_set());
        assert_eq!(guard.state(), AssemblyState::Triggered);
    }

    #[test]
    fn test_sweep_blocks_assembly() {
        let flag = AssemblyFlag::new();
        let sweep = flag.try_acquire_sweep().unwrap();
        assert_eq!(flag.state(), AssemblyState::Sweeping);
        assert!(flag.try_acquire().is_none());
        drop(sweep);
        assert!(flag.try_acquire().is_some());
    }

    #[test]
    fn test_clones_share_state() {
        let flag = AssemblyFlag::new();
        let other = flag.clone();
        let _guard = flag.try_acquire().unwrap();
        assert!(other.is_set());
    }

    #[test]
    fn test_only_one_thread_wins() {
        let flag = AssemblyFlag::new();
        let barrier = Arc::new(std::sync::Barrier::new(8));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let flag = flag.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    let guard = flag.try_acquire();
                    // Hold the flag until every thread has tried
                    barrier.wait();
                    guard.is_some()
                })
            })
            .collect();

        let winners = threads
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert!(!flag.is_set());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(AssemblyState::Concatenating.to_string(), "concatenating");
        assert_eq!(AssemblyState::Idle.to_string(), "idle");
    }
}
