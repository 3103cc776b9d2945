use std::collections::HashSet;

use borg_core::ThreadId;

/// Why a file was not claimed this scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimDecision {
    Claimed,
    /// Global bound reached — stop scanning, nothing later can claim
    /// either.
    AtCapacity,
    /// This thread already has a message in flight — skip, keep scanning.
    ThreadBusy,
    /// One heartbeat is already in flight — skip, keep scanning.
    HeartbeatBusy,
}

/// The scheduler's entire mutable state. The engine holds it behind one
/// mutex and is the only mutator.
#[derive(Debug, Default)]
pub struct SchedulerState {
    pub active_count: usize,
    pub active_threads: HashSet<ThreadId>,
    pub active_heartbeat_count: usize,
    pub scanning: bool,
    pub shutting_down: bool,
}

impl SchedulerState {
    /// Claim one message against the concurrency contract.
    ///
    /// `thread` is `None` for files whose cheap parse failed — they claim
    /// capacity but no thread slot (strict validation will dead-letter
    /// them immediately).
    pub fn try_claim(
        &mut self,
        thread: Option<ThreadId>,
        heartbeat: bool,
        max_concurrent: usize,
    ) -> ClaimDecision {
        if self.active_count >= max_concurrent {
            return ClaimDecision::AtCapacity;
        }
        if let Some(thread) = thread {
            if self.active_threads.contains(&thread) {
                return ClaimDecision::ThreadBusy;
            }
        }
        if heartbeat && self.active_heartbeat_count >= 1 {
            return ClaimDecision::HeartbeatBusy;
        }

        self.active_count += 1;
        if let Some(thread) = thread {
            self.active_threads.insert(thread);
        }
        if heartbeat {
            self.active_heartbeat_count += 1;
        }
        ClaimDecision::Claimed
    }

    /// Release a claim made by `try_claim` with the same arguments.
    pub fn release(&mut self, thread: Option<ThreadId>, heartbeat: bool) {
        self.active_count = self.active_count.saturating_sub(1);
        if let Some(thread) = thread {
            self.active_threads.remove(&thread);
        }
        if heartbeat {
            self.active_heartbeat_count = self.active_heartbeat_count.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_thread_exclusion() {
        let mut st = SchedulerState::default();
        assert_eq!(
            st.try_claim(Some(ThreadId(7)), false, 4),
            ClaimDecision::Claimed
        );
        assert_eq!(
            st.try_claim(Some(ThreadId(7)), false, 4),
            ClaimDecision::ThreadBusy
        );
        assert_eq!(
            st.try_claim(Some(ThreadId(8)), false, 4),
            ClaimDecision::Claimed
        );
        st.release(Some(ThreadId(7)), false);
        assert_eq!(
            st.try_claim(Some(ThreadId(7)), false, 4),
            ClaimDecision::Claimed
        );
    }

    #[test]
    fn global_bound_is_respected() {
        let mut st = SchedulerState::default();
        assert_eq!(
            st.try_claim(Some(ThreadId(1)), false, 2),
            ClaimDecision::Claimed
        );
        assert_eq!(
            st.try_claim(Some(ThreadId(2)), false, 2),
            ClaimDecision::Claimed
        );
        assert_eq!(
            st.try_claim(Some(ThreadId(3)), false, 2),
            ClaimDecision::AtCapacity
        );
        assert_eq!(st.active_count, 2);
    }

    #[test]
    fn at_most_one_heartbeat_in_flight() {
        let mut st = SchedulerState::default();
        assert_eq!(
            st.try_claim(Some(ThreadId(2)), true, 8),
            ClaimDecision::Claimed
        );
        assert_eq!(
            st.try_claim(Some(ThreadId(3)), true, 8),
            ClaimDecision::HeartbeatBusy
        );
        // a user message on another thread still fits
        assert_eq!(
            st.try_claim(Some(ThreadId(4)), false, 8),
            ClaimDecision::Claimed
        );
        st.release(Some(ThreadId(2)), true);
        assert_eq!(
            st.try_claim(Some(ThreadId(3)), true, 8),
            ClaimDecision::Claimed
        );
    }

    #[test]
    fn headless_files_claim_capacity_only() {
        let mut st = SchedulerState::default();
        assert_eq!(st.try_claim(None, false, 2), ClaimDecision::Claimed);
        assert!(st.active_threads.is_empty());
        st.release(None, false);
        assert_eq!(st.active_count, 0);
    }
}
