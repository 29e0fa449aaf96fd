//! Cancellable deferred and periodic jobs on a virtual clock.
//!
//! The scheduler never sleeps. Its owner advances the clock, pops due jobs
//! one at a time and applies them, which keeps every state transition on a
//! single sequencing context and makes the timing fully deterministic under
//! test. A real-time driver only has to translate wall-clock elapsed time
//! into `pop_due`/`advance_to` calls.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

use tracing::trace;

/// Identifies one scheduled job until it is cancelled or, for one-shot
/// jobs, fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobHandle(u64);

#[derive(Debug)]
struct Entry<J> {
    job: J,
    due: u64,
    period: Option<u64>,
}

#[derive(Debug)]
pub struct Scheduler<J> {
    now: u64,
    next_handle: u64,
    entries: HashMap<JobHandle, Entry<J>>,
    queue: BinaryHeap<Reverse<(u64, JobHandle)>>,
}

impl<J> Default for Scheduler<J> {
    fn default() -> Self {
        Self {
            now: 0,
            next_handle: 1,
            entries: HashMap::new(),
            queue: BinaryHeap::new(),
        }
    }
}

impl<J: Clone> Scheduler<J> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Duration {
        Duration::from_millis(self.now)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs `job` once, `delay` after the current clock.
    pub fn schedule_once(&mut self, delay: Duration, job: J) -> JobHandle {
        self.insert(to_millis(delay), None, job)
    }

    /// Runs `job` every `period`, first at `now + period`. Later firings are
    /// placed on the absolute cadence of the first one, so a late pop never
    /// shifts the schedule.
    pub fn schedule_every(&mut self, period: Duration, job: J) -> JobHandle {
        let period = to_millis(period).max(1);
        self.insert(period, Some(period), job)
    }

    /// Returns whether the handle was still scheduled.
    pub fn cancel(&mut self, handle: JobHandle) -> bool {
        let removed = self.entries.remove(&handle).is_some();
        if removed {
            trace!(?handle, "cancelled job");
        }
        removed
    }

    pub fn is_scheduled(&self, handle: JobHandle) -> bool {
        self.entries.contains_key(&handle)
    }

    pub fn next_due(&mut self) -> Option<Duration> {
        self.prune();
        self.queue
            .peek()
            .map(|Reverse((due, _))| Duration::from_millis(*due))
    }

    /// Pops the earliest job due at or before `until`, moving the clock to
    /// its due time. Periodic jobs are re-armed before they are returned.
    pub fn pop_due(&mut self, until: Duration) -> Option<(JobHandle, J)> {
        let until = to_millis(until);
        self.prune();
        let Reverse((due, handle)) = *self.queue.peek()?;
        if due > until {
            return None;
        }
        self.queue.pop();
        self.now = self.now.max(due);

        let period = self.entries.get(&handle)?.period;
        match period {
            Some(period) => {
                let entry = self.entries.get_mut(&handle)?;
                entry.due = due + period;
                let job = entry.job.clone();
                self.queue.push(Reverse((due + period, handle)));
                trace!(?handle, due, "fired periodic job");
                Some((handle, job))
            }
            None => {
                let entry = self.entries.remove(&handle)?;
                trace!(?handle, due, "fired one-shot job");
                Some((handle, entry.job))
            }
        }
    }

    pub fn advance_to(&mut self, until: Duration) {
        self.now = self.now.max(to_millis(until));
    }

    /// Removes every job, returning the one-shot jobs in due order.
    pub fn drain_once(&mut self) -> Vec<J> {
        let mut pending: Vec<(u64, JobHandle, J)> = self
            .entries
            .drain()
            .filter(|(_, entry)| entry.period.is_none())
            .map(|(handle, entry)| (entry.due, handle, entry.job))
            .collect();
        self.queue.clear();
        pending.sort_by_key(|(due, handle, _)| (*due, *handle));
        pending.into_iter().map(|(_, _, job)| job).collect()
    }

    fn insert(&mut self, delay: u64, period: Option<u64>, job: J) -> JobHandle {
        let handle = JobHandle(self.next_handle);
        self.next_handle += 1;
        let due = self.now.saturating_add(delay);
        self.entries.insert(handle, Entry { job, due, period });
        self.queue.push(Reverse((due, handle)));
        trace!(?handle, due, ?period, "scheduled job");
        handle
    }

    // Heap entries of cancelled jobs, or of periodic jobs that were
    // re-armed since, are skipped lazily.
    fn prune(&mut self) {
        while let Some(Reverse((due, handle))) = self.queue.peek().copied() {
            match self.entries.get(&handle) {
                Some(entry) if entry.due == due => break,
                _ => {
                    self.queue.pop();
                }
            }
        }
    }
}

fn to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::Scheduler;

    fn secs(value: u64) -> Duration {
        Duration::from_secs(value)
    }

    fn drain(scheduler: &mut Scheduler<&'static str>, until: Duration) -> Vec<&'static str> {
        let mut fired = Vec::new();
        while let Some((_, job)) = scheduler.pop_due(until) {
            fired.push(job);
        }
        scheduler.advance_to(until);
        fired
    }

    #[test]
    fn one_shot_fires_once_after_delay() {
        let mut scheduler = Scheduler::new();
        let handle = scheduler.schedule_once(Duration::from_millis(300), "remove");

        assert!(drain(&mut scheduler, Duration::from_millis(299)).is_empty());
        assert!(scheduler.is_scheduled(handle));
        assert_eq!(drain(&mut scheduler, Duration::from_millis(300)), vec!["remove"]);
        assert!(!scheduler.is_scheduled(handle));
        assert!(drain(&mut scheduler, secs(10)).is_empty());
    }

    #[test]
    fn periodic_job_keeps_its_cadence_when_popped_late() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule_every(secs(1), "tick");

        // a driver that wakes up late catches up tick by tick
        assert_eq!(drain(&mut scheduler, Duration::from_millis(3500)).len(), 3);
        assert_eq!(scheduler.next_due(), Some(secs(4)));
        assert_eq!(drain(&mut scheduler, secs(4)).len(), 1);
    }

    #[test]
    fn cancelled_jobs_never_fire() {
        let mut scheduler = Scheduler::new();
        let tick = scheduler.schedule_every(secs(1), "tick");
        scheduler.schedule_once(secs(5), "flash");

        assert_eq!(drain(&mut scheduler, secs(2)), vec!["tick", "tick"]);
        assert!(scheduler.cancel(tick));
        assert!(!scheduler.cancel(tick));
        assert_eq!(drain(&mut scheduler, secs(10)), vec!["flash"]);
        assert!(scheduler.is_empty());
        assert_eq!(scheduler.next_due(), None);
    }

    #[test]
    fn jobs_due_together_fire_in_schedule_order() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule_once(secs(1), "first");
        scheduler.schedule_once(secs(1), "second");
        scheduler.schedule_once(Duration::from_millis(500), "earliest");

        assert_eq!(
            drain(&mut scheduler, secs(1)),
            vec!["earliest", "first", "second"]
        );
    }

    #[test]
    fn delays_are_relative_to_the_advanced_clock() {
        let mut scheduler = Scheduler::new();
        scheduler.advance_to(secs(10));
        scheduler.schedule_once(secs(5), "later");

        assert_eq!(scheduler.now(), secs(10));
        assert_eq!(scheduler.next_due(), Some(secs(15)));
    }

    #[test]
    fn drain_once_returns_pending_one_shots_in_due_order() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule_every(secs(1), "tick");
        scheduler.schedule_once(secs(3), "b");
        scheduler.schedule_once(secs(2), "a");

        assert_eq!(scheduler.drain_once(), vec!["a", "b"]);
        assert!(scheduler.is_empty());
    }
}
