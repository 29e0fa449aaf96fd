use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{
    DEFAULT_TIMER_MINUTES, DEFAULT_TIMER_TITLE, DurationField, Timer, total_seconds,
};
use crate::scheduler::{JobHandle, Scheduler};

pub const TICK_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerJob {
    Tick(Uuid),
    ClearFinished(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    Ticked(Uuid),
    Finished(Uuid),
    FinishedFlagCleared(Uuid),
}

#[derive(Debug, Clone)]
pub struct TimerSettings {
    pub default_minutes: u32,
    /// How long the transient "finished" flag stays up.
    pub finished_flash: Duration,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            default_minutes: DEFAULT_TIMER_MINUTES,
            finished_flash: Duration::from_secs(5),
        }
    }
}

/// Owns the timer records together with their scheduling state.
///
/// A timer has an armed tick exactly when `is_running` is set. Only
/// `pause`, `reset`, `delete` and expiry disarm a tick.
#[derive(Debug)]
pub struct TimerStore {
    timers: Vec<Timer>,
    ticks: HashMap<Uuid, JobHandle>,
    flashes: HashMap<Uuid, JobHandle>,
    scheduler: Scheduler<TimerJob>,
    settings: TimerSettings,
}

impl TimerStore {
    pub fn new(settings: TimerSettings) -> Self {
        Self {
            timers: vec![],
            ticks: HashMap::new(),
            flashes: HashMap::new(),
            scheduler: Scheduler::new(),
            settings,
        }
    }

    /// Rebuilds the store from persisted records. Running timers with time
    /// left get a fresh tick; records breaking an invariant are repaired.
    /// Returns whether any record changed and needs to be written back.
    #[instrument(skip(timers, settings), fields(count = timers.len()))]
    pub fn restore(timers: Vec<Timer>, settings: TimerSettings) -> (Self, bool) {
        let mut store = Self::new(settings);
        let mut repaired = false;

        for mut timer in timers {
            repaired |= repair(&mut timer);
            if timer.is_running {
                info!(timer = %timer.id, remaining = timer.remaining_time, "re-arming running timer");
                let handle = store
                    .scheduler
                    .schedule_every(TICK_PERIOD, TimerJob::Tick(timer.id));
                store.ticks.insert(timer.id, handle);
            }
            store.timers.push(timer);
        }

        (store, repaired)
    }

    pub fn timers(&self) -> &[Timer] {
        &self.timers
    }

    pub fn get(&self, id: Uuid) -> Option<&Timer> {
        self.timers.iter().find(|timer| timer.id == id)
    }

    pub fn is_armed(&self, id: Uuid) -> bool {
        self.ticks
            .get(&id)
            .is_some_and(|handle| self.scheduler.is_scheduled(*handle))
    }

    pub fn is_flagged_finished(&self, id: Uuid) -> bool {
        self.flashes.contains_key(&id)
    }

    pub fn running_count(&self) -> usize {
        self.timers.iter().filter(|timer| timer.is_running).count()
    }

    pub fn now(&self) -> Duration {
        self.scheduler.now()
    }

    #[instrument(skip(self))]
    pub fn create(&mut self, title: Option<&str>) -> Uuid {
        let total = self.settings.default_minutes.saturating_mul(60);
        let title = normalize_title(title.unwrap_or_default());
        let timer = Timer::new(title, total / 3600, (total % 3600) / 60, total % 60);
        let id = timer.id;
        self.timers.push(timer);
        debug!(%id, count = self.timers.len(), "timer created");
        id
    }

    /// `Ok(false)` when the id is unknown.
    #[instrument(skip(self))]
    pub fn start(&mut self, id: Uuid) -> Result<bool, StoreError> {
        let Some(timer) = self.timers.iter_mut().find(|timer| timer.id == id) else {
            return Ok(false);
        };
        if timer.is_running {
            return Err(StoreError::TimerRunning);
        }
        if timer.remaining_time == 0 {
            return Err(StoreError::TimerExpired);
        }

        timer.is_running = true;
        timer.is_paused = false;
        self.clear_flash(id);
        self.arm(id);
        info!(%id, "timer started");
        Ok(true)
    }

    #[instrument(skip(self))]
    pub fn pause(&mut self, id: Uuid) -> Result<bool, StoreError> {
        let Some(timer) = self.timers.iter_mut().find(|timer| timer.id == id) else {
            return Ok(false);
        };
        if !timer.is_running {
            return Err(StoreError::TimerNotRunning);
        }

        timer.is_running = false;
        timer.is_paused = true;
        info!(%id, remaining = timer.remaining_time, "timer paused");
        self.disarm(id);
        Ok(true)
    }

    #[instrument(skip(self))]
    pub fn reset(&mut self, id: Uuid) -> bool {
        let Some(timer) = self.timers.iter_mut().find(|timer| timer.id == id) else {
            return false;
        };

        timer.is_running = false;
        timer.is_paused = false;
        timer.remaining_time = timer.initial_time;
        self.disarm(id);
        self.clear_flash(id);
        info!(%id, "timer reset");
        true
    }

    /// Cancels the timer's jobs before dropping it so nothing scheduled can
    /// reach a removed record.
    #[instrument(skip(self))]
    pub fn delete(&mut self, id: Uuid) -> bool {
        let Some(idx) = self.timers.iter().position(|timer| timer.id == id) else {
            return false;
        };

        self.disarm(id);
        self.clear_flash(id);
        self.timers.remove(idx);
        info!(%id, "timer deleted");
        true
    }

    #[instrument(skip(self))]
    pub fn set_duration(
        &mut self,
        id: Uuid,
        field: DurationField,
        value: i64,
    ) -> Result<bool, StoreError> {
        let Some(timer) = self.timers.iter_mut().find(|timer| timer.id == id) else {
            return Ok(false);
        };
        if timer.is_running {
            return Err(StoreError::TimerLocked);
        }

        let value = field.clamp(value);
        match field {
            DurationField::Hours => timer.hours = value,
            DurationField::Minutes => timer.minutes = value,
            DurationField::Seconds => timer.seconds = value,
        }
        timer.initial_time = total_seconds(timer.hours, timer.minutes, timer.seconds);
        timer.remaining_time = timer.initial_time;
        self.clear_flash(id);
        debug!(%id, %field, value, "timer duration changed");
        Ok(true)
    }

    #[instrument(skip(self))]
    pub fn set_title(&mut self, id: Uuid, title: &str) -> bool {
        let Some(timer) = self.timers.iter_mut().find(|timer| timer.id == id) else {
            return false;
        };
        timer.title = normalize_title(title);
        true
    }

    pub fn next_due(&mut self) -> Option<Duration> {
        self.scheduler.next_due()
    }

    pub fn advance_to(&mut self, until: Duration) {
        self.scheduler.advance_to(until);
    }

    /// Fires the earliest job due at or before `until`. `None` means either
    /// nothing was due or the job no longer applied.
    pub fn fire_next(&mut self, until: Duration) -> Option<TimerEvent> {
        let (_, job) = self.scheduler.pop_due(until)?;
        match job {
            TimerJob::Tick(id) => self.tick(id),
            TimerJob::ClearFinished(id) => {
                self.flashes.remove(&id)?;
                debug!(%id, "finished flag cleared");
                Some(TimerEvent::FinishedFlagCleared(id))
            }
        }
    }

    fn tick(&mut self, id: Uuid) -> Option<TimerEvent> {
        let Some(timer) = self.timers.iter_mut().find(|timer| timer.id == id) else {
            warn!(%id, "tick for missing timer");
            self.disarm(id);
            return None;
        };
        if !timer.is_running {
            warn!(%id, "tick for stopped timer");
            self.disarm(id);
            return None;
        }

        timer.remaining_time = timer.remaining_time.saturating_sub(1);
        if timer.remaining_time > 0 {
            return Some(TimerEvent::Ticked(id));
        }

        timer.is_running = false;
        timer.is_paused = false;
        self.disarm(id);
        self.clear_flash(id);
        let flash = self
            .scheduler
            .schedule_once(self.settings.finished_flash, TimerJob::ClearFinished(id));
        self.flashes.insert(id, flash);
        info!(%id, "timer finished");
        Some(TimerEvent::Finished(id))
    }

    fn arm(&mut self, id: Uuid) {
        self.disarm(id);
        let handle = self
            .scheduler
            .schedule_every(TICK_PERIOD, TimerJob::Tick(id));
        self.ticks.insert(id, handle);
    }

    fn disarm(&mut self, id: Uuid) {
        if let Some(handle) = self.ticks.remove(&id) {
            self.scheduler.cancel(handle);
        }
    }

    fn clear_flash(&mut self, id: Uuid) {
        if let Some(handle) = self.flashes.remove(&id) {
            self.scheduler.cancel(handle);
        }
    }
}

fn normalize_title(title: &str) -> String {
    let title = title.trim();
    if title.is_empty() {
        DEFAULT_TIMER_TITLE.to_string()
    } else {
        title.to_string()
    }
}

fn repair(timer: &mut Timer) -> bool {
    let before = timer.clone();

    timer.hours = DurationField::Hours.clamp(timer.hours.into());
    timer.minutes = DurationField::Minutes.clamp(timer.minutes.into());
    timer.seconds = DurationField::Seconds.clamp(timer.seconds.into());
    timer.initial_time = total_seconds(timer.hours, timer.minutes, timer.seconds);
    timer.remaining_time = timer.remaining_time.min(timer.initial_time);
    if timer.is_running {
        timer.is_paused = false;
        if timer.remaining_time == 0 {
            timer.is_running = false;
        }
    }

    let changed = *timer != before;
    if changed {
        warn!(timer = %timer.id, "repaired inconsistent timer record");
    }
    changed
}
