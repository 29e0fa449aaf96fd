//! The application controller.
//!
//! [`App`] owns the window collection, the timer store, the theme and the
//! collaborators. Every operation follows the same sequence: validate,
//! mutate, persist, then reconcile the before and after state into the
//! view updates it returns. Deferred deletions and timer jobs share one
//! virtual clock driven by [`App::advance`].

use std::collections::HashSet;
use std::mem;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::effects::{CompletionEffects, announce_finished};
use crate::error::StoreError;
use crate::model::{DurationField, ListWindow, Timer, WindowStats, parse_field_input};
use crate::prompt::Prompter;
use crate::reconcile::{Mutation, RemovalTarget, ViewState, ViewUpdate, reconcile};
use crate::scheduler::Scheduler;
use crate::storage::Persistence;
use crate::theme::{DEFAULT_THEME, ThemeState};
use crate::timers::{TimerEvent, TimerSettings, TimerStore};
use crate::windows;

const CONFIRM_DELETE_WINDOW: &str = "Delete this list and all of its tasks?";
const CONFIRM_DELETE_TASK: &str = "Delete this task?";
const CONFIRM_RESET_TASKS: &str = "Mark every task in this list as not done?";
const CONFIRM_DELETE_TIMER: &str = "Delete this timer?";
const PROMPT_RENAME: &str = "New list title:";

#[derive(Debug, Clone)]
pub struct AppOptions {
    pub default_theme: String,
    pub timer: TimerSettings,
    pub window_removal_delay: Duration,
    pub task_removal_delay: Duration,
    /// Ask the prompter before destructive operations.
    pub confirm: bool,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            default_theme: DEFAULT_THEME.to_string(),
            timer: TimerSettings::default(),
            window_removal_delay: Duration::from_millis(300),
            task_removal_delay: Duration::from_millis(250),
            confirm: true,
        }
    }
}

impl AppOptions {
    pub fn from_config(cfg: &Config) -> Self {
        let defaults = Self::default();
        let default_minutes = cfg
            .get_u64("timer.minutes")
            .and_then(|value| u32::try_from(value).ok())
            .unwrap_or(defaults.timer.default_minutes);
        Self {
            default_theme: cfg.get("theme.default").unwrap_or(defaults.default_theme),
            timer: TimerSettings {
                default_minutes,
                finished_flash: cfg
                    .get_secs("timer.flash")
                    .unwrap_or(defaults.timer.finished_flash),
            },
            window_removal_delay: cfg
                .get_millis("window.removal.delay")
                .unwrap_or(defaults.window_removal_delay),
            task_removal_delay: cfg
                .get_millis("task.removal.delay")
                .unwrap_or(defaults.task_removal_delay),
            confirm: cfg.get_bool("confirm").unwrap_or(defaults.confirm),
        }
    }
}

pub struct App {
    persistence: Persistence,
    windows: Vec<ListWindow>,
    timers: TimerStore,
    theme: ThemeState,
    timers_panel_open: bool,
    removals: Scheduler<RemovalTarget>,
    pending_windows: HashSet<Uuid>,
    pending_tasks: HashSet<(Uuid, Uuid)>,
    clock: Duration,
    prompter: Box<dyn Prompter>,
    effects: Box<dyn CompletionEffects>,
    options: AppOptions,
}

impl App {
    /// Loads persisted state and brings it to a consistent starting point:
    /// at least one window, running timers re-armed, repaired timer records
    /// written back.
    #[instrument(skip_all)]
    pub fn open(
        mut persistence: Persistence,
        prompter: impl Prompter + 'static,
        effects: impl CompletionEffects + 'static,
        options: AppOptions,
    ) -> Self {
        let mut windows = persistence.load_windows();
        if windows.is_empty() {
            info!("no stored lists; creating the first one");
            windows = windows::create_window(&[], Utc::now()).0;
            persistence.save_windows(&windows);
        }

        let (timers, repaired) = TimerStore::restore(persistence.load_timers(), options.timer.clone());
        if repaired {
            persistence.save_timers(timers.timers());
        }

        let theme = ThemeState::new(
            persistence
                .load_theme()
                .unwrap_or_else(|| options.default_theme.clone()),
        );

        let mut effects: Box<dyn CompletionEffects> = Box::new(effects);
        if let Err(err) = effects.prepare() {
            warn!(error = ?err, "failed preparing completion effects");
        }

        info!(
            windows = windows.len(),
            timers = timers.timers().len(),
            running = timers.running_count(),
            theme = theme.name(),
            "application state loaded"
        );

        Self {
            persistence,
            windows,
            timers,
            theme,
            timers_panel_open: false,
            removals: Scheduler::new(),
            pending_windows: HashSet::new(),
            pending_tasks: HashSet::new(),
            clock: Duration::ZERO,
            prompter: Box::new(prompter),
            effects,
            options,
        }
    }

    /// Everything a freshly attached view needs to draw.
    pub fn initial_view(&self) -> Vec<ViewUpdate> {
        vec![
            ViewUpdate::ApplyTheme {
                name: self.theme.name().to_string(),
                active: self.theme.active_control(),
            },
            ViewUpdate::RenderWindows,
            ViewUpdate::RenderTimers,
            ViewUpdate::SetTimersPanel {
                open: self.timers_panel_open,
            },
        ]
    }

    pub fn windows(&self) -> &[ListWindow] {
        &self.windows
    }

    pub fn window_stats(&self, id: Uuid) -> Option<WindowStats> {
        windows::find(&self.windows, id).map(ListWindow::stats)
    }

    pub fn timers(&self) -> &[Timer] {
        self.timers.timers()
    }

    pub fn timer_store(&self) -> &TimerStore {
        &self.timers
    }

    pub fn theme(&self) -> &ThemeState {
        &self.theme
    }

    pub fn timers_panel_open(&self) -> bool {
        self.timers_panel_open
    }

    pub fn is_pending_removal(&self, target: RemovalTarget) -> bool {
        match target {
            RemovalTarget::Window(id) => self.pending_windows.contains(&id),
            RemovalTarget::Task { window, task } => self.pending_tasks.contains(&(window, task)),
        }
    }

    pub fn now(&self) -> Duration {
        self.clock
    }

    /// Time until the next scheduled job of either kind.
    pub fn next_due(&mut self) -> Option<Duration> {
        let due = match (self.timers.next_due(), self.removals.next_due()) {
            (Some(a), Some(b)) => a.min(b),
            (a, b) => a.or(b)?,
        };
        Some(due.saturating_sub(self.clock))
    }

    #[instrument(skip(self))]
    pub fn create_window(&mut self) -> Vec<ViewUpdate> {
        let (next, id) = windows::create_window(&self.windows, Utc::now());
        let before = self.commit_windows(next);
        self.reconcile_windows(&before, Mutation::WindowCreated(id))
    }

    /// Schedules the removal after confirmation. Windows already scheduled
    /// count as gone when checking that one window remains.
    #[instrument(skip(self))]
    pub fn delete_window(&mut self, id: Uuid) -> Result<Vec<ViewUpdate>, StoreError> {
        if windows::find(&self.windows, id).is_none() || self.pending_windows.contains(&id) {
            debug!(%id, "window not found or already going");
            return Ok(vec![]);
        }
        if let Err(err) = windows::ensure_removable(&self.windows, self.pending_windows.len()) {
            return Err(self.reject(err));
        }
        if !self.confirm(CONFIRM_DELETE_WINDOW) {
            return Ok(vec![]);
        }
        Ok(self.schedule_removal(RemovalTarget::Window(id), self.options.window_removal_delay))
    }

    #[instrument(skip(self, title))]
    pub fn rename_window(&mut self, id: Uuid, title: &str) -> Result<Vec<ViewUpdate>, StoreError> {
        match windows::rename_window(&self.windows, id, title) {
            Ok(Some(next)) => {
                let before = self.commit_windows(next);
                Ok(self.reconcile_windows(&before, Mutation::WindowRenamed(id)))
            }
            Ok(None) => {
                debug!(%id, "window not found");
                Ok(vec![])
            }
            Err(err) => Err(self.reject(err)),
        }
    }

    /// Asks for the new title, offering the current one. A cancelled prompt
    /// changes nothing.
    #[instrument(skip(self))]
    pub fn prompt_rename_window(&mut self, id: Uuid) -> Result<Vec<ViewUpdate>, StoreError> {
        let Some(current) = windows::find(&self.windows, id).map(|win| win.title.clone()) else {
            return Ok(vec![]);
        };
        match self.prompter.prompt(PROMPT_RENAME, &current) {
            Some(title) => self.rename_window(id, &title),
            None => Ok(vec![]),
        }
    }

    pub fn focus_window(&self, id: Uuid) -> Vec<ViewUpdate> {
        let view = self.view();
        reconcile(&view, &view, Mutation::WindowFocused(id))
    }

    #[instrument(skip(self, text))]
    pub fn add_task(&mut self, window: Uuid, text: &str) -> Result<Vec<ViewUpdate>, StoreError> {
        match windows::add_task(&self.windows, window, text, Utc::now()) {
            Ok(Some((next, task))) => {
                let before = self.commit_windows(next);
                Ok(self.reconcile_windows(&before, Mutation::TaskAdded { window, task }))
            }
            Ok(None) => {
                debug!(%window, "window not found");
                Ok(vec![])
            }
            Err(err) => Err(self.reject(err)),
        }
    }

    #[instrument(skip(self))]
    pub fn toggle_task(&mut self, window: Uuid, task: Uuid) -> Vec<ViewUpdate> {
        let Some(next) = windows::toggle_task(&self.windows, window, task) else {
            debug!(%window, %task, "task not found");
            return vec![];
        };
        let before = self.commit_windows(next);
        self.reconcile_windows(&before, Mutation::TaskToggled { window, task })
    }

    #[instrument(skip(self))]
    pub fn delete_task(&mut self, window: Uuid, task: Uuid) -> Vec<ViewUpdate> {
        let exists = windows::find(&self.windows, window).and_then(|win| win.task(task)).is_some();
        if !exists || self.pending_tasks.contains(&(window, task)) {
            debug!(%window, %task, "task not found or already going");
            return vec![];
        }
        if !self.confirm(CONFIRM_DELETE_TASK) {
            return vec![];
        }
        self.schedule_removal(RemovalTarget::Task { window, task }, self.options.task_removal_delay)
    }

    #[instrument(skip(self))]
    pub fn reset_window_tasks(&mut self, window: Uuid) -> Vec<ViewUpdate> {
        if windows::find(&self.windows, window).is_none() {
            debug!(%window, "window not found");
            return vec![];
        }
        if !self.confirm(CONFIRM_RESET_TASKS) {
            return vec![];
        }
        let Some(next) = windows::reset_tasks(&self.windows, window) else {
            return vec![];
        };
        let before = self.commit_windows(next);
        self.reconcile_windows(&before, Mutation::TasksReset(window))
    }

    #[instrument(skip(self))]
    pub fn create_timer(&mut self, title: Option<&str>) -> Vec<ViewUpdate> {
        let before = self.timers.timers().to_vec();
        let panel_before = self.timers_panel_open;

        let id = self.timers.create(title);
        self.timers_panel_open = true;
        self.persistence.save_timers(self.timers.timers());
        self.reconcile_timers(&before, panel_before, Mutation::TimerCreated(id))
    }

    pub fn start_timer(&mut self, id: Uuid) -> Result<Vec<ViewUpdate>, StoreError> {
        self.timer_op(id, Mutation::TimerChanged(id), |timers| timers.start(id))
    }

    pub fn pause_timer(&mut self, id: Uuid) -> Result<Vec<ViewUpdate>, StoreError> {
        self.timer_op(id, Mutation::TimerChanged(id), |timers| timers.pause(id))
    }

    pub fn reset_timer(&mut self, id: Uuid) -> Vec<ViewUpdate> {
        self.timer_op(id, Mutation::TimerChanged(id), |timers| Ok(timers.reset(id)))
            .unwrap_or_default()
    }

    #[instrument(skip(self))]
    pub fn delete_timer(&mut self, id: Uuid) -> Vec<ViewUpdate> {
        if self.timers.get(id).is_none() {
            debug!(%id, "timer not found");
            return vec![];
        }
        if !self.confirm(CONFIRM_DELETE_TIMER) {
            return vec![];
        }
        self.timer_op(id, Mutation::TimerRemoved(id), |timers| Ok(timers.delete(id)))
            .unwrap_or_default()
    }

    pub fn set_timer_duration(
        &mut self,
        id: Uuid,
        field: DurationField,
        value: i64,
    ) -> Result<Vec<ViewUpdate>, StoreError> {
        self.timer_op(id, Mutation::TimerChanged(id), |timers| {
            timers.set_duration(id, field, value)
        })
    }

    /// Same as [`App::set_timer_duration`] for raw text typed into a
    /// duration field.
    pub fn set_timer_duration_input(
        &mut self,
        id: Uuid,
        field: DurationField,
        raw: &str,
    ) -> Result<Vec<ViewUpdate>, StoreError> {
        self.set_timer_duration(id, field, parse_field_input(raw))
    }

    pub fn set_timer_title(&mut self, id: Uuid, title: &str) -> Vec<ViewUpdate> {
        self.timer_op(id, Mutation::TimerChanged(id), |timers| Ok(timers.set_title(id, title)))
            .unwrap_or_default()
    }

    pub fn toggle_timers_panel(&mut self) -> Vec<ViewUpdate> {
        let before = self.timers_panel_open;
        self.timers_panel_open = !before;
        let timers = self.timers.timers();
        reconcile(
            &self.view_with(&self.windows, timers, before),
            &self.view(),
            Mutation::TimersPanelToggled,
        )
    }

    #[instrument(skip(self))]
    pub fn switch_theme(&mut self, name: &str) -> Vec<ViewUpdate> {
        let before = self.theme.clone();
        self.theme.switch(name);
        self.persistence.save_theme(self.theme.name());

        let mut prev = self.view();
        prev.theme = &before;
        reconcile(&prev, &self.view(), Mutation::ThemeSwitched)
    }

    /// Moves the clock forward, firing every job that comes due in order.
    #[instrument(skip(self), fields(now = ?self.clock))]
    pub fn advance(&mut self, elapsed: Duration) -> Vec<ViewUpdate> {
        let until = self.clock + elapsed;
        let mut updates = Vec::new();

        loop {
            let timer_due = self.timers.next_due().filter(|due| *due <= until);
            let removal_due = self.removals.next_due().filter(|due| *due <= until);
            let removal_first = match (timer_due, removal_due) {
                (None, None) => break,
                (Some(timer), Some(removal)) => removal < timer,
                (Some(_), None) => false,
                (None, Some(_)) => true,
            };

            if removal_first {
                if let Some((_, target)) = self.removals.pop_due(until) {
                    updates.extend(self.finish_removal(target));
                }
            } else {
                let before = self.timers.timers().to_vec();
                if let Some(event) = self.timers.fire_next(until) {
                    updates.extend(self.on_timer_event(event, &before));
                }
            }
        }

        self.timers.advance_to(until);
        self.removals.advance_to(until);
        self.clock = until;
        updates
    }

    /// Applies removals still waiting on their delay right away.
    #[instrument(skip(self))]
    pub fn flush_pending(&mut self) -> Vec<ViewUpdate> {
        let pending = self.removals.drain_once();
        debug!(count = pending.len(), "flushing pending removals");
        pending
            .into_iter()
            .flat_map(|target| self.finish_removal(target))
            .collect()
    }

    /// Flushes pending removals and writes every key one last time.
    #[instrument(skip(self))]
    pub fn shutdown(mut self) -> Vec<ViewUpdate> {
        let updates = self.flush_pending();

        self.persistence.save_windows(&self.windows);
        self.persistence.save_timers(self.timers.timers());
        self.persistence.save_theme(self.theme.name());
        info!("application state saved");
        updates
    }

    fn on_timer_event(&mut self, event: TimerEvent, before: &[Timer]) -> Vec<ViewUpdate> {
        let panel = self.timers_panel_open;
        match event {
            TimerEvent::Ticked(id) => {
                self.persistence.save_timers(self.timers.timers());
                self.reconcile_timers(before, panel, Mutation::TimerTicked(id))
            }
            TimerEvent::Finished(id) => {
                self.persistence.save_timers(self.timers.timers());
                if let Some(timer) = self.timers.get(id) {
                    announce_finished(self.effects.as_mut(), timer);
                }
                self.reconcile_timers(before, panel, Mutation::TimerFinished(id))
            }
            TimerEvent::FinishedFlagCleared(id) => {
                self.reconcile_timers(before, panel, Mutation::FinishedFlagCleared(id))
            }
        }
    }

    fn schedule_removal(&mut self, target: RemovalTarget, delay: Duration) -> Vec<ViewUpdate> {
        match target {
            RemovalTarget::Window(id) => {
                self.pending_windows.insert(id);
            }
            RemovalTarget::Task { window, task } => {
                self.pending_tasks.insert((window, task));
            }
        }
        if delay.is_zero() {
            return self.finish_removal(target);
        }

        self.removals.schedule_once(delay, target);
        debug!(?target, ?delay, "removal scheduled");
        let view = self.view();
        reconcile(&view, &view, Mutation::RemovalScheduled(target))
    }

    fn finish_removal(&mut self, target: RemovalTarget) -> Vec<ViewUpdate> {
        match target {
            RemovalTarget::Window(id) => {
                self.pending_windows.remove(&id);
                if let Err(err) = windows::ensure_removable(&self.windows, self.pending_windows.len()) {
                    warn!(%id, error = %err, "dropping scheduled window removal");
                    return vec![];
                }
                match windows::remove_window(&self.windows, id) {
                    Ok(Some(next)) => {
                        let before = self.commit_windows(next);
                        self.reconcile_windows(&before, Mutation::WindowRemoved(id))
                    }
                    Ok(None) => vec![],
                    Err(err) => {
                        warn!(%id, error = %err, "dropping scheduled window removal");
                        vec![]
                    }
                }
            }
            RemovalTarget::Task { window, task } => {
                self.pending_tasks.remove(&(window, task));
                let Some(next) = windows::remove_task(&self.windows, window, task) else {
                    return vec![];
                };
                let before = self.commit_windows(next);
                self.reconcile_windows(&before, Mutation::TaskRemoved { window, task })
            }
        }
    }

    fn timer_op<F>(&mut self, id: Uuid, mutation: Mutation, op: F) -> Result<Vec<ViewUpdate>, StoreError>
    where
        F: FnOnce(&mut TimerStore) -> Result<bool, StoreError>,
    {
        let before = self.timers.timers().to_vec();
        match op(&mut self.timers) {
            Ok(true) => {
                self.persistence.save_timers(self.timers.timers());
                Ok(self.reconcile_timers(&before, self.timers_panel_open, mutation))
            }
            Ok(false) => {
                debug!(%id, "timer not found");
                Ok(vec![])
            }
            Err(err) => Err(self.reject(err)),
        }
    }

    fn commit_windows(&mut self, next: Vec<ListWindow>) -> Vec<ListWindow> {
        let before = mem::replace(&mut self.windows, next);
        self.persistence.save_windows(&self.windows);
        before
    }

    fn confirm(&mut self, message: &str) -> bool {
        if !self.options.confirm {
            return true;
        }
        let confirmed = self.prompter.confirm(message);
        if !confirmed {
            debug!(message, "declined");
        }
        confirmed
    }

    fn reject(&mut self, err: StoreError) -> StoreError {
        debug!(error = %err, kind = ?err.kind(), "operation rejected");
        if err.alerts_user() {
            self.prompter.alert(&err.to_string());
        }
        err
    }

    fn view(&self) -> ViewState<'_> {
        self.view_with(&self.windows, self.timers.timers(), self.timers_panel_open)
    }

    fn view_with<'a>(&'a self, windows: &'a [ListWindow], timers: &'a [Timer], panel: bool) -> ViewState<'a> {
        ViewState {
            windows,
            timers,
            theme: &self.theme,
            timers_panel_open: panel,
        }
    }

    fn reconcile_windows(&self, before: &[ListWindow], mutation: Mutation) -> Vec<ViewUpdate> {
        let prev = self.view_with(before, self.timers.timers(), self.timers_panel_open);
        reconcile(&prev, &self.view(), mutation)
    }

    fn reconcile_timers(&self, before: &[Timer], panel_before: bool, mutation: Mutation) -> Vec<ViewUpdate> {
        let prev = self.view_with(&self.windows, before, panel_before);
        reconcile(&prev, &self.view(), mutation)
    }
}
