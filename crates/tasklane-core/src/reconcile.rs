//! Chooses the smallest view update that brings a rendered view in line
//! with a state change.
//!
//! Three granularities exist: a full re-render of the window strip or the
//! timer panel, a patch of one item, and a patch of derived numbers (stats,
//! countdown display). [`reconcile`] is pure: it compares the state before
//! and after a mutation and never looks at anything else.

use uuid::Uuid;

use crate::model::{ListWindow, Timer, WindowStats};
use crate::theme::{Theme, ThemeState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalTarget {
    Window(Uuid),
    Task { window: Uuid, task: Uuid },
}

/// What just happened to the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    WindowCreated(Uuid),
    WindowRenamed(Uuid),
    WindowRemoved(Uuid),
    WindowFocused(Uuid),
    TaskAdded { window: Uuid, task: Uuid },
    TaskToggled { window: Uuid, task: Uuid },
    TaskRemoved { window: Uuid, task: Uuid },
    TasksReset(Uuid),
    RemovalScheduled(RemovalTarget),
    TimerCreated(Uuid),
    TimerChanged(Uuid),
    TimerRemoved(Uuid),
    TimerTicked(Uuid),
    TimerFinished(Uuid),
    FinishedFlagCleared(Uuid),
    ThemeSwitched,
    TimersPanelToggled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewUpdate {
    RenderWindows,
    RenderTimers,
    RenderTaskList { window: Uuid },
    PatchTask { window: Uuid, task: Uuid, completed: bool },
    RemoveTaskItem { window: Uuid, task: Uuid },
    PatchStats { window: Uuid, stats: WindowStats },
    PatchTimerDisplay { timer: Uuid, display: String, progress: f64 },
    MarkRemoving(RemovalTarget),
    ShowEmptyPlaceholder { window: Uuid },
    FocusTaskInput { window: Uuid },
    ScrollToWindow { window: Uuid },
    ApplyTheme { name: String, active: Option<Theme> },
    SetTimersPanel { open: bool },
    ClearFinishedFlag { timer: Uuid },
}

/// Borrowed view of everything the reconciler compares.
#[derive(Debug, Clone, Copy)]
pub struct ViewState<'a> {
    pub windows: &'a [ListWindow],
    pub timers: &'a [Timer],
    pub theme: &'a ThemeState,
    pub timers_panel_open: bool,
}

pub fn reconcile(before: &ViewState<'_>, after: &ViewState<'_>, mutation: Mutation) -> Vec<ViewUpdate> {
    match mutation {
        Mutation::WindowCreated(window) => {
            if before.windows == after.windows {
                return vec![];
            }
            vec![ViewUpdate::RenderWindows, ViewUpdate::FocusTaskInput { window }]
        }
        Mutation::WindowRenamed(_) | Mutation::WindowRemoved(_) => {
            if before.windows == after.windows {
                return vec![];
            }
            vec![ViewUpdate::RenderWindows]
        }
        Mutation::WindowFocused(window) => {
            if find_window(after.windows, window).is_none() {
                return vec![];
            }
            vec![ViewUpdate::ScrollToWindow { window }]
        }
        Mutation::TaskAdded { window, task } => task_added(before, after, window, task),
        Mutation::TaskToggled { window, task } => {
            let Some(win) = find_window(after.windows, window) else {
                return vec![];
            };
            let Some(toggled) = win.task(task) else {
                return vec![];
            };
            let unchanged = find_window(before.windows, window)
                .and_then(|prev| prev.task(task))
                .is_some_and(|prev| prev.completed == toggled.completed);
            if unchanged {
                return vec![];
            }
            vec![
                ViewUpdate::PatchTask {
                    window,
                    task,
                    completed: toggled.completed,
                },
                stats_patch(win),
            ]
        }
        Mutation::TaskRemoved { window, task } => {
            let Some(win) = find_window(after.windows, window) else {
                return vec![];
            };
            if win.task(task).is_some() {
                return vec![];
            }
            let mut updates = vec![ViewUpdate::RemoveTaskItem { window, task }, stats_patch(win)];
            if win.tasks.is_empty() {
                updates.push(ViewUpdate::ShowEmptyPlaceholder { window });
            }
            updates
        }
        Mutation::TasksReset(window) => tasks_reset(before, after, window),
        Mutation::RemovalScheduled(target) => vec![ViewUpdate::MarkRemoving(target)],
        Mutation::TimerCreated(_) => {
            let mut updates = vec![ViewUpdate::RenderTimers];
            if after.timers_panel_open && !before.timers_panel_open {
                updates.push(ViewUpdate::SetTimersPanel { open: true });
            }
            updates
        }
        Mutation::TimerChanged(_) | Mutation::TimerRemoved(_) | Mutation::TimerFinished(_) => {
            if before.timers == after.timers {
                return vec![];
            }
            vec![ViewUpdate::RenderTimers]
        }
        Mutation::TimerTicked(timer) => after
            .timers
            .iter()
            .find(|t| t.id == timer)
            .map(|t| ViewUpdate::PatchTimerDisplay {
                timer,
                display: t.display(),
                progress: t.progress(),
            })
            .into_iter()
            .collect(),
        Mutation::FinishedFlagCleared(timer) => vec![ViewUpdate::ClearFinishedFlag { timer }],
        Mutation::ThemeSwitched => {
            if before.theme == after.theme {
                return vec![];
            }
            vec![ViewUpdate::ApplyTheme {
                name: after.theme.name().to_string(),
                active: after.theme.active_control(),
            }]
        }
        Mutation::TimersPanelToggled => {
            if before.timers_panel_open == after.timers_panel_open {
                return vec![];
            }
            vec![ViewUpdate::SetTimersPanel {
                open: after.timers_panel_open,
            }]
        }
    }
}

fn task_added(before: &ViewState<'_>, after: &ViewState<'_>, window: Uuid, task: Uuid) -> Vec<ViewUpdate> {
    let Some(win) = find_window(after.windows, window) else {
        return vec![];
    };
    if win.task(task).is_none() {
        return vec![];
    }
    let before_count = find_window(before.windows, window).map_or(0, |prev| prev.tasks.len());

    let mut updates = Vec::new();
    if before_count != win.tasks.len() {
        updates.push(ViewUpdate::RenderTaskList { window });
    }
    updates.push(stats_patch(win));
    updates.push(ViewUpdate::FocusTaskInput { window });
    updates
}

fn tasks_reset(before: &ViewState<'_>, after: &ViewState<'_>, window: Uuid) -> Vec<ViewUpdate> {
    let Some(win) = find_window(after.windows, window) else {
        return vec![];
    };
    let prev = find_window(before.windows, window);

    let mut updates: Vec<ViewUpdate> = win
        .tasks
        .iter()
        .filter(|task| {
            prev.and_then(|prev| prev.task(task.id))
                .is_none_or(|old| old.completed != task.completed)
        })
        .map(|task| ViewUpdate::PatchTask {
            window,
            task: task.id,
            completed: task.completed,
        })
        .collect();
    if !updates.is_empty() {
        updates.push(stats_patch(win));
    }
    updates
}

fn find_window(windows: &[ListWindow], id: Uuid) -> Option<&ListWindow> {
    windows.iter().find(|win| win.id == id)
}

fn stats_patch(win: &ListWindow) -> ViewUpdate {
    ViewUpdate::PatchStats {
        window: win.id,
        stats: win.stats(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{Mutation, RemovalTarget, ViewState, ViewUpdate, reconcile};
    use crate::model::{ListWindow, Timer, WindowStats};
    use crate::theme::{Theme, ThemeState};
    use crate::windows;

    fn view<'a>(windows: &'a [ListWindow], timers: &'a [Timer], theme: &'a ThemeState) -> ViewState<'a> {
        ViewState {
            windows,
            timers,
            theme,
            timers_panel_open: false,
        }
    }

    #[test]
    fn toggle_patches_one_item_and_the_stats() {
        let theme = ThemeState::default();
        let (wins, id) = windows::create_window(&[], Utc::now());
        let (wins, task) = windows::add_task(&wins, id, "Buy milk", Utc::now())
            .unwrap()
            .unwrap();
        let toggled = windows::toggle_task(&wins, id, task).unwrap();

        let updates = reconcile(
            &view(&wins, &[], &theme),
            &view(&toggled, &[], &theme),
            Mutation::TaskToggled { window: id, task },
        );
        assert_eq!(
            updates,
            vec![
                ViewUpdate::PatchTask {
                    window: id,
                    task,
                    completed: true
                },
                ViewUpdate::PatchStats {
                    window: id,
                    stats: WindowStats {
                        completed: 1,
                        total: 1
                    }
                },
            ]
        );
    }

    #[test]
    fn removing_the_last_task_shows_the_placeholder() {
        let theme = ThemeState::default();
        let (wins, id) = windows::create_window(&[], Utc::now());
        let (wins, task) = windows::add_task(&wins, id, "x", Utc::now())
            .unwrap()
            .unwrap();
        let removed = windows::remove_task(&wins, id, task).unwrap();

        let updates = reconcile(
            &view(&wins, &[], &theme),
            &view(&removed, &[], &theme),
            Mutation::TaskRemoved { window: id, task },
        );
        assert_eq!(updates.len(), 3);
        assert_eq!(updates[0], ViewUpdate::RemoveTaskItem { window: id, task });
        assert_eq!(updates[2], ViewUpdate::ShowEmptyPlaceholder { window: id });
    }

    #[test]
    fn add_rerenders_the_single_list_and_focuses_input() {
        let theme = ThemeState::default();
        let (wins, id) = windows::create_window(&[], Utc::now());
        let (added, task) = windows::add_task(&wins, id, "x", Utc::now())
            .unwrap()
            .unwrap();

        let updates = reconcile(
            &view(&wins, &[], &theme),
            &view(&added, &[], &theme),
            Mutation::TaskAdded { window: id, task },
        );
        assert_eq!(updates[0], ViewUpdate::RenderTaskList { window: id });
        assert_eq!(updates.last(), Some(&ViewUpdate::FocusTaskInput { window: id }));
        assert!(!updates.contains(&ViewUpdate::RenderWindows));
    }

    #[test]
    fn reset_patches_only_changed_tasks() {
        let theme = ThemeState::default();
        let (wins, id) = windows::create_window(&[], Utc::now());
        let (wins, done) = windows::add_task(&wins, id, "done", Utc::now())
            .unwrap()
            .unwrap();
        let (wins, _open) = windows::add_task(&wins, id, "open", Utc::now())
            .unwrap()
            .unwrap();
        let wins = windows::toggle_task(&wins, id, done).unwrap();
        let reset = windows::reset_tasks(&wins, id).unwrap();

        let updates = reconcile(
            &view(&wins, &[], &theme),
            &view(&reset, &[], &theme),
            Mutation::TasksReset(id),
        );
        assert_eq!(
            updates[0],
            ViewUpdate::PatchTask {
                window: id,
                task: done,
                completed: false
            }
        );
        assert_eq!(updates.len(), 2);

        let again = reconcile(
            &view(&reset, &[], &theme),
            &view(&reset, &[], &theme),
            Mutation::TasksReset(id),
        );
        assert!(again.is_empty());
    }

    #[test]
    fn unchanged_state_yields_no_updates() {
        let theme = ThemeState::default();
        let (wins, id) = windows::create_window(&[], Utc::now());
        for mutation in [Mutation::WindowRenamed(id), Mutation::WindowRemoved(id), Mutation::ThemeSwitched] {
            assert!(reconcile(&view(&wins, &[], &theme), &view(&wins, &[], &theme), mutation).is_empty());
        }
    }

    #[test]
    fn tick_patches_display_only() {
        let theme = ThemeState::default();
        let before = vec![Timer::new("t".to_string(), 0, 1, 0)];
        let mut after = before.clone();
        after[0].remaining_time = 45;
        let id = after[0].id;

        let updates = reconcile(
            &view(&[], &before, &theme),
            &view(&[], &after, &theme),
            Mutation::TimerTicked(id),
        );
        assert_eq!(
            updates,
            vec![ViewUpdate::PatchTimerDisplay {
                timer: id,
                display: "00:00:45".to_string(),
                progress: 25.0
            }]
        );
    }

    #[test]
    fn theme_and_panel_changes() {
        let blue = ThemeState::default();
        let mut neon = ThemeState::default();
        neon.switch("neon");
        let updates = reconcile(&view(&[], &[], &blue), &view(&[], &[], &neon), Mutation::ThemeSwitched);
        assert_eq!(
            updates,
            vec![ViewUpdate::ApplyTheme {
                name: "neon".to_string(),
                active: None
            }]
        );

        let mut dark = ThemeState::default();
        dark.switch("dark");
        let updates = reconcile(&view(&[], &[], &blue), &view(&[], &[], &dark), Mutation::ThemeSwitched);
        assert!(matches!(
            &updates[0],
            ViewUpdate::ApplyTheme {
                active: Some(Theme::Dark),
                ..
            }
        ));

        let closed = view(&[], &[], &blue);
        let open = ViewState {
            timers_panel_open: true,
            ..closed
        };
        let timer = Timer::new("t".to_string(), 0, 5, 0);
        assert_eq!(
            reconcile(&closed, &open, Mutation::TimerCreated(timer.id)),
            vec![ViewUpdate::RenderTimers, ViewUpdate::SetTimersPanel { open: true }]
        );
        assert_eq!(
            reconcile(&open, &closed, Mutation::TimersPanelToggled),
            vec![ViewUpdate::SetTimersPanel { open: false }]
        );
    }

    #[test]
    fn scheduled_removal_marks_the_item() {
        let theme = ThemeState::default();
        let (wins, id) = windows::create_window(&[], Utc::now());
        let target = RemovalTarget::Window(id);
        assert_eq!(
            reconcile(&view(&wins, &[], &theme), &view(&wins, &[], &theme), Mutation::RemovalScheduled(target)),
            vec![ViewUpdate::MarkRemoving(target)]
        );
    }
}
