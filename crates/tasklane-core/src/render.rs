use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use tracing::trace;
use unicode_width::UnicodeWidthStr;
use uuid::Uuid;

use crate::app::App;
use crate::config::Config;
use crate::model::{ListWindow, Timer, TimerState};
use crate::reconcile::{RemovalTarget, ViewUpdate};
use crate::theme::Theme;

/// Prints view updates as text. Full re-renders become tables; patches
/// become one line each.
#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self {
            color: color && io::stdout().is_terminal(),
        })
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    #[tracing::instrument(skip_all, fields(count = updates.len()))]
    pub fn render(&self, app: &App, updates: &[ViewUpdate]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.render_to(&mut out, app, updates)
    }

    pub fn render_to<W: Write>(&self, out: &mut W, app: &App, updates: &[ViewUpdate]) -> anyhow::Result<()> {
        for update in updates {
            match update {
                ViewUpdate::RenderWindows => {
                    for (idx, win) in app.windows().iter().enumerate() {
                        self.write_window(out, idx, win)?;
                    }
                }
                ViewUpdate::RenderTaskList { window } | ViewUpdate::ScrollToWindow { window } => {
                    if let Some((idx, win)) = position(app.windows(), *window) {
                        self.write_window(out, idx, win)?;
                    }
                }
                ViewUpdate::RenderTimers => self.write_timers(out, app)?,
                ViewUpdate::PatchTask {
                    window,
                    task,
                    completed,
                } => {
                    let text = find_task_text(app, *window, *task).unwrap_or_default();
                    writeln!(out, "{} {}", self.checkbox(*completed), text)?;
                }
                ViewUpdate::RemoveTaskItem { window, .. } => {
                    writeln!(out, "Removed a task from {}", window_title(app, *window))?;
                }
                ViewUpdate::PatchStats { window, stats } => {
                    writeln!(
                        out,
                        "{}: {} done ({:.0}%)",
                        window_title(app, *window),
                        stats.summary(),
                        stats.percent()
                    )?;
                }
                ViewUpdate::PatchTimerDisplay {
                    timer,
                    display,
                    progress,
                } => {
                    let title = app
                        .timers()
                        .iter()
                        .find(|t| t.id == *timer)
                        .map(|t| t.title.as_str())
                        .unwrap_or_default();
                    write!(out, "\r{title} {display} ({progress:.0}%)  ")?;
                    out.flush()?;
                }
                ViewUpdate::MarkRemoving(target) => {
                    let label = match target {
                        RemovalTarget::Window(id) => window_title(app, *id),
                        RemovalTarget::Task { window, task } => {
                            find_task_text(app, *window, *task).unwrap_or_default()
                        }
                    };
                    writeln!(out, "{}", self.paint(&format!("Removing {label}"), "2"))?;
                }
                ViewUpdate::ShowEmptyPlaceholder { window } => {
                    writeln!(out, "{}: No tasks yet", window_title(app, *window))?;
                }
                ViewUpdate::ApplyTheme { name, active } => {
                    writeln!(out, "Theme: {}", self.paint(name, theme_color(*active)))?;
                }
                ViewUpdate::SetTimersPanel { open } => {
                    let state = if *open { "shown" } else { "hidden" };
                    writeln!(out, "Timers panel {state}")?;
                }
                ViewUpdate::FocusTaskInput { .. } | ViewUpdate::ClearFinishedFlag { .. } => {
                    trace!(?update, "no terminal counterpart");
                }
            }
        }
        Ok(())
    }

    fn write_window<W: Write>(&self, out: &mut W, idx: usize, win: &ListWindow) -> anyhow::Result<()> {
        let stats = win.stats();
        writeln!(
            out,
            "{} {}  {} done ({:.0}%)",
            self.paint(&format!("{}.", idx + 1), "33"),
            self.paint(&win.title, "1"),
            stats.summary(),
            stats.percent()
        )?;

        if win.tasks.is_empty() {
            writeln!(out, "   No tasks yet")?;
            return Ok(());
        }

        let rows = win
            .tasks
            .iter()
            .enumerate()
            .map(|(pos, task)| {
                vec![
                    format!("   {}", pos + 1),
                    self.checkbox(task.completed),
                    task.text.clone(),
                    short_id(task.id),
                ]
            })
            .collect::<Vec<_>>();
        let widths = column_widths(&rows);
        write_rows(out, rows, &widths)
    }

    fn write_timers<W: Write>(&self, out: &mut W, app: &App) -> anyhow::Result<()> {
        let timers = app.timers();
        if timers.is_empty() {
            writeln!(out, "No timers")?;
            return Ok(());
        }

        let headers = ["#", "Title", "Remaining", "Progress", "State", "Id"]
            .map(str::to_string)
            .to_vec();
        let rows = timers
            .iter()
            .enumerate()
            .map(|(idx, timer)| {
                vec![
                    self.paint(&(idx + 1).to_string(), "33"),
                    timer.title.clone(),
                    timer.display(),
                    format!("{:.0}%", timer.progress()),
                    self.timer_state(timer, app.timer_store().is_flagged_finished(timer.id)),
                    short_id(timer.id),
                ]
            })
            .collect();
        write_table(out, headers, rows)
    }

    fn timer_state(&self, timer: &Timer, flagged: bool) -> String {
        match timer.state() {
            TimerState::Idle => "idle".to_string(),
            TimerState::Running => self.paint("running", "32"),
            TimerState::Paused => self.paint("paused", "33"),
            TimerState::Finished if flagged => self.paint("finished!", "1;31"),
            TimerState::Finished => self.paint("finished", "31"),
        }
    }

    fn checkbox(&self, completed: bool) -> String {
        if completed {
            self.paint("[x]", "32")
        } else {
            "[ ]".to_string()
        }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn theme_color(theme: Option<Theme>) -> &'static str {
    match theme {
        Some(Theme::Blue) => "34",
        Some(Theme::Green) => "32",
        Some(Theme::Purple) => "35",
        Some(Theme::Orange) => "33",
        Some(Theme::Dark) => "90",
        None => "0",
    }
}

fn position(windows: &[ListWindow], id: Uuid) -> Option<(usize, &ListWindow)> {
    windows.iter().enumerate().find(|(_, win)| win.id == id)
}

fn window_title(app: &App, id: Uuid) -> String {
    position(app.windows(), id)
        .map(|(_, win)| win.title.clone())
        .unwrap_or_default()
}

fn find_task_text(app: &App, window: Uuid, task: Uuid) -> Option<String> {
    let (_, win) = position(app.windows(), window)?;
    win.task(task).map(|task| task.text.clone())
}

pub fn short_id(id: Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

fn write_table<W: Write>(writer: &mut W, headers: Vec<String>, rows: Vec<Vec<String>>) -> anyhow::Result<()> {
    let widths = column_widths(std::iter::once(&headers).chain(&rows));

    for (idx, header) in headers.iter().enumerate() {
        write!(writer, "{:width$} ", header, width = widths[idx])?;
    }
    writeln!(writer)?;

    for width in widths.iter().copied() {
        write!(writer, "{:-<width$} ", "", width = width)?;
    }
    writeln!(writer)?;

    write_rows(writer, rows, &widths)
}

fn write_rows<W: Write>(writer: &mut W, rows: Vec<Vec<String>>, widths: &[usize]) -> anyhow::Result<()> {
    for row in rows {
        for (idx, cell) in row.iter().enumerate() {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }
    Ok(())
}

fn column_widths<'a>(rows: impl IntoIterator<Item = &'a Vec<String>>) -> Vec<usize> {
    let mut widths: Vec<usize> = Vec::new();
    for row in rows {
        if widths.len() < row.len() {
            widths.resize(row.len(), 0);
        }
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }
    widths
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::{Renderer, column_widths, strip_ansi};
    use crate::app::{App, AppOptions};
    use crate::effects::NoEffects;
    use crate::prompt::AutoConfirm;
    use crate::reconcile::ViewUpdate;
    use crate::storage::{MemoryStore, Persistence};

    #[test]
    fn widths_ignore_escape_codes_and_count_wide_chars() {
        let rows = vec![
            vec!["\x1b[32m[x]\x1b[0m".to_string(), "牛乳".to_string()],
            vec!["[ ]".to_string(), "eggs".to_string()],
        ];
        assert_eq!(strip_ansi(&rows[0][0]), "[x]");
        assert_eq!(column_widths(&rows), vec![3, 4]);
    }

    #[test]
    fn renders_windows_and_placeholders() {
        let mut app = App::open(
            Persistence::new(MemoryStore::new()),
            AutoConfirm,
            NoEffects,
            AppOptions::default(),
        );
        let id = app.windows()[0].id;
        app.add_task(id, "Buy milk").unwrap();
        app.create_window();

        let mut out = Vec::new();
        Renderer::plain()
            .render_to(&mut out, &app, &[ViewUpdate::RenderWindows, ViewUpdate::SetTimersPanel { open: true }])
            .unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("1. List 1  0 of 1 done (0%)"));
        assert!(text.contains("[ ] Buy milk"));
        assert!(text.contains("2. List 2  0 of 0 done (0%)"));
        assert!(text.contains("No tasks yet"));
        assert!(text.contains("Timers panel shown"));
    }

    #[test]
    fn flushed_removals_render_their_result() {
        let mut app = App::open(
            Persistence::new(MemoryStore::new()),
            AutoConfirm,
            NoEffects,
            AppOptions::default(),
        );
        let window = app.windows()[0].id;
        app.add_task(window, "Buy milk").unwrap();
        let task = app.windows()[0].tasks[0].id;
        app.delete_task(window, task);

        let flushed = app.flush_pending();
        let mut out = Vec::new();
        Renderer::plain().render_to(&mut out, &app, &flushed).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("Removed a task from List 1"));
        assert!(text.contains("List 1: No tasks yet"));
        assert!(app.windows()[0].tasks.is_empty());
    }
}
