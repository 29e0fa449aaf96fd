use std::io::{self, Write};
use std::thread;
use std::time::Instant;

use anyhow::{Context, anyhow, bail};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::app::App;
use crate::cli::Invocation;
use crate::error::StoreError;
use crate::model::{DurationField, ListWindow};
use crate::reconcile::ViewUpdate;
use crate::render::Renderer;
use crate::theme::Theme;
use crate::timers::TICK_PERIOD;

const LIST_ACTIONS: [&str; 5] = ["add", "rename", "delete", "reset", "focus"];
const TASK_ACTIONS: [&str; 3] = ["add", "toggle", "delete"];
const TIMER_ACTIONS: [&str; 7] = ["add", "start", "pause", "reset", "delete", "set", "title"];

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "show", "list", "task", "timer", "timers", "theme", "watch", "help", "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() { None } else { Some(first) }
}

#[instrument(skip(app, renderer, inv))]
pub fn dispatch(app: &mut App, renderer: &Renderer, inv: Invocation) -> anyhow::Result<()> {
    debug!(command = %inv.command, args = ?inv.args, "dispatching command");
    let args = inv.args.as_slice();

    let updates = match inv.command.as_str() {
        "show" => vec![ViewUpdate::RenderWindows, ViewUpdate::RenderTimers],
        "list" => cmd_list(app, args)?,
        "task" => cmd_task(app, args)?,
        "timer" => cmd_timer(app, args)?,
        "timers" => cmd_timers(app),
        "theme" => cmd_theme(app, args),
        "watch" => return cmd_watch(app, renderer),
        "help" => return cmd_help(),
        "version" => {
            println!("tasklane {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        other => bail!("unsupported command: {other}"),
    };

    renderer.render(app, &updates)
}

fn cmd_list(app: &mut App, args: &[String]) -> anyhow::Result<Vec<ViewUpdate>> {
    let Some((action, rest)) = args.split_first() else {
        return Ok(vec![ViewUpdate::RenderWindows]);
    };

    match expand_action(action, &LIST_ACTIONS)? {
        "add" => Ok(app.create_window()),
        "rename" => {
            let id = resolve_window(app.windows(), rest.first())?;
            if rest.len() > 1 {
                settle(app.rename_window(id, &rest[1..].join(" ")))
            } else {
                settle(app.prompt_rename_window(id))
            }
        }
        "delete" => {
            let id = resolve_window(app.windows(), rest.first())?;
            settle(app.delete_window(id))
        }
        "reset" => {
            let id = resolve_window(app.windows(), rest.first())?;
            Ok(app.reset_window_tasks(id))
        }
        "focus" => {
            let id = resolve_window(app.windows(), rest.first())?;
            Ok(app.focus_window(id))
        }
        other => bail!("unsupported list action: {other}"),
    }
}

fn cmd_task(app: &mut App, args: &[String]) -> anyhow::Result<Vec<ViewUpdate>> {
    let Some((action, rest)) = args.split_first() else {
        bail!("usage: task add|toggle|delete <list> ...");
    };
    let action = expand_action(action, &TASK_ACTIONS)?;
    let window = resolve_window(app.windows(), rest.first())?;

    match action {
        "add" => settle(app.add_task(window, &rest.get(1..).unwrap_or_default().join(" "))),
        "toggle" | "delete" => {
            let task = resolve_task(app.windows(), window, rest.get(1))?;
            if action == "toggle" {
                Ok(app.toggle_task(window, task))
            } else {
                Ok(app.delete_task(window, task))
            }
        }
        other => bail!("unsupported task action: {other}"),
    }
}

fn cmd_timer(app: &mut App, args: &[String]) -> anyhow::Result<Vec<ViewUpdate>> {
    let Some((action, rest)) = args.split_first() else {
        return Ok(vec![ViewUpdate::RenderTimers]);
    };
    let action = expand_action(action, &TIMER_ACTIONS)?;
    if action == "add" {
        let title = rest.join(" ");
        return Ok(app.create_timer(Some(title.as_str()).filter(|t| !t.trim().is_empty())));
    }

    let id = resolve_timer(app, rest.first())?;
    match action {
        "start" => settle(app.start_timer(id)),
        "pause" => settle(app.pause_timer(id)),
        "reset" => Ok(app.reset_timer(id)),
        "delete" => Ok(app.delete_timer(id)),
        "set" => {
            let (Some(field), Some(raw)) = (rest.get(1), rest.get(2)) else {
                bail!("usage: timer set <timer> hours|minutes|seconds <value>");
            };
            let field: DurationField = field.parse()?;
            settle(app.set_timer_duration_input(id, field, raw))
        }
        "title" => Ok(app.set_timer_title(id, &rest.get(1..).unwrap_or_default().join(" "))),
        other => bail!("unsupported timer action: {other}"),
    }
}

fn cmd_timers(app: &mut App) -> Vec<ViewUpdate> {
    let mut updates = app.toggle_timers_panel();
    if app.timers_panel_open() {
        updates.push(ViewUpdate::RenderTimers);
    }
    updates
}

fn cmd_theme(app: &mut App, args: &[String]) -> Vec<ViewUpdate> {
    let Some(name) = args.first() else {
        let known: Vec<&str> = Theme::ALL.iter().map(|theme| theme.name()).collect();
        println!("Available themes: {}", known.join(", "));
        return vec![ViewUpdate::ApplyTheme {
            name: app.theme().name().to_string(),
            active: app.theme().active_control(),
        }];
    };
    app.switch_theme(name)
}

/// Drives the timers in real time until none is running.
#[instrument(skip(app, renderer))]
fn cmd_watch(app: &mut App, renderer: &Renderer) -> anyhow::Result<()> {
    if app.timer_store().running_count() == 0 {
        println!("No timer is running");
        return Ok(());
    }
    renderer.render(app, &[ViewUpdate::RenderTimers])?;
    info!(running = app.timer_store().running_count(), "watching timers");

    let mut last_tick = Instant::now();
    while app.timer_store().running_count() > 0 {
        let timeout = app
            .next_due()
            .unwrap_or(TICK_PERIOD)
            .saturating_sub(last_tick.elapsed());
        thread::sleep(timeout);

        let elapsed = last_tick.elapsed();
        last_tick = Instant::now();
        let updates = app.advance(elapsed);
        renderer.render(app, &updates)?;
    }

    println!();
    Ok(())
}

fn cmd_help() -> anyhow::Result<()> {
    let mut out = io::stdout().lock();
    writeln!(
        out,
        "\
usage: tasklane [options] [command] [args]

commands:
  show                                  lists and timers (default)
  list [add|rename|delete|reset|focus] <list> [title]
  task add <list> <text>
  task toggle|delete <list> <task>
  timer add [title]
  timer start|pause|reset|delete <timer>
  timer set <timer> hours|minutes|seconds <value>
  timer title <timer> <title>
  timers                                toggle the timers panel
  theme [blue|green|purple|orange|dark]
  watch                                 run timers until none is running
  help | version

Lists, tasks and timers are addressed by position (1, 2, ...) or id prefix.
Commands and actions may be abbreviated while unambiguous."
    )
    .context("failed writing help")?;
    Ok(())
}

/// Rejections the user was already alerted to end the command quietly;
/// the rest become command errors.
fn settle(result: Result<Vec<ViewUpdate>, StoreError>) -> anyhow::Result<Vec<ViewUpdate>> {
    match result {
        Ok(updates) => Ok(updates),
        Err(err) if err.alerts_user() => Ok(vec![]),
        Err(err) => Err(err.into()),
    }
}

fn expand_action<'a>(token: &'a str, known: &[&'a str]) -> anyhow::Result<&'a str> {
    expand_command_abbrev(token, known).ok_or_else(|| {
        anyhow!(
            "unknown or ambiguous action {token:?}; expected one of {}",
            known.join(", ")
        )
    })
}

fn resolve_window(windows: &[ListWindow], token: Option<&String>) -> anyhow::Result<Uuid> {
    let token = token.ok_or_else(|| anyhow!("missing list reference"))?;
    resolve_reference(windows.iter().map(|win| win.id), token, "list")
}

fn resolve_task(windows: &[ListWindow], window: Uuid, token: Option<&String>) -> anyhow::Result<Uuid> {
    let token = token.ok_or_else(|| anyhow!("missing task reference"))?;
    let win = windows
        .iter()
        .find(|win| win.id == window)
        .ok_or_else(|| anyhow!("list not found"))?;
    resolve_reference(win.tasks.iter().map(|task| task.id), token, "task")
}

fn resolve_timer(app: &App, token: Option<&String>) -> anyhow::Result<Uuid> {
    let token = token.ok_or_else(|| anyhow!("missing timer reference"))?;
    resolve_reference(app.timers().iter().map(|timer| timer.id), token, "timer")
}

/// Accepts a 1-based position or a unique prefix of the id.
fn resolve_reference(ids: impl Iterator<Item = Uuid>, token: &str, what: &str) -> anyhow::Result<Uuid> {
    let ids: Vec<Uuid> = ids.collect();

    if let Ok(position) = token.parse::<usize>() {
        return position
            .checked_sub(1)
            .and_then(|idx| ids.get(idx).copied())
            .ok_or_else(|| anyhow!("no {what} at position {position}"));
    }

    let needle = token.to_ascii_lowercase().replace('-', "");
    let mut matches = ids
        .iter()
        .copied()
        .filter(|id| id.simple().to_string().starts_with(&needle));
    match (matches.next(), matches.next()) {
        (Some(id), None) if !needle.is_empty() => Ok(id),
        (Some(_), Some(_)) => Err(anyhow!("{what} reference {token:?} is ambiguous")),
        _ => Err(anyhow!("no {what} matches {token:?}")),
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{expand_command_abbrev, known_command_names, resolve_reference};

    #[test]
    fn abbreviations_must_be_unique() {
        let known = known_command_names();
        assert_eq!(expand_command_abbrev("sh", &known), Some("show"));
        assert_eq!(expand_command_abbrev("timer", &known), Some("timer"));
        assert_eq!(expand_command_abbrev("timers", &known), Some("timers"));
        assert_eq!(expand_command_abbrev("tim", &known), None);
        assert_eq!(expand_command_abbrev("w", &known), Some("watch"));
    }

    #[test]
    fn references_by_position_or_prefix() {
        let a = Uuid::parse_str("aaaaaaaa-0000-4000-8000-000000000001").unwrap();
        let b = Uuid::parse_str("abbbbbbb-0000-4000-8000-000000000002").unwrap();
        let ids = || [a, b].into_iter();

        assert_eq!(resolve_reference(ids(), "2", "list").unwrap(), b);
        assert!(resolve_reference(ids(), "0", "list").is_err());
        assert!(resolve_reference(ids(), "3", "list").is_err());
        assert_eq!(resolve_reference(ids(), "aa", "list").unwrap(), a);
        assert_eq!(resolve_reference(ids(), "ABBB", "list").unwrap(), b);
        assert!(resolve_reference(ids(), "a", "list").is_err());
        assert!(resolve_reference(ids(), "zz", "list").is_err());
    }
}
