use std::io::{self, IsTerminal, Write};

use anyhow::Context;
use tracing::{debug, instrument, warn};

use crate::model::Timer;

pub const FINISHED_TITLE: &str = "Timer finished";

/// Fire-and-forget side effects of a finished countdown.
pub trait CompletionEffects {
    /// Called once at start-up, e.g. to ask for notification permission.
    fn prepare(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn notify(&mut self, title: &str, body: &str) -> anyhow::Result<()>;

    fn tone(&mut self) -> anyhow::Result<()>;
}

pub fn finished_body(timer: &Timer) -> String {
    format!("Timer \"{}\" has finished", timer.title)
}

/// Runs every completion effect for `timer`; failures are logged and
/// dropped so the state transition already made stands.
#[instrument(skip(effects, timer), fields(timer = %timer.id))]
pub fn announce_finished(effects: &mut dyn CompletionEffects, timer: &Timer) {
    if let Err(err) = effects.notify(FINISHED_TITLE, &finished_body(timer)) {
        warn!(error = ?err, "completion notification failed");
    }
    if let Err(err) = effects.tone() {
        warn!(error = ?err, "completion tone failed");
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoEffects;

impl CompletionEffects for NoEffects {
    fn notify(&mut self, _title: &str, _body: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn tone(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Writes the notification to stderr and rings the terminal bell.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalEffects;

impl CompletionEffects for TerminalEffects {
    fn prepare(&mut self) -> anyhow::Result<()> {
        debug!(tty = io::stderr().is_terminal(), "terminal notifications ready");
        Ok(())
    }

    fn notify(&mut self, title: &str, body: &str) -> anyhow::Result<()> {
        let mut err = io::stderr().lock();
        writeln!(err, "{title}: {body}").context("failed writing notification")
    }

    fn tone(&mut self) -> anyhow::Result<()> {
        if !io::stderr().is_terminal() {
            return Ok(());
        }
        let mut err = io::stderr().lock();
        err.write_all(b"\x07").context("failed ringing bell")?;
        err.flush().context("failed ringing bell")
    }
}

#[cfg(test)]
mod tests {
    use super::announce_finished;
    use crate::model::Timer;
    use crate::testing::{Effect, RecordingEffects};

    #[test]
    fn failures_are_swallowed_after_both_attempts() {
        let mut effects = RecordingEffects::failing();
        let timer = Timer::new("Tea".to_string(), 0, 3, 0);
        announce_finished(&mut effects, &timer);

        assert_eq!(
            effects.effects(),
            vec![
                Effect::Notified {
                    title: "Timer finished".to_string(),
                    body: "Timer \"Tea\" has finished".to_string()
                },
                Effect::Tone
            ]
        );
    }
}
