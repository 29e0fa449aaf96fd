use std::io::{self, BufRead, Write};

use tracing::{debug, warn};

/// Blocking user dialogs: yes/no confirmation, free-text prompt and a
/// plain alert.
pub trait Prompter {
    fn confirm(&mut self, message: &str) -> bool;

    fn prompt(&mut self, message: &str, default: &str) -> Option<String>;

    fn alert(&mut self, message: &str);
}

impl<P: Prompter + ?Sized> Prompter for Box<P> {
    fn confirm(&mut self, message: &str) -> bool {
        (**self).confirm(message)
    }

    fn prompt(&mut self, message: &str, default: &str) -> Option<String> {
        (**self).prompt(message, default)
    }

    fn alert(&mut self, message: &str) {
        (**self).alert(message)
    }
}

/// Accepts every confirmation and prompt default; alerts go to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoConfirm;

impl Prompter for AutoConfirm {
    fn confirm(&mut self, message: &str) -> bool {
        debug!(message, "auto-confirmed");
        true
    }

    fn prompt(&mut self, _message: &str, default: &str) -> Option<String> {
        Some(default.to_string())
    }

    fn alert(&mut self, message: &str) {
        warn!(message, "alert");
    }
}

/// Asks on stderr and reads answers from stdin.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompter;

impl TerminalPrompter {
    fn read_line(message: &str) -> Option<String> {
        let mut err = io::stderr().lock();
        write!(err, "{message} ").ok()?;
        err.flush().ok()?;

        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
            Err(err) => {
                warn!(error = %err, "failed reading answer");
                None
            }
        }
    }
}

impl Prompter for TerminalPrompter {
    fn confirm(&mut self, message: &str) -> bool {
        Self::read_line(&format!("{message} (yes/no)"))
            .map(|answer| matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
            .unwrap_or(false)
    }

    fn prompt(&mut self, message: &str, default: &str) -> Option<String> {
        let answer = Self::read_line(&format!("{message} [{default}]"))?;
        if answer.trim().is_empty() {
            Some(default.to_string())
        } else {
            Some(answer)
        }
    }

    fn alert(&mut self, message: &str) {
        let mut err = io::stderr().lock();
        if let Err(e) = writeln!(err, "{message}") {
            warn!(error = %e, "failed writing alert");
        }
    }
}
