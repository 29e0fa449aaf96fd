//! Scripted stand-ins for the dialogs and completion effects, shared by the
//! unit tests and the integration tests under `tests/`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::effects::CompletionEffects;
use crate::prompt::Prompter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Prepared,
    Notified { title: String, body: String },
    Tone,
}

/// Records effects into a shared log. `failing` makes every effect error
/// after being recorded.
#[derive(Debug, Clone, Default)]
pub struct RecordingEffects {
    pub log: Rc<RefCell<Vec<Effect>>>,
    pub failing: bool,
}

impl RecordingEffects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn effects(&self) -> Vec<Effect> {
        self.log.borrow().clone()
    }

    fn record(&self, effect: Effect) -> anyhow::Result<()> {
        self.log.borrow_mut().push(effect);
        if self.failing {
            anyhow::bail!("effect unavailable");
        }
        Ok(())
    }
}

impl CompletionEffects for RecordingEffects {
    fn prepare(&mut self) -> anyhow::Result<()> {
        self.record(Effect::Prepared)
    }

    fn notify(&mut self, title: &str, body: &str) -> anyhow::Result<()> {
        self.record(Effect::Notified {
            title: title.to_string(),
            body: body.to_string(),
        })
    }

    fn tone(&mut self) -> anyhow::Result<()> {
        self.record(Effect::Tone)
    }
}

/// Answers from a queue and records every message shown.
///
/// Clones share state, so a test keeps one handle while the app owns the
/// other. An exhausted queue declines.
#[derive(Debug, Clone, Default)]
pub struct ScriptedPrompter {
    answers: Rc<RefCell<VecDeque<bool>>>,
    replies: Rc<RefCell<VecDeque<Option<String>>>>,
    alerts: Rc<RefCell<Vec<String>>>,
    asked: Rc<RefCell<Vec<String>>>,
}

impl ScriptedPrompter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answering(answers: impl IntoIterator<Item = bool>) -> Self {
        let prompter = Self::default();
        prompter.answers.borrow_mut().extend(answers);
        prompter
    }

    pub fn push_reply(&self, reply: Option<String>) {
        self.replies.borrow_mut().push_back(reply);
    }

    pub fn alerts(&self) -> Vec<String> {
        self.alerts.borrow().clone()
    }

    pub fn asked(&self) -> Vec<String> {
        self.asked.borrow().clone()
    }
}

impl Prompter for ScriptedPrompter {
    fn confirm(&mut self, message: &str) -> bool {
        self.asked.borrow_mut().push(message.to_string());
        self.answers.borrow_mut().pop_front().unwrap_or(false)
    }

    fn prompt(&mut self, message: &str, _default: &str) -> Option<String> {
        self.asked.borrow_mut().push(message.to_string());
        self.replies.borrow_mut().pop_front().flatten()
    }

    fn alert(&mut self, message: &str) {
        self.alerts.borrow_mut().push(message.to_string());
    }
}
