use std::fmt;

use tracing::{debug, warn};

pub const DEFAULT_THEME: &str = "blue";

/// Themes with a control in the theme picker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Theme {
    Blue,
    Green,
    Purple,
    Orange,
    Dark,
}

impl Theme {
    pub const ALL: [Theme; 5] = [
        Theme::Blue,
        Theme::Green,
        Theme::Purple,
        Theme::Orange,
        Theme::Dark,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|theme| theme.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Theme::Blue => "blue",
            Theme::Green => "green",
            Theme::Purple => "purple",
            Theme::Orange => "orange",
            Theme::Dark => "dark",
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemeState {
    name: String,
}

impl ThemeState {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The picker control to highlight, if the name is a known theme.
    pub fn active_control(&self) -> Option<Theme> {
        Theme::from_name(&self.name)
    }

    /// Unknown names are kept as-is; they simply leave no control active.
    pub fn switch(&mut self, name: &str) {
        if Theme::from_name(name).is_none() {
            warn!(theme = name, "switching to unrecognized theme");
        } else {
            debug!(theme = name, "switching theme");
        }
        self.name = name.to_string();
    }
}

impl Default for ThemeState {
    fn default() -> Self {
        Self::new(DEFAULT_THEME)
    }
}

#[cfg(test)]
mod tests {
    use super::{Theme, ThemeState};

    #[test]
    fn known_and_unknown_names() {
        let mut state = ThemeState::default();
        assert_eq!(state.active_control(), Some(Theme::Blue));

        state.switch("dark");
        assert_eq!(state.name(), "dark");
        assert_eq!(state.active_control(), Some(Theme::Dark));

        state.switch("neon");
        assert_eq!(state.name(), "neon");
        assert_eq!(state.active_control(), None);
    }
}
