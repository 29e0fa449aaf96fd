use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, anyhow};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

use crate::model::{ListWindow, Timer, parse_records};

pub const WINDOWS_KEY: &str = "taskWindows";
pub const TIMERS_KEY: &str = "taskTimers";
pub const THEME_KEY: &str = "appTheme";

/// Suffix of the key that keeps a stored value which could not be read in
/// full, so the next save never overwrites the only copy.
pub const UNREADABLE_SUFFIX: &str = "-unreadable";

/// String key-value storage with the shape of the browser's local storage.
pub trait KeyValueStore {
    fn get_item(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set_item(&mut self, key: &str, value: &str) -> anyhow::Result<()>;
    fn remove_item(&mut self, key: &str) -> anyhow::Result<()>;
}

/// One `<key>.json` file per key inside a data directory.
#[derive(Debug)]
pub struct FileStore {
    pub data_dir: PathBuf,
}

impl FileStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        info!(data_dir = %data_dir.display(), "opened file store");
        Ok(Self { data_dir })
    }

    pub fn path_for(&self, key: &str) -> anyhow::Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-');
        if !valid {
            return Err(anyhow!("invalid storage key: {key:?}"));
        }
        Ok(self.data_dir.join(format!("{key}.json")))
    }
}

impl KeyValueStore for FileStore {
    #[tracing::instrument(skip(self))]
    fn get_item(&self, key: &str) -> anyhow::Result<Option<String>> {
        let path = self.path_for(key)?;
        if !path.exists() {
            debug!(file = %path.display(), "no stored value");
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        Ok(Some(raw))
    }

    #[tracing::instrument(skip(self, value))]
    fn set_item(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let path = self.path_for(key)?;
        debug!(file = %path.display(), bytes = value.len(), "writing value atomically");

        let mut temp = NamedTempFile::new_in(&self.data_dir)?;
        temp.write_all(value.as_bytes())?;
        temp.flush()?;
        temp.persist(&path)
            .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn remove_item(&mut self, key: &str) -> anyhow::Result<()> {
        let path = self.path_for(key)?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("failed removing {}", path.display()))?;
        }
        Ok(())
    }
}

/// In-process store. Clones share the same map, so a test can keep one
/// handle while the application owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    items: Rc<RefCell<BTreeMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        self.items.borrow().keys().cloned().collect()
    }
}

impl KeyValueStore for MemoryStore {
    fn get_item(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.items.borrow().get(key).cloned())
    }

    fn set_item(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        self.items
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&mut self, key: &str) -> anyhow::Result<()> {
        self.items.borrow_mut().remove(key);
        Ok(())
    }
}

/// Maps the named application state onto a [`KeyValueStore`].
///
/// Loads never fail: unreadable or malformed values are logged and replaced
/// by the default for that key. List values are read record by record and
/// bad records are skipped. Whenever anything was dropped the raw value is
/// copied to `<key>-unreadable` first. Writes that fail are logged and
/// dropped so a storage hiccup never interrupts the mutation that triggered
/// it.
pub struct Persistence {
    store: Box<dyn KeyValueStore>,
}

impl Persistence {
    pub fn new(store: impl KeyValueStore + 'static) -> Self {
        Self {
            store: Box::new(store),
        }
    }

    #[tracing::instrument(skip(self))]
    pub fn load_windows(&mut self) -> Vec<ListWindow> {
        self.load_records(WINDOWS_KEY)
    }

    #[tracing::instrument(skip(self))]
    pub fn load_timers(&mut self) -> Vec<Timer> {
        self.load_records(TIMERS_KEY)
    }

    /// Reads the theme name. Values written as bare text by older builds
    /// are accepted alongside JSON strings.
    #[tracing::instrument(skip(self))]
    pub fn load_theme(&self) -> Option<String> {
        let raw = self.load_raw(THEME_KEY)?;
        let name = match serde_json::from_str::<String>(&raw) {
            Ok(name) => name,
            Err(_) => raw.trim().to_string(),
        };
        if name.is_empty() { None } else { Some(name) }
    }

    #[tracing::instrument(skip(self, windows), fields(count = windows.len()))]
    pub fn save_windows(&mut self, windows: &[ListWindow]) {
        self.save_json(WINDOWS_KEY, windows);
    }

    #[tracing::instrument(skip(self, timers), fields(count = timers.len()))]
    pub fn save_timers(&mut self, timers: &[Timer]) {
        self.save_json(TIMERS_KEY, timers);
    }

    #[tracing::instrument(skip(self))]
    pub fn save_theme(&mut self, name: &str) {
        self.save_json(THEME_KEY, name);
    }

    fn load_raw(&self, key: &str) -> Option<String> {
        match self.store.get_item(key) {
            Ok(raw) => raw.filter(|raw| !raw.trim().is_empty()),
            Err(err) => {
                error!(key, error = ?err, "failed reading stored state");
                None
            }
        }
    }

    fn load_records<T: DeserializeOwned + Serialize>(&mut self, key: &str) -> Vec<T> {
        let Some(raw) = self.load_raw(key) else {
            return vec![];
        };

        let values = match serde_json::from_str::<Vec<serde_json::Value>>(&raw) {
            Ok(values) => values,
            Err(err) => {
                warn!(key, error = %err, "stored state is malformed; using defaults");
                self.keep_unreadable(key, &raw);
                return vec![];
            }
        };

        let stored = record_count(&values);
        let records: Vec<T> = parse_records(values, key);
        let kept = match serde_json::to_value(&records) {
            Ok(serde_json::Value::Array(items)) => record_count(&items),
            _ => 0,
        };
        if kept < stored {
            warn!(key, stored, kept, "some stored records could not be read");
            self.keep_unreadable(key, &raw);
        }
        debug!(key, count = records.len(), "loaded stored state");
        records
    }

    fn keep_unreadable(&mut self, key: &str, raw: &str) {
        let backup = format!("{key}{UNREADABLE_SUFFIX}");
        match self.store.set_item(&backup, raw) {
            Ok(()) => warn!(key, backup = %backup, "kept a copy of the unreadable stored value"),
            Err(err) => error!(key, error = ?err, "failed keeping unreadable stored value"),
        }
    }

    fn save_json<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) {
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(err) => {
                error!(key, error = %err, "failed serializing state");
                return;
            }
        };
        if let Err(err) = self.store.set_item(key, &json) {
            error!(key, error = ?err, "failed writing state; continuing");
        }
    }
}

/// Counts records at every depth, so a task dropped from inside a window
/// shows up as well as a dropped window.
fn record_count(values: &[serde_json::Value]) -> usize {
    values
        .iter()
        .map(|value| match value {
            serde_json::Value::Array(items) => 1 + record_count(items),
            serde_json::Value::Object(fields) => {
                1 + fields
                    .values()
                    .filter_map(|field| field.as_array())
                    .map(|items| record_count(items))
                    .sum::<usize>()
            }
            _ => 1,
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tempfile::tempdir;

    use super::{
        FileStore, KeyValueStore, MemoryStore, Persistence, THEME_KEY, TIMERS_KEY,
        UNREADABLE_SUFFIX, WINDOWS_KEY,
    };
    use crate::model::{ListWindow, Task, Timer};

    #[test]
    fn file_store_roundtrips_and_removes() {
        let temp = tempdir().expect("tempdir");
        let mut store = FileStore::open(temp.path()).expect("open store");

        assert_eq!(store.get_item("appTheme").expect("get"), None);
        store.set_item("appTheme", "\"green\"").expect("set");
        assert_eq!(
            store.get_item("appTheme").expect("get").as_deref(),
            Some("\"green\"")
        );
        assert!(temp.path().join("appTheme.json").exists());

        store.remove_item("appTheme").expect("remove");
        assert_eq!(store.get_item("appTheme").expect("get"), None);
    }

    #[test]
    fn file_store_rejects_path_like_keys() {
        let temp = tempdir().expect("tempdir");
        let store = FileStore::open(temp.path()).expect("open store");
        assert!(store.path_for("../escape").is_err());
        assert!(store.path_for("").is_err());
    }

    #[test]
    fn malformed_windows_fall_back_to_empty_and_are_kept() {
        let mut raw = MemoryStore::new();
        raw.set_item(WINDOWS_KEY, "{not json").expect("set");
        let mut persistence = Persistence::new(raw.clone());
        assert!(persistence.load_windows().is_empty());

        let backup = format!("{WINDOWS_KEY}{UNREADABLE_SUFFIX}");
        assert_eq!(raw.get_item(&backup).expect("get").as_deref(), Some("{not json"));
    }

    #[test]
    fn unreadable_records_are_skipped_one_by_one() {
        let mut raw = MemoryStore::new();
        let good = Timer::new("Tea".to_string(), 0, 3, 0);
        let stored = format!(
            "[{}, {{\"id\": false, \"title\": \"broken\"}}]",
            serde_json::to_string(&good).expect("encode")
        );
        raw.set_item(TIMERS_KEY, &stored).expect("set");
        let mut persistence = Persistence::new(raw.clone());

        assert_eq!(persistence.load_timers(), vec![good]);
        let backup = format!("{TIMERS_KEY}{UNREADABLE_SUFFIX}");
        assert_eq!(raw.get_item(&backup).expect("get"), Some(stored));
    }

    #[test]
    fn clean_loads_leave_no_backup() {
        let raw = MemoryStore::new();
        let mut persistence = Persistence::new(raw.clone());
        let now = Utc::now();
        let mut window = ListWindow::new("List 1".to_string(), now);
        window.tasks.push(Task::new("Buy milk".to_string(), now));
        persistence.save_windows(std::slice::from_ref(&window));

        assert_eq!(persistence.load_windows(), vec![window]);
        assert_eq!(raw.keys(), vec![WINDOWS_KEY.to_string()]);
    }

    #[test]
    fn theme_accepts_bare_and_json_strings() {
        let mut raw = MemoryStore::new();
        let persistence = Persistence::new(raw.clone());
        assert_eq!(persistence.load_theme(), None);

        raw.set_item(THEME_KEY, "purple").expect("set");
        assert_eq!(persistence.load_theme().as_deref(), Some("purple"));

        raw.set_item(THEME_KEY, "\"dark\"").expect("set");
        assert_eq!(persistence.load_theme().as_deref(), Some("dark"));
    }

    #[test]
    fn windows_roundtrip_through_persistence() {
        let raw = MemoryStore::new();
        let mut persistence = Persistence::new(raw.clone());

        let now = Utc::now();
        let mut window = ListWindow::new("List 1".to_string(), now);
        window.tasks.push(Task::new("Buy milk".to_string(), now));
        persistence.save_windows(std::slice::from_ref(&window));

        assert_eq!(raw.keys(), vec![WINDOWS_KEY.to_string()]);
        assert_eq!(persistence.load_windows(), vec![window]);
    }
}
