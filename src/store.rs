//! Parameter record storage
//!
//! The record file is the only state shared between runs. All reads and
//! writes go through [`ParameterStore`]; the JSON file implementation only
//! rewrites when the rendered bytes differ, and replaces the file atomically.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{LevelsError, LevelsResult};
use crate::params::ParameterRecord;

pub trait ParameterStore {
    /// Human-readable location, used in logs and `NotFound`
    fn location(&self) -> String;

    /// The stored record, or `None` if nothing has been written yet
    fn load(&self) -> LevelsResult<Option<ParameterRecord>>;

    /// Persist `record` unless the stored copy is identical; returns whether
    /// a write happened.
    fn save_if_changed(&self, record: &ParameterRecord) -> LevelsResult<bool>;
}

/// Deterministic text form of a record: two-space indent, UTF-8 without
/// escaping, trailing newline.
pub fn render(record: &ParameterRecord) -> LevelsResult<String> {
    let mut text = serde_json::to_string_pretty(record)?;
    text.push('\n');
    Ok(text)
}

/// Record stored as a JSON file on disk
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sibling temp file, so the final rename never crosses filesystems
    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "parameters.json".to_string());
        self.path.with_file_name(format!(".{}.tmp", name))
    }

    fn read_existing(&self) -> LevelsResult<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LevelsError::io(&self.path, e)),
        }
    }

    fn write_atomic(&self, contents: &[u8]) -> LevelsResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| LevelsError::io(parent, e))?;
            }
        }

        let tmp = self.temp_path();
        let result = File::create(&tmp)
            .and_then(|mut file| {
                file.write_all(contents)?;
                file.sync_all()
            })
            .and_then(|_| fs::rename(&tmp, &self.path));

        if let Err(e) = result {
            warn!("Write to {} failed, leaving original in place", self.path.display());
            fs::remove_file(&tmp).ok();
            return Err(LevelsError::io(&self.path, e));
        }

        Ok(())
    }
}

impl ParameterStore for JsonFileStore {
    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn load(&self) -> LevelsResult<Option<ParameterRecord>> {
        match self.read_existing()? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn save_if_changed(&self, record: &ParameterRecord) -> LevelsResult<bool> {
        let rendered = render(record)?;

        if let Some(existing) = self.read_existing()? {
            if existing == rendered.as_bytes() {
                debug!("{} already up to date", self.path.display());
                return Ok(false);
            }
        }

        self.write_atomic(rendered.as_bytes())?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantize::Level;
    use crate::params::ParameterBlock;
    use crate::Symbol;

    fn block(base: f64) -> ParameterBlock {
        ParameterBlock {
            support: Level::Float(base - 20.0),
            resistance: Level::Float(base + 20.0),
            break_up: Level::Float(base + 10.0),
            break_down: Level::Float(base - 10.0),
            sl: Level::Float(16.2),
            tp: Level::Float(19.8),
            trail: Level::Float(12.6),
            retest_range: Level::Float(3.0),
            extra: Default::default(),
        }
    }

    fn record(ts: &str) -> ParameterRecord {
        let mut r = ParameterRecord::new(ts);
        r.push_block(Symbol::new("XAUUSD"), block(2030.0));
        r
    }

    #[test]
    fn test_render_layout() {
        let text = render(&record("2025-11-05T09:00:00+09:00")).unwrap();
        let expected = "{\n  \"timestamp\": \"2025-11-05T09:00:00+09:00\",\n  \"XAUUSD\": {\n    \"Support\": 2010.0,\n    \"Resistance\": 2050.0,\n    \"BreakUp\": 2040.0,\n    \"BreakDown\": 2020.0,\n    \"SL\": 16.2,\n    \"TP\": 19.8,\n    \"Trail\": 12.6,\n    \"RetestRange\": 3.0\n  }\n}\n";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_missing_file_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("parameters.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_second_identical_save_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("parameters.json"));
        let r = record("2025-11-05T09:00:00+09:00");

        assert!(store.save_if_changed(&r).unwrap());
        assert!(!store.save_if_changed(&r).unwrap());
        assert_eq!(store.load().unwrap(), Some(r));
    }

    #[test]
    fn test_changed_record_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("parameters.json"));

        assert!(store.save_if_changed(&record("2025-11-05T09:00:00+09:00")).unwrap());
        assert!(store.save_if_changed(&record("2025-11-06T09:00:00+09:00")).unwrap());
        assert_eq!(
            store.load().unwrap().unwrap().timestamp,
            "2025-11-06T09:00:00+09:00"
        );
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("parameters.json"));
        store.save_if_changed(&record("t")).unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["parameters.json".to_string()]);
    }

    #[test]
    fn test_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("out").join("parameters.json"));
        assert!(store.save_if_changed(&record("t")).unwrap());
        assert!(store.path().exists());
    }

    #[test]
    fn test_reformatted_file_is_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parameters.json");
        let r = record("t");
        // same content, compact layout
        fs::write(&path, serde_json::to_string(&r).unwrap()).unwrap();

        let store = JsonFileStore::new(&path);
        assert_eq!(store.load().unwrap(), Some(r.clone()));
        assert!(store.save_if_changed(&r).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), render(&r).unwrap());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parameters.json");
        fs::write(&path, "{ not json").unwrap();
        let store = JsonFileStore::new(&path);
        assert!(matches!(store.load(), Err(LevelsError::Serialization(_))));
    }

    #[test]
    fn test_failed_write_leaves_no_trace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parameters.json");
        // a non-empty directory in place of the file makes the rename fail
        fs::create_dir(&path).unwrap();
        fs::write(path.join("keep"), b"original").unwrap();

        let store = JsonFileStore::new(&path);
        let err = store.write_atomic(b"{}\n").unwrap_err();
        assert!(matches!(err, LevelsError::Io { .. }));

        assert_eq!(fs::read(path.join("keep")).unwrap(), b"original");
        assert!(!dir.path().join(".parameters.json.tmp").exists());
    }
}
