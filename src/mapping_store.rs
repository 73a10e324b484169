//! Durable command → installer-strategy mappings.
//!
//! The store is a single JSON object keyed by lowercase command name. It is
//! read once at startup and rewritten in full whenever a new strategy is
//! learned. Loading never fails: a missing or malformed file yields an empty
//! store plus a diagnostic for the caller to print.

use crate::config::Config;
use crate::error::AegisError;
use crate::installers::{InstallTarget, parse_install_command};
use anyhow::Result;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const MAPPING_FILE: &str = "command_mapping.json";

/// One persisted mapping record.
///
/// A record is either a single strategy (`installer` + `package`, or an
/// `install_cmd` string) or a multi-option strategy (`options`). Fields the
/// engine does not know are kept so they survive a rewrite.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_cmd: Option<String>,
    /// Environment label → install invocation, in presentation order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<IndexMap<String, String>>,
    /// Label of the option that last installed successfully.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// How a mapped command is installed.
#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    Single(InstallTarget),
    MultiOption(IndexMap<String, String>),
}

impl MappingRecord {
    pub fn single(target: &InstallTarget) -> Self {
        Self {
            installer: Some(target.installer.clone()),
            package: Some(target.package.clone()),
            ..Self::default()
        }
    }

    /// Interprets the record. Options take precedence over a single strategy.
    pub fn strategy(&self) -> Result<Strategy, AegisError> {
        if let Some(options) = &self.options {
            if options.is_empty() {
                return Err(AegisError::parse("mapping record", "empty options"));
            }
            return Ok(Strategy::MultiOption(options.clone()));
        }
        match (&self.installer, &self.package, &self.install_cmd) {
            (Some(installer), Some(package), _) => {
                Ok(Strategy::Single(InstallTarget::new(installer, package)))
            }
            (_, _, Some(cmd)) => Ok(Strategy::Single(parse_install_command(cmd)?)),
            _ => Err(AegisError::parse(
                "mapping record",
                serde_json::to_string(self).unwrap_or_default(),
            )),
        }
    }
}

/// A stored value: a record the engine understands, or raw JSON it does not.
///
/// Unreadable values are written back untouched so a rewrite never drops
/// hand-edited entries.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum Entry {
    Record(MappingRecord),
    Unreadable(Value),
}

impl Entry {
    fn record(&self) -> Option<&MappingRecord> {
        match self {
            Entry::Record(record) => Some(record),
            Entry::Unreadable(_) => None,
        }
    }
}

pub struct MappingStore {
    path: PathBuf,
    records: IndexMap<String, Entry>,
    diagnostic: Option<String>,
}

impl MappingStore {
    /// Loads the store at `path`, degrading to an empty store on any problem.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut store = Self {
            path,
            records: IndexMap::new(),
            diagnostic: None,
        };

        if !store.path.exists() {
            debug!("No mapping file at {}", store.path.display());
            return store;
        }

        let content = match fs::read_to_string(&store.path) {
            Ok(content) => content,
            Err(e) => {
                store.diagnostic = Some(format!(
                    "⚠️  Could not read {}: {}; starting with no mappings",
                    store.path.display(),
                    e
                ));
                return store;
            }
        };

        let raw: IndexMap<String, Value> = match serde_json::from_str(&content) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Malformed mapping file {}: {}", store.path.display(), e);
                store.diagnostic = Some(format!(
                    "⚠️  Mapping file {} is malformed ({}); starting with no mappings",
                    store.path.display(),
                    e
                ));
                return store;
            }
        };

        let mut skipped = Vec::new();
        for (command, value) in raw {
            match MappingRecord::deserialize(&value) {
                Ok(record) => {
                    store.records.insert(command.to_lowercase(), Entry::Record(record));
                }
                Err(e) => {
                    debug!("Skipping mapping '{}': {}", command, e);
                    store
                        .records
                        .insert(command.to_lowercase(), Entry::Unreadable(value));
                    skipped.push(command);
                }
            }
        }
        if !skipped.is_empty() {
            store.diagnostic = Some(format!(
                "⚠️  Ignored malformed mapping records (kept in the file as-is): {}",
                skipped.join(", ")
            ));
        }

        info!(
            "Loaded {} mappings from {}",
            store.len(),
            store.path.display()
        );
        store
    }

    /// Finds the mapping file for this session.
    ///
    /// Order: the configured `mappings_file`, the nearest
    /// `.aegis/command_mapping.json` above the current directory, then the
    /// file in the aegis home directory.
    pub fn locate(config: &Config) -> Result<PathBuf> {
        if let Some(path) = &config.mappings_file {
            return Ok(path.clone());
        }
        if let Some(path) = Self::find_in_hierarchy(&env::current_dir()?) {
            return Ok(path);
        }
        Ok(Config::aegis_home()?.join(MAPPING_FILE))
    }

    fn find_in_hierarchy(start: &Path) -> Option<PathBuf> {
        let mut current = Some(start);
        while let Some(dir) = current {
            let candidate = dir.join(".aegis").join(MAPPING_FILE);
            if candidate.is_file() {
                debug!("Found mapping file at {}", candidate.display());
                return Some(candidate);
            }
            current = dir.parent();
        }
        None
    }

    pub fn get(&self, command: &str) -> Option<&MappingRecord> {
        self.records.get(&command.to_lowercase())?.record()
    }

    pub fn get_mut(&mut self, command: &str) -> Option<&mut MappingRecord> {
        match self.records.get_mut(&command.to_lowercase())? {
            Entry::Record(record) => Some(record),
            Entry::Unreadable(_) => None,
        }
    }

    /// Inserts or overwrites the record for `command`.
    pub fn insert(&mut self, command: &str, record: MappingRecord) {
        self.records
            .insert(command.to_lowercase(), Entry::Record(record));
    }

    /// Number of usable records.
    pub fn len(&self) -> usize {
        self.records.values().filter_map(Entry::record).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Commands with usable records, in file order.
    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.records
            .iter()
            .filter(|(_, entry)| entry.record().is_some())
            .map(|(command, _)| command.as_str())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Problem found while loading, if any.
    pub fn diagnostic(&self) -> Option<&str> {
        self.diagnostic.as_deref()
    }

    /// Rewrites the whole file from the in-memory records.
    pub fn save(&self) -> Result<(), AegisError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut content = serde_json::to_string_pretty(&self.records)?;
        content.push('\n');
        fs::write(&self.path, content)?;
        info!(
            "Saved {} mappings to {}",
            self.len(),
            self.path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"{
  "git": {
    "language": "system",
    "installer": "winget",
    "package": "Git.Git"
  },
  "foo": {
    "installer": "pip",
    "package": "foo-cli"
  },
  "http": {
    "install_cmd": "pip install httpie"
  },
  "python": {
    "language": "multi",
    "options": {
      "python": "pip install x",
      "javascript": "npm install x"
    },
    "notes": "kept as-is"
  }
}
"#;

    fn write_sample(dir: &TempDir) -> PathBuf {
        let path = dir.path().join(MAPPING_FILE);
        fs::write(&path, SAMPLE).unwrap();
        path
    }

    #[test]
    fn test_load_missing_file_is_empty_without_diagnostic() {
        let dir = TempDir::new().unwrap();
        let store = MappingStore::load(dir.path().join("nope.json"));

        assert!(store.is_empty());
        assert!(store.diagnostic().is_none());
    }

    #[test]
    fn test_load_malformed_file_is_empty_with_diagnostic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(MAPPING_FILE);
        fs::write(&path, "{ not json").unwrap();

        let store = MappingStore::load(&path);

        assert!(store.is_empty());
        assert!(store.diagnostic().unwrap().contains("malformed"));
    }

    #[test]
    fn test_load_skips_non_object_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(MAPPING_FILE);
        fs::write(&path, r#"{"jq": {"installer": "apt", "package": "jq"}, "bad": 42}"#).unwrap();

        let store = MappingStore::load(&path);

        assert_eq!(store.len(), 1);
        assert!(store.get("jq").is_some());
        assert!(store.get("bad").is_none());
        assert!(store.diagnostic().unwrap().contains("bad"));
    }

    #[test]
    fn test_unreadable_records_survive_a_rewrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(MAPPING_FILE);
        fs::write(&path, r#"{"bad": 42, "odd": {"installer": 7}}"#).unwrap();

        let mut store = MappingStore::load(&path);
        store.insert("jq", MappingRecord::single(&InstallTarget::new("apt", "jq")));
        store.save().unwrap();

        let raw: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["bad"], 42);
        assert_eq!(raw["odd"], serde_json::json!({"installer": 7}));
        assert_eq!(raw["jq"]["package"], "jq");
        assert_eq!(MappingStore::load(&path).len(), 1);
    }

    #[test]
    fn test_save_of_load_is_a_fixed_point() {
        let dir = TempDir::new().unwrap();
        let path = write_sample(&dir);

        MappingStore::load(&path).save().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), SAMPLE);
    }

    #[test]
    fn test_preserves_insertion_order() {
        let dir = TempDir::new().unwrap();
        let store = MappingStore::load(write_sample(&dir));

        let commands: Vec<&str> = store.commands().collect();
        assert_eq!(commands, vec!["git", "foo", "http", "python"]);

        let Strategy::MultiOption(options) = store.get("python").unwrap().strategy().unwrap() else {
            panic!("expected options");
        };
        let labels: Vec<&String> = options.keys().collect();
        assert_eq!(labels, vec!["python", "javascript"]);
    }

    #[test]
    fn test_strategy_shapes() {
        let dir = TempDir::new().unwrap();
        let store = MappingStore::load(write_sample(&dir));

        assert_eq!(
            store.get("FOO").unwrap().strategy().unwrap(),
            Strategy::Single(InstallTarget::new("pip", "foo-cli"))
        );
        assert_eq!(
            store.get("http").unwrap().strategy().unwrap(),
            Strategy::Single(InstallTarget::new("pip", "httpie"))
        );
    }

    #[test]
    fn test_uninterpretable_record_is_parse_error() {
        let record = MappingRecord {
            install_cmd: Some("npm".to_string()),
            ..MappingRecord::default()
        };
        assert!(matches!(record.strategy(), Err(AegisError::Parse { .. })));

        let empty = MappingRecord::default();
        assert!(empty.strategy().is_err());
    }

    #[test]
    fn test_insert_overwrites_and_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(MAPPING_FILE);
        let mut store = MappingStore::load(&path);

        store.insert("Zork", MappingRecord::single(&InstallTarget::new("npm", "zork")));
        store.insert("zork", MappingRecord::single(&InstallTarget::new("pip", "zork-cli")));
        store.save().unwrap();

        let reloaded = MappingStore::load(&path);
        assert_eq!(reloaded.len(), 1);
        assert_eq!(
            reloaded.get("zork").unwrap().strategy().unwrap(),
            Strategy::Single(InstallTarget::new("pip", "zork-cli"))
        );
        let raw: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["zork"], serde_json::json!({"installer": "pip", "package": "zork-cli"}));
    }

    #[test]
    fn test_find_in_hierarchy_walks_up() {
        let dir = TempDir::new().unwrap();
        let aegis = dir.path().join(".aegis");
        fs::create_dir_all(&aegis).unwrap();
        fs::write(aegis.join(MAPPING_FILE), "{}").unwrap();
        let nested = dir.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();

        assert_eq!(
            MappingStore::find_in_hierarchy(&nested),
            Some(aegis.join(MAPPING_FILE))
        );
    }

    #[test]
    fn test_locate_prefers_configured_file() {
        let mut config = Config::default();
        config.mappings_file = Some(PathBuf::from("/tmp/custom.json"));
        assert_eq!(
            MappingStore::locate(&config).unwrap(),
            PathBuf::from("/tmp/custom.json")
        );
    }
}
