//! Parsing for the optimizer configuration document (version 1 and 2).
//!
//! A malformed configuration is fatal (unlike a user-facing editor config,
//! there is no sensible default for "which classes need caches"), so
//! [`parse_str`] and [`load_from_path`] both return `Result` rather than
//! falling back silently.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use cache_model::OptimizerError;
use serde::Deserialize;

#[derive(Debug, Clone, Default)]
pub struct OptimizerConfig {
    pub version: u32,
    /// Class name -> priority (lower is more important). Populated from
    /// either the version-1 `neededClasses` array or the class-tagged
    /// entries of the version-2 array, numbered by position within the
    /// class-only subsequence.
    pub needed_class_priority: HashMap<String, usize>,
    pub needed_metaclass_priority: HashMap<String, usize>,
    pub selectors_to_inline: HashSet<String>,
    pub class_hierarchies_to_flatten: HashSet<String>,
    pub metaclass_hierarchies_to_flatten: HashSet<String>,
}

impl OptimizerConfig {
    pub fn class_priority(&self, name: &str, is_metaclass: bool) -> Option<usize> {
        if is_metaclass {
            self.needed_metaclass_priority.get(name).copied()
        } else {
            self.needed_class_priority.get(name).copied()
        }
    }

    pub fn is_flattening_root(&self, name: &str, is_metaclass: bool) -> bool {
        if is_metaclass {
            self.metaclass_hierarchies_to_flatten.contains(name)
        } else {
            self.class_hierarchies_to_flatten.contains(name)
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
struct RawLocatorEntry {
    name: String,
    #[serde(default)]
    metaclass: u8,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    version: u32,
    #[serde(default)]
    needed_classes: Vec<serde_json::Value>,
    #[serde(default)]
    needed_metaclasses: Vec<String>,
    #[serde(default)]
    selectors_to_inline: Vec<String>,
    #[serde(default)]
    flattening_roots: Vec<RawLocatorEntry>,
}

/// Parse an already-read configuration document.
pub fn parse_str(json: &str) -> Result<OptimizerConfig, OptimizerError> {
    let raw: RawConfig = serde_json::from_str(json)
        .map_err(|e| OptimizerError::Configuration(format!("invalid JSON: {e}")))?;
    build_config(raw)
}

/// Read and parse a configuration document from disk. The only filesystem
/// access in this crate; callers that already have the document in memory
/// should use [`parse_str`] instead.
pub fn load_from_path(path: &Path) -> anyhow::Result<OptimizerConfig> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read configuration {}: {e}", path.display()))?;
    let config = parse_str(&text)?;
    tracing::info!(
        target: "config",
        path = %path.display(),
        version = config.version,
        needed_classes = config.needed_class_priority.len(),
        needed_metaclasses = config.needed_metaclass_priority.len(),
        "config_loaded"
    );
    Ok(config)
}

fn build_config(raw: RawConfig) -> Result<OptimizerConfig, OptimizerError> {
    let (needed_class_priority, needed_metaclass_priority) = match raw.version {
        1 => {
            let mut classes = HashMap::new();
            for (idx, value) in raw.needed_classes.iter().enumerate() {
                let name = value.as_str().ok_or_else(|| {
                    OptimizerError::Configuration(
                        "version 1 expects neededClasses as an array of strings".into(),
                    )
                })?;
                classes.insert(name.to_string(), idx);
            }
            let metaclasses = raw
                .needed_metaclasses
                .iter()
                .enumerate()
                .map(|(idx, name)| (name.clone(), idx))
                .collect();
            (classes, metaclasses)
        }
        2 => {
            let mut classes = HashMap::new();
            let mut metaclasses = HashMap::new();
            for value in &raw.needed_classes {
                let entry: RawLocatorEntry =
                    serde_json::from_value(value.clone()).map_err(|e| {
                        OptimizerError::Configuration(format!(
                            "version 2 neededClasses entry must be {{name, metaclass}}: {e}"
                        ))
                    })?;
                if entry.metaclass != 0 {
                    let idx = metaclasses.len();
                    metaclasses.insert(entry.name, idx);
                } else {
                    let idx = classes.len();
                    classes.insert(entry.name, idx);
                }
            }
            (classes, metaclasses)
        }
        other => {
            return Err(OptimizerError::Configuration(format!(
                "unsupported configuration version {other}, expected 1 or 2"
            )));
        }
    };

    let selectors_to_inline = raw.selectors_to_inline.into_iter().collect();

    let (class_hierarchies_to_flatten, metaclass_hierarchies_to_flatten) =
        if raw.flattening_roots.is_empty() {
            let mut classes = HashSet::new();
            classes.insert("OS_object".to_string());
            (classes, HashSet::new())
        } else {
            let mut classes = HashSet::new();
            let mut metaclasses = HashSet::new();
            for entry in raw.flattening_roots {
                if entry.metaclass != 0 {
                    metaclasses.insert(entry.name);
                } else {
                    classes.insert(entry.name);
                }
            }
            (classes, metaclasses)
        };

    Ok(OptimizerConfig {
        version: raw.version,
        needed_class_priority,
        needed_metaclass_priority,
        selectors_to_inline,
        class_hierarchies_to_flatten,
        metaclass_hierarchies_to_flatten,
    })
}
