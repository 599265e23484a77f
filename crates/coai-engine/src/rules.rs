//! Versioned, hot-reloadable rule directives.
//!
//! A rules file holds global directives, then optional `[agent:<name>]`
//! sections whose lines apply to that agent only:
//!
//! ```text
//! # comments and blank lines are ignored
//! Prefer small functions
//!
//! [agent:openai]
//! Answer with code first
//! ```
//!
//! The system file is the base layer. Each `<projects_root>/<project>/rules.txt`
//! is appended on top of it for requests in that project.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::RuleError;

const PROJECT_RULES_FILE: &str = "rules.txt";

/// One parsed rules file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuleLayer {
    pub global: Vec<String>,
    pub agents: BTreeMap<String, Vec<String>>,
}

impl RuleLayer {
    pub fn parse(text: &str) -> Self {
        let mut layer = Self::default();
        let mut section: Option<String> = None;
        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(name) = line
                .strip_prefix("[agent:")
                .and_then(|rest| rest.strip_suffix(']'))
            {
                let name = name.trim().to_string();
                layer.agents.entry(name.clone()).or_default();
                section = Some(name);
                continue;
            }
            match &section {
                Some(agent) => layer
                    .agents
                    .entry(agent.clone())
                    .or_default()
                    .push(line.to_string()),
                None => layer.global.push(line.to_string()),
            }
        }
        layer
    }

    pub fn is_empty(&self) -> bool {
        self.global.is_empty() && self.agents.values().all(Vec::is_empty)
    }
}

/// Immutable, versioned set of directives. Replaced wholesale on reload.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RuleSet {
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub global: Vec<String>,
    pub agents: BTreeMap<String, Vec<String>>,
    /// Project whose override layer was merged in, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

impl RuleSet {
    pub fn empty(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            created_at: Utc::now(),
            global: Vec::new(),
            agents: BTreeMap::new(),
            project: None,
        }
    }

    fn from_layer(version: &str, created_at: DateTime<Utc>, layer: &RuleLayer) -> Self {
        Self {
            version: version.to_string(),
            created_at,
            global: layer.global.clone(),
            agents: layer.agents.clone(),
            project: None,
        }
    }

    /// Project rules go after the base rules, globally and per agent.
    pub fn merged(&self, project: &str, overlay: &RuleLayer) -> Self {
        let mut merged = self.clone();
        merged.global.extend(overlay.global.iter().cloned());
        for (agent, rules) in &overlay.agents {
            merged
                .agents
                .entry(agent.clone())
                .or_default()
                .extend(rules.iter().cloned());
        }
        merged.project = Some(project.to_string());
        merged
    }

    /// Global directives followed by the ones addressed to `agent`.
    pub fn for_agent(&self, agent: &str) -> Vec<String> {
        let mut out = self.global.clone();
        if let Some(specific) = self.agents.get(agent) {
            out.extend(specific.iter().cloned());
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.global.is_empty() && self.agents.values().all(Vec::is_empty)
    }
}

/// Raw layers read from wherever rules live.
#[derive(Clone, Debug, Default)]
pub struct LoadedRules {
    pub system: RuleLayer,
    pub projects: BTreeMap<String, RuleLayer>,
}

pub trait RuleSource: Send + Sync {
    fn load(&self) -> Result<LoadedRules, RuleError>;
}

impl<T: RuleSource + ?Sized> RuleSource for Arc<T> {
    fn load(&self) -> Result<LoadedRules, RuleError> {
        (**self).load()
    }
}

/// Reads a system rules file plus `<projects_root>/*/rules.txt`.
/// Missing files and a missing projects root are empty layers.
pub struct FileRuleSource {
    system_path: PathBuf,
    projects_root: Option<PathBuf>,
}

impl FileRuleSource {
    pub fn new(system_path: impl Into<PathBuf>, projects_root: Option<PathBuf>) -> Self {
        Self {
            system_path: system_path.into(),
            projects_root,
        }
    }
}

fn read_layer(path: &Path) -> Result<Option<RuleLayer>, RuleError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(RuleLayer::parse(&text))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(RuleError::Read {
            path: path.to_owned(),
            source,
        }),
    }
}

impl RuleSource for FileRuleSource {
    fn load(&self) -> Result<LoadedRules, RuleError> {
        let system = read_layer(&self.system_path)?.unwrap_or_default();
        let mut projects = BTreeMap::new();

        if let Some(root) = &self.projects_root {
            let entries = match std::fs::read_dir(root) {
                Ok(entries) => Some(entries),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(source) => {
                    return Err(RuleError::ProjectsRoot {
                        path: root.clone(),
                        source,
                    })
                }
            };
            for entry in entries.into_iter().flatten().flatten() {
                let dir = entry.path();
                if !dir.is_dir() {
                    continue;
                }
                let Some(name) = dir.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if let Some(layer) = read_layer(&dir.join(PROJECT_RULES_FILE))? {
                    projects.insert(name.to_string(), layer);
                }
            }
        }

        Ok(LoadedRules { system, projects })
    }
}

/// In-memory rules, swappable between reloads.
#[derive(Default)]
pub struct MemoryRuleSource {
    rules: Mutex<LoadedRules>,
    fail_with: Mutex<Option<String>>,
}

impl MemoryRuleSource {
    pub fn new(system: &str) -> Self {
        let source = Self::default();
        source.set_system(system);
        source
    }

    pub fn set_system(&self, text: &str) {
        self.rules.lock().system = RuleLayer::parse(text);
    }

    pub fn set_project(&self, project: &str, text: &str) {
        self.rules
            .lock()
            .projects
            .insert(project.to_string(), RuleLayer::parse(text));
    }

    /// Make subsequent loads fail until cleared with `None`.
    pub fn set_failure(&self, message: Option<&str>) {
        *self.fail_with.lock() = message.map(str::to_string);
    }
}

impl RuleSource for MemoryRuleSource {
    fn load(&self) -> Result<LoadedRules, RuleError> {
        if let Some(msg) = self.fail_with.lock().clone() {
            return Err(RuleError::Source(msg));
        }
        Ok(self.rules.lock().clone())
    }
}

/// Base set plus every project set, all built during reload.
struct ActiveRules {
    base: Arc<RuleSet>,
    projects: HashMap<String, Arc<RuleSet>>,
}

pub struct RuleStore {
    source: Box<dyn RuleSource>,
    active: RwLock<Arc<ActiveRules>>,
    reload_lock: Mutex<()>,
    next_version: AtomicU64,
}

impl RuleStore {
    /// Loads once. A failing first load leaves an empty `v0` set active.
    pub fn new(source: Box<dyn RuleSource>) -> Self {
        let store = Self {
            source,
            active: RwLock::new(Arc::new(ActiveRules {
                base: Arc::new(RuleSet::empty("v0")),
                projects: HashMap::new(),
            })),
            reload_lock: Mutex::new(()),
            next_version: AtomicU64::new(1),
        };
        if let Err(e) = store.reload() {
            warn!(error = %e, "initial rules load failed, starting with empty rules");
        }
        store
    }

    pub fn snapshot(&self) -> Arc<RuleSet> {
        Arc::clone(&self.active.read().base)
    }

    /// The base set merged with `project`'s override layer, if it has one.
    pub fn snapshot_for(&self, project: &str) -> Arc<RuleSet> {
        let active = self.active.read().clone();
        active
            .projects
            .get(project)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&active.base))
    }

    pub fn version(&self) -> String {
        self.snapshot().version.clone()
    }

    /// Parse every layer and swap the active set. On failure the previous
    /// set stays active. Returns the new version.
    pub fn reload(&self) -> Result<String, RuleError> {
        let _serial = self.reload_lock.lock();

        let loaded = self.source.load().inspect_err(|e| {
            warn!(error = %e, "rules reload failed, keeping previous rules");
        })?;

        let version = format!("v{}", self.next_version.fetch_add(1, Ordering::Relaxed));
        let now = Utc::now();
        let base = RuleSet::from_layer(&version, now, &loaded.system);
        let projects = loaded
            .projects
            .iter()
            .map(|(name, layer)| (name.clone(), Arc::new(base.merged(name, layer))))
            .collect::<HashMap<_, _>>();
        let next = Arc::new(ActiveRules {
            base: Arc::new(base),
            projects,
        });

        *self.active.write() = next;
        info!(version = %version, "rules reloaded");
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SYSTEM: &str = "\
# house style
r1
r2

[agent:openai]
o1

[agent:copilot]
c1
";

    #[test]
    fn parse_sections() {
        let layer = RuleLayer::parse(SYSTEM);
        assert_eq!(layer.global, vec!["r1", "r2"]);
        assert_eq!(layer.agents["openai"], vec!["o1"]);
        assert_eq!(layer.agents["copilot"], vec!["c1"]);
    }

    #[test]
    fn parse_empty_and_comment_only() {
        assert!(RuleLayer::parse("").is_empty());
        assert!(RuleLayer::parse("# nothing\n\n   \n").is_empty());
    }

    #[test]
    fn project_rules_append_after_global() {
        let source = MemoryRuleSource::new(SYSTEM);
        source.set_project("demo", "r3\n[agent:openai]\no2\n");
        let store = RuleStore::new(Box::new(source));

        let merged = store.snapshot_for("demo");
        assert_eq!(merged.global, vec!["r1", "r2", "r3"]);
        assert_eq!(merged.agents["openai"], vec!["o1", "o2"]);
        assert_eq!(merged.project.as_deref(), Some("demo"));
        assert_eq!(merged.for_agent("openai"), vec!["r1", "r2", "r3", "o1", "o2"]);

        let other = store.snapshot_for("elsewhere");
        assert_eq!(other.global, vec!["r1", "r2"]);
        assert!(other.project.is_none());
    }

    #[test]
    fn versions_increase_and_snapshots_stay_put() {
        let source = Arc::new(MemoryRuleSource::new("old"));
        let store = RuleStore::new(Box::new(source.clone()));
        let before = store.snapshot();
        assert_eq!(before.version, "v1");

        source.set_system("new");
        assert_eq!(store.reload().unwrap(), "v2");

        assert_eq!(before.global, vec!["old"]);
        assert_eq!(store.snapshot().global, vec!["new"]);
    }

    #[test]
    fn failed_reload_keeps_previous_rules() {
        let source = Arc::new(MemoryRuleSource::new("keep me"));
        let store = RuleStore::new(Box::new(source.clone()));
        source.set_failure(Some("disk on fire"));
        assert!(store.reload().is_err());
        let current = store.snapshot();
        assert_eq!(current.version, "v1");
        assert_eq!(current.global, vec!["keep me"]);
    }

    #[test]
    fn failed_first_load_starts_empty() {
        let source = MemoryRuleSource::new("x");
        source.set_failure(Some("unreadable"));
        let store = RuleStore::new(Box::new(source));
        assert_eq!(store.version(), "v0");
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn file_source_reads_system_and_projects() {
        let dir = tempfile::tempdir().unwrap();
        let system = dir.path().join("rules.txt");
        std::fs::write(&system, "r1\nr2\n").unwrap();
        let projects = dir.path().join("projects");
        std::fs::create_dir_all(projects.join("demo")).unwrap();
        std::fs::create_dir_all(projects.join("no-rules")).unwrap();
        std::fs::write(projects.join("demo").join("rules.txt"), "r3\n").unwrap();

        let store = RuleStore::new(Box::new(FileRuleSource::new(&system, Some(projects))));
        assert_eq!(store.snapshot_for("demo").global, vec!["r1", "r2", "r3"]);
        assert_eq!(store.snapshot_for("no-rules").global, vec!["r1", "r2"]);
    }

    #[test]
    fn file_source_missing_files_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileRuleSource::new(
            dir.path().join("absent.txt"),
            Some(dir.path().join("absent-root")),
        );
        let loaded = source.load().unwrap();
        assert!(loaded.system.is_empty());
        assert!(loaded.projects.is_empty());
    }

    #[test]
    fn concurrent_reload_and_snapshot() {
        use std::thread;

        const ODD: [&str; 3] = ["a", "b", "c"];
        const EVEN: [&str; 3] = ["x", "y", "z"];
        fn expected(version: &str) -> [&'static str; 3] {
            let n: u64 = version.trim_start_matches('v').parse().unwrap();
            if n % 2 == 1 {
                ODD
            } else {
                EVEN
            }
        }

        let source = Arc::new(MemoryRuleSource::new("a\nb\nc"));
        source.set_project("demo", "p");
        let store = Arc::new(RuleStore::new(Box::new(source.clone())));
        assert_eq!(store.version(), "v1");

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    let mut last = 0u64;
                    for _ in 0..500 {
                        let snap = store.snapshot();
                        assert_eq!(snap.global, expected(&snap.version), "torn {}", snap.version);

                        let project = store.snapshot_for("demo");
                        let mut want = expected(&project.version).to_vec();
                        want.push("p");
                        assert_eq!(project.global, want, "torn {}", project.version);

                        let n: u64 = snap.version.trim_start_matches('v').parse().unwrap();
                        assert!(n >= last, "version went backwards: v{last} -> v{n}");
                        last = n;
                    }
                })
            })
            .collect();
        let writer = {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..100 {
                    source.set_system(if i % 2 == 0 { "x\ny\nz" } else { "a\nb\nc" });
                    store.reload().unwrap();
                }
            })
        };
        for r in readers {
            r.join().unwrap();
        }
        writer.join().unwrap();
        assert_eq!(store.version(), "v101");
        assert_eq!(store.snapshot().global, ODD);
    }
}
