//! In-memory fakes for the runtime trait (testing only)
//!
//! `ScriptedRuntime` simulates each container with a temporary directory
//! standing in for its root filesystem. Commands do not run; instead the
//! first matching [`ExecRule`] decides the exit code and which files the
//! "command" leaves behind. Every call is recorded for assertions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tempfile::TempDir;

use crate::error::EnvError;
use crate::runtime::{ContainerId, ContainerRuntime, ExecOutput};
use crate::Result;

// ---------------------------------------------------------------------------
// ExecRule
// ---------------------------------------------------------------------------

/// Scripted response for commands whose argv contains `pattern` as a
/// contiguous run of arguments.
#[derive(Debug, Clone)]
pub struct ExecRule {
    pattern: Vec<String>,
    exit_code: i32,
    stdout: String,
    stderr: String,
    creates: Vec<(String, Vec<u8>)>,
}

impl ExecRule {
    pub fn when(pattern: &[&str]) -> Self {
        ExecRule {
            pattern: pattern.iter().map(|s| s.to_string()).collect(),
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            creates: Vec::new(),
        }
    }

    pub fn exit(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    pub fn stdout(mut self, text: &str) -> Self {
        self.stdout = text.to_string();
        self
    }

    pub fn stderr(mut self, text: &str) -> Self {
        self.stderr = text.to_string();
        self
    }

    /// On match, write `content` at the absolute container path.
    pub fn creates(mut self, container_path: &str, content: &[u8]) -> Self {
        self.creates.push((container_path.to_string(), content.to_vec()));
        self
    }

    fn matches(&self, argv: &[String]) -> bool {
        if self.pattern.is_empty() {
            return true;
        }
        argv.windows(self.pattern.len())
            .any(|w| w == self.pattern.as_slice())
    }
}

// ---------------------------------------------------------------------------
// ScriptedRuntime
// ---------------------------------------------------------------------------

/// A call observed by the fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Create { image: String },
    CopyIn { container_dir: String },
    Exec { workdir: String, argv: Vec<String> },
    PathExists { path: String },
    CopyOut { container_dir: String },
    Remove { id: String },
}

#[derive(Debug, Default)]
struct Inner {
    containers: HashMap<String, TempDir>,
    next_id: u32,
    calls: Vec<RuntimeCall>,
}

/// In-memory container runtime driven by [`ExecRule`]s.
#[derive(Debug, Default)]
pub struct ScriptedRuntime {
    rules: Vec<ExecRule>,
    inner: Mutex<Inner>,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule. Rules are checked in insertion order; first match wins.
    /// Commands matching no rule succeed with empty output.
    pub fn with_rule(mut self, rule: ExecRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Every call, in order.
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    /// argv of every exec, in order.
    pub fn execs(&self) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RuntimeCall::Exec { argv, .. } => Some(argv),
                _ => None,
            })
            .collect()
    }

    /// Number of execs whose argv contains `pattern` contiguously.
    pub fn exec_count_matching(&self, pattern: &[&str]) -> usize {
        let rule = ExecRule::when(pattern);
        self.execs().iter().filter(|argv| rule.matches(argv)).count()
    }

    pub fn created_count(&self) -> usize {
        self.count(|c| matches!(c, RuntimeCall::Create { .. }))
    }

    pub fn removed_count(&self) -> usize {
        self.count(|c| matches!(c, RuntimeCall::Remove { .. }))
    }

    /// Containers created and not yet removed.
    pub fn live_containers(&self) -> usize {
        self.inner.lock().unwrap().containers.len()
    }

    /// Relative paths of all files under `container_dir` in a live container.
    pub fn list_files(&self, id: &ContainerId, container_dir: &str) -> Result<Vec<PathBuf>> {
        let inner = self.inner.lock().unwrap();
        let root = inner
            .containers
            .get(id.as_str())
            .ok_or_else(|| EnvError::ContainerNotFound(id.0.clone()))?;
        let base = resolve(root.path(), container_dir);
        let mut files = Vec::new();
        if base.is_dir() {
            walk(&base, &base, &mut files)?;
        }
        files.sort();
        Ok(files)
    }

    fn count(&self, pred: impl Fn(&RuntimeCall) -> bool) -> usize {
        self.inner.lock().unwrap().calls.iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: RuntimeCall) {
        self.inner.lock().unwrap().calls.push(call);
    }

    fn container_root(&self, id: &ContainerId) -> Result<PathBuf> {
        let inner = self.inner.lock().unwrap();
        inner
            .containers
            .get(id.as_str())
            .map(|dir| dir.path().to_path_buf())
            .ok_or_else(|| EnvError::ContainerNotFound(id.0.clone()))
    }
}

/// Map an absolute container path onto the simulated root.
fn resolve(root: &Path, container_path: &str) -> PathBuf {
    root.join(container_path.trim_start_matches('/'))
}

fn walk(base: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            walk(base, &path, out)?;
        } else if let Ok(rel) = path.strip_prefix(base) {
            out.push(rel.to_path_buf());
        }
    }
    Ok(())
}

fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let path = entry?.path();
        let Some(name) = path.file_name() else {
            continue;
        };
        let dest = to.join(name);
        if path.is_dir() {
            copy_tree(&path, &dest)?;
        } else {
            std::fs::copy(&path, &dest)?;
        }
    }
    Ok(())
}

#[async_trait]
impl ContainerRuntime for ScriptedRuntime {
    async fn create(&self, image: &str) -> Result<ContainerId> {
        let root = tempfile::Builder::new().prefix("dotship-fake-").tempdir()?;
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = ContainerId(format!("fake-{}", inner.next_id));
        inner.containers.insert(id.0.clone(), root);
        inner.calls.push(RuntimeCall::Create {
            image: image.to_string(),
        });
        Ok(id)
    }

    async fn copy_in(&self, id: &ContainerId, host_dir: &Path, container_dir: &str) -> Result<()> {
        self.record(RuntimeCall::CopyIn {
            container_dir: container_dir.to_string(),
        });
        let root = self.container_root(id)?;
        copy_tree(host_dir, &resolve(&root, container_dir))
    }

    async fn exec(&self, id: &ContainerId, workdir: &str, argv: &[String]) -> Result<ExecOutput> {
        if argv.is_empty() {
            return Err(EnvError::EmptyCommand);
        }
        self.record(RuntimeCall::Exec {
            workdir: workdir.to_string(),
            argv: argv.to_vec(),
        });
        let root = self.container_root(id)?;

        let Some(rule) = self.rules.iter().find(|r| r.matches(argv)) else {
            return Ok(ExecOutput {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            });
        };

        for (path, content) in &rule.creates {
            let dest = resolve(&root, path);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(dest, content)?;
        }

        Ok(ExecOutput {
            exit_code: rule.exit_code,
            stdout: rule.stdout.clone(),
            stderr: rule.stderr.clone(),
        })
    }

    async fn path_exists(&self, id: &ContainerId, path: &str) -> Result<bool> {
        self.record(RuntimeCall::PathExists {
            path: path.to_string(),
        });
        let root = self.container_root(id)?;
        Ok(resolve(&root, path).exists())
    }

    async fn copy_out(&self, id: &ContainerId, container_dir: &str, host_dir: &Path) -> Result<()> {
        self.record(RuntimeCall::CopyOut {
            container_dir: container_dir.to_string(),
        });
        let root = self.container_root(id)?;
        let source = resolve(&root, container_dir);
        if !source.is_dir() {
            return Err(EnvError::CommandFailed {
                command: format!("cp {}:{}", id, container_dir),
                exit_code: 1,
                stderr: format!("no such directory: {}", container_dir),
            });
        }
        copy_tree(&source, host_dir)
    }

    async fn remove(&self, id: &ContainerId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(RuntimeCall::Remove { id: id.0.clone() });
        inner
            .containers
            .remove(id.as_str())
            .map(|_| ())
            .ok_or_else(|| EnvError::ContainerNotFound(id.0.clone()))
    }
}
