//! Source tree snapshots and staging
//!
//! A [`SourceTree`] is the caller's project directory seen through an
//! [`ExcludeSet`]: files under excluded globs (stale `bin/` and `obj/`
//! output by default) are invisible to every stage. The snapshot carries a
//! content reference so two runs over the same sources can be compared.

use glob::{MatchOptions, Pattern};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

use crate::error::EnvError;
use crate::Result;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Compiled exclusion globs (e.g. `**/bin/**`).
#[derive(Debug, Clone, Default)]
pub struct ExcludeSet {
    patterns: Vec<Pattern>,
}

impl ExcludeSet {
    /// Compile a list of glob patterns. Fails on the first invalid pattern.
    pub fn new<S: AsRef<str>>(globs: &[S]) -> Result<Self> {
        let mut patterns = Vec::with_capacity(globs.len());
        for raw in globs {
            let raw = raw.as_ref();
            let pattern = Pattern::new(raw).map_err(|e| EnvError::InvalidPattern {
                pattern: raw.to_string(),
                reason: e.msg.to_string(),
            })?;
            patterns.push(pattern);
        }
        Ok(ExcludeSet { patterns })
    }

    /// Whether a path relative to the source root is excluded.
    pub fn is_excluded(&self, relative: &Path) -> bool {
        self.patterns
            .iter()
            .any(|p| p.matches_path_with(relative, MATCH_OPTIONS))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Immutable snapshot of a project directory.
#[derive(Debug, Clone)]
pub struct SourceTree {
    root: PathBuf,
    files: Vec<PathBuf>,
    content_ref: String,
}

impl SourceTree {
    /// Walk `root`, drop excluded files and compute the content reference.
    pub fn snapshot(root: &Path, exclude: &ExcludeSet) -> Result<Self> {
        if !root.is_dir() {
            return Err(EnvError::SourceNotFound(root.display().to_string()));
        }

        let mut files = Vec::new();
        collect_files(root, root, exclude, &mut files)?;
        files.sort();

        let mut hasher = Sha256::new();
        for rel in &files {
            hasher.update(rel.to_string_lossy().as_bytes());
            hasher.update(b"\0");
            hasher.update(std::fs::read(root.join(rel))?);
            hasher.update(b"\0");
        }
        let content_ref = hex::encode(hasher.finalize());

        debug!(
            root = %root.display(),
            files = files.len(),
            content_ref = %&content_ref[..12],
            "Snapshotted source tree"
        );

        Ok(SourceTree {
            root: root.to_path_buf(),
            files,
            content_ref,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative paths of every included file, sorted.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// SHA-256 hex over the included paths and contents.
    pub fn content_ref(&self) -> &str {
        &self.content_ref
    }

    /// Short form (first 12 hex chars).
    pub fn short_ref(&self) -> &str {
        &self.content_ref[..12.min(self.content_ref.len())]
    }

    /// Copy the included files into a fresh temporary directory.
    ///
    /// The staged copy is what gets copied into a container, so excluded
    /// files can never reach an environment.
    pub fn stage(&self) -> Result<StagedTree> {
        let dir = tempfile::Builder::new().prefix("dotship-src-").tempdir()?;
        for rel in &self.files {
            let dest = dir.path().join(rel);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(self.root.join(rel), &dest)?;
        }

        info!(
            files = self.files.len(),
            content_ref = %self.short_ref(),
            staged = %dir.path().display(),
            "Staged source tree"
        );

        Ok(StagedTree { dir })
    }
}

/// Temporary host copy of a [`SourceTree`]. Deleted on drop.
#[derive(Debug)]
pub struct StagedTree {
    dir: TempDir,
}

impl StagedTree {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

fn collect_files(
    root: &Path,
    dir: &Path,
    exclude: &ExcludeSet,
    out: &mut Vec<PathBuf>,
) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(root, &path, exclude, out)?;
        } else if file_type.is_file() {
            let rel = path
                .strip_prefix(root)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| path.clone());
            if !exclude.is_excluded(&rel) {
                out.push(rel);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn default_excludes() -> ExcludeSet {
        ExcludeSet::new(&["**/bin/**", "**/obj/**"]).unwrap()
    }

    #[test]
    fn test_exclude_set_matches_nested_output_dirs() {
        let set = default_excludes();
        assert!(set.is_excluded(Path::new("App/bin/Release/App.dll")));
        assert!(set.is_excluded(Path::new("App/obj/project.assets.json")));
        assert!(!set.is_excluded(Path::new("App/Program.cs")));
        assert!(!set.is_excluded(Path::new("App/binary_reader.cs")));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let err = ExcludeSet::new(&["[unclosed"]).unwrap_err();
        assert!(matches!(err, EnvError::InvalidPattern { .. }));
    }

    #[test]
    fn test_snapshot_skips_excluded_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "App/Program.cs", b"class Program {}");
        write(dir.path(), "App/bin/Debug/stale.dll", b"stale");
        write(dir.path(), "App/obj/Debug/stale.cache", b"stale");

        let tree = SourceTree::snapshot(dir.path(), &default_excludes()).unwrap();
        assert_eq!(tree.files(), &[PathBuf::from("App/Program.cs")]);
        assert_eq!(tree.content_ref().len(), 64);
    }

    #[test]
    fn test_content_ref_ignores_excluded_changes() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "App/Program.cs", b"class Program {}");
        let before = SourceTree::snapshot(dir.path(), &default_excludes()).unwrap();

        write(dir.path(), "App/bin/Release/App.dll", b"fresh build output");
        let after = SourceTree::snapshot(dir.path(), &default_excludes()).unwrap();
        assert_eq!(before.content_ref(), after.content_ref());

        write(dir.path(), "App/Program.cs", b"class Program { }");
        let edited = SourceTree::snapshot(dir.path(), &default_excludes()).unwrap();
        assert_ne!(before.content_ref(), edited.content_ref());
    }

    #[test]
    fn test_stage_copies_only_included_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "App/Program.cs", b"class Program {}");
        write(dir.path(), "App/App.csproj", b"<Project />");
        write(dir.path(), "App/bin/Release/App.dll", b"stale");

        let tree = SourceTree::snapshot(dir.path(), &default_excludes()).unwrap();
        let staged = tree.stage().unwrap();

        assert!(staged.path().join("App/Program.cs").is_file());
        assert!(staged.path().join("App/App.csproj").is_file());
        assert!(!staged.path().join("App/bin").exists());
    }

    #[test]
    fn test_snapshot_missing_root() {
        let err = SourceTree::snapshot(Path::new("/nonexistent/dotship/src"), &default_excludes())
            .unwrap_err();
        assert!(matches!(err, EnvError::SourceNotFound(_)));
    }
}
