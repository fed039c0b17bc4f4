//! Zip archiver for release bundles.

use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::info;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{PipelineError, Result};

/// `<product>_<tag>_<os>_<arch>.zip`
pub fn archive_name(product: &str, tag: &str, os: &str, arch: &str) -> String {
    format!("{}_{}_{}_{}.zip", product, tag, os, arch)
}

/// Zip every file under `dir` into `dest_dir/name`.
///
/// Entries are stored relative to `dir` with `/` separators, in sorted
/// order, so the same tree always yields the same entry list.
pub fn archive_directory(name: &str, dir: &Path, dest_dir: &Path) -> Result<PathBuf> {
    if name.is_empty() || name.contains('/') || name.contains('\\') {
        return Err(PipelineError::Archive(format!("invalid archive name '{}'", name)));
    }
    if dest_dir.starts_with(dir) {
        return Err(PipelineError::Archive(format!(
            "archive destination {} is inside the archived directory",
            dest_dir.display()
        )));
    }

    let mut entries = Vec::new();
    walk(dir, dir, &mut entries)?;
    entries.sort();

    std::fs::create_dir_all(dest_dir)?;
    let path = dest_dir.join(name);
    let mut writer = ZipWriter::new(File::create(&path)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for rel in &entries {
        let entry_name = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        writer.start_file(entry_name, options)?;
        std::io::copy(&mut File::open(dir.join(rel))?, &mut writer)?;
    }
    writer.finish()?;

    info!(archive = %path.display(), entries = entries.len(), "Created archive");
    Ok(path)
}

fn walk(base: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            walk(base, &path, out)?;
        } else if let Ok(rel) = path.strip_prefix(base) {
            out.push(rel.to_path_buf());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_archive_name() {
        assert_eq!(
            archive_name("HeroesProfile.Uploader", "v2.0.0", "windows", "amd64"),
            "HeroesProfile.Uploader_v2.0.0_windows_amd64.zip"
        );
    }

    #[test]
    fn test_archive_contains_every_file() {
        let src = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("Resources")).unwrap();
        std::fs::write(src.path().join("App.exe"), b"MZ").unwrap();
        std::fs::write(src.path().join("App.dll"), b"MZ-dll").unwrap();
        std::fs::write(src.path().join("Resources/icon.ico"), b"ICO").unwrap();
        let dest = tempfile::tempdir().unwrap();

        let path = archive_directory("bundle.zip", src.path(), dest.path()).unwrap();
        assert_eq!(path, dest.path().join("bundle.zip"));

        let mut archive = zip::ZipArchive::new(File::open(&path).unwrap()).unwrap();
        let mut names: Vec<String> = archive.file_names().map(String::from).collect();
        names.sort();
        assert_eq!(names, vec!["App.dll", "App.exe", "Resources/icon.ico"]);

        let mut content = String::new();
        archive
            .by_name("App.dll")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "MZ-dll");
    }

    #[test]
    fn test_large_file_is_archived_intact() {
        let src = tempfile::tempdir().unwrap();
        let payload: Vec<u8> = (0..3 * 1024 * 1024u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(src.path().join("Heroesprofile.Uploader.dll"), &payload).unwrap();
        let dest = tempfile::tempdir().unwrap();

        let path = archive_directory("bundle.zip", src.path(), dest.path()).unwrap();

        let mut archive = zip::ZipArchive::new(File::open(&path).unwrap()).unwrap();
        let mut entry = archive.by_name("Heroesprofile.Uploader.dll").unwrap();
        assert_eq!(entry.size(), payload.len() as u64);
        let mut content = Vec::new();
        entry.read_to_end(&mut content).unwrap();
        assert!(content == payload);
    }

    #[test]
    fn test_rejects_destination_inside_source() {
        let src = tempfile::tempdir().unwrap();
        let err = archive_directory("a.zip", src.path(), &src.path().join("out")).unwrap_err();
        assert!(matches!(err, PipelineError::Archive(_)));
    }

    #[test]
    fn test_rejects_path_like_names() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        assert!(archive_directory("../a.zip", src.path(), dest.path()).is_err());
    }
}
