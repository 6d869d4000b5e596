//! Source discovery under the package tree.
//!
//! Layout: `{indir}/<package>/<sourcedir>/...`. Files directly under the
//! source directory are unlocalized; each subdirectory maps to a language
//! tag (the literal `_` is the no-language sentinel). Entries are walked in
//! name order so atlas item order is stable across runs.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::EncoderConfig;
use scode_core::NO_LANGUAGE;

/// One discovered waveform with its package, language tag and logical name.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub package: String,
    pub language: String,
    pub name: String,
}

pub fn discover_sources(config: &EncoderConfig) -> io::Result<Vec<SourceFile>> {
    let mut sources = Vec::new();
    for package_dir in sorted_dirs(&config.indir)? {
        let package = dir_name(&package_dir);
        if !config.included(&package) {
            continue;
        }
        let source_root = package_dir.join(config.sourcedir(&package));
        if !source_root.is_dir() {
            debug!(
                "Package {} has no {} directory, skipping",
                package,
                config.sourcedir(&package)
            );
            continue;
        }

        for path in sorted_entries(&source_root)? {
            if path.is_dir() {
                let tag = config.language_tag(&package, &dir_name(&path));
                for wav in collect_wavs(&path)? {
                    sources.push(source_file(wav, &package, &tag));
                }
            } else if is_wav(&path) && !is_noise(&path) {
                sources.push(source_file(path, &package, NO_LANGUAGE));
            }
        }
    }
    debug!("Discovered {} sources", sources.len());
    Ok(sources)
}

fn source_file(path: PathBuf, package: &str, language: &str) -> SourceFile {
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    SourceFile {
        path,
        package: package.to_string(),
        language: language.to_string(),
        name,
    }
}

/// All `.wav` files under a directory, recursively, in name order.
fn collect_wavs(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for path in sorted_entries(dir)? {
        if path.is_dir() {
            out.extend(collect_wavs(&path)?);
        } else if is_wav(&path) && !is_noise(&path) {
            out.push(path);
        }
    }
    Ok(out)
}

fn sorted_entries(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect();
    entries.sort();
    Ok(entries)
}

fn sorted_dirs(dir: &Path) -> io::Result<Vec<PathBuf>> {
    Ok(sorted_entries(dir)?
        .into_iter()
        .filter(|path| path.is_dir())
        .collect())
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn is_wav(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("wav"))
        .unwrap_or(false)
}

/// OS noise files (.DS_Store, Thumbs.db, etc.)
fn is_noise(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|name| name == ".DS_Store" || name == "Thumbs.db" || name == "desktop.ini")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"stub").unwrap();
    }

    fn tree() -> (tempfile::TempDir, EncoderConfig) {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path();
        touch(&root.join("music/sounds/theme.wav"));
        touch(&root.join("music/sounds/stinger.wav"));
        touch(&root.join("music/sounds/notes.txt"));
        touch(&root.join("voice/sounds/english/hello.wav"));
        touch(&root.join("voice/sounds/es/hola.wav"));
        touch(&root.join("voice/sounds/_/beep.wav"));
        touch(&root.join("voice/sounds/english/.DS_Store"));

        let mut config = EncoderConfig::default();
        config.indir = root.to_path_buf();
        let mut voice = crate::config::PackageConfig::default();
        voice.languages =
            HashMap::from([("english".to_string(), "en".to_string())]);
        config.package_settings.insert("voice".to_string(), voice);
        (dir, config)
    }

    #[test]
    fn test_discovers_packages_and_languages() {
        let (_dir, config) = tree();
        let sources = discover_sources(&config).unwrap();
        let summary: Vec<(String, String, String)> = sources
            .iter()
            .map(|s| (s.package.clone(), s.language.clone(), s.name.clone()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("music".into(), "_".into(), "stinger".into()),
                ("music".into(), "_".into(), "theme".into()),
                ("voice".into(), "_".into(), "beep".into()),
                ("voice".into(), "en".into(), "hello".into()),
                ("voice".into(), "es".into(), "hola".into()),
            ]
        );
    }

    #[test]
    fn test_package_filter_limits_discovery() {
        let (_dir, mut config) = tree();
        config.packages = vec!["music".to_string()];
        let sources = discover_sources(&config).unwrap();
        assert!(sources.iter().all(|s| s.package == "music"));
        assert_eq!(sources.len(), 2);
    }

    #[test]
    fn test_missing_sourcedir_is_skipped() {
        let (dir, config) = tree();
        fs::create_dir_all(dir.path().join("empty")).unwrap();
        let sources = discover_sources(&config).unwrap();
        assert!(sources.iter().all(|s| s.package != "empty"));
    }
}
