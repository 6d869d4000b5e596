//! Encoder configuration: `scodefig.jsonc` plus CLI overrides.
//!
//! The config file is JSON with comment tolerance (the `.jsonc` extension
//! promises it), so a strip pass runs before serde. CLI flags override file
//! values; per-source settings override per-package settings override the
//! global defaults.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::EncodeError;
use scode_core::NO_LANGUAGE;

/// Raw shape of `scodefig.jsonc`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    pub indir: Option<PathBuf>,
    pub outdir: Option<PathBuf>,
    pub bitrate: Option<u32>,
    pub yes: Option<bool>,
    pub loglevel: Option<String>,
    #[serde(default)]
    pub packages: HashMap<String, PackageConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageConfig {
    pub sourcedir: Option<String>,
    pub bitrate: Option<u32>,
    /// Subdirectory name to language tag.
    #[serde(default)]
    pub languages: HashMap<String, String>,
    #[serde(default)]
    pub sources: HashMap<String, SourceConfig>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct SourceConfig {
    pub bitrate: Option<u32>,
    pub channels: Option<u16>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, EncodeError> {
        let text = fs::read_to_string(path)?;
        let stripped = strip_jsonc_comments(&text);
        serde_json::from_str(&stripped)
            .map_err(|e| EncodeError::config(format!("{}: {e}", path.display())))
    }
}

/// Remove `//` line comments and `/* */` block comments outside strings.
pub fn strip_jsonc_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if c == '\\' {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut last = ' ';
                for next in chars.by_ref() {
                    if last == '*' && next == '/' {
                        break;
                    }
                    last = next;
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Verbosity knob, mapped onto a tracing filter directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Perf,
    Info,
    Success,
    Warn,
    Error,
    Silent,
}

impl LogLevel {
    pub fn parse(level: &str) -> Option<Self> {
        match level.to_lowercase().as_str() {
            "debug" => Some(Self::Debug),
            "perf" => Some(Self::Perf),
            "info" => Some(Self::Info),
            "success" => Some(Self::Success),
            "warn" => Some(Self::Warn),
            "error" => Some(Self::Error),
            "silent" => Some(Self::Silent),
            _ => None,
        }
    }

    pub fn env_filter(&self) -> &'static str {
        match self {
            Self::Perf => "trace",
            Self::Debug => "debug",
            Self::Info | Self::Success => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Silent => "off",
        }
    }
}

/// Fully-resolved encoder settings.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub indir: PathBuf,
    pub outdir: PathBuf,
    /// Default per-channel bitrate in kbps.
    pub bitrate: u32,
    pub include_mp4: bool,
    pub yes: bool,
    pub use_cache: bool,
    pub ffmpeg: String,
    /// Packages to encode; empty means all.
    pub packages: Vec<String>,
    pub package_settings: HashMap<String, PackageConfig>,
    pub loglevel: LogLevel,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            indir: PathBuf::from("packages"),
            outdir: PathBuf::from("encoded"),
            bitrate: 96,
            include_mp4: true,
            yes: false,
            use_cache: true,
            ffmpeg: "ffmpeg".to_string(),
            packages: Vec::new(),
            package_settings: HashMap::new(),
            loglevel: LogLevel::Info,
        }
    }
}

impl EncoderConfig {
    pub fn apply_file(&mut self, file: ConfigFile) -> Result<(), EncodeError> {
        if let Some(indir) = file.indir {
            self.indir = indir;
        }
        if let Some(outdir) = file.outdir {
            self.outdir = outdir;
        }
        if let Some(bitrate) = file.bitrate {
            self.bitrate = bitrate;
        }
        if let Some(yes) = file.yes {
            self.yes = yes;
        }
        if let Some(level) = file.loglevel {
            self.loglevel = LogLevel::parse(&level)
                .ok_or_else(|| EncodeError::config(format!("unknown loglevel {level:?}")))?;
        }
        self.package_settings = file.packages;
        Ok(())
    }

    pub fn included(&self, package: &str) -> bool {
        self.packages.is_empty() || self.packages.iter().any(|p| p == package)
    }

    fn package(&self, name: &str) -> Option<&PackageConfig> {
        self.package_settings.get(name)
    }

    fn source(&self, package: &str, source: &str) -> Option<&SourceConfig> {
        self.package(package)?.sources.get(source)
    }

    pub fn sourcedir(&self, package: &str) -> &str {
        self.package(package)
            .and_then(|p| p.sourcedir.as_deref())
            .unwrap_or("sounds")
    }

    /// Per-source override > per-package override > global default.
    pub fn bitrate_for(&self, package: &str, source: &str) -> u32 {
        self.source(package, source)
            .and_then(|s| s.bitrate)
            .or_else(|| self.package(package).and_then(|p| p.bitrate))
            .unwrap_or(self.bitrate)
            .max(1)
    }

    /// Channel override for a source, defaulting to the source's own count
    /// clamped to mono or stereo.
    pub fn channels_for(&self, package: &str, source: &str, source_channels: u16) -> u16 {
        self.source(package, source)
            .and_then(|s| s.channels)
            .unwrap_or(source_channels)
            .clamp(1, 2)
    }

    /// Map a language subdirectory to its tag. `_` is the no-language
    /// sentinel; unmapped directories use their name verbatim.
    pub fn language_tag(&self, package: &str, subdir: &str) -> String {
        if subdir == NO_LANGUAGE {
            return NO_LANGUAGE.to_string();
        }
        self.package(package)
            .and_then(|p| p.languages.get(subdir).cloned())
            .unwrap_or_else(|| subdir.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_jsonc_comments() {
        let text = r#"{
            // default tree
            "indir": "pkg", /* block
            comment */ "bitrate": 64,
            "outdir": "a//b /* not a comment */"
        }"#;
        let value: serde_json::Value = serde_json::from_str(&strip_jsonc_comments(text)).unwrap();
        assert_eq!(value["indir"], "pkg");
        assert_eq!(value["bitrate"], 64);
        assert_eq!(value["outdir"], "a//b /* not a comment */");
    }

    #[test]
    fn test_loglevel_parse_and_filter() {
        assert_eq!(LogLevel::parse("Success"), Some(LogLevel::Success));
        assert_eq!(LogLevel::parse("perf"), Some(LogLevel::Perf));
        assert_eq!(LogLevel::parse("nope"), None);
        assert_eq!(LogLevel::Silent.env_filter(), "off");
        assert_eq!(LogLevel::Perf.env_filter(), "trace");
    }

    fn config_with_overrides() -> EncoderConfig {
        let file: ConfigFile = serde_json::from_str(
            &strip_jsonc_comments(
                r#"{
                    "indir": "tree",
                    "bitrate": 80,
                    "packages": {
                        "voice": {
                            "sourcedir": "vo",
                            "bitrate": 48,
                            "languages": { "english": "en" },
                            "sources": {
                                "hello": { "bitrate": 24, "channels": 1 }
                            }
                        }
                    }
                }"#,
            ),
        )
        .unwrap();
        let mut config = EncoderConfig::default();
        config.apply_file(file).unwrap();
        config
    }

    #[test]
    fn test_bitrate_precedence() {
        let config = config_with_overrides();
        // Source override beats the package override beats the global.
        assert_eq!(config.bitrate_for("voice", "hello"), 24);
        assert_eq!(config.bitrate_for("voice", "other"), 48);
        assert_eq!(config.bitrate_for("music", "theme"), 80);
    }

    #[test]
    fn test_channel_override_and_default() {
        let config = config_with_overrides();
        assert_eq!(config.channels_for("voice", "hello", 2), 1);
        assert_eq!(config.channels_for("voice", "other", 2), 2);
        // Surround sources clamp to stereo.
        assert_eq!(config.channels_for("music", "theme", 6), 2);
    }

    #[test]
    fn test_language_mapping() {
        let config = config_with_overrides();
        assert_eq!(config.language_tag("voice", "english"), "en");
        assert_eq!(config.language_tag("voice", "_"), "_");
        assert_eq!(config.language_tag("voice", "es"), "es");
    }

    #[test]
    fn test_sourcedir_default() {
        let config = config_with_overrides();
        assert_eq!(config.sourcedir("voice"), "vo");
        assert_eq!(config.sourcedir("music"), "sounds");
    }

    #[test]
    fn test_package_filter() {
        let mut config = EncoderConfig::default();
        assert!(config.included("anything"));
        config.packages = vec!["music".to_string()];
        assert!(config.included("music"));
        assert!(!config.included("voice"));
    }
}
