//! Encoder pipeline: discover, validate, address, encode, reconcile, emit.
//!
//! Analysis and encoding fan out over per-CPU blocking workers; the atlas
//! accumulates per package and is written atomically once everything has
//! settled. Per-source failures are logged and excluded from the atlas
//! rather than aborting the run.

use std::collections::HashSet;
use std::fs;
use std::io::{IsTerminal, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, trace, warn};

use scode_core::atlas::{Atlas, AtlasItem};
use scode_core::naming::{FileName, AAC_EXTENSION, ATLAS_FILE, OPUS_EXTENSION};

use crate::cache::{self, CachedSource, SourceCache};
use crate::config::EncoderConfig;
use crate::discover::{self, SourceFile};
use crate::error::EncodeError;
use crate::media;
use crate::util;
use crate::wave::{WaveError, WaveInfo};

/// One source with resolved encode parameters and content address.
#[derive(Debug, Clone)]
pub(crate) struct AnalyzedSource {
    pub(crate) source: SourceFile,
    pub(crate) sample_rate: u32,
    pub(crate) frame_count: u64,
    pub(crate) bitrate_kbps: u32,
    pub(crate) channels: u16,
    pub(crate) file_name: FileName,
}

enum Analysis {
    Ready(AnalyzedSource),
    NonConforming(SourceFile),
    Failed,
}

/// Aggregate result of one run.
#[derive(Debug, Default)]
pub struct EncodeStats {
    pub discovered: usize,
    pub encoded: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub async fn run(config: EncoderConfig) -> Result<EncodeStats, EncodeError> {
    let config = Arc::new(config);
    let cache = Arc::new(Mutex::new(if config.use_cache {
        SourceCache::load(Path::new(cache::CACHE_DIR))
    } else {
        SourceCache::default()
    }));

    // Re-materialization rewrites files inside the input tree, so analysis
    // restarts from discovery until everything conforms.
    let (analyzed, analysis_failures) = loop {
        let sources = discover::discover_sources(&config)?;
        info!("Found {} source files", sources.len());
        let (ready, nonconforming, failures) = analyze_sources(&config, &cache, sources).await;
        if nonconforming.is_empty() {
            break (ready, failures);
        }
        confirm_rematerialize(&config, &nonconforming)?;
        rematerialize_all(&config, &nonconforming).await?;
        info!(
            "Re-materialized {} sources; re-checking the tree",
            nonconforming.len()
        );
    };

    let mut stats = EncodeStats {
        discovered: analyzed.len() + analysis_failures,
        failed: analysis_failures,
        ..Default::default()
    };

    fs::create_dir_all(&config.outdir)?;

    // Cache hit: the output for this content address already exists.
    let mut pending = Vec::new();
    for source in &analyzed {
        if outputs_exist(&config, &source.file_name) {
            trace!("Up to date: {}", source.file_name);
            stats.skipped += 1;
        } else {
            pending.push(source.clone());
        }
    }

    let total = pending.len();
    if total > 0 {
        info!("Encoding {} of {} sources", total, analyzed.len());
    }
    let started = Instant::now();
    let done = Arc::new(AtomicUsize::new(0));
    let results: Vec<(String, Result<(), EncodeError>)> = stream::iter(pending)
        .map(|source| {
            let config = Arc::clone(&config);
            let done = Arc::clone(&done);
            async move {
                let path = source.source.path.to_string_lossy().into_owned();
                let result =
                    tokio::task::spawn_blocking(move || encode_one(&config, &source, &done, total, started))
                        .await
                        .unwrap_or_else(|e| Err(EncodeError::task(e)));
                (path, result)
            }
        })
        .buffered(worker_count())
        .collect()
        .await;

    let mut failed_paths = HashSet::new();
    for (path, result) in &results {
        match result {
            Ok(()) => stats.encoded += 1,
            Err(e) => {
                error!("Failed to encode {}: {}", path, e);
                failed_paths.insert(path.clone());
                stats.failed += 1;
            }
        }
    }

    let atlas = build_atlas(&analyzed, &failed_paths);
    write_atlas(&config.outdir, &atlas)?;
    info!(
        "Wrote atlas with {} packages to {}",
        atlas.package_names().len(),
        config.outdir.join(ATLAS_FILE).display()
    );

    if config.use_cache {
        if let Err(e) = cache.lock().unwrap().save(Path::new(cache::CACHE_DIR)) {
            warn!("Failed to save the source cache: {}", e);
        }
    }

    Ok(stats)
}

fn worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Analyze sources in parallel, preserving discovery order.
async fn analyze_sources(
    config: &Arc<EncoderConfig>,
    cache: &Arc<Mutex<SourceCache>>,
    sources: Vec<SourceFile>,
) -> (Vec<AnalyzedSource>, Vec<SourceFile>, usize) {
    let results: Vec<Analysis> = stream::iter(sources)
        .map(|source| {
            let config = Arc::clone(config);
            let cache = Arc::clone(cache);
            async move {
                tokio::task::spawn_blocking(move || analyze_one(&config, &cache, source))
                    .await
                    .unwrap_or_else(|e| {
                        error!("Analysis task failed: {}", e);
                        Analysis::Failed
                    })
            }
        })
        .buffered(worker_count())
        .collect()
        .await;

    let mut ready = Vec::new();
    let mut nonconforming = Vec::new();
    let mut failures = 0;
    for analysis in results {
        match analysis {
            Analysis::Ready(source) => ready.push(source),
            Analysis::NonConforming(source) => nonconforming.push(source),
            Analysis::Failed => failures += 1,
        }
    }
    (ready, nonconforming, failures)
}

fn analyze_one(
    config: &EncoderConfig,
    cache: &Mutex<SourceCache>,
    source: SourceFile,
) -> Analysis {
    let path_str = source.path.to_string_lossy().into_owned();
    let modified = cache::modified_stamp(&source.path);
    let bitrate_kbps = config.bitrate_for(&source.package, &source.name);

    // Warm path: unchanged source whose outputs are already on disk.
    let cached_entry = { cache.lock().unwrap().get(&path_str).cloned() };
    if let Some(entry) = &cached_entry {
        let target = config.channels_for(&source.package, &source.name, entry.channels);
        if entry.is_fresh(&modified, target) && entry.sample_rate == 48000 {
            let file_name = FileName::new(bitrate_kbps, target, entry.hash);
            if outputs_exist(config, &file_name) {
                trace!("Cache hit for {}", path_str);
                return Analysis::Ready(AnalyzedSource {
                    source,
                    sample_rate: entry.sample_rate,
                    frame_count: entry.frame_count,
                    bitrate_kbps,
                    channels: target,
                    file_name,
                });
            }
        }
    }

    let buffer = match fs::read(&source.path) {
        Ok(buffer) => buffer,
        Err(e) => {
            error!("Failed to read {}: {}", path_str, e);
            return Analysis::Failed;
        }
    };
    let info = match WaveInfo::parse(&buffer) {
        Ok(info) => info,
        Err(WaveError::NotPcm(format)) => {
            warn!("{} uses audio format {}, not PCM", path_str, format);
            return Analysis::NonConforming(source);
        }
        Err(e) => {
            error!("Failed to parse {}: {}", path_str, e);
            return Analysis::Failed;
        }
    };
    if info.sample_rate != 48000 {
        warn!(
            "{} has sample rate {}, expected 48000",
            path_str, info.sample_rate
        );
        return Analysis::NonConforming(source);
    }

    let channels = config.channels_for(&source.package, &source.name, info.channels);
    let samples = match info.samples_i16(&buffer, channels) {
        Ok(samples) => samples,
        Err(e) => {
            error!("Failed to extract PCM from {}: {}", path_str, e);
            return Analysis::Failed;
        }
    };
    let file_name = FileName::from_pcm(bitrate_kbps, channels, &samples);

    if let Some(entry) = cached_entry {
        if entry.is_fresh(&modified, channels) && entry.hash != file_name.hash {
            // Recompute wins; the stale record is overwritten below.
            warn!(
                "{}",
                EncodeError::HashMismatch {
                    path: path_str.clone(),
                    cached: entry.hash,
                    computed: file_name.hash,
                }
            );
        }
    }

    cache.lock().unwrap().insert(CachedSource {
        path: path_str,
        modified,
        hash: file_name.hash,
        channels: info.channels,
        target_channels: channels,
        sample_rate: info.sample_rate,
        frame_count: info.frame_count,
    });

    Analysis::Ready(AnalyzedSource {
        source,
        sample_rate: info.sample_rate,
        frame_count: info.frame_count,
        bitrate_kbps,
        channels,
        file_name,
    })
}

/// Ask before rewriting sources in place. `--yes` suppresses the prompt;
/// without a terminal the run fails instead of hanging.
fn confirm_rematerialize(
    config: &EncoderConfig,
    sources: &[SourceFile],
) -> Result<(), EncodeError> {
    warn!("The following sources are not 48 kHz PCM and must be re-encoded in place:");
    for source in sources {
        warn!("  {}", source.path.display());
    }
    if config.yes {
        return Ok(());
    }
    if !std::io::stdin().is_terminal() {
        return Err(EncodeError::SourceNotConforming(
            "cannot prompt for re-encoding without a terminal (pass --yes to proceed)".into(),
        ));
    }
    loop {
        eprint!("Re-encode the source files in place? (y/n) ");
        let _ = std::io::stderr().flush();
        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        match input.trim() {
            "y" => return Ok(()),
            "n" => return Err(EncodeError::cancelled("user declined source re-encoding")),
            _ => {}
        }
    }
}

async fn rematerialize_all(
    config: &Arc<EncoderConfig>,
    sources: &[SourceFile],
) -> Result<(), EncodeError> {
    let results: Vec<Result<(), EncodeError>> = stream::iter(sources.to_vec())
        .map(|source| {
            let config = Arc::clone(config);
            async move {
                info!("Re-materializing {} as 48 kHz PCM", source.path.display());
                tokio::task::spawn_blocking(move || {
                    media::rematerialize_as_pcm(&config.ffmpeg, &source.path)
                })
                .await
                .unwrap_or_else(|e| Err(EncodeError::task(e)))
            }
        })
        .buffered(worker_count())
        .collect()
        .await;
    for result in results {
        result?;
    }
    Ok(())
}

fn encode_one(
    config: &EncoderConfig,
    source: &AnalyzedSource,
    done: &AtomicUsize,
    total: usize,
    started: Instant,
) -> Result<(), EncodeError> {
    let base = source.file_name.to_string();
    let webm = config.outdir.join(format!("{base}{OPUS_EXTENSION}"));
    media::encode_opus(
        &config.ffmpeg,
        &source.source.path,
        &webm,
        source.bitrate_kbps,
        source.channels,
    )?;
    if config.include_mp4 {
        let mp4 = config.outdir.join(format!("{base}{AAC_EXTENSION}"));
        media::encode_aac(
            &config.ffmpeg,
            &source.source.path,
            &mp4,
            source.bitrate_kbps,
            source.channels,
        )?;
    }
    reconcile_sample_count(config, source, &webm);

    let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
    log_progress(finished, total, started);
    Ok(())
}

/// Compare the tool's reported frame count against the source PCM count.
/// The source count stays authoritative either way; runtime decoders are
/// known to report slightly different counts for these containers.
fn reconcile_sample_count(config: &EncoderConfig, source: &AnalyzedSource, webm: &Path) {
    match media::probe_frame_count(&config.ffmpeg, webm, source.sample_rate) {
        Some(probed) => {
            let delta = probed.abs_diff(source.frame_count);
            // Opus padding accounts for small drift; 100 ms is not padding.
            if delta > u64::from(source.sample_rate) / 10 {
                warn!(
                    "{}: media tool reports {} frames, source has {}",
                    webm.display(),
                    probed,
                    source.frame_count
                );
            } else if delta > 0 {
                debug!(
                    "{}: frame count drift of {} (tool {}, source {})",
                    webm.display(),
                    delta,
                    probed,
                    source.frame_count
                );
            }
        }
        None => trace!("No frame-count probe for {}", webm.display()),
    }
}

fn log_progress(finished: usize, total: usize, started: Instant) {
    let elapsed = started.elapsed().as_millis();
    let average = elapsed as f64 / finished as f64;
    let remaining = ((total - finished) as f64 * average) as u128;
    let percentage = finished as f64 / total as f64 * 100.0;
    info!(
        "Encoded {finished} of {total} ({percentage:.1}%) | ETA {}",
        util::format_duration(remaining)
    );
}

fn outputs_exist(config: &EncoderConfig, file_name: &FileName) -> bool {
    let webm = config.outdir.join(format!("{file_name}{OPUS_EXTENSION}"));
    if !webm.is_file() {
        return false;
    }
    if config.include_mp4 {
        let mp4 = config.outdir.join(format!("{file_name}{AAC_EXTENSION}"));
        if !mp4.is_file() {
            return false;
        }
    }
    true
}

/// Accumulate the atlas from every healthy source. Duplicate
/// `(source_name, language)` pairs within a package keep the first entry.
fn build_atlas(analyzed: &[AnalyzedSource], failed_paths: &HashSet<String>) -> Atlas {
    let mut atlas = Atlas::new();
    for source in analyzed {
        let path = source.source.path.to_string_lossy();
        if failed_paths.contains(path.as_ref()) {
            continue;
        }
        if atlas.contains(
            &source.source.package,
            &source.source.name,
            &source.source.language,
        ) {
            warn!(
                "Duplicate source {} ({}) in package {}, keeping the first",
                source.source.name, source.source.language, source.source.package
            );
            continue;
        }
        atlas.push_item(
            &source.source.package,
            AtlasItem::new(
                source.source.name.clone(),
                source.file_name.to_string(),
                source.frame_count,
                source.source.language.clone(),
            ),
        );
    }
    atlas
}

/// Write `{outdir}/.atlas.json` atomically: temp file in the same directory,
/// then rename over the destination.
fn write_atlas(outdir: &Path, atlas: &Atlas) -> Result<(), EncodeError> {
    fs::create_dir_all(outdir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(outdir)?;
    tmp.write_all(atlas.to_json_string().as_bytes())?;
    tmp.persist(outdir.join(ATLAS_FILE))
        .map_err(|e| EncodeError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wave::tests::{make_wav, make_wav_with_format};
    use std::collections::HashMap;

    fn write_source(root: &Path, relative: &str, bytes: &[u8]) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, bytes).unwrap();
    }

    fn test_config(root: &Path) -> Arc<EncoderConfig> {
        let mut config = EncoderConfig::default();
        config.indir = root.join("packages");
        config.outdir = root.join("encoded");
        config.use_cache = false;
        Arc::new(config)
    }

    async fn analyze(config: &Arc<EncoderConfig>) -> (Vec<AnalyzedSource>, Vec<SourceFile>, usize) {
        let cache = Arc::new(Mutex::new(SourceCache::default()));
        let sources = discover::discover_sources(config).unwrap();
        analyze_sources(config, &cache, sources).await
    }

    #[tokio::test]
    async fn test_identical_pcm_with_bitrate_overrides_shares_hash() {
        let dir = tempfile::TempDir::new().unwrap();
        let samples: Vec<i16> = (0..480).map(|i| (i % 127) as i16).collect();
        let wav = make_wav(1, 48000, &samples);
        write_source(dir.path(), "packages/fx/sounds/low.wav", &wav);
        write_source(dir.path(), "packages/fx/sounds/high.wav", &wav);

        let mut config = (*test_config(dir.path())).clone();
        let mut fx = crate::config::PackageConfig::default();
        fx.sources = HashMap::from([
            (
                "low".to_string(),
                crate::config::SourceConfig {
                    bitrate: Some(32),
                    channels: None,
                },
            ),
            (
                "high".to_string(),
                crate::config::SourceConfig {
                    bitrate: Some(64),
                    channels: None,
                },
            ),
        ]);
        config.package_settings.insert("fx".to_string(), fx);
        let config = Arc::new(config);

        let (analyzed, nonconforming, failures) = analyze(&config).await;
        assert!(nonconforming.is_empty());
        assert_eq!(failures, 0);
        assert_eq!(analyzed.len(), 2);

        let high = analyzed.iter().find(|a| a.source.name == "high").unwrap();
        let low = analyzed.iter().find(|a| a.source.name == "low").unwrap();
        assert_eq!(high.file_name.bitrate_kbps, 64);
        assert_eq!(low.file_name.bitrate_kbps, 32);
        assert_eq!(high.file_name.hash, low.file_name.hash);
        assert_ne!(high.file_name.to_string(), low.file_name.to_string());
    }

    #[tokio::test]
    async fn test_channel_override_changes_address() {
        let dir = tempfile::TempDir::new().unwrap();
        let samples: Vec<i16> = vec![100, 200, -100, -200];
        let wav = make_wav(2, 48000, &samples);
        write_source(dir.path(), "packages/vo/sounds/line.wav", &wav);
        write_source(dir.path(), "packages/fx/sounds/line.wav", &wav);

        let mut config = (*test_config(dir.path())).clone();
        let mut vo = crate::config::PackageConfig::default();
        vo.sources = HashMap::from([(
            "line".to_string(),
            crate::config::SourceConfig {
                bitrate: None,
                channels: Some(1),
            },
        )]);
        config.package_settings.insert("vo".to_string(), vo);
        let config = Arc::new(config);

        let (analyzed, _, _) = analyze(&config).await;
        let mono = analyzed.iter().find(|a| a.source.package == "vo").unwrap();
        let stereo = analyzed.iter().find(|a| a.source.package == "fx").unwrap();
        assert_eq!(mono.channels, 1);
        assert_eq!(stereo.channels, 2);
        // Downmixed PCM hashes differently from the stereo payload.
        assert_ne!(mono.file_name.hash, stereo.file_name.hash);
    }

    #[tokio::test]
    async fn test_nonconforming_sources_are_flagged() {
        let dir = tempfile::TempDir::new().unwrap();
        write_source(
            dir.path(),
            "packages/fx/sounds/slow.wav",
            &make_wav(1, 44100, &[0; 32]),
        );
        write_source(
            dir.path(),
            "packages/fx/sounds/float.wav",
            &make_wav_with_format(3, 1, 48000, 16, &[0; 32]),
        );
        write_source(
            dir.path(),
            "packages/fx/sounds/good.wav",
            &make_wav(1, 48000, &[1; 32]),
        );
        write_source(dir.path(), "packages/fx/sounds/broken.wav", b"not a wav at all");

        let config = test_config(dir.path());
        let (analyzed, nonconforming, failures) = analyze(&config).await;
        assert_eq!(analyzed.len(), 1);
        assert_eq!(analyzed[0].source.name, "good");
        let mut flagged: Vec<&str> =
            nonconforming.iter().map(|s| s.name.as_str()).collect();
        flagged.sort();
        assert_eq!(flagged, vec!["float", "slow"]);
        assert_eq!(failures, 1);
    }

    #[tokio::test]
    async fn test_frame_count_and_address_fields() {
        let dir = tempfile::TempDir::new().unwrap();
        let samples: Vec<i16> = (0..960).map(|i| i as i16).collect();
        write_source(
            dir.path(),
            "packages/fx/sounds/blip.wav",
            &make_wav(2, 48000, &samples),
        );

        let config = test_config(dir.path());
        let (analyzed, _, _) = analyze(&config).await;
        let blip = &analyzed[0];
        assert_eq!(blip.frame_count, 480);
        assert_eq!(blip.file_name.channels, 2);
        assert_eq!(blip.file_name.bitrate_kbps, 96);
        assert!(blip.file_name.to_string().starts_with("96k.2ch."));
    }

    #[test]
    fn test_build_atlas_excludes_failures_and_duplicates() {
        let make = |package: &str, name: &str, language: &str, path: &str, hash: u64| {
            AnalyzedSource {
                source: SourceFile {
                    path: path.into(),
                    package: package.to_string(),
                    language: language.to_string(),
                    name: name.to_string(),
                },
                sample_rate: 48000,
                frame_count: 480,
                bitrate_kbps: 96,
                channels: 2,
                file_name: FileName::new(96, 2, hash),
            }
        };
        let analyzed = vec![
            make("fx", "blip", "_", "a.wav", 1),
            make("fx", "blip", "_", "dup.wav", 2),
            make("fx", "boom", "_", "b.wav", 3),
            make("vo", "hi", "en", "c.wav", 4),
        ];
        let failed = HashSet::from(["b.wav".to_string()]);

        let atlas = build_atlas(&analyzed, &failed);
        assert_eq!(atlas.package_names(), vec!["fx", "vo"]);
        let fx = atlas.items("fx").unwrap();
        assert_eq!(fx.len(), 1);
        assert_eq!(fx[0].file_name, "96k.2ch.1");
        assert_eq!(atlas.items("vo").unwrap()[0].language_tag, "en");
    }

    #[test]
    fn test_write_atlas_is_readable_by_the_runtime_model() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut atlas = Atlas::new();
        atlas.push_item("fx", AtlasItem::new("blip", "96k.2ch.7", 480, "_"));
        write_atlas(dir.path(), &atlas).unwrap();

        let text = fs::read_to_string(dir.path().join(ATLAS_FILE)).unwrap();
        let reloaded = Atlas::from_json_str(&text).unwrap();
        assert_eq!(
            reloaded.resolve("blip", "fx", "en").unwrap().file_name,
            "96k.2ch.7"
        );
    }

    #[test]
    fn test_outputs_exist_requires_both_containers() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = EncoderConfig::default();
        config.outdir = dir.path().to_path_buf();
        let name = FileName::new(96, 2, 5);

        assert!(!outputs_exist(&config, &name));
        fs::write(dir.path().join("96k.2ch.5.webm"), b"x").unwrap();
        assert!(!outputs_exist(&config, &name));
        fs::write(dir.path().join("96k.2ch.5.mp4"), b"x").unwrap();
        assert!(outputs_exist(&config, &name));

        config.include_mp4 = false;
        fs::remove_file(dir.path().join("96k.2ch.5.mp4")).unwrap();
        assert!(outputs_exist(&config, &name));
    }
}
