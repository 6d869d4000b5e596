//! Sound manager facade and lifecycle.
//!
//! One instance per application. Owns the atlas, the buffer cache and the
//! audio context; resolves logical sound names against the current package
//! and language selection; and runs the Running → Closing → Disposed
//! lifecycle that gates every operation.

use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::atlas::{Atlas, AtlasItem, NO_LANGUAGE};
use crate::buffer::{AudioBuffer, AudioContext, DEFAULT_SAMPLE_RATE};
use crate::cache::BufferCache;
use crate::decode::{AudioDecoder, FfmpegDecoder};
use crate::error::SoundError;
use crate::events::{EventBus, EventKind, SoundEvent, Subscription};
use crate::fetch::{self, AssetFetcher};
use crate::naming::{self, ATLAS_FILE};

/// Default base path for the atlas and encoded files.
pub const DEFAULT_LOAD_PATH: &str = "./encoded/";

/// Lifecycle states. All mutating operations require Running; queries during
/// Closing return empty collections so disposal does not race UI redraws.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Running,
    Closing,
    Disposed,
}

/// Construction options.
pub struct SoundManagerOptions {
    pub load_path: String,
    pub sample_rate: u32,
    /// Container extension to fetch; switch to [`naming::AAC_EXTENSION`]
    /// on hosts that cannot decode Opus-in-WebM.
    pub extension: String,
    /// Source names bulk loads fetch first.
    pub priorities: Vec<String>,
}

impl Default for SoundManagerOptions {
    fn default() -> Self {
        Self {
            load_path: DEFAULT_LOAD_PATH.to_string(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            extension: naming::OPUS_EXTENSION.to_string(),
            priorities: Vec::new(),
        }
    }
}

struct Selection {
    atlas: Atlas,
    package: String,
    language: String,
}

pub struct SoundManager {
    lifecycle: Mutex<Lifecycle>,
    selection: Mutex<Selection>,
    events: EventBus,
    cache: Arc<BufferCache>,
    context: Arc<AudioContext>,
    fetcher: Arc<dyn AssetFetcher>,
}

impl SoundManager {
    pub fn new(options: SoundManagerOptions) -> Self {
        let fetcher = fetch::fetcher_for(&options.load_path);
        let decoder: Arc<dyn AudioDecoder> = Arc::new(FfmpegDecoder::new(options.sample_rate));
        Self::with_collaborators(options, fetcher, decoder)
    }

    /// Construct with explicit fetcher/decoder implementations. Tests use
    /// this with mocks; production callers normally use [`SoundManager::new`].
    pub fn with_collaborators(
        options: SoundManagerOptions,
        fetcher: Arc<dyn AssetFetcher>,
        decoder: Arc<dyn AudioDecoder>,
    ) -> Self {
        let events = EventBus::new();
        let context = Arc::new(AudioContext::new(options.sample_rate));
        let cache = Arc::new(BufferCache::new(
            fetcher.clone(),
            decoder,
            events.clone(),
            context.clone(),
            options.load_path,
            options.extension,
        ));
        cache.set_priorities(options.priorities);
        Self {
            lifecycle: Mutex::new(Lifecycle::Running),
            selection: Mutex::new(Selection {
                atlas: Atlas::new(),
                package: String::new(),
                language: NO_LANGUAGE.to_string(),
            }),
            events,
            cache,
            context,
            fetcher,
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.lock().unwrap()
    }

    fn running(&self) -> bool {
        self.lifecycle() == Lifecycle::Running
    }

    pub fn sample_rate(&self) -> u32 {
        self.context.sample_rate()
    }

    /// Register a listener; dropping the subscription removes it.
    pub fn add_listener(
        &self,
        kind: EventKind,
        handler: impl Fn(&SoundEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.events.add_listener(kind, handler)
    }

    /// Fetch and install `.atlas.json` from the load path.
    pub async fn load_atlas(&self) -> Result<(), SoundError> {
        let url = format!("{}{}", self.cache.load_path(), ATLAS_FILE);
        self.load_atlas_from(&url).await
    }

    /// Fetch and install an atlas document from an explicit location.
    pub async fn load_atlas_from(&self, url: &str) -> Result<(), SoundError> {
        if !self.running() {
            return Err(SoundError::Disposed);
        }
        let bytes = self
            .fetcher
            .fetch(url)
            .await
            .map_err(SoundError::atlas_fetch)?;
        let text = String::from_utf8(bytes)
            .map_err(|e| SoundError::atlas_malformed(format!("not UTF-8: {e}")))?;
        let atlas = Atlas::from_json_str(&text)?;
        // The fetch suspended; the manager may have been disposed meanwhile.
        if !self.running() {
            return Err(SoundError::Disposed);
        }
        self.selection.lock().unwrap().atlas = atlas;
        self.events.emit(SoundEvent::AtlasLoaded);
        info!("Atlas loaded from {}", url);
        Ok(())
    }

    /// Replace the in-memory atlas. Does not invalidate the buffer cache;
    /// use [`SoundManager::reload`] for that.
    pub fn replace_atlas(&self, atlas: Atlas) {
        if !self.running() {
            return;
        }
        self.selection.lock().unwrap().atlas = atlas;
        self.events.emit(SoundEvent::AtlasLoaded);
    }

    /// Select a package. Returns false when the name is unknown or already
    /// current. Does not flush the buffer cache.
    pub fn set_package(&self, name: &str) -> bool {
        if !self.running() {
            return false;
        }
        {
            let mut selection = self.selection.lock().unwrap();
            if selection.package == name || selection.atlas.items(name).is_none() {
                return false;
            }
            selection.package = name.to_string();
        }
        self.events.emit(SoundEvent::PackageChanged);
        true
    }

    /// Select a language. The tag must appear in the current package.
    pub fn set_language(&self, tag: &str) -> bool {
        if !self.running() {
            return false;
        }
        {
            let mut selection = self.selection.lock().unwrap();
            if selection.language == tag {
                return false;
            }
            let known = selection.atlas.languages(&selection.package);
            if !known.iter().any(|l| l == tag) {
                return false;
            }
            selection.language = tag.to_string();
        }
        self.events.emit(SoundEvent::LanguageChanged);
        true
    }

    pub fn current_package(&self) -> String {
        self.selection.lock().unwrap().package.clone()
    }

    pub fn current_language(&self) -> String {
        self.selection.lock().unwrap().language.clone()
    }

    pub fn load_path(&self) -> String {
        self.cache.load_path()
    }

    /// Change the base path used for atlas and file fetches. The fetcher
    /// picked at construction (HTTP or filesystem) keeps serving the new
    /// path.
    pub fn set_load_path(&self, path: &str) {
        if !self.running() {
            return;
        }
        self.cache.set_load_path(path.to_string());
        self.events.emit(SoundEvent::LoadPathChanged);
    }

    pub fn package_names(&self) -> Vec<String> {
        if !self.running() {
            return Vec::new();
        }
        let selection = self.selection.lock().unwrap();
        selection
            .atlas
            .package_names()
            .into_iter()
            .map(String::from)
            .collect()
    }

    /// Languages appearing in the current package.
    pub fn languages(&self) -> Vec<String> {
        let package = self.current_package();
        self.languages_of(&package)
    }

    pub fn languages_of(&self, package: &str) -> Vec<String> {
        if !self.running() {
            return Vec::new();
        }
        self.selection.lock().unwrap().atlas.languages(package)
    }

    /// Source names in the current package tagged with the current language.
    ///
    /// Unlocalized items are not included implicitly; use
    /// [`SoundManager::source_names_in`] with the sentinel to get them.
    pub fn source_names(&self) -> Vec<String> {
        let (package, language) = {
            let selection = self.selection.lock().unwrap();
            (selection.package.clone(), selection.language.clone())
        };
        self.source_names_in(&package, &[&language])
    }

    pub fn source_names_in(&self, package: &str, languages: &[&str]) -> Vec<String> {
        if !self.running() {
            return Vec::new();
        }
        self.selection
            .lock()
            .unwrap()
            .atlas
            .source_names(package, languages)
    }

    fn resolve(&self, source_name: &str) -> Option<AtlasItem> {
        let selection = self.selection.lock().unwrap();
        selection
            .atlas
            .resolve(source_name, &selection.package, &selection.language)
            .cloned()
    }

    /// Resolve and load a sound; resolves to `None` on a resolver miss or a
    /// fetch/decode failure.
    pub async fn request_async(&self, source_name: &str) -> Option<Arc<AudioBuffer>> {
        if !self.running() {
            return None;
        }
        let item = self.resolve(source_name)?;
        self.cache.request(&item).await
    }

    /// Resolve and return a buffer without suspending. A cache miss returns
    /// a silent placeholder that is filled in place once the background load
    /// completes; `None` only when the name does not resolve.
    pub fn request_sync(&self, source_name: &str) -> Option<Arc<AudioBuffer>> {
        if !self.running() {
            return None;
        }
        let item = self.resolve(source_name)?;
        self.cache.request_sync(&item)
    }

    /// Load one file by its content-addressed name.
    pub async fn load_file(&self, file_name: &str) -> Option<Arc<AudioBuffer>> {
        if !self.running() {
            return None;
        }
        let item = {
            let selection = self.selection.lock().unwrap();
            selection.atlas.find_by_file_name(file_name).cloned()
        }?;
        self.cache.request(&item).await
    }

    /// Load an explicit item list, priority names first.
    pub async fn load_items(&self, items: Vec<AtlasItem>) {
        if !self.running() {
            return;
        }
        self.cache.load_items(items).await;
    }

    /// Load every item of a package reachable from the current language
    /// (its own tag or the no-language sentinel).
    pub async fn load_package(&self, package: &str) {
        if !self.running() {
            return;
        }
        let items = {
            let selection = self.selection.lock().unwrap();
            let language = selection.language.clone();
            selection
                .atlas
                .items(package)
                .map(|items| {
                    items
                        .iter()
                        .filter(|i| i.is_unlocalized() || i.language_tag == language)
                        .cloned()
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default()
        };
        self.cache.load_items(items).await;
    }

    /// Load every item tagged with `language` across the given packages.
    pub async fn load_language(&self, language: &str, packages: &[&str]) {
        if !self.running() {
            return;
        }
        let items = {
            let selection = self.selection.lock().unwrap();
            let mut out = Vec::new();
            for package in packages {
                if let Some(items) = selection.atlas.items(package) {
                    out.extend(
                        items
                            .iter()
                            .filter(|i| i.language_tag == language)
                            .cloned(),
                    );
                }
            }
            out
        };
        self.cache.load_items(items).await;
    }

    /// Drop a cached buffer so the next request re-attempts its load.
    pub fn invalidate(&self, file_name: &str) {
        self.cache.invalidate(file_name);
    }

    pub fn buffer_count(&self) -> usize {
        self.cache.buffer_count()
    }

    pub fn pending_count(&self) -> usize {
        self.cache.pending_count()
    }

    /// Dispose all in-flight loads and cached buffers, then enter Disposed.
    /// Subsequent mutating operations are no-ops.
    pub async fn dispose(&self) {
        {
            let mut lifecycle = self.lifecycle.lock().unwrap();
            if *lifecycle != Lifecycle::Running {
                return;
            }
            *lifecycle = Lifecycle::Closing;
        }
        self.cache.dispose().await;
        *self.lifecycle.lock().unwrap() = Lifecycle::Disposed;
        debug!("Sound manager disposed");
    }

    /// Dispose, re-enter Running and emit `reloaded`. When `atlas` is given
    /// it replaces the current one after the transition back to Running.
    pub async fn reload(&self, atlas: Option<Atlas>) -> bool {
        {
            let mut lifecycle = self.lifecycle.lock().unwrap();
            if *lifecycle != Lifecycle::Running {
                return false;
            }
            *lifecycle = Lifecycle::Closing;
        }
        self.cache.dispose().await;
        self.cache.reopen();
        *self.lifecycle.lock().unwrap() = Lifecycle::Running;
        if let Some(atlas) = atlas {
            self.selection.lock().unwrap().atlas = atlas;
        }
        self.events.emit(SoundEvent::Reloaded);
        info!("Sound manager reloaded");
        true
    }
}
