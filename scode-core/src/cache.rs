//! Buffer cache: single-flight fetch+decode with placeholder buffers.
//!
//! One in-flight load per resolved file name. A synchronous request that
//! misses gets an allocated-but-silent placeholder of the correct shape,
//! which is overwritten in place when the background decode lands, so
//! playback scheduling done against the atlas stays exact. A decode failure
//! never replaces a placeholder: the silent buffer stays installed and
//! scheduled playback keeps working.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::atlas::AtlasItem;
use crate::buffer::{AudioBuffer, AudioContext};
use crate::decode::{AudioDecoder, DecodedAudio};
use crate::error::SoundError;
use crate::events::{EventBus, SoundEvent};
use crate::fetch::AssetFetcher;
use crate::naming;

/// How many bulk-load files are in flight at once.
const BULK_CONCURRENCY: usize = 4;

#[derive(Clone)]
enum CacheEntry {
    Decoded(Arc<AudioBuffer>),
    Placeholder(Arc<AudioBuffer>),
    /// Load failed and no placeholder existed; sticky until invalidated.
    Failed,
}

#[derive(Clone)]
enum TicketState {
    Pending,
    Done(Option<Arc<AudioBuffer>>),
}

enum FastPath {
    Hit(Option<Arc<AudioBuffer>>),
    Wait(watch::Receiver<TicketState>),
    Start,
}

pub struct BufferCache {
    fetcher: Arc<dyn AssetFetcher>,
    decoder: Arc<dyn AudioDecoder>,
    events: EventBus,
    context: Arc<AudioContext>,
    load_path: Mutex<String>,
    /// Container extension appended to file names, `.webm` unless the host
    /// can only decode the AAC fallback.
    extension: String,
    priorities: Mutex<Vec<String>>,
    buffers: Mutex<HashMap<String, CacheEntry>>,
    pending: Mutex<HashMap<String, watch::Receiver<TicketState>>>,
    closed: AtomicBool,
}

impl BufferCache {
    pub fn new(
        fetcher: Arc<dyn AssetFetcher>,
        decoder: Arc<dyn AudioDecoder>,
        events: EventBus,
        context: Arc<AudioContext>,
        load_path: String,
        extension: String,
    ) -> Self {
        Self {
            fetcher,
            decoder,
            events,
            context,
            load_path: Mutex::new(load_path),
            extension,
            priorities: Mutex::new(Vec::new()),
            buffers: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn load_path(&self) -> String {
        self.load_path.lock().unwrap().clone()
    }

    pub fn set_load_path(&self, path: String) {
        *self.load_path.lock().unwrap() = path;
    }

    /// Source names that bulk loads should fetch first, in rank order.
    pub fn set_priorities(&self, names: Vec<String>) {
        *self.priorities.lock().unwrap() = names;
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.lock().unwrap().len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Drop a cached entry so the next request re-attempts the load.
    pub fn invalidate(&self, file_name: &str) {
        self.buffers.lock().unwrap().remove(file_name);
    }

    fn location_for(&self, file_name: &str) -> String {
        // No path normalization: the load path is a verbatim prefix.
        format!("{}{}{}", self.load_path(), file_name, self.extension)
    }

    /// Asynchronous request. Single-flights concurrent requests for the same
    /// file; resolves to `None` on fetch or decode failure.
    pub async fn request(self: &Arc<Self>, item: &AtlasItem) -> Option<Arc<AudioBuffer>> {
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        let fast = {
            let buffers = self.buffers.lock().unwrap();
            match buffers.get(&item.file_name) {
                Some(CacheEntry::Decoded(buffer)) => FastPath::Hit(Some(buffer.clone())),
                Some(CacheEntry::Failed) => FastPath::Hit(None),
                Some(CacheEntry::Placeholder(buffer)) => {
                    match self.pending.lock().unwrap().get(&item.file_name) {
                        // A load is in flight; share its ticket so the caller
                        // observes the filled buffer.
                        Some(ticket) => FastPath::Wait(ticket.clone()),
                        // An earlier load failed; the silent placeholder is
                        // what this file resolves to until invalidated.
                        None => FastPath::Hit(Some(buffer.clone())),
                    }
                }
                None => match self.pending.lock().unwrap().get(&item.file_name) {
                    Some(ticket) => FastPath::Wait(ticket.clone()),
                    None => FastPath::Start,
                },
            }
        };
        let mut ticket = match fast {
            FastPath::Hit(result) => return result,
            FastPath::Wait(ticket) => ticket,
            FastPath::Start => self.install_ticket(item),
        };
        let result = match ticket
            .wait_for(|state| matches!(state, TicketState::Done(_)))
            .await
        {
            Ok(state) => match &*state {
                TicketState::Done(result) => result.clone(),
                TicketState::Pending => None,
            },
            Err(_) => None,
        };
        result
    }

    /// Synchronous request. Returns the cached buffer if one exists,
    /// otherwise installs a silent placeholder, kicks off the load in the
    /// background and returns the placeholder immediately. Never suspends.
    pub fn request_sync(self: &Arc<Self>, item: &AtlasItem) -> Option<Arc<AudioBuffer>> {
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        let needs_load = {
            let mut buffers = self.buffers.lock().unwrap();
            match buffers.get(&item.file_name) {
                Some(CacheEntry::Decoded(buffer)) | Some(CacheEntry::Placeholder(buffer)) => {
                    return Some(buffer.clone());
                }
                // Sticky failure: hand out a silent placeholder but do not
                // re-attempt until the entry is explicitly invalidated.
                Some(CacheEntry::Failed) => false,
                None => true,
            }
        };
        let placeholder = Arc::new(self.allocate_placeholder(item));
        self.buffers.lock().unwrap().insert(
            item.file_name.clone(),
            CacheEntry::Placeholder(placeholder.clone()),
        );
        if needs_load {
            // The load fills the placeholder in place when it lands.
            let _ = self.install_ticket(item);
        }
        Some(placeholder)
    }

    /// Bulk load, priority names first. Reduces to single-file loads with
    /// bounded concurrency.
    pub async fn load_items(self: &Arc<Self>, items: Vec<AtlasItem>) {
        let ordered = self.order_by_priority(items);
        stream::iter(ordered)
            .map(|item| {
                let cache = Arc::clone(self);
                async move {
                    cache.request(&item).await;
                }
            })
            .buffer_unordered(BULK_CONCURRENCY)
            .collect::<Vec<_>>()
            .await;
    }

    /// Stable reorder: priority items first in rank order, everything else
    /// after them in original relative order.
    fn order_by_priority(&self, mut items: Vec<AtlasItem>) -> Vec<AtlasItem> {
        let priorities = self.priorities.lock().unwrap();
        if priorities.is_empty() {
            return items;
        }
        items.sort_by_key(|item| {
            priorities
                .iter()
                .position(|name| name == &item.source_name)
                .unwrap_or(priorities.len())
        });
        items
    }

    /// Close the cache and drain it. Every in-flight ticket is awaited
    /// before its entry is removed so a resolving load cannot resurrect a
    /// disposed file name.
    pub async fn dispose(&self) {
        self.closed.store(true, Ordering::SeqCst);
        loop {
            let next = {
                self.pending
                    .lock()
                    .unwrap()
                    .iter()
                    .next()
                    .map(|(file, ticket)| (file.clone(), ticket.clone()))
            };
            let Some((file_name, mut ticket)) = next else {
                break;
            };
            let _ = ticket
                .wait_for(|state| matches!(state, TicketState::Done(_)))
                .await;
            self.pending.lock().unwrap().remove(&file_name);
            self.buffers.lock().unwrap().remove(&file_name);
        }
        self.buffers.lock().unwrap().clear();
        debug!("Buffer cache disposed");
    }

    /// Re-open after a dispose so a reload can enter Running again.
    pub fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    fn allocate_placeholder(&self, item: &AtlasItem) -> AudioBuffer {
        let channels = naming::channels_from_file_name(&item.file_name).unwrap_or(1);
        AudioBuffer::silent(
            channels,
            item.sample_count as usize,
            self.context.sample_rate(),
        )
    }

    /// Install a single-flight ticket and spawn the load task. Returns the
    /// existing ticket if one is already in flight.
    fn install_ticket(self: &Arc<Self>, item: &AtlasItem) -> watch::Receiver<TicketState> {
        let mut pending = self.pending.lock().unwrap();
        if let Some(ticket) = pending.get(&item.file_name) {
            return ticket.clone();
        }
        let (tx, rx) = watch::channel(TicketState::Pending);
        pending.insert(item.file_name.clone(), rx.clone());
        let cache = Arc::clone(self);
        let item = item.clone();
        tokio::spawn(async move {
            let result = cache.run_load(&item).await;
            let _ = tx.send(TicketState::Done(result));
        });
        rx
    }

    async fn run_load(self: &Arc<Self>, item: &AtlasItem) -> Option<Arc<AudioBuffer>> {
        let location = self.location_for(&item.file_name);
        debug!("Loading {} from {}", item.file_name, location);
        match self.fetch_and_decode(item, &location).await {
            Ok(decoded) => self.finish_decoded(item, &decoded),
            Err(e) => {
                warn!("Failed to load {}: {}", item.file_name, e);
                self.finish_error(item)
            }
        }
    }

    async fn fetch_and_decode(
        &self,
        item: &AtlasItem,
        location: &str,
    ) -> Result<DecodedAudio, SoundError> {
        let bytes = self.fetcher.fetch(location).await?;
        self.decoder.decode(&item.file_name, &bytes).await
    }

    /// Install the decode result. An existing placeholder is filled in place
    /// and keeps its identity; otherwise a fresh buffer is allocated with the
    /// atlas's frame count. Elided entirely after dispose.
    fn finish_decoded(&self, item: &AtlasItem, decoded: &DecodedAudio) -> Option<Arc<AudioBuffer>> {
        if self.closed.load(Ordering::SeqCst) {
            self.pending.lock().unwrap().remove(&item.file_name);
            return None;
        }
        let buffer = {
            let mut buffers = self.buffers.lock().unwrap();
            let buffer = match buffers.get(&item.file_name) {
                Some(CacheEntry::Placeholder(existing)) => {
                    existing.fill_from(decoded);
                    existing.clone()
                }
                _ => Arc::new(AudioBuffer::from_decoded(
                    decoded,
                    item.sample_count as usize,
                    self.context.sample_rate(),
                )),
            };
            buffers.insert(item.file_name.clone(), CacheEntry::Decoded(buffer.clone()));
            self.pending.lock().unwrap().remove(&item.file_name);
            buffer
        };
        self.events.emit(SoundEvent::SoundLoaded {
            file_name: item.file_name.clone(),
        });
        Some(buffer)
    }

    /// Record a failed load. The ticket resolves to `None`; a placeholder,
    /// if present, stays installed and silent.
    fn finish_error(&self, item: &AtlasItem) -> Option<Arc<AudioBuffer>> {
        if self.closed.load(Ordering::SeqCst) {
            self.pending.lock().unwrap().remove(&item.file_name);
            return None;
        }
        {
            let mut buffers = self.buffers.lock().unwrap();
            if !matches!(buffers.get(&item.file_name), Some(CacheEntry::Placeholder(_))) {
                buffers.insert(item.file_name.clone(), CacheEntry::Failed);
            }
            self.pending.lock().unwrap().remove(&item.file_name);
        }
        self.events.emit(SoundEvent::SoundLoadError {
            file_name: item.file_name.clone(),
        });
        None
    }
}
