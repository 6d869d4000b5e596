//! Typed event bus for sound manager notifications.
//!
//! Listeners register per event kind and receive the statically-known payload
//! for that kind. Emission is fire-and-forget: handlers run synchronously at
//! the emit site, outside the registry lock, so a handler may add or drop
//! listeners without deadlocking.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

/// The observable event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    AtlasLoaded,
    PackageChanged,
    LanguageChanged,
    LoadPathChanged,
    SoundLoaded,
    SoundLoadError,
    Reloaded,
}

/// An event with its payload. Load events carry the content-addressed file
/// name; the rest are unit notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SoundEvent {
    AtlasLoaded,
    PackageChanged,
    LanguageChanged,
    LoadPathChanged,
    SoundLoaded { file_name: String },
    SoundLoadError { file_name: String },
    Reloaded,
}

impl SoundEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SoundEvent::AtlasLoaded => EventKind::AtlasLoaded,
            SoundEvent::PackageChanged => EventKind::PackageChanged,
            SoundEvent::LanguageChanged => EventKind::LanguageChanged,
            SoundEvent::LoadPathChanged => EventKind::LoadPathChanged,
            SoundEvent::SoundLoaded { .. } => EventKind::SoundLoaded,
            SoundEvent::SoundLoadError { .. } => EventKind::SoundLoadError,
            SoundEvent::Reloaded => EventKind::Reloaded,
        }
    }
}

type Handler = Arc<dyn Fn(&SoundEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: HashMap<EventKind, Vec<(u64, Handler)>>,
}

/// Cheap to clone; clones share one listener table.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event kind. The returned subscription owns
    /// the removal right: dropping it unsubscribes.
    pub fn add_listener(
        &self,
        kind: EventKind,
        handler: impl Fn(&SoundEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let mut registry = self.registry.lock().unwrap();
        registry.next_id += 1;
        let id = registry.next_id;
        registry
            .listeners
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription {
            registry: Arc::downgrade(&self.registry),
            kind,
            id,
        }
    }

    /// Notify every listener registered for the event's kind, in
    /// registration order.
    pub fn emit(&self, event: SoundEvent) {
        let handlers: Vec<Handler> = {
            let registry = self.registry.lock().unwrap();
            registry
                .listeners
                .get(&event.kind())
                .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
                .unwrap_or_default()
        };
        for handler in handlers {
            handler(&event);
        }
    }
}

/// Owns the removal right for one registered listener.
pub struct Subscription {
    registry: Weak<Mutex<Registry>>,
    kind: EventKind,
    id: u64,
}

impl Subscription {
    /// Explicit removal; equivalent to dropping the subscription.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            let mut registry = registry.lock().unwrap();
            if let Some(list) = registry.listeners.get_mut(&self.kind) {
                list.retain(|(id, _)| *id != self.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_listener_receives_matching_kind_only() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let _sub = bus.add_listener(EventKind::SoundLoaded, move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(SoundEvent::SoundLoaded {
            file_name: "f".into(),
        });
        bus.emit(SoundEvent::PackageChanged);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_payload_reaches_handler() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let _sub = bus.add_listener(EventKind::SoundLoadError, move |event| {
            if let SoundEvent::SoundLoadError { file_name } = event {
                seen_clone.lock().unwrap().push(file_name.clone());
            }
        });

        bus.emit(SoundEvent::SoundLoadError {
            file_name: "96k.2ch.1".into(),
        });
        assert_eq!(seen.lock().unwrap().as_slice(), &["96k.2ch.1".to_string()]);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let sub = bus.add_listener(EventKind::Reloaded, move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(SoundEvent::Reloaded);
        drop(sub);
        bus.emit(SoundEvent::Reloaded);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_may_touch_the_bus() {
        let bus = EventBus::new();
        let bus_clone = bus.clone();
        let _sub = bus.add_listener(EventKind::AtlasLoaded, move |_| {
            // Re-entrant registration must not deadlock.
            bus_clone
                .add_listener(EventKind::Reloaded, |_| {})
                .unsubscribe();
        });
        bus.emit(SoundEvent::AtlasLoaded);
    }
}
