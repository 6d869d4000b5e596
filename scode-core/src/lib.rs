pub mod atlas;
pub mod buffer;
pub mod cache;
pub mod decode;
pub mod error;
pub mod events;
pub mod fetch;
pub mod manager;
pub mod naming;
#[cfg(feature = "test-utils")]
pub mod test_support;

pub use atlas::{Atlas, AtlasItem, NO_LANGUAGE};
pub use buffer::{AudioBuffer, AudioContext};
pub use error::SoundError;
pub use events::{EventBus, EventKind, SoundEvent, Subscription};
pub use manager::{Lifecycle, SoundManager, SoundManagerOptions};
pub use naming::FileName;
