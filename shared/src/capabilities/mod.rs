//! Capabilities: the side-effect seams between the core and the shells.
//!
//! Everything the app does to the outside world goes through one of these.
//! The shells execute the operations and resolve them with outputs; the
//! core never blocks and never touches a platform API directly.

mod blob;
mod cache;
mod connectivity;
mod store;

pub use self::blob::{Blob, BlobError, BlobOperation, BlobOutput, BlobResult};
pub use self::cache::{
    Cache, CacheEntry, CacheError, CacheKey, CacheOperation, CacheOutput, CacheResult,
};
pub use self::connectivity::{Connectivity, ConnectivityOperation, ConnectivityStatus};
pub use self::store::{
    DocPath, DocumentSnapshot, Store, StoreError, StoreOperation, StoreOutput, StoreResult,
};

pub use crux_core::render::Render;

use crate::event::Event;

#[derive(crux_core::macros::Effect)]
pub struct Capabilities {
    pub store: Store<Event>,
    pub cache: Cache<Event>,
    pub blob: Blob<Event>,
    pub connectivity: Connectivity<Event>,
    pub render: Render<Event>,
}
