//! Durable segment storage: the wire codec and the `SegmentStore` backends
//! the producer writes to and the consumer reads from.

pub mod codec;
pub mod error;
pub mod filesystem;
pub mod memory;
pub mod passthrough;
pub mod store;

pub mod prelude {
    pub use crate::error::{StoreError, StoreResult};
    pub use crate::filesystem::FilesystemStore;
    pub use crate::memory::MemoryStore;
    pub use crate::passthrough::PassthroughStore;
    pub use crate::store::SegmentStore;
}
