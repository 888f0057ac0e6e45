//! Lock-free structural primitives that never free the nodes they unlink.
//!
//! Every container here performs pointer chasing and CAS linking only. Node storage is owned by a
//! [`MemoryResource`] and its lifetime is decided elsewhere: by an arena ([`Monotonic`]), a
//! recycling pool ([`Recycling`]) or an external reclamation scheme.

mod list;
mod monotonic;
mod queue;
mod recycle;
mod resource;
mod tagged;

pub use list::{IntoIter, Iter, List};
pub use monotonic::Monotonic;
pub use queue::Queue;
pub use recycle::{Recycling, RECYCLE_CAPACITY};
pub use resource::{AllocError, Global, MemoryResource};
pub use tagged::{next_tag, AtomicTaggedPtr, TaggedPtr};
