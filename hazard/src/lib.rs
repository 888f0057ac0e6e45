//! Hazard pointers over non-reclaiming lock-free lists.
//!
//! A [`Domain`] owns every hazard record ever handed out and the retired objects waiting to be
//! freed. Threads reach it through a [`Handle`], obtained with [`Domain::handle`], which protects
//! addresses with [`HazardPointer`]s and retires unlinked objects.

mod config;
mod domain;
mod error;
mod hazard;
mod retire;
mod thread;

pub use config::Config;
pub use domain::{Domain, Reclaimed};
pub use error::Error;
pub use hazard::HazardPointer;
pub use thread::Handle;
