pub mod indicator;
pub mod registry;
pub mod service;

pub use service::{DocumentWatcher, WatcherError};
