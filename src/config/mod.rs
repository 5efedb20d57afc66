pub mod env;
mod loader;

pub use env::{AppConfig, DirectoryConfig, SiteConfig, WatcherConfig};
pub use loader::{load_config, DEFAULT_BACKEND_URL};
