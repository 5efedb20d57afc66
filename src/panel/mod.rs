pub mod activity;
pub mod service;

pub use service::ControlPanel;
