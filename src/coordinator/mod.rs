mod lifecycle;
mod service;

pub use service::Coordinator;
