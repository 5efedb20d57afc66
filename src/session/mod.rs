pub mod feed;
pub mod replay;

pub use replay::{SessionContext, SessionReplayer};
