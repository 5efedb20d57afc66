pub mod observer;
pub mod selector;
pub mod tree;

pub use observer::{MutationBatch, MutationStream};
pub use selector::{Selector, SelectorSet, TWEET_CONTAINER, TWEET_TEXT};
pub use tree::{Document, ElementSpec, NodeId};
