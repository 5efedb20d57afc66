pub mod bus;
pub mod protocol;

pub use bus::{BusError, Inbox, MessageBus, TabId, Target};
pub use protocol::{ActivityKind, Message, Reply};
