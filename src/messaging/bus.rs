use std::{collections::BTreeMap, fmt, sync::Arc};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use super::protocol::{Message, Reply};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TabId(pub u32);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tab-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Coordinator,
    Tab(TabId),
    Panel,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Coordinator => f.write_str("coordinator"),
            Target::Tab(id) => write!(f, "{id}"),
            Target::Panel => f.write_str("panel"),
        }
    }
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("no live receiver for {0}")]
    NoReceiver(Target),
    #[error("{0} dropped the message without replying")]
    NoReply(Target),
}

#[derive(Debug)]
pub struct Envelope {
    pub message: Message,
    reply: oneshot::Sender<Reply>,
}

impl Envelope {
    pub fn into_parts(self) -> (Message, Responder) {
        (self.message, Responder(self.reply))
    }
}

#[derive(Debug)]
pub struct Responder(oneshot::Sender<Reply>);

impl Responder {
    pub fn send(self, reply: Reply) {
        let _ = self.0.send(reply);
    }
}

pub type Inbox = mpsc::UnboundedReceiver<Envelope>;
type Endpoint = mpsc::UnboundedSender<Envelope>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabInfo {
    pub id: TabId,
    pub url: String,
    pub live: bool,
    pub active: bool,
}

struct TabEntry {
    url: String,
    endpoint: Option<Endpoint>,
}

#[derive(Default)]
struct Registry {
    coordinator: Option<Endpoint>,
    panel: Option<Endpoint>,
    tabs: BTreeMap<TabId, TabEntry>,
    active: Option<TabId>,
    next_tab: u32,
}

#[derive(Clone, Default)]
pub struct MessageBus {
    inner: Arc<Mutex<Registry>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_coordinator(&self) -> Inbox {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().coordinator = Some(tx);
        rx
    }

    pub fn attach_panel(&self) -> Inbox {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().panel = Some(tx);
        rx
    }

    pub fn detach_panel(&self) {
        self.inner.lock().panel = None;
    }

    pub fn is_panel_open(&self) -> bool {
        self.inner
            .lock()
            .panel
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    pub fn open_tab(&self, url: impl Into<String>) -> TabId {
        let mut registry = self.inner.lock();
        registry.next_tab += 1;
        let id = TabId(registry.next_tab);
        registry.tabs.insert(
            id,
            TabEntry {
                url: url.into(),
                endpoint: None,
            },
        );
        registry.active = Some(id);
        tracing::debug!(target: "bus", tab = %id, "tab opened");
        id
    }

    pub fn navigate(&self, tab: TabId, url: impl Into<String>) -> bool {
        let mut registry = self.inner.lock();
        match registry.tabs.get_mut(&tab) {
            Some(entry) => {
                entry.url = url.into();
                entry.endpoint = None;
                true
            }
            None => false,
        }
    }

    pub fn attach_tab(&self, tab: TabId) -> Option<Inbox> {
        let mut registry = self.inner.lock();
        let entry = registry.tabs.get_mut(&tab)?;
        let (tx, rx) = mpsc::unbounded_channel();
        entry.endpoint = Some(tx);
        Some(rx)
    }

    pub fn activate(&self, tab: TabId) -> bool {
        let mut registry = self.inner.lock();
        if registry.tabs.contains_key(&tab) {
            registry.active = Some(tab);
            true
        } else {
            false
        }
    }

    pub fn close_tab(&self, tab: TabId) -> bool {
        let mut registry = self.inner.lock();
        let removed = registry.tabs.remove(&tab).is_some();
        if registry.active == Some(tab) {
            registry.active = registry.tabs.keys().next_back().copied();
        }
        removed
    }

    pub fn active_tab(&self) -> Option<TabId> {
        self.inner.lock().active
    }

    pub fn tabs(&self) -> Vec<TabInfo> {
        let registry = self.inner.lock();
        registry
            .tabs
            .iter()
            .map(|(id, entry)| TabInfo {
                id: *id,
                url: entry.url.clone(),
                live: entry.endpoint.as_ref().is_some_and(|tx| !tx.is_closed()),
                active: registry.active == Some(*id),
            })
            .collect()
    }

    pub async fn request(&self, target: Target, message: Message) -> Result<Reply, BusError> {
        let (tx, rx) = oneshot::channel();
        self.deliver(target, Envelope { message, reply: tx })?;
        rx.await.map_err(|_| BusError::NoReply(target))
    }

    /// Sends `message` without waiting; any reply is discarded.
    pub fn notify(&self, target: Target, message: Message) -> Result<(), BusError> {
        let (tx, _rx) = oneshot::channel();
        self.deliver(target, Envelope { message, reply: tx })
    }

    fn deliver(&self, target: Target, envelope: Envelope) -> Result<(), BusError> {
        let endpoint = {
            let registry = self.inner.lock();
            match target {
                Target::Coordinator => registry.coordinator.clone(),
                Target::Panel => registry.panel.clone(),
                Target::Tab(id) => registry
                    .tabs
                    .get(&id)
                    .and_then(|entry| entry.endpoint.clone()),
            }
        };
        let endpoint = endpoint.ok_or(BusError::NoReceiver(target))?;
        endpoint
            .send(envelope)
            .map_err(|_| BusError::NoReceiver(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn request_round_trips_through_inbox() {
        let bus = MessageBus::new();
        let mut inbox = bus.register_coordinator();
        tokio::spawn(async move {
            while let Some(envelope) = inbox.recv().await {
                let (message, responder) = envelope.into_parts();
                assert_eq!(message, Message::GetStats);
                responder.send(Reply::ack());
            }
        });

        let reply = bus
            .request(Target::Coordinator, Message::GetStats)
            .await
            .unwrap();
        assert_eq!(reply, Reply::ack());
    }

    #[tokio::test]
    async fn missing_or_closed_receivers_are_reported() {
        let bus = MessageBus::new();
        let tab = bus.open_tab("https://x.com/home");
        assert!(matches!(
            bus.notify(Target::Tab(tab), Message::GetStats),
            Err(BusError::NoReceiver(Target::Tab(_)))
        ));

        let inbox = bus.attach_panel();
        drop(inbox);
        assert!(!bus.is_panel_open());
        assert!(bus.notify(Target::Panel, Message::GetStats).is_err());
    }

    #[tokio::test]
    async fn dropped_envelope_is_no_reply() {
        let bus = MessageBus::new();
        let tab = bus.open_tab("https://x.com/home");
        let mut inbox = bus.attach_tab(tab).unwrap();
        tokio::spawn(async move {
            let _ = inbox.recv().await;
        });
        let err = bus
            .request(Target::Tab(tab), Message::GetStats)
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::NoReply(_)));
    }

    #[test]
    fn navigation_detaches_page_and_close_moves_focus() {
        let bus = MessageBus::new();
        let first = bus.open_tab("https://x.com/home");
        let second = bus.open_tab("https://example.com/");
        let _inbox = bus.attach_tab(first).unwrap();
        assert_eq!(bus.active_tab(), Some(second));
        assert!(bus.tabs()[0].live);

        bus.navigate(first, "https://x.com/explore");
        assert!(!bus.tabs()[0].live);

        bus.close_tab(second);
        assert_eq!(bus.active_tab(), Some(first));
    }
}
