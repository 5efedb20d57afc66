use futures::{stream::BoxStream, StreamExt};
use tokio::sync::mpsc;

use super::tree::NodeId;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationBatch {
    pub added: Vec<NodeId>,
    pub removed: Vec<NodeId>,
}

pub type MutationStream = BoxStream<'static, MutationBatch>;

pub(crate) fn subscription() -> (mpsc::UnboundedSender<MutationBatch>, MutationStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|batch| (batch, rx))
    })
    .boxed();
    (tx, stream)
}
