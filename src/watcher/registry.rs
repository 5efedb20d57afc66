use std::collections::{BTreeMap, HashMap};

use crate::{
    document::NodeId,
    domain::{AnnotationState, CandidateId, Label, Stats},
};

#[derive(Debug, Clone)]
pub struct CandidateRecord {
    pub node: NodeId,
    pub state: AnnotationState,
    pub pending_indicator: Option<NodeId>,
}

#[derive(Debug, Default)]
pub struct AnnotationRegistry {
    seen: HashMap<NodeId, CandidateId>,
    records: BTreeMap<CandidateId, CandidateRecord>,
    next_id: u64,
}

impl AnnotationRegistry {
    pub fn is_seen(&self, node: NodeId) -> bool {
        self.seen.contains_key(&node)
    }

    /// Moves a fresh node to pending. The canonical text node, when distinct, is claimed
    /// alongside it so the same text block is never scored twice.
    pub fn admit(&mut self, node: NodeId, text_node: Option<NodeId>) -> Option<CandidateId> {
        if self.is_seen(node) || text_node.is_some_and(|t| self.is_seen(t)) {
            return None;
        }
        let mut state = AnnotationState::Unseen;
        state.begin().ok()?;

        self.next_id += 1;
        let id = CandidateId(self.next_id);
        self.seen.insert(node, id);
        if let Some(text_node) = text_node {
            self.seen.insert(text_node, id);
        }
        self.records.insert(
            id,
            CandidateRecord {
                node,
                state,
                pending_indicator: None,
            },
        );
        Some(id)
    }

    pub fn get_mut(&mut self, id: CandidateId) -> Option<&mut CandidateRecord> {
        self.records.get_mut(&id)
    }

    pub fn candidate_for(&self, node: NodeId) -> Option<CandidateId> {
        self.seen.get(&node).copied()
    }

    pub fn state_of(&self, node: NodeId) -> AnnotationState {
        self.candidate_for(node)
            .and_then(|id| self.records.get(&id))
            .map(|record| record.state.clone())
            .unwrap_or(AnnotationState::Unseen)
    }

    pub fn pending(&self) -> usize {
        self.records
            .values()
            .filter(|record| record.state == AnnotationState::Pending)
            .count()
    }

    pub fn local_stats(&self) -> Stats {
        let toxic = self
            .records
            .values()
            .filter(|record| {
                matches!(&record.state, AnnotationState::Annotated(result) if result.label == Label::Toxic)
            })
            .count();
        Stats {
            total_analyzed: self.records.len() as u64,
            toxic_count: toxic as u64,
        }
    }
}
