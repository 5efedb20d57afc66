use std::fmt;

use thiserror::Error;

use super::types::AnalysisResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CandidateId(pub u64);

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationState {
    Unseen,
    Pending,
    Annotated(AnalysisResult),
    Failed(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal annotation transition {from} -> {to}")]
pub struct TransitionError {
    pub from: &'static str,
    pub to: &'static str,
}

impl AnnotationState {
    pub fn name(&self) -> &'static str {
        match self {
            AnnotationState::Unseen => "unseen",
            AnnotationState::Pending => "pending",
            AnnotationState::Annotated(_) => "annotated",
            AnnotationState::Failed(_) => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AnnotationState::Annotated(_) | AnnotationState::Failed(_)
        )
    }

    pub fn begin(&mut self) -> Result<(), TransitionError> {
        match self {
            AnnotationState::Unseen => {
                *self = AnnotationState::Pending;
                Ok(())
            }
            other => Err(TransitionError {
                from: other.name(),
                to: "pending",
            }),
        }
    }

    pub fn annotate(&mut self, result: AnalysisResult) -> Result<(), TransitionError> {
        self.resolve(AnnotationState::Annotated(result))
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.resolve(AnnotationState::Failed(reason.into()))
    }

    fn resolve(&mut self, next: AnnotationState) -> Result<(), TransitionError> {
        if !matches!(self, AnnotationState::Pending) {
            return Err(TransitionError {
                from: self.name(),
                to: next.name(),
            });
        }
        *self = next;
        Ok(())
    }
}
