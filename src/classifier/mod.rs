mod client;
pub mod protocol;

use futures::future::BoxFuture;
use thiserror::Error;

use crate::domain::AnalysisResult;

pub use client::HttpClassifier;

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier transport failed: {0}")]
    Network(#[source] reqwest::Error),
    #[error("classifier answered with status {0}")]
    BadStatus(u16),
    #[error("classifier response could not be parsed: {0}")]
    MalformedResponse(#[from] serde_json::Error),
}

pub trait Classifier: Send + Sync {
    fn score<'a>(
        &'a self,
        endpoint: &'a str,
        text: &'a str,
    ) -> BoxFuture<'a, Result<AnalysisResult, ClassifierError>>;
}
