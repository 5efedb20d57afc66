use futures::future::BoxFuture;
use reqwest::Client;

use crate::domain::AnalysisResult;

use super::{
    protocol::{build_request, parse_response},
    Classifier, ClassifierError,
};

#[derive(Clone)]
pub struct HttpClassifier {
    http: Client,
}

impl HttpClassifier {
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    pub async fn classify(
        &self,
        endpoint: &str,
        text: &str,
    ) -> Result<AnalysisResult, ClassifierError> {
        let response = self
            .http
            .post(endpoint)
            .json(&build_request(text))
            .send()
            .await
            .map_err(ClassifierError::Network)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClassifierError::BadStatus(status.as_u16()));
        }

        let body = response.bytes().await.map_err(ClassifierError::Network)?;
        let result = parse_response(&body)?;
        tracing::debug!(
            target: "classifier",
            endpoint,
            label = %result.label,
            score = result.score,
            "classification received"
        );
        Ok(result)
    }
}

impl Classifier for HttpClassifier {
    fn score<'a>(
        &'a self,
        endpoint: &'a str,
        text: &'a str,
    ) -> BoxFuture<'a, Result<AnalysisResult, ClassifierError>> {
        Box::pin(self.classify(endpoint, text))
    }
}
