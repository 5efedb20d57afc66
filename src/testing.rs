use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::{
    classifier::{Classifier, ClassifierError},
    document::ElementSpec,
    domain::{AnalysisResult, Label},
};

#[derive(Debug, Clone)]
pub enum Verdict {
    Score(Label, f64),
    TransportError,
    BadStatus(u16),
    Malformed,
}

pub struct FakeClassifier {
    verdict: Verdict,
    calls: Mutex<Vec<(String, String)>>,
}

impl FakeClassifier {
    pub fn new(verdict: Verdict) -> Self {
        Self {
            verdict,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl Classifier for FakeClassifier {
    fn score<'a>(
        &'a self,
        endpoint: &'a str,
        text: &'a str,
    ) -> BoxFuture<'a, Result<AnalysisResult, ClassifierError>> {
        self.calls
            .lock()
            .push((endpoint.to_string(), text.to_string()));
        let verdict = self.verdict.clone();
        Box::pin(async move {
            match verdict {
                Verdict::Score(label, score) => Ok(AnalysisResult::new(label, score)),
                Verdict::BadStatus(status) => Err(ClassifierError::BadStatus(status)),
                Verdict::Malformed => {
                    let err = serde_json::from_str::<serde_json::Value>("{\"label\":")
                        .expect_err("truncated body must fail");
                    Err(ClassifierError::MalformedResponse(err))
                }
                Verdict::TransportError => {
                    // relative urls fail inside the request builder
                    let err = reqwest::Client::new()
                        .post("not a url")
                        .send()
                        .await
                        .expect_err("relative url must fail");
                    Err(ClassifierError::Network(err))
                }
            }
        })
    }
}

pub fn tweet(text: &str) -> ElementSpec {
    ElementSpec::new("article")
        .attr("data-testid", "tweet")
        .key("tweet")
        .child(
            ElementSpec::new("div")
                .attr("data-testid", "tweetText")
                .attr("lang", "en")
                .key("text")
                .text(text),
        )
}

pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..300 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
