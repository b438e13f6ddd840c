use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;

use super::{GenerationRequest, Generator};

/// A scripted generator for tests. Replies are consumed in order; once the
/// script runs out, the fallback (if any) answers every call.
/// Every request is recorded for later inspection.
pub struct MockGenerator {
    script: Mutex<VecDeque<Result<String, String>>>,
    fallback: Option<Result<String, String>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl MockGenerator {
    /// `Ok(text)` answers, `Err(message)` fails the call.
    pub fn new(script: Vec<Result<String, String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answers every call with `text`.
    pub fn always(text: impl Into<String>) -> Self {
        Self {
            fallback: Some(Ok(text.into())),
            ..Self::new(Vec::new())
        }
    }

    /// Fails every call with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            fallback: Some(Err(message.into())),
            ..Self::new(Vec::new())
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let call = {
            let mut requests = self
                .requests
                .lock()
                .map_err(|_| anyhow!("MockGenerator: request log poisoned"))?;
            requests.push(request.clone());
            requests.len()
        };

        let next = self
            .script
            .lock()
            .map_err(|_| anyhow!("MockGenerator: script poisoned"))?
            .pop_front();

        match next.or_else(|| self.fallback.clone()) {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => bail!("{message}"),
            None => bail!("MockGenerator: no more replies (called {call} times)"),
        }
    }
}
