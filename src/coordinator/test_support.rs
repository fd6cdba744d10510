use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::config::types::{DatasetConfig, RegistrationRequest, RequestKwargs};
use crate::domain::{Report, TestId};
use crate::error::{DispatchError, StoreError};
use crate::prompts::{PromptCatalog, PromptPool, PromptSource};
use crate::store::ReportSink;

/// Serves a one-prompt pool for any name except `missing` and `crashing`.
#[derive(Debug)]
pub(crate) struct FixedPrompts;

#[async_trait]
impl PromptCatalog for FixedPrompts {
    async fn open(
        &self,
        name: &str,
        seed: Option<u64>,
    ) -> Result<Arc<dyn PromptSource>, DispatchError> {
        if name == "missing" {
            return Err(DispatchError::PromptSourceUnavailable {
                name: name.to_owned(),
                reason: "not on disk".to_owned(),
            });
        }
        if name == "crashing" {
            return Ok(Arc::new(CrashingPrompts));
        }
        let pool = PromptPool::from_prompts(name, vec!["Say hello.".to_owned()], seed)?;
        Ok(Arc::new(pool))
    }
}

/// Panics on the first prompt.
#[derive(Debug)]
struct CrashingPrompts;

impl PromptSource for CrashingPrompts {
    fn name(&self) -> &str {
        "crashing"
    }

    #[expect(clippy::panic, reason = "simulates a crashing run")]
    fn next_prompt(&self) -> Result<String, DispatchError> {
        panic!("prompt source crashed")
    }
}

#[derive(Debug, Default)]
pub(crate) struct MemorySink {
    reports: Mutex<Vec<(TestId, Report)>>,
}

impl MemorySink {
    pub(crate) fn persisted(&self) -> Vec<(TestId, Report)> {
        match self.reports.lock() {
            Ok(reports) => reports.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl ReportSink for MemorySink {
    async fn persist_report(&self, test_id: &TestId, report: &Report) -> Result<(), StoreError> {
        if let Ok(mut reports) = self.reports.lock() {
            reports.push((test_id.clone(), report.clone()));
        }
        Ok(())
    }

    async fn remove_report(&self, test_id: &TestId) -> Result<bool, StoreError> {
        let Ok(mut reports) = self.reports.lock() else {
            return Ok(false);
        };
        let before = reports.len();
        reports.retain(|(id, _)| id != test_id);
        Ok(reports.len() != before)
    }
}

pub(crate) fn registration(base_url: &str, rule: &str) -> RegistrationRequest {
    RegistrationRequest {
        url: Some(base_url.to_owned()),
        model: Some("stub-model".to_owned()),
        dataset_name: Some("prompts".to_owned()),
        endpoint_type: Some("openai".to_owned()),
        random_seed: Some(7),
        dataset_config: DatasetConfig {
            func: Some(rule.to_owned()),
            ..DatasetConfig::default()
        },
        kwargs: RequestKwargs {
            max_tokens: Some(16),
            request_timeout: Some(5.0),
            time_step: Some(0.1),
            ..RequestKwargs::default()
        },
        ..RegistrationRequest::default()
    }
}
