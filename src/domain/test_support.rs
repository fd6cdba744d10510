use std::time::Duration;

use super::{Admission, DrainPolicy, GenerationParams, TestConfig, TestId};
use crate::schedule::ArrivalRule;

/// A valid config pointed at `base_url`, driven by `rule`.
pub(crate) fn test_config(base_url: &str, rule: &str) -> Result<TestConfig, String> {
    let endpoint_url =
        url::Url::parse(base_url).map_err(|err| format!("bad test url {}: {}", base_url, err))?;
    let arrival_rule =
        ArrivalRule::parse(rule).map_err(|err| format!("bad test rule {}: {}", rule, err))?;
    Ok(TestConfig {
        id: TestId::generate(),
        endpoint_url,
        model_name: "stub-model".to_owned(),
        endpoint_type: "openai".to_owned(),
        dataset_name: "prompts".to_owned(),
        prompt_source: "prompts".to_owned(),
        arrival_rule,
        random_seed: Some(7),
        generation_params: GenerationParams {
            temperature: None,
            top_p: None,
            max_tokens: Some(16),
        },
        request_timeout: Duration::from_secs(5),
        skip_idle_threshold: Duration::from_secs(300),
        report_time_step: Duration::from_millis(100),
        max_run_time: None,
        slo_ttft: Duration::from_secs(1),
        max_in_flight: None,
        admission: Admission::Queue,
        drain_policy: DrainPolicy::Drain,
        legacy: false,
        api_key: None,
        auth_token: None,
    })
}
