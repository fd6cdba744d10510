use std::path::Path;
use std::sync::Mutex;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde_json::Value;
use tracing::info;

use crate::error::DispatchError;

use super::PromptSource;

/// Object keys tried, in order, for JSON lines that are not bare strings.
const TEXT_KEYS: [&str; 5] = ["prompt", "text", "instruction", "content", "question"];

/// In-memory corpus sampled with a seeded RNG, so a fixed `random_seed`
/// replays the same prompt sequence.
#[derive(Debug)]
pub struct PromptPool {
    name: String,
    prompts: Vec<String>,
    rng: Mutex<StdRng>,
}

impl PromptPool {
    /// Builds a pool from prompts already in memory.
    ///
    /// # Errors
    ///
    /// Returns an error when `prompts` is empty.
    pub fn from_prompts(
        name: &str,
        prompts: Vec<String>,
        seed: Option<u64>,
    ) -> Result<Self, DispatchError> {
        if prompts.is_empty() {
            return Err(DispatchError::PromptSourceUnavailable {
                name: name.to_owned(),
                reason: "corpus contains no prompts".to_owned(),
            });
        }
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            name: name.to_owned(),
            prompts,
            rng: Mutex::new(rng),
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }
}

impl PromptSource for PromptPool {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_prompt(&self) -> Result<String, DispatchError> {
        let mut rng = match self.rng.lock() {
            Ok(rng) => rng,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.prompts
            .choose(&mut *rng)
            .cloned()
            .ok_or_else(|| DispatchError::PromptSourceExhausted {
                name: self.name.clone(),
            })
    }
}

/// Loads `<datasets_dir>/<name>.jsonl` or `<datasets_dir>/<name>.txt`.
///
/// JSON lines may be bare strings or objects with a `prompt`, `text`,
/// `instruction`, `content` or `question` field. Text files hold one prompt
/// per line. Blank entries are skipped.
///
/// # Errors
///
/// Returns an error when the name is not a plain file stem, neither file can
/// be read, or the corpus is empty.
pub async fn load_prompt_pool(
    datasets_dir: &Path,
    name: &str,
    seed: Option<u64>,
) -> Result<PromptPool, DispatchError> {
    if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
        return Err(unavailable(name, "not a plain dataset name".to_owned()));
    }

    let jsonl = datasets_dir.join(format!("{}.jsonl", name));
    let txt = datasets_dir.join(format!("{}.txt", name));
    let prompts = if tokio::fs::try_exists(&jsonl).await.unwrap_or(false) {
        parse_jsonl(name, &read(name, &jsonl).await?)?
    } else if tokio::fs::try_exists(&txt).await.unwrap_or(false) {
        parse_lines(&read(name, &txt).await?)
    } else {
        return Err(unavailable(
            name,
            format!(
                "neither {} nor {} exists",
                jsonl.display(),
                txt.display()
            ),
        ));
    };

    info!("Loaded {} prompts from dataset '{}'.", prompts.len(), name);
    PromptPool::from_prompts(name, prompts, seed)
}

async fn read(name: &str, path: &Path) -> Result<String, DispatchError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|err| unavailable(name, format!("failed to read {}: {}", path.display(), err)))
}

fn parse_jsonl(name: &str, content: &str) -> Result<Vec<String>, DispatchError> {
    let mut prompts = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(line).map_err(|err| {
            unavailable(
                name,
                format!("line {} is not valid JSON: {}", index.saturating_add(1), err),
            )
        })?;
        if let Some(text) = prompt_text(&value).filter(|text| !text.trim().is_empty()) {
            prompts.push(text.to_owned());
        }
    }
    Ok(prompts)
}

fn prompt_text(value: &Value) -> Option<&str> {
    match value {
        Value::String(text) => Some(text),
        Value::Object(map) => TEXT_KEYS
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str)),
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::Array(_) => None,
    }
}

fn parse_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

fn unavailable(name: &str, reason: String) -> DispatchError {
    DispatchError::PromptSourceUnavailable {
        name: name.to_owned(),
        reason,
    }
}
