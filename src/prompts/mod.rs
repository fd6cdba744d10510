//! Prompt sources: where the text of each dispatched request comes from.
mod pool;


use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::DispatchError;

pub use pool::{PromptPool, load_prompt_pool};

/// Supplies prompt text for dispatched requests.
pub trait PromptSource: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Next prompt to send.
    ///
    /// # Errors
    ///
    /// Returns an error when the source cannot supply another prompt.
    fn next_prompt(&self) -> Result<String, DispatchError>;
}

/// Opens a named prompt source at the start of each run.
#[async_trait]
pub trait PromptCatalog: Send + Sync + fmt::Debug {
    /// # Errors
    ///
    /// Returns an error when the named source does not exist or is empty.
    async fn open(
        &self,
        name: &str,
        seed: Option<u64>,
    ) -> Result<Arc<dyn PromptSource>, DispatchError>;
}

/// Corpora stored as `<dir>/<name>.jsonl` or `<dir>/<name>.txt`.
#[derive(Debug, Clone)]
pub struct DatasetDirectory {
    dir: PathBuf,
}

impl DatasetDirectory {
    #[must_use]
    pub const fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl PromptCatalog for DatasetDirectory {
    async fn open(
        &self,
        name: &str,
        seed: Option<u64>,
    ) -> Result<Arc<dyn PromptSource>, DispatchError> {
        let pool = load_prompt_pool(&self.dir, name, seed).await?;
        Ok(Arc::new(pool))
    }
}
