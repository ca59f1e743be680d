use crate::domain::{PacScript, Result};
use async_trait::async_trait;
use url::Url;

/// Port for downloading PAC scripts
#[async_trait]
pub trait ScriptFetcherPort: Send + Sync {
    async fn fetch_script(&self, url: &Url) -> Result<PacScript>;
}
