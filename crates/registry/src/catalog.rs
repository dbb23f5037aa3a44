use crate::error::Result;
use async_trait::async_trait;
use costwise_protocol::{ModelInfo, Provider};

/// One discovery source. Implementations live in `costwise-backends`; the
/// registry only knows how to cache and refresh what a catalog returns.
#[async_trait]
pub trait ModelCatalog: Send + Sync {
    fn provider(&self) -> Provider;

    /// Enumerate the provider's models. Expensive: the registry decides
    /// when to call this, implementations must not cache.
    async fn list_models(&self) -> Result<Vec<ModelInfo>>;
}
