use async_trait::async_trait;
use teamsync::snapshot::Catalog;
use teamsync::SyncError;

/// Producer of a complete catalog for one sync cycle.
///
/// The orchestrator owns scheduling, single-flight and publication; a source
/// only knows how to assemble every entity family once.
///
/// # Contract
/// - Return `Ok` only when every required family was fetched
/// - Entity-local failures (one bad detail payload) are absorbed, not returned
/// - Any error aborts the cycle; the previous snapshot stays published
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Identifier used in logs (e.g. "upstream").
    fn name(&self) -> &str;

    /// Fetches and merges all entity families.
    async fn collect(&self) -> Result<Catalog, SyncError>;
}
