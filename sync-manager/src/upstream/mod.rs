//! Upstream platform source.
//!
//! One sync cycle is a small dependency-ordered task graph:
//!
//! ```text
//!   machines ──────────────┐
//!   challenges ────────────┼──► Catalog
//!   roster ──► profiles ───┘
//! ```
//!
//! The three branches run concurrently; member profiles need roster ids and
//! run after the roster. The first required failure aborts the whole graph.

mod api;
pub mod challenges;
pub mod machines;
pub mod pagination;
pub mod roster;

pub use api::UpstreamClient;

use crate::source::CatalogSource;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use teamsync::config::SyncConfig;
use teamsync::credentials::CredentialManager;
use teamsync::executor::RequestExecutor;
use teamsync::rate_limit::ThrottleRegistry;
use teamsync::snapshot::Catalog;
use teamsync::SyncError;
use tracing::{info, warn};

/// Runs one detail call per id concurrently.
///
/// Ids whose call fails are missing from the result. Auth failures abort,
/// since every later call would fail the same way.
pub(crate) async fn fetch_details<T, F, Fut>(
    what: &str,
    ids: Vec<u64>,
    fetch: F,
) -> Result<HashMap<u64, T>, SyncError>
where
    F: Fn(u64) -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let results = join_all(ids.into_iter().map(|id| {
        let call = fetch(id);
        async move { (id, call.await) }
    }))
    .await;

    let mut details = HashMap::with_capacity(results.len());
    for (id, result) in results {
        match result {
            Ok(detail) => {
                details.insert(id, detail);
            }
            Err(e) if e.is_auth() => return Err(e),
            Err(e) => {
                warn!(entity = what, id, error = %e, "Skipping entity after failed detail fetch");
            }
        }
    }
    Ok(details)
}

/// Downgrades the failure of a non-required call to an empty value.
pub(crate) fn optional<T: Default>(what: &str, result: Result<T, SyncError>) -> Result<T, SyncError> {
    match result {
        Ok(value) => Ok(value),
        Err(e) if e.is_auth() => Err(e),
        Err(e) => {
            warn!(list = what, error = %e, "Optional upstream data unavailable, continuing without it");
            Ok(T::default())
        }
    }
}

/// Production [`CatalogSource`] backed by the upstream HTTP API.
pub struct UpstreamSource {
    client: UpstreamClient,
}

impl UpstreamSource {
    pub fn new(client: UpstreamClient) -> Self {
        Self { client }
    }

    /// Builds the credential manager, throttles and executor from config.
    ///
    /// A configured pre-issued token is seeded into the credential cache.
    pub async fn from_config(config: &SyncConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.upstream.user_agent.clone())
            .timeout(config.timeouts.response())
            .build()
            .context("Failed to build upstream HTTP client")?;

        let credentials = Arc::new(CredentialManager::new(
            http.clone(),
            config.login_url(),
            config.auth.login_credentials(),
            config.auth.refresh_margin(),
        ));
        if let Some(token) = config.auth.initial_token() {
            credentials.seed(token).await;
        }

        let throttles: Arc<ThrottleRegistry> = Arc::new(config.throttle.build_registry());

        let executor = Arc::new(RequestExecutor::new(
            http,
            config.upstream.base_url.clone(),
            credentials,
            throttles,
            config.retry.policy(),
            config.timeouts.deadline(),
        ));

        info!(
            base_url = %config.upstream.base_url,
            team_id = config.upstream.team_id,
            "Upstream source configured"
        );

        Ok(Self::new(UpstreamClient::new(executor, config.upstream.team_id)))
    }

    /// Shared throttle registry (for status reporting)
    pub fn throttles(&self) -> Arc<ThrottleRegistry> {
        Arc::clone(self.client.executor().throttles())
    }
}

#[async_trait]
impl CatalogSource for UpstreamSource {
    fn name(&self) -> &str {
        "upstream"
    }

    async fn collect(&self) -> Result<Catalog, SyncError> {
        let client = &self.client;

        let members = async {
            let roster = roster::fetch_roster(client).await?;
            let members = roster::fetch_member_profiles(client, roster.members).await?;
            Ok::<_, SyncError>((roster.team, members))
        };

        let (machines, challenges, (team, members)) = tokio::try_join!(
            machines::fetch_machines(client),
            challenges::fetch_challenges(client),
            members,
        )?;

        Ok(Catalog {
            machines,
            challenges,
            members,
            team: Some(team),
        })
    }
}
