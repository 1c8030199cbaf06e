use super::pagination::fetch_all_pages;
use super::{fetch_details, optional, UpstreamClient};
use std::collections::{BTreeMap, BTreeSet};
use teamsync::entity::{absorb_all, Challenge, ChallengeSource, Source};
use teamsync::SyncError;
use tracing::info;

/// Challenge catalog, same pipeline as machines.
pub async fn fetch_challenges(
    client: &UpstreamClient,
) -> Result<BTreeMap<u64, Challenge>, SyncError> {
    let (listed, legacy) = tokio::join!(
        fetch_all_pages("challenges", |page| client.challenges_page(page)),
        client.legacy_challenges(),
    );
    let listed = listed?;
    let legacy = optional("challenge/list", legacy)?;

    let ids: BTreeSet<u64> = listed.iter().map(|c| c.id).collect();
    let details = fetch_details("challenge", ids.into_iter().collect(), |id| client.challenge_info(id)).await?;
    let dropped: BTreeSet<u64> = listed
        .iter()
        .map(|c| c.id)
        .filter(|id| !details.contains_key(id))
        .collect();

    // List items go first so detail records win.
    let mut sources: Vec<ChallengeSource> = Vec::with_capacity(listed.len() * 2 + legacy.len());
    sources.extend(
        listed
            .into_iter()
            .filter(|c| !dropped.contains(&c.id))
            .map(Source::Current),
    );
    sources.extend(details.into_values().map(Source::Current));
    sources.extend(
        legacy
            .into_iter()
            .filter(|c| !dropped.contains(&c.id))
            .map(Source::Legacy),
    );

    let mut challenges = BTreeMap::new();
    absorb_all::<Challenge, _>(&mut challenges, sources);

    info!(challenges = challenges.len(), skipped = dropped.len(), "Fetched challenges");
    Ok(challenges)
}
