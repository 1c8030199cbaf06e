use super::pagination::fetch_all_pages;
use super::{fetch_details, optional, UpstreamClient};
use std::collections::{BTreeMap, BTreeSet};
use teamsync::entity::{absorb_all, Machine, MachineSource, Source};
use teamsync::SyncError;
use tracing::info;

/// Machine catalog: paginated current list + per-machine profile + legacy list.
///
/// The current list is required. The legacy list only contributes fields the
/// current shape lacks (e.g. `ip` on retired machines) and may be missing.
/// A machine whose profile cannot be fetched is left out of the catalog.
pub async fn fetch_machines(client: &UpstreamClient) -> Result<BTreeMap<u64, Machine>, SyncError> {
    let (listed, legacy) = tokio::join!(
        fetch_all_pages("machines", |page| client.machines_page(page)),
        client.legacy_machines(),
    );
    let listed = listed?;
    let legacy = optional("machine/list", legacy)?;

    let ids: BTreeSet<u64> = listed.iter().map(|m| m.id).collect();
    let profiles = fetch_details("machine", ids.into_iter().collect(), |id| client.machine_profile(id)).await?;
    let dropped: BTreeSet<u64> = listed
        .iter()
        .map(|m| m.id)
        .filter(|id| !profiles.contains_key(id))
        .collect();

    // List items go first so detail records win.
    let mut sources: Vec<MachineSource> = Vec::with_capacity(listed.len() * 2 + legacy.len());
    sources.extend(
        listed
            .into_iter()
            .filter(|m| !dropped.contains(&m.id))
            .map(Source::Current),
    );
    sources.extend(profiles.into_values().map(Source::Current));
    sources.extend(
        legacy
            .into_iter()
            .filter(|m| !dropped.contains(&m.id))
            .map(Source::Legacy),
    );

    let mut machines = BTreeMap::new();
    absorb_all::<Machine, _>(&mut machines, sources);

    info!(machines = machines.len(), skipped = dropped.len(), "Fetched machines");
    Ok(machines)
}
