use super::{fetch_details, optional, UpstreamClient};
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use teamsync::entity::{Canonical, LegacyMember, Member, Source, TeamStats};
use teamsync::SyncError;
use tracing::{info, warn};

/// Team record plus the raw member list that drives profile fetches.
#[derive(Debug)]
pub struct Roster {
    pub team: TeamStats,
    pub members: Vec<LegacyMember>,
}

/// Team info and member list are required; the legacy ownership stats are not.
pub async fn fetch_roster(client: &UpstreamClient) -> Result<Roster, SyncError> {
    let (info, owns, members) = tokio::join!(
        client.team_info(),
        client.team_owns(),
        client.team_members(),
    );
    let info = info?;
    let members = members?;
    let owns = optional("team/stats/owns", owns.map(Some))?;

    let mut team = TeamStats::from_source(Source::Current(info));
    if let Some(owns) = owns {
        team.absorb(Source::Legacy(owns));
    }

    info!(team_id = client.team_id(), members = members.len(), "Fetched roster");
    Ok(Roster { team, members })
}

/// Profile and activity for every roster member.
///
/// Runs after [`fetch_roster`]: it needs the member ids. A member whose
/// profile fails is left out; a failed activity call leaves `activity` empty.
pub async fn fetch_member_profiles(
    client: &UpstreamClient,
    roster: Vec<LegacyMember>,
) -> Result<BTreeMap<u64, Member>, SyncError> {
    let ids: Vec<u64> = roster
        .iter()
        .map(|m| m.id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let (profiles, activities) = tokio::join!(
        fetch_details("member", ids.clone(), |id| client.user_profile(id)),
        join_all(ids.iter().map(|&id| async move { (id, client.user_activity(id).await) })),
    );
    let mut profiles = profiles?;

    let mut activity_by_id = BTreeMap::new();
    for (id, result) in activities {
        match result {
            Ok(activity) => {
                activity_by_id.insert(id, activity);
            }
            Err(e) if e.is_auth() => return Err(e),
            Err(e) => warn!(member = id, error = %e, "Activity unavailable, continuing without it"),
        }
    }

    let mut members: BTreeMap<u64, Member> = BTreeMap::new();
    let mut skipped = 0usize;
    for listed in roster {
        let id = listed.id;
        if let Some(member) = members.get_mut(&id) {
            member.absorb(Source::Legacy(listed));
            continue;
        }
        let Some(profile) = profiles.remove(&id) else {
            skipped += 1;
            continue;
        };

        let mut member = Member::from_source(Source::Current(profile));
        member.absorb(Source::Legacy(listed));
        member.activity = activity_by_id.remove(&id).unwrap_or_default();
        members.insert(id, member);
    }

    info!(members = members.len(), skipped, "Fetched member profiles");
    Ok(members)
}
