use super::pagination::{Page, PER_PAGE};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use teamsync::entity::{
    Activity, CurrentChallenge, CurrentMachine, CurrentMember, CurrentTeamStats, LegacyChallenge,
    LegacyMachine, LegacyMember, LegacyTeamStats,
};
use teamsync::executor::{ApiRequest, RequestExecutor};
use teamsync::rate_limit::EndpointFamily;
use teamsync::SyncError;
use tracing::warn;

#[derive(Deserialize)]
struct MachineProfile {
    info: CurrentMachine,
}

#[derive(Deserialize)]
struct LegacyChallengeList {
    #[serde(default)]
    challenges: Vec<Value>,
}

#[derive(Deserialize)]
struct ChallengeInfo {
    challenge: CurrentChallenge,
}

#[derive(Deserialize)]
struct UserProfile {
    profile: CurrentMember,
}

#[derive(Deserialize)]
struct UserActivity {
    profile: ActivityProfile,
}

#[derive(Deserialize)]
struct ActivityProfile {
    #[serde(default)]
    activity: Vec<Activity>,
}

/// Decodes list items one by one, dropping the ones that do not fit the schema.
pub(crate) fn decode_items<T: DeserializeOwned>(what: &str, items: Vec<Value>) -> Vec<T> {
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<T>(item) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!(list = what, error = %e, "Skipping malformed list item");
                None
            }
        })
        .collect()
}

/// Typed access to every upstream endpoint the sync consumes.
///
/// Each call runs through the shared [`RequestExecutor`], so throttling,
/// token refresh and retries apply uniformly.
#[derive(Clone)]
pub struct UpstreamClient {
    executor: Arc<RequestExecutor>,
    team_id: u64,
}

impl UpstreamClient {
    pub fn new(executor: Arc<RequestExecutor>, team_id: u64) -> Self {
        Self { executor, team_id }
    }

    pub fn executor(&self) -> &Arc<RequestExecutor> {
        &self.executor
    }

    pub fn team_id(&self) -> u64 {
        self.team_id
    }

    async fn get<T: DeserializeOwned>(
        &self,
        family: EndpointFamily,
        request: ApiRequest,
    ) -> Result<T, SyncError> {
        self.executor.get_json(family, &request).await
    }

    // ── Machines ──────────────────────────────────────────────────────────────

    pub async fn machines_page(&self, page: u32) -> Result<Page<CurrentMachine>, SyncError> {
        let raw: Page<Value> = self
            .get(
                EndpointFamily::Machines,
                ApiRequest::get("/machines")
                    .query("page", page)
                    .query("per_page", PER_PAGE),
            )
            .await?;
        Ok(Page {
            data: decode_items("machines", raw.data),
            meta: raw.meta,
        })
    }

    pub async fn legacy_machines(&self) -> Result<Vec<LegacyMachine>, SyncError> {
        let raw: Vec<Value> = self
            .get(EndpointFamily::Machines, ApiRequest::get("/machine/list"))
            .await?;
        Ok(decode_items("machine/list", raw))
    }

    pub async fn machine_profile(&self, id: u64) -> Result<CurrentMachine, SyncError> {
        let profile: MachineProfile = self
            .get(
                EndpointFamily::Machines,
                ApiRequest::get(format!("/machine/profile/{}", id)),
            )
            .await?;
        Ok(profile.info)
    }

    // ── Challenges ────────────────────────────────────────────────────────────

    pub async fn challenges_page(&self, page: u32) -> Result<Page<CurrentChallenge>, SyncError> {
        let raw: Page<Value> = self
            .get(
                EndpointFamily::Challenges,
                ApiRequest::get("/challenges")
                    .query("page", page)
                    .query("per_page", PER_PAGE),
            )
            .await?;
        Ok(Page {
            data: decode_items("challenges", raw.data),
            meta: raw.meta,
        })
    }

    pub async fn legacy_challenges(&self) -> Result<Vec<LegacyChallenge>, SyncError> {
        let list: LegacyChallengeList = self
            .get(EndpointFamily::Challenges, ApiRequest::get("/challenge/list"))
            .await?;
        Ok(decode_items("challenge/list", list.challenges))
    }

    pub async fn challenge_info(&self, id: u64) -> Result<CurrentChallenge, SyncError> {
        let info: ChallengeInfo = self
            .get(
                EndpointFamily::Challenges,
                ApiRequest::get(format!("/challenge/info/{}", id)),
            )
            .await?;
        Ok(info.challenge)
    }

    // ── Team ──────────────────────────────────────────────────────────────────

    pub async fn team_info(&self) -> Result<CurrentTeamStats, SyncError> {
        self.get(
            EndpointFamily::Team,
            ApiRequest::get(format!("/team/info/{}", self.team_id)),
        )
        .await
    }

    pub async fn team_owns(&self) -> Result<LegacyTeamStats, SyncError> {
        let mut stats: LegacyTeamStats = self
            .get(
                EndpointFamily::Team,
                ApiRequest::get(format!("/team/stats/owns/{}", self.team_id)),
            )
            .await?;
        stats.id = self.team_id;
        Ok(stats)
    }

    pub async fn team_members(&self) -> Result<Vec<LegacyMember>, SyncError> {
        let raw: Vec<Value> = self
            .get(
                EndpointFamily::Team,
                ApiRequest::get(format!("/team/members/{}", self.team_id)),
            )
            .await?;
        Ok(decode_items("team/members", raw))
    }

    // ── Users ─────────────────────────────────────────────────────────────────

    pub async fn user_profile(&self, id: u64) -> Result<CurrentMember, SyncError> {
        let profile: UserProfile = self
            .get(
                EndpointFamily::Users,
                ApiRequest::get(format!("/user/profile/basic/{}", id)),
            )
            .await?;
        Ok(profile.profile)
    }

    pub async fn user_activity(&self, id: u64) -> Result<Vec<Activity>, SyncError> {
        let activity: UserActivity = self
            .get(
                EndpointFamily::Users,
                ApiRequest::get(format!("/user/profile/activity/{}", id)),
            )
            .await?;
        Ok(activity.profile.activity)
    }
}
