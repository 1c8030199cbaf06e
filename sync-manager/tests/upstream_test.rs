// Integration tests for the full upstream fetch graph against a mock platform

use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use sync_manager::upstream::challenges::fetch_challenges;
use sync_manager::upstream::machines::fetch_machines;
use sync_manager::{CatalogSource, SyncOrchestrator, SyncOutcome, UpstreamClient, UpstreamSource};
use teamsync::credentials::{AccessToken, CredentialManager};
use teamsync::entity::TeamStats;
use teamsync::executor::{RequestExecutor, RetryPolicy};
use teamsync::rate_limit::ThrottleRegistry;
use teamsync::snapshot::{Catalog, Snapshot, SnapshotStore};
use teamsync::SyncError;

const TEAM_ID: u64 = 1;

/// Client with a pre-issued token and no login credentials; retries are immediate.
async fn create_client(server: &ServerGuard, max_retries: u32) -> UpstreamClient {
    let http = reqwest::Client::new();
    let credentials = Arc::new(CredentialManager::new(
        http.clone(),
        format!("{}/login", server.url()),
        None,
        Duration::from_secs(120),
    ));
    credentials.seed(AccessToken::pre_issued("token")).await;

    let executor = RequestExecutor::new(
        http,
        server.url(),
        credentials,
        Arc::new(ThrottleRegistry::default()),
        RetryPolicy::from_millis(max_retries, &[0], false),
        Duration::from_secs(30),
    );
    UpstreamClient::new(Arc::new(executor), TEAM_ID)
}

async fn mock_get(server: &mut ServerGuard, path: &str, body: Value) -> Mock {
    server
        .mock("GET", path)
        .match_header("authorization", "Bearer token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
        .create_async()
        .await
}

async fn mock_page(server: &mut ServerGuard, path: &str, page: u32, body: Value) -> Mock {
    server
        .mock("GET", path)
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("page".into(), page.to_string()),
            Matcher::UrlEncoded("per_page".into(), "100".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
        .create_async()
        .await
}

/// Two pages of machines (7, 42, 8); the profile of #42 does not fit the schema.
async fn mock_machines(server: &mut ServerGuard) -> Vec<Mock> {
    vec![
        mock_page(
            server,
            "/machines",
            1,
            json!({
                "data": [{"id": 7, "name": "Foo", "points": 20}, {"id": 42, "name": "Broken"}],
                "meta": {"current_page": 1, "last_page": 2}
            }),
        )
        .await,
        mock_page(
            server,
            "/machines",
            2,
            json!({
                "data": [{"id": 8, "name": "Bar", "points": 30}],
                "meta": {"current_page": 2, "last_page": 2}
            }),
        )
        .await,
        mock_get(
            server,
            "/machine/list",
            json!([
                {"id": 7, "name": "Foo", "ip": "10.0.0.1"},
                {"id": 42, "ip": "10.0.0.42"},
                {"name": "no id"}
            ]),
        )
        .await,
        mock_get(server, "/machine/profile/7", json!({"info": {"id": 7, "stars": 4.5}})).await,
        mock_get(server, "/machine/profile/8", json!({"info": {"id": 8, "os": "Linux"}})).await,
        mock_get(server, "/machine/profile/42", json!({"info": "garbage"})).await,
    ]
}

async fn mock_challenges(server: &mut ServerGuard) -> Vec<Mock> {
    vec![
        mock_page(server, "/challenges", 1, json!({"data": [{"id": 3, "name": "Crypto1"}]})).await,
        mock_get(
            server,
            "/challenge/list",
            json!({"challenges": [{"id": 3, "name": "Crypto1", "difficulty": "Easy"}]}),
        )
        .await,
        mock_get(
            server,
            "/challenge/info/3",
            json!({"challenge": {"id": 3, "category_name": "Crypto"}}),
        )
        .await,
    ]
}

async fn mock_team_info(server: &mut ServerGuard) -> Vec<Mock> {
    vec![
        mock_get(
            server,
            "/team/info/1",
            json!({"id": 1, "name": "Team", "points": 100, "ranking": 5}),
        )
        .await,
        mock_get(
            server,
            "/team/stats/owns/1",
            json!({"rank": 6, "user_owns": 10, "system_owns": 9}),
        )
        .await,
    ]
}

async fn mock_members(server: &mut ServerGuard) -> Mock {
    mock_get(
        server,
        "/team/members/1",
        json!([{"id": 11, "name": "alice", "role": "captain"}]),
    )
    .await
}

async fn mock_member_activity(server: &mut ServerGuard) -> Mock {
    mock_get(
        server,
        "/user/profile/activity/11",
        json!({"profile": {"activity": [
            {"date": "2024-01-01", "object_type": "machine", "type": "root", "id": 7, "name": "Foo"}
        ]}}),
    )
    .await
}

async fn mock_member_profile(server: &mut ServerGuard) -> Mock {
    mock_get(
        server,
        "/user/profile/basic/11",
        json!({"profile": {"id": 11, "name": "alice", "points": 50, "system_owns": 3}}),
    )
    .await
}

fn preexisting_snapshot() -> Snapshot {
    Snapshot::live(Catalog {
        team: Some(TeamStats {
            id: TEAM_ID,
            name: Some("Before".into()),
            ..Default::default()
        }),
        ..Catalog::default()
    })
}

// ── Full graph ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_full_sync_merges_every_family_and_skips_malformed_detail() {
    let mut server = Server::new_async().await;
    let _machines = mock_machines(&mut server).await;
    let _challenges = mock_challenges(&mut server).await;
    let _team = mock_team_info(&mut server).await;
    let _members = mock_members(&mut server).await;
    let _profile = mock_member_profile(&mut server).await;
    let _activity = mock_member_activity(&mut server).await;

    let source = Arc::new(UpstreamSource::new(create_client(&server, 1).await));
    let orchestrator = SyncOrchestrator::new(source, Arc::new(SnapshotStore::default()), None);

    let outcome = orchestrator.trigger_sync().await;
    assert!(outcome.is_completed(), "outcome: {:?}", outcome);

    let snapshot = orchestrator.current_snapshot();
    let catalog = &snapshot.catalog;

    // #42 dropped, including its legacy record
    assert_eq!(catalog.machines.keys().copied().collect::<Vec<_>>(), vec![7, 8]);
    assert_eq!(
        serde_json::to_value(&catalog.machines[&7]).unwrap(),
        json!({"id": 7, "name": "Foo", "ip": "10.0.0.1", "points": 20, "stars": 4.5})
    );
    assert_eq!(catalog.machines[&8].points, Some(30));
    assert_eq!(catalog.machines[&8].os.as_deref(), Some("Linux"));

    let challenge = &catalog.challenges[&3];
    assert_eq!(challenge.category.as_deref(), Some("Crypto"));
    assert_eq!(challenge.difficulty.as_deref(), Some("Easy"));

    let team = catalog.team.as_ref().unwrap();
    assert_eq!(team.name.as_deref(), Some("Team"));
    assert_eq!(team.rank, Some(5), "current ranking wins over legacy rank");
    assert_eq!(team.user_owns, Some(10));
    assert_eq!(team.system_owns, Some(9));

    let member = &catalog.members[&11];
    assert_eq!(member.role.as_deref(), Some("captain"));
    assert_eq!(member.root_owns, Some(3));
    assert_eq!(member.points, Some(50));
    assert_eq!(member.activity.len(), 1);
    assert_eq!(member.activity[0].kind.as_deref(), Some("root"));
}

#[tokio::test]
async fn test_required_roster_failure_keeps_previous_snapshot() {
    let mut server = Server::new_async().await;
    let _machines = mock_machines(&mut server).await;
    let _challenges = mock_challenges(&mut server).await;
    let _team = mock_team_info(&mut server).await;
    let members = server
        .mock("GET", "/team/members/1")
        .with_status(500)
        .expect(4)
        .create_async()
        .await;

    let store = Arc::new(SnapshotStore::default());
    store.publish(preexisting_snapshot());
    let before = store.current();

    let source = Arc::new(UpstreamSource::new(create_client(&server, 3).await));
    let orchestrator = SyncOrchestrator::new(source, Arc::clone(&store), None);

    match orchestrator.trigger_sync().await {
        SyncOutcome::Failed(SyncError::Fatal(cause)) => {
            assert!(cause.contains("gave up after 3 retries"), "cause: {}", cause)
        }
        other => panic!("expected failed, got {:?}", other),
    }
    members.assert_async().await;

    assert!(Arc::ptr_eq(&before, &orchestrator.current_snapshot()));
    assert_eq!(
        orchestrator.current_snapshot().catalog.team.as_ref().unwrap().name.as_deref(),
        Some("Before")
    );
}

#[tokio::test]
async fn test_auth_failure_on_detail_aborts_collection() {
    let mut server = Server::new_async().await;
    let _machines = mock_machines(&mut server).await;
    let _challenges = mock_challenges(&mut server).await;
    let _team = mock_team_info(&mut server).await;
    let _members = mock_members(&mut server).await;
    let _activity = mock_member_activity(&mut server).await;
    let _profile = server
        .mock("GET", "/user/profile/basic/11")
        .with_status(401)
        .create_async()
        .await;

    let source = UpstreamSource::new(create_client(&server, 1).await);
    let err = source.collect().await.unwrap_err();
    assert!(err.is_auth(), "got {:?}", err);
}

#[tokio::test]
async fn test_missing_activity_leaves_member_activity_empty() {
    let mut server = Server::new_async().await;
    let _machines = mock_machines(&mut server).await;
    let _challenges = mock_challenges(&mut server).await;
    let _team = mock_team_info(&mut server).await;
    let _members = mock_members(&mut server).await;
    let _profile = mock_member_profile(&mut server).await;
    let _activity = server
        .mock("GET", "/user/profile/activity/11")
        .with_status(404)
        .create_async()
        .await;

    let source = UpstreamSource::new(create_client(&server, 0).await);
    let catalog = source.collect().await.unwrap();

    let member = &catalog.members[&11];
    assert_eq!(member.name.as_deref(), Some("alice"));
    assert!(member.activity.is_empty());
}

// ── Single family ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_optional_legacy_list_failure_still_builds_family() {
    let mut server = Server::new_async().await;
    let _list = mock_page(&mut server, "/challenges", 1, json!({"data": [{"id": 3, "name": "Crypto1"}]})).await;
    let _info = mock_get(
        &mut server,
        "/challenge/info/3",
        json!({"challenge": {"id": 3, "category_name": "Crypto"}}),
    )
    .await;
    let legacy = server
        .mock("GET", "/challenge/list")
        .with_status(404)
        .expect(1)
        .create_async()
        .await;

    let client = create_client(&server, 2).await;
    let challenges = fetch_challenges(&client).await.unwrap();
    legacy.assert_async().await;

    assert_eq!(challenges.len(), 1);
    assert_eq!(challenges[&3].name.as_deref(), Some("Crypto1"));
    assert_eq!(challenges[&3].difficulty, None);
}

#[tokio::test]
async fn test_machine_listed_on_two_pages_keeps_legacy_fields() {
    let mut server = Server::new_async().await;
    let _first = mock_page(
        &mut server,
        "/machines",
        1,
        json!({
            "data": [{"id": 7, "name": "Foo", "points": 20}],
            "meta": {"current_page": 1, "last_page": 2}
        }),
    )
    .await;
    let _second = mock_page(
        &mut server,
        "/machines",
        2,
        json!({
            "data": [{"id": 7, "name": "Foo", "points": 20}, {"id": 8, "name": "Bar"}],
            "meta": {"current_page": 2, "last_page": 2}
        }),
    )
    .await;
    let _legacy = mock_get(
        &mut server,
        "/machine/list",
        json!([{"id": 7, "ip": "10.0.0.1"}, {"id": 8, "ip": "10.0.0.8"}]),
    )
    .await;
    let profile = server
        .mock("GET", "/machine/profile/7")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"info": {"id": 7, "stars": 4.5}}).to_string())
        .expect(1)
        .create_async()
        .await;
    let _profile_8 = mock_get(&mut server, "/machine/profile/8", json!({"info": {"id": 8}})).await;

    let client = create_client(&server, 0).await;
    let machines = fetch_machines(&client).await.unwrap();
    profile.assert_async().await;

    assert_eq!(machines.len(), 2);
    assert_eq!(machines[&7].ip.as_deref(), Some("10.0.0.1"));
    assert_eq!(machines[&7].stars, Some(4.5));
    assert_eq!(machines[&7].points, Some(20));
    assert_eq!(machines[&8].ip.as_deref(), Some("10.0.0.8"));
}
