//! Integration tests for the matchbot
//!
//! These drive the dispatcher with lobby commands and check what goes back
//! over the wire:
//! - Join, accept and deny across queues
//! - Ready checks that pass, time out or are declined
//! - Hand-off to the game launcher
//! - Leave and disconnect bookkeeping

mod fixtures;

use fixtures::{
    definition, join_request, queue_left, queue_opened, ready_response, wait_until, MockLauncher,
    TestSystem,
};
use matchbot::protocol::Message;
use matchbot::types::PlayerStatus;
use serde_json::json;
use std::time::Duration;

const SETTLE: Duration = Duration::from_secs(3);

#[tokio::test]
async fn test_duel_passes_and_hands_off_once() {
    let system = TestSystem::start(10).await;
    let lobby = &system.lobby;

    system.dispatcher.handle(join_request("1v1", &["A", "B"])).await;

    assert_eq!(
        lobby.payloads("JOINQUEUEACCEPT"),
        vec![json!({ "name": "1v1", "userNames": ["A", "B"] })]
    );
    assert!(wait_until(SETTLE, || lobby.count("READYCHECK") == 1).await);
    assert_eq!(
        lobby.payloads("READYCHECK"),
        vec![json!({ "name": "1v1", "userNames": ["A", "B"], "responseTime": 10 })]
    );

    system.dispatcher.handle(ready_response("1v1", "A", "ready")).await;
    system.dispatcher.handle(ready_response("1v1", "B", "ready")).await;

    assert!(wait_until(SETTLE, || lobby.count("CONNECTUSER") == 2).await);
    assert_eq!(
        lobby.payloads("READYCHECKRESULT"),
        vec![json!({ "name": "1v1", "userNames": ["A", "B"], "result": "pass" })]
    );

    let launched = system.launcher.launched();
    assert_eq!(launched.len(), 1);
    assert_eq!(launched[0].queue_name, "1v1");
    assert_eq!(launched[0].map, "DeltaSiegeDry");
    assert_eq!(launched[0].player_names(), vec!["A", "B"]);

    let connects = lobby.payloads("CONNECTUSER");
    assert_eq!(
        connects[0],
        json!({
            "userName": "A",
            "ip": "10.0.0.1",
            "port": "8452",
            "password": "secret-A",
            "engine": "103.0"
        })
    );

    // players leave the queue and may queue again
    let registry = system.dispatcher.registry();
    assert!(wait_until(SETTLE, || registry.queue_of("A").is_none()).await);
    assert_eq!(registry.get("1v1").unwrap().player_count(), 0);

    // a late duplicate changes nothing
    system.dispatcher.handle(ready_response("1v1", "A", "ready")).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(system.launcher.launched().len(), 1);
    assert_eq!(lobby.count("READYCHECKRESULT"), 1);
}

#[tokio::test]
async fn test_ready_check_timeout_returns_players_to_waiting() {
    let system = TestSystem::start(1).await;
    let lobby = &system.lobby;
    let coordinator = system.dispatcher.coordinator();

    system.dispatcher.handle(join_request("1v1", &["A", "B"])).await;
    assert!(wait_until(SETTLE, || coordinator.active_sessions() == 1).await);

    system.dispatcher.handle(ready_response("1v1", "A", "ready")).await;

    assert!(wait_until(SETTLE, || lobby.count("READYCHECKRESULT") == 1).await);
    assert_eq!(
        lobby.payloads("READYCHECKRESULT"),
        vec![json!({
            "name": "1v1",
            "userNames": ["A", "B"],
            "result": "timeout waiting for players to ready up"
        })]
    );

    let queue = system.dispatcher.registry().get("1v1").unwrap();
    assert!(
        wait_until(SETTLE, || {
            queue.player("A").map(|p| p.status) == Some(PlayerStatus::Waiting)
                && queue.player("B").map(|p| p.status) == Some(PlayerStatus::Waiting)
        })
        .await
    );
    assert_eq!(coordinator.active_sessions(), 0);
    assert!(system.launcher.launched().is_empty());

    // still indexed, so still unable to join elsewhere
    assert_eq!(
        system.dispatcher.registry().queue_of("B").as_deref(),
        Some("1v1")
    );
}

#[tokio::test]
async fn test_decline_fails_ready_check() {
    let system = TestSystem::start(10).await;
    let lobby = &system.lobby;
    let coordinator = system.dispatcher.coordinator();

    system.dispatcher.handle(join_request("1v1", &["A", "B"])).await;
    assert!(wait_until(SETTLE, || coordinator.active_sessions() == 1).await);

    system.dispatcher.handle(ready_response("1v1", "B", "decline")).await;

    assert!(wait_until(SETTLE, || lobby.count("READYCHECKRESULT") == 1).await);
    let result = &lobby.payloads("READYCHECKRESULT")[0];
    assert_eq!(result["result"], "B responded with status decline");

    let queue = system.dispatcher.registry().get("1v1").unwrap();
    assert!(
        wait_until(SETTLE, || queue.waiting_players() == vec!["A", "B"]).await
    );
    assert!(system.launcher.launched().is_empty());
}

#[tokio::test]
async fn test_launch_failure_releases_players() {
    let system = TestSystem::start_with(MockLauncher::failing(), 10).await;
    let lobby = &system.lobby;
    let coordinator = system.dispatcher.coordinator();

    system.dispatcher.handle(join_request("1v1", &["A", "B"])).await;
    assert!(wait_until(SETTLE, || coordinator.active_sessions() == 1).await);

    system.dispatcher.handle(ready_response("1v1", "A", "ready")).await;
    system.dispatcher.handle(ready_response("1v1", "B", "ready")).await;

    assert!(wait_until(SETTLE, || lobby.count("READYCHECKRESULT") == 2).await);
    let results: Vec<_> = lobby
        .payloads("READYCHECKRESULT")
        .into_iter()
        .map(|p| p["result"].clone())
        .collect();
    assert_eq!(results, vec![json!("pass"), json!("fail")]);
    assert_eq!(lobby.count("CONNECTUSER"), 0);

    let queue = system.dispatcher.registry().get("1v1").unwrap();
    assert!(
        wait_until(SETTLE, || queue.waiting_players() == vec!["A", "B"]).await
    );
}

#[tokio::test]
async fn test_player_in_one_queue_is_denied_another() {
    let system = TestSystem::start(10).await;
    let lobby = &system.lobby;

    system.dispatcher.handle(join_request("2v2", &["A"])).await;
    system.dispatcher.handle(join_request("1v1", &["A", "C"])).await;

    assert_eq!(
        lobby.payloads("JOINQUEUEDENY"),
        vec![json!({
            "name": "1v1",
            "userNames": ["A"],
            "reason": "already waiting in 2v2. Leave that queue before joining another!"
        })]
    );
    assert_eq!(
        lobby.payloads("JOINQUEUEACCEPT"),
        vec![
            json!({ "name": "2v2", "userNames": ["A"] }),
            json!({ "name": "1v1", "userNames": ["C"] }),
        ]
    );

    let registry = system.dispatcher.registry();
    assert_eq!(registry.queue_of("A").as_deref(), Some("2v2"));
    assert!(registry.get("1v1").unwrap().player("A").is_none());
}

#[tokio::test]
async fn test_denials_are_sent_before_accept() {
    let system = TestSystem::start(10).await;
    let lobby = &system.lobby;

    system.dispatcher.handle(join_request("2v2", &["A", "B"])).await;
    lobby.clear();

    system.dispatcher.handle(join_request("2v2", &["A", "C", "B"])).await;
    assert_eq!(lobby.commands(), vec!["JOINQUEUEDENY", "JOINQUEUEACCEPT"]);
    assert_eq!(
        lobby.payloads("JOINQUEUEDENY")[0]["userNames"],
        json!(["A", "B"])
    );
}

#[tokio::test]
async fn test_join_unknown_queue_is_denied() {
    let system = TestSystem::start(10).await;

    system.dispatcher.handle(join_request("ffa", &["A", "B"])).await;

    let denies = system.lobby.payloads("JOINQUEUEDENY");
    assert_eq!(denies.len(), 1);
    assert_eq!(denies[0]["userNames"], json!(["A", "B"]));
    assert_eq!(
        denies[0]["reason"],
        "matchbot does not know about queue ffa: something went wrong, contact the admin!"
    );
    assert_eq!(system.lobby.count("JOINQUEUEACCEPT"), 0);
}

#[tokio::test]
async fn test_leave_uses_the_queue_the_player_is_in() {
    let system = TestSystem::start(10).await;
    let registry = system.dispatcher.registry();

    system.dispatcher.handle(join_request("2v2", &["A"])).await;
    system.dispatcher.handle(queue_left("1v1", &["A"])).await;

    assert_eq!(registry.queue_of("A"), None);
    assert_eq!(registry.get("2v2").unwrap().player_count(), 0);

    system.dispatcher.handle(join_request("1v1", &["A"])).await;
    assert_eq!(registry.queue_of("A").as_deref(), Some("1v1"));
}

#[tokio::test]
async fn test_remove_user_leaves_queue() {
    let system = TestSystem::start(10).await;
    let registry = system.dispatcher.registry();

    system.dispatcher.handle(join_request("2v2", &["A", "B"])).await;
    system.dispatcher.handle(Message::new("REMOVEUSER", "A")).await;

    assert_eq!(registry.queue_of("A"), None);
    assert_eq!(registry.get("2v2").unwrap().waiting_players(), vec!["B"]);

    // unknown users are harmless
    system.dispatcher.handle(Message::new("REMOVEUSER", "Ghost")).await;
    assert_eq!(registry.get("2v2").unwrap().player_count(), 1);
}

#[tokio::test]
async fn test_reset_forgets_queues_and_players() {
    let system = TestSystem::start(10).await;
    let registry = system.dispatcher.registry();

    system.dispatcher.handle(join_request("2v2", &["A"])).await;
    system.dispatcher.reset();

    assert_eq!(registry.queue_count(), 0);
    assert_eq!(registry.indexed_players(), 0);

    system.dispatcher.handle(join_request("2v2", &["A"])).await;
    assert_eq!(system.lobby.count("JOINQUEUEDENY"), 1);
}

#[tokio::test]
async fn test_login_info_end_reannounces_definitions() {
    let system = TestSystem::start(10).await;

    system.dispatcher.handle(Message::new("LOGININFOEND", "")).await;
    system.dispatcher.handle(Message::new("LOGININFOEND", "")).await;

    let opened = system.lobby.payloads("OPENQUEUE");
    assert_eq!(opened.len(), 4);
    assert_eq!(opened[0]["name"], "1v1");
    assert_eq!(opened[0]["minPlayers"], 2);
    assert_eq!(opened[1]["name"], "2v2");
}

#[tokio::test]
async fn test_two_matches_get_separate_ready_checks() {
    let system = TestSystem::start(10).await;
    let lobby = &system.lobby;
    let coordinator = system.dispatcher.coordinator();

    system.dispatcher.handle(join_request("1v1", &["A", "B"])).await;
    system.dispatcher.handle(join_request("1v1", &["C", "D"])).await;
    assert!(wait_until(SETTLE, || coordinator.active_sessions() == 2).await);

    // one response reaches both sessions; only the right one counts it
    for name in ["C", "D"] {
        system.dispatcher.handle(ready_response("1v1", name, "ready")).await;
    }

    assert!(wait_until(SETTLE, || system.launcher.launched().len() == 1).await);
    assert_eq!(system.launcher.launched()[0].player_names(), vec!["C", "D"]);
    assert_eq!(coordinator.active_sessions(), 1);
    assert_eq!(
        lobby.payloads("READYCHECKRESULT")[0]["userNames"],
        json!(["C", "D"])
    );
}

#[tokio::test]
async fn test_expired_match_leaves_rematched_player_alone() {
    let system = TestSystem::start(2).await;
    let lobby = &system.lobby;
    let coordinator = system.dispatcher.coordinator();

    system.dispatcher.handle(join_request("1v1", &["A", "B"])).await;
    assert!(wait_until(SETTLE, || coordinator.active_sessions() == 1).await);
    tokio::time::sleep(Duration::from_secs(1)).await;

    // A walks away during the first check, comes back and is matched with C
    system.dispatcher.handle(queue_left("1v1", &["A"])).await;
    system.dispatcher.handle(join_request("1v1", &["A", "C"])).await;
    assert!(wait_until(SETTLE, || coordinator.active_sessions() == 2).await);

    // the first check runs out; only B goes back to Waiting
    assert!(wait_until(SETTLE, || lobby.count("READYCHECKRESULT") == 1).await);
    let queue = system.dispatcher.registry().get("1v1").unwrap();
    assert!(wait_until(SETTLE, || queue.waiting_players() == vec!["B"]).await);
    assert_eq!(queue.player("A").map(|p| p.status), Some(PlayerStatus::Matched));

    system.dispatcher.handle(join_request("1v1", &["D"])).await;
    assert!(wait_until(SETTLE, || lobby.count("READYCHECK") == 3).await);

    let checked: Vec<_> = lobby
        .payloads("READYCHECK")
        .into_iter()
        .map(|p| p["userNames"].clone())
        .collect();
    assert_eq!(
        checked,
        vec![json!(["A", "B"]), json!(["A", "C"]), json!(["B", "D"])]
    );
    assert_eq!(coordinator.active_sessions(), 2);
}

#[tokio::test]
async fn test_reset_abandons_running_ready_checks() {
    let system = TestSystem::start(10).await;
    let lobby = &system.lobby;
    let coordinator = system.dispatcher.coordinator();

    system.dispatcher.handle(join_request("1v1", &["A", "B"])).await;
    assert!(wait_until(SETTLE, || coordinator.active_sessions() == 1).await);

    system.dispatcher.reset();
    assert!(wait_until(SETTLE, || coordinator.active_sessions() == 0).await);

    // the next lobby session opens the queue again and the old match's
    // players answer the old check
    system
        .dispatcher
        .handle(queue_opened(&definition("1v1", 2, 2)))
        .await;
    system.dispatcher.handle(ready_response("1v1", "A", "ready")).await;
    system.dispatcher.handle(ready_response("1v1", "B", "ready")).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(lobby.count("READYCHECKRESULT"), 0);
    assert!(system.launcher.launched().is_empty());

    // a fresh match in the reopened queue works normally
    system.dispatcher.handle(join_request("1v1", &["A", "B"])).await;
    assert!(wait_until(SETTLE, || coordinator.active_sessions() == 1).await);
    system.dispatcher.handle(ready_response("1v1", "A", "ready")).await;
    system.dispatcher.handle(ready_response("1v1", "B", "ready")).await;
    assert!(wait_until(SETTLE, || system.launcher.launched().len() == 1).await);
}
