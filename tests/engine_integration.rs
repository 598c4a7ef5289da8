//! Integration tests for the step engine against in-memory collaborators

mod common;

use pretty_assertions::assert_eq;
use std::fs;

use common::{
    Answer, DELEGATE, DeviceCall, FakeGraph, Harness, LOG_CHECK, REPAIR, RESOLVE, ScriptedReasoner,
    VISION, log_verdict, resolved, settings_graph,
};
use step_pilot::engine::{EngineState, Navigation, RunStatus, TestCase, TestStep};
use step_pilot::position::Position;
use step_pilot::session::Session;
use step_pilot::verify::Verdict;

const START_SETUP: &str = "10-18 09:59:58.000 I/MainActivity( 812): StartFragment : SetupFragment";

fn keypad_graph() -> FakeGraph {
    FakeGraph::new()
        .screen("Settings")
        .element("Settings", "IPField", 500, 300)
        .trigger("IPField", "OpenKeypad", Some("Keypad"))
        .element("Keypad", "Key 1", 10, 20)
        .element("Keypad", "Key 2", 30, 20)
        .description("Keypad", "Numeric keypad for address entry")
        .path("Settings", "IPField", &[("IPField", 500, 300)])
}

#[tokio::test]
async fn test_one_hop_tap_updates_position() {
    let h = Harness::new(
        settings_graph(),
        ScriptedReasoner::new()
            .on(RESOLVE, &resolved("Wifi", "tap", "Wi-Fi popup opens"))
            .on(LOG_CHECK, &log_verdict("success", "Wifi popup fragment started")),
    );
    let mut engine = h.engine(h.options());
    assert!(engine.generate_step0("Settings", "Settings").await);

    let step = engine
        .run_step("1. (Tap) Open the Wi-Fi popup", "Wi-Fi popup opens")
        .await
        .unwrap();

    assert_eq!(step.outcome, Verdict::Success);
    assert_eq!(h.device.touches(), vec![DeviceCall::Tap(100, 200)]);
    assert_eq!(engine.position(), &Position::screen("WifiPopup"));
    assert_eq!(engine.state(), EngineState::Done(Verdict::Success));
    assert_eq!(h.reasoner.count(VISION), 0);
    assert_eq!(step.evidence_trace[0], "resolved Wifi (tap) from Settings");
    assert!(
        engine
            .result()
            .log_lines
            .iter()
            .any(|l| l == "[INFO] Action successful. Current location: WifiPopup")
    );
    assert!(engine.result().is_success());
}

#[tokio::test]
async fn test_empty_path_fails_without_device_call() {
    let h = Harness::new(
        FakeGraph::new().screen("Settings"),
        ScriptedReasoner::new().on(RESOLVE, &resolved("Ghost", "tap", "Nothing")),
    );
    let mut engine = h.engine(h.options());
    engine.generate_step0("Settings", "Settings").await;

    let step = engine.run_step("1. (Tap) Ghost button", "Nothing").await.unwrap();

    assert_eq!(step.outcome, Verdict::Fail);
    assert!(step.reason.contains("no coordinate-bearing waypoints"));
    assert!(h.device.calls().is_empty());
    assert_eq!(engine.position(), &Position::screen("Settings"));
    assert_eq!(engine.result().status, RunStatus::Failed);
    assert_eq!(h.reasoner.count(LOG_CHECK), 0);
}

#[tokio::test]
async fn test_malformed_resolution_fails_step() {
    let h = Harness::new(
        settings_graph(),
        ScriptedReasoner::new().on(RESOLVE, "I cannot tell which element this is."),
    );
    let mut engine = h.engine(h.options());
    engine.generate_step0("Settings", "Settings").await;

    let step = engine.run_step("1. (Tap) Something", "").await.unwrap();

    assert_eq!(step.outcome, Verdict::Fail);
    assert!(step.reason.starts_with("could not resolve step"));
    assert!(h.device.calls().is_empty());
    assert!(h.graph.path_queries().is_empty());
}

#[tokio::test]
async fn test_log_fail_vision_success_is_success() {
    let h = Harness::new(
        settings_graph(),
        ScriptedReasoner::new()
            .on(RESOLVE, &resolved("Wifi", "tap", "Wi-Fi popup opens"))
            .on(LOG_CHECK, &log_verdict("fail", "no popup log"))
            .on(VISION, "Yes, the Wi-Fi popup is shown."),
    );
    h.logs.push("10-18 10:00:01.000 I/Toast( 812): Toast.Show : scanning");
    let mut engine = h.engine(h.options());
    engine.generate_step0("Settings", "Settings").await;

    let step = engine
        .run_step("1. (Tap) Open the Wi-Fi popup", "Wi-Fi popup opens")
        .await
        .unwrap();

    assert_eq!(step.outcome, Verdict::Success);
    assert_eq!(step.reason, "Yes, the Wi-Fi popup is shown.");
    assert_eq!(h.reasoner.count(VISION), 1);
    assert!(h.screenshots.path().join("verify_000.png").exists());
    assert!(step.evidence_trace.iter().any(|l| l.starts_with("log: fail")));
    assert!(step.evidence_trace.iter().any(|l| l.starts_with("vision: success")));

    let log_prompt = h
        .reasoner
        .prompts
        .lock()
        .unwrap()
        .iter()
        .find(|p| p.contains(LOG_CHECK))
        .cloned()
        .unwrap();
    assert!(log_prompt.contains("Toast.Show : scanning"));
}

#[tokio::test]
async fn test_both_channels_fail_is_fail() {
    let h = Harness::new(
        settings_graph(),
        ScriptedReasoner::new()
            .on(RESOLVE, &resolved("Wifi", "tap", "Wi-Fi popup opens"))
            .on(LOG_CHECK, &log_verdict("fail", "error toast"))
            .on(VISION, "No. The settings list is still shown."),
    );
    let mut engine = h.engine(h.options());
    engine.generate_step0("Settings", "Settings").await;

    let step = engine.run_step("1. (Tap) Wi-Fi", "Wi-Fi popup opens").await.unwrap();

    assert_eq!(step.outcome, Verdict::Fail);
    assert_eq!(step.reason, "error toast; No. The settings list is still shown.");
    assert_eq!(engine.result().status, RunStatus::Failed);
}

fn uncertain_two_step_harness() -> Harness {
    Harness::new(
        settings_graph(),
        ScriptedReasoner::new()
            .on(RESOLVE, &resolved("Wifi", "tap", "Wi-Fi popup opens"))
            .on(RESOLVE, &resolved("Connect", "tap", "Robot connects"))
            .on(LOG_CHECK, &log_verdict("uncertain", "nothing relevant"))
            .on(VISION, "Hard to say from this screenshot."),
    )
}

#[tokio::test]
async fn test_uncertain_stops_run_when_stopping_on_failure() {
    let h = uncertain_two_step_harness();
    let mut engine = h.engine(h.options().stop_on_failure(true));
    engine.generate_step0("Settings", "Settings").await;

    let first = engine.run_step("1. (Tap) Wi-Fi", "Wi-Fi popup opens").await.unwrap();
    assert_eq!(first.outcome, Verdict::Uncertain);
    assert!(first.reason.starts_with("neither evidence channel confirmed success"));

    let second = engine.run_step("2. (Tap) Connect", "Robot connects").await;
    assert!(second.is_none());
    assert_eq!(engine.result().status, RunStatus::Uncertain);
    assert_eq!(h.device.touches(), vec![DeviceCall::Tap(100, 200)]);
    assert!(
        engine
            .result()
            .log_lines
            .iter()
            .any(|l| l == "[INFO] Skipping step due to previous failure: 2. (Tap) Connect")
    );
}

#[tokio::test]
async fn test_uncertain_continues_when_not_stopping() {
    let h = uncertain_two_step_harness();
    let mut engine = h.engine(h.options().stop_on_failure(false));
    engine.generate_step0("Settings", "Settings").await;

    engine.run_step("1. (Tap) Wi-Fi", "Wi-Fi popup opens").await.unwrap();
    let second = engine.run_step("2. (Tap) Connect", "Robot connects").await.unwrap();

    assert_eq!(second.outcome, Verdict::Uncertain);
    assert_eq!(engine.result().status, RunStatus::Uncertain);
    assert_eq!(
        h.device.touches(),
        vec![DeviceCall::Tap(100, 200), DeviceCall::Tap(300, 400)]
    );
    assert_eq!(engine.position(), &Position::element("Connect"));
}

#[tokio::test]
async fn test_verification_timeouts_are_uncertain() {
    let h = Harness::new(
        settings_graph(),
        ScriptedReasoner::new()
            .on(RESOLVE, &resolved("Wifi", "tap", "Wi-Fi popup opens"))
            .on_answer(LOG_CHECK, Answer::Hang)
            .on_answer(VISION, Answer::Hang),
    );
    let mut engine = h.engine(h.options());
    engine.generate_step0("Settings", "Settings").await;

    let step = engine.run_step("1. (Tap) Wi-Fi", "Wi-Fi popup opens").await.unwrap();

    assert_eq!(step.outcome, Verdict::Uncertain);
    assert!(step.reason.contains("timed out"));
}

#[tokio::test]
async fn test_repair_loop_is_bounded() {
    let repaired = "The label was wrong.\n```cypher\nMATCH (start:Screen {name: \"Settings\"})\nMATCH (target:UIElement {name: \"Wifi\"})\nRETURN target.name AS name\n```";
    let h = Harness::new(
        settings_graph().failing_paths(100),
        ScriptedReasoner::new()
            .on(RESOLVE, &resolved("Wifi", "tap", "Wi-Fi popup opens"))
            .on(REPAIR, repaired),
    );
    let mut engine = h.engine(h.options());
    engine.generate_step0("Settings", "Settings").await;

    let step = engine.run_step("1. (Tap) Wi-Fi", "Wi-Fi popup opens").await.unwrap();

    let paths = h.graph.path_queries();
    assert_eq!(paths.len(), 5);
    assert!(paths[0].contains("apoc.coll.indexOf"));
    assert!(paths[1..].iter().all(|q| q.ends_with("RETURN target.name AS name")));
    assert_eq!(h.reasoner.count(REPAIR), 4);

    assert_eq!(step.outcome, Verdict::Fail);
    assert!(step.reason.contains("after 5 attempts"));
    assert!(h.device.calls().is_empty());
    assert_eq!(engine.position(), &Position::screen("Settings"));
    assert_eq!(engine.graph().open_sessions(), 0);
}

#[tokio::test]
async fn test_repaired_query_is_used() {
    let repaired = "```cypher\nMATCH (start:Screen {name: \"Settings\"})\nMATCH (target:UIElement {name: \"Wifi\"})\nRETURN n.name AS name, n.x AS x, n.y AS y\n```";
    let h = Harness::new(
        settings_graph().failing_paths(2),
        ScriptedReasoner::new()
            .on(RESOLVE, &resolved("Wifi", "tap", "Wi-Fi popup opens"))
            .on(REPAIR, repaired)
            .on(LOG_CHECK, &log_verdict("success", "popup started")),
    );
    let mut engine = h.engine(h.options());
    engine.generate_step0("Settings", "Settings").await;

    let step = engine.run_step("1. (Tap) Wi-Fi", "Wi-Fi popup opens").await.unwrap();

    assert_eq!(step.outcome, Verdict::Success);
    assert_eq!(h.reasoner.count(REPAIR), 2);
    assert!(step.evidence_trace.iter().any(|l| l == "planned 1 waypoint(s) in 3 attempt(s)"));
    assert_eq!(h.device.touches(), vec![DeviceCall::Tap(100, 200)]);

    let prompts = h.reasoner.prompts.lock().unwrap();
    let last_repair = prompts.iter().rev().find(|p| p.contains(REPAIR)).unwrap();
    assert_eq!(last_repair.matches("Unknown function 'apoc.coll.indexOf'").count(), 2);
}

#[tokio::test]
async fn test_return_to_test_screen_is_idempotent() {
    let h = Harness::new(
        settings_graph(),
        ScriptedReasoner::new()
            .on(RESOLVE, &resolved("Connect", "tap", "Robot connects"))
            .on(LOG_CHECK, &log_verdict("success", "connected")),
    );
    let mut engine = h.engine(h.options());
    engine.generate_step0("Settings", "Settings").await;
    assert_eq!(engine.return_to_test_screen("Settings").await, Navigation::AlreadyThere);
    assert!(h.device.touches().is_empty());

    engine.generate_step0("WifiPopup", "WifiPopup").await;
    engine.run_step("1. (Tap) Connect", "Robot connects").await.unwrap();
    assert_eq!(engine.position(), &Position::element("Connect"));

    // Connect lies within WifiPopup
    assert_eq!(engine.return_to_test_screen("WifiPopup").await, Navigation::AlreadyThere);
    assert_eq!(h.device.touches(), vec![DeviceCall::Tap(300, 400)]);

    assert_eq!(engine.return_to_test_screen("Settings").await, Navigation::Navigated);
    assert_eq!(engine.position(), &Position::screen("Settings"));
    let after_first = h.device.touches();
    assert_eq!(
        after_first,
        vec![
            DeviceCall::Tap(300, 400),
            DeviceCall::Tap(20, 20),
            DeviceCall::Tap(810, 50),
        ]
    );

    assert_eq!(engine.return_to_test_screen("Settings").await, Navigation::AlreadyThere);
    assert_eq!(h.device.touches(), after_first);
    assert!(engine.result().is_success());
}

#[tokio::test]
async fn test_return_uses_tracked_kind_when_name_is_shared() {
    // Home carries a "Settings" button next to the Settings screen itself
    let graph = FakeGraph::new()
        .screen("Home")
        .screen("Settings")
        .element("Home", "Settings", 10, 10)
        .path("Settings", "Settings", &[("Settings", 10, 10)]);
    let h = Harness::new(graph, ScriptedReasoner::new());
    let mut engine = h.engine(h.options());
    engine.generate_step0("Settings", "Settings").await;
    assert_eq!(engine.position(), &Position::screen("Settings"));

    assert_eq!(engine.return_to_test_screen("Settings").await, Navigation::AlreadyThere);
    assert_eq!(engine.return_to_test_screen("Settings").await, Navigation::AlreadyThere);
    assert!(h.device.touches().is_empty());
    assert!(h.graph.path_queries().is_empty());
    assert!(engine.result().is_success());
}

#[tokio::test]
async fn test_return_from_unknown_node_fails_run() {
    let h = Harness::new(FakeGraph::new(), ScriptedReasoner::new());
    let mut engine = h.engine(h.options());
    engine.reset("goal");

    assert_eq!(engine.return_to_test_screen("Settings").await, Navigation::Failed);
    assert_eq!(engine.result().status, RunStatus::Failed);
    assert!(
        engine.result().log_lines[0]
            .starts_with("[FAIL] Failed to return to test screen Settings: unknown node Home")
    );
}

#[tokio::test]
async fn test_delegated_interaction_completes() {
    let h = Harness::new(
        keypad_graph(),
        ScriptedReasoner::new()
            .on(RESOLVE, &resolved("IPField", "Enter IP", "IP address shows 12"))
            .on(DELEGATE, r#"{"action": "tap", "element": "Key 1"}"#)
            .on(DELEGATE, r#"{"action": "tap", "element": "Key 2"}"#)
            .on(DELEGATE, r#"{"done": true}"#)
            .on(LOG_CHECK, &log_verdict("success", "address updated")),
    );
    let mut engine = h.engine(h.options());
    engine.generate_step0("Settings", "Settings").await;

    let step = engine.run_step("1. (Enter IP) Type 12", "IP address shows 12").await.unwrap();

    assert_eq!(step.outcome, Verdict::Success);
    assert_eq!(
        h.device.touches(),
        vec![DeviceCall::Tap(500, 300), DeviceCall::Tap(10, 20), DeviceCall::Tap(30, 20)]
    );
    assert_eq!(engine.position(), &Position::element("Key 2"));
    assert!(step.evidence_trace.iter().any(|l| l == "delegate: done"));
    assert_eq!(h.reasoner.count(DELEGATE), 3);

    let prompts = h.reasoner.prompts.lock().unwrap();
    let first = prompts.iter().find(|p| p.contains(DELEGATE)).unwrap();
    assert!(first.contains("Current screen: Keypad"));
    assert!(first.contains("Numeric keypad for address entry"));
    assert!(first.contains("- Key 1 (10, 20) -> nothing"));
}

#[tokio::test]
async fn test_delegation_budget_is_flagged_then_verified() {
    let h = Harness::new(
        keypad_graph(),
        ScriptedReasoner::new()
            .on(RESOLVE, &resolved("IPField", "Enter IP", "IP address shows 111"))
            .on(DELEGATE, r#"{"action": "tap", "element": "Key 1"}"#)
            .on(LOG_CHECK, &log_verdict("success", "address updated")),
    );
    let mut options = h.options();
    options.max_delegation_iterations = 3;
    let mut engine = h.engine(options);
    engine.generate_step0("Settings", "Settings").await;

    let step = engine.run_step("1. (Enter IP) Type 111", "IP address shows 111").await.unwrap();

    assert_eq!(step.outcome, Verdict::Success);
    assert_eq!(h.device.touches().len(), 4);
    assert!(
        engine
            .result()
            .log_lines
            .iter()
            .any(|l| l == "[WARN] delegated interaction unfinished after 3 iteration(s)")
    );
}

#[tokio::test]
async fn test_delegation_service_error_aborts_step() {
    let h = Harness::new(
        keypad_graph(),
        ScriptedReasoner::new()
            .on(RESOLVE, &resolved("IPField", "Enter IP", "IP address shows 1"))
            .on_answer(DELEGATE, Answer::Error),
    );
    let mut engine = h.engine(h.options());
    engine.generate_step0("Settings", "Settings").await;

    let step = engine.run_step("1. (Enter IP) Type 1", "IP address shows 1").await.unwrap();

    assert_eq!(step.outcome, Verdict::Fail);
    assert!(step.reason.starts_with("delegation failed"));
    assert_eq!(h.reasoner.count(LOG_CHECK), 0);
    // The keypad tap itself was confirmed before delegation started
    assert_eq!(engine.position(), &Position::screen("Keypad"));
}

#[tokio::test]
async fn test_run_case_writes_report() {
    let h = Harness::new(
        settings_graph(),
        ScriptedReasoner::new()
            .on(RESOLVE, &resolved("Wifi", "tap", "Wi-Fi popup opens"))
            .on(LOG_CHECK, &log_verdict("success", "popup started")),
    );
    h.logs.push(START_SETUP);
    let tmp = tempfile::tempdir().unwrap();
    let session = Session::in_dir(tmp.path().join("run"));
    session.init().unwrap();
    let report_path = session.report_path();

    let mut engine = h.engine(h.options()).with_session(session);
    let case = TestCase {
        test_screen: "Settings".to_string(),
        goal: "Open the Wi-Fi popup from Settings".to_string(),
        steps: vec![
            TestStep::new("Tap", "Open Wi-Fi", "Wi-Fi popup opens"),
            TestStep::new("Observe", "Popup visible", "Wi-Fi popup is visible"),
        ],
    };
    let result = engine.run_case(&case).await;

    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(
        h.device.touches(),
        vec![
            DeviceCall::Tap(50, 900),
            DeviceCall::Tap(100, 200),
            DeviceCall::Tap(700, 100),
            DeviceCall::Tap(810, 50),
        ]
    );
    assert_eq!(h.reasoner.count(RESOLVE), 1);
    assert_eq!(h.logs.marks(), 3);
    assert!(result.log_lines.iter().any(|l| l == "[INFO] Successfully moved to Settings screen."));
    assert!(result.log_lines.iter().any(|l| l == "[PASS] 2. (Observe) Popup visible"));

    let report: serde_json::Value = serde_json::from_str(&fs::read_to_string(report_path).unwrap()).unwrap();
    assert_eq!(report["status"], "success");
    assert_eq!(report["lastStep"]["stepText"], "2. (Observe) Popup visible");
}

#[tokio::test]
async fn test_failed_final_return_keeps_passing_run() {
    // No way back from the popup to Settings
    let graph = FakeGraph::new()
        .screen("Home")
        .screen("Settings")
        .element("Home", "SettingsTab", 50, 900)
        .element("Settings", "Wifi", 100, 200)
        .trigger("SettingsTab", "OpenSettings", Some("Settings"))
        .trigger("Wifi", "OpenWifi", Some("WifiPopup"))
        .path("Home", "Settings", &[("SettingsTab", 50, 900)])
        .path("Settings", "Wifi", &[("Wifi", 100, 200)]);
    let h = Harness::new(
        graph,
        ScriptedReasoner::new()
            .on(RESOLVE, &resolved("Wifi", "tap", "Wi-Fi popup opens"))
            .on(LOG_CHECK, &log_verdict("success", "popup started")),
    );
    h.logs.push(START_SETUP);
    let mut engine = h.engine(h.options());
    let case = TestCase {
        test_screen: "Settings".to_string(),
        goal: "Open the Wi-Fi popup".to_string(),
        steps: vec![TestStep::new("Tap", "Open Wi-Fi", "Wi-Fi popup opens")],
    };

    let result = engine.run_case(&case).await;

    assert_eq!(result.status, RunStatus::Success);
    assert!(result.log_lines.iter().any(|l| l.starts_with("[WARN] Could not return to test screen Settings:")));
    assert!(!result.log_lines.iter().any(|l| l.starts_with("[FAIL]")));
    assert_eq!(
        h.device.touches(),
        vec![DeviceCall::Tap(50, 900), DeviceCall::Tap(100, 200), DeviceCall::Tap(810, 50)]
    );
    assert_eq!(engine.position(), &Position::screen("WifiPopup"));
}

#[tokio::test]
async fn test_hold_step_long_presses_last_waypoint() {
    let h = Harness::new(
        settings_graph().path("Settings", "Connect", &[("Wifi", 100, 200), ("Connect", 300, 400)]),
        ScriptedReasoner::new()
            .on(RESOLVE, &resolved("Connect", "hold", "Robot connects"))
            .on(LOG_CHECK, &log_verdict("success", "connected")),
    );
    let mut engine = h.engine(h.options());
    engine.generate_step0("Settings", "Settings").await;

    let step = engine.run_step("1. (Hold) Connect", "Robot connects").await.unwrap();

    assert_eq!(step.outcome, Verdict::Success);
    assert_eq!(
        h.device.touches(),
        vec![DeviceCall::Tap(100, 200), DeviceCall::LongPress(300, 400)]
    );
    assert!(step.evidence_trace.iter().any(|l| l == "hold Connect"));
    assert_eq!(engine.position(), &Position::element("Connect"));
}

#[tokio::test]
async fn test_cut_short_path_is_noted() {
    let h = Harness::new(
        settings_graph().path("Settings", "Connect", &[("Wifi", 100, 200), ("Connect", 300, 400)]),
        ScriptedReasoner::new()
            .on(RESOLVE, &resolved("Connect", "tap", "Robot connects"))
            .on(LOG_CHECK, &log_verdict("success", "connected")),
    );
    h.device.fail_at(300, 400);
    let mut engine = h.engine(h.options());
    engine.generate_step0("Settings", "Settings").await;

    let step = engine.run_step("1. (Tap) Connect", "Robot connects").await.unwrap();

    let note = "Path stopped at Wifi before reaching Connect";
    assert_eq!(h.device.touches(), vec![DeviceCall::Tap(100, 200)]);
    assert!(step.evidence_trace.iter().any(|l| l == note));
    assert!(engine.result().log_lines.iter().any(|l| *l == format!("[WARN] {}", note)));
    assert_eq!(engine.position(), &Position::screen("WifiPopup"));
}

#[tokio::test]
async fn test_step0_without_arrival_log_fails_case() {
    let h = Harness::new(
        settings_graph(),
        ScriptedReasoner::new().on(RESOLVE, &resolved("Wifi", "tap", "Wi-Fi popup opens")),
    );
    h.logs.push("10-18 09:59:58.000 I/MainActivity( 812): StartFragment : HomeFragment");
    let mut engine = h.engine(h.options().stop_on_failure(true));
    let case = TestCase {
        test_screen: "Settings".to_string(),
        goal: "Open the Wi-Fi popup".to_string(),
        steps: vec![TestStep::new("Tap", "Open Wi-Fi", "Wi-Fi popup opens")],
    };

    let result = engine.run_case(&case).await;

    assert_eq!(result.status, RunStatus::Failed);
    assert!(result.log_lines.iter().any(|l| l.starts_with(
        "[FAIL] Step 0 failed: expected to reach Settings, last screen log: 10-18 09:59:58.000"
    )));
    assert!(result.log_lines.iter().any(|l| l.starts_with("[INFO] Skipping step")));
    assert_eq!(h.reasoner.count(RESOLVE), 0);
    assert_eq!(h.device.touches(), vec![DeviceCall::Tap(50, 900)]);
}

#[tokio::test]
async fn test_step0_to_home_relaunches() {
    let h = Harness::new(settings_graph(), ScriptedReasoner::new());
    let mut engine = h.engine(h.options());

    assert!(engine.generate_step0("Settings", "Home").await);
    assert_eq!(h.device.calls(), vec![DeviceCall::Relaunch]);
    assert_eq!(engine.position(), &Position::home());
}
