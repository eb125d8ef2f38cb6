//! Administrative service tests: enumeration, removal, group switching,
//! and the enroll/authenticate entry points.

mod common;

use common::{RecordingListener, wait_until};
use std::sync::Arc;
use whorl_coordinator::{CoordinatorConfig, FingerprintService, OperationState, ResultKind};
use whorl_core::{AuthToken, Error, FingerId, GroupId};
use whorl_hardware::mock::{MatcherCall, MockMatcher, MockMatcherHandle, MockSensor, MockSensorHandle};
use whorl_hardware::{CaptureOutcome, IdentifyDecision, NullGestureSink};

struct Fixture {
    service: FingerprintService<MockSensor, MockMatcher>,
    sensor: MockSensorHandle,
    matcher: MockMatcherHandle,
    listener: Arc<RecordingListener>,
}

fn fixture() -> Fixture {
    let (sensor, sensor_handle) = MockSensor::new();
    let (matcher, matcher_handle) = MockMatcher::new();
    let service = FingerprintService::start(
        sensor,
        matcher,
        Arc::new(NullGestureSink),
        CoordinatorConfig::default(),
    );
    let listener = Arc::new(RecordingListener::default());
    service.set_listener(listener.clone());
    Fixture {
        service,
        sensor: sensor_handle,
        matcher: matcher_handle,
        listener,
    }
}

fn prints(ids: &[u32]) -> Vec<FingerId> {
    ids.iter().copied().map(FingerId::new).collect()
}

#[tokio::test]
async fn enumerate_empty_set_reports_single_marker() {
    let fx = fixture();

    fx.service.enumerate().await.unwrap();

    assert_eq!(fx.listener.enumerated(), vec![(FingerId::NONE, 0)]);
    assert_eq!(
        fx.service.coordinator().current_state(),
        OperationState::Idle
    );

    fx.service.shutdown().await;
}

#[tokio::test]
async fn enumerate_reports_each_print_with_remaining_count() {
    let fx = fixture();
    fx.matcher.set_prints(prints(&[2, 5, 9]));

    fx.service.enumerate().await.unwrap();

    assert_eq!(
        fx.listener.enumerated(),
        vec![
            (FingerId::new(2), 2),
            (FingerId::new(5), 1),
            (FingerId::new(9), 0),
        ]
    );

    fx.service.shutdown().await;
}

#[tokio::test]
async fn remove_all_deletes_from_the_end() {
    let fx = fixture();
    fx.matcher.set_prints(prints(&[1, 2, 3]));

    fx.service.remove(FingerId::NONE).await.unwrap();

    assert_eq!(
        fx.listener.removed(),
        vec![
            (FingerId::new(3), 2),
            (FingerId::new(2), 1),
            (FingerId::new(1), 0),
        ]
    );
    assert!(fx.matcher.prints().is_empty());

    fx.service.shutdown().await;
}

#[tokio::test]
async fn remove_single_print() {
    let fx = fixture();
    fx.matcher.set_prints(prints(&[4, 7]));

    fx.service.remove(FingerId::new(4)).await.unwrap();

    assert_eq!(fx.listener.removed(), vec![(FingerId::new(4), 0)]);
    assert_eq!(fx.matcher.prints(), prints(&[7]));

    fx.service.shutdown().await;
}

#[tokio::test]
async fn remove_unknown_print_reports_and_returns_error() {
    let fx = fixture();

    let result = fx.service.remove(FingerId::new(9)).await;
    assert!(result.is_err());
    // The failure also reaches the listener so framework bookkeeping
    // cannot drift.
    let listener = fx.listener.clone();
    wait_until("removal error report", || !listener.errors().is_empty()).await;
    // The coordinator is usable again.
    assert_eq!(
        fx.service.coordinator().current_state(),
        OperationState::Idle
    );

    fx.service.shutdown().await;
}

#[tokio::test]
async fn pre_enroll_issues_challenge() {
    let fx = fixture();
    fx.matcher.set_challenge(0x1234_5678);

    let challenge = fx.service.pre_enroll().await.unwrap();
    assert_eq!(challenge, 0x1234_5678);

    fx.service.post_enroll().unwrap();
    fx.service.shutdown().await;
}

#[tokio::test]
async fn enroll_with_rejected_token_fails_and_resumes() {
    let fx = fixture();
    fx.matcher.reject_enroll_token();

    let result = fx.service.enroll(AuthToken::for_challenge(1), 0).await;
    assert!(result.is_err());
    assert!(fx.matcher.calls().contains(&MatcherCall::VerifyEnrollToken));

    // The failed attempt must not leave the coordinator paused.
    assert_eq!(
        fx.service.coordinator().current_state(),
        OperationState::Idle
    );

    fx.service.shutdown().await;
}

#[tokio::test]
async fn enroll_refuses_full_template_set() {
    let fx = fixture();
    fx.matcher.set_prints(prints(&[1, 2, 3, 4, 5]));

    let result = fx.service.enroll(AuthToken::for_challenge(1), 0).await;
    assert!(matches!(result, Err(Error::Rejected { .. })));
    assert_eq!(
        fx.service.coordinator().current_state(),
        OperationState::Idle
    );

    fx.service.shutdown().await;
}

#[tokio::test]
async fn enroll_end_to_end_picks_next_free_id() {
    let fx = fixture();
    fx.matcher.set_prints(prints(&[2]));

    for percentage in [50, 100] {
        fx.matcher.push_image(CaptureOutcome::Good);
        fx.matcher.push_enroll_progress(percentage);
    }
    fx.sensor.touch().await.unwrap();
    fx.sensor.touch().await.unwrap();

    let mut token = AuthToken::for_challenge(0xAA);
    token.user_id = 31;
    fx.service.enroll(token, 60).await.unwrap();

    let listener = fx.listener.clone();
    wait_until("enroll result", || !listener.results().is_empty()).await;

    match &fx.listener.results()[..] {
        [ResultKind::Enrolled { finger, remaining }] => {
            assert_eq!(*finger, FingerId::new(3));
            assert_eq!(*remaining, 0);
        }
        other => panic!("expected enroll result, got {other:?}"),
    }
    assert_eq!(fx.listener.enroll_remaining(), vec![50]);
    assert_eq!(fx.matcher.prints(), prints(&[2, 3]));

    fx.service.shutdown().await;
}

#[tokio::test]
async fn authenticate_requires_enrolled_prints() {
    let fx = fixture();

    let result = fx.service.authenticate(7).await;
    assert!(matches!(result, Err(Error::Rejected { .. })));
    assert_eq!(
        fx.service.coordinator().current_state(),
        OperationState::Idle
    );

    fx.service.shutdown().await;
}

#[tokio::test]
async fn authenticate_end_to_end_sets_challenge() {
    let fx = fixture();
    fx.matcher.set_prints(prints(&[6]));
    fx.matcher.push_image(CaptureOutcome::Good);
    fx.matcher.push_identify(IdentifyDecision::Match {
        finger: FingerId::new(6),
        score: 9999,
        token: AuthToken::for_challenge(0x77),
    });
    fx.sensor.touch().await.unwrap();

    fx.service.authenticate(0x77).await.unwrap();

    let listener = fx.listener.clone();
    wait_until("authentication result", || !listener.results().is_empty()).await;

    assert!(fx.matcher.calls().contains(&MatcherCall::SetAuthChallenge(0x77)));
    match &fx.listener.results()[..] {
        [ResultKind::Authenticated { finger, .. }] => assert_eq!(*finger, FingerId::new(6)),
        other => panic!("expected authentication result, got {other:?}"),
    }

    fx.service.shutdown().await;
}

#[tokio::test]
async fn set_active_group_loads_database_and_selects_group() {
    let fx = fixture();

    fx.service
        .set_active_group(GroupId::new(12), "/data/whorl")
        .await
        .unwrap();

    let calls = fx.matcher.calls();
    assert!(calls.contains(&MatcherCall::LoadDatabase("/data/whorl/whorl.db".into())));
    assert!(calls.contains(&MatcherCall::SetGroup(GroupId::new(12))));

    fx.service.shutdown().await;
}

#[tokio::test]
async fn removal_after_group_switch_persists_database() {
    let fx = fixture();
    fx.service
        .set_active_group(GroupId::new(1), "/data/whorl")
        .await
        .unwrap();
    fx.matcher.set_prints(prints(&[8]));
    fx.matcher.clear_calls();

    fx.service.remove(FingerId::new(8)).await.unwrap();

    let calls = fx.matcher.calls();
    let remove = calls
        .iter()
        .position(|c| matches!(c, MatcherCall::RemovePrint(_, _)))
        .unwrap();
    let store = calls
        .iter()
        .position(|c| matches!(c, MatcherCall::StoreDatabase(_)))
        .unwrap();
    assert!(remove < store);

    fx.service.shutdown().await;
}

#[tokio::test]
async fn authenticator_id_reads_template_set_id() {
    let fx = fixture();
    fx.matcher.set_database_id(0xFACE);

    assert_eq!(fx.service.authenticator_id().await.unwrap(), 0xFACE);

    fx.service.shutdown().await;
}

#[tokio::test]
async fn cancel_after_shutdown_is_rejected() {
    let fx = fixture();
    fx.service.shutdown().await;

    assert!(matches!(fx.service.cancel(), Err(Error::Rejected { .. })));
}

#[tokio::test]
async fn admin_call_interrupts_idle_navigation() {
    let fx = fixture();
    fx.matcher.set_navigation(true);
    fx.matcher.set_prints(prints(&[3]));

    // Wait for the worker to wander into navigation polling, then make
    // an administrative call; the pause window must evict it.
    let matcher = fx.matcher.clone();
    wait_until("navigation entered", || {
        matcher.work_mode() == whorl_hardware::WorkMode::NavigationDetect
    })
    .await;

    fx.service.enumerate().await.unwrap();

    assert_eq!(fx.listener.enumerated(), vec![(FingerId::new(3), 0)]);
    assert_eq!(
        fx.service.coordinator().current_state(),
        OperationState::Idle
    );

    fx.service.shutdown().await;
}
