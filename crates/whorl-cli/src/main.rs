//! Whorl demo binary.
//!
//! Drives the coordinator through an enroll and an authenticate session
//! against mock hardware, logging every listener event. Useful for
//! eyeballing the capture flow without a physical sensor.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use whorl_coordinator::{
    CoordinatorConfig, EventListener, FingerprintService, OperationState, ProgressEvent,
    ProgressKind, ResultEvent, ResultKind,
};
use whorl_core::{AuthToken, FingerId, GroupId};
use whorl_hardware::mock::{MockMatcher, MockSensor};
use whorl_hardware::{CaptureOutcome, IdentifyDecision, NullGestureSink};

/// Listener that narrates coordinator events to the log.
struct LogListener;

impl EventListener for LogListener {
    fn on_progress(&self, event: ProgressEvent) {
        match event.kind {
            ProgressKind::Acquired(outcome) => info!("capture feedback: {outcome}"),
            ProgressKind::EnrollStep { finger, remaining } => {
                info!("enroll progress for finger {finger}: {remaining}% remaining");
            }
        }
    }

    fn on_result(&self, event: ResultEvent) {
        match event.kind {
            ResultKind::Enrolled { finger, .. } => info!("enrolled finger {finger}"),
            ResultKind::Authenticated { finger, .. } if finger.is_none() => {
                info!("finger not recognized");
            }
            ResultKind::Authenticated { finger, token } => {
                info!(
                    "authenticated finger {finger} (challenge {:#x})",
                    token.challenge
                );
            }
        }
    }

    fn on_error(&self, error: whorl_core::Error) {
        warn!("operation failed: {error}");
    }

    fn on_removed(&self, finger: FingerId, remaining: u32) {
        info!("removed finger {finger}, {remaining} remaining");
    }

    fn on_enumerated(&self, finger: FingerId, remaining: u32) {
        info!("enumerated finger {finger}, {remaining} remaining");
    }
}

async fn wait_for_idle<S, M>(service: &FingerprintService<S, M>)
where
    S: whorl_hardware::SensorDevice + 'static,
    M: whorl_hardware::Matcher + 'static,
{
    while service.coordinator().current_state() != OperationState::Idle {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Whorl sensor coordination demo v{}", whorl_core::VERSION);
    info!("Driving the coordinator with mock hardware");

    let (sensor, sensor_handle) = MockSensor::new();
    let (matcher, matcher_handle) = MockMatcher::new();
    let service = FingerprintService::start(
        sensor,
        matcher,
        Arc::new(NullGestureSink),
        CoordinatorConfig::default(),
    );
    service.set_listener(Arc::new(LogListener));

    service
        .set_active_group(GroupId::new(0), "/tmp/whorl-demo")
        .await?;

    // Enrollment: three touches, one of them smudged.
    matcher_handle.set_challenge(0x5EED);
    let challenge = service.pre_enroll().await?;
    info!("enroll challenge: {challenge:#x}");

    matcher_handle.push_image(CaptureOutcome::TooFast);
    for percentage in [35, 70, 100] {
        matcher_handle.push_image(CaptureOutcome::Good);
        matcher_handle.push_enroll_progress(percentage);
    }

    let mut token = AuthToken::for_challenge(challenge);
    token.user_id = 1000;
    service.enroll(token, 60).await?;

    for _ in 0..4 {
        sensor_handle.touch().await?;
    }
    wait_for_idle(&service).await;
    service.post_enroll()?;

    // Authentication against the freshly enrolled template.
    let enrolled = matcher_handle
        .prints()
        .first()
        .copied()
        .unwrap_or(FingerId::NONE);
    matcher_handle.push_image(CaptureOutcome::Good);
    matcher_handle.push_identify(IdentifyDecision::Match {
        finger: enrolled,
        score: 9200,
        token: AuthToken::for_challenge(0xC0FFEE),
    });

    service.authenticate(0xC0FFEE).await?;
    sensor_handle.touch().await?;
    wait_for_idle(&service).await;

    service.enumerate().await?;

    info!("demo complete, shutting down");
    service.shutdown().await;
    Ok(())
}
