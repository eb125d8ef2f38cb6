//! The per-operation capture automata.
//!
//! Enroll and authenticate share the same skeleton: wait for a finger,
//! classify the image, run the match or enroll step, wait for the finger
//! to leave, repeat. Cancellation is checked at the top of every
//! iteration (except immediately after a forced re-image, which retries
//! once before looking again) and inside every multiplexer wait.
//!
//! Every exit path funnels through the same cleanup: SPI link down,
//! secure session finalized, sensor powered off, and exactly one terminal
//! report to the listener.

use crate::config::CoordinatorConfig;
use crate::coordinator::SensorRig;
use crate::mux::{EventMultiplexer, WakeupReason};
use crate::notifier::Notifier;
use crate::signal::ControlSignal;
use crate::state::{AuthenticateParams, EnrollParams};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use whorl_core::constants::{ENROLL_COMPLETE_PERCENT, FINGER_LOST_POLL_MS, SPI_SETTLE, needs_device_reset};
use whorl_core::{AuthToken, Error, FingerId};
use whorl_hardware::{
    CaptureOutcome, GestureSink, IdentifyDecision, Matcher, SensorDevice, WorkMode,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    WaitFingerDown,
    GetImage,
    MatchStep,
    WaitFingerLost,
}

/// How a capture loop ended. Exactly one of these becomes the terminal
/// listener call.
enum LoopEnd {
    Enrolled(FingerId),
    Authenticated { finger: FingerId, token: AuthToken },
    Unmatched,
    Cancelled,
    TimedOut,
    Failed(Error),
}

fn report_end(notifier: &Notifier, end: LoopEnd) {
    match end {
        LoopEnd::Enrolled(finger) => {
            info!(%finger, "enrollment complete");
            notifier.enrolled(finger);
        }
        LoopEnd::Authenticated { finger, token } => {
            info!(%finger, "authentication successful");
            notifier.authenticated(finger, token);
        }
        LoopEnd::Unmatched => {
            info!("finger not recognized");
            notifier.authenticated(FingerId::NONE, AuthToken::empty());
        }
        LoopEnd::Cancelled => {
            info!("operation cancelled");
            notifier.error(Error::Cancelled);
        }
        LoopEnd::TimedOut => {
            info!("operation timed out");
            notifier.error(Error::Timeout);
        }
        LoopEnd::Failed(e) => {
            warn!("operation failed: {e}");
            notifier.error(e);
        }
    }
}

/// Either retry after a device-level reset, or give up on the operation.
async fn recover_device<S: SensorDevice, M: Matcher>(
    rig: &mut SensorRig<S, M>,
    code: i32,
    context: &'static str,
) -> Result<(), LoopEnd> {
    if needs_device_reset(code) {
        warn!(code, "{context}: secure channel requested a device reset");
        rig.sensor
            .reset()
            .await
            .map_err(|e| LoopEnd::Failed(e.into()))
    } else {
        Err(LoopEnd::Failed(Error::device(code, context)))
    }
}

/// Sensor soft reset between re-image attempts: drop the matching engine
/// and the SPI link, then bring both back up in detect mode. If the soft
/// sequence fails the sensor gets a hard reset instead.
async fn soft_reset_sensor<S: SensorDevice, M: Matcher>(
    rig: &mut SensorRig<S, M>,
    config: &CoordinatorConfig,
) -> Result<(), LoopEnd> {
    debug!("soft-resetting sensor before re-image");
    let sequence = async {
        rig.matcher.set_work_mode(WorkMode::Sleep).await?;
        rig.matcher.set_spi(false).await?;
        sleep(config.reimage_backoff).await;
        rig.matcher.set_spi(true).await?;
        sleep(SPI_SETTLE).await;
        rig.matcher.set_work_mode(WorkMode::Detect).await?;
        Ok::<_, whorl_hardware::HardwareError>(())
    }
    .await;

    if let Err(e) = sequence {
        warn!("soft reset failed ({e}), hard-resetting sensor");
        if let Err(e) = rig.sensor.reset().await {
            return Err(LoopEnd::Failed(e.into()));
        }
    }
    Ok(())
}

/// Run one enroll session to completion.
pub(crate) async fn run_enroll<S: SensorDevice, M: Matcher>(
    rig: &mut SensorRig<S, M>,
    mux: &mut EventMultiplexer,
    control: &ControlSignal,
    notifier: &Notifier,
    config: &CoordinatorConfig,
    params: EnrollParams,
) {
    info!(finger = %params.finger, group = %params.group, timeout = ?params.timeout,
          "starting enroll session");

    if let Err(e) = rig.sensor.enable().await {
        error!("failed to power sensor: {e}");
        notifier.error(e.into());
        return;
    }

    let end = match rig.matcher.init_enroll(params.user_id).await {
        Err(e) => LoopEnd::Failed(e.into()),
        Ok(()) => enroll_loop(rig, mux, control, notifier, config, &params).await,
    };

    if let Err(e) = rig.matcher.set_spi(false).await {
        warn!("failed to drop SPI link: {e}");
    }
    if let Err(e) = rig.matcher.finalize_enroll().await {
        warn!("failed to finalize enroll session: {e}");
    }

    // Persist only a completed template; the terminal progress report is
    // deferred until after the save so a fast-following administrative
    // call cannot race a half-saved print.
    let end = match end {
        LoopEnd::Enrolled(finger) => {
            match rig.matcher.save_enrolled_print(params.group, finger).await {
                Ok(()) => LoopEnd::Enrolled(finger),
                Err(e) => LoopEnd::Failed(e.into()),
            }
        }
        other => other,
    };

    if let Err(e) = rig.sensor.disable().await {
        warn!("failed to power off sensor: {e}");
    }

    report_end(notifier, end);
}

async fn enroll_loop<S: SensorDevice, M: Matcher>(
    rig: &mut SensorRig<S, M>,
    mux: &mut EventMultiplexer,
    control: &ControlSignal,
    notifier: &Notifier,
    config: &CoordinatorConfig,
    params: &EnrollParams,
) -> LoopEnd {
    let mut phase = Phase::WaitFingerDown;
    let mut percentage: u8 = 0;
    let mut reimaged: u32 = 0;
    let mut force_retry = false;
    let mut finger_present = false;

    while percentage < ENROLL_COMPLETE_PERCENT {
        if control.is_raised() && !force_retry {
            return LoopEnd::Cancelled;
        }
        force_retry = false;
        debug!(?phase, reimaged, percentage, "enroll loop");

        match phase {
            Phase::WaitFingerDown => {
                if let Err(e) = rig.matcher.set_work_mode(WorkMode::Detect).await {
                    return LoopEnd::Failed(e.into());
                }
                match mux.wait(params.timeout).await {
                    WakeupReason::HardwareEvent => {
                        finger_present = true;
                        phase = Phase::GetImage;
                    }
                    WakeupReason::Timeout => return LoopEnd::TimedOut,
                    WakeupReason::ControlSignal => {}
                }
            }
            Phase::GetImage => {
                let outcome = match rig.matcher.acquire_image().await {
                    Ok(outcome) => outcome,
                    Err(e) => return LoopEnd::Failed(e.into()),
                };
                phase = Phase::WaitFingerLost;
                match outcome {
                    CaptureOutcome::Good => {
                        notifier.acquired(CaptureOutcome::Good);
                        reimaged = 0;
                        phase = Phase::MatchStep;
                    }
                    CaptureOutcome::TooFast => notifier.acquired(CaptureOutcome::TooFast),
                    CaptureOutcome::Partial | CaptureOutcome::ImagerDirty => {
                        reimaged += 1;
                        if reimaged >= config.max_reimage_attempts {
                            notifier.acquired(outcome);
                            sleep(config.degraded_report_backoff).await;
                            reimaged = 0;
                        } else {
                            if let Err(end) = soft_reset_sensor(rig, config).await {
                                return end;
                            }
                            force_retry = true;
                            phase = Phase::GetImage;
                        }
                    }
                    CaptureOutcome::Error(code) => {
                        match recover_device(rig, code, "image acquisition").await {
                            Ok(()) => phase = Phase::WaitFingerDown,
                            Err(end) => return end,
                        }
                    }
                    CaptureOutcome::Nothing | CaptureOutcome::Lost => {
                        phase = Phase::WaitFingerDown;
                    }
                }
            }
            Phase::MatchStep => {
                let update = match rig.matcher.enroll_step(finger_present).await {
                    Ok(update) => update,
                    Err(e) => return LoopEnd::Failed(e.into()),
                };
                info!(outcome = %update.outcome, percentage = update.percentage,
                      dx = update.dx, dy = update.dy, score = update.score, "enroll step");
                finger_present = false;
                phase = Phase::WaitFingerLost;
                match update.outcome {
                    CaptureOutcome::Good => {
                        // Progress never goes backwards within a session.
                        percentage = percentage.max(update.percentage);
                        if percentage < ENROLL_COMPLETE_PERCENT {
                            notifier.enroll_progress(
                                params.finger,
                                ENROLL_COMPLETE_PERCENT - percentage,
                            );
                        }
                    }
                    CaptureOutcome::Partial | CaptureOutcome::ImagerDirty => {
                        notifier.acquired(update.outcome);
                    }
                    CaptureOutcome::Nothing => {}
                    CaptureOutcome::Error(code) => {
                        match recover_device(rig, code, "enroll step").await {
                            Ok(()) => phase = Phase::WaitFingerDown,
                            Err(end) => return end,
                        }
                    }
                    other => warn!(outcome = %other, "unexpected enroll step outcome"),
                }
            }
            Phase::WaitFingerLost => {
                match wait_finger_lost(rig, mux, params.timeout, true).await {
                    Ok(Some(next)) => phase = next,
                    Ok(None) => {}
                    Err(end) => return end,
                }
            }
        }
    }

    LoopEnd::Enrolled(params.finger)
}

/// Run one authenticate session to completion.
pub(crate) async fn run_authenticate<S: SensorDevice, M: Matcher>(
    rig: &mut SensorRig<S, M>,
    mux: &mut EventMultiplexer,
    control: &ControlSignal,
    notifier: &Notifier,
    config: &CoordinatorConfig,
    params: AuthenticateParams,
) {
    info!(group = %params.group, "starting authenticate session");

    if let Err(e) = rig.sensor.enable().await {
        error!("failed to power sensor: {e}");
        notifier.error(e.into());
        return;
    }

    let end = match rig.matcher.init_identify().await {
        Err(e) => LoopEnd::Failed(e.into()),
        Ok(()) => authenticate_loop(rig, mux, control, notifier, config, &params).await,
    };

    if let Err(e) = rig.matcher.set_spi(false).await {
        warn!("failed to drop SPI link: {e}");
    }
    if let Err(e) = rig.matcher.finalize_identify().await {
        warn!("failed to finalize identify session: {e}");
    }
    if let Err(e) = rig.sensor.disable().await {
        warn!("failed to power off sensor: {e}");
    }

    report_end(notifier, end);
}

async fn authenticate_loop<S: SensorDevice, M: Matcher>(
    rig: &mut SensorRig<S, M>,
    mux: &mut EventMultiplexer,
    control: &ControlSignal,
    notifier: &Notifier,
    config: &CoordinatorConfig,
    params: &AuthenticateParams,
) -> LoopEnd {
    let mut phase = Phase::WaitFingerDown;
    let mut reimaged: u32 = 0;
    let mut force_retry = false;

    loop {
        if control.is_raised() && !force_retry {
            return LoopEnd::Cancelled;
        }
        force_retry = false;
        debug!(?phase, reimaged, "authenticate loop");

        match phase {
            Phase::WaitFingerDown => {
                if let Err(e) = rig.matcher.set_work_mode(WorkMode::Detect).await {
                    return LoopEnd::Failed(e.into());
                }
                match mux.wait(None).await {
                    WakeupReason::HardwareEvent => phase = Phase::GetImage,
                    WakeupReason::Timeout => return LoopEnd::TimedOut,
                    WakeupReason::ControlSignal => {}
                }
            }
            Phase::GetImage => {
                let outcome = match rig.matcher.acquire_image().await {
                    Ok(outcome) => outcome,
                    Err(e) => return LoopEnd::Failed(e.into()),
                };
                phase = Phase::WaitFingerLost;
                match outcome {
                    CaptureOutcome::Good => {
                        notifier.acquired(CaptureOutcome::Good);
                        reimaged = 0;
                        phase = Phase::MatchStep;
                    }
                    CaptureOutcome::TooFast => notifier.acquired(CaptureOutcome::TooFast),
                    CaptureOutcome::Partial | CaptureOutcome::ImagerDirty => {
                        reimaged += 1;
                        if reimaged >= config.max_reimage_attempts {
                            notifier.acquired(outcome);
                            sleep(config.degraded_report_backoff).await;
                            reimaged = 0;
                        } else {
                            if let Err(end) = soft_reset_sensor(rig, config).await {
                                return end;
                            }
                            force_retry = true;
                            phase = Phase::GetImage;
                        }
                    }
                    CaptureOutcome::Error(code) => {
                        match recover_device(rig, code, "image acquisition").await {
                            Ok(()) => phase = Phase::WaitFingerDown,
                            Err(end) => return end,
                        }
                    }
                    CaptureOutcome::Nothing | CaptureOutcome::Lost => {
                        phase = Phase::WaitFingerDown;
                    }
                }
            }
            Phase::MatchStep => {
                let decision = match rig.matcher.identify(params.group, params.challenge).await {
                    Ok(decision) => decision,
                    Err(e) => return LoopEnd::Failed(e.into()),
                };
                match decision {
                    IdentifyDecision::Match {
                        finger,
                        score,
                        token,
                    } => {
                        info!(%finger, score, "identification match");
                        // Template maintenance happens before the report
                        // so the improved template is on disk by the time
                        // the caller reacts.
                        match rig.matcher.update_template().await {
                            Ok(true) => {
                                if let Err(e) = rig.matcher.save_template().await {
                                    warn!("failed to store template update: {e}");
                                }
                            }
                            Ok(false) => {}
                            Err(e) => warn!("template update failed: {e}"),
                        }
                        return LoopEnd::Authenticated { finger, token };
                    }
                    IdentifyDecision::NoMatch => return LoopEnd::Unmatched,
                    IdentifyDecision::Retry(CaptureOutcome::Error(code)) => {
                        match recover_device(rig, code, "identification").await {
                            Ok(()) => phase = Phase::WaitFingerDown,
                            Err(end) => return end,
                        }
                    }
                    IdentifyDecision::Retry(outcome) => {
                        debug!(outcome = %outcome, "identification inconclusive");
                        phase = Phase::WaitFingerLost;
                    }
                }
            }
            Phase::WaitFingerLost => {
                match wait_finger_lost(rig, mux, None, false).await {
                    Ok(Some(next)) => phase = next,
                    Ok(None) => {}
                    Err(end) => return end,
                }
            }
        }
    }
}

/// Shared finger-lost handling: poll once over SPI; if the finger is
/// still present, fall back to the multiplexer. `Ok(Some(_))` moves to
/// the next phase, `Ok(None)` stays in `WaitFingerLost` (a control
/// request is pending and the caller's loop head handles it).
async fn wait_finger_lost<S: SensorDevice, M: Matcher>(
    rig: &mut SensorRig<S, M>,
    mux: &mut EventMultiplexer,
    timeout: Option<std::time::Duration>,
    recalibrate: bool,
) -> Result<Option<Phase>, LoopEnd> {
    rig.matcher
        .set_spi(true)
        .await
        .map_err(|e| LoopEnd::Failed(e.into()))?;
    let outcome = rig
        .matcher
        .is_finger_lost(FINGER_LOST_POLL_MS)
        .await
        .map_err(|e| LoopEnd::Failed(e.into()))?;

    if outcome == CaptureOutcome::Lost {
        if recalibrate {
            // A failed recalibration leaves the sensor imprecise but not
            // unusable.
            if let Err(e) = rig.matcher.calibrate().await {
                warn!("recalibration failed: {e}");
            }
        }
        rig.matcher
            .set_spi(false)
            .await
            .map_err(|e| LoopEnd::Failed(e.into()))?;
        return Ok(Some(Phase::WaitFingerDown));
    }

    match mux.wait(timeout).await {
        WakeupReason::Timeout => Err(LoopEnd::TimedOut),
        WakeupReason::HardwareEvent | WakeupReason::ControlSignal => Ok(None),
    }
}

/// Default handler: passive gesture navigation until a control request
/// arrives.
pub(crate) async fn run_idle<S: SensorDevice, M: Matcher>(
    rig: &mut SensorRig<S, M>,
    mux: &mut EventMultiplexer,
    control: &ControlSignal,
    gestures: &dyn GestureSink,
    config: &CoordinatorConfig,
) {
    if !rig.matcher.navigation_supported() {
        return;
    }

    // Give bursts of short control calls a chance to land before paying
    // for an excursion into navigation mode.
    if control.wait_timeout(config.navigation_grace).await {
        debug!("control request during navigation grace, skipping gesture polling");
        return;
    }

    debug!("entering gesture navigation");
    if let Err(e) = rig.sensor.enable().await {
        error!("failed to power sensor for navigation: {e}");
        return;
    }

    match rig.matcher.set_work_mode(WorkMode::NavigationDetect).await {
        Err(e) => warn!("failed to enter navigation mode: {e}"),
        Ok(()) => {
            loop {
                match rig.matcher.next_gesture().await {
                    Ok(Some(gesture)) => {
                        info!(?gesture, "gesture detected");
                        gestures.emit(gesture);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!("gesture poll failed: {e}");
                        break;
                    }
                }
                match mux.wait(None).await {
                    WakeupReason::HardwareEvent => {}
                    WakeupReason::ControlSignal => {
                        debug!("leaving navigation to handle control request");
                        break;
                    }
                    // Only possible when the interrupt source is gone.
                    WakeupReason::Timeout => break,
                }
            }
            if let Err(e) = rig.matcher.set_work_mode(WorkMode::Sleep).await {
                warn!("failed to leave navigation mode: {e}");
            }
        }
    }

    if let Err(e) = rig.sensor.disable().await {
        warn!("failed to power off sensor: {e}");
    }
}
