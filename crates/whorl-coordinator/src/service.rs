//! Administrative facade over the coordinator.
//!
//! Short synchronous-style calls (group switch, enumerate, remove,
//! challenge handling) claim the device inside a `Paused` exclusion
//! window; the long capture operations stage their parameters in that
//! same window and then hand the worker a transition instead of
//! resuming. Every operation maps a refused pause to a busy error the
//! external framework can surface as "retry later".

use crate::config::CoordinatorConfig;
use crate::coordinator::{OperationCoordinator, SensorRig};
use crate::notifier::Notifier;
use crate::state::{AuthenticateParams, EnrollParams, OperationRequest, OperationState};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;
use whorl_core::constants::MAX_ENROLLED_PRINTS;
use whorl_core::{AuthToken, Error, FingerId, GroupId, Result};
use whorl_hardware::{GestureSink, Matcher, SensorDevice};

/// The fingerprint service surface the external framework talks to.
pub struct FingerprintService<S, M> {
    coordinator: OperationCoordinator<S, M>,
    rig: Arc<tokio::sync::Mutex<SensorRig<S, M>>>,
    notifier: Arc<Notifier>,
    group: Mutex<GroupId>,
    db_path: Mutex<Option<String>>,
    enroll_challenge: AtomicU64,
}

impl<S, M> FingerprintService<S, M>
where
    S: SensorDevice + 'static,
    M: Matcher + 'static,
{
    /// Start the coordinator worker and wrap it in the service surface.
    pub fn start(
        sensor: S,
        matcher: M,
        gestures: Arc<dyn GestureSink>,
        config: CoordinatorConfig,
    ) -> Self {
        let notifier = Arc::new(Notifier::new());
        let coordinator =
            OperationCoordinator::start(sensor, matcher, gestures, notifier.clone(), config);
        let rig = coordinator.device();
        Self {
            coordinator,
            rig,
            notifier,
            group: Mutex::new(GroupId::default()),
            db_path: Mutex::new(None),
            enroll_challenge: AtomicU64::new(0),
        }
    }

    /// Identity carried in every event this service emits.
    pub fn device_id(&self) -> Uuid {
        self.notifier.device_id()
    }

    /// Register the event listener (last setter wins).
    pub fn set_listener(&self, listener: Arc<dyn crate::notifier::EventListener>) {
        self.notifier.set_listener(listener);
    }

    /// Direct access to the underlying coordinator.
    pub fn coordinator(&self) -> &OperationCoordinator<S, M> {
        &self.coordinator
    }

    /// Shut down the worker. Terminal.
    pub async fn shutdown(&self) {
        self.coordinator.stop().await;
    }

    fn active_group(&self) -> GroupId {
        *self.group.lock().expect("group lock poisoned")
    }

    /// Run a short administrative operation with the device claimed
    /// inside a `Paused` exclusion window.
    async fn with_paused_device<T>(
        &self,
        operation: &'static str,
        f: impl AsyncFnOnce(&mut SensorRig<S, M>) -> Result<T>,
    ) -> Result<T> {
        if !self.coordinator.pause().await {
            return Err(Error::busy(format!("{operation}: coordinator unavailable")));
        }
        let result = {
            let mut rig = self.rig.lock().await;
            f(&mut rig).await
        };
        self.coordinator.resume().await;
        result
    }

    /// Produce a fresh enrollment challenge for the caller to have
    /// signed by its authenticator.
    pub async fn pre_enroll(&self) -> Result<u64> {
        let challenge = self
            .with_paused_device("pre_enroll", async |rig| {
                Ok(rig.matcher.load_enroll_challenge().await?)
            })
            .await?;
        self.enroll_challenge.store(challenge, Ordering::SeqCst);
        info!(challenge, "enroll challenge issued");
        Ok(challenge)
    }

    /// Discard the outstanding enrollment challenge.
    pub fn post_enroll(&self) -> Result<()> {
        debug!("resetting enroll challenge");
        self.enroll_challenge.store(0, Ordering::SeqCst);
        Ok(())
    }

    /// Begin an enroll session. Verifies the caller's token in the
    /// exclusion window, picks the id for the new template, and hands
    /// the worker the operation. `timeout_secs` of zero disables the
    /// per-wait deadline.
    ///
    /// Returns once the worker has *begun* the session; progress and the
    /// terminal outcome arrive through the listener.
    pub async fn enroll(&self, token: AuthToken, timeout_secs: u32) -> Result<()> {
        if !self.coordinator.pause().await {
            return Err(Error::busy("enroll: coordinator unavailable"));
        }

        let group = self.active_group();
        let timeout = (timeout_secs > 0).then(|| Duration::from_secs(u64::from(timeout_secs)));
        let staged: Result<EnrollParams> = {
            let mut rig = self.rig.lock().await;
            async {
                rig.matcher.verify_enroll_token(&token).await?;
                let prints = rig.matcher.list_prints(group).await?;
                if prints.len() >= MAX_ENROLLED_PRINTS {
                    return Err(Error::rejected(
                        OperationState::Enrolling.to_string(),
                        "no space for another template",
                    ));
                }
                let next = prints.iter().map(|f| f.as_u32()).max().unwrap_or(0) + 1;
                Ok(EnrollParams {
                    group,
                    finger: FingerId::new(next),
                    user_id: token.user_id,
                    timeout,
                })
            }
            .await
        };

        let params = match staged {
            Ok(params) => params,
            Err(e) => {
                self.coordinator.resume().await;
                return Err(e);
            }
        };

        info!(finger = %params.finger, group = %group, "enroll accepted");
        if self
            .coordinator
            .request_operation_and_wait(OperationRequest::Enroll(params))
            .await
        {
            Ok(())
        } else {
            self.coordinator.resume().await;
            Err(Error::busy("enroll: worker did not accept the operation"))
        }
    }

    /// Begin an authenticate session against the active group.
    pub async fn authenticate(&self, operation_id: u64) -> Result<()> {
        if !self.coordinator.pause().await {
            return Err(Error::busy("authenticate: coordinator unavailable"));
        }

        let group = self.active_group();
        let staged: Result<()> = {
            let mut rig = self.rig.lock().await;
            async {
                let prints = rig.matcher.list_prints(group).await?;
                if prints.is_empty() {
                    return Err(Error::rejected(
                        OperationState::Authenticating.to_string(),
                        "no enrolled templates",
                    ));
                }
                rig.matcher.set_auth_challenge(operation_id).await?;
                Ok(())
            }
            .await
        };

        if let Err(e) = staged {
            self.coordinator.resume().await;
            return Err(e);
        }

        info!(group = %group, "authenticate accepted");
        if self
            .coordinator
            .request_operation_and_wait(OperationRequest::Authenticate(AuthenticateParams {
                group,
                challenge: operation_id,
            }))
            .await
        {
            Ok(())
        } else {
            self.coordinator.resume().await;
            Err(Error::busy(
                "authenticate: worker did not accept the operation",
            ))
        }
    }

    /// Cancel the in-flight operation by steering the worker back to
    /// `Idle`. The running loop reports `Cancelled` once it unwinds.
    pub fn cancel(&self) -> Result<()> {
        info!("cancel requested");
        if self.coordinator.request_transition(OperationState::Idle) {
            Ok(())
        } else {
            Err(Error::rejected(
                self.coordinator.current_state().to_string(),
                "cancel not accepted",
            ))
        }
    }

    /// Report every enrolled template through the listener. An empty set
    /// is reported as a single `finger = 0, remaining = 0` event so the
    /// caller still learns that enumeration finished.
    pub async fn enumerate(&self) -> Result<()> {
        let group = self.active_group();
        let notifier = self.notifier.clone();
        self.with_paused_device("enumerate", async move |rig| {
            let prints = rig.matcher.list_prints(group).await?;
            debug!(count = prints.len(), "enumerating templates");
            if prints.is_empty() {
                notifier.enumerated(FingerId::NONE, 0);
            } else {
                let mut remaining = prints.len() as u32;
                for finger in prints {
                    remaining -= 1;
                    notifier.enumerated(finger, remaining);
                }
            }
            Ok(())
        })
        .await
    }

    /// Remove one template, or every template in the active group when
    /// `finger` is the reserved id. Failures are also reported through
    /// the listener so the framework-side bookkeeping cannot drift.
    pub async fn remove(&self, finger: FingerId) -> Result<()> {
        let group = self.active_group();
        let notifier = self.notifier.clone();
        let db_path = self.db_path.lock().expect("db path lock poisoned").clone();
        let result = self
            .with_paused_device("remove", async move |rig| {
                if finger.is_none() {
                    let prints = rig.matcher.list_prints(group).await?;
                    let mut remaining = prints.len() as u32;
                    for finger in prints.into_iter().rev() {
                        rig.matcher.remove_print(group, finger).await?;
                        remaining -= 1;
                        notifier.removed(finger, remaining);
                    }
                } else {
                    rig.matcher.remove_print(group, finger).await?;
                    notifier.removed(finger, 0);
                }
                if let Some(path) = db_path {
                    rig.matcher.store_database(&path).await?;
                }
                Ok(())
            })
            .await;

        if let Err(e) = &result {
            self.notifier.error(e.clone());
        }
        result
    }

    /// Select the template group and its backing store. Creates and
    /// persists an empty database when the store has none yet.
    pub async fn set_active_group(&self, group: GroupId, store_path: &str) -> Result<()> {
        let path = format!("{store_path}/whorl.db");
        info!(group = %group, path, "switching active group");
        let result = self
            .with_paused_device("set_active_group", {
                let path = path.clone();
                async move |rig| {
                    if rig.matcher.load_database(&path).await.is_err() {
                        rig.matcher.load_empty_database().await?;
                        rig.matcher.store_database(&path).await?;
                        rig.matcher.load_database(&path).await?;
                    }
                    rig.matcher.set_group(group).await?;
                    Ok(())
                }
            })
            .await;

        if result.is_ok() {
            *self.group.lock().expect("group lock poisoned") = group;
            *self.db_path.lock().expect("db path lock poisoned") = Some(path);
        }
        result
    }

    /// Stable identifier of the current template set.
    pub async fn authenticator_id(&self) -> Result<u64> {
        self.with_paused_device("authenticator_id", async |rig| {
            Ok(rig.matcher.database_id().await?)
        })
        .await
    }
}
