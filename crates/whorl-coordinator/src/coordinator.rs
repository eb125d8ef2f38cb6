//! The operation coordinator: a small state machine fronting one
//! dedicated worker that owns exclusive access to the sensor.
//!
//! Control callers record a desired state and raise the control signal;
//! the worker consumes pending transitions at a single serialization
//! point and dispatches the matching capture handler. Callers that need
//! an acknowledgment (`pause`, `request_*_and_wait`) block until the
//! worker has applied their request. Acknowledgment means the handler
//! has *begun*; completion is reported asynchronously through the
//! [`Notifier`].
//!
//! The worker runs on its own thread with a current-thread runtime, so a
//! long capture loop never competes with the caller-facing API for an
//! executor. At most one handler body executes at a time; `Paused` runs
//! none, which is what gives short administrative calls a safe window to
//! claim the device.

use crate::capture;
use crate::config::CoordinatorConfig;
use crate::mux::EventMultiplexer;
use crate::notifier::Notifier;
use crate::signal::ControlSignal;
use crate::state::{OperationRequest, OperationState, TransitionRequest};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use whorl_core::Error;
use whorl_hardware::{GestureSink, Matcher, SensorDevice};

/// The device handles a running handler owns: the physical sensor and
/// the secure-channel matcher.
///
/// The rig lives behind one async mutex. The worker locks it for the
/// duration of a handler; an administrative call locks it inside the
/// `Paused` window. Replacing a wedged device is a swap under this same
/// exclusion.
pub struct SensorRig<S, M> {
    pub sensor: S,
    pub matcher: M,
}

struct CoordinatorShared {
    /// Desired state not yet consumed by the worker, tagged with its
    /// ticket. Last writer wins.
    pending: Mutex<Option<(u64, TransitionRequest)>>,
    control: Arc<ControlSignal>,
    /// Current state, published by the worker.
    state_tx: watch::Sender<OperationState>,
    /// Ticket of the most recently applied request. Lets a waiter learn
    /// that its request was picked up even when the handler finished so
    /// fast that the state value it briefly held was never observable.
    applied_tx: watch::Sender<u64>,
    next_ticket: AtomicU64,
}

impl CoordinatorShared {
    /// Record a request and raise the control signal as one atomic step,
    /// returning the request's ticket. Raising inside the lock keeps a
    /// late raise from leaking into the handler the worker is about to
    /// start (it would read as a phantom cancellation).
    fn submit_locked(&self, request: TransitionRequest) -> u64 {
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst) + 1;
        let mut pending = self.pending.lock().expect("pending lock poisoned");
        if let Some((_, old)) = pending.replace((ticket, request)) {
            debug!(target = %old.target, "overwriting unconsumed transition request");
        }
        self.control.raise();
        ticket
    }
}

/// Coordinates asynchronous capture operations on a single sensor.
///
/// Created with [`start`](OperationCoordinator::start), which spawns the
/// worker and moves the state machine from `Invalid` to `Idle`. All
/// public operations are safe to call from any number of tasks
/// concurrently.
pub struct OperationCoordinator<S, M> {
    shared: Arc<CoordinatorShared>,
    rig: Arc<tokio::sync::Mutex<SensorRig<S, M>>>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    /// Serializes competing control callers, the way the original
    /// writer-side lock did.
    writer: tokio::sync::Mutex<()>,
    state_rx: watch::Receiver<OperationState>,
    applied_rx: watch::Receiver<u64>,
    config: CoordinatorConfig,
    notifier: Arc<Notifier>,
}

impl<S, M> OperationCoordinator<S, M>
where
    S: SensorDevice + 'static,
    M: Matcher + 'static,
{
    /// Spawn the worker and enter `Idle`.
    ///
    /// # Panics
    ///
    /// Panics if the sensor's interrupt source has already been taken or
    /// the worker thread cannot be spawned; both are environment errors,
    /// not runtime conditions.
    pub fn start(
        mut sensor: S,
        matcher: M,
        gestures: Arc<dyn GestureSink>,
        notifier: Arc<Notifier>,
        config: CoordinatorConfig,
    ) -> Self {
        let interrupts = sensor
            .take_interrupts()
            .expect("sensor interrupt source already taken");
        let control = Arc::new(ControlSignal::new());
        let (state_tx, state_rx) = watch::channel(OperationState::Invalid);
        let (applied_tx, applied_rx) = watch::channel(0);
        let shared = Arc::new(CoordinatorShared {
            pending: Mutex::new(None),
            control: control.clone(),
            state_tx,
            applied_tx,
            next_ticket: AtomicU64::new(0),
        });
        let rig = Arc::new(tokio::sync::Mutex::new(SensorRig { sensor, matcher }));
        let mux = EventMultiplexer::new(control, interrupts);

        shared.state_tx.send_replace(OperationState::Idle);

        let worker = Worker {
            shared: shared.clone(),
            rig: rig.clone(),
            mux,
            notifier: notifier.clone(),
            gestures,
            config: config.clone(),
        };
        let handle = thread::Builder::new()
            .name("whorl-worker".into())
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                    .expect("failed to build worker runtime");
                runtime.block_on(worker.run());
            })
            .expect("failed to spawn worker thread");

        info!(device_id = %notifier.device_id(), "operation coordinator started");

        Self {
            shared,
            rig,
            worker: Mutex::new(Some(handle)),
            writer: tokio::sync::Mutex::new(()),
            state_rx,
            applied_rx,
            config,
            notifier,
        }
    }

    /// The state the worker last published.
    pub fn current_state(&self) -> OperationState {
        *self.state_rx.borrow()
    }

    /// Shared handle to the device rig. Lock it only inside a `Paused`
    /// window; while a handler runs, the worker holds it.
    pub fn device(&self) -> Arc<tokio::sync::Mutex<SensorRig<S, M>>> {
        self.rig.clone()
    }

    /// The notifier this coordinator reports through.
    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    /// Exclude operations and wait until the worker sits in `Paused`.
    ///
    /// Forces cancellation of any in-flight operation. Returns `false`
    /// if the coordinator cannot reach `Paused`: it is stopped, already
    /// paused, or a conflicting pause/stop is in flight. Callers
    /// surface that as a busy error. A losing concurrent `pause` fails
    /// fast rather than queueing behind the winner.
    pub async fn pause(&self) -> bool {
        let _writer = self.writer.lock().await;
        {
            let current = *self.shared.state_tx.borrow();
            if current == OperationState::Stopped || current == OperationState::Paused {
                debug!(%current, "pause rejected");
                return false;
            }
            let pending = self.shared.pending.lock().expect("pending lock poisoned");
            if matches!(
                &*pending,
                Some((_, request))
                    if request.target == OperationState::Paused
                        || request.target == OperationState::Stopped
            ) {
                debug!("pause rejected, conflicting request in flight");
                return false;
            }
        }
        let ticket = self
            .shared
            .submit_locked(TransitionRequest::to(OperationState::Paused));
        self.await_applied(ticket, OperationState::Paused).await
    }

    /// Leave `Paused` for `Idle`. Returns `false` if not paused.
    pub async fn resume(&self) -> bool {
        let _writer = self.writer.lock().await;
        if *self.shared.state_tx.borrow() != OperationState::Paused {
            return false;
        }
        let ticket = self
            .shared
            .submit_locked(TransitionRequest::to(OperationState::Idle));
        self.await_applied(ticket, OperationState::Idle).await
    }

    /// Record a desired state and wake the worker, without waiting for
    /// the worker to act on it. Only `Idle` (cancel), `Enrolling`, and
    /// `Authenticating` are valid targets. Returns `false` once stopped.
    pub fn request_transition(&self, target: OperationState) -> bool {
        if !Self::requestable(target) {
            return false;
        }
        self.submit(TransitionRequest::to(target)).is_some()
    }

    /// As [`request_transition`](Self::request_transition), but blocks
    /// until the worker has picked the request up (the handler has
    /// begun, not completed). `false` means the request was not
    /// accepted within the acknowledgment bound and the caller should
    /// report a retryable failure.
    pub async fn request_transition_and_wait(&self, target: OperationState) -> bool {
        if !Self::requestable(target) {
            return false;
        }
        let _writer = self.writer.lock().await;
        match self.submit(TransitionRequest::to(target)) {
            Some(ticket) => self.await_applied(ticket, target).await,
            None => false,
        }
    }

    /// Stage an operation (with its parameters) and block until its
    /// handler has begun.
    pub async fn request_operation_and_wait(&self, operation: OperationRequest) -> bool {
        let _writer = self.writer.lock().await;
        let target = operation.target();
        match self.submit(TransitionRequest::operation(operation)) {
            Some(ticket) => self.await_applied(ticket, target).await,
            None => false,
        }
    }

    /// Non-blocking peek at the control signal, for use inside a running
    /// handler to interrupt long loops promptly.
    pub fn is_cancel_requested(&self) -> bool {
        self.shared.control.is_raised()
    }

    /// Bounded wait on the control signal.
    pub async fn is_cancel_requested_within(&self, timeout: Duration) -> bool {
        self.shared.control.wait_timeout(timeout).await
    }

    /// Shut the worker down and join it. Terminal: every later
    /// transition request fails. Subsequent calls are no-ops.
    pub async fn stop(&self) {
        {
            let _writer = self.writer.lock().await;
            if *self.shared.state_tx.borrow() != OperationState::Stopped {
                self.shared
                    .submit_locked(TransitionRequest::to(OperationState::Stopped));
            }
        }
        // Stopped is terminal, so waiting on the state value itself
        // cannot miss it.
        let mut rx = self.state_rx.clone();
        let _ = rx.wait_for(|state| *state == OperationState::Stopped).await;

        let handle = self.worker.lock().expect("worker lock poisoned").take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("worker thread panicked");
            }
        }
    }

    fn requestable(target: OperationState) -> bool {
        matches!(
            target,
            OperationState::Idle | OperationState::Enrolling | OperationState::Authenticating
        )
    }

    fn submit(&self, request: TransitionRequest) -> Option<u64> {
        let current = *self.shared.state_tx.borrow();
        if !current.can_transition_to(&request.target) {
            debug!(%current, target = %request.target, "transition rejected");
            return None;
        }
        Some(self.shared.submit_locked(request))
    }

    /// Wait until the worker has applied the request with `ticket`.
    ///
    /// The applied ticket, not the state value, is the acknowledgment:
    /// a handler may start and finish faster than a watch reader can
    /// observe the intermediate state. Seeing a *newer* ticket means the
    /// request was overwritten before the worker got to it.
    async fn await_applied(&self, ticket: u64, target: OperationState) -> bool {
        let mut applied = self.applied_rx.clone();
        match tokio::time::timeout(
            self.config.ack_timeout,
            applied.wait_for(|t| *t >= ticket),
        )
        .await
        {
            Ok(Ok(seen)) => *seen == ticket,
            Ok(Err(_)) | Err(_) => {
                warn!(%target, "worker did not acknowledge transition in time");
                false
            }
        }
    }
}

impl<S, M> Drop for OperationCoordinator<S, M> {
    fn drop(&mut self) {
        let handle = self
            .worker
            .lock()
            .map(|mut worker| worker.take())
            .unwrap_or(None);
        if let Some(handle) = handle {
            self.shared
                .submit_locked(TransitionRequest::to(OperationState::Stopped));
            let _ = handle.join();
        }
    }
}

struct Worker<S, M> {
    shared: Arc<CoordinatorShared>,
    rig: Arc<tokio::sync::Mutex<SensorRig<S, M>>>,
    mux: EventMultiplexer,
    notifier: Arc<Notifier>,
    gestures: Arc<dyn GestureSink>,
    config: CoordinatorConfig,
}

impl<S: SensorDevice, M: Matcher> Worker<S, M> {
    async fn run(mut self) {
        debug!("worker loop running");
        loop {
            // A burst of short control calls lands here instead of
            // triggering an excursion into the idle handler.
            let woke = self
                .shared
                .control
                .wait_timeout(self.config.idle_dispatch_wait)
                .await;
            let (state, operation) = self.consume_pending_transition();

            match state {
                OperationState::Stopped => break,
                OperationState::Paused | OperationState::Invalid => continue,
                OperationState::Idle => {
                    if !woke {
                        {
                            let mut rig = self.rig.lock().await;
                            capture::run_idle(
                                &mut rig,
                                &mut self.mux,
                                &self.shared.control,
                                self.gestures.as_ref(),
                                &self.config,
                            )
                            .await;
                        }
                        self.finish_handler();
                    }
                }
                OperationState::Enrolling => {
                    match operation {
                        Some(OperationRequest::Enroll(params)) => {
                            let mut rig = self.rig.lock().await;
                            capture::run_enroll(
                                &mut rig,
                                &mut self.mux,
                                &self.shared.control,
                                &self.notifier,
                                &self.config,
                                params,
                            )
                            .await;
                        }
                        _ => {
                            warn!("enroll dispatched without staged parameters");
                            self.notifier
                                .error(Error::rejected("Enrolling", "no operation staged"));
                        }
                    }
                    self.finish_handler();
                }
                OperationState::Authenticating => {
                    match operation {
                        Some(OperationRequest::Authenticate(params)) => {
                            let mut rig = self.rig.lock().await;
                            capture::run_authenticate(
                                &mut rig,
                                &mut self.mux,
                                &self.shared.control,
                                &self.notifier,
                                &self.config,
                                params,
                            )
                            .await;
                        }
                        _ => {
                            warn!("authenticate dispatched without staged parameters");
                            self.notifier
                                .error(Error::rejected("Authenticating", "no operation staged"));
                        }
                    }
                    self.finish_handler();
                }
            }
        }
        debug!("worker loop exited");
    }

    /// The single serialization point for state changes: take the
    /// desired state, clear the control signal, apply, publish. Clearing
    /// and taking happen under the same lock writers use, so a raise is
    /// consumed if and only if its request is.
    fn consume_pending_transition(&self) -> (OperationState, Option<OperationRequest>) {
        let mut pending = self.shared.pending.lock().expect("pending lock poisoned");
        self.shared.control.clear();
        let current = *self.shared.state_tx.borrow();
        if current == OperationState::Stopped {
            return (current, None);
        }
        match pending.take() {
            Some((ticket, request)) if current.can_transition_to(&request.target) => {
                let TransitionRequest { target, operation } = request;
                if target != current {
                    info!(from = %current, to = %target, "state transition");
                }
                self.shared.state_tx.send_replace(target);
                self.shared.applied_tx.send_replace(ticket);
                (target, operation)
            }
            Some((_, request)) => {
                warn!(%current, target = %request.target, "dropping invalid transition request");
                (current, None)
            }
            None => (current, None),
        }
    }

    /// After a handler returns, fall back to `Idle` unless a new
    /// transition is already pending.
    fn finish_handler(&self) {
        let pending = self.shared.pending.lock().expect("pending lock poisoned");
        if pending.is_none() {
            self.shared.state_tx.send_replace(OperationState::Idle);
        }
    }
}
