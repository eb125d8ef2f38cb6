//! Mock secure-channel matcher.
//!
//! Implements [`Matcher`] directly from a script instead of going through
//! the wire adapter, so coordinator tests can feed typed outcomes and
//! assert on the exact sequence of operations the loops issued.

use crate::error::{HardwareError, Result};
use crate::traits::Matcher;
use crate::types::{CaptureOutcome, EnrollUpdate, Gesture, IdentifyDecision, WorkMode};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use whorl_core::{AuthToken, FingerId, GroupId};

/// One recorded matcher operation, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatcherCall {
    SetWorkMode(WorkMode),
    SetSpi(bool),
    Calibrate,
    AcquireImage,
    IsFingerLost,
    InitEnroll,
    EnrollStep,
    FinalizeEnroll,
    SaveEnrolledPrint(GroupId, FingerId),
    InitIdentify,
    Identify,
    UpdateTemplate,
    SaveTemplate,
    FinalizeIdentify,
    ListPrints,
    RemovePrint(GroupId, FingerId),
    SetGroup(GroupId),
    LoadDatabase(String),
    LoadEmptyDatabase,
    StoreDatabase(String),
    DatabaseId,
    LoadEnrollChallenge,
    VerifyEnrollToken,
    SetAuthChallenge(u64),
    NextGesture,
}

#[derive(Debug)]
struct MatcherState {
    images: VecDeque<CaptureOutcome>,
    enroll_steps: VecDeque<EnrollUpdate>,
    identify_results: VecDeque<IdentifyDecision>,
    finger_lost: VecDeque<CaptureOutcome>,
    gestures: VecDeque<Gesture>,
    prints: Vec<FingerId>,
    challenge: u64,
    database_id: u64,
    template_updated: bool,
    reject_enroll_token: bool,
    navigation: bool,
    work_mode: WorkMode,
    spi: bool,
    calls: Vec<MatcherCall>,
}

impl Default for MatcherState {
    fn default() -> Self {
        Self {
            images: VecDeque::new(),
            enroll_steps: VecDeque::new(),
            identify_results: VecDeque::new(),
            finger_lost: VecDeque::new(),
            gestures: VecDeque::new(),
            prints: Vec::new(),
            challenge: 0,
            database_id: 1,
            template_updated: false,
            reject_enroll_token: false,
            navigation: false,
            work_mode: WorkMode::Sleep,
            spi: false,
            calls: Vec::new(),
        }
    }
}

/// Scripted [`Matcher`] for driving the coordinator without hardware.
///
/// Unscripted image acquisitions classify as `Nothing` (sending the loop
/// back to waiting for a finger) and unscripted finger-lost polls report
/// `Lost` (letting the next cycle start immediately); both keep flows
/// well-behaved when a test only scripts the interesting part.
#[derive(Debug)]
pub struct MockMatcher {
    state: Arc<Mutex<MatcherState>>,
}

impl MockMatcher {
    pub fn new() -> (Self, MockMatcherHandle) {
        let state = Arc::new(Mutex::new(MatcherState::default()));
        (
            Self {
                state: state.clone(),
            },
            MockMatcherHandle { state },
        )
    }

    fn record(&self, call: MatcherCall) {
        self.state
            .lock()
            .expect("matcher state poisoned")
            .calls
            .push(call);
    }
}

impl Matcher for MockMatcher {
    async fn set_work_mode(&mut self, mode: WorkMode) -> Result<()> {
        let mut state = self.state.lock().expect("matcher state poisoned");
        state.work_mode = mode;
        state.calls.push(MatcherCall::SetWorkMode(mode));
        Ok(())
    }

    async fn set_spi(&mut self, enabled: bool) -> Result<()> {
        let mut state = self.state.lock().expect("matcher state poisoned");
        state.spi = enabled;
        state.calls.push(MatcherCall::SetSpi(enabled));
        Ok(())
    }

    async fn calibrate(&mut self) -> Result<()> {
        self.record(MatcherCall::Calibrate);
        Ok(())
    }

    async fn acquire_image(&mut self) -> Result<CaptureOutcome> {
        let mut state = self.state.lock().expect("matcher state poisoned");
        state.calls.push(MatcherCall::AcquireImage);
        Ok(state.images.pop_front().unwrap_or(CaptureOutcome::Nothing))
    }

    async fn is_finger_lost(&mut self, _poll_ms: u32) -> Result<CaptureOutcome> {
        let mut state = self.state.lock().expect("matcher state poisoned");
        state.calls.push(MatcherCall::IsFingerLost);
        Ok(state
            .finger_lost
            .pop_front()
            .unwrap_or(CaptureOutcome::Lost))
    }

    async fn init_enroll(&mut self, _user_id: u64) -> Result<()> {
        self.record(MatcherCall::InitEnroll);
        Ok(())
    }

    async fn enroll_step(&mut self, _finger_present: bool) -> Result<EnrollUpdate> {
        let mut state = self.state.lock().expect("matcher state poisoned");
        state.calls.push(MatcherCall::EnrollStep);
        state
            .enroll_steps
            .pop_front()
            .ok_or_else(|| HardwareError::invalid_data("enroll step not scripted"))
    }

    async fn finalize_enroll(&mut self) -> Result<()> {
        self.record(MatcherCall::FinalizeEnroll);
        Ok(())
    }

    async fn save_enrolled_print(&mut self, group: GroupId, finger: FingerId) -> Result<()> {
        let mut state = self.state.lock().expect("matcher state poisoned");
        state.calls.push(MatcherCall::SaveEnrolledPrint(group, finger));
        state.prints.push(finger);
        Ok(())
    }

    async fn init_identify(&mut self) -> Result<()> {
        self.record(MatcherCall::InitIdentify);
        Ok(())
    }

    async fn identify(&mut self, _group: GroupId, _challenge: u64) -> Result<IdentifyDecision> {
        let mut state = self.state.lock().expect("matcher state poisoned");
        state.calls.push(MatcherCall::Identify);
        Ok(state
            .identify_results
            .pop_front()
            .unwrap_or(IdentifyDecision::NoMatch))
    }

    async fn update_template(&mut self) -> Result<bool> {
        let mut state = self.state.lock().expect("matcher state poisoned");
        state.calls.push(MatcherCall::UpdateTemplate);
        Ok(state.template_updated)
    }

    async fn save_template(&mut self) -> Result<()> {
        self.record(MatcherCall::SaveTemplate);
        Ok(())
    }

    async fn finalize_identify(&mut self) -> Result<()> {
        self.record(MatcherCall::FinalizeIdentify);
        Ok(())
    }

    async fn list_prints(&mut self, _group: GroupId) -> Result<Vec<FingerId>> {
        let mut state = self.state.lock().expect("matcher state poisoned");
        state.calls.push(MatcherCall::ListPrints);
        Ok(state.prints.clone())
    }

    async fn remove_print(&mut self, group: GroupId, finger: FingerId) -> Result<()> {
        let mut state = self.state.lock().expect("matcher state poisoned");
        state.calls.push(MatcherCall::RemovePrint(group, finger));
        let before = state.prints.len();
        state.prints.retain(|&f| f != finger);
        if state.prints.len() == before {
            return Err(HardwareError::communication(format!(
                "no template with id {finger}"
            )));
        }
        Ok(())
    }

    async fn set_group(&mut self, group: GroupId) -> Result<()> {
        self.record(MatcherCall::SetGroup(group));
        Ok(())
    }

    async fn load_database(&mut self, path: &str) -> Result<()> {
        self.record(MatcherCall::LoadDatabase(path.to_string()));
        Ok(())
    }

    async fn load_empty_database(&mut self) -> Result<()> {
        self.record(MatcherCall::LoadEmptyDatabase);
        Ok(())
    }

    async fn store_database(&mut self, path: &str) -> Result<()> {
        self.record(MatcherCall::StoreDatabase(path.to_string()));
        Ok(())
    }

    async fn database_id(&mut self) -> Result<u64> {
        let mut state = self.state.lock().expect("matcher state poisoned");
        state.calls.push(MatcherCall::DatabaseId);
        Ok(state.database_id)
    }

    async fn load_enroll_challenge(&mut self) -> Result<u64> {
        let mut state = self.state.lock().expect("matcher state poisoned");
        state.calls.push(MatcherCall::LoadEnrollChallenge);
        Ok(state.challenge)
    }

    async fn verify_enroll_token(&mut self, _token: &AuthToken) -> Result<()> {
        let mut state = self.state.lock().expect("matcher state poisoned");
        state.calls.push(MatcherCall::VerifyEnrollToken);
        if state.reject_enroll_token {
            return Err(HardwareError::communication("enroll token rejected"));
        }
        Ok(())
    }

    async fn set_auth_challenge(&mut self, challenge: u64) -> Result<()> {
        self.record(MatcherCall::SetAuthChallenge(challenge));
        Ok(())
    }

    fn navigation_supported(&self) -> bool {
        self.state
            .lock()
            .expect("matcher state poisoned")
            .navigation
    }

    async fn next_gesture(&mut self) -> Result<Option<Gesture>> {
        let mut state = self.state.lock().expect("matcher state poisoned");
        state.calls.push(MatcherCall::NextGesture);
        Ok(state.gestures.pop_front())
    }
}

/// Handle for scripting a [`MockMatcher`] and inspecting what it saw.
#[derive(Debug, Clone)]
pub struct MockMatcherHandle {
    state: Arc<Mutex<MatcherState>>,
}

impl MockMatcherHandle {
    fn lock(&self) -> std::sync::MutexGuard<'_, MatcherState> {
        self.state.lock().expect("matcher state poisoned")
    }

    /// Queue one image classification.
    pub fn push_image(&self, outcome: CaptureOutcome) {
        self.lock().images.push_back(outcome);
    }

    /// Queue several image classifications.
    pub fn push_images(&self, outcomes: impl IntoIterator<Item = CaptureOutcome>) {
        self.lock().images.extend(outcomes);
    }

    /// Queue one enroll step result.
    pub fn push_enroll_step(&self, update: EnrollUpdate) {
        self.lock().enroll_steps.push_back(update);
    }

    /// Queue a successful enroll step advancing to `percentage`.
    pub fn push_enroll_progress(&self, percentage: u8) {
        self.push_enroll_step(EnrollUpdate::advanced(percentage));
    }

    /// Queue one identify decision.
    pub fn push_identify(&self, decision: IdentifyDecision) {
        self.lock().identify_results.push_back(decision);
    }

    /// Queue one finger-lost poll result (the default is `Lost`).
    pub fn push_finger_lost(&self, outcome: CaptureOutcome) {
        self.lock().finger_lost.push_back(outcome);
    }

    /// Queue one navigation gesture.
    pub fn push_gesture(&self, gesture: Gesture) {
        self.lock().gestures.push_back(gesture);
    }

    /// Replace the enrolled print list.
    pub fn set_prints(&self, prints: Vec<FingerId>) {
        self.lock().prints = prints;
    }

    /// Current enrolled print list.
    pub fn prints(&self) -> Vec<FingerId> {
        self.lock().prints.clone()
    }

    /// Set the enroll challenge returned by `load_enroll_challenge`.
    pub fn set_challenge(&self, challenge: u64) {
        self.lock().challenge = challenge;
    }

    /// Set the template-set id.
    pub fn set_database_id(&self, id: u64) {
        self.lock().database_id = id;
    }

    /// Make `update_template` report a change.
    pub fn set_template_updated(&self, updated: bool) {
        self.lock().template_updated = updated;
    }

    /// Make `verify_enroll_token` fail.
    pub fn reject_enroll_token(&self) {
        self.lock().reject_enroll_token = true;
    }

    /// Advertise gesture navigation support.
    pub fn set_navigation(&self, supported: bool) {
        self.lock().navigation = supported;
    }

    /// Current work mode as last set by the coordinator.
    pub fn work_mode(&self) -> WorkMode {
        self.lock().work_mode
    }

    /// Current SPI link state.
    pub fn spi(&self) -> bool {
        self.lock().spi
    }

    /// Every operation issued so far, in order.
    pub fn calls(&self) -> Vec<MatcherCall> {
        self.lock().calls.clone()
    }

    /// Drop the recorded call log.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }
}
