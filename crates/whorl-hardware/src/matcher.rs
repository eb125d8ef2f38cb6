//! Wire adapter from the typed [`Matcher`] operations onto a raw
//! [`SecureChannel`].
//!
//! Requests are encoded little-endian into a scratch buffer; replies come
//! back in the same buffer plus a status code. Replies that are too short
//! for their advertised shape are rejected as invalid data, which the
//! service layer surfaces as a protocol mismatch.

use crate::commands;
use crate::error::{HardwareError, Result};
use crate::traits::{Matcher, SecureChannel};
use crate::types::{CaptureOutcome, EnrollUpdate, Gesture, IdentifyDecision, WorkMode};
use bytes::{Buf, BufMut, BytesMut};
use whorl_core::constants::MAX_ENROLLED_PRINTS;
use whorl_core::{AuthToken, AuthenticatorType, FingerId, GroupId};

/// Identify replies that carry a match: finger id, score, and a full
/// result token.
const IDENTIFY_MATCH_LEN: usize = 4 + 4 + TOKEN_LEN;
/// Serialized [`AuthToken`]: four u64 fields plus the 32-byte hmac.
const TOKEN_LEN: usize = 8 * 4 + 32;
/// Enroll step replies: percentage, dx, dy, score.
const ENROLL_STEP_LEN: usize = 4 * 4;

/// [`Matcher`] implementation over any [`SecureChannel`].
pub struct SecureMatcher<C> {
    channel: C,
    navigation: bool,
    /// Cached template-set id, dropped whenever the set changes.
    database_id: Option<u64>,
}

impl<C: SecureChannel> SecureMatcher<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            navigation: false,
            database_id: None,
        }
    }

    /// Enable gesture navigation for parts that support it.
    #[must_use]
    pub fn with_navigation(mut self, supported: bool) -> Self {
        self.navigation = supported;
        self
    }

    fn check_status(operation: &str, status: i32) -> Result<()> {
        if status != 0 {
            return Err(HardwareError::communication(format!(
                "{operation} failed with status {status}"
            )));
        }
        Ok(())
    }

    fn put_token(buffer: &mut BytesMut, token: &AuthToken) {
        buffer.put_u64_le(token.challenge);
        buffer.put_u64_le(token.user_id);
        buffer.put_u64_le(token.authenticator_id);
        buffer.put_u64_le(token.timestamp);
        buffer.put_slice(&token.hmac);
    }

    fn get_token(buffer: &mut BytesMut) -> Result<AuthToken> {
        if buffer.remaining() < TOKEN_LEN {
            return Err(HardwareError::invalid_data(format!(
                "token reply too short: {} bytes, expected {}",
                buffer.remaining(),
                TOKEN_LEN
            )));
        }
        let mut token = AuthToken::empty();
        token.challenge = buffer.get_u64_le();
        token.user_id = buffer.get_u64_le();
        token.authenticator_id = buffer.get_u64_le();
        token.timestamp = buffer.get_u64_le();
        buffer.copy_to_slice(&mut token.hmac);
        token.authenticator_type = AuthenticatorType::Fingerprint;
        Ok(token)
    }
}

impl<C: SecureChannel> Matcher for SecureMatcher<C> {
    async fn set_work_mode(&mut self, mode: WorkMode) -> Result<()> {
        let payload = mode.as_u32().to_le_bytes();
        let status = self.channel.send(commands::SET_WORK_MODE, &payload).await?;
        Self::check_status("set_work_mode", status)
    }

    async fn set_spi(&mut self, enabled: bool) -> Result<()> {
        let payload = u32::from(enabled).to_le_bytes();
        let status = self.channel.send(commands::SET_SPI, &payload).await?;
        Self::check_status("set_spi", status)
    }

    async fn calibrate(&mut self) -> Result<()> {
        let status = self.channel.send(commands::CALIBRATE, &[]).await?;
        Self::check_status("calibrate", status)
    }

    async fn acquire_image(&mut self) -> Result<CaptureOutcome> {
        let status = self.channel.send(commands::CAPTURE_IMAGE, &[]).await?;
        Ok(CaptureOutcome::from_status(status))
    }

    async fn is_finger_lost(&mut self, poll_ms: u32) -> Result<CaptureOutcome> {
        let payload = poll_ms.to_le_bytes();
        let status = self.channel.send(commands::WAIT_FINGER_LOST, &payload).await?;
        Ok(CaptureOutcome::from_status(status))
    }

    async fn init_enroll(&mut self, user_id: u64) -> Result<()> {
        let mut buffer = BytesMut::with_capacity(8);
        buffer.put_u64_le(user_id);
        let status = self
            .channel
            .send_with_buffer(commands::BEGIN_ENROLL, &mut buffer)
            .await?;
        Self::check_status("init_enroll", status)
    }

    async fn enroll_step(&mut self, finger_present: bool) -> Result<EnrollUpdate> {
        let mut buffer = BytesMut::with_capacity(ENROLL_STEP_LEN);
        buffer.put_u32_le(u32::from(finger_present));
        let status = self
            .channel
            .send_with_buffer(commands::ENROLL_STEP, &mut buffer)
            .await?;

        if buffer.remaining() < ENROLL_STEP_LEN {
            return Err(HardwareError::invalid_data(format!(
                "enroll step reply too short: {} bytes, expected {}",
                buffer.remaining(),
                ENROLL_STEP_LEN
            )));
        }

        let percentage = buffer.get_u32_le().min(100) as u8;
        let dx = buffer.get_i32_le();
        let dy = buffer.get_i32_le();
        let score = buffer.get_i32_le();
        Ok(EnrollUpdate {
            outcome: CaptureOutcome::from_status(status),
            percentage,
            dx,
            dy,
            score,
        })
    }

    async fn finalize_enroll(&mut self) -> Result<()> {
        let status = self.channel.send(commands::END_ENROLL, &[]).await?;
        Self::check_status("finalize_enroll", status)
    }

    async fn save_enrolled_print(&mut self, group: GroupId, finger: FingerId) -> Result<()> {
        let mut buffer = BytesMut::with_capacity(8);
        buffer.put_u32_le(group.as_u32());
        buffer.put_u32_le(finger.as_u32());
        let status = self
            .channel
            .send_with_buffer(commands::SAVE_ENROLLED_PRINT, &mut buffer)
            .await?;
        // The template set changed; the cached id is stale.
        self.database_id = None;
        Self::check_status("save_enrolled_print", status)
    }

    async fn init_identify(&mut self) -> Result<()> {
        let status = self.channel.send(commands::BEGIN_IDENTIFY, &[]).await?;
        Self::check_status("init_identify", status)
    }

    async fn identify(&mut self, group: GroupId, challenge: u64) -> Result<IdentifyDecision> {
        let mut buffer = BytesMut::with_capacity(IDENTIFY_MATCH_LEN);
        buffer.put_u32_le(group.as_u32());
        buffer.put_u64_le(challenge);
        let status = self
            .channel
            .send_with_buffer(commands::IDENTIFY, &mut buffer)
            .await?;

        match status {
            0 => {
                if buffer.remaining() < IDENTIFY_MATCH_LEN {
                    return Err(HardwareError::invalid_data(format!(
                        "identify reply too short: {} bytes, expected {}",
                        buffer.remaining(),
                        IDENTIFY_MATCH_LEN
                    )));
                }
                let finger = FingerId::new(buffer.get_u32_le());
                let score = buffer.get_i32_le();
                let token = Self::get_token(&mut buffer)?;
                Ok(IdentifyDecision::Match {
                    finger,
                    score,
                    token,
                })
            }
            1 | 2 => Ok(IdentifyDecision::NoMatch),
            other => Ok(IdentifyDecision::Retry(CaptureOutcome::from_status(other))),
        }
    }

    async fn update_template(&mut self) -> Result<bool> {
        let status = self.channel.send(commands::UPDATE_TEMPLATE, &[]).await?;
        if status < 0 {
            return Err(HardwareError::communication(format!(
                "update_template failed with status {status}"
            )));
        }
        Ok(status != 0)
    }

    async fn save_template(&mut self) -> Result<()> {
        let status = self.channel.send(commands::SAVE_TEMPLATE, &[]).await?;
        Self::check_status("save_template", status)
    }

    async fn finalize_identify(&mut self) -> Result<()> {
        let status = self.channel.send(commands::END_IDENTIFY, &[]).await?;
        Self::check_status("finalize_identify", status)
    }

    async fn list_prints(&mut self, group: GroupId) -> Result<Vec<FingerId>> {
        let mut buffer = BytesMut::with_capacity(4 + 4 * MAX_ENROLLED_PRINTS);
        buffer.put_u32_le(group.as_u32());
        let status = self
            .channel
            .send_with_buffer(commands::GET_FINGERPRINTS, &mut buffer)
            .await?;
        Self::check_status("list_prints", status)?;

        if buffer.remaining() < 4 {
            return Err(HardwareError::invalid_data(
                "fingerprint list reply missing count",
            ));
        }
        let count = buffer.get_u32_le() as usize;
        if count > MAX_ENROLLED_PRINTS {
            return Err(HardwareError::invalid_data(format!(
                "fingerprint list claims {count} entries, limit is {MAX_ENROLLED_PRINTS}"
            )));
        }
        if buffer.remaining() < 4 * count {
            return Err(HardwareError::invalid_data(format!(
                "fingerprint list truncated: {count} entries, {} bytes",
                buffer.remaining()
            )));
        }
        Ok((0..count)
            .map(|_| FingerId::new(buffer.get_u32_le()))
            .collect())
    }

    async fn remove_print(&mut self, group: GroupId, finger: FingerId) -> Result<()> {
        let mut buffer = BytesMut::with_capacity(8);
        buffer.put_u32_le(group.as_u32());
        buffer.put_u32_le(finger.as_u32());
        let status = self
            .channel
            .send_with_buffer(commands::DELETE_FINGERPRINT, &mut buffer)
            .await?;
        self.database_id = None;
        Self::check_status("remove_print", status)
    }

    async fn set_group(&mut self, group: GroupId) -> Result<()> {
        let payload = group.as_u32().to_le_bytes();
        let status = self.channel.send(commands::SET_GROUP, &payload).await?;
        Self::check_status("set_group", status)
    }

    async fn load_database(&mut self, path: &str) -> Result<()> {
        let status = self
            .channel
            .send(commands::LOAD_DB, path.as_bytes())
            .await?;
        self.database_id = None;
        Self::check_status("load_database", status)
    }

    async fn load_empty_database(&mut self) -> Result<()> {
        let status = self.channel.send(commands::LOAD_EMPTY_DB, &[]).await?;
        self.database_id = None;
        Self::check_status("load_empty_database", status)
    }

    async fn store_database(&mut self, path: &str) -> Result<()> {
        let status = self
            .channel
            .send(commands::STORE_DB, path.as_bytes())
            .await?;
        Self::check_status("store_database", status)
    }

    async fn database_id(&mut self) -> Result<u64> {
        if let Some(id) = self.database_id {
            return Ok(id);
        }
        let mut buffer = BytesMut::with_capacity(8);
        let status = self
            .channel
            .send_with_buffer(commands::GET_TEMPLATE_ID, &mut buffer)
            .await?;
        Self::check_status("database_id", status)?;
        if buffer.remaining() < 8 {
            return Err(HardwareError::invalid_data("template id reply too short"));
        }
        let id = buffer.get_u64_le();
        self.database_id = Some(id);
        Ok(id)
    }

    async fn load_enroll_challenge(&mut self) -> Result<u64> {
        let mut buffer = BytesMut::with_capacity(8);
        let status = self
            .channel
            .send_with_buffer(commands::GET_AUTH_CHALLENGE, &mut buffer)
            .await?;
        Self::check_status("load_enroll_challenge", status)?;
        if buffer.remaining() < 8 {
            return Err(HardwareError::invalid_data("challenge reply too short"));
        }
        Ok(buffer.get_u64_le())
    }

    async fn verify_enroll_token(&mut self, token: &AuthToken) -> Result<()> {
        let mut buffer = BytesMut::with_capacity(TOKEN_LEN);
        Self::put_token(&mut buffer, token);
        let status = self
            .channel
            .send_with_buffer(commands::AUTHORIZE_ENROLL, &mut buffer)
            .await?;
        Self::check_status("verify_enroll_token", status)
    }

    async fn set_auth_challenge(&mut self, challenge: u64) -> Result<()> {
        let payload = challenge.to_le_bytes();
        let status = self
            .channel
            .send(commands::SET_AUTH_CHALLENGE, &payload)
            .await?;
        Self::check_status("set_auth_challenge", status)
    }

    fn navigation_supported(&self) -> bool {
        self.navigation
    }

    async fn next_gesture(&mut self) -> Result<Option<Gesture>> {
        let mut buffer = BytesMut::with_capacity(4);
        let status = self
            .channel
            .send_with_buffer(commands::NAVIGATION_POLL, &mut buffer)
            .await?;
        Self::check_status("next_gesture", status)?;
        if buffer.remaining() < 4 {
            return Err(HardwareError::invalid_data("navigation reply too short"));
        }
        // Gesture codes follow the vendor convention; 0 means nothing
        // happened and 1 is a finger-gone artifact, not a gesture.
        Ok(match buffer.get_u32_le() {
            2 => Some(Gesture::Hold),
            3 => Some(Gesture::Up),
            4 => Some(Gesture::Down),
            5 => Some(Gesture::Left),
            6 => Some(Gesture::Right),
            7 => Some(Gesture::DoubleTap),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::Command;
    use std::collections::VecDeque;

    /// Scripted channel: pops one (status, reply) per call and records
    /// which commands were sent.
    #[derive(Default)]
    struct ScriptedChannel {
        replies: VecDeque<(i32, Vec<u8>)>,
        sent: Vec<Command>,
    }

    impl ScriptedChannel {
        fn push(&mut self, status: i32, reply: &[u8]) {
            self.replies.push_back((status, reply.to_vec()));
        }
    }

    impl SecureChannel for ScriptedChannel {
        async fn send(&mut self, command: Command, _payload: &[u8]) -> Result<i32> {
            self.sent.push(command);
            let (status, _) = self
                .replies
                .pop_front()
                .ok_or_else(|| HardwareError::communication("unscripted command"))?;
            Ok(status)
        }

        async fn send_with_buffer(
            &mut self,
            command: Command,
            buffer: &mut BytesMut,
        ) -> Result<i32> {
            self.sent.push(command);
            let (status, reply) = self
                .replies
                .pop_front()
                .ok_or_else(|| HardwareError::communication("unscripted command"))?;
            buffer.clear();
            buffer.extend_from_slice(&reply);
            Ok(status)
        }
    }

    fn token_bytes(challenge: u64) -> Vec<u8> {
        let mut buffer = BytesMut::new();
        let mut token = AuthToken::for_challenge(challenge);
        token.user_id = 11;
        token.hmac = [0xAB; 32];
        SecureMatcher::<ScriptedChannel>::put_token(&mut buffer, &token);
        buffer.to_vec()
    }

    #[tokio::test]
    async fn test_acquire_image_maps_status() {
        let mut channel = ScriptedChannel::default();
        channel.push(8, &[]);
        let mut matcher = SecureMatcher::new(channel);

        let outcome = matcher.acquire_image().await.unwrap();
        assert_eq!(outcome, CaptureOutcome::Partial);
    }

    #[tokio::test]
    async fn test_enroll_step_parses_reply() {
        let mut channel = ScriptedChannel::default();
        let mut reply = BytesMut::new();
        reply.put_u32_le(40);
        reply.put_i32_le(-2);
        reply.put_i32_le(3);
        reply.put_i32_le(88);
        channel.push(0, &reply);

        let mut matcher = SecureMatcher::new(channel);
        let update = matcher.enroll_step(true).await.unwrap();
        assert_eq!(update.outcome, CaptureOutcome::Good);
        assert_eq!(update.percentage, 40);
        assert_eq!(update.dx, -2);
        assert_eq!(update.score, 88);
    }

    #[tokio::test]
    async fn test_enroll_step_short_reply_is_invalid_data() {
        let mut channel = ScriptedChannel::default();
        channel.push(0, &[1, 2, 3]);
        let mut matcher = SecureMatcher::new(channel);

        let err = matcher.enroll_step(true).await.unwrap_err();
        assert!(matches!(err, HardwareError::InvalidData { .. }));
    }

    #[tokio::test]
    async fn test_identify_match() {
        let mut channel = ScriptedChannel::default();
        let mut reply = BytesMut::new();
        reply.put_u32_le(4);
        reply.put_i32_le(9000);
        reply.extend_from_slice(&token_bytes(0x55));
        channel.push(0, &reply);

        let mut matcher = SecureMatcher::new(channel);
        match matcher.identify(GroupId::new(0), 0x55).await.unwrap() {
            IdentifyDecision::Match {
                finger,
                score,
                token,
            } => {
                assert_eq!(finger, FingerId::new(4));
                assert_eq!(score, 9000);
                assert_eq!(token.challenge, 0x55);
                assert_eq!(token.hmac, [0xAB; 32]);
            }
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_identify_no_match_and_retry() {
        let mut channel = ScriptedChannel::default();
        channel.push(1, &[]);
        channel.push(7, &[]);
        let mut matcher = SecureMatcher::new(channel);

        assert!(matches!(
            matcher.identify(GroupId::new(0), 0).await.unwrap(),
            IdentifyDecision::NoMatch
        ));
        assert!(matches!(
            matcher.identify(GroupId::new(0), 0).await.unwrap(),
            IdentifyDecision::Retry(CaptureOutcome::ImagerDirty)
        ));
    }

    #[tokio::test]
    async fn test_list_prints_rejects_oversized_count() {
        let mut channel = ScriptedChannel::default();
        let mut reply = BytesMut::new();
        reply.put_u32_le(MAX_ENROLLED_PRINTS as u32 + 1);
        channel.push(0, &reply);

        let mut matcher = SecureMatcher::new(channel);
        let err = matcher.list_prints(GroupId::new(0)).await.unwrap_err();
        assert!(matches!(err, HardwareError::InvalidData { .. }));
    }

    #[tokio::test]
    async fn test_list_prints_parses_ids() {
        let mut channel = ScriptedChannel::default();
        let mut reply = BytesMut::new();
        reply.put_u32_le(2);
        reply.put_u32_le(3);
        reply.put_u32_le(8);
        channel.push(0, &reply);

        let mut matcher = SecureMatcher::new(channel);
        let prints = matcher.list_prints(GroupId::new(0)).await.unwrap();
        assert_eq!(prints, vec![FingerId::new(3), FingerId::new(8)]);
    }

    #[tokio::test]
    async fn test_database_id_cached_until_set_changes() {
        let mut channel = ScriptedChannel::default();
        let mut reply = BytesMut::new();
        reply.put_u64_le(0xFEED);
        channel.push(0, &reply);
        // remove_print reply:
        channel.push(0, &[]);
        let mut reply2 = BytesMut::new();
        reply2.put_u64_le(0xBEEF);
        channel.push(0, &reply2);

        let mut matcher = SecureMatcher::new(channel);
        assert_eq!(matcher.database_id().await.unwrap(), 0xFEED);
        // Cached: no new command issued.
        assert_eq!(matcher.database_id().await.unwrap(), 0xFEED);

        matcher
            .remove_print(GroupId::new(0), FingerId::new(3))
            .await
            .unwrap();
        assert_eq!(matcher.database_id().await.unwrap(), 0xBEEF);
    }

    #[tokio::test]
    async fn test_gesture_mapping() {
        let mut channel = ScriptedChannel::default();
        for code in [3u32, 0] {
            let mut reply = BytesMut::new();
            reply.put_u32_le(code);
            channel.push(0, &reply);
        }
        let mut matcher = SecureMatcher::new(channel).with_navigation(true);

        assert!(matcher.navigation_supported());
        assert_eq!(matcher.next_gesture().await.unwrap(), Some(Gesture::Up));
        assert_eq!(matcher.next_gesture().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_control_failure_status() {
        let mut channel = ScriptedChannel::default();
        channel.push(-7, &[]);
        let mut matcher = SecureMatcher::new(channel);

        let err = matcher.set_work_mode(WorkMode::Detect).await.unwrap_err();
        assert!(matches!(err, HardwareError::CommunicationError { .. }));
    }
}
