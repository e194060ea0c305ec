//! Channel membership verification. Lookup faults are folded into "not a
//! member" so verification can only ever err on the side of denying.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use thiserror::Error;
use tracing::warn;

use crate::model::{Channel, ChannelHandle, UserId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MembershipError {
    #[error("channel {0} is unknown to the platform")]
    UnknownChannel(String),
    #[error("membership lookup failed: {0}")]
    Lookup(String),
}

#[async_trait]
pub trait MembershipChecker: Send + Sync {
    async fn is_channel_member(
        &self,
        channel: &ChannelHandle,
        user: UserId,
    ) -> Result<bool, MembershipError>;
}

#[derive(Clone)]
pub struct MembershipVerifier {
    checker: Arc<dyn MembershipChecker>,
}

impl MembershipVerifier {
    pub fn new(checker: Arc<dyn MembershipChecker>) -> Self {
        Self { checker }
    }

    pub async fn is_member(&self, user: UserId, channel: &ChannelHandle) -> bool {
        match self.checker.is_channel_member(channel, user).await {
            Ok(member) => member,
            Err(err) => {
                counter!("keydrop_membership_lookups_total", "result" => "error").increment(1);
                warn!(%user, channel = %channel, ?err, "membership lookup failed; treating as non-member");
                false
            }
        }
    }

    /// Logical AND over `channels`; an empty set is vacuously satisfied.
    pub async fn verify_all(&self, user: UserId, channels: &[Channel]) -> bool {
        for channel in channels {
            if !self.is_member(user, &channel.handle).await {
                return false;
            }
        }
        true
    }

    /// Channels the user has not joined, in configuration order.
    pub async fn missing_channels(&self, user: UserId, channels: &[Channel]) -> Vec<Channel> {
        let mut missing = Vec::new();
        for channel in channels {
            if !self.is_member(user, &channel.handle).await {
                missing.push(channel.clone());
            }
        }
        missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct MockChecker {
        members: HashSet<(String, i64)>,
        broken: HashSet<String>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MembershipChecker for MockChecker {
        async fn is_channel_member(
            &self,
            channel: &ChannelHandle,
            user: UserId,
        ) -> Result<bool, MembershipError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.broken.contains(channel.as_str()) {
                return Err(MembershipError::Lookup("timeout".into()));
            }
            Ok(self
                .members
                .contains(&(channel.as_str().to_string(), user.get())))
        }
    }

    fn channel(name: &str) -> Channel {
        Channel {
            handle: ChannelHandle::new(name),
            link: None,
        }
    }

    #[tokio::test]
    async fn empty_channel_set_is_vacuously_true() {
        let verifier = MembershipVerifier::new(Arc::new(MockChecker::default()));
        assert!(verifier.verify_all(UserId::new(1), &[]).await);
    }

    #[tokio::test]
    async fn requires_every_channel() {
        let mut checker = MockChecker::default();
        checker.members.insert(("news".into(), 1));
        checker.members.insert(("chat".into(), 1));
        checker.members.insert(("news".into(), 2));
        let verifier = MembershipVerifier::new(Arc::new(checker));
        let channels = [channel("news"), channel("chat")];

        assert!(verifier.verify_all(UserId::new(1), &channels).await);
        assert!(!verifier.verify_all(UserId::new(2), &channels).await);
        let missing = verifier.missing_channels(UserId::new(2), &channels).await;
        assert_eq!(missing, vec![channel("chat")]);
    }

    #[tokio::test]
    async fn lookup_faults_count_as_not_member() {
        let mut checker = MockChecker::default();
        checker.members.insert(("news".into(), 1));
        checker.broken.insert("news".into());
        let verifier = MembershipVerifier::new(Arc::new(checker));

        assert!(
            !verifier
                .is_member(UserId::new(1), &ChannelHandle::new("news"))
                .await
        );
    }
}
