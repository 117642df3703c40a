use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use veranda_auth::{AuthorizationFlowManager, BackchannelPoll};
use veranda_core::config::UpgradeConfig;
use veranda_core::directory::ConversationDirectory;
use veranda_core::domain::ConversationId;
use veranda_core::errors::DomainError;

use crate::inventory::{InventoryClient, PreviewRequest};
use crate::notify::Notifier;

/// Scope set requested on a backchannel upgrade authorization.
const UPGRADE_SCOPES: [&str; 2] = ["openid", "booking_upgrade"];

/// Clock seam for the polling loop. Production sleeps on the tokio timer;
/// tests substitute an instant delay so the whole loop runs in one pass.
#[async_trait]
pub trait Delay: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default)]
pub struct TokioDelay;

#[async_trait]
impl Delay for TokioDelay {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Counts sleep requests and returns immediately.
#[derive(Debug, Default)]
pub struct InstantDelay {
    pub sleeps: std::sync::atomic::AtomicUsize,
}

#[async_trait]
impl Delay for InstantDelay {
    async fn sleep(&self, _duration: Duration) {
        self.sleeps.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}

/// Terminal state of one upgrade request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpgradeOutcome {
    /// User approved on their authenticator; the notification was built.
    Approved,
    /// Poll budget exhausted without an answer.
    TimedOut,
    /// Provider error, rejected authorization, or an unresolvable recipient.
    Failed,
}

/// Drives a room-upgrade approval in the background: wait a grace period,
/// start a backchannel authorization against the conversation's principal,
/// then poll until approval, denial, or the retry budget runs out. On
/// approval the guest gets a notification with their re-priced stay.
pub struct UpgradeCoordinator {
    auth: Arc<AuthorizationFlowManager>,
    inventory: Arc<dyn InventoryClient>,
    notifier: Arc<dyn Notifier>,
    directory: Arc<ConversationDirectory>,
    config: UpgradeConfig,
    delay: Arc<dyn Delay>,
}

impl UpgradeCoordinator {
    pub fn new(
        auth: Arc<AuthorizationFlowManager>,
        inventory: Arc<dyn InventoryClient>,
        notifier: Arc<dyn Notifier>,
        directory: Arc<ConversationDirectory>,
        config: UpgradeConfig,
        delay: Arc<dyn Delay>,
    ) -> Self {
        Self { auth, inventory, notifier, directory, config, delay }
    }

    /// Fire-and-forget entry point used by the chat tools; the caller returns
    /// an acknowledgement immediately while this task runs to completion.
    pub fn schedule(
        self: &Arc<Self>,
        conversation: ConversationId,
        booking_id: i64,
        room_id: i64,
    ) -> JoinHandle<UpgradeOutcome> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move { coordinator.run(conversation, booking_id, room_id).await })
    }

    pub async fn run(
        &self,
        conversation: ConversationId,
        booking_id: i64,
        room_id: i64,
    ) -> UpgradeOutcome {
        let scopes: Vec<String> = UPGRADE_SCOPES.iter().map(|s| s.to_string()).collect();

        // Grace period before pinging the user's authenticator, so the chat
        // response lands first.
        self.delay.sleep(Duration::from_secs(self.config.grace_secs)).await;

        let auth_req_id = match self
            .auth
            .initiate_backchannel_authorization(&conversation, &scopes)
            .await
        {
            Ok(auth_req_id) => auth_req_id,
            Err(error) => {
                warn!(
                    event_name = "upgrade.backchannel.start_failed",
                    conversation_id = %conversation,
                    error = %error,
                    "could not start backchannel authorization"
                );
                return UpgradeOutcome::Failed;
            }
        };

        let interval = Duration::from_secs(self.config.poll_interval_secs);
        self.delay.sleep(interval).await;

        let mut polls = 0;
        while polls < self.config.max_polls {
            polls += 1;
            match self.auth.poll_backchannel_authorization(&auth_req_id).await {
                BackchannelPoll::Success(token) => {
                    info!(
                        event_name = "upgrade.approved",
                        conversation_id = %conversation,
                        booking_id,
                        room_id,
                        polls,
                        "upgrade authorization approved"
                    );
                    return match self.deliver(&conversation, booking_id, room_id, &token).await
                    {
                        Ok(()) => UpgradeOutcome::Approved,
                        Err(error) => {
                            warn!(
                                event_name = "upgrade.notification.build_failed",
                                conversation_id = %conversation,
                                booking_id,
                                error = %error,
                                "approved but could not assemble notification"
                            );
                            UpgradeOutcome::Failed
                        }
                    };
                }
                BackchannelPoll::Pending | BackchannelPoll::SlowDown => {
                    self.delay.sleep(interval).await;
                }
                BackchannelPoll::Error(reason) => {
                    warn!(
                        event_name = "upgrade.backchannel.rejected",
                        conversation_id = %conversation,
                        booking_id,
                        reason = %reason,
                        "backchannel authorization failed"
                    );
                    return UpgradeOutcome::Failed;
                }
            }
        }

        info!(
            event_name = "upgrade.timed_out",
            conversation_id = %conversation,
            booking_id,
            polls,
            "poll budget exhausted without an answer"
        );
        UpgradeOutcome::TimedOut
    }

    /// Build and send the approval notification. A delivery failure is logged
    /// but does not demote the outcome; failing to resolve the recipient or
    /// the booking does.
    async fn deliver(
        &self,
        conversation: &ConversationId,
        booking_id: i64,
        room_id: i64,
        token: &str,
    ) -> Result<(), DomainError> {
        let principal = self
            .directory
            .resolve_principal(conversation)
            .await
            .ok_or_else(|| DomainError::PrincipalUnresolved(conversation.clone()))?;
        let claims = self
            .directory
            .claims(&principal)
            .await
            .ok_or_else(|| DomainError::ClaimsUnavailable(principal.clone()))?;
        let email =
            claims.email.ok_or_else(|| DomainError::ClaimsUnavailable(principal.clone()))?;

        let booking = self.inventory.booking(token, booking_id).await?;
        // The preview is priced against the upgrade target, not the room the
        // guest already holds.
        let preview = self
            .inventory
            .preview(
                token,
                &PreviewRequest {
                    room_id,
                    check_in: booking.check_in,
                    check_out: booking.check_out,
                },
            )
            .await?;

        let greeting = claims.username.as_deref().unwrap_or("Guest");
        let body = format!(
            "Hi {greeting}, your upgrade to the {} room for booking {} at {} was approved. \
             Your stay from {} to {} now totals {}.",
            preview.room_type, booking.id, booking.hotel_name, booking.check_in,
            booking.check_out, preview.total_price,
        );
        if let Err(error) = self.notifier.send(&email, "Room upgrade approved", &body).await {
            warn!(
                event_name = "upgrade.notification.delivery_failed",
                conversation_id = %conversation,
                booking_id,
                error = %error,
                "notification channel failed after approval"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use veranda_auth::{
        AuthorizationFlowManager, BackchannelPoll, IdentityProvider, ScriptedIdentityProvider,
        TokenCache,
    };
    use veranda_core::config::AppConfig;
    use veranda_core::directory::ConversationDirectory;
    use veranda_core::domain::{ConversationId, PrincipalId, UserClaims};

    use crate::inventory::{Booking, Hotel, InMemoryInventoryClient, Room};
    use crate::notify::{Notifier, RecordingNotifier};
    use crate::upgrade::{Delay, InstantDelay, UpgradeCoordinator, UpgradeOutcome};

    struct Fixture {
        coordinator: Arc<UpgradeCoordinator>,
        provider: Arc<ScriptedIdentityProvider>,
        notifier: Arc<RecordingNotifier>,
        delay: Arc<InstantDelay>,
        directory: Arc<ConversationDirectory>,
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    async fn fixture(max_polls: u32) -> Fixture {
        let provider = Arc::new(ScriptedIdentityProvider::new());
        let directory = Arc::new(ConversationDirectory::new());
        let auth = Arc::new(AuthorizationFlowManager::new(
            AppConfig::default().identity,
            Arc::new(TokenCache::new()),
            Arc::clone(&directory),
            Arc::clone(&provider) as Arc<dyn IdentityProvider>,
        ));

        let inventory = Arc::new(InMemoryInventoryClient::with_rooms(
            vec![Hotel { id: 1, name: "Gardeo Colombo".to_string() }],
            vec![
                Room {
                    id: 7,
                    room_type: "Deluxe".to_string(),
                    price_per_night: Decimal::new(20_000, 2),
                    is_available: true,
                },
                Room {
                    id: 8,
                    room_type: "Suite".to_string(),
                    price_per_night: Decimal::new(35_000, 2),
                    is_available: true,
                },
            ],
        ));
        inventory
            .insert_booking(Booking {
                id: 42,
                hotel_name: "Gardeo Colombo".to_string(),
                room_id: 7,
                check_in: date(2026, 9, 1),
                check_out: date(2026, 9, 3),
                total_price: Decimal::new(40_000, 2),
            })
            .await;

        let notifier = Arc::new(RecordingNotifier::new());
        let delay = Arc::new(InstantDelay::default());
        let mut config = AppConfig::default().upgrade;
        config.max_polls = max_polls;

        let coordinator = Arc::new(UpgradeCoordinator::new(
            auth,
            inventory,
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            Arc::clone(&directory),
            config,
            Arc::clone(&delay) as Arc<dyn Delay>,
        ));
        Fixture { coordinator, provider, notifier, delay, directory }
    }

    async fn bind_guest(directory: &ConversationDirectory, conversation: &ConversationId) {
        let principal = PrincipalId::from("u-1");
        directory.bind_principal(conversation, principal.clone()).await;
        let mut claims = UserClaims::new(principal.clone());
        claims.username = Some("kisali".to_string());
        claims.email = Some("kisali@example.com".to_string());
        directory.store_claims(&principal, claims).await;
    }

    #[tokio::test]
    async fn approval_after_pending_polls_sends_the_notification() {
        let fx = fixture(60).await;
        let conversation = ConversationId::from("T1");
        bind_guest(&fx.directory, &conversation).await;
        fx.provider
            .push_poll_results([
                BackchannelPoll::Pending,
                BackchannelPoll::Pending,
                BackchannelPoll::Pending,
                BackchannelPoll::Success("upgrade-tok".to_string()),
            ])
            .await;

        let outcome = fx.coordinator.run(conversation, 42, 8).await;

        assert_eq!(outcome, UpgradeOutcome::Approved);
        assert_eq!(fx.provider.poll_calls.load(Ordering::SeqCst), 4);
        let sent = fx.notifier.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, "kisali@example.com");
        assert!(sent[0].body.starts_with("Hi kisali,"));
        assert!(sent[0].body.contains("booking 42"));
        assert!(sent[0].body.contains("Gardeo Colombo"));
    }

    #[tokio::test]
    async fn approval_notification_prices_the_upgrade_target_room() {
        let fx = fixture(60).await;
        let conversation = ConversationId::from("T1");
        bind_guest(&fx.directory, &conversation).await;
        fx.provider
            .push_poll_results([BackchannelPoll::Success("upgrade-tok".to_string())])
            .await;

        // Booking 42 holds room 7 (400.00 for the stay); the upgrade targets
        // the Suite, room 8 (700.00 for the same dates).
        let outcome = fx.coordinator.run(conversation, 42, 8).await;

        assert_eq!(outcome, UpgradeOutcome::Approved);
        let sent = fx.notifier.sent().await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].body.contains("Suite"));
        assert!(sent[0].body.contains("700.00"));
        assert!(!sent[0].body.contains("400.00"));
    }

    #[tokio::test]
    async fn slow_down_is_treated_like_pending() {
        let fx = fixture(60).await;
        let conversation = ConversationId::from("T1");
        bind_guest(&fx.directory, &conversation).await;
        fx.provider
            .push_poll_results([
                BackchannelPoll::SlowDown,
                BackchannelPoll::Success("upgrade-tok".to_string()),
            ])
            .await;

        let outcome = fx.coordinator.run(conversation, 42, 8).await;

        assert_eq!(outcome, UpgradeOutcome::Approved);
        assert_eq!(fx.provider.poll_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausted_poll_budget_times_out() {
        let fx = fixture(3).await;
        let conversation = ConversationId::from("T1");
        bind_guest(&fx.directory, &conversation).await;
        // Scripted provider answers Pending once its script runs dry.

        let outcome = fx.coordinator.run(conversation, 42, 8).await;

        assert_eq!(outcome, UpgradeOutcome::TimedOut);
        assert_eq!(fx.provider.poll_calls.load(Ordering::SeqCst), 3);
        assert!(fx.notifier.sent().await.is_empty());
        // Grace sleep, initial interval, then one sleep per pending poll.
        assert_eq!(fx.delay.sleeps.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn provider_rejection_fails_without_notification() {
        let fx = fixture(60).await;
        let conversation = ConversationId::from("T1");
        bind_guest(&fx.directory, &conversation).await;
        fx.provider
            .push_poll_results([BackchannelPoll::Error("access_denied".to_string())])
            .await;

        let outcome = fx.coordinator.run(conversation, 42, 8).await;

        assert_eq!(outcome, UpgradeOutcome::Failed);
        assert!(fx.notifier.sent().await.is_empty());
    }

    #[tokio::test]
    async fn unbound_conversation_fails_before_any_backchannel_call() {
        let fx = fixture(60).await;

        let outcome = fx.coordinator.run(ConversationId::from("nobody"), 42, 8).await;

        assert_eq!(outcome, UpgradeOutcome::Failed);
        assert_eq!(fx.provider.backchannel_starts.load(Ordering::SeqCst), 0);
        assert_eq!(fx.provider.poll_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn delivery_failure_still_counts_as_approved() {
        let provider = Arc::new(ScriptedIdentityProvider::new());
        let directory = Arc::new(ConversationDirectory::new());
        let auth = Arc::new(AuthorizationFlowManager::new(
            AppConfig::default().identity,
            Arc::new(TokenCache::new()),
            Arc::clone(&directory),
            Arc::clone(&provider) as Arc<dyn IdentityProvider>,
        ));
        let inventory = Arc::new(InMemoryInventoryClient::with_rooms(
            vec![Hotel { id: 1, name: "Gardeo Colombo".to_string() }],
            vec![
                Room {
                    id: 7,
                    room_type: "Deluxe".to_string(),
                    price_per_night: Decimal::new(20_000, 2),
                    is_available: true,
                },
                Room {
                    id: 8,
                    room_type: "Suite".to_string(),
                    price_per_night: Decimal::new(35_000, 2),
                    is_available: true,
                },
            ],
        ));
        inventory
            .insert_booking(Booking {
                id: 42,
                hotel_name: "Gardeo Colombo".to_string(),
                room_id: 7,
                check_in: date(2026, 9, 1),
                check_out: date(2026, 9, 3),
                total_price: Decimal::new(40_000, 2),
            })
            .await;
        let coordinator = Arc::new(UpgradeCoordinator::new(
            auth,
            inventory,
            Arc::new(RecordingNotifier::failing()),
            Arc::clone(&directory),
            AppConfig::default().upgrade,
            Arc::new(InstantDelay::default()),
        ));

        let conversation = ConversationId::from("T1");
        bind_guest(&directory, &conversation).await;
        provider
            .push_poll_results([BackchannelPoll::Success("upgrade-tok".to_string())])
            .await;

        assert_eq!(coordinator.run(conversation, 42, 8).await, UpgradeOutcome::Approved);
    }

    #[tokio::test]
    async fn missing_booking_demotes_approval_to_failure() {
        let fx = fixture(60).await;
        let conversation = ConversationId::from("T1");
        bind_guest(&fx.directory, &conversation).await;
        fx.provider
            .push_poll_results([BackchannelPoll::Success("upgrade-tok".to_string())])
            .await;

        let outcome = fx.coordinator.run(conversation, 999, 8).await;

        assert_eq!(outcome, UpgradeOutcome::Failed);
        assert!(fx.notifier.sent().await.is_empty());
    }

    #[tokio::test]
    async fn schedule_runs_detached_from_the_caller() {
        let fx = fixture(60).await;
        let conversation = ConversationId::from("T1");
        bind_guest(&fx.directory, &conversation).await;
        fx.provider
            .push_poll_results([BackchannelPoll::Success("upgrade-tok".to_string())])
            .await;

        let handle = fx.coordinator.schedule(conversation, 42, 8);

        assert_eq!(handle.await.expect("upgrade task"), UpgradeOutcome::Approved);
        assert_eq!(fx.notifier.sent().await.len(), 1);
    }
}
