//! Push notification bookkeeping (spec §4.4 "Push notifications").
//!
//! The delivery transport itself — actually reaching a browser's push
//! service — is the out-of-scope `PushSink` collaborator named in spec §1.
//! This module owns everything upstream of that seam: the device-active
//! check that decides whether a push is even worth sending, and the
//! PIN-verification handshake a browser completes before its subscription
//! is trusted.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hub_domain::error::Result;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// One notification a Runner asked to have delivered (spec §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub tag: Option<String>,
    pub agent_id: String,
}

/// The injected delivery seam (spec §1 "the push delivery transport itself
/// (a `PushSink` interface)"). A concrete implementation speaks Web Push;
/// this crate only defines the contract it is driven through.
#[async_trait]
pub trait PushSink: Send + Sync {
    async fn send(&self, subscription_endpoint: &str, payload: &PushPayload) -> Result<()>;
}

/// A `PushSink` that drops everything, for embedders that haven't wired a
/// real transport yet.
pub struct NullPushSink;

#[async_trait]
impl PushSink for NullPushSink {
    async fn send(&self, _subscription_endpoint: &str, _payload: &PushPayload) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionDescriptor {
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
}

struct PendingSubscription {
    descriptor: SubscriptionDescriptor,
    device_id: String,
    pin: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifiedSubscription {
    pub device_id: String,
    pub descriptor: SubscriptionDescriptor,
}

/// Per-device visibility/connectivity (spec §4.4 "a device is active if it
/// has an open WS connection and its last reported visibility was
/// visible").
#[derive(Debug, Clone, Copy, Default)]
struct DeviceState {
    connected_clients: u32,
    last_visibility_visible: bool,
}

/// Tracks pending (unverified) and verified push subscriptions plus the
/// device-active state used to decide whether a push is suppressed in
/// favor of an already-open, visible client.
pub struct PushRegistry {
    pending: Mutex<HashMap<String, PendingSubscription>>, // keyed by endpoint
    verified: Mutex<HashMap<String, VerifiedSubscription>>, // keyed by endpoint
    devices: Mutex<HashMap<String, DeviceState>>,
    pin_ttl: chrono::Duration,
}

impl PushRegistry {
    pub fn new(pin_ttl_minutes: u64) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            verified: Mutex::new(HashMap::new()),
            devices: Mutex::new(HashMap::new()),
            pin_ttl: chrono::Duration::minutes(pin_ttl_minutes as i64),
        }
    }

    /// Begin a subscription: generates a 4-digit PIN, to be delivered to
    /// the browser out of band by `PushSink` (spec §4.4 "receives a newly
    /// generated 4-digit PIN by push").
    pub fn begin_subscription(&self, device_id: &str, descriptor: SubscriptionDescriptor) -> String {
        let pin = format!("{:04}", rand::thread_rng().gen_range(0..10_000));
        self.pending.lock().insert(
            descriptor.endpoint.clone(),
            PendingSubscription {
                descriptor,
                device_id: device_id.to_string(),
                pin: pin.clone(),
                created_at: Utc::now(),
            },
        );
        pin
    }

    /// Complete verification: the browser presents the PIN over the
    /// authenticated WS connection. On match the subscription is marked
    /// verified and the PIN is discarded (spec §4.4).
    pub fn verify_pin(&self, endpoint: &str, pin: &str) -> bool {
        let mut pending = self.pending.lock();
        let Some(entry) = pending.get(endpoint) else {
            return false;
        };
        if entry.pin != pin {
            return false;
        }
        let entry = pending.remove(endpoint).expect("just checked present");
        self.verified.lock().insert(
            endpoint.to_string(),
            VerifiedSubscription {
                device_id: entry.device_id,
                descriptor: entry.descriptor,
            },
        );
        true
    }

    pub fn unsubscribe(&self, endpoint: &str) {
        self.pending.lock().remove(endpoint);
        self.verified.lock().remove(endpoint);
    }

    /// Purge unverified subscriptions older than the configured PIN TTL
    /// (spec §4.4 "Unverified subscriptions older than 5 minutes are
    /// purged").
    pub fn sweep_expired_pending(&self) -> usize {
        let now = Utc::now();
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|_, entry| now - entry.created_at <= self.pin_ttl);
        before - pending.len()
    }

    pub fn verified_endpoints(&self) -> Vec<VerifiedSubscription> {
        self.verified.lock().values().cloned().collect()
    }

    pub fn verified_for_device(&self, device_id: &str) -> Vec<VerifiedSubscription> {
        self.verified
            .lock()
            .values()
            .filter(|s| s.device_id == device_id)
            .cloned()
            .collect()
    }

    // ── Device-active bookkeeping ───────────────────────────────────

    pub fn device_connected(&self, device_id: &str) {
        let mut devices = self.devices.lock();
        let entry = devices.entry(device_id.to_string()).or_default();
        entry.connected_clients += 1;
    }

    pub fn device_disconnected(&self, device_id: &str) {
        let mut devices = self.devices.lock();
        if let Some(entry) = devices.get_mut(device_id) {
            entry.connected_clients = entry.connected_clients.saturating_sub(1);
        }
    }

    pub fn set_visibility(&self, device_id: &str, visible: bool) {
        let mut devices = self.devices.lock();
        let entry = devices.entry(device_id.to_string()).or_default();
        entry.last_visibility_visible = visible;
    }

    fn device_is_active(&self, device_id: &str) -> bool {
        self.devices
            .lock()
            .get(device_id)
            .map(|d| d.connected_clients > 0 && d.last_visibility_visible)
            .unwrap_or(false)
    }

    /// Whether a push should be suppressed because some device already has
    /// an open, visible client (spec §4.4: "if no device is active, the
    /// push is dispatched; otherwise it is suppressed"). `known_devices`
    /// are the device ids with a verified subscription relevant to this
    /// notification.
    pub fn any_device_active(&self, known_devices: &[String]) -> bool {
        known_devices.iter().any(|d| self.device_is_active(d))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> SubscriptionDescriptor {
        SubscriptionDescriptor {
            endpoint: "https://push.example/abc".into(),
            p256dh: "key".into(),
            auth: "auth".into(),
        }
    }

    #[test]
    fn verify_pin_succeeds_on_match_and_discards_the_pin() {
        let registry = PushRegistry::new(5);
        let pin = registry.begin_subscription("device-1", descriptor());
        assert!(registry.verify_pin("https://push.example/abc", &pin));
        assert_eq!(registry.verified_endpoints().len(), 1);
        // Re-verifying fails: the pending entry is gone.
        assert!(!registry.verify_pin("https://push.example/abc", &pin));
    }

    #[test]
    fn verify_pin_rejects_wrong_pin() {
        let registry = PushRegistry::new(5);
        registry.begin_subscription("device-1", descriptor());
        assert!(!registry.verify_pin("https://push.example/abc", "0000"));
    }

    #[test]
    fn sweep_purges_expired_pending_subscriptions() {
        let registry = PushRegistry::new(0); // TTL of 0 minutes: immediately expired
        registry.begin_subscription("device-1", descriptor());
        std::thread::sleep(std::time::Duration::from_millis(5));
        let purged = registry.sweep_expired_pending();
        assert_eq!(purged, 1);
    }

    #[test]
    fn device_is_active_requires_connection_and_visibility() {
        let registry = PushRegistry::new(5);
        registry.device_connected("d1");
        assert!(!registry.any_device_active(&["d1".into()]));
        registry.set_visibility("d1", true);
        assert!(registry.any_device_active(&["d1".into()]));
        registry.device_disconnected("d1");
        assert!(!registry.any_device_active(&["d1".into()]));
    }

    #[test]
    fn unknown_device_is_not_active() {
        let registry = PushRegistry::new(5);
        assert!(!registry.any_device_active(&["missing".into()]));
    }
}
