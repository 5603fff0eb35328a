//! Per-provider call quota tracking.
//!
//! Each provider has a daily window and an optional minute window. Windows
//! are rolled lazily on access: any window whose age exceeds its period is
//! reset before the limit comparison. Check-and-consume happens under one
//! lock so two racing callers can never push usage past a limit.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use log::{debug, info, warn};
use serde::Serialize;

use super::descriptor::ProviderDescriptor;
use super::persistence::{PersistentStore, UsageRecord, UsageSnapshot};
use crate::clock::{after, elapsed, SharedClock};
use crate::errors::QuotaErrorKind;

const MINUTE_WINDOW: Duration = Duration::from_secs(60);
const DAILY_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Clone, Copy, Debug)]
struct Window {
    used: u32,
    started_at: DateTime<Utc>,
}

impl Window {
    fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            used: 0,
            started_at: now,
        }
    }

    /// Resets the window if it is older than `period`. Returns true on reset.
    fn roll(&mut self, now: DateTime<Utc>, period: Duration) -> bool {
        if elapsed(self.started_at, now) > period {
            *self = Self::fresh(now);
            true
        } else {
            false
        }
    }

    /// Mark the window full so that `roll` resets it at `reopens_at`.
    fn fill_until(&mut self, limit: u32, reopens_at: DateTime<Utc>, period: Duration) {
        self.used = self.used.max(limit);
        // roll() resets strictly after `period`
        let span = TimeDelta::from_std(period + Duration::from_millis(1)).unwrap_or(TimeDelta::MAX);
        if let Some(started_at) = reopens_at.checked_sub_signed(span) {
            self.started_at = started_at;
        }
    }
}

#[derive(Debug)]
struct ProviderUsage {
    descriptor: ProviderDescriptor,
    daily: Window,
    minute: Window,
}

impl ProviderUsage {
    fn roll(&mut self, now: DateTime<Utc>) {
        if self.daily.roll(now, DAILY_WINDOW) {
            info!(
                "Quota: daily window reset for '{}'",
                self.descriptor.id
            );
        }
        if self.minute.roll(now, MINUTE_WINDOW) {
            debug!("Quota: minute window reset for '{}'", self.descriptor.id);
        }
    }

    fn remaining(&self) -> u32 {
        if !self.descriptor.enabled || !self.descriptor.has_credential {
            return 0;
        }
        let daily = self.descriptor.daily_limit.saturating_sub(self.daily.used);
        match self.descriptor.minute_limit {
            Some(limit) => daily.min(limit.saturating_sub(self.minute.used)),
            None => daily,
        }
    }

    fn record(&self) -> UsageRecord {
        UsageRecord {
            current_usage: self.daily.used,
            last_reset: self.daily.started_at.timestamp_millis(),
        }
    }
}

/// Quota status for one provider.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaStatus {
    pub provider: String,
    pub used: u32,
    pub limit: u32,
    pub reset_at: DateTime<Utc>,
    pub minute_used: u32,
    pub minute_limit: Option<u32>,
    pub remaining: u32,
}

/// Tracks per-provider usage against configured limits.
pub struct QuotaTracker {
    entries: Mutex<HashMap<String, ProviderUsage>>,
    store: Arc<dyn PersistentStore>,
    clock: SharedClock,
}

impl QuotaTracker {
    /// Create a tracker, restoring persisted daily usage where available.
    pub fn new(
        descriptors: Vec<ProviderDescriptor>,
        store: Arc<dyn PersistentStore>,
        clock: SharedClock,
    ) -> Self {
        let persisted = store.load().unwrap_or_else(|e| {
            warn!("Quota: failed to load persisted usage, starting fresh: {}", e);
            UsageSnapshot::new()
        });
        let now = clock.now();

        let entries = descriptors
            .into_iter()
            .map(|descriptor| {
                let daily = persisted
                    .get(&descriptor.id)
                    .and_then(|record| {
                        Utc.timestamp_millis_opt(record.last_reset)
                            .single()
                            .map(|started_at| Window {
                                used: record.current_usage,
                                started_at,
                            })
                    })
                    .unwrap_or_else(|| Window::fresh(now));
                let usage = ProviderUsage {
                    descriptor,
                    daily,
                    minute: Window::fresh(now),
                };
                (usage.descriptor.id.clone(), usage)
            })
            .collect();

        Self {
            entries: Mutex::new(entries),
            store,
            clock,
        }
    }

    /// Lock the usage map, recovering from poison if necessary.
    ///
    /// The worst case after a poisoned lock is a slightly off counter,
    /// which is better than panicking on the fetch path.
    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, ProviderUsage>> {
        self.entries.lock().unwrap_or_else(|poisoned| {
            warn!("Quota tracker mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn persist(&self, entries: &HashMap<String, ProviderUsage>) {
        let snapshot: UsageSnapshot = entries
            .iter()
            .map(|(id, usage)| (id.clone(), usage.record()))
            .collect();
        if let Err(e) = self.store.save(&snapshot) {
            warn!("Quota: failed to persist usage: {}", e);
        }
    }

    /// Register (or replace) a provider.
    pub fn register(&self, descriptor: ProviderDescriptor) {
        let now = self.clock.now();
        let mut entries = self.lock_entries();
        entries.insert(
            descriptor.id.clone(),
            ProviderUsage {
                descriptor,
                daily: Window::fresh(now),
                minute: Window::fresh(now),
            },
        );
    }

    /// Whether one more call may be dispatched to `provider` right now.
    ///
    /// Disabled providers and providers without a credential are never
    /// consumable. Unknown providers are not consumable.
    pub fn can_consume(&self, provider: &str) -> bool {
        let now = self.clock.now();
        let mut entries = self.lock_entries();
        match entries.get_mut(provider) {
            Some(usage) => {
                usage.roll(now);
                usage.remaining() > 0
            }
            None => false,
        }
    }

    /// Count one call against `provider` and persist the new usage.
    pub fn consume(&self, provider: &str) {
        let now = self.clock.now();
        let mut entries = self.lock_entries();
        if let Some(usage) = entries.get_mut(provider) {
            usage.roll(now);
            usage.daily.used = usage.daily.used.saturating_add(1);
            usage.minute.used = usage.minute.used.saturating_add(1);
            debug!(
                "Quota: '{}' at {}/{}",
                provider, usage.daily.used, usage.descriptor.daily_limit
            );
            self.persist(&entries);
        }
    }

    /// Check and consume atomically. Returns false, consuming nothing, when
    /// the provider has no capacity left.
    pub fn try_consume(&self, provider: &str) -> bool {
        let now = self.clock.now();
        let mut entries = self.lock_entries();
        let Some(usage) = entries.get_mut(provider) else {
            return false;
        };
        usage.roll(now);
        if usage.remaining() == 0 {
            return false;
        }
        usage.daily.used += 1;
        usage.minute.used += 1;
        debug!(
            "Quota: '{}' at {}/{}",
            provider, usage.daily.used, usage.descriptor.daily_limit
        );
        self.persist(&entries);
        true
    }

    /// Calls still available in the tightest window.
    pub fn remaining(&self, provider: &str) -> u32 {
        let now = self.clock.now();
        let mut entries = self.lock_entries();
        entries
            .get_mut(provider)
            .map(|usage| {
                usage.roll(now);
                usage.remaining()
            })
            .unwrap_or(0)
    }

    pub fn status(&self, provider: &str) -> Option<QuotaStatus> {
        let now = self.clock.now();
        let mut entries = self.lock_entries();
        let usage = entries.get_mut(provider)?;
        usage.roll(now);
        Some(QuotaStatus {
            provider: provider.to_string(),
            used: usage.daily.used,
            limit: usage.descriptor.daily_limit,
            reset_at: after(usage.daily.started_at, DAILY_WINDOW),
            minute_used: usage.minute.used,
            minute_limit: usage.descriptor.minute_limit,
            remaining: usage.remaining(),
        })
    }

    /// Mark the window matching `kind` as used up, so the provider is not
    /// selected again until it resets.
    pub fn mark_exhausted(&self, provider: &str, kind: QuotaErrorKind) {
        self.mark_exhausted_for(provider, kind, kind.default_retry_after());
    }

    /// Like [`mark_exhausted`](Self::mark_exhausted), with a throttle that
    /// lifts after `retry_after`: the minute window reopens at that instant.
    pub fn mark_exhausted_for(
        &self,
        provider: &str,
        kind: QuotaErrorKind,
        retry_after: Duration,
    ) {
        let now = self.clock.now();
        let mut entries = self.lock_entries();
        let Some(usage) = entries.get_mut(provider) else {
            return;
        };
        usage.roll(now);
        match (kind, usage.descriptor.minute_limit) {
            (QuotaErrorKind::RateLimit, Some(limit)) => {
                usage.minute.fill_until(limit, after(now, retry_after), MINUTE_WINDOW);
            }
            // No minute window to fill. A short throttle must not cost the day.
            (QuotaErrorKind::RateLimit, None) => {
                debug!("Quota: '{}' throttled, no minute window to mark", provider);
                return;
            }
            _ => {
                usage.daily.used = usage.daily.used.max(usage.descriptor.daily_limit);
            }
        }
        info!("Quota: '{}' marked exhausted ({})", provider, kind);
        self.persist(&entries);
    }

    pub fn set_enabled(&self, provider: &str, enabled: bool) {
        if let Some(usage) = self.lock_entries().get_mut(provider) {
            usage.descriptor.enabled = enabled;
            info!(
                "Quota: provider '{}' {}",
                provider,
                if enabled { "enabled" } else { "disabled" }
            );
        }
    }

    pub fn descriptor(&self, provider: &str) -> Option<ProviderDescriptor> {
        self.lock_entries()
            .get(provider)
            .map(|usage| usage.descriptor.clone())
    }

    pub fn descriptors(&self) -> Vec<ProviderDescriptor> {
        let mut descriptors: Vec<_> = self
            .lock_entries()
            .values()
            .map(|usage| usage.descriptor.clone())
            .collect();
        descriptors.sort_by(|a, b| a.id.cmp(&b.id));
        descriptors
    }
}
