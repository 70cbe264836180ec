use async_trait::async_trait;
use chrono::{DateTime, Datelike, Timelike, Utc};
use dashmap::DashMap;
use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use super::{OutboundAuth, Secret, SecurityError};
use crate::events::{AnomalyKind, EventBus, ManagerEvent, RotationReason};

/// Where a credential is attached on outbound requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialPlacement {
    /// `Authorization: Bearer <secret>`
    Bearer,
    /// A custom header, e.g. `x-api-key: <secret>`.
    Header(String),
    /// A query parameter, e.g. `?api-key=<secret>`.
    Query(String),
}

impl Default for CredentialPlacement {
    fn default() -> Self {
        Self::Query("api-key".to_string())
    }
}

impl FromStr for CredentialPlacement {
    type Err = SecurityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "bearer" {
            return Ok(Self::Bearer);
        }
        match s.split_once(':') {
            Some(("header", name)) if !name.is_empty() => Ok(Self::Header(name.to_lowercase())),
            Some(("query", name)) if !name.is_empty() => Ok(Self::Query(name.to_string())),
            _ => Err(SecurityError::InvalidPlacement(s.to_string())),
        }
    }
}

impl fmt::Display for CredentialPlacement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bearer => write!(f, "bearer"),
            Self::Header(name) => write!(f, "header:{name}"),
            Self::Query(name) => write!(f, "query:{name}"),
        }
    }
}

/// Lifecycle and anomaly thresholds shared by every credential.
#[derive(Debug, Clone)]
pub struct CredentialPolicy {
    pub max_age: Duration,
    /// `None` disables scheduled rotation.
    pub rotation_interval: Option<Duration>,
    pub spike_factor: f64,
    pub rapid_call: Duration,
    pub rapid_burst: u32,
}

impl Default for CredentialPolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(90 * 24 * 3600),
            rotation_interval: None,
            spike_factor: 10.0,
            rapid_call: Duration::from_millis(10),
            rapid_burst: 50,
        }
    }
}

/// Supplies a fresh secret for a service. Implemented by whatever owns provider accounts.
#[async_trait]
pub trait CredentialRotator: Send + Sync {
    async fn rotate(&self, service: &str) -> Result<Secret, SecurityError>;
}

/// Point-in-time usage counters for one credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialUsage {
    pub current_hour: u64,
    pub today: u64,
    pub total: u64,
    pub anomalies: u64,
    pub age_secs: u64,
}

#[derive(Debug)]
struct UsageBuckets {
    day: i32,
    hours: [u64; 24],
    total: u64,
    last_use_ms: Option<i64>,
    rapid_streak: u32,
    spike_flagged_hour: Option<u32>,
}

impl UsageBuckets {
    fn new() -> Self {
        Self {
            day: 0,
            hours: [0; 24],
            total: 0,
            last_use_ms: None,
            rapid_streak: 0,
            spike_flagged_hour: None,
        }
    }

    /// Counts one use and reports the first anomaly it completes, if any.
    fn record(&mut self, now: DateTime<Utc>, policy: &CredentialPolicy) -> Option<AnomalyKind> {
        let day = now.num_days_from_ce();
        if day != self.day {
            self.day = day;
            self.hours = [0; 24];
            self.spike_flagged_hour = None;
        }
        let hour = now.hour();
        self.hours[hour as usize] += 1;
        self.total += 1;

        let now_ms = now.timestamp_millis();
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let rapid_ms = policy.rapid_call.as_millis() as i64;
        match self.last_use_ms {
            Some(last) if now_ms - last < rapid_ms => self.rapid_streak += 1,
            _ => self.rapid_streak = 0,
        }
        self.last_use_ms = Some(now_ms);

        if policy.rapid_burst > 0 && self.rapid_streak >= policy.rapid_burst {
            self.rapid_streak = 0;
            return Some(AnomalyKind::RapidRepeat);
        }

        if hour >= 1 && self.spike_flagged_hour != Some(hour) {
            let completed: u64 = self.hours[..hour as usize].iter().sum();
            #[allow(clippy::cast_precision_loss)]
            let mean = completed as f64 / f64::from(hour);
            #[allow(clippy::cast_precision_loss)]
            let current = self.hours[hour as usize] as f64;
            if mean >= 1.0 && current > policy.spike_factor * mean {
                self.spike_flagged_hour = Some(hour);
                return Some(AnomalyKind::UsageSpike);
            }
        }
        None
    }

    fn reset(&mut self) {
        *self = Self::new();
    }
}

#[derive(Debug)]
struct CredentialRecord {
    secret: Secret,
    placement: CredentialPlacement,
    created_at: DateTime<Utc>,
    usage: UsageBuckets,
    anomalies: u64,
    rotation_requested: bool,
}

impl CredentialRecord {
    fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).to_std().unwrap_or_default()
    }
}

/// Per-service credential storage with age enforcement, usage statistics and rotation.
///
/// Header generation fails closed: once a credential is older than the policy's max age,
/// every request for that service is refused until the credential is rotated.
pub struct CredentialStore {
    records: Arc<DashMap<String, CredentialRecord>>,
    rotator: Option<Arc<dyn CredentialRotator>>,
    policy: CredentialPolicy,
    events: EventBus,
}

impl CredentialStore {
    #[must_use]
    pub fn new(policy: CredentialPolicy, events: EventBus) -> Self {
        Self { records: Arc::new(DashMap::new()), rotator: None, policy, events }
    }

    #[must_use]
    pub fn with_rotator(mut self, rotator: Arc<dyn CredentialRotator>) -> Self {
        self.rotator = Some(rotator);
        self
    }

    pub fn insert(&self, service: &str, secret: Secret, placement: CredentialPlacement) {
        self.insert_created_at(service, secret, placement, Utc::now());
    }

    /// Stores a credential with an explicit creation time, e.g. one restored from a vault.
    pub fn insert_created_at(
        &self,
        service: &str,
        secret: Secret,
        placement: CredentialPlacement,
        created_at: DateTime<Utc>,
    ) {
        self.records.insert(
            service.to_string(),
            CredentialRecord {
                secret,
                placement,
                created_at,
                usage: UsageBuckets::new(),
                anomalies: 0,
                rotation_requested: false,
            },
        );
    }

    #[must_use]
    pub fn contains(&self, service: &str) -> bool {
        self.records.contains_key(service)
    }

    /// Produces the auth material for one outbound request and counts the use.
    ///
    /// # Errors
    ///
    /// - [`SecurityError::CredentialNotFound`] if no credential is stored for `service`
    /// - [`SecurityError::CredentialExpired`] if the credential is older than the max age
    pub fn get_secure_headers(&self, service: &str) -> Result<OutboundAuth, SecurityError> {
        self.secure_headers_at(service, Utc::now())
    }

    pub(crate) fn secure_headers_at(
        &self,
        service: &str,
        now: DateTime<Utc>,
    ) -> Result<OutboundAuth, SecurityError> {
        let (auth, anomaly) = {
            let mut record = self
                .records
                .get_mut(service)
                .ok_or_else(|| SecurityError::CredentialNotFound(service.to_string()))?;

            let age = record.age(now);
            if age >= self.policy.max_age {
                tracing::warn!(
                    service = %service,
                    age_secs = age.as_secs(),
                    "credential expired, refusing to generate headers"
                );
                return Err(SecurityError::CredentialExpired {
                    service: service.to_string(),
                    age_secs: age.as_secs(),
                    max_age_secs: self.policy.max_age.as_secs(),
                });
            }

            let anomaly = record.usage.record(now, &self.policy);
            if anomaly.is_some() {
                record.anomalies += 1;
                record.rotation_requested = true;
            }
            (auth_for(&record.placement, &record.secret), anomaly)
        };

        if let Some(kind) = anomaly {
            tracing::warn!(service = %service, kind = ?kind, "credential usage anomaly detected");
            self.events
                .publish(ManagerEvent::CredentialAnomaly { service: service.to_string(), kind });
            self.spawn_rotation(service, RotationReason::Anomaly);
        }
        Ok(auth)
    }

    /// Starts a rotation in the background when a rotator and a runtime are available.
    /// Otherwise the request stays flagged and the next [`Self::rotate_due`] picks it up.
    fn spawn_rotation(&self, service: &str, reason: RotationReason) {
        let Some(rotator) = self.rotator.clone() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let records = Arc::clone(&self.records);
        let events = self.events.clone();
        let service = service.to_string();
        handle.spawn(async move {
            if let Err(e) = rotate_with(&records, rotator.as_ref(), &events, &service, reason).await
            {
                tracing::error!(service = %service, error = %e, "credential rotation failed");
            }
        });
    }

    /// Rotates one credential now.
    ///
    /// # Errors
    ///
    /// - [`SecurityError::RotationUnavailable`] if no rotator is registered
    /// - [`SecurityError::CredentialNotFound`] if the service is unknown
    /// - whatever the rotator returns
    pub async fn rotate(&self, service: &str, reason: RotationReason) -> Result<(), SecurityError> {
        let rotator = self
            .rotator
            .as_ref()
            .ok_or_else(|| SecurityError::RotationUnavailable(service.to_string()))?;
        rotate_with(&self.records, rotator.as_ref(), &self.events, service, reason).await
    }

    /// Rotates every credential whose scheduled interval elapsed or that was flagged by
    /// anomaly detection. Returns the services that were rotated.
    pub async fn rotate_due(&self) -> Vec<String> {
        if self.rotator.is_none() {
            return Vec::new();
        }
        let now = Utc::now();
        let due: Vec<(String, RotationReason)> = self
            .records
            .iter()
            .filter_map(|entry| {
                if entry.rotation_requested {
                    return Some((entry.key().clone(), RotationReason::Anomaly));
                }
                let interval = self.policy.rotation_interval?;
                (entry.age(now) >= interval)
                    .then(|| (entry.key().clone(), RotationReason::Scheduled))
            })
            .collect();

        let mut rotated = Vec::with_capacity(due.len());
        for (service, reason) in due {
            match self.rotate(&service, reason).await {
                Ok(()) => rotated.push(service),
                Err(e) => {
                    tracing::error!(service = %service, error = %e, "credential rotation failed");
                }
            }
        }
        rotated
    }

    #[must_use]
    pub fn usage(&self, service: &str) -> Option<CredentialUsage> {
        let now = Utc::now();
        self.records.get(service).map(|record| {
            let today = if record.usage.day == now.num_days_from_ce() {
                record.usage.hours.iter().sum()
            } else {
                0
            };
            CredentialUsage {
                current_hour: if today > 0 { record.usage.hours[now.hour() as usize] } else { 0 },
                today,
                total: record.usage.total,
                anomalies: record.anomalies,
                age_secs: record.age(now).as_secs(),
            }
        })
    }

    #[must_use]
    pub fn policy(&self) -> &CredentialPolicy {
        &self.policy
    }
}

async fn rotate_with(
    records: &DashMap<String, CredentialRecord>,
    rotator: &dyn CredentialRotator,
    events: &EventBus,
    service: &str,
    reason: RotationReason,
) -> Result<(), SecurityError> {
    if !records.contains_key(service) {
        return Err(SecurityError::CredentialNotFound(service.to_string()));
    }

    // no map guard is held across the await
    let secret = rotator.rotate(service).await?;

    let mut record = records
        .get_mut(service)
        .ok_or_else(|| SecurityError::CredentialNotFound(service.to_string()))?;
    record.secret = secret;
    record.created_at = Utc::now();
    record.usage.reset();
    record.rotation_requested = false;
    drop(record);

    tracing::info!(service = %service, reason = ?reason, "credential rotated");
    events.publish(ManagerEvent::CredentialRotated { service: service.to_string(), reason });
    Ok(())
}

fn auth_for(placement: &CredentialPlacement, secret: &Secret) -> OutboundAuth {
    let mut auth = OutboundAuth::default();
    match placement {
        CredentialPlacement::Bearer => auth
            .headers
            .push(("authorization".to_string(), format!("Bearer {}", secret.expose()))),
        CredentialPlacement::Header(name) => {
            auth.headers.push((name.clone(), secret.expose().to_string()));
        }
        CredentialPlacement::Query(name) => {
            auth.query.push((name.clone(), secret.expose().to_string()));
        }
    }
    auth
}
