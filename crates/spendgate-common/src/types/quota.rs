//! Quota Types
//!
//! A quota caps spend (USD) for one organization over a scope and period:
//! - Organization: every call the organization makes
//! - Provider: calls to one provider
//! - Model: calls to one provider/model pair
//!
//! `current_usage` is advanced only by the store's atomic usage write and may
//! briefly exceed `limit_amount` after a borderline admission.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reset cadence of a quota counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaPeriod {
    /// Resets at midnight UTC
    Daily,
    /// Resets at the first instant of each UTC month
    Monthly,
}

impl QuotaPeriod {
    /// Start of the period containing `now`
    pub fn period_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive();
        let start = match self {
            QuotaPeriod::Daily => Some(today),
            QuotaPeriod::Monthly => NaiveDate::from_ymd_opt(today.year(), today.month(), 1),
        };
        midnight_utc(start).unwrap_or(now)
    }

    /// First instant of the period following the one containing `now`
    pub fn next_reset(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive();
        let next = match self {
            QuotaPeriod::Daily => today.succ_opt(),
            QuotaPeriod::Monthly => {
                let (year, month) = if today.month() == 12 {
                    (today.year() + 1, 1)
                } else {
                    (today.year(), today.month() + 1)
                };
                NaiveDate::from_ymd_opt(year, month, 1)
            }
        };
        midnight_utc(next).unwrap_or(now)
    }

    fn rank(&self) -> u8 {
        match self {
            QuotaPeriod::Daily => 0,
            QuotaPeriod::Monthly => 1,
        }
    }
}

impl std::fmt::Display for QuotaPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotaPeriod::Daily => write!(f, "daily"),
            QuotaPeriod::Monthly => write!(f, "monthly"),
        }
    }
}

impl std::str::FromStr for QuotaPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => Ok(QuotaPeriod::Daily),
            "monthly" => Ok(QuotaPeriod::Monthly),
            other => Err(format!("unknown quota period: {other}")),
        }
    }
}

fn midnight_utc(date: Option<NaiveDate>) -> Option<DateTime<Utc>> {
    date.and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Dimension a quota applies over
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "level", rename_all = "snake_case")]
pub enum QuotaScope {
    Organization,
    Provider { provider: String },
    Model { provider: String, model: String },
}

impl QuotaScope {
    /// Whether a call to `provider`/`model` falls under this scope
    pub fn applies_to(&self, provider: &str, model: &str) -> bool {
        match self {
            QuotaScope::Organization => true,
            QuotaScope::Provider { provider: p } => p == provider,
            QuotaScope::Model {
                provider: p,
                model: m,
            } => p == provider && m == model,
        }
    }
}

/// Reported quota category
///
/// Declaration order is the fixed check order: when several quotas deny a
/// request, the first one in this order is reported as limiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaType {
    /// Organization-wide daily quota
    Daily,
    /// Organization-wide monthly quota
    Monthly,
    /// Provider-scoped quota
    Provider,
    /// Model-scoped quota
    Model,
}

impl QuotaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaType::Daily => "daily",
            QuotaType::Monthly => "monthly",
            QuotaType::Provider => "provider",
            QuotaType::Model => "model",
        }
    }
}

impl std::fmt::Display for QuotaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Spend limit definition with its running counter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaDefinition {
    /// Unique quota ID
    pub id: Uuid,
    /// Owning organization
    pub organization_id: String,
    /// Scope the limit applies over
    pub scope: QuotaScope,
    /// Reset cadence
    pub period: QuotaPeriod,
    /// Spend limit for the period (USD)
    pub limit_amount: Decimal,
    /// Spend accumulated in the current period (USD)
    pub current_usage: Decimal,
    /// Instant the counter resets
    pub reset_at: DateTime<Utc>,
}

impl QuotaDefinition {
    /// Create a quota with zero usage, resetting at the end of the current period
    pub fn new(
        organization_id: impl Into<String>,
        scope: QuotaScope,
        period: QuotaPeriod,
        limit_amount: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id: organization_id.into(),
            scope,
            period,
            limit_amount,
            current_usage: Decimal::ZERO,
            reset_at: period.next_reset(Utc::now()),
        }
    }

    /// Organization-wide daily quota
    pub fn daily(organization_id: impl Into<String>, limit_amount: Decimal) -> Self {
        Self::new(organization_id, QuotaScope::Organization, QuotaPeriod::Daily, limit_amount)
    }

    /// Organization-wide monthly quota
    pub fn monthly(organization_id: impl Into<String>, limit_amount: Decimal) -> Self {
        Self::new(organization_id, QuotaScope::Organization, QuotaPeriod::Monthly, limit_amount)
    }

    /// Set the current usage
    pub fn with_usage(mut self, current_usage: Decimal) -> Self {
        self.current_usage = current_usage;
        self
    }

    /// Set the reset instant
    pub fn with_reset_at(mut self, reset_at: DateTime<Utc>) -> Self {
        self.reset_at = reset_at;
        self
    }

    #[inline]
    pub fn applies_to(&self, provider: &str, model: &str) -> bool {
        self.scope.applies_to(provider, model)
    }

    pub fn quota_type(&self) -> QuotaType {
        match (&self.scope, self.period) {
            (QuotaScope::Organization, QuotaPeriod::Daily) => QuotaType::Daily,
            (QuotaScope::Organization, QuotaPeriod::Monthly) => QuotaType::Monthly,
            (QuotaScope::Provider { .. }, _) => QuotaType::Provider,
            (QuotaScope::Model { .. }, _) => QuotaType::Model,
        }
    }

    /// Sort key for the fixed check order (daily before monthly within a scope)
    pub fn check_order(&self) -> (QuotaType, u8) {
        (self.quota_type(), self.period.rank())
    }

    /// Whether the period has rolled over without the store resetting the row
    pub fn is_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.reset_at <= now
    }

    /// Usage that counts against the limit at `now`
    pub fn effective_usage(&self, now: DateTime<Utc>) -> Decimal {
        if self.is_elapsed(now) {
            Decimal::ZERO
        } else {
            self.current_usage
        }
    }

    /// Headroom left at `now`, never negative
    pub fn remaining(&self, now: DateTime<Utc>) -> Decimal {
        (self.limit_amount - self.effective_usage(now)).max(Decimal::ZERO)
    }

    /// Strict admission rule: reaching the limit exactly denies
    pub fn admits(&self, estimated_cost: Decimal, now: DateTime<Utc>) -> bool {
        self.effective_usage(now) + estimated_cost < self.limit_amount
    }

    /// Advance the counter, rolling the period over first if it has elapsed
    pub fn apply_usage(&mut self, cost: Decimal, now: DateTime<Utc>) {
        if self.is_elapsed(now) {
            self.current_usage = Decimal::ZERO;
            self.reset_at = self.period.next_reset(now);
        }
        self.current_usage += cost;
    }
}

/// Audit row written when a request is denied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaViolation {
    pub id: Uuid,
    pub organization_id: String,
    pub user_id: Option<String>,
    pub provider: String,
    pub model: String,
    /// Category of the reported limiting quota
    pub quota_type: QuotaType,
    pub limit_amount: Decimal,
    pub current_usage: Decimal,
    pub estimated_cost: Decimal,
    pub occurred_at: DateTime<Utc>,
}
