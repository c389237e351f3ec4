//! Per-user query quota.
//!
//! Each user has one [`QuotaRecord`], created lazily on the free tier. A
//! completed reading consumes one query; the count never drops below zero.
//! Upgrading from free to premium refills the count to the premium allotment.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::store::QuotaStore;
use crate::utilities::errors::{OracleError, OracleResult};

/// Membership tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipType {
    Free,
    Premium,
}

impl MembershipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Premium => "premium",
        }
    }
}

impl fmt::Display for MembershipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MembershipType {
    type Err = OracleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Self::Free),
            "premium" => Ok(Self::Premium),
            other => Err(OracleError::InvalidInput(format!(
                "Unknown membership type '{}' (expected 'free' or 'premium')",
                other
            ))),
        }
    }
}

/// Query allotments per tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaPlans {
    pub free: i64,
    pub premium: i64,
    /// Free users at or below this count are warned.
    pub low_threshold: i64,
}

impl Default for QuotaPlans {
    fn default() -> Self {
        Self {
            free: 10,
            premium: 50,
            low_threshold: 3,
        }
    }
}

impl QuotaPlans {
    pub fn allotment(&self, membership_type: MembershipType) -> i64 {
        match membership_type {
            MembershipType::Free => self.free,
            MembershipType::Premium => self.premium,
        }
    }
}

/// A user's quota row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaRecord {
    pub user_id: String,
    pub membership_type: MembershipType,
    pub remaining_queries: i64,
}

/// A quota row with the figures the client displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaStatus {
    #[serde(flatten)]
    pub record: QuotaRecord,
    pub max_queries: i64,
    pub low_quota: bool,
}

/// Quota operations over a [`QuotaStore`].
#[derive(Clone)]
pub struct QuotaLedger {
    store: Arc<dyn QuotaStore>,
    plans: QuotaPlans,
}

impl QuotaLedger {
    pub fn new(store: Arc<dyn QuotaStore>, plans: QuotaPlans) -> Self {
        Self { store, plans }
    }

    pub fn plans(&self) -> &QuotaPlans {
        &self.plans
    }

    /// Return the user's record, creating a free-tier one if absent.
    ///
    /// A concurrent first access may win the insert; the row is re-read either way.
    pub async fn get_or_create(&self, user_id: &str) -> OracleResult<QuotaRecord> {
        if let Some(record) = self.store.find(user_id).await? {
            return Ok(record);
        }

        log::info!(
            "No quota record found for user {}. Creating default quota.",
            user_id
        );
        let record = QuotaRecord {
            user_id: user_id.to_string(),
            membership_type: MembershipType::Free,
            remaining_queries: self.plans.free,
        };
        self.store.insert_if_absent(&record).await?;

        self.store.find(user_id).await?.ok_or_else(|| {
            OracleError::store(format!("Quota record for user {} vanished after insert", user_id))
        })
    }

    /// Consume one query and return what is left. At zero, stays at zero.
    ///
    /// A user with no record gets the free allotment first, so the first
    /// call returns `free - 1` rather than the undecremented allotment.
    pub async fn decrement(&self, user_id: &str) -> OracleResult<i64> {
        let remaining = match self.store.decrement_if_positive(user_id).await? {
            Some(remaining) => remaining,
            None => {
                self.get_or_create(user_id).await?;
                self.store
                    .decrement_if_positive(user_id)
                    .await?
                    .ok_or_else(|| {
                        OracleError::store(format!("Quota record for user {} vanished", user_id))
                    })?
            }
        };

        if remaining == 0 {
            log::info!("User {} has no queries remaining", user_id);
        } else {
            log::debug!("Quota for user {} decremented to {}", user_id, remaining);
        }
        Ok(remaining)
    }

    /// Change the user's tier.
    ///
    /// Only a `free → premium` transition refills `remaining_queries` to the
    /// premium allotment; any other transition changes the type only.
    ///
    /// # Errors
    /// [`OracleError::NotFound`] when the user has no record.
    pub async fn set_membership(
        &self,
        user_id: &str,
        membership_type: MembershipType,
    ) -> OracleResult<QuotaRecord> {
        let current = self
            .store
            .find(user_id)
            .await?
            .ok_or_else(|| OracleError::not_found(format!("User quota not found for user {}", user_id)))?;

        let refill = (current.membership_type == MembershipType::Free
            && membership_type == MembershipType::Premium)
            .then_some(self.plans.premium);
        if let Some(amount) = refill {
            log::info!(
                "User {} upgrading from {} to premium. Resetting quota to {}",
                user_id,
                current.membership_type,
                amount
            );
        }

        self.store
            .update_membership(user_id, membership_type, refill)
            .await?
            .ok_or_else(|| OracleError::not_found(format!("User quota not found for user {}", user_id)))
    }

    /// The user's record with its tier maximum and low-quota flag.
    pub async fn status(&self, user_id: &str) -> OracleResult<QuotaStatus> {
        let record = self.get_or_create(user_id).await?;
        let max_queries = self.plans.allotment(record.membership_type);
        let low_quota = record.membership_type == MembershipType::Free
            && record.remaining_queries <= self.plans.low_threshold;

        log::info!(
            "Quota for user {}: {} of {} queries ({})",
            user_id,
            record.remaining_queries,
            max_queries,
            record.membership_type
        );

        Ok(QuotaStatus {
            record,
            max_queries,
            low_quota,
        })
    }
}
