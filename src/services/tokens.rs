use std::collections::HashMap;

use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use crate::db::user_queries;
use crate::error::ApiError;
use crate::models::job::JobType;

/// Token cost per job type as a pure lookup. Currently every type costs one
/// token; overrides exist so pricing can diverge per type without touching
/// call sites.
#[derive(Debug, Clone)]
pub struct Pricing {
    default_cost: i64,
    overrides: HashMap<JobType, i64>,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            default_cost: 1,
            overrides: HashMap::new(),
        }
    }
}

impl Pricing {
    pub fn with_override(mut self, job_type: JobType, cost: i64) -> Self {
        self.overrides.insert(job_type, cost);
        self
    }

    pub fn cost(&self, job_type: JobType) -> i64 {
        self.overrides
            .get(&job_type)
            .copied()
            .unwrap_or(self.default_cost)
    }
}

/// Current balance for a user.
pub async fn balance(db: &PgPool, user_id: Uuid) -> Result<i64, ApiError> {
    user_queries::get_balance(db, user_id)
        .await?
        .ok_or(ApiError::NotFound("user"))
}

/// Credit tokens to a user's balance. Amount must be positive.
pub async fn credit(db: &PgPool, user_id: Uuid, amount: i64) -> Result<i64, ApiError> {
    if amount <= 0 {
        return Err(ApiError::InvalidPayload(
            "credit amount must be positive".into(),
        ));
    }

    let new_balance = user_queries::credit(db, user_id, amount)
        .await?
        .ok_or(ApiError::NotFound("user"))?;

    metrics::counter!("tokens_credited_total").increment(amount as u64);
    tracing::info!(%user_id, amount, new_balance, "credited tokens");
    Ok(new_balance)
}

/// Attempt to debit tokens. Returns the new balance on success and `None`
/// when the balance is insufficient — an expected outcome, never an error.
/// Generic over the executor so the unlock path can run it inside its
/// transaction.
pub async fn try_debit<'e>(
    executor: impl PgExecutor<'e>,
    user_id: Uuid,
    amount: i64,
) -> Result<Option<i64>, ApiError> {
    match user_queries::try_debit(executor, user_id, amount).await? {
        Some(new_balance) => {
            metrics::counter!("tokens_debited_total").increment(amount as u64);
            tracing::info!(%user_id, amount, new_balance, "debited tokens");
            Ok(Some(new_balance))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_default_pricing() {
        let pricing = Pricing::default();
        for job_type in JobType::ALL {
            assert_eq!(pricing.cost(job_type), 1);
        }
    }

    #[test]
    fn per_type_override() {
        let pricing = Pricing::default().with_override(JobType::StyleTransfer, 3);
        assert_eq!(pricing.cost(JobType::StyleTransfer), 3);
        assert_eq!(pricing.cost(JobType::Upscale), 1);
    }
}
