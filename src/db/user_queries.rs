use sqlx::{PgExecutor, PgPool, Row};
use uuid::Uuid;

pub async fn user_exists(pool: &PgPool, user_id: Uuid) -> Result<bool, sqlx::Error> {
    let row = sqlx::query("SELECT 1 AS one FROM users WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

pub async fn get_balance<'e>(
    executor: impl PgExecutor<'e>,
    user_id: Uuid,
) -> Result<Option<i64>, sqlx::Error> {
    let row = sqlx::query("SELECT token_balance FROM users WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(executor)
        .await?;
    row.map(|r| r.try_get("token_balance")).transpose()
}

/// Credit tokens to a user. A single conditional UPDATE keeps concurrent
/// ledger mutations serialized per user; the version column is bumped so
/// every balance write is observable as a distinct revision.
pub async fn credit<'e>(
    executor: impl PgExecutor<'e>,
    user_id: Uuid,
    amount: i64,
) -> Result<Option<i64>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        UPDATE users
        SET token_balance = token_balance + $2,
            version = version + 1
        WHERE user_id = $1
        RETURNING token_balance
        "#,
    )
    .bind(user_id)
    .bind(amount)
    .fetch_optional(executor)
    .await?;

    row.map(|r| r.try_get("token_balance")).transpose()
}

/// Conditionally debit tokens. The `token_balance >= amount` guard inside the
/// UPDATE makes the read-check-write atomic: two concurrent debits can never
/// both succeed against one covering balance, and the balance can never go
/// negative. Returns the new balance, or `None` when funds are insufficient
/// (expected outcome, not an error) or the user is absent.
pub async fn try_debit<'e>(
    executor: impl PgExecutor<'e>,
    user_id: Uuid,
    amount: i64,
) -> Result<Option<i64>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        UPDATE users
        SET token_balance = token_balance - $2,
            version = version + 1
        WHERE user_id = $1 AND token_balance >= $2
        RETURNING token_balance
        "#,
    )
    .bind(user_id)
    .bind(amount)
    .fetch_optional(executor)
    .await?;

    row.map(|r| r.try_get("token_balance")).transpose()
}
