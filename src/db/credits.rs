use sqlx::{PgPool, Row};

use crate::models::job::Visibility;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient credits: user {user_id} cannot cover {cost} credits")]
    InsufficientCredits { user_id: i64, cost: f64 },

    #[error("ledger query failed: {0}")]
    Database(#[from] sqlx::Error),
}

/// Debit one generation's cost from a user's balance.
///
/// Balance decrement and ledger insert commit or roll back together. The
/// decrement is guarded by a sufficient-funds predicate; when it matches no
/// row the transaction is abandoned and [`LedgerError::InsufficientCredits`]
/// is returned.
pub async fn debit(
    pool: &PgPool,
    user_id: i64,
    visibility: Visibility,
) -> Result<(), LedgerError> {
    let cost = visibility.credit_cost();
    let mut tx = pool.begin().await?;

    let updated = sqlx::query(
        r#"
        UPDATE users
        SET credits_remaining = credits_remaining - $1
        WHERE id = $2 AND credits_remaining >= $1
        "#,
    )
    .bind(cost)
    .bind(user_id)
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(LedgerError::InsufficientCredits { user_id, cost });
    }

    sqlx::query(
        r#"
        INSERT INTO credit_transactions (user_id, kind, credits, description)
        VALUES ($1, 'debit', $2, $3)
        "#,
    )
    .bind(user_id)
    .bind(-cost)
    .bind(visibility.debit_description())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Grant credits to a user (purchases, promotions, support adjustments).
pub async fn grant(
    pool: &PgPool,
    user_id: i64,
    credits: f64,
    description: &str,
) -> Result<(), LedgerError> {
    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE users SET credits_remaining = credits_remaining + $1 WHERE id = $2")
        .bind(credits)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO credit_transactions (user_id, kind, credits, description)
        VALUES ($1, 'credit', $2, $3)
        "#,
    )
    .bind(user_id)
    .bind(credits)
    .bind(description)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Current credit balance for a user.
pub async fn balance(pool: &PgPool, user_id: i64) -> Result<f64, LedgerError> {
    let row = sqlx::query("SELECT credits_remaining FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_one(pool)
        .await?;

    Ok(row.try_get("credits_remaining")?)
}
