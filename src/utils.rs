pub const TX_RETRY_LIMIT: u32 = 10;

/// Retries a transaction a bounded number of times.
///
/// Errors returned by `$expression` roll the transaction back before the
/// retry; errors from `commit` retry directly. The expression's error type
/// must convert from `sqlx::Error`.
///
/// # Example
/// ```ignore
/// let outcome = retry_tx!(database.pool, tx, {
///     synchronizer.synchronize(&mut tx).await
/// })
/// .await?;
/// ```
#[macro_export]
macro_rules! retry_tx {
    ($pool:expr, $tx:ident, $expression:expr) => {
        async {
            let limit = $crate::utils::TX_RETRY_LIMIT;
            let mut res;
            let mut counter = 0;
            loop {
                let mut $tx = $pool.begin().await?;
                res = async { $expression }.await;
                if let Err(e) = res {
                    counter += 1;
                    if counter > limit {
                        return Err(e.into());
                    }
                    $tx.rollback().await?;
                    tracing::warn!(
                        error = ?e,
                        "db transaction returned error ({counter}/{limit})"
                    );
                    continue;
                }
                match $tx.commit().await {
                    Err(e) => {
                        counter += 1;
                        if counter > limit {
                            return Err(e.into());
                        }
                        tracing::warn!(
                            error = ?e,
                            "db transaction commit failed ({counter}/{limit})"
                        );
                    }
                    Ok(()) => break,
                }
            }
            res
        }
    };
}
