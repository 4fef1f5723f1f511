//! Outbound notifications for verification codes and reset links.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::AppResult;

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_verification(&self, to_email: &str, first_name: &str, verify_code: &str) -> AppResult<()>;

    async fn send_password_reset(&self, to_email: &str, first_name: &str, reset_token: &str) -> AppResult<()>;
}

/// Writes messages to the log instead of delivering them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_verification(&self, to_email: &str, first_name: &str, verify_code: &str) -> AppResult<()> {
        tracing::info!(to = %to_email, "verification mail sent");
        tracing::debug!(to = %to_email, first_name, verify_code, "verification mail body");
        Ok(())
    }

    async fn send_password_reset(&self, to_email: &str, first_name: &str, reset_token: &str) -> AppResult<()> {
        tracing::info!(to = %to_email, "password reset mail sent");
        tracing::debug!(to = %to_email, first_name, reset_token, "password reset mail body");
        Ok(())
    }
}

/// Sends in the background; delivery failures are logged and never reach the caller.
pub fn dispatch<F>(timeout: Duration, kind: &'static str, send: F)
where
    F: Future<Output = AppResult<()>> + Send + 'static,
{
    tokio::spawn(async move {
        match tokio::time::timeout(timeout, send).await {
            Ok(Ok(())) => tracing::debug!(kind, "mail delivered"),
            Ok(Err(err)) => tracing::error!(kind, error = %err, "mail delivery failed"),
            Err(_) => tracing::warn!(kind, ?timeout, "mail delivery timed out"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn slow_delivery_is_abandoned() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();

        dispatch(Duration::from_millis(10), "test", async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }
}
