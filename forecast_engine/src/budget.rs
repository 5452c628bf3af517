//! Deadlines and cooperative cancellation for long-running fits

use crate::error::{ForecastError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared flag a caller can flip to stop an in-flight fit
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of every fit holding a clone of this token
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Time and cancellation limits checked between training steps
#[derive(Debug, Clone, Default)]
pub struct FitBudget {
    deadline: Option<Instant>,
    token: Option<CancellationToken>,
}

impl FitBudget {
    /// A budget that never interrupts
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// A budget expiring `timeout` from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(timeout),
            token: None,
        }
    }

    /// Attach a cancellation token
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Fail with [`ForecastError::Interrupted`] once the budget is spent
    pub fn check(&self, stage: &str) -> Result<()> {
        if self.token.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Err(ForecastError::Interrupted(format!(
                "cancelled during {stage}"
            )));
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(ForecastError::Interrupted(format!(
                "deadline exceeded during {stage}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_budget_never_interrupts() {
        assert!(FitBudget::unbounded().check("training").is_ok());
    }

    #[test]
    fn test_cancelled_token_interrupts() {
        let token = CancellationToken::new();
        let budget = FitBudget::unbounded().with_token(token.clone());
        assert!(budget.check("training").is_ok());

        token.cancel();
        let err = budget.check("training").unwrap_err();
        assert!(matches!(err, ForecastError::Interrupted(_)));
    }

    #[test]
    fn test_expired_deadline_interrupts() {
        let budget = FitBudget::with_timeout(Duration::ZERO);
        assert!(budget.check("boosting").is_err());
    }
}
