//! Units of work and the retry loop that drives them.
//!
//! A unit owns its own failures. The runner retries classified-retryable
//! errors within the budget, skips low-severity permanent misses, and
//! otherwise abandons the unit to the dead-letter table.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use serde_json::Value;
use tracing::{error, info};

use crate::correlation::CorrelationId;
use crate::error::{AppError, ErrorPayload, ErrorSeverity};
use crate::models::DeadLetter;
use crate::reporter::ErrorReporter;
use crate::repository::DeadLetterRepository;

/// Exponential backoff budget.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            factor: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Same budget, no sleeping.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            factor: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    /// `min(base * factor^attempt, max_delay)`; attempt 0 is the first retry.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.factor.powi(exponent);
        let max = self.max_delay.as_secs_f64();
        if !secs.is_finite() || secs > max {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs.max(0.0))
        }
    }
}

/// One independently retryable piece of pipeline work.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    type Output: Send;

    /// Operation name recorded on dead letters.
    fn name(&self) -> &str;

    /// The unit's input, kept for manual replay.
    fn payload(&self) -> Value;

    async fn run(&self, cid: &CorrelationId) -> Result<Self::Output, AppError>;

    /// Called once when the unit is abandoned, before it is dead-lettered.
    async fn on_abandon(&self, _err: &AppError, _cid: &CorrelationId) {}
}

#[derive(Debug)]
pub enum WorkOutcome<T> {
    Completed { output: T, attempts: u32 },
    /// Permanent low-severity miss; nothing to inspect.
    Skipped { error: ErrorPayload },
    Failed {
        error: ErrorPayload,
        dead_letter_id: Option<i32>,
    },
}

impl<T> WorkOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    pub fn output(self) -> Option<T> {
        match self {
            Self::Completed { output, .. } => Some(output),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkRunner {
    reporter: ErrorReporter,
    retry: RetryPolicy,
    dead_letters: DeadLetterRepository,
}

impl WorkRunner {
    pub fn new(reporter: ErrorReporter, retry: RetryPolicy, dead_letters: DeadLetterRepository) -> Self {
        Self {
            reporter,
            retry,
            dead_letters,
        }
    }

    pub fn reporter(&self) -> &ErrorReporter {
        &self.reporter
    }

    pub async fn execute<U>(&self, unit: &U, cid: &CorrelationId) -> WorkOutcome<U::Output>
    where
        U: UnitOfWork + ?Sized,
    {
        let mut attempt: u32 = 0;
        loop {
            let err = match unit.run(cid).await {
                Ok(output) => {
                    if attempt > 0 {
                        info!(correlation_id = %cid, operation = unit.name(), attempts = attempt + 1, "Succeeded after retry");
                    }
                    return WorkOutcome::Completed {
                        output,
                        attempts: attempt + 1,
                    };
                }
                Err(err) => err,
            };

            let mut err = err.with_retry_count(attempt);
            err.ensure_correlation(cid);
            let payload = self.reporter.report(&err, cid).await;

            if err.is_retryable() && attempt < self.retry.max_retries {
                let delay = self.retry.delay_for(attempt);
                self.reporter
                    .report_retry(unit.name(), attempt + 1, delay, &err, cid);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
                continue;
            }

            if !err.is_retryable() && err.severity() <= ErrorSeverity::Warning {
                info!(correlation_id = %cid, operation = unit.name(), error_class = err.kind().as_str(), "Skipping unit");
                return WorkOutcome::Skipped { error: payload };
            }

            unit.on_abandon(&err, cid).await;
            let dead_letter_id = self.dead_letter(unit, cid, &payload).await;
            return WorkOutcome::Failed {
                error: payload,
                dead_letter_id,
            };
        }
    }

    /// Run units side by side, each under its own child correlation id.
    pub async fn execute_all<U>(&self, units: &[U], cid: &CorrelationId) -> Vec<WorkOutcome<U::Output>>
    where
        U: UnitOfWork,
    {
        let cids: Vec<CorrelationId> = units.iter().map(|_| cid.child()).collect();
        join_all(
            units
                .iter()
                .zip(cids.iter())
                .map(|(unit, child)| self.execute(unit, child)),
        )
        .await
    }

    async fn dead_letter<U>(&self, unit: &U, cid: &CorrelationId, payload: &ErrorPayload) -> Option<i32>
    where
        U: UnitOfWork + ?Sized,
    {
        let input = unit.payload();
        let error = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => Value::String(e.to_string()),
        };

        match self
            .dead_letters
            .insert(unit.name(), cid.as_str(), &input, &error)
            .await
        {
            Ok(id) => {
                self.reporter.report_dead_letter(&DeadLetter {
                    id,
                    operation: unit.name().to_string(),
                    correlation_id: cid.to_string(),
                    payload: input,
                    error,
                    created_at: Utc::now(),
                });
                Some(id)
            }
            Err(e) => {
                error!(correlation_id = %cid, operation = unit.name(), "Failed to write dead letter: {}", e);
                None
            }
        }
    }
}
