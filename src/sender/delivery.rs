use super::Transport;
use crate::domain::LogEvent;
use std::time::Duration;
use tracing::{debug, warn};

/// Statuses worth an immediate re-attempt; everything else non-2xx is final
/// for this attempt sequence.
pub(crate) const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Final result of one logical delivery attempt sequence.
///
/// Delivery failures are ordinary control-flow values at every layer; `send`
/// never returns an `Err` for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The endpoint accepted the event with a 2xx status.
    Success,
    /// Every attempt failed with a transient condition (connect/timeout error
    /// or a status in [`RETRYABLE_STATUSES`]).
    Retryable,
    /// The endpoint rejected the event with a non-retryable status, e.g. 400
    /// or 401. Reported after a single attempt, with no backoff sleeps.
    Permanent { status: u16 },
}

impl DeliveryOutcome {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn is_failure(self) -> bool {
        !self.is_success()
    }
}

/// Result of one HTTP POST, before retry policy is applied.
enum Attempt {
    Delivered,
    Transient(String),
    Rejected(u16),
}

impl Transport {
    /// Attempts up to `max_retries + 1` POSTs of `event`, sleeping
    /// `backoff_factor * 2^(attempt - 1)` seconds between transient failures.
    ///
    /// The sleep suspends only the calling task; concurrent sends proceed.
    pub async fn send(&self, event: &LogEvent) -> DeliveryOutcome {
        let attempts = self.config.max_retries + 1;

        for attempt in 1..=attempts {
            match self.attempt(event).await {
                Attempt::Delivered => {
                    debug!(
                        event_type = %event.event_type,
                        attempt,
                        "event delivered"
                    );
                    return DeliveryOutcome::Success;
                }
                Attempt::Rejected(status) => {
                    warn!(
                        event_type = %event.event_type,
                        status,
                        "endpoint rejected event; not retrying"
                    );
                    return DeliveryOutcome::Permanent { status };
                }
                Attempt::Transient(reason) => {
                    if attempt < attempts {
                        let delay = backoff_delay(self.config.backoff_factor, attempt);
                        debug!(
                            event_type = %event.event_type,
                            attempt,
                            %reason,
                            "transient delivery failure; retrying in {delay:?}"
                        );
                        tokio::time::sleep(delay).await;
                    } else {
                        warn!(
                            event_type = %event.event_type,
                            attempts,
                            %reason,
                            "delivery failed after exhausting attempts"
                        );
                    }
                }
            }
        }

        DeliveryOutcome::Retryable
    }

    async fn attempt(&self, event: &LogEvent) -> Attempt {
        let result = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.config.api_key)
            .json(event)
            .send()
            .await;

        match result {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    Attempt::Delivered
                } else if RETRYABLE_STATUSES.contains(&status.as_u16()) {
                    Attempt::Transient(format!("HTTP {}", status.as_u16()))
                } else {
                    Attempt::Rejected(status.as_u16())
                }
            }
            // Connection refusals and timeouts land here; both are transient.
            Err(e) => Attempt::Transient(e.to_string()),
        }
    }
}

/// Inter-attempt delay for the immediate retry path; `attempt` counts from 1.
pub fn backoff_delay(backoff_factor: f64, attempt: u32) -> Duration {
    Duration::from_secs_f64(backoff_factor * 2f64.powi(attempt as i32 - 1))
}
