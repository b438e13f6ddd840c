//! The worker loop: wait for triggers, process them one at a time.
//!
//! The cursor is a plain local of [`Consumer::run`]. It moves past a
//! trigger once that trigger has been handled, whether the job succeeded,
//! failed, or no longer exists. Only a failure to reach the queue or the
//! payload store leaves it where it is; the loop then backs off and reads
//! again from the same place.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::consts::{INTERNAL_ERROR, PAYLOAD_MISSING};
use crate::dispatch::Dispatcher;
use crate::events::{Event, EventBus};
use crate::job::{Cursor, JobId, JobPayload, Trigger};
use crate::queue::TriggerQueue;
use crate::sink::{DeliveryOutcome, ResultSink};
use crate::store::PayloadStore;
use crate::supervise::{Backoff, LogThrottle};

/// What to do with a trigger whose payload is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum MissingPayloadPolicy {
    /// Log and move on; no result is written.
    #[default]
    Skip,
    /// Also write a `payload missing` result so pollers stop waiting.
    Placeholder,
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub start: Cursor,
    pub missing_payload: MissingPayloadPolicy,
    pub backoff: Backoff,
    /// Minimum gap between two transport error lines.
    pub log_interval: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            start: Cursor::Tail,
            missing_payload: MissingPayloadPolicy::Skip,
            backoff: Backoff::default(),
            log_interval: Duration::from_secs(10),
        }
    }
}

/// How one trigger ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Processed {
    Missing,
    Completed { job_id: JobId, delivered: bool },
    /// The internal-error result was written instead.
    Failed { job_id: JobId },
}

pub struct Consumer {
    queue: Arc<dyn TriggerQueue>,
    payloads: Arc<dyn PayloadStore>,
    dispatcher: Dispatcher,
    sink: ResultSink,
    events: Arc<EventBus>,
    config: ConsumerConfig,
}

impl Consumer {
    pub fn new(
        queue: Arc<dyn TriggerQueue>,
        payloads: Arc<dyn PayloadStore>,
        dispatcher: Dispatcher,
        sink: ResultSink,
        events: Arc<EventBus>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            queue,
            payloads,
            dispatcher,
            sink,
            events,
            config,
        }
    }

    /// Runs until `cancel` fires. Cancellation is honoured while waiting
    /// and between jobs, never in the middle of one. Returns the cursor
    /// the loop stopped at.
    pub async fn run(&self, cancel: CancellationToken) -> Cursor {
        let mut cursor = self.config.start;
        let mut backoff = self.config.backoff.clone();
        let mut throttle = LogThrottle::new(self.config.log_interval);

        tracing::info!(?cursor, "consumer started");

        'outer: loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                read = self.queue.read(&cursor) => read,
            };

            let failure = match read {
                Ok(batch) => {
                    let mut failure = None;
                    for trigger in batch {
                        if cancel.is_cancelled() {
                            break 'outer;
                        }
                        match self.process(&trigger).await {
                            Ok(_) => cursor = Cursor::After(trigger.sequence_id),
                            Err(e) => {
                                // Pin a tail cursor so the retry reads this
                                // trigger again instead of the new tail.
                                if cursor == Cursor::Tail {
                                    cursor = Cursor::After(trigger.sequence_id.predecessor());
                                }
                                failure = Some(e);
                                break;
                            }
                        }
                    }
                    failure
                }
                Err(e) => Some(e),
            };

            let Some(error) = failure else {
                backoff.reset();
                continue;
            };

            let delay = backoff.next_delay();
            if let Some(suppressed) = throttle.permit() {
                tracing::error!(
                    error = %format!("{error:#}"),
                    attempt = backoff.attempts(),
                    suppressed,
                    ?delay,
                    "transport failure, retrying"
                );
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!(?cursor, "consumer stopped");
        cursor
    }

    /// Handles one trigger end to end. `Err` only when the payload store
    /// could not be reached; the trigger has then not been handled.
    pub async fn process(&self, trigger: &Trigger) -> Result<Processed> {
        tracing::info!(sequence_id = %trigger.sequence_id, job_id = %trigger.job_id, "trigger received");
        self.events.emit(Event::TriggerReceived {
            sequence_id: trigger.sequence_id,
            job_id: trigger.job_id.clone(),
        });

        let Ok(job_id) = trigger.job_id.parse::<JobId>() else {
            tracing::warn!(sequence_id = %trigger.sequence_id, job_id = %trigger.job_id, "trigger does not name a valid job");
            self.events.emit(Event::PayloadMissing {
                sequence_id: trigger.sequence_id,
                job_id: trigger.job_id.clone(),
            });
            return Ok(Processed::Missing);
        };

        let stored = self
            .payloads
            .fetch_raw(&job_id)
            .await
            .with_context(|| format!("failed to fetch payload for job {job_id}"))?;

        let Some(raw) = stored else {
            return Ok(self.missing(trigger, &job_id).await);
        };

        let outcome = AssertUnwindSafe(self.run_job(&job_id, &raw))
            .catch_unwind()
            .await;

        Ok(match outcome {
            Ok(Ok(delivered)) => Processed::Completed { job_id, delivered },
            Ok(Err(e)) => self.fail(&job_id, format!("{e:#}")).await,
            Err(panic) => self.fail(&job_id, panic_message(panic.as_ref())).await,
        })
    }

    async fn run_job(&self, job_id: &JobId, raw: &str) -> Result<bool> {
        let value: serde_json::Value =
            serde_json::from_str(raw).context("payload is not valid JSON")?;
        let payload = JobPayload::parse(&value).context("malformed payload")?;

        self.events.emit(Event::DispatchStarted { job_id: *job_id });
        let text = self.dispatcher.dispatch(job_id, &payload).await;

        self.sink.persist(job_id, &text).await?;
        self.events.emit(Event::ResultPersisted { job_id: *job_id });

        let delivered = match self.sink.deliver(job_id, &text, &payload.metadata).await {
            DeliveryOutcome::Delivered { .. } => {
                self.events.emit(Event::Delivered { job_id: *job_id });
                true
            }
            DeliveryOutcome::Failed { error, .. } => {
                self.events.emit(Event::DeliveryFailed {
                    job_id: *job_id,
                    error,
                });
                false
            }
        };
        Ok(delivered)
    }

    async fn missing(&self, trigger: &Trigger, job_id: &JobId) -> Processed {
        tracing::warn!(sequence_id = %trigger.sequence_id, %job_id, "no payload found for job");
        self.events.emit(Event::PayloadMissing {
            sequence_id: trigger.sequence_id,
            job_id: trigger.job_id.clone(),
        });

        if self.config.missing_payload == MissingPayloadPolicy::Placeholder {
            if let Err(e) = self.sink.persist(job_id, PAYLOAD_MISSING).await {
                tracing::error!(%job_id, error = %format!("{e:#}"), "failed to record missing payload");
            }
        }
        Processed::Missing
    }

    async fn fail(&self, job_id: &JobId, error: String) -> Processed {
        tracing::error!(%job_id, %error, "job processing failed");
        if let Err(e) = self.sink.persist(job_id, INTERNAL_ERROR).await {
            tracing::error!(%job_id, error = %format!("{e:#}"), "failed to record internal error");
        }
        self.events.emit(Event::JobFailed {
            job_id: *job_id,
            error,
        });
        Processed::Failed { job_id: *job_id }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic".to_string()
    }
}
