//! Async driver for the provider retry/escalation policy.
//!
//! The pure [`RetryPolicy`] decides what happens next; this module performs
//! the calls, applies per-call timeouts and backoff, validates candidates and
//! reports the outcome. The default mode is serial in configured priority
//! order. With fan-out enabled the first N providers race, each under its
//! own serial policy, and the first accepted candidate wins.

use crate::providers::{Prompt, Provider};
use facsimile::{
    CandidateArtifact, CloneError, Event, GenerationRequest, ProviderErrorKind, RetryPolicy, Step,
    Strategy, Validator, Verdict,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A validator-accepted candidate.
#[derive(Debug, Clone)]
pub struct Accepted {
    pub candidate: CandidateArtifact,
    pub verdict: Verdict,
    /// Provider invocations made, including the accepted one.
    pub attempts: u32,
}

#[derive(Clone)]
pub struct Orchestrator {
    providers: Vec<Arc<dyn Provider>>,
    policy: RetryPolicy,
    validator: Validator,
    call_timeout: Duration,
    fan_out: usize,
}

/// Raises the stop flag when the owning future is dropped, so racing tasks
/// stop at their next attempt boundary.
struct StopOnDrop(Arc<AtomicBool>);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl Orchestrator {
    pub fn new(providers: Vec<Arc<dyn Provider>>, policy: RetryPolicy, validator: Validator) -> Self {
        Self {
            providers,
            policy,
            validator,
            call_timeout: Duration::from_secs(120),
            fan_out: 0,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Race the first `n` providers. Values below 2 keep the serial policy.
    pub fn with_fan_out(mut self, n: usize) -> Self {
        self.fan_out = n;
        self
    }

    pub fn providers(&self) -> &[Arc<dyn Provider>] {
        &self.providers
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Generate until a candidate is accepted, every option is exhausted, or
    /// `deadline` passes. The error is always `GenerationExhausted`.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        deadline: Instant,
    ) -> Result<Accepted, CloneError> {
        let stop = StopOnDrop(Arc::new(AtomicBool::new(false)));
        let racing = self.fan_out.min(self.providers.len());
        if racing < 2 {
            return self
                .run_serial(&self.providers, request, deadline, &stop.0, 0)
                .await;
        }

        let (mut attempts, mut last_error) = match self.race(racing, request, deadline, &stop.0).await {
            Ok(accepted) => return Ok(accepted),
            Err(exhausted) => exhausted,
        };
        if Instant::now() >= deadline {
            return Err(exhausted(attempts, last_error));
        }
        debug!(racing, "no raced provider accepted; continuing serially");
        match self
            .run_serial(&self.providers[racing..], request, deadline, &stop.0, attempts)
            .await
        {
            Ok(accepted) => Ok(accepted),
            Err(CloneError::GenerationExhausted {
                attempts: total,
                last_error: serial_error,
            }) => {
                if total > attempts {
                    last_error = serial_error;
                }
                attempts = total;
                Err(exhausted(attempts, last_error))
            }
            Err(other) => Err(other),
        }
    }

    /// Spawn one serial run per raced provider. Losers are not aborted: the
    /// stop flag ends them at their next attempt boundary and any in-flight
    /// response is ignored.
    async fn race(
        &self,
        racing: usize,
        request: &GenerationRequest,
        deadline: Instant,
        stop: &Arc<AtomicBool>,
    ) -> Result<Accepted, (u32, String)> {
        let request = Arc::new(request.clone());
        let (tx, mut rx) = mpsc::channel(racing);
        for provider in self.providers.iter().take(racing) {
            let this = self.clone();
            let provider = Arc::clone(provider);
            let request = Arc::clone(&request);
            let stop = Arc::clone(stop);
            let tx = tx.clone();
            tokio::spawn(async move {
                let providers = [provider];
                let result = this.run_serial(&providers, &request, deadline, &stop, 0).await;
                let _ = tx.send(result).await;
            });
        }
        drop(tx);

        let mut attempts = 0;
        let mut last_error = String::from("no provider responded");
        loop {
            let received = tokio::time::timeout_at(deadline, rx.recv()).await;
            match received {
                Ok(Some(Ok(mut accepted))) => {
                    stop.store(true, Ordering::SeqCst);
                    accepted.attempts += attempts;
                    return Ok(accepted);
                }
                Ok(Some(Err(CloneError::GenerationExhausted {
                    attempts: n,
                    last_error: e,
                }))) => {
                    attempts += n;
                    last_error = e;
                }
                Ok(Some(Err(other))) => last_error = other.to_string(),
                Ok(None) => return Err((attempts, last_error)),
                Err(_) => {
                    stop.store(true, Ordering::SeqCst);
                    return Err((attempts, "generation deadline exceeded".into()));
                }
            }
        }
    }

    async fn run_serial(
        &self,
        providers: &[Arc<dyn Provider>],
        request: &GenerationRequest,
        deadline: Instant,
        stop: &AtomicBool,
        offset: u32,
    ) -> Result<Accepted, CloneError> {
        let mut step = self.policy.start(providers.len());
        let mut strategy: Option<Strategy> = None;
        let mut attempts = offset;
        let mut last_error = String::from("no providers configured");

        loop {
            let (state, backoff, reduced) = match step {
                Step::Invoke {
                    state,
                    backoff,
                    reduced_scope,
                } => (state, backoff, reduced_scope),
                Step::Done | Step::Exhausted => return Err(exhausted(attempts, last_error)),
            };
            if stop.load(Ordering::SeqCst) {
                return Err(exhausted(attempts, "cancelled after another provider won".into()));
            }
            if !backoff.is_zero() {
                tokio::time::sleep_until((Instant::now() + backoff).min(deadline)).await;
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(attempts, "generation deadline exceeded");
                return Err(exhausted(attempts, "generation deadline exceeded".into()));
            }

            let provider = &providers[state.provider];
            let identity = provider.identity().to_string();
            let prompt = Prompt {
                system: request.system().to_string(),
                user: request.user_message(state.escalation, strategy, reduced),
                params: request.params(),
            };
            attempts = offset + state.attempt;
            let call_timeout = self.call_timeout.min(deadline - now);
            debug!(
                provider = %identity,
                attempt = attempts,
                escalation = state.escalation,
                transport_attempt = state.transport_attempt,
                reduced,
                "invoking provider"
            );

            let started = Instant::now();
            let outcome = tokio::time::timeout(call_timeout, provider.invoke(&prompt)).await;
            let latency_ms = started.elapsed().as_millis() as u64;

            let event = match outcome {
                Err(_) => {
                    last_error = transport_error(&identity, ProviderErrorKind::Timeout, &format!(
                        "no response within {}ms",
                        call_timeout.as_millis()
                    ));
                    warn!(provider = %identity, attempt = attempts, latency_ms, "provider call timed out");
                    Event::TransportFailed
                }
                Ok(Err(e)) => {
                    last_error = transport_error(&identity, e.kind, &e.message);
                    warn!(provider = %identity, attempt = attempts, latency_ms, kind = %e.kind, "provider call failed");
                    Event::TransportFailed
                }
                Ok(Ok(content)) => {
                    let verdict = self.validator.validate(&content, request.assets());
                    if verdict.accepted {
                        info!(
                            provider = %identity,
                            attempt = attempts,
                            escalation = state.escalation,
                            latency_ms,
                            score = verdict.score,
                            "candidate accepted"
                        );
                        return Ok(Accepted {
                            candidate: CandidateArtifact {
                                provider: identity,
                                attempt: attempts,
                                escalation_level: state.escalation,
                                latency_ms,
                                content,
                            },
                            verdict,
                            attempts,
                        });
                    }
                    strategy = verdict.strategy();
                    last_error = CloneError::ValidationRejected {
                        provider: identity.clone(),
                        reasons: verdict.reasons(),
                    }
                    .to_string();
                    info!(
                        provider = %identity,
                        attempt = attempts,
                        escalation = state.escalation,
                        latency_ms,
                        reasons = %verdict.reasons(),
                        "candidate rejected"
                    );
                    Event::Rejected
                }
            };
            step = self.policy.next(providers.len(), state, event);
        }
    }
}

fn transport_error(provider: &str, kind: ProviderErrorKind, message: &str) -> String {
    CloneError::ProviderTransport {
        provider: provider.to_string(),
        kind,
        message: message.to_string(),
    }
    .to_string()
}

fn exhausted(attempts: u32, last_error: String) -> CloneError {
    CloneError::GenerationExhausted {
        attempts,
        last_error,
    }
}
