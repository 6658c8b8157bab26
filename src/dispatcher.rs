//! Dispatcher (C9) — the request state machine: AUTHENTICATING →
//! FILTERING → SELECTING → FORWARDING → ACCOUNTING → DONE. Generalizes
//! the teacher's `generate`/`parallel_generate` retry loop ("try a key,
//! on failure mark its status and move to the next one") into the full
//! machine of §4.9, including the decision chain and the streaming
//! accountant.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::StreamExt;
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;
use uuid::Uuid;

use crate::adapters::adapter_for;
use crate::auth::Principal;
use crate::error::GatewayError;
use crate::models::{DecisionAttempt, ProviderType, UsageCounts};
use crate::selector::SelectionInput;
use crate::session::SessionInfo;
use crate::state::GatewayState;
use crate::stream::{SseFrameParser, UsageAccumulator};
use crate::usage::NewMessageRequest;

/// Retries are bounded by a small constant, never exceeding the number of
/// candidate providers that could plausibly exist for one request.
const MAX_ATTEMPTS: u32 = 5;
/// After client disconnect, the upstream drainer runs to end-of-stream or
/// this hard deadline, whichever comes first (§5 cancellation policy).
const DRAIN_GRACE: Duration = Duration::from_secs(5);

pub struct DispatchRequest {
    pub principal: Principal,
    pub requested_model: String,
    pub provider_type: ProviderType,
    pub session_id: Option<String>,
    pub upstream_path: String,
    pub body: Value,
    pub user_agent: Option<String>,
    pub text_fragments: Vec<String>,
}

pub enum DispatchOutcome {
    Blocked(GatewayError),
    Forwarded {
        status: u16,
        content_type: Option<String>,
        body: axum::body::Body,
    },
}

pub struct Dispatcher {
    state: Arc<GatewayState>,
}

impl Dispatcher {
    pub fn new(state: Arc<GatewayState>) -> Self {
        Self { state }
    }

    pub async fn dispatch(&self, req: DispatchRequest) -> DispatchOutcome {
        let start = Instant::now();
        let (user_id, key_id) = match (req.principal.user_id(), req.principal.key_id()) {
            (Some(u), Some(k)) => (u, k),
            // the synthetic admin principal never calls the data plane
            _ => return DispatchOutcome::Blocked(GatewayError::AuthFailed),
        };

        // FILTERING
        let hit = {
            let filter = self.state.filter.read().unwrap();
            filter.scan_fragments(req.text_fragments.iter().map(|s| s.as_str()))
        };
        if let Some(detection) = hit {
            let err = GatewayError::BlockedByPolicy {
                word: detection.word,
                match_type: detection.match_type.as_str(),
                snippet: detection.snippet,
            };
            self.record_blocked(user_id, key_id, &req, &err, start.elapsed());
            return DispatchOutcome::Blocked(err);
        }

        // A key's own cost windows (§3: keys carry {5h, weekly, monthly}
        // budgets independent of whichever provider ends up serving the
        // request) are checked once, up front — unlike a provider's
        // windows, they aren't part of the per-attempt candidate filter.
        if !self
            .state
            .rate_limits
            .key_within_cost_windows(key_id, req.principal.key_budgets().unwrap_or_default())
            .await
        {
            let err = GatewayError::LocallyRateLimited;
            self.record_error(user_id, key_id, &req, req.session_id.as_deref().unwrap_or(""), &[], &err, start.elapsed());
            return DispatchOutcome::Blocked(err);
        }

        let session_id = req
            .session_id
            .clone()
            .unwrap_or_else(crate::session::SessionTracker::mint_session_id);

        // SELECTING + FORWARDING, looping on retryable failure.
        let mut excluded = HashSet::new();
        let mut attempt_number = 1u32;
        let mut chain: Vec<DecisionAttempt> = Vec::new();
        let providers = match self.state.store.list_enabled_providers(req.provider_type) {
            Ok(p) => p,
            Err(e) => {
                let err = GatewayError::Other(e);
                self.record_error(user_id, key_id, &req, &session_id, &chain, &err, start.elapsed());
                return DispatchOutcome::Blocked(err);
            }
        };
        let provider_group = match self.state.store.get_user(user_id) {
            Ok(Some(u)) => u.provider_group,
            _ => None,
        };

        loop {
            if attempt_number as usize > MAX_ATTEMPTS as usize {
                let err = GatewayError::NoCandidateProvider {
                    filter: "retry_budget_exhausted",
                };
                self.record_error(user_id, key_id, &req, &session_id, &chain, &err, start.elapsed());
                return DispatchOutcome::Blocked(err);
            }

            let selection = self
                .state
                .selector
                .select(SelectionInput {
                    providers: &providers,
                    requested_model: &req.requested_model,
                    provider_type: req.provider_type,
                    provider_group: provider_group.as_deref(),
                    session_id: &session_id,
                    excluded: &excluded,
                    attempt_number,
                })
                .await;

            let selection = match selection {
                Ok(s) => s,
                Err(err) => {
                    self.record_error(user_id, key_id, &req, &session_id, &chain, &err, start.elapsed());
                    return DispatchOutcome::Blocked(err);
                }
            };
            chain.extend(selection.concurrency_rejections.iter().cloned());
            chain.push(selection.attempt.clone());

            let mut body = req.body.clone();
            if let Some(obj) = body.as_object_mut() {
                obj.insert("model".to_string(), Value::String(selection.outbound_model.clone()));
            }

            let adapter = adapter_for(selection.provider.provider_type);
            let url = format!(
                "{}{}",
                selection.provider.base_url.trim_end_matches('/'),
                req.upstream_path
            );
            let builder = self.state.http_client.post(url).json(&body);
            let builder = adapter.authenticate(builder, &selection.provider);

            match builder.send().await {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if status == 200 {
                        self.state.circuits.record_success(selection.provider.id);
                        if attempt_number > 1 {
                            if let Some(last) = chain.last_mut() {
                                *last = DecisionAttempt::RetrySuccess {
                                    provider_id: selection.provider.id,
                                    provider_name: selection.provider.display_name.clone(),
                                    priority: selection.provider.priority,
                                    weight: selection.provider.weight,
                                    cost_multiplier: selection.provider.effective_multiplier(),
                                    attempt_number,
                                    timestamp: chrono::Utc::now(),
                                };
                            }
                        }
                        let info = SessionInfo {
                            session_id: session_id.clone(),
                            user_id,
                            key_id,
                            model: selection.outbound_model.clone(),
                            api_type: provider_type_label(req.provider_type).to_string(),
                            started_at: chrono::Utc::now(),
                            last_provider_id: Some(selection.provider.id),
                        };
                        self.state
                            .sessions
                            .heartbeat(&session_id, key_id, selection.provider.id, &info)
                            .await;

                        let content_type = resp
                            .headers()
                            .get(reqwest::header::CONTENT_TYPE)
                            .and_then(|v| v.to_str().ok())
                            .map(|s| s.to_string());

                        let body_stream = self.tee_and_account(
                            resp,
                            start,
                            user_id,
                            key_id,
                            selection.provider.id,
                            selection.provider.effective_multiplier(),
                            req.requested_model.clone(),
                            selection.outbound_model.clone(),
                            session_id.clone(),
                            chain.clone(),
                            req.user_agent.clone(),
                        );

                        return DispatchOutcome::Forwarded {
                            status,
                            content_type,
                            body: body_stream,
                        };
                    }

                    if adapter.is_retryable_status(status) {
                        self.state.circuits.record_failure(selection.provider.id);
                        let body_text = resp.text().await.unwrap_or_default();
                        chain.push(DecisionAttempt::RetryFailed {
                            provider_id: selection.provider.id,
                            provider_name: selection.provider.display_name.clone(),
                            attempt_number,
                            timestamp: chrono::Utc::now(),
                            error_message: format!("upstream {status}"),
                        });
                        excluded.insert(selection.provider.id);
                        attempt_number += 1;
                        let _ = body_text;
                        continue;
                    }

                    // upstream 401/403 from a live probe also penalizes the
                    // breaker per §4.9's failure semantics
                    if status == 401 || status == 403 {
                        self.state.circuits.record_failure(selection.provider.id);
                    }

                    let body_text = resp.text().await.unwrap_or_default();
                    let err = GatewayError::UpstreamFatal {
                        status,
                        body: body_text,
                    };
                    self.record_error(user_id, key_id, &req, &session_id, &chain, &err, start.elapsed());
                    return DispatchOutcome::Blocked(err);
                }
                Err(e) => {
                    self.state.circuits.record_failure(selection.provider.id);
                    chain.push(DecisionAttempt::RetryFailed {
                        provider_id: selection.provider.id,
                        provider_name: selection.provider.display_name.clone(),
                        attempt_number,
                        timestamp: chrono::Utc::now(),
                        error_message: e.to_string(),
                    });
                    excluded.insert(selection.provider.id);
                    attempt_number += 1;
                    continue;
                }
            }
        }
    }

    /// Tees the upstream byte stream: relayed to the client as an axum
    /// `Body`, and simultaneously parsed for usage by a subordinate task
    /// (§5: "may spawn a subordinate task to drain the upstream stream
    /// independently of the client-facing writer"). On client disconnect
    /// the drainer keeps consuming for `DRAIN_GRACE` before finalizing.
    #[allow(clippy::too_many_arguments)]
    fn tee_and_account(
        &self,
        resp: reqwest::Response,
        start: Instant,
        user_id: Uuid,
        key_id: Uuid,
        provider_id: Uuid,
        multiplier: Decimal,
        original_model: String,
        observed_model: String,
        session_id: String,
        chain: Vec<DecisionAttempt>,
        user_agent: Option<String>,
    ) -> axum::body::Body {
        let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(16);
        let state = Arc::clone(&self.state);

        tokio::spawn(async move {
            let mut upstream = resp.bytes_stream();
            let mut parser = SseFrameParser::new();
            let mut accumulator = UsageAccumulator::new();
            // Armed only once the client actually goes away, so a stream
            // longer than DRAIN_GRACE doesn't get truncated by a clock that
            // started ticking at the first byte.
            let deadline = tokio::time::sleep(DRAIN_GRACE);
            tokio::pin!(deadline);
            let mut client_gone = false;

            loop {
                tokio::select! {
                    chunk = upstream.next() => {
                        match chunk {
                            Some(Ok(bytes)) => {
                                if !client_gone && tx.send(Ok(bytes.clone())).await.is_err() {
                                    client_gone = true;
                                    deadline.as_mut().reset(tokio::time::Instant::now() + DRAIN_GRACE);
                                }
                                if let Ok(text) = std::str::from_utf8(&bytes) {
                                    parser.push_chunk(text);
                                    while let Some(event) = parser.next_event() {
                                        accumulator.feed(&event);
                                    }
                                }
                            }
                            Some(Err(e)) => {
                                warn!(error = %e, "error reading upstream stream");
                                break;
                            }
                            None => break,
                        }
                    }
                    _ = &mut deadline, if client_gone => {
                        break;
                    }
                }
            }

            let usage = accumulator.finish().unwrap_or_default();
            finalize_accounting(
                &state,
                start,
                user_id,
                key_id,
                provider_id,
                multiplier,
                original_model,
                observed_model,
                session_id,
                chain,
                usage,
                user_agent,
            )
            .await;
        });

        axum::body::Body::from_stream(ReceiverStream::new(rx))
    }

    fn record_blocked(
        &self,
        user_id: Uuid,
        key_id: Uuid,
        req: &DispatchRequest,
        err: &GatewayError,
        duration: Duration,
    ) {
        if let GatewayError::BlockedByPolicy { word, .. } = err {
            let recorder = crate::usage::UsageRecorder::new(&self.state.store);
            let _ = recorder.record(NewMessageRequest {
                user_id,
                key_id,
                provider_id: None,
                observed_model: None,
                original_model: req.requested_model.clone(),
                session_id: req
                    .session_id
                    .clone()
                    .unwrap_or_else(crate::session::SessionTracker::mint_session_id),
                http_status: 400,
                duration_ms: duration.as_millis() as u64,
                usage: UsageCounts::default(),
                cost_usd: Decimal::ZERO,
                applied_multiplier: Decimal::ONE,
                decision_chain: vec![],
                block_reason: Some(word.clone()),
                error_message: None,
                user_agent: req.user_agent.clone(),
                message_count: 1,
            });
        }
    }

    fn record_error(
        &self,
        user_id: Uuid,
        key_id: Uuid,
        req: &DispatchRequest,
        session_id: &str,
        chain: &[DecisionAttempt],
        err: &GatewayError,
        duration: Duration,
    ) {
        let recorder = crate::usage::UsageRecorder::new(&self.state.store);
        let _ = recorder.record(NewMessageRequest {
            user_id,
            key_id,
            provider_id: None,
            observed_model: None,
            original_model: req.requested_model.clone(),
            session_id: session_id.to_string(),
            http_status: err.status_code().as_u16(),
            duration_ms: duration.as_millis() as u64,
            usage: UsageCounts::default(),
            cost_usd: Decimal::ZERO,
            applied_multiplier: Decimal::ONE,
            decision_chain: chain.to_vec(),
            block_reason: None,
            error_message: Some(err.to_string()),
            user_agent: req.user_agent.clone(),
            message_count: 1,
        });
    }
}

#[allow(clippy::too_many_arguments)]
async fn finalize_accounting(
    state: &GatewayState,
    start: Instant,
    user_id: Uuid,
    key_id: Uuid,
    provider_id: Uuid,
    multiplier: Decimal,
    original_model: String,
    observed_model: String,
    session_id: String,
    chain: Vec<DecisionAttempt>,
    usage: UsageCounts,
    user_agent: Option<String>,
) {
    let (cost, price_missing) = match state.prices.lookup(&observed_model) {
        Ok(price) => (crate::cost::calculate_cost(&usage, &price, multiplier), false),
        Err(_) => (Decimal::ZERO, true),
    };

    state.rate_limits.track_cost(key_id, provider_id, cost).await;

    let recorder = crate::usage::UsageRecorder::new(&state.store);
    let error_message = if price_missing {
        Some("price_missing".to_string())
    } else {
        None
    };
    let _ = recorder.record(NewMessageRequest {
        user_id,
        key_id,
        provider_id: Some(provider_id),
        observed_model: Some(observed_model.clone()),
        original_model,
        session_id,
        http_status: 200,
        duration_ms: start.elapsed().as_millis() as u64,
        usage,
        cost_usd: cost,
        applied_multiplier: multiplier,
        decision_chain: chain,
        block_reason: None,
        error_message,
        user_agent,
        message_count: 1,
    });
}

fn provider_type_label(pt: ProviderType) -> &'static str {
    match pt {
        ProviderType::Claude => "claude",
        ProviderType::Codex => "codex",
    }
}
