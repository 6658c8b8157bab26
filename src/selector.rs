//! Provider selector (C8) — the layered selection algorithm (§4.8).
//! Generalizes `PoolManager::generate`'s round-robin-over-active-keys
//! loop into priority-layering + weighted random, replacing round robin
//! the way the spec requires while keeping the teacher's existing `rand`
//! dependency for the draw.

use std::collections::HashSet;
use std::sync::Arc;

use rand::Rng;
use uuid::Uuid;

use crate::circuit::CircuitBreakerRegistry;
use crate::error::GatewayError;
use crate::models::{
    CandidateProbability, DecisionAttempt, DecisionContext, FilteredProvider, Provider,
    ProviderType,
};
use crate::ratelimit::RateLimitService;
use crate::session::SessionTracker;

pub struct ProviderSelector {
    circuits: Arc<CircuitBreakerRegistry>,
    rate_limits: Arc<RateLimitService>,
    sessions: Arc<SessionTracker>,
}

pub struct SelectionInput<'a> {
    pub providers: &'a [Provider],
    pub requested_model: &'a str,
    pub provider_type: ProviderType,
    pub provider_group: Option<&'a str>,
    pub session_id: &'a str,
    pub excluded: &'a HashSet<Uuid>,
    pub attempt_number: u32,
}

pub struct Selection {
    pub provider: Provider,
    pub attempt: DecisionAttempt,
    /// Providers rejected by the atomic concurrency gate during this
    /// call, recorded as their own decision-chain entries (§4.9) rather
    /// than only as free-text `DecisionContext::filtered` reasons.
    pub concurrency_rejections: Vec<DecisionAttempt>,
    /// The model name to actually send upstream, after redirection.
    pub outbound_model: String,
}

impl ProviderSelector {
    pub fn new(
        circuits: Arc<CircuitBreakerRegistry>,
        rate_limits: Arc<RateLimitService>,
        sessions: Arc<SessionTracker>,
    ) -> Self {
        Self {
            circuits,
            rate_limits,
            sessions,
        }
    }

    pub async fn select(&self, input: SelectionInput<'_>) -> Result<Selection, GatewayError> {
        let mut concurrency_rejections: Vec<DecisionAttempt> = Vec::new();

        // Step 1: session stickiness.
        if let Some(last_provider_id) = self.sessions.last_provider(input.session_id).await {
            if !input.excluded.contains(&last_provider_id) {
                if let Some(p) = input
                    .providers
                    .iter()
                    .find(|p| p.id == last_provider_id)
                {
                    if p.is_live()
                        && p.provider_type == input.provider_type
                        && !self.circuits.is_open(p.id)
                    {
                        let concurrency = self
                            .rate_limits
                            .check_and_track_concurrency(
                                p.id,
                                input.session_id,
                                p.concurrent_session_cap,
                            )
                            .await;
                        if !concurrency.allowed {
                            concurrency_rejections.push(DecisionAttempt::ConcurrentLimitFailed {
                                provider_id: p.id,
                                provider_name: p.display_name.clone(),
                                attempt_number: input.attempt_number,
                                timestamp: chrono::Utc::now(),
                            });
                        }
                        let cost_ok = p.skips_cost_check()
                            || self
                                .rate_limits
                                .provider_within_cost_windows(p.id, p.budgets)
                                .await;
                        if concurrency.allowed && cost_ok {
                            let outbound_model = redirect_model(p, input.requested_model);
                            return Ok(Selection {
                                attempt: DecisionAttempt::SessionReuse {
                                    provider_id: p.id,
                                    provider_name: p.display_name.clone(),
                                    attempt_number: input.attempt_number,
                                    timestamp: chrono::Utc::now(),
                                },
                                concurrency_rejections,
                                provider: p.clone(),
                                outbound_model,
                            });
                        }
                        if concurrency.allowed && !cost_ok {
                            // Reserved above but cost-capped, so it can
                            // never be the one chosen below either.
                            self.rate_limits.release_concurrency(p.id, input.session_id).await;
                        }
                    }
                }
            }
        }

        let mut ctx = DecisionContext {
            pool_before: input.providers.len(),
            ..Default::default()
        };

        // Step 2: enabled + type + whitelist filter. Per §9 Open
        // Question 2, the whitelist is evaluated against the requested
        // (pre-redirect) model.
        let mut pool: Vec<&Provider> = input
            .providers
            .iter()
            .filter(|p| {
                p.is_live()
                    && p.provider_type == input.provider_type
                    && p.allowed_models
                        .as_ref()
                        .map(|allowed| allowed.is_empty() || allowed.iter().any(|m| m == input.requested_model))
                        .unwrap_or(true)
            })
            .collect();
        ctx.pool_after_type_filter = pool.len();

        // Step 3: group filter, always falling back to the ungrouped set
        // on empty (§9 Open Question 3).
        if let Some(group) = input.provider_group {
            let grouped: Vec<&Provider> = pool
                .iter()
                .copied()
                .filter(|p| p.group_tag.as_deref() == Some(group))
                .collect();
            if grouped.is_empty() {
                ctx.group_fallback = true;
            } else {
                pool = grouped;
            }
        }
        ctx.pool_after_group_filter = pool.len();

        // Step 4: health filter (circuit state) + atomic concurrency. Every
        // survivor here has already been ZADD'd into its own active-session
        // set, not just the one eventually chosen in step 8 — `tracked_ids`
        // lets the tail end of this function release the reservations that
        // don't end up corresponding to real traffic.
        let mut survivors = Vec::new();
        let mut tracked_ids: Vec<Uuid> = Vec::new();
        for p in pool {
            if self.circuits.is_open(p.id) {
                ctx.filtered.push(FilteredProvider {
                    provider_id: p.id,
                    reason: "circuit_open".to_string(),
                });
                continue;
            }
            let concurrency = self
                .rate_limits
                .check_and_track_concurrency(p.id, input.session_id, p.concurrent_session_cap)
                .await;
            if !concurrency.allowed {
                ctx.filtered.push(FilteredProvider {
                    provider_id: p.id,
                    reason: "concurrent_limit_failed".to_string(),
                });
                concurrency_rejections.push(DecisionAttempt::ConcurrentLimitFailed {
                    provider_id: p.id,
                    provider_name: p.display_name.clone(),
                    attempt_number: input.attempt_number,
                    timestamp: chrono::Utc::now(),
                });
                continue;
            }
            tracked_ids.push(p.id);
            survivors.push(p);
        }
        ctx.pool_after_health_filter = survivors.len();

        if survivors.is_empty() {
            return Err(GatewayError::NoCandidateProvider {
                filter: "health_filter",
            });
        }

        // Step 5: cost-window filter.
        let mut cost_survivors = Vec::new();
        for p in survivors {
            let ok = p.skips_cost_check()
                || self
                    .rate_limits
                    .provider_within_cost_windows(p.id, p.budgets)
                    .await;
            if ok {
                cost_survivors.push(p);
            } else {
                ctx.filtered.push(FilteredProvider {
                    provider_id: p.id,
                    reason: "cost_capped".to_string(),
                });
            }
        }
        ctx.pool_after_cost_filter = cost_survivors.len();

        if cost_survivors.is_empty() {
            self.release_all(&tracked_ids, input.session_id).await;
            return Err(GatewayError::NoCandidateProvider {
                filter: "cost_window_filter",
            });
        }

        // Step 6: exclusion filter.
        let remaining: Vec<&Provider> = cost_survivors
            .into_iter()
            .filter(|p| !input.excluded.contains(&p.id))
            .collect();
        ctx.pool_after_exclusion_filter = remaining.len();

        if remaining.is_empty() {
            self.release_all(&tracked_ids, input.session_id).await;
            return Err(GatewayError::NoCandidateProvider {
                filter: "exclusion_filter",
            });
        }

        // Step 7: priority layering.
        let min_priority = remaining.iter().map(|p| p.priority).min().unwrap();
        let layer: Vec<&Provider> = remaining
            .into_iter()
            .filter(|p| p.priority == min_priority)
            .collect();
        ctx.selected_priority = Some(min_priority);

        // Step 8: cost ordering (metadata only) + weighted random draw.
        let mut by_cost = layer.clone();
        by_cost.sort_by(|a, b| a.effective_multiplier().cmp(&b.effective_multiplier()));

        let total_weight: u32 = layer.iter().map(|p| p.weight as u32).sum();
        let candidates: Vec<CandidateProbability> = by_cost
            .iter()
            .map(|p| CandidateProbability {
                provider_id: p.id,
                weight: p.weight,
                cost_multiplier: p.effective_multiplier(),
                probability: if total_weight == 0 {
                    1.0 / by_cost.len() as f64
                } else {
                    p.weight as f64 / total_weight as f64
                },
            })
            .collect();
        ctx.candidates = candidates;

        let chosen = weighted_choice(&layer);

        for id in &tracked_ids {
            if *id != chosen.id {
                self.rate_limits.release_concurrency(*id, input.session_id).await;
            }
        }

        // Step 9: model redirection, applied only after the provider is
        // chosen; the original model is recorded separately by the caller.
        let outbound_model = redirect_model(chosen, input.requested_model);

        Ok(Selection {
            attempt: DecisionAttempt::InitialSelection {
                provider_id: chosen.id,
                provider_name: chosen.display_name.clone(),
                selection_method: "priority_weighted_random".to_string(),
                priority: chosen.priority,
                weight: chosen.weight,
                cost_multiplier: chosen.effective_multiplier(),
                circuit_state: self.circuits.state(chosen.id).to_string(),
                attempt_number: input.attempt_number,
                timestamp: chrono::Utc::now(),
                decision_context: ctx,
            },
            concurrency_rejections,
            provider: chosen.clone(),
            outbound_model,
        })
    }

    /// Releases every speculative concurrency reservation in `ids` — used
    /// when a later filter empties the pool and none of them end up serving
    /// the request.
    async fn release_all(&self, ids: &[Uuid], session_id: &str) {
        for id in ids {
            self.rate_limits.release_concurrency(*id, session_id).await;
        }
    }
}

fn redirect_model(provider: &Provider, requested_model: &str) -> String {
    provider
        .model_redirect
        .as_ref()
        .and_then(|map| map.get(requested_model))
        .cloned()
        .unwrap_or_else(|| requested_model.to_string())
}

/// Weighted random draw over `weight`. If all weights are zero, falls
/// back to a uniform draw so a single surviving candidate is still
/// chosen directly (§4.8 edge case).
fn weighted_choice<'a>(layer: &[&'a Provider]) -> &'a Provider {
    if layer.len() == 1 {
        return layer[0];
    }
    let total_weight: u32 = layer.iter().map(|p| p.weight as u32).sum();
    if total_weight == 0 {
        let idx = rand::thread_rng().gen_range(0..layer.len());
        return layer[idx];
    }
    let mut roll = rand::thread_rng().gen_range(0..total_weight);
    for p in layer {
        let w = p.weight as u32;
        if roll < w {
            return p;
        }
        roll -= w;
    }
    layer[layer.len() - 1]
}
