//! Discovery of existing resources through ordered match strategies.

use std::collections::BTreeMap;
use std::sync::Arc;

use berth_provider::{CloudProvider, ProviderError, RemoteResource, ResourceKind};
use tracing::{debug, warn};

use crate::error::NodeFailure;
use crate::payload::PayloadRenderer;
use crate::resource::{MatchStrategy, ResourceHandle, ResourceSpec};

/// Outcome of evaluating a single strategy.
#[derive(Debug)]
pub enum StrategyOutcome {
    None,
    One(RemoteResource),
    Many(Vec<RemoteResource>),
    /// Throttling, conflict or network trouble; counts as no result
    TransientError(ProviderError),
}

/// Outcome of discovery across all strategies of a spec.
#[derive(Debug, Clone, PartialEq)]
pub enum Discovery {
    /// Nothing matched; the resource must be created
    NotFound,
    /// Exactly one match from `strategy`
    Found {
        resource: RemoteResource,
        strategy: String,
    },
    /// `strategy` matched several resources; never resolved automatically
    Ambiguous {
        strategy: String,
        candidates: Vec<String>,
    },
}

/// Locates existing resources for a spec.
#[derive(Clone)]
pub struct Discoverer {
    provider: Arc<dyn CloudProvider>,
    renderer: Arc<PayloadRenderer>,
}

impl Discoverer {
    pub fn new(provider: Arc<dyn CloudProvider>) -> Self {
        Self {
            provider,
            renderer: Arc::new(PayloadRenderer::new()),
        }
    }

    /// Evaluate one strategy whose filters are already rendered.
    ///
    /// Non-transient provider errors are returned as `Err`.
    pub async fn evaluate(
        &self,
        kind: ResourceKind,
        strategy: &MatchStrategy,
    ) -> Result<StrategyOutcome, ProviderError> {
        match self.provider.describe(kind, &strategy.filters).await {
            Ok(mut found) => Ok(match found.len() {
                0 => StrategyOutcome::None,
                1 => StrategyOutcome::One(found.remove(0)),
                _ => StrategyOutcome::Many(found),
            }),
            Err(e) if e.is_retryable() => Ok(StrategyOutcome::TransientError(e)),
            Err(e) => Err(e),
        }
    }

    /// Try each strategy of `spec` in order, rendering filter references
    /// against `handles` first.
    pub async fn find(
        &self,
        spec: &ResourceSpec,
        handles: &BTreeMap<String, ResourceHandle>,
    ) -> Result<Discovery, NodeFailure> {
        for strategy in &spec.strategies {
            let rendered = MatchStrategy {
                filters: self.renderer.render_filters(&strategy.filters, handles)?,
                ..strategy.clone()
            };

            let outcome = self
                .evaluate(spec.kind, &rendered)
                .await
                .map_err(|e| classify_describe_error(&e))?;

            match outcome {
                StrategyOutcome::None => {
                    debug!("{} '{}': no match for {}", spec.kind, spec.logical_name, strategy.label);
                }
                StrategyOutcome::One(resource) => {
                    debug!(
                        "{} '{}': {} matched {}",
                        spec.kind, spec.logical_name, strategy.label, resource.id
                    );
                    return Ok(Discovery::Found {
                        resource,
                        strategy: strategy.label.clone(),
                    });
                }
                StrategyOutcome::Many(candidates) => {
                    return Ok(Discovery::Ambiguous {
                        strategy: strategy.label.clone(),
                        candidates: candidates.into_iter().map(|r| r.id).collect(),
                    });
                }
                StrategyOutcome::TransientError(e) => {
                    warn!(
                        "{} '{}': strategy {} skipped after transient error: {}",
                        spec.kind, spec.logical_name, strategy.label, e
                    );
                }
            }
        }
        Ok(Discovery::NotFound)
    }
}

fn classify_describe_error(error: &ProviderError) -> NodeFailure {
    if error.is_permission_or_validation() {
        NodeFailure::PermissionOrValidation {
            message: error.to_string(),
        }
    } else {
        NodeFailure::Provider {
            message: error.to_string(),
        }
    }
}
