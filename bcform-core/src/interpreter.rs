//! Interpreter - Execute Effects using a Provider
//!
//! The Interpreter executes Effects contained in a Plan in order,
//! collecting the results. This is where side effects actually occur.
//! References between resources are resolved right before each Effect runs,
//! using the states produced by the Effects before it.

use crate::effect::Effect;
use crate::plan::Plan;
use crate::provider::{Provider, ProviderError, ProviderResult};
use crate::resolver::{Bindings, bind_state, resolve_resource};
use crate::resource::{Resource, ResourceId, State};

/// Result of executing each Effect
#[derive(Debug)]
pub enum EffectOutcome {
    /// Read succeeded
    Read { state: State },
    /// Create succeeded
    Created { state: State },
    /// Update succeeded
    Updated { state: State },
    /// Delete + create succeeded
    Replaced { state: State },
    /// Delete succeeded
    Deleted { id: ResourceId },
    /// Skipped (e.g., dry-run)
    Skipped { reason: String },
}

impl EffectOutcome {
    /// State produced by the effect, if any
    pub fn state(&self) -> Option<&State> {
        match self {
            EffectOutcome::Read { state }
            | EffectOutcome::Created { state }
            | EffectOutcome::Updated { state }
            | EffectOutcome::Replaced { state } => Some(state),
            EffectOutcome::Deleted { .. } | EffectOutcome::Skipped { .. } => None,
        }
    }
}

/// Result of executing the entire Plan
#[derive(Debug)]
pub struct ApplyResult {
    pub outcomes: Vec<Result<EffectOutcome, ProviderError>>,
    pub success_count: usize,
    pub failure_count: usize,
}

impl ApplyResult {
    pub fn is_success(&self) -> bool {
        self.failure_count == 0
    }
}

/// Interpreter configuration
#[derive(Debug, Clone, Default)]
pub struct InterpreterConfig {
    /// If true, skip actual side effects
    pub dry_run: bool,
    /// Continue on error
    pub continue_on_error: bool,
}

/// Interpreter that executes Effects using a Provider
pub struct Interpreter<P: Provider> {
    provider: P,
    config: InterpreterConfig,
    bindings: Bindings,
}

impl<P: Provider> Interpreter<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            config: InterpreterConfig::default(),
            bindings: Bindings::new(),
        }
    }

    pub fn with_config(mut self, config: InterpreterConfig) -> Self {
        self.config = config;
        self
    }

    /// Seed bindings known before apply (resources that need no change)
    pub fn with_bindings(mut self, bindings: Bindings) -> Self {
        self.bindings = bindings;
        self
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    /// Execute a Plan, interpreting all Effects and causing side effects
    pub async fn apply(&self, plan: &Plan) -> ApplyResult {
        let mut bindings = self.bindings.clone();
        let mut outcomes = Vec::new();
        let mut success_count = 0;
        let mut failure_count = 0;

        for effect in plan.effects() {
            let result = self.execute_effect(effect, &mut bindings).await;
            let failed = result.is_err();

            if failed {
                failure_count += 1;
            } else {
                success_count += 1;
            }
            outcomes.push(result);

            if failed && !self.config.continue_on_error {
                break;
            }
        }

        ApplyResult {
            outcomes,
            success_count,
            failure_count,
        }
    }

    /// Execute a single Effect, recording the produced state in `bindings`
    pub async fn execute_effect(
        &self,
        effect: &Effect,
        bindings: &mut Bindings,
    ) -> ProviderResult<EffectOutcome> {
        if self.config.dry_run {
            return Ok(EffectOutcome::Skipped {
                reason: "dry-run mode".to_string(),
            });
        }

        match effect {
            Effect::Read(resource) => {
                let resource = resolve_fully(resource, bindings)?;
                log::info!("Reading {}", resource.id);
                let state = self.provider.read_data_source(&resource).await?;
                bind_state(bindings, &resource, &state);
                Ok(EffectOutcome::Read { state })
            }
            Effect::Create(resource) => {
                let resource = resolve_fully(resource, bindings)?;
                log::info!("Creating {}", resource.id);
                let state = self.provider.create(&resource).await?;
                bind_state(bindings, &resource, &state);
                Ok(EffectOutcome::Created { state })
            }
            Effect::Update { id, from, to, .. } => {
                let to = resolve_fully(to, bindings)?;
                let identifier = from.identifier.as_deref().ok_or_else(|| {
                    ProviderError::new("Cannot update a resource without an identifier")
                        .for_resource(id.clone())
                })?;
                log::info!("Updating {} ({})", id, identifier);
                let state = self.provider.update(id, identifier, from, &to).await?;
                bind_state(bindings, &to, &state);
                Ok(EffectOutcome::Updated { state })
            }
            Effect::Replace { id, from, to, .. } => {
                let to = resolve_fully(to, bindings)?;
                if let Some(identifier) = from.identifier.as_deref() {
                    log::info!("Replacing {} ({})", id, identifier);
                    self.provider.delete(id, identifier).await?;
                }
                let state = self.provider.create(&to).await?;
                bind_state(bindings, &to, &state);
                Ok(EffectOutcome::Replaced { state })
            }
            Effect::Delete { id, identifier } => {
                log::info!("Deleting {} ({})", id, identifier);
                self.provider.delete(id, identifier).await?;
                Ok(EffectOutcome::Deleted { id: id.clone() })
            }
        }
    }
}

fn resolve_fully(resource: &Resource, bindings: &Bindings) -> ProviderResult<Resource> {
    let resolved = resolve_resource(resource, bindings);
    let mut unresolved: Vec<&String> = resolved
        .attributes
        .iter()
        .filter(|(_, v)| v.contains_ref())
        .map(|(k, _)| k)
        .collect();
    if unresolved.is_empty() {
        return Ok(resolved);
    }
    unresolved.sort();
    let names: Vec<&str> = unresolved.iter().map(|s| s.as_str()).collect();
    Err(ProviderError::new(format!(
        "Unresolved references in attributes: {}",
        names.join(", ")
    ))
    .for_resource(resource.id.clone()))
}
