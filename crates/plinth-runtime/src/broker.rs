//! Action broker.
//!
//! The broker is the trust boundary between the unprivileged panel and the
//! privileged action programs. Each submission moves through
//! `Received -> Validated -> Dispatched` and ends in exactly one of
//! `Completed`, `Rejected`, `Failed` or `TimedOut`; every terminal state is
//! written to the audit log before the caller sees it.

use plinth_audit::{AuditLogger, AuditOutcome, AuditRecord};
use plinth_core::{ActionRequest, ActionResult, BrokerConfig, PlinthConfig, ResponseFormat};
use plinth_policy::ArgumentValidator;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use crate::codec;
use crate::error::{BrokerError, StartupError};
use crate::invoker::{Invocation, Invoker, ProcessInvoker};
use crate::locks::DispatchGate;
use crate::registry::{Registry, RegistryError};

pub struct ActionBroker {
    registry: RwLock<Arc<Registry>>,
    config: BrokerConfig,
    dispatcher: Dispatcher,
}

/// Everything a submission needs once it leaves the caller's task.
#[derive(Clone)]
struct Dispatcher {
    invoker: Arc<dyn Invoker>,
    audit: Arc<AuditLogger>,
    gate: Arc<DispatchGate>,
}

impl ActionBroker {
    pub fn new(
        registry: Registry,
        invoker: Arc<dyn Invoker>,
        audit: Arc<AuditLogger>,
        config: BrokerConfig,
    ) -> Self {
        let gate = Arc::new(DispatchGate::new(&config));
        Self {
            registry: RwLock::new(Arc::new(registry)),
            config,
            dispatcher: Dispatcher {
                invoker,
                audit,
                gate,
            },
        }
    }

    /// Assemble a broker from configuration: load the registry, open the
    /// audit log and build the process invoker.
    ///
    /// Fails if audit logging is disabled.
    pub fn from_config(config: &PlinthConfig) -> Result<Self, StartupError> {
        if !config.audit.enabled {
            return Err(StartupError::AuditDisabled);
        }

        let registry = Registry::load(&config.actions_dir, &config.broker)?;
        let audit = AuditLogger::open(config.audit.clone())?;
        let invoker = ProcessInvoker::new(&config.escalation, &config.broker);

        tracing::info!(
            actions = registry.len(),
            escalation = ?config.escalation.method,
            max_concurrent = ?config.broker.max_concurrent,
            "Action broker ready"
        );

        Ok(Self::new(
            registry,
            Arc::new(invoker),
            Arc::new(audit),
            config.broker.clone(),
        ))
    }

    /// Current registry snapshot.
    pub fn registry(&self) -> Arc<Registry> {
        let guard = self.registry.read().unwrap_or_else(|p| p.into_inner());
        Arc::clone(&guard)
    }

    /// The audit log this broker writes to.
    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.dispatcher.audit
    }

    /// Re-scan the actions directory and swap in the new registry.
    ///
    /// Invocations already in flight keep the snapshot they started with.
    /// On error the current registry stays in place.
    pub async fn reload(&self) -> Result<Arc<Registry>, RegistryError> {
        let directory = self.registry().directory().to_path_buf();
        let fresh = Arc::new(Registry::load(&directory, &self.config)?);

        let mut guard = self.registry.write().unwrap_or_else(|p| p.into_inner());
        *guard = Arc::clone(&fresh);
        drop(guard);

        tracing::info!(
            directory = %directory.display(),
            actions = fresh.len(),
            "Action registry reloaded"
        );
        Ok(fresh)
    }

    /// Check a request without running anything or writing to the audit log.
    pub fn validate(&self, name: &str, arguments: &BTreeMap<String, Value>) -> Result<(), BrokerError> {
        let registry = self.registry();
        let spec = registry
            .lookup(name)
            .map_err(|_| BrokerError::UnknownAction(name.to_string()))?;
        ArgumentValidator::new(spec).validate(arguments)?;
        Ok(())
    }

    /// Validate, dispatch and audit one action invocation.
    ///
    /// A nonzero exit status is returned as `Ok`; it is the action's answer,
    /// not a broker failure.
    ///
    /// The submission runs on its own task. Dropping the returned future
    /// detaches from it: the program still runs to completion or timeout and
    /// the audit record is still written.
    pub async fn submit(
        &self,
        name: &str,
        arguments: BTreeMap<String, Value>,
    ) -> Result<ActionResult, BrokerError> {
        let received = Instant::now();
        let registry = self.registry();
        let dispatcher = self.dispatcher.clone();
        let owned_name = name.to_string();

        let task = tokio::spawn(async move {
            dispatcher
                .process(registry, owned_name, arguments, received)
                .await
        });

        match task.await {
            Ok(outcome) => outcome,
            Err(source) => {
                tracing::error!(action = %name, error = %source, "Dispatch task aborted");
                Err(BrokerError::Aborted {
                    action: name.to_string(),
                    source,
                })
            }
        }
    }

    /// Blocking wrapper around [`submit`](Self::submit) for callers outside
    /// the async runtime. Must not be called from a runtime worker thread.
    pub fn submit_blocking(
        &self,
        handle: &tokio::runtime::Handle,
        name: &str,
        arguments: BTreeMap<String, Value>,
    ) -> Result<ActionResult, BrokerError> {
        handle.block_on(self.submit(name, arguments))
    }
}

impl Dispatcher {
    async fn process(
        &self,
        registry: Arc<Registry>,
        name: String,
        arguments: BTreeMap<String, Value>,
        received: Instant,
    ) -> Result<ActionResult, BrokerError> {
        let name = name.as_str();

        let spec = match registry.lookup(name) {
            Ok(spec) => spec,
            Err(_) => {
                let error = BrokerError::UnknownAction(name.to_string());
                tracing::warn!(action = %name, "Rejected unknown action");
                let record = AuditRecord::builder(AuditOutcome::Rejected, name, &arguments)
                    .duration_ms(elapsed_ms(received))
                    .reason(error.to_string())
                    .build();
                return self.conclude(name, record, Err(error)).await;
            }
        };

        if let Err(violation) = ArgumentValidator::new(spec).validate(&arguments) {
            tracing::warn!(
                action = %name,
                kind = ?violation.kind,
                argument = ?violation.argument,
                "Rejected invalid arguments"
            );
            let record = AuditRecord::builder(AuditOutcome::Rejected, name, &arguments)
                .duration_ms(elapsed_ms(received))
                .reason(violation.to_string())
                .build();
            return self
                .conclude(name, record, Err(BrokerError::InvalidArguments(violation)))
                .await;
        }

        let request = ActionRequest::new(name, arguments);
        let payload = match codec::encode_request(&request) {
            Ok(payload) => payload,
            Err(source) => {
                let error = BrokerError::Encode(source);
                let record = AuditRecord::builder(AuditOutcome::Failed, name, &request.arguments)
                    .duration_ms(elapsed_ms(received))
                    .reason(error.to_string())
                    .build();
                return self.conclude(name, record, Err(error)).await;
            }
        };

        // Held until the audit record is written, so same-action records
        // land in dispatch order.
        let _guard = self.gate.admit(spec).await;

        let launched = self
            .invoker
            .execute(Invocation {
                action: name,
                executable: &spec.executable_path,
                privileged: spec.privileged,
                payload: &payload,
                timeout: spec.timeout,
            })
            .await;

        let output = match launched {
            Ok(output) => output,
            Err(source) => {
                tracing::error!(action = %name, error = %source, "Action launch failed");
                let reason = source.to_string();
                let record = AuditRecord::builder(AuditOutcome::Failed, name, &request.arguments)
                    .duration_ms(elapsed_ms(received))
                    .reason(reason)
                    .build();
                let error = BrokerError::LaunchFailure {
                    action: name.to_string(),
                    source,
                };
                return self.conclude(name, record, Err(error)).await;
            }
        };

        let mut result = ActionResult {
            action: name.to_string(),
            exit_status: output.exit_status,
            stdout: output.stdout,
            stderr: output.stderr,
            decoded_payload: None,
            timed_out: output.timed_out,
            stdout_truncated: output.stdout_truncated,
            stderr_truncated: output.stderr_truncated,
            started_at: output.started_at,
            finished_at: output.finished_at,
        };

        let (exit_status, started_at, duration_ms) =
            (result.exit_status, result.started_at, result.duration_ms());
        let builder = |outcome| {
            AuditRecord::builder(outcome, name, &request.arguments)
                .exit_status(exit_status)
                .started_at(started_at)
                .duration_ms(duration_ms)
        };

        if result.timed_out {
            let record = builder(AuditOutcome::TimedOut)
                .reason(format!("exceeded {} ms timeout", spec.timeout.as_millis()))
                .build();
            return self
                .conclude(name, record, Err(BrokerError::TimedOut(Box::new(result))))
                .await;
        }

        let framed = match spec.response {
            ResponseFormat::Frame => true,
            ResponseFormat::Auto => codec::looks_like_frame(&result.stdout),
        };
        if framed {
            match codec::decode_response(&result.stdout) {
                Ok(value) => result.decoded_payload = Some(value),
                Err(source) => {
                    tracing::warn!(action = %name, error = %source, "Undecodable response frame");
                    let record = builder(AuditOutcome::Failed)
                        .reason(format!("undecodable response: {source}"))
                        .build();
                    let error = BrokerError::Decode {
                        action: name.to_string(),
                        source,
                        result: Box::new(result),
                    };
                    return self.conclude(name, record, Err(error)).await;
                }
            }
        }

        tracing::info!(
            action = %name,
            exit_status,
            duration_ms,
            payload = result.decoded_payload.is_some(),
            "Action completed"
        );
        let record = builder(AuditOutcome::Completed).build();
        self.conclude(name, record, Ok(result)).await
    }

    /// Write the terminal audit record, then hand back the outcome. A failed
    /// audit write replaces the outcome, success included.
    async fn conclude(
        &self,
        name: &str,
        record: AuditRecord,
        outcome: Result<ActionResult, BrokerError>,
    ) -> Result<ActionResult, BrokerError> {
        match self.audit.record(record).await {
            Ok(_) => outcome,
            Err(source) => {
                tracing::error!(action = %name, error = %source, "Audit write failed");
                let result = match outcome {
                    Ok(result) => Some(Box::new(result)),
                    Err(error) => error.into_result(),
                };
                Err(BrokerError::AuditWriteFailure {
                    action: name.to_string(),
                    source,
                    result,
                })
            }
        }
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}
