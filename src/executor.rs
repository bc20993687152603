use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::eval::{CompositeRuleEngine, EngineError, EvalContext, HookResponse, RuleEngine};
use crate::logging;
use crate::protocol::{self, EXIT_BLOCKING, EXIT_ERROR, EXIT_SUCCESS, HookMessage};
use crate::registry::HookRegistry;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Everything the process should emit for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl Outcome {
    fn failure(message: impl std::fmt::Display) -> Self {
        Self {
            exit_code: EXIT_ERROR,
            stdout: String::new(),
            stderr: format!("cc-lintgate: {message}\n"),
        }
    }
}

/// Top-level driver: decode, evaluate under a deadline, map to an exit code.
pub struct Executor {
    engine: Arc<dyn RuleEngine>,
    registry: Arc<HookRegistry>,
    timeout: Duration,
    cwd: PathBuf,
    log_decisions: bool,
}

impl Executor {
    pub fn new(engine: Arc<dyn RuleEngine>) -> Self {
        Self {
            engine,
            registry: Arc::new(HookRegistry::new()),
            timeout: DEFAULT_TIMEOUT,
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            log_decisions: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_registry(mut self, registry: Arc<HookRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_cwd(mut self, cwd: PathBuf) -> Self {
        self.cwd = cwd;
        self
    }

    /// Append every decision to the decisions log.
    pub fn with_decision_log(mut self, enabled: bool) -> Self {
        self.log_decisions = enabled;
        self
    }

    pub fn registry(&self) -> &HookRegistry {
        &self.registry
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Read the whole request from `reader` and process it.
    pub async fn execute_with_exit_code<R: AsyncRead + Unpin>(&self, mut reader: R) -> Outcome {
        let mut input = Vec::new();
        if let Err(e) = reader.read_to_end(&mut input).await {
            return Outcome::failure(format!("failed to read hook input: {e}"));
        }
        self.process(&input).await
    }

    /// Decode and evaluate one request document. Never blocks on a protocol error.
    pub async fn process(&self, input: &[u8]) -> Outcome {
        let msg = match protocol::decode(input) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("rejecting hook input: {e}");
                return Outcome::failure(e);
            }
        };
        log::debug!("{} {} received", msg.event_type, msg.tool_name);

        let engine = match self.engine_for(&msg) {
            Ok(engine) => engine,
            Err(e) => return Outcome::failure(e),
        };

        let ctx = EvalContext::new(self.cwd.clone(), self.timeout);
        let response = match tokio::time::timeout_at(ctx.deadline, engine.evaluate(&msg, &ctx)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                log::error!("evaluation failed: {e}");
                return Outcome::failure(e);
            }
            Err(_) => {
                log::warn!("evaluation exceeded {:?}", self.timeout);
                return Outcome::failure(format!("evaluation did not finish within {:?}", self.timeout));
            }
        };

        if self.log_decisions {
            logging::log_decision(&msg, &response);
        }
        respond(&response)
    }

    /// Matching registry hooks as a composite, else the primary engine.
    fn engine_for(&self, msg: &HookMessage) -> Result<Arc<dyn RuleEngine>, crate::registry::RegistryError> {
        let hooks = self.registry.resolve(msg.event_type, &msg.tool_name)?;
        if hooks.is_empty() {
            return Ok(self.engine.clone());
        }
        let engines = hooks
            .into_iter()
            .map(|(hook, engine)| {
                Arc::new(TimedEngine {
                    name: hook.name,
                    timeout: hook.timeout,
                    inner: engine,
                }) as Arc<dyn RuleEngine>
            })
            .collect();
        Ok(Arc::new(CompositeRuleEngine::new(engines)))
    }
}

fn respond(response: &HookResponse) -> Outcome {
    let stdout = format!("{}\n", protocol::encode_response(response));
    if response.is_block() {
        Outcome {
            exit_code: EXIT_BLOCKING,
            stdout,
            stderr: format!("{}\n", response.blocking_output()),
        }
    } else {
        Outcome {
            exit_code: EXIT_SUCCESS,
            stdout,
            stderr: String::new(),
        }
    }
}

/// Runs a registered engine under `min(hook timeout, remaining deadline)`.
struct TimedEngine {
    name: String,
    timeout: Duration,
    inner: Arc<dyn RuleEngine>,
}

#[async_trait]
impl RuleEngine for TimedEngine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(&self, msg: &HookMessage, ctx: &EvalContext) -> Result<HookResponse, EngineError> {
        let narrowed = ctx.narrowed(self.timeout);
        tokio::time::timeout_at(narrowed.deadline, self.inner.evaluate(msg, &narrowed))
            .await
            .map_err(|_| EngineError::Timeout {
                engine: self.name.clone(),
            })?
    }
}
