//! `irods_policy_log_context`: log what a policy would receive.

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use super::names;
use crate::policy::{Policy, PolicyContext, PolicyError};

/// Logs its parameters and configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogContext;

#[async_trait]
impl Policy for LogContext {
    fn name(&self) -> &str {
        names::LOG_CONTEXT
    }

    async fn invoke(&self, ctx: PolicyContext) -> Result<Value, PolicyError> {
        info!(
            parameters = %ctx.parameters,
            configuration = %ctx.configuration,
            "policy context"
        );
        Ok(Value::Null)
    }
}
