//! Couple the classifier with the dispatcher.
//!
//! The host calls [`EventHandler::handle`] once per interception-point call
//! with the session it belongs to. The call is classified, then every
//! resulting record is dispatched in order. A dispatch failure never stops
//! later records; the merged [`DispatchReport`] carries every failure.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{ErrorCode, HostError};
use crate::event::arguments::CallArguments;
use crate::event::classifier::{classify, ClassifiedEvent, ClassifierError};
use crate::event::session::SessionContext;
use crate::policy::{
    DispatchError, DispatchReport, PolicyDescriptor, PolicyDispatcher, PolicyInvoker,
    PolicyRegistry,
};
use crate::services::Services;

/// Errors raised by the event handler itself.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The call could not be classified.
    #[error("classification failed: {0}")]
    Classifier(#[from] ClassifierError),
}

impl HandlerError {
    /// Stable status code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Classifier(e) => e.code(),
        }
    }

    /// Convert to the `(code, message)` pair the host sees.
    pub fn to_host_error(&self) -> HostError {
        HostError::new(self.code(), self.to_string())
    }
}

/// What handling one call produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerOutcome {
    /// Classified events, in dispatch order.
    pub events: Vec<ClassifiedEvent>,
    /// Merged dispatch report over all events.
    pub report: DispatchReport,
}

/// Classifies calls and dispatches the resulting events.
#[derive(Debug)]
pub struct EventHandler {
    dispatcher: PolicyDispatcher,
    invoker: PolicyInvoker,
}

impl EventHandler {
    /// Handler over an already-built dispatcher.
    pub fn new(dispatcher: PolicyDispatcher, invoker: PolicyInvoker) -> Self {
        Self {
            dispatcher,
            invoker,
        }
    }

    /// Resolve `descriptors` against `registry` and bind the collaborators.
    pub fn from_descriptors(
        descriptors: &[PolicyDescriptor],
        registry: Arc<PolicyRegistry>,
        services: Services,
    ) -> Result<Self, DispatchError> {
        let dispatcher = PolicyDispatcher::new(descriptors, &registry)?;
        Ok(Self::new(dispatcher, PolicyInvoker::new(registry, services)))
    }

    /// Invoker used for dispatch.
    pub fn invoker(&self) -> &PolicyInvoker {
        &self.invoker
    }

    /// Classify one call and dispatch every resulting event.
    pub async fn handle(
        &self,
        session: &mut SessionContext,
        pep: &str,
        arguments: &CallArguments,
    ) -> Result<HandlerOutcome, HandlerError> {
        let events = classify(session, pep, arguments)?;

        let mut report = DispatchReport::default();
        for classified in &events {
            let dispatched = self
                .dispatcher
                .dispatch(&self.invoker, classified.event, pep, &classified.record)
                .await;
            report.merge(dispatched);
        }

        if report.has_failures() {
            warn!(
                session = %session.id(),
                pep,
                failures = report.failures.len(),
                "dispatch reported failures"
            );
        } else {
            debug!(session = %session.id(), pep, invoked = report.invoked.len(), "dispatched");
        }
        Ok(HandlerOutcome { events, report })
    }
}
