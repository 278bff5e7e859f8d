//! Validators that run before a protocol changes any state.
//!
//! Middlewares are registered per [Phase] and run synchronously in
//! registration order. The first rejection aborts the run before anything is
//! persisted or sent.

use std::{collections::HashMap, sync::Arc};

use crate::{
    chain::ChainReader,
    channel::{AppInstance, StateChannel},
    error::ProtocolError,
    protocol::ProtocolRole,
    sig::Identifier,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Propose,
    Install,
    Uninstall,
    TakeAction,
}

/// The change a middleware is asked to approve, together with the channel as
/// it is before the change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiddlewareContext {
    Propose {
        channel: StateChannel,
        proposal: AppInstance,
    },
    Install {
        channel: StateChannel,
        proposal: AppInstance,
    },
    Uninstall {
        channel: StateChannel,
        app: AppInstance,
        /// Initiator of this protocol run.
        initiator: Identifier,
    },
    TakeAction {
        channel: StateChannel,
        app: AppInstance,
        action: Vec<u8>,
    },
}

impl MiddlewareContext {
    pub fn phase(&self) -> Phase {
        match self {
            MiddlewareContext::Propose { .. } => Phase::Propose,
            MiddlewareContext::Install { .. } => Phase::Install,
            MiddlewareContext::Uninstall { .. } => Phase::Uninstall,
            MiddlewareContext::TakeAction { .. } => Phase::TakeAction,
        }
    }

    pub fn channel(&self) -> &StateChannel {
        match self {
            MiddlewareContext::Propose { channel, .. }
            | MiddlewareContext::Install { channel, .. }
            | MiddlewareContext::Uninstall { channel, .. }
            | MiddlewareContext::TakeAction { channel, .. } => channel,
        }
    }
}

pub trait Middleware: Send + Sync {
    /// `Err` carries the reason the change is rejected.
    fn validate(
        &self,
        phase: Phase,
        role: ProtocolRole,
        ctx: &MiddlewareContext,
        chain: &dyn ChainReader,
    ) -> Result<(), String>;
}

impl<F> Middleware for F
where
    F: Fn(Phase, ProtocolRole, &MiddlewareContext, &dyn ChainReader) -> Result<(), String>
        + Send
        + Sync,
{
    fn validate(
        &self,
        phase: Phase,
        role: ProtocolRole,
        ctx: &MiddlewareContext,
        chain: &dyn ChainReader,
    ) -> Result<(), String> {
        self(phase, role, ctx, chain)
    }
}

#[derive(Clone, Default)]
pub struct MiddlewareChain {
    middlewares: HashMap<Phase, Vec<Arc<dyn Middleware>>>,
}

impl core::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut counts: Vec<_> = self
            .middlewares
            .iter()
            .map(|(phase, m)| (*phase, m.len()))
            .collect();
        counts.sort_by_key(|(phase, _)| *phase as u8);
        f.debug_struct("MiddlewareChain")
            .field("registered", &counts)
            .finish()
    }
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, phase: Phase, middleware: Arc<dyn Middleware>) -> &mut Self {
        self.middlewares.entry(phase).or_default().push(middleware);
        self
    }

    pub fn run(
        &self,
        role: ProtocolRole,
        ctx: &MiddlewareContext,
        chain: &dyn ChainReader,
    ) -> Result<(), ProtocolError> {
        let phase = ctx.phase();
        for middleware in self.middlewares.get(&phase).into_iter().flatten() {
            if let Err(reason) = middleware.validate(phase, role, ctx, chain) {
                tracing::warn!(?phase, ?role, %reason, "middleware rejected change");
                return Err(ProtocolError::ValidationRejected { phase, reason });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::testing::{channel_between, counter_app, signer, MockChain};

    fn install_ctx() -> MiddlewareContext {
        let a = signer(1);
        let b = signer(2);
        let channel = channel_between(&a, &b);
        let proposal = counter_app(&channel, *a.identifier(), *b.identifier(), 0);
        MiddlewareContext::Install { channel, proposal }
    }

    #[test]
    fn runs_in_registration_order_and_stops_at_first_rejection() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut chain = MiddlewareChain::new();
        for (name, verdict) in [("first", Ok(())), ("second", Err("nope")), ("third", Ok(()))] {
            let calls = calls.clone();
            chain.register(
                Phase::Install,
                Arc::new(
                    move |_: Phase,
                          _: ProtocolRole,
                          _: &MiddlewareContext,
                          _: &dyn ChainReader| {
                        calls.lock().unwrap().push(name);
                        verdict.map_err(str::to_string)
                    },
                ),
            );
        }

        let err = chain
            .run(ProtocolRole::Initiator, &install_ctx(), &MockChain::default())
            .unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::ValidationRejected {
                phase: Phase::Install,
                ref reason,
            } if reason == "nope"
        ));
        assert_eq!(*calls.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn only_matching_phase_runs() {
        let mut chain = MiddlewareChain::new();
        chain.register(
            Phase::Uninstall,
            Arc::new(
                |_: Phase, _: ProtocolRole, _: &MiddlewareContext, _: &dyn ChainReader| {
                    Err("uninstall only".to_string())
                },
            ),
        );
        chain
            .run(ProtocolRole::Responder, &install_ctx(), &MockChain::default())
            .unwrap();
    }
}
