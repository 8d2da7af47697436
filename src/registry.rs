//! Startup-time map from command name to the handler that runs it.

use std::{collections::HashMap, marker::PhantomData, sync::Arc};

use futures::future::BoxFuture;

use crate::{
    command::{Command, CommandHandler, JobContext},
    error::{JobFailure, ResolveError},
    scope::ExecutionScope,
};

pub(crate) type HandlerFuture = BoxFuture<'static, Result<(), JobFailure>>;

/// Type-erased handler for one command type: builds the handler, decodes the
/// payload and returns the future that runs it.
pub(crate) trait Dispatch: Send + Sync {
    fn prepare(&self, payload: &[u8], ctx: JobContext) -> Result<HandlerFuture, JobFailure>;
}

type Factory<H> = Box<dyn Fn(&ExecutionScope) -> Result<H, ResolveError> + Send + Sync>;

enum Lifetime<H> {
    /// A new instance per job attempt, built from that attempt's scope.
    Scoped(Factory<H>),
    Singleton(Arc<H>),
}

struct TypedDispatch<C, H> {
    lifetime: Lifetime<H>,
    bincode_config: bincode::config::Configuration,
    _command: PhantomData<fn() -> C>,
}

impl<C, H> Dispatch for TypedDispatch<C, H>
where
    C: Command,
    H: CommandHandler<C>,
{
    fn prepare(&self, payload: &[u8], ctx: JobContext) -> Result<HandlerFuture, JobFailure> {
        let handler = match &self.lifetime {
            Lifetime::Scoped(factory) => Arc::new(factory(ctx.scope())?),
            Lifetime::Singleton(handler) => Arc::clone(handler),
        };

        let (command, _): (C, usize) =
            bincode::decode_from_slice(payload, self.bincode_config).map_err(JobFailure::decode)?;

        Ok(Box::pin(async move {
            handler
                .handle(command, &ctx)
                .await
                .map_err(|e| JobFailure::handler(e.into()))
        }))
    }
}

#[derive(Default)]
pub(crate) struct HandlerRegistry {
    handlers: HashMap<&'static str, Arc<dyn Dispatch>>,
}

impl HandlerRegistry {
    pub(crate) fn register_scoped<C, H, F>(&mut self, factory: F)
    where
        C: Command,
        H: CommandHandler<C>,
        F: Fn(&ExecutionScope) -> Result<H, ResolveError> + Send + Sync + 'static,
    {
        self.insert::<C, H>(Lifetime::Scoped(Box::new(factory)));
    }

    pub(crate) fn register_singleton<C, H>(&mut self, handler: H)
    where
        C: Command,
        H: CommandHandler<C>,
    {
        self.insert::<C, H>(Lifetime::Singleton(Arc::new(handler)));
    }

    fn insert<C, H>(&mut self, lifetime: Lifetime<H>)
    where
        C: Command,
        H: CommandHandler<C>,
    {
        let dispatch = TypedDispatch::<C, H> {
            lifetime,
            bincode_config: bincode::config::standard(),
            _command: PhantomData,
        };
        if self.handlers.insert(C::name(), Arc::new(dispatch)).is_some() {
            tracing::warn!(command = C::name(), "replacing previously registered handler");
        }
    }

    pub(crate) fn resolve(&self, command: &str) -> Result<Arc<dyn Dispatch>, ResolveError> {
        self.handlers
            .get(command)
            .cloned()
            .ok_or_else(|| ResolveError::NotRegistered(command.to_string()))
    }

    pub(crate) fn contains(&self, command: &str) -> bool {
        self.handlers.contains_key(command)
    }

    pub(crate) fn command_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }
}
