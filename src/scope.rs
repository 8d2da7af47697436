//! Explicit service scopes used to build handlers.
//!
//! A [`GlobalScope`] holds process-wide singletons and is fixed once the
//! scheduler is built. Every job attempt gets a fresh [`ExecutionScope`] that
//! can hold per-job services; it is dropped, releasing those services, as soon
//! as the attempt finishes.

use std::{
    any::{type_name, Any, TypeId},
    collections::HashMap,
    sync::{Arc, Mutex},
};

use crate::{error::ResolveError, types::JobId};

type Service = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
pub struct GlobalScope {
    services: HashMap<TypeId, Service>,
}

impl GlobalScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a singleton, replacing any earlier one of the same type.
    pub fn insert<T: Send + Sync + 'static>(&mut self, service: T) {
        self.insert_arc(Arc::new(service));
    }

    pub fn insert_arc<T: Send + Sync + 'static>(&mut self, service: Arc<T>) {
        self.services.insert(TypeId::of::<T>(), service);
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.services
            .get(&TypeId::of::<T>())
            .and_then(|s| Arc::clone(s).downcast::<T>().ok())
    }

    pub fn resolve<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, ResolveError> {
        self.get::<T>()
            .ok_or(ResolveError::MissingService(type_name::<T>()))
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl std::fmt::Debug for GlobalScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalScope")
            .field("services", &self.services.len())
            .finish()
    }
}

/// Per-job scope. Lookups check the job's own services first, then the
/// global scope.
pub struct ExecutionScope {
    job_id: JobId,
    global: Arc<GlobalScope>,
    scoped: Mutex<HashMap<TypeId, Service>>,
}

impl ExecutionScope {
    pub fn new(job_id: JobId, global: Arc<GlobalScope>) -> Self {
        Self {
            job_id,
            global,
            scoped: Mutex::new(HashMap::new()),
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn global(&self) -> &GlobalScope {
        &self.global
    }

    /// Register a service that lives only as long as this job attempt.
    pub fn insert<T: Send + Sync + 'static>(&self, service: T) -> Arc<T> {
        let service = Arc::new(service);
        self.lock().insert(TypeId::of::<T>(), service.clone());
        service
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        let scoped = self
            .lock()
            .get(&TypeId::of::<T>())
            .and_then(|s| Arc::clone(s).downcast::<T>().ok());
        scoped.or_else(|| self.global.get::<T>())
    }

    pub fn resolve<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, ResolveError> {
        self.get::<T>()
            .ok_or(ResolveError::MissingService(type_name::<T>()))
    }

    /// Return the scoped instance of `T`, creating it with `init` on first use.
    pub fn get_or_insert_with<T, F>(&self, init: F) -> Arc<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        let mut scoped = self.lock();
        let entry = scoped
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Arc::new(init()) as Service);
        match Arc::clone(entry).downcast::<T>() {
            Ok(service) => service,
            Err(_) => unreachable!("scoped services are keyed by their own TypeId"),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TypeId, Service>> {
        self.scoped.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for ExecutionScope {
    fn drop(&mut self) {
        let released = self.lock().len();
        tracing::trace!(job_id = %self.job_id, released, "execution scope released");
    }
}

impl std::fmt::Debug for ExecutionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionScope")
            .field("job_id", &self.job_id)
            .finish_non_exhaustive()
    }
}
