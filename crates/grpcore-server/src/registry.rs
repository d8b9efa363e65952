//! The read-only method registry.
//!
//! Built once through [`RegistryBuilder`] and shared by every call behind an
//! `Arc`; nothing mutates it after [`RegistryBuilder::build`].

use std::collections::HashMap;
use std::sync::Arc;

use crate::method::{MethodDescriptor, RpcMethod};

/// A named group of methods.
#[derive(Debug, Default)]
pub struct ServiceDescriptor {
    name: String,
    methods: Vec<Arc<dyn RpcMethod>>,
}

impl ServiceDescriptor {
    /// Start a service, e.g. `helloworld.Greeter`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    /// Add a method.
    #[must_use]
    pub fn method<Req, Resp>(mut self, method: MethodDescriptor<Req, Resp>) -> Self
    where
        Req: Send + 'static,
        Resp: Send + 'static,
    {
        self.methods.push(Arc::new(method));
        self
    }

    /// Service name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Service name to method name to method.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: HashMap<String, HashMap<String, Arc<dyn RpcMethod>>>,
}

impl ServiceRegistry {
    /// Start building a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Find the method serving `/{service}/{method}`.
    pub fn lookup(&self, service: &str, method: &str) -> Option<Arc<dyn RpcMethod>> {
        self.services.get(service)?.get(method).cloned()
    }

    /// Registered service names, sorted.
    pub fn service_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.services.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Total number of registered methods.
    pub fn method_count(&self) -> usize {
        self.services.values().map(HashMap::len).sum()
    }

    /// Returns `true` if no method is registered.
    pub fn is_empty(&self) -> bool {
        self.method_count() == 0
    }
}

/// Collects services before freezing them into a [`ServiceRegistry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    services: HashMap<String, HashMap<String, Arc<dyn RpcMethod>>>,
}

impl RegistryBuilder {
    /// Register one method under `service`. A later registration with the
    /// same service and method name replaces the earlier one.
    #[must_use]
    pub fn add_method<Req, Resp>(
        mut self,
        service: impl Into<String>,
        method: MethodDescriptor<Req, Resp>,
    ) -> Self
    where
        Req: Send + 'static,
        Resp: Send + 'static,
    {
        self.insert(service.into(), Arc::new(method));
        self
    }

    /// Register every method of a service.
    #[must_use]
    pub fn add_service(mut self, service: ServiceDescriptor) -> Self {
        let ServiceDescriptor { name, methods } = service;
        self.services.entry(name.clone()).or_default();
        for method in methods {
            self.insert(name.clone(), method);
        }
        self
    }

    fn insert(&mut self, service: String, method: Arc<dyn RpcMethod>) {
        self.services
            .entry(service)
            .or_default()
            .insert(method.name().to_string(), method);
    }

    /// Freeze the registry.
    pub fn build(self) -> ServiceRegistry {
        ServiceRegistry {
            services: self.services,
        }
    }
}
