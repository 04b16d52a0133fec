//! Named, type-checked callables that plugins expose to each other.
//!
//! A service is registered under `<owner>.<local>` with a return type and an
//! argument type vector. Callers either state the signature they expect
//! ([`Service::do_typecheck`]) or pass boxed arguments that are validated
//! against the registered signature before the callable runs. Destroying a
//! service revokes its callable, so a caller holding a stale [`Arc<Service>`]
//! gets [`ServiceError::Revoked`] instead of running unloaded code.

use crate::directory;
use crate::error::{panic_message, ServiceError};
use crate::events::EventBus;
use crate::gate::DispatchGate;
use crate::types::{check_arguments, check_signature, parse_types, ArgumentList, TypeKind, TypeMismatch, TypeSpec, Value};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

/// Callable backing a service.
pub type ServiceFn = Arc<dyn Fn(&ArgumentList) -> Value + Send + Sync>;

/// Wraps a closure as a [`ServiceFn`].
pub fn service_fn<F>(f: F) -> ServiceFn
where
    F: Fn(&ArgumentList) -> Value + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Event fired with the full service name after a service is created.
pub const SERVICE_CREATED_EVENT: &str = "host.service_created";
/// Event fired with the full service name after a service is destroyed.
pub const SERVICE_DESTROYED_EVENT: &str = "host.service_destroyed";

/// Return type and argument types of a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSignature {
    ret: TypeSpec,
    args: Vec<TypeSpec>,
}

impl ServiceSignature {
    pub fn parse(ret: &str, args: &[&str]) -> Self {
        Self {
            ret: TypeSpec::parse(ret),
            args: parse_types(args),
        }
    }

    pub fn ret(&self) -> &TypeSpec {
        &self.ret
    }

    pub fn args(&self) -> &[TypeSpec] {
        &self.args
    }

    pub fn has_unknown_types(&self) -> bool {
        self.ret.kind() == TypeKind::Unknown
            || self.args.iter().any(|a| a.kind() == TypeKind::Unknown)
    }

    /// Compares another signature against this one: arity, return type,
    /// then each argument position.
    pub fn check(&self, other: &ServiceSignature) -> Result<(), TypeMismatch> {
        if self.args.len() != other.args.len() {
            return Err(TypeMismatch::Arity {
                expected: self.args.len(),
                found: other.args.len(),
            });
        }
        if !self.ret.compatible_with(&other.ret) {
            return Err(TypeMismatch::Return {
                expected: self.ret.text().to_string(),
                found: other.ret.text().to_string(),
            });
        }
        check_signature(&self.args, &other.args)
    }
}

impl std::fmt::Display for ServiceSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let args: Vec<&str> = self.args.iter().map(|a| a.text()).collect();
        write!(f, "{}({})", self.ret.text(), args.join(", "))
    }
}

/// A registered service.
pub struct Service {
    name: String,
    owner: String,
    signature: ServiceSignature,
    callable: RwLock<Option<ServiceFn>>,
    gate: Arc<DispatchGate>,
}

impl Service {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn signature(&self) -> &ServiceSignature {
        &self.signature
    }

    pub fn is_revoked(&self) -> bool {
        self.callable
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_none()
    }

    /// Checks that the caller's expected signature equals the registered one.
    pub fn do_typecheck(&self, ret: &str, argv: &[&str]) -> Result<(), ServiceError> {
        let requested = ServiceSignature::parse(ret, argv);
        self.signature
            .check(&requested)
            .map_err(|mismatch| ServiceError::TypeMismatch {
                service: self.name.clone(),
                mismatch,
            })
    }

    /// Invokes the service after validating `args` against its signature.
    ///
    /// The returned value is validated as well; a callable that returns the
    /// wrong kind is treated as a type error rather than handed to the caller.
    /// While the owner is being unloaded calls fail with `Revoked`.
    pub fn call(&self, args: &ArgumentList) -> Result<Value, ServiceError> {
        check_arguments(&self.signature.args, args).map_err(|mismatch| {
            ServiceError::TypeMismatch {
                service: self.name.clone(),
                mismatch,
            }
        })?;

        let _pass = self
            .gate
            .enter(&self.owner)
            .ok_or_else(|| ServiceError::Revoked(self.name.clone()))?;
        let callable = self
            .callable
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| ServiceError::Revoked(self.name.clone()))?;

        let value = catch_unwind(AssertUnwindSafe(|| callable(args))).map_err(|payload| {
            ServiceError::Panicked {
                service: self.name.clone(),
                message: panic_message(&*payload),
            }
        })?;
        drop(callable);

        if value.kind() != self.signature.ret.kind() {
            return Err(ServiceError::TypeMismatch {
                service: self.name.clone(),
                mismatch: TypeMismatch::Return {
                    expected: self.signature.ret.text().to_string(),
                    found: value.kind().name().to_string(),
                },
            });
        }
        Ok(value)
    }

    /// Type checks against the caller's expected signature, then calls.
    pub fn call_checked(&self, ret: &str, argv: &[&str], args: &ArgumentList) -> Result<Value, ServiceError> {
        self.do_typecheck(ret, argv)?;
        self.call(args)
    }

    /// Converts textual arguments into the boxed values this service expects.
    pub fn create_argument_list_from_strings(&self, argv: &[&str]) -> Result<ArgumentList, ServiceError> {
        if argv.len() != self.signature.args.len() {
            return Err(ServiceError::TypeMismatch {
                service: self.name.clone(),
                mismatch: TypeMismatch::Arity {
                    expected: self.signature.args.len(),
                    found: argv.len(),
                },
            });
        }

        self.signature
            .args
            .iter()
            .zip(argv)
            .enumerate()
            .map(|(index, (spec, text))| {
                Value::parse(spec.kind(), text).ok_or_else(|| ServiceError::ArgumentParse {
                    service: self.name.clone(),
                    index,
                    value: text.to_string(),
                    type_str: spec.text().to_string(),
                })
            })
            .collect()
    }

    /// Releases a list built by [`create_argument_list_from_strings`](Self::create_argument_list_from_strings).
    pub fn destroy_argument_list(&self, args: ArgumentList) {
        drop(args);
    }

    fn revoke(&self) {
        *self.callable.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("signature", &self.signature.to_string())
            .finish()
    }
}

/// Directory of services for one host.
#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, Arc<Service>>>,
    notify: Option<Arc<EventBus>>,
    gate: Arc<DispatchGate>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry that fires the service created/destroyed events on `bus`.
    pub fn with_event_bus(bus: Arc<EventBus>) -> Self {
        Self {
            services: RwLock::default(),
            gate: bus.gate().clone(),
            notify: Some(bus),
        }
    }

    /// Gate every service call passes through.
    pub fn gate(&self) -> &Arc<DispatchGate> {
        &self.gate
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<Service>>> {
        self.services.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<Service>>> {
        self.services.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers `<owner>.<local>` with the given signature.
    pub fn create(
        &self,
        owner: &str,
        local: &str,
        ret: &str,
        argv: &[&str],
        callable: ServiceFn,
    ) -> Result<Arc<Service>, ServiceError> {
        let name = directory::full_name(owner, local)?;
        let signature = ServiceSignature::parse(ret, argv);
        if let Some(spec) = signature.args.iter().find(|a| a.kind() == TypeKind::None) {
            return Err(ServiceError::UnsupportedType {
                service: name,
                type_str: spec.text().to_string(),
            });
        }

        let service = Arc::new(Service {
            name: name.clone(),
            owner: owner.to_string(),
            signature,
            callable: RwLock::new(Some(callable)),
            gate: self.gate.clone(),
        });

        {
            let mut services = self.write();
            if services.contains_key(&name) {
                return Err(ServiceError::DuplicateName(name));
            }
            services.insert(name.clone(), service.clone());
        }

        debug!(service = %name, signature = %service.signature, "Service created");
        self.announce(SERVICE_CREATED_EVENT, &name);
        Ok(service)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Service>> {
        self.read().get(name).cloned()
    }

    /// Looks up a service and type checks it in one step.
    pub fn get_checked(&self, name: &str, ret: &str, argv: &[&str]) -> Result<Arc<Service>, ServiceError> {
        let service = self
            .get(name)
            .ok_or_else(|| ServiceError::NotFound(name.to_string()))?;
        service.do_typecheck(ret, argv)?;
        Ok(service)
    }

    pub fn destroy(&self, name: &str) -> Result<(), ServiceError> {
        let service = self
            .write()
            .remove(name)
            .ok_or_else(|| ServiceError::NotFound(name.to_string()))?;
        service.revoke();
        debug!(service = name, "Service destroyed");
        self.announce(SERVICE_DESTROYED_EVENT, name);
        Ok(())
    }

    pub fn destroy_plugin_service(&self, owner: &str, local: &str) -> Result<(), ServiceError> {
        let name = directory::full_name(owner, local)?;
        self.destroy(&name)
    }

    /// Removes every service in the namespace of `owner`.
    pub fn destroy_all_plugin_services(&self, owner: &str) -> usize {
        self.destroy_where(|name| directory::is_owned_by(name, owner))
    }

    /// Removes every service whose full name matches a `*`/`?` glob.
    ///
    /// All matching entries are removed under one write lock, so concurrent
    /// lookups see either all of them or none.
    pub fn destroy_all_matching(&self, pattern: &str) -> usize {
        self.destroy_where(|name| directory::matches_pattern(pattern, name))
    }

    fn destroy_where(&self, predicate: impl Fn(&str) -> bool) -> usize {
        let removed: Vec<Arc<Service>> = {
            let mut services = self.write();
            let names: Vec<String> = services
                .keys()
                .filter(|name| predicate(name))
                .cloned()
                .collect();
            names.iter().filter_map(|name| services.remove(name)).collect()
        };

        for service in &removed {
            service.revoke();
            debug!(service = %service.name, "Service destroyed");
            self.announce(SERVICE_DESTROYED_EVENT, &service.name);
        }
        removed.len()
    }

    fn announce(&self, event: &str, service: &str) {
        let Some(bus) = &self.notify else {
            return;
        };
        let args = ArgumentList::new().with(service);
        if let Err(e) = bus.fire(event, &args) {
            warn!(event, service, "Failed to announce service change: {}", e);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Sorted names of all services.
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
