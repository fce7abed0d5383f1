// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Core element catalog.
//!
//! Maps task signatures to dense, stable core element ids and keeps the
//! implementations known for each element. Entries are only ever added during
//! a run. Lookups take a shared lock; registration upgrades to an exclusive
//! lock and re-checks, so concurrent first sightings of the same signature
//! agree on one id.
//!
//! # Signatures
//!
//! | Task kind | Format |
//! |-----------|--------|
//! | Method | `method(T1,T2)declaring.Class` |
//! | Service | `operation(T1,T2)namespace,service,port` |
//!
//! Only the user-facing parameters contribute types; a trailing target or
//! return slot is left out.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{CoreError, Result};
use crate::parameter::{Parameter, real_parameter_count};
use crate::resources::MethodResourceDescription;
use crate::telemetry::TelemetryTable;

/// Dense core element identifier, assigned in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoreId(pub u32);

impl CoreId {
    /// Position of this id in dense per-core tables.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Id for a dense table position.
    pub fn from_index(index: usize) -> Self {
        Self(u32::try_from(index).unwrap_or(u32::MAX))
    }
}

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of the invoked code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskSignature {
    /// A method of a class (or a function of a module).
    Method {
        /// Fully qualified class or module name.
        declaring_class: String,
        /// Method name.
        method_name: String,
    },
    /// An operation of a remote service.
    Service {
        /// Service namespace.
        namespace: String,
        /// Service name.
        service: String,
        /// Service port.
        port: String,
        /// Operation name.
        operation: String,
    },
}

impl TaskSignature {
    /// Method signature shorthand.
    pub fn method(declaring_class: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self::Method {
            declaring_class: declaring_class.into(),
            method_name: method_name.into(),
        }
    }

    /// Service signature shorthand.
    pub fn service(
        namespace: impl Into<String>,
        service: impl Into<String>,
        port: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Service {
            namespace: namespace.into(),
            service: service.into(),
            port: port.into(),
            operation: operation.into(),
        }
    }

    /// The method or operation name.
    pub fn name(&self) -> &str {
        match self {
            Self::Method { method_name, .. } => method_name,
            Self::Service { operation, .. } => operation,
        }
    }

    fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| CoreError::InvalidSignature {
            signature: self.render(&[]),
            reason: reason.to_string(),
        };
        match self {
            Self::Method {
                declaring_class,
                method_name,
            } => {
                if method_name.trim().is_empty() {
                    return Err(invalid("method name is empty"));
                }
                if declaring_class.trim().is_empty() {
                    return Err(invalid("declaring class is empty"));
                }
            }
            Self::Service {
                namespace,
                service,
                port,
                operation,
            } => {
                if operation.trim().is_empty() {
                    return Err(invalid("operation name is empty"));
                }
                if namespace.trim().is_empty() || service.trim().is_empty() || port.trim().is_empty() {
                    return Err(invalid("service namespace, name and port are required"));
                }
            }
        }
        Ok(())
    }

    /// Render the signature for the given user-facing parameters.
    pub fn render(&self, parameters: &[Parameter]) -> String {
        let types = parameters
            .iter()
            .map(|p| p.data_type.as_str())
            .collect::<Vec<_>>()
            .join(",");
        match self {
            Self::Method {
                declaring_class,
                method_name,
            } => format!("{method_name}({types}){declaring_class}"),
            Self::Service {
                namespace,
                service,
                port,
                operation,
            } => format!("{operation}({types}){namespace},{service},{port}"),
        }
    }

    fn default_implementation(&self, signature: &str) -> Implementation {
        match self {
            Self::Method {
                declaring_class,
                method_name,
            } => Implementation {
                signature: signature.to_string(),
                implementation_type: ImplementationType::Method,
                type_args: vec![declaring_class.clone(), method_name.clone()],
                requirements: MethodResourceDescription::default(),
            },
            Self::Service {
                namespace,
                service,
                port,
                ..
            } => Implementation {
                signature: signature.to_string(),
                implementation_type: ImplementationType::Service,
                type_args: vec![namespace.clone(), service.clone(), port.clone()],
                requirements: MethodResourceDescription::default(),
            },
        }
    }
}

/// How an implementation is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ImplementationType {
    /// In-language method call.
    Method,
    /// Remote service operation.
    Service,
    /// MPI program.
    Mpi,
    /// External binary.
    Binary,
    /// Container image.
    Container,
    /// HTTP endpoint.
    Http,
}

/// One way of executing a core element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Implementation {
    /// Implementation signature, unique within its core element.
    pub signature: String,
    /// Execution kind.
    pub implementation_type: ImplementationType,
    /// Kind-specific arguments (class and method, binary path, image, ...).
    pub type_args: Vec<String>,
    /// Resources one execution needs.
    pub requirements: MethodResourceDescription,
}

/// Explicit registration request for a core element implementation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreElementDefinition {
    /// Signature of the core element the implementation belongs to.
    pub ce_signature: String,
    /// The implementation to add.
    pub implementation: Implementation,
}

/// A registered core element.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoreElement {
    /// Dense id.
    pub id: CoreId,
    /// Signature the element was registered under.
    pub signature: String,
    /// Known implementations, in registration order.
    pub implementations: Vec<Implementation>,
}

#[derive(Debug, Default)]
struct CatalogInner {
    by_signature: HashMap<String, CoreId>,
    elements: Vec<CoreElement>,
}

impl CatalogInner {
    fn insert(&mut self, signature: String, implementation: Implementation) -> CoreId {
        let id = CoreId::from_index(self.elements.len());
        self.by_signature.insert(signature.clone(), id);
        self.elements.push(CoreElement {
            id,
            signature,
            implementations: vec![implementation],
        });
        id
    }
}

/// Registry of core elements.
///
/// When created with [`CoreCatalog::with_telemetry`], every new element is
/// announced to the telemetry table before its id becomes visible to other
/// submitters.
#[derive(Debug, Default)]
pub struct CoreCatalog {
    inner: RwLock<CatalogInner>,
    telemetry: Option<Arc<TelemetryTable>>,
}

impl CoreCatalog {
    /// Create an empty catalog without telemetry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty catalog that grows `telemetry` as elements are added.
    pub fn with_telemetry(telemetry: Arc<TelemetryTable>) -> Self {
        Self {
            inner: RwLock::new(CatalogInner::default()),
            telemetry: Some(telemetry),
        }
    }

    /// Resolve the core element of an invocation, registering it on first sight.
    ///
    /// Idempotent: every caller with the same signature, concurrent or not,
    /// gets the same id.
    pub fn get_core_id(
        &self,
        signature: &TaskSignature,
        has_target: bool,
        has_return: bool,
        parameters: &[Parameter],
    ) -> Result<CoreId> {
        signature.validate()?;
        let real = real_parameter_count(parameters, has_target, has_return);
        let rendered = signature.render(&parameters[..real]);

        if let Some(id) = self.inner.read().by_signature.get(&rendered) {
            return Ok(*id);
        }

        let mut inner = self.inner.write();
        if let Some(id) = inner.by_signature.get(&rendered) {
            return Ok(*id);
        }
        let implementation = signature.default_implementation(&rendered);
        let id = inner.insert(rendered.clone(), implementation);
        self.announce(id, &rendered);
        info!(core_id = %id, signature = %rendered, "Core element registered");
        Ok(id)
    }

    /// Register an implementation explicitly.
    ///
    /// Creates the core element if needed and appends the implementation.
    /// Registering an identical implementation again is a no-op; registering
    /// a different definition under an existing implementation signature is
    /// a [`CoreError::SignatureConflict`].
    pub fn register_core_element(&self, definition: CoreElementDefinition) -> Result<CoreId> {
        let CoreElementDefinition {
            ce_signature,
            implementation,
        } = definition;

        if ce_signature.trim().is_empty() {
            return Err(CoreError::InvalidSignature {
                signature: ce_signature,
                reason: "core element signature is empty".to_string(),
            });
        }
        if implementation.signature.trim().is_empty() {
            return Err(CoreError::InvalidSignature {
                signature: ce_signature,
                reason: "implementation signature is empty".to_string(),
            });
        }

        let mut inner = self.inner.write();
        let existing = inner.by_signature.get(&ce_signature).copied();
        let Some(id) = existing else {
            let impl_signature = implementation.signature.clone();
            let id = inner.insert(ce_signature.clone(), implementation);
            self.announce(id, &ce_signature);
            info!(
                core_id = %id,
                signature = %ce_signature,
                implementation = %impl_signature,
                "Core element registered"
            );
            return Ok(id);
        };

        let element = &mut inner.elements[id.index()];
        match element
            .implementations
            .iter()
            .find(|existing| existing.signature == implementation.signature)
        {
            Some(existing) if *existing == implementation => {
                debug!(core_id = %id, implementation = %implementation.signature, "Implementation already registered");
            }
            Some(_) => {
                warn!(
                    core_id = %id,
                    signature = %ce_signature,
                    implementation = %implementation.signature,
                    "Conflicting implementation registration rejected"
                );
                return Err(CoreError::SignatureConflict {
                    signature: ce_signature,
                    implementation: implementation.signature,
                });
            }
            None => {
                info!(core_id = %id, implementation = %implementation.signature, "Implementation added");
                element.implementations.push(implementation);
            }
        }
        Ok(id)
    }

    fn announce(&self, id: CoreId, signature: &str) {
        if let Some(telemetry) = &self.telemetry {
            telemetry.register_core(id, signature);
        }
    }

    /// Zero the telemetry table and announce every registered element again.
    ///
    /// Registrations wait until the table is rebuilt.
    pub fn reset_telemetry(&self) {
        let Some(telemetry) = &self.telemetry else {
            return;
        };
        let inner = self.inner.read();
        telemetry.clear();
        for element in &inner.elements {
            telemetry.register_core(element.id, &element.signature);
        }
        debug!(elements = inner.elements.len(), "Telemetry reset");
    }

    /// Look up the id registered for a rendered signature.
    pub fn find(&self, signature: &str) -> Option<CoreId> {
        self.inner.read().by_signature.get(signature).copied()
    }

    /// A copy of a registered core element.
    pub fn core_element(&self, id: CoreId) -> Result<CoreElement> {
        self.inner
            .read()
            .elements
            .get(id.index())
            .cloned()
            .ok_or(CoreError::UnknownCoreElement { core_id: id })
    }

    /// Signature of a registered core element.
    pub fn signature(&self, id: CoreId) -> Option<String> {
        self.inner
            .read()
            .elements
            .get(id.index())
            .map(|element| element.signature.clone())
    }

    /// Number of registered core elements.
    pub fn len(&self) -> usize {
        self.inner.read().elements.len()
    }

    /// Whether nothing has been registered yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
