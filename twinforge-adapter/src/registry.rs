//! Adapter registry and lifecycle.

use crate::error::AdapterError;
use crate::traits::{DigitalAdapter, DigitalAdapterHandle, PhysicalAdapter, PhysicalAdapterHandle};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use twinforge_bus::{Diagnostic, DiagnosticKind, DiagnosticSink, EventBus};

/// Kind of a registered adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    Physical,
    Digital,
}

impl AdapterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterKind::Physical => "physical",
            AdapterKind::Digital => "digital",
        }
    }
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of one adapter instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterLifecycle {
    /// Registered, never started.
    Registered,
    /// `bind` in flight.
    Starting,
    /// Bound and serving.
    Bound,
    /// Unbound after a failure, awaiting rebind.
    Unbound,
    /// Stopped by request.
    Stopped,
    /// Failed; either bind failed or the retry budget is exhausted.
    Error,
}

impl AdapterLifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterLifecycle::Registered => "registered",
            AdapterLifecycle::Starting => "starting",
            AdapterLifecycle::Bound => "bound",
            AdapterLifecycle::Unbound => "unbound",
            AdapterLifecycle::Stopped => "stopped",
            AdapterLifecycle::Error => "error",
        }
    }

    /// Returns true if `start` is legal from this state.
    fn can_start(&self) -> bool {
        matches!(
            self,
            AdapterLifecycle::Registered
                | AdapterLifecycle::Stopped
                | AdapterLifecycle::Unbound
                | AdapterLifecycle::Error
        )
    }
}

impl fmt::Display for AdapterLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rebind policy for adapters that fail after BOUND.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum rebind attempts before the adapter is marked permanently
    /// failed.
    pub max_attempts: u32,

    /// Backoff before the first attempt; doubles per attempt.
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    /// Backoff before the given attempt (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.initial_backoff * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
        }
    }
}

/// Registry view of one adapter.
#[derive(Debug, Clone)]
pub struct AdapterDescriptor {
    pub adapter_id: String,
    pub kind: AdapterKind,
    pub lifecycle: AdapterLifecycle,
    /// Consecutive failed rebind attempts.
    pub failed_attempts: u32,
}

#[derive(Clone)]
enum RegisteredAdapter {
    Physical(Arc<dyn PhysicalAdapter>),
    Digital(Arc<dyn DigitalAdapter>),
}

struct AdapterEntry {
    adapter: RegisteredAdapter,
    descriptor: RwLock<AdapterDescriptor>,
}

/// Tracks the adapters of one twin and drives their lifecycle.
///
/// Registration order is retained: the orchestrator starts adapters in
/// that order and stops them in reverse.
pub struct AdapterRegistry {
    twin_id: String,
    bus: Arc<EventBus>,
    diagnostics: DiagnosticSink,
    start_timeout: Duration,
    retry: RetryPolicy,
    adapters: DashMap<String, AdapterEntry>,
    order: Mutex<Vec<String>>,
}

impl AdapterRegistry {
    pub fn new(
        twin_id: impl Into<String>,
        bus: Arc<EventBus>,
        diagnostics: DiagnosticSink,
        start_timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            twin_id: twin_id.into(),
            bus,
            diagnostics,
            start_timeout,
            retry,
            adapters: DashMap::new(),
            order: Mutex::new(Vec::new()),
        }
    }

    /// Registers a physical adapter. Returns its id.
    pub fn register_physical(
        &self,
        adapter: Arc<dyn PhysicalAdapter>,
    ) -> Result<String, AdapterError> {
        let adapter_id = adapter.id().to_string();
        self.insert(adapter_id.clone(), RegisteredAdapter::Physical(adapter))?;
        Ok(adapter_id)
    }

    /// Registers a digital adapter. Returns its id.
    pub fn register_digital(
        &self,
        adapter: Arc<dyn DigitalAdapter>,
    ) -> Result<String, AdapterError> {
        let adapter_id = adapter.id().to_string();
        self.insert(adapter_id.clone(), RegisteredAdapter::Digital(adapter))?;
        Ok(adapter_id)
    }

    fn insert(&self, adapter_id: String, adapter: RegisteredAdapter) -> Result<(), AdapterError> {
        if self.adapters.contains_key(&adapter_id) {
            return Err(AdapterError::AlreadyRegistered { adapter_id });
        }

        let kind = match &adapter {
            RegisteredAdapter::Physical(_) => AdapterKind::Physical,
            RegisteredAdapter::Digital(_) => AdapterKind::Digital,
        };

        self.adapters.insert(
            adapter_id.clone(),
            AdapterEntry {
                adapter,
                descriptor: RwLock::new(AdapterDescriptor {
                    adapter_id: adapter_id.clone(),
                    kind,
                    lifecycle: AdapterLifecycle::Registered,
                    failed_attempts: 0,
                }),
            },
        );
        self.order.lock().push(adapter_id.clone());

        tracing::debug!(twin_id = %self.twin_id, adapter_id = %adapter_id, kind = kind.as_str(), "adapter registered");
        Ok(())
    }

    /// Unregisters an adapter. Fails while the adapter is starting or
    /// bound; stop it first.
    pub fn unregister(&self, adapter_id: &str) -> Result<(), AdapterError> {
        {
            let entry = self.get(adapter_id)?;
            let descriptor = entry.descriptor.read();
            if matches!(
                descriptor.lifecycle,
                AdapterLifecycle::Starting | AdapterLifecycle::Bound
            ) {
                return Err(AdapterError::InvalidLifecycle {
                    adapter_id: adapter_id.to_string(),
                    operation: "unregister",
                    state: descriptor.lifecycle,
                });
            }
        }

        self.adapters.remove(adapter_id);
        self.order.lock().retain(|id| id != adapter_id);
        Ok(())
    }

    /// Starts an adapter: drives `bind` under the configured timeout.
    ///
    /// Returns once the adapter reaches BOUND, or fails with
    /// [`AdapterError::Timeout`] / [`AdapterError::BindFailed`], leaving
    /// the adapter in ERROR.
    pub async fn start(&self, adapter_id: &str) -> Result<(), AdapterError> {
        let adapter = {
            let entry = self.get(adapter_id)?;
            let mut descriptor = entry.descriptor.write();
            if !descriptor.lifecycle.can_start() {
                return Err(AdapterError::InvalidLifecycle {
                    adapter_id: adapter_id.to_string(),
                    operation: "start",
                    state: descriptor.lifecycle,
                });
            }
            descriptor.lifecycle = AdapterLifecycle::Starting;
            entry.adapter.clone()
        };

        let bind_result = match &adapter {
            RegisteredAdapter::Physical(a) => {
                let handle =
                    PhysicalAdapterHandle::new(adapter_id, &self.twin_id, self.bus.clone());
                tokio::time::timeout(self.start_timeout, a.bind(handle)).await
            }
            RegisteredAdapter::Digital(a) => {
                let handle = DigitalAdapterHandle::new(adapter_id, &self.twin_id, self.bus.clone());
                tokio::time::timeout(self.start_timeout, a.bind(handle)).await
            }
        };

        match bind_result {
            Ok(Ok(())) => {
                self.set_lifecycle(adapter_id, AdapterLifecycle::Bound);
                tracing::info!(twin_id = %self.twin_id, adapter_id, "adapter bound");
                Ok(())
            }
            Ok(Err(e)) => {
                self.set_lifecycle(adapter_id, AdapterLifecycle::Error);
                Err(AdapterError::BindFailed {
                    adapter_id: adapter_id.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                self.set_lifecycle(adapter_id, AdapterLifecycle::Error);
                Err(AdapterError::Timeout {
                    adapter_id: adapter_id.to_string(),
                    timeout_ms: self.start_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Stops an adapter: unbinds if bound, then marks it STOPPED.
    ///
    /// An unbind failure is reported as a diagnostic; the adapter still
    /// ends up STOPPED.
    pub async fn stop(&self, adapter_id: &str) -> Result<(), AdapterError> {
        let (adapter, was_bound) = {
            let entry = self.get(adapter_id)?;
            let descriptor = entry.descriptor.read();
            if descriptor.lifecycle == AdapterLifecycle::Starting {
                return Err(AdapterError::InvalidLifecycle {
                    adapter_id: adapter_id.to_string(),
                    operation: "stop",
                    state: descriptor.lifecycle,
                });
            }
            (
                entry.adapter.clone(),
                descriptor.lifecycle == AdapterLifecycle::Bound,
            )
        };

        if was_bound {
            let unbind_result = match &adapter {
                RegisteredAdapter::Physical(a) => a.unbind().await,
                RegisteredAdapter::Digital(a) => a.unbind().await,
            };
            if let Err(e) = unbind_result {
                self.diagnostics.raise(Diagnostic::new(
                    Some(self.twin_id.clone()),
                    adapter_id,
                    DiagnosticKind::HandlerFailure,
                    format!("unbind failed: {}", e),
                ));
            }
        }

        self.set_lifecycle(adapter_id, AdapterLifecycle::Stopped);
        tracing::info!(twin_id = %self.twin_id, adapter_id, "adapter stopped");
        Ok(())
    }

    /// Recovers an adapter that failed after BOUND: unbind, then bounded
    /// rebind attempts with exponential backoff.
    ///
    /// Exhausting the budget marks the adapter permanently failed and
    /// raises a diagnostic; healthy adapters are unaffected.
    pub async fn recover(&self, adapter_id: &str) -> Result<(), AdapterError> {
        let adapter = self.get(adapter_id)?.adapter.clone();

        let _ = match &adapter {
            RegisteredAdapter::Physical(a) => a.unbind().await,
            RegisteredAdapter::Digital(a) => a.unbind().await,
        };
        self.set_lifecycle(adapter_id, AdapterLifecycle::Unbound);

        for attempt in 1..=self.retry.max_attempts {
            self.diagnostics.raise(Diagnostic::new(
                Some(self.twin_id.clone()),
                adapter_id,
                DiagnosticKind::AdapterRetry,
                format!("rebind attempt {}/{}", attempt, self.retry.max_attempts),
            ));

            tokio::time::sleep(self.retry.backoff_for(attempt)).await;

            match self.start(adapter_id).await {
                Ok(()) => {
                    if let Ok(entry) = self.get(adapter_id) {
                        entry.descriptor.write().failed_attempts = 0;
                    }
                    return Ok(());
                }
                Err(e) => {
                    if let Ok(entry) = self.get(adapter_id) {
                        entry.descriptor.write().failed_attempts = attempt;
                    }
                    tracing::debug!(adapter_id, attempt, error = %e, "rebind attempt failed");
                }
            }
        }

        self.set_lifecycle(adapter_id, AdapterLifecycle::Error);
        self.diagnostics.raise(Diagnostic::new(
            Some(self.twin_id.clone()),
            adapter_id,
            DiagnosticKind::AdapterPermanentFailure,
            format!(
                "adapter permanently failed after {} attempts",
                self.retry.max_attempts
            ),
        ));

        Err(AdapterError::PermanentlyFailed {
            adapter_id: adapter_id.to_string(),
            attempts: self.retry.max_attempts,
        })
    }

    /// Returns the descriptor of one adapter.
    pub fn descriptor(&self, adapter_id: &str) -> Option<AdapterDescriptor> {
        self.adapters
            .get(adapter_id)
            .map(|e| e.descriptor.read().clone())
    }

    /// Returns all adapter ids in registration order.
    pub fn ordered_ids(&self) -> Vec<String> {
        self.order.lock().clone()
    }

    /// Returns physical adapter ids in registration order.
    pub fn physical_ids(&self) -> Vec<String> {
        self.ids_of_kind(AdapterKind::Physical)
    }

    /// Returns digital adapter ids in registration order.
    pub fn digital_ids(&self) -> Vec<String> {
        self.ids_of_kind(AdapterKind::Digital)
    }

    fn ids_of_kind(&self, kind: AdapterKind) -> Vec<String> {
        self.order
            .lock()
            .iter()
            .filter(|id| {
                self.adapters
                    .get(id.as_str())
                    .map(|e| e.descriptor.read().kind == kind)
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// Returns the number of bound physical adapters.
    pub fn bound_physical_count(&self) -> usize {
        self.bound_physical_adapters().len()
    }

    /// Returns bound physical adapters in registration order.
    pub fn bound_physical_adapters(&self) -> Vec<(String, Arc<dyn PhysicalAdapter>)> {
        self.order
            .lock()
            .iter()
            .filter_map(|id| {
                let entry = self.adapters.get(id.as_str())?;
                let descriptor = entry.descriptor.read();
                if descriptor.lifecycle != AdapterLifecycle::Bound {
                    return None;
                }
                match &entry.adapter {
                    RegisteredAdapter::Physical(a) => Some((id.clone(), a.clone())),
                    RegisteredAdapter::Digital(_) => None,
                }
            })
            .collect()
    }

    /// Returns bound digital adapters in registration order.
    pub fn bound_digital_adapters(&self) -> Vec<(String, Arc<dyn DigitalAdapter>)> {
        self.order
            .lock()
            .iter()
            .filter_map(|id| {
                let entry = self.adapters.get(id.as_str())?;
                let descriptor = entry.descriptor.read();
                if descriptor.lifecycle != AdapterLifecycle::Bound {
                    return None;
                }
                match &entry.adapter {
                    RegisteredAdapter::Physical(_) => None,
                    RegisteredAdapter::Digital(a) => Some((id.clone(), a.clone())),
                }
            })
            .collect()
    }

    /// Returns the number of registered adapters.
    pub fn adapter_count(&self) -> usize {
        self.adapters.len()
    }

    fn get(
        &self,
        adapter_id: &str,
    ) -> Result<dashmap::mapref::one::Ref<'_, String, AdapterEntry>, AdapterError> {
        self.adapters
            .get(adapter_id)
            .ok_or_else(|| AdapterError::NotFound {
                adapter_id: adapter_id.to_string(),
            })
    }

    fn set_lifecycle(&self, adapter_id: &str, lifecycle: AdapterLifecycle) {
        if let Some(entry) = self.adapters.get(adapter_id) {
            entry.descriptor.write().lifecycle = lifecycle;
        }
    }
}
