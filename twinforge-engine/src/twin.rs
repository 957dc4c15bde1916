//! Per-twin lifecycle orchestration.
//!
//! A [`DigitalTwin`] wires one twin's store entry, adapters, and shadowing
//! runner together and drives them through the engine lifecycle:
//! Created -> Starting -> Running -> Stopping -> Stopped, with Error
//! reachable from Starting and Running.

use crate::config::{BindingPolicy, Config};
use crate::error::EngineError;
use crate::runner::ShadowingRunner;
use crate::shadowing::ShadowingFunction;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use twinforge_adapter::{AdapterRegistry, DigitalAdapter, PhysicalAdapter};
use twinforge_bus::{
    BusEvent, Diagnostic, DiagnosticKind, DiagnosticSink, EngineLifecycle, EventBus,
    LifecycleVariation, Topic,
};
use twinforge_state::{SnapshotStore, TwinModel, TwinState, TwinStateStore};

/// One digital twin instance: canonical state, adapters, shadowing, and
/// the lifecycle state machine coordinating them.
pub struct DigitalTwin {
    twin_id: String,
    config: Config,
    store: Arc<TwinStateStore>,
    bus: Arc<EventBus>,
    registry: Arc<AdapterRegistry>,
    shadow: Arc<dyn ShadowingFunction>,
    persistence: Option<Arc<dyn SnapshotStore>>,
    diagnostics: DiagnosticSink,
    lifecycle: RwLock<EngineLifecycle>,
    /// Stops physical intake; the runner then drains what is queued.
    intake_stop: broadcast::Sender<()>,
    /// Stops the dispatch loops after the drain.
    dispatch_stop: broadcast::Sender<()>,
    runner_task: Mutex<Option<JoinHandle<()>>>,
    dispatch_tasks: Mutex<Vec<JoinHandle<()>>>,
    pipeline_subscriptions: Mutex<Vec<String>>,
}

impl DigitalTwin {
    /// Creates a twin with its own store and bus.
    pub fn new(
        model: TwinModel,
        shadow: Arc<dyn ShadowingFunction>,
        config: Config,
    ) -> Result<Self, EngineError> {
        let store = Arc::new(TwinStateStore::new());
        let bus = Arc::new(EventBus::new(config.bus.channel_capacity));
        let diagnostics = DiagnosticSink::new(config.bus.diagnostic_capacity);
        Self::with_infrastructure(model, shadow, config, store, bus, diagnostics)
    }

    /// Creates a twin on shared infrastructure (used by
    /// [`crate::TwinEngine`] so its twins share one store and bus).
    pub fn with_infrastructure(
        model: TwinModel,
        shadow: Arc<dyn ShadowingFunction>,
        config: Config,
        store: Arc<TwinStateStore>,
        bus: Arc<EventBus>,
        diagnostics: DiagnosticSink,
    ) -> Result<Self, EngineError> {
        let twin_id = model.twin_id.clone();
        let initial = store.register_twin(&model)?;
        shadow.on_create(&initial);

        let registry = Arc::new(AdapterRegistry::new(
            &twin_id,
            bus.clone(),
            diagnostics.clone(),
            config.adapters.start_timeout(),
            config.adapters.retry_policy(),
        ));

        let (intake_stop, _) = broadcast::channel(1);
        let (dispatch_stop, _) = broadcast::channel(1);

        tracing::info!(twin_id = %twin_id, "digital twin created");

        Ok(Self {
            twin_id,
            config,
            store,
            bus,
            registry,
            shadow,
            persistence: None,
            diagnostics,
            lifecycle: RwLock::new(EngineLifecycle::Created),
            intake_stop,
            dispatch_stop,
            runner_task: Mutex::new(None),
            dispatch_tasks: Mutex::new(Vec::new()),
            pipeline_subscriptions: Mutex::new(Vec::new()),
        })
    }

    /// Attaches a snapshot persistence collaborator, consulted at the
    /// start/stop boundaries only.
    pub fn with_persistence(mut self, persistence: Arc<dyn SnapshotStore>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Registers a physical adapter. Returns its id.
    pub fn register_physical_adapter(
        &self,
        adapter: Arc<dyn PhysicalAdapter>,
    ) -> Result<String, EngineError> {
        Ok(self.registry.register_physical(adapter)?)
    }

    /// Registers a digital adapter. Returns its id.
    pub fn register_digital_adapter(
        &self,
        adapter: Arc<dyn DigitalAdapter>,
    ) -> Result<String, EngineError> {
        Ok(self.registry.register_digital(adapter)?)
    }

    /// Starts the twin.
    ///
    /// Legal from Created or Stopped. Loads the persisted snapshot if a
    /// persistence collaborator is attached, starts adapters in
    /// registration order, wires the shadowing pipeline, and enters
    /// Running once the binding policy is satisfied. Adapter start
    /// failures are isolated; only a missed binding policy aborts.
    pub async fn start(&self) -> Result<(), EngineError> {
        {
            let current = *self.lifecycle.read();
            if !current.can_start() {
                return Err(EngineError::InvalidLifecycleTransition {
                    twin_id: self.twin_id.clone(),
                    operation: "start",
                    from: current,
                });
            }
        }
        self.transition(EngineLifecycle::Starting);

        if let Some(persistence) = &self.persistence {
            match persistence.load(&self.twin_id) {
                Ok(Some(state)) => {
                    tracing::info!(
                        twin_id = %self.twin_id,
                        version = state.version,
                        "snapshot restored"
                    );
                    self.store.restore(state);
                }
                Ok(None) => {}
                Err(e) => {
                    self.transition(EngineLifecycle::Error);
                    return Err(e.into());
                }
            }
        }

        // Adapter start failures are contained; the binding policy below
        // decides whether the engine can run with what bound.
        for adapter_id in self.registry.ordered_ids() {
            if let Err(e) = self.registry.start(&adapter_id).await {
                self.diagnostics.raise(Diagnostic::new(
                    Some(self.twin_id.clone()),
                    adapter_id,
                    DiagnosticKind::HandlerFailure,
                    format!("adapter start failed ({}): {}", e.error_code(), e),
                ));
            }
        }

        let total = self.registry.physical_ids().len();
        let bound = self.registry.bound_physical_count();
        let satisfied = match self.config.lifecycle.binding_policy {
            BindingPolicy::RequireAny => bound >= 1,
            BindingPolicy::RequireAll => total > 0 && bound == total,
        };
        if !satisfied {
            self.stop_adapters().await;
            self.transition(EngineLifecycle::Error);
            return Err(EngineError::BindingPolicyUnsatisfied {
                twin_id: self.twin_id.clone(),
                policy: self.config.lifecycle.binding_policy.as_str(),
                bound,
                total,
            });
        }

        self.spawn_pipeline();
        self.shadow.on_start();
        self.transition(EngineLifecycle::Running);
        Ok(())
    }

    /// Stops the twin.
    ///
    /// Stops accepting physical events, drains in-flight shadowing up to
    /// the grace timeout (abandonment is reported, never silent), stops
    /// adapters in reverse registration order, saves the snapshot, and
    /// enters Stopped.
    pub async fn stop(&self) -> Result<(), EngineError> {
        {
            let current = *self.lifecycle.read();
            if current != EngineLifecycle::Running {
                return Err(EngineError::InvalidLifecycleTransition {
                    twin_id: self.twin_id.clone(),
                    operation: "stop",
                    from: current,
                });
            }
        }
        self.transition(EngineLifecycle::Stopping);
        self.shadow.on_stop();

        // Stop intake; queued events keep flowing to the runner.
        let _ = self.intake_stop.send(());

        // Drain in-flight shadowing under the grace timeout.
        let runner_task = self.runner_task.lock().take();
        if let Some(task) = runner_task {
            let abort = task.abort_handle();
            let grace = self.config.lifecycle.stop_grace();
            if tokio::time::timeout(grace, task).await.is_err() {
                abort.abort();
                self.diagnostics.raise(Diagnostic::new(
                    Some(self.twin_id.clone()),
                    "engine",
                    DiagnosticKind::DrainTimeout,
                    format!(
                        "in-flight shadowing abandoned after {}ms grace",
                        grace.as_millis()
                    ),
                ));
            }
        }

        // Dispatch loops flush their queues on the stop signal.
        let _ = self.dispatch_stop.send(());
        let tasks: Vec<_> = self.dispatch_tasks.lock().drain(..).collect();
        for task in tasks {
            let abort = task.abort_handle();
            if tokio::time::timeout(self.config.lifecycle.stop_grace(), task)
                .await
                .is_err()
            {
                abort.abort();
            }
        }

        for sub_id in self.pipeline_subscriptions.lock().drain(..) {
            self.bus.unsubscribe(&sub_id);
        }

        self.stop_adapters().await;

        if let Some(persistence) = &self.persistence {
            if let Ok(state) = self.store.snapshot(&self.twin_id) {
                if let Err(e) = persistence.save(&state) {
                    self.diagnostics.raise(Diagnostic::new(
                        Some(self.twin_id.clone()),
                        "engine",
                        DiagnosticKind::HandlerFailure,
                        format!("snapshot save failed: {}", e),
                    ));
                }
            }
        }

        self.transition(EngineLifecycle::Stopped);
        Ok(())
    }

    /// Stops every adapter, in reverse registration order.
    async fn stop_adapters(&self) {
        for adapter_id in self.registry.ordered_ids().iter().rev() {
            if let Err(e) = self.registry.stop(adapter_id).await {
                self.diagnostics.raise(Diagnostic::new(
                    Some(self.twin_id.clone()),
                    adapter_id.clone(),
                    DiagnosticKind::HandlerFailure,
                    format!("adapter stop failed: {}", e),
                ));
            }
        }
    }

    /// Wires intake -> runner -> fanout for this twin.
    fn spawn_pipeline(&self) {
        let (intake_tx, intake_rx) = mpsc::channel(self.config.shadowing.queue_capacity);

        // Physical intake: per-twin serialized queue fed from the bus.
        // Subscribed here, before start() returns, so no event is missed.
        let (intake_sub, mut physical_rx) = self.bus.subscribe(Topic::physical(&self.twin_id));
        self.pipeline_subscriptions.lock().push(intake_sub);
        let mut intake_stop = self.intake_stop.subscribe();
        let diagnostics = self.diagnostics.clone();
        let twin_id = self.twin_id.clone();
        let intake_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = intake_stop.recv() => break,
                    result = physical_rx.recv() => match result {
                        Ok(BusEvent::Physical(event)) => {
                            // Blocks when the queue is full; order from each
                            // adapter is preserved end-to-end.
                            if intake_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            diagnostics.raise(Diagnostic::new(
                                Some(twin_id.clone()),
                                "runner",
                                DiagnosticKind::SubscriberOverflow,
                                format!("intake dropped {} oldest events", n),
                            ));
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
            // intake_tx drops here; the runner drains and exits.
        });

        let runner = ShadowingRunner::new(
            &self.twin_id,
            self.store.clone(),
            self.bus.clone(),
            self.diagnostics.clone(),
            self.shadow.clone(),
            self.config.shadowing.max_conflict_retries,
        );
        *self.runner_task.lock() = Some(tokio::spawn(runner.run(intake_rx)));

        let fanout_task = self.spawn_state_change_dispatch();
        let action_task = self.spawn_action_dispatch();

        self.dispatch_tasks
            .lock()
            .extend([intake_task, fanout_task, action_task]);
    }

    /// Fans accepted state changes out to bound digital adapters.
    fn spawn_state_change_dispatch(&self) -> JoinHandle<()> {
        let (sub_id, mut rx) = self.bus.subscribe(Topic::state_change(&self.twin_id));
        self.pipeline_subscriptions.lock().push(sub_id);
        let mut stop = self.dispatch_stop.subscribe();
        let registry = self.registry.clone();
        let diagnostics = self.diagnostics.clone();
        let twin_id = self.twin_id.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.recv() => {
                        // Flush what is already queued before exiting.
                        while let Ok(event) = rx.try_recv() {
                            if let BusEvent::StateChange(change) = event {
                                deliver_state_change(&registry, &diagnostics, &twin_id, change)
                                    .await;
                            }
                        }
                        break;
                    }
                    result = rx.recv() => match result {
                        Ok(BusEvent::StateChange(change)) => {
                            deliver_state_change(&registry, &diagnostics, &twin_id, change).await;
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            diagnostics.raise(Diagnostic::new(
                                Some(twin_id.clone()),
                                "fanout",
                                DiagnosticKind::SubscriberOverflow,
                                format!("state change fanout dropped {} oldest events", n),
                            ));
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        })
    }

    /// Forwards digital action requests to bound physical adapters.
    fn spawn_action_dispatch(&self) -> JoinHandle<()> {
        let (sub_id, mut rx) = self.bus.subscribe(Topic::digital_action(&self.twin_id));
        self.pipeline_subscriptions.lock().push(sub_id);
        let mut stop = self.dispatch_stop.subscribe();
        let registry = self.registry.clone();
        let store = self.store.clone();
        let diagnostics = self.diagnostics.clone();
        let twin_id = self.twin_id.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.recv() => break,
                    result = rx.recv() => match result {
                        Ok(BusEvent::DigitalAction(action)) => {
                            deliver_action(&registry, &store, &diagnostics, &twin_id, action)
                                .await;
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            diagnostics.raise(Diagnostic::new(
                                Some(twin_id.clone()),
                                "actions",
                                DiagnosticKind::SubscriberOverflow,
                                format!("action dispatch dropped {} oldest events", n),
                            ));
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        })
    }

    /// Publishes the transition and records the new lifecycle state.
    fn transition(&self, to: EngineLifecycle) {
        let from = {
            let mut lifecycle = self.lifecycle.write();
            std::mem::replace(&mut *lifecycle, to)
        };
        tracing::info!(
            twin_id = %self.twin_id,
            from = from.as_str(),
            to = to.as_str(),
            "lifecycle transition"
        );
        self.bus.publish(BusEvent::Lifecycle(LifecycleVariation::new(
            &self.twin_id,
            from,
            to,
        )));
    }

    /// Returns the twin id.
    pub fn twin_id(&self) -> &str {
        &self.twin_id
    }

    /// Returns the current lifecycle state.
    pub fn lifecycle(&self) -> EngineLifecycle {
        *self.lifecycle.read()
    }

    /// Returns the event bus.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Returns the state store.
    pub fn store(&self) -> &Arc<TwinStateStore> {
        &self.store
    }

    /// Returns the adapter registry.
    pub fn registry(&self) -> &Arc<AdapterRegistry> {
        &self.registry
    }

    /// Returns the diagnostic sink.
    pub fn diagnostics(&self) -> &DiagnosticSink {
        &self.diagnostics
    }

    /// Returns a snapshot of the twin state.
    pub fn snapshot(&self) -> Result<TwinState, EngineError> {
        Ok(self.store.snapshot(&self.twin_id)?)
    }
}

/// Delivers one state change to every bound digital adapter; a failing
/// adapter is reported and sent into recovery without blocking the rest.
async fn deliver_state_change(
    registry: &Arc<AdapterRegistry>,
    diagnostics: &DiagnosticSink,
    twin_id: &str,
    change: twinforge_state::StateChangeEvent,
) {
    for (adapter_id, adapter) in registry.bound_digital_adapters() {
        if let Err(e) = adapter.on_state_change(change.clone()).await {
            diagnostics.raise(Diagnostic::new(
                Some(twin_id.to_string()),
                adapter_id.clone(),
                DiagnosticKind::HandlerFailure,
                format!("state change delivery failed: {}", e),
            ));
            spawn_recovery(registry, &adapter_id);
        }
    }
}

/// Delivers one action request to every bound physical adapter after
/// checking the action is declared.
async fn deliver_action(
    registry: &Arc<AdapterRegistry>,
    store: &Arc<TwinStateStore>,
    diagnostics: &DiagnosticSink,
    twin_id: &str,
    action: twinforge_bus::DigitalActionEvent,
) {
    let declared = store
        .snapshot(twin_id)
        .map(|s| s.has_action(&action.action_key))
        .unwrap_or(false);
    if !declared {
        diagnostics.raise(Diagnostic::new(
            Some(twin_id.to_string()),
            action.adapter_id.clone(),
            DiagnosticKind::UndeclaredAction,
            format!("action '{}' dropped: not declared", action.action_key),
        ));
        return;
    }

    for (adapter_id, adapter) in registry.bound_physical_adapters() {
        if let Err(e) = adapter.on_digital_action(action.clone()).await {
            diagnostics.raise(Diagnostic::new(
                Some(twin_id.to_string()),
                adapter_id.clone(),
                DiagnosticKind::HandlerFailure,
                format!("action delivery failed: {}", e),
            ));
            spawn_recovery(registry, &adapter_id);
        }
    }
}

/// Kicks off adapter recovery without blocking the dispatch loop.
fn spawn_recovery(registry: &Arc<AdapterRegistry>, adapter_id: &str) {
    use twinforge_adapter::AdapterLifecycle;

    // Only the first failure observation triggers recovery; recover()
    // moves the adapter out of Bound immediately.
    let bound = registry
        .descriptor(adapter_id)
        .map(|d| d.lifecycle == AdapterLifecycle::Bound)
        .unwrap_or(false);
    if !bound {
        return;
    }

    let registry = registry.clone();
    let adapter_id = adapter_id.to_string();
    tokio::spawn(async move {
        let _ = registry.recover(&adapter_id).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shadowing::{ShadowError, ShadowOutcome};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::time::Duration;
    use twinforge_adapter::{
        AdapterError, DigitalAdapterHandle, PhysicalAdapterHandle,
    };
    use twinforge_bus::{DigitalActionEvent, PhysicalEvent};
    use twinforge_state::{
        ActionDescriptor, MemorySnapshotStore, StateChangeEvent, StateDelta,
    };

    /// Physical adapter that keeps its handle so tests can emit through it.
    struct ProbePhysicalAdapter {
        id: String,
        handle: Mutex<Option<PhysicalAdapterHandle>>,
        actions: Mutex<Vec<DigitalActionEvent>>,
    }

    impl ProbePhysicalAdapter {
        fn new(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                handle: Mutex::new(None),
                actions: Mutex::new(Vec::new()),
            })
        }

        fn emit(&self, event_type: &str, payload: Value) {
            self.handle
                .lock()
                .as_ref()
                .expect("adapter not bound")
                .publish_event(event_type, payload);
        }

        fn received_actions(&self) -> Vec<DigitalActionEvent> {
            self.actions.lock().clone()
        }
    }

    #[async_trait]
    impl PhysicalAdapter for ProbePhysicalAdapter {
        fn id(&self) -> &str {
            &self.id
        }

        async fn bind(&self, handle: PhysicalAdapterHandle) -> Result<(), AdapterError> {
            *self.handle.lock() = Some(handle);
            Ok(())
        }

        async fn unbind(&self) -> Result<(), AdapterError> {
            *self.handle.lock() = None;
            Ok(())
        }

        async fn on_digital_action(&self, action: DigitalActionEvent) -> Result<(), AdapterError> {
            self.actions.lock().push(action);
            Ok(())
        }
    }

    /// Physical adapter whose bind never completes.
    struct StuckPhysicalAdapter {
        id: String,
    }

    #[async_trait]
    impl PhysicalAdapter for StuckPhysicalAdapter {
        fn id(&self) -> &str {
            &self.id
        }

        async fn bind(&self, _handle: PhysicalAdapterHandle) -> Result<(), AdapterError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }

        async fn unbind(&self) -> Result<(), AdapterError> {
            Ok(())
        }

        async fn on_digital_action(&self, _action: DigitalActionEvent) -> Result<(), AdapterError> {
            Ok(())
        }
    }

    /// Digital adapter that forwards every received change to the test.
    struct CollectingDigitalAdapter {
        id: String,
        handle: Mutex<Option<DigitalAdapterHandle>>,
        tx: mpsc::UnboundedSender<StateChangeEvent>,
    }

    impl CollectingDigitalAdapter {
        fn new(id: &str) -> (Arc<Self>, mpsc::UnboundedReceiver<StateChangeEvent>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                Arc::new(Self {
                    id: id.to_string(),
                    handle: Mutex::new(None),
                    tx,
                }),
                rx,
            )
        }

        fn submit_action(&self, action_key: &str, payload: Value) {
            self.handle
                .lock()
                .as_ref()
                .expect("adapter not bound")
                .submit_action(action_key, payload);
        }
    }

    #[async_trait]
    impl DigitalAdapter for CollectingDigitalAdapter {
        fn id(&self) -> &str {
            &self.id
        }

        async fn bind(&self, handle: DigitalAdapterHandle) -> Result<(), AdapterError> {
            *self.handle.lock() = Some(handle);
            Ok(())
        }

        async fn unbind(&self) -> Result<(), AdapterError> {
            *self.handle.lock() = None;
            Ok(())
        }

        async fn on_state_change(&self, change: StateChangeEvent) -> Result<(), AdapterError> {
            let _ = self.tx.send(change);
            Ok(())
        }
    }

    fn temperature_shadow() -> Arc<dyn ShadowingFunction> {
        Arc::new(
            |snapshot: &TwinState, event: &PhysicalEvent| -> Result<ShadowOutcome, ShadowError> {
                match event.event_type.as_str() {
                    "temp" => Ok(ShadowOutcome::Mutate(
                        StateDelta::new(snapshot.version)
                            .set_property("temperature", event.payload["value"].clone()),
                    )),
                    _ => Ok(ShadowOutcome::Noop),
                }
            },
        )
    }

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.adapters.start_timeout_ms = 100;
        config.adapters.retry_backoff_ms = 1;
        config.lifecycle.stop_grace_ms = 2000;
        config
    }

    async fn recv_change(
        rx: &mut mpsc::UnboundedReceiver<StateChangeEvent>,
    ) -> StateChangeEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for state change")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_temperature_scenario() {
        let twin = DigitalTwin::new(
            TwinModel::new("room-1"),
            temperature_shadow(),
            fast_config(),
        )
        .unwrap();

        let physical = ProbePhysicalAdapter::new("pa-1");
        let (digital, mut changes) = CollectingDigitalAdapter::new("da-1");
        twin.register_physical_adapter(physical.clone()).unwrap();
        twin.register_digital_adapter(digital).unwrap();

        twin.start().await.unwrap();
        assert_eq!(twin.lifecycle(), EngineLifecycle::Running);

        physical.emit("temp", json!({"value": 21.5}));

        let change = recv_change(&mut changes).await;
        assert_eq!(change.key, "temperature");
        assert_eq!(change.old, None);
        assert_eq!(change.new, Some(json!(21.5)));
        assert_eq!(change.version, 1);
        assert_eq!(twin.snapshot().unwrap().version, 1);

        twin.stop().await.unwrap();
        assert_eq!(twin.lifecycle(), EngineLifecycle::Stopped);
    }

    #[tokio::test]
    async fn test_concurrent_events_from_two_adapters() {
        let twin = DigitalTwin::new(
            TwinModel::new("room-1"),
            temperature_shadow(),
            fast_config(),
        )
        .unwrap();

        let pa1 = ProbePhysicalAdapter::new("pa-1");
        let pa2 = ProbePhysicalAdapter::new("pa-2");
        let (digital, mut changes) = CollectingDigitalAdapter::new("da-1");
        twin.register_physical_adapter(pa1.clone()).unwrap();
        twin.register_physical_adapter(pa2.clone()).unwrap();
        twin.register_digital_adapter(digital).unwrap();

        let mut diag_rx = twin.diagnostics().subscribe();
        twin.start().await.unwrap();

        pa1.emit("temp", json!({"value": 20.0}));
        pa2.emit("temp", json!({"value": 22.0}));

        let first = recv_change(&mut changes).await;
        let second = recv_change(&mut changes).await;

        // Both shadowed, serialized: versions 1 and 2, delivered once each.
        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert_eq!(twin.snapshot().unwrap().version, 2);
        assert!(changes.try_recv().is_err());

        // No conflict was surfaced.
        assert!(diag_rx.try_recv().is_err());

        twin.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_noop_event_publishes_no_change() {
        let twin = DigitalTwin::new(
            TwinModel::new("room-1"),
            temperature_shadow(),
            fast_config(),
        )
        .unwrap();

        let physical = ProbePhysicalAdapter::new("pa-1");
        let (digital, mut changes) = CollectingDigitalAdapter::new("da-1");
        twin.register_physical_adapter(physical.clone()).unwrap();
        twin.register_digital_adapter(digital).unwrap();

        twin.start().await.unwrap();

        physical.emit("ignored", json!({}));
        physical.emit("temp", json!({"value": 1}));

        // Only the second event produces a change.
        let change = recv_change(&mut changes).await;
        assert_eq!(change.new, Some(json!(1)));
        assert_eq!(twin.snapshot().unwrap().version, 1);
        assert!(changes.try_recv().is_err());

        twin.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_timed_out_adapter_does_not_block_healthy_ones() {
        let twin = DigitalTwin::new(
            TwinModel::new("room-1"),
            temperature_shadow(),
            fast_config(),
        )
        .unwrap();

        let stuck = Arc::new(StuckPhysicalAdapter {
            id: "pa-stuck".to_string(),
        });
        let healthy = ProbePhysicalAdapter::new("pa-healthy");
        twin.register_physical_adapter(stuck).unwrap();
        twin.register_physical_adapter(healthy.clone()).unwrap();

        // RequireAny: the healthy adapter is enough.
        twin.start().await.unwrap();
        assert_eq!(twin.lifecycle(), EngineLifecycle::Running);
        assert_eq!(twin.registry().bound_physical_count(), 1);

        healthy.emit("temp", json!({"value": 5}));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(twin.snapshot().unwrap().version, 1);

        twin.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_require_all_fails_when_one_adapter_times_out() {
        let mut config = fast_config();
        config.lifecycle.binding_policy = BindingPolicy::RequireAll;

        let twin =
            DigitalTwin::new(TwinModel::new("room-1"), temperature_shadow(), config).unwrap();
        twin.register_physical_adapter(Arc::new(StuckPhysicalAdapter {
            id: "pa-stuck".to_string(),
        }))
        .unwrap();
        twin.register_physical_adapter(ProbePhysicalAdapter::new("pa-healthy"))
            .unwrap();

        let result = twin.start().await;
        assert!(matches!(
            result,
            Err(EngineError::BindingPolicyUnsatisfied {
                bound: 1,
                total: 2,
                ..
            })
        ));
        assert_eq!(twin.lifecycle(), EngineLifecycle::Error);
    }

    #[tokio::test]
    async fn test_invalid_lifecycle_transitions() {
        let twin = DigitalTwin::new(
            TwinModel::new("room-1"),
            temperature_shadow(),
            fast_config(),
        )
        .unwrap();
        twin.register_physical_adapter(ProbePhysicalAdapter::new("pa-1"))
            .unwrap();

        // stop before start
        assert!(matches!(
            twin.stop().await,
            Err(EngineError::InvalidLifecycleTransition { .. })
        ));

        twin.start().await.unwrap();

        // start while running
        assert!(matches!(
            twin.start().await,
            Err(EngineError::InvalidLifecycleTransition { .. })
        ));

        twin.stop().await.unwrap();

        // restart from Stopped is legal
        twin.start().await.unwrap();
        twin.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_digital_action_reaches_physical_adapter() {
        let twin = DigitalTwin::new(
            TwinModel::new("room-1").with_action(ActionDescriptor::new(
                "set-target",
                "Set Target",
                json!({"type": "number"}),
            )),
            temperature_shadow(),
            fast_config(),
        )
        .unwrap();

        let physical = ProbePhysicalAdapter::new("pa-1");
        let (digital, _changes) = CollectingDigitalAdapter::new("da-1");
        twin.register_physical_adapter(physical.clone()).unwrap();
        twin.register_digital_adapter(digital.clone()).unwrap();

        twin.start().await.unwrap();

        digital.submit_action("set-target", json!(22.0));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let actions = physical.received_actions();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action_key, "set-target");
        assert_eq!(actions[0].adapter_id, "da-1");

        twin.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_undeclared_action_is_dropped_with_diagnostic() {
        let twin = DigitalTwin::new(
            TwinModel::new("room-1"),
            temperature_shadow(),
            fast_config(),
        )
        .unwrap();

        let physical = ProbePhysicalAdapter::new("pa-1");
        let (digital, _changes) = CollectingDigitalAdapter::new("da-1");
        twin.register_physical_adapter(physical.clone()).unwrap();
        twin.register_digital_adapter(digital.clone()).unwrap();

        let mut diag_rx = twin.diagnostics().subscribe();
        twin.start().await.unwrap();

        digital.submit_action("not-declared", json!({}));

        let diagnostic = tokio::time::timeout(Duration::from_secs(2), diag_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(diagnostic.kind, DiagnosticKind::UndeclaredAction);
        assert!(physical.received_actions().is_empty());

        twin.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_waits_for_in_flight_shadowing() {
        let slow_shadow = Arc::new(
            |snapshot: &TwinState, _: &PhysicalEvent| -> Result<ShadowOutcome, ShadowError> {
                // Simulates a shadowing computation still in flight when
                // stop() arrives.
                std::thread::sleep(Duration::from_millis(300));
                Ok(ShadowOutcome::Mutate(
                    StateDelta::new(snapshot.version).set_property("done", json!(true)),
                ))
            },
        );

        let twin =
            DigitalTwin::new(TwinModel::new("room-1"), slow_shadow, fast_config()).unwrap();
        let physical = ProbePhysicalAdapter::new("pa-1");
        twin.register_physical_adapter(physical.clone()).unwrap();

        twin.start().await.unwrap();
        physical.emit("temp", json!({"value": 1}));
        tokio::time::sleep(Duration::from_millis(50)).await;

        twin.stop().await.unwrap();

        // The in-flight computation completed before Stopped.
        assert_eq!(twin.lifecycle(), EngineLifecycle::Stopped);
        assert_eq!(twin.snapshot().unwrap().version, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_grace_timeout_abandons_and_reports() {
        let very_slow_shadow = Arc::new(
            |snapshot: &TwinState, _: &PhysicalEvent| -> Result<ShadowOutcome, ShadowError> {
                std::thread::sleep(Duration::from_secs(2));
                Ok(ShadowOutcome::Mutate(
                    StateDelta::new(snapshot.version).set_property("done", json!(true)),
                ))
            },
        );

        let mut config = fast_config();
        config.lifecycle.stop_grace_ms = 50;

        let twin = DigitalTwin::new(TwinModel::new("room-1"), very_slow_shadow, config).unwrap();
        let physical = ProbePhysicalAdapter::new("pa-1");
        twin.register_physical_adapter(physical.clone()).unwrap();

        let mut diag_rx = twin.diagnostics().subscribe();
        twin.start().await.unwrap();
        physical.emit("temp", json!({"value": 1}));
        tokio::time::sleep(Duration::from_millis(20)).await;

        twin.stop().await.unwrap();
        assert_eq!(twin.lifecycle(), EngineLifecycle::Stopped);

        // The abandonment was reported, never silent.
        let mut saw_drain_timeout = false;
        while let Ok(diagnostic) = diag_rx.try_recv() {
            if diagnostic.kind == DiagnosticKind::DrainTimeout {
                saw_drain_timeout = true;
            }
        }
        assert!(saw_drain_timeout);
    }

    #[tokio::test]
    async fn test_snapshot_persisted_at_stop_and_restored_at_start() {
        let persistence = Arc::new(MemorySnapshotStore::new());

        {
            let twin = DigitalTwin::new(
                TwinModel::new("room-1"),
                temperature_shadow(),
                fast_config(),
            )
            .unwrap()
            .with_persistence(persistence.clone());

            let physical = ProbePhysicalAdapter::new("pa-1");
            twin.register_physical_adapter(physical.clone()).unwrap();
            twin.start().await.unwrap();

            physical.emit("temp", json!({"value": 21.5}));
            tokio::time::sleep(Duration::from_millis(100)).await;
            twin.stop().await.unwrap();
        }

        // A fresh twin restores the persisted state at start.
        let twin = DigitalTwin::new(
            TwinModel::new("room-1"),
            temperature_shadow(),
            fast_config(),
        )
        .unwrap()
        .with_persistence(persistence);

        twin.register_physical_adapter(ProbePhysicalAdapter::new("pa-1"))
            .unwrap();
        twin.start().await.unwrap();

        let snapshot = twin.snapshot().unwrap();
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.property_value("temperature"), Some(&json!(21.5)));

        twin.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_lifecycle_variations_published() {
        let twin = DigitalTwin::new(
            TwinModel::new("room-1"),
            temperature_shadow(),
            fast_config(),
        )
        .unwrap();
        twin.register_physical_adapter(ProbePhysicalAdapter::new("pa-1"))
            .unwrap();

        let (_, mut rx) = twin.bus().subscribe(Topic::lifecycle("room-1"));

        twin.start().await.unwrap();
        twin.stop().await.unwrap();

        let mut transitions = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let BusEvent::Lifecycle(variation) = event {
                transitions.push((variation.from, variation.to));
            }
        }
        assert_eq!(
            transitions,
            vec![
                (EngineLifecycle::Created, EngineLifecycle::Starting),
                (EngineLifecycle::Starting, EngineLifecycle::Running),
                (EngineLifecycle::Running, EngineLifecycle::Stopping),
                (EngineLifecycle::Stopping, EngineLifecycle::Stopped),
            ]
        );
    }
}
