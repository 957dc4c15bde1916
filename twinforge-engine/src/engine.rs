//! Multi-twin engine container.

use crate::config::Config;
use crate::error::EngineError;
use crate::shadowing::ShadowingFunction;
use crate::twin::DigitalTwin;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use twinforge_bus::{DiagnosticSink, EventBus};
use twinforge_state::{SnapshotStore, TwinModel, TwinStateStore};

/// Manages a set of digital twins sharing one store, bus, and diagnostic
/// sink.
///
/// Each twin keeps its own adapters and lifecycle; twins shadow
/// concurrently while every single twin's mutations stay serialized.
pub struct TwinEngine {
    config: Config,
    store: Arc<TwinStateStore>,
    bus: Arc<EventBus>,
    diagnostics: DiagnosticSink,
    twins: DashMap<String, Arc<DigitalTwin>>,
    order: Mutex<Vec<String>>,
}

impl TwinEngine {
    /// Creates an empty engine.
    pub fn new(config: Config) -> Self {
        let bus = Arc::new(EventBus::new(config.bus.channel_capacity));
        let diagnostics = DiagnosticSink::new(config.bus.diagnostic_capacity);
        Self {
            config,
            store: Arc::new(TwinStateStore::new()),
            bus,
            diagnostics,
            twins: DashMap::new(),
            order: Mutex::new(Vec::new()),
        }
    }

    /// Creates and registers a twin from its model and shadowing function.
    pub fn create_twin(
        &self,
        model: TwinModel,
        shadow: Arc<dyn ShadowingFunction>,
    ) -> Result<Arc<DigitalTwin>, EngineError> {
        self.insert_twin(model, shadow, None)
    }

    /// Creates a twin with a snapshot persistence collaborator.
    pub fn create_twin_with_persistence(
        &self,
        model: TwinModel,
        shadow: Arc<dyn ShadowingFunction>,
        persistence: Arc<dyn SnapshotStore>,
    ) -> Result<Arc<DigitalTwin>, EngineError> {
        self.insert_twin(model, shadow, Some(persistence))
    }

    fn insert_twin(
        &self,
        model: TwinModel,
        shadow: Arc<dyn ShadowingFunction>,
        persistence: Option<Arc<dyn SnapshotStore>>,
    ) -> Result<Arc<DigitalTwin>, EngineError> {
        let twin_id = model.twin_id.clone();
        if self.twins.contains_key(&twin_id) {
            return Err(EngineError::TwinAlreadyManaged { twin_id });
        }

        let mut twin = DigitalTwin::with_infrastructure(
            model,
            shadow,
            self.config.clone(),
            self.store.clone(),
            self.bus.clone(),
            self.diagnostics.clone(),
        )?;
        if let Some(persistence) = persistence {
            twin = twin.with_persistence(persistence);
        }

        let twin = Arc::new(twin);
        self.twins.insert(twin_id.clone(), twin.clone());
        self.order.lock().push(twin_id);

        Ok(twin)
    }

    /// Returns a managed twin by id.
    pub fn twin(&self, twin_id: &str) -> Option<Arc<DigitalTwin>> {
        self.twins.get(twin_id).map(|r| r.clone())
    }

    /// Starts one twin.
    pub async fn start_twin(&self, twin_id: &str) -> Result<(), EngineError> {
        self.get(twin_id)?.start().await
    }

    /// Stops one twin.
    pub async fn stop_twin(&self, twin_id: &str) -> Result<(), EngineError> {
        self.get(twin_id)?.stop().await
    }

    /// Removes a twin, stopping it first if it is running.
    pub async fn remove_twin(&self, twin_id: &str) -> Result<(), EngineError> {
        let twin = self.get(twin_id)?;
        if twin.lifecycle() == twinforge_bus::EngineLifecycle::Running {
            twin.stop().await?;
        }

        self.twins.remove(twin_id);
        self.order.lock().retain(|id| id != twin_id);
        let _ = self.store.remove_twin(twin_id);

        tracing::info!(twin_id, "twin removed from engine");
        Ok(())
    }

    /// Starts every managed twin, in creation order.
    ///
    /// Attempts every twin even if one fails; the first failure is
    /// returned after the sweep.
    pub async fn start_all(&self) -> Result<(), EngineError> {
        let mut first_error = None;
        for twin_id in self.order.lock().clone() {
            if let Some(twin) = self.twin(&twin_id) {
                if let Err(e) = twin.start().await {
                    tracing::error!(twin_id = %twin_id, error = %e, "twin start failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Stops every managed twin, in reverse creation order.
    pub async fn stop_all(&self) -> Result<(), EngineError> {
        let mut first_error = None;
        for twin_id in self.order.lock().clone().into_iter().rev() {
            if let Some(twin) = self.twin(&twin_id) {
                if let Err(e) = twin.stop().await {
                    tracing::error!(twin_id = %twin_id, error = %e, "twin stop failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Returns the number of managed twins.
    pub fn twin_count(&self) -> usize {
        self.twins.len()
    }

    /// Returns managed twin ids in creation order.
    pub fn twin_ids(&self) -> Vec<String> {
        self.order.lock().clone()
    }

    /// Returns the shared event bus.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Returns the shared state store.
    pub fn store(&self) -> &Arc<TwinStateStore> {
        &self.store
    }

    /// Returns the shared diagnostic sink.
    pub fn diagnostics(&self) -> &DiagnosticSink {
        &self.diagnostics
    }

    fn get(&self, twin_id: &str) -> Result<Arc<DigitalTwin>, EngineError> {
        self.twin(twin_id).ok_or_else(|| EngineError::TwinNotManaged {
            twin_id: twin_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shadowing::{ShadowError, ShadowOutcome};
    use async_trait::async_trait;
    use parking_lot::Mutex as PlMutex;
    use serde_json::{json, Value};
    use std::time::Duration;
    use twinforge_adapter::{AdapterError, PhysicalAdapter, PhysicalAdapterHandle};
    use twinforge_bus::{DigitalActionEvent, EngineLifecycle, PhysicalEvent};
    use twinforge_state::{StateDelta, TwinState};

    struct EmitterAdapter {
        id: String,
        handle: PlMutex<Option<PhysicalAdapterHandle>>,
    }

    impl EmitterAdapter {
        fn new(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                handle: PlMutex::new(None),
            })
        }

        fn emit(&self, event_type: &str, payload: Value) {
            self.handle
                .lock()
                .as_ref()
                .expect("adapter not bound")
                .publish_event(event_type, payload);
        }
    }

    #[async_trait]
    impl PhysicalAdapter for EmitterAdapter {
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

        async fn on_digital_action(&self, _action: DigitalActionEvent) -> Result<(), AdapterError> {
            Ok(())
        }
    }

    fn echo_shadow() -> Arc<dyn crate::ShadowingFunction> {
        Arc::new(
            |snapshot: &TwinState, event: &PhysicalEvent| -> Result<ShadowOutcome, ShadowError> {
                Ok(ShadowOutcome::Mutate(
                    StateDelta::new(snapshot.version)
                        .set_property("value", event.payload["value"].clone()),
                ))
            },
        )
    }

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.adapters.start_timeout_ms = 100;
        config.lifecycle.stop_grace_ms = 2000;
        config
    }

    #[tokio::test]
    async fn test_create_and_duplicate() {
        let engine = TwinEngine::new(fast_config());
        engine
            .create_twin(TwinModel::new("twin-1"), echo_shadow())
            .unwrap();

        let result = engine.create_twin(TwinModel::new("twin-1"), echo_shadow());
        assert!(matches!(
            result,
            Err(EngineError::TwinAlreadyManaged { .. })
        ));
        assert_eq!(engine.twin_count(), 1);
    }

    #[tokio::test]
    async fn test_twins_shadow_concurrently() {
        let engine = TwinEngine::new(fast_config());

        let adapter_1 = EmitterAdapter::new("pa-1");
        let adapter_2 = EmitterAdapter::new("pa-2");

        let twin_1 = engine
            .create_twin(TwinModel::new("twin-1"), echo_shadow())
            .unwrap();
        twin_1.register_physical_adapter(adapter_1.clone()).unwrap();

        let twin_2 = engine
            .create_twin(TwinModel::new("twin-2"), echo_shadow())
            .unwrap();
        twin_2.register_physical_adapter(adapter_2.clone()).unwrap();

        engine.start_all().await.unwrap();
        assert_eq!(twin_1.lifecycle(), EngineLifecycle::Running);
        assert_eq!(twin_2.lifecycle(), EngineLifecycle::Running);

        adapter_1.emit("reading", json!({"value": 1}));
        adapter_2.emit("reading", json!({"value": 2}));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(engine.store().snapshot("twin-1").unwrap().version, 1);
        assert_eq!(engine.store().snapshot("twin-2").unwrap().version, 1);
        assert_eq!(
            engine
                .store()
                .snapshot("twin-2")
                .unwrap()
                .property_value("value"),
            Some(&json!(2))
        );

        engine.stop_all().await.unwrap();
        assert_eq!(twin_1.lifecycle(), EngineLifecycle::Stopped);
        assert_eq!(twin_2.lifecycle(), EngineLifecycle::Stopped);
    }

    #[tokio::test]
    async fn test_remove_running_twin_stops_it_first() {
        let engine = TwinEngine::new(fast_config());
        let adapter = EmitterAdapter::new("pa-1");

        let twin = engine
            .create_twin(TwinModel::new("twin-1"), echo_shadow())
            .unwrap();
        twin.register_physical_adapter(adapter).unwrap();
        engine.start_twin("twin-1").await.unwrap();

        engine.remove_twin("twin-1").await.unwrap();
        assert_eq!(twin.lifecycle(), EngineLifecycle::Stopped);
        assert_eq!(engine.twin_count(), 0);
        assert!(!engine.store().contains("twin-1"));
    }

    #[tokio::test]
    async fn test_unmanaged_twin_errors() {
        let engine = TwinEngine::new(fast_config());
        assert!(matches!(
            engine.start_twin("ghost").await,
            Err(EngineError::TwinNotManaged { .. })
        ));
    }
}
