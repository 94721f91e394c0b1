// Archivo: store.rs
// Propósito: implementar `ContinuationStore`, la instancia explícita que
// agrupa el bosque, la configuración y la vida de la tarea de barrido
// (arranque/parada). Esta capa es la que usan los handlers y motores.
use crate::clock::{Clock, SystemClock};
use crate::config::StoreConfig;
use crate::engine::EngineScope;
use crate::errors::{ContinuationError, Result};
use crate::forest::ContinuationForest;
use crate::node::ContinuationNode;
use crate::payload::{Disposer, Payload};
use crate::snapshot::ContinuationSnapshot;
use crate::sweeper::{ExpirySweeper, SweepReport, SweeperHandle};
use log::{info, warn};
use tokio::runtime::Handle;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Almacén de continuaciones con barrido opcional en segundo plano.
pub struct ContinuationStore {
    forest: Arc<ContinuationForest>,
    config: StoreConfig,
    sweeper: Mutex<Option<SweeperHandle>>,
}

impl ContinuationStore {
    /// Crea el almacén con reloj del sistema. El barrido no arranca hasta
    /// llamar `start`.
    pub fn new(config: StoreConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Crea el almacén con un reloj concreto.
    pub fn with_clock(config: StoreConfig, clock: Arc<dyn Clock>) -> Self {
        let forest = ContinuationForest::with_clock(clock).with_max_id_attempts(config.max_id_attempts);
        Self::with_forest(config, Arc::new(forest))
    }

    /// Envuelve un bosque ya construido (p.ej. con otro generador de ids).
    pub fn with_forest(config: StoreConfig, forest: Arc<ContinuationForest>) -> Self {
        Self { forest,
               config,
               sweeper: Mutex::new(None) }
    }

    /// Crea el almacén leyendo `StoreConfig::from_env`.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(StoreConfig::from_env()?))
    }

    pub fn forest(&self) -> &Arc<ContinuationForest> {
        &self.forest
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Arranca el barrido periódico en el runtime de tokio actual. Devuelve
    /// `Ok(false)` si ya estaba corriendo y `NoRuntime` si no hay runtime.
    pub fn start(&self) -> Result<bool> {
        let runtime = Handle::try_current().map_err(|e| ContinuationError::NoRuntime(e.to_string()))?;
        Ok(self.start_on(&runtime))
    }

    /// Arranca el barrido periódico en `runtime`. Devuelve `false` si ya
    /// estaba corriendo.
    pub fn start_on(&self, runtime: &Handle) -> bool {
        let mut slot = self.sweeper.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().map(|h| h.is_running()).unwrap_or(false) {
            return false;
        }
        let handle = ExpirySweeper::new(self.forest.clone(), self.config.sweep_interval).spawn_on(runtime);
        *slot = Some(handle);
        true
    }

    pub fn is_running(&self) -> bool {
        self.sweeper
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|h| h.is_running())
            .unwrap_or(false)
    }

    /// Detiene el barrido y luego invalida todas las continuaciones que
    /// queden. Devuelve cuántas se eliminaron; los fallos de disposers se
    /// devuelven tras completar la limpieza.
    pub async fn shutdown(&self) -> Result<usize> {
        let handle = self.sweeper.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(mut handle) = handle {
            handle.shutdown().await;
        }
        let outcome = self.forest.clear();
        info!("almacen cerrado: {} continuaciones eliminadas", outcome.removed);
        if outcome.faults.is_empty() {
            Ok(outcome.removed)
        } else {
            warn!("{} disposers fallaron durante el cierre", outcome.faults.len());
            Err(ContinuationError::DisposerFailure(outcome.faults))
        }
    }

    /// Ejecuta una pasada de barrido inmediata, independiente de la tarea
    /// periódica.
    pub fn sweep_now(&self) -> SweepReport {
        ExpirySweeper::new(self.forest.clone(), self.config.sweep_interval).sweep_once()
    }

    /// Vista del almacén para un motor, con el ttl por defecto.
    pub fn bind(&self, engine_tag: impl Into<String>) -> EngineScope {
        EngineScope::new(self.forest.clone(), engine_tag, self.config.default_ttl)
    }

    pub fn create(&self,
                  payload: Payload,
                  parent_id: Option<&str>,
                  time_to_live: Duration,
                  engine_tag: &str,
                  disposer: Option<Arc<dyn Disposer>>)
                  -> Result<Arc<ContinuationNode>> {
        self.forest.create(payload, parent_id, time_to_live, engine_tag, disposer)
    }

    pub fn lookup(&self, id: &str, engine_tag: &str) -> Result<Arc<ContinuationNode>> {
        self.forest.lookup(id, engine_tag)
    }

    pub fn invalidate(&self, node: &ContinuationNode) -> Result<()> {
        self.forest.invalidate(node)
    }

    pub fn forest_snapshot(&self) -> Vec<ContinuationSnapshot> {
        self.forest.forest_snapshot()
    }
}

impl Default for ContinuationStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}
