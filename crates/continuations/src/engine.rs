// Archivo: engine.rs
// Propósito: `EngineScope`, la vista del almacén ligada a una instancia de
// motor de flujo. Fija el engine tag, el ttl y el disposer de forma que el
// motor no tenga que repetirlos en cada llamada.
use crate::errors::Result;
use crate::forest::ContinuationForest;
use crate::node::ContinuationNode;
use crate::payload::{Disposer, Payload};
use std::sync::Arc;
use std::time::Duration;

/// Operaciones del almacén vistas desde un motor concreto.
///
/// Todas las búsquedas usan el tag del scope, así que ids de otro motor
/// resultan en `NotFound`.
#[derive(Clone)]
pub struct EngineScope {
    forest: Arc<ContinuationForest>,
    engine_tag: String,
    time_to_live: Duration,
    disposer: Option<Arc<dyn Disposer>>,
}

impl EngineScope {
    pub fn new(forest: Arc<ContinuationForest>, engine_tag: impl Into<String>, time_to_live: Duration) -> Self {
        Self { forest,
               engine_tag: engine_tag.into(),
               time_to_live,
               disposer: None }
    }

    /// Ttl para las continuaciones creadas desde este scope.
    pub fn with_time_to_live(mut self, time_to_live: Duration) -> Self {
        self.time_to_live = time_to_live;
        self
    }

    /// Disposer que se adjunta a cada continuación creada.
    pub fn with_disposer(mut self, disposer: Arc<dyn Disposer>) -> Self {
        self.disposer = Some(disposer);
        self
    }

    pub fn engine_tag(&self) -> &str {
        &self.engine_tag
    }

    pub fn time_to_live(&self) -> Duration {
        self.time_to_live
    }

    /// Suspende un flujo nuevo: crea una raíz.
    pub fn start(&self, payload: Payload) -> Result<Arc<ContinuationNode>> {
        self.forest
            .create(payload, None, self.time_to_live, &self.engine_tag, self.disposer.clone())
    }

    /// Suspende de nuevo tras reanudar desde `parent_id`: crea un hijo.
    ///
    /// El padre se resuelve con el tag del scope (cuenta como acceso); si fue
    /// invalidado entre medias la creación falla con `NotFound`.
    pub fn resume_from(&self, parent_id: &str, payload: Payload) -> Result<Arc<ContinuationNode>> {
        let parent = self.forest.lookup(parent_id, &self.engine_tag)?;
        self.forest.create(payload,
                           Some(parent.id()),
                           self.time_to_live,
                           &self.engine_tag,
                           self.disposer.clone())
    }

    pub fn lookup(&self, id: &str) -> Result<Arc<ContinuationNode>> {
        self.forest.lookup(id, &self.engine_tag)
    }

    /// Termina explícitamente la rama `id` y sus descendientes.
    pub fn invalidate(&self, id: &str) -> Result<()> {
        self.forest.invalidate_id(id, &self.engine_tag)
    }
}
