// Archivo: node.rs
// Propósito: el nodo de continuación. Identidad inmutable (id, motor, padre)
// y ciclo de vida mutable (acceso, atributos, hijos, descarte).
//
// Los enlaces padre/hijo se guardan como ids más una referencia débil al
// padre; el único dueño de la vida de un nodo es el índice del bosque.
use crate::clock::{duration_millis, Clock};
use crate::errors::DisposerFault;
use crate::payload::{Disposer, Payload};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use indexmap::IndexSet;
use serde_json::Value as JsonValue;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

/// Continuación registrada en el bosque.
///
/// Se comparte como `Arc<ContinuationNode>`. Los campos que sólo afectan al
/// propio nodo (acceso, atributos) tienen su propia sincronización y no
/// requieren el lock estructural del bosque.
pub struct ContinuationNode {
    id: String,
    engine_tag: String,
    parent_id: Option<String>,
    parent: Option<Weak<ContinuationNode>>,
    /// Ids de los hijos en orden de creación. Sólo se modifica con el lock
    /// de escritura del bosque tomado.
    children: RwLock<IndexSet<String>>,
    payload: Mutex<Option<Payload>>,
    disposer: Mutex<Option<Arc<dyn Disposer>>>,
    attributes: DashMap<String, JsonValue>,
    created_at: DateTime<Utc>,
    last_access: AtomicI64,
    time_to_live: Duration,
    disposed: AtomicBool,
    clock: Arc<dyn Clock>,
}

/// Lo que queda pendiente tras marcar un nodo como descartado: el payload y
/// el disposer que deben ejecutarse fuera del lock estructural.
pub(crate) struct PendingDisposal {
    pub(crate) id: String,
    payload: Option<Payload>,
    disposer: Option<Arc<dyn Disposer>>,
}

impl PendingDisposal {
    /// Ejecuta el disposer (si hay). Errores y panics se convierten en
    /// `DisposerFault`; nunca se propagan.
    pub(crate) fn run(self) -> Option<DisposerFault> {
        let (Some(disposer), Some(payload)) = (self.disposer, self.payload) else {
            return None;
        };
        match panic::catch_unwind(AssertUnwindSafe(|| disposer.dispose(payload))) {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(DisposerFault { id: self.id,
                                               reason: e.to_string() }),
            Err(p) => Some(DisposerFault { id: self.id,
                                           reason: panic_message(p.as_ref()) }),
        }
    }
}

pub(crate) fn panic_message(p: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = p.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = p.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic".to_string()
    }
}

impl ContinuationNode {
    pub(crate) fn new(id: String,
                      engine_tag: String,
                      parent: Option<&Arc<ContinuationNode>>,
                      payload: Payload,
                      time_to_live: Duration,
                      disposer: Option<Arc<dyn Disposer>>,
                      clock: Arc<dyn Clock>)
                      -> Self {
        let now = clock.now();
        Self { id,
               engine_tag,
               parent_id: parent.map(|p| p.id.clone()),
               parent: parent.map(Arc::downgrade),
               children: RwLock::new(IndexSet::new()),
               payload: Mutex::new(Some(payload)),
               disposer: Mutex::new(disposer),
               attributes: DashMap::new(),
               created_at: now,
               last_access: AtomicI64::new(now.timestamp_millis()),
               time_to_live,
               disposed: AtomicBool::new(false),
               clock }
    }

    /// Identificador externo.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Motor que creó la continuación.
    pub fn engine_tag(&self) -> &str {
        &self.engine_tag
    }

    /// Id del nodo desde el que se reanudó, si existe.
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    /// Nodo padre vivo. `None` para raíces o cuando el padre ya fue
    /// descartado.
    pub fn parent(&self) -> Option<Arc<ContinuationNode>> {
        self.parent
            .as_ref()
            .and_then(Weak::upgrade)
            .filter(|p| !p.is_disposed())
    }

    /// Ids de los hijos en orden.
    pub fn children_ids(&self) -> Vec<String> {
        self.children.read().unwrap_or_else(|e| e.into_inner()).iter().cloned().collect()
    }

    /// Número de hijos.
    pub fn child_count(&self) -> usize {
        self.children.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Payload del motor; `None` una vez descartado.
    pub fn payload(&self) -> Option<Payload> {
        if self.is_disposed() {
            return None;
        }
        self.payload.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Acceso tipado al payload.
    pub fn payload_as<T: std::any::Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.payload().and_then(|p| p.downcast_arc::<T>())
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Último acceso registrado (creación, lookup o `touch`).
    pub fn last_access(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.last_access.load(Ordering::SeqCst)).unwrap_or_default()
    }

    pub fn time_to_live(&self) -> Duration {
        self.time_to_live
    }

    /// Instante a partir del cual el nodo se considera expirado.
    pub fn expires_at(&self) -> DateTime<Utc> {
        chrono::Duration::try_milliseconds(duration_millis(self.time_to_live))
            .and_then(|ttl| self.last_access().checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Refresca el último acceso al instante actual.
    pub fn touch(&self) {
        self.last_access.store(self.clock.now_millis(), Ordering::SeqCst);
    }

    /// `now - last_access > time_to_live`.
    pub fn has_expired(&self) -> bool {
        self.has_expired_at(self.clock.now_millis())
    }

    pub(crate) fn has_expired_at(&self, now_millis: i64) -> bool {
        let idle = now_millis.saturating_sub(self.last_access.load(Ordering::SeqCst));
        idle > duration_millis(self.time_to_live)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Lee un atributo.
    pub fn attribute(&self, key: &str) -> Option<JsonValue> {
        self.attributes.get(key).map(|v| v.value().clone())
    }

    /// Escribe un atributo y devuelve el valor previo.
    pub fn set_attribute(&self, key: impl Into<String>, value: JsonValue) -> Option<JsonValue> {
        self.attributes.insert(key.into(), value)
    }

    /// Elimina un atributo y devuelve su valor.
    pub fn remove_attribute(&self, key: &str) -> Option<JsonValue> {
        self.attributes.remove(key).map(|(_, v)| v)
    }

    /// Claves de atributos, ordenadas.
    pub fn attribute_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.attributes.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Copia de todos los atributos.
    pub(crate) fn attributes_copy(&self) -> std::collections::BTreeMap<String, JsonValue> {
        self.attributes
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub(crate) fn payload_type(&self) -> Option<&'static str> {
        self.payload.lock().unwrap_or_else(|e| e.into_inner()).as_ref().map(|p| p.type_name())
    }

    pub(crate) fn add_child(&self, child_id: &str) -> bool {
        self.children
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(child_id.to_string())
    }

    pub(crate) fn remove_child(&self, child_id: &str) -> bool {
        self.children
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .shift_remove(child_id)
    }

    /// Marca el nodo como descartado. Sólo la primera llamada gana: devuelve
    /// el payload y el disposer a ejecutar; las siguientes devuelven `None`.
    /// Los atributos se vacían junto con el payload.
    pub(crate) fn mark_disposed(&self) -> Option<PendingDisposal> {
        if self.disposed
               .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
               .is_err()
        {
            return None;
        }
        let payload = self.payload.lock().unwrap_or_else(|e| e.into_inner()).take();
        let disposer = self.disposer.lock().unwrap_or_else(|e| e.into_inner()).take();
        self.attributes.clear();
        Some(PendingDisposal { id: self.id.clone(),
                               payload,
                               disposer })
    }
}

impl fmt::Debug for ContinuationNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContinuationNode")
         .field("id", &self.id)
         .field("engine_tag", &self.engine_tag)
         .field("parent_id", &self.parent_id)
         .field("children", &self.children_ids())
         .field("last_access", &self.last_access())
         .field("time_to_live", &self.time_to_live)
         .field("disposed", &self.is_disposed())
         .finish()
    }
}
