// Archivo: forest.rs
// Propósito: implementar `ContinuationForest`, el registro autoritativo y
// thread-safe de todas las continuaciones vivas.
//
// Disciplina de concurrencia: un único `RwLock` protege el índice por id, el
// conjunto de raíces y todas las aristas padre/hijo. El último acceso es un
// campo atómico del nodo y los atributos tienen su propio mapa concurrente,
// así que un lookup sólo toma el lock de lectura. Los disposers se ejecutan
// siempre después de soltar el lock.
use crate::clock::{Clock, SystemClock};
use crate::errors::{ContinuationError, DisposerFault, Result};
use crate::ids::{IdGenerator, UuidIdGenerator};
use crate::node::{ContinuationNode, PendingDisposal};
use crate::payload::{Disposer, Payload};
use crate::snapshot::{self, ContinuationSnapshot};
use indexmap::IndexSet;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// Intentos de generación de id por defecto antes de fallar con
/// `IdCollision`.
pub const DEFAULT_MAX_ID_ATTEMPTS: u32 = 3;

#[derive(Default)]
struct ForestIndex {
    /// Dueño único de la vida de cada nodo.
    nodes: HashMap<String, Arc<ContinuationNode>>,
    /// Ids de los nodos sin padre, en orden de creación.
    roots: IndexSet<String>,
}

/// Resultado interno de una invalidación en cascada.
#[derive(Debug, Default)]
pub(crate) struct Invalidation {
    /// Nodos desligados del índice (el nodo pedido y sus descendientes).
    pub(crate) removed: usize,
    pub(crate) faults: Vec<DisposerFault>,
}

/// Bosque de continuaciones.
///
/// Se construye explícitamente y se comparte por `Arc`. No hay instancia
/// global: el dueño (normalmente `ContinuationStore`) decide su vida.
pub struct ContinuationForest {
    index: RwLock<ForestIndex>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    max_id_attempts: u32,
}

impl Default for ContinuationForest {
    fn default() -> Self {
        Self::new()
    }
}

impl ContinuationForest {
    /// Bosque vacío con reloj del sistema y ids UUID v4.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Bosque vacío con un reloj concreto.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { index: RwLock::new(ForestIndex::default()),
               clock,
               ids: Arc::new(UuidIdGenerator),
               max_id_attempts: DEFAULT_MAX_ID_ATTEMPTS }
    }

    /// Reemplaza el generador de ids.
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Fija cuántas veces se regenera un id en colisión (mínimo 1).
    pub fn with_max_id_attempts(mut self, attempts: u32) -> Self {
        self.max_id_attempts = attempts.max(1);
        self
    }

    /// Reloj usado por el bosque y sus nodos.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn read(&self) -> RwLockReadGuard<'_, ForestIndex> {
        self.index.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ForestIndex> {
        self.index.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Crea una continuación.
    ///
    /// - `parent_id` vacío o `None`: nueva raíz.
    /// - `parent_id` presente: el padre debe existir y no estar descartado,
    ///   si no `NotFound`. El nuevo nodo se añade al final de sus hijos.
    ///
    /// El id se genera bajo el lock de escritura y se comprueba contra el
    /// índice; una colisión se registra y se regenera hasta
    /// `max_id_attempts` veces antes de devolver `IdCollision`.
    pub fn create(&self,
                  payload: Payload,
                  parent_id: Option<&str>,
                  time_to_live: Duration,
                  engine_tag: &str,
                  disposer: Option<Arc<dyn Disposer>>)
                  -> Result<Arc<ContinuationNode>> {
        let mut index = self.write();

        let parent = match parent_id.filter(|p| !p.is_empty()) {
            Some(pid) => {
                let found = index.nodes.get(pid).filter(|p| !p.is_disposed()).cloned();
                match found {
                    Some(p) => Some(p),
                    None => {
                        debug!("create: padre {} no resoluble", pid);
                        return Err(ContinuationError::not_found(pid));
                    }
                }
            }
            None => None,
        };

        let id = self.fresh_id(&index)?;
        let node = Arc::new(ContinuationNode::new(id.clone(),
                                                  engine_tag.to_string(),
                                                  parent.as_ref(),
                                                  payload,
                                                  time_to_live,
                                                  disposer,
                                                  self.clock.clone()));
        match parent {
            Some(p) => {
                p.add_child(&id);
            }
            None => {
                index.roots.insert(id.clone());
            }
        }
        index.nodes.insert(id, node.clone());
        debug!("create: continuacion {} (motor {}, padre {:?})",
               node.id(),
               engine_tag,
               node.parent_id());
        Ok(node)
    }

    fn fresh_id(&self, index: &ForestIndex) -> Result<String> {
        for attempt in 1..=self.max_id_attempts {
            let id = self.ids.next_id();
            if !index.nodes.contains_key(&id) {
                return Ok(id);
            }
            warn!("colision de id {} (intento {}/{})", id, attempt, self.max_id_attempts);
        }
        Err(ContinuationError::IdCollision(format!("sin id libre tras {} intentos", self.max_id_attempts)))
    }

    /// Resuelve una continuación por id y motor y refresca su último acceso.
    ///
    /// Id desconocido, motor distinto o nodo descartado producen el mismo
    /// `NotFound`.
    ///
    /// El acceso se refresca con el lock de lectura tomado: un barrido que
    /// vuelve a comprobar la expiración bajo el lock de escritura ve el
    /// refresco o el lookup ve el nodo ya eliminado, nunca ambos.
    pub fn lookup(&self, id: &str, engine_tag: &str) -> Result<Arc<ContinuationNode>> {
        self.resolve(id, engine_tag, true)
    }

    fn resolve(&self, id: &str, engine_tag: &str, touch: bool) -> Result<Arc<ContinuationNode>> {
        let index = self.read();
        match index.nodes.get(id) {
            Some(node) if node.engine_tag() == engine_tag && !node.is_disposed() => {
                if touch {
                    node.touch();
                }
                Ok(node.clone())
            }
            Some(node) => {
                debug!("lookup: {} rechazado (motor {}, pedido {}, descartado {})",
                       id,
                       node.engine_tag(),
                       engine_tag,
                       node.is_disposed());
                Err(ContinuationError::not_found(id))
            }
            None => {
                debug!("lookup: {} desconocido", id);
                Err(ContinuationError::not_found(id))
            }
        }
    }

    /// Invalida un nodo y, en cascada, todos sus descendientes.
    ///
    /// Idempotente: un nodo ya descartado (o que no es la instancia
    /// registrada) no produce efecto. Si algún disposer falla la limpieza
    /// igualmente termina y los fallos se devuelven como `DisposerFailure`.
    pub fn invalidate(&self, node: &ContinuationNode) -> Result<()> {
        let outcome = self.invalidate_subtree(node);
        if outcome.faults.is_empty() {
            Ok(())
        } else {
            Err(ContinuationError::DisposerFailure(outcome.faults))
        }
    }

    /// Igual que `lookup` (sin refrescar el acceso) seguido de `invalidate`.
    pub fn invalidate_id(&self, id: &str, engine_tag: &str) -> Result<()> {
        let node = self.resolve(id, engine_tag, false)?;
        self.invalidate(&node)
    }

    pub(crate) fn invalidate_subtree(&self, node: &ContinuationNode) -> Invalidation {
        self.invalidate_where(node, |_| true).unwrap_or_default()
    }

    /// Invalida el subárbol de `node` sólo si sigue expirado en `now_millis`,
    /// comprobándolo bajo el lock de escritura. `None` si el nodo ya no está
    /// registrado o un acceso lo refrescó entre medias.
    pub(crate) fn invalidate_if_expired(&self, node: &ContinuationNode, now_millis: i64) -> Option<Invalidation> {
        self.invalidate_where(node, |n| n.has_expired_at(now_millis))
    }

    fn invalidate_where<P>(&self, node: &ContinuationNode, still_valid: P) -> Option<Invalidation>
        where P: FnOnce(&ContinuationNode) -> bool
    {
        let pending = {
            let mut index = self.write();
            match index.nodes.get(node.id()) {
                Some(registered) if std::ptr::eq(registered.as_ref(), node) => {}
                _ => return None,
            }
            if !still_valid(node) {
                debug!("invalidacion de {} descartada: refrescado entre medias", node.id());
                return None;
            }
            let mut pending = Vec::new();
            Self::unlink_subtree(&mut index, node.id(), &mut pending);
            pending
        };

        let removed = pending.len();
        let faults: Vec<DisposerFault> = pending.into_iter().filter_map(PendingDisposal::run).collect();
        for fault in faults.iter() {
            warn!("disposer fallido para {}: {}", fault.id, fault.reason);
        }
        Some(Invalidation { removed, faults })
    }

    /// Desliga el subárbol de `id` en post-orden (hijos antes que el padre).
    /// Cada nodo se marca descartado, se saca de la lista de hijos de su
    /// padre (o del conjunto de raíces) y del índice.
    fn unlink_subtree(index: &mut ForestIndex, id: &str, pending: &mut Vec<PendingDisposal>) {
        let Some(top) = index.nodes.get(id).cloned() else {
            return;
        };
        let mut stack: Vec<(Arc<ContinuationNode>, bool)> = vec![(top, false)];
        while let Some((node, expanded)) = stack.pop() {
            if !expanded {
                let children: Vec<Arc<ContinuationNode>> = node.children_ids()
                                                                .iter()
                                                                .rev()
                                                                .filter_map(|c| index.nodes.get(c).cloned())
                                                                .collect();
                stack.push((node, true));
                stack.extend(children.into_iter().map(|c| (c, false)));
                continue;
            }
            if let Some(d) = node.mark_disposed() {
                pending.push(d);
            }
            match node.parent_id() {
                Some(pid) => {
                    if let Some(parent) = index.nodes.get(pid) {
                        parent.remove_child(node.id());
                    }
                }
                None => {
                    index.roots.shift_remove(node.id());
                }
            }
            index.nodes.remove(node.id());
        }
    }

    /// Hijos vivos de un nodo, en orden.
    pub fn children_of(&self, node: &ContinuationNode) -> Vec<Arc<ContinuationNode>> {
        let index = self.read();
        node.children_ids().iter().filter_map(|c| index.nodes.get(c).cloned()).collect()
    }

    /// Raíces vivas en orden de creación (copia puntual).
    pub fn roots(&self) -> Vec<Arc<ContinuationNode>> {
        let index = self.read();
        index.roots.iter().filter_map(|r| index.nodes.get(r).cloned()).collect()
    }

    /// Indica si hay una continuación viva con ese id (de cualquier motor).
    pub fn contains(&self, id: &str) -> bool {
        self.read().nodes.contains_key(id)
    }

    /// Número de continuaciones vivas.
    pub fn len(&self) -> usize {
        self.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().nodes.is_empty()
    }

    /// Invalida todas las raíces (y por tanto todo el bosque).
    pub(crate) fn clear(&self) -> Invalidation {
        let mut total = Invalidation::default();
        for root in self.roots() {
            let outcome = self.invalidate_subtree(&root);
            total.removed += outcome.removed;
            total.faults.extend(outcome.faults);
        }
        total
    }

    /// Copia desligada de las raíces actuales y sus subárboles.
    ///
    /// Es una vista de diagnóstico: no es transaccionalmente consistente con
    /// mutaciones concurrentes.
    pub fn forest_snapshot(&self) -> Vec<ContinuationSnapshot> {
        let now = self.clock.now_millis();
        let index = self.read();
        let resolve = |id: &str| index.nodes.get(id).cloned();
        index.roots
             .iter()
             .filter_map(|r| index.nodes.get(r))
             .map(|root| snapshot::clone_subtree(root, &resolve, now))
             .collect()
    }

    /// Copia desligada de un subárbol concreto.
    pub fn snapshot_of(&self, node: &ContinuationNode) -> ContinuationSnapshot {
        let now = self.clock.now_millis();
        let index = self.read();
        let resolve = |id: &str| index.nodes.get(id).cloned();
        snapshot::clone_subtree(node, &resolve, now)
    }

    /// Volcado textual del bosque para depuración.
    pub fn display(&self) -> String {
        let roots = self.forest_snapshot();
        if roots.is_empty() {
            return "(sin continuaciones)\n".to_string();
        }
        roots.iter().map(|r| r.to_string()).collect()
    }
}
