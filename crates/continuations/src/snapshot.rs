// Archivo: snapshot.rs
// Propósito: copia de sólo lectura de un subárbol de continuaciones para
// monitoreo y depuración. La copia nunca expone el payload vivo ni el
// disposer: del payload sólo queda el nombre de su tipo.
//
// La copia es plana: una lista en pre-orden de descriptores enlazados por
// id. Construirla, mostrarla, serializarla o soltarla no recursa, así que
// una cadena de reanudaciones arbitrariamente larga no agota la pila.
use crate::clock::duration_millis;
use crate::node::ContinuationNode;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Descriptor desligado de una continuación.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotNode {
    pub id: String,
    pub engine_tag: String,
    pub parent_id: Option<String>,
    /// Nombre del tipo del payload en el momento de la copia.
    pub payload_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    pub time_to_live: Duration,
    pub expires_at: DateTime<Utc>,
    /// Estado de expiración evaluado al copiar.
    pub expired: bool,
    pub attributes: BTreeMap<String, JsonValue>,
    /// Hijos incluidos en la copia, en orden.
    pub child_ids: Vec<String>,
    /// Profundidad relativa a la raíz de la copia (la raíz es 0).
    pub depth: usize,
}

/// Copia desligada de una continuación y sus descendientes.
///
/// Los nodos se guardan en pre-orden; el primero es siempre la raíz de la
/// copia. `parent_id` y `child_ids` se resuelven dentro de la propia copia
/// (`parent_of`, `children_of`), así que recorrerla nunca toca estado vivo.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ContinuationSnapshot {
    nodes: Vec<SnapshotNode>,
}

/// Sangría máxima (en niveles) del volcado textual; más abajo se indica la
/// profundidad en número.
const MAX_INDENT: usize = 32;

/// Copia de `node` y su subárbol con una pila explícita. `resolve` traduce
/// ids de hijos a nodos vivos; los hijos que ya no resuelven se omiten.
pub(crate) fn clone_subtree(node: &ContinuationNode,
                            resolve: &dyn Fn(&str) -> Option<Arc<ContinuationNode>>,
                            now_millis: i64)
                            -> ContinuationSnapshot {
    let mut nodes = Vec::new();
    let mut stack: Vec<(Arc<ContinuationNode>, usize)> = Vec::new();
    let (root, children) = describe(node, resolve, now_millis, 0);
    nodes.push(root);
    // al revés para que el primer hijo salga primero de la pila
    stack.extend(children.into_iter().rev().map(|c| (c, 1)));
    while let Some((live, depth)) = stack.pop() {
        let (descriptor, children) = describe(&live, resolve, now_millis, depth);
        nodes.push(descriptor);
        stack.extend(children.into_iter().rev().map(|c| (c, depth + 1)));
    }
    ContinuationSnapshot { nodes }
}

fn describe(node: &ContinuationNode,
            resolve: &dyn Fn(&str) -> Option<Arc<ContinuationNode>>,
            now_millis: i64,
            depth: usize)
            -> (SnapshotNode, Vec<Arc<ContinuationNode>>) {
    let children: Vec<Arc<ContinuationNode>> = node.children_ids()
                                                   .iter()
                                                   .filter_map(|c| resolve(c.as_str()))
                                                   .collect();
    let descriptor = SnapshotNode { id: node.id().to_string(),
                                    engine_tag: node.engine_tag().to_string(),
                                    parent_id: node.parent_id().map(str::to_string),
                                    payload_type: node.payload_type().map(str::to_string),
                                    created_at: node.created_at(),
                                    last_access: node.last_access(),
                                    time_to_live: node.time_to_live(),
                                    expires_at: node.expires_at(),
                                    expired: node.has_expired_at(now_millis),
                                    attributes: node.attributes_copy(),
                                    child_ids: children.iter().map(|c| c.id().to_string()).collect(),
                                    depth };
    (descriptor, children)
}

impl ContinuationSnapshot {
    /// Raíz de la copia.
    pub fn root(&self) -> &SnapshotNode {
        &self.nodes[0]
    }

    /// Todos los nodos en pre-orden.
    pub fn nodes(&self) -> &[SnapshotNode] {
        &self.nodes
    }

    /// Recorrido en pre-orden.
    pub fn iter(&self) -> std::slice::Iter<'_, SnapshotNode> {
        self.nodes.iter()
    }

    /// Número de nodos en la copia, incluida la raíz.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Busca un nodo por id dentro de la copia.
    pub fn find(&self, id: &str) -> Option<&SnapshotNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Acceso mutable a un nodo de la copia. Nunca afecta al nodo vivo.
    pub fn find_mut(&mut self, id: &str) -> Option<&mut SnapshotNode> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    /// Padre de `id` dentro de la copia; `None` para la raíz de la copia.
    pub fn parent_of(&self, id: &str) -> Option<&SnapshotNode> {
        let child = self.find(id)?;
        let parent_id = child.parent_id.as_deref()?;
        self.find(parent_id)
    }

    /// Hijos directos de `id` dentro de la copia, en orden.
    pub fn children_of(&self, id: &str) -> Vec<&SnapshotNode> {
        match self.find(id) {
            Some(node) => node.child_ids.iter().filter_map(|c| self.find(c)).collect(),
            None => Vec::new(),
        }
    }
}

impl<'a> IntoIterator for &'a ContinuationSnapshot {
    type Item = &'a SnapshotNode;
    type IntoIter = std::slice::Iter<'a, SnapshotNode>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.iter()
    }
}

impl fmt::Display for ContinuationSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for node in self.nodes.iter() {
            write!(f, "{}", "  ".repeat(node.depth.min(MAX_INDENT)))?;
            if node.depth > MAX_INDENT {
                write!(f, "+{} ", node.depth)?;
            }
            writeln!(f,
                     "{} [{}] acceso={} ttl={}ms{}",
                     node.id,
                     node.engine_tag,
                     node.last_access.to_rfc3339(),
                     duration_millis(node.time_to_live),
                     if node.expired { " (expirada)" } else { "" })?;
        }
        Ok(())
    }
}
