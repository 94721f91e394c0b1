// Archivo: sweeper.rs
// Propósito: barrido periódico de continuaciones inactivas.
//
// El barrido sólo usa la API pública del bosque (raíces, hijos,
// invalidación). Un nodo se barre si él mismo expiró; un hijo vivo no protege
// a un ancestro expirado y al barrer el ancestro caen todos sus
// descendientes. Bajo un nodo vivo se sigue buscando en los hijos.
use crate::errors::DisposerFault;
use crate::forest::ContinuationForest;
use crate::node::{panic_message, ContinuationNode};
use log::{debug, error, info};
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Resumen de una pasada del barrido.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Nodos cuya expiración se evaluó.
    pub examined: usize,
    /// Nodos expirados encontrados (cada uno arrastra su subárbol).
    pub expired: usize,
    /// Nodos desligados en total, incluidos descendientes no expirados.
    pub removed: usize,
    /// Fallos de disposers recuperados localmente.
    pub faults: Vec<DisposerFault>,
    /// Raíces cuyo barrido abortó con panic.
    pub failed_roots: usize,
}

impl SweepReport {
    fn merge(&mut self, other: SweepReport) {
        self.examined += other.examined;
        self.expired += other.expired;
        self.removed += other.removed;
        self.faults.extend(other.faults);
        self.failed_roots += other.failed_roots;
    }
}

/// Tarea de expiración sobre un bosque compartido.
#[derive(Clone)]
pub struct ExpirySweeper {
    forest: Arc<ContinuationForest>,
    interval: Duration,
}

impl ExpirySweeper {
    /// `interval` es el periodo entre pasadas (mínimo 1 ms); no guarda
    /// relación con el ttl de los nodos.
    pub fn new(forest: Arc<ContinuationForest>, interval: Duration) -> Self {
        Self { forest,
               interval: interval.max(Duration::from_millis(1)) }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Ejecuta una pasada completa y devuelve el resumen. Los fallos de un
    /// subárbol no interrumpen el resto.
    pub fn sweep_once(&self) -> SweepReport {
        let now = self.forest.clock().now_millis();
        let mut report = SweepReport::default();
        for root in self.forest.roots() {
            match panic::catch_unwind(AssertUnwindSafe(|| self.sweep_subtree(&root, now))) {
                Ok(partial) => report.merge(partial),
                Err(p) => {
                    report.failed_roots += 1;
                    error!("barrido de la raiz {} abortado: {}", root.id(), panic_message(p.as_ref()));
                }
            }
        }
        if report.removed > 0 || !report.faults.is_empty() || report.failed_roots > 0 {
            info!("barrido: {} examinadas, {} expiradas, {} eliminadas, {} fallos de disposer",
                  report.examined,
                  report.expired,
                  report.removed,
                  report.faults.len());
        } else {
            debug!("barrido: {} examinadas, nada que eliminar", report.examined);
        }
        report
    }

    fn sweep_subtree(&self, root: &Arc<ContinuationNode>, now_millis: i64) -> SweepReport {
        let mut report = SweepReport::default();
        let mut stack = vec![root.clone()];
        while let Some(node) = stack.pop() {
            if node.is_disposed() {
                continue;
            }
            report.examined += 1;
            // la comprobación sin lock sólo filtra; la decisión se repite
            // bajo el lock de escritura
            let outcome = if node.has_expired_at(now_millis) {
                self.forest.invalidate_if_expired(&node, now_millis)
            } else {
                None
            };
            match outcome {
                Some(outcome) => {
                    report.expired += 1;
                    report.removed += outcome.removed;
                    report.faults.extend(outcome.faults);
                }
                None => stack.extend(self.forest.children_of(&node)),
            }
        }
        report
    }

    /// Lanza el barrido periódico en el runtime de tokio actual.
    ///
    /// # Panics
    ///
    /// Si se llama fuera de un runtime de tokio. `spawn_on` recibe el
    /// runtime explícitamente.
    pub fn spawn(self) -> SweeperHandle {
        self.spawn_on(&Handle::current())
    }

    /// Lanza el barrido periódico en `runtime`.
    ///
    /// La primera pasada ocurre un `interval` después de arrancar. Cada
    /// pasada corre en el pool bloqueante, ya que los disposers del motor
    /// pueden hacer E/S. La tarea termina al llamar `SweeperHandle::shutdown`
    /// o al soltar el handle.
    pub fn spawn_on(self, runtime: &Handle) -> SweeperHandle {
        let (tx, mut rx) = watch::channel(false);
        let task = runtime.spawn(async move {
            info!("barrido de continuaciones iniciado (cada {:?})", self.interval);
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let pass = self.clone();
                        if let Err(e) = tokio::task::spawn_blocking(move || pass.sweep_once()).await {
                            error!("pasada de barrido abortada: {}", e);
                        }
                    }
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("barrido de continuaciones detenido");
        });
        SweeperHandle { shutdown: tx,
                        task: Some(task) }
    }
}

/// Control de la tarea de barrido.
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// Pide la parada y espera a que la tarea termine. Idempotente.
    pub async fn shutdown(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("la tarea de barrido termino con error: {}", e);
            }
        }
    }
}
