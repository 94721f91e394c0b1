//! Crate `continuations`: almacén concurrente de continuaciones
//!
//! Un flujo interactivo del servidor se suspende en un punto arbitrario, se
//! le asigna un id que viaja al cliente y más tarde se reanuda, posiblemente
//! varias veces y desde puntos anteriores (el usuario pulsa "atrás" y vuelve
//! a enviar). Este crate mantiene ese bosque de puntos de suspensión:
//! identidad, vida útil y relaciones padre/hijo. El payload de cada
//! continuación es opaco y pertenece al motor de flujo que lo creó.
//!
//! Diseño resumido:
//! - `ContinuationForest`: índice por id bajo un único `RwLock`; lookups
//!   acotados por engine tag; invalidación en cascada con disposers
//!   ejecutados fuera del lock.
//! - `ExpirySweeper`: barrido periódico (tokio) de nodos inactivos.
//! - `ContinuationSnapshot`: copia desligada para diagnóstico.
//! - `ContinuationStore`: instancia explícita con arranque/parada del
//!   barrido; `EngineScope` fija tag, ttl y disposer de un motor.
//!
//! Ejemplo rápido:
//! ```rust
//! use continuations::{Payload, StoreConfig, ContinuationStore};
//! let store = ContinuationStore::new(StoreConfig::default());
//! let engine = store.bind("js-flow");
//! let root = engine.start(Payload::new("estado inicial")).unwrap();
//! let child = engine.resume_from(root.id(), Payload::new("paso 2")).unwrap();
//! assert_eq!(engine.lookup(child.id()).unwrap().parent_id(), Some(root.id()));
//! ```
pub mod clock;
pub mod config;
pub mod engine;
pub mod errors;
pub mod forest;
pub mod ids;
pub mod node;
pub mod payload;
pub mod snapshot;
pub mod store;
pub mod sweeper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::StoreConfig;
pub use engine::EngineScope;
pub use errors::{ContinuationError, DisposerFault, Result};
pub use forest::ContinuationForest;
pub use ids::{IdGenerator, UuidIdGenerator};
pub use node::ContinuationNode;
pub use payload::{DisposeResult, Disposer, Payload};
pub use snapshot::{ContinuationSnapshot, SnapshotNode};
pub use store::ContinuationStore;
pub use sweeper::{ExpirySweeper, SweepReport, SweeperHandle};
