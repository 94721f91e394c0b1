// Archivo: ids.rs
// Propósito: generación de identificadores externos de continuación.
use uuid::Uuid;

/// Generador de ids para nuevas continuaciones.
///
/// El bosque comprueba cada id contra el índice y regenera ante colisión,
/// así que una implementación sólo necesita entropía suficiente para que las
/// colisiones sean improbables y los ids no sean adivinables.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// Generador por defecto: UUID v4 (122 bits aleatorios) en hexadecimal sin
/// guiones.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidIdGenerator;

impl IdGenerator for UuidIdGenerator {
    fn next_id(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}

impl<F> IdGenerator for F where F: Fn() -> String + Send + Sync
{
    fn next_id(&self) -> String {
        self()
    }
}
