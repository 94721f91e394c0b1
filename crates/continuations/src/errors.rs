// Archivo: errors.rs
// Propósito: definir los errores del almacén de continuaciones y el alias
// Result<T> usado por las APIs del crate.
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Fallo individual de un disposer durante una invalidación.
///
/// Se conserva el id de la continuación afectada y el mensaje devuelto (o el
/// texto del panic) por el disposer del motor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisposerFault {
    pub id: String,
    pub reason: String,
}

impl fmt::Display for DisposerFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.id, self.reason)
    }
}

/// Errores del almacén de continuaciones.
///
/// - `NotFound`: id desconocido, expirado, de otro motor o ya descartado. El
///   mensaje es idéntico en los cuatro casos.
/// - `IdCollision`: el generador devolvió ids ya registrados en todos los
///   intentos permitidos.
/// - `DisposerFailure`: uno o más disposers fallaron; la limpieza ya terminó.
/// - `Config`: valor de configuración inválido.
/// - `NoRuntime`: se pidió arrancar el barrido fuera de un runtime de tokio.
#[derive(Error, Debug)]
pub enum ContinuationError {
    /// Continuación no resoluble para el llamador.
    #[error("Continuacion no encontrada: {0}")]
    NotFound(String),
    /// Colisión de id no resuelta tras regenerar.
    #[error("Colision de id: {0}")]
    IdCollision(String),
    /// Fallos de disposers, uno por nodo afectado.
    #[error("Fallo en disposer de {} continuacion(es): {}", .0.len(), join_faults(.0))]
    DisposerFailure(Vec<DisposerFault>),
    /// Configuración inválida.
    #[error("Configuracion invalida: {0}")]
    Config(String),
    /// No hay runtime de tokio donde lanzar el barrido.
    #[error("Runtime de tokio no disponible: {0}")]
    NoRuntime(String),
}

fn join_faults(faults: &[DisposerFault]) -> String {
    faults.iter().map(|f| f.to_string()).collect::<Vec<_>>().join("; ")
}

impl ContinuationError {
    /// Construye el `NotFound` uniforme para un id.
    pub(crate) fn not_found(id: &str) -> Self {
        ContinuationError::NotFound(id.to_string())
    }

    /// Indica si el error es de la clase `NotFound`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ContinuationError::NotFound(_))
    }
}

/// Alias de resultado usado por las APIs del crate.
pub type Result<T> = std::result::Result<T, ContinuationError>;
