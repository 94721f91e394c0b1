// Archivo: payload.rs
// Propósito: contrato con el motor de flujo externo. El almacén guarda un
// payload opaco y, opcionalmente, un `Disposer` que el motor usa para liberar
// recursos propios al invalidar la continuación.
use std::any::Any;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Resultado devuelto por un disposer.
pub type DisposeResult = std::result::Result<(), Box<dyn Error + Send + Sync>>;

/// Valor opaco producido por el motor de flujo.
///
/// El almacén nunca inspecciona su contenido; sólo conserva la referencia
/// compartida y el nombre del tipo (útil para diagnósticos). Clonar un
/// `Payload` clona la referencia, no el valor.
#[derive(Clone)]
pub struct Payload {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Payload {
    /// Envuelve un valor del motor.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self { value: Arc::new(value),
               type_name: std::any::type_name::<T>() }
    }

    /// Envuelve un valor ya compartido sin copiarlo.
    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self { value,
               type_name: std::any::type_name::<T>() }
    }

    /// Nombre del tipo concreto envuelto.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Acceso tipado al valor, `None` si el tipo no coincide.
    pub fn downcast_ref<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Devuelve la referencia compartida tipada, `None` si el tipo no coincide.
    pub fn downcast_arc<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.value.clone().downcast::<T>().ok()
    }

    /// Compara identidad de referencia (no igualdad de valor).
    pub fn ptr_eq(a: &Payload, b: &Payload) -> bool {
        Arc::ptr_eq(&a.value, &b.value)
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload").field("type_name", &self.type_name).finish()
    }
}

/// Callback de limpieza provisto por el motor.
///
/// `dispose` se invoca como máximo una vez por continuación, después de que
/// el nodo fue desligado del índice. Recibe el payload por valor: a partir de
/// ese momento el nodo ya no lo referencia.
pub trait Disposer: Send + Sync {
    fn dispose(&self, payload: Payload) -> DisposeResult;
}

impl<F> Disposer for F where F: Fn(Payload) -> DisposeResult + Send + Sync
{
    fn dispose(&self, payload: Payload) -> DisposeResult {
        self(payload)
    }
}
