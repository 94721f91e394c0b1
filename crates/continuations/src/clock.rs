// Archivo: clock.rs
// Propósito: fuente de tiempo inyectable. El almacén y el barrido de
// expiración sólo consultan el reloj a través de `Clock`, lo que permite
// escenarios deterministas con `ManualClock`.
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Fuente de "ahora" para el almacén.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Milisegundos desde epoch; usado para los campos atómicos de acceso.
    fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

/// Reloj del sistema (`Utc::now`).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Reloj manual para pruebas: sólo avanza cuando se le pide.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    /// Crea un reloj detenido en `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { millis: AtomicI64::new(start.timestamp_millis()) }
    }

    /// Crea un reloj detenido en el instante actual del sistema.
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    /// Avanza el reloj `by`.
    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(duration_millis(by), Ordering::SeqCst);
    }

    /// Fija el reloj en un instante concreto.
    pub fn set(&self, at: DateTime<Utc>) {
        self.millis.store(at.timestamp_millis(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.now_millis()).unwrap_or_default()
    }

    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Convierte una duración a milisegundos saturando en `i64::MAX`.
pub(crate) fn duration_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}
