// Archivo: config.rs
// Propósito: configuración del almacén (ttl por defecto, periodo de barrido,
// reintentos de id) con carga desde variables de entorno / `.env`.
use crate::errors::{ContinuationError, Result};
use crate::forest::DEFAULT_MAX_ID_ATTEMPTS;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Variable con el ttl por defecto, en segundos.
pub const ENV_DEFAULT_TTL_SECS: &str = "CONTINUATIONS_DEFAULT_TTL_SECS";
/// Variable con el periodo del barrido, en segundos.
pub const ENV_SWEEP_INTERVAL_SECS: &str = "CONTINUATIONS_SWEEP_INTERVAL_SECS";
/// Variable con los intentos de generación de id.
pub const ENV_MAX_ID_ATTEMPTS: &str = "CONTINUATIONS_MAX_ID_ATTEMPTS";

/// Configuración del almacén.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Ttl usado por `EngineScope` cuando el motor no fija uno propio.
    pub default_ttl: Duration,
    pub sweep_interval: Duration,
    pub max_id_attempts: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig { default_ttl: Duration::from_secs(3600),
                      sweep_interval: Duration::from_secs(30),
                      max_id_attempts: DEFAULT_MAX_ID_ATTEMPTS }
    }
}

impl StoreConfig {
    /// Carga desde el entorno (aplicando `.env` si existe). Las variables
    /// ausentes toman el valor por defecto.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Igual que `from_env` pero leyendo las claves con `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
        where F: Fn(&str) -> Option<String>
    {
        let defaults = StoreConfig::default();
        let default_ttl = match lookup(ENV_DEFAULT_TTL_SECS) {
            Some(raw) => Duration::from_secs(parse_positive(ENV_DEFAULT_TTL_SECS, &raw)?),
            None => defaults.default_ttl,
        };
        let sweep_interval = match lookup(ENV_SWEEP_INTERVAL_SECS) {
            Some(raw) => Duration::from_secs(parse_positive(ENV_SWEEP_INTERVAL_SECS, &raw)?),
            None => defaults.sweep_interval,
        };
        let max_id_attempts = match lookup(ENV_MAX_ID_ATTEMPTS) {
            Some(raw) => {
                let n = parse_positive(ENV_MAX_ID_ATTEMPTS, &raw)?;
                u32::try_from(n).map_err(|_| ContinuationError::Config(format!("{} fuera de rango: {}", ENV_MAX_ID_ATTEMPTS, n)))?
            }
            None => defaults.max_id_attempts,
        };
        Ok(StoreConfig { default_ttl,
                         sweep_interval,
                         max_id_attempts })
    }
}

fn parse_positive(key: &str, raw: &str) -> Result<u64> {
    let n: u64 = raw.trim()
                    .parse()
                    .map_err(|_| ContinuationError::Config(format!("{} no es un entero: {:?}", key, raw)))?;
    if n == 0 {
        return Err(ContinuationError::Config(format!("{} debe ser mayor que 0", key)));
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    move |k: &str| map.get(k).cloned()
  }

  #[test]
  fn missing_keys_use_defaults() {
    let cfg = StoreConfig::from_lookup(lookup_from(&[])).unwrap();
    assert_eq!(cfg, StoreConfig::default());
  }

  #[test]
  fn parses_all_keys() {
    let cfg = StoreConfig::from_lookup(lookup_from(&[(ENV_DEFAULT_TTL_SECS, "60"),
                                                     (ENV_SWEEP_INTERVAL_SECS, " 5 "),
                                                     (ENV_MAX_ID_ATTEMPTS, "7")])).unwrap();
    assert_eq!(cfg.default_ttl, Duration::from_secs(60));
    assert_eq!(cfg.sweep_interval, Duration::from_secs(5));
    assert_eq!(cfg.max_id_attempts, 7);
  }

  #[test]
  fn rejects_zero_and_garbage() {
    let err = StoreConfig::from_lookup(lookup_from(&[(ENV_SWEEP_INTERVAL_SECS, "0")])).unwrap_err();
    assert!(matches!(err, ContinuationError::Config(_)));
    let err = StoreConfig::from_lookup(lookup_from(&[(ENV_DEFAULT_TTL_SECS, "diez")])).unwrap_err();
    assert!(matches!(err, ContinuationError::Config(_)));
    let err = StoreConfig::from_lookup(lookup_from(&[(ENV_MAX_ID_ATTEMPTS, "99999999999")])).unwrap_err();
    assert!(matches!(err, ContinuationError::Config(_)));
  }

  #[test]
  fn serializes_as_json() {
    let v = serde_json::to_value(StoreConfig::default()).unwrap();
    assert_eq!(v["max_id_attempts"], 3);
    assert_eq!(v["sweep_interval"]["secs"], 30);
  }
}
