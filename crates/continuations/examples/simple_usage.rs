// Runnable demo: a flow suspended twice, the user going "back" and a sweep
// with a manual clock so it finishes instantly.
use continuations::{ContinuationStore, DisposeResult, Disposer, ManualClock, Payload, StoreConfig};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn main() {
    let clock = Arc::new(ManualClock::starting_now());
    let cfg = StoreConfig { default_ttl: Duration::from_secs(60), ..StoreConfig::default() };
    let store = ContinuationStore::with_clock(cfg, clock.clone());

    let release: Arc<dyn Disposer> = Arc::new(|p: Payload| -> DisposeResult {
        println!("liberando payload de tipo {}", p.type_name());
        Ok(())
    });
    let engine = store.bind("demo-flow").with_disposer(release);

    let form = engine.start(Payload::new(json!({"pantalla": "formulario"}))).expect("start");
    let confirm = engine.resume_from(form.id(), Payload::new(json!({"pantalla": "confirmar"})))
                        .expect("resume");
    // "back" button: the same parent resumed again
    let retry = engine.resume_from(form.id(), Payload::new(json!({"pantalla": "confirmar", "intento": 2})))
                      .expect("resume again");
    confirm.set_attribute("usuario", json!("ana"));

    println!("Bosque tras dos reanudaciones:\n{}", store.forest().display());

    clock.advance(Duration::from_secs(30));
    engine.lookup(retry.id()).expect("lookup");
    clock.advance(Duration::from_secs(40));
    let report = store.sweep_now();
    println!("Barrido: examinadas={} eliminadas={}", report.examined, report.removed);

    let snapshot = store.forest_snapshot();
    println!("{}", serde_json::to_string_pretty(&snapshot).expect("json"));
}
