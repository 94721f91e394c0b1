use continuations::{ContinuationError, ContinuationStore, DisposeResult, Disposer, ManualClock, Payload, StoreConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn config(ttl_secs: u64) -> StoreConfig {
  StoreConfig { default_ttl: Duration::from_secs(ttl_secs),
                sweep_interval: Duration::from_secs(1),
                max_id_attempts: 3 }
}

#[test]
fn engine_scope_start_resume_and_back_button() {
  let store = ContinuationStore::new(config(60));
  let engine = store.bind("js-flow");
  assert_eq!(engine.engine_tag(), "js-flow");
  assert_eq!(engine.time_to_live(), Duration::from_secs(60));

  let page1 = engine.start(Payload::new("formulario")).unwrap();
  let page2 = engine.resume_from(page1.id(), Payload::new("confirmar")).unwrap();
  // the user presses "back" and submits page1 again: a second branch
  let page2b = engine.resume_from(page1.id(), Payload::new("confirmar-v2")).unwrap();

  assert_eq!(page1.child_count(), 2);
  assert_eq!(page2.parent_id(), Some(page1.id()));
  assert_eq!(page2b.parent_id(), Some(page1.id()));
  assert_eq!(*engine.lookup(page2b.id()).unwrap().payload_as::<&str>().unwrap(), "confirmar-v2");

  engine.invalidate(page2.id()).unwrap();
  assert!(engine.lookup(page2.id()).unwrap_err().is_not_found());
  assert!(engine.lookup(page2b.id()).is_ok());
}

#[test]
fn scopes_do_not_see_each_other() {
  let store = ContinuationStore::default();
  let js = store.bind("js");
  let java = store.bind("java");
  let n = js.start(Payload::new(())).unwrap();

  assert!(java.lookup(n.id()).unwrap_err().is_not_found());
  assert!(java.resume_from(n.id(), Payload::new(())).unwrap_err().is_not_found());
  assert!(java.invalidate(n.id()).unwrap_err().is_not_found());
  assert!(js.lookup(n.id()).is_ok());
  assert_eq!(store.forest().len(), 1);
}

#[test]
fn scope_disposer_and_ttl_override() {
  let store = ContinuationStore::default();
  let count = Arc::new(AtomicUsize::new(0));
  let disposer: Arc<dyn Disposer> = {
    let count = count.clone();
    Arc::new(move |_p: Payload| -> DisposeResult {
      count.fetch_add(1, Ordering::SeqCst);
      Ok(())
    })
  };
  let engine = store.bind("js").with_time_to_live(Duration::from_secs(5)).with_disposer(disposer);
  let root = engine.start(Payload::new(())).unwrap();
  engine.resume_from(root.id(), Payload::new(())).unwrap();
  assert_eq!(root.time_to_live(), Duration::from_secs(5));

  engine.invalidate(root.id()).unwrap();
  assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[test]
fn sweep_now_uses_store_clock() {
  let clock = Arc::new(ManualClock::starting_now());
  let store = ContinuationStore::with_clock(config(60), clock.clone());
  let engine = store.bind("js");
  let n = engine.start(Payload::new(())).unwrap();

  clock.advance(Duration::from_secs(61));
  let report = store.sweep_now();
  assert_eq!(report.removed, 1);
  assert!(n.is_disposed());
}

#[test]
fn store_delegates_core_operations() {
  let store = ContinuationStore::default();
  let n = store.create(Payload::new(1u8), None, Duration::from_secs(10), "js", None).unwrap();
  let found = store.lookup(n.id(), "js").unwrap();
  assert!(Arc::ptr_eq(&n, &found));
  assert_eq!(store.forest_snapshot().len(), 1);
  store.invalidate(&found).unwrap();
  assert!(store.forest_snapshot().is_empty());
}

#[tokio::test]
async fn start_and_shutdown_control_sweeper_lifetime() {
  let clock = Arc::new(ManualClock::starting_now());
  let store = ContinuationStore::with_clock(config(60), clock.clone());
  assert!(!store.is_running());
  assert!(store.start().unwrap());
  assert!(!store.start().unwrap());
  assert!(store.is_running());

  let engine = store.bind("js");
  let root = engine.start(Payload::new(())).unwrap();
  engine.resume_from(root.id(), Payload::new(())).unwrap();

  let removed = store.shutdown().await.unwrap();
  assert_eq!(removed, 2);
  assert!(!store.is_running());
  assert!(store.forest().is_empty());
  assert!(root.is_disposed());
}

#[tokio::test]
async fn shutdown_reports_disposer_failures_after_cleanup() {
  let store = ContinuationStore::default();
  let failing: Arc<dyn Disposer> = Arc::new(|_p: Payload| -> DisposeResult { Err("no se pudo liberar".into()) });
  let engine = store.bind("js").with_disposer(failing);
  engine.start(Payload::new(())).unwrap();

  let err = store.shutdown().await.unwrap_err();
  assert!(matches!(err, ContinuationError::DisposerFailure(ref f) if f.len() == 1));
  assert!(store.forest().is_empty());
}

#[test]
fn start_without_runtime_is_an_error() {
  let store = ContinuationStore::default();
  let err = store.start().unwrap_err();
  assert!(matches!(err, ContinuationError::NoRuntime(_)));
  assert!(!store.is_running());
}

#[test]
fn start_on_explicit_runtime_handle() {
  let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
  let store = ContinuationStore::new(StoreConfig { default_ttl: Duration::from_secs(60),
                                                   sweep_interval: Duration::from_millis(10),
                                                   max_id_attempts: 3 });
  assert!(store.start_on(rt.handle()));
  let removed = rt.block_on(async {
    let engine = store.bind("cli");
    let root = engine.start(Payload::new(serde_json::json!({"paso": 1}))).unwrap();
    engine.resume_from(root.id(), Payload::new(serde_json::json!({"paso": 2}))).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    // several passes ran, but nothing was idle long enough
    assert_eq!(store.forest().len(), 2);
    store.shutdown().await.unwrap()
  });
  assert_eq!(removed, 2);
  assert!(!store.is_running());
}
