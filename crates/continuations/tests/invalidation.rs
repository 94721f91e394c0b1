use continuations::{ContinuationError, ContinuationForest, DisposeResult, Disposer, Payload};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TTL: Duration = Duration::from_secs(60);

/// Disposer que cuenta invocaciones y registra el orden de los payloads.
#[derive(Default)]
struct Recorder {
  calls: AtomicUsize,
  seen: Mutex<Vec<String>>,
}

impl Disposer for Recorder {
  fn dispose(&self, payload: Payload) -> DisposeResult {
    self.calls.fetch_add(1, Ordering::SeqCst);
    if let Some(name) = payload.downcast_ref::<&str>() {
      self.seen.lock().unwrap().push(name.to_string());
    }
    Ok(())
  }
}

#[test]
fn invalidate_is_idempotent_and_disposes_once() {
  let forest = ContinuationForest::new();
  let rec = Arc::new(Recorder::default());
  let node = forest.create(Payload::new("r"), None, TTL, "js", Some(rec.clone())).unwrap();

  forest.invalidate(&node).unwrap();
  forest.invalidate(&node).unwrap();
  assert_eq!(rec.calls.load(Ordering::SeqCst), 1);
  assert!(node.is_disposed());
  assert!(node.payload().is_none());
  assert!(!forest.contains(node.id()));
}

#[test]
fn invalidating_parent_cascades_children_first() {
  let forest = ContinuationForest::new();
  let rec = Arc::new(Recorder::default());
  let d: Option<Arc<dyn Disposer>> = Some(rec.clone());
  let p = forest.create(Payload::new("p"), None, TTL, "js", d.clone()).unwrap();
  let c1 = forest.create(Payload::new("c1"), Some(p.id()), TTL, "js", d.clone()).unwrap();
  let c2 = forest.create(Payload::new("c2"), Some(p.id()), TTL, "js", d.clone()).unwrap();
  let g = forest.create(Payload::new("g"), Some(c1.id()), TTL, "js", d.clone()).unwrap();

  forest.invalidate(&p).unwrap();

  for n in [&p, &c1, &c2, &g] {
    assert!(forest.lookup(n.id(), "js").unwrap_err().is_not_found());
    assert!(n.is_disposed());
  }
  assert!(forest.is_empty());
  assert!(forest.roots().is_empty());
  assert_eq!(rec.calls.load(Ordering::SeqCst), 4);
  let seen = rec.seen.lock().unwrap().clone();
  assert_eq!(seen, vec!["g", "c1", "c2", "p"]);
}

#[test]
fn invalidating_child_detaches_it_from_parent() {
  let forest = ContinuationForest::new();
  let p = forest.create(Payload::new(()), None, TTL, "js", None).unwrap();
  let a = forest.create(Payload::new(()), Some(p.id()), TTL, "js", None).unwrap();
  let b = forest.create(Payload::new(()), Some(p.id()), TTL, "js", None).unwrap();

  forest.invalidate(&a).unwrap();
  assert_eq!(p.children_ids(), vec![b.id().to_string()]);
  assert!(forest.lookup(p.id(), "js").is_ok());
  assert!(forest.lookup(b.id(), "js").is_ok());
  assert!(a.parent().is_some());

  forest.invalidate(&p).unwrap();
  assert!(b.parent().is_none());
}

#[test]
fn failing_disposer_still_completes_cleanup() {
  let forest = ContinuationForest::new();
  let failing: Arc<dyn Disposer> = Arc::new(|_p: Payload| -> DisposeResult { Err("recurso bloqueado".into()) });
  let rec = Arc::new(Recorder::default());
  let p = forest.create(Payload::new("p"), None, TTL, "js", Some(rec.clone())).unwrap();
  let c = forest.create(Payload::new("c"), Some(p.id()), TTL, "js", Some(failing)).unwrap();

  let err = forest.invalidate(&p).unwrap_err();
  match err {
    ContinuationError::DisposerFailure(faults) => {
      assert_eq!(faults.len(), 1);
      assert_eq!(faults[0].id, c.id());
      assert!(faults[0].reason.contains("recurso bloqueado"));
    }
    other => panic!("unexpected error {:?}", other),
  }
  assert!(c.is_disposed());
  assert!(c.payload().is_none());
  assert!(forest.is_empty());
  // the sibling disposer still ran
  assert_eq!(rec.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn panicking_disposer_is_reported_not_propagated() {
  let forest = ContinuationForest::new();
  let boom: Arc<dyn Disposer> = Arc::new(|_p: Payload| -> DisposeResult { panic!("disposer roto") });
  let n = forest.create(Payload::new(()), None, TTL, "js", Some(boom)).unwrap();

  let err = forest.invalidate(&n).unwrap_err();
  assert!(err.to_string().contains("disposer roto"));
  assert!(n.is_disposed());
  assert!(forest.is_empty());
}

#[test]
fn invalidate_id_respects_engine_tag() {
  let forest = ContinuationForest::new();
  let n = forest.create(Payload::new(()), None, TTL, "js", None).unwrap();
  assert!(forest.invalidate_id(n.id(), "java").unwrap_err().is_not_found());
  assert!(!n.is_disposed());
  forest.invalidate_id(n.id(), "js").unwrap();
  assert!(n.is_disposed());
  assert!(forest.invalidate_id(n.id(), "js").unwrap_err().is_not_found());
}

#[test]
fn concurrent_invalidation_disposes_exactly_once() {
  let forest = Arc::new(ContinuationForest::new());
  let rec = Arc::new(Recorder::default());
  let d: Option<Arc<dyn Disposer>> = Some(rec.clone());
  let root = forest.create(Payload::new("root"), None, TTL, "js", d.clone()).unwrap();
  let mut all = vec![root.clone()];
  for _ in 0..20 {
    let c = forest.create(Payload::new("c"), Some(root.id()), TTL, "js", d.clone()).unwrap();
    all.push(c);
  }

  std::thread::scope(|s| {
    for i in 0..8 {
      let forest = forest.clone();
      let all = all.clone();
      s.spawn(move || {
        // half of the threads hit the root, the rest hit children
        if i % 2 == 0 {
          forest.invalidate(&all[0]).unwrap();
        } else {
          for n in all.iter().skip(1) {
            forest.invalidate(n).unwrap();
          }
        }
      });
    }
  });

  assert!(forest.is_empty());
  assert_eq!(rec.calls.load(Ordering::SeqCst), 21);
  assert!(all.iter().all(|n| n.is_disposed()));
}

#[test]
fn stale_handle_does_not_remove_new_node_with_same_id() {
  let forest = ContinuationForest::new().with_id_generator(Arc::new(|| "fijo".to_string()));
  let old = forest.create(Payload::new(1), None, TTL, "js", None).unwrap();
  forest.invalidate(&old).unwrap();
  let fresh = forest.create(Payload::new(2), None, TTL, "js", None).unwrap();
  assert_eq!(fresh.id(), old.id());

  forest.invalidate(&old).unwrap();
  assert!(!fresh.is_disposed());
  assert!(forest.lookup("fijo", "js").is_ok());
}
