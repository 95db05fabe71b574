//! End-to-end caller-verification tests
//!
//! Exercises the full protection lifecycle against real dispatch: source
//! ranges are resolved from this file via the default filesystem reader,
//! and caller frames come from the thread dispatch stack. Covers the
//! relay/write scenario, violations, future-operation coverage on both
//! tables, idempotence, pass-through, and concurrency.

use callgate::{protect, GuardError, Interface, Visibility};
use serde_json::{json, Value};
use std::sync::{Arc, Barrier, Mutex};

/// A protected store holding written lines
fn vault() -> (Arc<Interface>, Arc<Mutex<Vec<String>>>) {
    let store = Interface::new("Vault");
    let log = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&log);
    store.define("write", Visibility::Public, move |_iface, inv| {
        let line = inv
            .args
            .first()
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        sink.lock().unwrap().push(line.clone());
        Ok(Value::String(line))
    });

    store.define("concat", Visibility::Public, |_iface, inv| {
        let joined: String = inv
            .args
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("+");
        Ok(Value::String(joined))
    });

    store.define("apply", Visibility::Public, |_iface, inv| {
        match inv.block {
            Some(block) => Ok(block(inv.args)),
            None => Ok(Value::Null),
        }
    });

    store.define_static("flavor", Visibility::Public, |_iface, _inv| {
        Ok(json!("standard"))
    });

    (Arc::new(store), log)
}

/// The sole sanctioned façade over a vault
fn gateway(target: &Arc<Interface>) -> Arc<Interface> {
    let protector = Interface::new("Gateway");

    let vault = Arc::clone(target);
    protector.define("relay", Visibility::Public, move |_iface, inv| {
        // The guarded call sits on a middle line of this body on purpose:
        // any line of a protector operation must authorize
        let result = vault.call("write", inv.args)?;
        Ok(result)
    });

    let vault = Arc::clone(target);
    protector.define("relay_concat", Visibility::Public, move |_iface, inv| {
        vault.call("concat", inv.args)
    });

    let vault = Arc::clone(target);
    protector.define("relay_apply", Visibility::Public, move |_iface, inv| {
        match inv.block {
            Some(block) => vault.call_with_block("apply", inv.args, block),
            None => vault.call("apply", inv.args),
        }
    });

    let vault = Arc::clone(target);
    protector.define("relay_erase", Visibility::Public, move |_iface, inv| {
        vault.call("erase", inv.args)
    });

    let vault = Arc::clone(target);
    protector.define("relay_flavor", Visibility::Public, move |_iface, _inv| {
        vault.call_static("flavor", &[])
    });

    Arc::new(protector)
}

// ─── The relay/write scenario ────────────────────────────────────

#[test]
fn test_direct_write_violates_relayed_write_succeeds() {
    let (store, log) = vault();
    let protector = gateway(&store);
    protect(&store, &protector).unwrap();

    // Direct call from here: no Gateway frame on the stack
    let err = store.call("write", &[json!("x")]).unwrap_err();
    match err {
        GuardError::Violation { caller, protector } => {
            assert_eq!(caller, "<main>");
            assert_eq!(protector, "Gateway");
        }
        other => panic!("expected violation, got {:?}", other),
    }
    assert!(log.lock().unwrap().is_empty());

    // Through the gateway: allowed, result and state intact
    let written = protector.call("relay", &[json!("x")]).unwrap();
    assert_eq!(written, json!("x"));
    assert_eq!(*log.lock().unwrap(), vec!["x".to_string()]);
}

#[test]
fn test_violation_message_names_protector() {
    let (store, _log) = vault();
    let protector = gateway(&store);
    protect(&store, &protector).unwrap();

    let err = store.call("write", &[json!("x")]).unwrap_err();
    assert_eq!(
        err.to_string(),
        "`<main>` is protected by `Gateway` and can only execute when a \
         `Gateway` operation is on the call stack"
    );
}

#[test]
fn test_violation_names_offending_interface_operation() {
    let (store, _log) = vault();
    let protector = gateway(&store);
    protect(&store, &protector).unwrap();

    let intruder = Interface::new("Intruder");
    let target = Arc::clone(&store);
    intruder.define("sneak", Visibility::Public, move |_iface, inv| {
        target.call("write", inv.args)
    });

    let err = intruder.call("sneak", &[json!("x")]).unwrap_err();
    match err {
        GuardError::Violation { caller, .. } => assert_eq!(caller, "Intruder#sneak"),
        other => panic!("expected violation, got {:?}", other),
    }
}

// ─── Pass-through ────────────────────────────────────────────────

#[test]
fn test_positional_arguments_and_return_pass_through() {
    let (store, _log) = vault();
    let protector = gateway(&store);
    protect(&store, &protector).unwrap();

    let result = protector
        .call("relay_concat", &[json!("a"), json!("b"), json!("c")])
        .unwrap();
    assert_eq!(result, json!("a+b+c"));
}

#[test]
fn test_block_pass_through() {
    let (store, _log) = vault();
    let protector = gateway(&store);
    protect(&store, &protector).unwrap();

    let result = protector
        .call_with_block("relay_apply", &[json!(2), json!(3)], &|args| {
            let sum: i64 = args.iter().filter_map(Value::as_i64).sum();
            json!(sum)
        })
        .unwrap();
    assert_eq!(result, json!(5));
}

// ─── Coverage over the interface lifetime ────────────────────────

#[test]
fn test_operation_declared_after_protect_is_guarded() {
    let (store, log) = vault();
    let protector = gateway(&store);
    protect(&store, &protector).unwrap();

    let sink = Arc::clone(&log);
    store.define("erase", Visibility::Public, move |_iface, _inv| {
        sink.lock().unwrap().clear();
        Ok(json!("erased"))
    });

    // Direct call rejected, original body never ran
    protector.call("relay", &[json!("seed")]).unwrap();
    assert!(store.call("erase", &[]).unwrap_err().is_violation());
    assert_eq!(log.lock().unwrap().len(), 1);

    // Through the gateway it works
    assert_eq!(protector.call("relay_erase", &[]).unwrap(), json!("erased"));
    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn test_static_operations_are_guarded() {
    let (store, _log) = vault();
    let protector = gateway(&store);
    protect(&store, &protector).unwrap();

    assert!(store.call_static("flavor", &[]).unwrap_err().is_violation());
    assert_eq!(protector.call("relay_flavor", &[]).unwrap(), json!("standard"));
}

#[test]
fn test_protect_is_idempotent() {
    let (store, _log) = vault();
    let protector = gateway(&store);
    protect(&store, &protector).unwrap();
    protect(&store, &protector).unwrap();

    // Double wrapping would make the wrapper delegate to itself
    assert_eq!(protector.call("relay", &[json!("v")]).unwrap(), json!("v"));
}

#[test]
fn test_multi_line_protector_body_matches_any_line() {
    let (store, _log) = vault();
    let protector = Interface::new("Gateway");

    let target = Arc::clone(&store);
    protector.define("relay", Visibility::Public, move |_iface, inv| {
        let label = String::from("padding so the call below");
        let _ = label;
        let first = target.call("write", inv.args)?;
        let second = target.call("write", inv.args)?;
        assert_eq!(first, second);
        Ok(second)
    });

    protect(&store, &protector).unwrap();
    assert_eq!(protector.call("relay", &[json!("deep")]).unwrap(), json!("deep"));
}

// ─── Concurrency ─────────────────────────────────────────────────

#[test]
fn test_concurrent_protect_wraps_once() {
    let (store, _log) = vault();
    let protector = gateway(&store);

    let threads = 4;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let store = Arc::clone(&store);
            let protector = Arc::clone(&protector);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                protect(&store, &protector)
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    // Single wrap: delegation terminates and direct calls still violate
    assert_eq!(protector.call("relay", &[json!("v")]).unwrap(), json!("v"));
    assert!(store.call("write", &[json!("v")]).unwrap_err().is_violation());
}

#[test]
fn test_parallel_guarded_calls() {
    let (store, log) = vault();
    let protector = gateway(&store);
    protect(&store, &protector).unwrap();

    let threads = 8;
    let per_thread = 25;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let store = Arc::clone(&store);
            let protector = Arc::clone(&protector);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                for i in 0..per_thread {
                    let value = json!(format!("t{}-{}", t, i));
                    let written = protector.call("relay", &[value.clone()]).unwrap();
                    assert_eq!(written, value);
                    assert!(store.call("write", &[value]).unwrap_err().is_violation());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(log.lock().unwrap().len(), threads * per_thread);
}

// ─── Setup failures ──────────────────────────────────────────────

#[test]
fn test_protector_without_public_operations_fails() {
    let (store, _log) = vault();
    let hollow = Interface::new("Hollow");
    hollow.define("hidden", Visibility::Private, |_iface, _inv| Ok(Value::Null));

    let err = protect(&store, &hollow).unwrap_err();
    assert!(matches!(err, GuardError::Configuration(_)));
    assert!(err.to_string().contains("Hollow"));

    // Nothing was wrapped: the vault still dispatches freely
    assert_eq!(store.call("write", &[json!("free")]).unwrap(), json!("free"));
}

#[test]
fn test_unprotected_interface_dispatches_freely() {
    let (store, log) = vault();
    assert_eq!(store.call("write", &[json!("open")]).unwrap(), json!("open"));
    assert_eq!(*log.lock().unwrap(), vec!["open".to_string()]);
}
