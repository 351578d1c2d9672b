// SPDX-License-Identifier: AGPL-3.0-or-later
//! Handle registry ownership under concurrent use.

use std::sync::Arc;
use std::thread;

use simonperf::perfmon::fake::FakeNativeSource;
use simonperf::perfmon::QueryHandleRegistry;

#[test]
fn keys_get_independent_queries() {
    let native = Arc::new(FakeNativeSource::new());
    let registry = QueryHandleRegistry::new(native.clone());

    let cpu = registry.add_counter("\\Processor(_Total)\\% Processor Time", "Processor").unwrap();
    registry.add_counter("\\Memory\\Pages/sec", "Memory").unwrap();
    assert_eq!(registry.query_keys(), vec!["Memory".to_string(), "Processor".to_string()]);
    assert_eq!(native.open_queries(), 2);

    assert!(registry.remove_counter(&cpu, "Processor"));
    assert!(!registry.contains_query("Processor"));
    assert!(registry.contains_query("Memory"));
    assert_eq!(native.open_queries(), 1);

    // A handle is only removable under the key it was added with.
    let mem = registry.add_counter("\\Memory\\Pages/sec", "Memory").unwrap();
    assert!(!registry.remove_counter(&mem, "Processor"));
    assert_eq!(registry.counter_count("Memory"), 1);
}

#[test]
fn dropping_registry_closes_remaining_queries() {
    let native = Arc::new(FakeNativeSource::new());
    {
        let registry = QueryHandleRegistry::new(native.clone());
        registry.add_counter("\\Memory\\A", "Memory").unwrap();
        registry.add_counter("\\Memory\\B", "Memory").unwrap();
        registry.add_counter("\\System\\C", "System").unwrap();
    }
    assert_eq!(native.open_queries(), 0);
    assert_eq!(native.live_counters(), 0);
    assert_eq!(native.close_calls(), 2);
}

#[test]
fn concurrent_add_and_remove_leave_nothing_behind() {
    let native = Arc::new(FakeNativeSource::new());
    let registry = Arc::new(QueryHandleRegistry::new(native.clone()));

    let workers: Vec<_> = (0..4)
        .map(|t| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for i in 0..50 {
                    let key = format!("key{}", i % 3);
                    let path = format!("\\Cat(t{})\\C{}", t, i);
                    if let Ok(handle) = registry.add_counter(&path, &key) {
                        registry.update(&key);
                        registry.read(&handle);
                        registry.remove_counter(&handle, &key);
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert!(registry.query_keys().is_empty());
    assert_eq!(native.live_counters(), 0);
    assert_eq!(native.open_queries(), 0);
}
