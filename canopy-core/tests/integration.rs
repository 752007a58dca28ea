//! Integration Tests for Reactive System
//!
//! These tests verify that cells, derived values, observers and owners work
//! together correctly.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use canopy_core::reactive::Seed;
use canopy_core::{
    batch, on_cleanup, untracked, Cell, Derived, Error, Observer, Owner, Runtime,
};

/// Test the basic cell, derived, observer pipeline.
#[test]
fn observer_sees_every_derived_change() {
    let runtime = Runtime::new();
    runtime.enter(|| {
        let count = Cell::new(0);
        let doubled = {
            let count = count.clone();
            Derived::new(move || count.get() * 2)
        };

        let log = Rc::new(RefCell::new(Vec::new()));
        let _observer = {
            let log = log.clone();
            Observer::new(move || log.borrow_mut().push(doubled.get()))
        };

        count.set(1);
        count.set(3);
        assert_eq!(*log.borrow(), [0, 2, 6]);
    });
}

/// Test that a write equal to the current value notifies nobody.
#[test]
fn equal_writes_are_ignored() {
    let runtime = Runtime::new();
    runtime.enter(|| {
        let cell = Cell::new(5);
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();
        let reader = cell.clone();
        let _observer = Observer::new(move || {
            reader.get();
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });

        cell.set(5);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    });
}

/// Test that a batch runs each observer once, after the outermost batch.
#[test]
fn batch_coalesces_writes() {
    let runtime = Runtime::new();
    runtime.enter(|| {
        let a = Cell::new(1);
        let b = Cell::new(2);
        let sums = Rc::new(RefCell::new(Vec::new()));

        let _observer = {
            let (a, b, sums) = (a.clone(), b.clone(), sums.clone());
            Observer::new(move || sums.borrow_mut().push(a.get() + b.get()))
        };

        let value = batch(|| {
            a.set(10);
            batch(|| b.set(20));
            // Still inside the outer batch
            assert_eq!(sums.borrow().len(), 1);
            "done"
        });

        assert_eq!(value, "done");
        assert_eq!(*sums.borrow(), [3, 30]);
    });
}

/// Test that observers never see a half-updated diamond.
#[test]
fn diamond_propagation_is_glitch_free() {
    let runtime = Runtime::new();
    runtime.enter(|| {
        let source = Cell::new(1);
        let plus_one = {
            let source = source.clone();
            Derived::new(move || source.get() + 1)
        };
        let times_two = {
            let source = source.clone();
            Derived::new(move || source.get() * 2)
        };

        let seen = Rc::new(RefCell::new(Vec::new()));
        let _observer = {
            let seen = seen.clone();
            Observer::new(move || seen.borrow_mut().push((plus_one.get(), times_two.get())))
        };

        source.set(5);
        source.set(10);
        assert_eq!(*seen.borrow(), [(2, 2), (6, 10), (11, 20)]);
    });
}

/// Test that an observer reading two derived values of one cell runs once
/// per write.
#[test]
fn observer_over_two_derived_values_runs_once_per_write() {
    let runtime = Runtime::new();
    runtime.enter(|| {
        let source = Cell::new(1);
        let left = {
            let source = source.clone();
            Derived::new(move || source.get() + 1)
        };
        let right = {
            let source = source.clone();
            Derived::new(move || source.get() * 10)
        };

        let runs = Arc::new(AtomicI32::new(0));
        let sums = Rc::new(RefCell::new(Vec::new()));
        let _observer = {
            let (runs, sums) = (runs.clone(), sums.clone());
            Observer::new(move || {
                runs.fetch_add(1, Ordering::SeqCst);
                sums.borrow_mut().push(left.get() + right.get());
            })
        };

        source.set(2);
        source.set(3);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(*sums.borrow(), [12, 23, 34]);
    });
}

/// Test that a write made while a derived value recomputes reaches its
/// observers once the read returns.
#[test]
fn writes_inside_a_derived_read_are_flushed() {
    let runtime = Runtime::new();
    runtime.enter(|| {
        let source = Cell::new(1);
        let mirror = Cell::new(0);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let _observer = {
            let (mirror, seen) = (mirror.clone(), seen.clone());
            Observer::new(move || seen.borrow_mut().push(mirror.get()))
        };

        let derived = {
            let (source, mirror) = (source.clone(), mirror.clone());
            Derived::new(move || {
                let value = source.get();
                mirror.set(value * 10);
                value
            })
        };

        assert_eq!(derived.get(), 1);
        assert_eq!(*seen.borrow(), [0, 10]);
    });
}

/// Test that a derived value recomputes only when read after a change,
/// and that unchanged results stop propagation.
#[test]
fn derived_values_are_lazy_and_cut_off_unchanged_results() {
    let runtime = Runtime::new();
    runtime.enter(|| {
        let number = Cell::new(2);
        let computes = Arc::new(AtomicI32::new(0));
        let is_even = {
            let (number, computes) = (number.clone(), computes.clone());
            Derived::new(move || {
                computes.fetch_add(1, Ordering::SeqCst);
                number.get() % 2 == 0
            })
        };
        assert_eq!(computes.load(Ordering::SeqCst), 0);

        let runs = Arc::new(AtomicI32::new(0));
        let _observer = {
            let (is_even, runs) = (is_even.clone(), runs.clone());
            Observer::new(move || {
                is_even.get();
                runs.fetch_add(1, Ordering::SeqCst);
            })
        };
        assert_eq!(computes.load(Ordering::SeqCst), 1);

        // Parity unchanged: the derived value recomputes, the observer does not
        number.set(4);
        assert_eq!(computes.load(Ordering::SeqCst), 2);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        number.set(5);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    });
}

/// Test that dependencies follow the branch taken on the latest run.
#[test]
fn conditional_reads_switch_subscriptions() {
    let runtime = Runtime::new();
    runtime.enter(|| {
        let use_left = Cell::new(true);
        let left = Cell::new("left".to_string());
        let right = Cell::new("right".to_string());

        let seen = Rc::new(RefCell::new(Vec::new()));
        let _observer = {
            let (use_left, left, right, seen) =
                (use_left.clone(), left.clone(), right.clone(), seen.clone());
            Observer::new(move || {
                let value = if use_left.get() { left.get() } else { right.get() };
                seen.borrow_mut().push(value);
            })
        };
        assert_eq!(right.subscriber_count(), 0);

        use_left.set(false);
        assert_eq!(left.subscriber_count(), 0);
        assert_eq!(right.subscriber_count(), 1);

        // No longer a dependency
        left.set("ignored".to_string());
        right.set("RIGHT".to_string());
        assert_eq!(*seen.borrow(), ["left", "right", "RIGHT"]);
    });
}

/// Test that untracked reads do not subscribe.
#[test]
fn untracked_reads_do_not_subscribe() {
    let runtime = Runtime::new();
    runtime.enter(|| {
        let tracked = Cell::new(0);
        let peeked = Cell::new(0);
        let runs = Arc::new(AtomicI32::new(0));

        let _observer = {
            let (tracked, peeked, runs) = (tracked.clone(), peeked.clone(), runs.clone());
            Observer::new(move || {
                tracked.get();
                untracked(|| peeked.get());
                runs.fetch_add(1, Ordering::SeqCst);
            })
        };

        peeked.set(1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        tracked.set(1);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    });
}

/// Test that disposing an owner stops its observers and runs cleanups
/// last registered first.
#[test]
fn owner_disposal_stops_observers() {
    let runtime = Runtime::new();
    runtime.enter(|| {
        let cell = Cell::new(0);
        let runs = Arc::new(AtomicI32::new(0));
        let order = Rc::new(RefCell::new(Vec::new()));

        let owner = Owner::new();
        let observer = owner.run_with(|| {
            let order_clone = order.clone();
            on_cleanup(move || order_clone.borrow_mut().push("owner"));

            let (cell, runs, order) = (cell.clone(), runs.clone(), order.clone());
            Observer::new(move || {
                cell.get();
                runs.fetch_add(1, Ordering::SeqCst);
                let order = order.clone();
                on_cleanup(move || order.borrow_mut().push("observer"));
            })
        });

        owner.dispose();
        assert!(owner.is_disposed());
        assert!(observer.is_disposed());
        assert_eq!(*order.borrow(), ["observer", "owner"]);

        cell.set(1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(cell.subscriber_count(), 0);
    });
}

/// Test that observer cleanups run before every re-run.
#[test]
fn cleanups_run_before_each_rerun() {
    let runtime = Runtime::new();
    runtime.enter(|| {
        let cell = Cell::new(0);
        let cleanups = Arc::new(AtomicI32::new(0));

        let observer = {
            let (cell, cleanups) = (cell.clone(), cleanups.clone());
            Observer::new(move || {
                cell.get();
                let cleanups = cleanups.clone();
                on_cleanup(move || {
                    cleanups.fetch_add(1, Ordering::SeqCst);
                });
            })
        };

        cell.set(1);
        cell.set(2);
        assert_eq!(cleanups.load(Ordering::SeqCst), 2);

        observer.dispose();
        assert_eq!(cleanups.load(Ordering::SeqCst), 3);
    });
}

/// Test that errors go to the nearest boundary instead of the writer.
#[test]
fn error_boundary_catches_observer_failures() {
    let runtime = Runtime::new();
    runtime.enter(|| {
        let fail = Cell::new(false);
        let caught = Rc::new(RefCell::new(Vec::new()));

        let owner = Owner::new();
        {
            let caught = caught.clone();
            owner.on_error(move |err| caught.borrow_mut().push(err.to_string()));
        }
        let _observer = owner.run_with(|| {
            let fail = fail.clone();
            Observer::try_new(move || if fail.get() { Err("boom") } else { Ok(()) })
        });

        assert!(fail.try_set(true).is_ok());
        assert_eq!(*caught.borrow(), ["evaluation failed: boom"]);
        owner.dispose();
    });
}

/// Test that an unhandled failure is returned by the triggering write.
#[test]
fn unhandled_errors_reach_the_writer() {
    let runtime = Runtime::new();
    runtime.enter(|| {
        let fail = Cell::new(false);
        let _observer = {
            let fail = fail.clone();
            Observer::try_new(move || if fail.get() { Err("boom") } else { Ok(()) })
        };

        match fail.try_set(true) {
            Err(Error::Evaluation(err)) => assert_eq!(err.to_string(), "boom"),
            other => panic!("expected an evaluation error, got {other:?}"),
        }
    });
}

/// Test that a derived value reading itself reports a cycle.
#[test]
fn self_dependency_is_a_cycle() {
    let runtime = Runtime::new();
    runtime.enter(|| {
        let slot: Rc<RefCell<Option<Derived<i32>>>> = Rc::new(RefCell::new(None));
        let derived = {
            let slot = slot.clone();
            Derived::new(move || slot.borrow().clone().map_or(0, |d| d.get() + 1))
        };
        *slot.borrow_mut() = Some(derived.clone());

        assert!(matches!(derived.try_get(), Err(Error::Cycle { .. })));
        // Break the Rc cycle between the slot and the closure
        slot.borrow_mut().take();
    });
}

/// Test that two derived values reading each other report the cycle
/// through both.
#[test]
fn mutual_dependency_is_a_cycle() {
    let runtime = Runtime::new();
    runtime.enter(|| {
        let slot: Rc<RefCell<Option<Derived<i32>>>> = Rc::new(RefCell::new(None));
        let second = {
            let slot = slot.clone();
            Derived::new(move || slot.borrow().clone().map_or(0, |first| first.get() + 1))
        };
        let first = {
            let second = second.clone();
            Derived::new(move || second.get() + 1)
        };
        *slot.borrow_mut() = Some(first.clone());

        match first.try_get() {
            Err(Error::Cycle { chain }) => {
                assert_eq!(chain, vec![first.id(), second.id(), first.id()]);
            }
            other => panic!("expected a cycle, got {other:?}"),
        }
        // Break the Rc cycle between the slot and the closure
        slot.borrow_mut().take();
    });
}

/// Test capture on one runtime and seeding on another, as a server and a
/// hydrating client would.
#[test]
fn captured_state_hydrates_a_fresh_runtime() {
    fn build() -> (Cell<i32>, Cell<String>, Derived<String>) {
        let count = Cell::new(0);
        let label = Cell::new("clicks".to_string());
        let summary = {
            let (count, label) = (count.clone(), label.clone());
            Derived::new(move || format!("{} {}", count.get(), label.get()))
        };
        (count, label, summary)
    }

    let server = Runtime::new();
    let ((count, _label, _summary), capture) = server.capture(build);
    server.enter(|| count.set(3));
    let counts = serde_json::to_string(&capture.values::<i32>()).unwrap();
    let labels = serde_json::to_string(&capture.values::<String>()).unwrap();
    assert_eq!(counts, "[[0,3]]");

    let counts: Vec<(usize, i32)> = serde_json::from_str(&counts).unwrap();
    let labels: Vec<(usize, String)> = serde_json::from_str(&labels).unwrap();
    let mut seeds: Vec<(usize, Seed)> = counts
        .into_iter()
        .map(|(i, v)| (i, Seed::new(v)))
        .chain(labels.into_iter().map(|(i, v)| (i, Seed::new(v))))
        .collect();
    seeds.sort_by_key(|(i, _)| *i);

    let client = Runtime::new();
    let (_count, _label, summary) = client.seed(seeds.into_iter().map(|(_, seed)| seed), build);
    assert_eq!(client.enter(|| summary.get()), "3 clicks");
}
