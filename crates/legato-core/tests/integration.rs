//! Integration tests for legato-core.
//!
//! These exercise whole propagation paths across several controls: loop
//! breaking, ordering, queues, teardown, the property bridge and concurrent
//! use from several threads.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use legato_core::{
    ConnectFlags, ConnectOptions, Control, ControlGraph, ControlQueue, Direction, Event,
    FuncCallbacks, FuncControl, OriginToken, ParamSpec, Priority, PropertyObject, Result,
    Transform, Transmit, Value, ValueControl, ValueType,
};
use parking_lot::Mutex;
use proptest::prelude::*;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Func control that records every value it receives.
fn recorder(graph: &ControlGraph, log: &Arc<Mutex<Vec<Value>>>) -> FuncControl {
    let f = graph.func_control();
    let log = log.clone();
    f.assign_funcs(FuncCallbacks::new().set(move |_, _, v| log.lock().push(v.clone())))
        .unwrap();
    f
}

/// Func control that counts deliveries and forwards each event on.
fn forwarder(graph: &ControlGraph, hits: &Arc<AtomicUsize>) -> FuncControl {
    let f = graph.func_control();
    let hits = hits.clone();
    f.assign_funcs(FuncCallbacks::new().set(move |ctrl, event, _| {
        hits.fetch_add(1, Ordering::SeqCst);
        ctrl.transmit_event_loop(event);
    }))
    .unwrap();
    f
}

// ---------------------------------------------------------------------------
// 1. Event counters
// ---------------------------------------------------------------------------

/// Active count never underflows and is independent of the handle count.
#[test]
fn test_event_counters_are_independent() {
    init_tracing();
    let graph = ControlGraph::new();
    let hub = graph.hub_control();
    let sink = graph.value_control();
    hub.connect(&sink, ConnectFlags::NONE).unwrap();

    let event = Event::new(Value::Int(1));
    let handle = event.clone();
    assert_eq!(event.ref_count(), 2);

    hub.set_event(&event).unwrap();
    assert_eq!(event.active_count(), 0);
    // Hub and sink each remember the origin.
    assert_eq!(event.ref_count(), 4);

    event.active_unref();
    assert_eq!(event.active_count(), 0);

    drop(handle);
    assert_eq!(graph.do_event_expiration(), 2);
    assert_eq!(event.ref_count(), 1);
}

// ---------------------------------------------------------------------------
// 2. Loop breaking
// ---------------------------------------------------------------------------

/// A bidirectional pair of forwarding controls delivers once and never
/// bounces the value back into the sender.
#[test]
fn test_bidirectional_loop_breaker() {
    init_tracing();
    let graph = ControlGraph::new();
    let src_hits = Arc::new(AtomicUsize::new(0));
    let dest_hits = Arc::new(AtomicUsize::new(0));
    let src = forwarder(&graph, &src_hits);
    let dest = forwarder(&graph, &dest_hits);
    src.connect(&dest, ConnectFlags::BIDIR).unwrap();
    assert_eq!(src.output_count(), 1);
    assert_eq!(src.input_count(), 1);

    let sent = src.transmit_value(Value::Int(7));
    assert_eq!(
        sent,
        Transmit::Sent {
            destinations: 1,
            failed: 0
        }
    );
    assert_eq!(dest_hits.load(Ordering::SeqCst), 1);
    assert_eq!(src_hits.load(Ordering::SeqCst), 0);
}

/// A triangle through a hub terminates: each forwarding node is visited once.
#[test]
fn test_cycle_through_hub_terminates() {
    let graph = ControlGraph::new();
    let hits_a = Arc::new(AtomicUsize::new(0));
    let hits_b = Arc::new(AtomicUsize::new(0));
    let a = forwarder(&graph, &hits_a);
    let b = forwarder(&graph, &hits_b);
    let hub = graph.hub_control();
    a.connect(&hub, ConnectFlags::NONE).unwrap();
    hub.connect(&b, ConnectFlags::NONE).unwrap();
    b.connect(&a, ConnectFlags::NONE).unwrap();

    a.set_value(Value::Int(1)).unwrap();
    assert_eq!(hits_a.load(Ordering::SeqCst), 1);
    assert_eq!(hits_b.load(Ordering::SeqCst), 1);
}

/// Transforms keep the origin, so a transformed echo is still recognized.
#[test]
fn test_transformed_echo_is_suppressed() {
    let graph = ControlGraph::new();
    let hits_a = Arc::new(AtomicUsize::new(0));
    let hits_b = Arc::new(AtomicUsize::new(0));
    let a = forwarder(&graph, &hits_a);
    let b = forwarder(&graph, &hits_b);
    a.connect(
        &b,
        ConnectOptions::new()
            .bidirectional()
            .transform(Transform::scale(2.0))
            .transform_in(Transform::scale(0.5)),
    )
    .unwrap();
    a.transmit_value(Value::Double(1.0));
    assert_eq!(hits_b.load(Ordering::SeqCst), 1);
    assert_eq!(hits_a.load(Ordering::SeqCst), 0);
}

// ---------------------------------------------------------------------------
// 3. Fan-out and ordering
// ---------------------------------------------------------------------------

/// Transmitting from a control with no outputs changes nothing.
#[test]
fn test_fan_out_on_empty_edge_set() {
    let graph = ControlGraph::new();
    let c = graph.control();
    for i in 0..100 {
        assert_eq!(c.transmit_value(Value::Int(i)).destinations(), 0);
    }
    assert_eq!(c.output_count(), 0);
    assert_eq!(c.connections(Direction::Output), Vec::<Control>::new());
}

/// Outputs attached as LOW, HIGH, DEFAULT fire HIGH, DEFAULT, LOW.
#[test]
fn test_priority_firing_order() {
    let graph = ControlGraph::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let src = graph.hub_control();
    let tagged = |tag: &'static str| {
        let f = graph.func_control();
        let log = log.clone();
        f.assign_funcs(FuncCallbacks::new().set(move |_, _, _| log.lock().push(tag)))
            .unwrap();
        f
    };
    let a = tagged("A");
    let b = tagged("B");
    let c = tagged("C");
    src.connect(&a, Priority::Low).unwrap();
    src.connect(&b, Priority::High).unwrap();
    src.connect(&c, Priority::Default).unwrap();

    src.transmit_value(Value::Int(0));
    assert_eq!(*log.lock(), vec!["B", "C", "A"]);
}

proptest! {
    /// Firing order is by descending rank, then insertion order.
    #[test]
    fn prop_priority_order_is_stable(bits in proptest::collection::vec(0u8..4, 1..24)) {
        let graph = ControlGraph::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let src = graph.hub_control();
        let mut sinks = Vec::new();
        for (i, b) in bits.iter().enumerate() {
            let f = graph.func_control();
            let log = log.clone();
            f.assign_funcs(FuncCallbacks::new().set(move |_, _, _| log.lock().push(i)))
                .unwrap();
            src.connect(&f, Priority::from_bits(*b)).unwrap();
            sinks.push(f);
        }
        src.transmit_value(Value::Bool(true));

        let mut expected: Vec<usize> = (0..bits.len()).collect();
        expected.sort_by_key(|&i| std::cmp::Reverse(Priority::from_bits(bits[i]).rank()));
        prop_assert_eq!(log.lock().clone(), expected);
    }
}

/// One failing destination does not stop the rest of the fan-out.
#[test]
fn test_failed_destination_is_counted() {
    let graph = ControlGraph::new();
    let src = graph.hub_control();
    let strict = graph.value_control();
    strict.set_value_type(ValueType::Int).unwrap();
    let loose = graph.value_control();
    src.connect(&strict, ConnectFlags::NONE).unwrap();
    src.connect(&loose, ConnectFlags::NONE).unwrap();

    let sent = src.transmit_value(Value::boxed(vec![1u8, 2, 3]));
    assert_eq!(
        sent,
        Transmit::Sent {
            destinations: 2,
            failed: 1
        }
    );
    assert!(loose.value().is_some());
    assert_eq!(strict.value(), None);
}

// ---------------------------------------------------------------------------
// 4. Queues
// ---------------------------------------------------------------------------

/// Queued events are delivered in insertion order.
#[test]
fn test_queue_fifo() {
    let graph = ControlGraph::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = recorder(&graph, &log);
    let queue = ControlQueue::new();

    let e1 = Event::new(Value::Int(1));
    let e2 = Event::new(Value::Int(2));
    let e3 = Event::new(Value::Int(3));
    queue.add_event(&sink, &e1);
    queue.add_event(&sink, &e2);
    queue.add_event(&sink, &e3);
    assert_eq!(log.lock().len(), 0);

    assert_eq!(queue.run(), 3);
    assert_eq!(*log.lock(), vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    assert!(!e1.is_active() && !e2.is_active() && !e3.is_active());
}

/// Events fanned out to a queued control wait for the consumer thread.
#[test]
fn test_queue_defers_until_pumped_elsewhere() {
    let graph = ControlGraph::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let src = graph.hub_control();
    let ui = recorder(&graph, &log);
    let queue = ControlQueue::new();
    ui.set_queue(Some(queue.clone()));
    src.connect(&ui, ConnectFlags::NONE).unwrap();

    std::thread::scope(|s| {
        s.spawn(|| {
            for i in 0..10 {
                src.transmit_value(Value::Int(i));
            }
        });
    });
    assert_eq!(queue.len(), 10);
    assert!(log.lock().is_empty());

    std::thread::scope(|s| {
        s.spawn(|| queue.run());
    });
    let expected: Vec<Value> = (0..10).map(Value::Int).collect();
    assert_eq!(*log.lock(), expected);
}

// ---------------------------------------------------------------------------
// 5. Teardown
// ---------------------------------------------------------------------------

/// disconnect_all empties both sides and runs each destroy hook once.
#[test]
fn test_disconnect_all_runs_each_destroy_once() {
    let graph = ControlGraph::new();
    let destroyed = Arc::new(AtomicUsize::new(0));
    let counted = |t: Transform| {
        let d = destroyed.clone();
        t.on_destroy(move || {
            d.fetch_add(1, Ordering::SeqCst);
        })
    };

    let center = graph.hub_control();
    let inputs: Vec<_> = (0..2).map(|_| graph.hub_control()).collect();
    let outputs: Vec<_> = (0..3).map(|_| graph.hub_control()).collect();
    for src in &inputs {
        src.connect(&center, ConnectOptions::new().transform(counted(Transform::scale(1.0))))
            .unwrap();
    }
    for dest in &outputs {
        center
            .connect(dest, ConnectOptions::new().transform(counted(Transform::scale(1.0))))
            .unwrap();
    }
    assert_eq!(center.input_count(), 2);
    assert_eq!(center.output_count(), 3);

    assert_eq!(center.disconnect_all(), 5);
    assert_eq!(center.input_count(), 0);
    assert_eq!(center.output_count(), 0);
    assert_eq!(destroyed.load(Ordering::SeqCst), 5);

    assert_eq!(center.disconnect_all(), 0);
    drop(inputs);
    drop(outputs);
    assert_eq!(destroyed.load(Ordering::SeqCst), 5);
}

/// Dropping the last handle of a source removes its edges from peers.
#[test]
fn test_drop_tears_down_connections() {
    let graph = ControlGraph::new();
    let destroyed = Arc::new(AtomicUsize::new(0));
    let d = destroyed.clone();
    let src = graph.hub_control();
    let dest = graph.value_control();
    src.connect(
        &dest,
        ConnectOptions::new().transform(Transform::new(|v| v.clone()).on_destroy(move || {
            d.fetch_add(1, Ordering::SeqCst);
        })),
    )
    .unwrap();
    assert_eq!(dest.input_count(), 1);

    drop(src);
    assert_eq!(dest.input_count(), 0);
    assert_eq!(destroyed.load(Ordering::SeqCst), 1);
}

/// A bidirectional pair does not keep itself alive: once both owners let
/// go, both edges are torn down and both destroy hooks run.
#[test]
fn test_bidirectional_pair_freed_with_owners() {
    let graph = ControlGraph::new();
    let destroyed = Arc::new(AtomicUsize::new(0));
    let counted = |t: Transform| {
        let d = destroyed.clone();
        t.on_destroy(move || {
            d.fetch_add(1, Ordering::SeqCst);
        })
    };
    let a = graph.hub_control();
    let b = graph.hub_control();
    a.connect(
        &b,
        ConnectOptions::new()
            .bidirectional()
            .transform(counted(Transform::scale(2.0)))
            .transform_in(counted(Transform::scale(0.5))),
    )
    .unwrap();
    let weak_a = a.downgrade();

    drop(a);
    assert_eq!(b.input_count(), 0);
    assert_eq!(b.output_count(), 0);
    assert_eq!(destroyed.load(Ordering::SeqCst), 2);

    drop(b);
    assert!(weak_a.upgrade().is_none());
    assert!(graph.controls().is_empty());
    assert_eq!(destroyed.load(Ordering::SeqCst), 2);
}

/// Dropping a destination removes the edge from its source.
#[test]
fn test_drop_destination_detaches_source() {
    let graph = ControlGraph::new();
    let src = graph.hub_control();
    let dest = graph.value_control();
    src.connect(&dest, ConnectFlags::NONE).unwrap();
    assert_eq!(src.output_count(), 1);

    drop(dest);
    assert_eq!(src.output_count(), 0);
    assert_eq!(src.transmit_value(Value::Int(1)).destinations(), 0);
}

// ---------------------------------------------------------------------------
// 6. Connect-time initialization
// ---------------------------------------------------------------------------

/// int 5, scaled by 2.0 into a float control with INIT, reads back 10.0.
#[test]
fn test_init_with_transform() {
    let graph = ControlGraph::new();
    let a = ValueControl::typed(&graph, ValueType::Int, Value::Int(5)).unwrap();
    let b = ValueControl::typed(&graph, ValueType::Float, Value::Float(0.0)).unwrap();
    a.connect(
        &b,
        ConnectOptions::new()
            .init()
            .transform(Transform::scale(2.0)),
    )
    .unwrap();
    assert_eq!(b.get_value_native(), Ok(Value::Float(10.0)));
}

/// A failed INIT leaves no connection behind.
#[test]
fn test_failed_init_installs_nothing() {
    let graph = ControlGraph::new();
    let a = graph.value_control();
    let b = graph.value_control();
    a.set_value_type(ValueType::Int).unwrap();
    assert!(a.connect(&b, ConnectFlags::INIT).is_err());
    assert_eq!(a.output_count() + b.input_count(), 0);
}

/// SPEC connect maps the source limits through the transform.
#[test]
fn test_spec_follows_transform() {
    let graph = ControlGraph::new();
    let src = graph.value_control();
    src.set_spec(ParamSpec::double("gain", 0.0, 2.0, 1.0)).unwrap();
    let dest = graph.value_control();
    src.connect(
        &dest,
        ConnectOptions::new()
            .spec()
            .transform(Transform::scale(-1.0)),
    )
    .unwrap();
    let limits = dest.get_spec().and_then(|s| s.limits()).unwrap();
    approx::assert_relative_eq!(limits.min, -2.0);
    approx::assert_relative_eq!(limits.max, 0.0);
    approx::assert_relative_eq!(limits.default, -1.0);
}

// ---------------------------------------------------------------------------
// 7. Property bridge
// ---------------------------------------------------------------------------

struct Amp {
    graph: ControlGraph,
    gain: Mutex<f64>,
    writes: AtomicUsize,
}

impl Amp {
    fn new(graph: &ControlGraph) -> Arc<Self> {
        Arc::new(Self {
            graph: graph.clone(),
            gain: Mutex::new(0.0),
            writes: AtomicUsize::new(0),
        })
    }

    /// A change made by something outside the graph.
    fn external_set(&self, gain: f64) {
        *self.gain.lock() = gain;
        self.graph
            .property_changed(self, "gain", Value::Double(gain), None);
    }
}

impl PropertyObject for Amp {
    fn find_property(&self, name: &str) -> Option<ParamSpec> {
        (name == "gain").then(|| ParamSpec::double("gain", 0.0, 10.0, 1.0))
    }

    fn get_property(&self, _name: &str) -> Option<Value> {
        Some(Value::Double(*self.gain.lock()))
    }

    fn set_property(&self, name: &str, value: &Value, origin: &OriginToken) -> Result<()> {
        let gain = value.as_f64().unwrap_or(0.0);
        *self.gain.lock() = gain;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.graph
            .property_changed(self, name, Value::Double(gain), Some(origin));
        Ok(())
    }
}

/// An external change is transmitted once; an echo back into the same
/// property is suppressed without a second write.
#[test]
fn test_property_echo_is_suppressed() {
    init_tracing();
    let graph = ControlGraph::new();
    let amp = Amp::new(&graph);
    let prop = graph.prop_control(&amp, "gain").unwrap();

    let log = Arc::new(Mutex::new(Vec::new()));
    let echo = graph.func_control();
    let l = log.clone();
    echo.assign_funcs(FuncCallbacks::new().set(move |ctrl, event, v| {
        l.lock().push(v.clone());
        ctrl.transmit_event_loop(event);
    }))
    .unwrap();
    prop.connect(&echo, ConnectFlags::BIDIR).unwrap();

    amp.external_set(3.0);
    assert_eq!(*log.lock(), vec![Value::Double(3.0)]);
    assert_eq!(amp.writes.load(Ordering::SeqCst), 0);
    assert_eq!(*amp.gain.lock(), 3.0);
}

/// A write arriving from the graph reaches the object once, and the object's
/// own notification does not re-enter the graph.
#[test]
fn test_graph_write_is_not_renotified() {
    let graph = ControlGraph::new();
    let amp = Amp::new(&graph);
    let prop = graph.prop_control(&amp, "gain").unwrap();
    let knob = graph.hub_control();
    let log = Arc::new(Mutex::new(Vec::new()));
    let meter = recorder(&graph, &log);
    knob.connect(&prop, ConnectFlags::NONE).unwrap();
    prop.connect(&meter, ConnectFlags::NONE).unwrap();

    knob.set_value(Value::Double(4.0)).unwrap();
    assert_eq!(amp.writes.load(Ordering::SeqCst), 1);
    assert_eq!(*amp.gain.lock(), 4.0);
    assert_eq!(*log.lock(), vec![Value::Double(4.0)]);
}

/// INIT from a property pulls the current value through the getter.
#[test]
fn test_property_init_reads_getter() {
    let graph = ControlGraph::new();
    let amp = Amp::new(&graph);
    *amp.gain.lock() = 2.5;
    let mirror = graph.value_control();
    graph
        .connect_to_control(&amp, "gain", &mirror, ConnectFlags::INIT)
        .unwrap();
    assert_eq!(mirror.value(), Some(Value::Double(2.5)));
}

// ---------------------------------------------------------------------------
// 8. Concurrency
// ---------------------------------------------------------------------------

/// Transmitting on several threads while others rewire the graph neither
/// deadlocks nor leaves half-installed connections.
#[test]
fn test_concurrent_transmit_and_rewire() {
    let graph = ControlGraph::new();
    let hub = graph.hub_control();
    let received = Arc::new(AtomicUsize::new(0));
    let sinks: Vec<FuncControl> = (0..4)
        .map(|_| {
            let f = graph.func_control();
            let r = received.clone();
            f.assign_funcs(FuncCallbacks::new().set(move |_, _, _| {
                r.fetch_add(1, Ordering::Relaxed);
            }))
            .unwrap();
            f
        })
        .collect();

    std::thread::scope(|s| {
        for t in 0..4 {
            let hub = &hub;
            s.spawn(move || {
                for i in 0..200 {
                    hub.set_value(Value::Int(t * 1000 + i)).unwrap();
                }
            });
        }
        for sink in &sinks {
            let hub = &hub;
            s.spawn(move || {
                for _ in 0..50 {
                    hub.connect(sink, ConnectFlags::BIDIR).unwrap();
                    assert!(hub.disconnect(sink));
                    assert!(sink.disconnect(hub));
                }
            });
        }
        s.spawn(|| {
            for _ in 0..20 {
                graph.do_event_expiration();
            }
        });
    });

    assert_eq!(hub.output_count(), 0);
    assert_eq!(hub.input_count(), 0);
    assert!(sinks.iter().all(|s| s.input_count() + s.output_count() == 0));
    graph.do_event_expiration();
    assert_eq!(hub.active_event_count(), 0);
}
