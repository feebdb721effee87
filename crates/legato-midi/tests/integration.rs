//! Integration tests for legato-midi: MIDI events routed through a graph.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use legato_core::{
    ConnectFlags, ConnectOptions, ControlGraph, ControlQueue, Transform, Value, ValueControl,
    ValueType,
};
use legato_midi::{cc, MidiControl, MidiEvent, MidiEventKind, MidiGraphExt};
use parking_lot::Mutex;
use proptest::prelude::*;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn recording(midi: &MidiControl) -> Arc<Mutex<Vec<MidiEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    midi.set_callback(move |_, _, event| s.lock().push(*event))
        .unwrap();
    seen
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// A hub splits one keyboard to several synths; each sees the event once.
#[test]
fn test_keyboard_split_through_hub() {
    init_tracing();
    let graph = ControlGraph::new();
    let keyboard = graph.midi_control();
    let hub = graph.hub_control();
    let left = graph.midi_control();
    let right = graph.midi_control();
    let left_seen = recording(&left);
    let right_seen = recording(&right);

    keyboard.connect(&hub, ConnectFlags::NONE).unwrap();
    hub.connect(&left, ConnectFlags::NONE).unwrap();
    hub.connect(&right, ConnectFlags::NONE).unwrap();

    keyboard.transmit(MidiEventKind::NoteOn, 0, 64, 90).unwrap();
    assert_eq!(*left_seen.lock(), vec![MidiEvent::note_on(0, 64, 90)]);
    assert_eq!(*right_seen.lock(), vec![MidiEvent::note_on(0, 64, 90)]);
}

/// Two MIDI controls echoing each other terminate after one round.
#[test]
fn test_bidirectional_echo_terminates() {
    init_tracing();
    let graph = ControlGraph::new();
    let a = graph.midi_control();
    let b = graph.midi_control();
    let hits = Arc::new(AtomicUsize::new(0));
    for ctrl in [&a, &b] {
        let hits = hits.clone();
        ctrl.set_callback(move |control, event, _| {
            hits.fetch_add(1, Ordering::SeqCst);
            control.transmit_event_loop(event);
        })
        .unwrap();
    }
    a.connect(&b, ConnectOptions::new().bidirectional()).unwrap();

    a.send(MidiEventKind::Control, 0, cc::SUSTAIN as i32, 127)
        .unwrap();
    // a handles it, b handles the forward, the echo back to a is suppressed.
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

/// A transform maps controller values onto a float parameter.
#[test]
fn test_cc_drives_value_control() {
    init_tracing();
    let graph = ControlGraph::new();
    let knob = graph.midi_control();
    let cutoff = ValueControl::typed(&graph, ValueType::Float, Value::Float(0.0)).unwrap();
    let to_unit = Transform::new(|v| {
        match v.downcast_ref::<MidiEvent>().and_then(|e| e.control_data()) {
            Some(ctrl) => Value::Double(f64::from(ctrl.value) / 127.0),
            None => v.clone(),
        }
    });
    knob.connect(&cutoff, ConnectOptions::new().transform(to_unit))
        .unwrap();

    knob.transmit_event(MidiEvent::control(0, 74, 127));
    assert_eq!(cutoff.value(), Some(Value::Float(1.0)));
}

// ---------------------------------------------------------------------------
// Drivers
// ---------------------------------------------------------------------------

/// Raw bytes from a device decode into events that reach the graph.
#[test]
fn test_bytes_from_driver() {
    init_tracing();
    let graph = ControlGraph::new();
    let input = graph.midi_control();
    let synth = graph.midi_control();
    let seen = recording(&synth);
    input.connect(&synth, ConnectFlags::NONE).unwrap();

    for msg in [[0x91u8, 60, 100], [0x91, 60, 0], [0xB1, 7, 80]] {
        input.transmit_event(MidiEvent::from_bytes(&msg).unwrap());
    }
    let seen = seen.lock();
    assert_eq!(seen.len(), 3);
    assert!(seen[0].is_note_on());
    assert!(seen[1].is_note_off());
    assert_eq!(seen[2], MidiEvent::control(1, cc::VOLUME, 80));
    assert_eq!(seen[2].to_bytes().unwrap(), vec![0xB1, 7, 80]);
}

/// Events sent from a driver thread wait in the UI queue until it runs.
#[test]
fn test_queued_delivery_from_driver_thread() {
    init_tracing();
    let graph = ControlGraph::new();
    let input = graph.midi_control();
    let display = graph.midi_control();
    let seen = recording(&display);
    let queue = ControlQueue::new();
    display.set_queue(Some(queue.clone()));
    input.connect(&display, ConnectFlags::NONE).unwrap();

    std::thread::scope(|s| {
        s.spawn(|| {
            for note in 60..64 {
                input.transmit_event(MidiEvent::note_on(0, note, 100));
            }
        });
    });
    assert!(seen.lock().is_empty());
    assert_eq!(queue.run(), 4);
    let notes: Vec<u8> = seen
        .lock()
        .iter()
        .filter_map(|e| e.note_data().map(|n| n.note))
        .collect();
    assert_eq!(notes, vec![60, 61, 62, 63]);
}

// ---------------------------------------------------------------------------
// Event model properties
// ---------------------------------------------------------------------------

proptest! {
    /// 14-bit controllers always land on an MSB number, and numbers past
    /// the LSB range are rejected.
    #[test]
    fn test_control14_folds_into_msb_range(ctrl in 0i32..200, value in 0i32..16384) {
        match MidiEvent::set(MidiEventKind::Control14, 0, ctrl, value) {
            Ok(event) => {
                prop_assert!(ctrl <= 63);
                let data = event.control_data().copied().unwrap();
                prop_assert!(data.param < 32);
                prop_assert_eq!(data.param as i32, ctrl % 32);
                prop_assert_eq!(event.to_midi_msgs().unwrap().len(), 2);
            }
            Err(_) => prop_assert!(ctrl > 63),
        }
    }
}
