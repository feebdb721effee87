//! MIDI controls: func controls that pass [`MidiEvent`] values through
//! untouched.

use std::fmt;
use std::ops::Deref;

use legato_core::{
    Control, ControlFlags, ControlGraph, Dispatch, Event, FuncCallbacks, FuncControl, Transmit,
    Value, ValueType,
};

use crate::error::Result;
use crate::event::{MidiEvent, MidiEventKind};

/// A control that sends and receives [`MidiEvent`]s.
///
/// Values are never converted, and only boxed `MidiEvent`s are accepted.
/// The descriptor is fixed, so [`Control::set_spec`] fails.
#[derive(Clone)]
pub struct MidiControl {
    func: FuncControl,
}

impl MidiControl {
    pub fn new(graph: &ControlGraph) -> Self {
        let func = FuncControl::with_flags(
            graph,
            ControlFlags::SENDRECV | ControlFlags::NO_CONV | ControlFlags::NATIVE,
            Some(ValueType::boxed::<MidiEvent>()),
        );
        func.reject_specs();
        Self { func }
    }

    /// Install the receive handler, replacing every previously assigned
    /// callback. No getter is installed, so the control never reports a
    /// current value.
    pub fn set_callback<F>(&self, callback: F) -> Result<()>
    where
        F: Fn(&Control, &Event, &MidiEvent) + Send + Sync + 'static,
    {
        self.func.assign_funcs(FuncCallbacks::new().set(
            move |control: &Control, event: &Event, value: &Value| match value
                .downcast_ref::<MidiEvent>()
            {
                Some(midi) => callback(control, event, midi),
                None => tracing::warn!(
                    "MIDI control {} received a {} value",
                    control.id(),
                    value.value_type()
                ),
            },
        ))?;
        Ok(())
    }

    /// Build an event and deliver it to this control's handler.
    pub fn send(&self, kind: MidiEventKind, channel: i32, p1: i32, p2: i32) -> Result<Dispatch> {
        self.send_event(MidiEvent::set(kind, channel, p1, p2)?)
    }

    pub fn send_event(&self, event: MidiEvent) -> Result<Dispatch> {
        Ok(self.func.set_value(Value::boxed(event))?)
    }

    /// Build an event and transmit it to this control's outputs.
    pub fn transmit(&self, kind: MidiEventKind, channel: i32, p1: i32, p2: i32) -> Result<Transmit> {
        Ok(self.transmit_event(MidiEvent::set(kind, channel, p1, p2)?))
    }

    pub fn transmit_event(&self, event: MidiEvent) -> Transmit {
        tracing::trace!("MIDI control {} transmitting {:?}", self.func.id(), event.kind);
        self.func.transmit_value(Value::boxed(event))
    }

    pub fn control(&self) -> &Control {
        self.func.control()
    }

    pub fn into_control(self) -> Control {
        self.func.into_control()
    }
}

impl Deref for MidiControl {
    type Target = Control;

    fn deref(&self) -> &Control {
        self.func.control()
    }
}

impl fmt::Debug for MidiControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MidiControl").field(self.func.control()).finish()
    }
}

/// Graph constructors for MIDI controls.
pub trait MidiGraphExt {
    fn midi_control(&self) -> MidiControl;
}

impl MidiGraphExt for ControlGraph {
    fn midi_control(&self) -> MidiControl {
        MidiControl::new(self)
    }
}
