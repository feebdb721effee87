//! Structured MIDI events carried through controls as boxed values.
//!
//! A [`MidiEvent`] keeps the musical meaning of a message (a 14-bit
//! controller, an RPN write) rather than its wire bytes. Multi-message
//! kinds are split into plain control changes only when encoded.

use midi_msg::{Channel, ChannelVoiceMsg, ControlChange, MidiMsg};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Standard controller numbers.
pub mod cc {
    pub const BANK_MSB: u32 = 0;
    pub const MODULATION: u32 = 1;
    pub const DATA_ENTRY_MSB: u32 = 6;
    pub const VOLUME: u32 = 7;
    pub const PAN: u32 = 10;
    pub const EXPRESSION: u32 = 11;
    pub const BANK_LSB: u32 = 32;
    pub const DATA_ENTRY_LSB: u32 = 38;
    pub const SUSTAIN: u32 = 64;
    pub const REVERB: u32 = 91;
    pub const CHORUS: u32 = 93;
    pub const NRPN_LSB: u32 = 98;
    pub const NRPN_MSB: u32 = 99;
    pub const RPN_LSB: u32 = 100;
    pub const RPN_MSB: u32 = 101;
}

/// Registered parameter numbers.
pub mod rpn {
    pub const BEND_RANGE: u32 = 0;
    pub const MASTER_TUNE: u32 = 1;
}

/// Pitch bend center on the wire.
const BEND_CENTER: i32 = 8192;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MidiEventKind {
    None,
    /// A note with a duration.
    Note,
    NoteOn,
    NoteOff,
    KeyPressure,
    PitchBend,
    ProgramChange,
    Control,
    Control14,
    ChanPressure,
    Rpn,
    Nrpn,
    /// Shorthand for an RPN write of the bend range.
    BendRange,
    /// Shorthand for a 14-bit bank select.
    BankSelect,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteData {
    pub note: u8,
    pub velocity: u8,
    pub off_velocity: u8,
    /// Only meaningful for [`MidiEventKind::Note`].
    pub duration: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlData {
    pub param: u32,
    pub value: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MidiData {
    None,
    Note(NoteData),
    Control(ControlData),
}

/// A channel MIDI event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiEvent {
    pub kind: MidiEventKind,
    pub channel: u8,
    pub data: MidiData,
}

impl Default for MidiEvent {
    fn default() -> Self {
        Self {
            kind: MidiEventKind::None,
            channel: 0,
            data: MidiData::None,
        }
    }
}

#[inline]
fn clamp7(v: i32) -> u8 {
    v.clamp(0, 127) as u8
}

impl MidiEvent {
    /// Build an event from a kind and two generic parameters.
    ///
    /// `p1` is the note, controller or parameter number and `p2` the
    /// velocity or value. Single-value kinds (program change, channel
    /// pressure, pitch bend, bend range, bank select) take their value
    /// from `p1`. Convenience kinds are rewritten: bend range becomes an
    /// RPN write and bank select a 14-bit controller. A note-on with zero
    /// velocity becomes a note-off.
    pub fn set(kind: MidiEventKind, channel: i32, p1: i32, p2: i32) -> Result<Self> {
        if !(0..=15).contains(&channel) {
            return Err(Error::InvalidChannel(channel));
        }
        let channel = channel as u8;
        let control = |kind, param: u32, value| Self {
            kind,
            channel,
            data: MidiData::Control(ControlData { param, value }),
        };

        let event = match kind {
            MidiEventKind::None => Self {
                channel,
                ..Self::default()
            },
            MidiEventKind::Note
            | MidiEventKind::NoteOn
            | MidiEventKind::NoteOff
            | MidiEventKind::KeyPressure => {
                let kind = if kind == MidiEventKind::NoteOn && p2 == 0 {
                    MidiEventKind::NoteOff
                } else {
                    kind
                };
                Self {
                    kind,
                    channel,
                    data: MidiData::Note(NoteData {
                        note: clamp7(p1),
                        velocity: clamp7(p2),
                        ..NoteData::default()
                    }),
                }
            }
            MidiEventKind::PitchBend
            | MidiEventKind::ProgramChange
            | MidiEventKind::ChanPressure => control(kind, 0, p1),
            MidiEventKind::Control | MidiEventKind::Rpn | MidiEventKind::Nrpn => {
                control(kind, p1.max(0) as u32, p2)
            }
            MidiEventKind::Control14 => {
                if !(0..=63).contains(&p1) {
                    return Err(Error::Control14Range(p1));
                }
                let param = if p1 > 31 { p1 - 32 } else { p1 };
                control(kind, param as u32, p2)
            }
            MidiEventKind::BendRange => control(MidiEventKind::Rpn, rpn::BEND_RANGE, p1),
            MidiEventKind::BankSelect => control(MidiEventKind::Control14, cc::BANK_MSB, p1),
        };
        Ok(event)
    }

    /// Note-on, or note-off when `velocity` is zero.
    pub fn note_on(channel: u8, note: u8, velocity: u8) -> Self {
        let kind = if velocity == 0 {
            MidiEventKind::NoteOff
        } else {
            MidiEventKind::NoteOn
        };
        Self::note_event(kind, channel, note, velocity)
    }

    pub fn note_off(channel: u8, note: u8, velocity: u8) -> Self {
        Self::note_event(MidiEventKind::NoteOff, channel, note, velocity)
    }

    /// A complete note with its release velocity and duration.
    pub fn note(channel: u8, note: u8, velocity: u8, off_velocity: u8, duration: u32) -> Self {
        Self {
            kind: MidiEventKind::Note,
            channel: channel & 0x0F,
            data: MidiData::Note(NoteData {
                note: note & 0x7F,
                velocity: velocity & 0x7F,
                off_velocity: off_velocity & 0x7F,
                duration,
            }),
        }
    }

    pub fn key_pressure(channel: u8, note: u8, pressure: u8) -> Self {
        Self::note_event(MidiEventKind::KeyPressure, channel, note, pressure)
    }

    pub fn control(channel: u8, controller: u32, value: i32) -> Self {
        Self::control_event(MidiEventKind::Control, channel, controller, value)
    }

    /// 14-bit controller. Controller numbers 32-63 name the LSB half and
    /// are folded onto their MSB number.
    pub fn control14(channel: u8, controller: u32, value: i32) -> Result<Self> {
        Self::set(
            MidiEventKind::Control14,
            i32::from(channel),
            controller.min(i32::MAX as u32) as i32,
            value,
        )
    }

    /// Pitch bend, signed around zero (-8192 to 8191).
    pub fn pitch_bend(channel: u8, value: i32) -> Self {
        Self::control_event(MidiEventKind::PitchBend, channel, 0, value)
    }

    pub fn program_change(channel: u8, program: u8) -> Self {
        Self::control_event(MidiEventKind::ProgramChange, channel, 0, i32::from(program))
    }

    pub fn channel_pressure(channel: u8, pressure: u8) -> Self {
        Self::control_event(MidiEventKind::ChanPressure, channel, 0, i32::from(pressure))
    }

    pub fn bank_select(channel: u8, bank: i32) -> Self {
        Self::control_event(MidiEventKind::Control14, channel, cc::BANK_MSB, bank)
    }

    /// Bend range in cents.
    pub fn bend_range(channel: u8, cents: i32) -> Self {
        Self::control_event(MidiEventKind::Rpn, channel, rpn::BEND_RANGE, cents)
    }

    pub fn rpn(channel: u8, param: u32, value: i32) -> Self {
        Self::control_event(MidiEventKind::Rpn, channel, param, value)
    }

    pub fn nrpn(channel: u8, param: u32, value: i32) -> Self {
        Self::control_event(MidiEventKind::Nrpn, channel, param, value)
    }

    fn note_event(kind: MidiEventKind, channel: u8, note: u8, velocity: u8) -> Self {
        Self {
            kind,
            channel: channel & 0x0F,
            data: MidiData::Note(NoteData {
                note: note & 0x7F,
                velocity: velocity & 0x7F,
                ..NoteData::default()
            }),
        }
    }

    fn control_event(kind: MidiEventKind, channel: u8, param: u32, value: i32) -> Self {
        Self {
            kind,
            channel: channel & 0x0F,
            data: MidiData::Control(ControlData { param, value }),
        }
    }

    #[inline]
    pub fn is_note_on(&self) -> bool {
        self.kind == MidiEventKind::NoteOn
    }

    #[inline]
    pub fn is_note_off(&self) -> bool {
        self.kind == MidiEventKind::NoteOff
    }

    pub fn note_data(&self) -> Option<&NoteData> {
        match &self.data {
            MidiData::Note(note) => Some(note),
            _ => None,
        }
    }

    pub fn control_data(&self) -> Option<&ControlData> {
        match &self.data {
            MidiData::Control(ctrl) => Some(ctrl),
            _ => None,
        }
    }

    /// Encode as a single wire message. Fails for kinds that need several.
    pub fn to_midi_msg(&self) -> Result<MidiMsg> {
        let mut msgs = self.to_midi_msgs()?;
        if msgs.len() != 1 {
            return Err(Error::MultiMessage(self.kind));
        }
        msgs.pop().ok_or(Error::NotWireable(self.kind))
    }

    /// Encode as wire messages. 14-bit controllers become an MSB/LSB pair
    /// of control changes, RPN and NRPN writes a select pair followed by a
    /// data entry pair.
    pub fn to_midi_msgs(&self) -> Result<Vec<MidiMsg>> {
        let channel = Channel::from_u8(self.channel);
        let voice = |msg| MidiMsg::ChannelVoice { channel, msg };
        let cc = |control: u32, value: i32| {
            voice(ChannelVoiceMsg::ControlChange {
                control: ControlChange::CC {
                    control: clamp7(control.min(127) as i32),
                    value: clamp7(value),
                },
            })
        };
        let msb = |v: i32| (v >> 7) & 0x7F;
        let lsb = |v: i32| v & 0x7F;

        let msgs = match (self.kind, &self.data) {
            (MidiEventKind::NoteOn, MidiData::Note(n)) => vec![voice(ChannelVoiceMsg::NoteOn {
                note: n.note,
                velocity: n.velocity,
            })],
            (MidiEventKind::NoteOff, MidiData::Note(n)) => vec![voice(ChannelVoiceMsg::NoteOff {
                note: n.note,
                velocity: n.velocity,
            })],
            (MidiEventKind::KeyPressure, MidiData::Note(n)) => {
                vec![voice(ChannelVoiceMsg::PolyPressure {
                    note: n.note,
                    pressure: n.velocity,
                })]
            }
            (MidiEventKind::PitchBend, MidiData::Control(c)) => {
                let bend = (c.value + BEND_CENTER).clamp(0, 16383) as u16;
                vec![voice(ChannelVoiceMsg::PitchBend { bend })]
            }
            (MidiEventKind::ProgramChange, MidiData::Control(c)) => {
                vec![voice(ChannelVoiceMsg::ProgramChange {
                    program: clamp7(c.value),
                })]
            }
            (MidiEventKind::ChanPressure, MidiData::Control(c)) => {
                vec![voice(ChannelVoiceMsg::ChannelPressure {
                    pressure: clamp7(c.value),
                })]
            }
            (MidiEventKind::Control, MidiData::Control(c)) => vec![cc(c.param, c.value)],
            (MidiEventKind::Control14, MidiData::Control(c)) => {
                let value = c.value.clamp(0, 16383);
                vec![cc(c.param, msb(value)), cc(c.param + 32, lsb(value))]
            }
            (MidiEventKind::Rpn | MidiEventKind::Nrpn, MidiData::Control(c)) => {
                let (sel_msb, sel_lsb) = if self.kind == MidiEventKind::Rpn {
                    (cc::RPN_MSB, cc::RPN_LSB)
                } else {
                    (cc::NRPN_MSB, cc::NRPN_LSB)
                };
                let param = c.param.min(16383) as i32;
                let value = c.value.clamp(0, 16383);
                vec![
                    cc(sel_msb, msb(param)),
                    cc(sel_lsb, lsb(param)),
                    cc(cc::DATA_ENTRY_MSB, msb(value)),
                    cc(cc::DATA_ENTRY_LSB, lsb(value)),
                ]
            }
            (kind, _) => return Err(Error::NotWireable(kind)),
        };
        Ok(msgs)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(self
            .to_midi_msgs()?
            .iter()
            .flat_map(|msg| msg.to_midi())
            .collect())
    }

    /// Decode one 7-bit channel voice message.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (msg, _len) = MidiMsg::from_midi(bytes)?;
        let MidiMsg::ChannelVoice { channel, msg } = msg else {
            return Err(Error::Unsupported("expected a channel voice message".into()));
        };
        let ch = channel as i32;
        match msg {
            ChannelVoiceMsg::NoteOn { note, velocity } => {
                Self::set(MidiEventKind::NoteOn, ch, note.into(), velocity.into())
            }
            ChannelVoiceMsg::NoteOff { note, velocity } => {
                Self::set(MidiEventKind::NoteOff, ch, note.into(), velocity.into())
            }
            ChannelVoiceMsg::PolyPressure { note, pressure } => {
                Self::set(MidiEventKind::KeyPressure, ch, note.into(), pressure.into())
            }
            ChannelVoiceMsg::PitchBend { bend } => Self::set(
                MidiEventKind::PitchBend,
                ch,
                i32::from(bend) - BEND_CENTER,
                0,
            ),
            ChannelVoiceMsg::ProgramChange { program } => {
                Self::set(MidiEventKind::ProgramChange, ch, program.into(), 0)
            }
            ChannelVoiceMsg::ChannelPressure { pressure } => {
                Self::set(MidiEventKind::ChanPressure, ch, pressure.into(), 0)
            }
            ChannelVoiceMsg::ControlChange {
                control: ControlChange::CC { control, value },
            } => Self::set(MidiEventKind::Control, ch, control.into(), value.into()),
            other => Err(Error::Unsupported(format!("{other:?}"))),
        }
    }
}
