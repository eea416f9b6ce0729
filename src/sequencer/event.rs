//! Tracker events and their behavior against the engine and sequencer.
//!
//! Every event answers three calls: `execute` performs its primary action
//! (queue MIDI, mutate sequencer state, step into a sub-pattern), `stop`
//! silences it when the column moves on, and `sustain` prolongs it while a
//! pedal or a wait is holding the line.

use crate::audio::MidiEngine;
use crate::midi::message::{FrameTime, MidiMessage, PortId};
use crate::midi::{CONTROLLER, NOTE_OFF, NOTE_ON, PITCH_BEND};
use crate::sequencer::Sequencer;

/// What the sequencer should do after executing an event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ControlFlow {
    /// The line this event belongs to advances virtual time.
    pub takes_time: bool,
    /// Previously active events on this column should be stopped.
    pub silence_previous: bool,
    /// The event must be remembered until something stops it.
    pub needs_stopping: bool,
}

/// A note to be played.
#[derive(Clone, Debug, PartialEq)]
pub struct NoteEvent {
    pub pitch: i32,
    /// Velocity; `None` until the default volume is applied.
    pub volume: Option<u8>,
    /// Playing time in milliseconds; 0 means "until the column moves on".
    pub time: f64,
    /// Delay before the note starts, in milliseconds.
    pub delay: f64,
    /// Delay in fractions of the current quant step.
    pub part_delay: f64,
    /// Playing time in fractions of the current quant step.
    pub part_time: f64,
    pub part_div: f64,
    /// The key signature is not applied to a natural note.
    pub natural: bool,
    /// An endless note never emits its own note-off.
    pub endless: bool,
    pub column: usize,
}

impl NoteEvent {
    pub fn with(pitch: i32, volume: Option<u8>, time: f64, delay: f64, column: usize) -> Self {
        NoteEvent {
            pitch,
            volume,
            time,
            delay,
            part_delay: 0.0,
            part_time: 0.0,
            part_div: 1.0,
            natural: false,
            endless: false,
            column,
        }
    }

    pub fn set(&mut self, pitch: i32, volume: u8, time: f64, delay: f64) {
        self.pitch = pitch;
        self.volume = Some(volume);
        self.time = time;
        self.delay = delay;
    }

    /// A copy carrying only the basic fields, as the `*` template requires.
    pub fn dup(&self) -> Self {
        NoteEvent::with(self.pitch, self.volume, self.time, self.delay, self.column)
    }

    fn execute(&self, engine: &dyn MidiEngine, seq: &mut Sequencer) -> ControlFlow {
        let mut flow = ControlFlow {
            takes_time: true,
            silence_previous: true,
            needs_stopping: true,
        };
        let pm = seq.port_map(self.column);
        let quant = seq.quant_frames(engine);
        let velocity = self.volume.unwrap_or(0);

        // Simultaneous notes on different columns are staggered by one
        // frame per column so receivers cannot batch them as a chord.
        let on_time = seq
            .current_time()
            .wrapping_add(engine.ms_to_frames(self.delay as u64))
            .wrapping_add(part_frames(quant, self.part_delay, self.part_div))
            .wrapping_add(self.column as FrameTime);
        engine.queue(MidiMessage::new(
            &[NOTE_ON, self.pitch as u8, velocity],
            on_time,
            pm.channel,
            pm.port,
        ));

        if !self.endless && (self.time != 0.0 || self.part_time != 0.0) {
            // The note knows its own length; schedule the off right away,
            // two frames ahead of where the next on could land.
            flow.needs_stopping = false;
            let off_time = on_time
                .wrapping_add(engine.ms_to_frames(self.time as u64))
                .wrapping_add(part_frames(quant, self.part_time, self.part_div))
                .wrapping_sub(2);
            engine.queue(MidiMessage::new(
                &[NOTE_OFF, self.pitch as u8, velocity],
                off_time,
                pm.channel,
                pm.port,
            ));
        }

        flow
    }

    fn stop(&self, engine: &dyn MidiEngine, seq: &mut Sequencer) {
        let pm = seq.port_map(self.column);
        let off_time = seq
            .current_time()
            .wrapping_sub(1)
            .wrapping_sub(self.column as FrameTime);
        engine.queue(MidiMessage::new(
            &[NOTE_OFF, self.pitch as u8, 0],
            off_time,
            pm.channel,
            pm.port,
        ));
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CtlKind {
    Control,
    PitchBend,
}

/// A controller message or a ramp of them.
#[derive(Clone, Debug, PartialEq)]
pub struct CtlEvent {
    pub kind: CtlKind,
    /// Controller number; unused for pitch bend.
    pub controller: u8,
    pub value: i32,
    pub init_value: Option<i32>,
    pub step: i32,
    /// Ramp duration in quant steps over `delay_div`.
    pub time: f64,
    /// Start offset in quant steps over `delay_div`.
    pub delay: f64,
    pub delay_div: f64,
    pub column: usize,
}

impl CtlEvent {
    fn midi_msg(
        &self,
        time: FrameTime,
        value: i32,
        channel: u8,
        port: Option<PortId>,
    ) -> MidiMessage {
        match self.kind {
            CtlKind::Control => MidiMessage::new(
                &[CONTROLLER, self.controller, value as u8],
                time,
                channel,
                port,
            ),
            CtlKind::PitchBend => MidiMessage::new(
                &[PITCH_BEND, (value & 0x7F) as u8, ((value >> 7) & 0x7F) as u8],
                time,
                channel,
                port,
            ),
        }
    }

    fn execute(&self, engine: &dyn MidiEngine, seq: &mut Sequencer) -> ControlFlow {
        let flow = ControlFlow {
            takes_time: true,
            silence_previous: true,
            needs_stopping: false,
        };
        let pm = seq.port_map(self.column);
        let quant = seq.quant_frames(engine);
        let base = seq
            .current_time()
            .wrapping_add(part_frames(quant, self.delay, self.delay_div));

        let init = match self.init_value {
            Some(init) if self.time != 0.0 && init != self.value => init,
            _ => {
                engine.queue(self.midi_msg(base, self.value, pm.channel, pm.port));
                return flow;
            }
        };

        // A ramp: walk from the initial value toward the target, spreading
        // the messages evenly over the requested time.
        let span = (init - self.value).abs();
        let time_step = (quant as f64 * self.time / self.delay_div / span as f64) as FrameTime;
        let magnitude = self.step.max(1);
        let step = if self.value > init { magnitude } else { -magnitude };
        let mut i = init;
        while if self.value > init {
            i < self.value
        } else {
            i > self.value
        } {
            let at = base.wrapping_add(time_step.wrapping_mul((init - i).unsigned_abs()));
            engine.queue(self.midi_msg(at, i, pm.channel, pm.port));
            i += step;
        }
        let at = base.wrapping_add(time_step.wrapping_mul(span as u32));
        engine.queue(self.midi_msg(at, self.value, pm.channel, pm.port));

        flow
    }
}

/// Everything a pattern line can carry.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Note(NoteEvent),
    /// A timed rest on a column.
    Skip { column: usize },
    /// Bar separator; a non-zero nominator updates the quant.
    Bar { nom: u32, div: u32 },
    Tempo { bpm: u32 },
    /// Keeps the previous event on the column sounding.
    Pedal { column: usize, event: Box<Event> },
    /// `None` repeats forever.
    Loop { count: Option<u32> },
    EndLoop,
    /// Consumed at read time only.
    SubpatternBegin { name: String },
    SubpatternEnd,
    /// Plays one line of the named sub-pattern.
    SubpatternPlay { name: String, column: usize },
    /// Holds every active event for `count` quant steps.
    Wait { count: usize },
    Ctl(CtlEvent),
}

impl Event {
    /// The column this event occupies, for events that live on one.
    pub fn column(&self) -> usize {
        match self {
            Event::Note(n) => n.column,
            Event::Skip { column }
            | Event::Pedal { column, .. }
            | Event::SubpatternPlay { column, .. } => *column,
            Event::Ctl(c) => c.column,
            _ => 0,
        }
    }

    /// Perform the event's primary action.
    pub fn execute(&self, engine: &dyn MidiEngine, seq: &mut Sequencer) -> ControlFlow {
        match self {
            Event::Note(n) => n.execute(engine, seq),
            Event::Ctl(c) => c.execute(engine, seq),
            Event::Skip { .. } => ControlFlow {
                takes_time: true,
                silence_previous: true,
                needs_stopping: false,
            },
            Event::Bar { nom, .. } => {
                if *nom > 0 {
                    seq.set_quant(*nom);
                }
                ControlFlow::default()
            }
            Event::Tempo { bpm } => {
                seq.set_tempo(*bpm);
                ControlFlow::default()
            }
            Event::Pedal { event, .. } => {
                event.sustain(engine, seq);
                ControlFlow {
                    takes_time: true,
                    silence_previous: false,
                    needs_stopping: false,
                }
            }
            Event::SubpatternPlay { name, .. } => {
                seq.play_subpattern_line(engine, name, true);
                ControlFlow {
                    takes_time: true,
                    silence_previous: true,
                    needs_stopping: true,
                }
            }
            Event::Wait { count } => {
                seq.sustain_active(engine, *count);
                ControlFlow::default()
            }
            _ => ControlFlow::default(),
        }
    }

    /// Silence the event.
    pub fn stop(&self, engine: &dyn MidiEngine, seq: &mut Sequencer) {
        match self {
            Event::Note(n) => n.stop(engine, seq),
            Event::SubpatternPlay { name, .. } => seq.silence_subpattern(engine, name),
            _ => {}
        }
    }

    /// Prolong the event for one more quant step.
    pub fn sustain(&self, engine: &dyn MidiEngine, seq: &mut Sequencer) {
        if let Event::SubpatternPlay { name, .. } = self {
            seq.play_subpattern_line(engine, name, false);
        }
    }
}

/// Fraction of a quant step, in frames; 0 when the divisor is 0.
fn part_frames(quant: FrameTime, part: f64, div: f64) -> FrameTime {
    if div == 0.0 {
        0
    } else {
        (quant as f64 * part / div) as FrameTime
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_frames() {
        assert_eq!(part_frames(7200, 1.0, 2.0), 3600);
        assert_eq!(part_frames(7200, 3.0, 4.0), 5400);
        assert_eq!(part_frames(7200, 1.0, 0.0), 0);
    }

    #[test]
    fn test_ctl_message_encoding() {
        let ctl = CtlEvent {
            kind: CtlKind::Control,
            controller: 7,
            value: 100,
            init_value: None,
            step: 1,
            time: 0.0,
            delay: 0.0,
            delay_div: 1.0,
            column: 0,
        };
        let msg = ctl.midi_msg(0, 100, 3, None);
        assert_eq!(msg.bytes(), &[0xB3, 7, 100]);
    }

    #[test]
    fn test_pitch_bend_splits_value_into_seven_bit_halves() {
        let ctl = CtlEvent {
            kind: CtlKind::PitchBend,
            controller: 0,
            value: 8192,
            init_value: None,
            step: 1,
            time: 0.0,
            delay: 0.0,
            delay_div: 1.0,
            column: 0,
        };
        let msg = ctl.midi_msg(0, 8192, 0, None);
        assert_eq!(msg.bytes(), &[0xE0, 0x00, 0x40]);
    }
}
