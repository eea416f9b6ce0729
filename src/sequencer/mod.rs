//! Walks the parsed program line by line and turns events into MIDI.
//!
//! The sequencer owns the program (one event list per pattern row), a loop
//! stack, the named sub-patterns (each a sequencer of its own), and the
//! per-column lists of events that are still sounding. Playback repeatedly
//! fetches the next line, executes each event against the engine, and
//! advances the virtual clock by one quant step whenever a line carried a
//! time-taking event.

pub mod event;
#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::io::{self, BufRead};

use crate::audio::MidiEngine;
use crate::error::ParseError;
use crate::midi::message::FrameTime;
use crate::parser::{Parser, PortMap};
use event::Event;

pub struct Sequencer {
    /// One event list per pattern row.
    program: Vec<Vec<Event>>,
    cursor: usize,
    /// `(remaining, loop line index)`; `None` repeats forever.
    loop_stack: Vec<(Option<u32>, usize)>,
    subpatterns: HashMap<String, Sequencer>,
    /// Events still sounding, per column.
    active: Vec<Vec<Event>>,
    current_time: FrameTime,
    tempo: u32,
    quant: u32,
    parser: Parser,
}

impl Sequencer {
    pub fn new(engine: &dyn MidiEngine) -> Self {
        Sequencer {
            program: Vec::new(),
            cursor: 0,
            loop_stack: Vec::new(),
            subpatterns: HashMap::new(),
            active: Vec::new(),
            current_time: engine.current_frame_time(),
            tempo: 100,
            quant: 4,
            parser: Parser::new(),
        }
    }

    /// Read the whole pattern from a stream.
    ///
    /// `define NAME` opens a nested pattern that is read into a child
    /// sequencer until its `end` line; unparsable lines are logged and
    /// skipped.
    pub fn read_from_stream(
        &mut self,
        input: &mut dyn BufRead,
        engine: &dyn MidiEngine,
    ) -> io::Result<()> {
        let mut buf = String::new();
        loop {
            buf.clear();
            if input.read_line(&mut buf)? == 0 {
                return Ok(());
            }
            let line = buf.trim_end_matches(['\n', '\r']).to_string();

            let events = match self.parse_line(&line, engine) {
                Ok(events) => events,
                Err(e) => {
                    log::warn!("Cannot parse line: {line}");
                    log::debug!("{e}");
                    continue;
                }
            };

            if events.is_empty() {
                continue;
            }

            // A nested pattern definition: read it into a child sequencer.
            if let Some(Event::SubpatternBegin { name }) = events.first() {
                let name = name.clone();
                let mut sub = Sequencer::new(engine);
                sub.read_from_stream(input, engine)?;
                self.subpatterns.insert(name, sub);
                continue;
            }

            // The end of this sequencer's own definition.
            if matches!(events.first(), Some(Event::SubpatternEnd)) {
                return Ok(());
            }

            self.program.push(events);
        }
    }

    fn parse_line(
        &mut self,
        line: &str,
        engine: &dyn MidiEngine,
    ) -> Result<Vec<Event>, ParseError> {
        let Self {
            parser,
            subpatterns,
            ..
        } = self;
        parser.parse_line(line, engine, subpatterns)
    }

    /// The next playable line, with loop delimiters resolved.
    fn get_next_line(&mut self) -> Option<Vec<Event>> {
        loop {
            if self.cursor >= self.program.len() {
                return None;
            }
            match self.program[self.cursor].first() {
                Some(Event::Loop { count }) => {
                    self.loop_stack.push((*count, self.cursor));
                    self.cursor += 1;
                }
                Some(Event::EndLoop) => {
                    if let Some(top) = self.loop_stack.last_mut() {
                        match &mut top.0 {
                            None => self.cursor = top.1,
                            Some(remaining) if *remaining > 1 => {
                                *remaining -= 1;
                                self.cursor = top.1;
                            }
                            Some(_) => {
                                self.loop_stack.pop();
                            }
                        }
                    }
                    self.cursor += 1;
                }
                _ => {
                    let line = self.program[self.cursor].clone();
                    self.cursor += 1;
                    return Some(line);
                }
            }
        }
    }

    /// Queue the MIDI for the next time-taking line.
    ///
    /// Returns false at the end of the program. Lines that carry no
    /// time-taking event (tempo changes, bars, waits) are folded into the
    /// same call.
    pub fn play_next_line(
        &mut self,
        engine: &dyn MidiEngine,
        override_time: Option<FrameTime>,
    ) -> bool {
        if let Some(t) = override_time {
            self.current_time = t;
        }

        loop {
            let Some(line) = self.get_next_line() else {
                return false;
            };

            let mut takes_time = false;
            let mut staged: Vec<(usize, Event)> = Vec::new();

            for event in &line {
                let flow = event.execute(engine, self);
                let column = event.column();

                if flow.silence_previous || flow.needs_stopping {
                    self.ensure_active(column);
                }
                if flow.needs_stopping {
                    staged.push((column, event.clone()));
                }
                if flow.silence_previous {
                    let previous = std::mem::take(&mut self.active[column]);
                    for prev in &previous {
                        prev.stop(engine, self);
                    }
                }
                takes_time |= flow.takes_time;
            }

            // Events started on this line become stoppable only after the
            // whole line ran, so grouped notes do not cut each other off.
            for (column, event) in staged {
                self.active[column].push(event);
            }

            if takes_time {
                self.current_time = self.current_time.wrapping_add(self.quant_frames(engine));
                return true;
            }
        }
    }

    /// Stop every active event on every column, recursing into sub-patterns.
    pub fn silence(&mut self, engine: &dyn MidiEngine, override_time: Option<FrameTime>) {
        if let Some(t) = override_time {
            self.current_time = t;
        }
        for column in 0..self.active.len() {
            let events = std::mem::take(&mut self.active[column]);
            for event in &events {
                event.stop(engine, self);
            }
        }
    }

    /// One quant step in frames at the current tempo.
    ///
    /// The division stays in whole milliseconds at every boundary, exactly
    /// like the rest of the timing arithmetic; tests depend on it.
    pub fn quant_frames(&self, engine: &dyn MidiEngine) -> FrameTime {
        engine.ms_to_frames((60_000 / self.tempo.max(1) / self.quant.max(1)) as u64)
    }

    pub fn current_time(&self) -> FrameTime {
        self.current_time
    }

    pub fn set_current_time(&mut self, time: FrameTime) {
        self.current_time = time;
    }

    pub fn tempo(&self) -> u32 {
        self.tempo
    }

    pub fn set_tempo(&mut self, tempo: u32) {
        self.tempo = tempo;
    }

    pub fn quant(&self) -> u32 {
        self.quant
    }

    pub fn set_quant(&mut self, quant: u32) {
        self.quant = quant;
    }

    pub fn port_map(&self, column: usize) -> PortMap {
        self.parser.port_map(column)
    }

    /// Rewind to the first line.
    pub(crate) fn init_position(&mut self) {
        self.cursor = 0;
    }

    /// Advance the named sub-pattern by one line at this sequencer's time.
    pub(crate) fn play_subpattern_line(
        &mut self,
        engine: &dyn MidiEngine,
        name: &str,
        restart: bool,
    ) {
        let time = self.current_time;
        if let Some(sub) = self.subpatterns.get_mut(name) {
            if restart {
                sub.init_position();
            }
            sub.play_next_line(engine, Some(time));
        }
    }

    /// Silence the named sub-pattern at this sequencer's time.
    pub(crate) fn silence_subpattern(&mut self, engine: &dyn MidiEngine, name: &str) {
        let time = self.current_time;
        if let Some(sub) = self.subpatterns.get_mut(name) {
            sub.silence(engine, Some(time));
        }
    }

    /// Sustain everything that is sounding for `count` quant steps.
    pub(crate) fn sustain_active(&mut self, engine: &dyn MidiEngine, count: usize) {
        let held: Vec<Event> = self.active.iter().flatten().cloned().collect();
        for _ in 0..count {
            for event in &held {
                event.sustain(engine, self);
            }
            self.current_time = self.current_time.wrapping_add(self.quant_frames(engine));
        }
    }

    fn ensure_active(&mut self, column: usize) {
        if self.active.len() <= column {
            self.active.resize(column + 1, Vec::new());
        }
    }
}
