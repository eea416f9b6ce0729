//! Line parser for the pattern language.
//!
//! Each call to [`Parser::parse_line`] consumes one text line and returns
//! the events it carries. The parser itself is stateful: default note and
//! volume, accidental signs per scale degree, aliases, transposition and
//! the column-to-port map all persist between lines and color how later
//! lines are read.
//!
//! Directive lines (`tempo`, `port`, `alias`, ...) mostly mutate that state
//! and return nothing; pattern rows return one event per column, with
//! parenthesized groups sharing a column.

use std::collections::HashMap;

use crate::audio::MidiEngine;
use crate::error::ParseError;
use crate::midi::message::PortId;
use crate::sequencer::event::{CtlEvent, CtlKind, Event, NoteEvent};
use crate::sequencer::Sequencer;

/// Characters that end the alias part of a token and start its modifiers.
const MODIFIER_CHARS: &str = "!%@/\\#.";

/// Ties a column to an output port and a MIDI channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PortMap {
    pub channel: u8,
    /// `None` routes to the engine's default port.
    pub port: Option<PortId>,
}

pub struct Parser {
    /// The most recent event per column, for `^`, `|` and pedals.
    last_note: Vec<Option<Event>>,
    default_note: NoteEvent,
    volume: u8,
    /// Sharp/flat/natural override per scale degree.
    signs: [i32; 12],
    aliases: HashMap<String, String>,
    column_map: Vec<PortMap>,
    transpose: i32,
}

impl Parser {
    pub fn new() -> Self {
        Parser {
            last_note: Vec::new(),
            default_note: NoteEvent::with(0, Some(0), 0.0, 0.0, 0),
            volume: 64,
            signs: [0; 12],
            aliases: HashMap::new(),
            column_map: Vec::new(),
            transpose: 0,
        }
    }

    /// The port and channel a column is routed to.
    pub fn port_map(&self, column: usize) -> PortMap {
        self.column_map.get(column).copied().unwrap_or_default()
    }

    /// Parse one line into its events.
    ///
    /// `subpatterns` is the owning sequencer's table of named patterns,
    /// consulted so pattern rows can invoke them by name.
    pub fn parse_line(
        &mut self,
        line: &str,
        engine: &dyn MidiEngine,
        subpatterns: &HashMap<String, Sequencer>,
    ) -> Result<Vec<Event>, ParseError> {
        if line.is_empty() {
            return Ok(Vec::new());
        }
        if line.starts_with('-') {
            return self.parse_bar(line);
        }

        let toks = tokens(line);
        let Some(&(_, first)) = toks.first() else {
            return Ok(Vec::new());
        };

        match first {
            "define" => Ok(match toks.get(1) {
                Some(&(_, name)) => vec![Event::SubpatternBegin { name: name.into() }],
                None => Vec::new(),
            }),
            "end" => Ok(vec![Event::SubpatternEnd]),
            "default" => {
                let &(off, text) = toks
                    .get(1)
                    .ok_or_else(|| ParseError::new(line.len(), "default: missing note"))?;
                let note = parse_note(text).map_err(|e| e.offset_by(off))?;
                let volume = note.volume.unwrap_or(self.volume);
                self.default_note
                    .set(note.pitch, volume, note.time, note.delay);
                Ok(Vec::new())
            }
            "volume" => {
                if let Some(v) = toks.get(1).and_then(|(_, t)| t.parse().ok()) {
                    self.volume = v;
                }
                Ok(Vec::new())
            }
            "tempo" => Ok(match toks.get(1).and_then(|(_, t)| t.parse().ok()) {
                Some(bpm) => vec![Event::Tempo { bpm }],
                None => Vec::new(),
            }),
            "transpose" => {
                if let Some(t) = toks.get(1).and_then(|(_, t)| t.parse().ok()) {
                    self.transpose = t;
                }
                Ok(Vec::new())
            }
            "wait" => {
                let &(off, text) = toks
                    .get(1)
                    .ok_or_else(|| ParseError::new(line.len(), "wait: missing count"))?;
                let count = text
                    .parse()
                    .map_err(|_| ParseError::new(off, "wait: bad count"))?;
                Ok(vec![Event::Wait { count }])
            }
            "port" => self.parse_port(&toks, line, engine),
            "alias" => {
                let &(_, name) = toks
                    .get(1)
                    .ok_or_else(|| ParseError::new(line.len(), "alias: missing name"))?;
                match toks.get(2) {
                    Some(&(_, replacement)) => {
                        self.aliases.insert(name.into(), replacement.into());
                    }
                    None => {
                        self.aliases.remove(name);
                    }
                }
                Ok(Vec::new())
            }
            "loop" => Ok(vec![Event::Loop {
                count: toks.get(1).and_then(|(_, t)| t.parse().ok()),
            }]),
            "endloop" => Ok(vec![Event::EndLoop]),
            _ => self.parse_row(&toks, subpatterns),
        }
    }

    /// A bar line: optional `N/D` signature, then accidental signs.
    fn parse_bar(&mut self, line: &str) -> Result<Vec<Event>, ParseError> {
        let rest = line.trim_start_matches('-');
        let base = line.len() - rest.len();

        let mut scan = Scan::new(rest);
        let signature = read_signature(&mut scan);

        let mut events = Vec::new();
        let sign_text = match signature {
            Some((nom, div)) => {
                events.push(Event::Bar { nom, div });
                scan.rest()
            }
            None => {
                events.push(Event::Bar { nom: 0, div: 0 });
                rest
            }
        };
        let sign_base = base + rest.len() - sign_text.len();

        for (off, tok) in tokens(sign_text) {
            let modifier = match tok.as_bytes()[0] {
                b'#' => 1,
                b'b' | b'&' => -1,
                b'n' => 0,
                _ => continue,
            };
            let note =
                parse_note(&tok[1..]).map_err(|e| e.offset_by(sign_base + off + 1))?;
            self.signs[note.pitch.rem_euclid(12) as usize] = modifier;
        }

        Ok(events)
    }

    /// `port A [B] NAME [CH] [DEST]`: register NAME and route columns
    /// A..=B (1-based) to it.
    fn parse_port(
        &mut self,
        toks: &[(usize, &str)],
        line: &str,
        engine: &dyn MidiEngine,
    ) -> Result<Vec<Event>, ParseError> {
        let mut i = 1;
        let &(off_a, text_a) = toks
            .get(i)
            .ok_or_else(|| ParseError::new(line.len(), "port: missing column"))?;
        let column_a: usize = text_a
            .parse()
            .map_err(|_| ParseError::new(off_a, "port: bad column number"))?;
        i += 1;

        let column_b = match toks.get(i).and_then(|(_, t)| t.parse().ok()) {
            Some(b) => {
                i += 1;
                b
            }
            None => column_a,
        };

        let &(off_name, name) = toks
            .get(i)
            .ok_or_else(|| ParseError::new(line.len(), "port: missing port name"))?;
        i += 1;

        let channel = match toks.get(i).and_then(|(_, t)| t.parse().ok()) {
            Some(ch) => {
                i += 1;
                ch
            }
            None => 0,
        };

        if column_a == 0 {
            return Err(ParseError::new(off_a, "port: columns are numbered from 1"));
        }

        let port = engine
            .register_output_port(name)
            .map_err(|e| ParseError::new(off_name, format!("port: {e}")))?;

        if self.column_map.len() < column_b {
            self.column_map.resize(column_b, PortMap::default());
        }
        for column in column_a..=column_b {
            self.column_map[column - 1] = PortMap {
                channel,
                port: Some(port),
            };
        }

        // Whatever trails the channel is a destination to connect to.
        if let Some(&(off, _)) = toks.get(i) {
            let destination = line[off..].trim();
            if !destination.is_empty() && engine.connect_port(port, destination).is_err() {
                log::warn!("cannot connect to client {destination}");
            }
        }

        Ok(Vec::new())
    }

    /// A pattern row: one event per column, groups share a column.
    fn parse_row(
        &mut self,
        toks: &[(usize, &str)],
        subpatterns: &HashMap<String, Sequencer>,
    ) -> Result<Vec<Event>, ParseError> {
        let mut events = Vec::new();
        let mut grouped = false;
        let mut column = 0usize;

        for &(off, tok) in toks {
            let mut chunk = tok;

            // The rest of the line is a comment.
            if chunk.starts_with(';') {
                return Ok(events);
            }

            if let Some(stripped) = chunk.strip_prefix('(') {
                grouped = true;
                chunk = stripped;
            } else if let Some(stripped) = chunk.strip_suffix(')') {
                grouped = false;
                chunk = stripped;
            }

            // Expand an alias occupying the token up to its first modifier.
            let terminal = chunk
                .find(|c| MODIFIER_CHARS.contains(c))
                .unwrap_or(chunk.len());
            let alias_part = chunk[..terminal].to_string();
            let expanded;
            if let Some(replacement) = self.aliases.get(alias_part.as_str()) {
                expanded = format!("{replacement}{}", &chunk[terminal..]);
                chunk = &expanded;
            }

            self.ensure_column(column);

            if subpatterns.contains_key(alias_part.as_str()) {
                let event = Event::SubpatternPlay {
                    name: alias_part,
                    column,
                };
                self.last_note[column] = Some(event.clone());
                events.push(event);
            } else if chunk == "." {
                events.push(Event::Skip { column });
            } else if chunk == "|" {
                let previous = self.last_note[column]
                    .clone()
                    .ok_or_else(|| ParseError::new(off, "pedal with no previous note"))?;
                events.push(Event::Pedal {
                    column,
                    event: Box::new(previous),
                });
            } else if chunk == "*" {
                events.push(Event::Note(self.default_note.dup()));
            } else if chunk == "^" {
                let previous = self.last_note[column]
                    .clone()
                    .ok_or_else(|| ParseError::new(off, "no previous note to repeat"))?;
                events.push(previous);
            } else if chunk.starts_with('$') {
                let ctl = parse_ctl(chunk, column).map_err(|e| e.offset_by(off))?;
                events.push(Event::Ctl(ctl));
            } else {
                let mut note = parse_note(chunk).map_err(|e| e.offset_by(off))?;
                if note.volume.is_none() {
                    note.volume = Some(self.volume);
                }
                if !note.natural {
                    note.pitch += self.signs[note.pitch.rem_euclid(12) as usize];
                }
                note.pitch += self.transpose;
                note.column = column;
                let event = Event::Note(note);
                self.last_note[column] = Some(event.clone());
                events.push(event);
            }

            if !grouped {
                column += 1;
            }
        }

        Ok(events)
    }

    fn ensure_column(&mut self, column: usize) {
        if self.last_note.len() <= column {
            self.last_note.resize(column + 1, None);
        }
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a note token: letter, accidental, octave, then modifiers.
pub(crate) fn parse_note(text: &str) -> Result<NoteEvent, ParseError> {
    let mut scan = Scan::new(text);

    let pitch_class = match scan.bump().map(|b| b.to_ascii_uppercase()) {
        Some(b'C') => 0,
        Some(b'D') => 2,
        Some(b'E') => 4,
        Some(b'F') => 5,
        Some(b'G') => 7,
        Some(b'A') => 9,
        Some(b'B') => 11,
        _ => return Err(ParseError::new(0, "not a note")),
    };

    let mut note = NoteEvent::with(pitch_class, None, 0.0, 0.0, 0);
    if scan.eat(b'#') {
        note.pitch += 1;
    }
    if scan.eat(b'b') || scan.eat(b'&') {
        note.pitch -= 1;
    }
    if scan.eat(b'n') {
        note.natural = true;
    }

    let octave = scan.uint().unwrap_or(4);
    note.pitch += (octave as i32 + 1) * 12;

    while let Some(c) = scan.bump() {
        match c {
            b'@' => {
                note.time = scan
                    .float()
                    .ok_or_else(|| ParseError::new(scan.pos(), "bad playing time"))?;
            }
            b'%' => {
                note.delay = scan
                    .float()
                    .ok_or_else(|| ParseError::new(scan.pos(), "bad delay"))?;
            }
            b'+' => {
                note.part_delay = scan
                    .float()
                    .ok_or_else(|| ParseError::new(scan.pos(), "bad part delay"))?;
            }
            b'/' => {
                note.part_div = scan
                    .float()
                    .ok_or_else(|| ParseError::new(scan.pos(), "bad part divisor"))?;
            }
            b':' => {
                note.part_time = scan
                    .float()
                    .ok_or_else(|| ParseError::new(scan.pos(), "bad part time"))?;
            }
            b'!' => {
                let v = scan
                    .uint()
                    .ok_or_else(|| ParseError::new(scan.pos(), "bad volume"))?;
                note.volume = Some(v as u8);
            }
            b'.' => note.endless = true,
            _ => {}
        }
    }

    Ok(note)
}

/// Parse a controller token: `$[pb|N]=V1[..V2][..STEP][:TIME][+DELAY][/DIV]`.
pub(crate) fn parse_ctl(text: &str, column: usize) -> Result<CtlEvent, ParseError> {
    let mut scan = Scan::new(text);
    if !scan.eat(b'$') {
        return Err(ParseError::new(0, "not a controller"));
    }

    let mut ctl = CtlEvent {
        kind: CtlKind::Control,
        controller: 0,
        value: 0,
        init_value: None,
        step: 1,
        time: 0.0,
        delay: 0.0,
        delay_div: 1.0,
        column,
    };

    if scan.eat(b'p') {
        if !scan.eat(b'b') {
            return Err(ParseError::new(scan.pos(), "bad controller"));
        }
        ctl.kind = CtlKind::PitchBend;
    } else {
        let n = scan
            .uint()
            .ok_or_else(|| ParseError::new(scan.pos(), "bad controller number"))?;
        ctl.controller = n as u8;
    }

    if !scan.eat(b'=') {
        return Err(ParseError::new(scan.pos(), "expected '='"));
    }
    let init = scan
        .uint()
        .ok_or_else(|| ParseError::new(scan.pos(), "bad initial value"))? as i32;
    ctl.init_value = Some(init);

    while scan.eat(b'.') {}
    ctl.value = match scan.uint() {
        Some(v) => v as i32,
        None => init,
    };

    while scan.eat(b'.') {}
    if let Some(step) = scan.uint() {
        ctl.step = step as i32;
    }

    while let Some(c) = scan.bump() {
        match c {
            b':' => {
                ctl.time = scan
                    .float()
                    .ok_or_else(|| ParseError::new(scan.pos(), "bad ramp time"))?;
            }
            b'+' => {
                ctl.delay = scan
                    .float()
                    .ok_or_else(|| ParseError::new(scan.pos(), "bad delay"))?;
            }
            b'/' => {
                ctl.delay_div = scan
                    .float()
                    .ok_or_else(|| ParseError::new(scan.pos(), "bad delay divisor"))?;
            }
            _ => {}
        }
    }

    Ok(ctl)
}

/// Whitespace-separated tokens with their byte offsets.
fn tokens(line: &str) -> Vec<(usize, &str)> {
    let bytes = line.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let start = i;
        while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i > start {
            out.push((start, &line[start..i]));
        }
    }
    out
}

/// `N <sep> D`, tolerating whitespace around the separator.
fn read_signature(scan: &mut Scan) -> Option<(u32, u32)> {
    scan.skip_ws();
    let nom = scan.uint()?;
    scan.skip_ws();
    scan.bump()?;
    scan.skip_ws();
    let div = scan.uint()?;
    Some((nom as u32, div as u32))
}

/// Minimal cursor over an ASCII token.
struct Scan<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Scan<'a> {
    fn new(src: &'a str) -> Self {
        Scan { src, pos: 0 }
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn rest(&self) -> &'a str {
        self.src.get(self.pos..).unwrap_or("")
    }

    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn eat(&mut self, b: u8) -> bool {
        if self.peek() == Some(b) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b) if b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn uint(&mut self) -> Option<u64> {
        let start = self.pos;
        while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.pos == start {
            return None;
        }
        self.src[start..self.pos].parse().ok()
    }

    fn float(&mut self) -> Option<f64> {
        let start = self.pos;
        while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.peek() == Some(b'.')
            && matches!(
                self.src.as_bytes().get(self.pos + 1),
                Some(b) if b.is_ascii_digit()
            )
        {
            self.pos += 1;
            while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if self.pos == start {
            return None;
        }
        self.src[start..self.pos].parse().ok()
    }
}
