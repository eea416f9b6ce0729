//! Test doubles shared by the unit suites.

use std::sync::Mutex;

use crate::audio::MidiEngine;
use crate::error::EngineError;
use crate::midi::message::{FrameTime, MidiMessage, PortId};
use crate::midi::{ALL_SOUND_OFF, CONTROLLER};

/// Engine stub that records queued messages instead of talking to JACK.
///
/// The clock stands still at `now` and the sample rate defaults to 48 kHz,
/// which makes one quant step at the default tempo exactly 7200 frames.
pub struct MockEngine {
    pub queued: Mutex<Vec<MidiMessage>>,
    pub flushed: Mutex<Vec<MidiMessage>>,
    pub ports: Mutex<Vec<String>>,
    pub connections: Mutex<Vec<(PortId, String)>>,
    pub sample_rate: u32,
    pub now: FrameTime,
}

impl MockEngine {
    pub fn new() -> Self {
        MockEngine {
            queued: Mutex::new(Vec::new()),
            flushed: Mutex::new(Vec::new()),
            ports: Mutex::new(vec!["default".into()]),
            connections: Mutex::new(Vec::new()),
            sample_rate: 48_000,
            now: 0,
        }
    }

    /// Everything queued so far, in queueing order.
    pub fn messages(&self) -> Vec<MidiMessage> {
        self.queued.lock().unwrap().clone()
    }
}

impl MidiEngine for MockEngine {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_frame_time(&self) -> FrameTime {
        self.now
    }

    fn queue(&self, msg: MidiMessage) {
        self.queued.lock().unwrap().push(msg);
    }

    fn register_output_port(&self, name: &str) -> Result<PortId, EngineError> {
        let mut ports = self.ports.lock().unwrap();
        if let Some(i) = ports.iter().position(|p| p == name) {
            return Ok(PortId(i));
        }
        ports.push(name.to_string());
        Ok(PortId(ports.len() - 1))
    }

    fn connect_port(&self, port: PortId, destination: &str) -> Result<(), EngineError> {
        self.connections
            .lock()
            .unwrap()
            .push((port, destination.to_string()));
        Ok(())
    }

    fn has_pending(&self) -> bool {
        false
    }

    fn stop_sounds(&self) {
        let count = self.ports.lock().unwrap().len();
        let mut flushed = self.flushed.lock().unwrap();
        for i in 0..count {
            flushed.push(MidiMessage::new(
                &[CONTROLLER, ALL_SOUND_OFF, 0],
                self.now,
                0,
                Some(PortId(i)),
            ));
        }
    }
}
