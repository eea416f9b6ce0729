//! JACK client ownership and the heap → ring → process-callback pipeline.
//!
//! Three threads touch this module. The sequencer thread queues messages
//! into the time heap. The pump thread moves messages whose time is close
//! into a single-producer single-consumer ring. The JACK realtime thread
//! drains the ring inside the process callback and writes the bytes into
//! the cycle's port buffers. The realtime side never allocates, locks, or
//! blocks; everything it needs arrives over the ring and a bounded channel
//! of freshly registered ports.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use arrayvec::ArrayVec;
use crossbeam_channel::{bounded, Receiver, Sender};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::audio::MidiEngine;
use crate::error::EngineError;
use crate::midi::message::{FrameTime, MidiMessage, PortId};
use crate::midi::{TimeHeap, ALL_SOUND_OFF, CONTROLLER};

const CLIENT_NAME: &str = "stanza";

/// Capacity of the outbound message heap.
const MIDI_HEAP_SIZE: usize = 1024;

/// Capacity of the heap → callback ring, in messages.
const RING_SIZE: usize = 1024;

/// Frames ahead of the clock within which the pump promotes messages.
const PUMP_LOOKAHEAD: FrameTime = 100;

/// Hard cap on registered output ports; the process callback keeps its
/// scratch for writers on the stack at this size.
const MAX_PORTS: usize = 64;

/// State shared between the engine, the pump thread and the callback.
struct Shared {
    heap: TimeHeap,
    /// Frame time at the end of the cycle most recently seen by the callback.
    frame_clock: AtomicU32,
}

struct RegisteredPort {
    short: String,
    full: String,
}

struct Backend {
    client: jack::AsyncClient<Notifications, MidiProcessor>,
    /// Registered for symmetry with the output side; not read yet.
    _input: jack::Port<jack::MidiIn>,
}

/// The JACK implementation of [`MidiEngine`].
///
/// Owns the client, the output port table, the time heap, the ring
/// producer and the pump thread. Registered port handles stay valid for
/// the life of the engine.
pub struct JackEngine {
    shared: Arc<Shared>,
    backend: Mutex<Option<Backend>>,
    port_tx: Sender<jack::Port<jack::MidiOut>>,
    /// Names of registered output ports; the index is the `PortId`.
    port_names: Mutex<Vec<RegisteredPort>>,
    ring_prod: Arc<Mutex<HeapProd<MidiMessage>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    playing: Arc<AtomicBool>,
    sample_rate: u32,
    buffer_size: FrameTime,
}

impl JackEngine {
    /// Open the client, register the base ports, activate, and start the
    /// pump thread.
    pub fn new() -> Result<Self, EngineError> {
        let (client, _status) =
            jack::Client::new(CLIENT_NAME, jack::ClientOptions::NO_START_SERVER)
                .map_err(EngineError::BackendUnavailable)?;

        let sample_rate = client.sample_rate() as u32;
        let buffer_size = client.buffer_size() as FrameTime;

        let input = client.register_port("input", jack::MidiIn::default())?;
        let default = client.register_port("default", jack::MidiOut::default())?;
        let default_entry = RegisteredPort {
            short: "default".into(),
            full: default.name()?,
        };

        let (port_tx, port_rx) = bounded(MAX_PORTS);
        let (ring_prod, ring_cons) = HeapRb::<MidiMessage>::new(RING_SIZE).split();

        let shared = Arc::new(Shared {
            heap: TimeHeap::new(MIDI_HEAP_SIZE),
            frame_clock: AtomicU32::new(client.frame_time()),
        });
        let playing = Arc::new(AtomicBool::new(true));

        let mut ports = ArrayVec::new();
        ports.push(default);
        let processor = MidiProcessor {
            shared: shared.clone(),
            ports,
            port_rx,
            ring: ring_cons,
        };
        let notifications = Notifications {
            shared: shared.clone(),
            playing: playing.clone(),
        };
        let client = client
            .activate_async(notifications, processor)
            .map_err(EngineError::ActivationFailed)?;

        let ring_prod = Arc::new(Mutex::new(ring_prod));
        let pump = {
            let shared = shared.clone();
            let ring_prod = ring_prod.clone();
            let playing = playing.clone();
            thread::spawn(move || pump_loop(shared, ring_prod, playing))
        };

        Ok(JackEngine {
            shared,
            backend: Mutex::new(Some(Backend {
                client,
                _input: input,
            })),
            port_tx,
            port_names: Mutex::new(vec![default_entry]),
            ring_prod,
            pump: Mutex::new(Some(pump)),
            playing,
            sample_rate,
            buffer_size,
        })
    }

    /// The shutdown flag observed by the pump thread and the player loop.
    pub fn playing(&self) -> Arc<AtomicBool> {
        self.playing.clone()
    }

    pub fn stop_playing(&self) {
        self.playing.store(false, Ordering::Relaxed);
    }

    /// Frames per process cycle, as reported by the server.
    pub fn buffer_size(&self) -> FrameTime {
        self.buffer_size
    }

    /// Stop the pump thread and close the client.
    ///
    /// Dropping the async client deactivates it and unregisters every port.
    /// Safe to call more than once.
    pub fn shutdown(&self) {
        self.playing.store(false, Ordering::Relaxed);
        self.shared.heap.close();
        if let Some(pump) = self.pump.lock().unwrap().take() {
            let _ = pump.join();
        }
        self.backend.lock().unwrap().take();
    }
}

impl Drop for JackEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl MidiEngine for JackEngine {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_frame_time(&self) -> FrameTime {
        self.shared.frame_clock.load(Ordering::Relaxed)
    }

    fn queue(&self, msg: MidiMessage) {
        if self.shared.heap.insert(msg).is_err() {
            log::debug!("dropping midi message queued after shutdown");
        }
    }

    fn register_output_port(&self, name: &str) -> Result<PortId, EngineError> {
        let mut names = self.port_names.lock().unwrap();
        if let Some(i) = names.iter().position(|p| p.short == name) {
            return Ok(PortId(i));
        }
        if names.len() >= MAX_PORTS {
            return Err(EngineError::PortLimit);
        }

        let guard = self.backend.lock().unwrap();
        let backend = guard.as_ref().ok_or(EngineError::Shutdown)?;
        let port = backend
            .client
            .as_client()
            .register_port(name, jack::MidiOut::default())?;
        let full = port.name()?;

        // The callback adopts the port at the start of its next cycle.
        self.port_tx.send(port).map_err(|_| EngineError::Shutdown)?;
        names.push(RegisteredPort {
            short: name.to_string(),
            full,
        });
        Ok(PortId(names.len() - 1))
    }

    fn connect_port(&self, port: PortId, destination: &str) -> Result<(), EngineError> {
        let full = {
            let names = self.port_names.lock().unwrap();
            names
                .get(port.index())
                .map(|p| p.full.clone())
                .ok_or(EngineError::UnknownPort)?
        };
        let guard = self.backend.lock().unwrap();
        let backend = guard.as_ref().ok_or(EngineError::Shutdown)?;
        backend
            .client
            .as_client()
            .connect_ports_by_name(&full, destination)?;
        Ok(())
    }

    fn has_pending(&self) -> bool {
        self.shared.heap.count() > 0
    }

    fn stop_sounds(&self) {
        let now = self.current_frame_time();
        let count = self.port_names.lock().unwrap().len();
        for i in 0..count {
            let msg = MidiMessage::new(&[CONTROLLER, ALL_SOUND_OFF, 0], now, 0, Some(PortId(i)));
            write_to_ring(&self.ring_prod, msg);
        }
    }
}

/// Move messages from the heap into the ring while their time is within
/// the lookahead window, then nap for a millisecond and look again.
fn pump_loop(
    shared: Arc<Shared>,
    ring_prod: Arc<Mutex<HeapProd<MidiMessage>>>,
    playing: Arc<AtomicBool>,
) {
    while playing.load(Ordering::Relaxed) {
        loop {
            // Blocks while the heap is empty; errors once the heap closes.
            let next = match shared.heap.peek_min() {
                Ok(msg) => msg,
                Err(_) => return,
            };
            let now = shared.frame_clock.load(Ordering::Relaxed);
            if (next.time.wrapping_sub(now) as i32) > PUMP_LOOKAHEAD as i32 {
                break;
            }
            match shared.heap.pop_min() {
                Ok(msg) => write_to_ring(&ring_prod, msg),
                Err(_) => return,
            }
        }
        thread::sleep(Duration::from_millis(1));
    }
}

/// Write one message into the ring, keeping at least one slot free.
///
/// A full ring drops the message; the heap keeps feeding the next cycle.
fn write_to_ring(ring_prod: &Mutex<HeapProd<MidiMessage>>, msg: MidiMessage) {
    let mut prod = ring_prod.lock().unwrap();
    if prod.vacant_len() > 1 {
        if prod.try_push(msg).is_err() {
            log::warn!("midi message is not written entirely");
        }
    } else {
        log::warn!("midi message is not written entirely");
    }
}

/// Offset of a message within the current cycle.
///
/// Returns `None` when the message belongs to a later cycle and must stay
/// queued; past-due times clamp to the start of the cycle.
fn frame_offset(
    time: FrameTime,
    nframes: FrameTime,
    last_frame_time: FrameTime,
) -> Option<FrameTime> {
    let t = time.wrapping_add(nframes).wrapping_sub(last_frame_time) as i32;
    if t >= nframes as i32 {
        return None;
    }
    Some(t.max(0) as FrameTime)
}

struct Notifications {
    shared: Arc<Shared>,
    playing: Arc<AtomicBool>,
}

impl jack::NotificationHandler for Notifications {
    unsafe fn shutdown(&mut self, _status: jack::ClientStatus, reason: &str) {
        log::warn!("jack client shut down: {reason}");
        self.playing.store(false, Ordering::Relaxed);
        self.shared.heap.close();
    }
}

struct MidiProcessor {
    shared: Arc<Shared>,
    ports: ArrayVec<jack::Port<jack::MidiOut>, MAX_PORTS>,
    port_rx: Receiver<jack::Port<jack::MidiOut>>,
    ring: HeapCons<MidiMessage>,
}

impl jack::ProcessHandler for MidiProcessor {
    fn process(&mut self, _client: &jack::Client, ps: &jack::ProcessScope) -> jack::Control {
        let nframes = ps.n_frames();
        let last_frame_time = ps.last_frame_time();
        self.shared
            .frame_clock
            .store(last_frame_time.wrapping_add(nframes), Ordering::Relaxed);

        // Adopt ports registered since the previous cycle.
        while let Ok(port) = self.port_rx.try_recv() {
            if self.ports.try_push(port).is_err() {
                break;
            }
        }

        let Self { ports, ring, .. } = self;

        // Taking a writer clears the port's buffer for this cycle.
        let mut writers: ArrayVec<jack::MidiWriter, MAX_PORTS> =
            ports.iter_mut().map(|p| p.writer(ps)).collect();

        loop {
            let Some(next) = ring.try_peek() else {
                break;
            };
            let Some(t) = frame_offset(next.time, nframes, last_frame_time) else {
                // Strictly future; the ring keeps it for the next cycle.
                break;
            };
            let Some(msg) = ring.try_pop() else {
                break;
            };

            let index = msg.port.map(|p| p.index()).unwrap_or(0);
            let Some(writer) = writers.get_mut(index) else {
                continue;
            };
            let event = jack::RawMidi {
                time: t,
                bytes: msg.bytes(),
            };
            if let Err(e) = writer.write(&event) {
                log::warn!("cannot write midi event into the port buffer: {e}");
                break;
            }
        }

        jack::Control::Continue
    }
}
