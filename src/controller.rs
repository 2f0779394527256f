//! Host side of the LED controller protocol.
//!
//! The controller owns the write half of the link and every piece of device
//! state (link phase, device info, mode, idle flag, outstanding ping). Inbound
//! messages are applied by [`Controller::handle_message`], normally from the
//! receive thread started with [`Controller::spawn_receiver`]. Consumers learn
//! about changes through [`ControllerEvent`]s on an mpsc channel.

use std::io::{Read, Write};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crate::clock::Clock;
use crate::color::ColorData;
use crate::error::{ControllerError, Result};
use crate::guard::TimingGuard;
use crate::protocol::{
    encode, read_message, ControllerMode, DeviceInfo, FreeFormEffect, HostCommand, InboundMessage,
};

/// Notifications raised by inbound traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerEvent {
    /// Handshake completed
    Ready(DeviceInfo),
    /// Device switched operating mode
    ModeChanged(ControllerMode),
    /// Device in music sync asks for the next spectrum frame
    DataReady,
    /// Round trip of the last ping
    PingCompleted(Duration),
    /// Transport closed, receive loop ended
    Disconnected,
}

/// Connection phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    AwaitingHandshake,
    Ready,
}

struct ControllerState {
    link: LinkState,
    device: Option<DeviceInfo>,
    guard: TimingGuard,
    mode: ControllerMode,
    idle: bool,
    ping_started: Option<Duration>,
}

impl ControllerState {
    fn disconnected() -> Self {
        ControllerState {
            link: LinkState::Disconnected,
            device: None,
            guard: TimingGuard::for_leds(0),
            mode: ControllerMode::Unknown,
            idle: false,
            ping_started: None,
        }
    }

    fn require_connected(&self) -> Result<()> {
        match self.link {
            LinkState::Disconnected => Err(ControllerError::NotConnected),
            _ => Ok(()),
        }
    }

    fn require_device(&self) -> Result<DeviceInfo> {
        self.require_connected()?;
        self.device.ok_or(ControllerError::NotInitialized)
    }

    fn require_mode(&self, required: ControllerMode) -> Result<()> {
        if self.mode == required {
            Ok(())
        } else {
            Err(ControllerError::ProtocolState { required, current: self.mode })
        }
    }

    fn check_free_form(&self, colors: &ColorData) -> Result<()> {
        let device = self.require_device()?;
        self.require_mode(ControllerMode::FreeForm)?;

        if let ColorData::Unique(samples) = colors {
            let expected = usize::from(device.total_leds);
            if samples.len() != expected {
                return Err(ControllerError::LengthMismatch { expected, actual: samples.len() });
            }
        }
        Ok(())
    }
}

pub struct Controller {
    state: Mutex<ControllerState>,
    // Held across guard CANCELs and the command they protect
    writer: Mutex<Box<dyn Write + Send>>,
    clock: Arc<dyn Clock>,
    events: Sender<ControllerEvent>,
}

impl Controller {
    pub fn new(
        writer: Box<dyn Write + Send>,
        clock: Arc<dyn Clock>,
        events: Sender<ControllerEvent>,
    ) -> Self {
        Controller {
            state: Mutex::new(ControllerState::disconnected()),
            writer: Mutex::new(writer),
            clock,
            events,
        }
    }

    pub fn link_state(&self) -> LinkState {
        self.lock_state().link
    }

    pub fn device_info(&self) -> Option<DeviceInfo> {
        self.lock_state().device
    }

    pub fn mode(&self) -> ControllerMode {
        self.lock_state().mode
    }

    pub fn is_idle(&self) -> bool {
        self.lock_state().idle
    }

    /// Mark the link up and ask the device to introduce itself
    pub fn connect(&self) -> Result<()> {
        let mut writer = self.lock_writer();
        {
            let mut state = self.lock_state();
            *state = ControllerState::disconnected();
            state.link = LinkState::AwaitingHandshake;
        }
        log::info!("Link up, sending HELLO");
        write_frame(&mut **writer, &HostCommand::Hello)
    }

    /// Ask the device to switch mode. The change only takes effect once the
    /// device reports it back with CUR_MODE.
    pub fn set_mode(&self, mode: ControllerMode) -> Result<()> {
        if mode == ControllerMode::Unknown {
            return Err(ControllerError::UnsendableMode(mode));
        }

        let mut writer = self.lock_writer();
        self.lock_state().require_connected()?;
        write_frame(&mut **writer, &HostCommand::SetMode(mode))
    }

    /// Send a PING; the round trip is reported as `PingCompleted`
    pub fn ping(&self) -> Result<()> {
        let mut writer = self.lock_writer();
        {
            let mut state = self.lock_state();
            state.require_connected()?;
            state.ping_started = Some(self.clock.now());
        }

        let result = write_frame(&mut **writer, &HostCommand::Ping);
        if result.is_err() {
            // A PONG arriving later cannot answer a ping that never went out
            self.lock_state().ping_started = None;
        }
        result
    }

    /// Check a free-form command against the current state without sending it
    pub fn validate_free_form(&self, colors: &ColorData) -> Result<()> {
        self.lock_state().check_free_form(colors)
    }

    /// Send a free-form color command, guarded against the LED shift window.
    ///
    /// Fails without writing anything unless the handshake is done, the device
    /// is in free-form mode and per-LED colors cover the whole strip.
    pub fn send_free_form(&self, effect: FreeFormEffect, colors: &ColorData) -> Result<()> {
        let mut writer = self.lock_writer();

        let (guard, was_idle) = {
            let mut state = self.lock_state();
            state.check_free_form(colors)?;
            (state.guard, std::mem::replace(&mut state.idle, false))
        };

        let cancels = guard.await_device_ready(was_idle, &mut **writer, self.clock.as_ref())?;
        if cancels > 0 {
            log::debug!("Sent {} CANCEL frames before {:?}", cancels, effect);
        }

        write_frame(&mut **writer, &HostCommand::DataHsv { effect, colors })?;

        // An IDLE that arrived during the spin predates this command
        self.lock_state().idle = false;
        Ok(())
    }

    /// Send one spectrum frame. Music sync is flow-controlled by DATA_READY,
    /// so no guard is applied.
    pub fn send_music_frame(&self, levels: &[u8]) -> Result<()> {
        let mut writer = self.lock_writer();
        {
            let state = self.lock_state();
            let device = state.require_device()?;
            state.require_mode(ControllerMode::MusicSync)?;

            let expected = usize::from(device.spectrum_lines);
            if levels.len() != expected {
                return Err(ControllerError::LengthMismatch { expected, actual: levels.len() });
            }
        }
        write_frame(&mut **writer, &HostCommand::DataStart(levels))
    }

    /// Apply one inbound message to the controller state
    pub fn handle_message(&self, message: InboundMessage) {
        let event = {
            let mut state = self.lock_state();
            match message {
                InboundMessage::Hello(info) => {
                    state.device = Some(info);
                    state.guard = TimingGuard::for_leds(info.total_leds);
                    state.link = LinkState::Ready;
                    state.idle = true;
                    log::info!(
                        "Controller ready: {} LEDs, {} spectrum lines",
                        info.total_leds,
                        info.spectrum_lines
                    );
                    Some(ControllerEvent::Ready(info))
                }
                InboundMessage::CurrentMode(mode) => {
                    if mode == state.mode {
                        None
                    } else {
                        log::info!("Mode changed: {:?} -> {:?}", state.mode, mode);
                        state.mode = mode;
                        Some(ControllerEvent::ModeChanged(mode))
                    }
                }
                InboundMessage::DataReady => {
                    if state.mode == ControllerMode::MusicSync {
                        Some(ControllerEvent::DataReady)
                    } else {
                        log::warn!("Received DATA_READY while in {:?} mode", state.mode);
                        None
                    }
                }
                InboundMessage::Idle => {
                    state.idle = true;
                    None
                }
                InboundMessage::Pong => match state.ping_started.take() {
                    Some(started) => {
                        let rtt = self.clock.now().saturating_sub(started);
                        log::info!("Ping: {} ms", rtt.as_millis());
                        Some(ControllerEvent::PingCompleted(rtt))
                    }
                    None => {
                        log::warn!("Received PONG without an outstanding ping");
                        None
                    }
                },
                InboundMessage::Unknown(opcode) => {
                    log::warn!("Ignoring unknown opcode 0x{:02x}", opcode);
                    None
                }
            }
        };

        if let Some(event) = event {
            self.emit(event);
        }
    }

    /// Drop all device state and report the link as gone
    pub fn disconnect(&self) {
        *self.lock_state() = ControllerState::disconnected();
        log::info!("Controller disconnected");
        self.emit(ControllerEvent::Disconnected);
    }

    /// Spawn the receive loop on the read half of the transport.
    ///
    /// The loop blocks on the reader and exits once the transport is closed or
    /// fails, leaving the controller disconnected.
    pub fn spawn_receiver(self: &Arc<Self>, mut reader: Box<dyn Read + Send>) -> thread::JoinHandle<()> {
        let controller = Arc::clone(self);
        thread::spawn(move || {
            loop {
                match read_message(&mut reader) {
                    Ok(Some(message)) => {
                        log::trace!("Received {:?}", message);
                        controller.handle_message(message);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        log::error!("Receive loop failed: {}", e);
                        break;
                    }
                }
            }
            controller.disconnect();
        })
    }

    fn emit(&self, event: ControllerEvent) {
        // Nobody listening is not an error
        let _ = self.events.send(event);
    }

    fn lock_state(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_writer(&self) -> MutexGuard<'_, Box<dyn Write + Send>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn write_frame(writer: &mut (dyn Write + Send), command: &HostCommand<'_>) -> Result<()> {
    let frame = encode(command);

    if log::log_enabled!(log::Level::Trace) {
        let hex: String = frame.iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join(" ");
        log::trace!("Sending frame: {}", hex);
    }

    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}
