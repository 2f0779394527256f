use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use super::EffectProducer;
use crate::color::{ColorData, ColorSample};
use crate::controller::Controller;
use crate::error::Result;
use crate::protocol::FreeFormEffect;
use crate::scheduler::{EffectRequest, EffectScheduler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Team {
    CounterTerrorists,
    Terrorists,
}

/// Discrete events delivered by the game-state listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameEvent {
    ShotFired,
    Damaged,
    Died,
    Killed,
    /// Flash intensity as reported by the game (0-255)
    Flashed { intensity: u8 },
    RoundBegin,
    RoundEnd { winner: Team },
}

/// Free-form effect shown for a game event.
///
/// Every effect is a uniform fade-out; bigger moments get a higher priority
/// and hold the strip for as long as their fade runs.
pub fn effect_for(event: GameEvent) -> EffectRequest {
    let (sequence_id, priority, hold_ms, color) = match event {
        GameEvent::ShotFired => (1, 0, 100, ColorSample::from_hue_degrees(42)),
        GameEvent::Damaged => (2, 0, 200, ColorSample::from_hue_degrees(0)),
        GameEvent::Died => (3, 3, 3000, ColorSample::from_hue_degrees(0)),
        GameEvent::Killed => (4, 1, 1000, ColorSample::from_hue_degrees(115)),
        GameEvent::Flashed { intensity } => {
            (5, 2, u16::from(intensity) * 12, ColorSample::new(0, 0, 100))
        }
        GameEvent::RoundEnd { winner: Team::CounterTerrorists } => {
            (6, 4, 5000, ColorSample::from_hue_degrees(229))
        }
        GameEvent::RoundEnd { winner: Team::Terrorists } => {
            (7, 4, 5000, ColorSample::from_hue_degrees(45))
        }
        GameEvent::RoundBegin => (8, 4, 5000, ColorSample::from_hue_degrees(306)),
    };

    // Shots and damage are short flashes that fade slower than they hold
    let fade_ms = match event {
        GameEvent::ShotFired | GameEvent::Damaged => 200,
        _ => hold_ms,
    };

    EffectRequest {
        sequence_id,
        priority,
        hold: Duration::from_millis(u64::from(hold_ms)),
        effect: FreeFormEffect::FadeOut { ms: fade_ms },
        colors: ColorData::Uniform(color),
    }
}

struct Worker {
    sender: Sender<GameEvent>,
    running: Arc<AtomicBool>,
    handle: thread::JoinHandle<()>,
}

/// Turns game events into scheduled free-form effects
pub struct GameEffects {
    controller: Arc<Controller>,
    scheduler: Arc<EffectScheduler>,
    worker: Mutex<Option<Worker>>,
}

impl GameEffects {
    pub fn new(controller: Arc<Controller>, scheduler: Arc<EffectScheduler>) -> Self {
        GameEffects {
            controller,
            scheduler,
            worker: Mutex::new(None),
        }
    }

    /// Channel the game-state listener delivers events on, while started
    pub fn sender(&self) -> Option<Sender<GameEvent>> {
        self.lock_worker().as_ref().map(|w| w.sender.clone())
    }

    /// Deliver one event; ignored while stopped
    pub fn notify(&self, event: GameEvent) {
        if let Some(worker) = self.lock_worker().as_ref() {
            let _ = worker.sender.send(event);
        }
    }

    fn lock_worker(&self) -> std::sync::MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EffectProducer for GameEffects {
    fn name(&self) -> &'static str {
        "game effects"
    }

    fn start(&self) -> Result<()> {
        let mut worker = self.lock_worker();
        if worker.is_some() {
            return Ok(());
        }

        let (sender, receiver) = mpsc::channel();
        let running = Arc::new(AtomicBool::new(true));
        let worker_running = Arc::clone(&running);
        let controller = Arc::clone(&self.controller);
        let scheduler = Arc::clone(&self.scheduler);

        let handle = thread::spawn(move || {
            event_loop(receiver, controller, scheduler, worker_running);
        });

        *worker = Some(Worker { sender, running, handle });
        log::info!("Started listening to game events");
        Ok(())
    }

    fn stop(&self) {
        let Some(worker) = self.lock_worker().take() else {
            return;
        };

        worker.running.store(false, Ordering::Relaxed);
        drop(worker.sender);
        let _ = worker.handle.join();

        self.scheduler.clear();
        log::info!("Stopped listening to game events");
    }
}

impl Drop for GameEffects {
    fn drop(&mut self) {
        self.stop();
    }
}

fn event_loop(
    receiver: Receiver<GameEvent>,
    controller: Arc<Controller>,
    scheduler: Arc<EffectScheduler>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Relaxed) {
        match receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => {
                let request = effect_for(event);
                match scheduler.submit_free_form(&controller, request) {
                    Ok(true) => log::debug!("Scheduled effect for {:?}", event),
                    Ok(false) => {}
                    Err(e) => log::warn!("Cannot show {:?}: {}", event, e),
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}
