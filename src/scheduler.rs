//! Priority arbitration and paced delivery of effects.
//!
//! Producers fire effects in bursts (several game events can land within a
//! few milliseconds). Each request first has to win the priority lock: a
//! request is admitted only if it outranks the effect currently holding the
//! strip, or that effect's hold time is over. Admitted requests wait in a FIFO
//! that a pacing thread drains one entry per tick, collapsing runs of the same
//! effect so the link never carries the same command twice in a row.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::color::ColorData;
use crate::controller::Controller;
use crate::error::Result;
use crate::protocol::FreeFormEffect;

/// Default time between two pacing ticks
pub const DEFAULT_PACING_INTERVAL: Duration = Duration::from_millis(100);

/// Deferred transmission run by the pacing tick
pub type EffectAction = Box<dyn FnOnce() -> Result<()> + Send>;

/// Token held by the effect that currently owns the strip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PriorityLock {
    pub priority: u8,
    /// `None` until the first effect is admitted
    pub lock_until: Option<Duration>,
}

impl PriorityLock {
    /// Claim the lock if `priority` outranks the holder or the hold is past.
    /// The holder keeps the strip up to and including `lock_until`.
    fn arbitrate(&mut self, priority: u8, hold: Duration, now: Duration) -> bool {
        let expired = self.lock_until.map_or(true, |until| now > until);
        if priority > self.priority || expired {
            self.priority = priority;
            self.lock_until = Some(now + hold);
            true
        } else {
            false
        }
    }
}

struct PendingEffect {
    priority: u8,
    sequence_id: u8,
    action: EffectAction,
}

struct SchedulerState {
    lock: PriorityLock,
    queue: VecDeque<PendingEffect>,
}

/// A free-form effect as submitted by a producer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectRequest {
    /// Effects sharing an id are interchangeable and coalesce in the queue
    pub sequence_id: u8,
    pub priority: u8,
    /// How long this effect keeps lower priorities out once admitted
    pub hold: Duration,
    pub effect: FreeFormEffect,
    pub colors: ColorData,
}

pub struct EffectScheduler {
    state: Mutex<SchedulerState>,
    clock: Arc<dyn Clock>,
}

impl EffectScheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        EffectScheduler {
            state: Mutex::new(SchedulerState {
                lock: PriorityLock::default(),
                queue: VecDeque::new(),
            }),
            clock,
        }
    }

    /// Try to take the priority lock for `hold`, without queueing anything
    pub fn arbitrate(&self, priority: u8, hold: Duration) -> bool {
        let now = self.clock.now();
        self.lock_state().lock.arbitrate(priority, hold, now)
    }

    pub fn priority_lock(&self) -> PriorityLock {
        self.lock_state().lock
    }

    /// Submit an effect. Returns whether it was admitted; losing the priority
    /// contest is normal and the effect is simply dropped.
    pub fn submit<F>(&self, sequence_id: u8, priority: u8, hold: Duration, action: F) -> bool
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let now = self.clock.now();
        let mut state = self.lock_state();

        if !state.lock.arbitrate(priority, hold, now) {
            log::debug!(
                "Dropped effect {} (priority {}), lock held by priority {}",
                sequence_id,
                priority,
                state.lock.priority
            );
            return false;
        }

        state.queue.push_back(PendingEffect {
            priority,
            sequence_id,
            action: Box::new(action),
        });
        true
    }

    /// Submit a free-form effect for `controller`.
    ///
    /// The request is checked against the controller's current state first, so
    /// ordering mistakes (wrong mode, no handshake, bad color count) surface
    /// here instead of on the pacing thread.
    pub fn submit_free_form(&self, controller: &Arc<Controller>, request: EffectRequest) -> Result<bool> {
        controller.validate_free_form(&request.colors)?;

        let controller = Arc::clone(controller);
        let EffectRequest { sequence_id, priority, hold, effect, colors } = request;

        Ok(self.submit(sequence_id, priority, hold, move || {
            controller.send_free_form(effect, &colors)
        }))
    }

    /// Run at most one pending effect. Queued entries directly behind it with
    /// the same sequence id are discarded. Returns whether an effect ran.
    pub fn tick(&self) -> bool {
        let next = {
            let mut state = self.lock_state();
            let Some(next) = state.queue.pop_front() else {
                return false;
            };

            let mut coalesced = 0;
            while state
                .queue
                .front()
                .is_some_and(|pending| pending.sequence_id == next.sequence_id)
            {
                state.queue.pop_front();
                coalesced += 1;
            }
            if coalesced > 0 {
                log::debug!("Coalesced {} repeats of effect {}", coalesced, next.sequence_id);
            }
            next
        };

        // Run outside the lock: the guard spin can take milliseconds
        if let Err(e) = (next.action)() {
            log::warn!(
                "Effect {} (priority {}) failed: {}",
                next.sequence_id,
                next.priority,
                e
            );
        }
        true
    }

    /// Number of effects waiting for a tick
    pub fn pending(&self) -> usize {
        self.lock_state().queue.len()
    }

    /// Drop every pending effect
    pub fn clear(&self) {
        self.lock_state().queue.clear();
    }

    /// Start the pacing thread, ticking every `interval`
    pub fn start(self: &Arc<Self>, interval: Duration) -> PacingTimer {
        let running = Arc::new(AtomicBool::new(true));
        let worker_running = Arc::clone(&running);
        let scheduler = Arc::clone(self);

        let handle = thread::spawn(move || {
            let mut next_tick = Instant::now() + interval;
            while worker_running.load(Ordering::Relaxed) {
                thread::sleep(next_tick.saturating_duration_since(Instant::now()));
                scheduler.tick();
                next_tick = next_deadline(next_tick, interval, Instant::now());
            }
        });

        PacingTimer {
            running,
            handle: Some(handle),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Deadline of the tick after `previous`. Ticks missed behind a slow action
/// are skipped rather than run back to back.
fn next_deadline(previous: Instant, interval: Duration, now: Instant) -> Instant {
    (previous + interval).max(now)
}

/// Handle to the pacing thread; stops it on drop
pub struct PacingTimer {
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl PacingTimer {
    /// Stop ticking and wait for the thread
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);

        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PacingTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SystemClock};
    use crate::color::ColorSample;
    use crate::controller::ControllerEvent;
    use crate::error::ControllerError;
    use crate::protocol::{ControllerMode, DeviceInfo, InboundMessage};
    use crate::transport::testing::MemoryLink;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    fn scheduler() -> (EffectScheduler, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (EffectScheduler::new(clock.clone()), clock)
    }

    fn recorder(log: &Arc<Mutex<Vec<u8>>>, id: u8) -> impl FnOnce() -> Result<()> + Send + 'static {
        let log = Arc::clone(log);
        move || {
            log.lock().unwrap().push(id);
            Ok(())
        }
    }

    #[test]
    fn test_higher_priority_preempts_within_hold() {
        let (scheduler, clock) = scheduler();
        assert!(scheduler.arbitrate(2, Duration::from_millis(1000)));

        clock.advance(Duration::from_millis(500));
        assert!(!scheduler.arbitrate(2, Duration::from_millis(100)));
        assert!(!scheduler.arbitrate(1, Duration::from_millis(100)));
        assert_eq!(scheduler.priority_lock().lock_until, Some(Duration::from_millis(1000)));

        assert!(scheduler.arbitrate(3, Duration::from_millis(200)));
        assert_eq!(
            scheduler.priority_lock(),
            PriorityLock { priority: 3, lock_until: Some(Duration::from_millis(700)) }
        );
    }

    #[test]
    fn test_expired_lock_admits_anything() {
        let (scheduler, clock) = scheduler();
        assert!(scheduler.arbitrate(4, Duration::from_millis(5000)));

        clock.advance(Duration::from_millis(5001));
        assert!(scheduler.arbitrate(0, Duration::from_millis(100)));
        assert_eq!(
            scheduler.priority_lock(),
            PriorityLock { priority: 0, lock_until: Some(Duration::from_millis(5101)) }
        );
    }

    #[test]
    fn test_lock_still_held_at_lock_until() {
        let (scheduler, clock) = scheduler();
        clock.advance(Duration::from_millis(10));
        assert!(scheduler.arbitrate(2, Duration::from_millis(100)));

        clock.advance(Duration::from_millis(100));
        assert!(!scheduler.arbitrate(1, Duration::from_millis(100)));
        assert!(!scheduler.arbitrate(2, Duration::from_millis(100)));

        clock.advance(Duration::from_millis(1));
        assert!(scheduler.arbitrate(1, Duration::from_millis(100)));
    }

    #[test]
    fn test_zero_hold_protects_same_instant() {
        let (scheduler, clock) = scheduler();
        assert!(scheduler.arbitrate(2, Duration::ZERO));
        assert!(!scheduler.arbitrate(0, Duration::from_millis(100)));

        clock.advance(Duration::from_millis(1));
        assert!(scheduler.arbitrate(0, Duration::from_millis(100)));
    }

    #[test]
    fn test_fresh_lock_admits_lowest_priority() {
        let (scheduler, _clock) = scheduler();
        assert_eq!(scheduler.priority_lock().lock_until, None);
        assert!(scheduler.arbitrate(0, Duration::from_millis(100)));
    }

    #[test]
    fn test_same_sequence_burst_runs_once() {
        let (scheduler, clock) = scheduler();
        let ran = Arc::new(Mutex::new(Vec::new()));

        for _ in 0..5 {
            // Hold expires between submissions so every one is admitted
            assert!(scheduler.submit(1, 0, Duration::ZERO, recorder(&ran, 1)));
            clock.advance(Duration::from_millis(1));
        }
        assert_eq!(scheduler.pending(), 5);

        assert!(scheduler.tick());
        assert_eq!(*ran.lock().unwrap(), vec![1]);
        assert_eq!(scheduler.pending(), 0);
        assert!(!scheduler.tick());
    }

    #[test]
    fn test_fifo_across_sequences() {
        let (scheduler, _clock) = scheduler();
        let ran = Arc::new(Mutex::new(Vec::new()));

        // Rising priorities so every submission wins the lock
        scheduler.submit(1, 1, Duration::from_secs(1), recorder(&ran, 1));
        scheduler.submit(1, 2, Duration::from_secs(1), recorder(&ran, 1));
        scheduler.submit(2, 3, Duration::from_secs(1), recorder(&ran, 2));
        scheduler.submit(1, 4, Duration::from_secs(1), recorder(&ran, 1));

        while scheduler.tick() {}
        assert_eq!(*ran.lock().unwrap(), vec![1, 2, 1]);
    }

    #[test]
    fn test_losing_effect_is_not_queued() {
        let (scheduler, _clock) = scheduler();
        let ran = Arc::new(Mutex::new(Vec::new()));

        assert!(scheduler.submit(3, 3, Duration::from_secs(3), recorder(&ran, 3)));
        assert!(!scheduler.submit(1, 0, Duration::from_millis(100), recorder(&ran, 1)));
        assert_eq!(scheduler.pending(), 1);
    }

    #[test]
    fn test_failing_action_is_not_fatal() {
        let (scheduler, clock) = scheduler();
        scheduler.submit(1, 0, Duration::ZERO, || Err(ControllerError::NotInitialized));
        clock.advance(Duration::from_millis(1));
        scheduler.submit(2, 0, Duration::ZERO, || Ok(()));

        assert!(scheduler.tick());
        assert!(scheduler.tick());
        assert!(!scheduler.tick());
    }

    #[test]
    fn test_clear_drops_pending() {
        let (scheduler, _clock) = scheduler();
        scheduler.submit(1, 1, Duration::ZERO, || Ok(()));
        scheduler.clear();
        assert_eq!(scheduler.pending(), 0);
    }

    fn free_form_controller(mode: ControllerMode) -> (Arc<Controller>, MemoryLink) {
        let link = MemoryLink::new();
        let (tx, _rx) = mpsc::channel::<ControllerEvent>();
        let clock = Arc::new(ManualClock::with_auto_step(Duration::from_micros(10)));
        let controller = Arc::new(Controller::new(Box::new(link.clone()), clock, tx));
        controller.connect().unwrap();
        controller.handle_message(InboundMessage::Hello(DeviceInfo {
            total_leds: 60,
            spectrum_lines: 16,
        }));
        controller.handle_message(InboundMessage::CurrentMode(mode));
        link.clear();
        (controller, link)
    }

    fn flash_request() -> EffectRequest {
        EffectRequest {
            sequence_id: 1,
            priority: 0,
            hold: Duration::from_millis(100),
            effect: FreeFormEffect::FadeOut { ms: 200 },
            colors: ColorData::Uniform(ColorSample::new(29, 255, 255)),
        }
    }

    #[test]
    fn test_submit_free_form_fails_fast() {
        let (scheduler, _clock) = scheduler();
        let (controller, link) = free_form_controller(ControllerMode::MusicSync);

        let result = scheduler.submit_free_form(&controller, flash_request());
        assert!(matches!(result, Err(ControllerError::ProtocolState { .. })));
        assert_eq!(scheduler.pending(), 0);
        assert!(link.bytes().is_empty());
    }

    #[test]
    fn test_submit_free_form_sends_on_tick() {
        let (scheduler, _clock) = scheduler();
        let (controller, link) = free_form_controller(ControllerMode::FreeForm);

        assert!(scheduler.submit_free_form(&controller, flash_request()).unwrap());
        assert!(link.bytes().is_empty());

        scheduler.tick();
        assert_eq!(
            link.bytes(),
            vec![0xF0, 0xAA, 0x05, 0x02, 200, 0, 0x00, 29, 255, 255]
        );
    }

    #[test]
    fn test_pacing_timer_drains_queue() {
        let scheduler = Arc::new(EffectScheduler::new(Arc::new(SystemClock::new())));
        let count = Arc::new(AtomicUsize::new(0));

        for id in 0..3u8 {
            let count = Arc::clone(&count);
            scheduler.submit(id, id, Duration::ZERO, move || {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        let mut timer = scheduler.start(Duration::from_millis(5));
        let deadline = Instant::now() + Duration::from_secs(5);
        while count.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        timer.stop();

        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_pacing_deadline_ignores_action_time() {
        let start = Instant::now();
        let interval = Duration::from_millis(100);

        // Action finished 30ms into the period: the next tick stays on the grid
        let next = next_deadline(start, interval, start + Duration::from_millis(30));
        assert_eq!(next, start + interval);

        // Action overran two periods: run the next tick right away, once
        let late = start + Duration::from_millis(250);
        assert_eq!(next_deadline(start, interval, late), late);
    }
}
