use anyhow::{bail, Context, Result};
use clap::Parser;
use std::fs;
use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ledlink::clock::{Clock, SystemClock};
use ledlink::config::Config;
use ledlink::controller::{Controller, ControllerEvent};
use ledlink::producer::{EffectProducer, GameEffects, GameEvent, MusicFeed, Team};
use ledlink::scheduler::{EffectRequest, EffectScheduler};
use ledlink::transport::open_serial;
use ledlink::{ColorData, ColorSample, ControllerMode, FreeFormEffect};

/// Sequence id and priority for colors typed at the prompt; they beat every game effect
const MANUAL_SEQUENCE_ID: u8 = 0;
const MANUAL_PRIORITY: u8 = u8::MAX;

#[derive(Parser)]
#[command(name = "ledlink")]
#[command(about = "Serial LED strip controller\n\nDrives an LED controller over a serial link from game events and music.", long_about = None)]
struct Cli {
    /// Path to configuration file (JSON)
    config: String,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    /// Enable detailed debug (hex dumps every frame)
    #[arg(long)]
    ddebug: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // ddebug implies debug
    let default_level = if cli.ddebug {
        "trace"
    } else if cli.debug {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    // Load configuration
    let config_data = fs::read_to_string(&cli.config)
        .context(format!("Failed to read config {}", cli.config))?;
    let config: Config = serde_json::from_str(&config_data)
        .context(format!("Failed to parse config {}", cli.config))?;

    let transport = open_serial(&config.serial)?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let (event_tx, event_rx) = mpsc::channel();
    let controller = Arc::new(Controller::new(transport.writer, Arc::clone(&clock), event_tx));
    let scheduler = Arc::new(EffectScheduler::new(clock));

    let game = Arc::new(GameEffects::new(Arc::clone(&controller), Arc::clone(&scheduler)));
    let music = Arc::new(MusicFeed::new(Arc::clone(&controller)));

    controller.spawn_receiver(transport.reader);
    let mut pacing = scheduler.start(config.scheduler.pacing_interval());
    spawn_event_thread(
        event_rx,
        Arc::clone(&controller),
        Arc::clone(&game),
        Arc::clone(&music),
        config.startup_mode,
    );

    controller.connect().context("Failed to send HELLO")?;

    // Set up Ctrl-C handler with graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let handler_running = Arc::clone(&running);
    if let Err(e) = ctrlc::set_handler(move || {
        handler_running.store(false, Ordering::Relaxed);
    }) {
        log::warn!("Could not set Ctrl-C handler: {}", e);
    }

    let lines = spawn_stdin_reader();
    let shell = Shell {
        controller,
        scheduler: Arc::clone(&scheduler),
        game: Arc::clone(&game),
        music: Arc::clone(&music),
    };
    prompt();

    while running.load(Ordering::Relaxed) {
        match lines.recv_timeout(Duration::from_millis(100)) {
            Ok(line) => {
                match shell.execute(line.trim()) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => log::error!("{:#}", e),
                }
                prompt();
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    log::info!("Shutting down...");
    game.stop();
    music.stop();
    pacing.stop();

    Ok(())
}

fn prompt() {
    print!("Command: ");
    let _ = io::stdout().flush();
}

fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Follows controller events: requests the startup mode once ready and keeps
/// the producer matching the device mode running.
fn spawn_event_thread(
    events: Receiver<ControllerEvent>,
    controller: Arc<Controller>,
    game: Arc<GameEffects>,
    music: Arc<MusicFeed>,
    startup_mode: Option<ControllerMode>,
) {
    thread::spawn(move || {
        let mut active: Option<Arc<dyn EffectProducer>> = None;

        for event in events {
            match event {
                ControllerEvent::Ready(_) => {
                    if let Some(mode) = startup_mode {
                        if let Err(e) = controller.set_mode(mode) {
                            log::error!("Failed to request {:?} mode: {}", mode, e);
                        }
                    }
                }
                ControllerEvent::ModeChanged(mode) => {
                    if let Some(producer) = active.take() {
                        producer.stop();
                    }

                    let next: Option<Arc<dyn EffectProducer>> = match mode {
                        ControllerMode::FreeForm => Some(game.clone() as Arc<dyn EffectProducer>),
                        ControllerMode::MusicSync => Some(music.clone() as Arc<dyn EffectProducer>),
                        ControllerMode::Unknown => None,
                    };

                    if let Some(producer) = next {
                        match producer.start() {
                            Ok(()) => {
                                log::info!("Started {}", producer.name());
                                active = Some(producer);
                            }
                            Err(e) => log::error!("Failed to start {}: {}", producer.name(), e),
                        }
                    }
                }
                ControllerEvent::DataReady => music.on_data_ready(),
                ControllerEvent::PingCompleted(rtt) => {
                    println!("Ping: {} ms", rtt.as_millis());
                }
                ControllerEvent::Disconnected => {
                    if let Some(producer) = active.take() {
                        producer.stop();
                    }
                    log::warn!("Controller disconnected");
                }
            }
        }
    });
}

struct Shell {
    controller: Arc<Controller>,
    scheduler: Arc<EffectScheduler>,
    game: Arc<GameEffects>,
    music: Arc<MusicFeed>,
}

impl Shell {
    /// Run one command line. Returns false on quit.
    fn execute(&self, line: &str) -> Result<bool> {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return Ok(true);
        };
        let args: Vec<&str> = words.collect();

        match command {
            "quit" => return Ok(false),
            "ping" => self.controller.ping()?,
            "music" => self.controller.set_mode(ControllerMode::MusicSync)?,
            "freeform" => self.controller.set_mode(ControllerMode::FreeForm)?,
            "color" => {
                let bytes = parse_bytes(&args)?;
                let [h, s, v] = bytes[..] else {
                    bail!("usage: color <h> <s> <v>");
                };
                let request = EffectRequest {
                    sequence_id: MANUAL_SEQUENCE_ID,
                    priority: MANUAL_PRIORITY,
                    hold: Duration::from_millis(6000),
                    effect: FreeFormEffect::FadeInOut { ms_in: 3000, ms_out: 3000 },
                    colors: ColorData::Uniform(ColorSample::new(h, s, v)),
                };
                if !self.scheduler.submit_free_form(&self.controller, request)? {
                    println!("Color is still showing, try again later.");
                }
            }
            "event" => {
                let event = parse_game_event(&args)?;
                if self.game.sender().is_none() {
                    println!("Game effects only run in free form mode.");
                }
                self.game.notify(event);
            }
            "spectrum" => {
                let levels = parse_bytes(&args)?;
                if !self.music.offer(&levels)? {
                    println!("Device has not asked for data.");
                }
            }
            other => println!("Unknown command: {}", other),
        }

        Ok(true)
    }
}

fn parse_bytes(args: &[&str]) -> Result<Vec<u8>> {
    args.iter()
        .map(|a| a.parse::<u8>().context(format!("'{}' is not a byte value", a)))
        .collect()
}

fn parse_game_event(args: &[&str]) -> Result<GameEvent> {
    let event = match args {
        ["shot"] => GameEvent::ShotFired,
        ["damage"] => GameEvent::Damaged,
        ["death"] => GameEvent::Died,
        ["kill"] => GameEvent::Killed,
        ["flash", intensity] => GameEvent::Flashed {
            intensity: intensity.parse().context("flash intensity must be 0-255")?,
        },
        ["round-begin"] => GameEvent::RoundBegin,
        ["round-end", "ct"] => GameEvent::RoundEnd { winner: Team::CounterTerrorists },
        ["round-end", "t"] => GameEvent::RoundEnd { winner: Team::Terrorists },
        _ => bail!("usage: event <shot|damage|death|kill|flash <n>|round-begin|round-end <ct|t>>"),
    };
    Ok(event)
}
