// Euclid Seq - Euclidean pattern sequencer with MIDI and OSC output

use clap::{Arg, ArgAction, Command as Cli, value_parser};
use euclid_seq::messaging::channels::create_midi_channel;
use euclid_seq::midi::input::MidiInput;
use euclid_seq::midi::output::MidiOutput;
use euclid_seq::osc::OscSender;
use euclid_seq::sequencer::OutputAdapter;
use euclid_seq::{
    ClockMode, ConfigError, MidiOutSettings, NotificationLevel, PatternSettings, SequencerConfig,
    SequencerEngine, SequencerError, TriggerSettings,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const STATUS_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sequencer(#[from] SequencerError),

    #[error("Failed to install Ctrl-C handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run() {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn cli() -> Cli {
    Cli::new("euclid_seq")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Euclidean rhythm step sequencer")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("bpm")
                .long("bpm")
                .value_name("BPM")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("external-clock")
                .long("external-clock")
                .help("Follow MIDI clock from the input port")
                .action(ArgAction::SetTrue),
        )
        .arg(Arg::new("midi-in").long("midi-in").value_name("PORT"))
        .arg(Arg::new("midi-out").long("midi-out").value_name("PORT"))
        .arg(Arg::new("osc").long("osc").value_name("HOST:PORT"))
        .arg(
            Arg::new("list-ports")
                .long("list-ports")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("demo")
                .long("demo")
                .help("Load a four-pattern drum demo")
                .action(ArgAction::SetTrue),
        )
}

fn run() -> Result<(), AppError> {
    let matches = cli().get_matches();

    if matches.get_flag("list-ports") {
        print_ports()?;
        return Ok(());
    }

    // Command line overrides the file
    let mut config = SequencerConfig::load_or_default(
        matches.get_one::<PathBuf>("config").map(PathBuf::as_path),
    )?;
    if let Some(bpm) = matches.get_one::<f64>("bpm") {
        config.tempo_bpm = *bpm;
    }
    if matches.get_flag("external-clock") {
        config.clock_mode = ClockMode::External;
    }
    if let Some(port) = matches.get_one::<String>("midi-in") {
        config.midi_in_port = Some(port.clone());
    }
    if let Some(port) = matches.get_one::<String>("midi-out") {
        config.midi_out_port = Some(port.clone());
    }
    if let Some(target) = matches.get_one::<String>("osc") {
        config.osc_target = Some(target.clone());
    }
    config.validate()?;

    // MIDI input is only opened when asked for or needed for the clock
    let (midi_tx, midi_rx) = create_midi_channel(config.midi_capacity);
    let wants_input = config.midi_in_port.is_some() || config.clock_mode == ClockMode::External;
    let midi_in = if wants_input {
        match MidiInput::connect(config.midi_in_port.as_deref(), midi_tx) {
            Ok(input) => Some(input),
            Err(e) => {
                tracing::warn!("MIDI input unavailable: {}", e);
                None
            }
        }
    } else {
        None
    };

    let adapters = open_outputs(&config);
    if adapters.is_empty() {
        tracing::warn!("No output connected, events will be discarded");
    }

    let (mut engine, mut handle) = SequencerEngine::with_midi_input(
        config.engine_config(midi_in.is_some()),
        adapters,
        midi_rx,
    )?;

    if matches.get_flag("demo") {
        handle.load_patterns(config.tempo_bpm, demo_patterns(config.ppqn))?;
        if config.clock_mode == ClockMode::Internal {
            handle.start()?;
        }
    } else {
        tracing::info!("No patterns loaded (use --demo)");
    }

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))?;

    let mut last_status = Instant::now();
    while running.load(Ordering::SeqCst) {
        thread::sleep(POLL_INTERVAL);

        for notification in handle.drain_notifications() {
            match notification.level {
                NotificationLevel::Info => tracing::info!("{}", notification.message),
                NotificationLevel::Warning => tracing::warn!("{}", notification.message),
                NotificationLevel::Error => tracing::error!("{}", notification.message),
            }
        }

        if last_status.elapsed() >= STATUS_INTERVAL {
            last_status = Instant::now();
            let transport = handle.transport();
            tracing::debug!(
                state = ?transport.state(),
                tempo = %transport.tempo(),
                pulses = transport.pulse_count(),
                stalled = transport.is_stalled(),
                "Transport"
            );
            for snapshot in handle.snapshots() {
                tracing::debug!(
                    name = %snapshot.name,
                    step = snapshot.step,
                    running = snapshot.running,
                    "Pattern"
                );
            }
        }
    }

    tracing::info!("Shutting down");
    // Quit lets the scheduler release sounding notes before it exits
    if handle.quit().is_err() {
        tracing::warn!("Command queue full, forcing shutdown");
    }
    engine.shutdown();
    drop(midi_in);
    Ok(())
}

fn open_outputs(config: &SequencerConfig) -> Vec<Box<dyn OutputAdapter>> {
    let mut adapters: Vec<Box<dyn OutputAdapter>> = Vec::new();

    match MidiOutput::connect(config.midi_out_port.as_deref()) {
        Ok(output) => adapters.push(Box::new(output)),
        Err(e) => tracing::warn!("MIDI output unavailable: {}", e),
    }

    if let Some(target) = &config.osc_target {
        match OscSender::new(target) {
            Ok(sender) => adapters.push(Box::new(sender)),
            Err(e) => tracing::warn!("OSC output unavailable: {}", e),
        }
    }

    adapters
}

fn print_ports() -> Result<(), SequencerError> {
    println!("MIDI inputs:");
    for (i, name) in MidiInput::list_ports()?.iter().enumerate() {
        println!("  [{}] {}", i, name);
    }
    println!("MIDI outputs:");
    for (i, name) in MidiOutput::list_ports()?.iter().enumerate() {
        println!("  [{}] {}", i, name);
    }
    Ok(())
}

/// Kick, snare, hats and a triggered rim shot on the GM drum channel
fn demo_patterns(ppqn: u32) -> Vec<PatternSettings> {
    let drum = |pitch: u8, velocity: u8| MidiOutSettings {
        channel: 9,
        pitch,
        velocity,
        note_length: (ppqn / 8).max(1),
    };

    vec![
        PatternSettings {
            name: "Kick".into(),
            steps: 16,
            fills: 4,
            midi_out: drum(36, 110),
            osc_out_address: "/euclid/kick".into(),
            ..PatternSettings::default()
        },
        PatternSettings {
            name: "Snare".into(),
            steps: 16,
            fills: 2,
            rotation: 4,
            midi_out: drum(38, 100),
            ..PatternSettings::default()
        },
        PatternSettings {
            name: "Hats".into(),
            steps: 16,
            fills: 7,
            midi_out: drum(42, 80),
            ..PatternSettings::default()
        },
        PatternSettings {
            name: "Rim".into(),
            steps: 8,
            fills: 3,
            quantization: 8,
            midi_out: drum(37, 90),
            trigger: TriggerSettings {
                enabled: true,
                channel: 0,
                pitch: 60,
            },
            ..PatternSettings::default()
        },
    ]
}
