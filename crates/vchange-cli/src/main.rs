//! `vchange`: real-time voice changer.
//!
//! `vchange run` captures from an input device, applies the effect chain and
//! plays back, then reads control commands from stdin until `quit`.
//! Set RUST_LOG=debug for per-block diagnostics.

mod console;

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use vchange_engine::config::{self, EngineConfig};
use vchange_engine::presets::{PresetBank, PresetRecord};
use vchange_engine::{
    AudioBackend, AudioEngine, CpalBackend, DeviceSelector, Direction, EngineState, ParameterUpdate,
    VirtualBackend, LEVEL_FULL_SCALE,
};

use console::{level_bar, parse_command, ConsoleCommand, HELP};

#[derive(Parser)]
#[command(name = "vchange", version, about = "Real-time voice changer")]
struct Cli {
    /// Audio backend to use
    #[arg(long, value_enum, default_value_t = BackendKind::Cpal, global = true)]
    backend: BackendKind,

    /// Config file (default: ~/.config/vchange/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    /// System audio devices
    Cpal,
    /// In-process test tone and recorder
    Virtual,
}

#[derive(Subcommand)]
enum Command {
    /// List audio devices
    Devices,
    /// Start the voice changer
    Run(RunArgs),
    /// Manage presets
    Presets {
        #[command(subcommand)]
        action: PresetAction,
    },
    /// Print the effective configuration
    Config {
        /// Write it to the config path if no file exists there yet
        #[arg(long)]
        init: bool,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Input device: index, name, or "default"
    #[arg(long)]
    input: Option<DeviceSelector>,

    /// Output device: index, name, or "default"
    #[arg(long)]
    output: Option<DeviceSelector>,

    /// Preset applied before the effect flags
    #[arg(long)]
    preset: Option<String>,

    /// Run for this many seconds without the console, then stop
    #[arg(long)]
    seconds: Option<f32>,

    #[command(flatten)]
    effects: EffectArgs,
}

#[derive(Args)]
struct EffectArgs {
    /// Pitch shift in semitones (-12..12)
    #[arg(long, allow_hyphen_values = true)]
    pitch: Option<f32>,

    /// Highpass cutoff in Hz (0 disables)
    #[arg(long)]
    high_pass: Option<f32>,

    /// Lowpass cutoff in Hz (22000 disables)
    #[arg(long)]
    low_pass: Option<f32>,

    /// Enable reverb
    #[arg(long)]
    reverb: bool,

    /// Reverb room size (0..1)
    #[arg(long)]
    room_size: Option<f32>,

    /// Enable chorus
    #[arg(long)]
    chorus: bool,

    /// Enable delay
    #[arg(long)]
    delay: bool,
}

impl EffectArgs {
    /// Only the flags given on the command line.
    fn to_update(&self) -> ParameterUpdate {
        ParameterUpdate {
            pitch: self.pitch,
            high_pass: self.high_pass,
            low_pass: self.low_pass,
            reverb_on: self.reverb.then_some(true),
            room_size: self.room_size,
            chorus_on: self.chorus.then_some(true),
            delay_on: self.delay.then_some(true),
        }
    }

    fn to_record(&self) -> PresetRecord {
        let defaults = PresetRecord::default();
        PresetRecord {
            pitch: self.pitch.unwrap_or(defaults.pitch),
            high_pass: self.high_pass.unwrap_or(defaults.high_pass),
            low_pass: self.low_pass.unwrap_or(defaults.low_pass),
            reverb_on: self.reverb,
            room_size: self.room_size.unwrap_or(defaults.room_size),
            chorus_on: self.chorus,
            delay_on: self.delay,
        }
    }
}

#[derive(Subcommand)]
enum PresetAction {
    /// List built-in and user presets
    List,
    /// Print one preset's settings
    Show { name: String },
    /// Save a user preset from effect flags
    Add {
        name: String,
        #[command(flatten)]
        effects: EffectArgs,
    },
    /// Delete a user preset
    Remove { name: String },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);
    let config = config::load_config(&config_path);

    match cli.cmd {
        Command::Devices => print_devices(make_backend(cli.backend).as_ref()),
        Command::Run(args) => run(cli.backend, &config, args),
        Command::Presets { action } => presets_command(&config, action),
        Command::Config { init } => config_command(&config, &config_path, init),
    }
}

fn make_backend(kind: BackendKind) -> Arc<dyn AudioBackend> {
    match kind {
        BackendKind::Cpal => Arc::new(CpalBackend::new()),
        BackendKind::Virtual => Arc::new(VirtualBackend::new()),
    }
}

fn print_devices(backend: &dyn AudioBackend) -> Result<()> {
    let list = backend.devices().context("failed to enumerate audio devices")?;
    if list.is_empty() {
        println!("(no devices found)");
        return Ok(());
    }
    let default_in = backend.default_input().map(|d| d.index);
    let default_out = backend.default_output().map(|d| d.index);

    for d in &list {
        let mut marks = String::new();
        if default_in == Some(d.index) {
            marks.push_str("*I");
        }
        if default_out == Some(d.index) {
            if !marks.is_empty() {
                marks.push(' ');
            }
            marks.push_str("*O");
        }
        let marks = if marks.is_empty() { String::new() } else { format!("[{marks}] ") };
        println!(
            "{:>2}  {marks}{}  (in {}, out {})",
            d.index, d.name, d.max_input_channels, d.max_output_channels
        );
    }
    Ok(())
}

fn run(kind: BackendKind, config: &EngineConfig, args: RunArgs) -> Result<()> {
    let mut engine = AudioEngine::with_settings(make_backend(kind), config.settings());
    engine.set_input_device(args.input.clone().unwrap_or_else(|| config.devices.input.clone()));
    engine.set_output_device(args.output.clone().unwrap_or_else(|| config.devices.output.clone()));

    if args.seconds.is_some_and(|s| !s.is_finite() || s < 0.0) {
        bail!("--seconds must be a non-negative number");
    }
    let bank = load_bank(config);
    if let Some(name) = args.preset.as_ref().or(config.presets.initial.as_ref()) {
        apply_preset(&engine, &bank, name)?;
    }
    let update = args.effects.to_update();
    if !update.is_empty() {
        engine.update_parameters(&update);
    }

    let level = Arc::new(AtomicU32::new(0));
    {
        let level = level.clone();
        engine.register_level_observer(Arc::new(move |rms| {
            level.store(rms.to_bits(), Ordering::Relaxed);
        }));
    }

    engine.start().context("failed to start audio")?;
    print_status(&engine);

    match args.seconds {
        Some(secs) => run_for(&mut engine, Duration::from_secs_f32(secs)),
        None => console_loop(&mut engine, &bank, &level),
    }
}

fn run_for(engine: &mut AudioEngine, duration: Duration) -> Result<()> {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline && engine.state() == EngineState::Running {
        std::thread::sleep(Duration::from_millis(50));
    }
    engine.stop();
    println!("processed {} blocks", engine.blocks_processed());
    if let Some(e) = engine.take_error() {
        bail!(e);
    }
    Ok(())
}

fn console_loop(engine: &mut AudioEngine, bank: &PresetBank, level: &AtomicU32) -> Result<()> {
    println!("type 'help' for commands");
    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next() else {
            break;
        };
        let line = line.context("failed to read stdin")?;

        match parse_command(&line) {
            Ok(None) => {}
            Ok(Some(ConsoleCommand::Quit)) => break,
            Ok(Some(cmd)) => {
                if let Err(e) = execute(engine, bank, level, cmd) {
                    eprintln!("error: {e:#}");
                }
            }
            Err(e) => eprintln!("{e:#}"),
        }

        if let Some(e) = engine.take_error() {
            eprintln!("audio stopped: {e}");
        }
    }
    engine.stop();
    Ok(())
}

fn execute(
    engine: &mut AudioEngine,
    bank: &PresetBank,
    level: &AtomicU32,
    cmd: ConsoleCommand,
) -> Result<()> {
    match cmd {
        ConsoleCommand::Update(update) => {
            let p = engine.update_parameters(&update);
            println!("{}", describe(&p));
        }
        ConsoleCommand::Preset(name) => {
            apply_preset(engine, bank, &name)?;
            println!("{}", describe(&engine.parameters()));
        }
        ConsoleCommand::Input(sel) => {
            engine.set_input_device(sel);
            if engine.state() == EngineState::Running {
                println!("input change applies after stop/start");
            }
        }
        ConsoleCommand::Output(sel) => {
            engine.set_output_device(sel);
            if engine.state() == EngineState::Running {
                println!("output change applies after stop/start");
            }
        }
        ConsoleCommand::Start => {
            engine.start()?;
            print_status(engine);
        }
        ConsoleCommand::Stop => {
            engine.stop();
            println!("stopped");
        }
        ConsoleCommand::Level => {
            let rms = if engine.state() == EngineState::Running {
                f32::from_bits(level.load(Ordering::Relaxed))
            } else {
                0.0
            };
            println!("{} {:.0}", level_bar(rms / LEVEL_FULL_SCALE, 30), rms);
        }
        ConsoleCommand::Status => print_status(engine),
        ConsoleCommand::Help => println!("{HELP}"),
        ConsoleCommand::Quit => {}
    }
    Ok(())
}

fn print_status(engine: &AudioEngine) {
    let devices = engine.control().devices();
    let name_of = |sel: &DeviceSelector, direction| match engine.registry().resolve(sel, direction) {
        Ok(d) => format!("{sel} -> {}", d.name),
        Err(e) => format!("{sel} ({e})"),
    };
    println!(
        "{:?} on {} backend: input {}, output {}, {} blocks",
        engine.state(),
        engine.backend_name(),
        name_of(&devices.input, Direction::Input),
        name_of(&devices.output, Direction::Output),
        engine.blocks_processed()
    );
    println!("{}", describe(&engine.parameters()));
}

fn describe(p: &vchange_engine::EffectParameters) -> String {
    let on = |b: bool| if b { "on" } else { "off" };
    format!(
        "pitch {:+.1} st, highpass {:.0} Hz, lowpass {:.0} Hz, reverb {} (room {:.2}), chorus {}, delay {}",
        p.pitch_semitones(),
        p.high_pass_hz(),
        p.low_pass_hz(),
        on(p.reverb_on()),
        p.room_size(),
        on(p.chorus_on()),
        on(p.delay_on())
    )
}

fn load_bank(config: &EngineConfig) -> PresetBank {
    let path = config.presets_path();
    match PresetBank::load(&path) {
        Ok(bank) => bank,
        Err(e) => {
            log::warn!("ignoring preset file: {e:#}");
            PresetBank::new()
        }
    }
}

/// Presets replace the whole parameter set rather than merging into it.
fn apply_preset(engine: &AudioEngine, bank: &PresetBank, name: &str) -> Result<()> {
    let Some(record) = bank.get(name) else {
        bail!("no preset named '{name}'");
    };
    engine.control().replace_parameters(&record.to_update());
    log::info!("applied preset '{name}'");
    Ok(())
}

fn config_command(config: &EngineConfig, path: &Path, init: bool) -> Result<()> {
    println!("# {}", path.display());
    print!("{}", serde_yaml::to_string(config).context("failed to render config")?);
    if init {
        if path.exists() {
            bail!("{} already exists", path.display());
        }
        config::save_config(config, path)?;
        println!("# written");
    }
    Ok(())
}

fn presets_command(config: &EngineConfig, action: PresetAction) -> Result<()> {
    let path = config.presets_path();
    match action {
        PresetAction::List => {
            let bank = PresetBank::load(&path)?;
            for name in bank.names() {
                let tag = if PresetBank::is_builtin(&name) { " (built-in)" } else { "" };
                println!("{name}{tag}");
            }
        }
        PresetAction::Show { name } => {
            let bank = PresetBank::load(&path)?;
            let Some(record) = bank.get(&name) else {
                bail!("no preset named '{name}'");
            };
            let params = vchange_engine::EffectParameters::default().merged(&record.to_update());
            println!("{name}: {}", describe(&params));
        }
        PresetAction::Add { name, effects } => {
            let mut bank = PresetBank::load(&path)?;
            bank.add(&name, effects.to_record())?;
            bank.save(&path)?;
            println!("saved '{}' to {}", name.trim(), path.display());
        }
        PresetAction::Remove { name } => {
            let mut bank = PresetBank::load(&path)?;
            bank.remove(&name)?;
            bank.save(&path)?;
            println!("removed '{name}'");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_run_flags() {
        let cli = Cli::parse_from([
            "vchange", "--backend", "virtual", "run", "--input", "2", "--pitch", "-7", "--reverb",
            "--room-size", "0.4",
        ]);
        assert!(cli.backend == BackendKind::Virtual);
        let Command::Run(args) = cli.cmd else {
            panic!("expected run");
        };
        assert_eq!(args.input, Some(DeviceSelector::Index(2)));
        let update = args.effects.to_update();
        assert_eq!(update.pitch, Some(-7.0));
        assert_eq!(update.reverb_on, Some(true));
        assert_eq!(update.room_size, Some(0.4));
        assert_eq!(update.chorus_on, None);
    }

    #[test]
    fn preset_add_builds_full_record() {
        let cli = Cli::parse_from(["vchange", "presets", "add", "Robot", "--chorus", "--delay"]);
        let Command::Presets { action: PresetAction::Add { name, effects } } = cli.cmd else {
            panic!("expected presets add");
        };
        assert_eq!(name, "Robot");
        let rec = effects.to_record();
        assert!(rec.chorus_on && rec.delay_on && !rec.reverb_on);
        assert_eq!(rec.low_pass, PresetRecord::default().low_pass);
    }

    #[test]
    fn config_init_writes_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vchange").join("config.yaml");
        let config = EngineConfig::default();
        config_command(&config, &path, true).unwrap();
        assert_eq!(config::load_config(&path), config);
        assert!(config_command(&config, &path, true).is_err());
    }

    #[test]
    fn preset_replaces_parameters() {
        let engine = AudioEngine::new(Arc::new(VirtualBackend::builder().pace(None).build()));
        engine.update_parameters(&ParameterUpdate { chorus_on: Some(true), ..Default::default() });
        apply_preset(&engine, &PresetBank::new(), "deep voice").unwrap();
        let p = engine.parameters();
        assert_eq!(p.pitch_semitones(), -8.0);
        assert!(!p.chorus_on());
        assert!(apply_preset(&engine, &PresetBank::new(), "nope").is_err());
    }
}
