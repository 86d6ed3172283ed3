//! Line commands accepted on stdin while `vchange run` is active.

use anyhow::{anyhow, bail, Context, Result};
use vchange_engine::{DeviceSelector, ParameterUpdate};

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Update(ParameterUpdate),
    Preset(String),
    Input(DeviceSelector),
    Output(DeviceSelector),
    Start,
    Stop,
    Level,
    Status,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  pitch <semitones>     -12..12
  highpass <hz>         0..2000, 0 disables
  lowpass <hz>          500..22000, 22000 disables
  reverb on|off
  room <0..1>           reverb room size
  chorus on|off
  delay on|off
  preset <name>         apply a preset
  input <sel>           device index, name, or 'default' (applies on restart)
  output <sel>
  start | stop
  level | status
  help | quit";

/// Parse one console line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<ConsoleCommand>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((w, r)) => (w, r.trim()),
        None => (line, ""),
    };

    let cmd = match word.to_ascii_lowercase().as_str() {
        "pitch" => ConsoleCommand::Update(ParameterUpdate {
            pitch: Some(number(word, rest)?),
            ..ParameterUpdate::default()
        }),
        "highpass" | "hp" => ConsoleCommand::Update(ParameterUpdate {
            high_pass: Some(number(word, rest)?),
            ..ParameterUpdate::default()
        }),
        "lowpass" | "lp" => ConsoleCommand::Update(ParameterUpdate {
            low_pass: Some(number(word, rest)?),
            ..ParameterUpdate::default()
        }),
        "room" => ConsoleCommand::Update(ParameterUpdate {
            room_size: Some(number(word, rest)?),
            ..ParameterUpdate::default()
        }),
        "reverb" => ConsoleCommand::Update(ParameterUpdate {
            reverb_on: Some(switch(word, rest)?),
            ..ParameterUpdate::default()
        }),
        "chorus" => ConsoleCommand::Update(ParameterUpdate {
            chorus_on: Some(switch(word, rest)?),
            ..ParameterUpdate::default()
        }),
        "delay" => ConsoleCommand::Update(ParameterUpdate {
            delay_on: Some(switch(word, rest)?),
            ..ParameterUpdate::default()
        }),
        "preset" => {
            if rest.is_empty() {
                bail!("usage: preset <name>");
            }
            ConsoleCommand::Preset(rest.to_string())
        }
        "input" => ConsoleCommand::Input(DeviceSelector::from(rest)),
        "output" => ConsoleCommand::Output(DeviceSelector::from(rest)),
        "start" => ConsoleCommand::Start,
        "stop" => ConsoleCommand::Stop,
        "level" => ConsoleCommand::Level,
        "status" => ConsoleCommand::Status,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" | "q" => ConsoleCommand::Quit,
        other => bail!("unknown command '{other}' (try 'help')"),
    };
    Ok(Some(cmd))
}

fn number(word: &str, arg: &str) -> Result<f32> {
    if arg.is_empty() {
        bail!("usage: {word} <value>");
    }
    let value: f32 = arg
        .parse()
        .with_context(|| format!("{word}: '{arg}' is not a number"))?;
    if !value.is_finite() {
        bail!("{word}: value must be finite");
    }
    Ok(value)
}

fn switch(word: &str, arg: &str) -> Result<bool> {
    match arg.to_ascii_lowercase().as_str() {
        "on" | "1" | "true" | "yes" => Ok(true),
        "off" | "0" | "false" | "no" => Ok(false),
        _ => Err(anyhow!("usage: {word} on|off")),
    }
}

/// Render a level as a fixed-width bar; `fraction` is clamped to [0, 1].
pub fn level_bar(fraction: f32, width: usize) -> String {
    let filled = (fraction.clamp(0.0, 1.0) * width as f32).round() as usize;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}
