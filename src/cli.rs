//! Command-line interface and REPL

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use colored::*;
use parking_lot::Mutex;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;
use std::sync::Arc;

use micron_sync::port::is_unbind_name;
use micron_sync::{EditorModel, PortDirection, Preset, SendOutcome, Session};

/// How a whole patch is sent to the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PushMode {
    Nrpn,
    Sysex,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Ports,
    Input(String),
    Output(String),
    Channel(u8),
    Get(u16),
    Set(u16, i32),
    Name(String),
    Push(PushMode),
    Dump,
    Undo,
    Redo,
    Random(Option<f32>),
    LockPitch(bool),
    Save(Option<PathBuf>),
    Load(Option<PathBuf>),
    Show,
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();
        let args: Vec<&str> = rest.split_whitespace().collect();

        let command = match word.to_ascii_lowercase().as_str() {
            "ports" => Command::Ports,
            "in" => Command::Input(port_arg(rest)),
            "out" => Command::Output(port_arg(rest)),
            "channel" | "ch" => {
                let channel: u8 = parse_arg(&args, 0, "channel")?;
                if !(1..=16).contains(&channel) {
                    bail!("channel must be 1-16");
                }
                Command::Channel(channel)
            }
            "get" => Command::Get(parse_arg(&args, 0, "nrpn")?),
            "set" => Command::Set(parse_arg(&args, 0, "nrpn")?, parse_arg(&args, 1, "value")?),
            "name" => Command::Name(rest.to_string()),
            "push" => match args.first().copied() {
                Some("nrpn") => Command::Push(PushMode::Nrpn),
                Some("sysex") => Command::Push(PushMode::Sysex),
                _ => bail!("usage: push nrpn|sysex"),
            },
            "dump" => Command::Dump,
            "undo" | "u" => Command::Undo,
            "redo" | "r" => Command::Redo,
            "random" | "rand" => match args.first() {
                Some(amount) => {
                    let amount: f32 = amount.parse().context("amount must be a number")?;
                    if !(0.0..=1.0).contains(&amount) {
                        bail!("amount must be 0.0-1.0");
                    }
                    Command::Random(Some(amount))
                }
                None => Command::Random(None),
            },
            "lockpitch" => match args.first().copied() {
                Some("on") => Command::LockPitch(true),
                Some("off") => Command::LockPitch(false),
                _ => bail!("usage: lockpitch on|off"),
            },
            "save" => Command::Save(args.first().map(PathBuf::from)),
            "load" => Command::Load(args.first().map(PathBuf::from)),
            "show" => Command::Show,
            "help" | "?" => Command::Help,
            "quit" | "exit" | "q" => Command::Quit,
            other => bail!("unknown command '{}' (try 'help')", other),
        };
        Ok(Some(command))
    }
}

fn port_arg(rest: &str) -> String {
    if rest.is_empty() {
        "None".to_string()
    } else {
        rest.to_string()
    }
}

fn parse_arg<T: std::str::FromStr>(args: &[&str], index: usize, what: &str) -> Result<T> {
    let raw = args
        .get(index)
        .with_context(|| format!("missing {}", what))?;
    raw.parse()
        .map_err(|_| anyhow::anyhow!("invalid {}: {}", what, raw))
}

/// Interactive shell over a running session
pub struct Repl {
    session: Arc<Session>,
    editor: Arc<Mutex<EditorModel>>,
    state_file: PathBuf,
    runtime: tokio::runtime::Handle,
}

impl Repl {
    pub fn new(
        session: Arc<Session>,
        editor: Arc<Mutex<EditorModel>>,
        state_file: PathBuf,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        Self {
            session,
            editor,
            state_file,
            runtime,
        }
    }

    /// Read commands until `quit` or EOF; blocks the calling thread
    pub fn run(&self) -> Result<()> {
        let mut rl = DefaultEditor::new()?;
        println!("{}", "micron-sync ready, type 'help' for commands".cyan());

        loop {
            match rl.readline("micron> ") {
                Ok(line) => {
                    let _ = rl.add_history_entry(line.as_str());
                    match Command::parse(&line) {
                        Ok(Some(Command::Quit)) => break,
                        Ok(Some(command)) => {
                            if let Err(e) = self.execute(command) {
                                println!("{} {:#}", "error:".red().bold(), e);
                            }
                        }
                        Ok(None) => {}
                        Err(e) => println!("{} {}", "error:".red().bold(), e),
                    }
                }
                Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    pub fn execute(&self, command: Command) -> Result<()> {
        let engine = self.session.engine();
        match command {
            Command::Ports => self.print_ports()?,
            Command::Input(name) => self.bind(PortDirection::Input, &name)?,
            Command::Output(name) => self.bind(PortDirection::Output, &name)?,
            Command::Channel(channel) => {
                engine.set_channel(channel - 1);
                println!("Output channel {}", channel.to_string().green());
            }
            Command::Get(nrpn) => {
                let table = self.session.store().table();
                let descriptor = table
                    .by_nrpn(nrpn)
                    .with_context(|| format!("unknown NRPN {}", nrpn))?;
                let value = self.session.store().get(nrpn).unwrap_or(descriptor.default);
                println!(
                    "{} {} = {} {}",
                    nrpn.to_string().yellow(),
                    descriptor.name,
                    descriptor.format_value(value).green(),
                    format!("[{}..{}]", descriptor.min, descriptor.max).dimmed()
                );
            }
            Command::Set(nrpn, value) => {
                let stored = self.editor.lock().edit(nrpn, value)?;
                if stored != value {
                    println!("{} clamped to {}", value, stored.to_string().yellow());
                }
            }
            Command::Name(name) => {
                let mut editor = self.editor.lock();
                let stored = editor.set_program_name(&name);
                editor.commit_program_name();
                println!("Program name '{}'", stored.green());
            }
            Command::Push(PushMode::Nrpn) => {
                let report = engine.push_via_nrpn();
                println!(
                    "Sent {} of {} parameters",
                    report.queued.to_string().green(),
                    report.parameters
                );
            }
            Command::Push(PushMode::Sysex) => print_outcome("Patch dump", engine.push_via_sysex()),
            Command::Dump => print_outcome("Dump request", engine.request_dump()),
            Command::Undo => {
                if !self.editor.lock().undo() {
                    println!("{}", "Nothing to undo".dimmed());
                }
            }
            Command::Redo => {
                if !self.editor.lock().redo() {
                    println!("{}", "Nothing to redo".dimmed());
                }
            }
            Command::Random(amount) => {
                let mut editor = self.editor.lock();
                if let Some(amount) = amount {
                    editor.set_randomize_amount(amount);
                }
                let count = editor.randomize();
                println!(
                    "Randomized {} parameters (amount {:.2})",
                    count.to_string().green(),
                    editor.randomize_settings().amount
                );
            }
            Command::LockPitch(lock) => {
                self.editor.lock().set_lock_pitch(lock);
                println!("Pitch lock {}", if lock { "on".green() } else { "off".yellow() });
            }
            Command::Save(path) => {
                let path = path.unwrap_or_else(|| self.state_file.clone());
                let preset = self.session.capture_preset();
                self.runtime.block_on(preset.save(&path))?;
                println!("Saved '{}' to {}", preset.program_name(), path.display());
            }
            Command::Load(path) => {
                let path = path.unwrap_or_else(|| self.state_file.clone());
                let preset = self.runtime.block_on(Preset::load(&path))?;
                self.session.apply_preset(&preset)?;
                println!("Loaded '{}' from {}", preset.program_name().green(), path.display());
            }
            Command::Show => self.print_status(),
            Command::Help => print_help(),
            Command::Quit => {}
        }
        Ok(())
    }

    fn bind(&self, direction: PortDirection, name: &str) -> Result<()> {
        self.session.select_port(direction, name)?;
        if is_unbind_name(name) {
            println!("{} {}", direction, "unbound".yellow());
        } else {
            let bound = self
                .session
                .engine()
                .ports()
                .current_port(direction)
                .unwrap_or_default();
            println!("{} {}", direction, bound.green());
        }
        Ok(())
    }

    fn print_ports(&self) -> Result<()> {
        let ports = self.session.engine().ports();
        for (direction, title) in [
            (PortDirection::Input, "Input Ports:"),
            (PortDirection::Output, "Output Ports:"),
        ] {
            println!("\n{}", title.bold());
            let current = ports.current_port(direction);
            let names = ports.list_ports(direction)?;
            if names.is_empty() {
                println!("  {}", "No ports found".dimmed());
            }
            for name in names {
                if current.as_deref() == Some(name.as_str()) {
                    println!("  {} {}", "*".green(), name.bright_white());
                } else {
                    println!("    {}", name);
                }
            }
        }
        Ok(())
    }

    fn print_status(&self) {
        let engine = self.session.engine();
        let ports = engine.ports();
        let editor = self.editor.lock();
        let settings = editor.randomize_settings();
        let port = |direction: PortDirection| ports.current_port(direction).unwrap_or_else(|| "None".to_string());

        println!("Program:  {}", self.session.store().program_name().bright_white());
        println!("Input:    {}", port(PortDirection::Input));
        println!("Output:   {}", port(PortDirection::Output));
        println!("Channel:  {}", engine.channel() + 1);
        println!(
            "History:  {} steps (undo {}, redo {})",
            editor.history().len(),
            yes_no(editor.can_undo()),
            yes_no(editor.can_redo())
        );
        println!(
            "Random:   amount {:.2}, pitch lock {}",
            settings.amount,
            yes_no(settings.lock_pitch)
        );
    }
}

fn yes_no(flag: bool) -> ColoredString {
    if flag {
        "yes".green()
    } else {
        "no".dimmed()
    }
}

fn print_outcome(what: &str, outcome: SendOutcome) {
    match outcome {
        SendOutcome::Queued => println!("{} sent", what),
        SendOutcome::Unbound => println!("{} {}", what, "not sent: no output port".yellow()),
        SendOutcome::Dropped => println!("{} {}", what, "dropped: output queue full".red()),
    }
}

fn print_help() {
    println!("\n{}", "Commands:".bold());
    for (usage, text) in [
        ("ports", "list MIDI ports"),
        ("in <name>|None", "bind the input port"),
        ("out <name>|None", "bind the output port"),
        ("channel <1-16>", "set the output channel"),
        ("get <nrpn>", "show a parameter"),
        ("set <nrpn> <value>", "edit a parameter"),
        ("name <text>", "set the program name"),
        ("push nrpn|sysex", "send the whole patch"),
        ("dump", "request the device's patch"),
        ("undo / redo", "walk the edit history"),
        ("random [amount]", "randomize the patch"),
        ("lockpitch on|off", "keep oscillator pitch when randomizing"),
        ("save [file]", "save the session"),
        ("load [file]", "restore a session"),
        ("show", "session status"),
        ("quit", "exit"),
    ] {
        println!("  {:<22} {}", usage.cyan(), text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("  ").unwrap(), None);
        assert_eq!(Command::parse("set 800 3").unwrap(), Some(Command::Set(800, 3)));
        assert_eq!(Command::parse("set 694 -50").unwrap(), Some(Command::Set(694, -50)));
        assert_eq!(
            Command::parse("out USB MIDI 1").unwrap(),
            Some(Command::Output("USB MIDI 1".to_string()))
        );
        assert_eq!(Command::parse("in").unwrap(), Some(Command::Input("None".to_string())));
        assert_eq!(Command::parse("push sysex").unwrap(), Some(Command::Push(PushMode::Sysex)));
        assert_eq!(Command::parse("random").unwrap(), Some(Command::Random(None)));
        assert_eq!(Command::parse("random 0.5").unwrap(), Some(Command::Random(Some(0.5))));
        assert_eq!(Command::parse("lockpitch on").unwrap(), Some(Command::LockPitch(true)));
        assert_eq!(
            Command::parse("save my.json").unwrap(),
            Some(Command::Save(Some(PathBuf::from("my.json"))))
        );
        assert_eq!(Command::parse("QUIT").unwrap(), Some(Command::Quit));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        for line in ["channel 0", "channel 17", "set 800", "set x 1", "push", "random 2", "lockpitch", "frobnicate"] {
            assert!(Command::parse(line).is_err(), "accepted: {}", line);
        }
    }
}
