//! Interactive console for driving the touch adapters by hand.
//!
//! Supported slash-commands:
//!   /start | /stop            – subscribe / unsubscribe every adapter
//!   /publish on|off           – toggle live publishing
//!   /record on|off            – toggle session recording
//!   /dump on|off              – toggle dump buffering
//!   /write-dump               – flush the dump buffer now
//!   /buffer <secs>            – resize the dump buffer
//!   /touch <key> <value>      – raise a raw event on the bus
//!   /status [event]           – show adapter state
//!   /help                     – show this list
//!   /quit | /exit             – stop everything and exit

use colored::Colorize;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tactile_middleware::AdapterStatus;
use tactile_types::RawValue;

use crate::driver::TouchDriver;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Start,
    Stop,
    Publish(bool),
    Record(bool),
    Dump(bool),
    WriteDump,
    Buffer(f32),
    Touch { key: String, value: RawValue },
    Status(Option<String>),
    Quit,
}

/// Parse one console line.  The error is a user-facing message.
pub fn parse(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Err("empty command".to_string());
    };
    let args: Vec<&str> = words.collect();

    let command = match (head, args.as_slice()) {
        ("/help", []) => Command::Help,
        ("/start", []) => Command::Start,
        ("/stop", []) => Command::Stop,
        ("/publish", [flag]) => Command::Publish(parse_switch(flag)?),
        ("/record", [flag]) => Command::Record(parse_switch(flag)?),
        ("/dump", [flag]) => Command::Dump(parse_switch(flag)?),
        ("/write-dump", []) => Command::WriteDump,
        ("/buffer", [secs]) => Command::Buffer(
            secs.parse::<f32>()
                .map_err(|_| format!("'{secs}' is not a number of seconds"))?,
        ),
        ("/touch", [key, value]) => Command::Touch {
            key: key.to_string(),
            value: parse_raw_value(value),
        },
        ("/status", []) => Command::Status(None),
        ("/status", [event]) => Command::Status(Some(event.to_string())),
        ("/quit" | "/exit", []) => Command::Quit,
        _ => return Err(format!("unknown command '{}'", line.trim())),
    };
    Ok(command)
}

fn parse_switch(word: &str) -> Result<bool, String> {
    match word {
        "on" => Ok(true),
        "off" => Ok(false),
        other => Err(format!("expected 'on' or 'off', got '{other}'")),
    }
}

/// Interpret a typed value the way the bus would carry it.
pub fn parse_raw_value(word: &str) -> RawValue {
    if let Ok(v) = word.parse::<i64>() {
        RawValue::Int(v)
    } else if let Ok(v) = word.parse::<f64>() {
        RawValue::Float(v)
    } else if let Ok(v) = word.parse::<bool>() {
        RawValue::Bool(v)
    } else {
        RawValue::Text(word.to_string())
    }
}

/// Run the console until `/quit`, EOF, Ctrl-C, or `shutdown` is set.
pub fn run(driver: &TouchDriver, shutdown: Arc<AtomicBool>) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("{}: {}", "Console unavailable".red(), e);
            return;
        }
    };

    while !shutdown.load(Ordering::SeqCst) {
        let line = match editor.readline("tactile> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(line);

        match parse(line) {
            Ok(Command::Quit) => break,
            Ok(command) => execute(driver, command),
            Err(message) => println!(
                "{} {}. Type {} for available commands.",
                "Error:".red(),
                message,
                "/help".bold()
            ),
        }
    }
    println!("{}", "Goodbye.".green());
}

fn execute(driver: &TouchDriver, command: Command) {
    let registry = driver.registry();
    match command {
        Command::Help => print_help(),
        Command::Start => report(registry.start_all(), "adapters started"),
        Command::Stop => report(registry.stop_all(), "adapters stopped"),
        Command::Publish(on) => {
            registry.set_publishing(on);
            println!("  publishing {}", on_off(on));
        }
        Command::Record(on) => {
            registry.set_recording(on);
            println!("  recording {}", on_off(on));
        }
        Command::Dump(on) => {
            registry.set_dumping(on);
            println!("  dumping {}", on_off(on));
        }
        Command::WriteDump => {
            let stamp = Utc::now();
            match registry.write_dump(stamp) {
                Ok(count) => println!(
                    "  {} {} sample(s) dumped at {}",
                    "✓".green(),
                    count,
                    stamp.to_rfc3339().bold()
                ),
                Err(e) => println!("{}: {}", "Dump failed".red(), e),
            }
        }
        Command::Buffer(secs) => {
            for (name, effective) in apply_buffer(driver, secs) {
                println!("  {} dump buffer keeps {effective}s", name.bold());
            }
        }
        Command::Touch { key, value } => {
            let delivered = driver.bus().raise_event(&key, value);
            println!("  {} delivered to {} subscriber(s)", key.bold(), delivered);
        }
        Command::Status(None) => print_status(driver),
        Command::Status(Some(event)) => match registry.get(&event) {
            Some(managed) => print_adapter(&event, &managed.status()),
            None => println!("{} '{}'", "Unknown event:".red(), event.yellow()),
        },
        Command::Quit => {}
    }
}

/// Resize every dump buffer and return the durations the adapters kept.
fn apply_buffer(driver: &TouchDriver, secs: f32) -> Vec<(String, f32)> {
    driver.registry().set_buffer_duration(secs);
    driver
        .registry()
        .statuses()
        .into_iter()
        .map(|(name, status)| (name, status.buffer_duration_secs))
        .collect()
}

fn report(result: Result<(), tactile_types::BridgeError>, done: &str) {
    match result {
        Ok(()) => println!("  {} {}", "✓".green(), done),
        Err(e) => println!("{}: {}", "Error".red(), e),
    }
}

fn on_off(on: bool) -> colored::ColoredString {
    if on { "on".green() } else { "off".yellow() }
}

fn print_help() {
    println!();
    println!("{}", "Tactile Commands".bold().underline());
    println!("  {}            – subscribe every adapter", "/start".bold().cyan());
    println!("  {}             – unsubscribe every adapter", "/stop".bold().cyan());
    println!("  {}  – toggle live publishing", "/publish on|off".bold().cyan());
    println!("  {}   – toggle session recording", "/record on|off".bold().cyan());
    println!("  {}     – toggle dump buffering", "/dump on|off".bold().cyan());
    println!("  {}       – flush the dump buffer", "/write-dump".bold().cyan());
    println!("  {}   – resize the dump buffer", "/buffer <secs>".bold().cyan());
    println!("  {} – raise a raw bus event", "/touch <key> <v>".bold().cyan());
    println!("  {}   – show adapter state", "/status [event]".bold().cyan());
    println!("  {}     – exit", "/quit  /exit".bold().cyan());
    println!();
}

fn print_adapter(name: &str, status: &AdapterStatus) {
    let state = if status.started { "running".green() } else { "idle".dimmed() };
    println!(
        "  {:<12} {:<8} publish={} record={} dump={} buffer={}s",
        name.bold(),
        state,
        on_off(status.publishing),
        on_off(status.recording),
        on_off(status.dumping),
        status.buffer_duration_secs
    );
}

fn print_status(driver: &TouchDriver) {
    println!("{}", "Adapters".bold().underline());
    for (name, status) in driver.registry().statuses() {
        print_adapter(&name, &status);
    }
    let listeners: Vec<String> = driver
        .listener_counts()
        .into_iter()
        .map(|(kind, count)| format!("{kind}={count}"))
        .collect();
    println!("  listeners: {}", listeners.join(" "));

    let recorder = driver.recorder();
    let session = match recorder.current_session() {
        Some(id) => match recorder.session_label(id) {
            Ok(Some(label)) => format!("#{id} ({label})").green(),
            _ => format!("#{id}").green(),
        },
        None => "off".yellow(),
    };
    println!(
        "  bus subscriptions: {}  buffered samples: {}  recording session: {}",
        driver.bus().subscription_count(),
        recorder.buffered_len(),
        session
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::time::Duration;
    use tactile_recorder::GlobalRecorder;

    #[test]
    fn parses_switches() {
        assert_eq!(parse("/publish on"), Ok(Command::Publish(true)));
        assert_eq!(parse("/record off"), Ok(Command::Record(false)));
        assert_eq!(parse("  /dump   on "), Ok(Command::Dump(true)));
        assert!(parse("/dump maybe").is_err());
        assert!(parse("/dump").is_err());
    }

    #[test]
    fn parses_touch_and_buffer() {
        assert_eq!(
            parse("/touch RightBumperPressed 1"),
            Ok(Command::Touch {
                key: "RightBumperPressed".to_string(),
                value: RawValue::Int(1)
            })
        );
        assert_eq!(parse("/buffer 2.5"), Ok(Command::Buffer(2.5)));
        assert!(parse("/buffer soon").is_err());
    }

    #[test]
    fn unknown_and_extra_arguments_are_rejected() {
        assert!(parse("/start now").is_err());
        assert!(parse("/launch").is_err());
        assert_eq!(parse("/exit"), Ok(Command::Quit));
    }

    #[test]
    fn status_takes_an_optional_event() {
        assert_eq!(parse("/status"), Ok(Command::Status(None)));
        assert_eq!(parse("/status bumper"), Ok(Command::Status(Some("bumper".to_string()))));
        assert!(parse("/status bumper head_touch").is_err());
    }

    #[test]
    fn buffer_reports_effective_duration() {
        let recorder = GlobalRecorder::open_in_memory().expect("in-memory db");
        let driver = TouchDriver::build(&Config::default(), recorder);

        let kept = apply_buffer(&driver, -1.0);
        assert_eq!(kept.len(), 3);
        assert!(kept.iter().all(|(_, secs)| *secs == 10.0));

        let kept = apply_buffer(&driver, 2.5);
        assert!(kept.iter().all(|(_, secs)| *secs == 2.5));
        assert_eq!(driver.recorder().buffer_duration("bumper"), Duration::from_secs_f32(2.5));
    }

    #[test]
    fn raw_values_follow_bus_types() {
        assert_eq!(parse_raw_value("0"), RawValue::Int(0));
        assert_eq!(parse_raw_value("0.75"), RawValue::Float(0.75));
        assert_eq!(parse_raw_value("true"), RawValue::Bool(true));
        assert_eq!(parse_raw_value("pressed"), RawValue::Text("pressed".to_string()));
    }
}
