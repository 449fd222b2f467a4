use std::error::Error;
use std::process;
use std::time::{Duration, Instant};

use clap::Parser;
use crossbeam::channel::{self, Sender};
use log::LevelFilter;
use serde_json::Value;
use simplelog::{Config as LogConfig, SimpleLogger};

use effectpanel_rs::client::{ClientChannel, ClientHandler, ClientRegistry};
use effectpanel_rs::envelope::{CommandRequest, CommandResult, Envelope, COMMAND_HANDLER};

/// Send one command to an effect panel and print the result.
#[derive(Parser, Debug)]
struct Args {
    /// Device address.
    device: String,
    /// Control id.
    control: String,
    /// Value, as JSON (`1500`, `true`, `"25,25,25"`); bare words are sent as strings.
    value: String,
    /// Command WebSocket URL.
    #[arg(long, default_value = "ws://localhost:4567/command")]
    url: String,
    /// Handler name to address.
    #[arg(long, default_value = COMMAND_HANDLER)]
    handler: String,
    /// Seconds to wait for a connection and a result.
    #[arg(long, default_value_t = 10)]
    timeout: u64,
}

/// Passes results on to the main thread.
struct Forward(Sender<CommandResult>);

impl ClientHandler for Forward {
    fn process(&mut self, envelope: &Envelope) {
        if let Some(result) = CommandResult::from_envelope(envelope) {
            self.0.send(result).ok();
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    SimpleLogger::init(LevelFilter::Warn, LogConfig::default())?;

    let value = serde_json::from_str(&args.value).unwrap_or(Value::String(args.value.clone()));
    let request = CommandRequest::new(&args.handler, args.device.as_str().into(), &args.control, value);

    let (sender, results) = channel::unbounded();
    let mut registry = ClientRegistry::new();
    registry.register(args.handler.clone(), Box::new(Forward(sender)));
    let client = ClientChannel::start(&args.url, registry)?;

    let deadline = Instant::now() + Duration::from_secs(args.timeout);
    while !client.is_connected() {
        if Instant::now() > deadline {
            eprintln!("Unable to connect to {}", args.url);
            process::exit(2);
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    client.send(&request)?;

    match results.recv_deadline(deadline) {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.is_ok() {
                process::exit(1);
            }
        }
        Err(_) => {
            eprintln!("No result within {} s", args.timeout);
            process::exit(2);
        }
    }

    Ok(())
}
