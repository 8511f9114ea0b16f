//! `eshet`: command-line ESHET client.
//!
//! The target server comes from the `ESHET_SERVER` environment variable
//! (`host[:port]`, default `localhost:11236`). Arguments are JSON; replies
//! are printed as JSON, with the bare word `unknown` for Unknown states.
//! Exits 1 on any Error reply or client-side failure.

mod json;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use eshet::{Client, Error, Payload, StateValue};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::json::{parse_arg, payload_to_string};

#[derive(Parser)]
#[command(name = "eshet", about = "ESHET command-line client", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Call an action.
    Call {
        path: String,
        /// JSON arguments, packed into an argument list.
        args: Vec<String>,
    },
    /// Listen to an event, printing each notification.
    Listen { path: String },
    /// Observe a state, printing the current value and each change.
    Observe { path: String },
    /// Get a property.
    Get { path: String },
    /// Set a property.
    Set { path: String, value: String },
    /// Own a state: register it, then publish one JSON value per stdin
    /// line (the line `unknown` publishes Unknown).
    Publish {
        path: String,
        /// Initial value to publish after registering.
        initial: Option<String>,
    },
    /// Own an event: emit VALUE once, or one JSON value per stdin line.
    Emit {
        path: String,
        value: Option<String>,
    },
}

/// Split `ESHET_SERVER` (`host[:port]`) into an address, with defaults.
fn server_from_env() -> anyhow::Result<(String, u16)> {
    match std::env::var("ESHET_SERVER") {
        Ok(hostport) => match hostport.split_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse()
                    .with_context(|| format!("bad port in ESHET_SERVER: {hostport:?}"))?;
                Ok((host.to_owned(), port))
            }
            None => Ok((hostport, eshet::DEFAULT_PORT)),
        },
        Err(_) => Ok(("localhost".to_owned(), eshet::DEFAULT_PORT)),
    }
}

fn show_error(error: Error) -> anyhow::Error {
    match error {
        Error::Reply(payload) => anyhow::anyhow!("error reply: {}", payload_to_string(&payload)),
        Error::Closed => anyhow::anyhow!("client closed"),
    }
}

fn print_state(value: &StateValue) {
    match value {
        StateValue::Known(payload, _) => println!("{}", payload_to_string(payload)),
        StateValue::Unknown(_) => println!("unknown"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let (host, port) = server_from_env()?;
    let client = Client::connect(host, port);

    match cli.command {
        Cmd::Call { path, args } => {
            let args = args
                .iter()
                .map(|arg| parse_arg(arg))
                .collect::<anyhow::Result<Vec<Payload>>>()?;
            let result = client
                .action_call(path, args)
                .await
                .map_err(show_error)?;
            println!("{}", payload_to_string(&result));
        }
        Cmd::Listen { path } => {
            let mut events = client.event_listen(path).await.map_err(show_error)?;
            while let Some(value) = events.recv().await {
                println!("{}", payload_to_string(&value));
            }
            bail!("client stopped");
        }
        Cmd::Observe { path } => {
            let (value, mut updates) = client.state_observe(path).await.map_err(show_error)?;
            print_state(&value);
            while let Some(value) = updates.recv().await {
                print_state(&value);
            }
            bail!("client stopped");
        }
        Cmd::Get { path } => {
            let value = client.get(path).await.map_err(show_error)?;
            println!("{}", payload_to_string(&value));
        }
        Cmd::Set { path, value } => {
            client
                .set(path, parse_arg(&value)?)
                .await
                .map_err(show_error)?;
        }
        Cmd::Publish { path, initial } => {
            client.state_register(path.as_str()).await.map_err(show_error)?;
            if let Some(initial) = initial {
                client
                    .state_changed(path.as_str(), parse_arg(&initial)?)
                    .await
                    .map_err(show_error)?;
            }
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Some(line) = lines.next_line().await? {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "unknown" {
                    client.state_unknown(path.as_str()).await.map_err(show_error)?;
                } else {
                    client
                        .state_changed(path.as_str(), parse_arg(line)?)
                        .await
                        .map_err(show_error)?;
                }
            }
        }
        Cmd::Emit { path, value } => {
            client.event_register(path.as_str()).await.map_err(show_error)?;
            if let Some(value) = value {
                client
                    .event_emit(path.as_str(), parse_arg(&value)?)
                    .await
                    .map_err(show_error)?;
            } else {
                let mut lines = BufReader::new(tokio::io::stdin()).lines();
                while let Some(line) = lines.next_line().await? {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    client
                        .event_emit(path.as_str(), parse_arg(line)?)
                        .await
                        .map_err(show_error)?;
                }
            }
        }
    }

    client.exit();
    Ok(())
}
