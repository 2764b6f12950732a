//! Polls the agent's control API and prints the current default gateway.
//!
//! Handy for watching a failover happen from another terminal:
//!
//! ```text
//! $ uplink-gwcli --agent-url http://localhost:50051
//! eth1
//! eth1
//! usb0
//! ```

use std::thread;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

/// Default-gateway poller.
#[derive(Parser, Debug)]
#[command(name = "uplink-gwcli", about = "Poll the uplink-agent control API")]
struct Cli {
    /// Base URL of the agent's control API.
    #[arg(long, default_value = "http://localhost:50051")]
    agent_url: String,

    /// Poll interval in seconds.
    #[arg(long, default_value_t = 5)]
    interval: u64,

    /// Query once and exit.
    #[arg(long, default_value_t = false)]
    once: bool,
}

#[derive(Debug, Deserialize)]
struct DefaultGwResponse {
    default_gw_interface: String,
}

fn main() {
    let cli = Cli::parse();
    let url = format!(
        "{}/v1/default-gateway",
        cli.agent_url.trim_end_matches('/')
    );

    loop {
        match ureq::get(&url).call() {
            Ok(mut response) => match response.body_mut().read_json::<DefaultGwResponse>() {
                Ok(body) => println!("{}", body.default_gw_interface),
                Err(err) => eprintln!("malformed response: {err}"),
            },
            Err(err) => eprintln!("query failed: {err}"),
        }
        if cli.once {
            break;
        }
        thread::sleep(Duration::from_secs(cli.interval));
    }
}
