//! Prints the local clock offset against an SNTP server
//!
//! ```
//! cargo run --features cli -- -s pool.ntp.org -p 123
//! ```
//!
//! Options:
//! - `-s`/`--server` - server hostname, `host:port` is accepted too (default: `SNTP_SERVER` or `time.nist.gov`)
//! - `-p`/`--port` - server port (default: `123`)
//! - `-t`/`--timeout-ms` - reply timeout, `0` waits forever (default: `10000`)
//! - `-w`/`--watch` - keep querying every given number of milliseconds
//! - `-v`/`--verbose` - trace every packet
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use atomic_sntp::utils::to_datetime;
use atomic_sntp::{Client, Config, NtpResult};
use clap::Parser;

#[derive(Parser)]
#[command(name = "sntp-offset")]
#[command(version)]
struct Cli {
    /// SNTP server hostname
    #[arg(short, long)]
    server: Option<String>,

    /// SNTP server port
    #[arg(short, long)]
    port: Option<u16>,

    /// Reply timeout in milliseconds
    #[arg(short, long = "timeout-ms")]
    timeout_ms: Option<u64>,

    /// Query period in milliseconds
    #[arg(short, long)]
    watch: Option<u64>,

    /// Log every packet
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose || cfg!(debug_assertions) {
        log::Level::Trace
    } else {
        log::Level::Info
    };
    if let Err(err) = simple_logger::init_with_level(level) {
        eprintln!("Unable to initialize logger: {err}");
    }

    let config = match config(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid settings: {err}");
            return ExitCode::FAILURE;
        }
    };

    let client = match Client::open(config.timeout) {
        Ok(client) => client,
        Err(err) => {
            eprintln!("Unable to open SNTP client: {err}");
            return ExitCode::FAILURE;
        }
    };

    loop {
        let status = match client.query(&config.server_host, config.server_port) {
            Ok(result) => {
                report(&client, &result);
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!(
                    "Unable to receive time from {}:{}: {err}",
                    config.server_host, config.server_port
                );
                ExitCode::FAILURE
            }
        };

        match cli.watch {
            Some(period) if period > 0 => {
                thread::sleep(Duration::from_millis(period));
            }
            _ => return status,
        }
    }
}

fn config(cli: &Cli) -> atomic_sntp::Result<Config> {
    let mut config = Config::from_env()?;

    if let Some(server) = &cli.server {
        let (host, port) = Config::parse_server(server)?;
        config = config.with_server(host, port);
    }
    if let Some(port) = cli.port {
        let host = config.server_host.clone();
        config = config.with_server(host, port);
    }
    if let Some(timeout) = cli.timeout_ms {
        config = config.with_timeout(Duration::from_millis(timeout));
    }

    Ok(config)
}

fn report(client: &Client, result: &NtpResult) {
    println!(
        "offset: {} ms, roundtrip: {} ms, stratum: {}, reference: {}",
        result.offset(),
        result.roundtrip(),
        result.stratum(),
        String::from_utf8_lossy(&result.reference_identifier).trim_end_matches('\0')
    );

    if let Ok(date) = client.current_time().and_then(to_datetime) {
        println!("network time: {}", date.to_rfc3339());
    }
}
