use chartbridge_core::{BridgeConfig, LogConfig, init_tracing};
use chartbridge_ipc::headless::HeadlessSurface;
use chartbridge_ipc::stdio::serve;
use std::env;
use std::error::Error;
use std::io;

struct Config {
    json_logs: bool,
    fail_on: Vec<String>,
    responses: Vec<(String, String)>,
}

fn print_usage() {
    eprintln!(
        "Usage: chartbridge_host [--log-json] [--fail-on <marker>]... [--respond <script>=<value>]...\n\
         \n\
         Serves a headless render surface over stdin/stdout using line-delimited JSON frames.\n\
         Logs go to stderr; the filter comes from CHARTBRIDGE_LOG or RUST_LOG.\n\
         \n\
         Example:\n\
           chartbridge_host --fail-on explode --respond 'getValue()=42'"
    );
}

fn parse_args() -> Result<Config, String> {
    let mut args = env::args().skip(1);
    let mut config = Config {
        json_logs: false,
        fail_on: Vec::new(),
        responses: Vec::new(),
    };

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--log-json" => config.json_logs = true,
            "--fail-on" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--fail-on requires a value".to_string())?;
                config.fail_on.push(value);
            }
            "--respond" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--respond requires a value".to_string())?;
                let (script, answer) = value
                    .split_once('=')
                    .ok_or_else(|| "--respond expects <script>=<value>".to_string())?;
                config.responses.push((script.to_string(), answer.to_string()));
            }
            "-h" | "--help" => {
                print_usage();
                std::process::exit(0);
            }
            other => return Err(format!("unexpected argument: {other}")),
        }
    }

    Ok(config)
}

fn run() -> Result<(), Box<dyn Error>> {
    let cfg = parse_args().inspect_err(|_| {
        print_usage();
    })?;

    let log = LogConfig::from_bridge(&BridgeConfig::from_env()).json(cfg.json_logs);
    init_tracing(&log)?;

    let surface = HeadlessSurface::new();
    let page = surface.handle();
    for marker in cfg.fail_on {
        page.fail_on(marker);
    }
    for (script, answer) in cfg.responses {
        page.respond(script, answer);
    }

    let state = serve(surface, io::stdin().lock(), io::stdout())?;
    tracing::debug!(?state, "host finished");
    Ok(())
}

fn main() {
    if let Err(err) = run() {
        eprintln!("chartbridge_host error: {err}");
        std::process::exit(1);
    }
}
