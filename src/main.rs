use std::path::PathBuf;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use bskytree::RunOptions;

const USAGE: &str = "bskytree: Lay out a Bluesky thread and the threads it quotes.

Usage: bskytree [--json] [--config <path>] <post-url|handle/rkey|at-uri>

  --json               Print the positioned forest as JSON
  --config <path>      Read configuration from <path>
  --version, -V        Show version and exit
  --help,    -h        Show this help message";

enum Command {
    Run(RunOptions),
    Exit,
}

fn main() {
    let command = match parse_args(std::env::args().skip(1)) {
        Ok(command) => command,
        Err(message) => {
            eprintln!("error: {message}\n\n{USAGE}");
            std::process::exit(2);
        }
    };
    let Command::Run(options) = command else {
        return;
    };

    init_tracing();
    if let Err(err) = bskytree::run(options) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Command, String> {
    let mut options = RunOptions::default();
    let mut input: Option<String> = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("bskytree {}", bskytree::VERSION);
                return Ok(Command::Exit);
            }
            "--help" | "-h" => {
                println!("{USAGE}");
                return Ok(Command::Exit);
            }
            "--json" => options.json = true,
            "--config" => {
                let path = args
                    .next()
                    .ok_or_else(|| "--config needs a path".to_string())?;
                options.config_file = Some(PathBuf::from(path));
            }
            flag if flag.starts_with("--") => return Err(format!("unknown flag {flag}")),
            value => {
                if input.replace(value.to_string()).is_some() {
                    return Err("expected a single post reference".to_string());
                }
            }
        }
    }
    options.input = input.ok_or_else(|| "missing post reference".to_string())?;
    Ok(Command::Run(options))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
