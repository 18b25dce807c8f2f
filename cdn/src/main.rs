mod commands;
mod error;

use std::path::PathBuf;

use cdn_archive::{Config, Headers};
use structopt::clap::AppSettings::*;
use structopt::StructOpt;

use error::{Error, Result};

fn parse_header(src: &str) -> std::result::Result<(String, String), Error> {
    match src.find(':') {
        Some(pos) if pos > 0 => Ok((
            src[..pos].trim().to_string(),
            src[pos + 1..].trim().to_string(),
        )),
        _ => Err(Error::InvalidHeader(src.to_string())),
    }
}

#[derive(Debug, StructOpt)]
enum Commands {
    #[structopt(name = "info", about = "Show an entry's location and attributes")]
    Info {
        #[structopt(help = "Archive id or URL path of the entry")]
        target: String,
    },

    #[structopt(
        name = "validate",
        about = "Check stored content against its recorded digest"
    )]
    Validate {
        #[structopt(help = "Entries to check [default: every entry in the archive]")]
        ids: Vec<String>,
    },

    #[structopt(name = "eval", about = "Compile and evaluate access control rules")]
    Eval {
        #[structopt(help = "Rule statements, such as `r = user_id = 1`")]
        rules: Vec<String>,
    },

    #[structopt(name = "purge", about = "Remove expired quarantined entries")]
    Purge,

    #[structopt(name = "recover", about = "Restore a quarantined entry")]
    Recover {
        #[structopt(help = "Archive id of the quarantined entry")]
        id: String,
    },
}

#[derive(Debug, StructOpt)]
#[structopt(
    name = "cdn",
    about = "Inspect and maintain a CDN archive.",
    settings = &[SubcommandRequiredElseHelp, DisableHelpSubcommand, VersionlessSubcommands]
)]
struct CliOpts {
    #[structopt(
        short,
        long,
        parse(from_occurrences),
        help = "Show verbose output (repeat for more)",
        global = true
    )]
    verbose: u8,

    #[structopt(
        short,
        long,
        parse(from_os_str),
        help = "Path to the JSON configuration",
        global = true
    )]
    config: Option<PathBuf>,

    #[structopt(
        short = "H",
        long = "header",
        parse(try_from_str = parse_header),
        number_of_values = 1,
        help = "Request header as `Name: value`, may be repeated",
        global = true
    )]
    headers: Vec<(String, String)>,

    #[structopt(subcommand)]
    cmd: Commands,
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::from_path(&path).map_err(|source| Error::LoadConfig { path, source }),
        None => Ok(Config::default()),
    }
}

fn run(opts: CliOpts) -> Result<()> {
    let config = load_config(opts.config)?;
    let headers = opts.headers.into_iter().collect::<Headers>();

    match opts.cmd {
        Commands::Info { target } => commands::info(&config, &headers, &target),
        Commands::Validate { ids } => commands::validate(&config, &headers, ids),
        Commands::Eval { rules } => commands::eval(&config, &headers, &rules),
        Commands::Purge => commands::purge(&config),
        Commands::Recover { id } => commands::recover(&config, &headers, &id),
    }
}

fn main() {
    let opts = CliOpts::from_iter(wild::args_os());

    let level = match opts.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(opts) {
        eprintln!("Error: {}", e);
        let mut source = std::error::Error::source(&e);
        while let Some(cause) = source {
            eprintln!("  caused by: {}", cause);
            source = cause.source();
        }
        std::process::exit(1);
    }
}
