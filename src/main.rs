//! tunesync: keeps a Plex music library's metadata and playlists in step with
//! an Apple Music library.

mod backends;
mod catalog;
mod change_log;
mod config;
mod credentials;
mod differ;
mod interactive;
mod path_normalizer;
mod resolver;
mod sync;
#[cfg(test)]
mod test_support;

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::{error, info};

use crate::backends::apple_music_db::AppleMusicDbLibrary;
use crate::backends::apple_music_xml::AppleMusicXmlLibrary;
use crate::backends::plex::{PlexClient, PlexConnection};
use crate::backends::SourceLibrary;
use crate::catalog::TrackIdentity;
use crate::change_log::ChangeLog;
use crate::config::{Config, SourceSelection};
use crate::path_normalizer::PathConvention;
use crate::sync::{CleanScope, SyncEngine};

#[derive(Debug, Parser)]
#[command(name = "tunesync", version, about = "Sync Plex music metadata with Apple Music")]
struct Cli {
    /// Config file path (defaults to the per-user config directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Clean metadata for all tracks, artist by artist.
    CleanAll {
        /// Skip the per-artist prompts and clean the whole library.
        #[arg(long)]
        yes: bool,
    },
    /// Clean metadata for tracks by a specific artist.
    CleanArtist {
        #[arg(long, value_parser = non_blank)]
        name: String,
    },
    /// Sync a playlist from Apple Music to Plex.
    SyncPlaylist {
        #[arg(long)]
        name: String,
    },
    /// Show change log statistics.
    Stats,
    /// Show every recorded change for one Plex rating key.
    History {
        #[arg(long)]
        identity: String,
    },
    /// Store the Plex token in the OS keyring.
    SetToken {
        #[arg(long)]
        token: String,
    },
}

fn non_blank(value: &str) -> Result<String, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("value cannot be empty".to_string());
    }
    Ok(trimmed.to_string())
}

fn init_logging(verbose: bool) {
    let mut clog = colog::default_builder();
    clog.filter(
        None,
        if verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        },
    );
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));
}

fn load_config(path: Option<PathBuf>) -> Result<Config, String> {
    let path = path.unwrap_or_else(config::default_config_path);
    let config = config::load_or_create(&path)?;
    let config = config::apply_env_overrides(config, |key| std::env::var(key).ok())?;
    Ok(config::sanitize_config(config))
}

fn open_source_library(config: &Config) -> Result<Box<dyn SourceLibrary>, String> {
    let working_dir = std::env::current_dir()
        .map_err(|err| format!("Failed to read working directory: {err}"))?;
    let convention = PathConvention::host();
    match config.source_selection(&working_dir) {
        Some(SourceSelection::Xml(path)) => {
            info!("Using Apple Music XML library: {}", path.display());
            Ok(Box::new(AppleMusicXmlLibrary::load(&path, convention)?))
        }
        Some(SourceSelection::Database(path)) => {
            Ok(Box::new(AppleMusicDbLibrary::open(&path, convention)?))
        }
        None => Err(
            "No source library configured. Set [source] xml_path or library_path, SOURCE_LIBRARY_XML, or place an XML export in the working directory."
                .to_string(),
        ),
    }
}

fn connect_plex(config: &Config) -> Result<PlexClient, String> {
    let token = credentials::resolve_plex_token(config.plex.token.as_deref(), &config.plex.url)?
        .ok_or_else(|| {
            "No Plex token found. Set PLEX_TOKEN or run `tunesync set-token --token <TOKEN>`."
                .to_string()
        })?;
    PlexClient::connect(PlexConnection {
        url: config.plex.url.clone(),
        token,
        section_id: config.plex.section_id,
    })
}

fn open_change_log(config: &Config) -> Result<ChangeLog, String> {
    let path = config.change_log_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| {
            format!("Failed to create data directory {}: {err}", parent.display())
        })?;
    }
    ChangeLog::open(&path)
        .map_err(|err| format!("Failed to open change log {}: {err}", path.display()))
}

/// Commands that only need the change log or keyring.
fn run_offline_command(config: &Config, command: &Command) -> Option<Result<(), String>> {
    let mut stdout = std::io::stdout();
    let result = match command {
        Command::Stats => open_change_log(config).and_then(|change_log| {
            let stats = change_log
                .stats()
                .map_err(|err| format!("Failed to read change log statistics: {err}"))?;
            interactive::write_change_log_stats(&mut stdout, &stats)
                .map_err(|err| format!("Failed to write output: {err}"))
        }),
        Command::History { identity } => open_change_log(config).and_then(|change_log| {
            let entries = change_log
                .entries_for(&TrackIdentity::new(identity.as_str()))
                .map_err(|err| format!("Failed to read change history: {err}"))?;
            interactive::write_history(&mut stdout, &entries)
                .map_err(|err| format!("Failed to write output: {err}"))
        }),
        Command::SetToken { token } => {
            credentials::PlexTokenStore::for_server(&config.plex.url).save(token).map(|()| {
                info!("Stored Plex token for {}", config.plex.url);
            })
        }
        _ => return None,
    };
    Some(result)
}

fn run_sync_command(config: &Config, command: Option<&Command>) -> Result<(), String> {
    let source = open_source_library(config)?;
    let plex = connect_plex(config)?;
    let change_log = open_change_log(config)?;

    let mut engine = SyncEngine::new(source.as_ref(), &plex, &change_log)
        .with_skip_policy(config.sync.skip_policy);
    let stdin = std::io::stdin();
    let mut input = stdin.lock();
    let mut stdout = std::io::stdout();
    let write_err = |err: std::io::Error| format!("Failed to write output: {err}");

    match command {
        Some(Command::CleanAll { yes: true }) => {
            let stats = engine.clean(&CleanScope::All)?;
            interactive::write_clean_stats(&mut stdout, &stats).map_err(write_err)?;
        }
        Some(Command::CleanAll { yes: false }) => {
            interactive::interactive_clean_all(
                &mut engine,
                &mut input,
                &mut stdout,
                config.sync.interactive_threshold,
            )?;
        }
        Some(Command::CleanArtist { name }) => {
            let stats = engine.clean(&CleanScope::Artist(name.clone()))?;
            interactive::write_clean_stats(&mut stdout, &stats).map_err(write_err)?;
        }
        Some(Command::SyncPlaylist { name }) => {
            let report = engine.sync_playlist(name, config.sync.missing_preview_limit)?;
            interactive::write_playlist_report(&mut stdout, &report).map_err(write_err)?;
        }
        Some(_) => {}
        None => interactive::run_menu(
            &mut engine,
            &change_log,
            &mut input,
            &mut stdout,
            config.sync.interactive_threshold,
            config.sync.missing_preview_limit,
        )?,
    }
    stdout.flush().map_err(write_err)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match load_config(cli.config) {
        Ok(config) => config,
        Err(err) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli
        .command
        .as_ref()
        .and_then(|command| run_offline_command(&config, command))
    {
        Some(result) => result,
        None => run_sync_command(&config, cli.command.as_ref()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
