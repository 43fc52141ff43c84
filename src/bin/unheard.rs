use clap::{Parser, Subcommand};
use log::{error, info, LevelFilter};
use std::path::{Path, PathBuf};
use std::process;

use unheard::{
    delete_by_prefix, find_by_prefix, run_with_summary, Config, CsvHistory, DeezerClient,
    DiskCache, FixedPause, HistorySource, LastFmClient, PlaylistService, Result, RunSettings,
    RunSummary,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Turn favorites you haven't played in a year into playlists", long_about = None)]
struct Args {
    /// Config file to use (default: ~/.config/unheard/config.toml)
    #[arg(short, long, env = "UNHEARD_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reconcile favorites against history and create playlists
    Run {
        /// Read history from a CSV export instead of Last.fm
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Playlist name prefix
        #[arg(short, long)]
        name: Option<String>,

        /// Ignore cached favorites and history
        #[arg(long)]
        refresh: bool,

        /// Re-send write batches that come up short
        #[arg(long)]
        strict: bool,

        /// Do not read or write the disk cache
        #[arg(long)]
        no_cache: bool,
    },
    /// List playlists whose title starts with any prefix
    List {
        /// Title prefixes (all playlists if none)
        prefixes: Vec<String>,
    },
    /// Delete playlists whose title starts with any prefix
    Cleanup {
        #[arg(required = true)]
        prefixes: Vec<String>,

        /// Only show what would be deleted
        #[arg(long)]
        dry_run: bool,
    },
    /// Show or update the saved configuration
    Config {
        /// Print the saved configuration
        #[arg(long)]
        show: bool,

        #[arg(long, value_name = "TOKEN")]
        set_deezer_token: Option<String>,

        #[arg(long, value_name = "KEY")]
        set_lastfm_api_key: Option<String>,

        #[arg(long, value_name = "USER")]
        set_lastfm_username: Option<String>,

        #[arg(long, value_name = "DIR")]
        set_cache_dir: Option<PathBuf>,

        #[arg(long, value_name = "NAME")]
        set_playlist_name: Option<String>,
    },
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("Summary:");
    println!("  Favorites:          {}", summary.favorites);
    println!("  History entries:    {}", summary.history);
    println!("  Recently played:    {}", summary.recently_played);
    println!("  Duplicates:         {}", summary.duplicates);
    if summary.invalid > 0 {
        println!("  Invalid records:    {}", summary.invalid);
    }
    println!("  Unheard favorites:  {}", summary.unheard);
    println!("  Playlists created:  {}", summary.sync.playlists.len());
    for playlist in &summary.sync.playlists {
        println!(
            "    {} ({}): {} tracks",
            playlist.title, playlist.id, playlist.track_count
        );
    }
    if summary.sync.failed_playlists > 0 {
        println!("  Failed playlists:   {}", summary.sync.failed_playlists);
    }
    if !summary.sync.discrepancies.is_empty() {
        println!("  Discrepancies:      {}", summary.sync.discrepancies.len());
        for d in &summary.sync.discrepancies {
            println!(
                "    playlist {} batch {}: expected {}, found {}",
                d.playlist_id,
                d.batch_index + 1,
                d.expected,
                d.actual
            );
        }
    }
}

fn execute(args: Args) -> Result<()> {
    let config = load_config(args.config.as_deref())?;

    match args.command {
        Commands::Run {
            csv,
            name,
            refresh,
            strict,
            no_cache,
        } => {
            let mut deezer = DeezerClient::new(config.deezer_access_token()?);
            let cache = if no_cache {
                None
            } else {
                Some(DiskCache::new(config.cache_dir()))
            };

            let mut history: Box<dyn HistorySource> = match csv {
                Some(path) => Box::new(CsvHistory::new(path)),
                None => {
                    let mut lastfm =
                        LastFmClient::new(config.lastfm_api_key()?, config.lastfm_username()?)
                            .with_refresh(refresh);
                    if let Some(cache) = &cache {
                        lastfm = lastfm.with_cache(cache.clone());
                    }
                    Box::new(lastfm)
                }
            };

            let mut sync = config.sync_options();
            sync.strict |= strict;
            let settings = RunSettings {
                thresholds: config.thresholds(),
                sync,
                cache,
                refresh,
            };
            let playlist_name = name.unwrap_or_else(|| config.playlist_name());

            let summary = run_with_summary(
                &mut deezer,
                &mut *history,
                &playlist_name,
                &settings,
                &mut FixedPause,
            )?;
            print_summary(&summary);
        }
        Commands::List { prefixes } => {
            let mut deezer = DeezerClient::new(config.deezer_access_token()?);
            let playlists = if prefixes.is_empty() {
                deezer.list_playlists()?
            } else {
                find_by_prefix(&mut deezer, &prefixes)?
            };
            let mut total = 0;
            for playlist in &playlists {
                println!(
                    "{:>12}  {:>5} tracks  {}",
                    playlist.id, playlist.track_count, playlist.title
                );
                total += playlist.track_count;
            }
            println!();
            println!("{} playlists, {} tracks", playlists.len(), total);
        }
        Commands::Cleanup { prefixes, dry_run } => {
            let mut deezer = DeezerClient::new(config.deezer_access_token()?);
            if dry_run {
                for playlist in find_by_prefix(&mut deezer, &prefixes)? {
                    println!("would delete {} ({})", playlist.title, playlist.id);
                }
            } else {
                let deleted = delete_by_prefix(&mut deezer, &prefixes)?;
                println!("Deleted {} playlists", deleted.len());
            }
        }
        Commands::Config {
            show,
            set_deezer_token,
            set_lastfm_api_key,
            set_lastfm_username,
            set_cache_dir,
            set_playlist_name,
        } => {
            let updates = Config {
                deezer_access_token: set_deezer_token,
                lastfm_api_key: set_lastfm_api_key,
                lastfm_username: set_lastfm_username,
                cache_dir: set_cache_dir,
                playlist_name: set_playlist_name,
                ..Config::new()
            };

            if updates != Config::new() {
                let mut to_save = config.clone();
                to_save.merge(&updates);
                let path = match &args.config {
                    Some(path) => {
                        to_save.save_to(path)?;
                        path.clone()
                    }
                    None => to_save.save()?,
                };
                info!("configuration saved to {}", path.display());
                to_save.print("Saved configuration");
            } else if show {
                config.print("Configuration");
            } else {
                println!("Nothing to do; use --show or one of the --set options.");
            }
        }
    }
    Ok(())
}

fn main() {
    let args = Args::parse();

    let mut clog = colog::default_builder();
    clog.filter(
        None,
        if args.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        },
    );
    clog.init();

    if let Err(e) = execute(args) {
        error!("{}", e);
        process::exit(1);
    }
}
