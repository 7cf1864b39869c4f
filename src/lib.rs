// src/lib.rs

pub mod cli;
pub mod config;
pub mod detect;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod layout;
pub mod logging;
pub mod notify;
pub mod shutdown;
pub mod stages;
pub mod state;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::{load_or_default, ConfigFile};
use crate::engine::Scheduler;
use crate::exec::{supports_resource_limits, ProcessExecutor};
use crate::fs::{FileSystem, RealFileSystem};
use crate::layout::Layout;
use crate::notify::WriterSubscriber;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading (defaults when the file is missing)
/// - the entity layout, resolved next to the config file
/// - the bounded process executor
/// - the scheduler loop, or a single cycle for `--once`
/// - SIGINT / SIGTERM handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_or_default(&config_path)?;
    let layout = Layout::new(&cfg.layout, &config_root_dir(&config_path));
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);

    if args.dry_run {
        print_dry_run(&cfg, &layout, fs.as_ref())?;
        return Ok(());
    }

    let executor = Arc::new(ProcessExecutor::new(&cfg.executor, cfg.limits.is_some()));
    let scheduler = Scheduler::new(&cfg, layout, executor, fs)?;
    let handle = scheduler.handle();

    if let Some(period) = &args.period {
        handle.set_period(period)?;
    }
    info!(period = %handle.current_period(), "grading period selected");

    if args.once {
        handle
            .subscribe(Box::new(WriterSubscriber::new(tokio::io::stdout())))
            .await;
        let summary = scheduler.run_once().await?;
        debug!(?summary, "single cycle finished");
        return Ok(());
    }

    shutdown::install_shutdown_handler(handle);
    scheduler.run().await;
    Ok(())
}

/// Directory that relative layout paths are resolved against.
///
/// - If the config path has a non-empty parent (e.g. "course/Gradewatch.toml"),
///   we use that directory.
/// - If it's just a bare filename like "Gradewatch.toml" (parent = ""),
///   we fall back to the current working directory.
///
/// The result is absolute, since grading scripts receive paths from it while
/// running in a different directory.
fn config_root_dir(config_path: &Path) -> PathBuf {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => cwd.join(parent),
        _ => cwd,
    }
}

/// Print the effective settings and the entities that would be tracked.
fn print_dry_run(cfg: &ConfigFile, layout: &Layout, fs: &dyn FileSystem) -> Result<()> {
    println!("gradewatch dry-run");
    println!("  entities root = {}", layout.entities_root().display());
    println!(
        "  periods = {:?} (current: {})",
        cfg.periods.valid, cfg.periods.current
    );
    println!(
        "  scheduler.interval = {:?}, error_backoff = {:?}",
        cfg.scheduler.interval, cfg.scheduler.error_backoff
    );
    println!(
        "  executor.max_concurrent = {}, kill_grace = {:?}",
        cfg.executor.max_concurrent, cfg.executor.kill_grace
    );
    println!(
        "  sync.command = {:?} (timeout {:?})",
        cfg.sync.command, cfg.sync.timeout
    );
    println!(
        "  grading = {} {} (timeout {:?})",
        cfg.grading.interpreter, cfg.grading.script, cfg.grading.timeout
    );
    match cfg.limits {
        Some(l) if supports_resource_limits() => println!("  limits = {l:?}"),
        Some(_) => println!("  limits = requested, unsupported on this platform"),
        None => println!("  limits = disabled"),
    }
    println!(
        "  markers = {} / {} (legacy: {})",
        cfg.results.pass_file, cfg.results.fail_file, cfg.results.legacy_markers
    );
    println!();

    println!("languages ({}):", cfg.languages.len());
    for lang in &cfg.languages {
        println!("  - {} {:?}", lang.name, lang.source_extensions);
        if let Some(ref compile) = lang.compile_command {
            println!("      compile: {compile}");
        }
        println!("      run: {}", lang.run_command);
    }
    println!();

    let entities = layout.discover(fs)?;
    println!("entities ({}):", entities.len());
    for id in &entities {
        let synced = fs.is_dir(&layout.working_copy(id));
        println!(
            "  - {id}{}",
            if synced { "" } else { " (no working copy)" }
        );
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
