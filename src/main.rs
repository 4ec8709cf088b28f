use std::collections::BTreeMap;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process;

use clap::{Args, Parser, Subcommand};

use takt::build::{
    RuntimeSource, build_instrumented, find_bin_entry_point, inject_runtime_dependency,
    prepare_staging,
};
use takt::error::Error;
use takt::resolve::{TraceTarget, resolve_selection};
use takt::rewrite::{UnitSource, inject_startup, instrument_source};
use takt_runtime::{FORMAT_VAR, MIN_TOTAL_VAR, PROFILE_VAR, RenderOptions};

#[derive(Parser)]
#[command(
    name = "takt",
    about = "Line-level wall-clock timing for Rust binaries",
    version,
    after_help = "Workflow: takt profile --watch 'module:function' (or: takt build, takt run)"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct BuildOpts {
    /// Routines to watch: comma-joined `module.path:function` specs.
    /// Brace groups expand, e.g. `walker:{scan,walk},main:run`.
    #[arg(long, value_name = "SELECTION")]
    watch: String,

    /// Project root (defaults to current directory).
    #[arg(long, default_value = ".")]
    project: PathBuf,

    /// Path to takt-runtime source (for development before publishing).
    #[arg(long)]
    runtime_path: Option<PathBuf>,
}

#[derive(Args)]
struct DisplayOpts {
    /// Report format `<width><flags>[:<thresholds>]`.
    /// Flags: b (bars), l (log scale), h (hide quiet lines), c (collapse runs).
    #[arg(long)]
    format: Option<String>,

    /// Skip routines whose total time is at or below SECONDS.
    #[arg(long, value_name = "SECONDS")]
    min_total: Option<f64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Instrument the selected routines and build the project.
    Build {
        #[command(flatten)]
        build: BuildOpts,
    },
    /// Execute the last-built instrumented binary and print its report.
    /// Pass arguments to the binary after --.
    Run {
        #[command(flatten)]
        display: DisplayOpts,

        /// Arguments to pass to the instrumented binary (after --).
        #[arg(last = true)]
        args: Vec<String>,
    },
    /// Build, execute, and report in one step.
    /// Pass arguments to the binary after --.
    Profile {
        #[command(flatten)]
        build: BuildOpts,

        #[command(flatten)]
        display: DisplayOpts,

        /// Suppress warning when the program exits with a non-zero code.
        #[arg(long)]
        ignore_exit_code: bool,

        /// Arguments to pass to the instrumented binary (after --).
        #[arg(last = true)]
        args: Vec<String>,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Error> {
    match cli.command {
        Commands::Build { build } => cmd_build(build),
        Commands::Run { display, args } => cmd_run(display, args),
        Commands::Profile {
            build,
            display,
            ignore_exit_code,
            args,
        } => cmd_profile(build, display, ignore_exit_code, args),
    }
}

/// Resolve, stage, rewrite, and compile. Returns the instrumented binary path.
fn build_project(opts: BuildOpts) -> Result<PathBuf, Error> {
    if !opts.project.exists() {
        return Err(Error::BuildFailed(format!(
            "project directory does not exist: {}",
            opts.project.display()
        )));
    }
    let project = std::fs::canonicalize(&opts.project)?;

    let src_dir = project.join("src");
    if !src_dir.is_dir() {
        return Err(Error::BuildFailed(format!(
            "no src/ directory found in {}; is this a Rust project?",
            project.display()
        )));
    }

    let targets = resolve_selection(&src_dir, &opts.watch)?;
    eprintln!("watching {} routine(s)", targets.len());
    for target in &targets {
        let relative = target.file.strip_prefix(&project).unwrap_or(&target.file);
        eprintln!("  {} ({})", target.spec, relative.display());
    }

    let staging = tempfile::tempdir()?;
    prepare_staging(&project, staging.path())?;

    match &opts.runtime_path {
        Some(path) => {
            let abs_path = std::fs::canonicalize(path)?;
            inject_runtime_dependency(staging.path(), RuntimeSource::Path(&abs_path))?;
        }
        None => {
            inject_runtime_dependency(
                staging.path(),
                RuntimeSource::Version(env!("TAKT_RUNTIME_VERSION")),
            )?;
        }
    }

    // Rewrite each target file in staging, grouping targets per file.
    let mut by_file: BTreeMap<PathBuf, Vec<TraceTarget>> = BTreeMap::new();
    for target in targets {
        by_file.entry(target.file.clone()).or_default().push(target);
    }

    let mut units: Vec<UnitSource> = Vec::new();
    for (file, file_targets) in &by_file {
        let relative = file.strip_prefix(&project).unwrap_or(file);
        let staged_file = staging.path().join(relative);
        let source = std::fs::read_to_string(&staged_file).map_err(|source| Error::ReadError {
            path: relative.to_path_buf(),
            source,
        })?;

        let result = instrument_source(&source, file_targets).map_err(|source| Error::ParseError {
            path: relative.to_path_buf(),
            source,
        })?;

        units.extend(result.units);
        std::fs::write(&staged_file, result.source)?;
    }
    units.sort_by_key(|u| u.id);

    // Register every instrumented routine at the binary entry point so the
    // report can name routines that were never called.
    let bin_entry = find_bin_entry_point(staging.path())?;
    let main_file = staging.path().join(&bin_entry);
    let main_source = std::fs::read_to_string(&main_file).map_err(|source| Error::ReadError {
        path: bin_entry.clone(),
        source,
    })?;
    let rewritten = inject_startup(&main_source, &units).map_err(|source| Error::ParseError {
        path: bin_entry.clone(),
        source,
    })?;
    std::fs::write(&main_file, rewritten)?;

    let target_dir = project.join("target").join("takt");
    build_instrumented(staging.path(), &target_dir)
}

fn cmd_build(opts: BuildOpts) -> Result<(), Error> {
    let binary = build_project(opts)?;
    let display_name = binary
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| binary.display().to_string());
    eprintln!("built: {display_name}");
    if !std::io::stdout().is_terminal() {
        println!("{}", binary.display());
    }

    Ok(())
}

fn find_latest_binary() -> Result<PathBuf, Error> {
    let dir = PathBuf::from("target/takt/debug");
    if !dir.is_dir() {
        return Err(Error::NoBinary);
    }
    let mut best: Option<(PathBuf, std::time::SystemTime)> = None;
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        // Skip files with extensions (.d and friends) -- binaries have no
        // extension on unix.
        if path.extension().is_some() {
            continue;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if entry.metadata()?.permissions().mode() & 0o111 == 0 {
                continue;
            }
        }
        let mtime = entry.metadata()?.modified()?;
        if best.as_ref().is_none_or(|(_, t)| mtime > *t) {
            best = Some((path, mtime));
        }
    }
    best.map(|(p, _)| p).ok_or(Error::NoBinary)
}

/// Run a binary with the profiling environment armed. The instrumented
/// program prints its own report to stderr when it exits.
fn run_instrumented(
    binary: &PathBuf,
    display: &DisplayOpts,
    args: &[String],
) -> Result<process::ExitStatus, Error> {
    // Reject a bad format string here, before spending a program run on it.
    if let Some(format) = &display.format {
        RenderOptions::parse(format)?;
    }

    let mut cmd = process::Command::new(binary);
    cmd.args(args).env(PROFILE_VAR, "1");
    if let Some(format) = &display.format {
        cmd.env(FORMAT_VAR, format);
    }
    if let Some(min_total) = display.min_total {
        cmd.env(MIN_TOTAL_VAR, min_total.to_string());
    }
    cmd.status()
        .map_err(|e| Error::RunFailed(format!("failed to run {}: {e}", binary.display())))
}

fn cmd_run(display: DisplayOpts, args: Vec<String>) -> Result<(), Error> {
    let binary = find_latest_binary()?;
    eprintln!("running: {}", binary.display());

    let status = run_instrumented(&binary, &display, &args)?;
    process::exit(status.code().unwrap_or(1));
}

fn cmd_profile(
    build: BuildOpts,
    display: DisplayOpts,
    ignore_exit_code: bool,
    args: Vec<String>,
) -> Result<(), Error> {
    if let Some(format) = &display.format {
        RenderOptions::parse(format)?;
    }

    let binary = build_project(build)?;
    let display_name = binary
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| binary.display().to_string());
    eprintln!("built: {display_name}");

    let status = run_instrumented(&binary, &display, &args)?;

    if !status.success() && !ignore_exit_code {
        if let Some(code) = status.code() {
            eprintln!("warning: program exited with code {code}; timings may be incomplete");
        } else {
            eprintln!("warning: program terminated by signal; timings may be incomplete");
        }
    }

    Ok(())
}
