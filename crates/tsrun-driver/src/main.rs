use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tsrun_compiler::{CommandTranspiler, CompilerService, ScriptCompiler};
use tsrun_driver::{NotifySource, Output, Runner, RunnerError, RunnerOptions, RuntimeConfig, WatchEvent};

/// Build, transform and run TypeScript entry files
#[derive(Parser)]
#[command(name = "tsrun")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Command that turns TypeScript on stdin into JavaScript on stdout
    #[arg(long, global = true, env = "TSRUN_TRANSPILER")]
    transpiler: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an entry file and run it
    Run {
        /// Entry file
        entry: PathBuf,

        /// Rebuild and re-run when a dependency changes
        #[arg(short, long)]
        watch: bool,

        /// Open a JSON message channel to the child and print its last message
        #[arg(long)]
        ipc: bool,

        /// Program that executes the built script
        #[arg(long, env = "TSRUN_RUNTIME", default_value = "node")]
        runtime: String,

        /// Extension of the built script file
        #[arg(long, default_value = "cjs")]
        extension: String,

        /// Watch debounce window in milliseconds
        #[arg(long, default_value_t = 100)]
        debounce_ms: u64,

        /// Arguments passed to the program
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Build an entry file and write the output
    Build {
        /// Entry file
        entry: PathBuf,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    let service = match compiler_service(cli.transpiler.as_deref()) {
        Ok(service) => service,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Commands::Run {
            entry,
            watch,
            ipc,
            runtime,
            extension,
            debounce_ms,
            args,
        } => {
            let options = RunnerOptions::default()
                .with_ipc(ipc)
                .with_watch(watch)
                .with_runtime(RuntimeConfig::new(runtime).with_extension(extension))
                .with_args(args)
                .with_echo(true)
                .with_debounce(Duration::from_millis(debounce_ms));
            cmd_run(Runner::with_compiler(entry, options, service)).await
        }
        Commands::Build { entry, output } => {
            cmd_build(Runner::with_compiler(entry, RunnerOptions::default(), service), output.as_deref()).await
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            match e.downcast_ref::<RunnerError>() {
                Some(err) => report(err),
                None => eprintln!("error: {e:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

fn compiler_service(transpiler: Option<&str>) -> Result<Arc<dyn CompilerService>> {
    let Some(command) = transpiler else {
        return Ok(Arc::new(ScriptCompiler::default()));
    };
    let transpiler = CommandTranspiler::from_command_line(command)
        .with_context(|| format!("invalid transpiler command: {command:?}"))?;
    Ok(Arc::new(ScriptCompiler::new(Arc::new(transpiler))))
}

fn report(err: &RunnerError) {
    match err {
        RunnerError::Compile(e) => eprint!("{}", e.render()),
        // the child's stderr was already echoed
        RunnerError::Execution { code, .. } => match code {
            Some(code) => eprintln!("error: process exited with code {code}"),
            None => eprintln!("error: process was killed by a signal"),
        },
        other => eprintln!("error: {other}"),
    }
}

async fn cmd_build(mut runner: Runner, output: Option<&Path>) -> Result<ExitCode> {
    let code = runner.build().await?.output_code.clone();
    match output {
        Some(path) => tokio::fs::write(path, code)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => print!("{code}"),
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_run(mut runner: Runner) -> Result<ExitCode> {
    if runner.options().watch {
        return cmd_watch(runner).await;
    }

    runner.build().await?;
    runner.spawn().await?;
    let output = tokio::select! {
        output = runner.wait() => output?,
        _ = tokio::signal::ctrl_c() => {
            runner.terminate().await?;
            return Ok(ExitCode::from(130));
        }
    };
    print_message(&output);
    Ok(ExitCode::SUCCESS)
}

async fn cmd_watch(runner: Runner) -> Result<ExitCode> {
    let source = NotifySource::new()?;
    let mut handle = runner.watch(source);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = handle.next_event() => match event {
                Some(event) => log_event(&event),
                None => break,
            },
        }
    }

    handle.stop().await?;
    Ok(ExitCode::SUCCESS)
}

fn log_event(event: &WatchEvent) {
    match event {
        WatchEvent::BuildFailed { error } => report(error),
        WatchEvent::SpawnFailed { error } => report(error),
        WatchEvent::ProcessExited { result: Ok(output) } => print_message(output),
        WatchEvent::ProcessExited { result: Err(error) } => report(error),
        WatchEvent::SubscribeFailed { error } => eprintln!("error: {error}"),
        WatchEvent::BuildStarted { .. } | WatchEvent::BuildSucceeded { .. } | WatchEvent::ProcessSpawned { .. } => {
            tracing::debug!(?event, "watch event");
        }
    }
}

/// Stdout was echoed while it ran; only channel messages need printing.
fn print_message(output: &Output) {
    if let Output::Message(message) = output {
        println!("{message}");
    }
}
