use std::env;
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use log::{LevelFilter, debug, info};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;

use coderun::api::{self, AppState};
use coderun::channel::{Channel, ConnectionError};
use coderun::config::{self, APP_NAME, AppConfig};
use coderun::session::{Notice, Session, ValidationError};

const EXIT_OK: i32 = 0;
const EXIT_EXECUTION_ERROR: i32 = 1;
const EXIT_CONNECTION_ERROR: i32 = 2;

fn main() {
    match try_main() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            let _ = writeln!(io::stderr(), "{err:?}");
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn async_serve(ctx: RuntimeContext, cmd: ServeCommand) -> Result<i32> {
    handle_serve(&ctx, cmd).await.map(|_| EXIT_OK)
}

#[tokio::main]
async fn async_run(ctx: RuntimeContext, cmd: RunCommand) -> Result<i32> {
    handle_run(&ctx, cmd).await
}

fn try_main() -> Result<i32> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common.clone())?;
    ctx.init_logging()?;
    debug!("config file: {}", ctx.config_file.display());

    match cli.command {
        Command::Serve(cmd) => async_serve(ctx, cmd),
        Command::Run(cmd) => async_run(ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command).map(|_| EXIT_OK),
        Command::Completions { shell } => handle_completions(shell).map(|_| EXIT_OK),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Coderun - interactive code execution server and client.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Enable debug logging (equivalent to -vv)
    #[arg(long, global = true)]
    debug: bool,
    /// Enable trace logging (overrides other levels)
    #[arg(long, global = true)]
    trace: bool,
    /// Output machine readable JSON
    #[arg(long, global = true)]
    json: bool,
    /// Disable ANSI colors in output
    #[arg(long = "no-color", global = true, conflicts_with = "color")]
    no_color: bool,
    /// Control color output (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorOption::Auto, global = true)]
    color: ColorOption,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorOption {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the execution server
    Serve(ServeCommand),
    /// Run a source file against an execution server, answering prompts from stdin
    Run(RunCommand),
    /// Inspect and manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Args)]
struct ServeCommand {
    /// Host address to bind to (defaults to server.host)
    #[arg(long)]
    host: Option<String>,
    /// Port to listen on (defaults to server.port)
    #[arg(short, long)]
    port: Option<u16>,
}

#[derive(Debug, Clone, Args)]
struct RunCommand {
    /// Source file to execute
    #[arg(value_name = "FILE")]
    file: PathBuf,
    /// Channel endpoint (defaults to client.endpoint)
    #[arg(long, value_name = "URL")]
    endpoint: Option<String>,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration
    Show,
    /// Print the resolved config file path
    Path,
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Clone)]
struct RuntimeContext {
    common: CommonOpts,
    config_file: PathBuf,
    config: AppConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let config_file = match common.config {
            Some(ref path) => config::expand_str_path(&path.to_string_lossy())?,
            None => config::default_config_file()?,
        };
        let config = config::load(&config_file)?;
        Ok(Self {
            common,
            config_file,
            config,
        })
    }

    fn init_logging(&self) -> Result<()> {
        use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

        if self.common.quiet {
            log::set_max_level(LevelFilter::Off);
            return Ok(());
        }

        let level = match self.effective_log_level() {
            LevelFilter::Off => "off",
            LevelFilter::Error => "error",
            LevelFilter::Warn => "warn",
            LevelFilter::Info => "info",
            LevelFilter::Debug => "debug",
            LevelFilter::Trace => "trace",
        };

        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{APP_NAME}={level},coderun_protocol={level},tower_http={level}"
            ))
        });

        // Program output goes to stdout, so logs always go to stderr.
        if self.common.json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
                .try_init()
                .ok();
        } else {
            let force_color = matches!(self.common.color, ColorOption::Always)
                || env::var_os("FORCE_COLOR").is_some();
            let disable_color = self.common.no_color
                || matches!(self.common.color, ColorOption::Never)
                || env::var_os("NO_COLOR").is_some()
                || (!force_color && !io::stderr().is_terminal());

            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(io::stderr)
                        .with_ansi(!disable_color),
                )
                .try_init()
                .ok();
        }

        // Also init env_logger for compatibility with log crate users
        let mut builder =
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level));
        builder.filter_level(self.effective_log_level());
        builder.try_init().ok();

        Ok(())
    }

    fn effective_log_level(&self) -> LevelFilter {
        if self.common.trace {
            LevelFilter::Trace
        } else if self.common.debug {
            LevelFilter::Debug
        } else {
            match self.common.verbose {
                0 => self
                    .config
                    .logging
                    .level
                    .parse()
                    .unwrap_or(LevelFilter::Info),
                1 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }
}

async fn handle_serve(ctx: &RuntimeContext, cmd: ServeCommand) -> Result<()> {
    let server = &ctx.config.server;
    let host = cmd.host.unwrap_or_else(|| server.host.clone());
    let port = cmd.port.unwrap_or(server.port);

    let state = AppState::from_config(&ctx.config)?;
    info!(
        "Executing with {} {:?} (timeout {:?})",
        state.interactive.program, state.interactive.args, state.interactive.timeout
    );

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .context("invalid address")?;
    let listener = TcpListener::bind(addr)
        .await
        .context("binding to address")?;
    info!("Listening on http://{}", addr);

    let shutdown_signal = async {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    log::error!("failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        info!("Shutdown signal received");
    };

    api::serve(listener, state, shutdown_signal).await
}

async fn handle_run(ctx: &RuntimeContext, cmd: RunCommand) -> Result<i32> {
    let code = fs::read_to_string(&cmd.file)
        .with_context(|| format!("reading {}", cmd.file.display()))?;
    let endpoint = cmd
        .endpoint
        .unwrap_or_else(|| ctx.config.client.endpoint.clone());

    let mut channel = match Channel::open(&endpoint).await {
        Ok(channel) => channel,
        Err(e) => {
            eprintln!("connection error: {}", e);
            return Ok(EXIT_CONNECTION_ERROR);
        }
    };

    let mut session = Session::new(channel.sender());
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut exit = render(session.start(code))?;

    let code = loop {
        if let Some(code) = exit {
            break code;
        }

        exit = tokio::select! {
            event = channel.next_event() => match event {
                Some(event) => render(session.handle(event))?,
                None => render(session.connection_lost(ConnectionError::Closed))?,
            },
            line = stdin.next_line(), if session.pending_prompt().is_some() => match line {
                Ok(Some(line)) => render(session.submit(line))?,
                Ok(None) => {
                    eprintln!("error: stdin closed while the program is waiting for input");
                    Some(EXIT_EXECUTION_ERROR)
                }
                Err(e) => {
                    eprintln!("error: reading stdin: {}", e);
                    Some(EXIT_EXECUTION_ERROR)
                }
            },
        };
    };

    channel.close().await;
    Ok(code)
}

/// Print what the session reported. Returns the exit code once the run is over.
fn render(notices: Vec<Notice>) -> Result<Option<i32>> {
    let mut stdout = io::stdout().lock();
    let mut exit = None;

    for notice in notices {
        match notice {
            Notice::Output { text } => stdout.write_all(text.as_bytes())?,
            Notice::InputRequested { prompt } => {
                stdout.write_all(prompt.as_bytes())?;
                if !prompt.ends_with(char::is_whitespace) {
                    stdout.write_all(b" ")?;
                }
            }
            Notice::RunCompleted => exit = Some(EXIT_OK),
            Notice::RunFailed(err) => {
                stdout.flush()?;
                eprintln!("error: {}", err);
                exit = Some(EXIT_EXECUTION_ERROR);
            }
            Notice::Rejected(ValidationError::EmptyInput) => {
                stdout.flush()?;
                eprintln!("input must not be empty, try again");
            }
            Notice::Rejected(err) => {
                stdout.flush()?;
                eprintln!("error: {}", err);
                exit = Some(EXIT_EXECUTION_ERROR);
            }
            Notice::Disconnected(err) => {
                stdout.flush()?;
                eprintln!("connection error: {}", err);
                exit = Some(EXIT_CONNECTION_ERROR);
            }
            Notice::RunStarted | Notice::InputSent | Notice::ProtocolViolation(_) => {}
        }
    }

    stdout.flush()?;
    Ok(exit)
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            if ctx.common.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&ctx.config)
                        .context("serializing config to JSON")?
                );
            } else {
                print!(
                    "{}",
                    toml::to_string_pretty(&ctx.config).context("serializing config to TOML")?
                );
            }
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", ctx.config_file.display());
            Ok(())
        }
        ConfigCommand::Init { force } => {
            if ctx.config_file.exists() && !force {
                info!(
                    "config already exists at {} (use --force to overwrite)",
                    ctx.config_file.display()
                );
                return Ok(());
            }
            config::write_default(&ctx.config_file)?;
            println!("{}", ctx.config_file.display());
            Ok(())
        }
    }
}

fn handle_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
    Ok(())
}
