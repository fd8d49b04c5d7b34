use std::path::PathBuf;

use clap::{Parser, Subcommand};
use lib::channels::InboundEvent;
use lib::config::{Config, ReplyMode, TransportKind};

#[derive(Parser)]
#[command(name = "shellcast")]
#[command(about = "Run messages from one chat conversation as shell commands", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config.json.
    Init {
        /// Config file path (default: SHELLCAST_CONFIG_PATH or ~/.shellcast/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Connect to the chat transport and execute every message posted in the target conversation.
    Run {
        /// Config file path (default: SHELLCAST_CONFIG_PATH or ~/.shellcast/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Transport to use: slack or telegram (default from config)
        #[arg(long, value_name = "NAME")]
        transport: Option<TransportKind>,

        /// Conversation to accept commands from (overrides config and TARGET_CHANNEL_ID)
        #[arg(long, value_name = "ID")]
        conversation: Option<String>,

        /// Per-command timeout in seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Reply presentation: plain or prompt
        #[arg(long, value_name = "MODE")]
        mode: Option<ReplyMode>,
    },

    /// Run one command locally and print the reply the bridge would send.
    Exec {
        /// Config file path (default: SHELLCAST_CONFIG_PATH or ~/.shellcast/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Per-command timeout in seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Reply presentation: plain or prompt
        #[arg(long, value_name = "MODE")]
        mode: Option<ReplyMode>,

        /// Command text, passed to the shell as one string
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("shellcast {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Run {
            config,
            transport,
            conversation,
            timeout,
            mode,
        }) => {
            let overrides = Overrides {
                transport,
                conversation,
                timeout,
                mode,
            };
            if let Err(e) = run_bridge(config, overrides).await {
                log::error!("bridge failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Exec {
            config,
            timeout,
            mode,
            command,
        }) => {
            let overrides = Overrides {
                timeout,
                mode,
                ..Overrides::default()
            };
            if let Err(e) = run_exec(config, overrides, command.join(" ")).await {
                log::error!("exec failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

/// Command-line values that take precedence over config and env.
#[derive(Default)]
struct Overrides {
    transport: Option<TransportKind>,
    conversation: Option<String>,
    timeout: Option<u64>,
    mode: Option<ReplyMode>,
}

impl Overrides {
    fn apply(self, config: &mut Config) {
        if let Some(transport) = self.transport {
            config.bridge.transport = transport;
        }
        if let Some(conversation) = self.conversation {
            config.bridge.conversation_id = Some(conversation);
        }
        if let Some(timeout) = self.timeout {
            config.command.timeout_secs = timeout;
        }
        if let Some(mode) = self.mode {
            config.reply.mode = mode;
        }
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    let written = lib::init::init_config_dir(&path)?;
    println!(
        "configuration at {} (edit it, or set TARGET_CHANNEL_ID and the transport token env vars)",
        written.display()
    );
    Ok(())
}

async fn run_bridge(config_path: Option<PathBuf>, overrides: Overrides) -> anyhow::Result<()> {
    let (mut config, path) = lib::config::load_config(config_path)?;
    let conversation_flag = overrides.conversation.is_some();
    overrides.apply(&mut config);
    // Env normally wins over the file; an explicit --conversation wins over env.
    let settings = lib::config::resolve_settings_with(&config, |name| {
        if conversation_flag && name == lib::config::ENV_TARGET_CHANNEL_ID {
            None
        } else {
            std::env::var(name).ok()
        }
    })?;
    log::info!(
        "starting bridge ({:?} transport, {:?} replies) with config {}",
        config.bridge.transport,
        settings.local.reply.mode,
        path.display()
    );
    lib::bridge::run_bridge(settings).await
}

async fn run_exec(config_path: Option<PathBuf>, overrides: Overrides, command: String) -> anyhow::Result<()> {
    let (mut config, _path) = lib::config::load_config(config_path)?;
    overrides.apply(&mut config);
    let local = lib::config::resolve_local_settings(&config)?;
    let executor = lib::exec::CommandExecutor::new(&local.command);
    let formatter = lib::format::ResponseFormatter::from_config(&local.reply, local.command.working_dir.as_deref());
    let result = executor.execute(&command).await;
    let author = std::env::var("USER").ok();
    let event = InboundEvent::from_user("local", author.clone().unwrap_or_default(), command);
    println!("{}", formatter.format(&event, &result, author.as_deref()));
    Ok(())
}
