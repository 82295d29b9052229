use anyhow::{Context, Result, anyhow, bail};
use chaichat_core::transcript::{ExportFormat, ExportOptions, Exporter, MessageFilter, SortOrder, search};
use chaichat_core::{
    ChatReply, ChatSession, Dispatcher, FileStore, PersonaRegistry, SearchQuery, SessionStore,
    TranscriptMessage,
};
use chaichat_gateway::GatewayServer;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::ChaichatConfig;

#[derive(Parser)]
#[command(name = "chaichat")]
#[command(version)]
#[command(about = "chaichat: chat with AI mentor personas")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize config directory and default config
    Init,

    /// Show current configuration (keys masked)
    Config,

    /// List available personas
    Personas,

    /// Send a single message and print the reply
    Ask {
        /// The message to send
        message: String,

        /// Persona to answer as
        #[arg(short, long)]
        persona: Option<String>,
    },

    /// Interactive chat, saved to history
    Chat {
        #[arg(short, long)]
        persona: Option<String>,

        /// Continue an existing session
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Run the HTTP gateway for the browser UI
    Serve {
        /// Listen address, overrides [gateway] bind and port (e.g. 127.0.0.1:8787)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Manage saved conversations
    History {
        #[command(subcommand)]
        command: HistoryCommand,
    },
}

#[derive(Subcommand)]
enum HistoryCommand {
    /// List sessions, most recent first
    List,

    /// Print a session's messages
    Show { id: String },

    /// Export a session to a file
    Export {
        id: String,

        /// txt, md, json or html
        #[arg(short, long, default_value = "md")]
        format: String,

        /// Output path (defaults to `<persona>-chat-<date>.<ext>`)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long)]
        no_timestamps: bool,

        /// Replace code with placeholders
        #[arg(long)]
        no_code: bool,

        #[arg(long)]
        user_only: bool,
    },

    /// Search a session's messages
    Search {
        id: String,
        query: String,

        /// all, user, ai or code
        #[arg(long, default_value = "all")]
        filter: String,

        /// newest, oldest or relevance
        #[arg(long, default_value = "newest")]
        sort: String,
    },

    /// Delete a session
    Delete { id: String },

    /// Delete every session
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging (stderr keeps stdout clean for replies)
    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init => cmd_init().await,
        Commands::Config => cmd_config(&cli.config).await,
        Commands::Personas => cmd_personas(&cli.config).await,
        Commands::Ask { message, persona } => cmd_ask(&cli.config, &message, persona).await,
        Commands::Chat { persona, session } => cmd_chat(&cli.config, persona, session).await,
        Commands::Serve { bind } => cmd_serve(&cli.config, bind).await,
        Commands::History { command } => cmd_history(&cli.config, command).await,
    }
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        tokio::fs::write(&config_path, config::DEFAULT_CONFIG).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&config_path, std::fs::Permissions::from_mode(0o600))
                .await?;
        }
        info!("Created default config at {}", config_path.display());
    }

    tokio::fs::create_dir_all(config_dir.join("history")).await?;

    println!("chaichat initialized at {}", config_dir.display());
    println!(
        "Set OPENAI_API_KEY and/or GEMINI_API_KEY, or edit {}.",
        config_path.display()
    );
    Ok(())
}

async fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = ChaichatConfig::load(config_path)?;
    println!("{:#?}", cfg);
    Ok(())
}

async fn cmd_personas(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = ChaichatConfig::load(config_path)?;
    let personas = cfg.personas()?;
    for persona in personas.all() {
        let marker = if persona.id == cfg.chat.default_persona { "*" } else { " " };
        println!("{} {:<10} {}", marker, persona.id, persona.speaker());
        if !persona.description.is_empty() {
            println!("             {}", persona.description);
        }
        if !persona.expertise.is_empty() {
            println!("             {}", persona.expertise.join(", "));
        }
    }
    Ok(())
}

/// Config, persona registry and dispatcher for chat commands
struct ChatContext {
    cfg: ChaichatConfig,
    dispatcher: Dispatcher,
}

impl ChatContext {
    fn load(config_path: &Option<PathBuf>) -> Result<Self> {
        let cfg = ChaichatConfig::load(config_path)?;
        let personas = Arc::new(cfg.personas()?);
        let dispatcher = cfg.dispatcher(personas)?;
        Ok(Self { cfg, dispatcher })
    }

    fn personas(&self) -> &PersonaRegistry {
        self.dispatcher.personas()
    }

    fn resolve_persona(&self, requested: Option<String>) -> Result<String> {
        let id = requested.unwrap_or_else(|| self.cfg.chat.default_persona.clone());
        if !self.personas().contains(&id) {
            bail!(
                "Unknown persona '{}' (available: {})",
                id,
                self.personas().ids().join(", ")
            );
        }
        Ok(id)
    }

    fn sessions(&self) -> SessionStore {
        open_history(&self.cfg)
    }

    async fn send(&self, message: &str, persona_id: &str) -> Result<ChatReply> {
        let credentials = self.cfg.credentials();
        match self
            .dispatcher
            .send_chat_message(message, &credentials, persona_id)
            .await
        {
            Ok(reply) => {
                if reply.fallback_used {
                    eprintln!(
                        "(answered by {} {} after the primary provider failed)",
                        reply.used_provider.vendor(),
                        reply.model
                    );
                }
                Ok(reply)
            }
            Err(e) => {
                error!("Chat turn failed: {}", e);
                Err(anyhow!(e.user_message()))
            }
        }
    }
}

fn open_history(cfg: &ChaichatConfig) -> SessionStore {
    SessionStore::new(Arc::new(FileStore::new(cfg.history_dir())))
}

async fn cmd_ask(config_path: &Option<PathBuf>, message: &str, persona: Option<String>) -> Result<()> {
    let ctx = ChatContext::load(config_path)?;
    let persona_id = ctx.resolve_persona(persona)?;
    let reply = ctx.send(message, &persona_id).await?;
    println!("{}", reply.response);
    Ok(())
}

async fn cmd_chat(
    config_path: &Option<PathBuf>,
    persona: Option<String>,
    session: Option<String>,
) -> Result<()> {
    let ctx = ChatContext::load(config_path)?;
    let sessions = ctx.sessions();

    let resumed = match session {
        Some(id) => Some(resolve_session(&sessions, &id).await?),
        None => None,
    };
    // Explicit flag wins, then the session's last persona
    let mut persona_id = ctx.resolve_persona(
        persona.or_else(|| resumed.as_ref().and_then(|s| s.persona_id.clone())),
    )?;

    let mut session_id = resumed.as_ref().map(|s| s.id.clone());
    match &resumed {
        Some(session) => println!("Session: {} ({})", session.title, session.id),
        None => println!("New session"),
    }
    println!("Commands: /persona <id>, /export <txt|md|json|html>, /quit\n");
    match resumed {
        Some(session) if !session.messages.is_empty() => {
            for message in &session.messages {
                print_message(ctx.personas(), message);
            }
        }
        _ => print_greeting(ctx.personas(), &persona_id),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            let mut parts = command.splitn(2, ' ');
            match (parts.next().unwrap_or_default(), parts.next().map(str::trim)) {
                ("quit" | "exit", _) => break,
                ("persona", Some(id)) => match ctx.resolve_persona(Some(id.to_string())) {
                    Ok(id) => {
                        persona_id = id;
                        print_greeting(ctx.personas(), &persona_id);
                    }
                    Err(e) => eprintln!("{}", e),
                },
                ("export", format) => {
                    let format: ExportFormat = match format.unwrap_or("md").parse() {
                        Ok(f) => f,
                        Err(e) => {
                            eprintln!("{}", e);
                            continue;
                        }
                    };
                    let Some(id) = session_id.as_deref() else {
                        eprintln!("Nothing to export yet");
                        continue;
                    };
                    let current = sessions
                        .get(id)
                        .await?
                        .ok_or_else(|| anyhow!("Session {} was deleted", id))?;
                    let path =
                        write_export(ctx.personas(), &current, format, ExportOptions::default(), None)
                            .await?;
                    println!("Exported to {}", path.display());
                }
                _ => eprintln!("Unknown command: /{}", command),
            }
            continue;
        }

        match ctx.send(line, &persona_id).await {
            Ok(reply) => {
                println!("{}: {}\n", speaker(ctx.personas(), &reply.persona_id), reply.response);
                let turns = vec![TranscriptMessage::user(line), TranscriptMessage::assistant(&reply)];
                if let Err(e) = save_turn(&sessions, &mut session_id, turns).await {
                    warn!("Failed to save chat turn: {:#}", e);
                    eprintln!("(reply not saved to history)\n");
                }
            }
            Err(e) => eprintln!("{}\n", e),
        }
    }

    if let Some(id) = session_id {
        println!("Saved session {}", id);
    }
    Ok(())
}

/// Append a turn, creating the session on the first one
async fn save_turn(
    sessions: &SessionStore,
    session_id: &mut Option<String>,
    turns: Vec<TranscriptMessage>,
) -> Result<()> {
    let id = match session_id.clone() {
        Some(id) => id,
        None => {
            let id = sessions.create(None).await?.id;
            *session_id = Some(id.clone());
            id
        }
    };
    if sessions.append(&id, turns).await?.is_none() {
        warn!("Session {} no longer exists; reply not saved", id);
    }
    Ok(())
}

async fn cmd_serve(config_path: &Option<PathBuf>, bind: Option<String>) -> Result<()> {
    let ctx = ChatContext::load(config_path)?;
    let addr = match bind {
        Some(b) => b
            .parse()
            .with_context(|| format!("Invalid bind address '{}'", b))?,
        None => ctx.cfg.gateway.socket_addr()?,
    };
    if ctx.cfg.gateway.auth_token.is_empty() && !addr.ip().is_loopback() {
        warn!("Gateway on {} has no auth token and is reachable from the network", addr);
    }

    let sessions = Arc::new(ctx.sessions());
    let auth_token = ctx.cfg.gateway.auth_token.clone();
    let server = GatewayServer::new(addr, Arc::new(ctx.dispatcher), sessions, auth_token);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        info!("Received Ctrl+C, shutting down...");
        cancel.cancel();
    });

    server
        .run_until(async move { shutdown.cancelled().await })
        .await?;
    println!("chaichat gateway stopped.");
    Ok(())
}

async fn cmd_history(config_path: &Option<PathBuf>, command: HistoryCommand) -> Result<()> {
    let cfg = ChaichatConfig::load(config_path)?;
    let sessions = open_history(&cfg);

    match command {
        HistoryCommand::List => {
            let list = sessions.list().await?;
            if list.is_empty() {
                println!("No saved sessions.");
            }
            for s in list {
                println!(
                    "{}  {}  {:>3} msgs  {}",
                    short_id(&s.id),
                    s.updated_at.format("%Y-%m-%d %H:%M"),
                    s.messages.len(),
                    s.title
                );
            }
        }
        HistoryCommand::Show { id } => {
            let personas = cfg.personas()?;
            let session = resolve_session(&sessions, &id).await?;
            println!("# {}\n", session.title);
            for message in &session.messages {
                print_message(&personas, message);
            }
        }
        HistoryCommand::Export {
            id,
            format,
            output,
            no_timestamps,
            no_code,
            user_only,
        } => {
            let personas = cfg.personas()?;
            let format: ExportFormat = format.parse()?;
            let session = resolve_session(&sessions, &id).await?;
            let options = ExportOptions {
                include_timestamps: !no_timestamps,
                include_code_blocks: !no_code,
                user_messages_only: user_only,
            };
            let path = write_export(&personas, &session, format, options, output).await?;
            println!("Exported to {}", path.display());
        }
        HistoryCommand::Search {
            id,
            query,
            filter,
            sort,
        } => {
            let personas = cfg.personas()?;
            let session = resolve_session(&sessions, &id).await?;
            let query = SearchQuery::new(query)
                .filter(filter.parse::<MessageFilter>()?)
                .sort(sort.parse::<SortOrder>()?);
            let hits = search(&session.messages, &query);
            println!("{} result(s)", hits.len());
            for hit in hits {
                print_message(&personas, hit.message);
            }
        }
        HistoryCommand::Delete { id } => {
            let session = resolve_session(&sessions, &id).await?;
            sessions.delete(&session.id).await?;
            println!("Deleted '{}'", session.title);
        }
        HistoryCommand::Clear => {
            sessions.clear().await?;
            println!("Chat history cleared.");
        }
    }
    Ok(())
}

/// Look up a session by full id or unique id prefix
async fn resolve_session(sessions: &SessionStore, id: &str) -> Result<ChatSession> {
    if let Some(session) = sessions.get(id).await? {
        return Ok(session);
    }
    let mut matches: Vec<ChatSession> = sessions
        .list()
        .await?
        .into_iter()
        .filter(|s| s.id.starts_with(id))
        .collect();
    match matches.len() {
        0 => bail!("No session matches '{}'", id),
        1 => Ok(matches.remove(0)),
        n => bail!("'{}' matches {} sessions; use a longer id", id, n),
    }
}

async fn write_export(
    personas: &PersonaRegistry,
    session: &ChatSession,
    format: ExportFormat,
    options: ExportOptions,
    output: Option<PathBuf>,
) -> Result<PathBuf> {
    let persona_id = session
        .persona_id
        .as_deref()
        .unwrap_or_else(|| personas.default_id());
    let exporter = Exporter::new(personas, persona_id).options(options);
    let path = output.unwrap_or_else(|| PathBuf::from(exporter.filename(format)));
    tokio::fs::write(&path, exporter.render(&session.messages, format))
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

/// First eight characters of a session id, for listings
fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}

fn speaker<'a>(personas: &'a PersonaRegistry, persona_id: &str) -> &'a str {
    personas
        .get(persona_id)
        .map(|p| p.speaker())
        .unwrap_or("AI Assistant")
}

fn print_greeting(personas: &PersonaRegistry, persona_id: &str) {
    if let Some(persona) = personas.get(persona_id) {
        if !persona.greeting.is_empty() {
            println!("{}: {}\n", persona.speaker(), persona.greeting);
        }
    }
}

fn print_message(personas: &PersonaRegistry, message: &TranscriptMessage) {
    let who = if message.is_user {
        "You"
    } else {
        speaker(personas, message.persona_id.as_deref().unwrap_or_default())
    };
    println!(
        "[{}] {}: {}\n",
        message.timestamp.format("%Y-%m-%d %H:%M"),
        who,
        message.content
    );
}
