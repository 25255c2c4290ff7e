use std::env;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use log::{LevelFilter, debug, info};
use serde::Serialize;

use lostfound::backend::{Backend, ItemKind, PushHub, SqliteBackend};
use lostfound::config::{self, APP_NAME, AppConfig, AppPaths};
use lostfound::messaging::{ChatScreen, InboxScreen, InboxView};
use lostfound::protocol::{Conversation, ItemSummary, Message, UserProfile};

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn async_main(ctx: RuntimeContext, cmd: Command) -> Result<()> {
    let backend = ctx.open_backend().await?;
    match cmd {
        Command::Inbox(cmd) => handle_inbox(&ctx, backend, cmd).await,
        Command::Chat(cmd) => handle_chat(&ctx, backend, cmd).await,
        Command::Send(cmd) => handle_send(&ctx, backend, cmd).await,
        Command::Read(cmd) => handle_read(&ctx, backend, cmd).await,
        Command::User { command } => handle_user(&ctx, backend, command).await,
        Command::Item { command } => handle_item(&ctx, backend, command).await,
        Command::Init(_) | Command::Config { .. } | Command::Completions { .. } => {
            Err(anyhow!("command does not need the database"))
        }
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common.clone())?;
    ctx.init_logging()?;
    debug!("resolved paths: {}", ctx.paths);

    match cli.command {
        Command::Init(cmd) => handle_init(&ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command),
        Command::Completions { shell } => handle_completions(shell),
        command => async_main(ctx, command),
    }
}

#[derive(Debug, Parser)]
#[command(
    name = APP_NAME,
    author,
    version,
    about = "Messaging for the lost-and-found marketplace"
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
    /// Override the database file
    #[arg(long, value_name = "PATH", global = true)]
    database: Option<PathBuf>,
    /// Reduce output to errors only
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
    /// Output machine-readable JSON
    #[arg(long, global = true)]
    json: bool,
    /// Disable ANSI colors in output
    #[arg(long = "no-color", global = true, conflicts_with = "color")]
    no_color: bool,
    /// Control color output (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorOption::Auto, global = true)]
    color: ColorOption,
    /// Assume "yes" for interactive prompts
    #[arg(short = 'y', long = "yes", global = true)]
    assume_yes: bool,
    /// Emit additional diagnostics for troubleshooting
    #[arg(long = "diagnostics", global = true)]
    diagnostics: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorOption {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List conversations, or search their messages
    Inbox(InboxCommand),
    /// Show the history with one counterpart and mark it read
    Chat(ChatCommand),
    /// Send a message
    Send(SendCommand),
    /// Mark a counterpart's messages as read
    Read(ReadCommand),
    /// Manage user profiles
    User {
        #[command(subcommand)]
        command: UserCommand,
    },
    /// Manage listings
    Item {
        #[command(subcommand)]
        command: ItemCommand,
    },
    /// Create config directories and default files
    Init(InitCommand),
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
struct InboxCommand {
    /// Current user
    #[arg(short, long)]
    user: String,
    /// Case-insensitive text to look for
    #[arg(short, long)]
    search: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct ChatCommand {
    /// Current user
    #[arg(short, long)]
    user: String,
    /// Counterpart
    #[arg(short, long = "with")]
    with: String,
    /// Number of most recent messages to load
    #[arg(short, long)]
    limit: Option<usize>,
}

#[derive(Debug, Clone, Args)]
struct SendCommand {
    #[arg(long)]
    from: String,
    #[arg(long)]
    to: String,
    /// Listing the message is about
    #[arg(long)]
    item: Option<String>,
    #[arg(long)]
    text: Option<String>,
    /// URL of an uploaded photo
    #[arg(long)]
    photo: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct ReadCommand {
    #[arg(short, long)]
    user: String,
    #[arg(short, long = "with")]
    with: String,
}

#[derive(Debug, Subcommand)]
enum UserCommand {
    /// Create or update a user
    Add {
        id: String,
        name: String,
        #[arg(long)]
        avatar: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
enum ItemCommand {
    /// Create or update a listing
    Add {
        id: String,
        title: String,
        #[arg(long)]
        owner: String,
        #[arg(long, value_enum, default_value_t = KindArg::Lost)]
        kind: KindArg,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    Lost,
    Found,
}

impl From<KindArg> for ItemKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Lost => ItemKind::Lost,
            KindArg::Found => ItemKind::Found,
        }
    }
}

#[derive(Debug, Clone, Args)]
struct InitCommand {
    /// Overwrite existing files
    #[arg(long = "force")]
    force: bool,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration
    Show,
    /// Print the resolved config file path
    Path,
    /// Regenerate the default configuration file
    Reset,
}

#[derive(Debug, Clone)]
struct RuntimeContext {
    common: CommonOpts,
    paths: AppPaths,
    config: AppConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let paths = AppPaths::discover(common.config.clone())?;
        let config = config::load_config(&paths.config_file)?;
        Ok(Self {
            common,
            paths,
            config,
        })
    }

    fn init_logging(&self) -> Result<()> {
        use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

        if self.common.quiet {
            log::set_max_level(LevelFilter::Off);
            return Ok(());
        }

        let level = self.effective_log_level();
        let directive = level.as_str().to_ascii_lowercase();
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("lostfound={directive},sqlx=warn")));

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
                        .with_ansi(!disable_color)
                        .with_target(self.common.diagnostics)
                        .with_file(self.common.diagnostics)
                        .with_line_number(self.common.diagnostics),
                )
                .try_init()
                .ok();
        }

        // Also init env_logger for the log macros used by the library
        let mut builder = env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or(self.config.logging.level.as_str()),
        );
        builder.filter_level(level);
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

    async fn open_sqlite(&self) -> Result<SqliteBackend> {
        let path = match self.common.database.clone() {
            Some(path) => config::expand_path(path)?,
            None => self.paths.database_file(&self.config)?,
        };
        info!("Opening database {}", path.display());
        let hub = Arc::new(PushHub::new(self.config.messaging.subscription_buffer));
        SqliteBackend::open(&path, hub)
            .await
            .with_context(|| format!("opening database {}", path.display()))
    }

    async fn open_backend(&self) -> Result<Arc<SqliteBackend>> {
        Ok(Arc::new(self.open_sqlite().await?))
    }

    fn print_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        println!(
            "{}",
            serde_json::to_string_pretty(value).context("serializing output to JSON")?
        );
        Ok(())
    }
}

async fn handle_inbox(
    ctx: &RuntimeContext,
    backend: Arc<SqliteBackend>,
    cmd: InboxCommand,
) -> Result<()> {
    let messaging = &ctx.config.messaging;
    let mut inbox = InboxScreen::new(backend, cmd.user.as_str())
        .with_limits(messaging.feed_limit, messaging.search_history_limit);
    inbox.refresh().await;
    if let Some(err) = inbox.error() {
        return Err(anyhow!("{err}"));
    }
    if let Some(ref term) = cmd.search {
        inbox.set_search(term).await;
    }

    match inbox.visible() {
        InboxView::Conversations(conversations) => {
            if ctx.common.json {
                return ctx.print_json(conversations);
            }
            if conversations.is_empty() {
                println!("No conversations yet.");
            }
            for conversation in conversations {
                println!("{}", format_conversation(conversation));
            }
        }
        InboxView::SearchResults(hits) => {
            if ctx.common.json {
                return ctx.print_json(hits);
            }
            if hits.is_empty() {
                println!("No messages match.");
            }
            for hit in hits {
                println!(
                    "{}: {}",
                    hit.conversation.other_name,
                    format_message(&hit.message, inbox.user_id())
                );
            }
        }
    }
    Ok(())
}

async fn handle_chat(
    ctx: &RuntimeContext,
    backend: Arc<SqliteBackend>,
    cmd: ChatCommand,
) -> Result<()> {
    let limit = cmd.limit.unwrap_or(ctx.config.messaging.history_limit);
    let mut chat = ChatScreen::new(backend, cmd.user.as_str()).with_history_limit(limit);
    chat.open(&cmd.with).await;
    if let Some(err) = chat.error() {
        let err = anyhow!("{err}");
        chat.close().await;
        return Err(err);
    }

    if ctx.common.json {
        ctx.print_json(chat.messages())?;
    } else {
        for message in chat.messages() {
            println!("{}", format_message(message, chat.user_id()));
        }
    }
    chat.close().await;
    Ok(())
}

async fn handle_send(
    ctx: &RuntimeContext,
    backend: Arc<SqliteBackend>,
    cmd: SendCommand,
) -> Result<()> {
    let mut chat = ChatScreen::new(backend, cmd.from.as_str());
    let _history = chat.focus(&cmd.to).await;
    chat.set_draft(cmd.text.unwrap_or_default());
    let result = chat.send(cmd.item, cmd.photo).await;
    chat.close().await;
    let sent = result.context("sending message")?;

    if ctx.common.json {
        ctx.print_json(&sent)
    } else {
        println!("Sent message {} to {}", sent.id, sent.receiver_id);
        Ok(())
    }
}

async fn handle_read(
    ctx: &RuntimeContext,
    backend: Arc<SqliteBackend>,
    cmd: ReadCommand,
) -> Result<()> {
    let updated = backend
        .mark_read(&cmd.user, &cmd.with)
        .await
        .context("marking messages read")?;
    if ctx.common.json {
        ctx.print_json(&serde_json::json!({ "updated": updated }))
    } else {
        println!("Marked {updated} message(s) read");
        Ok(())
    }
}

async fn handle_user(
    ctx: &RuntimeContext,
    backend: Arc<SqliteBackend>,
    command: UserCommand,
) -> Result<()> {
    match command {
        UserCommand::Add { id, name, avatar } => {
            let mut profile = UserProfile::new(id, name);
            if let Some(avatar) = avatar {
                profile = profile.with_avatar(avatar);
            }
            backend.upsert_user(&profile).await?;
            if ctx.common.json {
                ctx.print_json(&profile)
            } else {
                println!("Saved user {}", profile.id);
                Ok(())
            }
        }
    }
}

async fn handle_item(
    ctx: &RuntimeContext,
    backend: Arc<SqliteBackend>,
    command: ItemCommand,
) -> Result<()> {
    match command {
        ItemCommand::Add {
            id,
            title,
            owner,
            kind,
        } => {
            let item = ItemSummary::new(id, title);
            backend.upsert_item(&item, &owner, kind.into()).await?;
            if ctx.common.json {
                ctx.print_json(&item)
            } else {
                println!("Saved item {}", item.id);
                Ok(())
            }
        }
    }
}

fn handle_init(ctx: &RuntimeContext, cmd: InitCommand) -> Result<()> {
    if ctx.paths.config_file.exists() && !(cmd.force || ctx.common.assume_yes) {
        return Err(anyhow!(
            "config already exists at {} (use --force to overwrite)",
            ctx.paths.config_file.display()
        ));
    }

    config::write_default_config(&ctx.paths.config_file)?;
    std::fs::create_dir_all(&ctx.paths.data_dir).with_context(|| {
        format!("creating data directory {}", ctx.paths.data_dir.display())
    })?;
    info!("Wrote {}", ctx.paths.config_file.display());
    Ok(())
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            if ctx.common.json {
                ctx.print_json(&ctx.config)
            } else {
                print!(
                    "{}",
                    toml::to_string_pretty(&ctx.config).context("serializing config to TOML")?
                );
                Ok(())
            }
        }
        ConfigCommand::Path => {
            println!("{}", ctx.paths.config_file.display());
            Ok(())
        }
        ConfigCommand::Reset => config::write_default_config(&ctx.paths.config_file),
    }
}

fn handle_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
    Ok(())
}

fn format_conversation(conversation: &Conversation) -> String {
    let mut line = format!("{} ({})", conversation.other_name, conversation.other_id);
    if conversation.has_unread() {
        line.push_str(&format!(" [{} unread]", conversation.unread));
    }
    line.push_str(&format!(
        "  {}  {}",
        conversation.last_message_at.format("%Y-%m-%d %H:%M"),
        conversation.last_message
    ));
    if let Some(ref title) = conversation.item_title {
        line.push_str(&format!("  re: {title}"));
    }
    line
}

fn format_message(message: &Message, user_id: &str) -> String {
    let direction = if message.sender_id == user_id {
        "->"
    } else {
        "<-"
    };
    let marker = if message.is_unread_for(user_id) { "*" } else { " " };
    format!(
        "{}{} {} {} {}",
        marker,
        message.sent_at.format("%Y-%m-%d %H:%M"),
        direction,
        message.counterpart(user_id),
        message.preview()
    )
}
