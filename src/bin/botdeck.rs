// botdeck - manage a Twitter posting bot from the terminal
//
// Usage:
//   cargo run --bin botdeck -- status
//   cargo run --bin botdeck -- connect
//   cargo run --bin botdeck -- save --name "Shitposter" --interval 30
//   cargo run --bin botdeck -- link-twitter

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use botdeck::dashboard::api::{BackendClient, BotBackend};
use botdeck::dashboard::callback_server::CallbackServer;
use botdeck::dashboard::controller::{DashboardController, SaveOutcome};
use botdeck::dashboard::coordinator::OAuthCoordinator;
use botdeck::dashboard::errors::DashboardError;
use botdeck::dashboard::identity::Session;
use botdeck::dashboard::messages::HandshakeOutcome;
use botdeck::dashboard::payment::{CreationFee, PaymentReceipt};
use botdeck::dashboard::popup::{CommandPopupHost, MessageBus};
use botdeck::dashboard::storage::FileFlagStore;
use botdeck::dashboard::types::SetupStep;
use botdeck::dashboard::wallet::{LocalKeyWallet, WalletProvider};
use botdeck::DashboardConfig;

#[derive(Parser)]
#[command(name = "botdeck")]
#[command(about = "Configure, fund and run your Twitter bot")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show wallet, bot configuration and setup progress
    Status,
    /// Connect the wallet (clears a previous disconnect)
    Connect,
    /// Disconnect the wallet and stay disconnected across restarts
    Disconnect,
    /// Create the bot (charging the creation fee) or update it
    Save {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        prompt: Option<String>,
        /// Minutes between posts
        #[arg(long)]
        interval: Option<u32>,
    },
    /// Activate or deactivate the bot
    Toggle,
    /// Link a Twitter account through the authorization popup
    LinkTwitter,
    /// Remove the linked Twitter account
    UnlinkTwitter,
}

// ─────────────────────────────────────────────────────────
// Logging
// ─────────────────────────────────────────────────────────

fn init_tracing(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = tracing_subscriber::fmt::layer().with_target(false);

    let Some(dir) = log_dir else {
        tracing_subscriber::registry().with(filter).with(console).init();
        return Ok(None);
    };

    // rolling::daily panics when it cannot create the file.
    std::fs::create_dir_all(dir)
        .with_context(|| format!("cannot create log directory {}", dir.display()))?;
    let appender = tracing_appender::rolling::daily(dir, "botdeck.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false);
    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .init();
    Ok(Some(guard))
}

/// Await one controller action, turning a failure into the banner text.
macro_rules! attempt {
    ($dash:ident . $($call:tt)+) => {{
        let result = $dash.$($call)+.await;
        result.map_err(|e| banner(&$dash, e))
    }};
}

// ─────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    let cfg = DashboardConfig::from_env()?;
    let _log_guard = init_tracing(cfg.log_dir.as_deref())?;

    let flags = Arc::new(FileFlagStore::new(&cfg.state_dir));
    let wallet = LocalKeyWallet::from_config(&cfg.wallet)?
        .map(|w| Arc::new(w) as Arc<dyn WalletProvider>);
    let session = Arc::new(Session::new(wallet, flags));
    let _wallet_events = session.listen();
    session.initialize().await?;

    let client = BackendClient::new(&cfg.backend, Arc::clone(&session))?;
    let backend: Arc<dyn BotBackend> = Arc::new(client);
    let bus = MessageBus::default();
    let coordinator = Arc::new(OAuthCoordinator::new(
        cfg.coordinator.clone(),
        Arc::clone(&backend),
        Arc::new(CommandPopupHost::from_env()),
        bus.clone(),
        Arc::clone(&session),
    ));
    let mut dash = DashboardController::new(
        Arc::clone(&session),
        backend,
        coordinator,
        CreationFee::new(cfg.payment.clone()),
    );

    match args.command {
        Command::Status => {
            if session.current().is_some() {
                attempt!(dash.load())?;
            }
            print_status(&dash);
        }
        Command::Connect => {
            let identity = attempt!(dash.connect_wallet())?;
            println!("Connected {}", identity.short());
        }
        Command::Disconnect => {
            dash.disconnect_wallet().map_err(|e| banner(&dash, e))?;
            println!("Disconnected");
        }
        Command::Save { name, prompt, interval } => {
            if session.current().is_some() {
                attempt!(dash.load())?;
            }
            if let Some(name) = name { dash.set_name(name); }
            if let Some(prompt) = prompt { dash.set_system_prompt(prompt); }
            if let Some(interval) = interval { dash.set_post_interval(interval); }

            match attempt!(dash.save())? {
                SaveOutcome::WalletConnected(identity) => {
                    println!("Connected {}. Run save again to create your bot.", identity.short());
                }
                SaveOutcome::Created(PaymentReceipt::Waived) => {
                    println!("Bot created (testing mode, no fee)");
                }
                SaveOutcome::Created(PaymentReceipt::Paid { tx_hash }) => {
                    println!("Bot created, fee paid in {}", tx_hash);
                }
                SaveOutcome::Updated => println!("Bot updated"),
            }
        }
        Command::Toggle => {
            attempt!(dash.load())?;
            let active = attempt!(dash.toggle_active())?;
            println!("Bot is now {}", if active { "active" } else { "inactive" });
        }
        Command::LinkTwitter => {
            attempt!(dash.load())?;
            if let Some(username) = dash.bot().linked_account.as_deref() {
                println!("Already linked @{}", username);
                return Ok(());
            }
            let server = CallbackServer::start(cfg.callback_addr, bus, None).await?;
            info!("🐦 Waiting for Twitter at {}", server.callback_url());
            let outcome = attempt!(dash.link_twitter());
            server.shutdown().await;
            match outcome? {
                HandshakeOutcome::Linked(account) => println!("Linked @{}", account.username),
                HandshakeOutcome::Abandoned => println!("Authorization window closed"),
                HandshakeOutcome::TimedOut => println!("Authorization timed out"),
            }
        }
        Command::UnlinkTwitter => {
            attempt!(dash.unlink_twitter())?;
            println!("Twitter account unlinked");
        }
    }
    Ok(())
}

fn banner(dash: &DashboardController, err: DashboardError) -> anyhow::Error {
    let text = dash
        .banner()
        .map(str::to_string)
        .unwrap_or_else(|| err.user_message());
    anyhow::Error::new(err).context(text)
}

fn print_status(dash: &DashboardController) {
    println!("\n=== BOTDECK ===\n");
    match dash.session().current() {
        Some(identity) => println!("{:<12} {}", "Wallet", identity.short()),
        None => {
            println!("{:<12} not connected", "Wallet");
            return;
        }
    }

    let bot = dash.bot();
    let step = match dash.setup_step() {
        SetupStep::ConfigureBot => "configure your bot",
        SetupStep::ConnectTwitter => "connect Twitter",
        SetupStep::Ready => "ready",
    };
    println!("{:<12} {}", "Setup", step);
    if !bot.bot_created {
        return;
    }
    println!("{:<12} {}", "Name", bot.draft.name);
    println!("{:<12} every {} min", "Posts", bot.draft.post_interval);
    println!("{:<12} {}", "Active", if bot.is_active { "yes" } else { "no" });
    let twitter = bot
        .linked_account
        .as_deref()
        .map(|u| format!("@{u}"))
        .unwrap_or_else(|| "not linked".into());
    println!("{:<12} {}", "Twitter", twitter);
    if !bot.draft.system_prompt.is_empty() {
        println!("{:<12} {}", "Prompt", bot.draft.system_prompt);
    }
}
