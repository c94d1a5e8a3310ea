use std::error::Error;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use uuid::Uuid;

use smart_bookmarks::backend::{AuthProvider, GoTrueClient, PostgrestClient, RealtimeClient, SessionStore};
use smart_bookmarks::config::ClientConfig;
use smart_bookmarks::dashboard::{AddBookmarkForm, ConsoleAlerts, Dashboard, view};
use smart_bookmarks::error::AppError;
use smart_bookmarks::logging::init_logging;
use smart_bookmarks::models::Session;
use smart_bookmarks::version::VERSION;

/// Sessions this close to expiry are refreshed before use.
const REFRESH_LEEWAY_SECONDS: i64 = 60;

const WATCH_HELP: &str = "commands: search <q> | clear | add <url> <title...> | delete <id> | refresh | quit";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in with email and password
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Create an account
    Signup {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Sign out and forget the stored session
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Print your bookmarks
    List {
        #[arg(long)]
        search: Option<String>,
    },
    /// Save a new bookmark
    Add {
        #[arg(long)]
        title: String,
        #[arg(long)]
        url: String,
    },
    /// Delete a bookmark by id
    Delete { id: Uuid },
    /// Live dashboard that follows changes from other devices
    Watch,
    /// Print the client version
    Version,
}

enum Flow {
    Redraw,
    Stay,
    Quit,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let args = Args::parse();

    if let Command::Version = args.command {
        println!("bookmarks {VERSION}");
        return Ok(());
    }

    let config = ClientConfig::load(args.config.as_deref())?;
    let _log_guard = init_logging(&config.log_dir);
    info!(version = VERSION, "Starting bookmarks client.");

    let auth = GoTrueClient::new(&config);
    let store = SessionStore::new(&config.session_file);

    match args.command {
        Command::Version => {}
        Command::Login { email, password } => {
            let session = auth.sign_in_with_password(&email, &password).await?;
            store.save(&session)?;
            println!("Signed in as {}", session.user.email.as_deref().unwrap_or(&email));
        }
        Command::Signup { email, password } => match auth.sign_up(&email, &password).await? {
            Some(session) => {
                store.save(&session)?;
                println!("Account created. Signed in as {email}");
            }
            None => println!("Account created. Check {email} for a confirmation link, then log in."),
        },
        Command::Logout => {
            match store.take()? {
                Some(session) => {
                    let dashboard = open_dashboard(&config, &session);
                    dashboard.sign_out(&auth, &session.access_token).await;
                }
                None => warn!("No usable stored session; nothing to sign out."),
            }
            println!("Signed out.");
        }
        Command::Whoami => {
            let session = active_session(&auth, &store).await?;
            match session.claims() {
                Ok(claims) => println!(
                    "{} {}",
                    claims.sub,
                    claims.email.or(session.user.email).unwrap_or_default()
                ),
                Err(e) => {
                    warn!(error = %e, "Could not read access token claims.");
                    println!("{} {}", session.user.id, session.user.email.unwrap_or_default());
                }
            }
        }
        Command::List { search } => {
            let session = active_session(&auth, &store).await?;
            let mut dashboard = open_dashboard(&config, &session);
            if let Some(query) = search {
                dashboard.set_search_query(query);
            }
            dashboard.fetch_bookmarks().await;
            print!("{}", view::render(&dashboard)?);
        }
        Command::Add { title, url } => {
            let session = active_session(&auth, &store).await?;
            let mut dashboard = open_dashboard(&config, &session);
            dashboard.open_add_modal();
            let created = dashboard.add_bookmark(&AddBookmarkForm::new(title, url)).await?;
            println!("Added \"{}\" ({}) [{}]", created.title, created.url, created.id);
        }
        Command::Delete { id } => {
            let session = active_session(&auth, &store).await?;
            let mut dashboard = open_dashboard(&config, &session);
            dashboard.fetch_bookmarks().await;
            dashboard.delete_bookmark(id).await;
            print!("{}", view::render(&dashboard)?);
        }
        Command::Watch => {
            let session = active_session(&auth, &store).await?;
            watch(&config, &session).await?;
        }
    }

    Ok(())
}

fn open_dashboard(config: &ClientConfig, session: &Session) -> Dashboard {
    let repo = PostgrestClient::new(config, session.access_token.clone());
    Dashboard::new(session.user.clone(), Arc::new(repo), Arc::new(ConsoleAlerts))
}

/// The stored session, refreshed first when it is about to expire.
async fn active_session(auth: &GoTrueClient, store: &SessionStore) -> Result<Session, AppError> {
    let session = store
        .load()?
        .ok_or_else(|| AppError::NotAuthenticated("run `bookmarks login` first".to_string()))?;

    if !session.is_expired(REFRESH_LEEWAY_SECONDS) {
        return Ok(session);
    }

    info!(user_id = %session.user.id, "Session expired, refreshing.");
    let refreshed = auth.refresh_session(&session.refresh_token).await?;
    store.save(&refreshed)?;
    Ok(refreshed)
}

async fn watch(config: &ClientConfig, session: &Session) -> Result<(), AppError> {
    let feed = RealtimeClient::new(config, session.access_token.clone());
    let mut dashboard = open_dashboard(config, session);
    dashboard.mount(&feed).await;
    redraw(&dashboard);
    eprintln!("{WATCH_HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            change = dashboard.next_change(), if dashboard.is_live() => {
                if let Some(event) = change {
                    info!(kind = event.kind(), bookmark_id = %event.bookmark_id(), "Change received.");
                    dashboard.apply_change(event);
                    redraw(&dashboard);
                }
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => match run_command(&mut dashboard, &line).await {
                    Flow::Redraw => redraw(&dashboard),
                    Flow::Stay => {}
                    Flow::Quit => break,
                },
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "Failed to read stdin.");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted.");
                break;
            }
        }
    }

    dashboard.unmount().await;
    Ok(())
}

async fn run_command(dashboard: &mut Dashboard, line: &str) -> Flow {
    let line = line.trim();
    let (command, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();

    match command {
        "" => Flow::Stay,
        "quit" | "exit" => Flow::Quit,
        "search" => {
            dashboard.set_search_query(rest);
            Flow::Redraw
        }
        "clear" => {
            dashboard.set_search_query("");
            Flow::Redraw
        }
        "refresh" => {
            dashboard.fetch_bookmarks().await;
            Flow::Redraw
        }
        "add" => {
            let (url, title) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            dashboard.open_add_modal();
            match dashboard.add_bookmark(&AddBookmarkForm::new(title.trim(), url)).await {
                Ok(created) => {
                    eprintln!("Saved \"{}\".", created.title);
                    Flow::Stay
                }
                Err(e) => {
                    dashboard.close_add_modal();
                    eprintln!("{e}");
                    Flow::Stay
                }
            }
        }
        "delete" => match rest.parse::<Uuid>() {
            Ok(id) => {
                dashboard.delete_bookmark(id).await;
                Flow::Redraw
            }
            Err(_) => {
                eprintln!("Not a bookmark id: {rest}");
                Flow::Stay
            }
        },
        _ => {
            eprintln!("{WATCH_HELP}");
            Flow::Stay
        }
    }
}

fn redraw(dashboard: &Dashboard) {
    match view::render(dashboard) {
        Ok(text) => println!("\n{text}"),
        Err(e) => error!(error = %e, "Failed to render dashboard."),
    }
}
