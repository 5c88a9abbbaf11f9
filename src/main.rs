//! tabsync command-line interface.
//!
//! A thin consumer of the library crate: opens the SQLite-backed store,
//! builds the directory/collection/engine facades, and maps subcommands
//! onto their operations.

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde_json::json;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tabsync::cli::{Cli, Command, ExportArgs, TabCommand, TaskCommand};
use tabsync::collection::{TaskCollection, TaskPatch};
use tabsync::config::Config;
use tabsync::directory::TabDirectory;
use tabsync::migrate;
use tabsync::paths;
use tabsync::session::FileSession;
use tabsync::store::{SqliteStore, Store};
use tabsync::sync::SyncEngine;
use tabsync::types::{Tab, Task, TaskStatus, UserRef};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tabsync::logging::init(&cli.log, cli.verbose)?;

    let mut config = Config::load(cli.config.as_deref().map(Path::new))?;
    if let Some(db_path) = &cli.database {
        config.store.db_path = db_path.into();
    }
    config.ensure_dirs()?;

    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::open(&config.store.db_path)
            .with_context(|| format!("failed to open store at {}", config.store.db_path.display()))?,
    );

    match cli.command {
        Command::UserAdd { ref id, ref email } => {
            store
                .write(&format!("{}/email", paths::user(id)), json!(email))
                .await?;
            println!("registered {id} <{email}>");
        }
        Command::Tab(ref cmd) => run_tab(cmd, &cli, Arc::clone(&store)).await?,
        Command::Task(ref cmd) => run_task(cmd, &cli, Arc::clone(&store)).await?,
        Command::Watch => run_watch(&cli, Arc::clone(&store), &config).await?,
        Command::Migrate => {
            let moved = migrate::migrate_user_trees(store.as_ref()).await?;
            println!("migrated {moved} tab(s) into the shared layout");
        }
        Command::Export(ref args) => run_export(args, store.as_ref()).await?,
    }

    Ok(())
}

/// The identity this invocation acts as. Stands in for the identity
/// provider's current session.
fn acting_user(cli: &Cli) -> Result<UserRef> {
    match (&cli.user, &cli.email) {
        (Some(id), Some(email)) => Ok(UserRef::new(id, email)),
        _ => bail!("this command needs --user <id> and --email <address>"),
    }
}

async fn run_tab(cmd: &TabCommand, cli: &Cli, store: Arc<dyn Store>) -> Result<()> {
    let directory = TabDirectory::new(store);
    let user = acting_user(cli)?;
    match cmd {
        TabCommand::List => {
            let tabs = directory.list_visible_tabs(&user.id).await?;
            if tabs.is_empty() {
                println!("no visible tabs");
            }
            for tab in &tabs {
                print_tab(tab, &user.id);
            }
        }
        TabCommand::Create {
            name,
            icon,
            collaborator,
        } => {
            let tab = directory
                .create_tab(name, icon.as_deref(), &user, collaborator.as_deref())
                .await?;
            println!("created tab {} ({})", tab.name, tab.id);
        }
        TabCommand::Rename { tab, name, icon } => {
            directory
                .rename_tab(tab, name.as_deref(), icon.as_deref(), &user)
                .await?;
            println!("updated tab {tab}");
        }
        TabCommand::Invite { tab, email } => {
            directory.add_collaborator(tab, email, &user).await?;
            println!("invited {email} to {tab}");
        }
        TabCommand::Remove { tab, member } => {
            directory.remove_collaborator(tab, member).await?;
            println!("removed {member} from {tab}");
        }
        TabCommand::Leave { tab } => {
            directory.leave_tab(tab, &user.id).await?;
            println!("left {tab}");
        }
        TabCommand::Delete { tab } => {
            directory.delete_tab(tab, &user).await?;
            println!("deleted {tab}");
        }
    }
    Ok(())
}

async fn run_task(cmd: &TaskCommand, cli: &Cli, store: Arc<dyn Store>) -> Result<()> {
    let collection = TaskCollection::new(Arc::clone(&store));
    let user = acting_user(cli)?;
    match cmd {
        TaskCommand::List { tab } => {
            let tasks = collection.list_active_tasks(tab).await?;
            if tasks.is_empty() {
                println!("no tasks");
            }
            for task in &tasks {
                print_task(task);
            }
        }
        TaskCommand::Add {
            tab,
            text,
            start,
            end,
        } => {
            let task = collection
                .create_task(tab, text, *start, *end, &user)
                .await?;
            println!("created task {} ({})", task.text, task.id);
        }
        TaskCommand::Update {
            tab,
            task,
            text,
            start,
            end,
        } => {
            let patch = TaskPatch {
                text: text.clone(),
                start_date: start.map(Some),
                end_date: end.map(Some),
                status: None,
            };
            collection.update_task(tab, task, patch, &user).await?;
            println!("updated task {task}");
        }
        TaskCommand::Status { tab, task, status } => {
            let Some(status) = TaskStatus::parse(status) else {
                bail!(
                    "unknown status {status:?}; expected one of: {}",
                    TaskStatus::ALL.map(|s| s.as_str()).join(", ")
                );
            };
            collection.set_status(tab, task, status, &user).await?;
            println!("set {task} to {}", status.as_str());
        }
        TaskCommand::Assign { tab, task, member } => {
            let assignee = match member {
                Some(id) => {
                    let snapshot = store.get(&paths::tab_member(tab, id)).await?;
                    let email = snapshot
                        .as_ref()
                        .and_then(|v| v.get("email"))
                        .and_then(|v| v.as_str())
                        .unwrap_or_default();
                    Some(UserRef::new(id, email))
                }
                None => None,
            };
            collection
                .set_assignee(tab, task, assignee.as_ref(), &user)
                .await?;
            match &assignee {
                Some(a) => println!("assigned {task} to {}", a.id),
                None => println!("unassigned {task}"),
            }
        }
        TaskCommand::Reorder { tab, ids } => {
            collection.reorder_tasks(tab, ids, &user).await?;
            println!("reordered {} task(s)", ids.len());
        }
        TaskCommand::Rm { tab, task } => {
            collection.delete_task(tab, task, &user).await?;
            println!("deleted {task}");
        }
        TaskCommand::Stats { tab } => {
            let stats = collection.stats(tab).await?;
            println!("total:           {}", stats.total);
            println!("completed:       {}", stats.completed);
            println!("in progress:     {}", stats.in_progress);
            println!("not started:     {}", stats.not_started);
            println!("completion rate: {}%", stats.completion_rate_pct);
        }
    }
    Ok(())
}

async fn run_watch(cli: &Cli, store: Arc<dyn Store>, config: &Config) -> Result<()> {
    let user = acting_user(cli)?;
    let session = Arc::new(FileSession::new(&config.session.state_path));
    let engine = SyncEngine::new(store, session, user.clone());
    let mut changes = engine.changes();
    engine.start()?;
    print_views(&engine, &user.id);
    eprintln!("watching for changes; Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                print_views(&engine, &user.id);
            }
        }
    }
    engine.stop();
    Ok(())
}

async fn run_export(args: &ExportArgs, store: &dyn Store) -> Result<()> {
    let snapshot = store.get("").await?;
    let value = snapshot.unwrap_or_else(|| json!({}));
    let json_output = serde_json::to_string_pretty(&value)?;
    let json_bytes = json_output.as_bytes();

    if let Some(path) = &args.output {
        if args.gzip {
            use flate2::Compression;
            use flate2::write::GzEncoder;

            let file = std::fs::File::create(path)?;
            let mut encoder = GzEncoder::new(file, Compression::default());
            encoder.write_all(json_bytes)?;
            encoder.finish()?;
            eprintln!("exported to {} (gzipped)", path.display());
        } else {
            std::fs::write(path, &json_output)?;
            eprintln!("exported to {}", path.display());
        }
    } else if args.gzip {
        use flate2::Compression;
        use flate2::write::GzEncoder;

        let stdout = std::io::stdout();
        let mut encoder = GzEncoder::new(stdout.lock(), Compression::default());
        encoder.write_all(json_bytes)?;
        encoder.finish()?;
    } else {
        println!("{json_output}");
    }

    Ok(())
}

fn print_tab(tab: &Tab, user_id: &str) {
    let marker = if tab.is_owner(user_id) { "*" } else { " " };
    let icon = tab.icon.as_deref().unwrap_or("-");
    println!(
        "{marker} {}  {}  icon:{}  owner:{}  members:{}",
        tab.id,
        tab.name,
        icon,
        tab.owner.email,
        tab.members.len()
    );
}

fn print_task(task: &Task) {
    let dates = match (task.start_date, task.end_date) {
        (Some(start), Some(end)) => format!("  {start} -> {end}"),
        (Some(start), None) => format!("  {start} ->"),
        (None, Some(end)) => format!("  -> {end}"),
        (None, None) => String::new(),
    };
    let assignee = task
        .assignee
        .as_ref()
        .map(|a| format!("  @{}", a.email))
        .unwrap_or_default();
    println!(
        "{:>3}  [{}]  {}{dates}{assignee}  ({})",
        task.order,
        task.status.as_str(),
        task.text,
        task.id
    );
}

fn print_views(engine: &SyncEngine, user_id: &str) {
    let directory = engine.directory();
    if let Some(error) = &directory.error {
        println!("! directory error: {error}");
    }
    println!("tabs ({}):", directory.tabs.len());
    for tab in &directory.tabs {
        let active = directory.active.as_ref().is_some_and(|a| a.id == tab.id);
        let marker = if active {
            ">"
        } else if tab.is_owner(user_id) {
            "*"
        } else {
            " "
        };
        println!("{marker} {}  {}", tab.id, tab.name);
    }
    let tasks = engine.tasks();
    if let Some(error) = &tasks.error {
        println!("! task error: {error}");
    }
    if let Some(tab_id) = &tasks.tab_id {
        println!("tasks of {tab_id} ({}):", tasks.tasks.len());
        for task in &tasks.tasks {
            print_task(task);
        }
    }
    println!();
}
