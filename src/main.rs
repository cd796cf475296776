use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tokio::sync::broadcast::error::RecvError;

use mucommander_core::config::{self, Configuration, ConfigurationStore, CoreConfig};
use mucommander_core::history::GlobalLocationHistory;
use mucommander_core::job::{
    CollisionAction, CollisionPolicy, CollisionResolver, CopyJob, FileSet, JobHandle, JobOutcome,
    JobResult, SelfUpdateJob, TransferMode,
};
use mucommander_core::locator::ResourceLocator;
use mucommander_core::platform::ProcessRelauncher;
use mucommander_core::search::{SearchEvent, SearchFile, SearchState};
use mucommander_core::vfs::{
    AbstractFile, BookmarkProvider, BookmarkStore, FileRef, ProtocolRegistry, BOOKMARK_SCHEME,
};

const SAVED_AT_VARIABLE: &str = "snapshot.saved_at";

#[derive(Parser, Debug)]
#[command(name = "mucommander", version, about = "Browse, search and copy across local, archive and virtual filesystems")]
struct Cli {
    /// Session snapshot holding history and bookmarks
    #[arg(long, global = true)]
    snapshot: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List a folder, archive, bookmark or search result
    Ls {
        /// Locator (`zip:///tmp/a.jar/META-INF`) or local path
        location: String,
        /// Include hidden files
        #[arg(short, long)]
        all: bool,
    },
    /// Run a search, e.g. `find://home/user?pattern=*.rs&content=TODO`
    Find {
        location: String,
        /// Print the final status as JSON
        #[arg(long)]
        json: bool,
    },
    /// Copy, move or download files into a folder
    Copy {
        #[arg(required = true)]
        sources: Vec<String>,
        /// Destination folder
        #[arg(short, long)]
        destination: String,
        /// New name, when copying a single file
        #[arg(long)]
        name: Option<String>,
        #[arg(long, value_enum, default_value_t = ModeArg::Copy)]
        mode: ModeArg,
        #[arg(long, value_enum, default_value_t = PolicyArg::Ask)]
        on_collision: PolicyArg,
    },
    /// Show recently visited locations
    History {
        /// Only show locations that still resolve
        #[arg(long)]
        resolve: bool,
        /// Forget every location
        #[arg(long)]
        clear: bool,
    },
    /// Record a visit to a location
    Visit { location: String },
    /// Manage bookmarks (browse them with `ls bookmark://`)
    #[command(subcommand)]
    Bookmark(BookmarkCommand),
    /// Replace the installed archive with a new one and relaunch
    SelfUpdate {
        /// The new archive
        source: String,
        /// The installed archive
        installed: PathBuf,
        #[arg(long, default_value = "mucommander")]
        launcher: String,
    },
}

#[derive(Subcommand, Debug)]
enum BookmarkCommand {
    Add { name: String, location: String },
    Remove { name: String },
    List,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum ModeArg {
    Copy,
    Download,
    Move,
}

impl From<ModeArg> for TransferMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Copy => TransferMode::Copy,
            ModeArg::Download => TransferMode::Download,
            ModeArg::Move => TransferMode::Move,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum PolicyArg {
    Overwrite,
    OverwriteIfOlder,
    Skip,
    Rename,
    Ask,
    Resume,
}

impl From<PolicyArg> for CollisionPolicy {
    fn from(policy: PolicyArg) -> Self {
        match policy {
            PolicyArg::Overwrite => CollisionPolicy::Overwrite,
            PolicyArg::OverwriteIfOlder => CollisionPolicy::OverwriteIfOlder,
            PolicyArg::Skip => CollisionPolicy::Skip,
            PolicyArg::Rename => CollisionPolicy::Rename,
            PolicyArg::Ask => CollisionPolicy::Ask,
            PolicyArg::Resume => CollisionPolicy::Resume,
        }
    }
}

/// Configuration, registry, history and bookmarks for one invocation.
struct Session {
    snapshot_path: PathBuf,
    snapshot: Configuration,
    config: CoreConfig,
    registry: Arc<ProtocolRegistry>,
    history: GlobalLocationHistory,
    bookmarks: Arc<BookmarkStore>,
}

impl Session {
    fn open(snapshot_path: Option<PathBuf>) -> Result<Self, Box<dyn std::error::Error>> {
        let preferences = Configuration::load(&config::preferences_path())?;
        let config = CoreConfig::from_store(&preferences);

        let snapshot_path = snapshot_path.unwrap_or_else(config::snapshot_path);
        let snapshot = Configuration::load(&snapshot_path)?;

        let registry = ProtocolRegistry::with_default_providers(&config);
        let bookmarks = Arc::new(BookmarkStore::new());
        bookmarks.load(&snapshot);
        registry.register(BOOKMARK_SCHEME, BookmarkProvider::new(Arc::clone(&bookmarks)));

        let history = GlobalLocationHistory::new(config.history_capacity);
        history.load(&snapshot);

        Ok(Self {
            snapshot_path,
            snapshot,
            config,
            registry,
            history,
            bookmarks,
        })
    }

    fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.history.flush(&self.snapshot);
        self.bookmarks.flush(&self.snapshot);
        self.snapshot
            .set_variable(SAVED_AT_VARIABLE, &chrono::Utc::now().to_rfc3339());
        self.snapshot.save(&self.snapshot_path)?;
        Ok(())
    }

    fn resolve(&self, location: &str) -> Result<FileRef, Box<dyn std::error::Error>> {
        Ok(self.registry.get_file(&parse_location(location)?)?)
    }
}

/// Locators are taken as-is; anything without a scheme is a local path.
fn parse_location(location: &str) -> Result<ResourceLocator, Box<dyn std::error::Error>> {
    if location.contains("://") {
        Ok(ResourceLocator::parse(location)?)
    } else {
        Ok(ResourceLocator::from_path(Path::new(location)))
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("{} {}", "✗".red(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let session = Session::open(cli.snapshot)?;

    match cli.command {
        Command::Ls { location, all } => ls(&session, &location, all).await?,
        Command::Find { location, json } => find(&session, &location, json).await?,
        Command::Copy {
            sources,
            destination,
            name,
            mode,
            on_collision,
        } => copy(&session, &sources, &destination, name, mode.into(), on_collision.into()).await?,
        Command::History { resolve, clear } => history(&session, resolve, clear),
        Command::Visit { location } => {
            let file = session.resolve(&location)?;
            session.history.record_visit(file.locator());
            println!("{} Visited {}", "✓".green(), file.locator().to_string().cyan());
        }
        Command::Bookmark(command) => bookmark(&session, command)?,
        Command::SelfUpdate {
            source,
            installed,
            launcher,
        } => {
            // The job ends the process on success; persist the session first.
            session.save()?;
            return self_update(&session, &source, &installed, &launcher).await;
        }
    }

    session.save()
}

async fn ls(session: &Session, location: &str, all: bool) -> Result<(), Box<dyn std::error::Error>> {
    let folder = session.resolve(location)?;
    if !folder.is_browsable() {
        return Err(format!("{} is not a folder", folder.locator()).into());
    }

    let entries = match folder.as_any().downcast_ref::<SearchFile>() {
        Some(search) => {
            search.wait().await?;
            search.children()
        }
        None => folder.ls()?,
    };
    session.history.record_visit(folder.locator());

    println!("{}", folder.locator().to_string().bold());
    for entry in entries {
        let attributes = match entry.attributes() {
            Ok(attributes) => attributes,
            Err(e) => {
                eprintln!("  {} {}: {}", "!".yellow(), entry.name(), e);
                continue;
            }
        };
        if attributes.hidden && !all {
            continue;
        }

        let modified = attributes
            .modified
            .map(|time| {
                chrono::DateTime::<chrono::Local>::from(time)
                    .format("%Y-%m-%d %H:%M")
                    .to_string()
            })
            .unwrap_or_else(|| "-".repeat(16));
        let name = if attributes.is_dir() || entry.is_browsable() {
            format!("{}/", entry.name()).blue().bold().to_string()
        } else {
            entry.name()
        };
        println!(
            "  {} {:>12} {}  {}",
            attributes.permissions.as_deref().unwrap_or("-").dimmed(),
            attributes.size,
            modified.dimmed(),
            name
        );
    }
    Ok(())
}

async fn find(session: &Session, location: &str, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let file = session.resolve(location)?;
    let search = file
        .as_any()
        .downcast_ref::<SearchFile>()
        .cloned()
        .ok_or_else(|| format!("{} is not a search (use find://...)", file.locator()))?;

    let mut events = search.subscribe();
    {
        let search = search.clone();
        ctrlc::set_handler(move || {
            tracing::info!("Stopping search (Ctrl+C)");
            search.stop();
        })?;
    }
    search.start()?;

    loop {
        match events.recv().await {
            Ok(SearchEvent::Found(found)) => {
                if !json {
                    println!("{}", found.locator());
                }
            }
            Ok(SearchEvent::Error { locator, message }) => {
                tracing::warn!("{}: {}", locator, message);
            }
            Ok(SearchEvent::Started) => {}
            Ok(SearchEvent::Finished(_)) | Err(RecvError::Closed) => break,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Output lagging, {} events dropped", skipped);
            }
        }
    }

    let state = search.wait().await?;
    let status = search.status();
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let summary = format!(
        "{} matches, {} folders and {} files scanned",
        status.matches, status.scanned_folders, status.scanned_files
    );
    match state {
        SearchState::Completed if search.has_errors() => {
            println!("{} Completed with {} errors: {}", "!".yellow(), status.errors, summary)
        }
        SearchState::Completed => println!("{} Completed: {}", "✓".green(), summary),
        SearchState::Cancelled => println!("{} Cancelled: {}", "○".dimmed(), summary),
        _ => {
            let reason = status.failure.unwrap_or_else(|| state.as_str().to_string());
            return Err(format!("search failed: {}", reason).into());
        }
    }
    if status.truncated {
        println!("  {}", "(stopped at the result limit)".dimmed());
    }
    Ok(())
}

/// Asks on the terminal what to do with each collision.
struct PromptResolver;

impl CollisionResolver for PromptResolver {
    fn resolve(&self, source: &dyn AbstractFile, destination: &dyn AbstractFile) -> CollisionAction {
        eprintln!();
        eprintln!(
            "{} {} already exists (source: {})",
            "?".yellow(),
            destination.locator().to_string().cyan(),
            source.locator()
        );
        loop {
            eprint!("  [o]verwrite, [s]kip, [r]ename, res[u]me, [c]ancel: ");
            let _ = io::stderr().flush();
            let mut answer = String::new();
            if io::stdin().lock().read_line(&mut answer).unwrap_or(0) == 0 {
                return CollisionAction::Cancel;
            }
            match answer.trim().to_ascii_lowercase().as_str() {
                "o" | "overwrite" => return CollisionAction::Overwrite,
                "s" | "skip" => return CollisionAction::Skip,
                "r" | "rename" => return CollisionAction::Rename,
                "u" | "resume" => return CollisionAction::Resume,
                "c" | "cancel" => return CollisionAction::Cancel,
                _ => continue,
            }
        }
    }
}

async fn copy(
    session: &Session,
    sources: &[String],
    destination: &str,
    name: Option<String>,
    mode: TransferMode,
    policy: CollisionPolicy,
) -> Result<(), Box<dyn std::error::Error>> {
    let files = sources
        .iter()
        .map(|source| session.resolve(source))
        .collect::<Result<Vec<_>, _>>()?;
    let destination = session.resolve(destination)?;

    let job = CopyJob::new(FileSet::new(None, files), Arc::clone(&destination), name, mode, policy)
        .with_buffer_size(session.config.copy_buffer_size)
        .with_resolver(Arc::new(PromptResolver));
    let handle = JobHandle::spawn(job)?;
    let result = follow(handle).await?;

    session.history.record_visit(destination.locator());
    report(&result);
    Ok(())
}

async fn self_update(
    session: &Session,
    source: &str,
    installed: &Path,
    launcher: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let source = session.resolve(source)?;
    let installed = session.resolve(&installed.display().to_string())?;

    let job = SelfUpdateJob::new(
        source,
        installed,
        Arc::clone(&session.registry),
        Arc::new(ProcessRelauncher::new(launcher)),
    )?
    .with_preload_extension(session.config.preload_extension.clone());
    let result = follow(JobHandle::spawn(job)?).await?;
    report(&result);
    Ok(())
}

/// Prints the job status until it finishes; Ctrl+C cancels it.
async fn follow(handle: JobHandle) -> Result<JobResult, Box<dyn std::error::Error>> {
    let cancel = handle.cancellation();
    ctrlc::set_handler(move || {
        tracing::info!("Cancelling job (Ctrl+C)");
        cancel.cancel();
    })?;

    let mut last = String::new();
    while !handle.is_finished() {
        let status = handle.status_string();
        if status != last {
            eprint!("\r\x1b[2K{}", status.dimmed());
            let _ = io::stderr().flush();
            last = status;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    eprintln!();

    Ok(handle.join())
}

fn report(result: &JobResult) {
    for error in &result.errors {
        eprintln!("  {} {}: {}", "✗".red(), error.locator, error.message);
    }
    let summary = format!(
        "{} files, {} skipped, {} bytes",
        result.files_processed, result.files_skipped, result.bytes_transferred
    );
    match result.outcome {
        JobOutcome::Completed => println!("{} {}: {}", "✓".green(), result.outcome.as_str(), summary),
        JobOutcome::CompletedWithErrors => {
            println!("{} {}: {}", "!".yellow(), result.outcome.as_str(), summary)
        }
        JobOutcome::Interrupted | JobOutcome::Failed => {
            println!("{} {}: {}", "✗".red(), result.outcome.as_str(), summary)
        }
    }
}

fn history(session: &Session, resolve: bool, clear: bool) {
    if clear {
        session.history.clear();
        println!("{} History cleared", "✓".green());
        return;
    }

    let locations: Vec<String> = if resolve {
        session
            .history
            .history(&session.registry)
            .iter()
            .map(|file| file.locator().to_string())
            .collect()
    } else {
        session
            .history
            .locations()
            .iter()
            .map(ResourceLocator::to_string)
            .collect()
    };

    if locations.is_empty() {
        println!("{} No locations visited yet", "○".dimmed());
    }
    // Most recent first.
    for (i, location) in locations.iter().rev().enumerate() {
        println!("{:>3}  {}", (i + 1).to_string().dimmed(), location);
    }
}

fn bookmark(session: &Session, command: BookmarkCommand) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        BookmarkCommand::Add { name, location } => {
            let locator = parse_location(&location)?;
            session.bookmarks.add(&name, locator.clone());
            println!("{} Bookmarked {} as {}", "✓".green(), locator.to_string().cyan(), name.bold());
        }
        BookmarkCommand::Remove { name } => {
            if session.bookmarks.remove(&name) {
                println!("{} Removed bookmark {}", "✓".green(), name.bold());
            } else {
                println!("{} No bookmark named {}", "○".dimmed(), name);
            }
        }
        BookmarkCommand::List => {
            let bookmarks = session.bookmarks.list();
            if bookmarks.is_empty() {
                println!("{} No bookmarks", "○".dimmed());
            }
            for bookmark in bookmarks {
                println!("  {}  {}", bookmark.name.bold(), bookmark.location.to_string().cyan());
            }
        }
    }
    Ok(())
}
