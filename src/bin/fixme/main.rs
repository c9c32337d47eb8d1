//! fixme CLI tool
//!
//! Command-line front end for managing projects and watching them.
//!
//! ## Commands
//!
//! - `watch`: Run the watch loop of a project, printing one JSON notification per check pass
//! - `check`: Run a single check pass and exit non-zero when it fails
//! - `list` / `new` / `delete`: Manage stored projects
//! - `find`: Look up packages by their short name
//! - `add` / `remove`: Change which packages a project checks
//!
//! Projects and the optional `config.toml` live in the data directory (`--data-dir`), which
//! defaults to the platform data directory.

use clap::{Parser, Subcommand};
use fixme::{
    commands::{Op, OpResult, Session},
    config::{FixmeConfig, ProjectStore, TomlProjectStore, CONFIG_FILE},
    discovery::PackageDiscovery,
    event::Notification,
    package::Action,
    project::{ProjectId, ProjectRecord, ProjectServices},
    FixmeError,
};
use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

#[derive(Parser)]
#[command(name = "fixme")]
#[command(author, version, about = "Incrementally build, test and lint Go packages as they change", long_about = None)]
struct Cli {
    /// Directory holding config.toml and the project store
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch a project and report every check pass as a JSON line
    Watch {
        /// Project id (default: first stored project)
        #[arg(long)]
        project: Option<ProjectId>,
    },

    /// Run one check pass and exit
    Check {
        #[arg(long)]
        project: Option<ProjectId>,
    },

    /// List stored projects
    List,

    /// Find packages whose last import path segment is NAME
    Find { name: String },

    /// Create a new project
    New {
        #[arg(long)]
        name: Option<String>,
    },

    /// Delete a stored project
    Delete { id: ProjectId },

    /// Add a package to a project, or change its action
    Add {
        /// Import path of the package
        import_path: String,

        /// One of watch, test, lint
        #[arg(long, default_value = "test")]
        action: String,

        #[arg(long)]
        project: Option<ProjectId>,
    },

    /// Remove a package from a project
    Remove {
        import_path: String,

        #[arg(long)]
        project: Option<ProjectId>,
    },
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("fixme"))
        .unwrap_or_else(|| PathBuf::from(".fixme"))
}

fn open_session(data_dir: &Path, project: Option<ProjectId>) -> Result<Session, FixmeError> {
    let config = FixmeConfig::load(data_dir.join(CONFIG_FILE))?;
    let discovery = Arc::new(PackageDiscovery::scan(&config.source_roots)?);
    tracing::debug!("Discovered {} packages", discovery.len());
    let store: Arc<dyn ProjectStore> =
        Arc::new(TomlProjectStore::new(config.store_path(data_dir)));
    let services = ProjectServices::from_config(&config, discovery, Some(store))?;
    let mut session = Session::open(services)?;
    if project.is_some() {
        session.handle(Op::LoadProject(project))?;
    }
    Ok(session)
}

fn print_record(record: &ProjectRecord) {
    println!("{}  {}", record.id, record.name);
    for pkg in record.packages.iter() {
        println!("    {:<6} {}", pkg.action.to_string(), pkg.import_path);
    }
}

fn print_notification(notification: &Notification) -> Result<(), FixmeError> {
    println!("{}", serde_json::to_string(notification)?);
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);

    match cli.command {
        Commands::Watch { project } => {
            let running = Arc::new(AtomicBool::new(true));
            let r = running.clone();
            ctrlc::set_handler(move || {
                r.store(false, Ordering::SeqCst);
            })?;

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(async {
                let mut session = open_session(&data_dir, project)?;
                let mut updates = session.project().subscribe();
                session.start()?;
                eprintln!(
                    "Watching {} ({}). Press Ctrl-C to stop.",
                    session.project().name(),
                    session.project().id()
                );

                while running.load(Ordering::SeqCst) {
                    tokio::select! {
                        update = updates.recv() => match update {
                            Some(notification) => print_notification(&notification)?,
                            None => break,
                        },
                        _ = tokio::time::sleep(Duration::from_millis(100)) => {}
                    }
                }

                session.shutdown().await?;
                Ok::<(), FixmeError>(())
            })?;
            Ok(())
        }

        Commands::Check { project } => {
            let session = open_session(&data_dir, project)?;
            session.project().resolve()?;
            let outcome = session.project().run_once();
            print_notification(&Notification::from(&outcome))?;
            if !outcome.is_passing() {
                std::process::exit(1);
            }
            Ok(())
        }

        Commands::List => {
            let mut session = open_session(&data_dir, None)?;
            if let OpResult::Projects(records) = session.handle(Op::ListProjects)? {
                for record in records.iter() {
                    println!("{}  {}", record.id, record.name);
                }
            }
            Ok(())
        }

        Commands::Find { name } => {
            let mut session = open_session(&data_dir, None)?;
            if let OpResult::Packages(found) = session.handle(Op::FindPackages(name))? {
                for import_path in found.iter() {
                    println!("{import_path}");
                }
            }
            Ok(())
        }

        Commands::New { name } => {
            let mut session = open_session(&data_dir, None)?;
            session.handle(Op::NewProject)?;
            if let Some(name) = name {
                session.handle(Op::SetName(name))?;
            }
            print_record(&session.project().record());
            Ok(())
        }

        Commands::Delete { id } => {
            let mut session = open_session(&data_dir, Some(id))?;
            session.handle(Op::DeleteProject)?;
            println!("Deleted {id}");
            Ok(())
        }

        Commands::Add {
            import_path,
            action,
            project,
        } => {
            let action: Action = action.parse()?;
            let mut session = open_session(&data_dir, project)?;
            if session
                .project()
                .services()
                .discovery
                .by_import(&import_path)
                .is_none()
            {
                return Err(FixmeError::NotFound(format!("package {import_path}")).into());
            }
            session.handle(Op::SetPackageAction {
                import_path,
                action: action.to_string(),
            })?;
            print_record(&session.project().record());
            Ok(())
        }

        Commands::Remove {
            import_path,
            project,
        } => {
            let mut session = open_session(&data_dir, project)?;
            if session.project_mut().remove(&import_path)?.is_none() {
                return Err(FixmeError::NotFound(format!("package {import_path} in project")).into());
            }
            print_record(&session.project().record());
            Ok(())
        }
    }
}
