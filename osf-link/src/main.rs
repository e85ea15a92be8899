use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use osf_core::OsfClient;
use osf_link::{LinkConfig, NodeView, ProjectRoot, TokenProvider, TreeCache, TreeError};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "\
Usage: osf-link <command> [args]

Commands:
  whoami                                   Show the signed-in account
  projects                                 List projects
  create-project <title>                   Create a project
  tree <project> [--all]                   Show the project's files, --all loads every folder
  read <project> <path>                    Print a remote file to stdout
  write <project> <path> <file> [--overwrite]
                                           Upload a local file, creating folders on the way
  mkdir <project> <path>                   Create a folder path

Environment: OSF_TOKEN, OSF_API_URL, OSF_STORAGE_PROVIDER, OSF_MAX_RETRIES,
OSF_TIMEOUT_SECS, OSF_BACKOFF_MS, RUST_LOG";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    WhoAmI,
    Projects,
    CreateProject { title: String },
    Tree { project: String, all: bool },
    Read { project: String, path: String },
    Write {
        project: String,
        path: String,
        local: PathBuf,
        overwrite: bool,
    },
    Mkdir { project: String, path: String },
    Help,
}

fn parse_command<I>(args: I) -> anyhow::Result<Command>
where
    I: IntoIterator<Item = String>,
{
    let mut positional = Vec::new();
    let mut all = false;
    let mut overwrite = false;
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "--help" | "-h" => return Ok(Command::Help),
            "--all" => all = true,
            "--overwrite" => overwrite = true,
            other if other.starts_with("--") => anyhow::bail!("unknown argument: {other}"),
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let Some(name) = positional.next() else {
        return Ok(Command::Help);
    };
    let rest: Vec<String> = positional.collect();
    let command = match (name.as_str(), rest.as_slice()) {
        ("whoami", []) => Command::WhoAmI,
        ("projects", []) => Command::Projects,
        ("create-project", [title]) => Command::CreateProject {
            title: title.clone(),
        },
        ("tree", [project]) => Command::Tree {
            project: project.clone(),
            all,
        },
        ("read", [project, path]) => Command::Read {
            project: project.clone(),
            path: path.clone(),
        },
        ("write", [project, path, local]) => Command::Write {
            project: project.clone(),
            path: path.clone(),
            local: PathBuf::from(local),
            overwrite,
        },
        ("mkdir", [project, path]) => Command::Mkdir {
            project: project.clone(),
            path: path.clone(),
        },
        ("whoami" | "projects" | "create-project" | "tree" | "read" | "write" | "mkdir", _) => {
            anyhow::bail!("wrong number of arguments for {name}")
        }
        (other, _) => anyhow::bail!("unknown command: {other}"),
    };
    if all && !matches!(command, Command::Tree { .. }) {
        anyhow::bail!("--all only applies to tree");
    }
    if overwrite && !matches!(command, Command::Write { .. }) {
        anyhow::bail!("--overwrite only applies to write");
    }
    Ok(command)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let command = parse_command(std::env::args())?;
    if command == Command::Help {
        println!("{USAGE}");
        return Ok(());
    }

    let config = LinkConfig::from_env();
    let tokens = Arc::new(TokenProvider::new(config.token.clone()));
    if !tokens.is_signed_in() {
        anyhow::bail!("OSF_TOKEN is not set");
    }
    let client = config.client(tokens).context("failed to build api client")?;
    let user = client
        .current_user()
        .await
        .context("failed to load the signed-in account")?;
    info!(user = %user.full_name, api = %config.api_url, "signed in");

    run(&client, command, &user.full_name).await
}

async fn run(client: &OsfClient, command: Command, user_name: &str) -> anyhow::Result<()> {
    match command {
        Command::Help => println!("{USAGE}"),
        Command::WhoAmI => println!("{user_name}"),
        Command::Projects => {
            for project in client.list_projects().await? {
                let visibility = if project.public { "public" } else { "private" };
                println!("{}\t{}\t{}", project.id, visibility, project.title);
            }
        }
        Command::CreateProject { title } => {
            let project = client.create_project(&title).await?;
            println!("{}", project.id);
        }
        Command::Tree { project, all } => {
            let info = client
                .get_project(&project)
                .await
                .with_context(|| format!("failed to load project {project}"))?;
            let tree = TreeCache::new(client.clone());
            tree.sync_projects(&[ProjectRoot::from(&info)]);
            if all {
                match tree.expand_all_under(&info.id).await {
                    Ok(()) => {}
                    Err(TreeError::SubtreeIncomplete { errored, .. }) => {
                        warn!(folders = errored.len(), "some folders failed to load");
                    }
                    Err(err) => return Err(err.into()),
                }
            } else {
                tree.expand(&info.id).await?;
            }
            print!("{}", NodeView::outline(&tree.snapshot()));
        }
        Command::Read { project, path } => {
            let (content, node) = client
                .read_file(&project, &path)
                .await
                .with_context(|| format!("failed to read {path}"))?;
            info!(path = %node.path, size = content.len(), "file downloaded");
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&content)?;
            stdout.flush()?;
        }
        Command::Write {
            project,
            path,
            local,
            overwrite,
        } => {
            let content = read_local(&local).await?;
            client
                .write_file(&project, &path, content, overwrite)
                .await
                .with_context(|| format!("failed to write {path}"))?;
        }
        Command::Mkdir { project, path } => {
            let folder = client
                .ensure_path(&project, &path)
                .await
                .with_context(|| format!("failed to create {path}"))?;
            println!("{}\t{}", folder.id, folder.path);
        }
    }
    Ok(())
}

async fn read_local(path: &Path) -> anyhow::Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
