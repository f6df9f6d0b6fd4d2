use anyhow::{bail, Context, Result};
use board_sync::{
    Avatar, BoardConfig, CollectionStore, CreatePersonInput, CreateProjectInput, Direction,
    EntityId, MemoryStore, PeopleBoard, Project, ProjectBoard, ProjectStatus, ProjectView,
    ReorderIntent, UpdatePersonInput, UpdateProjectInput,
};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "board")]
#[command(about = "Project and people board backed by a synced collection store")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Store file
    #[arg(short, long, global = true, default_value = "board.json")]
    store: PathBuf,

    /// Board config file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage people
    People {
        #[command(subcommand)]
        command: PeopleCommand,
    },

    /// Manage projects and their order
    Projects {
        #[command(subcommand)]
        command: ProjectCommand,
    },
}

#[derive(Subcommand)]
enum PeopleCommand {
    /// List everyone
    List,

    /// Add a person
    Add {
        name: String,

        /// Hex color, e.g. #55FF55
        #[arg(long)]
        color: String,

        #[command(flatten)]
        avatar: AvatarArgs,
    },

    /// Change a person's fields
    Update {
        id: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        color: Option<String>,

        #[command(flatten)]
        avatar: AvatarArgs,

        /// Remove the avatar
        #[arg(long, conflicts_with_all = ["username", "avatar_url"])]
        clear_avatar: bool,
    },

    /// Remove a person
    Rm {
        id: String,

        /// Also remove them from every project
        #[arg(long)]
        cleanup: bool,
    },
}

#[derive(Args)]
struct AvatarArgs {
    /// In-game username used for the avatar
    #[arg(long, conflicts_with = "avatar_url")]
    username: Option<String>,

    /// Avatar image URL
    #[arg(long)]
    avatar_url: Option<String>,
}

impl AvatarArgs {
    fn into_avatar(self) -> Option<Avatar> {
        match (self.username, self.avatar_url) {
            (Some(name), _) => Some(Avatar::Username { name }),
            (None, Some(url)) => Some(Avatar::Image { url }),
            (None, None) => None,
        }
    }
}

#[derive(Subcommand)]
enum ProjectCommand {
    /// List projects in priority order
    List {
        #[arg(long, default_value = "all")]
        view: ProjectView,
    },

    /// Add a project
    Add {
        title: String,

        #[arg(long, default_value = "")]
        description: String,

        /// planned, in_progress or completed
        #[arg(long, default_value = "planned")]
        status: ProjectStatus,

        #[arg(long)]
        priority: Option<i64>,

        /// RFC 3339 timestamp or YYYY-MM-DD
        #[arg(long)]
        deadline: Option<String>,

        /// Person id to assign; repeatable
        #[arg(long = "assign")]
        assigned: Vec<String>,
    },

    /// Change a project's fields
    Update {
        id: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        status: Option<ProjectStatus>,

        #[arg(long)]
        priority: Option<i64>,

        #[arg(long, conflicts_with = "clear_deadline")]
        deadline: Option<String>,

        #[arg(long)]
        clear_deadline: bool,
    },

    /// Remove a project
    Rm { id: String },

    /// Assign a person to a project
    Assign { project: String, person: String },

    /// Remove a person from a project
    Unassign { project: String, person: String },

    /// Move a project to a position within a view
    Move {
        id: String,

        /// Zero-based index in the view
        #[arg(long)]
        to: usize,

        #[arg(long, default_value = "active")]
        view: ProjectView,
    },

    /// Swap a project with the one above it
    Up {
        id: String,

        #[arg(long, default_value = "active")]
        view: ProjectView,
    },

    /// Swap a project with the one below it
    Down {
        id: String,

        #[arg(long, default_value = "active")]
        view: ProjectView,
    },
}

/// Both boards over one loaded store file
struct Session {
    store: MemoryStore,
    path: PathBuf,
    projects: ProjectBoard,
    people: PeopleBoard,
}

impl Session {
    async fn open(path: PathBuf, config: &BoardConfig) -> Result<Self> {
        let store = MemoryStore::load(&path)
            .await
            .with_context(|| format!("failed to open store {}", path.display()))?;
        let shared: Arc<dyn CollectionStore> = Arc::new(store.clone());

        let projects = ProjectBoard::open(Arc::clone(&shared), config)?;
        let people = PeopleBoard::open(shared, config)?;
        projects.loaded().await?;
        people.loaded().await?;

        for error in [projects.error(), people.error()].into_iter().flatten() {
            warn!("Store contains unreadable records: {}", error);
        }

        Ok(Self {
            store,
            path,
            projects,
            people,
        })
    }

    async fn finish(self) -> Result<()> {
        self.projects.close();
        self.people.close();
        self.store.save(&self.path).await?;
        debug!("Store written to {:?}", self.path);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("board=debug,board_sync=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("board=info,board_sync=info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match &cli.config {
        Some(path) => BoardConfig::load(path)?,
        None => BoardConfig::default(),
    };

    let session = Session::open(cli.store, &config).await?;
    run(session, cli.command).await
}

/// Run one command, then save the store even if the command failed partway
async fn run(session: Session, command: Commands) -> Result<()> {
    let outcome = match command {
        Commands::People { command } => people_command(&session, command).await,
        Commands::Projects { command } => project_command(&session, command).await,
    };

    let saved = session.finish().await;
    outcome?;
    saved
}

async fn people_command(session: &Session, command: PeopleCommand) -> Result<()> {
    let people = &session.people;

    match command {
        PeopleCommand::List => {
            let everyone = people.people();
            if everyone.is_empty() {
                println!("No people yet.");
            }
            for person in everyone.iter() {
                let assigned = session.projects.projects_for_person(&person.id).len();
                print!("{}  {}  {}  ({} projects)", person.id, person.name, person.color, assigned);
                match person.avatar_url(64) {
                    Some(url) => println!("  {}", url),
                    None => println!(),
                }
            }
        }
        PeopleCommand::Add {
            name,
            color,
            avatar,
        } => {
            let mut input = CreatePersonInput::new(name, color);
            input.avatar = avatar.into_avatar();
            let id = people.add(input).await?;
            info!("Added person {}", id);
            println!("{}", id);
        }
        PeopleCommand::Update {
            id,
            name,
            color,
            avatar,
            clear_avatar,
        } => {
            let id = existing_person(session, &id)?;
            let avatar = if clear_avatar {
                Some(None)
            } else {
                avatar.into_avatar().map(Some)
            };
            let fields = UpdatePersonInput {
                name,
                color,
                avatar,
            };
            if fields.is_empty() {
                warn!("Nothing to update for {}", id);
            }
            people.update(&id, fields).await?;
            info!("Updated person {}", id);
        }
        PeopleCommand::Rm { id, cleanup } => {
            let id = existing_person(session, &id)?;
            people.delete(&id).await?;
            info!("Removed person {}", id);

            let referenced = session.projects.projects_for_person(&id).len();
            if cleanup {
                let changed = session.projects.unassign_person(&id).await?;
                info!("Unassigned {} from {} projects", id, changed);
            } else if referenced > 0 {
                warn!(
                    "{} is still assigned to {} projects; rerun with --cleanup to remove them",
                    id, referenced
                );
            }
        }
    }

    Ok(())
}

async fn project_command(session: &Session, command: ProjectCommand) -> Result<()> {
    let projects = &session.projects;

    match command {
        ProjectCommand::List { view } => {
            let listed = projects.view(view);
            if listed.is_empty() {
                println!("No projects in this view.");
            }
            let now = Utc::now();
            for project in &listed {
                print_project(session, project, now);
            }
        }
        ProjectCommand::Add {
            title,
            description,
            status,
            priority,
            deadline,
            assigned,
        } => {
            let input = CreateProjectInput {
                title,
                description,
                status,
                priority,
                deadline: deadline.as_deref().map(parse_deadline).transpose()?,
                assigned_people: assigned.into_iter().map(EntityId::from).collect(),
            };
            let id = projects.add(input).await?;
            info!("Added project {}", id);
            println!("{}", id);
        }
        ProjectCommand::Update {
            id,
            title,
            description,
            status,
            priority,
            deadline,
            clear_deadline,
        } => {
            let id = existing_project(session, &id)?;
            let deadline = if clear_deadline {
                Some(None)
            } else {
                deadline.as_deref().map(parse_deadline).transpose()?.map(Some)
            };
            let fields = UpdateProjectInput {
                title,
                description,
                status,
                priority,
                deadline,
                assigned_people: None,
            };
            if fields.is_empty() {
                warn!("Nothing to update for {}", id);
            }
            projects.update(&id, fields).await?;
            info!("Updated project {}", id);
        }
        ProjectCommand::Rm { id } => {
            let id = existing_project(session, &id)?;
            projects.delete(&id).await?;
            info!("Removed project {}", id);
        }
        ProjectCommand::Assign { project, person } => {
            let person = existing_person(session, &person)?;
            projects.assign(&EntityId::from(project), &person).await?;
        }
        ProjectCommand::Unassign { project, person } => {
            projects
                .unassign(&EntityId::from(project), &EntityId::from(person))
                .await?;
        }
        ProjectCommand::Move { id, to, view } => {
            let intent = ReorderIntent::MoveTo {
                id: EntityId::from(id),
                target: to,
            };
            reorder(session, view, intent).await?;
        }
        ProjectCommand::Up { id, view } => {
            let intent = ReorderIntent::Shift {
                id: EntityId::from(id),
                direction: Direction::Up,
            };
            reorder(session, view, intent).await?;
        }
        ProjectCommand::Down { id, view } => {
            let intent = ReorderIntent::Shift {
                id: EntityId::from(id),
                direction: Direction::Down,
            };
            reorder(session, view, intent).await?;
        }
    }

    Ok(())
}

async fn reorder(session: &Session, view: ProjectView, intent: ReorderIntent) -> Result<()> {
    if session.projects.reorder_view(view, intent).await? {
        let now = Utc::now();
        for project in session.projects.view(view).iter() {
            print_project(session, project, now);
        }
    } else {
        println!("Already in that position.");
    }
    Ok(())
}

fn print_project(session: &Session, project: &Project, now: DateTime<Utc>) {
    let names: Vec<String> = session
        .people
        .get_many(&project.assigned_people)
        .into_iter()
        .map(|person| person.name)
        .collect();

    print!(
        "{:>4}  {}  [{}]  {}",
        project.priority, project.id, project.status, project.title
    );
    if let Some(deadline) = project.deadline {
        let overdue = if project.is_past_deadline(now) { " overdue" } else { "" };
        print!("  due {}{}", deadline.format("%Y-%m-%d"), overdue);
    }
    if !names.is_empty() {
        print!("  ({})", names.join(", "));
    }
    println!();
}

fn existing_person(session: &Session, id: &str) -> Result<EntityId> {
    let id = EntityId::from(id);
    if session.people.get(&id).is_none() {
        bail!("No person with id {}", id);
    }
    Ok(id)
}

fn existing_project(session: &Session, id: &str) -> Result<EntityId> {
    let id = EntityId::from(id);
    if session.projects.get(&id).is_none() {
        bail!("No project with id {}", id);
    }
    Ok(id)
}

fn parse_deadline(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(value) {
        return Ok(timestamp.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("invalid deadline '{}'", value))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .with_context(|| format!("invalid deadline '{}'", value))?;
    Ok(Utc.from_utc_datetime(&midnight))
}
