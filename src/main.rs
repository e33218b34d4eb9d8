//! todolis - todo list with a random activity picker
//!
//! Command-line front end over the local SQLite backend.

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use todolis::auth::{AuthProvider, LocalAuth};
use todolis::catalog::CatalogManager;
use todolis::config::Config;
use todolis::db::Database;
use todolis::models::{Activity, ActivityDisplay, Category, Profile, TodoFilter, TodoItem};
use todolis::randomizer::{ActivityRandomizer, RollOutcome};
use todolis::storage::DiskFileStore;
use todolis::todo_store::TodoStore;

#[derive(Parser)]
#[command(name = "todolis")]
#[command(about = "Todo list with a random activity picker")]
#[command(version)]
struct Cli {
    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Act as this user instead of the saved session
    #[arg(long, global = true)]
    user: Option<Uuid>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new config file and database
    Init {
        /// Output path for config file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Create an account and sign in
    Register {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        password: String,
    },

    /// Sign in and remember the session
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },

    /// Forget the saved session
    Logout,

    /// Show or edit your profile
    Profile {
        /// New display name
        #[arg(long)]
        name: Option<String>,

        /// New avatar URL; pass an empty string to remove it
        #[arg(long)]
        avatar: Option<String>,
    },

    /// Manage todos
    Todo {
        #[command(subcommand)]
        action: TodoCommand,
    },

    /// Manage activity categories
    Category {
        #[command(subcommand)]
        action: CategoryCommand,
    },

    /// Manage activities inside a category
    Activity {
        #[command(subcommand)]
        action: ActivityCommand,
    },

    /// Pick random activities
    Roll {
        /// Roll a single category instead of every eligible one
        #[arg(long)]
        category: Option<Uuid>,

        /// Add each pick to the todo list, due today
        #[arg(long)]
        todo: bool,
    },
}

#[derive(Subcommand)]
enum TodoCommand {
    List {
        #[arg(short, long, value_enum, default_value_t = FilterArg::All)]
        filter: FilterArg,

        /// Show todos due on this day
        #[arg(long, conflicts_with = "filter")]
        date: Option<NaiveDate>,

        #[arg(long)]
        json: bool,
    },
    Add {
        title: String,
        #[arg(long)]
        due: Option<NaiveDate>,
    },
    /// Toggle completion
    Done { id: Uuid },
    Edit {
        id: Uuid,
        title: String,
        #[arg(long, conflicts_with = "no_due")]
        due: Option<NaiveDate>,
        /// Remove the due date
        #[arg(long)]
        no_due: bool,
    },
    Rm {
        #[arg(required = true)]
        ids: Vec<Uuid>,
    },
}

#[derive(Subcommand)]
enum CategoryCommand {
    Add {
        name: String,
        #[arg(long)]
        icon: Option<String>,
    },
    List,
    Rename { id: Uuid, name: String },
    /// Delete a category with its activities and photos
    Rm { id: Uuid },
}

#[derive(Subcommand)]
enum ActivityCommand {
    Add {
        category_id: Uuid,
        name: String,
        #[arg(long)]
        icon: Option<String>,
        /// Photo to attach
        #[arg(long)]
        image: Option<PathBuf>,
    },
    Edit {
        id: Uuid,
        #[arg(long)]
        name: Option<String>,
        /// Replace the photo
        #[arg(long)]
        image: Option<PathBuf>,
    },
    Rm { id: Uuid },
}

#[derive(Clone, Copy, ValueEnum)]
enum FilterArg {
    All,
    Today,
    Tomorrow,
    Overdue,
    Week,
}

impl From<FilterArg> for TodoFilter {
    fn from(arg: FilterArg) -> Self {
        match arg {
            FilterArg::All => TodoFilter::All,
            FilterArg::Today => TodoFilter::Today,
            FilterArg::Tomorrow => TodoFilter::Tomorrow,
            FilterArg::Overdue => TodoFilter::Overdue,
            FilterArg::Week => TodoFilter::ThisWeek,
        }
    }
}

/// Everything a command needs once config and database are open
struct App {
    config: Config,
    config_path: PathBuf,
    db: Arc<Database>,
    auth: LocalAuth,
}

impl App {
    fn open(config_path: PathBuf, user: Option<Uuid>) -> Result<Self> {
        let config = if config_path.exists() {
            Config::load_from(&config_path)?
        } else {
            Config::default()
        };

        let db = Arc::new(
            Database::open(&config.database.path).context("Failed to open database")?,
        );
        let auth = LocalAuth::new(db.clone());

        if let Some(user_id) = user.or(config.session.user_id)
            && let Err(e) = auth.restore(user_id)
        {
            tracing::warn!(user_id = %user_id, error = %e, "Saved session is no longer valid");
        }

        Ok(Self {
            config,
            config_path,
            db,
            auth,
        })
    }

    fn user(&self) -> Result<Uuid> {
        self.auth
            .current_user()
            .context("Not signed in. Run 'todolis login' first.")
    }

    fn remember(&mut self, user_id: Option<Uuid>) -> Result<()> {
        self.config.session.user_id = user_id;
        self.config.save_to(&self.config_path)
    }

    async fn todos(&self) -> Result<TodoStore<Database>> {
        let mut store =
            TodoStore::new(self.db.clone()).with_week_start(self.config.calendar.week_start);
        store.fetch_all(Some(self.user()?)).await?;
        Ok(store)
    }

    fn catalog(&self) -> Result<CatalogManager<Database, DiskFileStore>> {
        let files = DiskFileStore::new(
            self.config.storage.dir.clone(),
            self.config.storage.public_base_url.clone(),
        );
        let mut catalog = CatalogManager::new(self.db.clone(), Arc::new(files));
        catalog.set_user(Some(self.user()?));
        Ok(catalog)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("todolis=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => Config::default_path()?,
    };

    let command = match cli.command {
        Commands::Init { output } => return init(&output.unwrap_or(config_path)),
        command => command,
    };

    let mut app = App::open(config_path, cli.user)?;

    match command {
        Commands::Init { .. } => Ok(()),

        Commands::Register {
            email,
            name,
            password,
        } => {
            let user_id = app.auth.sign_up(&email, &password, &name)?;
            app.remember(Some(user_id))?;
            println!("✅ Welcome, {}! Signed in as {}", name.trim(), user_id);
            Ok(())
        }

        Commands::Login { email, password } => {
            let user_id = app.auth.sign_in(&email, &password)?;
            app.remember(Some(user_id))?;
            println!("✅ Signed in as {}", user_id);
            Ok(())
        }

        Commands::Logout => {
            app.auth.sign_out();
            app.remember(None)?;
            println!("Signed out.");
            Ok(())
        }

        Commands::Profile { name, avatar } => {
            app.user()?;
            let mut profile = app.auth.profile()?;
            if name.is_some() || avatar.is_some() {
                let full_name = name.unwrap_or(profile.full_name);
                let avatar_url = avatar.or(profile.avatar_url);
                profile = app.auth.update_profile(&full_name, avatar_url.as_deref())?;
                println!("✅ Profile updated");
            }
            print_profile(&profile);
            Ok(())
        }

        Commands::Todo { action } => run_todo(&app, action).await,
        Commands::Category { action } => run_category(&app, action).await,
        Commands::Activity { action } => run_activity(&app, action).await,
        Commands::Roll { category, todo } => run_roll(&app, category, todo).await,
    }
}

fn init(path: &Path) -> Result<()> {
    let cfg = Config::default();
    cfg.save_to(path)?;
    Database::open(&cfg.database.path).context("Failed to create database")?;

    println!("Created config file: {}", path.display());
    println!();
    println!("Next steps:");
    println!("  1. Create an account: todolis register --email you@example.com --name You --password ******");
    println!("  2. Add a category:    todolis category add Dinner --icon 🍽️");
    println!("  3. Add activities:    todolis activity add <CATEGORY_ID> Pasta");
    println!("  4. Roll:              todolis roll");

    Ok(())
}

async fn run_todo(app: &App, action: TodoCommand) -> Result<()> {
    let mut store = app.todos().await?;

    match action {
        TodoCommand::List { filter, date, json } => {
            match date {
                Some(day) => store.select_calendar_date(day),
                None => store.set_filter(filter.into()),
            }
            let view = store.filtered_view();

            if json {
                println!("{}", serde_json::to_string_pretty(&view)?);
            } else if view.is_empty() {
                println!("No todos ({}).", store.selected_filter().display_name());
            } else {
                for todo in view {
                    print_todo(todo);
                }
            }
        }

        TodoCommand::Add { title, due } => {
            let todo = store.add_manual(&title, due).await?;
            print_todo(&todo);
        }

        TodoCommand::Done { id } => {
            store.toggle_completion(id).await?;
            if let Some(todo) = store.get(id) {
                print_todo(todo);
            }
        }

        TodoCommand::Edit {
            id,
            title,
            due,
            no_due,
        } => {
            let Some(existing) = store.get(id) else {
                bail!("Todo {} not found", id);
            };
            let due = if no_due { None } else { due.or(existing.due_date) };
            store.edit(id, &title, due).await?;
            if let Some(todo) = store.get(id) {
                print_todo(todo);
            }
        }

        TodoCommand::Rm { ids } => {
            let removed = store.delete(&ids).await?;
            println!("Deleted {} todo(s).", removed);
            if removed < ids.len() {
                println!("{} id(s) did not match a todo.", ids.len() - removed);
            }
        }
    }

    Ok(())
}

async fn run_category(app: &App, action: CategoryCommand) -> Result<()> {
    let catalog = app.catalog()?;

    match action {
        CategoryCommand::Add { name, icon } => {
            let category = catalog.create_category(&name, icon.as_deref()).await?;
            println!("{} {}  {}", category.icon(), category.name, category.id);
        }

        CategoryCommand::List => {
            let categories = catalog.categories().await?;
            if categories.is_empty() {
                println!("No categories yet.");
            }
            for category in categories {
                println!("{} {}  {}", category.icon(), category.name, category.id);
                for activity in catalog.activities(category.id).await? {
                    println!("    {}", describe_activity(&activity));
                }
            }
        }

        CategoryCommand::Rename { id, name } => {
            let category = find_category(&catalog.categories().await?, id)?;
            let renamed = catalog.rename_category(&category, &name).await?;
            println!("{} {}  {}", renamed.icon(), renamed.name, renamed.id);
        }

        CategoryCommand::Rm { id } => {
            let category = find_category(&catalog.categories().await?, id)?;
            catalog.delete_category(&category).await?;
            println!("Deleted category '{}'.", category.name);
        }
    }

    Ok(())
}

async fn run_activity(app: &App, action: ActivityCommand) -> Result<()> {
    let catalog = app.catalog()?;

    match action {
        ActivityCommand::Add {
            category_id,
            name,
            icon,
            image,
        } => {
            let category = find_category(&catalog.categories().await?, category_id)?;
            let bytes = read_image(image.as_deref()).await?;
            let activity = catalog
                .add_activity(&category, &name, bytes.as_deref(), icon.as_deref())
                .await?;
            println!("{}", describe_activity(&activity));
        }

        ActivityCommand::Edit { id, name, image } => {
            let mut activity = find_activity(&catalog, id).await?;
            if let Some(name) = name {
                activity.name = name;
            }
            let bytes = read_image(image.as_deref()).await?;
            let updated = catalog.update_activity(&activity, bytes.as_deref()).await?;
            println!("{}", describe_activity(&updated));
        }

        ActivityCommand::Rm { id } => {
            let activity = find_activity(&catalog, id).await?;
            catalog.delete_activity(&activity).await?;
            println!("Deleted activity '{}'.", activity.name);
        }
    }

    Ok(())
}

async fn run_roll(app: &App, category: Option<Uuid>, add_todo: bool) -> Result<()> {
    let user_id = app.user()?;
    let settings = app.config.randomizer.settings();
    let mut randomizer = ActivityRandomizer::new(app.db.clone(), settings);
    randomizer.load_all(Some(user_id)).await?;

    let mut todos = TodoStore::new(app.db.clone()).with_week_start(app.config.calendar.week_start);
    if add_todo {
        todos.fetch_all(Some(user_id)).await?;
    }
    let todos_before = todos.todos().len();

    let outcomes: Vec<RollOutcome> = match category {
        Some(id) => {
            if randomizer.category(id).is_none() {
                bail!("Category {} not found", id);
            }
            if !randomizer.has_enough_activities(id) {
                bail!(
                    "Category needs at least {} activities to roll",
                    settings.min_activities
                );
            }
            println!("🎲 Rolling...");
            let outcome = if add_todo {
                let todos = &mut todos;
                randomizer
                    .roll_with(id, move |activity, category| async move {
                        promote(todos, &activity, &category).await;
                    })
                    .await
            } else {
                randomizer.roll(id).await
            };
            outcome.into_iter().collect()
        }
        None => {
            println!("🎲 Rolling every category...");
            let outcomes = randomizer.roll_all().await;
            if add_todo {
                promote_all(&mut todos, &outcomes).await;
            }
            outcomes
        }
    };

    if outcomes.is_empty() {
        println!(
            "Nothing to roll. Each category needs at least {} activities.",
            settings.min_activities
        );
        return Ok(());
    }

    for outcome in &outcomes {
        println!(
            "{} {}: {}",
            outcome.category.icon(),
            outcome.category.name,
            describe_activity(&outcome.activity)
        );
    }
    if add_todo {
        let added = todos.todos().len() - todos_before;
        println!("Added {} todo(s) due today.", added);
        if let Some(e) = todos.last_error() {
            println!("⚠️  {}", e);
        }
    }

    Ok(())
}

/// Add a rolled pick to the todo list. Failures are logged and left on the
/// store's last error; the caller carries on.
async fn promote(
    todos: &mut TodoStore<Database>,
    activity: &Activity,
    category: &Category,
) -> bool {
    match todos.add_from_activity(activity, Some(category)).await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(
                activity = %activity.name,
                error = %e,
                "Could not add pick to todos"
            );
            false
        }
    }
}

async fn promote_all(todos: &mut TodoStore<Database>, outcomes: &[RollOutcome]) -> usize {
    let mut added = 0;
    for outcome in outcomes {
        if promote(todos, &outcome.activity, &outcome.category).await {
            added += 1;
        }
    }
    added
}

fn print_profile(profile: &Profile) {
    println!("{}  <{}>", profile.full_name, profile.email);
    println!("  id:      {}", profile.id);
    if let Some(url) = &profile.avatar_url {
        println!("  avatar:  {}", url);
    }
    println!("  joined:  {}", profile.created_at.format("%Y-%m-%d"));
    if let Some(updated) = profile.updated_at {
        println!("  updated: {}", updated.format("%Y-%m-%d %H:%M"));
    }
}

fn print_todo(todo: &TodoItem) {
    let mark = if todo.is_completed { "[x]" } else { "[ ]" };
    match todo.due_date {
        Some(due) => println!("{} {}  {} (due {})", mark, todo.id, todo.title, due),
        None => println!("{} {}  {}", mark, todo.id, todo.title),
    }
}

fn describe_activity(activity: &Activity) -> String {
    match activity.display() {
        ActivityDisplay::Image(url) => format!("{} ({})  {}", activity.name, url, activity.id),
        ActivityDisplay::Icon(icon) => format!("{} {}  {}", icon, activity.name, activity.id),
    }
}

fn find_category(categories: &[Category], id: Uuid) -> Result<Category> {
    categories
        .iter()
        .find(|c| c.id == id)
        .cloned()
        .with_context(|| format!("Category {} not found", id))
}

async fn find_activity(
    catalog: &CatalogManager<Database, DiskFileStore>,
    id: Uuid,
) -> Result<Activity> {
    for category in catalog.categories().await? {
        if let Some(activity) = catalog
            .activities(category.id)
            .await?
            .into_iter()
            .find(|a| a.id == id)
        {
            return Ok(activity);
        }
    }
    bail!("Activity {} not found", id)
}

async fn read_image(path: Option<&Path>) -> Result<Option<Vec<u8>>> {
    match path {
        Some(path) => {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read image {}", path.display()))?;
            Ok(Some(bytes))
        }
        None => Ok(None),
    }
}
