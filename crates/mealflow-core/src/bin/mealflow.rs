//! Mealflow CLI Tool
//!
//! Admit patients, seed the recipe catalog, place safety-checked meal
//! requests and move kitchen trays along, against a local SQLite database.
//!
//! Usage:
//!   mealflow patients add --name <name> [--room <room>] [--diet <diet>] [--allergy <allergen>]...
//!   mealflow patients update <patient-id> [--diet <diet>] [--clear-room] ...
//!   mealflow recipes add --name <name> [--allergen <allergen>]... [--diet-tag <diet>]...
//!   mealflow requests create <patient-id> <recipe-id>...
//!   mealflow requests items <request-id>
//!   mealflow trays advance <tray-id>
//!
//! Every command prints JSON on stdout. Failures print the caller-facing
//! message on stderr and exit non-zero.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use mealflow_core::{
    Allergen, ClinicalState, DietOrder, Mealflow, MealflowError, MealRequestId, NewPatient,
    NewRecipe, PatientId, PatientPatch, RecipeId, RejectionPolicy, ServiceConfig, SqliteConfig,
    SqliteStore, SystemClock, TrayId,
};
use serde::Serialize;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mealflow")]
#[command(author = "Mealflow Developers")]
#[command(version = "0.1.0")]
#[command(about = "Clinical meal ordering with allergy and diet safety checks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// SQLite database file (overrides MEALFLOW_DATABASE)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Milliseconds to wait on a locked database (overrides MEALFLOW_BUSY_TIMEOUT_MS)
    #[arg(long, global = true)]
    busy_timeout_ms: Option<u64>,

    /// Keep rejected meal requests as an audit trail
    #[arg(long, global = true)]
    record_rejections: bool,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,

    /// Debug logging on stderr (otherwise RUST_LOG, default warn)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Pretty-printed JSON
    Json,
    /// One JSON document per line
    Compact,
}

#[derive(Subcommand)]
enum Commands {
    /// Patient admission and profile updates
    #[command(subcommand)]
    Patients(PatientCommands),

    /// Recipe catalog
    #[command(subcommand)]
    Recipes(RecipeCommands),

    /// Meal requests
    #[command(subcommand)]
    Requests(RequestCommands),

    /// Kitchen trays
    #[command(subcommand)]
    Trays(TrayCommands),
}

#[derive(Subcommand)]
enum PatientCommands {
    /// List patients, most recently updated first
    List,

    /// Admit a patient
    Add {
        #[arg(short, long)]
        name: String,

        #[arg(short, long)]
        room: Option<String>,

        /// Diet order, e.g. "Low Sodium"
        #[arg(long, default_value = "Regular")]
        diet: DietOrder,

        /// Allergen, repeatable, e.g. --allergy Peanuts --allergy "Tree Nuts"
        #[arg(long = "allergy")]
        allergies: Vec<Allergen>,

        #[arg(long, default_value = "Stable")]
        clinical_state: ClinicalState,
    },

    /// Change selected fields of a patient
    Update(UpdatePatient),
}

#[derive(Args)]
struct UpdatePatient {
    patient_id: String,

    #[arg(short, long)]
    name: Option<String>,

    #[arg(short, long, conflicts_with = "clear_room")]
    room: Option<String>,

    /// Remove the room number
    #[arg(long)]
    clear_room: bool,

    #[arg(long)]
    diet: Option<DietOrder>,

    /// Replace the allergy set, repeatable
    #[arg(long = "allergy", conflicts_with = "clear_allergies")]
    allergies: Vec<Allergen>,

    /// Replace the allergy set with an empty one
    #[arg(long)]
    clear_allergies: bool,

    #[arg(long)]
    clinical_state: Option<ClinicalState>,
}

impl UpdatePatient {
    fn patch(&self) -> PatientPatch {
        let room_number = if self.clear_room {
            Some(None)
        } else {
            self.room.clone().map(Some)
        };
        let allergies = if self.clear_allergies || !self.allergies.is_empty() {
            Some(self.allergies.iter().copied().collect())
        } else {
            None
        };
        PatientPatch {
            name: self.name.clone(),
            room_number,
            diet_order: self.diet,
            allergies,
            clinical_state: self.clinical_state,
        }
    }
}

#[derive(Subcommand)]
enum RecipeCommands {
    /// List recipes by name
    List,

    /// Add a recipe to the catalog
    Add {
        #[arg(short, long)]
        name: String,

        #[arg(long)]
        description: Option<String>,

        /// Allergen the recipe contains, repeatable
        #[arg(long = "allergen")]
        allergens: Vec<Allergen>,

        /// Diet the recipe suits, repeatable; none means every diet
        #[arg(long = "diet-tag")]
        diet_tags: Vec<DietOrder>,
    },
}

#[derive(Subcommand)]
enum RequestCommands {
    /// List meal requests, newest first
    List,

    /// Validate and place a meal request
    Create {
        patient_id: String,

        /// Recipe ids; repeat an id to order it twice
        #[arg(required = true)]
        recipe_ids: Vec<String>,
    },

    /// Show the items of a meal request
    Items { request_id: String },
}

#[derive(Subcommand)]
enum TrayCommands {
    /// List trays, newest first
    List,

    /// Move a tray to its next status
    Advance { tray_id: String },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Service(#[from] MealflowError),

    #[error("could not render output: {0}")]
    Output(#[from] serde_json::Error),
}

impl CliError {
    fn public_message(&self) -> String {
        match self {
            CliError::Service(err) => err.public_message(),
            other => other.to_string(),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {}", err.public_message());
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("mealflow_core=debug,mealflow=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_service(cli: &Cli) -> Result<Mealflow<SqliteStore, SystemClock>, MealflowError> {
    let mut sqlite = SqliteConfig::from_env()?;
    if let Some(path) = &cli.database {
        sqlite.path = path.clone();
    }
    if let Some(millis) = cli.busy_timeout_ms {
        sqlite.busy_timeout = Duration::from_millis(millis);
    }

    let mut config = ServiceConfig::from_env()?;
    if cli.record_rejections {
        config.rejection_policy = RejectionPolicy::Record;
    }

    let store = SqliteStore::open(&sqlite)
        .map_err(|e| MealflowError::from(e).logged("open_store"))?;
    Ok(Mealflow::with_config(store, SystemClock, config))
}

fn run(cli: &Cli) -> Result<String, CliError> {
    let service = open_service(cli)?;

    let result = match &cli.command {
        Commands::Patients(command) => match command {
            PatientCommands::List => to_value(service.list_patients()?)?,
            PatientCommands::Add {
                name,
                room,
                diet,
                allergies,
                clinical_state,
            } => {
                let admission = NewPatient {
                    name: name.clone(),
                    room_number: room.clone(),
                    diet_order: *diet,
                    allergies: allergies.iter().copied().collect(),
                    clinical_state: *clinical_state,
                };
                to_value(service.create_patient(admission)?)?
            }
            PatientCommands::Update(update) => {
                let id = PatientId::from(update.patient_id.as_str());
                to_value(service.update_patient(&id, update.patch())?)?
            }
        },
        Commands::Recipes(command) => match command {
            RecipeCommands::List => to_value(service.list_recipes()?)?,
            RecipeCommands::Add {
                name,
                description,
                allergens,
                diet_tags,
            } => {
                let recipe = NewRecipe {
                    name: name.clone(),
                    description: description.clone(),
                    allergens: allergens.iter().copied().collect(),
                    diet_tags: diet_tags.iter().copied().collect(),
                };
                to_value(service.create_recipe(recipe)?)?
            }
        },
        Commands::Requests(command) => match command {
            RequestCommands::List => to_value(service.list_meal_requests()?)?,
            RequestCommands::Create {
                patient_id,
                recipe_ids,
            } => {
                let recipe_ids: Vec<RecipeId> =
                    recipe_ids.iter().map(|id| RecipeId::from(id.as_str())).collect();
                let request = service
                    .create_meal_request(&PatientId::from(patient_id.as_str()), &recipe_ids)?;
                to_value(request)?
            }
            RequestCommands::Items { request_id } => {
                to_value(service.list_request_items(&MealRequestId::from(request_id.as_str()))?)?
            }
        },
        Commands::Trays(command) => match command {
            TrayCommands::List => to_value(service.list_trays()?)?,
            TrayCommands::Advance { tray_id } => {
                to_value(service.advance_tray(&TrayId::from(tray_id.as_str()))?)?
            }
        },
    };

    let output = match cli.format {
        OutputFormat::Compact => serde_json::to_string(&result)?,
        OutputFormat::Json => serde_json::to_string_pretty(&result)?,
    };
    Ok(output)
}

fn to_value<T: Serialize>(value: T) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::to_value(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn test_unopenable_database_is_a_storage_error() {
        let cli = Cli::try_parse_from([
            "mealflow",
            "--database",
            "/nonexistent/mealflow/meals.db",
            "patients",
            "list",
        ])
        .unwrap();
        let Err(err) = open_service(&cli) else {
            panic!("opened a database under a missing directory");
        };
        assert_eq!(err.kind(), "storage");
        assert_eq!(err.public_message(), mealflow_core::INTERNAL_ERROR_MESSAGE);
    }

    #[test]
    fn test_format_is_checked_when_parsing() {
        let cli =
            Cli::try_parse_from(["mealflow", "--format", "compact", "trays", "list"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Compact);

        let cli = Cli::try_parse_from(["mealflow", "trays", "list"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Json);

        let err = Cli::try_parse_from(["mealflow", "--format", "yaml", "trays", "list"])
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
    }

    #[test]
    fn test_update_flags_build_a_patch() {
        let cli = Cli::try_parse_from([
            "mealflow",
            "patients",
            "update",
            "p-1",
            "--clear-room",
            "--allergy",
            "Peanuts",
        ])
        .unwrap();
        let Commands::Patients(PatientCommands::Update(update)) = cli.command else {
            panic!("expected a patient update");
        };
        let patch = update.patch();
        assert_eq!(patch.room_number, Some(None));
        assert_eq!(patch.allergies, Some([Allergen::Peanuts].into_iter().collect()));
        assert_eq!(patch.name, None);
    }
}
