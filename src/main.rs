//! `agro-insight` command-line entry point.
//!
//! Every subcommand prints JSON on stdout. Errors go to stderr with exit
//! code 1.

use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;

use agro_insight_lib::assistant::AgronomistAssistant;
use agro_insight_lib::config::{load_config, AgroConfig};
use agro_insight_lib::insights::{generate_insights, top_critical_plots, InsightContext};
use agro_insight_lib::weather::client::ForecastClient;
use agro_insight_lib::weather::gatekeeper::WeatherSyncGate;
use agro_insight_lib::{AssistantErrorPayload, FarmDb, SharedDb};

#[derive(Parser)]
#[command(name = "agro-insight")]
#[command(about = "Agronomic insights, plot urgency and the farm assistant")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ranked insight feed for an organization
    Insights {
        #[arg(long, env = "AGRO_ORG")]
        org: String,
    },

    /// The organization's most urgent plots
    CriticalPlots {
        #[arg(long, env = "AGRO_ORG")]
        org: String,
    },

    /// Refresh the organization's forecast if it is stale
    Sync {
        #[arg(long, env = "AGRO_ORG")]
        org: String,

        /// Ignore the cached sync state
        #[arg(long)]
        force: bool,
    },

    /// Ask the agronomist assistant a question
    Chat {
        #[arg(long, env = "AGRO_ORG")]
        org: String,

        /// Focus the answer on one plot
        #[arg(long)]
        plot: Option<String>,

        question: String,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncOutput {
    organization_id: String,
    synced: bool,
    state: Option<agro_insight_lib::weather::gatekeeper::SyncState>,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<String, String> {
    let config = load_config()?;
    let db = open_db(&config)?;
    let today = Utc::now().date_naive();

    match cli.command {
        Commands::Insights { org } => {
            let insights = generate_insights(&db.lock(), &org, &InsightContext { today });
            to_json(&insights)
        }
        Commands::CriticalPlots { org } => {
            let plots = top_critical_plots(&db.lock(), &org, today);
            to_json(&plots)
        }
        Commands::Sync { org, force } => {
            let gate = weather_gate(&config, db.clone())?
                .ok_or("Forecast sync is disabled in config")?;
            if force {
                gate.clear(&org);
            }
            let synced = gate.ensure_fresh(&org).await;
            to_json(&SyncOutput {
                state: gate.state(&org),
                organization_id: org,
                synced,
            })
        }
        Commands::Chat { org, plot, question } => {
            let mut assistant = AgronomistAssistant::from_config(db.clone(), &config.completion);
            if let Some(gate) = weather_gate(&config, db)? {
                assistant = assistant.with_weather_gate(Arc::new(gate));
            }
            match assistant.chat(&question, plot.as_deref(), &org).await {
                Ok(answer) => to_json(&answer),
                Err(e) => Err(to_json(&AssistantErrorPayload::from(&e))?),
            }
        }
    }
}

fn open_db(config: &AgroConfig) -> Result<SharedDb, String> {
    let path = config.resolve_database_path()?;
    let db = FarmDb::open_at(&path)
        .map_err(|e| format!("Failed to open database {}: {}", path.display(), e))?;
    Ok(db.into_shared())
}

fn weather_gate(config: &AgroConfig, db: SharedDb) -> Result<Option<WeatherSyncGate>, String> {
    if !config.forecast.enabled {
        return Ok(None);
    }
    let client = ForecastClient::new(&config.forecast).map_err(|e| e.to_string())?;
    Ok(Some(WeatherSyncGate::new(
        db,
        Arc::new(client),
        &config.weather_sync,
    )))
}

fn to_json<T: Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("Failed to serialize output: {}", e))
}
