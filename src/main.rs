use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use nutrilog_lib::{ImageInput, NutriLog};

#[derive(Parser)]
#[command(name = "nutrilog")]
#[command(about = "Food log and meal templates kept as markdown notes", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile hand-edited meal notes until Ctrl-C
    Watch {
        /// Vault folder
        vault: PathBuf,
    },

    /// Estimate a meal and add it to today's food log
    Log {
        /// Vault folder
        vault: PathBuf,

        /// What you ate
        #[arg(required = true, num_args = 1..)]
        description: Vec<String>,

        /// Also save the entries as a meal with this name
        #[arg(long)]
        meal: Option<String>,

        /// Photo of the meal
        #[arg(long)]
        image: Option<PathBuf>,
    },
}

fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "nutrilog=info,nutrilog_lib=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
}

async fn watch(root: PathBuf) -> Result<()> {
    let app = NutriLog::open(&root);
    app.start_file_watcher(&root)
        .with_context(|| format!("failed to watch {}", root.display()))?;
    tracing::info!(vault = %root.display(), "reconciling meal notes; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await.context("failed to listen for Ctrl-C")?;
    app.dispose();
    tracing::info!("stopped");
    Ok(())
}

async fn log(
    root: PathBuf,
    description: Vec<String>,
    meal: Option<String>,
    image_path: Option<PathBuf>,
) -> Result<()> {
    let description = description.join(" ");

    let image = match image_path {
        Some(path) => {
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read image {}", path.display()))?;
            Some(ImageInput::from_path_bytes(&path, bytes))
        }
        None => None,
    };

    let app = NutriLog::open(&root);
    let today = Local::now().date_naive();
    let entries = app
        .describe_and_log(&description, image.as_ref(), today, meal.as_deref())
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    for entry in &entries {
        println!(
            "{} {} ({}): {} kcal, P {}g, C {}g, F {}g",
            entry.emoji.as_deref().unwrap_or("•"),
            entry.food,
            entry.quantity,
            entry.calories,
            entry.protein,
            entry.carbs,
            entry.fat
        );
    }
    println!("logged to {}", app.food_log().log_path(today).display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Watch { vault } => watch(vault).await,
        Commands::Log {
            vault,
            description,
            meal,
            image,
        } => log(vault, description, meal, image).await,
    }
}
