use carb_core::*;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "carbfx")]
#[command(about = "Carbohydrate glucose effect projection", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to the standard config path)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override carb entry store (JSON Lines)
    #[arg(long, global = true)]
    entries: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Project glucose effects over a window
    Effects {
        /// Window start (RFC 3339)
        #[arg(long, value_parser = parse_instant)]
        start: DateTime<Utc>,

        /// Window end (RFC 3339)
        #[arg(long, value_parser = parse_instant)]
        end: DateTime<Utc>,

        /// Observed effect velocities (JSON array)
        #[arg(long)]
        velocities: Option<PathBuf>,

        /// Write effects to a CSV file instead of stdout
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Show absorption status of entries active in a window
    Status {
        #[arg(long, value_parser = parse_instant)]
        start: DateTime<Utc>,

        #[arg(long, value_parser = parse_instant)]
        end: DateTime<Utc>,

        #[arg(long)]
        velocities: Option<PathBuf>,
    },

    /// Show carbs on board at an instant
    Cob {
        #[arg(long, value_parser = parse_instant)]
        at: DateTime<Utc>,

        #[arg(long)]
        velocities: Option<PathBuf>,
    },

    /// Show total carbs eaten since an instant
    Totals {
        #[arg(long, value_parser = parse_instant)]
        since: DateTime<Utc>,
    },

    /// Show carb ratio and insulin sensitivity in effect at an instant
    Schedule {
        #[arg(long, value_parser = parse_instant)]
        at: DateTime<Utc>,
    },

    /// Write a default config file
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },
}

fn parse_instant(value: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid RFC 3339 instant '{}': {}", value, e))
}

fn main() -> Result<()> {
    // Initialize logging
    carb_core::logging::init_with_level("warn");

    let cli = Cli::parse();

    match cli.command {
        Commands::Effects {
            start,
            end,
            ref velocities,
            ref csv,
        } => cmd_effects(
            &build_service(&cli)?,
            start,
            end,
            velocities.as_deref(),
            csv.as_deref(),
        ),
        Commands::Status {
            start,
            end,
            ref velocities,
        } => cmd_status(&build_service(&cli)?, start, end, velocities.as_deref()),
        Commands::Cob { at, ref velocities } => {
            cmd_cob(&build_service(&cli)?, at, velocities.as_deref())
        }
        Commands::Totals { since } => cmd_totals(&build_service(&cli)?, since),
        Commands::Schedule { at } => cmd_schedule(build_service(&cli)?.schedules(), at),
        Commands::Init { force } => cmd_init(cli.config.as_deref(), force),
    }
}

type Service = CarbEffectService<JsonlEntryStore, ConfiguredSchedules>;

/// Load config and wire the entry store and schedules it names
fn build_service(cli: &Cli) -> Result<Service> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let entries_path = cli
        .entries
        .clone()
        .unwrap_or_else(|| config.data.entries_path.clone());

    Ok(CarbEffectService::new(
        JsonlEntryStore::new(entries_path),
        config.schedules()?,
        config.projector()?,
    ))
}

fn load_optional_velocities(path: Option<&Path>) -> Result<Vec<GlucoseEffectVelocity>> {
    match path {
        Some(path) => load_velocities(path),
        None => Ok(Vec::new()),
    }
}

fn cmd_effects(
    service: &Service,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    velocities: Option<&Path>,
    csv: Option<&Path>,
) -> Result<()> {
    let velocities = load_optional_velocities(velocities)?;
    let report = service.glucose_effects(start, end, &velocities)?;

    tracing::debug!(
        "Projected {} effects from {} entries",
        report.effects.len(),
        report.entries.len()
    );

    if let Some(csv_path) = csv {
        let count = write_effects_csv(csv_path, &report.effects)?;
        println!("✓ Wrote {} effects to {}", count, csv_path.display());
        return Ok(());
    }

    println!("{:<27} {:>10}", "date", "effect");
    for effect in &report.effects {
        println!(
            "{:<27} {:>10.2} {}",
            effect.date.to_rfc3339(),
            effect.quantity,
            effect.unit
        );
    }
    println!();
    println!(
        "  {} entries, {} effects",
        report.entries.len(),
        report.effects.len()
    );

    Ok(())
}

fn cmd_status(
    service: &Service,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    velocities: Option<&Path>,
) -> Result<()> {
    let velocities = load_optional_velocities(velocities)?;
    let statuses = service.carb_status(start, end, &velocities)?;

    if statuses.is_empty() {
        println!("No active carb entries.");
        return Ok(());
    }

    for status in &statuses {
        let source = match status.observed_grams() {
            Some(grams) => format!("observed {:.1} g", grams),
            None => "modeled".to_string(),
        };
        println!(
            "{}  {:>6.1} g  over {} min  absorbed {:>5.1} g  {}{}",
            status.entry.start_date.to_rfc3339(),
            status.entry.quantity,
            status.absorption_time.num_minutes(),
            status.absorbed_grams_at(end),
            source,
            if status.is_complete { "  (complete)" } else { "" }
        );
    }

    Ok(())
}

fn cmd_cob(service: &Service, at: DateTime<Utc>, velocities: Option<&Path>) -> Result<()> {
    let velocities = load_optional_velocities(velocities)?;
    let cob = service.carbs_on_board(at, &velocities)?;
    println!("Carbs on board at {}: {:.1} g", cob.date.to_rfc3339(), cob.grams);
    Ok(())
}

fn cmd_totals(service: &Service, since: DateTime<Utc>) -> Result<()> {
    let total = service.total_carbs(since)?;
    println!("Total carbs since {}: {:.1} g", total.date.to_rfc3339(), total.grams);
    Ok(())
}

fn cmd_init(path: Option<&Path>, force: bool) -> Result<()> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::default_config_path);
    if path.exists() && !force {
        return Err(Error::Config(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }

    Config::default().save_to(&path)?;
    println!("✓ Wrote default config to {}", path.display());
    println!("  Add [schedules] carb_ratio and insulin_sensitivity before projecting.");
    Ok(())
}

fn cmd_schedule(schedules: &ConfiguredSchedules, at: DateTime<Utc>) -> Result<()> {
    let carb_ratio = schedules
        .carb_ratio_schedule()
        .ok_or_else(|| Error::NotConfigured("carb ratio schedule".into()))?;
    let sensitivity = schedules
        .insulin_sensitivity_schedule()
        .ok_or_else(|| Error::NotConfigured("insulin sensitivity schedule".into()))?;

    println!("At {}:", at.to_rfc3339());
    println!("  Carb ratio:          {} g/U", carb_ratio.value_at(at));
    println!(
        "  Insulin sensitivity: {} {}/U",
        sensitivity.value_at(at),
        sensitivity.unit
    );
    Ok(())
}
