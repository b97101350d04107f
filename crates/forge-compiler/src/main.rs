//! `forge`: the compiler-pipeline and runtime-control CLI (`spec.md` §6).
//!
//! Subcommands: `init`, `check`, `build`, `migrate`, `run`, `dev`, `version`.
//! Modeled on `dsl_cli`'s `clap`-derived shape, minus its `colored`/`atty`
//! dependency — this CLI's output stays plain text or `--format json`.

use clap::{Parser, Subcommand, ValueEnum};
use forge_diagnostics::Collector;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "forge")]
#[command(version)]
#[command(about = "Compile and run FORGE applications")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format for diagnostics and machine-readable results.
    #[arg(long, global = true, value_enum, default_value = "human")]
    format: Format,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Human,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Scaffold a new FORGE project in the current directory.
    Init {
        /// Project/app name.
        name: String,
    },
    /// Lex, parse, and analyze a source file without emitting an artifact.
    Check {
        file: PathBuf,
    },
    /// Compile a source file into a runtime artifact.
    Build {
        file: PathBuf,
        /// Where to write the artifact JSON.
        #[arg(long, default_value = ".forge-runtime/artifact.json")]
        out: PathBuf,
    },
    /// Apply the artifact's pending migration against `DATABASE_URL`.
    Migrate {
        #[arg(long, default_value = ".forge-runtime/artifact.json")]
        artifact: PathBuf,
        #[arg(long)]
        apply: bool,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        verbose: bool,
    },
    /// Run the production server.
    Run {
        #[arg(long, default_value = ".forge-runtime/artifact.json")]
        artifact: PathBuf,
    },
    /// Run the server in development mode (exposes `/_dev/*` and direct
    /// entity mutation).
    Dev {
        #[arg(long, default_value = ".forge-runtime/artifact.json")]
        artifact: PathBuf,
    },
    /// Print the compiler version.
    Version,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("forge: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Commands::Version => {
            println!("forge {}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }
        Commands::Init { name } => init(&name),
        Commands::Check { file } => check(&file, cli.format),
        Commands::Build { file, out } => build(&file, &out, cli.format),
        Commands::Migrate { artifact, apply, dry_run, verbose } => migrate(&artifact, apply, dry_run, verbose),
        Commands::Run { artifact } => run_server(&artifact, false),
        Commands::Dev { artifact } => run_server(&artifact, true),
    }
}

fn init(name: &str) -> anyhow::Result<ExitCode> {
    let src = format!(
        "app {name} {{\n    auth: none\n    database: \"{name}\"\n    version: \"0.1.0\"\n}}\n\nentity Example {{\n    title: string\n}}\n\naccess Example {{\n    read: true\n    write: true\n}}\n"
    );
    let path = PathBuf::from(format!("{name}.forge"));
    if path.exists() {
        anyhow::bail!("{} already exists", path.display());
    }
    std::fs::write(&path, src)?;
    println!("wrote {}", path.display());
    Ok(ExitCode::SUCCESS)
}

fn report(collector: &Collector, format: Format) {
    match format {
        Format::Human => {
            for diagnostic in collector.all() {
                eprintln!("{}", diagnostic.format_human());
            }
        }
        Format::Json => {
            let diags: Vec<_> = collector.all().to_vec();
            println!("{}", serde_json::to_string_pretty(&diags).unwrap_or_default());
        }
    }
}

fn check(file: &PathBuf, format: Format) -> anyhow::Result<ExitCode> {
    let src = std::fs::read_to_string(file)?;
    let (artifact, collector) = forge_emit::compile_source(&file.display().to_string(), &src);
    report(&collector, format);
    if artifact.is_none() || collector.has_errors() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn build(file: &PathBuf, out: &PathBuf, format: Format) -> anyhow::Result<ExitCode> {
    let src = std::fs::read_to_string(file)?;
    let (artifact, collector) = forge_emit::compile_source(&file.display().to_string(), &src);
    report(&collector, format);
    let Some(artifact) = artifact else {
        return Ok(ExitCode::FAILURE);
    };
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(out, forge_emit::artifact_json(&artifact)?)?;
    println!("wrote {}", out.display());
    Ok(ExitCode::SUCCESS)
}

fn migrate(artifact_path: &PathBuf, apply: bool, dry_run: bool, verbose: bool) -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let store = std::sync::Arc::new(forge_artifact::ArtifactStore::open(artifact_path.clone()).await?);
        let artifact = store.artifact().await;

        if dry_run || !apply {
            println!("pending migration: {} ({} statements)", artifact.migration.version, artifact.migration.up_statements.len());
            if verbose {
                for stmt in &artifact.migration.up_statements {
                    println!("  {stmt}");
                }
            }
            return Ok(ExitCode::SUCCESS);
        }

        let database_url = std::env::var("DATABASE_URL").map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
        let pool = sqlx::postgres::PgPoolOptions::new().max_connections(5).connect(&database_url).await?;
        forge_db::ensure_migration_ledger(&pool).await?;

        match forge_migrate::run_pending_migration(&pool, &store).await? {
            forge_migrate::MigrationOutcome::Applied { version, statement_count } => {
                println!("applied migration {version} ({statement_count} statements)");
            }
            forge_migrate::MigrationOutcome::AlreadyApplied { version } => {
                println!("migration {version} already applied");
            }
        }
        Ok(ExitCode::SUCCESS)
    })
}

fn run_server(artifact_path: &PathBuf, dev_mode: bool) -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))).init();
    let mut cfg = forge_server::config::RuntimeConfig::from_env()?;
    cfg.artifact_path = artifact_path.clone();
    if dev_mode {
        cfg.env = forge_server::config::Environment::Development;
    }
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(forge_server::serve(cfg))?;
    Ok(ExitCode::SUCCESS)
}
