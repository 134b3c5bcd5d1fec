use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use tracing::{info, warn};

use camp_attendance_bot::delimited::{parse_rows, separator_for, write_row};
use camp_attendance_bot::sheet::{Sheet, SqliteSheet};
use camp_attendance_bot::{config, db};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Seed, inspect and unlock the sheets behind the attendance bot"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Replace a sheet with the rows of a CSV/TSV file (row 1 = first line)
    Import {
        /// Sheet name, e.g. "Masterlist"
        sheet: String,
        file: PathBuf,
    },
    /// Print a sheet as CSV/TSV to stdout
    Dump {
        sheet: String,
        #[arg(long)]
        tsv: bool,
    },
    /// Delete the ledger lease so a stuck lock no longer blocks submissions
    Unlock,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    match args.command {
        Command::Import { sheet, file } => {
            let text = fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let rows = parse_rows(&text, separator_for(&file));
            if rows.is_empty() {
                bail!("{} has no rows", file.display());
            }
            let cells = SqliteSheet::new(pool, sheet.as_str())
                .replace_all(&rows)
                .await?;
            info!(sheet = %sheet, rows = rows.len(), cells, "imported sheet");
        }
        Command::Dump { sheet, tsv } => {
            let sep = if tsv { '\t' } else { ',' };
            let rows = SqliteSheet::new(pool, sheet.as_str()).rows().await?;
            if rows.is_empty() {
                warn!(sheet = %sheet, "sheet is empty");
            }
            let stdout = io::stdout();
            let mut out = BufWriter::new(stdout.lock());
            for row in &rows {
                write_row(&mut out, row, sep)?;
            }
            out.flush()?;
        }
        Command::Unlock => {
            let removed = sqlx::query("DELETE FROM ledger_locks WHERE name = ?")
                .bind(&cfg.lock.name)
                .execute(&pool)
                .await?
                .rows_affected();
            info!(name = %cfg.lock.name, removed, "cleared ledger lease");
        }
    }
    Ok(())
}
