//! moldb CLI
//!
//! Command-line interface for the molecule database:
//! - Create, update and inspect databases
//! - Define and query views
//! - Create and export snapshots

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use moldb::query::parse_date;
use moldb::{
    generate_default_config, Catalog, Config, Database, DatabaseView, EntryFilter,
    FilterComparisonType, FilterPropertyType, ViewUpdate,
};

#[derive(Parser)]
#[command(name = "moldb")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Versioned molecule database with filtered views and snapshots")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Catalog root directory, overrides the config
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a database
    Create {
        name: String,
        /// Custom identifier (letters, digits, '-', '_', '.', '@')
        #[arg(long)]
        id: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
    },

    /// List databases
    List,

    /// Delete a database and its views
    Delete {
        /// Database id or name
        database: String,
    },

    /// Ingest the structure files of a folder
    Update {
        /// Database id or name
        database: String,
        folder: PathBuf,
        /// Print a line per processed file
        #[arg(long)]
        progress: bool,
    },

    /// Recompute all entries from the stored copies
    Reindex {
        /// Database id or name
        database: String,
    },

    /// Show database statistics and history
    Stats {
        /// Database id or name
        database: String,
    },

    /// List entries of the current version
    Entries {
        /// Database id or name
        database: String,
        /// Filter, e.g. "AtomCount > 100" or "ResidueTypes eq HEM & !ZN"
        #[arg(short = 'F', long = "filter")]
        filters: Vec<String>,
        /// Version to read instead of the current one
        #[arg(long)]
        version: Option<u32>,
        /// Write the entries with their properties as CSV to this file
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Manage views
    View {
        #[command(subcommand)]
        command: ViewCommands,
    },

    /// Manage snapshots
    Snapshot {
        #[command(subcommand)]
        command: SnapshotCommands,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum ViewCommands {
    /// Create a view over a database
    Create {
        /// Database id or name
        database: String,
        name: String,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(short = 'F', long = "filter")]
        filters: Vec<String>,
    },

    /// List views
    List,

    /// Show a view's statistics and entries
    Show {
        /// View id or name
        view: String,
    },

    /// Query the live database through a view with extra filters
    Filter {
        /// View id or name
        view: String,
        #[arg(short = 'F', long = "filter")]
        filters: Vec<String>,
    },

    /// Change a view's name, description or filters
    Edit {
        /// View id or name
        view: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
        /// Replace the filters
        #[arg(short = 'F', long = "filter")]
        filters: Vec<String>,
    },

    /// Delete a view
    Delete {
        /// View id or name
        view: String,
    },
}

#[derive(Subcommand)]
pub enum SnapshotCommands {
    /// Create a snapshot from views
    Create {
        name: String,
        /// View ids or names; a database name selects its default view
        #[arg(required = true)]
        views: Vec<String>,
    },

    /// List snapshots
    List,

    /// Show snapshot metadata
    Show {
        /// Snapshot id or name
        snapshot: String,
    },

    /// Export snapshot entries as CSV
    Export {
        /// Snapshot id or name
        snapshot: String,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Delete a snapshot
    Delete {
        /// Snapshot id or name
        snapshot: String,
    },
}

/// Parse `NAME OP VALUE`
///
/// Numeric operators `==`, `<`, `<=`, `>`, `>=` pick Int, Double or Date from
/// the value; `eq`, `has` and `re` are StringEqual, StringContainsWord and
/// StringRegex on a `¦`-separated property.
fn parse_filter_arg(arg: &str) -> anyhow::Result<EntryFilter> {
    let mut parts = arg.trim().splitn(3, char::is_whitespace);
    let (Some(name), Some(op), Some(value)) = (parts.next(), parts.next(), parts.next()) else {
        bail!("filter '{}' must look like 'NAME OP VALUE'", arg);
    };
    let value = value.trim();

    let comparison = match op {
        "==" => FilterComparisonType::NumberEqual,
        "<" => FilterComparisonType::NumberLess,
        "<=" => FilterComparisonType::NumberLessEqual,
        ">" => FilterComparisonType::NumberGreater,
        ">=" => FilterComparisonType::NumberGreaterEqual,
        "eq" => FilterComparisonType::StringEqual,
        "has" => FilterComparisonType::StringContainsWord,
        "re" => FilterComparisonType::StringRegex,
        other => bail!("unknown filter operator '{}'", other),
    };

    let property_type = if !comparison.is_numeric() {
        FilterPropertyType::StringArray
    } else if value.parse::<i64>().is_ok() {
        FilterPropertyType::Int
    } else if value.parse::<f64>().is_ok() {
        FilterPropertyType::Double
    } else if parse_date(value).is_some() {
        FilterPropertyType::Date
    } else {
        bail!("'{}' is not a number or a date", value);
    };

    Ok(EntryFilter::new(name, property_type, comparison, value))
}

fn parse_filters(args: &[String]) -> anyhow::Result<Vec<EntryFilter>> {
    args.iter().map(|a| parse_filter_arg(a)).collect()
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    if let Some(root) = &cli.root {
        config.storage.root_dir = root.clone();
    }
    Ok(config)
}

/// A view id or name, or the default view of a database id or name
fn resolve_view(catalog: &Catalog, key: &str) -> anyhow::Result<DatabaseView> {
    if let Ok(view) = catalog.views().find(key) {
        return Ok(view);
    }
    let db = catalog
        .databases()
        .find(key)
        .with_context(|| format!("no view or database named '{}'", key))?;
    Ok(db.default_view()?)
}

fn print_database(db: &Database) -> anyhow::Result<()> {
    let stats = db.statistics()?;
    println!("{:<38} {:<24} {}", db.id(), db.name(), stats);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { output } = &cli.command {
        let content = generate_default_config();
        match output {
            Some(path) => {
                std::fs::write(path, content)?;
                println!("Wrote default config to {}", path.display());
            }
            None => print!("{}", content),
        }
        return Ok(());
    }

    let config = load_config(&cli)?;
    moldb::logging::init_logging(&config.logging)?;
    tracing::debug!("moldb v{}", env!("CARGO_PKG_VERSION"));

    let catalog = Catalog::open(&config)
        .with_context(|| format!("opening catalog at {}", config.storage.root_dir.display()))?;
    let json = cli.format == "json";

    match cli.command {
        Commands::Create {
            name,
            id,
            description,
        } => {
            let db = catalog
                .databases()
                .create_database(&name, id.as_deref(), description.as_deref())?;
            if json {
                print_json(db.info())?;
            } else {
                println!("Created database '{}' ({})", db.name(), db.id());
            }
        }

        Commands::List => {
            let databases = catalog.databases().list()?;
            if json {
                let infos: Vec<_> = databases.iter().map(|d| d.info()).collect();
                print_json(&infos)?;
            } else {
                for db in &databases {
                    print_database(db)?;
                }
            }
        }

        Commands::Delete { database } => {
            let db = catalog.databases().find(&database)?;
            catalog.delete_database(db.id())?;
            println!("Deleted database '{}'", db.name());
        }

        Commands::Update {
            database,
            folder,
            progress,
        } => {
            let db = catalog.databases().find(&database)?;
            let result = if progress {
                let done = AtomicUsize::new(0);
                let report = |file: &str| {
                    let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                    eprintln!("[{}] {}", n, file);
                };
                db.update_from_folder_with_progress(&folder, &report)?
            } else {
                db.update_from_folder(&folder)?
            };

            if json {
                print_json(&result)?;
            } else {
                let c = &result.counts;
                println!(
                    "Added {}, modified {}, removed {}, unchanged {}, error {}",
                    c.num_added, c.num_modified, c.num_removed, c.num_unchanged, c.num_error
                );
                if result.is_modified {
                    println!("Database is now at version {} with {} molecules", result.version, result.molecule_count);
                } else {
                    println!("No changes (version {})", result.version);
                }
            }
        }

        Commands::Reindex { database } => {
            let db = catalog.databases().find(&database)?;
            let result = db.reindex()?;
            if json {
                print_json(&result)?;
            } else {
                println!(
                    "Updated {}, error {}; version {}",
                    result.counts.num_updated, result.counts.num_error, result.version
                );
            }
        }

        Commands::Stats { database } => {
            let db = catalog.databases().find(&database)?;
            let stats = db.statistics()?;
            if json {
                print_json(&stats)?;
            } else {
                println!("Database:       {} ({})", db.name(), db.id());
                println!("Version:        {}", stats.version);
                println!("Updates:        {}", stats.update_count);
                println!("Molecules:      {}", stats.molecule_count);
                println!("Size:           {} bytes", stats.size_in_bytes);
                println!("Avg atom count: {}", stats.average_atom_count);
                if let Some(at) = stats.last_updated {
                    println!("Last updated:   {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
                }
                println!("History:        {:?}", db.history()?);
                if db.is_locked() {
                    println!("An update is in progress");
                }
            }
        }

        Commands::Entries {
            database,
            filters,
            version,
            csv,
        } => {
            let db = catalog.databases().find(&database)?;
            let filters = parse_filters(&filters)?;
            let entries = match version {
                Some(v) => {
                    let compiled = moldb::query::compile_filters(&filters)?;
                    db.snapshot_at(v)?
                        .into_iter()
                        .filter(|e| moldb::query::matches_all(&compiled, e))
                        .collect()
                }
                None => db.filter(&filters)?,
            };
            if let Some(path) = csv {
                let file = std::fs::File::create(&path)
                    .with_context(|| format!("creating {}", path.display()))?;
                let rows: Vec<(&str, &moldb::storage::IndexEntry)> = entries.iter().map(|e| (db.id(), e)).collect();
                moldb::storage::write_entries_csv(file, &rows, false)?;
                eprintln!("Exported {} entries to {}", rows.len(), path.display());
                return Ok(());
            }
            for entry in &entries {
                if json {
                    println!("{}", serde_json::to_string(&entry.entry())?);
                } else {
                    println!(
                        "{:<24} v{:<4} {:>8} atoms",
                        entry.filename(),
                        entry.version,
                        entry.atom_count()
                    );
                }
            }
            eprintln!("{} entries", entries.len());
        }

        Commands::View { command } => run_view(&catalog, command, json)?,

        Commands::Snapshot { command } => run_snapshot(&catalog, command, json)?,

        // handled before the catalog is opened
        Commands::Config { .. } => {}
    }

    Ok(())
}

fn run_view(catalog: &Catalog, command: ViewCommands, json: bool) -> anyhow::Result<()> {
    match command {
        ViewCommands::Create {
            database,
            name,
            description,
            filters,
        } => {
            let db = catalog.databases().find(&database)?;
            let view = catalog.views().create_view(
                db.id(),
                &name,
                description.as_deref(),
                parse_filters(&filters)?,
            )?;
            println!("Created view '{}' ({})", view.name(), view.id());
        }

        ViewCommands::List => {
            let views = catalog.views().list()?;
            if json {
                let infos: Vec<_> = views.iter().map(|v| v.info()).collect();
                print_json(&infos)?;
            } else {
                for view in &views {
                    println!(
                        "{:<38} {:<24} {} filter(s) on {}",
                        view.id(),
                        view.name(),
                        view.info().filters.len(),
                        view.database().name()
                    );
                }
            }
        }

        ViewCommands::Show { view } => {
            let view = resolve_view(catalog, &view)?;
            let stats = view.statistics()?;
            let entries = view.snapshot()?;
            if json {
                print_json(&serde_json::json!({
                    "View": view.info(),
                    "Statistics": stats,
                    "Entries": entries,
                }))?;
            } else {
                println!("View:      {} on {}", view.name(), view.database().name());
                for filter in &view.info().filters {
                    println!("Filter:    {}", filter);
                }
                println!(
                    "Version {}, {} molecules, avg {} atoms",
                    stats.version, stats.molecule_count, stats.average_atom_count
                );
                for entry in &entries {
                    println!("  {}", entry.filename());
                }
            }
        }

        ViewCommands::Filter { view, filters } => {
            let view = resolve_view(catalog, &view)?;
            let entries = view.filter(&parse_filters(&filters)?)?;
            for entry in &entries {
                println!("{}", entry.filename());
            }
            eprintln!("{} entries", entries.len());
        }

        ViewCommands::Edit {
            view,
            name,
            description,
            filters,
        } => {
            let id = catalog.views().find(&view)?.id().to_string();
            let update = ViewUpdate {
                name,
                description,
                filters: if filters.is_empty() {
                    None
                } else {
                    Some(parse_filters(&filters)?)
                },
            };
            let view = catalog.views().update(&id, update)?;
            println!("Updated view '{}'", view.name());
        }

        ViewCommands::Delete { view } => {
            let view = catalog.views().find(&view)?;
            catalog.views().delete(view.id())?;
            println!("Deleted view '{}'", view.name());
        }
    }
    Ok(())
}

fn run_snapshot(catalog: &Catalog, command: SnapshotCommands, json: bool) -> anyhow::Result<()> {
    match command {
        SnapshotCommands::Create { name, views } => {
            let views = views
                .iter()
                .map(|v| resolve_view(catalog, v))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let snapshot = catalog.snapshots().create_from_views(&name, &views)?;
            println!(
                "Created snapshot '{}' with {} molecules",
                snapshot.name(),
                snapshot.info().total_molecule_count
            );
        }

        SnapshotCommands::List => {
            for snapshot in catalog.snapshots().list()? {
                let state = if snapshot.is_valid() { "" } else { " (invalid)" };
                println!(
                    "{:<38} {:<24} {} molecules{}",
                    snapshot.id(),
                    snapshot.name(),
                    snapshot.info().total_molecule_count,
                    state
                );
            }
        }

        SnapshotCommands::Show { snapshot } => {
            let snapshot = catalog.snapshots().find(&snapshot)?;
            if json {
                print_json(snapshot.info())?;
            } else {
                let info = snapshot.info();
                println!("Snapshot:  {} ({})", info.name, info.id);
                println!("Created:   {}", info.date_created.format("%Y-%m-%d %H:%M:%S UTC"));
                println!("Valid:     {}", snapshot.is_valid());
                for view in &info.views {
                    println!("  view {:<24} {} molecules", view.name, view.molecule_count);
                }
                for db in &info.databases {
                    println!("  database {:<20} {} molecules", db.name, db.molecule_count);
                }
                println!("Total:     {} molecules", info.total_molecule_count);
            }
        }

        SnapshotCommands::Export { snapshot, output } => {
            let snapshot = catalog.snapshots().find(&snapshot)?;
            let rows = match output {
                Some(path) => {
                    let file = std::fs::File::create(&path)
                        .with_context(|| format!("creating {}", path.display()))?;
                    snapshot.export_csv(file)?
                }
                None => snapshot.export_csv(std::io::stdout().lock())?,
            };
            eprintln!("Exported {} entries", rows);
        }

        SnapshotCommands::Delete { snapshot } => {
            let snapshot = catalog.snapshots().find(&snapshot)?;
            catalog.snapshots().delete(snapshot.id())?;
            println!("Deleted snapshot '{}'", snapshot.name());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_filter_arg() {
        let f = parse_filter_arg("AtomCount > 100").unwrap();
        assert_eq!(f.property_type, FilterPropertyType::Int);
        assert_eq!(f.comparison, FilterComparisonType::NumberGreater);

        let f = parse_filter_arg("Resolution <= 2.5").unwrap();
        assert_eq!(f.property_type, FilterPropertyType::Double);

        let f = parse_filter_arg("Released >= 2020-1-31").unwrap();
        assert_eq!(f.property_type, FilterPropertyType::Date);

        let f = parse_filter_arg("ResidueTypes eq HEM & !ZN").unwrap();
        assert_eq!(f.property_type, FilterPropertyType::StringArray);
        assert_eq!(f.value, "HEM & !ZN");

        assert!(parse_filter_arg("AtomCount >").is_err());
        assert!(parse_filter_arg("AtomCount ~ 3").is_err());
        assert!(parse_filter_arg("AtomCount > many").is_err());
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from(["moldb", "--root", "/tmp/x", "update", "pdb", "./in", "--progress"]).unwrap();
        assert_eq!(cli.root, Some(PathBuf::from("/tmp/x")));
        assert!(matches!(cli.command, Commands::Update { progress: true, .. }));

        let cli = Cli::try_parse_from(["moldb", "view", "create", "pdb", "large", "-F", "AtomCount > 5000"]).unwrap();
        assert!(matches!(cli.command, Commands::View { command: ViewCommands::Create { .. } }));
    }
}
