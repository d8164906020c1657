//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use crate::SourceArgs;
use anyhow::Context;
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use storelens_core::{
    EtlConfig, EtlError, Pipeline, PipelineContext, ValidationReport, config::load_config,
    config::workspace_config_path,
};

/// Handle a CLI subcommand.
pub fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Run {
            sources,
            database,
            as_of,
        } => handle_run(&sources, database, as_of, workspace),
        Commands::Validate { sources, json } => handle_validate(&sources, json, workspace),
        Commands::Config { action } => handle_config(action, workspace),
    }
}

/// Canonical workspace directory. A missing or non-directory path is an
/// error: every relative source and store path resolves against it.
pub fn resolve_workspace(path: &Path) -> anyhow::Result<PathBuf> {
    let workspace = path
        .canonicalize()
        .with_context(|| format!("workspace directory {} not found", path.display()))?;
    if !workspace.is_dir() {
        anyhow::bail!("workspace {} is not a directory", path.display());
    }
    Ok(workspace)
}

/// Layered configuration with paths resolved against the workspace, then
/// command-line overrides on top.
fn effective_config(
    workspace: &Path,
    sources: &SourceArgs,
    database: Option<PathBuf>,
) -> anyhow::Result<EtlConfig> {
    let mut config = load_config(Some(workspace), None)
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?
        .resolve_paths(workspace);

    if let Some(path) = &sources.customers {
        config.sources.customers = path.clone();
    }
    if let Some(path) = &sources.orders {
        config.sources.orders = path.clone();
    }
    if let Some(path) = &sources.products {
        config.sources.products = path.clone();
    }
    if let Some(path) = database {
        config.store.database_path = path;
    }
    Ok(config)
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

fn handle_run(
    sources: &SourceArgs,
    database: Option<PathBuf>,
    as_of: Option<NaiveDate>,
    workspace: &Path,
) -> anyhow::Result<()> {
    let config = effective_config(workspace, sources, database)?;
    let database = config.store.database_path.clone();
    let pipeline = Pipeline::new(config)?;
    let mut ctx = PipelineContext::new(as_of.unwrap_or_else(today));

    match pipeline.run(&mut ctx) {
        Ok(outcome) => {
            println!("{}", outcome.summary);
            if outcome.report.advisory().any(|f| f.is_violated()) {
                println!("\nAdvisory findings:");
                print_violations(&outcome.report);
            }
            println!("\nLoaded into {}", database.display());
            Ok(())
        }
        Err(EtlError::DataQuality(dq)) => {
            println!("Validation blocked the load:");
            print_violations(dq.report());
            Err(EtlError::DataQuality(dq))
                .with_context(|| format!("pipeline run {} failed", ctx.run_id()))
        }
        Err(e) => Err(e).with_context(|| format!("pipeline run {} failed", ctx.run_id())),
    }
}

fn handle_validate(sources: &SourceArgs, json: bool, workspace: &Path) -> anyhow::Result<()> {
    let config = effective_config(workspace, sources, None)?;
    let pipeline = Pipeline::new(config)?;
    let mut ctx = PipelineContext::new(today());

    let report = match pipeline.check(&mut ctx) {
        Ok(report) => report,
        Err(EtlError::DataQuality(dq)) => dq.into_report(),
        Err(e) => return Err(e.into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report);
    }

    if report.has_blocking() {
        let rules: Vec<&str> = report.blocking().map(|f| f.rule.name()).collect();
        anyhow::bail!("blocking rule violations: {}", rules.join(", "));
    }
    Ok(())
}

/// Print only the findings that flagged rows.
fn print_violations(report: &ValidationReport) {
    for finding in report.findings.iter().filter(|f| f.is_violated()) {
        let sample: Vec<String> = finding.rows.iter().take(5).map(|r| r.to_string()).collect();
        println!(
            "  [{}] {} on {}: {} row(s) {}",
            finding.severity,
            finding.rule,
            finding.table,
            finding.violations,
            sample.join(", ")
        );
    }
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = workspace_config_path(workspace);
            if let Some(dir) = config_path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&EtlConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_config(Some(workspace), None)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use storelens_core::{Store, TableKind};
    use tempfile::TempDir;

    const ORDERS: &str = "\
order_id,customer_id,order_date,total_amount,status
1,1,2024-03-15,250.00,Completed
2,99,2024-03-20,12.00,Pending
";

    fn workspace_with_data(orders: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        let data = dir.path().join("data");
        std::fs::create_dir_all(&data).unwrap();
        std::fs::write(
            data.join("customers.csv"),
            "customer_id,name,signup_date\n1,Ada,2023-01-01\n",
        )
        .unwrap();
        std::fs::write(data.join("orders.csv"), orders).unwrap();
        std::fs::write(
            data.join("products.json"),
            r#"[{"product_id": 1, "name": "Lamp", "price": 20.0, "cost": 12.0}]"#,
        )
        .unwrap();
        dir
    }

    fn run_command(as_of: Option<NaiveDate>) -> Commands {
        Commands::Run {
            sources: SourceArgs::default(),
            database: None,
            as_of,
        }
    }

    #[test]
    fn test_missing_workspace_is_an_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        let err = resolve_workspace(&missing).unwrap_err();
        assert!(err.to_string().contains("not found"));

        let file = dir.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();
        assert!(resolve_workspace(&file).is_err());

        let resolved = resolve_workspace(dir.path()).unwrap();
        assert_eq!(resolved, dir.path().canonicalize().unwrap());
    }

    #[test]
    fn test_config_init_creates_file() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();

        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(command, workspace).unwrap();

        let config_path = workspace.join(".storelens").join("config.toml");
        assert!(config_path.exists());

        let content = std::fs::read_to_string(&config_path).unwrap();
        let parsed: EtlConfig = toml::from_str(&content).unwrap();
        assert_eq!(parsed.store.database_path, PathBuf::from("ecommerce.db"));
        assert_eq!(parsed.sources.delimiter, ',');
    }

    #[test]
    fn test_config_init_idempotent() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();
        let config_path = workspace_config_path(workspace);

        handle_command(
            Commands::Config {
                action: ConfigAction::Init,
            },
            workspace,
        )
        .unwrap();
        std::fs::write(&config_path, "[store]\ndatabase_path = \"custom.db\"\n").unwrap();

        handle_command(
            Commands::Config {
                action: ConfigAction::Init,
            },
            workspace,
        )
        .unwrap();
        let content = std::fs::read_to_string(&config_path).unwrap();
        assert!(content.contains("custom.db"));
    }

    #[test]
    fn test_run_loads_workspace_data() {
        let dir = workspace_with_data(ORDERS);
        let as_of = NaiveDate::from_ymd_opt(2024, 12, 31);
        handle_command(run_command(as_of), dir.path()).unwrap();

        let store = Store::open(&dir.path().join("ecommerce.db")).unwrap();
        assert_eq!(store.row_count(TableKind::Orders).unwrap(), Some(2));
        assert_eq!(store.row_count(TableKind::Customers).unwrap(), Some(1));
    }

    #[test]
    fn test_run_database_override() {
        let dir = workspace_with_data(ORDERS);
        let target = dir.path().join("out.db");
        let command = Commands::Run {
            sources: SourceArgs::default(),
            database: Some(target.clone()),
            as_of: NaiveDate::from_ymd_opt(2024, 12, 31),
        };
        handle_command(command, dir.path()).unwrap();
        assert!(target.exists());
        assert!(!dir.path().join("ecommerce.db").exists());
    }

    #[test]
    fn test_run_blocked_by_duplicate() {
        let dir = workspace_with_data(
            "order_id,customer_id,order_date,total_amount,status\n\
             1,1,2024-03-15,1.00,Completed\n\
             1,1,2024-03-16,2.00,Completed\n",
        );
        let err = handle_command(run_command(None), dir.path()).unwrap_err();
        let root = err.downcast_ref::<EtlError>().unwrap();
        assert_eq!(root.stage(), "validate");
        assert!(!dir.path().join("ecommerce.db").exists());
    }

    #[test]
    fn test_validate_passes_with_advisory_only() {
        let dir = workspace_with_data(ORDERS);
        let command = Commands::Validate {
            sources: SourceArgs::default(),
            json: true,
        };
        handle_command(command, dir.path()).unwrap();
        assert!(!dir.path().join("ecommerce.db").exists());
    }

    #[test]
    fn test_validate_fails_on_blocking() {
        let dir = workspace_with_data(
            "order_id,customer_id,order_date,total_amount,status\n1,1,2024-03-15,-1.00,Completed\n",
        );
        let command = Commands::Validate {
            sources: SourceArgs::default(),
            json: false,
        };
        let err = handle_command(command, dir.path()).unwrap_err();
        assert!(err.to_string().contains("negative_amount"));
    }

    #[test]
    fn test_missing_sources_reported() {
        let dir = TempDir::new().unwrap();
        let command = Commands::Validate {
            sources: SourceArgs::default(),
            json: false,
        };
        let err = handle_command(command, dir.path()).unwrap_err();
        let root = err.downcast_ref::<EtlError>().unwrap();
        assert_eq!(root.stage(), "extract");
    }
}
