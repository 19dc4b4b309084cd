use crate::api::DeliveryApi;
use crate::config::{MgmtConfig, DEFAULT_CONFIG_PATH};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use harvestsync_sync::{
    parse_timestamp, EventTranslator, Notification, SyncError, SyncOrchestrator, SyncReport,
};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "hsync")]
#[command(about = "harvestsync ResourceSync publisher", long_about = None)]
pub struct Cli {
    #[arg(short, long, env = "HARVESTSYNC_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Wipe the output directory and publish a fresh baseline
    Init,
    /// Publish change lists for events since the last run
    Update {
        /// Start of the window instead of the latest change list (yyyy-MM-dd-HHmmss)
        #[arg(long)]
        from: Option<String>,
    },
    /// Publish a fresh baseline and fold history into the archive
    Rebase,
    /// Record a JSON-lines file of repository notifications in the audit log
    Ingest {
        file: PathBuf,
    },
    /// Serve published documents and on-demand dumps
    Serve,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let config = MgmtConfig::load(&self.config)?;
        match self.command {
            Command::Init => Self::orchestrate(config, |o| o.init()).await,
            Command::Update { ref from } => {
                let from = from.as_deref().map(parse_timestamp).transpose()?;
                Self::orchestrate(config, move |o| o.update(from)).await
            }
            Command::Rebase => Self::orchestrate(config, |o| o.rebase()).await,
            Command::Ingest { ref file } => Self::ingest(&config, file),
            Command::Serve => Self::serve(config).await,
        }
    }

    async fn orchestrate<F>(config: MgmtConfig, op: F) -> Result<()>
    where
        F: FnOnce(&SyncOrchestrator) -> Result<SyncReport, SyncError> + Send + 'static,
    {
        let ctx = config.context()?;
        let report = tokio::task::spawn_blocking(move || op(&SyncOrchestrator::new(ctx))).await??;
        Self::print_report(&report);
        Ok(())
    }

    fn print_report(report: &SyncReport) {
        println!("Operation: {}", report.operation);
        println!("At: {}", report.at);
        println!("{:<30} {:>10} {:>10}", "SCOPE", "DOCUMENTS", "EVENTS");
        println!("{}", "-".repeat(52));
        for scope in &report.scopes {
            println!(
                "{:<30} {:>10} {:>10}",
                scope.scope.to_string(),
                scope.documents.len(),
                scope.events
            );
        }
        println!("Archived change lists: {}", report.archived);
    }

    fn ingest(config: &MgmtConfig, file: &Path) -> Result<()> {
        let ctx = config.context()?;
        let translator = EventTranslator::new(ctx.audit.clone(), ctx.settings.exposed_bundles.clone());
        let reader = BufReader::new(
            std::fs::File::open(file)
                .with_context(|| format!("cannot open notifications {}", file.display()))?,
        );

        let mut notifications = 0;
        let mut events = 0;
        for (n, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let notification = Notification::from_json(&line)
                .with_context(|| format!("{}:{}: invalid notification", file.display(), n + 1))?;
            events += translator.handle(&notification);
            notifications += 1;
        }
        tracing::info!(notifications, events, "ingest complete");
        println!("Ingested {} notifications, recorded {} audit events", notifications, events);
        Ok(())
    }

    async fn serve(config: MgmtConfig) -> Result<()> {
        let ctx = config.context()?;
        DeliveryApi::new(ctx, config.bind_addr).serve().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvestsync_sync::{AuditStore, FileAuditStore, Scope};
    use std::io::Write;

    #[test]
    fn test_parse_commands() {
        let cli = Cli::parse_from(["hsync", "--config", "/tmp/h.toml", "init"]);
        assert_eq!(cli.config, PathBuf::from("/tmp/h.toml"));
        assert_eq!(cli.command, Command::Init);

        let cli = Cli::parse_from(["hsync", "update", "--from", "2024-05-01-100000"]);
        assert_eq!(
            cli.command,
            Command::Update {
                from: Some("2024-05-01-100000".to_string())
            }
        );

        let cli = Cli::parse_from(["hsync", "ingest", "events.jsonl"]);
        assert_eq!(
            cli.command,
            Command::Ingest {
                file: PathBuf::from("events.jsonl")
            }
        );
        assert_eq!(Cli::parse_from(["hsync", "rebase"]).command, Command::Rebase);
        assert_eq!(Cli::parse_from(["hsync", "serve"]).command, Command::Serve);
    }

    #[test]
    fn test_rejects_unknown_command() {
        assert!(Cli::try_parse_from(["hsync", "publish"]).is_err());
    }

    fn write_config(dir: &std::path::Path) -> PathBuf {
        let path = dir.join("harvestsync.json");
        let config = serde_json::json!({
            "audit_log": dir.join("audit.log"),
            "catalog_path": dir.join("catalog.json"),
            "sync": { "output_dir": dir.join("rs") }
        });
        std::fs::write(&path, config.to_string()).unwrap();
        path
    }

    #[tokio::test]
    async fn test_ingest_records_events() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_config(dir.path());
        let events = dir.path().join("events.jsonl");
        let mut file = std::fs::File::create(&events).unwrap();
        writeln!(file, r#"{{"kind": "item_deleted", "item_id": "i1", "handle": "1/1"}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"kind": "other", "subject_type": "EPERSON"}}"#).unwrap();

        let cli = Cli {
            config,
            command: Command::Ingest { file: events },
        };
        cli.run().await.unwrap();

        let store = FileAuditStore::open(&dir.path().join("audit.log")).unwrap();
        let recorded = store.query(None, None, &Scope::Site).unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].resource_id, "i1");
    }

    #[tokio::test]
    async fn test_ingest_drops_unknown_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_config(dir.path());
        let events = dir.path().join("events.jsonl");
        let mut file = std::fs::File::create(&events).unwrap();
        writeln!(file, r#"{{"kind": "item_deleted", "item_id": "i1", "handle": "1/1"}}"#).unwrap();
        writeln!(file, r#"{{"kind": "collection_created", "handle": "1/60"}}"#).unwrap();
        writeln!(file, r#"{{"kind": "item_deleted", "item_id": "i2", "handle": "1/2"}}"#).unwrap();

        Cli {
            config,
            command: Command::Ingest { file: events },
        }
        .run()
        .await
        .unwrap();

        let store = FileAuditStore::open(&dir.path().join("audit.log")).unwrap();
        let ids: Vec<_> = store
            .query(None, None, &Scope::Site)
            .unwrap()
            .into_iter()
            .map(|e| e.resource_id)
            .collect();
        assert_eq!(ids, vec!["i1", "i2"]);
    }

    #[tokio::test]
    async fn test_ingest_rejects_malformed_line() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_config(dir.path());
        let events = dir.path().join("events.jsonl");
        std::fs::write(&events, "{\"kind\": \"item_deleted\"}\n").unwrap();

        let result = Cli {
            config,
            command: Command::Ingest { file: events },
        }
        .run()
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_init_then_update() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_config(dir.path());

        Cli {
            config: config.clone(),
            command: Command::Init,
        }
        .run()
        .await
        .unwrap();
        assert!(dir.path().join("rs/capabilitylist.xml").is_file());

        let result = Cli {
            config,
            command: Command::Update {
                from: Some("not-a-date".to_string()),
            },
        }
        .run()
        .await;
        assert!(result.is_err());
    }
}
