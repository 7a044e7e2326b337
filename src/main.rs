use admissions::application::authorization::permissions;
use admissions::application::lifecycle::LifecycleEngine;
use admissions::application::reconciliation::ReconciliationEngine;
use admissions::config::{EngineArgs, EngineConfig, PaystackArgs};
use admissions::domain::actor::{Actor, ActorKind};
use admissions::domain::admission::OfferImportRow;
use admissions::domain::ids::{PaymentReference, UserId};
use admissions::domain::ports::{SharedClock, SharedGateway, SharedLedger};
use admissions::error::{AdmissionError, Result as AdmissionResult};
use admissions::infrastructure::clock::SystemClock;
use admissions::infrastructure::in_memory::{InMemoryLedger, InMemoryPermissionResolver};
use admissions::infrastructure::paystack::PaystackClient;
use admissions::interfaces::csv::offer_reader::OfferReader;
use admissions::interfaces::csv::report_writer::ReportWriter;
use admissions::telemetry;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Parser)]
#[command(author, version, about = "Operator tooling for the admissions pipeline", long_about = None)]
struct Cli {
    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set.
    #[arg(long, global = true, env = "ADMISSIONS_LOG", default_value = "warn")]
    log: String,

    #[command(flatten)]
    engine: EngineArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Expire every offer whose acceptance deadline has passed
    Sweep {
        /// Evaluate deadlines as of this instant instead of now (RFC 3339)
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },
    /// Create admission offers from a CSV upload
    ImportOffers {
        /// CSV with `application_number[,acceptance_deadline]` rows
        input: PathBuf,

        /// Staff account performing the upload
        #[arg(long)]
        operator: Uuid,
    },
    /// Reconcile one payment against the gateway
    Reconcile {
        reference: String,

        #[command(flatten)]
        paystack: PaystackArgs,
    },
    /// Reconcile every pending payment against the gateway
    ReconcilePending {
        #[command(flatten)]
        paystack: PaystackArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init(&cli.log).into_diagnostic()?;

    let config = cli.engine.into_config().into_diagnostic()?;
    let ledger = open_ledger(cli.db_path)?;
    let clock: SharedClock = Arc::new(SystemClock);

    let stdout = io::stdout();
    let mut report = ReportWriter::new(stdout.lock());

    match cli.command {
        Command::Sweep { now } => {
            let engine = LifecycleEngine::new(ledger, clock.clone(), config);
            let now = now.unwrap_or_else(|| clock.now());
            let outcome = engine.expire_overdue_offers(now).await.into_diagnostic()?;
            report.write_admissions(&outcome.expired).into_diagnostic()?;
        }
        Command::ImportOffers { input, operator } => {
            let rows = read_offers(input)?;
            let actor = operator_actor(UserId::from(operator)).await.into_diagnostic()?;
            let engine = LifecycleEngine::new(ledger, clock, config);
            match engine.import_offers(&actor, rows).await {
                Ok(offers) => report.write_admissions(&offers).into_diagnostic()?,
                Err(AdmissionError::ImportRejected(issues)) => {
                    report.write_issues(&issues).into_diagnostic()?;
                    return Err(AdmissionError::ImportRejected(issues)).into_diagnostic();
                }
                Err(err) => return Err(err).into_diagnostic(),
            }
        }
        Command::Reconcile {
            reference,
            paystack,
        } => {
            let engine = reconciliation_engine(ledger.clone(), clock, config, paystack)?;
            let reference = PaymentReference::new(reference);
            let result = engine.reconcile(&reference).await;
            if let Some(payment) = ledger.payment(&reference).await.into_diagnostic()? {
                report.write_payments([&payment]).into_diagnostic()?;
            }
            result.into_diagnostic()?;
        }
        Command::ReconcilePending { paystack } => {
            let engine = reconciliation_engine(ledger, clock, config, paystack)?;
            let outcome = engine.reconcile_pending().await.into_diagnostic()?;
            report.write_outcomes(&outcome.outcomes).into_diagnostic()?;
        }
    }

    Ok(())
}

fn open_ledger(db_path: Option<PathBuf>) -> Result<SharedLedger> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => {
            use admissions::infrastructure::rocksdb::RocksDbLedger;
            tracing::info!(path = %path.display(), "opening RocksDB ledger");
            Ok(Arc::new(RocksDbLedger::open(path).into_diagnostic()?))
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => {
            tracing::warn!(
                "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
            );
            Ok(Arc::new(InMemoryLedger::new()))
        }
        None => Ok(Arc::new(InMemoryLedger::new())),
    }
}

fn read_offers(input: PathBuf) -> Result<Vec<OfferImportRow>> {
    let file = File::open(input).into_diagnostic()?;
    OfferReader::new(file)
        .offers()
        .collect::<AdmissionResult<Vec<_>>>()
        .into_diagnostic()
}

/// The CLI operator acts as staff holding the offer-upload permission.
async fn operator_actor(id: UserId) -> AdmissionResult<Actor> {
    let resolver = InMemoryPermissionResolver::new();
    resolver
        .grant(id, [permissions::ADMISSION_UPLOAD].into_iter().collect())
        .await;
    Actor::resolve(&resolver, id, ActorKind::Staff).await
}

fn reconciliation_engine(
    ledger: SharedLedger,
    clock: SharedClock,
    config: EngineConfig,
    paystack: PaystackArgs,
) -> Result<ReconciliationEngine> {
    let client = PaystackClient::new(paystack.into_config(config.gateway_timeout)).into_diagnostic()?;
    let gateway: SharedGateway = Arc::new(client);
    Ok(ReconciliationEngine::new(ledger, gateway, clock, config))
}
