use std::collections::VecDeque;
use std::path::PathBuf;

use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::SqlitePoolOptions;

use civic_ledger::api::ErrorResponse;
use civic_ledger::config::{Backend, Config};
use civic_ledger::infra::{FsBlobStore, PgLedgerStore, SqliteLedgerStore};
use civic_ledger::telemetry::{init_telemetry, TelemetryConfig};
use civic_ledger::{
    EvidenceId, EvidenceUpload, LedgerError, LedgerService, LedgerStore, ProcessId,
    ProcessLedger,
};

fn print_help() {
    eprintln!(
        "\
civic-ledger-admin

USAGE:
  civic-ledger-admin <command> [options]

COMMANDS:
  migrate                         Run database migrations
  create-process                  Create a process and its genesis event
  append-event                    Append an event to a process chain
  list-events                     Print a process chain in sequence order
  verify                          Verify a process chain
  submit-evidence                 Store a file and chain an EvidenceSubmitted event
  get-evidence                    Print an evidence pointer

COMMON OPTIONS:
  --database-url <url>            (defaults to env DATABASE_URL, then sqlite://civic_ledger.db?mode=rwc)
  --evidence-root <dir>           (defaults to env EVIDENCE_ROOT, then ./evidence-store)

create-process OPTIONS:
  --process-type <text>           (required)
  --actor <hash>                  (required)

append-event OPTIONS:
  --process-id <uuid>             (required)
  --event-type <text>             (required)
  --actor <hash>                  (required)
  --payload <json>                (optional) Inline JSON payload
  --payload-file <path>           (optional) Read the JSON payload from a file

list-events / verify OPTIONS:
  --process-id <uuid>             (required)

submit-evidence OPTIONS:
  --process-id <uuid>             (required)
  --actor <hash>                  (required)
  --file <path>                   (required)
  --mime <type>                   (default: application/octet-stream)
  --name <file name>              (default: the file's name)

get-evidence OPTIONS:
  --evidence-id <uuid>            (required)

Output is JSON on stdout. Failures print an error body and exit with status 1;
verify exits with status 2 when the chain is broken.
"
    );
}

enum Command {
    Migrate,
    CreateProcess {
        process_type: String,
        actor: String,
    },
    AppendEvent {
        process_id: ProcessId,
        event_type: String,
        actor: String,
        payload: Value,
    },
    ListEvents {
        process_id: ProcessId,
    },
    Verify {
        process_id: ProcessId,
    },
    SubmitEvidence {
        process_id: ProcessId,
        actor: String,
        file: PathBuf,
        mime: Option<String>,
        name: Option<String>,
    },
    GetEvidence {
        evidence_id: EvidenceId,
    },
}

fn take_value(args: &mut VecDeque<String>, flag: &str) -> anyhow::Result<String> {
    args.pop_front()
        .ok_or_else(|| anyhow::anyhow!("missing value for {flag}"))
}

fn required<T>(value: Option<T>, flag: &str) -> anyhow::Result<T> {
    value.ok_or_else(|| anyhow::anyhow!("{flag} is required"))
}

/// Parse command options. Returns `None` when help was requested.
fn parse(
    command: &str,
    mut args: VecDeque<String>,
    config: &mut Config,
) -> anyhow::Result<Option<Command>> {
    let mut process_type: Option<String> = None;
    let mut actor: Option<String> = None;
    let mut process_id: Option<ProcessId> = None;
    let mut evidence_id: Option<EvidenceId> = None;
    let mut event_type: Option<String> = None;
    let mut payload: Option<Value> = None;
    let mut file: Option<PathBuf> = None;
    let mut mime: Option<String> = None;
    let mut name: Option<String> = None;

    while let Some(arg) = args.pop_front() {
        match arg.as_str() {
            "--database-url" => config.database_url = take_value(&mut args, &arg)?,
            "--evidence-root" => {
                config.evidence_root = PathBuf::from(take_value(&mut args, &arg)?)
            }
            "--process-type" => process_type = Some(take_value(&mut args, &arg)?),
            "--actor" => actor = Some(take_value(&mut args, &arg)?),
            "--process-id" => {
                let raw = take_value(&mut args, &arg)?;
                process_id = Some(raw.parse()?);
            }
            "--evidence-id" => {
                let raw = take_value(&mut args, &arg)?;
                evidence_id = Some(raw.parse()?);
            }
            "--event-type" => event_type = Some(take_value(&mut args, &arg)?),
            "--payload" => {
                let raw = take_value(&mut args, &arg)?;
                payload = Some(serde_json::from_str(&raw)?);
            }
            "--payload-file" => {
                let path = take_value(&mut args, &arg)?;
                let raw = std::fs::read_to_string(&path)?;
                payload = Some(serde_json::from_str(&raw)?);
            }
            "--file" => file = Some(PathBuf::from(take_value(&mut args, &arg)?)),
            "--mime" => mime = Some(take_value(&mut args, &arg)?),
            "--name" => name = Some(take_value(&mut args, &arg)?),
            "-h" | "--help" => return Ok(None),
            other => anyhow::bail!("unexpected argument: {other}"),
        }
    }

    let command = match command {
        "migrate" => Command::Migrate,
        "create-process" => Command::CreateProcess {
            process_type: required(process_type, "--process-type")?,
            actor: required(actor, "--actor")?,
        },
        "append-event" => Command::AppendEvent {
            process_id: required(process_id, "--process-id")?,
            event_type: required(event_type, "--event-type")?,
            actor: required(actor, "--actor")?,
            payload: payload.unwrap_or_else(|| json!({})),
        },
        "list-events" => Command::ListEvents {
            process_id: required(process_id, "--process-id")?,
        },
        "verify" => Command::Verify {
            process_id: required(process_id, "--process-id")?,
        },
        "submit-evidence" => Command::SubmitEvidence {
            process_id: required(process_id, "--process-id")?,
            actor: required(actor, "--actor")?,
            file: required(file, "--file")?,
            mime,
            name,
        },
        "get-evidence" => Command::GetEvidence {
            evidence_id: required(evidence_id, "--evidence-id")?,
        },
        other => anyhow::bail!("unknown command: {other} (try --help)"),
    };

    Ok(Some(command))
}

/// Outcome of a command: JSON for stdout and the process exit status
struct Outcome {
    output: Value,
    status: i32,
}

impl Outcome {
    fn ok(output: Value) -> Self {
        Self { output, status: 0 }
    }
}

async fn execute<S: LedgerStore>(
    service: &LedgerService<S, FsBlobStore>,
    command: Command,
) -> Result<Outcome, LedgerError> {
    let outcome = match command {
        // Migrations already ran when the store was opened
        Command::Migrate => Outcome::ok(json!({ "ok": true, "migrated": true })),
        Command::CreateProcess {
            process_type,
            actor,
        } => {
            let created = service.create_process(&process_type, &actor).await?;
            Outcome::ok(serde_json::to_value(created)?)
        }
        Command::AppendEvent {
            process_id,
            event_type,
            actor,
            payload,
        } => {
            let event = service
                .append_event(&process_id, &event_type, &actor, payload)
                .await?;
            Outcome::ok(serde_json::to_value(event)?)
        }
        Command::ListEvents { process_id } => {
            let events = service.list_events(&process_id).await?;
            Outcome::ok(serde_json::to_value(events)?)
        }
        Command::Verify { process_id } => {
            let verification = service.verify_integrity(&process_id).await?;
            match ErrorResponse::from_verification(&verification) {
                None => Outcome::ok(serde_json::to_value(verification)?),
                Some(body) => Outcome {
                    output: serde_json::to_value(body)?,
                    status: 2,
                },
            }
        }
        Command::SubmitEvidence {
            process_id,
            actor,
            file,
            mime,
            name,
        } => {
            let bytes = tokio::fs::read(&file).await?;
            let name = name.unwrap_or_else(|| {
                file.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            });
            let upload = EvidenceUpload::new(bytes, mime.unwrap_or_default(), name);
            let receipt = service.submit_evidence(&process_id, &actor, upload).await?;
            Outcome::ok(serde_json::to_value(receipt)?)
        }
        Command::GetEvidence { evidence_id } => {
            let pointer = service.get_evidence(&evidence_id).await?;
            Outcome::ok(serde_json::to_value(pointer)?)
        }
    };
    Ok(outcome)
}

async fn run(config: &Config, command: Command) -> anyhow::Result<Outcome> {
    let blobs = FsBlobStore::new(&config.evidence_root);

    let result = match config.backend()? {
        Backend::Sqlite => {
            let pool = SqlitePoolOptions::new()
                .max_connections(config.max_connections)
                .connect(&config.database_url)
                .await?;
            civic_ledger::migrations::run_sqlite(&pool).await?;
            let service = LedgerService::new(
                SqliteLedgerStore::new(pool),
                blobs,
                config.evidence_bucket.clone(),
            )
            .with_retry_config(config.retry_config());
            execute(&service, command).await
        }
        Backend::Postgres => {
            let pool = PgPoolOptions::new()
                .max_connections(config.max_connections)
                .connect(&config.database_url)
                .await?;
            civic_ledger::migrations::run_postgres(&pool).await?;
            let service = LedgerService::new(
                PgLedgerStore::new(pool),
                blobs,
                config.evidence_bucket.clone(),
            )
            .with_retry_config(config.retry_config());
            execute(&service, command).await
        }
    };

    match result {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            tracing::warn!(error = %err, "Command failed");
            Ok(Outcome {
                output: serde_json::to_value(ErrorResponse::from(&err))?,
                status: 1,
            })
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args: VecDeque<String> = std::env::args().skip(1).collect();
    let Some(command) = args.pop_front() else {
        print_help();
        return Ok(());
    };

    if matches!(command.as_str(), "-h" | "--help" | "help") {
        print_help();
        return Ok(());
    }

    init_telemetry(&TelemetryConfig::from_env()).map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let mut config = Config::from_env();
    let Some(command) = parse(&command, args, &mut config)? else {
        print_help();
        return Ok(());
    };

    let outcome = run(&config, command).await?;
    println!("{}", serde_json::to_string_pretty(&outcome.output)?);

    if outcome.status != 0 {
        std::process::exit(outcome.status);
    }
    Ok(())
}
