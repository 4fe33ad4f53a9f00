use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use encounter_submit_core::config::{form_namespace_from_env_value, utc_offset_from_env_value};
use encounter_submit_core::{
    Clock, CoreConfig, EncounterContext, EncounterSettings, FixedClock, FormField, FormFields,
    RecordingStore, SubmissionService, SystemClock,
};
use openmrs::PatientProgram;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

type CliResult<T> = Result<T, Box<dyn Error>>;

#[derive(Parser)]
#[command(name = "esub")]
#[command(about = "Assemble and dry-run OpenMRS encounter submissions from form state")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the encounter payload for a form
    PrepareEncounter {
        /// JSON file holding the field tree
        #[arg(long)]
        fields: PathBuf,
        /// JSON file holding the encounter context
        #[arg(long)]
        context: PathBuf,
        /// JSON file holding the encounter settings
        #[arg(long)]
        settings: PathBuf,
    },
    /// Print the patient identifiers submitted by a form
    PrepareIdentifiers {
        #[arg(long)]
        fields: PathBuf,
    },
    /// Print the program enrollment payload for a form
    PrepareEnrollment {
        #[arg(long)]
        fields: PathBuf,
        /// Patient uuid
        #[arg(long)]
        patient: String,
        /// Program uuid
        #[arg(long)]
        program: Option<String>,
        /// Location uuid
        #[arg(long)]
        location: Option<String>,
    },
    /// Dry-run committing the enrollment and print the calls it would make
    CommitEnrollment {
        #[arg(long)]
        fields: PathBuf,
        /// JSON file holding the encounter context (session mode, patient, program)
        #[arg(long)]
        context: PathBuf,
        /// JSON file holding the patient's enrollments on record
        #[arg(long)]
        enrollments: Option<PathBuf>,
        /// Stop the clock at this RFC 3339 instant
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },
    /// Dry-run a whole submission: encounter, attachments, identifiers and enrollment
    Submit {
        #[arg(long)]
        fields: PathBuf,
        #[arg(long)]
        context: PathBuf,
        #[arg(long)]
        settings: PathBuf,
        #[arg(long)]
        enrollments: Option<PathBuf>,
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },
}

#[tokio::main]
async fn main() -> CliResult<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("encounter_submit_core=warn".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = Arc::new(load_config()?);

    match cli.command {
        Some(Commands::PrepareEncounter {
            fields,
            context,
            settings,
        }) => {
            let service = SubmissionService::new(cfg, RecordingStore::new());
            let encounter = service.prepare_encounter(
                &read_fields(&fields)?,
                &read_json::<EncounterContext>(&context)?,
                &read_json::<EncounterSettings>(&settings)?,
            );
            println!("{}", encounter.render()?);
        }
        Some(Commands::PrepareIdentifiers { fields }) => {
            let service = SubmissionService::new(cfg, RecordingStore::new());
            print_json(&service.prepare_patient_identifiers(&read_fields(&fields)?))?;
        }
        Some(Commands::PrepareEnrollment {
            fields,
            patient,
            program,
            location,
        }) => {
            let payload = encounter_submit_core::assembly::prepare_program_enrollment(
                &read_fields(&fields)?,
                Some(patient.as_str()),
                program.as_deref(),
                location.as_deref(),
                SystemClock.now(),
                &cfg,
            );
            print_json(&payload)?;
        }
        Some(Commands::CommitEnrollment {
            fields,
            context,
            enrollments,
            now,
        }) => {
            let fields = read_fields(&fields)?;
            let context: EncounterContext = read_json(&context)?;
            let existing = read_enrollments(enrollments.as_deref())?;
            let service =
                SubmissionService::new(cfg, RecordingStore::new()).with_clock(clock(now));

            let payload = service.prepare_program_enrollment(&fields, &context);
            let outcome = service
                .commit_program_enrollment(
                    &payload,
                    context.session_mode,
                    &existing,
                    &CancellationToken::new(),
                )
                .await;

            let calls = service.into_store().into_calls();
            match outcome {
                Ok(outcome) => print_json(&json!({ "outcome": outcome, "calls": calls }))?,
                Err(e) => {
                    eprintln!("Error committing enrollment: {}", e);
                    print_json(&json!({ "calls": calls }))?;
                }
            }
        }
        Some(Commands::Submit {
            fields,
            context,
            settings,
            enrollments,
            now,
        }) => {
            let fields = read_fields(&fields)?;
            let context: EncounterContext = read_json(&context)?;
            let settings: EncounterSettings = read_json(&settings)?;
            let existing = read_enrollments(enrollments.as_deref())?;
            let service =
                SubmissionService::new(cfg, RecordingStore::new()).with_clock(clock(now));

            submit(&service, &fields, &context, &settings, &existing).await?;
            print_json(&json!({ "calls": service.into_store().into_calls() }))?;
        }
        None => {
            println!("Use 'esub --help' for commands");
        }
    }

    Ok(())
}

/// Run the submission sequence against `service`, stopping at the first failed step.
///
/// View modes submit nothing.
async fn submit(
    service: &SubmissionService<RecordingStore>,
    fields: &[FormField],
    context: &EncounterContext,
    settings: &EncounterSettings,
    existing: &[PatientProgram],
) -> CliResult<()> {
    if context.session_mode.is_read_only() {
        eprintln!("Session is read-only, nothing to submit");
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let encounter = service.prepare_encounter(fields, context, settings);
    let saved = service.save_encounter(&encounter, &cancel).await?;

    for upload in service.save_attachments(fields, &saved, &cancel).await? {
        if let Err(e) = upload.result {
            eprintln!("Error saving attachment {}: {}", upload.field_id, e);
        }
    }

    if let Some(patient_uuid) = saved.patient_uuid() {
        let identifiers = service.prepare_patient_identifiers(fields);
        for result in service
            .save_patient_identifiers(&identifiers, patient_uuid, &cancel)
            .await
        {
            if let Err(e) = result {
                eprintln!("Error saving identifier: {}", e);
            }
        }
    }

    let payload = service.prepare_program_enrollment(fields, context);
    service
        .commit_program_enrollment(&payload, context.session_mode, existing, &cancel)
        .await?;

    Ok(())
}

fn load_config() -> CliResult<CoreConfig> {
    Ok(CoreConfig::new(
        form_namespace_from_env_value(std::env::var("ESUB_FORM_NAMESPACE").ok())?,
        utc_offset_from_env_value(std::env::var("ESUB_UTC_OFFSET").ok())?,
        std::env::var("ESUB_ENCOUNTER_ROLE").ok(),
    )?)
}

fn clock(now: Option<DateTime<Utc>>) -> Arc<dyn Clock> {
    match now {
        Some(instant) => Arc::new(FixedClock(instant)),
        None => Arc::new(SystemClock),
    }
}

fn read_text(path: &Path) -> CliResult<String> {
    std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e).into())
}

fn read_fields(path: &Path) -> CliResult<Vec<FormField>> {
    Ok(FormFields::parse(&read_text(path)?)?)
}

fn read_enrollments(path: Option<&Path>) -> CliResult<Vec<PatientProgram>> {
    match path {
        Some(path) => Ok(PatientProgram::parse_list(&read_text(path)?)?),
        None => Ok(Vec::new()),
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> CliResult<T> {
    let text = read_text(path)?;
    serde_json::from_str(&text)
        .map_err(|e| format!("failed to parse {}: {}", path.display(), e).into())
}

fn print_json<T: Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
