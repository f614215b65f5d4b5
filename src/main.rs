use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use adt_core::admission::{InpatientAdmissionSearchCriteria, InpatientRequestSearchCriteria};
use adt_core::checkin::CheckInRequest;
use adt_core::constants::{
    ENV_CONFIG_PATH, ENV_INPATIENT_VISIT_EXPIRE_HOURS, ENV_VISIT_EXPIRE_HOURS,
};
use adt_core::model::DispositionType;
use adt_core::{AdtConfig, AdtService, AdtSettings, InMemoryStore};
use adt_types::{LocationId, PatientId, ProviderId, UserId, VisitId};

#[derive(Parser)]
#[command(name = "adt-run")]
#[command(about = "Visit lifecycle and inpatient movement over a YAML record snapshot")]
struct Cli {
    /// Record snapshot (YAML) to operate on
    #[arg(long)]
    store: PathBuf,
    /// Settings file; falls back to ADT_CONFIG, then built-in defaults
    #[arg(long)]
    config: Option<PathBuf>,
    /// Write changes back to the snapshot
    #[arg(long)]
    write: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Close visits that have been inactive past their threshold
    CloseInactive,
    /// Check a patient in at a location
    CheckIn {
        patient: PatientId,
        location: LocationId,
        /// Provider recorded as check-in clerk
        #[arg(long)]
        clerk: Option<ProviderId>,
        /// User whose single provider account is the clerk
        #[arg(long)]
        user: Option<UserId>,
        /// Close the current visit and start a new one
        #[arg(long)]
        new_visit: bool,
    },
    /// Record a visit that happened in the past
    RetrospectiveVisit {
        patient: PatientId,
        location: LocationId,
        /// RFC 3339 start time
        start: DateTime<Utc>,
        /// RFC 3339 stop time
        #[arg(long)]
        stop: Option<DateTime<Utc>>,
    },
    /// Merge the non-preferred patient into the preferred one
    MergePatients {
        preferred: PatientId,
        non_preferred: PatientId,
    },
    /// Merge the loser visit into the winner
    MergeVisits { winner: VisitId, loser: VisitId },
    /// Merge consecutive visits of one patient into the first
    MergeConsecutive {
        patient: PatientId,
        #[arg(required = true)]
        visits: Vec<VisitId>,
    },
    /// List open visits at a location and its children
    ActiveVisits { location: LocationId },
    /// List admitted visits, optionally on one ward
    InpatientVisits {
        location: LocationId,
        #[arg(long)]
        ward: Option<LocationId>,
    },
    /// List inpatient admissions
    Admissions {
        #[arg(long)]
        location: Option<LocationId>,
        /// Only admissions currently on these wards
        #[arg(long)]
        ward: Vec<LocationId>,
        #[arg(long)]
        include_discharged: bool,
    },
    /// List pending admit, transfer and discharge requests
    Requests {
        #[arg(long)]
        location: Option<LocationId>,
        #[arg(long = "type", value_enum)]
        types: Vec<RequestKind>,
    },
    /// List visits waiting on an admission
    AwaitingAdmission {
        #[arg(long)]
        location: Option<LocationId>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RequestKind {
    Admit,
    Transfer,
    Discharge,
}

impl From<RequestKind> for DispositionType {
    fn from(kind: RequestKind) -> Self {
        match kind {
            RequestKind::Admit => DispositionType::Admit,
            RequestKind::Transfer => DispositionType::Transfer,
            RequestKind::Discharge => DispositionType::Discharge,
        }
    }
}

/// Resolves settings from the file, then applies the expiry overrides from the environment.
fn load_config(path: Option<PathBuf>) -> anyhow::Result<AdtConfig> {
    let path = path.or_else(|| std::env::var(ENV_CONFIG_PATH).ok().map(PathBuf::from));
    let settings = AdtSettings::load(path.as_deref())?.with_env_overrides(
        std::env::var(ENV_VISIT_EXPIRE_HOURS).ok(),
        std::env::var(ENV_INPATIENT_VISIT_EXPIRE_HOURS).ok(),
    )?;
    Ok(AdtConfig::new(settings)?)
}

fn open_service(store_path: &Path, cfg: AdtConfig) -> anyhow::Result<(Arc<InMemoryStore>, AdtService)> {
    let store = InMemoryStore::load(store_path)
        .with_context(|| format!("failed to load snapshot {}", store_path.display()))?;
    let locations = Arc::new(store.location_tree().clone());
    let store = Arc::new(store);
    let service = AdtService::new(Arc::new(cfg), locations, store.clone());
    Ok((store, service))
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Runs one command. Returns true if it may have changed the snapshot.
fn run(service: &AdtService, command: Commands) -> anyhow::Result<bool> {
    match command {
        Commands::CloseInactive => {
            print_json(&service.close_inactive_visits()?)?;
            Ok(true)
        }
        Commands::CheckIn {
            patient,
            location,
            clerk,
            user,
            new_visit,
        } => {
            let mut request = CheckInRequest::new(patient, location);
            request.clerk = clerk;
            request.acting_user = user;
            request.force_new_visit = new_visit;
            print_json(&service.check_in(request)?)?;
            Ok(true)
        }
        Commands::RetrospectiveVisit {
            patient,
            location,
            start,
            stop,
        } => {
            print_json(&service.create_retrospective_visit(patient, location, start, stop)?)?;
            Ok(true)
        }
        Commands::MergePatients {
            preferred,
            non_preferred,
        } => {
            service.merge_patients(preferred, non_preferred)?;
            Ok(true)
        }
        Commands::MergeVisits { winner, loser } => {
            print_json(&service.merge_visits(winner, loser)?)?;
            Ok(true)
        }
        Commands::MergeConsecutive { patient, visits } => {
            let merged = service.merge_consecutive_visits(&visits, patient)?;
            if merged.is_none() {
                tracing::warn!(%patient, "visits are not consecutive; nothing merged");
            }
            print_json(&merged)?;
            Ok(merged.is_some())
        }
        Commands::ActiveVisits { location } => {
            print_json(&service.active_visits(location)?)?;
            Ok(false)
        }
        Commands::InpatientVisits { location, ward } => {
            print_json(&service.inpatient_visits(location, ward)?)?;
            Ok(false)
        }
        Commands::Admissions {
            location,
            ward,
            include_discharged,
        } => {
            let criteria = InpatientAdmissionSearchCriteria {
                visit_location: location,
                current_inpatient_locations: (!ward.is_empty()).then_some(ward),
                include_discharged,
                ..InpatientAdmissionSearchCriteria::default()
            };
            print_json(&service.inpatient_admissions(&criteria)?)?;
            Ok(false)
        }
        Commands::Requests { location, types } => {
            let criteria = InpatientRequestSearchCriteria {
                visit_location: location,
                disposition_types: (!types.is_empty())
                    .then(|| types.into_iter().map(DispositionType::from).collect()),
                ..InpatientRequestSearchCriteria::default()
            };
            print_json(&service.inpatient_requests(&criteria)?)?;
            Ok(false)
        }
        Commands::AwaitingAdmission { location } => {
            print_json(&service.visits_awaiting_admission(location, None, None)?)?;
            Ok(false)
        }
    }
}

/// Entry point for the ADT runner.
///
/// Loads the snapshot named by `--store`, runs one command, prints its result as JSON and, with
/// `--write`, saves the snapshot when the command changed it.
///
/// # Environment Variables
/// - `ADT_CONFIG`: settings YAML used when `--config` is not given
/// - `ADT_VISIT_EXPIRE_HOURS`: outpatient inactivity threshold override
/// - `ADT_INPATIENT_VISIT_EXPIRE_HOURS`: inpatient inactivity threshold override
/// - `RUST_LOG`: log filter, on top of the default `adt=info`
fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("adt=info".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = load_config(cli.config)?;
    let (store, service) = open_service(&cli.store, cfg)?;

    let changed = run(&service, cli.command)?;
    if changed && cli.write {
        store
            .save(&cli.store)
            .with_context(|| format!("failed to write snapshot {}", cli.store.display()))?;
        tracing::info!(path = %cli.store.display(), "saved snapshot");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use adt_core::location::Location;
    use adt_core::model::{Patient, Visit};
    use adt_core::store::StoreSnapshot;
    use adt_core::VisitType;
    use chrono::Duration;
    use tempfile::TempDir;

    const HOSPITAL: LocationId = LocationId::new(1);

    fn setup_test_snapshot(dir: &TempDir, visit_start: DateTime<Utc>) -> (PathBuf, Visit) {
        let patient = Patient::new(PatientId::new());
        let visit = Visit::new(
            patient.id,
            Some(HOSPITAL),
            VisitType::new("Facility Visit").unwrap(),
            visit_start,
        );
        let snapshot = StoreSnapshot {
            locations: vec![Location::new(HOSPITAL, "Hospital", None).with_tag("Visit Location")],
            patients: vec![patient],
            visits: vec![visit.clone()],
            ..StoreSnapshot::default()
        };
        let path = dir.path().join("records.yaml");
        std::fs::write(&path, snapshot.render().unwrap()).unwrap();
        (path, visit)
    }

    #[test]
    fn close_inactive_writes_snapshot_back() {
        let dir = TempDir::new().unwrap();
        let (path, visit) = setup_test_snapshot(&dir, Utc::now() - Duration::days(2));

        let cfg = AdtConfig::new(AdtSettings::default()).unwrap();
        let (store, service) = open_service(&path, cfg).unwrap();
        assert!(run(&service, Commands::CloseInactive).unwrap());
        store.save(&path).unwrap();

        let reloaded = InMemoryStore::load(&path).unwrap().snapshot().unwrap();
        let closed = reloaded.visits.iter().find(|v| v.id == visit.id).unwrap();
        assert_eq!(closed.stop, Some(visit.start));
    }

    #[test]
    fn listings_do_not_report_changes() {
        let dir = TempDir::new().unwrap();
        let (path, _) = setup_test_snapshot(&dir, Utc::now());

        let cfg = AdtConfig::new(AdtSettings::default()).unwrap();
        let (_store, service) = open_service(&path, cfg).unwrap();
        assert!(!run(&service, Commands::ActiveVisits { location: HOSPITAL }).unwrap());
    }

    #[test]
    fn missing_snapshot_is_an_error() {
        let dir = TempDir::new().unwrap();
        let cfg = AdtConfig::new(AdtSettings::default()).unwrap();
        assert!(open_service(&dir.path().join("absent.yaml"), cfg).is_err());
    }
}
