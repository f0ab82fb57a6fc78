use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use image::DynamicImage;
use rollcall_core::{
    quality, Approver, ApproverScope, AttendanceInput, DecisionContext, ExcuseSubmission,
    PersonId, RecognitionEngine, SelectionMode,
};
use rollcall_store::Store;
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face recognition attendance")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a face photo for a person
    Enroll {
        /// Person to enroll
        #[arg(short, long)]
        person: PersonId,
        /// Class/group the person belongs to
        #[arg(short, long)]
        group: Option<String>,
        /// Photo containing exactly one face
        image: PathBuf,
    },
    /// Identify the face in a photo without recording attendance
    Identify {
        image: PathBuf,
        /// Base acceptance threshold (default: ROLLCALL_MATCH_THRESHOLD)
        #[arg(short, long)]
        threshold: Option<f32>,
    },
    /// Identify the face in a photo and mark that person present today
    CheckIn {
        image: PathBuf,
        /// Base acceptance threshold (default: ROLLCALL_MATCH_THRESHOLD)
        #[arg(short, long)]
        threshold: Option<f32>,
    },
    /// Submit an excuse for a missed day
    Excuse {
        #[arg(short, long)]
        person: PersonId,
        /// Day being excused (default: today)
        #[arg(short, long)]
        day: Option<NaiveDate>,
        /// Why the person was absent
        #[arg(short, long)]
        reason: String,
        /// Extra information for the teacher
        #[arg(short, long)]
        note: Option<String>,
    },
    /// Approve or reject a pending excuse
    Approve {
        /// Attendance record ID
        record: i64,
        /// "approved" or "rejected"
        #[arg(short, long)]
        status: String,
        #[command(flatten)]
        approver: ApproverArgs,
        /// Comment shown to the person
        #[arg(short, long)]
        comment: Option<String>,
    },
    /// Run the image quality checks on a photo
    Quality { image: PathBuf },
    /// Inspect or edit the enrolled gallery
    Gallery {
        #[command(subcommand)]
        command: GalleryCommands,
    },
    /// Attendance reports
    Report {
        #[command(subcommand)]
        command: ReportCommands,
    },
}

#[derive(Args)]
struct ApproverArgs {
    /// Person ID of the approving teacher or administrator
    #[arg(long = "approver")]
    id: PersonId,
    /// Class the approver is responsible for
    #[arg(long, required_unless_present = "admin", conflicts_with = "admin")]
    group: Option<String>,
    /// Approve for any class
    #[arg(long)]
    admin: bool,
}

impl ApproverArgs {
    fn approver(&self) -> Approver {
        let scope = match &self.group {
            Some(group) if !self.admin => ApproverScope::Group(group.clone()),
            _ => ApproverScope::AnyGroup,
        };
        Approver { id: self.id, scope }
    }
}

#[derive(Subcommand)]
enum GalleryCommands {
    /// List enrolled embeddings
    List {
        /// Only this person's embeddings
        #[arg(short, long)]
        person: Option<PersonId>,
    },
    /// Remove an enrolled embedding
    Remove {
        /// Embedding ID to remove
        id: i64,
    },
}

#[derive(Subcommand)]
enum ReportCommands {
    /// Present/pending/absent counts for one day
    Day {
        /// Default: today
        day: Option<NaiveDate>,
    },
    /// One person's records over a date range
    Person {
        person: PersonId,
        #[command(flatten)]
        range: RangeArgs,
    },
    /// A class's records over a date range
    Group {
        group: String,
        #[command(flatten)]
        range: RangeArgs,
    },
}

#[derive(Args)]
struct RangeArgs {
    /// First day (default: start of the current month)
    #[arg(long)]
    from: Option<NaiveDate>,
    /// Last day (default: today)
    #[arg(long)]
    to: Option<NaiveDate>,
}

impl RangeArgs {
    fn resolve(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        let from = self
            .from
            .or_else(|| today.with_day(1))
            .unwrap_or(today);
        (from, self.to.unwrap_or(today))
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    tracing::debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Enroll {
            person,
            group,
            image,
        } => {
            let photo = load_image(&image)?;
            let mut engine = build_engine(&config)?;
            let face = engine.enroll(&photo).context("enrollment failed")?;

            let store = open_store(&config)?;
            if let Some(group) = group.as_deref() {
                store.set_group(person, Some(group))?;
            }
            let id = store.add_embedding(person, &face.embedding, Utc::now())?;
            print_json(&json!({
                "id": id,
                "person_id": person,
                "model_version": face.embedding.model_version,
                "bbox": face.bbox,
            }))?;
        }
        Commands::Identify { image, threshold } => {
            let photo = load_image(&image)?;
            let store = open_store(&config)?;
            let gallery = store.gallery()?;
            let mut engine = build_engine(&config)?;
            let identification = engine
                .identify(
                    &photo,
                    &gallery,
                    SelectionMode::Attendance,
                    threshold.unwrap_or(config.match_threshold),
                )
                .context("identification failed")?;
            print_json(&identification)?;
        }
        Commands::CheckIn { image, threshold } => {
            let photo = load_image(&image)?;
            let mut store = open_store(&config)?;
            let gallery = store.gallery()?;
            let mut engine = build_engine(&config)?;
            let identification = engine
                .identify(
                    &photo,
                    &gallery,
                    SelectionMode::Attendance,
                    threshold.unwrap_or(config.match_threshold),
                )
                .context("identification failed")?;

            if let Some(issue) = identification.quality.issue() {
                eprintln!("warning: image quality check failed ({issue}); result may be unreliable");
            }

            let input = AttendanceInput::Recognition(identification.result.clone());
            let record = store
                .record_attendance(&input, &DecisionContext::current())
                .context("check-in rejected")?;
            print_json(&json!({
                "identification": identification,
                "record": record,
            }))?;
        }
        Commands::Excuse {
            person,
            day,
            reason,
            note,
        } => {
            let ctx = DecisionContext::current();
            let input = AttendanceInput::Excuse(ExcuseSubmission {
                person_id: person,
                day: day.unwrap_or(ctx.today),
                reason,
                note,
            });
            let mut store = open_store(&config)?;
            let record = store
                .record_attendance(&input, &ctx)
                .context("excuse rejected")?;
            print_json(&record)?;
        }
        Commands::Approve {
            record,
            status,
            approver,
            comment,
        } => {
            let mut store = open_store(&config)?;
            let updated = store
                .approve_record(record, &status, &approver.approver(), comment, Utc::now())
                .context("approval rejected")?;
            print_json(&updated)?;
        }
        Commands::Quality { image } => {
            let photo = load_image(&image)?;
            let assessment = quality::assess_quality(&photo.to_luma8());
            print_json(&assessment)?;
            if let Some(issue) = assessment.issue() {
                anyhow::bail!("image quality check failed: {issue}");
            }
        }
        Commands::Gallery { command } => {
            let store = open_store(&config)?;
            match command {
                GalleryCommands::List { person } => {
                    let stored = match person {
                        Some(person) => store.embeddings_for(person)?,
                        None => store.list_embeddings()?,
                    };
                    let rows: Vec<_> = stored
                        .iter()
                        .map(|s| {
                            json!({
                                "id": s.id,
                                "person_id": s.person_id,
                                "model_version": s.embedding.model_version,
                                "dim": s.embedding.len(),
                                "created_at": s.created_at,
                            })
                        })
                        .collect();
                    print_json(&rows)?;
                }
                GalleryCommands::Remove { id } => {
                    store.remove_embedding(id)?;
                    print_json(&json!({ "removed": id }))?;
                }
            }
        }
        Commands::Report { command } => {
            let store = open_store(&config)?;
            let today = DecisionContext::current().today;
            match command {
                ReportCommands::Day { day } => {
                    print_json(&store.day_summary(day.unwrap_or(today))?)?;
                }
                ReportCommands::Person { person, range } => {
                    let (from, to) = range.resolve(today);
                    print_json(&store.records_for_person(person, from, to)?)?;
                }
                ReportCommands::Group { group, range } => {
                    let (from, to) = range.resolve(today);
                    print_json(&store.records_for_group(&group, from, to)?)?;
                }
            }
        }
    }

    Ok(())
}

fn build_engine(config: &Config) -> Result<RecognitionEngine> {
    let extractor = rollcall_core::load_extractor(config.extractor, &config.model_dir)
        .context("failed to load face models")?;
    let engine = RecognitionEngine::new(
        extractor,
        config.matcher(),
        config.threshold_policy(),
        config.quality_gate,
    );
    tracing::debug!(extractor = engine.extractor_name(), "recognition engine ready");
    Ok(engine)
}

fn open_store(config: &Config) -> Result<Store> {
    Store::open(&config.db_path)
        .with_context(|| format!("failed to open database {}", config.db_path.display()))
}

fn load_image(path: &Path) -> Result<DynamicImage> {
    image::open(path).with_context(|| format!("failed to read image {}", path.display()))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_approver_scope_from_args() {
        let cli = Cli::parse_from(["rollcall", "approve", "12", "-s", "approved", "--approver", "5", "--group", "7B"]);
        let Commands::Approve { record, approver, .. } = cli.command else {
            panic!("expected approve");
        };
        assert_eq!(record, 12);
        assert_eq!(approver.approver().scope, ApproverScope::Group("7B".into()));

        let cli = Cli::parse_from(["rollcall", "approve", "12", "-s", "rejected", "--approver", "1", "--admin"]);
        let Commands::Approve { approver, .. } = cli.command else {
            panic!("expected approve");
        };
        assert_eq!(approver.approver().scope, ApproverScope::AnyGroup);

        assert!(Cli::try_parse_from(["rollcall", "approve", "12", "-s", "approved", "--approver", "5"]).is_err());
    }

    #[test]
    fn test_range_defaults_to_current_month() {
        let today = NaiveDate::from_ymd_opt(2024, 5, 17).unwrap();
        let range = RangeArgs { from: None, to: None };
        assert_eq!(
            range.resolve(today),
            (NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(), today)
        );
    }
}
