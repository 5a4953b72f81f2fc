use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use vestibule_core::extractor::extract_for_enrollment;
use vestibule_core::{ExtractionFrame, RecordedExtractor};

#[zbus::proxy(
    interface = "org.freedesktop.Vestibule1",
    default_service = "org.freedesktop.Vestibule1",
    default_path = "/org/freedesktop/Vestibule1"
)]
trait Vestibule {
    async fn enroll(&self, identity: &str, extraction: &str) -> zbus::Result<String>;
    async fn enroll_embedding(&self, identity: &str, embedding: &[f64]) -> zbus::Result<String>;
    async fn remove(&self, identity: &str) -> zbus::Result<u32>;
    async fn list_members(&self) -> zbus::Result<String>;
    async fn reload(&self) -> zbus::Result<u32>;
    async fn start(&self) -> zbus::Result<()>;
    async fn stop(&self) -> zbus::Result<()>;
    async fn status(&self) -> zbus::Result<String>;
    async fn recent_events(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "vestibule", about = "Vestibule face-recognition access control CLI")]
struct Cli {
    /// Talk to the daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a member from a frame of extractor output
    Enroll {
        /// Member name
        name: String,
        /// JSON file: one face, a list of faces, or (with --raw) a bare embedding
        file: PathBuf,
        /// Treat the file as a bare embedding array
        #[arg(long)]
        raw: bool,
    },
    /// List enrolled members
    List,
    /// Remove every enrollment for a member
    Remove {
        /// Member name
        name: String,
    },
    /// Re-read the member database
    Reload,
    /// Start monitoring
    Start,
    /// Stop monitoring
    Stop,
    /// Show daemon status
    Status,
    /// Show recent access grants and diagnostics
    Events,
}

/// What the daemon is asked to enroll.
#[derive(Debug, PartialEq)]
enum Enrollment {
    /// Extractor output; the daemon picks the face.
    Frame(String),
    Embedding(Vec<f64>),
}

/// Validate enrollment input before it goes over the bus.
fn parse_enrollment(text: &str, raw: bool) -> Result<Enrollment> {
    if raw {
        let values: Vec<f64> = serde_json::from_str(text).context("expected a JSON array of numbers")?;
        if values.is_empty() {
            bail!("embedding is empty");
        }
        return Ok(Enrollment::Embedding(values));
    }
    let frame: ExtractionFrame = serde_json::from_str(text).context("malformed extraction")?;
    let face = extract_for_enrollment(&mut RecordedExtractor, &frame)
        .context("no face found in extraction")?;
    tracing::debug!(
        faces = frame.faces.len(),
        dim = face.embedding.dim(),
        confidence = face.confidence,
        "enrollment face selected"
    );
    Ok(Enrollment::Frame(text.to_string()))
}

fn pretty(json: &str) -> Result<String> {
    let value: Value = serde_json::from_str(json).context("daemon returned malformed JSON")?;
    Ok(serde_json::to_string_pretty(&value)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let connection = match cli.system {
        true => zbus::Connection::system().await,
        false => zbus::Connection::session().await,
    };
    let connection = connection.context("failed to connect to D-Bus")?;
    let proxy = VestibuleProxy::new(&connection)
        .await
        .context("vestibuled is not reachable")?;

    match cli.command {
        Commands::Enroll { name, file, raw } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let id = match parse_enrollment(&text, raw)? {
                Enrollment::Frame(json) => proxy.enroll(&name, &json).await?,
                Enrollment::Embedding(values) => proxy.enroll_embedding(&name, &values).await?,
            };
            println!("Enrolled {name} ({id})");
        }
        Commands::List => {
            let members: Vec<Value> = serde_json::from_str(&proxy.list_members().await?)?;
            if members.is_empty() {
                println!("No members enrolled");
            }
            for m in &members {
                println!(
                    "{}  {}  {}",
                    m["id"].as_str().unwrap_or("?"),
                    m["identity"].as_str().unwrap_or("?"),
                    m["enrolled_at"].as_str().unwrap_or("?"),
                );
            }
        }
        Commands::Remove { name } => {
            let removed = proxy.remove(&name).await?;
            if removed == 0 {
                println!("No enrollments for {name}");
            } else {
                println!("Removed {removed} enrollment(s) for {name}");
            }
        }
        Commands::Reload => {
            let count = proxy.reload().await?;
            println!("Loaded {count} members");
        }
        Commands::Start => {
            proxy.start().await?;
            println!("Monitoring started");
        }
        Commands::Stop => {
            proxy.stop().await?;
            println!("Monitoring stopped");
        }
        Commands::Status => println!("{}", pretty(&proxy.status().await?)?),
        Commands::Events => println!("{}", pretty(&proxy.recent_events().await?)?),
    }

    Ok(())
}
