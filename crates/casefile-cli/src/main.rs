use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

// D-Bus proxy: `#[zbus::proxy]` generates `CasefileProxy` (async).
#[zbus::proxy(
    interface = "org.casefile.Casefile1",
    default_service = "org.casefile.Casefile1",
    default_path = "/org/casefile/Casefile1"
)]
trait Casefile {
    async fn create_record(&self, title: &str) -> zbus::Result<String>;
    async fn list_records(&self) -> zbus::Result<String>;
    async fn get_record(&self, id: &str) -> zbus::Result<String>;
    async fn set_title(&self, id: &str, title: &str) -> zbus::Result<String>;
    async fn set_date(&self, id: &str, date: &str) -> zbus::Result<String>;
    async fn set_solved(&self, id: &str, solved: bool) -> zbus::Result<String>;
    async fn set_suspect(&self, id: &str, suspect: &str) -> zbus::Result<String>;
    async fn set_mode(&self, id: &str, mode: &str, checked: bool) -> zbus::Result<String>;
    async fn report(&self, id: &str) -> zbus::Result<String>;
    async fn delete_record(&self, id: &str) -> zbus::Result<bool>;
    async fn open_session(&self, id: &str) -> zbus::Result<u32>;
    async fn close_session(&self, id: &str) -> zbus::Result<bool>;
    async fn session_slot(&self, id: &str) -> zbus::Result<u32>;
    async fn capture(&self, id: &str, photo_path: &str) -> zbus::Result<String>;
    async fn preview(
        &self,
        id: &str,
        slot: u32,
        max_width: u32,
        max_height: u32,
    ) -> zbus::Result<Vec<u8>>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "casefile", about = "Casefile crime record CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new record
    New {
        /// Record title
        title: String,
    },
    /// List all records, newest first
    List,
    /// Show one record as JSON
    Show { id: String },
    /// Rename a record
    Title { id: String, title: String },
    /// Set the discovery date (YYYY-MM-DD or RFC 3339)
    Date { id: String, date: String },
    /// Mark a record solved or unsolved
    Solved {
        id: String,
        #[arg(action = clap::ArgAction::Set)]
        solved: bool,
    },
    /// Set the suspect's name (empty for none)
    Suspect { id: String, name: String },
    /// Check or uncheck an analysis mode (none, face, mesh, contour, selfie)
    Mode {
        id: String,
        mode: String,
        /// Uncheck the mode instead of checking it
        #[arg(long)]
        off: bool,
    },
    /// Process photos into the record's slots, in order
    Capture {
        id: String,
        /// Photo files, one per capture
        #[arg(required = true)]
        photos: Vec<PathBuf>,
    },
    /// Write a PNG preview of one photo slot
    Preview {
        id: String,
        /// Slot 0-3
        slot: u32,
        /// Output file
        #[arg(short, long, default_value = "preview.png")]
        output: PathBuf,
        #[arg(long, default_value_t = 640)]
        max_width: u32,
        #[arg(long, default_value_t = 480)]
        max_height: u32,
    },
    /// Print the shareable crime report
    Report { id: String },
    /// Delete a record and its photos
    Delete { id: String },
    /// Show daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let connection = zbus::Connection::session()
        .await
        .context("connecting to the session bus")?;
    let proxy = CasefileProxy::new(&connection)
        .await
        .context("casefiled not reachable")?;

    match cli.command {
        Commands::New { title } => {
            let id = proxy.create_record(&title).await?;
            println!("{id}");
        }
        Commands::List => {
            let records: Vec<serde_json::Value> = serde_json::from_str(&proxy.list_records().await?)?;
            if records.is_empty() {
                println!("No records");
            }
            for record in records {
                let solved = if record["solved"].as_bool().unwrap_or(false) {
                    "solved"
                } else {
                    "open"
                };
                println!(
                    "{}  {:<6}  {}",
                    record["id"].as_str().unwrap_or("?"),
                    solved,
                    record["title"].as_str().unwrap_or("")
                );
            }
        }
        Commands::Show { id } => print_json(&proxy.get_record(&id).await?)?,
        Commands::Title { id, title } => print_json(&proxy.set_title(&id, &title).await?)?,
        Commands::Date { id, date } => print_json(&proxy.set_date(&id, &date).await?)?,
        Commands::Solved { id, solved } => print_json(&proxy.set_solved(&id, solved).await?)?,
        Commands::Suspect { id, name } => print_json(&proxy.set_suspect(&id, &name).await?)?,
        Commands::Mode { id, mode, off } => print_json(&proxy.set_mode(&id, &mode, !off).await?)?,
        Commands::Capture { id, photos } => {
            proxy.open_session(&id).await?;
            let result = capture_all(&proxy, &id, &photos).await;
            proxy.close_session(&id).await?;
            result?;
        }
        Commands::Preview {
            id,
            slot,
            output,
            max_width,
            max_height,
        } => {
            let png = proxy.preview(&id, slot, max_width, max_height).await?;
            std::fs::write(&output, png)
                .with_context(|| format!("writing {}", output.display()))?;
            println!("Preview written to {}", output.display());
        }
        Commands::Report { id } => println!("{}", proxy.report(&id).await?),
        Commands::Delete { id } => {
            proxy.delete_record(&id).await?;
            println!("Deleted {id}");
        }
        Commands::Status => print_json(&proxy.status().await?)?,
    }

    Ok(())
}

async fn capture_all(proxy: &CasefileProxy<'_>, id: &str, photos: &[PathBuf]) -> Result<()> {
    for photo in photos {
        let path = std::fs::canonicalize(photo)
            .with_context(|| format!("resolving {}", photo.display()))?;
        tracing::debug!(photo = %path.display(), "sending capture");
        let outcome: serde_json::Value =
            serde_json::from_str(&proxy.capture(id, &path.to_string_lossy()).await?)?;
        let slot = &outcome["slot"];
        match outcome["outcome"].as_str().unwrap_or("") {
            "stored" => {
                print!("slot {slot}: stored {}", outcome["file_name"].as_str().unwrap_or("?"));
                match outcome["summary"].as_str() {
                    Some(summary) => println!(" ({summary})"),
                    None => println!(),
                }
            }
            "non_match" => println!("slot {slot}: no foreground found, photo discarded"),
            "skipped" => println!(
                "slot {slot}: analysis skipped: {}",
                outcome["reason"].as_str().unwrap_or("unknown")
            ),
            _ => println!("capture cancelled"),
        }
    }
    Ok(())
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
