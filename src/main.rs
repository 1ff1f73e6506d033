use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use eyedentify::{config, enroll, matcher, IdentityAttributes, IdentityStore, Pipeline};
use log::{info, warn};

#[derive(Parser)]
#[command(name = "eyedentify")]
#[command(version, about = "face enrollment and recognition engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a face photo under an identity name
    Enroll {
        /// Identity name (repeat enrollments append samples)
        name: String,
        /// Path to the photo
        image: PathBuf,
        #[arg(long)]
        age: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Match a face photo against the enrolled gallery
    Recognize {
        /// Path to the photo
        image: PathBuf,
    },
    /// List enrolled identities
    List,
    /// Remove one identity and its stored images
    Remove { name: String },
    /// Remove every enrolled identity and stored image
    Clear,
    /// Open config file in editor
    Config,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(None)?;

    match cli.command {
        Commands::Enroll {
            name,
            image,
            age,
            description,
        } => enroll_cmd(&cfg, &name, &image, IdentityAttributes { age, description }),
        Commands::Recognize { image } => recognize_cmd(&cfg, &image),
        Commands::List => list_cmd(),
        Commands::Remove { name } => remove_cmd(&name),
        Commands::Clear => clear_cmd(),
        Commands::Config => open_config(),
    }
}

fn identity_store() -> Result<IdentityStore> {
    let dir = config::STORE_PREFIX.join("identities");
    IdentityStore::open(&dir).with_context(|| format!("opening identity store at {}", dir.display()))
}

fn image_dir() -> PathBuf {
    config::STORE_PREFIX.join("images")
}

/// Copy the source photo into the image directory under a fresh id and hand
/// back the reference recorded alongside the embedding.
fn stash_image(bytes: &[u8], src: &Path) -> Result<String> {
    let dir = image_dir();
    std::fs::create_dir_all(&dir)?;

    let ext = src
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("jpg")
        .to_ascii_lowercase();
    let file_name = format!("{}.{}", uuid::Uuid::new_v4(), ext);
    std::fs::write(dir.join(&file_name), bytes)
        .with_context(|| format!("storing image copy {}", file_name))?;
    Ok(file_name)
}

fn enroll_cmd(
    cfg: &config::Config,
    name: &str,
    image: &Path,
    attributes: IdentityAttributes,
) -> Result<()> {
    let bytes =
        std::fs::read(image).with_context(|| format!("reading image {}", image.display()))?;

    let pipeline =
        Pipeline::shared(&cfg.model_paths()).context("initializing face recognition models")?;
    let embedding = pipeline
        .embed_bytes(&bytes, &cfg.embed_options())
        .with_context(|| format!("embedding face from {}", image.display()))?;

    let store = identity_store()?;
    let image_ref = stash_image(&bytes, image)?;
    let record = enroll::enroll(&store, name, &embedding, image_ref, attributes)
        .context("saving identity record")?;

    info!(
        "Enrolled '{}' ({} sample{})",
        record.name,
        record.embeddings.len(),
        if record.embeddings.len() == 1 { "" } else { "s" }
    );
    Ok(())
}

fn recognize_cmd(cfg: &config::Config, image: &Path) -> Result<()> {
    let bytes =
        std::fs::read(image).with_context(|| format!("reading image {}", image.display()))?;

    let pipeline =
        Pipeline::shared(&cfg.model_paths()).context("initializing face recognition models")?;
    let embedding = pipeline
        .embed_bytes(&bytes, &cfg.embed_options())
        .with_context(|| format!("embedding face from {}", image.display()))?;

    let store = identity_store()?;
    let report = matcher::find_best_match(&embedding, store.iter()?, &cfg.match_policy())
        .context("scanning gallery")?;

    match report.status {
        matcher::MatchStatus::Recognized => {
            if let Some(identity) = &report.identity {
                info!(
                    "Recognized '{}' with score {:.3}",
                    identity.name, report.best_score
                );
            }
        }
        matcher::MatchStatus::NotRecognized => {
            info!(
                "No match above threshold {:.2} (best score {:.3})",
                cfg.recognition_threshold, report.best_score
            );
        }
        matcher::MatchStatus::EmptyGallery => {
            info!("No identities enrolled yet");
        }
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn list_cmd() -> Result<()> {
    let store = identity_store()?;
    let mut count = 0usize;
    for record in store.iter()? {
        match record {
            Ok(record) => {
                count += 1;
                println!("{}\t{} sample(s)", record.name, record.embeddings.len());
            }
            Err(e) => warn!("skipping unreadable record: {}", e),
        }
    }
    if count == 0 {
        info!("No identities enrolled");
    }
    Ok(())
}

fn remove_cmd(name: &str) -> Result<()> {
    let store = identity_store()?;
    match store.remove(name).context("removing identity record")? {
        Some(record) => {
            remove_images(&record.image_refs);
            info!(
                "Removed '{}' and {} stored image(s)",
                record.name,
                record.image_refs.len()
            );
        }
        None => warn!("No identity named '{}'", name),
    }
    Ok(())
}

fn clear_cmd() -> Result<()> {
    let store = identity_store()?;
    let mut refs = Vec::new();
    for record in store.iter()? {
        match record {
            Ok(record) => refs.extend(record.image_refs),
            Err(e) => warn!("clearing unreadable record too: {}", e),
        }
    }
    let removed = store.clear().context("clearing identity store")?;
    remove_images(&refs);
    info!("Cleared {} identity record(s)", removed);
    Ok(())
}

/// Best-effort blob cleanup: a missing file only warns, the record removal
/// has already happened.
fn remove_images(image_refs: &[String]) {
    let dir = image_dir();
    for image_ref in image_refs {
        // References are bare file names; anything else stays untouched.
        if Path::new(image_ref).components().count() != 1 {
            warn!("ignoring suspicious image reference {:?}", image_ref);
            continue;
        }
        let path = dir.join(image_ref);
        if let Err(e) = std::fs::remove_file(&path) {
            warn!("could not remove image {}: {}", path.display(), e);
        }
    }
}

fn open_config() -> Result<()> {
    let config_path = config::CONFIG_PATH.as_os_str();
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {:?}", config_path);

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
