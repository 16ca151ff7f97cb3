use anyhow::{anyhow, bail, Context, Result};
use blinder_core::{Config, FaceBlinder, FaceRecord, ThumbnailEmbedder, WholeImageDetector};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "blinder", version = blinder_core::VERSION, about = "Face Blinder: remember and recognize faces")]
struct Cli {
    /// TOML config file (otherwise BLINDER_* environment variables)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Work directory holding faces and stores
    #[arg(long, global = true)]
    workdir: Option<PathBuf>,

    /// Maximum embedding distance for two faces to match
    #[arg(long, global = true)]
    threshold: Option<f32>,

    /// Ignore faces narrower than this many pixels
    #[arg(long, global = true)]
    min_size: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect, embed and store the faces in a photo
    See {
        photo: PathBuf,
    },
    /// List stored faces similar to a face
    Similar {
        /// Face id or unique prefix
        id: String,
        /// Search distance for this query only
        #[arg(long)]
        within: Option<f32>,
    },
    /// Guess who a face is
    Recognize {
        id: String,
    },
    /// Name a face
    Remember {
        id: String,
        label: String,
    },
    /// Show the name of a face
    Name {
        id: String,
    },
    /// Remove the name of a face
    Forget {
        id: String,
    },
    /// Give a named face's name to its unnamed neighbors
    Propagate {
        id: String,
    },
    /// List stored face ids
    List {
        #[arg(default_value = "")]
        prefix: String,
    },
    /// Print the image path of a face
    File {
        id: String,
    },
    /// Rebuild the embedding store from face metadata
    Reindex,
    /// Delete the work directory and everything in it
    Destroy,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let blinder = FaceBlinder::open(
        config,
        Arc::new(WholeImageDetector::square()),
        Arc::new(ThumbnailEmbedder),
    )
    .await
    .context("failed to open face store")?;

    if let Commands::Destroy = cli.command {
        let workdir = blinder.config().workdir.clone();
        blinder.destroy().await?;
        print(&json!({ "destroyed": workdir }))?;
        return Ok(());
    }

    let result = run(&blinder, cli.command).await;
    // Close even when the command failed; its error takes precedence.
    let closed = blinder.close().await;
    let output = result?;
    closed?;

    print(&output)
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env(),
    };
    if let Some(workdir) = &cli.workdir {
        config.workdir = workdir.clone();
    }
    if let Some(threshold) = cli.threshold {
        config.threshold = threshold;
    }
    if let Some(min_size) = cli.min_size {
        config.min_size = min_size;
    }
    Ok(config)
}

async fn run(blinder: &FaceBlinder, command: Commands) -> Result<Value> {
    let out = match command {
        Commands::See { photo } => {
            let faces = blinder
                .see(&photo)
                .await
                .with_context(|| format!("cannot see {}", photo.display()))?;
            let mut described = Vec::with_capacity(faces.len());
            for face in &faces {
                described.push(describe(blinder, face).await?);
            }
            json!({ "photo": photo, "faces": described })
        }
        Commands::Similar { id, within } => {
            let face = resolve(blinder, &id).await?;
            let threshold = within.unwrap_or(blinder.config().threshold);
            let similar = blinder.similar_within(&face, threshold).await?;
            let mut described = Vec::with_capacity(similar.len());
            for other in &similar {
                let mut entry = describe(blinder, other).await?;
                if let Some(distance) = face.distance(other) {
                    entry["distance"] = json!(distance);
                }
                described.push(entry);
            }
            json!({ "id": face.id, "threshold": threshold, "similar": described })
        }
        Commands::Recognize { id } => {
            let face = resolve(blinder, &id).await?;
            let label = blinder.recognize(&face).await?;
            json!({ "id": face.id, "recognized": label })
        }
        Commands::Remember { id, label } => {
            let face = resolve(blinder, &id).await?;
            blinder.set_name(&face, &label).await?;
            json!({ "id": face.id, "name": label })
        }
        Commands::Name { id } => {
            let face = resolve(blinder, &id).await?;
            let name = blinder.get_name(&face).await?;
            json!({ "id": face.id, "name": name })
        }
        Commands::Forget { id } => {
            let face = resolve(blinder, &id).await?;
            let forgotten = blinder.forget(&face).await?;
            json!({ "id": face.id, "forgotten": forgotten })
        }
        Commands::Propagate { id } => {
            let face = resolve(blinder, &id).await?;
            let labeled = blinder.remember_similar(&face).await?;
            json!({ "id": face.id, "labeled": labeled })
        }
        Commands::List { prefix } => json!(blinder.list(&prefix).await?),
        Commands::File { id } => {
            let face = resolve(blinder, &id).await?;
            json!({ "id": face.id, "file": blinder.file(&face) })
        }
        Commands::Reindex => json!({ "reindexed": blinder.reindex_embeddings().await? }),
        Commands::Destroy => bail!("destroy is handled before opening commands"),
    };
    Ok(out)
}

/// Look a face up by id or unique id prefix.
async fn resolve(blinder: &FaceBlinder, prefix: &str) -> Result<FaceRecord> {
    if prefix.is_empty() {
        bail!("face id must not be empty");
    }
    let ids = blinder.list(prefix).await?;
    match ids.as_slice() {
        [] => bail!("no face matches {prefix}"),
        [id] => blinder
            .face(id)
            .await?
            .ok_or_else(|| anyhow!("face {id} is listed but its image is missing")),
        many => {
            for id in many {
                eprintln!("{id}");
            }
            bail!("{} faces match {prefix}; use a longer prefix", many.len())
        }
    }
}

async fn describe(blinder: &FaceBlinder, face: &FaceRecord) -> Result<Value> {
    Ok(json!({
        "id": face.id,
        "location": face.location,
        "file": blinder.file(face),
        "name": blinder.get_name(face).await?,
    }))
}

fn print(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_flags_override_env_config() {
        let cli = Cli::parse_from([
            "blinder",
            "--workdir",
            "/tmp/faces",
            "--threshold",
            "0.5",
            "list",
            "ab",
        ]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.workdir, PathBuf::from("/tmp/faces"));
        assert_eq!(config.threshold, 0.5);
        assert!(matches!(cli.command, Commands::List { ref prefix } if prefix == "ab"));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["blinder", "similar", "abc", "--within", "0.9", "--min-size", "40"]);
        assert_eq!(cli.min_size, Some(40));
        assert!(matches!(cli.command, Commands::Similar { within: Some(w), .. } if w == 0.9));
    }
}
