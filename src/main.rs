use std::collections::HashSet;
use std::path::Path;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::Parser;
use homedir::my_home;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use serde_json::json;

mod backup;
mod cli;
mod collections;
mod config;
mod eid;
mod favorites;
mod lock;
mod search;
mod storage;

use cli::{CollectionArgs, FavoriteArgs};
use collections::{Collection, CollectionStore};
use config::Config;
use favorites::FavoritesStore;
use inquire::error::InquireResult;
use lock::FileLock;
use search::{CorpusArtifact, EmbeddingCorpus, SearchEngine};

fn base_path() -> String {
    std::env::var("FOVEA_BASE_PATH").unwrap_or(format!(
        "{}/.local/share/fovea",
        my_home()
            .expect("couldnt find home dir")
            .expect("couldnt find home dir")
            .to_string_lossy()
    ))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();

    let base = base_path();
    std::fs::create_dir_all(&base)
        .with_context(|| format!("could not create data directory {base}"))?;
    let config = Config::load_with(&base);

    match args.command {
        cli::Command::Import { input, encoder } => {
            let _lock =
                FileLock::try_acquire(Path::new(&base)).context("could not lock data directory")?;
            import_corpus(&config, &input, &encoder)
        }

        cli::Command::Search {
            vector,
            top_k,
            collection,
            exclude,
            user,
        } => {
            if collection.is_some() && exclude.is_some() {
                bail!("--exclude cannot be combined with --collection");
            }

            let engine = load_engine(&config)?;
            let query = read_vector(vector.as_deref())?;
            let top_k = top_k.unwrap_or(config.default_top_k);

            let start = Instant::now();
            let results = match collection {
                Some(id) => {
                    let user = user.unwrap_or_else(|| config.default_user.clone());
                    let store = CollectionStore::load(&base)?;
                    let found = store
                        .get(&user, &id)
                        .ok_or_else(|| anyhow::anyhow!("collection not found: {id}"))?;
                    engine.search_in_collection(&query, &found, top_k)?
                }
                None => {
                    let exclude = parse_exclude(exclude.as_deref())?;
                    engine.search(&query, top_k, &exclude)?
                }
            };
            log::debug!("search took {:?}", start.elapsed());

            println!("{}", serde_json::to_string_pretty(&results)?);
            Ok(())
        }

        cli::Command::Similar {
            path,
            top_k,
            keep_self,
        } => {
            let engine = load_engine(&config)?;
            let top_k = top_k.unwrap_or(config.default_top_k);

            let start = Instant::now();
            let results = engine.find_similar(&path, top_k, !keep_self)?;
            log::debug!("similar lookup took {:?}", start.elapsed());

            println!("{}", serde_json::to_string_pretty(&results)?);
            Ok(())
        }

        cli::Command::Collection { user, action } => {
            let user = user.unwrap_or_else(|| config.default_user.clone());
            match action {
                CollectionArgs::Create { name, description } => {
                    let _lock = FileLock::try_acquire(Path::new(&base))
                        .context("could not lock data directory")?;
                    let mut store = CollectionStore::load(&base)?;
                    let created = store.create(&user, &name, &description)?;
                    println!("{}", serde_json::to_string_pretty(&collection_json(&created))?);
                    Ok(())
                }
                CollectionArgs::Add { id, path } => {
                    let _lock = FileLock::try_acquire(Path::new(&base))
                        .context("could not lock data directory")?;
                    let mut store = CollectionStore::load(&base)?;
                    let added = store.add_image(&user, &id, &path)?;
                    println!(
                        "{}",
                        json!({ "collection": id, "path": path, "added": added })
                    );
                    Ok(())
                }
                CollectionArgs::List {} => {
                    let store = CollectionStore::load(&base)?;
                    let listed: Vec<serde_json::Value> =
                        store.list(&user).iter().map(collection_json).collect();
                    println!("{}", serde_json::to_string_pretty(&listed)?);
                    Ok(())
                }
                CollectionArgs::Remove { id, yes } => {
                    if !yes {
                        match inquire::prompt_confirmation(format!("Delete collection {id}?")) {
                            InquireResult::Ok(true) => {}
                            InquireResult::Ok(false) => return Ok(()),
                            InquireResult::Err(err) => bail!("An error occurred: {}", err),
                        }
                    }

                    let _lock = FileLock::try_acquire(Path::new(&base))
                        .context("could not lock data directory")?;
                    let mut store = CollectionStore::load(&base)?;
                    store.remove(&user, &id)?;
                    println!("collection {id} removed");
                    Ok(())
                }
            }
        }

        cli::Command::Favorite { user, action } => {
            let user = user.unwrap_or_else(|| config.default_user.clone());
            match action {
                FavoriteArgs::Add { path, query } => {
                    let _lock = FileLock::try_acquire(Path::new(&base))
                        .context("could not lock data directory")?;
                    let mut store = FavoritesStore::load(&base)?;
                    let added = store.add(&user, &path, &query)?;
                    println!("{}", json!({ "path": path, "added": added }));
                    Ok(())
                }
                FavoriteArgs::Remove { path } => {
                    let _lock = FileLock::try_acquire(Path::new(&base))
                        .context("could not lock data directory")?;
                    let mut store = FavoritesStore::load(&base)?;
                    let removed = store.remove(&user, &path)?;
                    println!("{}", json!({ "path": path, "removed": removed }));
                    Ok(())
                }
                FavoriteArgs::List {} => {
                    let store = FavoritesStore::load(&base)?;
                    println!("{}", serde_json::to_string_pretty(&store.list(&user))?);
                    Ok(())
                }
            }
        }

        cli::Command::Info {} => {
            let artifact = CorpusArtifact::new(config.corpus_path());
            let corpus = if artifact.exists() {
                let raw = artifact.read(config.expected_encoder_id().as_ref())?;
                json!({
                    "items": raw.identifiers.len(),
                    "dimensions": raw.dimensions,
                    "encoder_id": hex(&raw.encoder_id),
                })
            } else {
                json!(null)
            };

            let user = config.default_user.clone();
            let collections = CollectionStore::load(&base)?;
            let favorites = FavoritesStore::load(&base)?;

            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "data_dir": base,
                    "corpus": corpus,
                    "user": user,
                    "collections": collections.list(&user).len(),
                    "favorites": favorites.list(&user).len(),
                }))?
            );
            Ok(())
        }

        cli::Command::Inspect { path } => {
            let filename = Path::new(&path)
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();

            let facts = match std::fs::metadata(&path) {
                Ok(meta) => {
                    let modified: chrono::DateTime<chrono::Utc> = meta.modified()?.into();
                    let size_mb = (meta.len() as f64 / 1_048_576.0 * 100.0).round() / 100.0;
                    json!({
                        "filename": filename,
                        "size_mb": size_mb,
                        "modified_date": modified.to_rfc3339(),
                        "exists": true,
                    })
                }
                Err(_) => json!({ "filename": filename, "exists": false }),
            };

            println!("{}", serde_json::to_string_pretty(&facts)?);
            Ok(())
        }

        cli::Command::Backup { output } => backup::create_backup(output, Path::new(&base)),

        cli::Command::Restore { archive, yes } => {
            let _lock =
                FileLock::try_acquire(Path::new(&base)).context("could not lock data directory")?;
            backup::restore_backup(&archive, yes, Path::new(&base))
        }
    }
}

/// One line of import input.
#[derive(Debug, Deserialize)]
struct ImportRecord {
    path: String,
    embedding: Vec<f32>,
}

fn import_corpus(config: &Config, input: &Path, encoder: &str) -> anyhow::Result<()> {
    use std::io::BufRead;

    if let Some(pinned) = &config.encoder {
        if pinned != encoder {
            bail!("config pins encoder {pinned}, refusing to import with {encoder}");
        }
    }

    let file = std::fs::File::open(input)
        .with_context(|| format!("could not open {}", input.display()))?;
    let reader = std::io::BufReader::new(file);

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {pos} embeddings read")
            .unwrap(),
    );

    let mut identifiers: Vec<String> = Vec::new();
    let mut embeddings: Vec<Vec<f32>> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut dimensions = 0usize;

    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: ImportRecord = serde_json::from_str(&line)
            .with_context(|| format!("line {}: malformed record", number + 1))?;

        if record.embedding.is_empty() {
            bail!("line {}: embedding is empty", number + 1);
        }
        if dimensions == 0 {
            dimensions = record.embedding.len();
        }
        if record.embedding.len() != dimensions {
            bail!(
                "line {}: embedding has {} components, expected {dimensions}",
                number + 1,
                record.embedding.len()
            );
        }
        if search::l2_norm(&record.embedding) < f32::EPSILON {
            bail!("line {}: embedding has no magnitude", number + 1);
        }
        if !seen.insert(record.path.clone()) {
            log::warn!("duplicate path {}", record.path);
        }

        identifiers.push(record.path);
        embeddings.push(record.embedding);
        pb.inc(1);
    }
    pb.finish_and_clear();

    if identifiers.is_empty() {
        bail!("no embeddings found in {}", input.display());
    }

    let artifact = CorpusArtifact::new(config.corpus_path());
    artifact.write(&search::encoder_id(encoder), &identifiers, &embeddings)?;
    log::info!(
        "wrote {} embeddings to {}",
        identifiers.len(),
        artifact.path().display()
    );

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "imported": identifiers.len(),
            "dimensions": dimensions,
            "encoder": encoder,
            "corpus": artifact.path(),
        }))?
    );
    Ok(())
}

fn load_engine(config: &Config) -> anyhow::Result<SearchEngine> {
    let artifact = CorpusArtifact::new(config.corpus_path());
    if !artifact.exists() {
        bail!(
            "no corpus at {} (run import first)",
            artifact.path().display()
        );
    }

    let expected = config.expected_encoder_id();
    let raw = artifact.read(expected.as_ref())?;
    let corpus = EmbeddingCorpus::load(raw.identifiers, raw.embeddings)?;
    log::info!(
        "loaded {} vectors of {} dimensions",
        corpus.len(),
        corpus.dimensions()
    );
    Ok(SearchEngine::new(corpus))
}

fn read_vector(vector: Option<&Path>) -> anyhow::Result<Vec<f32>> {
    let query: Vec<f32> = match vector {
        Some(path) => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("could not open query vector at {}", path.display()))?;
            serde_json::from_reader(std::io::BufReader::new(file))
                .context("query vector is not a JSON array of numbers")?
        }
        None => serde_json::from_reader(std::io::stdin().lock())
            .context("query vector on stdin is not a JSON array of numbers")?,
    };
    Ok(query)
}

fn parse_exclude(exclude: Option<&str>) -> anyhow::Result<HashSet<usize>> {
    let mut positions = HashSet::new();
    if let Some(list) = exclude {
        for part in list.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let position: usize = part
                .parse()
                .with_context(|| format!("invalid position: {part}"))?;
            positions.insert(position);
        }
    }
    Ok(positions)
}

/// The persisted form keeps the id in the map key; echo it explicitly for
/// operators.
fn collection_json(collection: &Collection) -> serde_json::Value {
    json!({
        "id": collection.id,
        "name": collection.name,
        "description": collection.description,
        "created_at": collection.created_at,
        "images": collection.images,
    })
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}
