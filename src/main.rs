/*
 * Recollect CLI - Rust Edition
 * Copyright (c) 2025 Recollect Contributors
 *
 * This work is licensed under the Creative Commons Attribution-NonCommercial 4.0 International License.
 * To view a copy of this license, visit http://creativecommons.org/licenses/by-nc/4.0/
 *
 * You are free to share and adapt this work for non-commercial purposes with attribution.
 * Commercial use is prohibited without explicit written permission.
 *
 * For commercial licensing inquiries, please contact the project maintainers.
 */

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::FutureExt;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, BufReader};
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::EnvFilter;

use recollect::config::Settings;
use recollect::providers;
use recollect::rag::RagRetriever;
use recollect::session::{NotifyFn, RecordingSession, SessionOptions, SessionRegistry};
use recollect::storage::Storage;
use recollect::types::RagQueryRequest;
use recollect::vector::{FileVectorStore, VectorStore};

/// Recollect CLI - streaming recording summarization and semantic recall
#[derive(Parser)]
#[command(name = "recollect")]
#[command(version = "0.1.0")]
#[command(about = "Live recording summarization pipeline with semantic recall over past sessions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a live session, feeding minute transcripts from a JSONL stream
    Record {
        /// JSONL file of {"minute_index": N, "text": "..."} lines (stdin when omitted)
        #[arg(long)]
        input: Option<PathBuf>,

        /// Recording title
        #[arg(long)]
        title: Option<String>,

        /// Free-text domain context used for STT error correction
        #[arg(long)]
        context: Option<String>,

        /// Seconds between summarization drain cycles
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Ask a natural-language question over past recordings
    Query {
        query: String,

        #[arg(long, default_value_t = 5)]
        top_k: usize,

        #[arg(long, default_value_t = 0.3)]
        min_similarity: f64,

        #[arg(long)]
        category: Option<String>,

        /// ISO date lower bound (inclusive)
        #[arg(long)]
        date_from: Option<String>,

        /// ISO date upper bound (inclusive)
        #[arg(long)]
        date_to: Option<String>,

        /// Keyword filter; may be repeated
        #[arg(long)]
        keyword: Vec<String>,
    },

    /// Find recordings similar to an existing one
    Similar {
        recording_id: i64,

        #[arg(long, default_value_t = 5)]
        top_k: usize,
    },

    /// Re-summarize an arbitrary minute range of a recording
    Extract {
        recording_id: i64,

        /// Start minute (inclusive)
        #[arg(long)]
        start: u32,

        /// End minute (inclusive)
        #[arg(long)]
        end: u32,
    },

    /// Classify arbitrary text into a category
    Classify {
        text: String,

        /// Category label; may be repeated to override the default set
        #[arg(long)]
        category: Vec<String>,
    },

    /// List recordings
    Recordings {
        #[arg(long)]
        status: Option<String>,

        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Delete a recording, its children, and its vector documents
    Delete { recording_id: i64 },
}

/// One line of the `record` input feed.
#[derive(Debug, Deserialize)]
struct MinuteFeed {
    minute_index: u32,
    text: String,
}

fn init_tracing(settings: &Settings) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("recollect=info"));

    if std::env::var("RECOLLECT_LOG_TO_FILE").is_ok() {
        let appender =
            tracing_appender::rolling::daily(settings.data_dir.join("logs"), "recollect.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .init();
        Some(guard)
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        None
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load()?;
    let _log_guard = init_tracing(&settings);

    let storage = Arc::new(
        Storage::connect(&settings.database_path)
            .await
            .context("Failed to open database")?,
    );

    match cli.command {
        Commands::Record {
            input,
            title,
            context,
            interval,
        } => run_record(settings, storage, input, title, context, interval).await,
        Commands::Query {
            query,
            top_k,
            min_similarity,
            category,
            date_from,
            date_to,
            keyword,
        } => {
            let request = RagQueryRequest {
                query,
                top_k,
                min_similarity,
                category,
                date_from,
                date_to,
                keywords: keyword,
            };
            run_query(settings, storage, request).await
        }
        Commands::Similar {
            recording_id,
            top_k,
        } => run_similar(settings, recording_id, top_k).await,
        Commands::Extract {
            recording_id,
            start,
            end,
        } => run_extract(settings, storage, recording_id, start, end).await,
        Commands::Classify { text, category } => run_classify(settings, text, category).await,
        Commands::Recordings { status, limit } => run_recordings(storage, status, limit).await,
        Commands::Delete { recording_id } => run_delete(settings, storage, recording_id).await,
    }
}

async fn run_record(
    settings: Settings,
    storage: Arc<Storage>,
    input: Option<PathBuf>,
    title: Option<String>,
    context: Option<String>,
    interval: Option<u64>,
) -> Result<()> {
    let mut scope = storage.scope().await?;
    let recording = scope
        .create_recording(title.as_deref(), context.as_deref(), None)
        .await?;
    scope.commit().await?;
    tracing::info!("created recording {}", recording.id);

    // Summary results stream to stdout as JSON lines.
    let notify: NotifyFn = Arc::new(|payload| {
        async move {
            println!("{payload}");
            Ok(())
        }
        .boxed()
    });

    let options = SessionOptions {
        summarization_interval: Duration::from_secs(
            interval.unwrap_or(settings.summarization_interval_secs),
        ),
        user_context: context,
    };

    let session = RecordingSession::new(recording.id, notify, options, &settings, storage.clone())?;
    let registry = SessionRegistry::new();
    registry.start(session).await?;

    let reader: Box<dyn AsyncBufRead + Unpin> = match input {
        Some(path) => Box::new(BufReader::new(
            tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("Failed to open feed file {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };
    let mut lines = reader.lines();

    let feed = async {
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<MinuteFeed>(line) {
                Ok(item) => {
                    let mut scope = storage.scope().await?;
                    scope
                        .create_transcript(recording.id, item.minute_index, &item.text, 0.0, "unknown")
                        .await?;
                    scope.commit().await?;
                    registry
                        .enqueue_transcript(item.minute_index, &item.text)
                        .await?
                }
                Err(err) => tracing::warn!("skipping malformed feed line: {err}"),
            }
        }
        anyhow::Ok(())
    };

    tokio::select! {
        result = feed => result.context("transcript feed failed")?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received; stopping session");
        }
    }

    registry.cleanup().await;

    let mut scope = storage.scope().await?;
    let summaries = scope.list_summaries(recording.id).await?;
    let hours = scope.list_hour_summaries(recording.id).await?;
    let classifications = scope.list_classifications(recording.id).await?;
    println!(
        "recording {} finished: {} minute summaries, {} hour summaries, {} classifications",
        recording.id,
        summaries.len(),
        hours.len(),
        classifications.len()
    );
    Ok(())
}

async fn run_query(
    settings: Settings,
    storage: Arc<Storage>,
    request: RagQueryRequest,
) -> Result<()> {
    let retriever = build_retriever(&settings)?;
    let response = retriever.query(&request).await?;

    println!("{}", response.answer);
    for (i, source) in response.sources.iter().enumerate() {
        println!(
            "  [{i}] recording-{}, minute-{} ({}) similarity {:.2}",
            source.recording_id, source.minute_index, source.date, source.similarity
        );
    }
    tracing::info!(
        "query answered in {} ms using {}",
        response.query_time_ms,
        if response.model_used.is_empty() {
            "no model"
        } else {
            response.model_used.as_str()
        }
    );

    // Audit row; losing it never fails the query.
    if let Ok(mut scope) = storage.scope().await {
        let _ = scope
            .create_rag_query(
                &request.query,
                &response.answer,
                response.sources.len(),
                response.query_time_ms,
            )
            .await;
        let _ = scope.commit().await;
    }
    Ok(())
}

async fn run_similar(settings: Settings, recording_id: i64, top_k: usize) -> Result<()> {
    let retriever = build_retriever(&settings)?;
    let sources = retriever.find_similar(recording_id, top_k).await?;

    if sources.is_empty() {
        println!("no similar recordings found");
        return Ok(());
    }
    for source in sources {
        println!(
            "recording-{}, minute-{} similarity {:.2}: {}",
            source.recording_id, source.minute_index, source.similarity, source.summary_text
        );
    }
    Ok(())
}

async fn run_extract(
    settings: Settings,
    storage: Arc<Storage>,
    recording_id: i64,
    start: u32,
    end: u32,
) -> Result<()> {
    let mut scope = storage.scope().await?;
    // Verify the recording exists before pulling its summaries.
    scope.get_recording(recording_id).await?;
    let summaries = scope
        .list_summaries_in_range(recording_id, start, end)
        .await?;

    let pairs: Vec<(u32, String)> = summaries
        .into_iter()
        .map(|s| (s.minute_index, s.summary_text))
        .collect();

    let llm = providers::create_language_model(&settings)?;
    let extractor = recollect::summarize::RangeExtractor::new(llm);
    let result = extractor
        .extract_range(recording_id, start, end, &pairs)
        .await?;

    println!("{}", result.summary_text);
    println!(
        "keywords: {} (from {} minute summaries, model {})",
        result.keywords.join(", "),
        result.source_count,
        result.model_used
    );
    Ok(())
}

async fn run_classify(settings: Settings, text: String, category: Vec<String>) -> Result<()> {
    let llm = providers::create_language_model(&settings)?;
    let classifier = recollect::classify::ZeroShotClassifier::new(llm);
    let categories = if category.is_empty() {
        None
    } else {
        Some(category)
    };
    let result = classifier.classify(&text, categories.as_deref()).await?;
    println!(
        "{} (confidence {:.2}): {}",
        result.category, result.confidence, result.reason
    );
    Ok(())
}

async fn run_recordings(
    storage: Arc<Storage>,
    status: Option<String>,
    limit: i64,
) -> Result<()> {
    let mut scope = storage.scope().await?;
    let recordings = scope.list_recordings(status.as_deref(), limit, 0).await?;

    if recordings.is_empty() {
        println!("no recordings");
        return Ok(());
    }
    for recording in recordings {
        println!(
            "#{} [{}] {} (started {}, {} min)",
            recording.id,
            recording.status,
            recording.title.as_deref().unwrap_or("(untitled)"),
            recording.started_at.format("%Y-%m-%d %H:%M:%S"),
            recording.total_minutes
        );
    }
    Ok(())
}

async fn run_delete(
    settings: Settings,
    storage: Arc<Storage>,
    recording_id: i64,
) -> Result<()> {
    // Collect the vector doc ids before the rows cascade away.
    let mut scope = storage.scope().await?;
    let summaries = scope.list_summaries(recording_id).await?;
    scope.delete_recording(recording_id).await?;
    scope.commit().await?;

    let store = FileVectorStore::open(&settings.vector_store_path)?;
    for summary in &summaries {
        let doc_id = recollect::vector::summary_doc_id(recording_id, summary.minute_index);
        if let Err(err) = store.delete(&doc_id).await {
            tracing::warn!("failed to delete vector document {doc_id}: {err}");
        }
    }

    println!(
        "deleted recording {recording_id} ({} summaries, {} vector documents)",
        summaries.len(),
        summaries.len()
    );
    Ok(())
}

fn build_retriever(settings: &Settings) -> Result<RagRetriever> {
    let llm = providers::create_language_model(settings)?;
    let embedding = providers::create_embedding(settings)?;
    let store: Arc<dyn VectorStore> =
        Arc::new(FileVectorStore::open(&settings.vector_store_path)?);
    Ok(RagRetriever::new(llm, embedding, store))
}
