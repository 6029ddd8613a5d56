mod args;

use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use args::{filter_from_pairs, metadata_from_pairs, Cli, Command, FilterAction};
use common::{
    storage::{
        db::SurrealDbClient,
        filter_store::MetadataFilterStore,
        ledger::ProcessedFileLedger,
        types::metadata::MetadataFilter,
        vector_store::{SurrealVectorStore, VectorStore},
    },
    utils::{
        config::{get_config, AppConfig},
        embedding::EmbeddingProvider,
    },
};
use ingestion_pipeline::{DeletionPipeline, IngestionPipeline, IngestionTuning};
use retrieval_pipeline::{OpenAiChatModel, RetrievalPipeline};

struct App {
    store: Arc<dyn VectorStore>,
    ledger: Arc<ProcessedFileLedger>,
    filters: MetadataFilterStore,
    openai_client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
    config: AppConfig,
}

impl App {
    async fn connect(config: AppConfig) -> Result<Self> {
        tokio::fs::create_dir_all(config.data_dir()).await?;

        let db = Arc::new(
            SurrealDbClient::new(
                &config.surrealdb_address,
                config.surrealdb_credentials(),
                &config.surrealdb_namespace,
                &config.surrealdb_database,
            )
            .await?,
        );
        db.ensure_initialized().await?;

        let openai_client = Arc::new(async_openai::Client::with_config(
            async_openai::config::OpenAIConfig::new()
                .with_api_key(&config.openai_api_key)
                .with_api_base(&config.openai_base_url),
        ));

        let embedding_provider =
            Arc::new(EmbeddingProvider::from_config(&config, openai_client.clone()).await?);

        Ok(Self {
            store: Arc::new(SurrealVectorStore::new(db, embedding_provider)),
            ledger: Arc::new(ProcessedFileLedger::new(config.ledger_path())),
            filters: MetadataFilterStore::new(config.filter_path()),
            openai_client,
            config,
        })
    }

    fn ingestion(&self) -> Result<IngestionPipeline> {
        Ok(IngestionPipeline::new(
            Arc::clone(&self.store),
            Arc::clone(&self.ledger),
        )?)
    }

    fn retrieval(&self) -> RetrievalPipeline {
        let model = Arc::new(OpenAiChatModel::new(
            self.openai_client.clone(),
            self.config.chat_model.clone(),
        ));
        RetrievalPipeline::new(model, Arc::clone(&self.store))
    }

    /// The persisted filter, or `None` when it constrains nothing.
    async fn active_filter(&self) -> Option<MetadataFilter> {
        let filter = self.filters.read().await.normalized();
        (!filter.is_unconstrained()).then_some(filter)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = get_config()?;
    if let Some(backend) = cli.embedding_backend {
        config.embedding_backend = backend;
    }

    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .try_init()
        .ok();

    let app = App::connect(config).await?;

    match cli.command {
        Command::Insert { files, metadata } => {
            let summary = app
                .ingestion()?
                .insert_many(&files, &metadata_from_pairs(metadata))
                .await;
            println!(
                "inserted: {}, already processed: {}, not found: {}, empty: {}, failed: {}",
                summary.inserted,
                summary.already_processed,
                summary.not_found,
                summary.empty,
                summary.failed
            );
            if let Some(outcome) = summary.most_urgent {
                println!("overall: {outcome}");
            }
        }
        Command::Query { question, session } => {
            let filter = app.active_filter().await;
            let response = app
                .retrieval()
                .respond(&session, &question, filter.as_ref())
                .await?;
            println!("{}", response.answer);
            info!(total_tokens = response.usage.total_tokens, "Query answered");
        }
        Command::Chat { session } => chat(&app, &session).await?,
        Command::Delete => {
            let deletion = DeletionPipeline::new(
                Arc::clone(&app.store),
                Arc::clone(&app.ledger),
                app.filters.clone(),
                &IngestionTuning::default(),
            );
            let deleted = deletion.delete_by_active_filter().await?;
            app.filters
                .prune_stale(&app.ledger.metadata_catalogue().await?)
                .await?;
            println!("deleted {deleted} chunks");
        }
        Command::Ledger => print!("{}", app.ledger.listing().await?),
        Command::Filter { action } => filter_command(&app, action).await?,
        Command::Reset { yes } => {
            if !yes {
                bail!("refusing to reset without --yes");
            }
            app.ingestion()?.reset_all().await?;
            app.filters.write(&MetadataFilter::new()).await?;
            warn!("Ledger, filter and vector collection reset");
        }
    }

    Ok(())
}

async fn filter_command(app: &App, action: FilterAction) -> Result<()> {
    match action {
        FilterAction::Show => {
            let filter = app.filters.read().await;
            println!("active: {}", serde_json::to_string_pretty(&filter)?);
            let catalogue = app.ledger.metadata_catalogue().await?;
            println!("available: {}", serde_json::to_string_pretty(&catalogue)?);
        }
        FilterAction::Set { allowed } => {
            let filter = filter_from_pairs(allowed);
            app.filters.write(&filter).await?;
            println!("{}", serde_json::to_string_pretty(&filter)?);
        }
        FilterAction::Prune => {
            let pruned = app
                .filters
                .prune_stale(&app.ledger.metadata_catalogue().await?)
                .await?;
            println!("{}", serde_json::to_string_pretty(&pruned)?);
        }
        FilterAction::Clear => app.filters.write(&MetadataFilter::new()).await?,
    }
    Ok(())
}

async fn chat(app: &App, session: &str) -> Result<()> {
    let retrieval = app.retrieval();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question == "/exit" {
            break;
        }
        if question == "/reset" {
            if retrieval.conversations().clear(session).await {
                info!(session, "Conversation history cleared");
            }
            continue;
        }

        // The filter may change between turns.
        let filter = app.active_filter().await;
        match retrieval.respond(session, question, filter.as_ref()).await {
            Ok(response) => {
                stdout
                    .write_all(format!("{}\n\n", response.answer).as_bytes())
                    .await?;
            }
            Err(err) => warn!(error = %err, "Failed to answer"),
        }
    }
    Ok(())
}
