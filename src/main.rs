use std::sync::Arc;

use news_sync::ai::ClaudeAnalyzer;
use news_sync::auth::Session;
use news_sync::cloud::{DocumentStore, MemoryDocumentStore, RestDocumentStore, UserCloudStore};
use news_sync::config::Config;
use news_sync::db::LocalStore;
use news_sync::error::{AppError, Result};
use news_sync::news::NewsApiClient;
use news_sync::sync::{LoadState, SyncCoordinator, SyncOptions};

const USAGE: &str = "usage: news-sync --refresh [category] | --purge | --saved \
                     | --history | --summarize <id> | --classify <id>";

fn missing(key: &str) -> AppError {
    AppError::Config(format!(
        "{} is not set in {}",
        key,
        Config::config_path().display()
    ))
}

/// Signed in against the document API when one is configured, otherwise a
/// guest over an in-process store.
fn cloud_store(config: &Config, local: Arc<LocalStore>) -> Result<UserCloudStore> {
    let (docs, session): (Arc<dyn DocumentStore>, Session) = match config.cloud_account()? {
        Some(account) => (
            Arc::new(RestDocumentStore::new(account.url, account.token)?),
            Session::signed_in(account.user_id),
        ),
        None => (Arc::new(MemoryDocumentStore::new()), Session::signed_out()),
    };
    Ok(UserCloudStore::new(docs, local, session).with_max_search_history(config.max_search_history))
}

async fn coordinator(config: &Config, local: Arc<LocalStore>) -> Result<SyncCoordinator> {
    // The token is only needed once a page is fetched
    let source = Arc::new(NewsApiClient::new(
        &config.news_api_url,
        config.news_api_token.as_deref().unwrap_or_default(),
        &config.language,
    )?);
    let cloud = Arc::new(cloud_store(config, local.clone())?);
    let mut coordinator =
        SyncCoordinator::new(source, cloud, local, SyncOptions::from_config(config));

    if let Some(key) = config.claude_api_key.clone() {
        let analyzer = ClaudeAnalyzer::new(key)?;
        tracing::info!("Article analysis uses {}", analyzer.model_version());
        coordinator = coordinator.with_analyzer(Arc::new(analyzer));
    }

    coordinator.start(config.auth_timeout()).await?;
    Ok(coordinator)
}

fn print_articles(articles: &[news_sync::models::Article]) {
    for article in articles {
        println!("{}\t{}\t{}", article.id, article.source, article.title);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (only show warnings and errors by default)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config = Config::load()?;
    let local = Arc::new(LocalStore::new(&config.db_path).await?);

    match args.get(1).map(String::as_str) {
        Some("--purge") => {
            let purged = local.purge_expired(config.cache_ttl()).await?;
            println!("Purged {} expired articles ({} cached)", purged, local.count().await?);
        }

        Some("--saved") => {
            // Remote list when signed in, local cache otherwise
            let cloud = cloud_store(&config, local.clone())?;
            print_articles(&cloud.list_saved().await?);
        }

        Some("--history") => {
            let coordinator = coordinator(&config, local.clone()).await?;
            print_articles(&coordinator.history());
        }

        Some("--refresh") => {
            if config.news_api_token.is_none() {
                return Err(missing("news_api_token"));
            }
            let coordinator = coordinator(&config, local.clone()).await?;

            let category = args.get(2).map(String::as_str);
            coordinator.load_category(category, true).await?;

            let state = coordinator.category_state(category);
            if let LoadState::Error { message, .. } = &state.state {
                eprintln!("Error: {}", message);
            }
            println!(
                "Refreshed {} articles for {} ({} cached)",
                state.articles.len(),
                category.unwrap_or("all categories"),
                local.count().await?
            );
        }

        Some(command @ ("--summarize" | "--classify")) => {
            let Some(id) = args.get(2) else {
                eprintln!("{}", USAGE);
                return Ok(());
            };
            if config.claude_api_key.is_none() {
                return Err(missing("claude_api_key"));
            }
            let coordinator = coordinator(&config, local.clone()).await?;

            if command == "--summarize" {
                println!("{}", coordinator.summarize_article(id).await?);
            } else {
                println!("{}", coordinator.classify_article(id).await?.join(", "));
            }
        }

        _ => {
            eprintln!("{}", USAGE);
        }
    }

    Ok(())
}
