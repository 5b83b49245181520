//! Example wiring the shared cache client, the rate limiter and the read-through cache
//! at process start, the way an HTTP service would.
//!
//! Runs against Redis when `CACHE_REDIS_URL` is set and on the fallback store otherwise:
//!
//! ```text
//! CACHE_REDIS_URL=redis://localhost:6379 RUST_LOG=debug cargo run --example composition_root
//! ```

use resilient_cache::{
    CacheClientBuilder, CacheError, Caller, PolicyClass, RateLimiter, ReadThroughCache,
    Settings, derive_key,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ConversationPage {
    page: u32,
    titles: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Stats {
    conversations: u64,
    comments: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = Settings::from_env();

    // The one shared client; everything else gets a clone.
    let client = CacheClientBuilder::from_settings(&settings)?.build();
    let state = client.connect().await;
    println!("cache state after connect: {}", state);

    let limiter = RateLimiter::new(client.clone())
        .with_allow_list(settings.rate_limits.allow_list.clone());
    let auth = settings.rate_limits.policy(PolicyClass::Auth)?;
    let general = settings.rate_limits.policy(PolicyClass::General)?;

    // Login attempts from one address.
    for attempt in 1..=7 {
        let decision = limiter.check(&auth, "198.51.100.4").await;
        if decision.allowed {
            println!("login attempt {}: allowed ({} left)", attempt, decision.remaining);
        } else {
            println!(
                "login attempt {}: 429, retry after {}s",
                attempt, decision.retry_after_secs
            );
        }
    }

    let admin = Caller::new("user:1").with_role("admin");
    let decision = limiter.check_caller(&general, &admin).await;
    println!("admin quota on general traffic: {}", decision.limit);

    let reads = ReadThroughCache::new(client.clone());

    // Paginated listing, keyed by its query parameters.
    let key = derive_key("conversations:list", &json!({ "page": 1, "limit": 2 }))?;
    for _ in 0..2 {
        let page: ConversationPage = reads
            .get_or_compute(&key, settings.read_through.item_ttl(), || async {
                println!("loading page 1 from the database");
                Ok::<_, CacheError>(ConversationPage {
                    page: 1,
                    titles: vec!["Hello".into(), "Release notes".into()],
                })
            })
            .await?;
        println!("page {}: {:?}", page.page, page.titles);
    }

    let stats: Stats = reads
        .get_or_compute("stats:global", settings.read_through.aggregate_ttl(), || async {
            println!("computing global statistics");
            Ok::<_, CacheError>(Stats {
                conversations: 2,
                comments: 14,
            })
        })
        .await?;
    println!(
        "{} conversations, {} comments",
        stats.conversations, stats.comments
    );

    // A new conversation changes every listing page.
    let dropped = reads.invalidate_prefix("conversations:list:").await?;
    println!("invalidated {} listing pages", dropped);

    client.disconnect().await;
    Ok(())
}
