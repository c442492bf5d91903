//! Run configured sources against a stdout sink, standing in for the host
//! rulebook engine. Point `SOURCE_MANIFEST_PATH` at a TOML/JSON manifest.

use rulebook_events::config::{self, SourceSpec};
use rulebook_events::event::Event;
use rulebook_events::harness::{PassthroughNormalizer, PollSource};
use rulebook_events::sources::{elastic, mqtt, nextdns, pubsub, rss, snow, webhooksite};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_target(false).init();

    let manifest = config::load_manifest_default()?;
    if manifest.sources.is_empty() {
        println!("no sources configured; write a manifest and set SOURCE_MANIFEST_PATH");
        return Ok(());
    }

    let (tx, mut rx) = tokio::sync::mpsc::channel::<Event>(64);

    let mut poll_handles = Vec::new();
    for spec in manifest.sources {
        match spec {
            SourceSpec::Rss(args) => {
                poll_handles.extend(rss::spawn_feeds(&args, tx.clone()));
            }
            SourceSpec::Elastic(args) => {
                let config = elastic::poll_config(&args);
                let fetcher = elastic::ElasticFetcher::new(args);
                poll_handles.push(
                    PollSource::new(fetcher, PassthroughNormalizer, tx.clone(), config).spawn(),
                );
            }
            SourceSpec::Snow(args) => {
                let config = snow::poll_config(&args);
                let fetcher = snow::SnowFetcher::new(args);
                poll_handles.push(
                    PollSource::new(fetcher, PassthroughNormalizer, tx.clone(), config).spawn(),
                );
            }
            SourceSpec::Webhooksite(args) => {
                let config = webhooksite::poll_config(&args);
                let fetcher = webhooksite::WebhookSiteFetcher::new(&args);
                poll_handles.push(
                    PollSource::new(
                        fetcher,
                        webhooksite::WebhookSiteNormalizer,
                        tx.clone(),
                        config,
                    )
                    .spawn(),
                );
            }
            SourceSpec::Pubsub(args) => {
                let config = pubsub::poll_config(&args);
                let fetcher = pubsub::PubSubFetcher::new(args);
                poll_handles.push(
                    PollSource::new(fetcher, PassthroughNormalizer, tx.clone(), config).spawn(),
                );
            }
            SourceSpec::Mqtt(args) => {
                let sink = tx.clone();
                tokio::spawn(async move {
                    if let Err(error) = mqtt::run(&args, &sink).await {
                        tracing::error!(error = %error, "mqtt source stopped");
                    }
                });
            }
            SourceSpec::Nextdns(args) => {
                let sink = tx.clone();
                tokio::spawn(async move {
                    if let Err(error) = nextdns::run(&args, &sink).await {
                        tracing::error!(error = %error, "nextdns source stopped");
                    }
                });
            }
        }
    }
    drop(tx);

    while let Some(event) = rx.recv().await {
        println!("{}", serde_json::to_string_pretty(&event)?);
    }

    for handle in poll_handles {
        let _ = handle.shutdown().await;
    }
    Ok(())
}
