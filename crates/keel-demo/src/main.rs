// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Keel demo
//
// Entry point. Initialises logging, loads app options, then walks a client
// through its whole lifecycle against the in-process backends.

use std::path::Path;
use std::sync::Arc;

use keel_client::{App, Database, RewardedAd};
use keel_core::config::AppOptions;
use keel_core::error::Result;
use keel_core::types::{AdEvent, AdParent, AdRequest};
use serde_json::json;
use tracing::{info, warn};

/// Environment variable naming a JSON options file.
const CONFIG_ENV: &str = "KEEL_CONFIG";

/// Options from `path` if given and readable, defaults otherwise.
fn load_options(path: Option<&Path>) -> AppOptions {
    let Some(path) = path else {
        return AppOptions::default();
    };
    match AppOptions::load(path) {
        Ok(options) => options,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not load app options; using defaults");
            AppOptions::default()
        }
    }
}

async fn database_walkthrough(app: &Arc<App>) -> Result<()> {
    // Two threads racing for the same app end up with one instance.
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let app = app.clone();
            tokio::task::spawn_blocking(move || Database::get_instance(&app).map(|db| db.id()))
        })
        .collect();
    let mut ids = Vec::new();
    for handle in handles {
        match handle.await {
            Ok(id) => ids.push(id?),
            Err(e) => warn!(error = %e, "lookup task failed"),
        }
    }
    info!(?ids, same = ids.windows(2).all(|w| w[0] == w[1]), "concurrent lookups");

    let db = Database::get_instance(app)?;
    let in_sync = db.add_snapshots_in_sync_listener(|| info!("snapshots in sync"));

    db.set_document("users/ada", json!({ "name": "Ada", "born": 1815 }))?
        .await?;
    let doc = db.get_document("users/ada")?.await?;
    info!(?doc, "read back document");

    let bundle = json!({
        "documents": { "posts/1": { "title": "hello" }, "posts/2": { "title": "again" } },
        "named_queries": { "latest-posts": "posts" }
    })
    .to_string();
    let loaded = db
        .load_bundle_with_progress(bundle, |p| {
            info!(loaded = p.documents_loaded, total = p.total_documents, "bundle progress");
        })?
        .await?;
    info!(state = ?loaded.state, "bundle loaded");
    let query = db.named_query("latest-posts")?.await?;
    info!(collection = %query.collection, "named query resolved");

    in_sync.remove();
    db.terminate().await?;
    info!(registered = Database::is_registered(app.id()), "database terminated");
    Ok(())
}

async fn ad_walkthrough(app: &App) -> Result<Arc<RewardedAd>> {
    let ad = RewardedAd::new(app)?;
    ad.add_listener(|event| match event {
        AdEvent::UserEarnedReward(reward) => {
            info!(reward = %reward.reward_type, amount = reward.amount, "reward earned")
        }
        AdEvent::Dismissed => info!("ad dismissed"),
        AdEvent::FailedToShow(e) => warn!(error = %e, "ad failed to show"),
    });

    ad.initialize(AdParent(1)).await?;
    let result = ad.load_ad("rewarded-demo", AdRequest::default())?.await?;
    info!(response = %result.response_id, "ad loaded");
    ad.show().await?;
    Ok(ad)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(client = %keel_client::client_language(), "Keel demo starting");

    let config = std::env::var_os(CONFIG_ENV);
    let options = load_options(config.as_deref().map(Path::new));
    let app = Arc::new(App::create(options)?);

    database_walkthrough(&app).await?;
    let ad = ad_walkthrough(&app).await?;

    // The app goes first; the ad it still owns is torn down with it.
    drop(app);
    let late = ad.show().await;
    info!(live = ad.is_live(), ?late, "app destroyed");
    Ok(())
}
