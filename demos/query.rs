//! Query demo - the API side of the gateway.
//!
//! This example demonstrates:
//! - Spawning the data layer and waiting for its `$ready` line
//! - Configuring the gateway from an optional JSON file
//! - Typed calls through `DataLayerClient`, and mapping failures to HTTP statuses
//!
//! ```text
//! cargo build --examples
//! cargo run --example query -- [config.json]
//! ```
//!
//! Example config:
//!
//! ```json
//! { "default_timeout_ms": 2000, "codec": "json" }
//! ```
//!
//! Set `PONCHE_DATA_LAYER` to run a different data-layer executable.

use std::path::PathBuf;
use std::time::Duration;

use ponche_gateway::codec::WireCodec;
use ponche_gateway::methods::{ModelName, Swipe};
use ponche_gateway::{DataLayerClient, GatewayConfig, QueryGateway, TransportBootstrap};
use serde_json::json;
use tokio::process::Command;
use tracing_subscriber::prelude::*;

fn data_layer_path() -> std::io::Result<PathBuf> {
    if let Some(path) = std::env::var_os("PONCHE_DATA_LAYER") {
        return Ok(PathBuf::from(path));
    }
    Ok(std::env::current_exe()?.with_file_name("mock_data_layer"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => GatewayConfig::from_json_str(&std::fs::read_to_string(path)?)?,
        None => GatewayConfig::default(),
    };

    let mut command = Command::new(data_layer_path()?);
    let codec_name = match config.codec {
        WireCodec::MsgPack => "msgpack",
        WireCodec::Json => "json",
    };
    command.env("PONCHE_CODEC", codec_name);

    let established = TransportBootstrap::with_generated_path()
        .spawn_peer(command)
        .establish()
        .await?;

    let gateway = QueryGateway::builder()
        .config(config)
        .start(established.transport);
    let client = DataLayerClient::new(gateway.clone());

    let candidate = client.get_next_candidate("1").await?;
    println!("next candidate: {} ({:?})", candidate.name, candidate.distance);

    let outcome = client
        .post_swipe(&Swipe {
            user_id: "1".into(),
            candidate_id: "2".into(),
            outcome: true,
        })
        .await?;
    println!("swipe matched: {}", outcome.match_created);

    let profile = client.get_login_user_info("1").await?;
    println!("logged in as: {:?}", profile.get("name"));

    match client.get_login_user_info("does-not-exist").await {
        Ok(profile) => println!("unexpected profile: {profile:?}"),
        Err(e) => println!("login failed -> HTTP {}: {e}", e.http_status()),
    }

    let created = client
        .post_object(ModelName::User, &json!({"name": "Mephala", "force_key": "3"}))
        .await?;
    println!("created: {created}");

    let spots = client
        .get_datespots_near([40.737291166191476, -74.00704685527774], None)
        .await?;
    println!("{} date spots nearby", spots.len());

    // Fan out: many handlers sharing one channel.
    let lookups: Vec<_> = (0..20)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.get_next_candidate("1").await })
        })
        .collect();
    let mut ok = 0;
    for lookup in lookups {
        if lookup.await?.is_ok() {
            ok += 1;
        }
    }
    println!("{ok}/20 concurrent lookups succeeded");

    drop(client);
    drop(gateway);
    if let Some(mut child) = established.child {
        match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
            Ok(status) => println!("data layer exited: {}", status?),
            Err(_) => child.kill().await?,
        }
    }
    Ok(())
}
