//! Mock data layer - serves canned answers for every data-layer method.
//!
//! This example demonstrates:
//! - Connecting to the gateway's socket from `PONCHE_PIPE_PATH`
//! - Registering typed handlers on a `Responder`
//! - Announcing readiness with a `$ready` line on stdout
//!
//! Logs go to stderr; stdout is reserved for the control plane.
//!
//! Normally spawned by the `query` example:
//!
//! ```text
//! cargo run --example query
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use ponche_gateway::codec::WireCodec;
use ponche_gateway::control::{build_ready_message, write_stdout_line};
use ponche_gateway::methods::{Swipe, SwipeOutcome, DEFAULT_RADIUS};
use ponche_gateway::transport::connect_from_env;
use ponche_gateway::{HandlerError, RequestContext, Responder};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing_subscriber::prelude::*;

#[derive(Deserialize)]
struct UserRef {
    user_id: String,
}

#[derive(Deserialize)]
struct GeoQuery {
    location: [f64; 2],
    #[serde(default)]
    radius: Option<u32>,
}

#[derive(Deserialize)]
struct ObjectRef {
    object_model_name: String,
    #[serde(default)]
    object_id: Option<String>,
    #[serde(default)]
    json_data: Option<Value>,
}

/// In-memory object store keyed by (model, id).
type Store = Arc<Mutex<HashMap<(String, String), Value>>>;

fn seeded_store() -> Store {
    let mut objects = HashMap::new();
    objects.insert(
        ("user".to_string(), "1".to_string()),
        json!({"name": "Azura", "current_location": [40.7373, -74.0070], "matches": []}),
    );
    objects.insert(
        ("user".to_string(), "2".to_string()),
        json!({"name": "Boethiah", "current_location": [40.7306, -73.9866], "matches": []}),
    );
    Arc::new(Mutex::new(objects))
}

fn codec_from_env() -> WireCodec {
    match std::env::var("PONCHE_CODEC").as_deref() {
        Ok("json") => WireCodec::Json,
        _ => WireCodec::MsgPack,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ponche_gateway=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let transport = connect_from_env().await?;
    let store = seeded_store();

    let get_store = store.clone();
    let post_store = store.clone();
    let put_store = store.clone();
    let all_store = store.clone();
    let login_store = store;

    let responder = Responder::new()
        .codec(codec_from_env())
        .handle("get_next_candidate", |req: UserRef, ctx: RequestContext| async move {
            tracing::debug!(user_id = %req.user_id, "picking candidate");
            ctx.respond(&json!({"name": "Boethiah", "distance": "some distance"}))
                .await
        })
        .handle("post_swipe", |swipe: Swipe, ctx: RequestContext| async move {
            // User "2" has already liked everyone.
            let match_created = swipe.outcome && swipe.candidate_id == "2";
            ctx.respond(&SwipeOutcome { match_created }).await
        })
        .handle("get_login_user_info", move |req: UserRef, ctx: RequestContext| {
            let store = login_store.clone();
            async move {
                let key = ("user".to_string(), req.user_id.clone());
                let user = store.lock().get(&key).cloned();
                match user {
                    Some(user) => ctx.respond(&user).await,
                    None => {
                        let error = format!("Invalid user id: '{}'", req.user_id);
                        ctx.respond(&json!({ "error": error })).await
                    }
                }
            }
        })
        .handle("get_json", move |req: ObjectRef, ctx: RequestContext| {
            let store = get_store.clone();
            async move {
                let id = req
                    .object_id
                    .ok_or_else(|| HandlerError::BadPayload("missing object_id".into()))?;
                let found = store.lock().get(&(req.object_model_name, id.clone())).cloned();
                match found {
                    Some(object) => ctx.respond(&object).await,
                    None => Err(HandlerError::failed(format!("no object with id {id}"))),
                }
            }
        })
        .handle("get_all_json", move |req: ObjectRef, ctx: RequestContext| {
            let store = all_store.clone();
            async move {
                let all: serde_json::Map<String, Value> = store
                    .lock()
                    .iter()
                    .filter(|((model, _), _)| *model == req.object_model_name)
                    .map(|((_, id), object)| (id.clone(), object.clone()))
                    .collect();
                ctx.respond(&all).await
            }
        })
        .handle("post_object", move |req: ObjectRef, ctx: RequestContext| {
            let store = post_store.clone();
            async move {
                let data = req
                    .json_data
                    .ok_or_else(|| HandlerError::BadPayload("missing json_data".into()))?;
                let id = data
                    .get("force_key")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
                store
                    .lock()
                    .insert((req.object_model_name, id.clone()), data.clone());
                ctx.respond(&json!({ "id": id, "object": data })).await
            }
        })
        .handle("put_json", move |req: ObjectRef, ctx: RequestContext| {
            let store = put_store.clone();
            async move {
                let (Some(id), Some(update)) = (req.object_id, req.json_data) else {
                    return Err(HandlerError::BadPayload("missing object_id or json_data".into()));
                };
                let updated = {
                    let mut objects = store.lock();
                    match objects.get_mut(&(req.object_model_name, id)) {
                        Some(Value::Object(existing)) => {
                            if let Value::Object(fields) = update {
                                existing.extend(fields);
                            }
                            Some(Value::Object(existing.clone()))
                        }
                        _ => None,
                    }
                };
                match updated {
                    Some(object) => ctx.respond(&object).await,
                    None => ctx.error("no such object").await,
                }
            }
        })
        .handle("get_datespots_near", |req: GeoQuery, ctx: RequestContext| async move {
            let radius = req.radius.unwrap_or(DEFAULT_RADIUS);
            let [lat, lon] = req.location;
            ctx.respond(&json!([
                {"name": "Tacos Tu Madre", "location": [lat + 0.001, lon], "radius": radius},
                {"name": "Westville", "location": [lat, lon - 0.002], "radius": radius},
            ]))
            .await
        })
        .handle("get_datespot_suggestions", |_req: Value, ctx: RequestContext| async move {
            ctx.respond(&json!([{"name": "Westville", "distance": 140.2}]))
                .await
        });

    write_stdout_line(&build_ready_message(&responder.ready_signal())?)?;
    tracing::info!("mock data layer ready");

    responder.serve_transport(transport).await?;
    Ok(())
}
