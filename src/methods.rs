//! Data-layer method catalog and a typed client over the gateway.
//!
//! [`DataMethod`] names every operation the data layer serves.
//! [`DataLayerClient`] wraps a [`QueryGateway`] with one typed helper per
//! operation, so HTTP handlers never build payloads by hand.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::QueryError;
use crate::gateway::QueryGateway;

/// Default search radius for [`DataLayerClient::get_datespots_near`], in meters.
pub const DEFAULT_RADIUS: u32 = 2000;

/// Operations served by the data layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataMethod {
    /// Next profile for a user to swipe on.
    GetNextCandidate,
    /// Profile data for a logged-in user.
    GetLoginUserInfo,
    /// Record a swipe.
    PostSwipe,
    /// Create a stored object.
    PostObject,
    /// Fetch one stored object.
    GetJson,
    /// Fetch every object of one model.
    GetAllJson,
    /// Update a stored object.
    PutJson,
    /// Date spots around a location.
    GetDatespotsNear,
    /// Date spots suggested for a match.
    GetDatespotSuggestions,
}

impl DataMethod {
    /// Every method, in declaration order.
    pub const ALL: [DataMethod; 9] = [
        DataMethod::GetNextCandidate,
        DataMethod::GetLoginUserInfo,
        DataMethod::PostSwipe,
        DataMethod::PostObject,
        DataMethod::GetJson,
        DataMethod::GetAllJson,
        DataMethod::PutJson,
        DataMethod::GetDatespotsNear,
        DataMethod::GetDatespotSuggestions,
    ];

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            DataMethod::GetNextCandidate => "get_next_candidate",
            DataMethod::GetLoginUserInfo => "get_login_user_info",
            DataMethod::PostSwipe => "post_swipe",
            DataMethod::PostObject => "post_object",
            DataMethod::GetJson => "get_json",
            DataMethod::GetAllJson => "get_all_json",
            DataMethod::PutJson => "put_json",
            DataMethod::GetDatespotsNear => "get_datespots_near",
            DataMethod::GetDatespotSuggestions => "get_datespot_suggestions",
        }
    }
}

impl fmt::Display for DataMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataMethod {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataMethod::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| QueryError::UnsupportedMethod(s.to_string()))
    }
}

/// Stored object kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelName {
    User,
    Datespot,
    Match,
    Review,
    Message,
    Chat,
}

impl ModelName {
    /// Reviews and messages are append-only.
    pub fn is_updatable(self) -> bool {
        !matches!(self, ModelName::Review | ModelName::Message)
    }
}

/// Candidate profile as shown to another user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<String>,
    /// Remaining candidate-safe fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One swipe decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Swipe {
    pub user_id: String,
    pub candidate_id: String,
    /// `false` means "not interested".
    pub outcome: bool,
}

/// Result of [`DataLayerClient::post_swipe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwipeOutcome {
    /// True when the candidate had already liked the user.
    pub match_created: bool,
}

/// User-safe profile fields.
pub type UserProfile = Map<String, Value>;

#[derive(Serialize)]
struct UserRef<'a> {
    user_id: &'a str,
}

#[derive(Serialize)]
struct ObjectRef<'a> {
    object_model_name: ModelName,
    #[serde(skip_serializing_if = "Option::is_none")]
    object_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    json_data: Option<&'a Value>,
}

#[derive(Serialize)]
struct GeoQuery {
    location: [f64; 2],
    radius: u32,
}

#[derive(Serialize)]
struct MatchRef<'a> {
    match_id: &'a str,
}

/// Typed access to the data layer.
#[derive(Clone)]
pub struct DataLayerClient {
    gateway: QueryGateway,
    timeout: Duration,
}

impl DataLayerClient {
    /// Wrap `gateway`, using its default timeout.
    pub fn new(gateway: QueryGateway) -> Self {
        let timeout = gateway.default_timeout();
        Self { gateway, timeout }
    }

    /// Per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Underlying gateway.
    pub fn gateway(&self) -> &QueryGateway {
        &self.gateway
    }

    /// Next profile for `user_id` to swipe on.
    pub async fn get_next_candidate(&self, user_id: &str) -> Result<Candidate, QueryError> {
        self.call(DataMethod::GetNextCandidate, &UserRef { user_id })
            .await
    }

    /// Profile of a logged-in user. An unknown id is reported as
    /// [`QueryError::Remote`].
    pub async fn get_login_user_info(&self, user_id: &str) -> Result<UserProfile, QueryError> {
        self.call(DataMethod::GetLoginUserInfo, &UserRef { user_id })
            .await
    }

    /// Record a swipe.
    pub async fn post_swipe(&self, swipe: &Swipe) -> Result<SwipeOutcome, QueryError> {
        self.call(DataMethod::PostSwipe, swipe).await
    }

    /// Create an object. The data layer answers with the new user's profile
    /// when `model` is [`ModelName::User`].
    pub async fn post_object(&self, model: ModelName, data: &Value) -> Result<Value, QueryError> {
        let payload = ObjectRef {
            object_model_name: model,
            object_id: None,
            json_data: Some(data),
        };
        self.call(DataMethod::PostObject, &payload).await
    }

    /// Fetch one stored object.
    pub async fn get_json(&self, model: ModelName, object_id: &str) -> Result<Value, QueryError> {
        let payload = ObjectRef {
            object_model_name: model,
            object_id: Some(object_id),
            json_data: None,
        };
        self.call(DataMethod::GetJson, &payload).await
    }

    /// Fetch every stored object of `model`, keyed by id.
    pub async fn get_all_json(&self, model: ModelName) -> Result<Map<String, Value>, QueryError> {
        let payload = ObjectRef {
            object_model_name: model,
            object_id: None,
            json_data: None,
        };
        self.call(DataMethod::GetAllJson, &payload).await
    }

    /// Replace fields of a stored object.
    pub async fn put_json(
        &self,
        model: ModelName,
        object_id: &str,
        data: &Value,
    ) -> Result<Value, QueryError> {
        if !model.is_updatable() {
            return Err(QueryError::Protocol(format!(
                "{model:?} objects cannot be updated"
            )));
        }
        let payload = ObjectRef {
            object_model_name: model,
            object_id: Some(object_id),
            json_data: Some(data),
        };
        self.call(DataMethod::PutJson, &payload).await
    }

    /// Date spots within `radius` meters of `[lat, lon]`
    /// ([`DEFAULT_RADIUS`] when `None`).
    pub async fn get_datespots_near(
        &self,
        location: [f64; 2],
        radius: Option<u32>,
    ) -> Result<Vec<Value>, QueryError> {
        let payload = GeoQuery {
            location,
            radius: radius.unwrap_or(DEFAULT_RADIUS),
        };
        self.call(DataMethod::GetDatespotsNear, &payload).await
    }

    /// Date spots suggested for a match, nearest to its midpoint first.
    pub async fn get_datespot_suggestions(&self, match_id: &str) -> Result<Vec<Value>, QueryError> {
        self.call(DataMethod::GetDatespotSuggestions, &MatchRef { match_id })
            .await
    }

    async fn call<T, P>(&self, method: DataMethod, payload: &P) -> Result<T, QueryError>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        let response = self
            .gateway
            .query(method.as_str(), payload, self.timeout)
            .await?;

        if let Some(message) = embedded_error(&response.payload) {
            return Err(QueryError::Remote {
                id: response.id,
                message,
            });
        }
        response.into_payload()
    }
}

/// Some operations answer failures in-band as `{"error": "..."}`.
fn embedded_error(payload: &Value) -> Option<String> {
    let map = payload.as_object()?;
    if map.len() != 1 {
        return None;
    }
    map.get("error").and_then(Value::as_str).map(str::to_string)
}
