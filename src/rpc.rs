//! Worker RPC boundary
//!
//! The vocabulary graph and a crate context can live in a separate task
//! that is reached only by messages. A request names the operation and
//! carries positional JSON arguments plus a nonce; the response echoes the
//! nonce with either `data` or `error`. `__health` is always answered with
//! `{ "data": true }`. A call that panics in the worker is answered with an
//! error so the caller never waits forever.

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::client::{LocalClient, VocabularyClient};
use crate::context::CrateContextResolver;
use crate::engine::{panic_message, ValidationContext, ValidationEngine, ValidationReport};
use crate::error::{Result, ValidateError};
use crate::graph::VocabularyGraph;
use crate::node::VocabularyNode;

/// Reserved operation name for health checks
pub const HEALTH_CHECK: &str = "__health";

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub name: String,
    #[serde(default)]
    pub args: Vec<Value>,
    pub nonce: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub nonce: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl RpcResponse {
    fn ok(nonce: String, data: Value) -> Self {
        Self {
            nonce,
            data: Some(data),
            error: None,
        }
    }

    fn err(nonce: String, error: &ValidateError) -> Self {
        Self {
            nonce,
            data: None,
            error: Some(error_to_json(error)),
        }
    }
}

/// Outcome of `setupContext` as seen across the boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextStatus {
    pub specification: Option<String>,
    pub using_fallback: bool,
    pub errors: Vec<String>,
}

impl From<&CrateContextResolver> for ContextStatus {
    fn from(resolver: &CrateContextResolver) -> Self {
        Self {
            specification: resolver.specification().map(String::from),
            using_fallback: resolver.using_fallback(),
            errors: resolver.errors().to_vec(),
        }
    }
}

fn error_to_json(error: &ValidateError) -> Value {
    match error {
        ValidateError::UnsupportedNamespace(iri) => json!({"kind": "unsupportedNamespace", "iri": iri}),
        ValidateError::NotAClass(iri) => json!({"kind": "notAClass", "iri": iri}),
        other => json!({"kind": "other", "message": other.to_string()}),
    }
}

fn error_from_json(value: &Value) -> ValidateError {
    let field = |name: &str| value.get(name).and_then(|v| v.as_str()).unwrap_or_default().to_string();
    match value.get("kind").and_then(|k| k.as_str()) {
        Some("unsupportedNamespace") => ValidateError::UnsupportedNamespace(field("iri")),
        Some("notAClass") => ValidateError::NotAClass(field("iri")),
        Some(_) => ValidateError::Rpc(field("message")),
        None => ValidateError::Rpc(value.to_string()),
    }
}

fn str_arg<'a>(args: &'a [Value], index: usize, name: &str) -> Result<&'a str> {
    args.get(index)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ValidateError::Rpc(format!("{}: argument {} must be a string", name, index)))
}

/// Serves requests against a graph and one crate context
pub struct WorkerService {
    vocabulary: LocalClient,
    context: Mutex<CrateContextResolver>,
}

impl WorkerService {
    pub fn new(graph: Arc<VocabularyGraph>, context: CrateContextResolver) -> Self {
        Self {
            vocabulary: LocalClient::new(graph),
            context: Mutex::new(context),
        }
    }

    pub async fn handle(&self, request: RpcRequest) -> RpcResponse {
        let RpcRequest { name, args, nonce } = request;
        if name == HEALTH_CHECK {
            return RpcResponse::ok(nonce, Value::Bool(true));
        }
        match self.dispatch(&name, &args).await {
            Ok(data) => RpcResponse::ok(nonce, data),
            Err(e) => {
                debug!(name = %name, error = %e, "worker call failed");
                RpcResponse::err(nonce, &e)
            }
        }
    }

    async fn dispatch(&self, name: &str, args: &[Value]) -> Result<Value> {
        let v = &self.vocabulary;
        let data = match name {
            "getNode" => {
                let node = v.get_node(str_arg(args, 0, name)?).await?;
                node.map(|n| n.to_json()).unwrap_or(Value::Null)
            }
            "getClassParents" => json!(v.get_class_parents(str_arg(args, 0, name)?).await?),
            "getSubClasses" => json!(v.get_sub_classes(str_arg(args, 0, name)?).await?),
            "getSubProperties" => json!(v.get_sub_properties(str_arg(args, 0, name)?).await?),
            "getClassSpecificProperties" => {
                json!(v.get_class_specific_properties(str_arg(args, 0, name)?).await?)
            }
            "getClassProperties" => json!(v.get_class_properties(str_arg(args, 0, name)?).await?),
            "isPropertyOfClass" => json!(
                v.is_property_of_class(str_arg(args, 0, name)?, str_arg(args, 1, name)?)
                    .await?
            ),
            "forceLoad" => {
                v.graph().force_load(str_arg(args, 0, name)?).await?;
                Value::Null
            }
            "setupContext" => {
                let raw = args.first().cloned().unwrap_or(Value::Null);
                let mut context = self.context.lock();
                context.update(&raw);
                serde_json::to_value(ContextStatus::from(&*context))?
            }
            "validate" => {
                let document = args
                    .first()
                    .cloned()
                    .ok_or_else(|| ValidateError::Rpc("validate: missing crate document".to_string()))?;
                let fallback = match args.get(1).and_then(|v| v.as_str()) {
                    Some(version) => version.to_string(),
                    None => self.context.lock().fallback_specification().to_string(),
                };
                let client: Arc<dyn VocabularyClient> = Arc::new(LocalClient::new(v.graph().clone()));
                let ctx = ValidationContext::new(document, client, &fallback);
                let report = ValidationEngine::default().validate(&ctx).await;
                serde_json::to_value(report)?
            }
            "resolve" => json!(self.context.lock().resolve(str_arg(args, 0, name)?)),
            "reverse" => json!(self.context.lock().reverse(str_arg(args, 0, name)?)),
            other => return Err(ValidateError::Rpc(format!("unknown function '{}'", other))),
        };
        Ok(data)
    }
}

/// Handle for starting worker tasks
pub struct Worker;

impl Worker {
    /// Serve `graph` with a fresh crate context
    pub fn spawn(graph: Arc<VocabularyGraph>) -> WorkerClient {
        Self::spawn_service(WorkerService::new(graph, CrateContextResolver::default()))
    }

    /// Spawn the worker task and return a client connected to it
    ///
    /// The worker stops once every clone of the returned client is dropped.
    pub fn spawn_service(service: WorkerService) -> WorkerClient {
        spawn_tasks(service)
    }
}

fn spawn_tasks(service: WorkerService) -> WorkerClient {
    let (request_tx, mut request_rx) = mpsc::channel::<RpcRequest>(CHANNEL_CAPACITY);
    let (response_tx, mut response_rx) = mpsc::channel::<RpcResponse>(CHANNEL_CAPACITY);
    let pending: Arc<Mutex<HashMap<String, oneshot::Sender<RpcResponse>>>> = Arc::default();

    let service = Arc::new(service);
    tokio::spawn(async move {
        while let Some(request) = request_rx.recv().await {
            let service = service.clone();
            let response_tx = response_tx.clone();
            tokio::spawn(async move {
                let nonce = request.nonce.clone();
                let name = request.name.clone();
                let response = match AssertUnwindSafe(service.handle(request)).catch_unwind().await {
                    Ok(response) => response,
                    Err(payload) => {
                        let reason = panic_message(payload.as_ref());
                        warn!(name = %name, "worker call {}", reason);
                        RpcResponse::err(nonce, &ValidateError::Rpc(format!("'{}' {}", name, reason)))
                    }
                };
                let _ = response_tx.send(response).await;
            });
        }
    });

    let dispatch_pending = pending.clone();
    tokio::spawn(async move {
        while let Some(response) = response_rx.recv().await {
            match dispatch_pending.lock().remove(&response.nonce) {
                Some(waiter) => {
                    let _ = waiter.send(response);
                }
                None => warn!(nonce = %response.nonce, "response for unknown request"),
            }
        }
    });

    WorkerClient {
        requests: request_tx,
        pending,
    }
}

/// Message-passing client correlating responses by nonce
#[derive(Clone)]
pub struct WorkerClient {
    requests: mpsc::Sender<RpcRequest>,
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<RpcResponse>>>>,
}

impl WorkerClient {
    pub async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        let nonce = Ulid::new().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(nonce.clone(), tx);

        let request = RpcRequest {
            name: name.to_string(),
            args,
            nonce: nonce.clone(),
        };
        if self.requests.send(request).await.is_err() {
            self.pending.lock().remove(&nonce);
            return Err(ValidateError::Rpc("worker is not running".to_string()));
        }

        let response = rx
            .await
            .map_err(|_| ValidateError::Rpc(format!("worker dropped request '{}'", name)))?;
        match response.error {
            Some(error) => Err(error_from_json(&error)),
            None => Ok(response.data.unwrap_or(Value::Null)),
        }
    }

    pub async fn health_check(&self) -> bool {
        matches!(self.call(HEALTH_CHECK, vec![]).await, Ok(Value::Bool(true)))
    }

    pub async fn setup_context(&self, raw: &Value) -> Result<ContextStatus> {
        let data = self.call("setupContext", vec![raw.clone()]).await?;
        Ok(serde_json::from_value(data)?)
    }

    pub async fn resolve(&self, term: &str) -> Result<Option<String>> {
        let data = self.call("resolve", vec![json!(term)]).await?;
        Ok(data.as_str().map(String::from))
    }

    pub async fn reverse(&self, iri: &str) -> Result<Option<String>> {
        let data = self.call("reverse", vec![json!(iri)]).await?;
        Ok(data.as_str().map(String::from))
    }

    pub async fn force_load(&self, source_id: &str) -> Result<()> {
        self.call("forceLoad", vec![json!(source_id)]).await.map(|_| ())
    }

    /// Run a full validation pass inside the worker
    ///
    /// The worker has no storage backend, so file checks do not run.
    pub async fn validate(&self, document: &Value, fallback: Option<&str>) -> Result<ValidationReport> {
        let mut args = vec![document.clone()];
        if let Some(version) = fallback {
            args.push(json!(version));
        }
        Ok(serde_json::from_value(self.call("validate", args).await?)?)
    }

    async fn call_strings(&self, name: &str, args: Vec<Value>) -> Result<Vec<String>> {
        Ok(serde_json::from_value(self.call(name, args).await?)?)
    }
}

#[async_trait]
impl VocabularyClient for WorkerClient {
    async fn get_node(&self, id: &str) -> Result<Option<Arc<VocabularyNode>>> {
        match self.call("getNode", vec![json!(id)]).await? {
            Value::Null => Ok(None),
            value => Ok(Some(Arc::new(VocabularyNode::from_expanded(&value)?))),
        }
    }

    async fn get_class_parents(&self, id: &str) -> Result<Vec<String>> {
        self.call_strings("getClassParents", vec![json!(id)]).await
    }

    async fn get_sub_classes(&self, id: &str) -> Result<Vec<String>> {
        self.call_strings("getSubClasses", vec![json!(id)]).await
    }

    async fn get_sub_properties(&self, id: &str) -> Result<Vec<String>> {
        self.call_strings("getSubProperties", vec![json!(id)]).await
    }

    async fn get_class_specific_properties(&self, class_id: &str) -> Result<Vec<String>> {
        self.call_strings("getClassSpecificProperties", vec![json!(class_id)])
            .await
    }

    async fn get_class_properties(&self, class_id: &str) -> Result<Vec<String>> {
        self.call_strings("getClassProperties", vec![json!(class_id)]).await
    }

    async fn is_property_of_class(&self, property_id: &str, class_id: &str) -> Result<bool> {
        let data = self
            .call("isPropertyOfClass", vec![json!(property_id), json!(class_id)])
            .await?;
        data.as_bool()
            .ok_or_else(|| ValidateError::Rpc("isPropertyOfClass returned a non-boolean".to_string()))
    }
}
