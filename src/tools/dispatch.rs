//! Tagged-variant decode of validated tool calls
//!
//! A call `{name, arguments}` is decoded into one [`AviOperation`] variant and
//! then turned into the single controller request that implements it.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::controller::ControllerRequest;
use crate::error::ValidationError;

/// HTTP method accepted by the generic operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
        }
    }
}

/// Resource types that carry analytics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    VirtualService,
    Pool,
    ServiceEngine,
}

impl ResourceKind {
    pub fn path(&self) -> &'static str {
        match self {
            ResourceKind::VirtualService => "virtualservice",
            ResourceKind::Pool => "pool",
            ResourceKind::ServiceEngine => "serviceengine",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum TimeRange {
    #[serde(rename = "1h")]
    Hour,
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "7d")]
    Week,
}

impl TimeRange {
    /// Sample step in seconds and number of samples covering the window
    pub fn step_and_limit(&self) -> (u32, u32) {
        match self {
            TimeRange::Hour => (300, 12),
            TimeRange::SixHours => (300, 72),
            TimeRange::Day => (3600, 24),
            TimeRange::Week => (86400, 7),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpAddr {
    pub addr: String,
    #[serde(rename = "type")]
    pub family: String,
}

/// Backend server of a pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRef {
    pub ip: IpAddr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

fn enabled_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_ssl: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VirtualServiceFilter {
    pub name: Option<String>,
    pub tenant: Option<String>,
    pub enabled: Option<bool>,
    pub fields: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PoolFilter {
    pub name: Option<String>,
    pub enabled: Option<bool>,
    pub health_status: Option<String>,
    pub fields: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HealthMonitorFilter {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub monitor_type: Option<String>,
    pub fields: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceEngineFilter {
    pub name: Option<String>,
    pub se_group_ref: Option<String>,
    pub fields: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Get {
    pub uuid: String,
    pub fields: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Delete {
    pub uuid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateVirtualService {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub services: Option<Vec<ServicePort>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vsvip_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateVirtualService {
    #[serde(skip_serializing)]
    pub uuid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub services: Option<Vec<ServicePort>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePool {
    pub name: String,
    #[serde(default)]
    pub servers: Vec<ServerRef>,
    pub default_server_port: u16,
    pub lb_algorithm: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePool {
    #[serde(skip_serializing)]
    pub uuid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub servers: Option<Vec<ServerRef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_server_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lb_algorithm: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScaleOut {
    pub uuid: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScaleIn {
    pub uuid: String,
    pub servers: Option<Vec<ServerRef>>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Analytics {
    pub resource_type: ResourceKind,
    pub uuid: String,
    pub metric: Option<String>,
    pub time_range: TimeRange,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GenericOperation {
    pub method: Method,
    pub endpoint: String,
    pub body: Option<Value>,
    pub parameters: Option<Map<String, Value>>,
}

/// A validated tool call, one variant per catalog entry
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "tool", content = "arguments", rename_all = "snake_case")]
pub enum AviOperation {
    ListVirtualServices(VirtualServiceFilter),
    GetVirtualService(Get),
    CreateVirtualService(CreateVirtualService),
    UpdateVirtualService(UpdateVirtualService),
    DeleteVirtualService(Delete),
    ListPools(PoolFilter),
    GetPool(Get),
    CreatePool(CreatePool),
    UpdatePool(UpdatePool),
    DeletePool(Delete),
    ScaleOutPool(ScaleOut),
    ScaleInPool(ScaleIn),
    ListHealthMonitors(HealthMonitorFilter),
    GetHealthMonitor(Get),
    ListServiceEngines(ServiceEngineFilter),
    GetServiceEngine(Get),
    GetAnalytics(Analytics),
    ExecuteGenericOperation(GenericOperation),
}

fn invalid(path: &str, reason: impl ToString) -> ValidationError {
    ValidationError::InvalidValue {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

fn to_body<T: Serialize>(value: &T) -> Result<Value, ValidationError> {
    serde_json::to_value(value).map_err(|e| invalid("arguments", e))
}

/// Build a query from optional filters, skipping absent ones
fn query(pairs: &[(&str, Option<String>)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .filter_map(|(k, v)| v.as_ref().map(|v| (k.to_string(), v.clone())))
        .collect()
}

fn fields_query(fields: &Option<String>) -> Vec<(String, String)> {
    query(&[("fields", fields.clone())])
}

fn item_path(collection: &str, uuid: &str) -> String {
    format!("/{}/{}", collection, urlencoding::encode(uuid))
}

/// Accept either a bare UUID or a controller reference path
fn object_ref(collection: &str, reference: &str) -> String {
    if reference.contains('/') {
        reference.to_string()
    } else {
        format!("/api{}", item_path(collection, reference))
    }
}

/// Keep generic operations inside the controller's API root
fn normalize_endpoint(endpoint: &str) -> Result<String, ValidationError> {
    let trimmed = endpoint.trim();
    if trimmed.is_empty() {
        return Err(invalid("endpoint", "must not be empty"));
    }
    if trimmed.contains("://") {
        return Err(invalid("endpoint", "must be a path relative to /api, not a URL"));
    }
    let path = trimmed.strip_prefix("/api/").map(|p| format!("/{}", p));
    let path = path.unwrap_or_else(|| {
        if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{}", trimmed)
        }
    });
    if path.split(['/', '?']).any(|segment| segment == "..") {
        return Err(invalid("endpoint", "must not contain `..` segments"));
    }
    Ok(path)
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl AviOperation {
    /// Decode validated arguments for the named tool
    pub fn decode(name: &str, arguments: Value) -> Result<Self, ValidationError> {
        serde_json::from_value(json!({ "tool": name, "arguments": arguments }))
            .map_err(|e| invalid("arguments", e))
    }

    /// Whether executing this operation can change controller state
    pub fn is_mutation(&self) -> bool {
        match self {
            AviOperation::ExecuteGenericOperation(op) => op.method != Method::Get,
            AviOperation::ListVirtualServices(_)
            | AviOperation::GetVirtualService(_)
            | AviOperation::ListPools(_)
            | AviOperation::GetPool(_)
            | AviOperation::ListHealthMonitors(_)
            | AviOperation::GetHealthMonitor(_)
            | AviOperation::ListServiceEngines(_)
            | AviOperation::GetServiceEngine(_)
            | AviOperation::GetAnalytics(_) => false,
            _ => true,
        }
    }

    /// The single controller request implementing this operation
    pub fn request(&self) -> Result<ControllerRequest, ValidationError> {
        let request = match self {
            AviOperation::ListVirtualServices(f) => {
                ControllerRequest::new(Method::Get, "/virtualservice").with_query(query(&[
                    ("name", f.name.clone()),
                    ("tenant", f.tenant.clone()),
                    ("enabled", f.enabled.map(|b| b.to_string())),
                    ("fields", f.fields.clone()),
                ]))
            }
            AviOperation::GetVirtualService(g) => {
                ControllerRequest::new(Method::Get, item_path("virtualservice", &g.uuid))
                    .with_query(fields_query(&g.fields))
            }
            AviOperation::CreateVirtualService(vs) => {
                let mut vs = vs.clone();
                vs.pool_ref = vs.pool_ref.map(|r| object_ref("pool", &r));
                vs.vsvip_ref = vs.vsvip_ref.map(|r| object_ref("vsvip", &r));
                ControllerRequest::new(Method::Post, "/virtualservice").with_body(to_body(&vs)?)
            }
            AviOperation::UpdateVirtualService(vs) => {
                ControllerRequest::new(Method::Patch, item_path("virtualservice", &vs.uuid))
                    .with_body(json!({ "replace": to_body(vs)? }))
            }
            AviOperation::DeleteVirtualService(d) => {
                ControllerRequest::new(Method::Delete, item_path("virtualservice", &d.uuid))
            }
            AviOperation::ListPools(f) => {
                ControllerRequest::new(Method::Get, "/pool").with_query(query(&[
                    ("name", f.name.clone()),
                    ("enabled", f.enabled.map(|b| b.to_string())),
                    ("health_status", f.health_status.clone()),
                    ("fields", f.fields.clone()),
                ]))
            }
            AviOperation::GetPool(g) => ControllerRequest::new(Method::Get, item_path("pool", &g.uuid))
                .with_query(fields_query(&g.fields)),
            AviOperation::CreatePool(pool) => {
                ControllerRequest::new(Method::Post, "/pool").with_body(to_body(pool)?)
            }
            AviOperation::UpdatePool(pool) => {
                ControllerRequest::new(Method::Patch, item_path("pool", &pool.uuid))
                    .with_body(json!({ "replace": to_body(pool)? }))
            }
            AviOperation::DeletePool(d) => {
                ControllerRequest::new(Method::Delete, item_path("pool", &d.uuid))
            }
            AviOperation::ScaleOutPool(s) => {
                ControllerRequest::new(Method::Post, format!("{}/scaleout", item_path("pool", &s.uuid)))
                    .with_body(json!({ "reason": s.reason }))
            }
            AviOperation::ScaleInPool(s) => {
                let mut body = json!({ "reason": s.reason });
                if let Some(servers) = &s.servers {
                    body["servers"] = to_body(servers)?;
                }
                ControllerRequest::new(Method::Post, format!("{}/scalein", item_path("pool", &s.uuid)))
                    .with_body(body)
            }
            AviOperation::ListHealthMonitors(f) => {
                ControllerRequest::new(Method::Get, "/healthmonitor").with_query(query(&[
                    ("name", f.name.clone()),
                    ("type", f.monitor_type.clone()),
                    ("fields", f.fields.clone()),
                ]))
            }
            AviOperation::GetHealthMonitor(g) => {
                ControllerRequest::new(Method::Get, item_path("healthmonitor", &g.uuid))
                    .with_query(fields_query(&g.fields))
            }
            AviOperation::ListServiceEngines(f) => {
                ControllerRequest::new(Method::Get, "/serviceengine").with_query(query(&[
                    ("name", f.name.clone()),
                    ("se_group_ref", f.se_group_ref.clone()),
                    ("fields", f.fields.clone()),
                ]))
            }
            AviOperation::GetServiceEngine(g) => {
                ControllerRequest::new(Method::Get, item_path("serviceengine", &g.uuid))
                    .with_query(fields_query(&g.fields))
            }
            AviOperation::GetAnalytics(a) => {
                let (step, limit) = a.time_range.step_and_limit();
                let path = format!(
                    "/analytics/metrics/{}",
                    item_path(a.resource_type.path(), &a.uuid).trim_start_matches('/')
                );
                ControllerRequest::new(Method::Get, path).with_query(query(&[
                    ("metric_id", a.metric.clone()),
                    ("step", Some(step.to_string())),
                    ("limit", Some(limit.to_string())),
                ]))
            }
            AviOperation::ExecuteGenericOperation(op) => {
                let path = normalize_endpoint(&op.endpoint)?;
                let query = op
                    .parameters
                    .iter()
                    .flatten()
                    .map(|(k, v)| (k.clone(), query_value(v)))
                    .collect();
                let mut request = ControllerRequest::new(op.method, path).with_query(query);
                if let Some(body) = &op.body {
                    request = request.with_body(body.clone());
                }
                request
            }
        };
        Ok(request)
    }
}
