//! Adapter para a Docker Engine API (HTTP)

use super::{
    build_client, check_logs_kind, read_bytes, read_json, read_optional_json, transport_error,
    unsupported_action, unsupported_kind, ActionOutcome, BackendAdapter, RawStream, TlsMaterial,
};
use crate::config::EngineConnection;
use crate::error::{CoreError, CoreResult};
use crate::model::{Action, ActionParams, BackendKind, LogOptions, ResourceKind, ScopeFilter};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::try_join;
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs;
use std::time::Duration;
use tracing::debug;

pub struct EngineAdapter {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl std::fmt::Debug for EngineAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineAdapter")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl EngineAdapter {
    pub fn new(conn: &EngineConnection) -> CoreResult<Self> {
        let timeout = Duration::from_secs(conn.timeout_secs.max(1));
        let tls = load_tls(conn)?;
        let base_url = base_url(conn)?;
        let client = build_client(timeout, &tls)?;
        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
        context: &str,
    ) -> CoreResult<reqwest::Response> {
        let mut request = self.client.request(method, self.url(path)).query(query);
        if let Some(body) = body {
            request = request.json(body);
        }
        request
            .send()
            .await
            .map_err(|e| transport_error(e, context, self.timeout))
    }

    /// Executa uma chamada cujo corpo de sucesso é irrelevante.
    /// 304 (já iniciado/parado) conta como sucesso.
    async fn call(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        context: &str,
    ) -> CoreResult<ActionOutcome> {
        let response = self.send(method, path, query, None, context).await?;
        if response.status() == StatusCode::NOT_MODIFIED {
            debug!(context, "engine respondeu 304, nada a fazer");
            return Ok(ActionOutcome::empty());
        }
        read_json(response, context, self.timeout).await?;
        Ok(ActionOutcome::empty())
    }

    async fn get_json(&self, path: &str, context: &str) -> CoreResult<Value> {
        let response = self.send(Method::GET, path, &[], None, context).await?;
        read_json(response, context, self.timeout).await
    }

    async fn create(
        &self,
        kind: ResourceKind,
        id: &str,
        params: &ActionParams,
    ) -> CoreResult<ActionOutcome> {
        let context = format!("criar {kind} '{id}'");
        match kind {
            ResourceKind::Container => {
                let body = params.body.clone().unwrap_or_else(|| {
                    json!({
                        "Image": params.image.clone().unwrap_or_default(),
                        "Labels": params.labels,
                    })
                });
                if body.get("Image").and_then(Value::as_str).unwrap_or("").is_empty() {
                    return Err(CoreError::validation(format!("{context}: imagem obrigatória")));
                }
                let response = self
                    .send(
                        Method::POST,
                        "/containers/create",
                        &[("name", id.to_string())],
                        Some(&body),
                        &context,
                    )
                    .await?;
                let raw = read_json(response, &context, self.timeout).await?;
                Ok(outcome_from(raw, "Id"))
            }
            ResourceKind::Image => {
                let reference = params.image.clone().unwrap_or_else(|| id.to_string());
                let (image, tag) = split_reference(&reference);
                let response = self
                    .send(
                        Method::POST,
                        "/images/create",
                        &[("fromImage", image), ("tag", tag)],
                        None,
                        &context,
                    )
                    .await?;
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .map_err(|e| transport_error(e, &context, self.timeout))?;
                if !status.is_success() {
                    return Err(super::error_for_status(status, &context, &body));
                }
                // O pull devolve progresso em JSON por linha; erros vêm embutidos
                if let Some(message) = pull_error(&body) {
                    return Err(CoreError::classify(format!("{context}: {message}")));
                }
                Ok(ActionOutcome::with_id(reference))
            }
            ResourceKind::Network => {
                let mut body = params.body.clone().unwrap_or_else(|| json!({}));
                merge_name_and_labels(&mut body, id, &params.labels);
                let response = self
                    .send(Method::POST, "/networks/create", &[], Some(&body), &context)
                    .await?;
                let raw = read_json(response, &context, self.timeout).await?;
                Ok(outcome_from(raw, "Id"))
            }
            ResourceKind::Volume => {
                let mut body = params.body.clone().unwrap_or_else(|| json!({}));
                merge_name_and_labels(&mut body, id, &params.labels);
                let response = self
                    .send(Method::POST, "/volumes/create", &[], Some(&body), &context)
                    .await?;
                let raw = read_json(response, &context, self.timeout).await?;
                Ok(outcome_from(raw, "Name"))
            }
            other => Err(unsupported_kind(BackendKind::Engine, other)),
        }
    }
}

#[async_trait]
impl BackendAdapter for EngineAdapter {
    fn backend_kind(&self) -> BackendKind {
        BackendKind::Engine
    }

    fn list_resources(&self, kind: ResourceKind, scope: &ScopeFilter) -> RawStream {
        if !self.supports(kind) {
            let err = unsupported_kind(BackendKind::Engine, kind);
            return stream::once(async move { Err(err) }).boxed();
        }

        let client = self.client.clone();
        let url = self.url(list_path(kind));
        let timeout = self.timeout;
        let mut query = vec![("filters", label_filters(&scope.labels))];
        if kind == ResourceKind::Container {
            query.push(("all", scope.include_stopped.to_string()));
        }

        let fetch = async move {
            let context = format!("listar {kind}");
            let response = client
                .get(&url)
                .query(&query)
                .send()
                .await
                .map_err(|e| transport_error(e, &context, timeout))?;
            let body = read_json(response, &context, timeout).await?;
            Ok::<_, CoreError>(list_items(kind, body))
        };

        stream::once(fetch)
            .map_ok(|items| stream::iter(items.into_iter().map(Ok::<Value, CoreError>)))
            .try_flatten()
            .boxed()
    }

    async fn perform_action(
        &self,
        kind: ResourceKind,
        id: &str,
        action: Action,
        params: &ActionParams,
    ) -> CoreResult<ActionOutcome> {
        if !self.supports(kind) {
            return Err(unsupported_kind(BackendKind::Engine, kind));
        }
        if action == Action::Create {
            return self.create(kind, id, params).await;
        }

        let context = format!("{action} {kind} '{id}'");
        let grace = params
            .grace_period_secs
            .map(|t| vec![("t", t.to_string())])
            .unwrap_or_default();
        let force = vec![("force", params.force.to_string())];

        match (kind, action) {
            (ResourceKind::Container, Action::Start) => {
                self.call(Method::POST, &format!("/containers/{id}/start"), &[], &context)
                    .await
            }
            (ResourceKind::Container, Action::Stop) => {
                self.call(Method::POST, &format!("/containers/{id}/stop"), &grace, &context)
                    .await
            }
            (ResourceKind::Container, Action::Restart) => {
                self.call(Method::POST, &format!("/containers/{id}/restart"), &grace, &context)
                    .await
            }
            (ResourceKind::Container, Action::Pause) => {
                self.call(Method::POST, &format!("/containers/{id}/pause"), &[], &context)
                    .await
            }
            (ResourceKind::Container, Action::Unpause) => {
                self.call(Method::POST, &format!("/containers/{id}/unpause"), &[], &context)
                    .await
            }
            (ResourceKind::Container, Action::Delete) => {
                self.call(Method::DELETE, &format!("/containers/{id}"), &force, &context)
                    .await
            }
            (ResourceKind::Image, Action::Delete) => {
                self.call(Method::DELETE, &format!("/images/{id}"), &force, &context)
                    .await
            }
            (ResourceKind::Network, Action::Delete) => {
                self.call(Method::DELETE, &format!("/networks/{id}"), &[], &context)
                    .await
            }
            (ResourceKind::Volume, Action::Delete) => {
                self.call(Method::DELETE, &format!("/volumes/{id}"), &force, &context)
                    .await
            }
            (kind, action) => Err(unsupported_action(kind, action)),
        }
    }

    async fn describe(
        &self,
        kind: ResourceKind,
        id: &str,
        _namespace: Option<&str>,
    ) -> CoreResult<Option<Value>> {
        let context = format!("consultar {kind} '{id}'");
        match kind {
            ResourceKind::Container => {
                // A inspeção resolve id completo, prefixo de id ou nome
                let response = self
                    .send(Method::GET, &format!("/containers/{id}/json"), &[], None, &context)
                    .await?;
                read_optional_json(response, &context, self.timeout).await
            }
            ResourceKind::Image => {
                let response = self
                    .send(Method::GET, &format!("/images/{id}/json"), &[], None, &context)
                    .await?;
                read_optional_json(response, &context, self.timeout).await
            }
            ResourceKind::Network => {
                let response = self
                    .send(Method::GET, &format!("/networks/{id}"), &[], None, &context)
                    .await?;
                read_optional_json(response, &context, self.timeout).await
            }
            ResourceKind::Volume => {
                let response = self
                    .send(Method::GET, &format!("/volumes/{id}"), &[], None, &context)
                    .await?;
                read_optional_json(response, &context, self.timeout).await
            }
            other => Err(unsupported_kind(BackendKind::Engine, other)),
        }
    }

    async fn logs(
        &self,
        kind: ResourceKind,
        id: &str,
        _namespace: Option<&str>,
        options: &LogOptions,
    ) -> CoreResult<String> {
        check_logs_kind(BackendKind::Engine, kind)?;
        let context = format!("logs do container '{id}'");
        let mut query = vec![
            ("stdout", "true".to_string()),
            ("stderr", "true".to_string()),
            ("timestamps", options.timestamps.to_string()),
            (
                "tail",
                options.tail.map(|n| n.to_string()).unwrap_or_else(|| "all".to_string()),
            ),
        ];
        if let Some(secs) = options.since_secs {
            let since = Utc::now().timestamp() - secs.min(i64::MAX as u64) as i64;
            query.push(("since", since.max(0).to_string()));
        }
        let response = self
            .send(Method::GET, &format!("/containers/{id}/logs"), &query, None, &context)
            .await?;
        let body = read_bytes(response, &context, self.timeout).await?;
        Ok(demux_logs(&body))
    }

    async fn system_info(&self) -> CoreResult<Value> {
        let context = "consultar informações do engine";
        let (info, version) =
            try_join(self.get_json("/info", context), self.get_json("/version", context)).await?;
        Ok(json!({ "info": info, "version": version }))
    }

    async fn health_check(&self) -> bool {
        match self.client.get(self.url("/_ping")).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(base_url = %self.base_url, error = %e, "ping do engine falhou");
                false
            }
        }
    }
}

/// Traduz o endpoint configurado em URL base HTTP(S).
fn base_url(conn: &EngineConnection) -> CoreResult<String> {
    let endpoint = conn.endpoint.trim().trim_end_matches('/');
    let scheme = if conn.tls.is_some() { "https" } else { "http" };
    let root = if let Some(rest) = endpoint.strip_prefix("tcp://") {
        format!("{scheme}://{rest}")
    } else if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else if endpoint.starts_with("unix://") || endpoint.starts_with("npipe://") {
        return Err(CoreError::validation(format!(
            "endpoint '{endpoint}' não suportado: exponha o engine via tcp:// ou https://"
        )));
    } else {
        return Err(CoreError::validation(format!(
            "endpoint de engine inválido: '{endpoint}'"
        )));
    };
    Ok(match &conn.api_version {
        Some(version) => format!("{root}/v{}", version.trim_start_matches('v')),
        None => root,
    })
}

fn load_tls(conn: &EngineConnection) -> CoreResult<TlsMaterial> {
    let Some(files) = &conn.tls else {
        return Ok(TlsMaterial::default());
    };
    let read = |path: &std::path::Path| {
        fs::read(path).map_err(|e| {
            CoreError::validation(format!("falha ao ler '{}': {e}", path.display()))
        })
    };

    let ca_pem = files.ca_cert.as_deref().map(read).transpose()?;
    let identity_pem = match (&files.client_cert, &files.client_key) {
        (Some(cert), Some(key)) => {
            let mut pem = read(cert)?;
            pem.push(b'\n');
            pem.extend(read(key)?);
            Some(pem)
        }
        (None, None) => None,
        _ => {
            return Err(CoreError::validation(
                "tls.client_cert e tls.client_key devem ser informados juntos",
            ))
        }
    };

    Ok(TlsMaterial {
        ca_pem,
        identity_pem,
        insecure_skip_verify: files.insecure_skip_verify,
    })
}

fn list_path(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Image => "/images/json",
        ResourceKind::Network => "/networks",
        ResourceKind::Volume => "/volumes",
        _ => "/containers/json",
    }
}

/// `filters={"label":["k=v"]}`, formato da Engine API
fn label_filters(labels: &BTreeMap<String, String>) -> String {
    let values: Vec<String> = labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
    if values.is_empty() {
        return "{}".to_string();
    }
    json!({ "label": values }).to_string()
}

/// Volumes vêm embrulhados em `{"Volumes": [...]}`; o resto é um array.
fn list_items(kind: ResourceKind, body: Value) -> Vec<Value> {
    let body = match kind {
        ResourceKind::Volume => body.get("Volumes").cloned().unwrap_or(Value::Null),
        _ => body,
    };
    match body {
        Value::Array(items) => items,
        _ => Vec::new(),
    }
}

/// Sem TTY o engine multiplexa stdout e stderr em quadros com cabeçalho
/// de 8 bytes: `[stream, 0, 0, 0, tamanho u32 big-endian]`.
fn demux_logs(body: &[u8]) -> String {
    let framed = body.len() >= 8 && body[0] <= 2 && body[1..4] == [0, 0, 0];
    if !framed {
        return String::from_utf8_lossy(body).into_owned();
    }
    let mut out = Vec::with_capacity(body.len());
    let mut rest = body;
    while rest.len() >= 8 {
        let size = u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
        let end = 8usize.saturating_add(size).min(rest.len());
        out.extend_from_slice(&rest[8..end]);
        rest = &rest[end..];
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn outcome_from(raw: Value, field: &str) -> ActionOutcome {
    ActionOutcome {
        id: raw.get(field).and_then(Value::as_str).map(str::to_string),
        raw: Some(raw),
    }
}

fn merge_name_and_labels(body: &mut Value, name: &str, labels: &BTreeMap<String, String>) {
    if let Value::Object(map) = body {
        map.entry("Name").or_insert_with(|| json!(name));
        if !labels.is_empty() {
            map.entry("Labels").or_insert_with(|| json!(labels));
        }
    }
}

/// `nginx:1.25` → (`nginx`, `1.25`); sem tag usa `latest`.
/// Registries com porta (`host:5000/app`) não são confundidos com tag.
fn split_reference(reference: &str) -> (String, String) {
    if reference.contains('@') {
        return (reference.to_string(), String::new());
    }
    match reference.rsplit_once(':') {
        Some((image, tag)) if !tag.contains('/') => (image.to_string(), tag.to_string()),
        _ => (reference.to_string(), "latest".to_string()),
    }
}

fn pull_error(body: &str) -> Option<String> {
    body.lines()
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .find_map(|v| {
            v.get("error")
                .or_else(|| v.get("errorDetail").and_then(|d| d.get("message")))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
}
