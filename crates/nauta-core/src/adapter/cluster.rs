//! Adapter para a API do Kubernetes (HTTP + JSON)

use super::{
    build_client, check_logs_kind, read_bytes, read_json, read_optional_json, transport_error,
    unsupported_action, unsupported_kind, ActionOutcome, BackendAdapter, RawStream, TlsMaterial,
};
use crate::config::ClusterConnection;
use crate::error::{CoreError, CoreResult};
use crate::model::{Action, ActionParams, BackendKind, LogOptions, ResourceKind, ScopeFilter};
use async_trait::async_trait;
use base64::Engine as _;
use chrono::Utc;
use futures::future::try_join3;
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
const MERGE_PATCH: &str = "application/merge-patch+json";
const RESTARTED_AT: &str = "kubectl.kubernetes.io/restartedAt";
const DEFAULT_NAMESPACE: &str = "default";

/// Credenciais já resolvidas (explícitas, kubeconfig ou in-cluster)
#[derive(Default)]
pub(crate) struct Credentials {
    pub server: String,
    pub token: Option<String>,
    pub namespace: Option<String>,
    pub tls: TlsMaterial,
}

pub struct ClusterAdapter {
    client: reqwest::Client,
    server: String,
    token: Option<String>,
    namespace: String,
    page_size: u32,
    timeout: Duration,
}

impl std::fmt::Debug for ClusterAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterAdapter")
            .field("server", &self.server)
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl ClusterAdapter {
    pub fn new(conn: &ClusterConnection) -> CoreResult<Self> {
        let timeout = Duration::from_secs(conn.timeout_secs.max(1));
        let creds = resolve_credentials(conn)?;
        let client = build_client(timeout, &creds.tls)?;
        // Namespace explícito na configuração vence o do kubeconfig
        let namespace = conn
            .namespace
            .clone()
            .or(creds.namespace)
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        Ok(Self {
            client,
            server: creds.server.trim_end_matches('/').to_string(),
            token: creds.token,
            namespace,
            page_size: conn.page_size.max(1),
            timeout,
        })
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.request(method, format!("{}{}", self.server, path));
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
        context: &str,
    ) -> CoreResult<Value> {
        let response = request
            .send()
            .await
            .map_err(|e| transport_error(e, context, self.timeout))?;
        read_json(response, context, self.timeout).await
    }

    async fn get_json(&self, path: &str, context: &str) -> CoreResult<Value> {
        self.execute(self.request(Method::GET, path), context).await
    }

    async fn get_items(&self, path: &str, context: &str) -> CoreResult<Vec<Value>> {
        let body = self.get_json(path, context).await?;
        Ok(items_of(body))
    }

    fn namespace_for<'a>(&'a self, kind: ResourceKind, namespace: Option<&'a str>) -> Option<&'a str> {
        if kind.is_namespaced() {
            Some(namespace.unwrap_or(&self.namespace))
        } else {
            None
        }
    }

    async fn create(
        &self,
        kind: ResourceKind,
        name: &str,
        namespace: Option<&str>,
        params: &ActionParams,
    ) -> CoreResult<ActionOutcome> {
        let context = format!("criar {kind} '{name}'");
        let body = match &params.body {
            Some(body) => body.clone(),
            None => default_manifest(kind, name, params)?,
        };
        let path = collection_path(kind, namespace)?;
        let raw = self
            .execute(self.request(Method::POST, &path).json(&body), &context)
            .await?;
        let id = raw
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .unwrap_or(name)
            .to_string();
        Ok(ActionOutcome {
            id: Some(id),
            raw: Some(raw),
        })
    }

    async fn patch(&self, path: &str, patch: &Value, context: &str) -> CoreResult<Value> {
        let request = self
            .request(Method::PATCH, path)
            .header(CONTENT_TYPE, MERGE_PATCH)
            .body(patch.to_string());
        self.execute(request, context).await
    }
}

#[async_trait]
impl BackendAdapter for ClusterAdapter {
    fn backend_kind(&self) -> BackendKind {
        BackendKind::Cluster
    }

    fn default_namespace(&self) -> Option<String> {
        Some(self.namespace.clone())
    }

    fn list_resources(&self, kind: ResourceKind, scope: &ScopeFilter) -> RawStream {
        let namespace = if scope.all_namespaces {
            None
        } else {
            self.namespace_for(kind, scope.namespace.as_deref())
        };
        let url = match collection_path(kind, namespace) {
            Ok(path) => format!("{}{}", self.server, path),
            Err(err) => return stream::once(async move { Err(err) }).boxed(),
        };

        let client = self.client.clone();
        let token = self.token.clone();
        let timeout = self.timeout;
        let mut base_query = vec![("limit", self.page_size.to_string())];
        if let Some(selector) = scope.label_selector() {
            base_query.push(("labelSelector", selector));
        }

        // Estado: Some(continue) enquanto houver página a buscar
        let start: Option<Option<String>> = Some(None);
        stream::try_unfold(start, move |state| {
            let client = client.clone();
            let token = token.clone();
            let url = url.clone();
            let mut query = base_query.clone();
            async move {
                let Some(cursor) = state else {
                    return Ok::<_, CoreError>(None);
                };
                if let Some(cursor) = cursor {
                    query.push(("continue", cursor));
                }
                let context = format!("listar {kind}");
                let mut request = client.get(&url).query(&query);
                if let Some(token) = &token {
                    request = request.bearer_auth(token);
                }
                let response = request
                    .send()
                    .await
                    .map_err(|e| transport_error(e, &context, timeout))?;
                let body = read_json(response, &context, timeout).await?;
                let items = body
                    .get("items")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let next = body
                    .pointer("/metadata/continue")
                    .and_then(Value::as_str)
                    .filter(|c| !c.is_empty())
                    .map(str::to_string);
                Ok(Some((items, next.map(Some))))
            }
        })
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
            return Err(unsupported_kind(BackendKind::Cluster, kind));
        }
        let namespace = self.namespace_for(kind, params.namespace.as_deref());
        let context = format!("{action} {kind} '{id}'");

        match (kind, action) {
            (_, Action::Create) => self.create(kind, id, namespace, params).await,
            (_, Action::Delete) => {
                let path = item_path(kind, namespace, id)?;
                let mut request = self.request(Method::DELETE, &path);
                if let Some(grace) = params.grace_period_secs {
                    request = request.query(&[("gracePeriodSeconds", grace.to_string())]);
                }
                let raw = self.execute(request, &context).await?;
                Ok(ActionOutcome {
                    id: Some(id.to_string()),
                    raw: Some(raw),
                })
            }
            (ResourceKind::Deployment, Action::Scale) => {
                let replicas = params.replicas.ok_or_else(|| {
                    CoreError::validation(format!("{context}: número de réplicas obrigatório"))
                })?;
                let path = format!("{}/scale", item_path(kind, namespace, id)?);
                let raw = self
                    .patch(&path, &json!({ "spec": { "replicas": replicas } }), &context)
                    .await?;
                Ok(ActionOutcome {
                    id: Some(id.to_string()),
                    raw: Some(raw),
                })
            }
            (ResourceKind::Deployment, Action::Restart) => {
                let path = item_path(kind, namespace, id)?;
                let patch = json!({
                    "spec": { "template": { "metadata": { "annotations": {
                        RESTARTED_AT: Utc::now().to_rfc3339()
                    } } } }
                });
                let raw = self.patch(&path, &patch, &context).await?;
                Ok(ActionOutcome {
                    id: Some(id.to_string()),
                    raw: Some(raw),
                })
            }
            (kind, action) => Err(unsupported_action(kind, action)),
        }
    }

    async fn describe(
        &self,
        kind: ResourceKind,
        id: &str,
        namespace: Option<&str>,
    ) -> CoreResult<Option<Value>> {
        if !self.supports(kind) {
            return Err(unsupported_kind(BackendKind::Cluster, kind));
        }
        let context = format!("consultar {kind} '{id}'");
        let path = item_path(kind, self.namespace_for(kind, namespace), id)?;
        let response = self
            .request(Method::GET, &path)
            .send()
            .await
            .map_err(|e| transport_error(e, &context, self.timeout))?;
        read_optional_json(response, &context, self.timeout).await
    }

    async fn logs(
        &self,
        kind: ResourceKind,
        id: &str,
        namespace: Option<&str>,
        options: &LogOptions,
    ) -> CoreResult<String> {
        check_logs_kind(BackendKind::Cluster, kind)?;
        let context = format!("logs do pod '{id}'");
        let path = format!("{}/log", item_path(kind, self.namespace_for(kind, namespace), id)?);
        let mut query = vec![("timestamps", options.timestamps.to_string())];
        if let Some(tail) = options.tail {
            query.push(("tailLines", tail.to_string()));
        }
        if let Some(secs) = options.since_secs {
            query.push(("sinceSeconds", secs.to_string()));
        }
        if let Some(container) = &options.container {
            query.push(("container", container.clone()));
        }
        let response = self
            .request(Method::GET, &path)
            .query(&query)
            .send()
            .await
            .map_err(|e| transport_error(e, &context, self.timeout))?;
        let body = read_bytes(response, &context, self.timeout).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    async fn system_info(&self) -> CoreResult<Value> {
        let context = "consultar informações do cluster";
        let (version, nodes, namespaces) = try_join3(
            self.get_json("/version", context),
            self.get_items("/api/v1/nodes", context),
            self.get_items("/api/v1/namespaces", context),
        )
        .await?;
        Ok(json!({
            "version": version,
            "nodes": nodes,
            "namespaces": namespaces,
            "namespace": self.namespace,
        }))
    }

    async fn list_nodes(&self) -> CoreResult<Vec<Value>> {
        self.get_items("/api/v1/nodes", "listar nós").await
    }

    async fn health_check(&self) -> bool {
        match self.request(Method::GET, "/readyz").send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(server = %self.server, error = %e, "readyz do cluster falhou");
                false
            }
        }
    }
}

fn items_of(body: Value) -> Vec<Value> {
    match body {
        Value::Object(mut map) => match map.remove("items") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn collection_path(kind: ResourceKind, namespace: Option<&str>) -> CoreResult<String> {
    let (prefix, plural) = match kind {
        ResourceKind::Pod => ("/api/v1", "pods"),
        ResourceKind::Service => ("/api/v1", "services"),
        ResourceKind::Deployment => ("/apis/apps/v1", "deployments"),
        ResourceKind::Namespace => return Ok("/api/v1/namespaces".to_string()),
        other => return Err(unsupported_kind(BackendKind::Cluster, other)),
    };
    Ok(match namespace {
        Some(ns) => format!("{prefix}/namespaces/{ns}/{plural}"),
        None => format!("{prefix}/{plural}"),
    })
}

fn item_path(kind: ResourceKind, namespace: Option<&str>, name: &str) -> CoreResult<String> {
    if name.is_empty() {
        return Err(CoreError::validation(format!("{kind} sem nome")));
    }
    Ok(format!("{}/{name}", collection_path(kind, namespace)?))
}

/// Manifesto mínimo para criações sem corpo explícito
fn default_manifest(kind: ResourceKind, name: &str, params: &ActionParams) -> CoreResult<Value> {
    let labels: BTreeMap<String, String> = if params.labels.is_empty() {
        BTreeMap::from([("app".to_string(), name.to_string())])
    } else {
        params.labels.clone()
    };
    let image = || {
        params
            .image
            .clone()
            .ok_or_else(|| CoreError::validation(format!("criar {kind} '{name}': imagem obrigatória")))
    };

    match kind {
        ResourceKind::Namespace => Ok(json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": name, "labels": params.labels },
        })),
        ResourceKind::Pod => Ok(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": name, "labels": labels },
            "spec": { "containers": [{ "name": name, "image": image()? }] },
        })),
        ResourceKind::Deployment => Ok(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": name, "labels": labels },
            "spec": {
                "replicas": params.replicas.unwrap_or(1),
                "selector": { "matchLabels": labels },
                "template": {
                    "metadata": { "labels": labels },
                    "spec": { "containers": [{ "name": name, "image": image()? }] },
                },
            },
        })),
        ResourceKind::Service => Err(CoreError::validation(format!(
            "criar service '{name}': informe o manifesto completo (seletor e portas)"
        ))),
        other => Err(unsupported_kind(BackendKind::Cluster, other)),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Kubeconfig {
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    users: Vec<NamedUser>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
    current_context: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedCluster {
    name: String,
    cluster: KubeCluster,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct KubeCluster {
    server: String,
    certificate_authority: Option<PathBuf>,
    certificate_authority_data: Option<String>,
    #[serde(default)]
    insecure_skip_tls_verify: bool,
}

#[derive(Debug, Deserialize)]
struct NamedUser {
    name: String,
    #[serde(default)]
    user: KubeUser,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct KubeUser {
    token: Option<String>,
    #[serde(rename = "tokenFile")]
    token_file: Option<PathBuf>,
    client_certificate: Option<PathBuf>,
    client_certificate_data: Option<String>,
    client_key: Option<PathBuf>,
    client_key_data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedContext {
    name: String,
    context: KubeContext,
}

#[derive(Debug, Deserialize)]
struct KubeContext {
    cluster: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    namespace: Option<String>,
}

fn read_file(path: &Path) -> CoreResult<Vec<u8>> {
    fs::read(path).map_err(|e| CoreError::validation(format!("falha ao ler '{}': {e}", path.display())))
}

fn read_token(path: &Path) -> CoreResult<String> {
    let bytes = read_file(path)?;
    Ok(String::from_utf8_lossy(&bytes).trim().to_string())
}

fn decode_data(field: &str, data: &str) -> CoreResult<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| CoreError::validation(format!("kubeconfig: {field} inválido: {e}")))
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

/// Ordem: servidor explícito, kubeconfig, service account do pod.
pub(crate) fn resolve_credentials(conn: &ClusterConnection) -> CoreResult<Credentials> {
    let mut creds = if conn.in_cluster {
        in_cluster_credentials()?
    } else if let Some(path) = &conn.kubeconfig {
        let path = expand_home(path);
        if !path.exists() {
            return Err(CoreError::validation(format!(
                "kubeconfig '{}' não encontrado",
                path.display()
            )));
        }
        kubeconfig_credentials(&path, conn.context.as_deref())?
    } else if conn.server.is_some() {
        Credentials::default()
    } else {
        let default_path = expand_home(Path::new("~/.kube/config"));
        if default_path.exists() {
            kubeconfig_credentials(&default_path, conn.context.as_deref())?
        } else if std::env::var_os("KUBERNETES_SERVICE_HOST").is_some() {
            in_cluster_credentials()?
        } else {
            return Err(CoreError::validation(
                "cluster sem servidor: informe server, kubeconfig ou in_cluster",
            ));
        }
    };

    if let Some(server) = &conn.server {
        creds.server = server.clone();
    }
    if let Some(token) = &conn.token {
        creds.token = Some(token.clone());
    } else if let Some(path) = &conn.token_file {
        creds.token = Some(read_token(path)?);
    }
    if let Some(ca) = &conn.ca_cert {
        creds.tls.ca_pem = Some(read_file(ca)?);
    }
    if conn.insecure_skip_verify {
        creds.tls.insecure_skip_verify = true;
    }
    if creds.server.trim().is_empty() {
        return Err(CoreError::validation("cluster sem endereço de servidor"));
    }
    Ok(creds)
}

fn in_cluster_credentials() -> CoreResult<Credentials> {
    let host = std::env::var("KUBERNETES_SERVICE_HOST")
        .map_err(|_| CoreError::validation("KUBERNETES_SERVICE_HOST não definido fora do cluster"))?;
    let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
    let dir = Path::new(SERVICE_ACCOUNT_DIR);
    let host = if host.contains(':') {
        format!("[{host}]")
    } else {
        host
    };

    Ok(Credentials {
        server: format!("https://{host}:{port}"),
        token: Some(read_token(&dir.join("token"))?),
        namespace: fs::read_to_string(dir.join("namespace"))
            .ok()
            .map(|ns| ns.trim().to_string()),
        tls: TlsMaterial {
            ca_pem: Some(read_file(&dir.join("ca.crt"))?),
            ..TlsMaterial::default()
        },
    })
}

fn kubeconfig_credentials(path: &Path, context: Option<&str>) -> CoreResult<Credentials> {
    let text = fs::read_to_string(path).map_err(|e| {
        CoreError::validation(format!("falha ao ler kubeconfig '{}': {e}", path.display()))
    })?;
    let config: Kubeconfig = serde_yaml::from_str(&text)
        .map_err(|e| CoreError::validation(format!("kubeconfig inválido: {e}")))?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let relative = |p: &Path| {
        if p.is_relative() {
            base_dir.join(p)
        } else {
            p.to_path_buf()
        }
    };

    let context_name = context
        .map(str::to_string)
        .or_else(|| config.current_context.clone())
        .ok_or_else(|| CoreError::validation("kubeconfig sem current-context"))?;
    let ctx = config
        .contexts
        .iter()
        .find(|c| c.name == context_name)
        .map(|c| &c.context)
        .ok_or_else(|| {
            CoreError::validation(format!("contexto '{context_name}' ausente no kubeconfig"))
        })?;
    let cluster = config
        .clusters
        .iter()
        .find(|c| c.name == ctx.cluster)
        .map(|c| &c.cluster)
        .ok_or_else(|| {
            CoreError::validation(format!("cluster '{}' ausente no kubeconfig", ctx.cluster))
        })?;
    let user = ctx
        .user
        .as_ref()
        .and_then(|name| config.users.iter().find(|u| &u.name == name))
        .map(|u| &u.user);

    let ca_pem = match (&cluster.certificate_authority_data, &cluster.certificate_authority) {
        (Some(data), _) => Some(decode_data("certificate-authority-data", data)?),
        (None, Some(file)) => Some(read_file(&relative(file))?),
        (None, None) => None,
    };

    let mut token = None;
    let mut identity_pem = None;
    if let Some(user) = user {
        token = match (&user.token, &user.token_file) {
            (Some(token), _) => Some(token.clone()),
            (None, Some(file)) => Some(read_token(&relative(file))?),
            (None, None) => None,
        };
        let cert = match (&user.client_certificate_data, &user.client_certificate) {
            (Some(data), _) => Some(decode_data("client-certificate-data", data)?),
            (None, Some(file)) => Some(read_file(&relative(file))?),
            (None, None) => None,
        };
        let key = match (&user.client_key_data, &user.client_key) {
            (Some(data), _) => Some(decode_data("client-key-data", data)?),
            (None, Some(file)) => Some(read_file(&relative(file))?),
            (None, None) => None,
        };
        if let (Some(mut cert), Some(key)) = (cert, key) {
            cert.push(b'\n');
            cert.extend(key);
            identity_pem = Some(cert);
        }
    }

    Ok(Credentials {
        server: cluster.server.clone(),
        token,
        namespace: ctx.namespace.clone(),
        tls: TlsMaterial {
            ca_pem,
            identity_pem,
            insecure_skip_verify: cluster.insecure_skip_tls_verify,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
current-context: dev
clusters:
  - name: dev-cluster
    cluster:
      server: https://10.0.0.1:6443
      certificate-authority-data: Q0EtREFUQQ==
  - name: prod-cluster
    cluster:
      server: https://10.0.9.9:6443
      insecure-skip-tls-verify: true
users:
  - name: dev-user
    user:
      token: dev-token
contexts:
  - name: dev
    context:
      cluster: dev-cluster
      user: dev-user
      namespace: apps
  - name: prod
    context:
      cluster: prod-cluster
"#;

    fn write_kubeconfig() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        fs::write(&path, KUBECONFIG).unwrap();
        (dir, path)
    }

    #[test]
    fn test_kubeconfig_current_context() {
        let (_dir, path) = write_kubeconfig();
        let conn = ClusterConnection {
            kubeconfig: Some(path),
            ..ClusterConnection::default()
        };
        let creds = resolve_credentials(&conn).unwrap();
        assert_eq!(creds.server, "https://10.0.0.1:6443");
        assert_eq!(creds.token.as_deref(), Some("dev-token"));
        assert_eq!(creds.namespace.as_deref(), Some("apps"));
        assert_eq!(creds.tls.ca_pem.as_deref(), Some(b"CA-DATA".as_slice()));
    }

    #[test]
    fn test_kubeconfig_explicit_context_and_overrides() {
        let (_dir, path) = write_kubeconfig();
        let conn = ClusterConnection {
            kubeconfig: Some(path),
            context: Some("prod".to_string()),
            token: Some("override".to_string()),
            ..ClusterConnection::default()
        };
        let creds = resolve_credentials(&conn).unwrap();
        assert_eq!(creds.server, "https://10.0.9.9:6443");
        assert_eq!(creds.token.as_deref(), Some("override"));
        assert!(creds.tls.insecure_skip_verify);
        assert!(creds.namespace.is_none());
    }

    #[test]
    fn test_missing_kubeconfig_is_validation() {
        let conn = ClusterConnection {
            kubeconfig: Some(PathBuf::from("/nao/existe/config")),
            ..ClusterConnection::default()
        };
        let err = resolve_credentials(&conn).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_explicit_server() {
        let conn = ClusterConnection {
            server: Some("https://k8s.local:6443/".to_string()),
            token: Some("t".to_string()),
            namespace: Some("web".to_string()),
            ..ClusterConnection::default()
        };
        let adapter = ClusterAdapter::new(&conn).unwrap();
        assert_eq!(adapter.server(), "https://k8s.local:6443");
        assert_eq!(adapter.default_namespace().as_deref(), Some("web"));
    }

    #[test]
    fn test_namespace_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        fs::write(
            &path,
            r#"
current-context: dev
clusters:
  - name: c
    cluster:
      server: https://10.0.0.1:6443
contexts:
  - name: dev
    context:
      cluster: c
      namespace: apps
  - name: bare
    context:
      cluster: c
"#,
        )
        .unwrap();
        let conn = |context: Option<&str>, namespace: Option<&str>| ClusterConnection {
            kubeconfig: Some(path.clone()),
            context: context.map(str::to_string),
            namespace: namespace.map(str::to_string),
            ..ClusterConnection::default()
        };
        let namespace_of = |c: ClusterConnection| ClusterAdapter::new(&c).unwrap().default_namespace();

        assert_eq!(namespace_of(conn(None, None)).as_deref(), Some("apps"));
        // "default" explícito também vence o namespace do contexto
        assert_eq!(namespace_of(conn(None, Some("default"))).as_deref(), Some("default"));
        assert_eq!(namespace_of(conn(Some("bare"), None)).as_deref(), Some("default"));
    }

    #[test]
    fn test_paths() {
        assert_eq!(
            collection_path(ResourceKind::Deployment, Some("apps")).unwrap(),
            "/apis/apps/v1/namespaces/apps/deployments"
        );
        assert_eq!(collection_path(ResourceKind::Pod, None).unwrap(), "/api/v1/pods");
        assert_eq!(
            item_path(ResourceKind::Namespace, None, "apps").unwrap(),
            "/api/v1/namespaces/apps"
        );
        assert!(collection_path(ResourceKind::Volume, None).is_err());
    }

    #[test]
    fn test_default_deployment_manifest() {
        let params = ActionParams::default().with_image("nginx:1.25").with_replicas(3);
        let manifest = default_manifest(ResourceKind::Deployment, "web", &params).unwrap();
        assert_eq!(manifest["spec"]["replicas"], 3);
        assert_eq!(manifest["spec"]["selector"]["matchLabels"]["app"], "web");
        assert_eq!(
            manifest["spec"]["template"]["spec"]["containers"][0]["image"],
            "nginx:1.25"
        );

        let err = default_manifest(ResourceKind::Pod, "p", &ActionParams::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(default_manifest(ResourceKind::Service, "s", &params).is_err());
    }
}
