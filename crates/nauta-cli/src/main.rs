use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use nauta_core::lifecycle::format_duration;
use nauta_core::logging::init_logging;
use nauta_core::{
    Action, ActionParams, ActionRequest, AggregateResult, BackendInfo, BackendRef,
    CoreConfig, LogOptions, NodeInfo, Resource, ResourceCore, ResourceKind, ScopeFilter,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Parser)]
#[command(
    name = "nauta",
    about = "nauta: gerencia containers e recursos Kubernetes a partir de uma única interface"
)]
struct Args {
    /// Arquivo de configuração TOML (padrão: <config_dir>/nauta/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Saída em JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Lista os backends registrados
    Backends,

    /// Sonda os backends ativos
    Health,

    /// Lista recursos de um tipo em todos os backends
    List {
        kind: ResourceKind,
        #[arg(long)]
        backend: Option<String>,
        #[arg(long, short)]
        namespace: Option<String>,
        /// Todos os namespaces
        #[arg(long, short = 'A')]
        all_namespaces: bool,
        /// Filtro por label, `chave=valor` (pode repetir)
        #[arg(long = "label", short, value_parser = parse_label)]
        labels: Vec<(String, String)>,
        /// Inclui containers parados
        #[arg(long, short)]
        all: bool,
    },

    /// Mostra um recurso
    Get {
        kind: ResourceKind,
        id: String,
        #[arg(long)]
        backend: String,
        #[arg(long, short)]
        namespace: Option<String>,
    },

    /// Executa uma ação de ciclo de vida
    Action {
        action: Action,
        kind: ResourceKind,
        /// Id ou nome do recurso (em `create`, o nome do novo recurso)
        id: String,
        #[arg(long)]
        backend: String,
        #[arg(long, short)]
        namespace: Option<String>,
        #[arg(long)]
        replicas: Option<u32>,
        #[arg(long)]
        image: Option<String>,
        #[arg(long = "label", short, value_parser = parse_label)]
        labels: Vec<(String, String)>,
        #[arg(long)]
        force: bool,
        /// Segundos de espera antes de forçar a parada
        #[arg(long)]
        grace: Option<u64>,
        /// Corpo JSON repassado ao backend em `create`
        #[arg(long)]
        body: Option<PathBuf>,
        /// Timeout por tentativa, em segundos
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Mostra o log de um container ou pod
    Logs {
        kind: ResourceKind,
        id: String,
        #[arg(long)]
        backend: String,
        #[arg(long, short)]
        namespace: Option<String>,
        /// Container dentro do pod
        #[arg(long, short)]
        container: Option<String>,
        /// Últimas N linhas (0 traz o log inteiro)
        #[arg(long, default_value_t = 100)]
        tail: u32,
        /// Só linhas dos últimos N segundos
        #[arg(long)]
        since: Option<u64>,
        /// Omite os timestamps
        #[arg(long)]
        no_timestamps: bool,
    },

    /// Versão e contagens de um backend (todos os ativos se omitido)
    Info {
        #[arg(long)]
        backend: Option<String>,
    },

    /// Lista os nós de um cluster
    Nodes {
        #[arg(long)]
        backend: String,
    },

    /// Últimas operações registradas na auditoria
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

fn parse_label(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.trim().to_string())),
        _ => Err(format!("label inválido '{s}', use chave=valor")),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn age(created_at: i64) -> String {
    if created_at <= 0 {
        return "-".to_string();
    }
    let secs = (Utc::now().timestamp() - created_at).max(0) as u64;
    format_duration(secs)
}

fn print_resources(resources: &[Resource]) {
    println!(
        "{:<14} {:<12} {:<32} {:<12} {:<8}",
        "BACKEND", "NAMESPACE", "NOME", "STATUS", "IDADE"
    );
    for r in resources {
        println!(
            "{:<14} {:<12} {:<32} {:<12} {:<8}",
            r.backend_ref.backend_id,
            r.backend_ref.namespace.as_deref().unwrap_or("-"),
            r.name,
            r.status.to_string(),
            age(r.created_at)
        );
    }
}

fn print_aggregate(result: &AggregateResult) {
    print_resources(&result.resources);
    for (backend, error) in &result.errors {
        eprintln!("aviso: backend '{backend}' falhou: {error}");
    }
}

fn print_resource(resource: &Resource) {
    println!("Tipo:      {}", resource.kind);
    println!("Id:        {}", resource.id);
    println!("Nome:      {}", resource.name);
    println!("Status:    {}", resource.status);
    println!("Backend:   {}", resource.backend_ref);
    println!("Idade:     {}", age(resource.created_at));
    if resource.size_bytes > 0 {
        println!("Tamanho:   {} bytes", resource.size_bytes);
    }
    for (k, v) in &resource.labels {
        println!("Label:     {k}={v}");
    }
    for (k, v) in &resource.attributes {
        println!("{:<10} {v}", format!("{k}:"));
    }
}

fn print_info(info: &BackendInfo) {
    println!("Backend:   {} ({})", info.backend_id, info.kind);
    println!("Versão:    {}", info.server_version);
    if let Some(api) = &info.api_version {
        println!("API:       {api}");
    }
    if let Some(platform) = &info.platform {
        println!("Sistema:   {platform}");
    }
    for (k, v) in &info.counts {
        println!("{:<20} {v}", format!("{k}:"));
    }
    for (k, v) in &info.attributes {
        println!("{:<20} {v}", format!("{k}:"));
    }
}

fn print_nodes(nodes: &[NodeInfo]) {
    println!(
        "{:<24} {:<10} {:<20} {:<10} {:<16}",
        "NOME", "STATUS", "PAPÉIS", "IDADE", "VERSÃO"
    );
    for n in nodes {
        let roles = if n.roles.is_empty() {
            "<none>".to_string()
        } else {
            n.roles.join(",")
        };
        println!(
            "{:<24} {:<10} {:<20} {:<10} {:<16}",
            n.name,
            if n.ready { "Ready" } else { "NotReady" },
            roles,
            age(n.created_at),
            n.kubelet_version
        );
    }
}

fn backend_ref(backend: String, namespace: Option<String>) -> BackendRef {
    BackendRef {
        backend_id: backend,
        namespace,
    }
}

async fn run(core: &ResourceCore, command: Command, json: bool) -> anyhow::Result<()> {
    match command {
        Command::Backends => {
            let backends = core.backends();
            if json {
                return print_json(&backends);
            }
            println!("{:<14} {:<24} {:<8} {:<6}", "ID", "NOME", "TIPO", "ATIVO");
            for b in backends {
                println!(
                    "{:<14} {:<24} {:<8} {:<6}",
                    b.id,
                    b.display_name,
                    b.kind.to_string(),
                    if b.active { "sim" } else { "não" }
                );
            }
        }
        Command::Health => {
            let health = core.health_status().await;
            if json {
                return print_json(&health);
            }
            for (id, h) in health {
                let checked = h
                    .last_checked
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string());
                let state = if h.reachable { "ok" } else { "inalcançável" };
                println!("- {:<14} {:<14} {}", id, state, checked);
            }
        }
        Command::List {
            kind,
            backend,
            namespace,
            all_namespaces,
            labels,
            all,
        } => {
            let scope = ScopeFilter {
                backend_id: backend,
                namespace,
                all_namespaces,
                labels: labels.into_iter().collect(),
                include_stopped: all,
            };
            let result = core.list_resources(kind, &scope).await;
            if json {
                return print_json(&result);
            }
            print_aggregate(&result);
        }
        Command::Get {
            kind,
            id,
            backend,
            namespace,
        } => {
            let resource = core
                .get_resource(kind, &id, &backend_ref(backend, namespace))
                .await
                .with_context(|| format!("falha ao consultar {kind} '{id}'"))?;
            if json {
                return print_json(&resource);
            }
            print_resource(&resource);
        }
        Command::Action {
            action,
            kind,
            id,
            backend,
            namespace,
            replicas,
            image,
            labels,
            force,
            grace,
            body,
            timeout,
        } => {
            let body = match body {
                Some(path) => {
                    let text = fs::read_to_string(&path)
                        .with_context(|| format!("falha ao ler {}", path.display()))?;
                    Some(serde_json::from_str(&text).context("corpo JSON inválido")?)
                }
                None => None,
            };
            let params = ActionParams {
                namespace: namespace.clone(),
                replicas,
                image,
                labels: labels.into_iter().collect::<BTreeMap<_, _>>(),
                force,
                grace_period_secs: grace,
                body,
            };
            let mut request = ActionRequest::new(kind, id.clone(), backend_ref(backend, namespace), action)
                .with_params(params)
                .with_initiator(initiator());
            if let Some(secs) = timeout {
                request = request.with_timeout(Duration::from_secs(secs));
            }

            let resource = core
                .perform_lifecycle_action(request)
                .await
                .with_context(|| format!("falha ao executar {action} em {kind} '{id}'"))?;
            if json {
                return print_json(&resource);
            }
            println!("{action} {kind} '{}': {}", resource.name, resource.status);
        }
        Command::Logs {
            kind,
            id,
            backend,
            namespace,
            container,
            tail,
            since,
            no_timestamps,
        } => {
            let options = LogOptions {
                tail: (tail > 0).then_some(tail),
                since_secs: since,
                timestamps: !no_timestamps,
                container,
            };
            let text = core
                .resource_logs(kind, &id, &backend_ref(backend, namespace), &options)
                .await
                .with_context(|| format!("falha ao ler logs de {kind} '{id}'"))?;
            if json {
                return print_json(&text.lines().collect::<Vec<_>>());
            }
            print!("{text}");
        }
        Command::Info { backend } => {
            let ids = match backend {
                Some(id) => vec![id],
                None => core
                    .backends()
                    .into_iter()
                    .filter(|b| b.active)
                    .map(|b| b.id)
                    .collect(),
            };
            let mut infos = Vec::new();
            for id in ids {
                match core.backend_info(&id).await {
                    Ok(info) => infos.push(info),
                    Err(e) => eprintln!("aviso: backend '{id}' falhou: {e}"),
                }
            }
            if json {
                return print_json(&infos);
            }
            for (i, info) in infos.iter().enumerate() {
                if i > 0 {
                    println!();
                }
                print_info(info);
            }
        }
        Command::Nodes { backend } => {
            let nodes = core
                .cluster_nodes(&backend)
                .await
                .with_context(|| format!("falha ao listar nós de '{backend}'"))?;
            if json {
                return print_json(&nodes);
            }
            print_nodes(&nodes);
        }
        Command::History { limit } => {
            let records = core.recent_operations(limit).await?;
            if json {
                return print_json(&records);
            }
            for r in records {
                let error = r
                    .error_message
                    .as_deref()
                    .map(|m| format!(" ({m})"))
                    .unwrap_or_default();
                println!(
                    "{} {:<8} {:<8} {:<40} {} x{}{}",
                    r.requested_at.format("%Y-%m-%d %H:%M:%S"),
                    r.operation_type.to_string(),
                    r.status.to_string(),
                    r.target.to_string(),
                    r.initiator,
                    r.attempts,
                    error
                );
            }
        }
    }
    Ok(())
}

fn initiator() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .map(|user| format!("cli:{user}"))
        .unwrap_or_else(|_| "cli".to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let (config, origin) = CoreConfig::load_or_default(args.config.as_deref())
        .context("falha ao carregar configuração")?;
    init_logging(&config.logging).context("falha ao iniciar logs")?;
    if origin.is_default() {
        warn!(path = %origin.path().display(), "arquivo de configuração não encontrado, usando padrões");
    }
    debug!(command = ?args.command, config = %origin.path().display(), "executando comando");

    let core = ResourceCore::builder(config)
        .build()
        .context("falha ao iniciar o núcleo")?;

    let outcome = run(&core, args.command, args.json).await;
    // Grava a auditoria pendente antes de sair, mesmo em caso de erro
    core.shutdown().await;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logs_arguments() {
        let args = Args::try_parse_from([
            "nauta", "logs", "pod", "web-0", "--backend", "prod", "-n", "apps", "-c", "sidecar",
            "--tail", "0", "--no-timestamps",
        ])
        .unwrap();
        match args.command {
            Command::Logs {
                kind,
                namespace,
                container,
                tail,
                no_timestamps,
                ..
            } => {
                assert_eq!(kind, ResourceKind::Pod);
                assert_eq!(namespace.as_deref(), Some("apps"));
                assert_eq!(container.as_deref(), Some("sidecar"));
                assert_eq!(tail, 0);
                assert!(no_timestamps);
            }
            other => panic!("comando inesperado: {other:?}"),
        }
    }

    #[test]
    fn test_info_backend_is_optional_and_nodes_requires_it() {
        let args = Args::try_parse_from(["nauta", "info"]).unwrap();
        assert!(matches!(args.command, Command::Info { backend: None }));
        assert!(Args::try_parse_from(["nauta", "nodes"]).is_err());
    }
}
