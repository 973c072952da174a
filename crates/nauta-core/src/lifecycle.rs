//! Máquina de estados de ciclo de vida e estado conhecido dos recursos

use crate::model::{Action, Resource, ResourceKey, ResourceKind, ResourceStatus};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Acima disso, observações antigas são descartadas a cada nova observação
const MAX_TRACKED: usize = 10_000;

/// Ações que cada tipo de recurso aceita
pub fn supported_actions(kind: ResourceKind) -> &'static [Action] {
    match kind {
        ResourceKind::Container => &[
            Action::Create,
            Action::Start,
            Action::Stop,
            Action::Restart,
            Action::Pause,
            Action::Unpause,
            Action::Delete,
        ],
        ResourceKind::Image
        | ResourceKind::Network
        | ResourceKind::Volume
        | ResourceKind::Pod
        | ResourceKind::Service
        | ResourceKind::Namespace => &[Action::Create, Action::Delete],
        ResourceKind::Deployment => &[
            Action::Create,
            Action::Scale,
            Action::Restart,
            Action::Delete,
        ],
    }
}

pub fn supports(kind: ResourceKind, action: Action) -> bool {
    supported_actions(kind).contains(&action)
}

/// Verifica se `action` é uma aresta válida a partir do estado `from`.
///
/// `None` (estado desconhecido) e `Unknown` aceitam qualquer ação suportada;
/// o backend continua sendo a autoridade final.
pub fn is_legal(kind: ResourceKind, from: Option<ResourceStatus>, action: Action) -> bool {
    use ResourceStatus as S;

    if !supports(kind, action) {
        return false;
    }
    let from = match from {
        None | Some(S::Unknown) => return true,
        Some(status) => status,
    };
    if from == S::Removed {
        return action == Action::Create;
    }
    if action == Action::Create {
        // Recurso já existe
        return false;
    }

    match kind {
        ResourceKind::Container => matches!(
            (from, action),
            (S::Created, Action::Start)
                | (S::Created, Action::Delete)
                | (S::Running, Action::Stop)
                | (S::Running, Action::Restart)
                | (S::Running, Action::Pause)
                | (S::Paused, Action::Unpause)
                | (S::Stopped, Action::Start)
                | (S::Stopped, Action::Restart)
                | (S::Stopped, Action::Delete)
                | (S::Restarting, Action::Stop)
                | (S::Dead, Action::Delete)
        ),
        ResourceKind::Deployment => !matches!(from, S::Terminating),
        ResourceKind::Pod | ResourceKind::Namespace => {
            !matches!(from, S::Terminating) && action == Action::Delete
        }
        ResourceKind::Image | ResourceKind::Network | ResourceKind::Volume | ResourceKind::Service => {
            action == Action::Delete
        }
    }
}

/// Status esperado após uma ação bem-sucedida, quando previsível
pub fn expected_status(kind: ResourceKind, action: Action) -> Option<ResourceStatus> {
    match (kind, action) {
        (_, Action::Delete) => Some(ResourceStatus::Removed),
        (ResourceKind::Container, Action::Create) => Some(ResourceStatus::Created),
        (ResourceKind::Container, Action::Start)
        | (ResourceKind::Container, Action::Restart)
        | (ResourceKind::Container, Action::Unpause) => Some(ResourceStatus::Running),
        (ResourceKind::Container, Action::Stop) => Some(ResourceStatus::Stopped),
        (ResourceKind::Container, Action::Pause) => Some(ResourceStatus::Paused),
        _ => None,
    }
}

/// Último estado observado de um recurso
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownState {
    pub status: ResourceStatus,
    pub observed_at: Instant,
}

impl KnownState {
    pub fn age(&self) -> Duration {
        self.observed_at.elapsed()
    }
}

/// Guarda apenas o status mais recente de cada recurso visto em consultas
/// ou ações. Usado pelo dispatcher para validar transições.
#[derive(Debug, Default)]
pub struct StateTracker {
    states: Mutex<HashMap<ResourceKey, KnownState>>,
    staleness: Duration,
}

impl StateTracker {
    pub fn new(staleness: Duration) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            staleness,
        }
    }

    pub fn observe(&self, resource: &Resource) {
        // Containers podem ser endereçados pelo id ou pelo nome
        if resource.kind == ResourceKind::Container
            && resource.name != resource.id
            && resource.name != "unknown"
        {
            let mut by_name = resource.key();
            by_name.id = resource.name.clone();
            self.observe_status(by_name, resource.status);
        }
        self.observe_status(resource.key(), resource.status);
    }

    pub fn observe_status(&self, key: ResourceKey, status: ResourceStatus) {
        let now = Instant::now();
        let mut states = self.states.lock();
        if states.len() >= MAX_TRACKED {
            let staleness = self.staleness;
            states.retain(|_, s| now.duration_since(s.observed_at) <= staleness);
        }
        states.insert(
            key,
            KnownState {
                status,
                observed_at: now,
            },
        );
    }

    pub fn forget(&self, key: &ResourceKey) {
        self.states.lock().remove(key);
    }

    pub fn get(&self, key: &ResourceKey) -> Option<KnownState> {
        self.states.lock().get(key).copied()
    }

    /// Status conhecido, somente se ainda não estiver velho
    pub fn fresh_status(&self, key: &ResourceKey) -> Option<ResourceStatus> {
        self.get(key)
            .filter(|s| s.age() <= self.staleness)
            .map(|s| s.status)
    }

    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Formata duração em formato legível
pub fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        format!("{}h {}m", hours, mins)
    } else {
        let days = secs / 86400;
        let hours = (secs % 86400) / 3600;
        format!("{}d {}h", days, hours)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BackendRef;

    fn key(id: &str) -> ResourceKey {
        ResourceKey {
            backend_ref: BackendRef::new("local"),
            kind: ResourceKind::Container,
            id: id.to_string(),
        }
    }

    #[test]
    fn test_container_edges() {
        use ResourceStatus as S;
        let c = ResourceKind::Container;

        assert!(is_legal(c, Some(S::Created), Action::Start));
        assert!(is_legal(c, Some(S::Running), Action::Pause));
        assert!(is_legal(c, Some(S::Paused), Action::Unpause));
        assert!(is_legal(c, Some(S::Running), Action::Stop));
        assert!(is_legal(c, Some(S::Stopped), Action::Delete));
        assert!(is_legal(c, Some(S::Created), Action::Delete));

        assert!(!is_legal(c, Some(S::Running), Action::Delete));
        assert!(!is_legal(c, Some(S::Paused), Action::Start));
        assert!(!is_legal(c, Some(S::Removed), Action::Start));
        assert!(!is_legal(c, Some(S::Running), Action::Create));
        assert!(is_legal(c, Some(S::Removed), Action::Create));
    }

    #[test]
    fn test_unknown_state_allows_supported_actions() {
        assert!(is_legal(ResourceKind::Container, None, Action::Stop));
        assert!(is_legal(
            ResourceKind::Container,
            Some(ResourceStatus::Unknown),
            Action::Delete
        ));
        assert!(!is_legal(ResourceKind::Pod, None, Action::Pause));
        assert!(!is_legal(ResourceKind::Image, None, Action::Scale));
    }

    #[test]
    fn test_cluster_kinds() {
        use ResourceStatus as S;
        assert!(is_legal(ResourceKind::Deployment, Some(S::Available), Action::Scale));
        assert!(is_legal(ResourceKind::Deployment, Some(S::Stopped), Action::Scale));
        assert!(!is_legal(ResourceKind::Deployment, Some(S::Terminating), Action::Scale));
        assert!(is_legal(ResourceKind::Pod, Some(S::Running), Action::Delete));
        assert!(!is_legal(ResourceKind::Namespace, Some(S::Terminating), Action::Delete));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracker_staleness() {
        let tracker = StateTracker::new(Duration::from_secs(10));
        tracker.observe_status(key("a"), ResourceStatus::Running);
        assert_eq!(tracker.fresh_status(&key("a")), Some(ResourceStatus::Running));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(tracker.fresh_status(&key("a")), None);
        assert!(tracker.get(&key("a")).is_some());

        tracker.forget(&key("a"));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30), "30s");
        assert_eq!(format_duration(90), "1m 30s");
        assert_eq!(format_duration(3665), "1h 1m");
        assert_eq!(format_duration(90000), "1d 1h");
    }
}
