//! Application descriptor supplied by the directory service.
//!
//! The engine only reads the descriptor: the guid used in routing headers, the
//! per-slot instance states and the first route.

use serde::{Deserialize, Serialize};

/// State reported for an instance that is serving traffic.
pub const RUNNING_STATE: &str = "running";

/// State of one instance slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceState {
    pub state: String,
}

impl InstanceState {
    pub fn new(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
        }
    }

    pub fn running() -> Self {
        Self::new(RUNNING_STATE)
    }

    pub fn stopped() -> Self {
        Self::new("stopped")
    }

    pub fn is_running(&self) -> bool {
        self.state.eq_ignore_ascii_case(RUNNING_STATE)
    }
}

/// Shared domain a route lives under.
///
/// Accepts both `{"name": "apps.example.com"}` and a bare string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "DomainRepr")]
pub struct Domain {
    pub name: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DomainRepr {
    Name(String),
    Object { name: String },
}

impl From<DomainRepr> for Domain {
    fn from(repr: DomainRepr) -> Self {
        match repr {
            DomainRepr::Name(name) | DomainRepr::Object { name } => Self { name },
        }
    }
}

impl Domain {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A route mapped to the app: optional host prefix plus domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub domain: Domain,
}

impl Route {
    /// Route served directly on the domain, e.g. `apps.example.com`.
    pub fn bare(domain: impl Into<String>) -> Self {
        Self {
            host: None,
            domain: Domain::new(domain),
        }
    }

    /// Route with a host prefix, e.g. `my-app.apps.example.com`.
    pub fn with_host(host: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            domain: Domain::new(domain),
        }
    }

    /// Fully qualified hostname. An empty host prefix counts as absent.
    pub fn hostname(&self) -> String {
        match self.host.as_deref().filter(|host| !host.is_empty()) {
            Some(host) => format!("{host}.{}", self.domain.name),
            None => self.domain.name.clone(),
        }
    }
}

/// Read-only view of an application as reported by the directory service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationDescriptor {
    pub guid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Number of instances the directory expects to be running.
    #[serde(default)]
    pub running_instances: usize,
    /// Per-slot states; the position is the instance index used for routing.
    #[serde(default)]
    pub instances: Vec<InstanceState>,
    #[serde(default)]
    pub routes: Vec<Route>,
}

impl ApplicationDescriptor {
    pub fn new(guid: impl Into<String>) -> Self {
        Self {
            guid: guid.into(),
            name: None,
            running_instances: 0,
            instances: Vec::new(),
            routes: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Append an instance slot, keeping `running_instances` in step.
    pub fn with_instance(mut self, state: InstanceState) -> Self {
        if state.is_running() {
            self.running_instances += 1;
        }
        self.instances.push(state);
        self
    }

    pub fn with_route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    /// Indices of the slots currently running, in slot order.
    pub fn running_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.instances
            .iter()
            .enumerate()
            .filter(|(_, instance)| instance.is_running())
            .map(|(index, _)| index)
    }

    pub fn running_count(&self) -> usize {
        self.running_indices().count()
    }

    /// The route requests are sent to. Only the first one is used.
    pub fn primary_route(&self) -> Option<&Route> {
        self.routes.first()
    }

    /// Name for logs and messages, falling back to the guid.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.guid)
    }
}
