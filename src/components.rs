//! Readiness components a caller can wait for
//!
//! A [`ComponentSet`] says which of the three well-known components
//! (`apiserver`, `system_pods`, `default_sa`) to wait on. Sets are built once
//! from caller configuration and never mutated afterwards. Keys outside the
//! three recognized names are dropped on construction rather than rejected,
//! so older or newer callers with extra keys keep working.

use std::collections::BTreeMap;
use std::fmt;

use tracing::warn;

/// Wait key for the Kubernetes API server
pub const APISERVER_WAIT_KEY: &str = "apiserver";
/// Wait key for the core pods in kube-system
pub const SYSTEM_PODS_WAIT_KEY: &str = "system_pods";
/// Wait key for the default service account
pub const DEFAULT_SA_WAIT_KEY: &str = "default_sa";

/// Components waited for when the caller expresses no preference
pub const DEFAULT_WAIT_LIST: &[&str] = &[APISERVER_WAIT_KEY, SYSTEM_PODS_WAIT_KEY];

/// Every valid wait key, in canonical order
pub const ALL_COMPONENTS_LIST: &[&str] =
    &[APISERVER_WAIT_KEY, SYSTEM_PODS_WAIT_KEY, DEFAULT_SA_WAIT_KEY];

/// Flag values that select every component
const WAIT_ALL_VALUES: &[&str] = &["all", "true"];
/// Flag values that select no component
const WAIT_NONE_VALUES: &[&str] = &["none", "false"];

/// A readiness component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Component {
    /// The API server answers requests
    ApiServer,
    /// The expected kube-system workloads are running
    SystemPods,
    /// The `default` service account exists
    DefaultServiceAccount,
}

impl Component {
    /// All components in canonical order
    pub const ALL: [Component; 3] = [
        Component::ApiServer,
        Component::SystemPods,
        Component::DefaultServiceAccount,
    ];

    /// Look up a component by its wait key
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            APISERVER_WAIT_KEY => Some(Component::ApiServer),
            SYSTEM_PODS_WAIT_KEY => Some(Component::SystemPods),
            DEFAULT_SA_WAIT_KEY => Some(Component::DefaultServiceAccount),
            _ => None,
        }
    }

    /// The wait key for this component
    pub fn key(&self) -> &'static str {
        match self {
            Component::ApiServer => APISERVER_WAIT_KEY,
            Component::SystemPods => SYSTEM_PODS_WAIT_KEY,
            Component::DefaultServiceAccount => DEFAULT_SA_WAIT_KEY,
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Which components to wait for
///
/// Absent keys read as `false`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentSet {
    flags: BTreeMap<Component, bool>,
}

impl ComponentSet {
    /// Wait for nothing
    pub fn none() -> Self {
        Self::from_components(&[])
    }

    /// Wait for the API server and system pods
    pub fn default_components() -> Self {
        Self::from_keys(DEFAULT_WAIT_LIST)
    }

    /// Wait for every component
    pub fn all() -> Self {
        Self::from_keys(ALL_COMPONENTS_LIST)
    }

    /// Build a set from a caller-supplied key/flag map
    ///
    /// Unrecognized keys are ignored.
    pub fn from_flags<'a, I>(flags: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, bool)>,
    {
        let mut set = Self::from_components(&[]);
        for (key, wait) in flags {
            if let Some(component) = Component::from_key(key) {
                set.flags.insert(component, wait);
            }
        }
        set
    }

    /// Interpret the values of a `--wait` flag
    ///
    /// `all`/`true` selects every component and `none`/`false` selects none;
    /// either wins over any other values given alongside it. An empty flag
    /// means the default set. Unknown names are logged and skipped.
    pub fn from_wait_flag<S: AsRef<str>>(values: &[S]) -> Self {
        let values: Vec<&str> = values
            .iter()
            .map(|v| v.as_ref().trim())
            .filter(|v| !v.is_empty())
            .collect();

        if values.is_empty() {
            return Self::default_components();
        }

        if let Some(special) = values
            .iter()
            .find(|v| WAIT_ALL_VALUES.contains(*v) || WAIT_NONE_VALUES.contains(*v))
        {
            if values.len() > 1 {
                warn!(
                    value = %special,
                    given = %values.join(","),
                    "--wait value overrides the other components listed"
                );
            }
            return if WAIT_ALL_VALUES.contains(special) {
                Self::all()
            } else {
                Self::none()
            };
        }

        let mut set = Self::none();
        for value in values {
            match Component::from_key(value) {
                Some(component) => {
                    set.flags.insert(component, true);
                }
                None => warn!(
                    value = %value,
                    valid = %ALL_COMPONENTS_LIST.join(", "),
                    "ignoring unknown --wait component"
                ),
            }
        }
        set
    }

    /// Whether the set asks to wait for the component with this key
    pub fn is_enabled(&self, key: &str) -> bool {
        Component::from_key(key)
            .map(|c| self.waits_for(c))
            .unwrap_or(false)
    }

    /// Whether the set asks to wait for `component`
    pub fn waits_for(&self, component: Component) -> bool {
        self.flags.get(&component).copied().unwrap_or(false)
    }

    /// Enabled components in canonical order
    pub fn enabled(&self) -> impl Iterator<Item = Component> + '_ {
        Component::ALL.into_iter().filter(|c| self.waits_for(*c))
    }

    fn from_keys(keys: &[&str]) -> Self {
        let components: Vec<Component> =
            keys.iter().filter_map(|k| Component::from_key(k)).collect();
        Self::from_components(&components)
    }

    fn from_components(enabled: &[Component]) -> Self {
        let flags = Component::ALL
            .into_iter()
            .map(|c| (c, enabled.contains(&c)))
            .collect();
        Self { flags }
    }
}

impl fmt::Display for ComponentSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<&str> = self.enabled().map(|c| c.key()).collect();
        if keys.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&keys.join(","))
        }
    }
}

/// Whether `set` asks to wait for anything at all
pub fn should_wait(set: &ComponentSet) -> bool {
    ALL_COMPONENTS_LIST.iter().any(|key| set.is_enabled(key))
}
