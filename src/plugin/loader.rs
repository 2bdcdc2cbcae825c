//! Finding plugins by name and checking they speak our API.

use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use super::{API_VERSION_MAJOR, API_VERSION_MINOR};
use crate::host::api::PluginHandle;

/// A plugin's entry point. Returning an error aborts the load.
pub type InitFn = Box<dyn FnOnce(PluginHandle) -> anyhow::Result<()> + Send>;
/// Runs once when the plugin is unloaded.
pub type FreeFn = Box<dyn FnOnce() + Send>;

/// What a loader hands back for a plugin name, before any checks.
pub struct PluginModule {
    pub api_major: u16,
    pub api_minor: u16,
    pub name: Option<String>,
    pub init: Option<InitFn>,
    pub free: Option<FreeFn>,
}

impl PluginModule {
    /// A module built against this crate's API version.
    pub fn new(name: &str, init: InitFn, free: FreeFn) -> Self {
        Self {
            api_major: API_VERSION_MAJOR,
            api_minor: API_VERSION_MINOR,
            name: Some(name.to_owned()),
            init: Some(init),
            free: Some(free),
        }
    }
}

impl fmt::Debug for PluginModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginModule")
            .field("api", &(self.api_major, self.api_minor))
            .field("name", &self.name)
            .field("init", &self.init.is_some())
            .field("free", &self.free.is_some())
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no plugin named {0:?}")]
    NotFound(String),

    #[error(
        "plugin {name:?} wants API {}.{}, runtime provides {}.{}",
        .found.0, .found.1, API_VERSION_MAJOR, API_VERSION_MINOR
    )]
    Version { name: String, found: (u16, u16) },

    #[error("plugin {requested:?} calls itself {found:?}")]
    NameMismatch { requested: String, found: String },

    #[error("plugin {requested:?} does not declare a name")]
    Unnamed { requested: String },

    #[error("plugin {name:?} has no {symbol} entry point")]
    MissingSymbol { name: String, symbol: &'static str },

    #[error("plugin {name:?} failed to init: {source:#}")]
    Init {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

/// A module that passed the handshake, ready for init.
pub struct Verified {
    pub name: String,
    pub init: InitFn,
    pub free: FreeFn,
}

/// Check version, name and entry points, in that order.
pub fn verify(requested: &str, module: PluginModule) -> Result<Verified, LoadError> {
    if module.api_major != API_VERSION_MAJOR {
        return Err(LoadError::Version {
            name: requested.to_owned(),
            found: (module.api_major, module.api_minor),
        });
    }
    if module.api_minor > API_VERSION_MINOR {
        log::warn!(
            "plugin {requested:?} was built for API {}.{}, newer than {API_VERSION_MAJOR}.{API_VERSION_MINOR}",
            module.api_major,
            module.api_minor
        );
    }

    match &module.name {
        Some(name) if name == requested => {}
        Some(found) => {
            return Err(LoadError::NameMismatch {
                requested: requested.to_owned(),
                found: found.clone(),
            })
        }
        None => {
            return Err(LoadError::Unnamed {
                requested: requested.to_owned(),
            })
        }
    }

    let missing = |symbol| LoadError::MissingSymbol {
        name: requested.to_owned(),
        symbol,
    };
    let init = module.init.ok_or_else(|| missing("init"))?;
    let free = module.free.ok_or_else(|| missing("free"))?;

    Ok(Verified {
        name: requested.to_owned(),
        init,
        free,
    })
}

pub trait PluginLoader: Send + Sync {
    fn load(&self, name: &str) -> Result<PluginModule, LoadError>;
}

type Factory = Box<dyn Fn() -> PluginModule + Send + Sync>;

/// Resolves names against plugins compiled into the binary.
#[derive(Default)]
pub struct StaticLoader {
    factories: HashMap<String, Factory>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> PluginModule + Send + Sync + 'static,
    {
        self.factories.insert(name.to_owned(), Box::new(factory));
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl PluginLoader for StaticLoader {
    fn load(&self, name: &str) -> Result<PluginModule, LoadError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| LoadError::NotFound(name.to_owned()))?;
        Ok(factory())
    }
}

#[cfg(test)]
mod test {
    use super::{verify, LoadError, PluginLoader, PluginModule, StaticLoader};
    use crate::plugin::API_VERSION_MAJOR;

    fn module(name: &str) -> PluginModule {
        PluginModule::new(name, Box::new(|_| Ok(())), Box::new(|| {}))
    }

    #[test]
    fn accepts_matching_module() {
        let verified = verify("demo", module("demo")).unwrap();
        assert_eq!(verified.name, "demo");
    }

    #[test]
    fn rejects_other_major() {
        let mut m = module("demo");
        m.api_major = API_VERSION_MAJOR + 1;
        let err = verify("demo", m).err().unwrap();
        assert!(matches!(err, LoadError::Version { .. }));
        assert!(err.to_string().contains("wants API 2.0"));
    }

    #[test]
    fn newer_minor_is_only_a_warning() {
        let mut m = module("demo");
        m.api_minor += 1;
        assert!(verify("demo", m).is_ok());
    }

    #[test]
    fn rejects_name_mismatch() {
        let err = verify("demo", module("other")).err().unwrap();
        assert_eq!(err.to_string(), "plugin \"demo\" calls itself \"other\"");

        let mut anonymous = module("demo");
        anonymous.name = None;
        let err = verify("demo", anonymous).err().unwrap();
        assert!(matches!(err, LoadError::Unnamed { .. }));
        assert_eq!(err.to_string(), "plugin \"demo\" does not declare a name");
    }

    #[test]
    fn rejects_missing_entry_points() {
        let mut m = module("demo");
        m.init = None;
        assert!(matches!(
            verify("demo", m),
            Err(LoadError::MissingSymbol { symbol: "init", .. })
        ));

        let mut m = module("demo");
        m.free = None;
        assert!(matches!(
            verify("demo", m),
            Err(LoadError::MissingSymbol { symbol: "free", .. })
        ));
    }

    #[test]
    fn static_loader_resolves_registered_names() {
        let mut loader = StaticLoader::new();
        loader.register("demo", || module("demo"));
        assert!(loader.load("demo").is_ok());
        assert!(matches!(loader.load("missing"), Err(LoadError::NotFound(_))));
        assert_eq!(loader.names(), vec!["demo"]);
    }
}
