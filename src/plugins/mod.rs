//! Plugins compiled into the binary.

pub mod status;

use crate::plugin::loader::StaticLoader;

/// A loader that knows every built-in plugin.
pub fn builtin() -> StaticLoader {
    let mut loader = StaticLoader::new();
    loader.register(status::NAME, status::module);
    loader
}
