//! Protocol dispatcher
//!
//! Maps a protocol name to a registered connection factory. The factory
//! inspects the `connection_type` option to pick its concrete variant, so
//! new transports and variants plug in without touching callers. The WinRM
//! and Telnet collaborators register themselves here from their own
//! crates; `ssh` and `local` are built in.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use tracing::debug;

use crate::connection::HostConnection;
use crate::error::{Result, TetherError};
use crate::options::ConnectionOptions;

/// Builds a live connection from validated options.
///
/// Factories validate their own required options (enumerating every
/// missing key, not just the first) before any network I/O.
#[async_trait]
pub trait ProtocolFactory: Send + Sync {
    async fn connect(&self, options: &ConnectionOptions) -> Result<Arc<dyn HostConnection>>;
}

static REGISTRY: Lazy<RwLock<HashMap<String, Arc<dyn ProtocolFactory>>>> = Lazy::new(|| {
    let mut factories: HashMap<String, Arc<dyn ProtocolFactory>> = HashMap::new();
    factories.insert("local".to_string(), Arc::new(crate::local::LocalFactory));
    factories.insert("ssh".to_string(), Arc::new(crate::ssh::SshFactory));
    RwLock::new(factories)
});

/// Register a factory for a protocol name.
///
/// Fails if the name is already taken; transports are registered once at
/// startup, never swapped out underneath live connections.
pub fn register(name: &str, factory: Arc<dyn ProtocolFactory>) -> Result<()> {
    let mut registry = REGISTRY
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if registry.contains_key(name) {
        return Err(TetherError::config(format!(
            "Protocol already registered: {}",
            name
        )));
    }
    registry.insert(name.to_string(), factory);
    Ok(())
}

/// Open a connection using the factory registered for `protocol`.
pub async fn connect(
    protocol: &str,
    options: &ConnectionOptions,
) -> Result<Arc<dyn HostConnection>> {
    let factory = {
        let registry = REGISTRY
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        registry.get(protocol).cloned()
    };
    let factory = factory.ok_or_else(|| TetherError::UnknownProtocol(protocol.to_string()))?;
    debug!("Dispatching {} connection", protocol);
    factory.connect(options).await
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RefusingFactory;

    #[async_trait]
    impl ProtocolFactory for RefusingFactory {
        async fn connect(&self, _options: &ConnectionOptions) -> Result<Arc<dyn HostConnection>> {
            Err(TetherError::connection("refused by test factory"))
        }
    }

    #[tokio::test]
    async fn test_unknown_protocol() {
        let options = ConnectionOptions::new();
        match connect("gopher", &options).await {
            Err(TetherError::UnknownProtocol(name)) => assert_eq!(name, "gopher"),
            other => panic!("expected UnknownProtocol, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_registered_factory_is_dispatched() {
        register("refusing-test", Arc::new(RefusingFactory)).unwrap();
        let options = ConnectionOptions::new();
        match connect("refusing-test", &options).await {
            Err(TetherError::Connection(msg)) => assert!(msg.contains("test factory")),
            other => panic!("expected Connection error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        register("dup-test", Arc::new(RefusingFactory)).unwrap();
        assert!(register("dup-test", Arc::new(RefusingFactory)).is_err());
    }

    #[test]
    fn test_builtins_present() {
        let registry = REGISTRY.read().unwrap();
        assert!(registry.contains_key("ssh"));
        assert!(registry.contains_key("local"));
    }
}
