//! The explicit lock-factory registry, plus a process-wide default instance
//! for callers who want the convenience of not threading one through.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::errors::LedgerError;
use crate::lock::{CanonicalLock, HashAlgorithm, Lock};

/// A factory that reconstructs a [`Lock`] from its canonical form.
pub type LockFactory = Arc<dyn Fn(&CanonicalLock) -> Result<Lock, LedgerError> + Send + Sync>;

/// Maps a lock's `"type"` tag to the factory that reconstructs it.
///
/// `None`, `Owner` and `PublicKey` are always available. Extension variants
/// (`TimeLock`, `Multisig`, `HashLock`) and any caller-defined variant must
/// be registered with [`LockRegistry::register`] before
/// [`LockRegistry::from_canonical`] can reconstruct them. A registered
/// handler takes precedence over a built-in of the same tag.
pub struct LockRegistry {
    builtins: HashMap<String, LockFactory>,
    custom: HashMap<String, LockFactory>,
}

impl std::fmt::Debug for LockRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockRegistry")
            .field("builtin_tags", &self.builtins.keys().collect::<Vec<_>>())
            .field("custom_tags", &self.custom.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn get_str<'a>(form: &'a CanonicalLock, key: &str) -> Result<&'a str, LedgerError> {
    form.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| LedgerError::Internal(format!("lock canonical form missing {key:?}")))
}

fn get_i64(form: &CanonicalLock, key: &str) -> Result<i64, LedgerError> {
    form.get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| LedgerError::Internal(format!("lock canonical form missing {key:?}")))
}

impl Default for LockRegistry {
    fn default() -> Self {
        LockRegistry::new()
    }
}

impl LockRegistry {
    /// A registry holding only the always-available built-ins.
    pub fn new() -> Self {
        let mut builtins: HashMap<String, LockFactory> = HashMap::new();

        builtins.insert(
            "none".into(),
            Arc::new(|_form: &CanonicalLock| Ok(Lock::None)),
        );
        builtins.insert(
            "owner".into(),
            Arc::new(|form: &CanonicalLock| Ok(Lock::owner(get_str(form, "name")?))),
        );
        builtins.insert(
            "pubkey".into(),
            Arc::new(|form: &CanonicalLock| Ok(Lock::public_key(get_str(form, "key")?))),
        );

        LockRegistry {
            builtins,
            custom: HashMap::new(),
        }
    }

    /// Registers the `timelock`, `multisig` and `hashlock` extension
    /// variants this crate specifies but does not enable by default.
    pub fn with_extensions() -> Self {
        let mut registry = LockRegistry::new();
        registry.register("timelock", Arc::new(from_canonical_timelock));
        registry.register("multisig", Arc::new(from_canonical_multisig));
        registry.register("hashlock", Arc::new(from_canonical_hashlock));
        registry
    }

    /// Registers (or overrides) the factory for `tag`.
    pub fn register(&mut self, tag: impl Into<String>, factory: LockFactory) {
        self.custom.insert(tag.into(), factory);
    }

    /// True if `tag` has a custom or built-in handler.
    pub fn has_handler(&self, tag: &str) -> bool {
        self.custom.contains_key(tag) || self.builtins.contains_key(tag)
    }

    /// All tags this registry can currently reconstruct.
    pub fn registered_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self
            .builtins
            .keys()
            .chain(self.custom.keys())
            .cloned()
            .collect();
        tags.sort();
        tags.dedup();
        tags
    }

    /// Clears custom handlers, restoring the always-available built-ins.
    /// Exists primarily to make tests hermetic.
    pub fn reset(&mut self) {
        self.custom.clear();
    }

    /// Reconstructs a [`Lock`] from its canonical form, looking up the
    /// handler for `form["type"]`. Missing `type` or an unknown tag is a
    /// construction error, as is a handler's result type-checking failure
    /// (handlers here always return `Lock`, so the latter can't occur for
    /// in-crate factories, but caller-registered factories are still
    /// expected to return a value satisfying [`crate::OutputLock`]).
    pub fn from_canonical(&self, form: &CanonicalLock) -> Result<Lock, LedgerError> {
        let tag = get_str(form, "type")?;
        let factory = self
            .custom
            .get(tag)
            .or_else(|| self.builtins.get(tag))
            .ok_or_else(|| LedgerError::Internal(format!("no lock handler registered for type {tag:?}")))?;
        factory(form)
    }
}

// The single-argument factory signature (`fn(canonical_form) -> Lock`) has no
// way to pass the calling registry down to a nested lock, so `inner` locks
// inside timelock/hashlock always recurse through the process-wide default
// registry rather than whichever `LockRegistry` instance is resolving the
// outer lock. Callers who need a fully isolated registry for nested
// composite locks should register their inner tags globally too.
fn from_canonical_timelock(form: &CanonicalLock) -> Result<Lock, LedgerError> {
    let unlock_time = get_i64(form, "unlock_time")?;
    let inner_value = form
        .get("inner")
        .ok_or_else(|| LedgerError::Internal("timelock missing inner".into()))?;
    let inner_map = inner_value
        .as_object()
        .ok_or_else(|| LedgerError::Internal("timelock inner must be an object".into()))?;
    let inner = default_registry_handle().lock().from_canonical(inner_map)?;
    Ok(Lock::already_unlocked(inner, unlock_time))
}

fn from_canonical_multisig(form: &CanonicalLock) -> Result<Lock, LedgerError> {
    let threshold = get_i64(form, "threshold")? as usize;
    let signers = form
        .get("signers")
        .and_then(|v| v.as_array())
        .ok_or_else(|| LedgerError::Internal("multisig missing signers".into()))?
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| LedgerError::Internal("multisig signer must be a string".into()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Lock::multisig(threshold, signers)
}

fn from_canonical_hashlock(form: &CanonicalLock) -> Result<Lock, LedgerError> {
    let hash = get_str(form, "hash")?.to_string();
    let algorithm: HashAlgorithm = serde_json::from_value(
        form.get("algorithm")
            .cloned()
            .ok_or_else(|| LedgerError::Internal("hashlock missing algorithm".into()))?,
    )
    .map_err(|e| LedgerError::Internal(format!("invalid hashlock algorithm: {e}")))?;
    let inner = match form.get("inner") {
        None | Some(serde_json::Value::Null) => None,
        Some(value) => {
            let inner_map = value
                .as_object()
                .ok_or_else(|| LedgerError::Internal("hashlock inner must be an object".into()))?;
            Some(default_registry_handle().lock().from_canonical(inner_map)?)
        }
    };
    Ok(Lock::hash_locked(hash, algorithm, inner))
}

/// A process-wide default registry for callers who don't want to thread one
/// through explicitly. The core never requires this — every entry point
/// that needs a registry also accepts `&LockRegistry` directly.
static DEFAULT_REGISTRY: OnceLock<Mutex<LockRegistry>> = OnceLock::new();

fn default_registry_handle() -> &'static Mutex<LockRegistry> {
    DEFAULT_REGISTRY.get_or_init(|| Mutex::new(LockRegistry::with_extensions()))
}

/// Registers `tag` in the process-wide default registry.
pub fn register_global(tag: impl Into<String>, factory: LockFactory) {
    default_registry_handle().lock().register(tag, factory);
}

/// True if the process-wide default registry has a handler for `tag`.
pub fn has_global_handler(tag: &str) -> bool {
    default_registry_handle().lock().has_handler(tag)
}

/// All tags the process-wide default registry can currently reconstruct.
pub fn global_registered_tags() -> Vec<String> {
    default_registry_handle().lock().registered_tags()
}

/// Clears custom handlers from the process-wide default registry.
pub fn reset_global() {
    default_registry_handle().lock().reset();
}

/// Reconstructs a lock via the process-wide default registry.
pub fn from_canonical_global(form: &CanonicalLock) -> Result<Lock, LedgerError> {
    default_registry_handle().lock().from_canonical(form)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::OutputLock;

    #[test]
    fn builtins_available_without_registration() {
        let registry = LockRegistry::new();
        assert!(registry.has_handler("none"));
        assert!(registry.has_handler("owner"));
        assert!(registry.has_handler("pubkey"));
        assert!(!registry.has_handler("timelock"));
    }

    #[test]
    fn unknown_tag_is_a_construction_error() {
        let registry = LockRegistry::new();
        let mut form = CanonicalLock::new();
        form.insert("type".into(), "mystery".into());
        assert!(registry.from_canonical(&form).is_err());
    }

    #[test]
    fn missing_type_is_a_construction_error() {
        let registry = LockRegistry::new();
        let form = CanonicalLock::new();
        assert!(registry.from_canonical(&form).is_err());
    }

    #[test]
    fn custom_handler_overrides_builtin_of_same_tag() {
        let mut registry = LockRegistry::new();
        registry.register("owner", Arc::new(|_form: &CanonicalLock| Ok(Lock::owner("overridden"))));
        let mut form = CanonicalLock::new();
        form.insert("type".into(), "owner".into());
        form.insert("name".into(), "alice".into());
        let lock = registry.from_canonical(&form).unwrap();
        assert_eq!(lock, Lock::owner("overridden"));
    }

    #[test]
    fn reset_clears_custom_but_keeps_builtins() {
        let mut registry = LockRegistry::new();
        registry.register("timelock", Arc::new(from_canonical_timelock));
        assert!(registry.has_handler("timelock"));
        registry.reset();
        assert!(!registry.has_handler("timelock"));
        assert!(registry.has_handler("owner"));
    }

    #[test]
    fn with_extensions_registers_timelock_multisig_hashlock() {
        let registry = LockRegistry::with_extensions();
        assert!(registry.has_handler("timelock"));
        assert!(registry.has_handler("multisig"));
        assert!(registry.has_handler("hashlock"));
    }

    #[test]
    fn from_canonical_reconstructs_multisig() {
        let registry = LockRegistry::with_extensions();
        let original = Lock::multisig(2, vec!["alice".into(), "bob".into()]).unwrap();
        let restored = registry.from_canonical(&original.to_canonical()).unwrap();
        assert_eq!(original, restored);
    }
}
