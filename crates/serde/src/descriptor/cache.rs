//! Shared, bounded storage for built descriptor trees.
//!
//! Trees are keyed by the identity of the root type together with the root name override, so
//! two Rust types that happen to share a serial name never share a tree.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::config::XmlConfig;
use crate::descriptor::{DescriptorTree, build_tree};
use crate::error::{Result, XmlError};
use crate::name::QName;
use crate::schema::{TypeDescriptor, TypeIdentity};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    type_name: String,
    identity: Option<TypeIdentity>,
    nullable: bool,
    root_name: Option<(String, String, String)>,
}

#[derive(Debug, Clone)]
struct CachedDefect {
    type_name: String,
    message: String,
}

type Slot = Arc<OnceCell<std::result::Result<Arc<DescriptorTree>, CachedDefect>>>;

/// Bounded cache of descriptor trees keyed by root type.
///
/// Each entry is a once-initialized slot: concurrent requests for the same key wait for a
/// single build, and failed builds are remembered so a defective type fails fast.
pub struct DescriptorCache {
    entries: Mutex<LruCache<CacheKey, Slot>>,
}

impl std::fmt::Debug for DescriptorCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorCache")
            .field("len", &self.len())
            .finish()
    }
}

impl DescriptorCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        DescriptorCache {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get_or_build(
        &self,
        type_desc: &TypeDescriptor,
        config: &XmlConfig,
        root_name: Option<&QName>,
    ) -> Result<Arc<DescriptorTree>> {
        let key = CacheKey {
            type_name: type_desc.serial_name.clone(),
            identity: type_desc.identity,
            nullable: type_desc.nullable,
            root_name: root_name.map(|q| (q.namespace.clone(), q.local.clone(), q.prefix.clone())),
        };

        // Building happens outside the lock; only slot lookup is serialized.
        let slot = {
            let mut entries = self.entries.lock();
            match entries.get(&key) {
                Some(slot) => slot.clone(),
                None => {
                    tracing::debug!(type_name = %key.type_name, "descriptor cache miss");
                    let slot: Slot = Arc::new(OnceCell::new());
                    entries.put(key, slot.clone());
                    slot
                }
            }
        };

        let outcome = slot.get_or_init(|| {
            build_tree(type_desc, config, root_name)
                .map(Arc::new)
                .map_err(|err| match err {
                    XmlError::ConfigurationDefect { type_name, message } => {
                        CachedDefect { type_name, message }
                    }
                    other => CachedDefect {
                        type_name: type_desc.serial_name.clone(),
                        message: other.to_string(),
                    },
                })
        });
        match outcome {
            Ok(tree) => Ok(Arc::clone(tree)),
            Err(defect) => Err(XmlError::defect(
                defect.type_name.clone(),
                defect.message.clone(),
            )),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ElementInfo, TypeRef, XmlAnnotation, XmlName};
    use std::thread;

    fn point() -> TypeDescriptor {
        TypeDescriptor::class("Point")
            .field("x", TypeRef::of::<i32>())
            .field("y", TypeRef::of::<i32>())
    }

    #[test]
    fn test_same_key_shares_tree() -> Result<()> {
        let cache = DescriptorCache::new(4);
        let config = XmlConfig::default();
        let first = cache.get_or_build(&point(), &config, None)?;
        let second = cache.get_or_build(&point(), &config, None)?;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);

        let renamed = cache.get_or_build(&point(), &config, Some(&QName::local("pt")))?;
        assert!(!Arc::ptr_eq(&first, &renamed));
        assert_eq!(renamed.root_descriptor().tag_name.local, "pt");
        Ok(())
    }

    #[test]
    fn test_same_serial_name_different_types() -> Result<()> {
        fn lat_point() -> TypeDescriptor {
            TypeDescriptor::class("Point").field("lat", TypeRef::of::<f64>())
        }

        let cache = DescriptorCache::new(4);
        let config = XmlConfig::default();
        let xy = cache.get_or_build(&TypeRef::from_fn(point).resolve(), &config, None)?;
        let lat = cache.get_or_build(&TypeRef::from_fn(lat_point).resolve(), &config, None)?;
        assert!(!Arc::ptr_eq(&xy, &lat));
        assert_eq!(cache.len(), 2);
        let lat_info = lat.root_descriptor().composite().unwrap();
        assert_eq!(lat_info.children[0].name, "lat");
        Ok(())
    }

    #[test]
    fn test_concurrent_builds_coalesce() {
        let cache = Arc::new(DescriptorCache::new(4));
        let config = Arc::new(XmlConfig::default());
        let trees: Vec<Arc<DescriptorTree>> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let config = Arc::clone(&config);
                thread::spawn(move || cache.get_or_build(&point(), &config, None).unwrap())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect();
        assert!(trees.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn test_defects_are_cached() {
        let broken = TypeDescriptor::class("Broken")
            .field("a", TypeRef::of::<String>())
            .element(
                ElementInfo::new("b", TypeRef::of::<String>())
                    .annotate(XmlAnnotation::SerialName(XmlName::new("a"))),
            );
        let cache = DescriptorCache::new(4);
        let config = XmlConfig::default();
        assert!(cache.get_or_build(&broken, &config, None).is_err());
        assert_eq!(cache.len(), 1);
        assert!(matches!(
            cache.get_or_build(&broken, &config, None),
            Err(XmlError::ConfigurationDefect { .. })
        ));
    }

    #[test]
    fn test_capacity_evicts_least_recently_used() -> Result<()> {
        let cache = DescriptorCache::new(1);
        let config = XmlConfig::default();
        cache.get_or_build(&point(), &config, None)?;
        cache.get_or_build(&TypeDescriptor::class("Empty"), &config, None)?;
        assert_eq!(cache.len(), 1);
        Ok(())
    }
}
