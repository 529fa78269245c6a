//! Create-or-update helper.

use std::fmt;

use refract_core::{ObjectKey, Resource};

use crate::error::{Result, StoreError};
use crate::store::ResourceStore;

/// What [`create_or_update`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationResult {
    Created,
    Updated,
    Unchanged,
}

impl fmt::Display for OperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::Updated => f.write_str("updated"),
            Self::Unchanged => f.write_str("unchanged"),
        }
    }
}

/// Fetch the object at `key` (or start from an empty one), apply `mutate`,
/// then write it back only if something changed.
///
/// # Errors
///
/// Returns whatever `mutate` returns, [`StoreError::Invalid`] when `mutate`
/// moves the object to another key, and any store error from the write.
pub async fn create_or_update<S, F>(
    store: &S,
    key: &ObjectKey,
    mutate: F,
) -> Result<(OperationResult, Resource)>
where
    S: ResourceStore + ?Sized,
    F: FnOnce(&mut Resource) -> Result<()> + Send,
{
    let existing = match store.get(key).await {
        Ok(existing) => Some(existing),
        Err(e) if e.is_not_found() => None,
        Err(e) => return Err(e),
    };

    let mut desired = existing.clone().unwrap_or_else(|| Resource::empty(key));
    mutate(&mut desired)?;
    if desired.key() != *key {
        return Err(StoreError::invalid(format!(
            "mutation moved {key} to {}",
            desired.key()
        )));
    }

    match existing {
        None => {
            let created = store.create(desired).await?;
            Ok((OperationResult::Created, created))
        }
        Some(existing) if existing == desired => Ok((OperationResult::Unchanged, existing)),
        Some(_) => {
            let updated = store.update(desired).await?;
            Ok((OperationResult::Updated, updated))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use refract_core::{Kind, Secret};

    fn set_entry(value: &'static str) -> impl FnOnce(&mut Resource) -> Result<()> + Send {
        move |resource| {
            let Resource::Secret(secret) = resource else {
                return Err(StoreError::invalid("not a secret"));
            };
            secret.data.insert("k".into(), value.as_bytes().to_vec());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_create_then_update_then_unchanged() {
        let store = InMemoryStore::new();
        let key = ObjectKey::new(Kind::Secret, "ns", "out");

        let (op, created) = create_or_update(&store, &key, set_entry("a")).await.unwrap();
        assert_eq!(op, OperationResult::Created);

        let (op, updated) = create_or_update(&store, &key, set_entry("b")).await.unwrap();
        assert_eq!(op, OperationResult::Updated);
        assert!(updated.meta().resource_version > created.meta().resource_version);

        let (op, same) = create_or_update(&store, &key, set_entry("b")).await.unwrap();
        assert_eq!(op, OperationResult::Unchanged);
        assert_eq!(same, updated);

        let secret = Secret::try_from(same).unwrap();
        assert_eq!(secret.data["k"], b"b".to_vec());
    }

    #[tokio::test]
    async fn test_mutation_error_aborts_write() {
        let store = InMemoryStore::new();
        let key = ObjectKey::new(Kind::Secret, "ns", "out");
        let result = create_or_update(&store, &key, |_| Err(StoreError::invalid("nope"))).await;
        assert!(result.is_err());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_mutation_cannot_rename() {
        let store = InMemoryStore::new();
        let key = ObjectKey::new(Kind::Secret, "ns", "out");
        let result = create_or_update(&store, &key, |r| {
            r.meta_mut().name = "other".into();
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(StoreError::Invalid { .. })));
    }
}
