//! Object model for refract.
//!
//! Three kinds of objects live in the store:
//!
//! - `ConfigMap` - text bundle (`data: map<string, string>`)
//! - `Secret` - binary bundle (`data: map<string, bytes>`, base64 on the wire)
//! - `SecretTransform` - named inputs, output rules, and the observed status
//!
//! All objects share [`ObjectMeta`], carrying the bookkeeping the
//! reconciler relies on: owner references, annotations, finalizers and
//! the deletion marker.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod manifest;
pub mod object;
pub mod resources;
pub mod secret_transform;

pub use error::{Error, Result};
pub use manifest::{parse_manifests, render_manifests};
pub use object::{
    API_GROUP, API_VERSION, Kind, ObjectIdentity, ObjectKey, ObjectMeta, OwnerReference,
};
pub use resources::{ConfigMap, Resource, SECRET_TYPE_OPAQUE, Secret};
pub use secret_transform::{
    CONDITION_SYNCED, Condition, ConditionStatus, ConfigMapOutput, InputRef, ManagedReference,
    Output, SecretOutput, SecretTransform, SecretTransformSpec, SecretTransformStatus,
};
