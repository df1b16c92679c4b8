//! Store abstraction (C4): adapts a [`Backend`](crate::backend::Backend)
//! into the `StoreItem` shape the property system, lock manager and method
//! handlers operate on.
//!
//! `Store` knows about paths, collections and HTTP-flavored statuses.
//! `Backend` knows nothing about HTTP or DAV XML; it just moves bytes and
//! metadata around. This split mirrors the reference server's
//! `DavFileSystem`/`DavMetaData` split, generalized to a tagged variant
//! instead of a trait-object hierarchy.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use crate::backend::{Backend, BackendError};
use crate::davpath::DavPathRef;
use crate::errors::{DavError, DavResult};

/// One stored dead (opaque, client-set) property, keyed by `(namespace,
/// name)` the same way the reference server's `DavProp` is keyed.
#[derive(Debug, Clone)]
pub struct DeadProp {
    pub name: String,
    pub prefix: Option<String>,
    pub namespace: Option<String>,
    /// Raw serialized XML of the property's content, if any.
    pub xml: Option<Vec<u8>>,
}

/// Capability fields shared by both `Item` and `Collection`.
#[derive(Debug, Clone)]
pub struct NodeMeta {
    pub name: String,
    pub full_path: String,
    pub len: u64,
    pub etag: String,
    pub created: SystemTime,
    pub modified: SystemTime,
    pub executable: bool,
    pub dead_props: HashMap<String, DeadProp>,
}

impl NodeMeta {
    pub fn is_collection(&self) -> bool {
        false
    }
}

/// A resource in the store: either a plain item or a collection. Modeled as
/// a tagged variant (SPEC_FULL.md §9) rather than a trait-object hierarchy.
#[derive(Debug, Clone)]
pub enum StoreItem {
    Item(NodeMeta),
    Collection(NodeMeta),
}

impl StoreItem {
    pub fn meta(&self) -> &NodeMeta {
        match self {
            StoreItem::Item(m) | StoreItem::Collection(m) => m,
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, StoreItem::Collection(_))
    }

    pub fn dead_prop_key(ns: &Option<String>, name: &str) -> String {
        format!("{}{}", ns.as_deref().unwrap_or(""), name)
    }
}

pub(crate) fn backenderror_to_daverror(e: BackendError) -> DavError {
    match e {
        BackendError::NotFound => DavError::NotFound,
        BackendError::Exists | BackendError::Conflict => DavError::Conflict,
        BackendError::Forbidden => DavError::Forbidden,
        BackendError::Transient => DavError::BackendTransient,
        BackendError::Permanent => DavError::BackendPermanent,
    }
}

/// Thin wrapper around a [`Backend`] presenting store-shaped operations to
/// the method handlers.
#[derive(Clone)]
pub struct Store<B: Backend> {
    backend: Arc<B>,
}

impl<B: Backend> Store<B> {
    pub fn new(backend: Arc<B>) -> Store<B> {
        Store { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// A cloned handle to the backend `Arc`, for callers (the chunked
    /// upload state machine) that need to hold it across an owned task.
    pub fn backend_arc(&self) -> Arc<B> {
        self.backend.clone()
    }

    pub async fn get_item(&self, path: &DavPathRef) -> DavResult<StoreItem> {
        self.backend.get_item(path).await.map_err(backenderror_to_daverror)
    }

    pub async fn list_items(&self, path: &DavPathRef) -> DavResult<Vec<StoreItem>> {
        self.backend.list_items(path).await.map_err(backenderror_to_daverror)
    }

    /// Create a collection. Per Open Question 3 (DESIGN.md), a
    /// backend-reported `Exists`/`Conflict` on the target path is treated as
    /// success: the precondition is "a directory exists here afterwards",
    /// not "we were the ones who created it".
    pub async fn create_collection(&self, path: &DavPathRef) -> DavResult<()> {
        match self.backend.create_directory(path).await {
            Ok(()) => Ok(()),
            Err(BackendError::Exists) | Err(BackendError::Conflict) => {
                match self.backend.get_item(path).await {
                    Ok(StoreItem::Collection(_)) => Ok(()),
                    Ok(StoreItem::Item(_)) => Err(DavError::Conflict),
                    Err(e) => Err(backenderror_to_daverror(e)),
                }
            },
            Err(e) => Err(backenderror_to_daverror(e)),
        }
    }

    pub async fn delete_item(&self, path: &DavPathRef) -> DavResult<()> {
        self.backend.delete_item(path).await.map_err(backenderror_to_daverror)
    }

    pub async fn move_item(&self, from: &DavPathRef, to: &DavPathRef) -> DavResult<()> {
        self.backend.move_item(from, to).await.map_err(backenderror_to_daverror)
    }

    pub async fn read_bytes(&self, path: &DavPathRef) -> DavResult<Vec<u8>> {
        self.backend.read_bytes(path).await.map_err(backenderror_to_daverror)
    }

    pub async fn write_bytes(&self, path: &DavPathRef, data: Vec<u8>) -> DavResult<()> {
        self.backend.write_bytes(path, data).await.map_err(backenderror_to_daverror)
    }

    pub async fn get_quota(&self) -> DavResult<(u64, Option<u64>)> {
        self.backend.get_quota().await.map_err(backenderror_to_daverror)
    }

    pub async fn patch_dead_props(
        &self,
        path: &DavPathRef,
        set: Vec<DeadProp>,
        remove: Vec<DeadProp>,
    ) -> DavResult<()> {
        self.backend.patch_dead_props(path, set, remove).await.map_err(backenderror_to_daverror)
    }
}
