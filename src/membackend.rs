//! `MemBackend` (A4): a concrete, in-memory [`Backend`](crate::backend::Backend)
//! implementation. Not a network client — a stand-in so the gateway runs
//! standalone and so integration tests have something deterministic to
//! drive. Grounded on the reference server's `memfs.rs`, simplified from its
//! segment tree to a flat `HashMap<String, Node>` keyed by the normalized
//! path string, since `MemBackend` has no directory-handle concept to
//! preserve across renames.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::SystemTime;

use uuid::Uuid;

use crate::backend::{Backend, BackendError, BackendFuture};
use crate::davpath::DavPathRef;
use crate::store::{DeadProp, NodeMeta, StoreItem};
use crate::upload::{ChunkCredentials, PartCredential};

#[derive(Clone)]
enum Node {
    Dir(NodeMeta),
    File(NodeMeta, Vec<u8>),
}

impl Node {
    fn meta(&self) -> &NodeMeta {
        match self {
            Node::Dir(m) | Node::File(m, _) => m,
        }
    }

    fn meta_mut(&mut self) -> &mut NodeMeta {
        match self {
            Node::Dir(m) | Node::File(m, _) => m,
        }
    }

    fn to_item(&self) -> StoreItem {
        match self {
            Node::Dir(m) => StoreItem::Collection(m.clone()),
            Node::File(m, _) => StoreItem::Item(m.clone()),
        }
    }
}

struct PendingUpload {
    path: String,
    parts: HashMap<u32, Vec<u8>>,
}

struct State {
    nodes: HashMap<String, Node>,
    uploads: HashMap<String, PendingUpload>,
}

/// Quota reported by `MemBackend`: a fixed 1 GiB, just so
/// `quota-available-bytes`/`quota-used-bytes` have something to source from.
const FIXED_QUOTA: u64 = 1024 * 1024 * 1024;

pub struct MemBackend {
    state: Mutex<State>,
}

fn new_meta(full_path: &str) -> NodeMeta {
    let name = full_path.trim_end_matches('/').rsplit('/').next().unwrap_or("").to_string();
    let now = SystemTime::now();
    NodeMeta {
        name,
        full_path: full_path.to_string(),
        len: 0,
        etag: Uuid::new_v4().to_string(),
        created: now,
        modified: now,
        executable: false,
        dead_props: HashMap::new(),
    }
}

fn key(path: &DavPathRef) -> String {
    let mut s = path.as_url_string();
    if s.len() > 1 && s.ends_with('/') {
        s.pop();
    }
    if s.is_empty() {
        s.push('/');
    }
    s
}

fn parent_key(k: &str) -> String {
    if k == "/" {
        return "/".to_string();
    }
    match k.rfind('/') {
        Some(0) => "/".to_string(),
        Some(i) => k[..i].to_string(),
        None => "/".to_string(),
    }
}

impl MemBackend {
    pub fn new() -> MemBackend {
        let mut nodes = HashMap::new();
        nodes.insert("/".to_string(), Node::Dir(new_meta("/")));
        MemBackend { state: Mutex::new(State { nodes, uploads: HashMap::new() }) }
    }

    fn touch_parent(state: &mut State, k: &str) {
        let pk = parent_key(k);
        if let Some(Node::Dir(m)) = state.nodes.get_mut(&pk) {
            m.modified = SystemTime::now();
        }
    }
}

impl Default for MemBackend {
    fn default() -> MemBackend {
        MemBackend::new()
    }
}

impl Backend for MemBackend {
    fn get_item<'a>(&'a self, path: &'a DavPathRef) -> BackendFuture<'a, StoreItem> {
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            state.nodes.get(&key(path)).map(Node::to_item).ok_or(BackendError::NotFound)
        })
    }

    fn list_items<'a>(&'a self, path: &'a DavPathRef) -> BackendFuture<'a, Vec<StoreItem>> {
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            let k = key(path);
            match state.nodes.get(&k) {
                Some(Node::Dir(_)) => {},
                Some(Node::File(_, _)) => return Err(BackendError::Forbidden),
                None => return Err(BackendError::NotFound),
            }
            let prefix = if k == "/" { "/".to_string() } else { format!("{}/", k) };
            let mut items = Vec::new();
            for (child_key, node) in state.nodes.iter() {
                if child_key == &k {
                    continue;
                }
                if let Some(rest) = child_key.strip_prefix(&prefix) {
                    if !rest.contains('/') {
                        items.push(node.to_item());
                    }
                }
            }
            Ok(items)
        })
    }

    fn create_directory<'a>(&'a self, path: &'a DavPathRef) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            let k = key(path);
            if state.nodes.contains_key(&k) {
                return Err(BackendError::Exists);
            }
            if !state.nodes.contains_key(&parent_key(&k)) {
                return Err(BackendError::Conflict);
            }
            state.nodes.insert(k.clone(), Node::Dir(new_meta(&k)));
            Self::touch_parent(&mut state, &k);
            Ok(())
        })
    }

    fn delete_item<'a>(&'a self, path: &'a DavPathRef) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            let k = key(path);
            if k == "/" {
                return Err(BackendError::Forbidden);
            }
            if !state.nodes.contains_key(&k) {
                return Err(BackendError::NotFound);
            }
            let prefix = format!("{}/", k);
            state.nodes.retain(|nk, _| nk != &k && !nk.starts_with(&prefix));
            Self::touch_parent(&mut state, &k);
            Ok(())
        })
    }

    fn move_item<'a>(&'a self, from: &'a DavPathRef, to: &'a DavPathRef) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            let fk = key(from);
            let tk = key(to);
            if !state.nodes.contains_key(&fk) {
                return Err(BackendError::NotFound);
            }
            if !state.nodes.contains_key(&parent_key(&tk)) {
                return Err(BackendError::Conflict);
            }
            let from_prefix = format!("{}/", fk);
            let moved_keys: Vec<String> =
                state.nodes.keys().filter(|nk| nk.starts_with(&from_prefix)).cloned().collect();
            for child_key in moved_keys {
                let suffix = &child_key[from_prefix.len()..];
                let new_key = format!("{}/{}", tk, suffix);
                if let Some(mut node) = state.nodes.remove(&child_key) {
                    node.meta_mut().full_path = new_key.clone();
                    state.nodes.insert(new_key, node);
                }
            }
            if let Some(mut node) = state.nodes.remove(&fk) {
                node.meta_mut().full_path = tk.clone();
                node.meta_mut().name =
                    tk.trim_end_matches('/').rsplit('/').next().unwrap_or("").to_string();
                state.nodes.insert(tk.clone(), node);
            }
            Self::touch_parent(&mut state, &fk);
            Self::touch_parent(&mut state, &tk);
            Ok(())
        })
    }

    fn read_bytes<'a>(&'a self, path: &'a DavPathRef) -> BackendFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            match state.nodes.get(&key(path)) {
                Some(Node::File(_, data)) => Ok(data.clone()),
                Some(Node::Dir(_)) => Err(BackendError::Forbidden),
                None => Err(BackendError::NotFound),
            }
        })
    }

    fn write_bytes<'a>(&'a self, path: &'a DavPathRef, data: Vec<u8>) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            let k = key(path);
            if !state.nodes.contains_key(&parent_key(&k)) {
                return Err(BackendError::Conflict);
            }
            if matches!(state.nodes.get(&k), Some(Node::Dir(_))) {
                return Err(BackendError::Conflict);
            }
            let len = data.len() as u64;
            let mut meta = match state.nodes.remove(&k) {
                Some(Node::File(m, _)) => m,
                _ => new_meta(&k),
            };
            meta.len = len;
            meta.modified = SystemTime::now();
            meta.etag = Uuid::new_v4().to_string();
            state.nodes.insert(k.clone(), Node::File(meta, data));
            Self::touch_parent(&mut state, &k);
            Ok(())
        })
    }

    fn get_quota<'a>(&'a self) -> BackendFuture<'a, (u64, Option<u64>)> {
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            let used: u64 = state
                .nodes
                .values()
                .map(|n| match n {
                    Node::File(_, data) => data.len() as u64,
                    Node::Dir(_) => 0,
                })
                .sum();
            Ok((used, Some(FIXED_QUOTA)))
        })
    }

    fn patch_dead_props<'a>(
        &'a self,
        path: &'a DavPathRef,
        set: Vec<DeadProp>,
        remove: Vec<DeadProp>,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            let k = key(path);
            let node = state.nodes.get_mut(&k).ok_or(BackendError::NotFound)?;
            let props = &mut node.meta_mut().dead_props;
            for p in remove {
                props.remove(&StoreItem::dead_prop_key(&p.namespace, &p.name));
            }
            for p in set {
                props.insert(StoreItem::dead_prop_key(&p.namespace, &p.name), p);
            }
            Ok(())
        })
    }

    fn start_chunk_upload<'a>(
        &'a self,
        path: &'a DavPathRef,
        chunk_count: u32,
    ) -> BackendFuture<'a, ChunkCredentials> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            let confirm_key = Uuid::new_v4().to_string();
            state.uploads.insert(
                confirm_key.clone(),
                PendingUpload { path: key(path), parts: HashMap::new() },
            );
            Ok(fresh_credentials(&confirm_key, chunk_count))
        })
    }

    fn renew_chunk_upload<'a>(
        &'a self,
        confirm_key: &'a str,
        part_numbers: &'a [u32],
    ) -> BackendFuture<'a, ChunkCredentials> {
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            if !state.uploads.contains_key(confirm_key) {
                return Err(BackendError::NotFound);
            }
            let parts = part_numbers
                .iter()
                .map(|&n| PartCredential {
                    part_number: n,
                    url: format!("mem://upload/{}/{}", confirm_key, n),
                    credential: Uuid::new_v4().to_string(),
                    expiration: SystemTime::now() + std::time::Duration::from_secs(3600),
                })
                .collect();
            Ok(ChunkCredentials { confirm_key: confirm_key.to_string(), parts })
        })
    }

    fn upload_chunk<'a>(
        &'a self,
        confirm_key: &'a str,
        part_number: u32,
        data: Vec<u8>,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            let upload = state.uploads.get_mut(confirm_key).ok_or(BackendError::NotFound)?;
            upload.parts.insert(part_number, data);
            Ok(())
        })
    }

    fn confirm_upload<'a>(&'a self, confirm_key: &'a str, _crc64: Option<u64>) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            let upload = state.uploads.remove(confirm_key).ok_or(BackendError::NotFound)?;
            let mut part_numbers: Vec<u32> = upload.parts.keys().copied().collect();
            part_numbers.sort_unstable();
            let mut data = Vec::new();
            for n in part_numbers {
                data.extend_from_slice(&upload.parts[&n]);
            }
            let path_key = upload.path;
            if !state.nodes.contains_key(&parent_key(&path_key)) {
                return Err(BackendError::Conflict);
            }
            let len = data.len() as u64;
            let mut meta = new_meta(&path_key);
            meta.len = len;
            meta.etag = Uuid::new_v4().to_string();
            state.nodes.insert(path_key.clone(), Node::File(meta, data));
            Self::touch_parent(&mut state, &path_key);
            Ok(())
        })
    }
}

fn fresh_credentials(confirm_key: &str, chunk_count: u32) -> ChunkCredentials {
    let parts = (1..=chunk_count)
        .map(|n| PartCredential {
            part_number: n,
            url: format!("mem://upload/{}/{}", confirm_key, n),
            credential: Uuid::new_v4().to_string(),
            expiration: SystemTime::now() + std::time::Duration::from_secs(3600),
        })
        .collect();
    ChunkCredentials { confirm_key: confirm_key.to_string(), parts }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::davpath::DavPath;

    #[tokio::test]
    async fn create_read_delete_roundtrip() {
        let be = MemBackend::new();
        let p = DavPath::new("/docs/a.txt").unwrap();
        assert!(matches!(be.get_item(&p).await, Err(BackendError::NotFound)));
        be.write_bytes(&p, b"hi".to_vec()).await.unwrap_err();
        let dir = DavPath::new("/docs/").unwrap();
        be.create_directory(&dir).await.unwrap();
        be.write_bytes(&p, b"hi".to_vec()).await.unwrap();
        let item = be.get_item(&p).await.unwrap();
        assert_eq!(item.meta().len, 2);
        be.delete_item(&p).await.unwrap();
        assert!(matches!(be.get_item(&p).await, Err(BackendError::NotFound)));
    }

    #[tokio::test]
    async fn list_items_excludes_grandchildren() {
        let be = MemBackend::new();
        let dir = DavPath::new("/docs/").unwrap();
        be.create_directory(&dir).await.unwrap();
        let sub = DavPath::new("/docs/sub/").unwrap();
        be.create_directory(&sub).await.unwrap();
        let f = DavPath::new("/docs/sub/a.txt").unwrap();
        be.write_bytes(&f, b"x".to_vec()).await.unwrap();
        let root = DavPath::new("/").unwrap();
        let items = be.list_items(&root).await.unwrap();
        assert_eq!(items.len(), 1);
    }
}
