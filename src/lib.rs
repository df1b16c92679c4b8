//! WebDAV gateway exposing a remote object store as a hierarchical file
//! system over HTTP (RFC 2518/4918). See `SPEC_FULL.md` for the full
//! module breakdown; briefly: [`DavHandler`] dispatches an incoming
//! request to one of the `method_*` handlers, which operate on a
//! [`Store`](store::Store) backed by a [`Backend`](backend::Backend).

pub mod backend;
pub mod body;
pub mod conditional;
pub mod config;
pub mod davheaders;
pub mod davpath;
pub mod errors;
pub mod handler;
pub mod lockmanager;
pub mod membackend;
pub mod multierror;
pub mod property;
pub mod store;
pub mod upload;
pub mod util;

mod async_stream;
mod method_copymove;
mod method_delete;
mod method_get;
mod method_lock;
mod method_mkcol;
mod method_options;
mod method_props;
mod method_put;
mod xmlutil;

pub use crate::backend::{Backend, BackendError};
pub use crate::errors::{DavError, DavResult};
pub use crate::handler::{DavConfig, DavHandler};
pub use crate::membackend::MemBackend;
pub use crate::store::Store;
pub use crate::util::{DavMethod, DavMethodSet};
