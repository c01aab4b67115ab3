//! Wire protocol for the Driver Server.
//!
//! This crate defines the typed request/response shapes exchanged between
//! [`codeintel-driver`] and [`codeintel-client`] over a per-database UNIX
//! socket. Every operation in spec's driver op table (`execute`, `select`,
//! `begin`, `commit`, `rollback`, `index_file`, `query_ast`, `query_cst`,
//! `modify_ast`, `modify_cst`, `sync_schema`) has a named request/response
//! pair here; nothing is dispatched dynamically by string alone beyond the
//! `op` tag itself.

mod error;
mod ops;
mod raw;
mod wire;

pub use error::{ErrorKind, RpcError};
pub use ops::{
    AstEdit, AstNode, AstQueryArgs, BeginResult, ExecuteArgs, ExecuteResult, IndexFileArgs,
    IndexFileResult, ModifyArgs, ModifyResult, NodeListResult, Op, SchemaDiff, SelectArgs,
    SelectResult, SyncSchemaResult, TxArgs,
};
pub use raw::{RawRow, RawValue};
pub use wire::{Request, Response};
