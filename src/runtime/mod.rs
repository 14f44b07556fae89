//! Reading the managed runtime's state out of the target.
//!
//! Everything is located through the [`RuntimeSchema`], the runtime's own
//! description of its globals, types and field offsets, so the dumper keeps
//! working across runtime builds as long as the header version matches.

pub mod gc;
pub mod schema;
pub mod threads;

pub use {
    gc::{AllocContext, HeapSummary},
    schema::RuntimeSchema,
    threads::ManagedThread,
};

use crate::{
    errors::RuntimeError,
    target::{DataTarget, Module},
};

pub const DEFAULT_RUNTIME_MODULE: &str = "libcoreclr.so";
pub const DEBUG_HEADER_SYMBOL: &str = "ClrDebugHeader";

/// Finds the runtime module by file name
pub fn find_runtime_module<'m>(modules: &'m [Module], file_name: &str) -> Option<&'m Module> {
    modules.iter().find(|m| m.file_name() == file_name)
}

/// Resolves the exported debug header of `module` and parses it
pub fn read_debug_header<T: DataTarget>(
    target: &T,
    module: &Module,
) -> Result<RuntimeSchema, RuntimeError> {
    let address = target
        .resolve_export(module, DEBUG_HEADER_SYMBOL)
        .ok_or_else(|| RuntimeError::ExportNotFound {
            module: module.path.clone(),
            symbol: DEBUG_HEADER_SYMBOL.to_owned(),
        })?;
    log::debug!("{DEBUG_HEADER_SYMBOL} at {address:#x} in {}", module.path);
    RuntimeSchema::read(target, address)
}

/// Field reads of runtime objects, with offsets taken from the schema
pub(crate) struct ObjectReader<'a, T> {
    pub target: &'a T,
    pub schema: &'a RuntimeSchema,
}

impl<'a, T: DataTarget> ObjectReader<'a, T> {
    pub fn new(target: &'a T, schema: &'a RuntimeSchema) -> Self {
        Self { target, schema }
    }

    pub fn field_address(
        &self,
        object: u64,
        type_name: &str,
        field: &str,
    ) -> Result<u64, RuntimeError> {
        Ok(object.wrapping_add(self.schema.field_offset(type_name, field)?))
    }

    pub fn pointer(&self, object: u64, type_name: &str, field: &str) -> Result<u64, RuntimeError> {
        let address = self.field_address(object, type_name, field)?;
        self.deref(&format!("{type_name}::{field}"), address)
    }

    pub fn u32(&self, object: u64, type_name: &str, field: &str) -> Result<u32, RuntimeError> {
        let address = self.field_address(object, type_name, field)?;
        self.target
            .read_u32(address)
            .map_err(|e| RuntimeError::unreadable(format!("{type_name}::{field}"), address, e))
    }

    pub fn u8(&self, object: u64, type_name: &str, field: &str) -> Result<u8, RuntimeError> {
        let address = self.field_address(object, type_name, field)?;
        self.target
            .read_u8(address)
            .map_err(|e| RuntimeError::unreadable(format!("{type_name}::{field}"), address, e))
    }

    /// The value of a pointer sized global variable
    pub fn global_pointer(&self, name: &str) -> Result<u64, RuntimeError> {
        let address = self.schema.global(name)?;
        self.deref(name, address)
    }

    pub fn deref(&self, what: &str, address: u64) -> Result<u64, RuntimeError> {
        self.target
            .read_pointer(address)
            .map_err(|e| RuntimeError::unreadable(what, address, e))
    }

    /// The size of `type_name`, or `fallback` for types the runtime doesn't
    /// describe
    pub fn size_of(&self, type_name: &str, fallback: u64) -> u64 {
        self.schema.type_size(type_name).unwrap_or(fallback)
    }
}
