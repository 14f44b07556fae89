//! The runtime's self describing debug header.
//!
//! The runtime exports a `ClrDebugHeader` data symbol which points at a small
//! set of tables describing the globals, types and field offsets a dumper
//! needs. Nothing here assumes a struct layout beyond the header itself.

use {
    crate::{
        errors::RuntimeError,
        target::{DataTarget, MAX_STRING_LENGTH},
    },
    scroll::{Pread, LE},
    std::collections::HashMap,
};

/// `" CDH"`
pub const COOKIE: [u8; 4] = [0x20, 0x43, 0x44, 0x48];
pub const SUPPORTED_MAJOR_VERSION: u16 = 2;
pub const SUPPORTED_MINOR_VERSION: u16 = 0;

/// Upper bounds on what a sane header declares, anything larger is treated as
/// corruption
pub const MAX_TABLES: u32 = 16;
pub const MAX_ROWS: u32 = 4096;

const HEADER_SIZE: usize = 24;
const TABLE_SIZE: usize = 24;
const ROW_SIZE: usize = 16;
/// Table and row names are short identifiers
const MAX_NAME_LENGTH: usize = 256;

const GLOBAL_TABLE: &str = "Global";
const TYPE_TABLE: &str = "Type";
const FIELD_TABLE: &str = "Field";
const BASE_TABLE: &str = "Base";
const DEFINE_TABLE: &str = "Define";

#[derive(Debug, Pread)]
struct RawDebugHeader {
    cookie: [u8; 4],
    major_version: u16,
    minor_version: u16,
    tables: u64,
    table_count: u32,
}

#[derive(Debug, Pread)]
struct RawDebugTable {
    name: u64,
    elements: u64,
    rows: u32,
}

/// Every row is a name pointer followed by 8 bytes whose meaning depends on
/// the table
#[derive(Debug, Pread)]
struct RawRow {
    name: u64,
    first: u32,
    second: u32,
}

impl RawRow {
    fn as_address(&self) -> u64 {
        u64::from(self.second) << 32 | u64::from(self.first)
    }
}

#[derive(Clone, Debug)]
struct TypeEntry {
    name: String,
    size: u32,
}

/// The parsed debug header. It is read once and never changes afterwards.
#[derive(Clone, Debug)]
pub struct RuntimeSchema {
    pub header_address: u64,
    pub major_version: u16,
    pub minor_version: u16,
    globals: HashMap<String, u64>,
    /// Indexed by type id
    types: Vec<TypeEntry>,
    fields: HashMap<(u32, String), u32>,
    bases: HashMap<(u32, String), u32>,
    defines: HashMap<String, u32>,
    metadata_ranges: Vec<(u64, u64)>,
}

impl RuntimeSchema {
    /// Parses the header at `header_address`
    pub fn read<T: DataTarget>(target: &T, header_address: u64) -> Result<Self, RuntimeError> {
        failspot::failspot!(ReadDebugHeader bail(RuntimeError::Injected));

        let mut bytes = [0u8; HEADER_SIZE];
        target
            .read_memory(header_address, &mut bytes)
            .map_err(|e| RuntimeError::unreadable("debug header", header_address, e))?;
        let header: RawDebugHeader = bytes.pread_with(0, LE)?;

        if header.cookie != COOKIE {
            return Err(RuntimeError::BadCookie(header.cookie));
        }
        if header.major_version != SUPPORTED_MAJOR_VERSION {
            return Err(RuntimeError::VersionMismatch {
                found_major: header.major_version,
                found_minor: header.minor_version,
                expected_major: SUPPORTED_MAJOR_VERSION,
            });
        }
        if header.minor_version > SUPPORTED_MINOR_VERSION {
            log::info!(
                "debug header minor version {} is newer than {SUPPORTED_MINOR_VERSION}, reading the known tables",
                header.minor_version
            );
        }
        if header.table_count > MAX_TABLES {
            return Err(RuntimeError::TooManyTables(header.table_count));
        }

        let mut schema = Self {
            header_address,
            major_version: header.major_version,
            minor_version: header.minor_version,
            globals: HashMap::new(),
            types: Vec::new(),
            fields: HashMap::new(),
            bases: HashMap::new(),
            defines: HashMap::new(),
            metadata_ranges: vec![(header_address, HEADER_SIZE as u64)],
        };

        let table_bytes = read_block(
            target,
            "debug table array",
            header.tables,
            header.table_count as usize * TABLE_SIZE,
        )?;
        schema
            .metadata_ranges
            .push((header.tables, table_bytes.len() as u64));

        let mut seen = Vec::new();
        for index in 0..header.table_count as usize {
            let table: RawDebugTable = table_bytes.pread_with(index * TABLE_SIZE, LE)?;
            let name = read_name(target, table.name)?;
            schema.metadata_ranges.push((table.name, name.len() as u64 + 1));

            if table.rows > MAX_ROWS {
                return Err(RuntimeError::TooManyRows {
                    table: name,
                    rows: table.rows,
                });
            }

            let rows = schema.read_rows(target, &table)?;
            match name.as_str() {
                GLOBAL_TABLE => {
                    for (name, row) in rows {
                        schema.globals.entry(name).or_insert(row.as_address());
                    }
                }
                TYPE_TABLE => {
                    schema.types = rows
                        .into_iter()
                        .map(|(name, row)| TypeEntry {
                            name,
                            size: row.first,
                        })
                        .collect();
                }
                FIELD_TABLE => {
                    for (name, row) in rows {
                        schema.fields.entry((row.first, name)).or_insert(row.second);
                    }
                }
                BASE_TABLE => {
                    for (name, row) in rows {
                        schema.bases.entry((row.first, name)).or_insert(row.second);
                    }
                }
                DEFINE_TABLE => {
                    for (name, row) in rows {
                        schema.defines.entry(name).or_insert(row.first);
                    }
                }
                other => {
                    log::debug!("ignoring unknown debug table {other}");
                    continue;
                }
            }
            seen.push(name);
        }

        for required in [GLOBAL_TABLE, TYPE_TABLE, FIELD_TABLE] {
            if !seen.iter().any(|s| s == required) {
                return Err(RuntimeError::MissingTable(required));
            }
        }

        log::debug!(
            "debug header {}.{}: {} globals, {} types, {} fields",
            schema.major_version,
            schema.minor_version,
            schema.globals.len(),
            schema.types.len(),
            schema.fields.len()
        );
        Ok(schema)
    }

    fn read_rows<T: DataTarget>(
        &mut self,
        target: &T,
        table: &RawDebugTable,
    ) -> Result<Vec<(String, RawRow)>, RuntimeError> {
        let bytes = read_block(
            target,
            "debug table rows",
            table.elements,
            table.rows as usize * ROW_SIZE,
        )?;
        self.metadata_ranges
            .push((table.elements, bytes.len() as u64));

        let mut rows = Vec::with_capacity(table.rows as usize);
        for index in 0..table.rows as usize {
            let row: RawRow = bytes.pread_with(index * ROW_SIZE, LE)?;
            let name = read_name(target, row.name)?;
            self.metadata_ranges.push((row.name, name.len() as u64 + 1));
            rows.push((name, row));
        }
        Ok(rows)
    }

    /// The address of the global variable `name`
    pub fn global(&self, name: &str) -> Result<u64, RuntimeError> {
        self.globals
            .get(name)
            .copied()
            .ok_or_else(|| RuntimeError::MissingGlobal(name.to_owned()))
    }

    pub fn type_id(&self, type_name: &str) -> Result<u32, RuntimeError> {
        self.types
            .iter()
            .position(|t| t.name == type_name)
            .map(|id| id as u32)
            .ok_or_else(|| RuntimeError::MissingType(type_name.to_owned()))
    }

    pub fn type_size(&self, type_name: &str) -> Result<u64, RuntimeError> {
        let id = self.type_id(type_name)?;
        Ok(u64::from(self.types[id as usize].size))
    }

    pub fn field_offset(&self, type_name: &str, field: &str) -> Result<u64, RuntimeError> {
        let id = self.type_id(type_name)?;
        self.fields
            .get(&(id, field.to_owned()))
            .map(|offset| u64::from(*offset))
            .ok_or_else(|| RuntimeError::MissingField {
                type_name: type_name.to_owned(),
                field: field.to_owned(),
            })
    }

    /// Offset of the `base` subobject within `type_name`
    pub fn base_offset(&self, type_name: &str, base: &str) -> Option<u64> {
        let id = self.type_id(type_name).ok()?;
        self.bases
            .get(&(id, base.to_owned()))
            .map(|offset| u64::from(*offset))
    }

    pub fn define(&self, name: &str) -> Option<u32> {
        self.defines.get(name).copied()
    }

    /// `(address, length)` of the header, its tables and every string they
    /// reference
    pub fn metadata_ranges(&self) -> &[(u64, u64)] {
        &self.metadata_ranges
    }
}

fn read_block<T: DataTarget>(
    target: &T,
    what: &str,
    address: u64,
    len: usize,
) -> Result<Vec<u8>, RuntimeError> {
    let mut bytes = vec![0u8; len];
    target
        .read_memory(address, &mut bytes)
        .map_err(|e| RuntimeError::unreadable(what, address, e))?;
    Ok(bytes)
}

fn read_name<T: DataTarget>(target: &T, address: u64) -> Result<String, RuntimeError> {
    target
        .read_c_string(address, MAX_NAME_LENGTH.min(MAX_STRING_LENGTH))
        .map_err(|e| RuntimeError::unreadable("debug table name", address, e))
}
