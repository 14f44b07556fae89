//! Functions used by Serde to serialize error types that we don't own (and thus
//! can't implement [Serialize][serde::Serialize] for)

use serde::Serializer;

/// Foreign errors are stored as their debug representation, which keeps the
/// errno/kind information that the display text often drops
fn serialize_generic_error<S: Serializer, E: std::error::Error>(
    error: &E,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let dbg = format!("{error:#?}");
    serializer.serialize_str(&dbg)
}

/// Serialize [std::io::Error]
pub fn serialize_io_error<S: Serializer>(
    error: &std::io::Error,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serialize_generic_error(error, serializer)
}

/// Serialize [goblin::error::Error]
pub fn serialize_goblin_error<S: Serializer>(
    error: &goblin::error::Error,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serialize_generic_error(error, serializer)
}

/// Serialize [scroll::Error]
pub fn serialize_scroll_error<S: Serializer>(
    error: &scroll::Error,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serialize_generic_error(error, serializer)
}

/// Serialize [serde_json::Error]
pub fn serialize_json_error<S: Serializer>(
    error: &serde_json::Error,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serialize_generic_error(error, serializer)
}

/// Serialize [nix::Error]
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn serialize_nix_error<S: Serializer>(
    error: &nix::Error,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serialize_generic_error(error, serializer)
}

/// Serialize [procfs_core::ProcError]
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn serialize_proc_error<S: Serializer>(
    error: &procfs_core::ProcError,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serialize_generic_error(error, serializer)
}
