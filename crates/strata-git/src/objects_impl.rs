//! gix-backed object reads and OID conversions.

use crate::error::GitError;
use crate::gix_repo::GixRepo;
use crate::types::Oid;

/// Convert our [`Oid`] to a `gix::ObjectId`.
pub(crate) fn to_gix_oid(oid: Oid) -> gix::ObjectId {
    gix::ObjectId::from_bytes_or_panic(oid.as_bytes())
}

/// Convert a `gix::ObjectId` to our [`Oid`].
pub(crate) fn from_gix_oid(oid: gix::ObjectId) -> Oid {
    let bytes: [u8; 20] = oid.as_bytes().try_into().expect("SHA1 is 20 bytes");
    Oid::from_bytes(bytes)
}

pub fn read_blob(repo: &GixRepo, oid: Oid) -> Result<Vec<u8>, GitError> {
    let gix_oid = to_gix_oid(oid);
    let mut blob = repo
        .repo
        .find_blob(gix_oid)
        .map_err(|e| GitError::NotFound {
            message: format!("blob {oid}: {e}"),
        })?;
    Ok(blob.take_data())
}
