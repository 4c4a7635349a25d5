//! Structured names of database objects.
//!
//! Every artifact lives in the database directory under a name of the
//! form `<kind>.<8-hex-id>.<dbname>`, for example `set.23381d1f.db.ursa`.
//! A manually renamed file may not match this format, so the raw filename
//! is kept alongside the parsed parts.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use crate::error::{DbError, DbResult};
use crate::util::random_hex_string;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseName {
    db_base: PathBuf,
    kind: String,
    id: String,
    filename: String,
}

impl DatabaseName {
    #[must_use]
    pub fn new(db_base: PathBuf, kind: &str, id: &str, filename: &str) -> Self {
        Self {
            db_base,
            kind: kind.to_string(),
            id: id.to_string(),
            filename: filename.to_string(),
        }
    }

    /// Parses `<kind>.<id>.<rest>`.
    pub fn parse(db_base: PathBuf, filename: &str) -> DbResult<Self> {
        let mut parts = filename.splitn(3, '.');
        let (Some(kind), Some(id), Some(_rest)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(DbError::InvalidName(filename.to_string()));
        };
        Ok(Self {
            db_base,
            kind: kind.to_string(),
            id: id.to_string(),
            filename: filename.to_string(),
        })
    }

    /// Allocates a fresh name of the given kind. The id is random and the
    /// name is reserved on disk with an exclusive create, so concurrent
    /// allocations can never collide.
    pub fn allocate(db_base: &Path, db_name: &str, kind: &str) -> DbResult<Self> {
        loop {
            let id = random_hex_string(8);
            let filename = format!("{kind}.{id}.{db_name}");
            let probe = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(db_base.join(&filename));
            match probe {
                Ok(_) => return Ok(Self::new(db_base.to_path_buf(), kind, &id, &filename)),
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(DbError::Io(err)),
            }
        }
    }

    /// A name with the same id but a different kind and explicit filename.
    #[must_use]
    pub fn derive(&self, kind: &str, filename: &str) -> Self {
        Self::new(self.db_base.clone(), kind, &self.id, filename)
    }

    /// The sibling name of a different kind, following the standard
    /// filename format.
    #[must_use]
    pub fn derive_sibling(&self, kind: &str) -> Self {
        let prefix = format!("{}.{}.", self.kind, self.id);
        let suffix = self
            .filename
            .strip_prefix(&prefix)
            .unwrap_or(&self.filename);
        let filename = format!("{kind}.{}.{suffix}", self.id);
        Self::new(self.db_base.clone(), kind, &self.id, &filename)
    }

    /// A unique scratch name for write-temp-then-rename updates.
    #[must_use]
    pub fn derive_temporary(&self) -> Self {
        let id = random_hex_string(8);
        let filename = format!("temp.{id}.{}", self.filename);
        Self::new(self.db_base.clone(), "temp", &id, &filename)
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    #[must_use]
    pub fn full_path(&self) -> PathBuf {
        self.db_base.join(&self.filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_kind_id_and_db() {
        let name = DatabaseName::parse(PathBuf::from("/base"), "set.23381d1f.db.ursa").unwrap();
        assert_eq!(name.kind(), "set");
        assert_eq!(name.id(), "23381d1f");
        assert_eq!(name.filename(), "set.23381d1f.db.ursa");
        assert_eq!(name.full_path(), PathBuf::from("/base/set.23381d1f.db.ursa"));

        assert!(DatabaseName::parse(PathBuf::from("/base"), "noformat").is_err());
    }

    #[test]
    fn derive_sibling_swaps_the_kind() {
        let name = DatabaseName::parse(PathBuf::from("/base"), "iterator.abcd1234.db").unwrap();
        let meta = name.derive_sibling("itermeta");
        assert_eq!(meta.filename(), "itermeta.abcd1234.db");
        assert_eq!(meta.id(), "abcd1234");
    }

    #[test]
    fn allocate_reserves_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let name = DatabaseName::allocate(dir.path(), "db.ursa", "set").unwrap();
        assert!(name.full_path().exists());
        assert_eq!(name.kind(), "set");
        assert_eq!(name.id().len(), 8);
    }
}
