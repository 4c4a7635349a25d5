//! Database manifest version migration.
//!
//! Older manifests are tolerated on load: before a database is opened,
//! the manifest is stepped through the known upgrades and rewritten at
//! the current format version.

use serde_json::Value;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::error::DbResult;
use crate::util::random_hex_string;

/// Version written by this build.
pub const DB_FORMAT_VERSION: &str = "1.5.0";

fn extract_version(manifest: &Value) -> String {
    manifest
        .get("version")
        .and_then(Value::as_str)
        .unwrap_or("1.0.0")
        .to_string()
}

fn save_json(path: &Path, manifest: &Value) -> DbResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp_path = dir.join(format!("temp.{}.migration", random_hex_string(8)));
    let mut out = File::create(&tmp_path)?;
    serde_json::to_writer_pretty(&mut out, manifest)?;
    out.write_all(b"\n")?;
    out.sync_data()?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// One upgrade step from `version`, or `None` when already current.
fn upgrade_step(version: &str, manifest: &mut Value) -> Option<&'static str> {
    match version {
        // 1.0.0 manifests lack the iterators and config maps.
        "1.0.0" => {
            let object = manifest.as_object_mut()?;
            object
                .entry("iterators")
                .or_insert_with(|| Value::Object(Default::default()));
            object
                .entry("config")
                .or_insert_with(|| Value::Object(Default::default()));
            Some("1.4.0")
        }
        // 1.4.x only renamed internal files, nothing to rewrite.
        "1.4.0" => Some(DB_FORMAT_VERSION),
        _ => None,
    }
}

/// Brings the database manifest at `path` up to the current version.
pub fn migrate_version(path: &Path) -> DbResult<()> {
    loop {
        let mut manifest: Value = serde_json::from_reader(File::open(path)?)?;
        let version = extract_version(&manifest);
        if version == DB_FORMAT_VERSION {
            return Ok(());
        }

        let Some(next) = upgrade_step(&version, &mut manifest) else {
            tracing::warn!(
                "Unknown database version {}, trying to proceed anyway",
                version
            );
            return Ok(());
        };

        manifest["version"] = Value::String(next.to_string());
        save_json(path, &manifest)?;
        tracing::info!("Upgraded storage {} -> {}", version, next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrates_oldest_manifest_to_current() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.ursa");
        std::fs::write(&path, r#"{"datasets": []}"#).unwrap();

        migrate_version(&path).unwrap();

        let manifest: Value =
            serde_json::from_reader(File::open(&path).unwrap()).unwrap();
        assert_eq!(manifest["version"], DB_FORMAT_VERSION);
        assert!(manifest["iterators"].is_object());
        assert!(manifest["config"].is_object());
    }

    #[test]
    fn current_manifest_is_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.ursa");
        let body = format!(
            r#"{{"datasets": [], "iterators": {{}}, "config": {{}}, "version": "{DB_FORMAT_VERSION}"}}"#
        );
        std::fs::write(&path, &body).unwrap();

        migrate_version(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), body);
    }
}
