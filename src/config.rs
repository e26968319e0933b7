//! Configuration loading.
//!
//! Two text formats live here: the bootstrap connection format that seeds a
//! registry (multiple `;`-separated assignments per line, `#` comments), and
//! a stricter generic `key=value` reader used by operational tooling.

use crate::db::DbrInstance;
use crate::error::{DbError, DbResult};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Token that opens a second section in a bootstrap file. Only single-section
/// files are supported.
const SECTION_SEPARATOR: &str = "---";

/// Read and parse a bootstrap configuration file into a target descriptor.
pub fn load_registry_conf(path: impl AsRef<Path>) -> DbResult<DbrInstance> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .map_err(|e| DbError::config(format!("cannot read {}: {}", path.display(), e)))?;
    parse_registry_conf(&text)
}

/// Parse the bootstrap configuration format.
///
/// Each line may carry several `;`-separated `key=value` assignments; `#`
/// starts a trailing comment. Keys are case-sensitive. The `password` and
/// `username` keys fill both the connection and the tenant-database
/// credential slots of the descriptor.
pub fn parse_registry_conf(text: &str) -> DbResult<DbrInstance> {
    let mut conf = DbrInstance::default();

    for line in text.lines() {
        let nocomment = line.split('#').next().unwrap_or("").trim();
        if nocomment.starts_with(SECTION_SEPARATOR) {
            return Err(DbError::config("multi-section configs not supported"));
        }

        for part in nocomment.split(';') {
            let Some(eq) = part.find('=') else {
                continue;
            };
            let key = part[..eq].trim();
            let value = part[eq + 1..].trim();
            match key {
                "dbname" | "database" => conf.dbname = value.to_string(),
                "handle" | "name" => conf.handle = value.to_string(),
                "password" => {
                    conf.connection_password = value.to_string();
                    conf.dbr_password = value.to_string();
                }
                "username" | "user" => {
                    conf.connection_username = value.to_string();
                    conf.dbr_username = value.to_string();
                }
                "hostname" | "host" => conf.host = value.to_string(),
                "module" | "type" => conf.module = value.to_string(),
                _ => {}
            }
        }
    }

    Ok(conf)
}

/// Read a generic `key=value` configuration file.
pub fn read_kv_config(path: impl AsRef<Path>) -> DbResult<HashMap<String, String>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .map_err(|e| DbError::config(format!("cannot read {}: {}", path.display(), e)))?;
    parse_kv_config(&text, &path.display().to_string())
}

/// Parse the generic `key=value` format.
///
/// One assignment per non-empty, comment-stripped line. A line without `=`
/// and a duplicated key are both errors; `source` names the input in error
/// messages.
pub fn parse_kv_config(text: &str, source: &str) -> DbResult<HashMap<String, String>> {
    let mut kv = HashMap::new();

    for line in text.lines() {
        let nocomment = line.split('#').next().unwrap_or("").trim();
        if nocomment.is_empty() {
            continue;
        }
        let Some(eq) = nocomment.find('=') else {
            return Err(DbError::config(format!(
                "config line in {} has no = separator",
                source
            )));
        };
        let key = nocomment[..eq].trim().to_string();
        let value = nocomment[eq + 1..].trim().to_string();
        if kv.contains_key(&key) {
            return Err(DbError::config(format!(
                "config line in {} has dup key {}",
                source, key
            )));
        }
        kv.insert(key, value);
    }

    Ok(kv)
}
