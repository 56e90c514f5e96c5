//! Project file state: the `migrations/` and `seeds/` directories.
//!
//! Files are named `<YYYYMMDDHHMMSS>_<slug>.sql`, so lexicographic order is
//! chronological order.

use chrono::{DateTime, Duration, Local, NaiveDateTime};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::{IdeaError, IdeaResult};

pub const MIGRATIONS_DIR: &str = "migrations";
pub const SEEDS_DIR: &str = "seeds";

/// Format of the 14-digit filename prefix.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// One `.sql` file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub len: u64,
    pub modified: Option<SystemTime>,
}

/// Snapshot of the migration and seed directories.
#[derive(Debug, Clone)]
pub struct ProjectState {
    pub root: PathBuf,
    pub migrations: Vec<FileEntry>,
    pub seeds: Vec<FileEntry>,
}

impl ProjectState {
    /// Read both directories under `root`, creating them if missing.
    pub fn scan(root: &Path) -> IdeaResult<Self> {
        check_writable(root)?;
        let migrations = list_sql_files(&root.join(MIGRATIONS_DIR))?;
        let seeds = list_sql_files(&root.join(SEEDS_DIR))?;
        Ok(Self {
            root: root.to_path_buf(),
            migrations,
            seeds,
        })
    }

    pub fn migration_names(&self) -> Vec<&str> {
        self.migrations.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn seed_names(&self) -> Vec<&str> {
        self.seeds.iter().map(|e| e.name.as_str()).collect()
    }

    /// Highest timestamp prefix across both directories, `None` when empty.
    pub fn latest_timestamp(&self) -> Option<&str> {
        self.migrations
            .iter()
            .chain(self.seeds.iter())
            .filter_map(|e| timestamp_of(&e.name))
            .max()
    }

    pub fn migration_path(&self, name: &str) -> PathBuf {
        self.root.join(MIGRATIONS_DIR).join(name)
    }

    pub fn seed_path(&self, name: &str) -> PathBuf {
        self.root.join(SEEDS_DIR).join(name)
    }

    /// Timestamp for the next pair: now, or one second past the latest file.
    pub fn next_timestamp(&self, now: DateTime<Local>) -> String {
        let now = now.naive_local();
        let next = match self
            .latest_timestamp()
            .and_then(|ts| NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT).ok())
        {
            Some(latest) if latest >= now => latest + Duration::seconds(1),
            _ => now,
        };
        next.format(TIMESTAMP_FORMAT).to_string()
    }

    /// Every SQL file in apply order: pairs by timestamp, migration before seed.
    pub fn apply_order(&self) -> Vec<(SqlKind, PathBuf)> {
        let mut files: Vec<(String, SqlKind, PathBuf)> = self
            .migrations
            .iter()
            .map(|e| (e.name.clone(), SqlKind::Migration, self.migration_path(&e.name)))
            .chain(
                self.seeds
                    .iter()
                    .map(|e| (e.name.clone(), SqlKind::Seed, self.seed_path(&e.name))),
            )
            .collect();
        files.sort_by(|a, b| {
            let ta = timestamp_of(&a.0).unwrap_or(a.0.as_str());
            let tb = timestamp_of(&b.0).unwrap_or(b.0.as_str());
            ta.cmp(tb).then(a.1.cmp(&b.1)).then(a.0.cmp(&b.0))
        });
        files.into_iter().map(|(_, kind, path)| (kind, path)).collect()
    }

    /// Compare a later snapshot against this one and pick out the new pair.
    ///
    /// Returns a human-readable reason when the agent's output breaks the
    /// layout rules; that text is fed back to the agent verbatim.
    pub fn new_artifacts(&self, after: &ProjectState) -> Result<ArtifactPair, String> {
        for (dir, before, now) in [
            (MIGRATIONS_DIR, &self.migrations, &after.migrations),
            (SEEDS_DIR, &self.seeds, &after.seeds),
        ] {
            for entry in before {
                match now.iter().find(|e| e.name == entry.name) {
                    None => return Err(format!("existing file {}/{} was deleted", dir, entry.name)),
                    Some(current) if current != entry => {
                        return Err(format!(
                            "existing file {}/{} was modified; prior files must never change",
                            dir, entry.name
                        ));
                    }
                    Some(_) => {}
                }
            }
        }

        let migration = single_new(MIGRATIONS_DIR, &self.migrations, &after.migrations)?;
        let seed = single_new(SEEDS_DIR, &self.seeds, &after.seeds)?;

        let migration_ts = checked_timestamp(MIGRATIONS_DIR, &migration.name)?;
        let seed_ts = checked_timestamp(SEEDS_DIR, &seed.name)?;
        if migration_ts != seed_ts {
            return Err(format!(
                "migration and seed timestamps differ ({} vs {}); both files must share one timestamp",
                migration_ts, seed_ts
            ));
        }
        if let Some(latest) = self.latest_timestamp()
            && migration_ts <= latest
        {
            return Err(format!(
                "new timestamp {} is not later than the latest existing file ({})",
                migration_ts, latest
            ));
        }

        let migration = Artifact::load(after.migration_path(&migration.name), &migration.name)?;
        let seed = Artifact::load(after.seed_path(&seed.name), &seed.name)?;
        for artifact in [&migration, &seed] {
            if !is_transaction_wrapped(&artifact.sql) {
                return Err(format!(
                    "{} must be wrapped in a BEGIN; ... COMMIT; transaction block",
                    artifact.path.display()
                ));
            }
        }

        Ok(ArtifactPair { migration, seed })
    }

    /// Delete every `.sql` file that is not part of this snapshot.
    ///
    /// Used after an unsuccessful run so unvalidated files never become
    /// part of the project history. Returns the removed paths.
    pub fn discard_new_files(&self) -> IdeaResult<Vec<PathBuf>> {
        let now = ProjectState::scan(&self.root)?;
        let mut removed = Vec::new();
        for (before, after, dir) in [
            (&self.migrations, &now.migrations, MIGRATIONS_DIR),
            (&self.seeds, &now.seeds, SEEDS_DIR),
        ] {
            for entry in after.iter().filter(|e| !before.iter().any(|b| b.name == e.name)) {
                let path = self.root.join(dir).join(&entry.name);
                fs::remove_file(&path).map_err(|e| IdeaError::fs(&path, e))?;
                tracing::info!(path = %path.display(), "removed unvalidated file");
                removed.push(path);
            }
        }
        Ok(removed)
    }
}

/// Which directory a SQL file lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SqlKind {
    Migration,
    Seed,
}

/// A generated SQL file.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub file_name: String,
    pub path: PathBuf,
    pub sql: String,
}

impl Artifact {
    fn load(path: PathBuf, file_name: &str) -> Result<Self, String> {
        let sql = fs::read_to_string(&path)
            .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
        Ok(Self {
            file_name: file_name.to_string(),
            path,
            sql,
        })
    }

    pub fn timestamp(&self) -> &str {
        timestamp_of(&self.file_name).unwrap_or_default()
    }
}

/// The migration and seed written by one run.
#[derive(Debug, Clone)]
pub struct ArtifactPair {
    pub migration: Artifact,
    pub seed: Artifact,
}

/// The 14-digit prefix of `<YYYYMMDDHHMMSS>_<slug>.sql`, if well-formed.
pub fn timestamp_of(name: &str) -> Option<&str> {
    let prefix = name.get(..14)?;
    let rest = &name[14..];
    if prefix.bytes().all(|b| b.is_ascii_digit()) && rest.starts_with('_') {
        Some(prefix)
    } else {
        None
    }
}

/// Lowercase, underscore-separated slug suitable for a filename.
pub fn slugify(text: &str) -> String {
    let mut slug = String::new();
    for word in text
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .take(6)
    {
        if !slug.is_empty() {
            slug.push('_');
        }
        slug.push_str(&word.to_ascii_lowercase());
    }
    if slug.is_empty() {
        slug.push_str("schema");
    }
    slug
}

/// Whether the SQL, ignoring comments and whitespace, opens with `BEGIN;`
/// and ends with `COMMIT;`.
pub fn is_transaction_wrapped(sql: &str) -> bool {
    let body: Vec<&str> = sql
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("--"))
        .collect();
    let (Some(first), Some(last)) = (body.first(), body.last()) else {
        return false;
    };
    let first = first.to_ascii_uppercase();
    let last = last.to_ascii_uppercase();
    (first.starts_with("BEGIN;") || first == "BEGIN TRANSACTION;") && last.ends_with("COMMIT;")
}

fn checked_timestamp<'a>(dir: &str, name: &'a str) -> Result<&'a str, String> {
    let ts = timestamp_of(name).ok_or_else(|| {
        format!(
            "{}/{} does not follow the <YYYYMMDDHHMMSS>_<slug>.sql naming scheme",
            dir, name
        )
    })?;
    if NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT).is_err() {
        return Err(format!("{}/{} has an invalid timestamp {}", dir, name, ts));
    }
    Ok(ts)
}

fn single_new<'a>(
    dir: &str,
    before: &[FileEntry],
    after: &'a [FileEntry],
) -> Result<&'a FileEntry, String> {
    let added: Vec<&FileEntry> = after
        .iter()
        .filter(|e| !before.iter().any(|b| b.name == e.name))
        .collect();
    match added.as_slice() {
        [one] => Ok(one),
        [] => Err(format!("no new file was written to {}/", dir)),
        many => Err(format!(
            "expected exactly one new file in {}/, found {}: {}",
            dir,
            many.len(),
            many.iter().map(|e| e.name.as_str()).collect::<Vec<_>>().join(", ")
        )),
    }
}

/// Fail early on a project the agent could not write into.
fn check_writable(root: &Path) -> IdeaResult<()> {
    fs::create_dir_all(root).map_err(|e| IdeaError::fs(root, e))?;
    let marker = root.join(".pgidea-write-check");
    fs::write(&marker, b"").map_err(|e| IdeaError::fs(root, e))?;
    fs::remove_file(&marker).map_err(|e| IdeaError::fs(&marker, e))
}

fn list_sql_files(dir: &Path) -> IdeaResult<Vec<FileEntry>> {
    if !dir.exists() {
        fs::create_dir_all(dir).map_err(|e| IdeaError::fs(dir, e))?;
        tracing::debug!(dir = %dir.display(), "created directory");
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| IdeaError::fs(dir, e))? {
        let entry = entry.map_err(|e| IdeaError::fs(dir, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.ends_with(".sql") {
            continue;
        }
        let meta = entry.metadata().map_err(|e| IdeaError::fs(entry.path(), e))?;
        if !meta.is_file() {
            continue;
        }
        files.push(FileEntry {
            name,
            len: meta.len(),
            modified: meta.modified().ok(),
        });
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}
