//! Process-wide cache of per-command plans.
//!
//! Each distinct [`Identity`] owns one [`CacheInfo`]: the parameter plan computed from the SQL
//! text and the row reader compiled for the last column layout seen. Entries are built outside
//! the lock, so two threads may build the same entry concurrently; the first insert wins.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::ops::BitOr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use lazy_static::lazy_static;
use tracing::{debug, trace};

use crate::error::SqlMapperError;
use crate::executor::Column;
use crate::mapping::RowReader;
use crate::params::ParamPlan;
use crate::types::CommandKind;

/// Inserts between two garbage collection passes.
pub const COLLECT_PER_ITEMS: u64 = 1000;
/// Entries hit this many times or fewer are dropped by a collection pass.
pub const COLLECT_HIT_COUNT_MIN: u64 = 0;

/// Per-call switches that take part in the cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandFlags(u8);

impl CommandFlags {
    pub const NONE: CommandFlags = CommandFlags(0);
    /// Materialize every row before returning.
    pub const BUFFERED: CommandFlags = CommandFlags(1);
    /// Build a fresh plan for this call and do not store it.
    pub const NO_CACHE: CommandFlags = CommandFlags(1 << 1);

    #[must_use]
    pub fn contains(self, other: CommandFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub fn with(self, other: CommandFlags) -> Self {
        CommandFlags(self.0 | other.0)
    }

    #[must_use]
    pub fn without(self, other: CommandFlags) -> Self {
        CommandFlags(self.0 & !other.0)
    }
}

impl Default for CommandFlags {
    fn default() -> Self {
        CommandFlags::BUFFERED
    }
}

impl BitOr for CommandFlags {
    type Output = CommandFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.with(rhs)
    }
}

/// What kind of call produced an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionKind {
    Query,
    Execute,
    Scalar,
    Grid,
}

/// Cache key for one command shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub sql: String,
    pub command_kind: CommandKind,
    pub param_shape: Option<TypeId>,
    pub targets: Vec<TypeId>,
    pub execution: ExecutionKind,
    pub grid_index: usize,
    pub split_on: Option<String>,
    pub flags: CommandFlags,
}

impl Identity {
    #[must_use]
    pub fn new(
        sql: impl Into<String>,
        command_kind: CommandKind,
        execution: ExecutionKind,
    ) -> Self {
        Self {
            sql: sql.into(),
            command_kind,
            param_shape: None,
            targets: Vec::new(),
            execution,
            grid_index: 0,
            split_on: None,
            flags: CommandFlags::default(),
        }
    }

    #[must_use]
    pub fn with_param_shape(mut self, shape: Option<TypeId>) -> Self {
        self.param_shape = shape;
        self
    }

    #[must_use]
    pub fn with_target<T: 'static>(mut self) -> Self {
        self.targets.push(TypeId::of::<T>());
        self
    }

    #[must_use]
    pub fn with_split_on(mut self, split_on: &str) -> Self {
        self.split_on = Some(split_on.to_string());
        self
    }

    #[must_use]
    pub fn with_flags(mut self, flags: CommandFlags) -> Self {
        self.flags = flags;
        self
    }

    /// The identity of result set `grid_index` of a grid, read as `T`.
    #[must_use]
    pub fn for_grid<T: 'static>(&self, grid_index: usize) -> Self {
        Self {
            targets: vec![TypeId::of::<T>()],
            grid_index,
            split_on: None,
            ..self.clone()
        }
    }

    fn key(&self) -> Self {
        Self {
            flags: self.flags.without(CommandFlags::NO_CACHE),
            ..self.clone()
        }
    }
}

struct CachedReader {
    fingerprint: u64,
    reader: Arc<dyn Any + Send + Sync>,
}

/// Compiled state for one identity.
pub struct CacheInfo {
    param_plan: ParamPlan,
    reader: RwLock<Option<CachedReader>>,
    hit_count: AtomicU64,
}

impl std::fmt::Debug for CacheInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheInfo")
            .field("param_plan", &self.param_plan)
            .field("hit_count", &self.hit_count())
            .finish_non_exhaustive()
    }
}

/// Hash of column names and provider types; a change means the reader must be rebuilt.
#[must_use]
pub fn column_fingerprint(columns: &[Column]) -> u64 {
    let mut hasher = DefaultHasher::new();
    columns.len().hash(&mut hasher);
    for column in columns {
        column.name.hash(&mut hasher);
        column.provider_type.hash(&mut hasher);
    }
    hasher.finish()
}

impl CacheInfo {
    #[must_use]
    pub fn new(sql: &str) -> Self {
        Self {
            param_plan: ParamPlan::analyze(sql),
            reader: RwLock::new(None),
            hit_count: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn param_plan(&self) -> &ParamPlan {
        &self.param_plan
    }

    #[must_use]
    pub fn hit_count(&self) -> u64 {
        self.hit_count.load(Ordering::Relaxed)
    }

    fn record_hit(&self) {
        self.hit_count.fetch_add(1, Ordering::Relaxed);
    }

    /// The reader compiled for `columns`, reusing the stored one when the layout is unchanged.
    ///
    /// # Errors
    /// Propagates the error from `compile`; nothing is stored in that case.
    pub fn reader_for<T, F>(
        &self,
        columns: &[Column],
        compile: F,
    ) -> Result<RowReader<T>, SqlMapperError>
    where
        T: Send + 'static,
        F: FnOnce(&[Column]) -> Result<RowReader<T>, SqlMapperError>,
    {
        let fingerprint = column_fingerprint(columns);
        {
            let cached = match self.reader.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(entry) = cached.as_ref() {
                if entry.fingerprint == fingerprint {
                    if let Some(reader) = entry.reader.downcast_ref::<RowReader<T>>() {
                        return Ok(reader.clone());
                    }
                } else {
                    debug!(
                        target_type = std::any::type_name::<T>(),
                        "column layout changed; rebuilding row reader"
                    );
                }
            }
        }

        let reader = compile(columns)?;
        let mut cached = match self.reader.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *cached = Some(CachedReader {
            fingerprint,
            reader: Arc::new(reader.clone()),
        });
        Ok(reader)
    }
}

lazy_static! {
    static ref QUERY_CACHE: RwLock<HashMap<Identity, Arc<CacheInfo>>> = RwLock::new(HashMap::new());
    static ref COLLECT: AtomicU64 = AtomicU64::new(0);
}

/// Cached entry for `identity`, built with `build` on a miss.
///
/// With [`CommandFlags::NO_CACHE`] the entry is built and returned without being stored.
///
/// # Errors
/// Propagates the error from `build`; failed builds are never stored.
pub fn get_or_build<F>(identity: &Identity, build: F) -> Result<Arc<CacheInfo>, SqlMapperError>
where
    F: FnOnce() -> Result<CacheInfo, SqlMapperError>,
{
    if identity.flags.contains(CommandFlags::NO_CACHE) {
        return build().map(Arc::new);
    }
    let key = identity.key();
    {
        let cache = match QUERY_CACHE.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(info) = cache.get(&key) {
            info.record_hit();
            trace!(sql = %key.sql, "command cache hit");
            return Ok(Arc::clone(info));
        }
    }

    let built = Arc::new(build()?);
    debug!(sql = %key.sql, execution = ?key.execution, "caching command plan");
    let info = {
        let mut cache = match QUERY_CACHE.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(cache.entry(key).or_insert(built))
    };
    if COLLECT.fetch_add(1, Ordering::Relaxed) + 1 >= COLLECT_PER_ITEMS {
        collect_garbage();
    }
    Ok(info)
}

/// Cached entry for `identity`, built from its SQL text on a miss.
///
/// # Errors
/// Never fails today; kept fallible so callers treat it like [`get_or_build`].
pub fn lookup(identity: &Identity) -> Result<Arc<CacheInfo>, SqlMapperError> {
    get_or_build(identity, || Ok(CacheInfo::new(&identity.sql)))
}

/// Drop entries hit no more than [`COLLECT_HIT_COUNT_MIN`] times.
pub(crate) fn collect_garbage() {
    let mut cache = match QUERY_CACHE.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    let before = cache.len();
    cache.retain(|_, info| info.hit_count() > COLLECT_HIT_COUNT_MIN);
    COLLECT.store(0, Ordering::Relaxed);
    debug!(removed = before - cache.len(), remaining = cache.len(), "collected command cache");
}

/// Remove every cached plan.
pub fn purge() {
    let mut cache = match QUERY_CACHE.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    cache.clear();
    COLLECT.store(0, Ordering::Relaxed);
}

/// Number of cached plans.
#[must_use]
pub fn count() -> usize {
    match QUERY_CACHE.read() {
        Ok(guard) => guard.len(),
        Err(poisoned) => poisoned.into_inner().len(),
    }
}

/// SQL text and hit count of cached plans hit at most `max_hits` times, most used first.
#[must_use]
pub fn query_cached_items(max_hits: u64) -> Vec<(String, u64)> {
    let cache = match QUERY_CACHE.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    let mut items: Vec<(String, u64)> = cache
        .iter()
        .map(|(identity, info)| (identity.sql.clone(), info.hit_count()))
        .filter(|(_, hits)| *hits <= max_hits)
        .collect();
    items.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeserializationError;
    use std::sync::{Mutex, MutexGuard};

    static SERIAL: Mutex<()> = Mutex::new(());

    fn serial() -> MutexGuard<'static, ()> {
        SERIAL.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn identity(sql: &str) -> Identity {
        Identity::new(sql, CommandKind::Text, ExecutionKind::Query).with_target::<i64>()
    }

    fn contains(sql: &str) -> bool {
        query_cached_items(u64::MAX).iter().any(|(s, _)| s == sql)
    }

    #[test]
    fn second_lookup_is_a_hit() {
        let _serial = serial();
        let id = identity("select 1 -- cache hit test");
        let first = lookup(&id).unwrap();
        let second = lookup(&id).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(second.hit_count() >= 1);
    }

    #[test]
    fn failed_builds_are_not_stored() {
        let id = identity("select 2 -- failing build test");
        let err = get_or_build(&id, || Err(DeserializationError::NoColumns.into()));
        assert!(err.is_err());
        assert!(!contains(&id.sql));
    }

    #[test]
    fn no_cache_flag_bypasses_the_store() {
        let id = identity("select 3 -- no cache test").with_flags(CommandFlags::NO_CACHE);
        let first = lookup(&id).unwrap();
        let second = lookup(&id).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!contains(&id.sql));
    }

    #[test]
    fn grid_identities_differ_by_index_and_target() {
        let base = Identity::new("select 1; select 2", CommandKind::Text, ExecutionKind::Grid);
        assert_ne!(base.for_grid::<i32>(0), base.for_grid::<i32>(1));
        assert_ne!(base.for_grid::<i32>(0), base.for_grid::<String>(0));
    }

    #[test]
    fn reader_is_rebuilt_when_columns_change() {
        let info = CacheInfo::new("select * from t");
        let columns = vec![Column::new("a", 0, "INTEGER")];
        let mut builds = 0;
        let mut compile = |cols: &[Column]| {
            builds += 1;
            <i64 as crate::mapping::FromRow>::compile(cols, 0..cols.len())
        };
        info.reader_for::<i64, _>(&columns, &mut compile).unwrap();
        info.reader_for::<i64, _>(&columns, &mut compile).unwrap();
        let changed = vec![Column::new("a", 0, "TEXT")];
        info.reader_for::<i64, _>(&changed, &mut compile).unwrap();
        assert_eq!(builds, 2);
    }

    #[test]
    fn collection_drops_entries_never_hit() {
        let _serial = serial();
        let cold = identity("select 4 -- cold entry");
        let hot = identity("select 5 -- hot entry");
        lookup(&cold).unwrap();
        lookup(&hot).unwrap();
        lookup(&hot).unwrap();
        collect_garbage();
        assert!(!contains(&cold.sql));
        assert!(contains(&hot.sql));
    }

    #[test]
    fn flags_combine() {
        let flags = CommandFlags::BUFFERED | CommandFlags::NO_CACHE;
        assert!(flags.contains(CommandFlags::NO_CACHE));
        assert!(!flags.without(CommandFlags::NO_CACHE).contains(CommandFlags::NO_CACHE));
    }
}
