//! The system catalog (C8): table/index/view metadata stored as records in a
//! dedicated B+Tree rooted from the DB header, per spec.md §4.7.

use hashbrown::{HashMap, HashSet};
use quilldb_btree::{PageRead, PageStore};
use quilldb_error::{QuillError, Result};
use quilldb_types::PageId;
use tracing::{debug, info};

const KIND_TABLE: u8 = 0;
const KIND_INDEX: u8 = 1;
const KIND_VIEW: u8 = 2;

/// A single column in a table's schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub ty: String,
    pub flags: Vec<ColumnFlag>,
}

/// Per-column constraints, per spec.md §3's `flags ∈ {notnull, unique, pk,
/// ref=table.col}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnFlag {
    NotNull,
    Unique,
    Pk,
    Ref(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRecord {
    pub name: String,
    pub root_page: PageId,
    pub next_rowid: u64,
    pub columns: Vec<ColumnSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Btree,
    Trigram,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub root_page: PageId,
    pub kind: IndexKind,
    pub unique: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewRecord {
    pub name: String,
    pub sql_text: String,
    pub column_names: Vec<String>,
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogRecord {
    Table(TableRecord),
    Index(IndexRecord),
    View(ViewRecord),
}

impl CatalogRecord {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Table(t) => &t.name,
            Self::Index(i) => &i.name,
            Self::View(v) => &v.name,
        }
    }

    const fn kind_tag(&self) -> u8 {
        match self {
            Self::Table(_) => KIND_TABLE,
            Self::Index(_) => KIND_INDEX,
            Self::View(_) => KIND_VIEW,
        }
    }
}

/// `CRC32C("<kind>:<name>")`, the catalog B+Tree's key for an entity.
#[must_use]
pub fn record_key(kind: &str, name: &str) -> u64 {
    u64::from(crc32c::crc32c(format!("{kind}:{name}").as_bytes()))
}

fn kind_label(tag: u8) -> &'static str {
    match tag {
        KIND_TABLE => "table",
        KIND_INDEX => "index",
        _ => "view",
    }
}

mod codec {
    use super::{
        CatalogRecord, ColumnFlag, ColumnSpec, IndexKind, IndexRecord, KIND_INDEX, KIND_TABLE, KIND_VIEW,
        TableRecord, ViewRecord,
    };
    use quilldb_error::{QuillError, Result};
    use quilldb_types::PageId;

    fn write_str(buf: &mut Vec<u8>, s: &str) {
        let len = u32::try_from(s.len()).expect("catalog string fits u32");
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(s.as_bytes());
    }

    fn write_u32(buf: &mut Vec<u8>, v: u32) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_u64(buf: &mut Vec<u8>, v: u64) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_bool(buf: &mut Vec<u8>, v: bool) {
        buf.push(u8::from(v));
    }

    fn write_str_list(buf: &mut Vec<u8>, items: &[String]) {
        write_u32(buf, u32::try_from(items.len()).expect("catalog list fits u32"));
        for item in items {
            write_str(buf, item);
        }
    }

    struct Reader<'a> {
        bytes: &'a [u8],
        pos: usize,
    }

    impl<'a> Reader<'a> {
        fn new(bytes: &'a [u8]) -> Self {
            Self { bytes, pos: 0 }
        }

        fn u8(&mut self) -> Result<u8> {
            let b = *self
                .bytes
                .get(self.pos)
                .ok_or_else(|| QuillError::corruption("catalog record", "truncated u8"))?;
            self.pos += 1;
            Ok(b)
        }

        fn u32(&mut self) -> Result<u32> {
            let end = self.pos + 4;
            let slice = self
                .bytes
                .get(self.pos..end)
                .ok_or_else(|| QuillError::corruption("catalog record", "truncated u32"))?;
            self.pos = end;
            Ok(u32::from_le_bytes(slice.try_into().unwrap()))
        }

        fn u64(&mut self) -> Result<u64> {
            let end = self.pos + 8;
            let slice = self
                .bytes
                .get(self.pos..end)
                .ok_or_else(|| QuillError::corruption("catalog record", "truncated u64"))?;
            self.pos = end;
            Ok(u64::from_le_bytes(slice.try_into().unwrap()))
        }

        fn bool(&mut self) -> Result<bool> {
            Ok(self.u8()? != 0)
        }

        fn str(&mut self) -> Result<String> {
            let len = self.u32()? as usize;
            let end = self.pos + len;
            let slice = self
                .bytes
                .get(self.pos..end)
                .ok_or_else(|| QuillError::corruption("catalog record", "truncated string"))?;
            self.pos = end;
            String::from_utf8(slice.to_vec())
                .map_err(|_| QuillError::corruption("catalog record", "invalid utf8"))
        }

        fn str_list(&mut self) -> Result<Vec<String>> {
            let count = self.u32()?;
            (0..count).map(|_| self.str()).collect()
        }
    }

    fn encode_columns(columns: &[ColumnSpec]) -> String {
        columns
            .iter()
            .map(|c| {
                let flags: Vec<String> = c
                    .flags
                    .iter()
                    .map(|f| match f {
                        ColumnFlag::NotNull => "notnull".to_string(),
                        ColumnFlag::Unique => "unique".to_string(),
                        ColumnFlag::Pk => "pk".to_string(),
                        ColumnFlag::Ref(target) => format!("ref={target}"),
                    })
                    .collect();
                if flags.is_empty() {
                    format!("{}:{}", c.name, c.ty)
                } else {
                    format!("{}:{}:{}", c.name, c.ty, flags.join(","))
                }
            })
            .collect::<Vec<_>>()
            .join(";")
    }

    fn decode_columns(encoded: &str) -> Result<Vec<ColumnSpec>> {
        if encoded.is_empty() {
            return Ok(Vec::new());
        }
        encoded
            .split(';')
            .map(|field| {
                let mut parts = field.splitn(3, ':');
                let name = parts
                    .next()
                    .ok_or_else(|| QuillError::corruption("catalog columns", "missing name"))?
                    .to_string();
                let ty = parts
                    .next()
                    .ok_or_else(|| QuillError::corruption("catalog columns", "missing type"))?
                    .to_string();
                let flags = parts
                    .next()
                    .map(|raw| {
                        raw.split(',')
                            .filter(|s| !s.is_empty())
                            .map(|flag| {
                                if let Some(target) = flag.strip_prefix("ref=") {
                                    ColumnFlag::Ref(target.to_string())
                                } else {
                                    match flag {
                                        "notnull" => ColumnFlag::NotNull,
                                        "unique" => ColumnFlag::Unique,
                                        _ => ColumnFlag::Pk,
                                    }
                                }
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(ColumnSpec { name, ty, flags })
            })
            .collect()
    }

    pub fn encode(record: &CatalogRecord) -> Vec<u8> {
        let mut buf = vec![record.kind_tag()];
        match record {
            CatalogRecord::Table(t) => {
                write_str(&mut buf, &t.name);
                write_u32(&mut buf, t.root_page.get());
                write_u64(&mut buf, t.next_rowid);
                write_str(&mut buf, &encode_columns(&t.columns));
            }
            CatalogRecord::Index(i) => {
                write_str(&mut buf, &i.name);
                write_str(&mut buf, &i.table);
                write_str_list(&mut buf, &i.columns);
                write_u32(&mut buf, i.root_page.get());
                write_bool(&mut buf, matches!(i.kind, IndexKind::Trigram));
                write_bool(&mut buf, i.unique);
            }
            CatalogRecord::View(v) => {
                write_str(&mut buf, &v.name);
                write_str(&mut buf, &v.sql_text);
                write_str_list(&mut buf, &v.column_names);
                write_str_list(&mut buf, &v.dependencies);
            }
        }
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<CatalogRecord> {
        let mut reader = Reader::new(bytes);
        let tag = reader.u8()?;
        match tag {
            KIND_TABLE => {
                let name = reader.str()?;
                let root_page = PageId::new(reader.u32()?);
                let next_rowid = reader.u64()?;
                let columns = decode_columns(&reader.str()?)?;
                Ok(CatalogRecord::Table(TableRecord { name, root_page, next_rowid, columns }))
            }
            KIND_INDEX => {
                let name = reader.str()?;
                let table = reader.str()?;
                let columns = reader.str_list()?;
                let root_page = PageId::new(reader.u32()?);
                let trigram = reader.bool()?;
                let unique = reader.bool()?;
                Ok(CatalogRecord::Index(IndexRecord {
                    name,
                    table,
                    columns,
                    root_page,
                    kind: if trigram { IndexKind::Trigram } else { IndexKind::Btree },
                    unique,
                }))
            }
            KIND_VIEW => {
                let name = reader.str()?;
                let sql_text = reader.str()?;
                let column_names = reader.str_list()?;
                let dependencies = reader.str_list()?;
                Ok(CatalogRecord::View(ViewRecord { name, sql_text, column_names, dependencies }))
            }
            other => Err(QuillError::corruption("catalog record kind", other)),
        }
    }
}

/// The in-memory catalog: a write-through cache over the catalog B+Tree
/// (spec.md §9's "sorted in-memory catalog dictionaries" pattern). Reads
/// never touch the tree; every mutation persists to it before returning.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: HashMap<u64, CatalogRecord>,
    dependents: HashMap<String, HashSet<String>>,
}

impl Catalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn rebuild_dependents(&mut self) {
        self.dependents.clear();
        for record in self.entries.values() {
            if let CatalogRecord::View(view) = record {
                for dep in &view.dependencies {
                    self.dependents.entry(dep.clone()).or_default().insert(view.name.clone());
                }
            }
        }
    }

    /// Loads the catalog by a full scan of the B+Tree rooted at
    /// `catalog_root`, per spec.md §4.7's "on open, reloaded by full-scan."
    pub fn load(store: &mut impl PageRead, catalog_root: PageId) -> Result<Self> {
        let mut catalog = Self::new();
        let mut cursor = quilldb_btree::open_cursor(store, catalog_root)?;
        while let Some((_, value)) = cursor.next()? {
            let record = codec::decode(&value)?;
            catalog.entries.insert(record_key_of(&record), record);
        }
        catalog.rebuild_dependents();
        Ok(catalog)
    }

    /// Repairs `next_rowid` for every table whose stored counter lagged the
    /// actual maximum key in its data tree (spec.md §4.7, invariant 9):
    /// crashes can lose the post-insert catalog update even though the row
    /// itself committed.
    pub fn repair_next_rowids(&mut self, store: &mut impl PageRead) -> Result<()> {
        let table_keys: Vec<u64> = self
            .entries
            .iter()
            .filter(|(_, r)| matches!(r, CatalogRecord::Table(_)))
            .map(|(&k, _)| k)
            .collect();
        for key in table_keys {
            let CatalogRecord::Table(table) = self.entries.get(&key).expect("key came from entries") else {
                unreachable!("filtered to tables above")
            };
            let root = table.root_page;
            let max_key = max_key_in_tree(store, root)?;
            if let Some(max_key) = max_key {
                if table.next_rowid <= max_key {
                    let name = table.name.clone();
                    if let Some(CatalogRecord::Table(table)) = self.entries.get_mut(&key) {
                        info!(table = %name, old = table.next_rowid, new = max_key + 1, "repaired next_rowid after crash");
                        table.next_rowid = max_key + 1;
                    }
                }
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn has_table(&self, name: &str) -> bool {
        self.entries.contains_key(&record_key("table", name))
    }

    #[must_use]
    pub fn has_view(&self, name: &str) -> bool {
        self.entries.contains_key(&record_key("view", name))
    }

    #[must_use]
    pub fn has_table_or_view(&self, name: &str) -> bool {
        self.has_table(name) || self.has_view(name)
    }

    #[must_use]
    pub fn table(&self, name: &str) -> Option<&TableRecord> {
        match self.entries.get(&record_key("table", name)) {
            Some(CatalogRecord::Table(t)) => Some(t),
            _ => None,
        }
    }

    #[must_use]
    pub fn index(&self, name: &str) -> Option<&IndexRecord> {
        match self.entries.get(&record_key("index", name)) {
            Some(CatalogRecord::Index(i)) => Some(i),
            _ => None,
        }
    }

    #[must_use]
    pub fn view(&self, name: &str) -> Option<&ViewRecord> {
        match self.entries.get(&record_key("view", name)) {
            Some(CatalogRecord::View(v)) => Some(v),
            _ => None,
        }
    }

    /// Views that depend on `object_name` (a table, index, or other view).
    #[must_use]
    pub fn dependents_of(&self, object_name: &str) -> Vec<String> {
        self.dependents
            .get(object_name)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn upsert(
        &mut self,
        store: &mut impl PageStore,
        catalog_root: PageId,
        record: CatalogRecord,
    ) -> Result<PageId> {
        let key = record_key_of(&record);
        let encoded = codec::encode(&record);
        let new_root = if quilldb_btree::update(store, catalog_root, key, &encoded)? {
            catalog_root
        } else {
            quilldb_btree::insert(store, catalog_root, key, &encoded, true)?
        };
        let name = record.name().to_string();
        let kind = kind_label(record.kind_tag()).to_string();
        self.entries.insert(key, record);
        self.rebuild_dependents();
        debug!(kind = %kind, name = %name, "catalog record saved");
        Ok(new_root)
    }

    pub fn save_table(
        &mut self,
        store: &mut impl PageStore,
        catalog_root: PageId,
        table: TableRecord,
    ) -> Result<PageId> {
        self.upsert(store, catalog_root, CatalogRecord::Table(table))
    }

    pub fn save_index(
        &mut self,
        store: &mut impl PageStore,
        catalog_root: PageId,
        index: IndexRecord,
    ) -> Result<PageId> {
        self.upsert(store, catalog_root, CatalogRecord::Index(index))
    }

    pub fn save_view(
        &mut self,
        store: &mut impl PageStore,
        catalog_root: PageId,
        view: ViewRecord,
    ) -> Result<PageId> {
        self.upsert(store, catalog_root, CatalogRecord::View(view))
    }

    fn drop_record(
        &mut self,
        store: &mut impl PageStore,
        catalog_root: PageId,
        kind: &str,
        name: &str,
    ) -> Result<bool> {
        let key = record_key(kind, name);
        if self.entries.remove(&key).is_none() {
            return Ok(false);
        }
        quilldb_btree::delete(store, catalog_root, key)?;
        self.rebuild_dependents();
        info!(%kind, %name, "catalog record dropped");
        Ok(true)
    }

    pub fn drop_table(&mut self, store: &mut impl PageStore, catalog_root: PageId, name: &str) -> Result<bool> {
        self.drop_record(store, catalog_root, "table", name)
    }

    pub fn drop_index(&mut self, store: &mut impl PageStore, catalog_root: PageId, name: &str) -> Result<bool> {
        self.drop_record(store, catalog_root, "index", name)
    }

    pub fn drop_view(&mut self, store: &mut impl PageStore, catalog_root: PageId, name: &str) -> Result<bool> {
        self.drop_record(store, catalog_root, "view", name)
    }

    /// Renames a view in place, keeping its root position in the tree but
    /// moving it to a new catalog key (since the key is derived from the
    /// name).
    pub fn rename_view(
        &mut self,
        store: &mut impl PageStore,
        catalog_root: PageId,
        old_name: &str,
        new_name: &str,
    ) -> Result<PageId> {
        let old_key = record_key("view", old_name);
        let Some(CatalogRecord::View(mut view)) = self.entries.remove(&old_key) else {
            return Err(QuillError::internal(format!("rename_view: no such view {old_name}")));
        };
        quilldb_btree::delete(store, catalog_root, old_key)?;
        view.name = new_name.to_string();
        self.upsert(store, catalog_root, CatalogRecord::View(view))
    }
}

fn record_key_of(record: &CatalogRecord) -> u64 {
    record_key(kind_label(record.kind_tag()), record.name())
}

/// Scans `root`'s cursor for the largest key present, or `None` for an
/// empty tree. The B+Tree has no reverse cursor, so this is a forward scan.
fn max_key_in_tree(store: &mut impl PageRead, root: PageId) -> Result<Option<u64>> {
    let mut cursor = quilldb_btree::open_cursor(store, root)?;
    let mut max = None;
    while let Some((key, _)) = cursor.next()? {
        max = Some(key);
    }
    Ok(max)
}
