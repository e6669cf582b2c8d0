//! Mapped-type registration and the process-wide metadata cache.
//!
//! A type opts into mapping by implementing [`Mapped`], usually through
//! `#[derive(Mapped)]`. Its [`describe`](Mapped::describe) method runs once,
//! the first time the type is resolved, and produces the type's
//! [`ColumnCollection`].
//!
//! ```rust
//! use dbmap_core::{Mapped, TableBuilder, columns};
//!
//! #[derive(Default)]
//! struct Person {
//!     id: i64,
//!     email: String,
//! }
//!
//! impl Mapped for Person {
//!     fn describe(table: &mut TableBuilder<Self>) {
//!         table
//!             .field("id", "id,pk,serial", |p| &p.id, |p| &mut p.id)
//!             .field("email", "", |p| &p.email, |p| &mut p.email);
//!     }
//! }
//!
//! let cols = columns::<Person>();
//! assert_eq!(cols.column_names_csv(), "id,email");
//! assert_eq!(cols.first().unwrap().table_name, "person");
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::collection::ColumnCollection;
use crate::column::{Accessor, Column, FieldDescriptor};
use crate::error::DbResult;
use crate::row::Row;
use crate::value::{FieldValue, Value};

/// A type that maps to a table.
pub trait Mapped: Send + Sync + Sized + 'static {
    /// Explicit table name. Defaults to the lower-cased type name.
    fn table_name() -> Option<&'static str> {
        None
    }

    /// Describe the type's fields, in declaration order.
    fn describe(table: &mut TableBuilder<Self>);

    /// Populate `self` directly from a row.
    ///
    /// Return `None` to use the generic column-by-column assignment.
    fn hydrate(&mut self, row: &Row) -> Option<DbResult<()>> {
        let _ = row;
        None
    }
}

/// The table name a mapped type renders into SQL.
pub fn table_name_of<T: Mapped>() -> String {
    if let Some(name) = T::table_name() {
        return name.to_string();
    }
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_lowercase()
}

/// Collects a type's columns during [`Mapped::describe`].
///
/// Every method consumes one declaration index, so a column's
/// [`index`](Column::index) is its field's position in the type.
pub struct TableBuilder<T> {
    table_name: String,
    columns: Vec<Column<T>>,
    next_index: usize,
}

impl<T: Mapped> TableBuilder<T> {
    /// Run `T::describe` and return the resulting collection.
    pub fn build() -> ColumnCollection<T> {
        let mut builder = Self {
            table_name: table_name_of::<T>(),
            columns: Vec::new(),
            next_index: 0,
        };
        T::describe(&mut builder);
        ColumnCollection::new(builder.columns)
    }

    /// The table name columns are attached to.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    fn push(
        &mut self,
        field_name: &'static str,
        field_type: &'static str,
        desc: Option<FieldDescriptor>,
        access: impl FnOnce() -> Accessor<T>,
    ) -> &mut Self {
        let index = self.next_index;
        self.next_index += 1;
        if let Some(desc) = desc {
            self.columns.push(Column::new(
                &self.table_name,
                field_name,
                field_type,
                index,
                desc,
                access(),
            ));
        }
        self
    }

    /// A scalar field.
    pub fn field<V, G, M>(
        &mut self,
        field_name: &'static str,
        descriptor: &str,
        get: G,
        get_mut: M,
    ) -> &mut Self
    where
        V: FieldValue,
        G: Fn(&T) -> &V + Send + Sync + 'static,
        M: Fn(&mut T) -> &mut V + Send + Sync + 'static,
    {
        let desc = FieldDescriptor::parse(field_name, descriptor);
        self.push(field_name, std::any::type_name::<V>(), desc, || {
            Accessor::scalar(get, get_mut)
        })
    }

    /// A field stored as JSON text. The `json` flag is implied.
    pub fn json<V, G, M>(
        &mut self,
        field_name: &'static str,
        descriptor: &str,
        get: G,
        get_mut: M,
    ) -> &mut Self
    where
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
        G: Fn(&T) -> &V + Send + Sync + 'static,
        M: Fn(&mut T) -> &mut V + Send + Sync + 'static,
    {
        let desc = FieldDescriptor::parse(field_name, descriptor).map(|mut d| {
            d.is_json = true;
            d
        });
        self.push(field_name, std::any::type_name::<V>(), desc, || {
            Accessor::json(get, get_mut)
        })
    }

    /// A read-through value with no setter. Assigning to it is a mapping error.
    pub fn computed<F>(&mut self, field_name: &'static str, descriptor: &str, get: F) -> &mut Self
    where
        F: Fn(&T) -> Value + Send + Sync + 'static,
    {
        let desc = FieldDescriptor::parse(field_name, descriptor);
        self.push(field_name, "computed", desc, || Accessor::computed(get))
    }

    /// A field that is not mapped, such as an embedded value.
    pub fn skip(&mut self) -> &mut Self {
        self.next_index += 1;
        self
    }
}

type CacheKey = (TypeId, Option<&'static str>);

/// Type identity to [`ColumnCollection`], built at most once per type.
///
/// One mutex covers both the lookup and the build, so concurrent first
/// resolutions of a type wait for a single build. `describe` must not
/// resolve other types through the same cache.
#[derive(Default)]
pub struct MetaCache {
    entries: Mutex<HashMap<CacheKey, Arc<dyn Any + Send + Sync>>>,
}

static GLOBAL: LazyLock<MetaCache> = LazyLock::new(MetaCache::new);

impl MetaCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache.
    pub fn global() -> &'static MetaCache {
        &GLOBAL
    }

    /// The collection for `T`, building it on first access.
    pub fn resolve<T: Mapped>(&self) -> Arc<ColumnCollection<T>> {
        let key = (TypeId::of::<T>(), T::table_name());
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get(&key) {
            if let Ok(collection) = Arc::clone(entry).downcast::<ColumnCollection<T>>() {
                return collection;
            }
        }

        let collection = Arc::new(TableBuilder::<T>::build());
        debug!(
            table = %table_name_of::<T>(),
            columns = collection.len(),
            "built column metadata"
        );
        entries.insert(key, collection.clone() as Arc<dyn Any + Send + Sync>);
        collection
    }

    /// Number of cached types.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if nothing has been resolved yet.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// The cached columns of `T`.
pub fn columns<T: Mapped>() -> Arc<ColumnCollection<T>> {
    MetaCache::global().resolve::<T>()
}

/// The cached column names of `T`, comma separated.
pub fn column_names_csv<T: Mapped>() -> String {
    columns::<T>().column_names_csv()
}
