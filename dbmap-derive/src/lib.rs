//! Procedural macros for dbmap.
//!
//! # Macros
//!
//! - [`Mapped`] - derive the table mapping of a struct from field descriptors
//!
//! # Example
//!
//! ```rust,ignore
//! #[derive(Default, dbmap::Mapped)]
//! #[db(table = "users")]
//! struct User {
//!     #[db("id,pk,serial")]
//!     id: i64,
//!     email: String,
//!     #[db("prefs,json")]
//!     preferences: Preferences,
//!     #[db("-")]
//!     scratch: Vec<u8>,
//! }
//! ```

use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

mod derive;

/// Derive `dbmap::Mapped` for a struct with named fields.
///
/// # Attributes
///
/// ## Struct-level
/// - `#[db(table = "table_name")]` - table name; defaults to the lower-cased
///   type name
///
/// ## Field-level
/// - `#[db("name,flag,...")]` - the field descriptor. The name defaults to
///   the lower-cased field name when empty; flags are `pk`, `auto`/`serial`,
///   `readonly`, `nullable` and `json`.
/// - `#[db("-")]` - exclude the field
///
/// Fields without an attribute map to a column named after the field.
/// Fields flagged `json` must implement `serde::Serialize` and
/// `serde::de::DeserializeOwned`; all others must implement
/// `dbmap::FieldValue`.
#[proc_macro_derive(Mapped, attributes(db))]
pub fn derive_mapped(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match derive::derive_mapped_impl(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}
