//! Secondary indexes.
//!
//! A [`DataIndex`] indexes one key of the records at a wildcard path, e.g.
//! the `age` of every child of `users`. The kind of index decides which
//! tree keys a record produces and which operators can be queried:
//!
//! | kind | keys | operators |
//! |---|---|---|
//! | [`NormalIndex`] | the primitive value | `<`, `<=`, `==`, `!=`, `>=`, `>`, `exists`, `!exists`, `between`, `!between`, `like`, `!like`, `matches`, `!matches`, `in`, `!in` |
//! | [`ArrayIndex`] | each distinct array element | `contains`, `!contains` |
//! | [`FullTextIndex`] | each distinct word | `fulltext:contains`, `fulltext:!contains` |
//! | [`GeoIndex`] | the geohash of a `{ lat, long }` value | `geo:nearby` |

mod array;
mod base;
mod build;
mod cache;
mod descriptor;
mod file;
mod fulltext;
mod geo;
mod normal;
mod query;
mod results;
mod state;
mod variant;

pub use array::ArrayIndex;
pub use base::{DataIndex, IndexContext};
pub use descriptor::{IndexDescriptor, IndexKind, KEY_SENTINEL};
pub use file::{
    read_index_header, IndexFileHeader, TreeHeader, HEADER_BLOCK_SIZE, LAYOUT_VERSION, SIGNATURE,
};
pub use fulltext::{FullTextIndex, OCCURS_KEY};
pub use geo::{GeoIndex, GEOHASH_PRECISION};
pub use normal::NormalIndex;
pub use query::{tree_query, QueryOperator, QueryOptions};
pub use results::{IndexQueryHint, IndexQueryResult, IndexQueryResults, IndexQueryStats};
pub use state::IndexState;
pub use variant::{EntrySet, IndexVariant};
