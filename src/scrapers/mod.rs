//! Article discovery and fetching.
//!
//! Sources are not hand-coded per site any more: every site is described
//! by a [`crate::models::SourceSpec`] from configuration and collected by the
//! same pipeline:
//!
//! 1. **Indexing**: render the category listing and pull article links out
//!    of it ([`links`])
//! 2. **Paginating**: gather more listing content by URL parameter or by
//!    clicking "load more" ([`pagination`])
//! 3. **Fetching**: render each article, reduce it to text ([`text`]) and
//!    pick an illustration ([`images`])
//!
//! [`source::SourceCollector`] ties the steps together for one source.
//! Failed article fetches are logged and skipped without failing the batch.

pub mod images;
pub mod links;
pub mod pagination;
pub mod source;
pub mod text;
