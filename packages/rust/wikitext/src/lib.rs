//! Wikitext handling for feedlinks.
//!
//! Only as much markup is understood as the merge needs:
//! - [`sections`]: level-N headings and the sections they open
//! - [`nodes`]: a flat tokenizer for a section lead (text, external links,
//!   and opaque template/comment/wikilink nodes)
//! - [`render`]: `* [url title]` list markup
//! - [`splice`]: locating the "External links" anchor and computing an
//!   [`InsertionPlan`]

pub mod nodes;
pub mod render;
pub mod sections;
pub mod splice;

pub use nodes::{Node, NodeKind, tokenize};
pub use render::{escape_link_url, format_external_link, format_link_list};
pub use sections::{Heading, Section, find_last_section, headings};
pub use splice::{EXTERNAL_LINKS_HEADING, ExistingLink, ExternalLinksLayout, InsertionPlan};
