pub mod emsa3;
mod escape;
mod friendly_names;

pub use escape::{escape, escape_field, unescape, unescape_field};
pub use friendly_names::friendly_names;
