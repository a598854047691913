pub mod icons;
pub mod output;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{banner, field, header, info, muted, section, success, warn};
pub use table::{attribute_table, sp_table, stats_table, TableBuilder};
pub use theme::{theme, Theme};
