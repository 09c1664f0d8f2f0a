pub mod records;
pub mod tables;

pub use records::{
    create_command, delete_command, get_command, list_command, move_command, renumber_command,
    update_command,
};
pub use tables::{
    create_dated_command, create_table_command, delete_table_command, rename_table_command,
    reorder_command, tables_command,
};
