pub mod doc_table;
pub mod json_path;
