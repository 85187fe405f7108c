//! Database access utilities. Pool construction lives in
//! [`crate::repository::create_pool`]; this module only owns migrations.

pub mod migrate;
