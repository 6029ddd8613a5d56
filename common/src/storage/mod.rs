pub mod db;
pub mod filter_store;
pub mod ledger;
pub mod types;
pub mod vector_store;
