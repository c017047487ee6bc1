pub mod cache;
pub mod db;
pub mod devstore;
pub mod storage;
