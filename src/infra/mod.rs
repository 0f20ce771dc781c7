pub mod cache;
pub mod clock;
pub mod db;
pub mod memory;
pub mod repo;
pub mod storage;
