pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod generation;
pub mod provider;
pub mod storage;
