#![doc = include_str!("../Readme.md")]

pub mod config;
pub mod database;
pub mod nested_set;
pub mod sync;
pub mod utils;
