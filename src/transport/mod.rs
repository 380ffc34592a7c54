pub mod rest;
pub mod search;
