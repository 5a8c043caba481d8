pub mod api;
pub mod config;
pub mod dispatch;
pub mod humanize;
pub mod keyed_lock;
pub mod ledger;
pub mod messaging;
pub mod model;
pub mod observability;
pub mod queue;
pub mod runner;
pub mod service;
pub mod storage;
