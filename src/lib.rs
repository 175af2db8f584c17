pub mod engine;     // star map, market ledger, routes, navigation, trade execution
pub mod persist;    // ledger snapshots and trade journal
pub mod players;    // in-memory player accounts and ship holds
pub mod universe;   // seeded star map and market generation
pub mod config;     // layered EngineConfig
pub mod telemetry;  // tracing + optional prometheus exporter
