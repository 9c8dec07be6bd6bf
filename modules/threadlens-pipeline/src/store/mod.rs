pub mod migrate;
pub mod postgres;

pub use postgres::PgStore;
