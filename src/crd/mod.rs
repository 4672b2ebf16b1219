mod postgres;

pub use postgres::*;
