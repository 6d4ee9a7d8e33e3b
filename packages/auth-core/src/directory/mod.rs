mod postgres;

pub use postgres::PgRoleDirectory;
