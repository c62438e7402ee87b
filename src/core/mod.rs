// Core modules implementing dequoting, record modeling, SQL emission, and errors.
pub mod dequote;
pub mod error;
pub mod record;
pub mod sql;
