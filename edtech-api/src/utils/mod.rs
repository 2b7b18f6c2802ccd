//! Small shared helpers

pub mod db_retry;
