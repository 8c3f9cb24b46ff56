pub mod cleanup;
pub mod cluster;
pub mod finalizers;
