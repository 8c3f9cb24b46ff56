pub mod hive;
pub mod pagerdutyintegrations;
