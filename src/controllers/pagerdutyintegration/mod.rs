pub mod controller;

pub use controller::run;

pub mod kube_client;
pub use kube_client::{read_api_key, KubeApi, KubeClient};

mod lifecycle;
pub use lifecycle::Lifecycle;

mod reconcilers;

#[cfg(test)]
pub(crate) mod fakes;
