pub mod common;
pub mod service;
pub mod statefulset;

pub use common::{
    API_VERSION, FIELD_MANAGER, KIND, endpoint_name, owner_reference, selector_labels,
    standard_labels,
};
pub use service::build_endpoint;
pub use statefulset::build_workload;

/// Child objects whose controller-owned fields can be written back onto a live copy
pub trait Converge {
    /// Copy the fields this controller owns from `desired` onto `self`.
    ///
    /// Returns true when `self` changed and needs to be written.
    fn converge(&mut self, desired: &Self) -> bool;
}
