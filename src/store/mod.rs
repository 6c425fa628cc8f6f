pub mod budget;
pub mod datastore;

pub use budget::DataBudget;
pub use datastore::EventStore;

#[cfg(test)]
mod datastore_tests;
