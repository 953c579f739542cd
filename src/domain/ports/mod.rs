//! Ports: trait seams between the domain and its adapters.

pub mod case_repository;
pub mod command_runner;
pub mod resource_repository;

pub use case_repository::CaseRepository;
pub use command_runner::{CommandRunner, SystemCommandRunner};
pub use resource_repository::ResourceRepository;
