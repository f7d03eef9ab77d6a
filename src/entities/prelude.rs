pub use super::projects::Entity as Projects;
