pub mod prelude;

pub mod projects;
