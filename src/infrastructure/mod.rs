pub mod drivers;
pub mod repositories;
pub mod services;
pub mod tasks;
